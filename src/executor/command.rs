//! The command-based write path for nodes that support write commands.

use bson::{rawdoc, RawArrayBuf};
use tracing::debug;

use super::{empty_batch_error, legacy, too_large_error};
use crate::{
    bson_util,
    coll::Namespace,
    command::{will_overflow, WriteCommand},
    concern::{WriteConcern, EMPTY_WRITE_CONCERN_DOC},
    error::Result,
    result::WriteResult,
    transport::{ServerId, Transport},
};

/// Executes `command` by wrapping its operations in `insert`/`update`/`delete`
/// command documents, splitting into as many commands as the node's size and
/// batch limits require.
pub(super) fn execute_command<T: Transport>(
    command: &WriteCommand,
    transport: &mut T,
    server: ServerId,
    ns: &Namespace,
    write_concern: &WriteConcern,
    offset: usize,
    result: &mut WriteResult,
) {
    if let Err(error) = run(command, transport, server, ns, write_concern, offset, result) {
        result.record_failure(error);
    }
}

fn run<T: Transport>(
    command: &WriteCommand,
    transport: &mut T,
    server: ServerId,
    ns: &Namespace,
    write_concern: &WriteConcern,
    mut offset: usize,
    result: &mut WriteResult,
) -> Result<()> {
    let description = transport.description(server);
    let max_bson_obj_size = description.max_bson_object_size;
    let max_write_batch_size = description.max_write_batch_size;

    // If the write is unacknowledged and the node still supports the legacy
    // opcodes, submit those instead so there is no reply to wait for.
    if description.min_wire_version == -1 {
        return Ok(());
    }
    if description.min_wire_version == 0 && !write_concern.is_acknowledged() {
        debug!(
            command = command.kind().command_name(),
            "unacknowledged write on an opcode-capable node, using the legacy path"
        );
        legacy::execute_legacy(command, transport, server, ns, write_concern, offset, result);
        return Ok(());
    }

    if command.is_empty() {
        return Err(empty_batch_error(command));
    }

    let write_concern_doc = if write_concern.is_acknowledged() {
        write_concern.to_document()?
    } else {
        EMPTY_WRITE_CONCERN_DOC.clone()
    };
    let write_concern_raw = bson::to_raw_document_buf(&write_concern_doc)?;

    let entries = command.entries()?;
    let mut cursor = 0;

    loop {
        let mut body = rawdoc! {
            command.kind().command_name(): ns.coll.clone(),
            "writeConcern": write_concern_raw.clone(),
            "ordered": command.ordered(),
        };

        let mut has_more = false;
        let n_in_batch;

        if cursor == 0
            && !will_overflow(
                0,
                command.documents_byte_len(),
                command.len(),
                max_bson_obj_size,
                max_write_batch_size,
            )
        {
            // the whole buffer fits in one command; attach it in one copy
            body.append(command.kind().payload_field(), command.raw_documents().clone());
            n_in_batch = command.len();
        } else {
            let mut array = RawArrayBuf::new();
            let mut i = 0;
            let mut last_len = 0;

            while cursor + i < entries.len() {
                let entry = entries[cursor + i];
                let len = entry.as_bytes().len();
                last_len = len;

                if will_overflow(
                    array.as_bytes().len(),
                    bson_util::array_entry_size_bytes(i, len),
                    i,
                    max_bson_obj_size,
                    max_write_batch_size,
                ) {
                    has_more = true;
                    break;
                }

                array.push(entry.to_raw_document_buf());
                i += 1;
            }

            if i == 0 {
                // not even one entry fits into a command on its own
                return Err(too_large_error(i, last_len, max_bson_obj_size));
            }

            body.append(command.kind().payload_field(), array);
            n_in_batch = i;
        }

        if has_more {
            debug!(
                command = command.kind().command_name(),
                n_in_batch,
                remaining = entries.len() - cursor - n_in_batch,
                "write buffer exceeds node limits, splitting"
            );
        }

        let sent = match transport.run_command(&ns.db, &body, server) {
            Ok(reply) => {
                result.merge_command(command.kind(), &reply, offset);
                true
            }
            Err(error) => {
                result.record_failure(error);
                false
            }
        };

        offset += n_in_batch;
        cursor += n_in_batch;

        if has_more && (sent || !command.ordered()) {
            continue;
        }

        return Ok(());
    }
}
