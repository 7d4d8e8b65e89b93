//! The legacy opcode write path for nodes that predate write commands.

use bson::{Bson, Document, RawBsonRef, RawDocument};

use super::{empty_batch_error, too_large_write_error_doc};
use crate::{
    bson_util,
    coll::{Namespace, MAX_NAMESPACE_LENGTH},
    command::{WriteCommand, WriteKind},
    concern::WriteConcern,
    error::{ErrorKind, Result},
    result::WriteResult,
    transport::{ServerId, Transport},
    wire::{DeleteFlags, Header, InsertFlags, UpdateFlags, WriteMessage},
};

/// Executes `command` with one OP_INSERT/OP_UPDATE/OP_DELETE exchange per
/// frame, following each with a getLastError reception when the write concern
/// requires acknowledgement.
pub(super) fn execute_legacy<T: Transport>(
    command: &WriteCommand,
    transport: &mut T,
    server: ServerId,
    ns: &Namespace,
    write_concern: &WriteConcern,
    offset: usize,
    result: &mut WriteResult,
) {
    let outcome = match command.kind() {
        WriteKind::Delete { multi } => {
            delete_legacy(command, transport, server, ns, write_concern, offset, result, multi)
        }
        WriteKind::Insert { allow_bulk } => insert_legacy(
            command,
            transport,
            server,
            ns,
            write_concern,
            offset,
            result,
            allow_bulk,
        ),
        WriteKind::Update => {
            update_legacy(command, transport, server, ns, write_concern, offset, result)
        }
    };

    if let Err(error) = outcome {
        result.record_failure(error);
    }
}

/// The `<db>.<collection>` string for legacy frames, bounded by the protocol
/// maximum.
fn namespace_string(ns: &Namespace) -> Result<String> {
    let full_name = ns.full_name();
    if full_name.len() > MAX_NAMESPACE_LENGTH {
        return Err(ErrorKind::InvalidArgument {
            message: format!(
                "namespace {} exceeds the maximum length of {} bytes",
                full_name, MAX_NAMESPACE_LENGTH
            ),
        }
        .into());
    }
    Ok(full_name)
}

fn entry_selector<'a>(entry: &'a RawDocument) -> Result<&'a RawDocument> {
    entry
        .get("q")?
        .and_then(RawBsonRef::as_document)
        .ok_or_else(|| {
            ErrorKind::InvalidArgument {
                message: "write buffer entry is missing its selector".to_string(),
            }
            .into()
        })
}

#[allow(clippy::too_many_arguments)]
fn delete_legacy<T: Transport>(
    command: &WriteCommand,
    transport: &mut T,
    mut server: ServerId,
    ns: &Namespace,
    write_concern: &WriteConcern,
    mut offset: usize,
    result: &mut WriteResult,
    multi: bool,
) -> Result<()> {
    let entries = command.entries()?;
    if entries.is_empty() {
        return Err(empty_batch_error(command));
    }

    let ns_str = namespace_string(ns)?;
    let flags = if multi {
        DeleteFlags::empty()
    } else {
        DeleteFlags::SINGLE_REMOVE
    };

    for entry in entries {
        let selector = entry_selector(entry)?;
        let message = WriteMessage::Delete {
            namespace: &ns_str,
            flags,
            selector,
        };

        server = transport.send(&message, server, write_concern)?;

        if write_concern.is_acknowledged() {
            let reply = transport.recv_gle(server)?;
            result.merge_legacy(command.kind(), &reply, offset);
            offset += 1;
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn insert_legacy<T: Transport>(
    command: &WriteCommand,
    transport: &mut T,
    mut server: ServerId,
    ns: &Namespace,
    write_concern: &WriteConcern,
    offset: usize,
    result: &mut WriteResult,
    allow_bulk: bool,
) -> Result<()> {
    let entries = command.entries()?;
    if entries.is_empty() {
        return Err(empty_batch_error(command));
    }

    let description = transport.description(server);
    let max_bson_obj_size = description.max_bson_object_size;
    let max_msg_size = description.max_message_size_bytes.max(0) as usize;
    let singly = !allow_bulk;

    let ns_str = namespace_string(ns)?;
    let mut current_offset = offset;
    let mut index = 0;

    loop {
        let mut has_more = false;
        let mut batch: Vec<&RawDocument> = Vec::new();
        let mut size = Header::LENGTH + 4 + ns_str.len() + 1;

        while index < entries.len() {
            let document = entries[index];
            let len = document.as_bytes().len();

            if len > max_bson_obj_size.max(0) as usize {
                // the document can never be sent; report it and either give up
                // (ordered) or skip it (unordered)
                let error_doc = too_large_write_error_doc(index, len, max_bson_obj_size);
                result.merge_legacy(command.kind(), &error_doc, offset + index);

                if command.ordered() {
                    // send the batch built so far, if any, and stop
                    break;
                }
            } else if (batch.len() == 1 && singly) || size > max_msg_size.saturating_sub(len) {
                // batch is full; send it and start the next one
                has_more = true;
                break;
            } else {
                batch.push(document);
                size += len;
            }

            index += 1;
        }

        let mut gle: Option<Document> = None;

        if !batch.is_empty() {
            let flags = if command.ordered() {
                InsertFlags::empty()
            } else {
                InsertFlags::CONTINUE_ON_ERROR
            };
            let message = WriteMessage::Insert {
                namespace: &ns_str,
                flags,
                documents: &batch,
            };

            server = transport.send(&message, server, write_concern)?;

            if write_concern.is_acknowledged() {
                let mut reply = transport.recv_gle(server)?;

                let err_set = reply.get("err").map_or(false, bson_util::as_bool);

                // A legacy insert acknowledgement reports n as zero. Overwrite
                // it with the batch size so the merge knows how many were
                // tried.
                if !err_set && reply.get_i32("n").map_or(false, |n| n == 0) {
                    reply.insert("n", batch.len() as i32);
                }

                gle = Some(reply);
            }
        }

        if let Some(reply) = gle {
            result.merge_legacy(command.kind(), &reply, current_offset);
            current_offset = offset + index;
        }

        if !has_more {
            return Ok(());
        }
    }
}

fn update_legacy<T: Transport>(
    command: &WriteCommand,
    transport: &mut T,
    mut server: ServerId,
    ns: &Namespace,
    write_concern: &WriteConcern,
    mut offset: usize,
    result: &mut WriteResult,
) -> Result<()> {
    let entries = command.entries()?;
    if entries.is_empty() {
        return Err(empty_batch_error(command));
    }

    // Check every replacement-style update document before any wire work; a
    // single invalid one aborts the whole buffer.
    for entry in &entries {
        let update = match entry.get("u")?.and_then(RawBsonRef::as_document) {
            Some(update) => update,
            None => {
                return Err(ErrorKind::MalformedUpdate {
                    message: "updates is malformed.".to_string(),
                }
                .into())
            }
        };

        let replacement_style = match update.into_iter().next() {
            // an empty update document has no keys to object to
            None => false,
            Some(Ok((key, _))) => !key.starts_with('$'),
            // a key that cannot be read means the document is corrupt
            Some(Err(_)) => true,
        };

        if replacement_style && !bson_util::is_valid_replacement_document(update) {
            return Err(ErrorKind::MalformedUpdate {
                message: "update document is corrupt or contains invalid keys including $ or ."
                    .to_string(),
            }
            .into());
        }
    }

    let ns_str = namespace_string(ns)?;

    for entry in &entries {
        let mut flags = UpdateFlags::empty();
        let mut selector: Option<&RawDocument> = None;
        let mut update: Option<&RawDocument> = None;
        let mut is_upsert = false;

        for element in *entry {
            let (key, value) = element?;
            match key {
                "u" => update = value.as_document(),
                "q" => selector = value.as_document(),
                "multi" => {
                    if value.as_bool().unwrap_or(false) {
                        flags |= UpdateFlags::MULTI_UPDATE;
                    }
                }
                "upsert" => {
                    if value.as_bool().unwrap_or(false) {
                        flags |= UpdateFlags::UPSERT;
                    }
                    is_upsert = true;
                }
                _ => {}
            }
        }

        let (selector, update) = match (selector, update) {
            (Some(selector), Some(update)) => (selector, update),
            _ => {
                return Err(ErrorKind::MalformedUpdate {
                    message: "updates is malformed.".to_string(),
                }
                .into())
            }
        };

        let message = WriteMessage::Update {
            namespace: &ns_str,
            flags,
            selector,
            update,
        };

        server = transport.send(&message, server, write_concern)?;

        if write_concern.is_acknowledged() {
            let mut reply = transport.recv_gle(server)?;
            let affected = reply.get_i32("n").unwrap_or(0);

            // Servers before 2.6 do not report the _id of an upsert whose _id
            // is not an ObjectId; recover it from the update document or the
            // selector.
            if is_upsert
                && affected > 0
                && reply.get("upserted").is_none()
                && matches!(reply.get("updatedExisting"), Some(Bson::Boolean(false)))
            {
                let id = match update.get("_id")? {
                    Some(id) => Some(id),
                    None => selector.get("_id")?,
                };
                if let Some(id) = id {
                    reply.insert("upserted", Bson::try_from(id.to_raw_bson())?);
                }
            }

            result.merge_legacy(command.kind(), &reply, offset);
            offset += 1;
        }
    }

    Ok(())
}
