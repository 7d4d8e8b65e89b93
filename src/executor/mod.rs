//! Execution of a write buffer against a server node.

mod command;
mod legacy;

#[cfg(test)]
mod test;

use bson::doc;
use tracing::debug;

use crate::{
    coll::Namespace,
    command::WriteCommand,
    concern::WriteConcern,
    error::{Error, ErrorKind, TOO_LARGE_ERROR_CODE},
    result::WriteResult,
    transport::{ServerId, Transport},
    wire::OpCode,
};

/// The lowest wire version at which a server accepts `insert`/`update`/
/// `delete` commands.
const WRITE_COMMAND_WIRE_VERSION: i32 = 2;

/// Executes `command` against a node, feeding every reply into `result`.
///
/// When `server` is `None`, the transport preselects a node suitable for an
/// insert under the given write concern. `offset` is the number of operations
/// of the caller's logical batch that precede this buffer; it flows into every
/// merge so the indices in the final result refer to the caller's positions.
///
/// All failures are recorded on `result`; inspect them through
/// [`WriteResult::complete`].
pub fn execute<T: Transport>(
    command: &WriteCommand,
    transport: &mut T,
    server: Option<ServerId>,
    ns: &Namespace,
    write_concern: &WriteConcern,
    offset: usize,
    result: &mut WriteResult,
) {
    if let Err(error) = write_concern.validate() {
        result.record_failure(error);
        return;
    }

    let server = match server {
        Some(server) => server,
        None => match transport.preselect(OpCode::Insert, write_concern) {
            Ok(server) => server,
            Err(error) => {
                result.record_failure(error);
                return;
            }
        },
    };

    let description = transport.description(server);
    if description.max_wire_version == -1 {
        // the transport has already recorded what is wrong with this node
        return;
    }

    debug!(
        command = command.kind().command_name(),
        max_wire_version = description.max_wire_version,
        n_documents = command.len(),
        "dispatching write buffer"
    );

    if description.max_wire_version >= WRITE_COMMAND_WIRE_VERSION {
        command::execute_command(command, transport, server, ns, write_concern, offset, result);
    } else {
        legacy::execute_legacy(command, transport, server, ns, write_concern, offset, result);
    }
}

/// The error raised when an executor is handed a buffer with no operations.
fn empty_batch_error(command: &WriteCommand) -> Error {
    ErrorKind::EmptyBatch {
        command_name: command.kind().command_name(),
    }
    .into()
}

/// The terminal error for a document that exceeds `max_size` even on its own.
fn too_large_error(index: usize, len: usize, max_size: i32) -> Error {
    ErrorKind::DocumentTooLarge {
        index,
        len,
        max_size,
    }
    .into()
}

/// A `{index, err, code}` document carrying the same information as
/// [`too_large_error`], shaped for the legacy merge path.
fn too_large_write_error_doc(index: usize, len: usize, max_size: i32) -> bson::Document {
    let error = too_large_error(index, len, max_size);
    doc! {
        "index": index as i32,
        "err": error.kind.to_string(),
        "code": TOO_LARGE_ERROR_CODE,
    }
}
