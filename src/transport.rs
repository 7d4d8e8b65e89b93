//! The interface between the write-command core and a driver's connection
//! layer.

use bson::{Document, RawDocument};

use crate::{
    concern::WriteConcern,
    error::Result,
    wire::{OpCode, WriteMessage},
};

/// An opaque identifier for a server node held by the transport layer. The
/// core never inspects it; it only threads it through successive calls so the
/// transport can pin a write sequence to one connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ServerId(pub u32);

/// Contains the limits and capabilities a server node advertises, in a format
/// digestible by the executors.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamDescription {
    /// The minimum wire version that the server understands.
    pub min_wire_version: i32,

    /// The maximum wire version that the server understands.
    pub max_wire_version: i32,

    /// The maximum size in bytes of a single BSON document the server accepts.
    pub max_bson_object_size: i32,

    /// The maximum size in bytes of a single wire message the server accepts.
    pub max_message_size_bytes: i32,

    /// The maximum number of operations the server accepts in one write
    /// command; 0 means unbounded.
    pub max_write_batch_size: i32,
}

impl StreamDescription {
    /// Gets a description of a stream for a server that supports write
    /// commands. This should be used for test purposes only.
    pub fn new_testing() -> Self {
        Self {
            min_wire_version: 0,
            max_wire_version: 2,
            max_bson_object_size: 16 * 1024 * 1024,
            max_message_size_bytes: 48_000_000,
            max_write_batch_size: 1000,
        }
    }

    /// The description returned for a node the transport knows nothing about.
    /// `-1` in every field; the dispatcher treats this as "the transport has
    /// already recorded an error" and returns silently.
    pub fn unknown() -> Self {
        Self {
            min_wire_version: -1,
            max_wire_version: -1,
            max_bson_object_size: -1,
            max_message_size_bytes: -1,
            max_write_batch_size: -1,
        }
    }
}

/// The operations the write-command core needs from a connection layer.
///
/// Implementations own all sockets and framing concerns; the core calls these
/// methods at well-defined blocking points and honors any `Err` by marking the
/// accumulated result failed and stopping. A scripted implementation of this
/// trait is sufficient to test every wire behavior of the core without
/// opening a socket.
pub trait Transport {
    /// Sends one legacy write message to `server`, returning the (possibly
    /// updated) server id the message was actually delivered to.
    fn send(
        &mut self,
        message: &WriteMessage<'_>,
        server: ServerId,
        write_concern: &WriteConcern,
    ) -> Result<ServerId>;

    /// Receives one getLastError-shaped reply document from `server`.
    fn recv_gle(&mut self, server: ServerId) -> Result<Document>;

    /// Runs a single command round-trip against `server` and returns the reply
    /// document. `Err` means the exchange itself failed and there is no reply.
    fn run_command(
        &mut self,
        db: &str,
        command: &RawDocument,
        server: ServerId,
    ) -> Result<Document>;

    /// Selects a node suitable for a write issued with `op` under the given
    /// write concern.
    fn preselect(&mut self, op: OpCode, write_concern: &WriteConcern) -> Result<ServerId>;

    /// The limits and capabilities `server` advertises.
    /// [`StreamDescription::unknown`] signals an unreachable or unknown node.
    fn description(&self, server: ServerId) -> StreamDescription;
}
