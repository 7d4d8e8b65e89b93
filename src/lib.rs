//! A write-command core for the MongoDB wire protocol.
//!
//! This crate translates bulk write intents (insert, update, and delete
//! batches) into on-wire exchanges with a server node and merges the per-batch
//! replies back into a single result document. Two protocol front-ends are
//! supported and selected per node by its advertised wire version: the
//! command-based path (`insert`/`update`/`delete` commands) and the legacy
//! opcode path (`OP_INSERT`/`OP_UPDATE`/`OP_DELETE` followed by getLastError
//! when the write concern requires acknowledgement).
//!
//! The crate does not open sockets itself; all I/O goes through the
//! [`Transport`](transport::Transport) trait, which a driver (or a test
//! double) implements on top of its connection layer.

pub mod coll;
pub mod command;
pub mod concern;
pub mod error;
pub mod executor;
pub mod result;
pub mod transport;
pub mod wire;

mod bson_util;

pub use crate::{
    coll::Namespace,
    command::{WriteCommand, WriteKind},
    concern::{WriteConcern, W},
    error::{Error, ErrorKind, Result},
    executor::execute,
    result::WriteResult,
    transport::{ServerId, StreamDescription, Transport},
};
