//! Legacy wire protocol framing for write operations.

mod header;
mod message;
mod util;


pub use self::{
    header::{Header, OpCode},
    message::{DeleteFlags, InsertFlags, UpdateFlags, WriteMessage},
    util::next_request_id,
};
