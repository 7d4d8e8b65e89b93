use std::io::Write;

use bitflags::bitflags;
use bson::RawDocument;
use byteorder::{LittleEndian, WriteBytesExt};

use super::{
    header::{Header, OpCode},
    util::write_cstring,
};
use crate::error::Result;

bitflags! {
    /// The flag bits of an OP_INSERT message.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct InsertFlags: i32 {
        /// Keep inserting the remaining documents of the message after one of
        /// them fails.
        const CONTINUE_ON_ERROR = 0b0000_0001;
    }
}

bitflags! {
    /// The flag bits of an OP_UPDATE message.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct UpdateFlags: i32 {
        /// Insert the document if no document matches the selector.
        const UPSERT = 0b0000_0001;

        /// Update all matching documents rather than just the first.
        const MULTI_UPDATE = 0b0000_0010;
    }
}

bitflags! {
    /// The flag bits of an OP_DELETE message.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct DeleteFlags: i32 {
        /// Remove only the first matching document.
        const SINGLE_REMOVE = 0b0000_0001;
    }
}

/// One legacy write operation, borrowed from the command buffer for the
/// duration of a [`Transport::send`](crate::transport::Transport::send) call.
#[derive(Clone, Debug)]
pub enum WriteMessage<'a> {
    /// An OP_INSERT message carrying one or more documents.
    Insert {
        namespace: &'a str,
        flags: InsertFlags,
        documents: &'a [&'a RawDocument],
    },

    /// An OP_UPDATE message carrying a selector and an update document.
    Update {
        namespace: &'a str,
        flags: UpdateFlags,
        selector: &'a RawDocument,
        update: &'a RawDocument,
    },

    /// An OP_DELETE message carrying a selector.
    Delete {
        namespace: &'a str,
        flags: DeleteFlags,
        selector: &'a RawDocument,
    },
}

impl WriteMessage<'_> {
    /// The op code of this message.
    pub fn op_code(&self) -> OpCode {
        match self {
            WriteMessage::Insert { .. } => OpCode::Insert,
            WriteMessage::Update { .. } => OpCode::Update,
            WriteMessage::Delete { .. } => OpCode::Delete,
        }
    }

    fn namespace(&self) -> &str {
        match self {
            WriteMessage::Insert { namespace, .. } => namespace,
            WriteMessage::Update { namespace, .. } => namespace,
            WriteMessage::Delete { namespace, .. } => namespace,
        }
    }

    /// The total length in bytes of the message, header included.
    pub fn encoded_len(&self) -> usize {
        let body = match self {
            WriteMessage::Insert { documents, .. } => documents
                .iter()
                .map(|doc| doc.as_bytes().len())
                .sum::<usize>(),
            WriteMessage::Update {
                selector, update, ..
            } => 4 + selector.as_bytes().len() + update.as_bytes().len(),
            WriteMessage::Delete { selector, .. } => 4 + selector.as_bytes().len(),
        };

        // header, flags (or the leading ZERO), namespace cstring, body
        Header::LENGTH + 4 + self.namespace().len() + 1 + body
    }

    /// Serializes the message and writes the bytes to `writer`.
    pub fn write_to<W: Write>(&self, writer: &mut W, request_id: i32) -> Result<()> {
        let header = Header {
            length: self.encoded_len() as i32,
            request_id,
            response_to: 0,
            op_code: self.op_code(),
        };
        header.write_to(writer)?;

        match self {
            WriteMessage::Insert {
                namespace,
                flags,
                documents,
            } => {
                writer.write_i32::<LittleEndian>(flags.bits())?;
                write_cstring(writer, namespace)?;
                for document in documents.iter() {
                    writer.write_all(document.as_bytes())?;
                }
            }
            WriteMessage::Update {
                namespace,
                flags,
                selector,
                update,
            } => {
                writer.write_i32::<LittleEndian>(0)?;
                write_cstring(writer, namespace)?;
                writer.write_i32::<LittleEndian>(flags.bits())?;
                writer.write_all(selector.as_bytes())?;
                writer.write_all(update.as_bytes())?;
            }
            WriteMessage::Delete {
                namespace,
                flags,
                selector,
            } => {
                writer.write_i32::<LittleEndian>(0)?;
                write_cstring(writer, namespace)?;
                writer.write_i32::<LittleEndian>(flags.bits())?;
                writer.write_all(selector.as_bytes())?;
            }
        }

        Ok(())
    }
}
