//! Contains the `Error` and `Result` types that `mongowire` uses.

use std::{fmt, sync::Arc};

use bson::Document;
use thiserror::Error;

/// The result type for all methods that can return an error in `mongowire`.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur while assembling, sending, or merging a bulk write.
#[derive(Clone, Debug, Error)]
#[error("{kind}")]
pub struct Error {
    /// The type of error that occurred.
    pub kind: Arc<ErrorKind>,
}

impl<E> From<E> for Error
where
    ErrorKind: From<E>,
{
    fn from(err: E) -> Self {
        Self {
            kind: Arc::new(err.into()),
        }
    }
}

impl std::ops::Deref for Error {
    type Target = Arc<ErrorKind>;

    fn deref(&self) -> &Self::Target {
        &self.kind
    }
}

/// The types of errors that can occur.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An invalid argument was provided to a write operation.
    #[error("An invalid argument was provided to a write operation: {message}")]
    InvalidArgument { message: String },

    /// An executor was invoked with a buffer containing no operations.
    #[error("Cannot do an empty {command_name}")]
    EmptyBatch { command_name: &'static str },

    /// A single document exceeds the maximum BSON object size the node accepts.
    #[error(
        "Document {index} is too large for the cluster. Document is {len} bytes, max is {max_size}."
    )]
    DocumentTooLarge {
        index: usize,
        len: usize,
        max_size: i32,
    },

    /// A replacement-style update document failed validation.
    #[error("{message}")]
    MalformedUpdate { message: String },

    /// Sending a request or receiving a reply failed.
    #[error("A write operation failed to send or receive a reply: {message}")]
    Transport { message: String },

    /// No suitable node could be selected for the operation.
    #[error("Unable to select a node for the write operation: {message}")]
    ServerSelection { message: String },

    /// Wrapper around `bson::ser::Error`.
    #[error("{0}")]
    BsonSerialization(#[from] bson::ser::Error),

    /// Wrapper around `bson::de::Error`.
    #[error("{0}")]
    BsonDeserialization(#[from] bson::de::Error),

    /// Wrapper around `bson::raw::Error`.
    #[error("{0}")]
    RawBson(#[from] bson::raw::Error),

    /// Wrapper around `std::io::Error`.
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// An error reported by the server for a write operation.
    #[error("An error occurred when trying to execute a write operation: {0}")]
    Write(WriteFailure),
}

impl ErrorKind {
    /// The server error code carried by this error, if any.
    pub fn code(&self) -> Option<i32> {
        match self {
            ErrorKind::DocumentTooLarge { .. } => Some(TOO_LARGE_ERROR_CODE),
            ErrorKind::Write(WriteFailure::WriteError(ref e)) => Some(e.code),
            ErrorKind::Write(WriteFailure::WriteConcernError(ref e)) => Some(e.code),
            _ => None,
        }
    }
}

/// The error code MongoDB 2.6 reports for a document exceeding the maximum
/// BSON object size.
pub const TOO_LARGE_ERROR_CODE: i32 = 2;

/// An error that occurred during a write operation that wasn't due to being
/// unable to satisfy a write concern.
#[derive(Clone, Debug, PartialEq)]
pub struct WriteError {
    /// Identifies the type of write error.
    pub code: i32,

    /// The name associated with the error code.
    ///
    /// Note that the server will not return this in some cases, hence
    /// `code_name` being an `Option`.
    pub code_name: Option<String>,

    /// A description of the error that occurred.
    pub message: String,
}

impl fmt::Display for WriteError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "({}): {}", self.code, self.message)
    }
}

/// An error that occurred due to not being able to satisfy a write concern.
#[derive(Clone, Debug, PartialEq)]
pub struct WriteConcernError {
    /// Identifies the type of write concern error.
    pub code: i32,

    /// The name associated with the error code.
    pub code_name: Option<String>,

    /// A description of the error that occurred.
    pub message: String,
}

impl WriteConcernError {
    /// Builds a `WriteConcernError` from the document stored in a reply's
    /// `writeConcernError` field.
    pub(crate) fn from_document(doc: &Document) -> Self {
        Self {
            code: doc.get_i32("code").unwrap_or(0),
            code_name: doc.get_str("codeName").ok().map(String::from),
            message: doc.get_str("errmsg").unwrap_or_default().to_string(),
        }
    }
}

impl fmt::Display for WriteConcernError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "({}): {}", self.code, self.message)
    }
}

/// An error that occurred when trying to execute a write operation.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteFailure {
    WriteConcernError(WriteConcernError),
    WriteError(WriteError),
}

impl fmt::Display for WriteFailure {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WriteFailure::WriteConcernError(ref e) => write!(fmt, "write concern error {}", e),
            WriteFailure::WriteError(ref e) => write!(fmt, "write error {}", e),
        }
    }
}
