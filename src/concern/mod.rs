//! The slice of write-concern behavior the write core depends on.
//!
//! A full write-concern policy object lives outside this crate. The executors
//! only ever ask three things of one: whether the server will send a reply
//! that must be awaited, whether the policy is one a server accepts at all,
//! and what to put in the `writeConcern` field of a write command.
//! [`WriteConcern`] carries exactly that and nothing more.


use std::time::Duration;

use bson::Document;
use lazy_static::lazy_static;

use crate::error::{ErrorKind, Result};

lazy_static! {
    /// The document attached as `writeConcern` when a command does not require
    /// acknowledgement. Shared and read-only.
    pub(crate) static ref EMPTY_WRITE_CONCERN_DOC: Document = Document::new();
}

/// The value of the `w` field: on the wire it is either a node count or the
/// name of a confirmation mode.
#[derive(Clone, Debug, PartialEq)]
pub enum W {
    /// Confirmation from a fixed number of nodes. Zero asks for no
    /// confirmation at all, making the write unacknowledged.
    Count(i32),

    /// Confirmation from a named set of nodes, such as `"majority"` or a
    /// replica set tag.
    Mode(String),
}

/// The acknowledgement requirements of one write, reduced to the form the
/// executors consume.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WriteConcern {
    /// How much of the cluster must confirm the write, if the caller asked
    /// for anything beyond the server default.
    pub w: Option<W>,

    /// How long the server may spend gathering confirmations before it
    /// reports a write concern error instead.
    pub w_timeout: Option<Duration>,

    /// Whether the write must reach the on-disk journal before it counts as
    /// confirmed.
    pub journal: Option<bool>,
}

impl WriteConcern {
    /// Whether the server will send a reply that the executors must wait for.
    /// Only `w: 0` without a journal requirement goes unacknowledged.
    pub fn is_acknowledged(&self) -> bool {
        self.w != Some(W::Count(0)) || self.journal == Some(true)
    }

    /// Rejects combinations no server accepts: a negative node count, and
    /// journalling on a write that asks for no confirmation.
    pub fn validate(&self) -> Result<()> {
        if let Some(W::Count(count)) = self.w {
            if count < 0 {
                return Err(ErrorKind::InvalidArgument {
                    message: "write concern `w` field cannot be negative integer".to_string(),
                }
                .into());
            }
        }

        if self.w == Some(W::Count(0)) && self.journal == Some(true) {
            return Err(ErrorKind::InvalidArgument {
                message: "write concern `j` field cannot be true if `w` field is 0".to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// The `writeConcern` sub-document of a write command.
    pub(crate) fn to_document(&self) -> Result<Document> {
        self.validate()?;

        let mut doc = Document::new();
        match self.w {
            Some(W::Count(count)) => {
                doc.insert("w", count);
            }
            Some(W::Mode(ref mode)) => {
                doc.insert("w", mode.as_str());
            }
            None => {}
        }
        if let Some(w_timeout) = self.w_timeout {
            doc.insert("wtimeout", w_timeout.as_millis() as i64);
        }
        if let Some(journal) = self.journal {
            doc.insert("j", journal);
        }

        Ok(doc)
    }
}
