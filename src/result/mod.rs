//! Accumulation of per-batch server replies into a single write result.


use bson::{doc, Bson, Document};

use crate::{
    command::WriteKind,
    error::{Error, ErrorKind, Result, WriteError, WriteFailure},
};

/// Aggregates the replies of every server exchange a write buffer produced
/// into one user-facing result.
///
/// The `offset` passed to the merge methods is the number of operations of the
/// caller's original batch that preceded the sub-batch a reply answers, so the
/// indices stored in `writeErrors` and `upserted` always refer to positions in
/// the original batch rather than in a server sub-batch.
#[derive(Debug, Default)]
pub struct WriteResult {
    n_inserted: i32,
    n_matched: i32,
    n_modified: i32,
    n_removed: i32,
    n_upserted: i32,

    upserted: Vec<Document>,
    write_errors: Vec<Document>,
    write_concern_error: Option<Document>,

    failed: bool,
    omit_n_modified: bool,
    error: Option<Error>,
}

impl WriteResult {
    /// Creates an empty result.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of documents inserted.
    pub fn inserted_count(&self) -> i32 {
        self.n_inserted
    }

    /// The number of documents matched by update selectors.
    pub fn matched_count(&self) -> i32 {
        self.n_matched
    }

    /// The number of documents modified, if every contributing reply reported
    /// it.
    pub fn modified_count(&self) -> Option<i32> {
        if self.omit_n_modified {
            None
        } else {
            Some(self.n_modified)
        }
    }

    /// The number of documents removed.
    pub fn removed_count(&self) -> i32 {
        self.n_removed
    }

    /// The number of documents upserted.
    pub fn upserted_count(&self) -> i32 {
        self.n_upserted
    }

    /// The per-operation errors reported by the server, with indices relative
    /// to the caller's original batch.
    pub fn write_errors(&self) -> &[Document] {
        &self.write_errors
    }

    /// The most recent write concern error reported by the server, if any.
    pub fn write_concern_error(&self) -> Option<&Document> {
        self.write_concern_error.as_ref()
    }

    /// Whether a transport failure or any write error occurred.
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// The terminal error recorded by the executors, if any.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Marks the result failed with a terminal error.
    pub(crate) fn record_failure(&mut self, error: Error) {
        self.failed = true;
        self.error = Some(error);
    }

    /// Merges one write command reply received at `offset` operations into the
    /// caller's batch.
    pub(crate) fn merge_command(&mut self, kind: WriteKind, reply: &Document, offset: usize) {
        let affected = reply.get_i32("n").unwrap_or(0);

        if let Ok(errors) = reply.get_array("writeErrors") {
            if !errors.is_empty() {
                self.failed = true;
            }
        }

        match kind {
            WriteKind::Insert { .. } => self.n_inserted += affected,
            WriteKind::Delete { .. } => self.n_removed += affected,
            WriteKind::Update => {
                // the server reports each upserted _id with its index into
                // this batch: "upserted": [{"index": 4, "_id": ObjectId()}]
                if let Some(upserted) = reply.get("upserted") {
                    let mut n_upserted = 0;

                    if let Bson::Array(entries) = upserted {
                        for entry in entries {
                            let entry = match entry.as_document() {
                                Some(doc) => doc,
                                None => continue,
                            };
                            let server_index = match entry.get_i32("index") {
                                Ok(index) => index,
                                Err(_) => continue,
                            };
                            if let Some(id) = entry.get("_id") {
                                self.append_upsert(offset + server_index as usize, id.clone());
                                n_upserted += 1;
                            }
                        }
                    }

                    self.n_upserted += n_upserted;
                    // XXX: this nMatched accounting is suspect and needs
                    // checking against what the server actually reports.
                    self.n_matched += (affected - n_upserted).max(0);
                } else {
                    self.n_matched += affected;
                }

                // In a mixed-version sharded cluster an update reply may or
                // may not carry nModified (SERVER-13001). If any reply does
                // not, no valid final count can be reported, so the field is
                // omitted entirely. nModified can also be null, which must be
                // omitted as well.
                match reply.get_i32("nModified") {
                    Ok(n_modified) => self.n_modified += n_modified,
                    Err(_) => self.omit_n_modified = true,
                }
            }
        }

        if let Ok(errors) = reply.get_array("writeErrors") {
            self.merge_write_errors(offset, errors);
        }

        if let Ok(wc_error) = reply.get_document("writeConcernError") {
            if !wc_error.is_empty() {
                self.write_concern_error = Some(wc_error.clone());
            }
        }
    }

    /// Merges one getLastError reply received at `offset` operations into the
    /// caller's batch.
    pub(crate) fn merge_legacy(&mut self, kind: WriteKind, reply: &Document, offset: usize) {
        let n = reply.get_i32("n").unwrap_or(0);
        let err = reply.get_str("err").ok();
        let code = reply.get_i32("code").unwrap_or(0);

        if let Some(err) = err {
            if code != 0 {
                self.failed = true;
                self.error = Some(
                    ErrorKind::Write(WriteFailure::WriteError(WriteError {
                        code,
                        code_name: None,
                        message: err.to_string(),
                    }))
                    .into(),
                );

                let synthesized = vec![Bson::Document(doc! {
                    "index": 0,
                    "code": code,
                    "errmsg": err,
                })];
                self.merge_write_errors(offset, &synthesized);
            }
        }

        match kind {
            WriteKind::Insert { .. } => self.n_inserted += n,
            WriteKind::Delete { .. } => self.n_removed += n,
            WriteKind::Update => match reply.get("upserted") {
                // old servers report a single upserted _id as a bare value
                Some(value) if !matches!(value, Bson::Array(_)) => {
                    self.n_upserted += n;
                    self.append_upsert(offset, value.clone());
                }
                Some(Bson::Array(entries)) => {
                    self.n_upserted += n;
                    let mut upsert_idx = 0;
                    for entry in entries {
                        let entry = match entry.as_document() {
                            Some(doc) => doc,
                            None => continue,
                        };
                        if let Some(id) = entry.get("_id") {
                            self.append_upsert(offset + upsert_idx, id.clone());
                            upsert_idx += 1;
                        }
                    }
                }
                _ => {
                    if n == 1
                        && matches!(reply.get("updatedExisting"), Some(Bson::Boolean(false)))
                    {
                        self.n_upserted += n;
                    } else {
                        self.n_matched += n;
                    }
                }
            },
        }

        // legacy replies never carry a modified count
        self.omit_n_modified = true;
    }

    fn append_upsert(&mut self, index: usize, id: Bson) {
        self.upserted.push(doc! {
            "index": index as i32,
            "_id": id,
        });
    }

    /// Appends reply write errors, rewriting each entry's `index` from
    /// sub-batch-relative to batch-relative and preserving every other field
    /// verbatim.
    fn merge_write_errors(&mut self, offset: usize, errors: &[Bson]) {
        for entry in errors {
            let entry = match entry.as_document() {
                Some(doc) => doc,
                None => continue,
            };

            let mut merged = Document::new();
            for (key, value) in entry {
                match (key.as_str(), value) {
                    ("index", Bson::Int32(index)) => {
                        merged.insert("index", offset as i32 + index);
                    }
                    _ => {
                        merged.insert(key.clone(), value.clone());
                    }
                }
            }
            self.write_errors.push(merged);
        }
    }

    /// Writes the accumulated counters and error arrays into `reply`.
    ///
    /// Returns `Ok` iff no transport failure occurred and both the write error
    /// array and the write concern error are empty. On failure the returned
    /// error is the recorded terminal error when one exists, otherwise it is
    /// synthesized from the first write error or the write concern error.
    ///
    /// This method does not consume the accumulated state; completing twice
    /// into two fresh documents yields identical output.
    pub fn complete(&self, reply: &mut Document) -> Result<()> {
        let ok = !self.failed
            && self.write_concern_error.is_none()
            && self.write_errors.is_empty();

        reply.insert("nInserted", self.n_inserted);
        reply.insert("nMatched", self.n_matched);
        if !self.omit_n_modified {
            reply.insert("nModified", self.n_modified);
        }
        reply.insert("nRemoved", self.n_removed);
        reply.insert("nUpserted", self.n_upserted);
        if !self.upserted.is_empty() {
            reply.insert(
                "upserted",
                Bson::Array(self.upserted.iter().cloned().map(Bson::Document).collect()),
            );
        }
        reply.insert(
            "writeErrors",
            Bson::Array(
                self.write_errors
                    .iter()
                    .cloned()
                    .map(Bson::Document)
                    .collect(),
            ),
        );
        if let Some(ref wc_error) = self.write_concern_error {
            reply.insert("writeConcernError", wc_error.clone());
        }

        if ok {
            return Ok(());
        }

        if let Some(ref error) = self.error {
            return Err(error.clone());
        }

        if let Some(first) = self.write_errors.first() {
            if let (Ok(message), Ok(code)) = (first.get_str("errmsg"), first.get_i32("code")) {
                return Err(ErrorKind::Write(WriteFailure::WriteError(WriteError {
                    code,
                    code_name: None,
                    message: message.to_string(),
                }))
                .into());
            }
        }

        if let Some(ref wc_error) = self.write_concern_error {
            return Err(ErrorKind::Write(WriteFailure::WriteConcernError(
                crate::error::WriteConcernError::from_document(wc_error),
            ))
            .into());
        }

        Err(ErrorKind::Write(WriteFailure::WriteError(WriteError {
            code: 0,
            code_name: None,
            message: "write operation failed".to_string(),
        }))
        .into())
    }
}
