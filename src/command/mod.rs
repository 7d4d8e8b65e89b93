//! The buffer of write operations a caller accumulates before execution.


use bson::{oid::ObjectId, rawdoc, RawArray, RawArrayBuf, RawDocument, RawDocumentBuf};

use crate::error::{ErrorKind, Result};

/// The extra room the server guarantees on top of `maxBsonObjectSize` for the
/// fields a write command wraps around its document array: 16K minus 2 bytes
/// for the trailing NUL bytes (SERVER-10643).
pub(crate) const MAX_CMD_SIZE_HEADROOM: usize = 16_382;

/// The kind of write a [`WriteCommand`] performs, along with the options that
/// only apply to that kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteKind {
    /// Remove matching documents. When `multi` is true each selector removes
    /// every match; otherwise each removes at most one.
    Delete { multi: bool },

    /// Insert documents. When `allow_bulk` is false the legacy path sends
    /// exactly one document per OP_INSERT message.
    Insert { allow_bulk: bool },

    /// Apply update specifications.
    Update,
}

impl WriteKind {
    /// The name of the server-side command for this kind of write.
    pub(crate) fn command_name(&self) -> &'static str {
        match self {
            WriteKind::Delete { .. } => "delete",
            WriteKind::Insert { .. } => "insert",
            WriteKind::Update => "update",
        }
    }

    /// The key under which the operations array appears in the command
    /// document.
    pub(crate) fn payload_field(&self) -> &'static str {
        match self {
            WriteKind::Delete { .. } => "deletes",
            WriteKind::Insert { .. } => "documents",
            WriteKind::Update => "updates",
        }
    }
}

/// A batch of write operations of a single kind, stored in the exact BSON
/// array form the command path puts on the wire.
///
/// Entries are keyed by their position, so the array doubles as the record of
/// each operation's index in the caller's batch. Insert entries are the
/// documents themselves (with an `_id` generated when absent); update entries
/// have the shape `{q, u, upsert, multi}`; delete entries have the shape
/// `{q, limit}`.
#[derive(Clone, Debug)]
pub struct WriteCommand {
    kind: WriteKind,
    ordered: bool,
    documents: RawArrayBuf,
    n_documents: usize,
}

impl WriteCommand {
    fn new(kind: WriteKind, ordered: bool) -> Self {
        Self {
            kind,
            ordered,
            documents: RawArrayBuf::new(),
            n_documents: 0,
        }
    }

    /// Creates an insert buffer containing `documents`.
    ///
    /// If `ordered`, a failing insert aborts the remaining ones; otherwise all
    /// are attempted.
    pub fn new_insert<'a>(
        documents: impl IntoIterator<Item = &'a RawDocument>,
        ordered: bool,
        allow_bulk: bool,
    ) -> Result<Self> {
        let mut command = Self::new(WriteKind::Insert { allow_bulk }, ordered);
        command.append_insert(documents)?;
        Ok(command)
    }

    /// Creates an update buffer with a first update of `selector` by `update`.
    pub fn new_update(
        selector: &RawDocument,
        update: &RawDocument,
        upsert: bool,
        multi: bool,
        ordered: bool,
    ) -> Result<Self> {
        let mut command = Self::new(WriteKind::Update, ordered);
        command.append_update(selector, update, upsert, multi)?;
        Ok(command)
    }

    /// Creates a delete buffer with a first deletion by `selector`. `multi`
    /// applies to every selector subsequently appended.
    pub fn new_delete(selector: &RawDocument, multi: bool, ordered: bool) -> Result<Self> {
        let mut command = Self::new(WriteKind::Delete { multi }, ordered);
        command.append_delete(selector)?;
        Ok(command)
    }

    /// Appends insert documents, generating an `_id` for any that lack one.
    pub fn append_insert<'a>(
        &mut self,
        documents: impl IntoIterator<Item = &'a RawDocument>,
    ) -> Result<()> {
        debug_assert!(matches!(self.kind, WriteKind::Insert { .. }));

        for document in documents {
            self.documents.push(ensure_id(document)?);
            self.n_documents += 1;
        }

        Ok(())
    }

    /// Appends one update specification.
    pub fn append_update(
        &mut self,
        selector: &RawDocument,
        update: &RawDocument,
        upsert: bool,
        multi: bool,
    ) -> Result<()> {
        debug_assert!(matches!(self.kind, WriteKind::Update));

        let entry = rawdoc! {
            "q": selector.to_raw_document_buf(),
            "u": update.to_raw_document_buf(),
            "upsert": upsert,
            "multi": multi,
        };
        self.documents.push(entry);
        self.n_documents += 1;

        Ok(())
    }

    /// Appends one delete selector.
    pub fn append_delete(&mut self, selector: &RawDocument) -> Result<()> {
        let limit: i32 = match self.kind {
            WriteKind::Delete { multi } => {
                if multi {
                    0
                } else {
                    1
                }
            }
            _ => {
                debug_assert!(false, "append_delete on a non-delete buffer");
                1
            }
        };

        let entry = rawdoc! {
            "q": selector.to_raw_document_buf(),
            "limit": limit,
        };
        self.documents.push(entry);
        self.n_documents += 1;

        Ok(())
    }

    /// The kind of write this buffer performs.
    pub fn kind(&self) -> WriteKind {
        self.kind
    }

    /// Whether a single failing operation aborts the remaining ones.
    pub fn ordered(&self) -> bool {
        self.ordered
    }

    /// The number of operations in the buffer.
    pub fn len(&self) -> usize {
        self.n_documents
    }

    /// Whether the buffer contains no operations.
    pub fn is_empty(&self) -> bool {
        self.n_documents == 0
    }

    /// The backing BSON array of per-operation entries.
    pub(crate) fn raw_documents(&self) -> &RawArrayBuf {
        &self.documents
    }

    /// The encoded length in bytes of the backing array.
    pub(crate) fn documents_byte_len(&self) -> usize {
        self.documents.as_bytes().len()
    }

    /// The per-operation entries in order.
    pub(crate) fn entries(&self) -> Result<Vec<&RawDocument>> {
        let array: &RawArray = &self.documents;
        array
            .into_iter()
            .map(|entry| {
                entry?.as_document().ok_or_else(|| {
                    ErrorKind::InvalidArgument {
                        message: "write buffer entry is not a document".to_string(),
                    }
                    .into()
                })
            })
            .collect()
    }
}

/// Returns `document` with an `_id` field, generating an `ObjectId` and
/// splicing it in front of the existing fields when absent. The server rejects
/// a duplicate `_id` appearing later in the document, so the generated field
/// must come first.
fn ensure_id(document: &RawDocument) -> Result<RawDocumentBuf> {
    if document.get("_id")?.is_some() {
        return Ok(document.to_raw_document_buf());
    }

    let mut id_doc = RawDocumentBuf::new();
    id_doc.append("_id", ObjectId::new());

    let mut id_bytes = id_doc.into_bytes();
    id_bytes.pop(); // remove trailing null byte

    let mut bytes = document.to_raw_document_buf().into_bytes();
    let id_slice = &id_bytes[4..];
    // insert the _id element right after the length prefix
    bytes.splice(4..4, id_slice.iter().cloned());

    // overwrite the old length
    let new_length = (bytes.len() as i32).to_le_bytes();
    bytes[0..4].copy_from_slice(&new_length);

    Ok(RawDocumentBuf::from_bytes(bytes)?)
}

/// Whether appending one more entry of `document_len` bytes to a batch of
/// `n_documents_written` entries totalling `len_so_far` bytes would exceed the
/// node's limits.
pub(crate) fn will_overflow(
    len_so_far: usize,
    document_len: usize,
    n_documents_written: usize,
    max_bson_size: i32,
    max_write_batch_size: i32,
) -> bool {
    let max_cmd_size = max_bson_size.max(0) as usize + MAX_CMD_SIZE_HEADROOM;

    if len_so_far + document_len > max_cmd_size {
        return true;
    }

    max_write_batch_size > 0 && n_documents_written >= max_write_batch_size as usize
}
