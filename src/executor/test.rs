use std::collections::VecDeque;

use bson::{doc, rawdoc, Document, RawDocumentBuf};
use pretty_assertions::assert_eq;

use crate::{
    coll::Namespace,
    command::WriteCommand,
    concern::{WriteConcern, W},
    error::{ErrorKind, Result},
    executor::execute,
    result::WriteResult,
    transport::{ServerId, StreamDescription, Transport},
    wire::{DeleteFlags, InsertFlags, OpCode, UpdateFlags, WriteMessage},
};

const SERVER: ServerId = ServerId(1);

/// One request the core handed to the transport, owned so it can be inspected
/// after execution finishes.
#[derive(Debug)]
enum Sent {
    Insert {
        flags: InsertFlags,
        documents: Vec<RawDocumentBuf>,
    },
    Update {
        flags: UpdateFlags,
        selector: RawDocumentBuf,
        update: RawDocumentBuf,
    },
    Delete {
        flags: DeleteFlags,
        selector: RawDocumentBuf,
    },
    Command {
        db: String,
        body: Document,
    },
}

/// A transport double that records outgoing traffic and replays canned
/// replies.
struct ScriptedTransport {
    description: StreamDescription,
    sent: Vec<Sent>,
    gle_replies: VecDeque<Result<Document>>,
    command_replies: VecDeque<Result<Document>>,
    send_results: VecDeque<Result<ServerId>>,
    preselect_result: Option<Result<ServerId>>,
}

impl ScriptedTransport {
    fn new(description: StreamDescription) -> Self {
        Self {
            description,
            sent: Vec::new(),
            gle_replies: VecDeque::new(),
            command_replies: VecDeque::new(),
            send_results: VecDeque::new(),
            preselect_result: None,
        }
    }

    fn with_gle(mut self, reply: Document) -> Self {
        self.gle_replies.push_back(Ok(reply));
        self
    }

    fn with_command_reply(mut self, reply: Document) -> Self {
        self.command_replies.push_back(Ok(reply));
        self
    }

    fn with_command_failure(mut self) -> Self {
        self.command_replies.push_back(Err(ErrorKind::Transport {
            message: "scripted command failure".to_string(),
        }
        .into()));
        self
    }

    fn with_preselect_failure(mut self) -> Self {
        self.preselect_result = Some(Err(ErrorKind::ServerSelection {
            message: "scripted selection failure".to_string(),
        }
        .into()));
        self
    }
}

impl Transport for ScriptedTransport {
    fn send(
        &mut self,
        message: &WriteMessage<'_>,
        server: ServerId,
        _write_concern: &WriteConcern,
    ) -> Result<ServerId> {
        self.sent.push(match *message {
            WriteMessage::Insert {
                flags, documents, ..
            } => Sent::Insert {
                flags,
                documents: documents.iter().map(|d| d.to_raw_document_buf()).collect(),
            },
            WriteMessage::Update {
                flags,
                selector,
                update,
                ..
            } => Sent::Update {
                flags,
                selector: selector.to_raw_document_buf(),
                update: update.to_raw_document_buf(),
            },
            WriteMessage::Delete {
                flags, selector, ..
            } => Sent::Delete {
                flags,
                selector: selector.to_raw_document_buf(),
            },
        });

        match self.send_results.pop_front() {
            Some(result) => result,
            None => Ok(server),
        }
    }

    fn recv_gle(&mut self, _server: ServerId) -> Result<Document> {
        self.gle_replies.pop_front().unwrap_or_else(|| {
            Err(ErrorKind::Transport {
                message: "no scripted getLastError reply".to_string(),
            }
            .into())
        })
    }

    fn run_command(
        &mut self,
        db: &str,
        command: &bson::RawDocument,
        _server: ServerId,
    ) -> Result<Document> {
        let body: Document = bson::from_slice(command.as_bytes())?;
        self.sent.push(Sent::Command {
            db: db.to_string(),
            body,
        });
        self.command_replies.pop_front().unwrap_or_else(|| {
            Err(ErrorKind::Transport {
                message: "no scripted command reply".to_string(),
            }
            .into())
        })
    }

    fn preselect(&mut self, _op: OpCode, _write_concern: &WriteConcern) -> Result<ServerId> {
        self.preselect_result.take().unwrap_or(Ok(SERVER))
    }

    fn description(&self, _server: ServerId) -> StreamDescription {
        self.description.clone()
    }
}

fn ns() -> Namespace {
    Namespace::new("db", "coll")
}

fn legacy_description() -> StreamDescription {
    StreamDescription {
        min_wire_version: 0,
        max_wire_version: 0,
        ..StreamDescription::new_testing()
    }
}

fn unacknowledged() -> WriteConcern {
    WriteConcern {
        w: Some(W::Count(0)),
        ..WriteConcern::default()
    }
}

#[test]
fn acknowledged_insert_sends_one_command() {
    let docs = [rawdoc! { "a": 1 }, rawdoc! { "a": 2 }];
    let command = WriteCommand::new_insert(docs.iter().map(|d| d.as_ref()), true, true).unwrap();

    let mut transport = ScriptedTransport::new(StreamDescription::new_testing())
        .with_command_reply(doc! { "n": 2, "ok": 1 });
    let mut result = WriteResult::new();
    execute(
        &command,
        &mut transport,
        Some(SERVER),
        &ns(),
        &WriteConcern::default(),
        0,
        &mut result,
    );

    assert_eq!(transport.sent.len(), 1);
    match &transport.sent[0] {
        Sent::Command { db, body } => {
            assert_eq!(db, "db");
            assert_eq!(body.get_str("insert").unwrap(), "coll");
            assert_eq!(body.get_document("writeConcern").unwrap(), &doc! {});
            assert_eq!(body.get_bool("ordered").unwrap(), true);

            let documents = body.get_array("documents").unwrap();
            assert_eq!(documents.len(), 2);
            for document in documents {
                // an _id was generated for each document before sending
                assert!(document.as_document().unwrap().contains_key("_id"));
            }
        }
        other => panic!("expected a command, got {:?}", other),
    }

    let mut reply = Document::new();
    result.complete(&mut reply).unwrap();
    assert_eq!(reply.get_i32("nInserted").unwrap(), 2);
    assert_eq!(reply.get_array("writeErrors").unwrap().len(), 0);
}

#[test]
fn oversize_legacy_insert_unordered_skips_document() {
    let big = rawdoc! { "filler": "a".repeat(64) };
    let small = rawdoc! { "a": 1 };
    let command =
        WriteCommand::new_insert([big.as_ref(), small.as_ref()], false, true).unwrap();

    let description = StreamDescription {
        max_bson_object_size: 64,
        ..legacy_description()
    };
    let mut transport =
        ScriptedTransport::new(description).with_gle(doc! { "ok": 1, "n": 0 });
    let mut result = WriteResult::new();
    execute(
        &command,
        &mut transport,
        Some(SERVER),
        &ns(),
        &WriteConcern::default(),
        0,
        &mut result,
    );

    // the oversize document became a write error without being sent
    assert_eq!(result.write_errors().len(), 1);
    assert_eq!(result.write_errors()[0].get_i32("index").unwrap(), 0);
    assert_eq!(result.write_errors()[0].get_i32("code").unwrap(), 2);

    // the other document went out and was acknowledged
    assert_eq!(transport.sent.len(), 1);
    match &transport.sent[0] {
        Sent::Insert { flags, documents } => {
            assert_eq!(*flags, InsertFlags::CONTINUE_ON_ERROR);
            assert_eq!(documents.len(), 1);
        }
        other => panic!("expected an insert frame, got {:?}", other),
    }
    assert_eq!(result.inserted_count(), 1);
    assert!(result.failed());
}

#[test]
fn oversize_legacy_insert_ordered_aborts() {
    let big = rawdoc! { "filler": "a".repeat(64) };
    let small = rawdoc! { "a": 1 };
    let command = WriteCommand::new_insert([big.as_ref(), small.as_ref()], true, true).unwrap();

    let description = StreamDescription {
        max_bson_object_size: 64,
        ..legacy_description()
    };
    let mut transport = ScriptedTransport::new(description);
    let mut result = WriteResult::new();
    execute(
        &command,
        &mut transport,
        Some(SERVER),
        &ns(),
        &WriteConcern::default(),
        0,
        &mut result,
    );

    assert_eq!(result.write_errors().len(), 1);
    assert_eq!(result.write_errors()[0].get_i32("index").unwrap(), 0);
    assert!(transport.sent.is_empty());
    assert_eq!(result.inserted_count(), 0);
    assert!(result.failed());
}

#[test]
fn legacy_upsert_backfills_upserted_id() {
    let command = WriteCommand::new_update(
        &rawdoc! { "_id": 42 },
        &rawdoc! { "_id": 42, "a": 1 },
        true,
        false,
        true,
    )
    .unwrap();

    let mut transport = ScriptedTransport::new(legacy_description())
        .with_gle(doc! { "ok": 1, "n": 1, "updatedExisting": false });
    let mut result = WriteResult::new();
    execute(
        &command,
        &mut transport,
        Some(SERVER),
        &ns(),
        &WriteConcern::default(),
        0,
        &mut result,
    );

    match &transport.sent[0] {
        Sent::Update {
            flags,
            selector,
            update,
        } => {
            assert_eq!(*flags, UpdateFlags::UPSERT);
            assert_eq!(selector, &rawdoc! { "_id": 42 });
            assert_eq!(update, &rawdoc! { "_id": 42, "a": 1 });
        }
        other => panic!("expected an update frame, got {:?}", other),
    }

    assert_eq!(result.upserted_count(), 1);
    assert_eq!(result.modified_count(), None);

    let mut reply = Document::new();
    result.complete(&mut reply).unwrap();
    assert_eq!(
        reply.get_array("upserted").unwrap(),
        &vec![bson::Bson::Document(doc! { "index": 0, "_id": 42 })]
    );
}

#[test]
fn malformed_update_aborts_before_sending() {
    let command = WriteCommand::new_update(
        &rawdoc! { "_id": 1 },
        &rawdoc! { "a.b": 1 },
        false,
        false,
        true,
    )
    .unwrap();

    let mut transport = ScriptedTransport::new(legacy_description());
    let mut result = WriteResult::new();
    execute(
        &command,
        &mut transport,
        Some(SERVER),
        &ns(),
        &WriteConcern::default(),
        0,
        &mut result,
    );

    assert!(transport.sent.is_empty());
    assert!(result.failed());
    assert!(matches!(
        *result.error().unwrap().kind,
        ErrorKind::MalformedUpdate { .. }
    ));
}

#[test]
fn operator_update_skips_replacement_validation() {
    let command = WriteCommand::new_update(
        &rawdoc! { "_id": 1 },
        &rawdoc! { "$set": { "a.b": 1 } },
        false,
        true,
        true,
    )
    .unwrap();

    let mut transport =
        ScriptedTransport::new(legacy_description()).with_gle(doc! { "ok": 1, "n": 1 });
    let mut result = WriteResult::new();
    execute(
        &command,
        &mut transport,
        Some(SERVER),
        &ns(),
        &WriteConcern::default(),
        0,
        &mut result,
    );

    assert!(!result.failed());
    match &transport.sent[0] {
        Sent::Update { flags, .. } => assert_eq!(*flags, UpdateFlags::MULTI_UPDATE),
        other => panic!("expected an update frame, got {:?}", other),
    }
    assert_eq!(result.matched_count(), 1);
}

#[test]
fn command_path_splits_on_batch_size() {
    let docs = [rawdoc! { "x": 1 }, rawdoc! { "x": 2 }, rawdoc! { "x": 3 }];
    let command = WriteCommand::new_insert(docs.iter().map(|d| d.as_ref()), true, true).unwrap();

    let description = StreamDescription {
        max_write_batch_size: 2,
        ..StreamDescription::new_testing()
    };
    let mut transport = ScriptedTransport::new(description)
        .with_command_reply(doc! {
            "ok": 1,
            "n": 1,
            "writeErrors": [{ "index": 1, "code": 11000, "errmsg": "dup" }],
        })
        .with_command_reply(doc! {
            "ok": 1,
            "n": 0,
            "writeErrors": [{ "index": 0, "code": 11000, "errmsg": "dup" }],
        });
    let mut result = WriteResult::new();
    execute(
        &command,
        &mut transport,
        Some(SERVER),
        &ns(),
        &WriteConcern::default(),
        0,
        &mut result,
    );

    assert_eq!(transport.sent.len(), 2);
    match (&transport.sent[0], &transport.sent[1]) {
        (Sent::Command { body: first, .. }, Sent::Command { body: second, .. }) => {
            assert_eq!(first.get_array("documents").unwrap().len(), 2);
            assert_eq!(second.get_array("documents").unwrap().len(), 1);
        }
        other => panic!("expected two commands, got {:?}", other),
    }

    // indices are global to the caller's batch: one error per sub-batch,
    // without duplication or gaps
    let indices: Vec<i32> = result
        .write_errors()
        .iter()
        .map(|e| e.get_i32("index").unwrap())
        .collect();
    assert_eq!(indices, vec![1, 2]);
    assert_eq!(result.inserted_count(), 1);
}

#[test]
fn command_path_splits_on_total_size() {
    // fifty ~450 byte documents against a 4000 byte maxBsonObjectSize: the
    // total exceeds the 4000 + 16382 byte command allowance, so the buffer
    // cannot go out in one command
    let docs: Vec<_> = (0..50)
        .map(|i| rawdoc! { "i": i, "filler": "x".repeat(400) })
        .collect();
    let command = WriteCommand::new_insert(docs.iter().map(|d| d.as_ref()), false, true).unwrap();

    let description = StreamDescription {
        max_bson_object_size: 4000,
        ..StreamDescription::new_testing()
    };
    let mut transport = ScriptedTransport::new(description);
    for _ in 0..5 {
        transport = transport.with_command_reply(doc! { "ok": 1, "n": 10 });
    }
    let mut result = WriteResult::new();
    execute(
        &command,
        &mut transport,
        Some(SERVER),
        &ns(),
        &WriteConcern::default(),
        0,
        &mut result,
    );

    assert!(transport.sent.len() > 1, "buffer should have been split");

    let mut total = 0;
    for sent in &transport.sent {
        match sent {
            Sent::Command { body, .. } => {
                let batch = body.get_array("documents").unwrap().len();
                assert!(batch > 0);
                total += batch;
            }
            other => panic!("expected a command, got {:?}", other),
        }
    }
    // every document went out exactly once
    assert_eq!(total, 50);
    assert!(!result.failed());
}

#[test]
fn caller_offset_shifts_merged_indices() {
    let docs = [rawdoc! { "x": 1 }];
    let command = WriteCommand::new_insert(docs.iter().map(|d| d.as_ref()), true, true).unwrap();

    let mut transport =
        ScriptedTransport::new(StreamDescription::new_testing()).with_command_reply(doc! {
            "ok": 1,
            "n": 0,
            "writeErrors": [{ "index": 0, "code": 11000, "errmsg": "dup" }],
        });
    let mut result = WriteResult::new();
    execute(
        &command,
        &mut transport,
        Some(SERVER),
        &ns(),
        &WriteConcern::default(),
        7,
        &mut result,
    );

    assert_eq!(result.write_errors()[0].get_i32("index").unwrap(), 7);
}

#[test]
fn unacknowledged_write_uses_legacy_opcodes() {
    let docs = [rawdoc! { "a": 1 }];
    let command = WriteCommand::new_insert(docs.iter().map(|d| d.as_ref()), true, true).unwrap();

    let mut transport = ScriptedTransport::new(StreamDescription::new_testing());
    let mut result = WriteResult::new();
    execute(
        &command,
        &mut transport,
        Some(SERVER),
        &ns(),
        &unacknowledged(),
        0,
        &mut result,
    );

    assert_eq!(transport.sent.len(), 1);
    match &transport.sent[0] {
        Sent::Insert { flags, documents } => {
            assert_eq!(*flags, InsertFlags::empty());
            assert_eq!(documents.len(), 1);
        }
        other => panic!("expected an insert frame, got {:?}", other),
    }

    // nothing was received, so nothing was merged
    assert!(!result.failed());
    assert_eq!(result.inserted_count(), 0);
}

#[test]
fn invalid_write_concern_is_rejected_without_io() {
    let docs = [rawdoc! { "a": 1 }];
    let command = WriteCommand::new_insert(docs.iter().map(|d| d.as_ref()), true, true).unwrap();
    let invalid = WriteConcern {
        w: Some(W::Count(0)),
        journal: Some(true),
        ..WriteConcern::default()
    };

    let mut transport = ScriptedTransport::new(StreamDescription::new_testing());
    let mut result = WriteResult::new();
    execute(
        &command,
        &mut transport,
        Some(SERVER),
        &ns(),
        &invalid,
        0,
        &mut result,
    );

    assert!(transport.sent.is_empty());
    assert!(result.failed());
    assert!(matches!(
        *result.error().unwrap().kind,
        ErrorKind::InvalidArgument { .. }
    ));
}

#[test]
fn preselect_failure_is_terminal() {
    let docs = [rawdoc! { "a": 1 }];
    let command = WriteCommand::new_insert(docs.iter().map(|d| d.as_ref()), true, true).unwrap();

    let mut transport =
        ScriptedTransport::new(StreamDescription::new_testing()).with_preselect_failure();
    let mut result = WriteResult::new();
    execute(
        &command,
        &mut transport,
        None,
        &ns(),
        &WriteConcern::default(),
        0,
        &mut result,
    );

    assert!(transport.sent.is_empty());
    assert!(result.failed());
}

#[test]
fn unknown_node_returns_silently() {
    let docs = [rawdoc! { "a": 1 }];
    let command = WriteCommand::new_insert(docs.iter().map(|d| d.as_ref()), true, true).unwrap();

    let mut transport = ScriptedTransport::new(StreamDescription::unknown());
    let mut result = WriteResult::new();
    execute(
        &command,
        &mut transport,
        Some(SERVER),
        &ns(),
        &WriteConcern::default(),
        0,
        &mut result,
    );

    assert!(transport.sent.is_empty());
    assert!(!result.failed());
    assert!(result.error().is_none());
}

#[test]
fn legacy_delete_sends_one_frame_per_selector() {
    let mut command = WriteCommand::new_delete(&rawdoc! { "a": 1 }, false, true).unwrap();
    command.append_delete(&rawdoc! { "b": 2 }).unwrap();

    let mut transport = ScriptedTransport::new(legacy_description())
        .with_gle(doc! { "ok": 1, "n": 1 })
        .with_gle(doc! { "ok": 1, "n": 0, "err": "oops", "code": 123 });
    let mut result = WriteResult::new();
    execute(
        &command,
        &mut transport,
        Some(SERVER),
        &ns(),
        &WriteConcern::default(),
        0,
        &mut result,
    );

    assert_eq!(transport.sent.len(), 2);
    let selectors: Vec<_> = transport
        .sent
        .iter()
        .map(|sent| match sent {
            Sent::Delete { flags, selector } => {
                assert_eq!(*flags, DeleteFlags::SINGLE_REMOVE);
                selector.clone()
            }
            other => panic!("expected a delete frame, got {:?}", other),
        })
        .collect();
    // only the selector inside each entry goes on the wire, in buffer order
    assert_eq!(selectors, vec![rawdoc! { "a": 1 }, rawdoc! { "b": 2 }]);

    assert_eq!(result.removed_count(), 1);
    // the second operation's error carries its position in the batch
    assert_eq!(result.write_errors()[0].get_i32("index").unwrap(), 1);
}

#[test]
fn legacy_multi_delete_clears_single_remove() {
    let command = WriteCommand::new_delete(&rawdoc! { "a": 1 }, true, true).unwrap();

    let mut transport =
        ScriptedTransport::new(legacy_description()).with_gle(doc! { "ok": 1, "n": 7 });
    let mut result = WriteResult::new();
    execute(
        &command,
        &mut transport,
        Some(SERVER),
        &ns(),
        &WriteConcern::default(),
        0,
        &mut result,
    );

    match &transport.sent[0] {
        Sent::Delete { flags, .. } => assert_eq!(*flags, DeleteFlags::empty()),
        other => panic!("expected a delete frame, got {:?}", other),
    }
    assert_eq!(result.removed_count(), 7);
}

#[test]
fn ordered_stops_after_transport_failure() {
    let docs = [rawdoc! { "x": 1 }, rawdoc! { "x": 2 }];
    let command = WriteCommand::new_insert(docs.iter().map(|d| d.as_ref()), true, true).unwrap();

    let description = StreamDescription {
        max_write_batch_size: 1,
        ..StreamDescription::new_testing()
    };
    let mut transport = ScriptedTransport::new(description).with_command_failure();
    let mut result = WriteResult::new();
    execute(
        &command,
        &mut transport,
        Some(SERVER),
        &ns(),
        &WriteConcern::default(),
        0,
        &mut result,
    );

    assert_eq!(transport.sent.len(), 1);
    assert!(result.failed());
    assert!(matches!(
        *result.error().unwrap().kind,
        ErrorKind::Transport { .. }
    ));
}

#[test]
fn unordered_continues_after_transport_failure() {
    let docs = [rawdoc! { "x": 1 }, rawdoc! { "x": 2 }];
    let command = WriteCommand::new_insert(docs.iter().map(|d| d.as_ref()), false, true).unwrap();

    let description = StreamDescription {
        max_write_batch_size: 1,
        ..StreamDescription::new_testing()
    };
    let mut transport = ScriptedTransport::new(description)
        .with_command_failure()
        .with_command_reply(doc! { "ok": 1, "n": 1 });
    let mut result = WriteResult::new();
    execute(
        &command,
        &mut transport,
        Some(SERVER),
        &ns(),
        &WriteConcern::default(),
        0,
        &mut result,
    );

    assert_eq!(transport.sent.len(), 2);
    assert!(result.failed());
    assert_eq!(result.inserted_count(), 1);
}

#[test]
fn empty_buffer_is_an_error() {
    let command = WriteCommand::new_insert(std::iter::empty(), true, true).unwrap();

    let mut transport = ScriptedTransport::new(StreamDescription::new_testing());
    let mut result = WriteResult::new();
    execute(
        &command,
        &mut transport,
        Some(SERVER),
        &ns(),
        &WriteConcern::default(),
        0,
        &mut result,
    );

    assert!(transport.sent.is_empty());
    assert!(result.failed());
    assert!(matches!(
        *result.error().unwrap().kind,
        ErrorKind::EmptyBatch { .. }
    ));
}

#[test]
fn singly_insert_sends_one_document_per_frame() {
    let docs = [rawdoc! { "a": 1 }, rawdoc! { "a": 2 }];
    let command = WriteCommand::new_insert(docs.iter().map(|d| d.as_ref()), true, false).unwrap();

    let mut transport = ScriptedTransport::new(legacy_description())
        .with_gle(doc! { "ok": 1, "n": 0 })
        .with_gle(doc! { "ok": 1, "n": 0 });
    let mut result = WriteResult::new();
    execute(
        &command,
        &mut transport,
        Some(SERVER),
        &ns(),
        &WriteConcern::default(),
        0,
        &mut result,
    );

    assert_eq!(transport.sent.len(), 2);
    for sent in &transport.sent {
        match sent {
            Sent::Insert { documents, .. } => assert_eq!(documents.len(), 1),
            other => panic!("expected an insert frame, got {:?}", other),
        }
    }

    // each zero-count acknowledgement was rewritten to the batch size
    assert_eq!(result.inserted_count(), 2);
}
