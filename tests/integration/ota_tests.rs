//! Firmware update scenarios: the session against the mock partition,
//! and the update task pumping a real WebSocket client over pipes.

use ctrlplane::adapters::crypto;
use ctrlplane::rpc::boot;
use ctrlplane::rpc::channels::{UpdateHandle, UpdateMailbox, UpdateReport};
use ctrlplane::rpc::codec;
use ctrlplane::rpc::command;
use ctrlplane::rpc::io_task::UpdateTask;
use ctrlplane::rpc::ota::{ChunkOutcome, OtaError, UpdateSession, UpdateState};
use ctrlplane::rpc::value::Value;
use ctrlplane::ws::{Connection, WsClient, WsEvent, WsLimits};

use crate::mock_hw::{MemStore, MockPartition, PipeConnector, PipeStream};

const DEVICE: [u8; 32] = [0xD1; 32];
const CHUNK: u32 = 40;
const IMAGE_LEN: u32 = 100;

fn image() -> Vec<u8> {
    (0..IMAGE_LEN).map(|i| (i * 7 % 251) as u8).collect()
}

/// `[OTA_BLOCK, sha256, data, index]` for block `index` of `image`.
fn block(image: &[u8], index: u32) -> Vec<u8> {
    let start = (index * CHUNK) as usize;
    let data = if start >= image.len() {
        &[][..]
    } else {
        &image[start..(start + CHUNK as usize).min(image.len())]
    };
    codec::encode(&[
        Value::U8(command::OTA_BLOCK),
        Value::buf(crypto::sha256(data).to_vec()),
        Value::borrowed_buf(data),
        Value::U32(index),
    ])
    .unwrap()
}

/// Index named in a device block request.
fn requested_index(request: &[u8]) -> u32 {
    let values = codec::decode(request).unwrap();
    assert_eq!(values[0], Value::U8(command::OTA_BLOCK));
    assert_eq!(values[1], Value::buf(DEVICE.to_vec()));
    values[2].as_u64().unwrap() as u32
}

// ── Session ───────────────────────────────────────────────────

#[test]
fn hundred_bytes_in_forty_byte_blocks() {
    let partition = MockPartition::new();
    let store = MemStore::new();
    let image = image();
    let mut session = UpdateSession::begin(partition.clone(), store.clone(), DEVICE, CHUNK, IMAGE_LEN).unwrap();

    let mut requested = Vec::new();
    loop {
        let index = requested_index(&session.fetch_request().unwrap());
        requested.push(index);
        match session.on_message(&block(&image, index)) {
            ChunkOutcome::Written { .. } => continue,
            ChunkOutcome::Completed => break,
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    assert_eq!(requested, vec![0, 1, 2, 3]);
    assert_eq!(session.state(), UpdateState::Activated);
    partition.snapshot(|s| {
        assert_eq!(s.image, image);
        assert_eq!(s.writes, vec![(0, 40), (40, 40), (80, 20)]);
        assert!(s.finalized && s.active && !s.aborted);
    });
    assert_eq!(store.get_u64(boot::NAMESPACE, boot::KEY_PENDING), Some(1));
    assert_eq!(store.get_u64(boot::NAMESPACE, boot::KEY_BOOT_COUNT), Some(0));
    assert_eq!(store.get_u64(boot::NAMESPACE, boot::KEY_INVALID), Some(0));
}

#[test]
fn corrupted_block_is_refetched_then_accepted() {
    let partition = MockPartition::new();
    let image = image();
    let mut session = UpdateSession::begin(partition.clone(), MemStore::new(), DEVICE, CHUNK, IMAGE_LEN).unwrap();

    let mut tampered = codec::decode(&block(&image, 0)).unwrap();
    tampered[2] = Value::buf(vec![0u8; 40]);
    let tampered = codec::encode(&tampered).unwrap();

    assert_eq!(session.on_message(&tampered), ChunkOutcome::Refetch(0));
    assert_eq!(session.next_index(), 0);
    partition.snapshot(|s| assert!(s.writes.is_empty()));

    assert!(matches!(session.on_message(&block(&image, 0)), ChunkOutcome::Written { index: 0, .. }));
    // A late copy of the same block is dropped.
    assert_eq!(session.on_message(&block(&image, 0)), ChunkOutcome::Duplicate(0));
    partition.snapshot(|s| assert_eq!(s.writes.len(), 1));
}

#[test]
fn flash_write_failure_abandons_the_image() {
    let partition = MockPartition::new();
    partition.configure(|s| s.fail_write_at = Some(1));
    let store = MemStore::new();
    let image = image();
    let mut session = UpdateSession::begin(partition.clone(), store.clone(), DEVICE, CHUNK, IMAGE_LEN).unwrap();

    assert!(matches!(session.on_message(&block(&image, 0)), ChunkOutcome::Written { .. }));
    assert_eq!(session.on_message(&block(&image, 1)), ChunkOutcome::Failed(OtaError::WriteFailed));
    assert_eq!(session.state(), UpdateState::Aborted);
    assert_eq!(session.on_message(&block(&image, 1)), ChunkOutcome::Ignored);

    partition.snapshot(|s| assert!(s.aborted && !s.active));
    assert!(!boot::is_pending(&store));
}

#[test]
fn begin_failure_leaves_no_session() {
    let partition = MockPartition::new();
    partition.configure(|s| s.fail_begin = true);
    let result = UpdateSession::begin(partition, MemStore::new(), DEVICE, CHUNK, IMAGE_LEN);
    assert!(matches!(result, Err(OtaError::BeginFailed)));
}

#[test]
fn finalize_failure_is_not_activated() {
    let partition = MockPartition::new();
    partition.configure(|s| s.fail_finalize = true);
    let store = MemStore::new();
    let image = image();
    let mut session = UpdateSession::begin(partition.clone(), store.clone(), DEVICE, CHUNK, IMAGE_LEN).unwrap();
    for index in 0..3 {
        assert!(matches!(session.on_message(&block(&image, index)), ChunkOutcome::Written { .. }));
    }
    assert_eq!(session.on_message(&block(&image, 3)), ChunkOutcome::Failed(OtaError::VerifyFailed));
    partition.snapshot(|s| assert!(!s.active));
    assert!(!boot::is_pending(&store));
}

#[test]
fn marker_write_failure_is_reported() {
    let partition = MockPartition::new();
    let store = MemStore::new();
    let image = image();
    let mut session = UpdateSession::begin(partition.clone(), store.clone(), DEVICE, CHUNK, IMAGE_LEN).unwrap();
    for index in 0..3 {
        session.on_message(&block(&image, index));
    }
    store.set_fail_writes(true);
    assert_eq!(session.on_message(&block(&image, 3)), ChunkOutcome::Failed(OtaError::MarkerFailed));
    assert_eq!(session.state(), UpdateState::Aborted);
    // Without the marker the image must not become bootable.
    partition.snapshot(|s| assert!(s.finalized && !s.active));
    assert!(!boot::is_pending(&store));
}

#[test]
fn activation_failure_disarms_the_marker() {
    let partition = MockPartition::new();
    partition.configure(|s| s.fail_activate = true);
    let store = MemStore::new();
    let image = image();
    let mut session = UpdateSession::begin(partition.clone(), store.clone(), DEVICE, CHUNK, IMAGE_LEN).unwrap();
    for index in 0..3 {
        session.on_message(&block(&image, index));
    }
    assert_eq!(session.on_message(&block(&image, 3)), ChunkOutcome::Failed(OtaError::BootSetFailed));
    partition.snapshot(|s| assert!(!s.active));
    assert!(!boot::is_pending(&store));
}

#[test]
fn earlier_block_after_later_one_is_not_rewritten() {
    let partition = MockPartition::new();
    let image = image();
    let mut session = UpdateSession::begin(partition.clone(), MemStore::new(), DEVICE, CHUNK, IMAGE_LEN).unwrap();

    assert!(matches!(session.on_message(&block(&image, 0)), ChunkOutcome::Written { index: 0, .. }));
    assert!(matches!(session.on_message(&block(&image, 1)), ChunkOutcome::Written { index: 1, .. }));
    assert_eq!(session.on_message(&block(&image, 0)), ChunkOutcome::Duplicate(0));
    assert_eq!(session.on_message(&block(&image, 1)), ChunkOutcome::Duplicate(1));

    assert_eq!(session.next_index(), 2);
    assert_eq!(session.written(), 80);
    partition.snapshot(|s| assert_eq!(s.writes, vec![(0, 40), (40, 40)]));

    assert!(matches!(session.on_message(&block(&image, 2)), ChunkOutcome::Written { index: 2, .. }));
    assert_eq!(session.on_message(&block(&image, 3)), ChunkOutcome::Completed);
    partition.snapshot(|s| {
        assert_eq!(s.writes, vec![(0, 40), (40, 40), (80, 20)]);
        assert_eq!(s.image, image);
    });
}

// ── Update task over a pipe ───────────────────────────────────

struct UpdateServer {
    connector: PipeConnector,
    peer: Option<Connection<PipeStream>>,
    image: Vec<u8>,
    requested: Vec<u32>,
    /// Drop the connection the first time this index is requested.
    drop_at: Option<u32>,
}

impl UpdateServer {
    fn new(connector: PipeConnector) -> Self {
        Self {
            connector,
            peer: None,
            image: image(),
            requested: Vec::new(),
            drop_at: None,
        }
    }

    fn pump(&mut self, now: u64) {
        if let Some(stream) = self.connector.take_peer() {
            self.peer = Some(Connection::accept(stream, "update-server".into(), WsLimits::new(), now));
        }
        let Some(peer) = self.peer.as_mut() else {
            return;
        };
        while let Some(event) = peer.poll(now) {
            let WsEvent::Binary(request) = event else {
                continue;
            };
            let index = requested_index(&request);
            self.requested.push(index);
            if self.drop_at == Some(index) {
                self.drop_at = None;
                peer.close();
                return;
            }
            peer.send_binary(&block(&self.image, index)).unwrap();
        }
    }
}

fn task_with(
    connector: &PipeConnector,
    partition: &MockPartition,
    store: &MemStore,
    max_reconnects: u32,
) -> (UpdateTask<PipeConnector, MockPartition, MemStore>, UpdateHandle) {
    let (mailbox, handle) = UpdateMailbox::pair();
    let session = UpdateSession::begin(partition.clone(), store.clone(), DEVICE, CHUNK, IMAGE_LEN).unwrap();
    let client = WsClient::new(connector.clone(), WsLimits::new(), 10);
    let task = UpdateTask::new(client, session, "ws://updates.local/ota", mailbox, max_reconnects);
    (task, handle)
}

fn run(task: &mut UpdateTask<PipeConnector, MockPartition, MemStore>, server: &mut UpdateServer) -> UpdateReport {
    assert_eq!(task.start(0), None);
    for now in 1..2_000 {
        if let Some(report) = task.step(now) {
            return report;
        }
        server.pump(now);
    }
    panic!("update task never finished");
}

#[test]
fn task_downloads_and_resumes_after_connection_drop() {
    let connector = PipeConnector::new();
    let partition = MockPartition::new();
    let store = MemStore::new();
    let (mut task, mut handle) = task_with(&connector, &partition, &store, 3);
    let mut server = UpdateServer::new(connector.clone());
    server.drop_at = Some(2);

    assert_eq!(run(&mut task, &mut server), UpdateReport::Completed);

    // Block 2 was asked for again on the new connection, nothing earlier.
    assert_eq!(server.requested, vec![0, 1, 2, 2, 3]);
    assert_eq!(connector.attempts(), 2);
    partition.snapshot(|s| {
        assert_eq!(s.image, image());
        assert!(s.active);
    });
    assert!(boot::is_pending(&store));

    let mut reports = Vec::new();
    while let Some(r) = handle.try_report() {
        reports.push(r);
    }
    assert_eq!(
        reports,
        vec![
            UpdateReport::Progress { written: 40, total: 100 },
            UpdateReport::Progress { written: 80, total: 100 },
            UpdateReport::Progress { written: 100, total: 100 },
            UpdateReport::Completed,
        ]
    );
    assert!(handle.is_finished());
}

#[test]
fn task_honours_cancel() {
    let connector = PipeConnector::new();
    let partition = MockPartition::new();
    let store = MemStore::new();
    let (mut task, handle) = task_with(&connector, &partition, &store, 3);

    assert_eq!(task.start(0), None);
    handle.cancel();
    assert_eq!(task.step(1), Some(UpdateReport::Failed(OtaError::Cancelled)));
    partition.snapshot(|s| assert!(s.aborted && !s.active));
    assert_eq!(task.session().state(), UpdateState::Aborted);
}

#[test]
fn task_gives_up_after_reconnect_budget() {
    let connector = PipeConnector::new();
    let partition = MockPartition::new();
    let store = MemStore::new();
    let (mut task, _handle) = task_with(&connector, &partition, &store, 2);
    let mut server = UpdateServer::new(connector.clone());
    server.drop_at = Some(1);

    assert_eq!(task.start(0), None);
    let mut outcome = None;
    for now in 1..2_000 {
        if let Some(report) = task.step(now) {
            outcome = Some(report);
            break;
        }
        server.pump(now);
        if server.requested.contains(&1) {
            // The server vanished for good.
            connector.set_refuse(true);
        }
    }

    assert_eq!(outcome, Some(UpdateReport::Failed(OtaError::ConnectionLost)));
    partition.snapshot(|s| assert!(s.aborted && !s.active));
    assert!(!boot::is_pending(&store));
}

#[test]
fn impossible_url_fails_at_start() {
    let partition = MockPartition::new();
    let store = MemStore::new();
    let (mailbox, _handle) = UpdateMailbox::pair();
    let session = UpdateSession::begin(partition.clone(), store, DEVICE, CHUNK, IMAGE_LEN).unwrap();
    let client = WsClient::new(PipeConnector::new(), WsLimits::new(), 10);
    let mut task = UpdateTask::new(client, session, "wss://tls.only/", mailbox, 3);

    assert_eq!(task.start(0), Some(UpdateReport::Failed(OtaError::ConnectionLost)));
    partition.snapshot(|s| assert!(s.aborted));
}
