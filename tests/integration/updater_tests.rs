//! Update launcher against mock ports on a real `ota-io` thread.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ctrlplane::adapters::updater::TaskLauncher;
use ctrlplane::app::ports::UpdateLauncher;
use ctrlplane::config::SystemConfig;
use ctrlplane::rpc::channels::{UpdateHandle, UpdateMailbox, UpdateReport};
use ctrlplane::rpc::engine::UpdateRequest;
use ctrlplane::rpc::ota::OtaError;

use crate::mock_hw::{MemStore, MockPartition, PipeConnector};

fn request() -> UpdateRequest {
    UpdateRequest {
        caller: "ops".into(),
        chunk_len: 40,
        firmware_len: 100,
    }
}

fn wait_terminal(handle: &mut UpdateHandle) -> UpdateReport {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(report) = handle.try_report() {
            if report.is_terminal() {
                return report;
            }
        }
        assert!(Instant::now() < deadline, "no terminal report");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn launch_returns_before_the_session_begins() {
    let (release, gate) = mpsc::channel::<()>();
    let gate = Arc::new(Mutex::new(gate));
    let partition = MockPartition::new();
    partition.configure(|s| s.fail_begin = true);
    let open = {
        let partition = partition.clone();
        move || {
            // Held until the test has seen `launch` return.
            let _ = gate.lock().unwrap().recv();
            Some((partition.clone(), MemStore::new()))
        }
    };
    let mut launcher = TaskLauncher::new(PipeConnector::new(), open, &SystemConfig::default());
    let (mailbox, mut handle) = UpdateMailbox::pair();

    let started = Instant::now();
    assert_eq!(launcher.launch([0; 32], &request(), mailbox), Ok(()));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(handle.try_report().is_none());

    release.send(()).unwrap();
    assert_eq!(wait_terminal(&mut handle), UpdateReport::Failed(OtaError::BeginFailed));
}

#[test]
fn missing_ports_reported_through_mailbox() {
    let open = || -> Option<(MockPartition, MemStore)> { None };
    let mut launcher = TaskLauncher::new(PipeConnector::new(), open, &SystemConfig::default());
    let (mailbox, mut handle) = UpdateMailbox::pair();

    assert_eq!(launcher.launch([0; 32], &request(), mailbox), Ok(()));
    assert_eq!(wait_terminal(&mut handle), UpdateReport::Failed(OtaError::BeginFailed));
    assert!(handle.is_finished());
}
