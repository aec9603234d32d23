use crate::*;
use powd_core::config::{MaintenanceConfig, DAY_SECS};
use powd_services::task_store::now_secs;
use powd_services::{MaintenanceScheduler, Task};

// ══════════════════════════════════════════════════════════════════════════════
//  Maintenance: restart recovery and retention
// ══════════════════════════════════════════════════════════════════════════════

fn settings() -> MaintenanceConfig {
    MaintenanceConfig {
        startup_delay_secs: 0,
        cleanup_first_delay_secs: 0,
        cleanup_interval_secs: DAY_SECS,
        retention_secs: 7 * DAY_SECS,
    }
}

/// Tasks left incomplete by a previous process are handed to the engine
/// exactly once each after a restart; completed ones are left alone.
#[test]
fn test_startup_sweep_recovers_after_restart() {
    let dir = TempDir::new("restart");
    {
        let node = Node::new(dir.store().unwrap(), Arc::new(RecordingEngine::default()));
        let client = node.enrol();
        for hash in [&b"one"[..], b"two", b"three"] {
            node.calculate(&client, hash).unwrap();
        }
        assert!(node.store.update_task(b"two", &[2]).unwrap());
    }

    // Next process start: same database, fresh everything else.
    let store = dir.store().unwrap();
    let engine = Arc::new(RecordingEngine::default());
    let (sink, _rx) = completion_channel();
    let scheduler = MaintenanceScheduler::new(store, engine.clone(), sink, settings()).unwrap();

    let summary = scheduler.sweep().unwrap();
    assert_eq!(summary.submitted, 2);
    let mut submitted = engine.submissions();
    submitted.sort();
    assert_eq!(submitted, vec![b"one".to_vec(), b"three".to_vec()]);
}

/// A task admitted right after startup is not swept on top of its own
/// computation, even within the same second.
#[test]
fn test_task_admitted_after_startup_is_submitted_once() {
    let dir = TempDir::new("admitted-after-start");
    let engine = Arc::new(RecordingEngine::default());
    let node = Node::new(dir.store().unwrap(), engine.clone());
    let scheduler =
        MaintenanceScheduler::new(node.store.clone(), engine.clone(), node.sink.clone(), settings())
            .unwrap();

    let client = node.enrol();
    node.calculate(&client, b"fresh").unwrap();
    let summary = scheduler.sweep().unwrap();

    assert_eq!(summary.submitted, 0);
    assert_eq!(summary.skipped, 1);
    assert_eq!(engine.submissions(), vec![b"fresh".to_vec()]);
}

/// Recovered tasks complete through the same delivery path as new work
/// and are then served to polling clients.
#[tokio::test]
async fn test_recovered_tasks_complete_and_are_served() {
    let dir = TempDir::new("recover-complete");
    let client;
    {
        let node = Node::new(dir.store().unwrap(), Arc::new(RecordingEngine::default()));
        client = node.enrol();
        node.calculate(&client, b"interrupted").unwrap();
    }

    let mut node = Node::new(dir.store().unwrap(), Arc::new(InstantEngine));
    node.clients.add(client.public);
    let shutdown = node.start_completions();

    let scheduler = Arc::new(MaintenanceScheduler::new(
        node.store.clone(),
        Arc::new(InstantEngine),
        node.sink.clone(),
        settings(),
    )
    .unwrap());
    scheduler.run_startup_sweep(shutdown.subscribe()).await;

    let done = node
        .poll_until_complete(&client, b"interrupted", 250)
        .await
        .unwrap();
    assert_eq!(done.nonce, InstantEngine::nonce_for(b"interrupted"));
    let _ = shutdown.send(());
}

/// Tasks past the retention window are deleted whatever their state; a
/// later request for a deleted hash starts over as a new task.
#[test]
fn test_retention_cleanup() {
    let dir = TempDir::new("retention");
    let engine = Arc::new(RecordingEngine::default());
    let node = Node::new(dir.store().unwrap(), engine.clone());
    let client = node.enrol();
    let now = now_secs();

    let aged = |hash: &[u8], age: u64, nonce: Option<Vec<u8>>| Task {
        initial_hash: hash.to_vec(),
        target: vec![0x1F],
        client: client_address(&client),
        nonce,
        created_at: now - age,
    };
    node.store
        .insert_task(&aged(b"old-done", 8 * DAY_SECS, Some(vec![1])))
        .unwrap();
    node.store
        .insert_task(&aged(b"old-open", 8 * DAY_SECS, None))
        .unwrap();
    node.store
        .insert_task(&aged(b"recent", 6 * DAY_SECS, Some(vec![3])))
        .unwrap();

    let scheduler = MaintenanceScheduler::new(
        node.store.clone(),
        engine.clone(),
        node.sink.clone(),
        settings(),
    )
    .unwrap();
    assert_eq!(scheduler.cleanup().unwrap(), 2);
    assert!(!node.store.has_task(b"old-done").unwrap());
    assert!(!node.store.has_task(b"old-open").unwrap());

    let recent = node.calculate(&client, b"recent").unwrap();
    assert_eq!(recent.status, ResponseStatus::Complete);
    assert_eq!(recent.nonce, vec![3]);

    let restarted = node.calculate(&client, b"old-done").unwrap();
    assert_eq!(restarted.status, ResponseStatus::Calculating);
    assert_eq!(engine.submissions(), vec![b"old-done".to_vec()]);
}

fn client_address(client: &Keypair) -> String {
    crypto::address(&client.public)
}
