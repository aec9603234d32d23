use crate::*;
use powd_services::UNKNOWN_SENDER_REASON;

// ══════════════════════════════════════════════════════════════════════════════
//  Request handling: idempotence, convergence, authorization
// ══════════════════════════════════════════════════════════════════════════════

/// Repeating a CALCULATE for the same hash never creates a second task or
/// a second computation.
#[test]
fn test_repeated_calculate_is_idempotent() {
    let dir = TempDir::new("idempotent");
    let engine = Arc::new(RecordingEngine::default());
    let node = Node::new(dir.store().unwrap(), engine.clone());
    let client = node.enrol();

    for _ in 0..5 {
        let response = node.calculate(&client, b"same-hash").unwrap();
        assert_eq!(response.status, ResponseStatus::Calculating);
    }

    assert_eq!(engine.submissions(), vec![b"same-hash".to_vec()]);
    assert_eq!(node.store.counts().unwrap().incomplete, 1);
}

/// Once a nonce is stored every later request sees that same nonce, even
/// if another completion for the hash arrives afterwards.
#[tokio::test]
async fn test_results_converge_after_completion() {
    let dir = TempDir::new("converge");
    let mut node = Node::new(dir.store().unwrap(), Arc::new(InstantEngine));
    let shutdown = node.start_completions();
    let client = node.enrol();

    let first = node.calculate(&client, b"converge").unwrap();
    assert_eq!(first.status, ResponseStatus::Calculating);

    let done = node.poll_until_complete(&client, b"converge", 250).await.unwrap();
    assert_eq!(done.nonce, InstantEngine::nonce_for(b"converge"));

    // A late, conflicting result must not replace the stored nonce.
    node.sink.complete(b"converge".to_vec(), vec![0xDE, 0xAD]);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let other_client = node.enrol();
    for client in [&client, &other_client] {
        let again = node.calculate(client, b"converge").unwrap();
        assert_eq!(again.status, ResponseStatus::Complete);
        assert_eq!(again.nonce, done.nonce);
    }

    let _ = shutdown.send(());
}

/// A sender not on the client list gets an explicit error and the store is
/// left untouched. Adding the key admits the same sender straight away.
#[test]
fn test_unknown_sender_is_refused_until_enrolled() {
    let dir = TempDir::new("unknown-sender");
    let engine = Arc::new(RecordingEngine::default());
    let node = Node::new(dir.store().unwrap(), engine.clone());
    node.enrol();
    let stranger = Keypair::generate();

    let reply = node.send(&stranger, b"stranger-hash").unwrap().unwrap();
    assert!(reply.is_error());
    assert_eq!(reply.error_reason(), Some(UNKNOWN_SENDER_REASON));
    assert!(!node.store.has_task(b"stranger-hash").unwrap());
    assert!(engine.submissions().is_empty());

    node.clients.add(stranger.public);
    let response = node.calculate(&stranger, b"stranger-hash").unwrap();
    assert_eq!(response.status, ResponseStatus::Calculating);
    assert!(node.store.has_task(b"stranger-hash").unwrap());
}

/// Removing a client from the list revokes it for the next request.
#[test]
fn test_removed_client_is_refused() {
    let dir = TempDir::new("removed-client");
    let node = Node::new(dir.store().unwrap(), Arc::new(RecordingEngine::default()));
    let client = node.enrol();
    node.calculate(&client, b"before").unwrap();

    assert!(node.clients.remove(&client.public));
    let reply = node.send(&client, b"after").unwrap().unwrap();
    assert!(reply.is_error());
    assert!(!node.store.has_task(b"after").unwrap());
}

/// A corrupted sealed payload opens under no key.
#[test]
fn test_tampered_request_is_refused() {
    let dir = TempDir::new("tampered");
    let node = Node::new(dir.store().unwrap(), Arc::new(RecordingEngine::default()));
    let client = node.enrol();

    let request = ProofOfWorkRequest::calculate(client.public, b"tampered".to_vec(), vec![1]);
    let request_key = crypto::client_request_key(&client.public);
    let mut sealed =
        crypto::seal(&client, &request_key.public, &request.to_plaintext().unwrap()).unwrap();
    let last = sealed.len() - 1;
    sealed[last] ^= 0x01;

    let reply = node
        .handler
        .handle(&CustomCommand::new(POW_COMMAND, sealed))
        .unwrap();
    assert!(reply.is_error());
    assert!(!node.store.has_task(b"tampered").unwrap());
}

/// Many clients asking for the same hash at once produce exactly one task
/// and one computation; every one of them is answered.
#[test]
fn test_concurrent_requests_store_one_task() {
    let dir = TempDir::new("concurrent");
    let engine = Arc::new(RecordingEngine::default());
    let node = Arc::new(Node::new(dir.store().unwrap(), engine.clone()));
    let clients: Vec<_> = (0..16).map(|_| node.enrol()).collect();

    let handles: Vec<_> = clients
        .into_iter()
        .map(|client| {
            let node = node.clone();
            std::thread::spawn(move || node.calculate(&client, b"contended").map(|r| r.status))
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap().unwrap(), ResponseStatus::Calculating);
    }
    assert_eq!(engine.submissions().len(), 1);
    assert_eq!(node.store.counts().unwrap().incomplete, 1);

    let task = node.store.get_task(b"contended").unwrap().unwrap();
    assert!(task.client.starts_with("PW-"));
}
