//! powd integration test harness.
//!
//! Tests wire the real services together in-process: an on-disk task
//! store, the client registry, the pow handler and the completion
//! listener. Requests travel as sealed, framed custom commands exactly as
//! they would over the listener.
//!
//!   cargo test --test integration
//!
//! Each test owns its temp directory and cleans it up.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::{broadcast, mpsc};

use powd_core::crypto::{self, Keypair};
use powd_core::wire::POW_COMMAND;
use powd_core::CustomCommand;
use powd_services::{
    completion_channel, ClientRegistry, CommandHandler, Completion, CompletionSink,
    DecryptionResolver, EngineError, IdentityProvider, PowRequestHandler, ProofOfWorkEngine,
    ProofOfWorkRequest, ProofOfWorkResponse, ResponseEncoder, ResponseStatus, TaskStore,
};

mod dispatch;
mod maintenance;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Fresh temp directory for one test.
pub struct TempDir(pub PathBuf);

impl TempDir {
    pub fn new(name: &str) -> Self {
        let path = std::env::temp_dir().join(format!("powd-it-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&path);
        std::fs::create_dir_all(&path).ok();
        Self(path)
    }

    pub fn store(&self) -> Result<TaskStore> {
        TaskStore::open(&self.0.join("tasks.sqlite"), Duration::from_secs(5))
            .context("failed to open task store")
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

/// Engine that records submissions and computes nothing.
#[derive(Default)]
pub struct RecordingEngine {
    pub submitted: Mutex<Vec<Vec<u8>>>,
}

impl RecordingEngine {
    pub fn submissions(&self) -> Vec<Vec<u8>> {
        self.submitted.lock().unwrap().clone()
    }
}

impl ProofOfWorkEngine for RecordingEngine {
    fn calculate_nonce(
        &self,
        initial_hash: &[u8],
        _target: &[u8],
        _done: CompletionSink,
    ) -> Result<(), EngineError> {
        self.submitted.lock().unwrap().push(initial_hash.to_vec());
        Ok(())
    }
}

/// Engine that finds a nonce at once, from a worker thread.
pub struct InstantEngine;

impl InstantEngine {
    pub fn nonce_for(initial_hash: &[u8]) -> Vec<u8> {
        initial_hash.iter().rev().copied().collect()
    }
}

impl ProofOfWorkEngine for InstantEngine {
    fn calculate_nonce(
        &self,
        initial_hash: &[u8],
        _target: &[u8],
        done: CompletionSink,
    ) -> Result<(), EngineError> {
        let hash = initial_hash.to_vec();
        std::thread::spawn(move || {
            let nonce = InstantEngine::nonce_for(&hash);
            done.complete(hash, nonce);
        });
        Ok(())
    }
}

/// The pow side of one daemon, wired as `main` wires it.
pub struct Node {
    pub handler: Arc<PowRequestHandler>,
    pub store: TaskStore,
    pub clients: ClientRegistry,
    pub server_public: [u8; 32],
    pub sink: CompletionSink,
    pub completions: Option<mpsc::UnboundedReceiver<Completion>>,
}

impl Node {
    pub fn new(store: TaskStore, engine: Arc<dyn ProofOfWorkEngine>) -> Self {
        let clients = ClientRegistry::new();
        let server = Keypair::generate();
        let server_public = server.public;
        let (sink, rx) = completion_channel();
        let handler = PowRequestHandler::new(
            DecryptionResolver::new(clients.clone()),
            store.clone(),
            engine,
            sink.clone(),
            ResponseEncoder::new(Arc::new(IdentityProvider::fixed(server))),
        );
        Self {
            handler: Arc::new(handler),
            store,
            clients,
            server_public,
            sink,
            completions: Some(rx),
        }
    }

    /// Start the completion listener. Returns its shutdown handle.
    pub fn start_completions(&mut self) -> broadcast::Sender<()> {
        let (shutdown_tx, _) = broadcast::channel(1);
        if let Some(rx) = self.completions.take() {
            tokio::spawn(powd_services::run_completions(
                self.store.clone(),
                rx,
                shutdown_tx.subscribe(),
            ));
        }
        shutdown_tx
    }

    /// A new client on the list.
    pub fn enrol(&self) -> Keypair {
        let client = Keypair::generate();
        self.clients.add(client.public);
        client
    }

    /// Send a CALCULATE request as a framed command; returns the raw reply.
    pub fn send(&self, client: &Keypair, initial_hash: &[u8]) -> Result<Option<CustomCommand>> {
        let request = ProofOfWorkRequest::calculate(client.public, initial_hash.to_vec(), vec![0x1F]);
        let request_key = crypto::client_request_key(&client.public);
        let sealed = crypto::seal(client, &request_key.public, &request.to_plaintext()?)?;
        let frame = CustomCommand::new(POW_COMMAND, sealed).encode()?;

        let inbound = CustomCommand::decode(&frame)?;
        Ok(self.handler.handle(&inbound))
    }

    /// Send a CALCULATE request and open the sealed reply.
    pub fn calculate(&self, client: &Keypair, initial_hash: &[u8]) -> Result<ProofOfWorkResponse> {
        let Some(reply) = self.send(client, initial_hash)? else {
            bail!("no reply");
        };
        if reply.is_error() {
            bail!("error reply: {:?}", reply.error_reason());
        }
        let reply = CustomCommand::decode(&reply.encode()?)?;
        let opened = crypto::open(client, &reply.data)?;
        if opened.sender != self.server_public {
            bail!("reply not sealed by the server identity");
        }
        Ok(ProofOfWorkResponse::from_plaintext(&opened.plaintext)?)
    }

    /// Poll until the task completes or `attempts` run out.
    pub async fn poll_until_complete(
        &self,
        client: &Keypair,
        initial_hash: &[u8],
        attempts: u32,
    ) -> Result<ProofOfWorkResponse> {
        for _ in 0..attempts {
            let response = self.calculate(client, initial_hash)?;
            if response.status == ResponseStatus::Complete {
                return Ok(response);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        bail!("task {} never completed", String::from_utf8_lossy(initial_hash))
    }
}

#[test]
fn test_harness_round_trip() {
    let dir = TempDir::new("harness");
    let node = Node::new(dir.store().unwrap(), Arc::new(RecordingEngine::default()));
    let client = node.enrol();
    let response = node.calculate(&client, b"harness").unwrap();
    assert_eq!(response.status, ResponseStatus::Calculating);
    assert_eq!(response.initial_hash, b"harness".to_vec());
}
