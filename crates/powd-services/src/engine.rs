//! Computation engine seam and completion delivery.
//!
//! Work is submitted fire-and-forget: `calculate_nonce` returns as soon as
//! the computation is queued. When a nonce is found the engine pushes a
//! [`Completion`] into its [`CompletionSink`], from whatever thread it runs
//! on. A single listener ([`run_completions`]) drains the channel and
//! records each nonce in the task store.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Semaphore};

use powd_core::config::EngineConfig;

use crate::task_store::TaskStore;

/// A nonce found for an initial hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub initial_hash: Vec<u8>,
    pub nonce: Vec<u8>,
}

/// Where engines report finished work. Cloneable, usable from any thread.
#[derive(Clone)]
pub struct CompletionSink {
    tx: mpsc::UnboundedSender<Completion>,
}

impl CompletionSink {
    pub fn complete(&self, initial_hash: Vec<u8>, nonce: Vec<u8>) {
        if self
            .tx
            .send(Completion {
                initial_hash,
                nonce,
            })
            .is_err()
        {
            tracing::warn!("completion listener gone, dropping nonce");
        }
    }
}

pub fn completion_channel() -> (CompletionSink, mpsc::UnboundedReceiver<Completion>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CompletionSink { tx }, rx)
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine command not configured")]
    NotConfigured,
    #[error("engine is shutting down")]
    Closed,
}

/// External proof-of-work computation.
pub trait ProofOfWorkEngine: Send + Sync {
    /// Start computing a nonce for `initial_hash` meeting `target`.
    ///
    /// Must not block on the computation. The result, if any, is delivered
    /// later through `done`.
    fn calculate_nonce(
        &self,
        initial_hash: &[u8],
        target: &[u8],
        done: CompletionSink,
    ) -> Result<(), EngineError>;
}

/// Record one completion. Returns whether a nonce was written.
pub fn apply_completion(store: &TaskStore, completion: &Completion) -> bool {
    let short = hex::encode(&completion.initial_hash[..8.min(completion.initial_hash.len())]);
    if completion.nonce.is_empty() {
        tracing::warn!(initial_hash = %short, "empty nonce ignored, task stays pending");
        return false;
    }
    match store.update_task(&completion.initial_hash, &completion.nonce) {
        Ok(true) => {
            tracing::info!(initial_hash = %short, "nonce stored");
            true
        }
        Ok(false) => {
            tracing::debug!(
                initial_hash = %short,
                "nonce for absent or already completed task ignored"
            );
            false
        }
        Err(e) => {
            tracing::warn!(initial_hash = %short, error = %e, "failed to store nonce");
            false
        }
    }
}

/// Drain completions into the store until shutdown or all sinks are dropped.
pub async fn run_completions(
    store: TaskStore,
    mut rx: mpsc::UnboundedReceiver<Completion>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("completion listener shutting down");
                return;
            }

            completion = rx.recv() => {
                let Some(completion) = completion else {
                    tracing::info!("all completion sinks dropped, listener exiting");
                    return;
                };
                let store = store.clone();
                let applied = tokio::task::spawn_blocking(move || apply_completion(&store, &completion));
                if let Err(e) = applied.await {
                    tracing::error!(error = %e, "completion handler panicked");
                }
            }
        }
    }
}

// ── External command engine ──────────────────────────────────────────────────

/// Runs an external program per computation, bounded by a semaphore.
///
/// Invocation: `<command> <args..> <initial_hash hex> <target hex>`, run
/// in `work_dir`. The program prints the nonce as hex on stdout and exits 0.
pub struct CommandEngine {
    command: String,
    args: Vec<String>,
    work_dir: PathBuf,
    permits: Arc<Semaphore>,
    runtime: tokio::runtime::Handle,
}

impl CommandEngine {
    /// Must be called from within a tokio runtime.
    pub fn new(settings: &EngineConfig) -> Self {
        let max = if settings.max_concurrent == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            settings.max_concurrent as usize
        };
        tracing::info!(command = %settings.command, max_concurrent = max, "pow engine ready");
        Self {
            command: settings.command.clone(),
            args: settings.args.clone(),
            work_dir: settings.work_dir.clone(),
            permits: Arc::new(Semaphore::new(max)),
            runtime: tokio::runtime::Handle::current(),
        }
    }

    /// Refuse new work and drop queued computations. Running ones finish.
    pub fn close(&self) {
        self.permits.close();
        tracing::info!("pow engine closed");
    }
}

impl ProofOfWorkEngine for CommandEngine {
    fn calculate_nonce(
        &self,
        initial_hash: &[u8],
        target: &[u8],
        done: CompletionSink,
    ) -> Result<(), EngineError> {
        if self.command.is_empty() {
            return Err(EngineError::NotConfigured);
        }
        if self.permits.is_closed() {
            return Err(EngineError::Closed);
        }

        let permits = self.permits.clone();
        let command = self.command.clone();
        let mut args = self.args.clone();
        args.push(hex::encode(initial_hash));
        args.push(hex::encode(target));
        let work_dir = self.work_dir.clone();
        let initial_hash = initial_hash.to_vec();

        self.runtime.spawn(async move {
            let short = hex::encode(&initial_hash[..8.min(initial_hash.len())]);
            let Ok(_permit) = permits.acquire_owned().await else {
                tracing::debug!(initial_hash = %short, "engine closed, queued computation dropped");
                return;
            };
            let start = Instant::now();

            match run_engine(&command, &args, &work_dir).await {
                Ok(nonce) => {
                    tracing::info!(
                        initial_hash = %short,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "nonce calculated"
                    );
                    done.complete(initial_hash, nonce);
                }
                Err(err) => {
                    tracing::warn!(initial_hash = %short, error = %err, "pow computation failed");
                }
            }
        });
        Ok(())
    }
}

async fn run_engine(
    command: &str,
    args: &[String],
    work_dir: &std::path::Path,
) -> Result<Vec<u8>, String> {
    tokio::fs::create_dir_all(work_dir)
        .await
        .map_err(|e| format!("failed to create work dir {}: {}", work_dir.display(), e))?;

    let output = tokio::process::Command::new(command)
        .args(args)
        .current_dir(work_dir)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| format!("failed to spawn '{}': {}", command, e))?;

    if !output.status.success() {
        let code = output.status.code().unwrap_or(-1);
        return Err(format!(
            "exit code {}: {}",
            code,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let nonce = hex::decode(stdout.trim()).map_err(|e| format!("engine output not hex: {e}"))?;
    if nonce.is_empty() {
        return Err("engine printed an empty nonce".to_string());
    }
    Ok(nonce)
}
