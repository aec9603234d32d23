//! Proof-of-work request handler: the `pow` custom command.
//!
//! Per initial hash a task moves ABSENT → PENDING → DONE. The first
//! CALCULATE request stores the task and starts the engine; repeats are
//! status polls answered from the store. The task store's unique key is
//! what guarantees a single computation per hash: `has_task` only saves
//! the insert attempt in the common case.

use std::sync::Arc;

use powd_core::wire::POW_COMMAND;
use powd_core::CustomCommand;

use crate::encoder::ResponseEncoder;
use crate::engine::{CompletionSink, ProofOfWorkEngine};
use crate::pow_types::{ProofOfWorkRequest, ProofOfWorkResponse, RequestKind};
use crate::resolver::{DecryptionResolver, Resolution};
use crate::service::CommandHandler;
use crate::task_store::{StoreError, TaskStore};

/// Reason sent to senders whose request no client key could open.
pub const UNKNOWN_SENDER_REASON: &str = "Unknown sender. Please ask the server's administrator \
     to add you as a client. For this they'll need your public key.";

pub struct PowRequestHandler {
    resolver: DecryptionResolver,
    store: TaskStore,
    engine: Arc<dyn ProofOfWorkEngine>,
    sink: CompletionSink,
    encoder: ResponseEncoder,
}

impl PowRequestHandler {
    pub fn new(
        resolver: DecryptionResolver,
        store: TaskStore,
        engine: Arc<dyn ProofOfWorkEngine>,
        sink: CompletionSink,
        encoder: ResponseEncoder,
    ) -> Self {
        Self {
            resolver,
            store,
            engine,
            sink,
            encoder,
        }
    }

    /// Answer a CALCULATE request, storing and starting it if it is new.
    pub fn process(&self, request: &ProofOfWorkRequest) -> Result<ProofOfWorkResponse, StoreError> {
        let hash = &request.initial_hash;
        let short = short_hex(hash);

        if !self.store.has_task(hash)? {
            match self.store.store_task(request) {
                Ok(()) => {
                    tracing::debug!(
                        initial_hash = %short,
                        client = request.sender_address(),
                        "new pow task"
                    );
                    submit(self.engine.as_ref(), &self.sink, hash, &request.data);
                    return Ok(ProofOfWorkResponse::calculating(hash));
                }
                Err(StoreError::Duplicate) => {
                    tracing::debug!(initial_hash = %short, "task stored concurrently, polling");
                }
                Err(e) => return Err(e),
            }
        }

        match self.store.get_nonce(hash)? {
            Some(nonce) if !nonce.is_empty() => {
                tracing::debug!(initial_hash = %short, "pow task complete");
                Ok(ProofOfWorkResponse::complete(hash, nonce))
            }
            _ => Ok(ProofOfWorkResponse::calculating(hash)),
        }
    }
}

impl CommandHandler for PowRequestHandler {
    fn command(&self) -> &'static str {
        POW_COMMAND
    }

    fn handle(&self, command: &CustomCommand) -> Option<CustomCommand> {
        let request = match self.resolver.resolve(&command.data) {
            Resolution::Resolved { request, .. } => request,
            Resolution::UnknownSender => {
                tracing::debug!("pow request from unknown sender");
                return Some(CustomCommand::error(UNKNOWN_SENDER_REASON));
            }
            Resolution::Invalid(e) => {
                tracing::debug!(error = %e, "undecodable pow request");
                return None;
            }
        };

        if request.kind != RequestKind::Calculate {
            tracing::debug!(kind = ?request.kind, "ignoring pow message");
            return None;
        }

        match self.process(&request) {
            Ok(response) => self.encoder.encode(&response, &request.sender),
            Err(e) => {
                tracing::warn!(
                    initial_hash = %short_hex(&request.initial_hash),
                    error = %e,
                    "task store unavailable, dropping pow request"
                );
                None
            }
        }
    }
}

/// Hand a task to the engine. A refused submission leaves the task
/// pending for the next sweep.
pub(crate) fn submit(
    engine: &dyn ProofOfWorkEngine,
    sink: &CompletionSink,
    initial_hash: &[u8],
    target: &[u8],
) -> bool {
    match engine.calculate_nonce(initial_hash, target, sink.clone()) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(
                initial_hash = %short_hex(initial_hash),
                error = %e,
                "engine refused task, leaving it pending"
            );
            false
        }
    }
}

pub(crate) fn short_hex(bytes: &[u8]) -> String {
    hex::encode(&bytes[..8.min(bytes.len())])
}
