//! Proof-of-work wire types: requests from clients and the server's answers.
//!
//! `PowEnvelope` is the JSON plaintext inside every sealed `pow` command.
//! Byte fields travel as hex. The sender is never read from the plaintext:
//! it is the static key authenticated when the command was opened.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Envelope ──────────────────────────────────────────────────────────────────

/// JSON plaintext of a sealed `pow` command, in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowEnvelope {
    /// Hex-encoded initial hash: the task's deduplication key.
    pub initial_hash: String,
    /// What the message asks for or reports.
    pub request: RequestKind,
    /// Hex-encoded work target on requests, nonce on COMPLETE responses.
    pub data: String,
}

/// Discriminator of a `pow` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Client → server: compute a nonce, or report on an earlier request.
    Calculate,
    /// Server → client: work is in progress.
    Calculating,
    /// Server → client: `data` holds the nonce.
    Complete,
    /// Anything newer than this server understands.
    #[serde(other)]
    Unknown,
}

// ── Decoded messages ──────────────────────────────────────────────────────────

/// A request recovered from a sealed `pow` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofOfWorkRequest {
    /// Authenticated static key of the client that sealed the request.
    pub sender: [u8; 32],
    pub kind: RequestKind,
    pub initial_hash: Vec<u8>,
    /// Work target.
    pub data: Vec<u8>,
}

impl ProofOfWorkRequest {
    pub fn calculate(sender: [u8; 32], initial_hash: Vec<u8>, target: Vec<u8>) -> Self {
        Self {
            sender,
            kind: RequestKind::Calculate,
            initial_hash,
            data: target,
        }
    }

    /// Printable address of the sender, stored with the task.
    pub fn sender_address(&self) -> String {
        powd_core::crypto::address(&self.sender)
    }

    /// Decode the plaintext of an opened command from `sender`.
    pub fn from_plaintext(sender: [u8; 32], plaintext: &[u8]) -> Result<Self, RequestError> {
        let envelope: PowEnvelope = serde_json::from_slice(plaintext)?;
        let initial_hash =
            hex::decode(&envelope.initial_hash).map_err(|_| RequestError::Hex("initial_hash"))?;
        if initial_hash.is_empty() {
            return Err(RequestError::EmptyInitialHash);
        }
        let data = hex::decode(&envelope.data).map_err(|_| RequestError::Hex("data"))?;
        Ok(Self {
            sender,
            kind: envelope.request,
            initial_hash,
            data,
        })
    }

    /// Plaintext a client seals to its request key.
    pub fn to_plaintext(&self) -> Result<Vec<u8>, RequestError> {
        let envelope = PowEnvelope {
            initial_hash: hex::encode(&self.initial_hash),
            request: self.kind,
            data: hex::encode(&self.data),
        };
        Ok(serde_json::to_vec(&envelope)?)
    }
}

/// Status reported back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Calculating,
    Complete,
}

/// The server's answer to a CALCULATE request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofOfWorkResponse {
    pub initial_hash: Vec<u8>,
    pub status: ResponseStatus,
    /// Empty unless `status` is COMPLETE.
    pub nonce: Vec<u8>,
}

impl ProofOfWorkResponse {
    pub fn calculating(initial_hash: &[u8]) -> Self {
        Self {
            initial_hash: initial_hash.to_vec(),
            status: ResponseStatus::Calculating,
            nonce: Vec::new(),
        }
    }

    pub fn complete(initial_hash: &[u8], nonce: Vec<u8>) -> Self {
        Self {
            initial_hash: initial_hash.to_vec(),
            status: ResponseStatus::Complete,
            nonce,
        }
    }

    pub fn to_plaintext(&self) -> Result<Vec<u8>, RequestError> {
        let envelope = PowEnvelope {
            initial_hash: hex::encode(&self.initial_hash),
            request: match self.status {
                ResponseStatus::Calculating => RequestKind::Calculating,
                ResponseStatus::Complete => RequestKind::Complete,
            },
            data: hex::encode(&self.nonce),
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    /// Decode a response plaintext, as a client does after opening it.
    pub fn from_plaintext(plaintext: &[u8]) -> Result<Self, RequestError> {
        let envelope: PowEnvelope = serde_json::from_slice(plaintext)?;
        let status = match envelope.request {
            RequestKind::Calculating => ResponseStatus::Calculating,
            RequestKind::Complete => ResponseStatus::Complete,
            other => return Err(RequestError::UnexpectedKind(other)),
        };
        Ok(Self {
            initial_hash: hex::decode(&envelope.initial_hash)
                .map_err(|_| RequestError::Hex("initial_hash"))?,
            status,
            nonce: hex::decode(&envelope.data).map_err(|_| RequestError::Hex("data"))?,
        })
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("invalid pow JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("field {0} is not valid hex")]
    Hex(&'static str),
    #[error("initial hash is empty")]
    EmptyInitialHash,
    #[error("unexpected message kind {0:?}")]
    UnexpectedKind(RequestKind),
}
