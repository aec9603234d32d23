//! Decryption resolver: finds which client a sealed request belongs to.

use powd_core::crypto::{self, OpenError};

use crate::clients::{ClientKey, ClientRegistry};
use crate::pow_types::{ProofOfWorkRequest, RequestError};

/// Outcome of trying a request against every known client key.
#[derive(Debug)]
pub enum Resolution {
    /// A client key opened the request.
    Resolved {
        request: ProofOfWorkRequest,
        /// Public key of the client list entry whose key matched.
        client: [u8; 32],
    },
    /// No client key opened the request.
    UnknownSender,
    /// A key opened the request but the plaintext is not a valid request.
    Invalid(RequestError),
}

pub struct DecryptionResolver {
    clients: ClientRegistry,
}

impl DecryptionResolver {
    pub fn new(clients: ClientRegistry) -> Self {
        Self { clients }
    }

    /// Try `payload` against each client key in turn; first match wins.
    pub fn resolve(&self, payload: &[u8]) -> Resolution {
        resolve_with(&self.clients.snapshot(), payload)
    }
}

/// Trial decryption against an explicit key list.
pub fn resolve_with(keys: &[ClientKey], payload: &[u8]) -> Resolution {
    for key in keys {
        match crypto::open(&key.request_key, payload) {
            Ok(opened) if opened.sender != key.public_key => {
                // Request keys derive from public keys; only the client's own
                // static key may speak for it.
                tracing::debug!(
                    client = key.address(),
                    sender = crypto::address(&opened.sender),
                    "pow request sealed by a different identity"
                );
                return Resolution::UnknownSender;
            }
            Ok(opened) => {
                return match ProofOfWorkRequest::from_plaintext(opened.sender, &opened.plaintext) {
                    Ok(request) => Resolution::Resolved {
                        request,
                        client: key.public_key,
                    },
                    Err(e) => Resolution::Invalid(e),
                };
            }
            Err(OpenError::KeyMismatch) => continue,
            Err(OpenError::Malformed(e)) => {
                // Same bytes fail the same way under every key.
                tracing::debug!(error = %e, "malformed pow payload");
                return Resolution::UnknownSender;
            }
        }
    }
    Resolution::UnknownSender
}
