//! Response encoder: seals status responses for the requesting client.
//!
//! Responses are sealed with the server identity for the client's public
//! key and never leave in plaintext. If sealing fails the response is
//! dropped and logged; the client will poll again.

use std::sync::Arc;

use bytes::Bytes;
use powd_core::crypto;
use powd_core::wire::{CustomCommand, POW_COMMAND};

use crate::identity::IdentityProvider;
use crate::pow_types::ProofOfWorkResponse;

pub struct ResponseEncoder {
    identity: Arc<IdentityProvider>,
}

impl ResponseEncoder {
    pub fn new(identity: Arc<IdentityProvider>) -> Self {
        Self { identity }
    }

    /// Seal `response` for `recipient`. `None` if it could not be sealed.
    pub fn encode(
        &self,
        response: &ProofOfWorkResponse,
        recipient: &[u8; 32],
    ) -> Option<CustomCommand> {
        match self.try_encode(response, recipient) {
            Ok(command) => Some(command),
            Err(e) => {
                tracing::warn!(
                    recipient = crypto::address(recipient),
                    error = %e,
                    "dropping pow response"
                );
                None
            }
        }
    }

    fn try_encode(
        &self,
        response: &ProofOfWorkResponse,
        recipient: &[u8; 32],
    ) -> anyhow::Result<CustomCommand> {
        let identity = self.identity.identity()?;
        let plaintext = response.to_plaintext()?;
        let sealed = crypto::seal(&identity, recipient, &plaintext)?;
        Ok(CustomCommand::new(POW_COMMAND, Bytes::from(sealed)))
    }
}
