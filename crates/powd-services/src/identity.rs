//! Server identity: the keypair responses are sealed with.
//!
//! Created on first use: the first call to [`IdentityProvider::identity`]
//! loads the key file, or generates and saves a fresh identity if there is
//! none. Later calls return the same keypair.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use powd_core::crypto::Keypair;

pub struct IdentityProvider {
    path: Option<PathBuf>,
    cached: Mutex<Option<Arc<Keypair>>>,
}

impl IdentityProvider {
    /// Identity persisted at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            cached: Mutex::new(None),
        }
    }

    /// Fixed identity that is never persisted.
    pub fn fixed(keypair: Keypair) -> Self {
        Self {
            path: None,
            cached: Mutex::new(Some(Arc::new(keypair))),
        }
    }

    /// The server identity, created on first call.
    pub fn identity(&self) -> Result<Arc<Keypair>> {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(keypair) = cached.as_ref() {
            return Ok(keypair.clone());
        }

        let keypair = match &self.path {
            Some(path) => match Keypair::load(path)
                .with_context(|| format!("failed to load identity {}", path.display()))?
            {
                Some(existing) => {
                    tracing::info!(address = existing.address(), "using identity");
                    existing
                }
                None => {
                    tracing::info!("creating new identity...");
                    let created = Keypair::generate();
                    created
                        .save(path)
                        .with_context(|| format!("failed to save identity {}", path.display()))?;
                    tracing::info!(
                        address = created.address(),
                        public_key = hex::encode(created.public),
                        "identity created"
                    );
                    created
                }
            },
            None => Keypair::generate(),
        };

        let keypair = Arc::new(keypair);
        *cached = Some(keypair.clone());
        Ok(keypair)
    }
}
