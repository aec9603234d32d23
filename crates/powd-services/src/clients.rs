//! Client registry: which peers may delegate proof-of-work to this node.
//!
//! Each authorized client is known by its public key. For every client the
//! registry holds the request key derived from that public key; requests
//! are sealed to it, so whichever key opens a request identifies the client.
//!
//! The registry is owned by the admin-list side of the application, which
//! may add or remove clients at any time. Request handling only ever reads
//! an owned [`ClientRegistry::snapshot`], so a concurrent edit at worst
//! serves one request against a slightly stale list.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use dashmap::DashMap;

use powd_core::crypto::{self, Keypair};

/// Header written to a freshly created client list.
const LIST_HEADER: &str = "# Clients may send incomplete objects for proof of work.\n\
                           # One hex-encoded public key per line.\n";

/// A client and the key its requests are sealed to.
#[derive(Clone)]
pub struct ClientKey {
    pub public_key: [u8; 32],
    pub request_key: Arc<Keypair>,
}

impl ClientKey {
    pub fn new(public_key: [u8; 32]) -> Self {
        Self {
            public_key,
            request_key: Arc::new(crypto::client_request_key(&public_key)),
        }
    }

    pub fn address(&self) -> String {
        crypto::address(&self.public_key)
    }
}

/// Registry of authorized clients. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    clients: Arc<DashMap<[u8; 32], ClientKey>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Authorize a client. Returns false if it was already present.
    pub fn add(&self, public_key: [u8; 32]) -> bool {
        let mut added = false;
        self.clients.entry(public_key).or_insert_with(|| {
            added = true;
            ClientKey::new(public_key)
        });
        if added {
            tracing::info!(client = crypto::address(&public_key), "client added");
        }
        added
    }

    /// Revoke a client. Returns false if it was not present.
    pub fn remove(&self, public_key: &[u8; 32]) -> bool {
        let removed = self.clients.remove(public_key).is_some();
        if removed {
            tracing::info!(client = crypto::address(public_key), "client removed");
        }
        removed
    }

    pub fn contains(&self, public_key: &[u8; 32]) -> bool {
        self.clients.contains_key(public_key)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Owned copy of the current client set.
    pub fn snapshot(&self) -> Vec<ClientKey> {
        self.clients.iter().map(|e| e.value().clone()).collect()
    }

    /// Add hex-encoded keys from config. Malformed entries are logged and skipped.
    pub fn apply_config(&self, keys: &[String]) {
        for hex_key in keys {
            match crypto::parse_public_key(hex_key) {
                Ok(key) => {
                    self.add(key);
                }
                Err(e) => {
                    tracing::warn!(entry = %hex_key, error = %e, "ignoring client key from config");
                }
            }
        }
    }

    /// Load the client list at `path`, creating it with a header if missing.
    /// Returns the number of clients read from the file.
    pub fn load_list(&self, path: &Path) -> Result<usize> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            std::fs::write(path, LIST_HEADER)
                .with_context(|| format!("failed to create client list {}", path.display()))?;
            tracing::info!(path = %path.display(), "created empty client list");
        }

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read client list {}", path.display()))?;

        let mut count = 0;
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match crypto::parse_public_key(line) {
                Ok(key) => {
                    self.add(key);
                    count += 1;
                }
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    line = lineno + 1,
                    error = %e,
                    "ignoring malformed client list entry"
                ),
            }
        }
        Ok(count)
    }
}
