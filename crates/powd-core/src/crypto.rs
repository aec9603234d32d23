//! Cryptographic primitives for powd.
//!
//! Provides three things:
//!   1. BLAKE3 hashing: frame checksums, client addresses, key derivation
//!   2. Long-term X25519 identities, persisted to disk
//!   3. Sealed one-way messages: a single Noise_X message per request or
//!      response. The sender's static key travels encrypted inside the
//!      handshake and is authenticated by it, so a successful `open` tells
//!      the recipient who signed the message.
//!
//! All key material derives ZeroizeOnDrop: wiped from memory when dropped.
//! There is no unsafe code in this module.

use std::path::Path;

use snow::Builder;
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

// ── BLAKE3 ────────────────────────────────────────────────────────────────────

/// Hash a byte slice, returning a 32-byte BLAKE3 digest.
pub fn hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Context string for per-client request key derivation. Changing it
/// invalidates every deployed client.
const CLIENT_KEY_CONTEXT: &str = "powd 2015-11-22 client request decryption key";

/// Printable address for a public key: `PW-` followed by the hex of the
/// first 20 bytes of its BLAKE3 digest.
pub fn address(public_key: &[u8; 32]) -> String {
    format!("PW-{}", hex::encode(&hash(public_key)[..20]))
}

// ── Keypair ───────────────────────────────────────────────────────────────────

/// A long-term static X25519 keypair.
///
/// Used for the server identity, for client identities, and for the
/// per-client request keys returned by [`client_request_key`].
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Keypair {
    /// Private key: zeroized on drop, never exposed directly.
    private: Zeroizing<[u8; 32]>,
    pub public: [u8; 32],
}

impl Keypair {
    /// Generate a new random X25519 keypair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::thread_rng());
        Self::from_private(secret.to_bytes())
    }

    /// Reconstruct a keypair from stored private key bytes.
    /// The public key is derived deterministically from the private key.
    pub fn from_private(private_bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(private_bytes);
        let public = PublicKey::from(&secret);
        Self {
            private: Zeroizing::new(private_bytes),
            public: *public.as_bytes(),
        }
    }

    /// Serialize the private key for persistent storage.
    pub fn private_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(*self.private)
    }

    /// Load a keypair from `path`, or return `None` if the file is absent.
    pub fn load(path: &Path) -> Result<Option<Self>, CryptoError> {
        let bytes = match std::fs::read(path) {
            Ok(b) => Zeroizing::new(b),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CryptoError::KeyFile(e)),
        };
        let private: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::BadKeyLength(bytes.len()))?;
        Ok(Some(Self::from_private(private)))
    }

    /// Write the private key to `path` with owner-only permissions.
    pub fn save(&self, path: &Path) -> Result<(), CryptoError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(CryptoError::KeyFile)?;
        }
        std::fs::write(path, self.private.as_slice()).map_err(CryptoError::KeyFile)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .map_err(CryptoError::KeyFile)?;
        }
        Ok(())
    }

    /// Printable address of this keypair's public key.
    pub fn address(&self) -> String {
        address(&self.public)
    }
}

/// Derive the request key a client seals its requests to.
///
/// Both sides compute it from the client's public key alone, so the
/// server only needs to know which clients it serves. Trying a request
/// against this key tells the server which client list entry it belongs to.
pub fn client_request_key(client_public: &[u8; 32]) -> Keypair {
    Keypair::from_private(blake3::derive_key(CLIENT_KEY_CONTEXT, client_public))
}

/// Parse a hex-encoded 32-byte public key.
pub fn parse_public_key(hex_key: &str) -> Result<[u8; 32], CryptoError> {
    let bytes = hex::decode(hex_key.trim()).map_err(|_| CryptoError::BadKeyHex)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::BadKeyLength(bytes.len()))
}

// ── Sealed messages ───────────────────────────────────────────────────────────

/// One-way Noise pattern: sender static key transmitted, recipient known.
const SEAL_PATTERN: &str = "Noise_X_25519_ChaChaPoly_BLAKE2s";

/// Largest Noise message.
const MAX_NOISE_MESSAGE: usize = 65535;

/// Handshake overhead of a single Noise_X message:
/// ephemeral (32) + encrypted static (32 + 16 MAC) + payload MAC (16).
const SEAL_OVERHEAD: usize = 96;

/// Largest plaintext a sealed message can carry.
pub const MAX_SEALED_PLAINTEXT: usize = MAX_NOISE_MESSAGE - SEAL_OVERHEAD;

/// Encrypt `plaintext` for `recipient`, authenticated by `sender`'s static key.
pub fn seal(
    sender: &Keypair,
    recipient: &[u8; 32],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if plaintext.len() > MAX_SEALED_PLAINTEXT {
        return Err(CryptoError::TooLong(plaintext.len()));
    }
    let mut state = Builder::new(SEAL_PATTERN.parse().map_err(|_| CryptoError::BadPattern)?)
        .local_private_key(&*sender.private)
        .remote_public_key(recipient)
        .build_initiator()?;

    let mut out = vec![0u8; plaintext.len() + SEAL_OVERHEAD];
    let len = state.write_message(plaintext, &mut out)?;
    out.truncate(len);
    Ok(out)
}

/// A successfully opened message.
pub struct Opened {
    /// The authenticated static key of whoever sealed the message.
    pub sender: [u8; 32],
    pub plaintext: Vec<u8>,
}

/// Why a sealed message could not be opened.
#[derive(Debug, Error)]
pub enum OpenError {
    /// The message was not sealed for this key (or was tampered with).
    /// Expected while trying several keys in turn.
    #[error("message was not sealed for this key")]
    KeyMismatch,

    #[error("malformed sealed message: {0}")]
    Malformed(CryptoError),
}

/// Open a message sealed for `recipient`.
pub fn open(recipient: &Keypair, message: &[u8]) -> Result<Opened, OpenError> {
    if message.len() < SEAL_OVERHEAD || message.len() > MAX_NOISE_MESSAGE {
        return Err(OpenError::Malformed(CryptoError::TooLong(message.len())));
    }
    let params = SEAL_PATTERN
        .parse()
        .map_err(|_| OpenError::Malformed(CryptoError::BadPattern))?;
    let mut state = Builder::new(params)
        .local_private_key(&*recipient.private)
        .build_responder()
        .map_err(|e| OpenError::Malformed(CryptoError::Noise(e)))?;

    let mut plaintext = vec![0u8; message.len()];
    let len = match state.read_message(message, &mut plaintext) {
        Ok(len) => len,
        Err(snow::Error::Decrypt) => return Err(OpenError::KeyMismatch),
        Err(e) => return Err(OpenError::Malformed(CryptoError::Noise(e))),
    };
    plaintext.truncate(len);

    let sender: [u8; 32] = state
        .get_remote_static()
        .and_then(|s| s.try_into().ok())
        .ok_or(OpenError::KeyMismatch)?;

    Ok(Opened { sender, plaintext })
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid Noise pattern string: this is a bug")]
    BadPattern,

    #[error("Noise protocol error: {0}")]
    Noise(#[from] snow::Error),

    #[error("message length {0} out of range")]
    TooLong(usize),

    #[error("key must be 32 bytes, got {0}")]
    BadKeyLength(usize),

    #[error("key is not valid hex")]
    BadKeyHex,

    #[error("key file: {0}")]
    KeyFile(std::io::Error),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
