//! powd-core: shared configuration, wire format, and cryptographic primitives.
//! All other powd crates depend on this one.

pub mod config;
pub mod crypto;
pub mod wire;

pub use wire::CustomCommand;
