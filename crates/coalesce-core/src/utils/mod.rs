//! Shared helpers.
//!
//! - [`canonical`]: canonical JSON rendering and SHA-256 digests used to derive request keys

pub mod canonical;

pub use canonical::{canonical_json, sha256_hex};
