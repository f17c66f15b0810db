//! Request identity types.
//!
//! # Type Categories
//!
//! - [`RequestDescriptor`]: what the caller hands in to name a logical operation
//! - [`RequestKey`]: the canonical string every table is keyed by
//!
//! A descriptor is either an opaque string, which is its own key, or a
//! structured JSON value that is canonicalized (and hashed by default) into a
//! key. See [`crate::utils::canonical`] for the canonical form.

use crate::utils::{canonical_json, sha256_hex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{borrow::Borrow, fmt, sync::Arc};

/// Batch bucket used when a descriptor carries neither a `path` nor an `endpoint`.
pub const DEFAULT_BATCH_KEY: &str = "default";

/// Caller-supplied identifier for "the same logical operation".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestDescriptor {
    /// Opaque string; used verbatim as the request key.
    Key(String),
    /// Arbitrary JSON record; canonicalized into the request key.
    Structured(Value),
}

impl RequestDescriptor {
    /// Derives the [`RequestKey`] for this descriptor.
    ///
    /// With `enable_hashing`, structured descriptors map to the 64-character hex
    /// SHA-256 of their canonical serialization; otherwise the canonical
    /// serialization itself is the key. String descriptors are never hashed.
    #[must_use]
    pub fn request_key(&self, enable_hashing: bool) -> RequestKey {
        match self {
            Self::Key(key) => RequestKey::new(key.as_str()),
            Self::Structured(Value::String(key)) => RequestKey::new(key.as_str()),
            Self::Structured(value) => {
                let canonical = canonical_json(value);
                if enable_hashing {
                    RequestKey::new(sha256_hex(&canonical))
                } else {
                    RequestKey::new(canonical)
                }
            }
        }
    }

    /// Derives the batch bucket this descriptor belongs to.
    ///
    /// Precedence: the `path` field with any query component stripped, then the
    /// `endpoint` field verbatim, then [`DEFAULT_BATCH_KEY`].
    #[must_use]
    pub fn batch_key(&self) -> String {
        let Self::Structured(Value::Object(fields)) = self else {
            return DEFAULT_BATCH_KEY.to_string();
        };

        if let Some(path) = fields.get("path").and_then(Value::as_str) {
            let bare = path.split_once('?').map_or(path, |(bare, _query)| bare);
            return bare.to_string();
        }

        if let Some(endpoint) = fields.get("endpoint").and_then(Value::as_str) {
            return endpoint.to_string();
        }

        DEFAULT_BATCH_KEY.to_string()
    }

    /// Returns the structured payload, if any.
    #[must_use]
    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            Self::Structured(value) => Some(value),
            Self::Key(_) => None,
        }
    }
}

impl From<&str> for RequestDescriptor {
    fn from(key: &str) -> Self {
        Self::Key(key.to_string())
    }
}

impl From<String> for RequestDescriptor {
    fn from(key: String) -> Self {
        Self::Key(key)
    }
}

impl From<Value> for RequestDescriptor {
    fn from(value: Value) -> Self {
        match value {
            Value::String(key) => Self::Key(key),
            other => Self::Structured(other),
        }
    }
}

/// Canonical string identifying a [`RequestDescriptor`].
///
/// Backed by `Arc<str>` so clones handed to spawned tasks and table entries
/// are reference-count bumps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey(Arc<str>);

impl RequestKey {
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for RequestKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RequestKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl Serialize for RequestKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}
