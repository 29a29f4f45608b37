//! Non-secret secret descriptors.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a store knows about a secret without reading its plaintext.
///
/// `describe` returns this for missing secrets too (`exists: false`) instead
/// of raising `NotFound`; absence is data at this layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretMetadata {
    /// Whether the secret exists at all.
    pub exists: bool,
    /// Backend version identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Last modification time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Payload size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Backend-reported content type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Permission strings the backend reports for the caller.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub permissions: BTreeSet<String>,
    /// Backend tags or labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl SecretMetadata {
    /// Metadata for a secret that does not exist.
    pub fn absent() -> Self {
        Self::default()
    }

    /// Metadata for an existing secret with nothing else known.
    pub fn present() -> Self {
        Self {
            exists: true,
            ..Self::default()
        }
    }

    /// Return a copy with `version` set.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Return a copy with `updated_at` set.
    pub fn with_updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }

    /// Return a copy with `size` set.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}
