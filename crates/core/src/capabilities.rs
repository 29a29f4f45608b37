//! Store capability descriptors.
//!
//! Capabilities are data, not types: a consumer inspects the record before
//! calling versioned or rotation-aware operations, and operations that need
//! a capability fail with a `Config` error on stores that lack it.

use serde::{Deserialize, Serialize};
use umbra_error::{Result, UmbraError};

/// Feature flags a store publishes.
///
/// Must be pure and consistent across calls: `capabilities()` on the same
/// store instance always answers the same.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCapabilities {
    /// The backend keeps addressable versions of each secret.
    pub versioning: bool,
    /// `describe` returns more than bare existence.
    pub metadata: bool,
    /// The backend can push change notifications.
    pub watching: bool,
    /// Values may be arbitrary bytes rather than UTF-8 text.
    pub binary: bool,
    /// The store must authenticate before serving requests.
    pub requires_auth: bool,
    /// Supported authentication methods, in preference order.
    /// Non-empty whenever `requires_auth` is set.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auth_methods: Vec<String>,
    /// Rotation support, for stores that can host rotated credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<RotationCapabilities>,
}

/// Rotation-specific capability flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationCapabilities {
    /// Strategy names the store can host (`immediate`, `two-key`, ...).
    pub strategies: Vec<String>,
    /// Whether old and new versions can serve simultaneously.
    pub zero_downtime: bool,
}

impl StoreCapabilities {
    /// A store with no optional features (the literal store's answer).
    pub fn none() -> Self {
        Self::default()
    }

    /// Return a copy with versioning enabled.
    pub fn with_versioning(mut self) -> Self {
        self.versioning = true;
        self
    }

    /// Return a copy with metadata enabled.
    pub fn with_metadata(mut self) -> Self {
        self.metadata = true;
        self
    }

    /// Return a copy with binary payloads enabled.
    pub fn with_binary(mut self) -> Self {
        self.binary = true;
        self
    }

    /// Return a copy requiring auth via the given methods.
    pub fn with_auth(mut self, methods: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.requires_auth = true;
        self.auth_methods = methods.into_iter().map(Into::into).collect();
        debug_assert!(
            !self.auth_methods.is_empty(),
            "requires_auth implies at least one auth method"
        );
        self
    }

    /// Return a copy with rotation support.
    pub fn with_rotation(mut self, rotation: RotationCapabilities) -> Self {
        self.rotation = Some(rotation);
        self
    }

    /// Enforce the structural invariant: `requires_auth` implies a non-empty
    /// method list.
    pub fn validate(&self) -> Result<()> {
        if self.requires_auth && self.auth_methods.is_empty() {
            return Err(UmbraError::config(
                "capabilities.auth_methods",
                "store requires auth but declares no auth methods",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_without_methods_fails_validation() {
        let caps = StoreCapabilities {
            requires_auth: true,
            ..StoreCapabilities::default()
        };
        assert!(caps.validate().is_err());
    }

    #[test]
    fn with_auth_satisfies_the_invariant() {
        let caps = StoreCapabilities::none().with_auth(["token", "userpass"]);
        caps.validate().unwrap();
        assert_eq!(caps.auth_methods, vec!["token", "userpass"]);
    }

    #[test]
    fn capability_record_round_trips() {
        let caps = StoreCapabilities::none()
            .with_versioning()
            .with_metadata()
            .with_rotation(RotationCapabilities {
                strategies: vec!["two-key".into()],
                zero_downtime: true,
            });
        let json = serde_json::to_string(&caps).unwrap();
        let back: StoreCapabilities = serde_json::from_str(&json).unwrap();
        assert_eq!(caps, back);
    }
}
