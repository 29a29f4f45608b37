//! OS keychain backend (macOS Keychain, Windows Credential Manager, Linux
//! Secret Service).
//!
//! The reference path is the keychain service name; the account defaults to
//! the configured `user`, overridable per reference with `?user=`. Platform
//! gaps are reported as configuration problems: an unsupported platform and
//! a headless Linux session are both things the operator has to fix outside
//! umbra.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use umbra_core::{Secret, SecretMetadata, StoreCapabilities, StoreRef};
use umbra_error::{Result, UmbraError};

use crate::context::OpContext;
use crate::contract::{SecretStore, StoreFactory};

#[derive(Debug, Default, Deserialize)]
struct KeyringConfig {
    /// Default account name for entries.
    #[serde(default)]
    user: Option<String>,
}

/// Store over the platform keychain via the `keyring` crate.
pub struct KeyringStore {
    name: String,
    user: Option<String>,
}

impl KeyringStore {
    fn account_for(&self, reference: &StoreRef) -> String {
        reference
            .options
            .get("user")
            .cloned()
            .or_else(|| self.user.clone())
            .unwrap_or_else(whoami_fallback)
    }

    /// Refuse early on platforms and sessions the backing API cannot serve.
    fn check_platform(&self) -> Result<()> {
        if !cfg!(any(target_os = "macos", target_os = "windows", target_os = "linux")) {
            return Err(UmbraError::config(
                format!("secret_stores.{}", self.name),
                "unsupported platform: no OS keychain available",
            )
            .with_suggestion("use a different store type on this platform"));
        }
        #[cfg(target_os = "linux")]
        {
            let headless = std::env::var_os("DBUS_SESSION_BUS_ADDRESS").is_none()
                && std::env::var_os("DISPLAY").is_none()
                && std::env::var_os("WAYLAND_DISPLAY").is_none();
            if headless {
                return Err(UmbraError::config(
                    format!("secret_stores.{}", self.name),
                    "headless environment: the Secret Service needs a session bus",
                )
                .with_suggestion(
                    "run inside a desktop session or switch this store to `file` or `pass`",
                ));
            }
        }
        Ok(())
    }

    fn entry(&self, reference: &StoreRef) -> Result<keyring::Entry> {
        if reference.path.is_empty() {
            return Err(UmbraError::validation("empty key for keyring store"));
        }
        let account = self.account_for(reference);
        keyring::Entry::new(&reference.path, &account)
            .map_err(|e| UmbraError::provider(self.name.clone(), "entry", e))
    }

    fn map_keyring_error(&self, reference: &StoreRef, err: keyring::Error) -> UmbraError {
        match err {
            keyring::Error::NoEntry => UmbraError::not_found(&self.name, &reference.path),
            keyring::Error::Ambiguous(_) => UmbraError::validation_field(
                &self.name,
                "path",
                format!("multiple keychain entries match '{}'", reference.path),
            ),
            other => UmbraError::provider(self.name.clone(), "resolve", other),
        }
    }
}

fn whoami_fallback() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "umbra".to_string())
}

#[async_trait]
impl SecretStore for KeyringStore {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(skip(self, ctx), fields(store = %self.name, path = %reference.path))]
    async fn resolve(&self, ctx: &OpContext, reference: &StoreRef) -> Result<Secret> {
        ctx.ensure_live("keyring resolve")?;
        self.check_platform()?;
        let entry = self.entry(reference)?;
        // The keyring API is blocking; keep it off the async workers.
        let password = tokio::task::spawn_blocking(move || entry.get_password())
            .await
            .map_err(|e| UmbraError::provider(self.name.clone(), "resolve", e))?
            .map_err(|e| self.map_keyring_error(reference, e))?;
        Ok(Secret::new(password))
    }

    async fn describe(&self, ctx: &OpContext, reference: &StoreRef) -> Result<SecretMetadata> {
        ctx.ensure_live("keyring describe")?;
        self.check_platform()?;
        let entry = self.entry(reference)?;
        let found = tokio::task::spawn_blocking(move || entry.get_password())
            .await
            .map_err(|e| UmbraError::provider(self.name.clone(), "describe", e))?;
        Ok(match found {
            Ok(_) => SecretMetadata::present(),
            Err(keyring::Error::NoEntry) => SecretMetadata::absent(),
            Err(e) => return Err(self.map_keyring_error(reference, e)),
        })
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::none().with_auth(["os-session"])
    }

    async fn validate(&self, ctx: &OpContext) -> Result<()> {
        ctx.ensure_live("keyring validate")?;
        self.check_platform()
    }
}

/// Factory for the `keyring` type.
pub struct KeyringFactory;

#[async_trait]
impl StoreFactory for KeyringFactory {
    fn type_name(&self) -> &'static str {
        "keyring"
    }

    async fn create(
        &self,
        name: &str,
        config: &serde_json::Value,
    ) -> Result<Arc<dyn SecretStore>> {
        let parsed: KeyringConfig = serde_json::from_value(config.clone()).map_err(|e| {
            UmbraError::config(
                format!("secret_stores.{name}.config"),
                format!("invalid keyring store config: {e}"),
            )
        })?;
        Ok(Arc::new(KeyringStore {
            name: name.to_string(),
            user: parsed.user,
        }))
    }
}
