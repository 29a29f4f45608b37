//! Bitwarden backend, wrapping the `bw` CLI.
//!
//! The CLI holds the real session; this store tracks a small unlock state
//! machine (`Unknown → Ready | Locked | LoggedOut`) so it can fail fast with
//! the right `Auth` error and suggestion instead of shelling out blindly.
//! Well-known CLI error texts map onto the taxonomy: `not logged in` and
//! `vault is locked` become `Auth`, `not found` becomes `NotFound`, a
//! missing binary becomes `Command` with an install hint.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use umbra_core::{Secret, SecretMetadata, StoreCapabilities, StoreRef};
use umbra_error::{Result, UmbraError};

use crate::context::OpContext;
use crate::contract::{SecretStore, StoreFactory};
use crate::exec::{CommandExecutor, CommandSpec, SystemExecutor};

#[derive(Debug, Default, Deserialize)]
struct BitwardenConfig {
    /// Session token; falls back to the `BW_SESSION` environment variable,
    /// which the CLI also honours on its own.
    #[serde(default)]
    session: Option<String>,
}

/// Session states the CLI reports through `bw status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Unknown,
    Ready,
    Locked,
    LoggedOut,
}

/// Store wrapping the Bitwarden CLI.
pub struct BitwardenStore {
    name: String,
    session: Option<String>,
    executor: Arc<dyn CommandExecutor>,
    state: RwLock<SessionState>,
}

impl BitwardenStore {
    fn spec(&self, args: &[&str]) -> CommandSpec {
        let mut spec = CommandSpec::new("bw", args.iter().copied());
        if let Some(session) = &self.session {
            spec = spec.with_env("BW_SESSION", session.clone());
        }
        spec
    }

    /// Check (and cache) that the vault is unlocked.
    async fn ensure_ready(&self, ctx: &OpContext) -> Result<()> {
        if *self.state.read() == SessionState::Ready {
            return Ok(());
        }

        let output = self
            .executor
            .run(ctx, &self.spec(&["status", "--raw"]))
            .await?;
        let status = serde_json::from_str::<Value>(output.stdout.trim())
            .ok()
            .and_then(|v| v["status"].as_str().map(String::from))
            .unwrap_or_default();

        let (state, err) = match status.as_str() {
            "unlocked" => (SessionState::Ready, None),
            "locked" => (
                SessionState::Locked,
                Some(
                    UmbraError::auth(&self.name, "vault is locked")
                        .with_suggestion("run `bw unlock` and export BW_SESSION"),
                ),
            ),
            "unauthenticated" => (
                SessionState::LoggedOut,
                Some(
                    UmbraError::auth(&self.name, "not logged in")
                        .with_suggestion("run `bw login`"),
                ),
            ),
            other => (
                SessionState::Unknown,
                Some(UmbraError::provider(
                    self.name.clone(),
                    "status",
                    std::io::Error::other(format!("unexpected bw status '{other}'")),
                )),
            ),
        };
        *self.state.write() = state;
        match err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Map a failed `bw` invocation onto the taxonomy and update the cached
    /// session state when the failure is session-shaped.
    fn map_failure(&self, reference: &StoreRef, status: Option<i32>, stderr: &str) -> UmbraError {
        let lower = stderr.to_lowercase();
        if lower.contains("not logged in") {
            *self.state.write() = SessionState::LoggedOut;
            return UmbraError::auth(&self.name, "not logged in").with_suggestion("run `bw login`");
        }
        if lower.contains("vault is locked") || lower.contains("session expired") {
            *self.state.write() = SessionState::Locked;
            return UmbraError::auth(&self.name, "vault is locked")
                .with_suggestion("run `bw unlock` and export BW_SESSION");
        }
        if lower.contains("not found") {
            return UmbraError::not_found(&self.name, &reference.path);
        }
        UmbraError::command("bw", status, stderr.trim().to_string())
    }

    /// Select a field from the item JSON the CLI returns.
    ///
    /// Lookup order: top-level attribute, `login.<field>`, then the custom
    /// fields array.
    fn item_field(&self, reference: &StoreRef, item: &Value, field: &str) -> Result<String> {
        if let Some(value) = item.get(field).and_then(Value::as_str) {
            return Ok(value.to_string());
        }
        if let Some(value) = item["login"].get(field).and_then(Value::as_str) {
            return Ok(value.to_string());
        }
        if let Some(fields) = item["fields"].as_array() {
            for entry in fields {
                if entry["name"].as_str() == Some(field) {
                    if let Some(value) = entry["value"].as_str() {
                        return Ok(value.to_string());
                    }
                }
            }
        }

        let mut available: Vec<String> = item["login"]
            .as_object()
            .map(|login| login.keys().cloned().collect())
            .unwrap_or_default();
        if let Some(fields) = item["fields"].as_array() {
            available.extend(
                fields
                    .iter()
                    .filter_map(|f| f["name"].as_str().map(String::from)),
            );
        }
        available.sort_unstable();
        Err(UmbraError::validation_field(
            &self.name,
            field,
            format!(
                "field '{field}' not found in item '{}'; available fields: {}",
                reference.path,
                if available.is_empty() {
                    "(none)".to_string()
                } else {
                    available.join(", ")
                }
            ),
        ))
    }
}

#[async_trait]
impl SecretStore for BitwardenStore {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(skip(self, ctx), fields(store = %self.name, path = %reference.path))]
    async fn resolve(&self, ctx: &OpContext, reference: &StoreRef) -> Result<Secret> {
        if reference.path.is_empty() {
            return Err(UmbraError::validation("empty key for bitwarden store"));
        }
        self.ensure_ready(ctx).await?;

        match reference.field.as_deref() {
            None | Some("password") => {
                let output = self
                    .executor
                    .run(ctx, &self.spec(&["get", "password", &reference.path]))
                    .await?;
                if !output.success() {
                    return Err(self.map_failure(reference, output.status, &output.stderr));
                }
                Ok(Secret::new(output.stdout.trim_end_matches('\n').to_string()))
            }
            Some(field) => {
                let output = self
                    .executor
                    .run(ctx, &self.spec(&["get", "item", &reference.path]))
                    .await?;
                if !output.success() {
                    return Err(self.map_failure(reference, output.status, &output.stderr));
                }
                let item: Value = serde_json::from_str(output.stdout.trim()).map_err(|e| {
                    UmbraError::provider(self.name.clone(), "resolve", e)
                })?;
                Ok(Secret::new(self.item_field(reference, &item, field)?))
            }
        }
    }

    async fn describe(&self, ctx: &OpContext, reference: &StoreRef) -> Result<SecretMetadata> {
        self.ensure_ready(ctx).await?;
        let output = self
            .executor
            .run(ctx, &self.spec(&["get", "item", &reference.path]))
            .await?;
        if !output.success() {
            if output.stderr.to_lowercase().contains("not found") {
                return Ok(SecretMetadata::absent());
            }
            return Err(self.map_failure(reference, output.status, &output.stderr));
        }
        let item: Value = serde_json::from_str(output.stdout.trim())
            .map_err(|e| UmbraError::provider(self.name.clone(), "describe", e))?;
        let mut meta = SecretMetadata::present();
        meta.updated_at = item["revisionDate"]
            .as_str()
            .and_then(|d| d.parse().ok());
        Ok(meta)
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::none()
            .with_metadata()
            .with_auth(["password", "api-key", "sso"])
    }

    async fn validate(&self, ctx: &OpContext) -> Result<()> {
        self.ensure_ready(ctx).await
    }
}

/// Factory for the `bitwarden` type.
pub struct BitwardenFactory {
    executor: Arc<dyn CommandExecutor>,
}

impl Default for BitwardenFactory {
    fn default() -> Self {
        Self {
            executor: Arc::new(SystemExecutor::new()),
        }
    }
}

impl BitwardenFactory {
    /// Use a custom executor (tests script CLI responses through this).
    pub fn with_executor(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl StoreFactory for BitwardenFactory {
    fn type_name(&self) -> &'static str {
        "bitwarden"
    }

    async fn create(
        &self,
        name: &str,
        config: &serde_json::Value,
    ) -> Result<Arc<dyn SecretStore>> {
        let parsed: BitwardenConfig = serde_json::from_value(config.clone()).map_err(|e| {
            UmbraError::config(
                format!("secret_stores.{name}.config"),
                format!("invalid bitwarden store config: {e}"),
            )
        })?;
        Ok(Arc::new(BitwardenStore {
            name: name.to_string(),
            session: parsed.session.or_else(|| std::env::var("BW_SESSION").ok()),
            executor: Arc::clone(&self.executor),
            state: RwLock::new(SessionState::Unknown),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::ScriptedExecutor;
    use umbra_error::ErrorKind;

    async fn store_with(executor: Arc<ScriptedExecutor>) -> Arc<dyn SecretStore> {
        BitwardenFactory::with_executor(executor)
            .create("bw", &serde_json::json!({}))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn resolves_password_once_unlocked() {
        let exec = Arc::new(ScriptedExecutor::new());
        exec.respond_stdout(r#"{"status":"unlocked"}"#)
            .respond_stdout("hunter2\n");
        let store = store_with(Arc::clone(&exec)).await;

        let secret = store
            .resolve(&OpContext::new(), &StoreRef::new("bw", "github"))
            .await
            .unwrap();
        secret.value.expose(|s| assert_eq!(s, "hunter2"));

        let calls = exec.calls();
        assert_eq!(calls[0].args, vec!["status", "--raw"]);
        assert_eq!(calls[1].args, vec!["get", "password", "github"]);
    }

    #[tokio::test]
    async fn status_caches_so_second_resolve_skips_the_probe() {
        let exec = Arc::new(ScriptedExecutor::new());
        exec.respond_stdout(r#"{"status":"unlocked"}"#)
            .respond_stdout("a")
            .respond_stdout("b");
        let store = store_with(Arc::clone(&exec)).await;

        store
            .resolve(&OpContext::new(), &StoreRef::new("bw", "one"))
            .await
            .unwrap();
        store
            .resolve(&OpContext::new(), &StoreRef::new("bw", "two"))
            .await
            .unwrap();
        // One status probe + two gets.
        assert_eq!(exec.calls().len(), 3);
    }

    #[tokio::test]
    async fn locked_vault_is_auth_with_unlock_hint() {
        let exec = Arc::new(ScriptedExecutor::new());
        exec.respond_stdout(r#"{"status":"locked"}"#);
        let store = store_with(exec).await;

        let err = store
            .resolve(&OpContext::new(), &StoreRef::new("bw", "github"))
            .await
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Auth { .. }));
        assert!(err.render().contains("bw unlock"));
    }

    #[tokio::test]
    async fn logged_out_is_auth_with_login_hint() {
        let exec = Arc::new(ScriptedExecutor::new());
        exec.respond_stdout(r#"{"status":"unauthenticated"}"#);
        let store = store_with(exec).await;

        let err = store.validate(&OpContext::new()).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Auth { .. }));
        assert!(err.render().contains("bw login"));
    }

    #[tokio::test]
    async fn missing_item_is_not_found() {
        let exec = Arc::new(ScriptedExecutor::new());
        exec.respond_stdout(r#"{"status":"unlocked"}"#)
            .respond_failure(1, "Not found.");
        let store = store_with(exec).await;

        let err = store
            .resolve(&OpContext::new(), &StoreRef::new("bw", "ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::NotFound { .. }));
    }

    #[tokio::test]
    async fn field_lookup_walks_login_and_custom_fields() {
        let exec = Arc::new(ScriptedExecutor::new());
        let item = r#"{"login":{"username":"u","password":"p"},"fields":[{"name":"api_key","value":"k"}]}"#;
        exec.respond_stdout(r#"{"status":"unlocked"}"#)
            .respond_stdout(item)
            .respond_stdout(item);
        let store = store_with(exec).await;

        let username = store
            .resolve(
                &OpContext::new(),
                &StoreRef::new("bw", "github").with_field("username"),
            )
            .await
            .unwrap();
        username.value.expose(|s| assert_eq!(s, "u"));

        let api_key = store
            .resolve(
                &OpContext::new(),
                &StoreRef::new("bw", "github").with_field("api_key"),
            )
            .await
            .unwrap();
        api_key.value.expose(|s| assert_eq!(s, "k"));
    }
}
