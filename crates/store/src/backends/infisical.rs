//! Infisical backend over its HTTP API.
//!
//! Authenticates with either a static service token or the universal-auth
//! client credential flow; a cached access token is shared by readers and
//! refreshed by a single writer when the backend rejects it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{Value, json};
use umbra_core::{Secret, SecretMetadata, SecretString, StoreCapabilities, StoreRef, redacted};
use umbra_error::{Result, UmbraError};

use crate::context::OpContext;
use crate::contract::{SecretStore, StoreFactory};

fn default_address() -> String {
    "https://app.infisical.com".to_string()
}

fn default_environment() -> String {
    "prod".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Infisical connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct InfisicalConfig {
    /// API address; defaults to the hosted service.
    #[serde(default = "default_address")]
    pub address: String,
    /// Static service token. When set, universal auth is skipped.
    #[serde(default)]
    pub token: Option<String>,
    /// Universal-auth client id.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Universal-auth client secret.
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Project (workspace) id secrets are read from.
    pub project_id: String,
    /// Environment slug within the project.
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Request timeout.
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
}

/// Store backed by an Infisical deployment.
#[derive(Debug)]
pub struct InfisicalStore {
    name: String,
    config: InfisicalConfig,
    client: reqwest::Client,
    token: RwLock<Option<SecretString>>,
    login_gate: tokio::sync::Mutex<()>,
}

impl InfisicalStore {
    /// Build a store from validated configuration.
    pub fn new(name: impl Into<String>, config: InfisicalConfig) -> Result<Self> {
        let name = name.into();
        if config.token.is_none() && (config.client_id.is_none() || config.client_secret.is_none())
        {
            return Err(UmbraError::config(
                format!("secret_stores.{name}.config"),
                "infisical needs either `token` or `client_id` + `client_secret`",
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| UmbraError::provider(name.clone(), "init", e))?;
        Ok(Self {
            name,
            config,
            client,
            token: RwLock::new(None),
            login_gate: tokio::sync::Mutex::new(()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.address.trim_end_matches('/'))
    }

    /// Split `folder/sub/NAME` into (`/folder/sub`, `NAME`).
    fn split_path(path: &str) -> (String, &str) {
        match path.rsplit_once('/') {
            Some((folder, name)) => (format!("/{folder}"), name),
            None => ("/".to_string(), path),
        }
    }

    async fn access_token(&self, ctx: &OpContext) -> Result<SecretString> {
        if let Some(token) = &self.config.token {
            return Ok(SecretString::new(token.clone()));
        }
        if let Some(token) = &*self.token.read() {
            return Ok(token.clone());
        }

        let _gate = self.login_gate.lock().await;
        if let Some(token) = &*self.token.read() {
            return Ok(token.clone());
        }

        let (client_id, client_secret) = (
            self.config.client_id.clone().unwrap_or_default(),
            self.config.client_secret.clone().unwrap_or_default(),
        );
        let response = ctx
            .run("infisical login", async {
                self.client
                    .post(self.url("/api/v1/auth/universal-auth/login"))
                    .json(&json!({ "clientId": client_id, "clientSecret": client_secret }))
                    .send()
                    .await
                    .map_err(|e| UmbraError::provider(self.name.clone(), "login", e))
            })
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(UmbraError::auth(
                &self.name,
                format!("universal-auth login returned status {status}"),
            ));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| UmbraError::provider(self.name.clone(), "login", e))?;
        let token = body["accessToken"]
            .as_str()
            .map(SecretString::new)
            .ok_or_else(|| {
                UmbraError::provider(
                    self.name.clone(),
                    "login",
                    std::io::Error::other("login response carried no accessToken"),
                )
            })?;
        *self.token.write() = Some(token.clone());
        tracing::debug!(store = %self.name, "infisical universal-auth login succeeded");
        Ok(token)
    }

    async fn get_secret(
        &self,
        ctx: &OpContext,
        operation: &str,
        reference: &StoreRef,
    ) -> Result<Option<Value>> {
        let token = self.access_token(ctx).await?;
        let (secret_path, secret_name) = Self::split_path(&reference.path);

        let mut query = vec![
            ("workspaceId", self.config.project_id.clone()),
            ("environment", self.config.environment.clone()),
            ("secretPath", secret_path),
        ];
        if let Some(version) = &reference.version {
            query.push(("version", version.clone()));
        }

        let request = token.expose(|t| {
            self.client
                .get(self.url(&format!("/api/v3/secrets/raw/{secret_name}")))
                .bearer_auth(t)
                .query(&query)
        });

        let response = ctx
            .run("infisical fetch", async {
                request
                    .send()
                    .await
                    .map_err(|e| UmbraError::provider(self.name.clone(), operation.to_string(), e))
            })
            .await?;
        let status = response.status();
        if status == 404 {
            return Ok(None);
        }
        if status == 401 || status == 403 {
            // Cached universal-auth tokens expire; drop ours so the next call
            // logs in again, and surface the refusal.
            *self.token.write() = None;
            return Err(UmbraError::auth(
                &self.name,
                format!("{operation} returned status {status}"),
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UmbraError::provider(
                self.name.clone(),
                operation.to_string(),
                std::io::Error::other(format!("status {status}: {}", redacted(body))),
            )
            .with_retryable(status.is_server_error()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| UmbraError::provider(self.name.clone(), operation.to_string(), e))?;
        Ok(Some(body["secret"].clone()))
    }
}

#[async_trait]
impl SecretStore for InfisicalStore {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(skip(self, ctx), fields(store = %self.name, path = %reference.path))]
    async fn resolve(&self, ctx: &OpContext, reference: &StoreRef) -> Result<Secret> {
        if reference.path.is_empty() {
            return Err(UmbraError::validation("empty key for infisical store"));
        }
        let secret = self
            .get_secret(ctx, "resolve", reference)
            .await?
            .ok_or_else(|| UmbraError::not_found(&self.name, &reference.path))?;

        let value = secret["secretValue"].as_str().unwrap_or_default().to_string();
        // Infisical secrets are single values; a field selector means the
        // value itself is a structured document.
        let value = crate::extract::extract_field(
            &self.name,
            &reference.path,
            &value,
            reference.field.as_deref(),
        )?;

        let mut out = Secret::new(value);
        if let Some(version) = secret["version"].as_u64() {
            out = out.with_version(version.to_string());
        }
        Ok(out)
    }

    async fn describe(&self, ctx: &OpContext, reference: &StoreRef) -> Result<SecretMetadata> {
        Ok(match self.get_secret(ctx, "describe", reference).await? {
            Some(secret) => {
                let mut meta = SecretMetadata::present();
                meta.version = secret["version"].as_u64().map(|v| v.to_string());
                meta.updated_at = secret["updatedAt"].as_str().and_then(|d| d.parse().ok());
                meta
            }
            None => SecretMetadata::absent(),
        })
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::none()
            .with_versioning()
            .with_metadata()
            .with_auth(["token", "universal-auth"])
    }

    async fn validate(&self, ctx: &OpContext) -> Result<()> {
        self.access_token(ctx).await.map(|_| ())
    }
}

/// Factory for the `infisical` type.
pub struct InfisicalFactory;

#[async_trait]
impl StoreFactory for InfisicalFactory {
    fn type_name(&self) -> &'static str {
        "infisical"
    }

    async fn create(
        &self,
        name: &str,
        config: &serde_json::Value,
    ) -> Result<Arc<dyn SecretStore>> {
        let parsed: InfisicalConfig = serde_json::from_value(config.clone()).map_err(|e| {
            UmbraError::config(
                format!("secret_stores.{name}.config"),
                format!("invalid infisical store config: {e}"),
            )
            .with_suggestion("`project_id` is required")
        })?;
        Ok(Arc::new(InfisicalStore::new(name, parsed)?))
    }
}
