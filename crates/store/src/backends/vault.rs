//! HashiCorp Vault backend.
//!
//! Speaks the raw KV HTTP API: `GET {address}/v1/{path}` with the
//! `X-Vault-Token` header always set from the current token and an optional
//! namespace header. Both KV flavours work — v2 responses (`data.data` +
//! `data.metadata`) are unwrapped, anything else is treated as v1.
//!
//! Authentication is a small state machine owned by the store: a cached
//! token is verified with a cheap `lookup-self` call at most once per probe
//! window; a failed probe clears the token and re-authenticates with the
//! configured method (token, userpass, LDAP, AWS, Kubernetes). Login is
//! serialized by a single-writer gate so one expired token does not stampede
//! the backend; readers share the cached token.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::Instant;
use umbra_core::{
    Secret, SecretMetadata, SecretString, StoreCapabilities, StoreRef, redacted,
};
use umbra_error::{Result, UmbraError};

use crate::context::OpContext;
use crate::contract::{SecretStore, StoreFactory};
use crate::extract::extract_field;
use crate::metrics::StoreMetrics;

/// How long a verified token is trusted before the next `lookup-self` probe.
const TOKEN_PROBE_INTERVAL: Duration = Duration::from_secs(60);

/// Well-known in-pod service account token path for Kubernetes auth.
const K8S_DEFAULT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Vault connection and authentication configuration.
///
/// Every field has a same-named `VAULT_*` environment override; see
/// [`VaultConfig::apply_env_overrides`].
#[derive(Debug, Clone, Deserialize)]
pub struct VaultConfig {
    /// Server address, e.g. `https://vault.example.com:8200`.
    #[serde(default)]
    pub address: String,
    /// Static token for the `token` auth method.
    #[serde(default)]
    pub token: Option<String>,
    /// Vault Enterprise namespace.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Authentication method; defaults to `token`.
    #[serde(default)]
    pub auth: VaultAuthMethod,
    /// Request timeout.
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
    /// Path to a CA certificate bundle (PEM).
    #[serde(default)]
    pub ca_cert: Option<String>,
    /// Path to a client certificate (PEM).
    #[serde(default)]
    pub client_cert: Option<String>,
    /// Path to the client certificate's key (PEM).
    #[serde(default)]
    pub client_key: Option<String>,
    /// Skip TLS verification. Development only.
    #[serde(default)]
    pub skip_verify: bool,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            token: None,
            namespace: None,
            auth: VaultAuthMethod::default(),
            timeout: default_timeout(),
            ca_cert: None,
            client_cert: None,
            client_key: None,
            skip_verify: false,
        }
    }
}

/// Supported authentication methods.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum VaultAuthMethod {
    /// Static token from config or `VAULT_TOKEN`.
    #[default]
    Token,
    /// Username/password login. Password may come from
    /// `VAULT_USERPASS_PASSWORD`.
    Userpass {
        /// Login username.
        username: String,
        /// Login password; falls back to `VAULT_USERPASS_PASSWORD`.
        #[serde(default)]
        password: Option<String>,
    },
    /// LDAP login. Password may come from `VAULT_LDAP_PASSWORD`.
    Ldap {
        /// LDAP username.
        username: String,
        /// LDAP password; falls back to `VAULT_LDAP_PASSWORD`.
        #[serde(default)]
        password: Option<String>,
    },
    /// AWS auth method with a signed instance identity document.
    Aws {
        /// Vault role to log into.
        role: String,
        /// PKCS#7-signed identity document.
        #[serde(default)]
        pkcs7: Option<String>,
    },
    /// Kubernetes service-account auth.
    Kubernetes {
        /// Vault role to log into.
        role: String,
        /// Override for the in-pod token path; falls back to
        /// `VAULT_K8S_TOKEN_PATH`, then the well-known default.
        #[serde(default)]
        token_path: Option<String>,
    },
}

impl VaultAuthMethod {
    fn name(&self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::Userpass { .. } => "userpass",
            Self::Ldap { .. } => "ldap",
            Self::Aws { .. } => "aws",
            Self::Kubernetes { .. } => "kubernetes",
        }
    }
}

impl VaultConfig {
    /// Overlay the closed set of `VAULT_*` environment variables onto the
    /// configured values. Environment wins over the config file, matching
    /// the Vault CLI's own behaviour.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("VAULT_ADDR") {
            self.address = addr;
        }
        if let Ok(token) = std::env::var("VAULT_TOKEN") {
            self.token = Some(token);
        }
        if let Ok(namespace) = std::env::var("VAULT_NAMESPACE") {
            self.namespace = Some(namespace);
        }
        if let Ok(ca_cert) = std::env::var("VAULT_CACERT") {
            self.ca_cert = Some(ca_cert);
        }
        if let Ok(cert) = std::env::var("VAULT_CLIENT_CERT") {
            self.client_cert = Some(cert);
        }
        if let Ok(key) = std::env::var("VAULT_CLIENT_KEY") {
            self.client_key = Some(key);
        }
        if let Ok(skip) = std::env::var("VAULT_SKIP_VERIFY") {
            self.skip_verify = matches!(skip.as_str(), "1" | "true" | "yes");
        }
    }

    fn validate(&self, store: &str) -> Result<()> {
        if self.address.is_empty() {
            return Err(UmbraError::config(
                format!("secret_stores.{store}.config.address"),
                "vault address is not set",
            )
            .with_suggestion("set `address` in the store config or export VAULT_ADDR"));
        }
        if !self.address.starts_with("http://") && !self.address.starts_with("https://") {
            return Err(UmbraError::config(
                format!("secret_stores.{store}.config.address"),
                format!("vault address must start with http:// or https://, got '{}'", self.address),
            ));
        }
        Ok(())
    }
}

/// Token lifecycle states.
enum AuthState {
    Unauthenticated,
    Authenticating,
    Authenticated {
        token: SecretString,
        /// `None` until the first successful `lookup-self` probe.
        verified_at: Option<Instant>,
    },
    Expired,
}

/// Store backed by a HashiCorp Vault server.
pub struct VaultStore {
    name: String,
    config: VaultConfig,
    client: reqwest::Client,
    state: RwLock<AuthState>,
    /// Single-writer gate: only one task runs the login/probe path at a time.
    login_gate: tokio::sync::Mutex<()>,
    metrics: StoreMetrics,
}

impl VaultStore {
    /// Build a store from validated configuration.
    pub async fn new(name: impl Into<String>, mut config: VaultConfig) -> Result<Self> {
        let name = name.into();
        config.apply_env_overrides();
        config.validate(&name)?;

        let mut builder = reqwest::Client::builder().timeout(config.timeout);
        if config.skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(ca_path) = &config.ca_cert {
            let pem = tokio::fs::read(ca_path).await.map_err(|e| {
                UmbraError::config(
                    format!("secret_stores.{name}.config.ca_cert"),
                    format!("cannot read CA certificate '{ca_path}': {e}"),
                )
            })?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                UmbraError::config(
                    format!("secret_stores.{name}.config.ca_cert"),
                    format!("invalid CA certificate '{ca_path}': {e}"),
                )
            })?;
            builder = builder.add_root_certificate(cert);
        }
        if let (Some(cert_path), Some(key_path)) = (&config.client_cert, &config.client_key) {
            let mut pem = tokio::fs::read(cert_path).await.map_err(|e| {
                UmbraError::config(
                    format!("secret_stores.{name}.config.client_cert"),
                    format!("cannot read client certificate '{cert_path}': {e}"),
                )
            })?;
            let key = tokio::fs::read(key_path).await.map_err(|e| {
                UmbraError::config(
                    format!("secret_stores.{name}.config.client_key"),
                    format!("cannot read client key '{key_path}': {e}"),
                )
            })?;
            pem.extend_from_slice(&key);
            let identity = reqwest::Identity::from_pem(&pem).map_err(|e| {
                UmbraError::config(
                    format!("secret_stores.{name}.config.client_cert"),
                    format!("invalid client certificate/key pair: {e}"),
                )
            })?;
            builder = builder.identity(identity);
        }
        let client = builder
            .build()
            .map_err(|e| UmbraError::provider(name.clone(), "init", e))?;

        // A configured token starts out cached but unverified, so the first
        // operation probes lookup-self before trusting it.
        let state = match &config.token {
            Some(token) => AuthState::Authenticated {
                token: SecretString::new(token.clone()),
                verified_at: None,
            },
            None => AuthState::Unauthenticated,
        };

        Ok(Self {
            name,
            config,
            client,
            state: RwLock::new(state),
            login_gate: tokio::sync::Mutex::new(()),
            metrics: StoreMetrics::new(),
        })
    }

    /// Operation metrics, including the re-authentication counter.
    pub fn metrics(&self) -> &StoreMetrics {
        &self.metrics
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.config.address.trim_end_matches('/'), path)
    }

    fn with_headers(
        &self,
        request: reqwest::RequestBuilder,
        token: Option<&SecretString>,
    ) -> reqwest::RequestBuilder {
        let mut request = match token {
            Some(token) => token.expose(|t| request.header("X-Vault-Token", t)),
            None => request,
        };
        if let Some(namespace) = &self.config.namespace {
            request = request.header("X-Vault-Namespace", namespace);
        }
        request
    }

    /// A token that passed `lookup-self` within the probe window.
    ///
    /// Fast path: shared read of the cached token. Slow path: one task at a
    /// time probes and, when needed, re-authenticates; the rest queue on the
    /// gate and reuse the fresh token.
    async fn authenticated_token(&self, ctx: &OpContext) -> Result<SecretString> {
        if let AuthState::Authenticated {
            token,
            verified_at: Some(at),
        } = &*self.state.read()
        {
            if at.elapsed() < TOKEN_PROBE_INTERVAL {
                return Ok(token.clone());
            }
        }

        let _gate = self.login_gate.lock().await;

        // Someone else may have refreshed while we queued.
        let cached = match &*self.state.read() {
            AuthState::Authenticated { token, verified_at } => {
                if verified_at.is_some_and(|at| at.elapsed() < TOKEN_PROBE_INTERVAL) {
                    return Ok(token.clone());
                }
                Some(token.clone())
            }
            _ => None,
        };

        if let Some(token) = cached {
            match self.probe_token(ctx, &token).await {
                Ok(()) => {
                    *self.state.write() = AuthState::Authenticated {
                        token: token.clone(),
                        verified_at: Some(Instant::now()),
                    };
                    return Ok(token);
                }
                Err(err) if matches!(err.kind(), umbra_error::ErrorKind::Auth { .. }) => {
                    tracing::debug!(store = %self.name, "cached vault token rejected, re-authenticating");
                    *self.state.write() = AuthState::Expired;
                    self.metrics.record_reauthentication();
                }
                Err(err) => return Err(err),
            }
        }

        *self.state.write() = AuthState::Authenticating;
        match self.login(ctx).await {
            Ok(token) => {
                *self.state.write() = AuthState::Authenticated {
                    token: token.clone(),
                    verified_at: Some(Instant::now()),
                };
                tracing::debug!(store = %self.name, method = self.config.auth.name(), "vault login succeeded");
                Ok(token)
            }
            Err(err) => {
                *self.state.write() = AuthState::Unauthenticated;
                Err(err)
            }
        }
    }

    /// Cheap token liveness check.
    async fn probe_token(&self, ctx: &OpContext, token: &SecretString) -> Result<()> {
        let request = self.with_headers(
            self.client.get(self.url("auth/token/lookup-self")),
            Some(token),
        );
        let status = ctx
            .run("vault lookup-self", async {
                request
                    .send()
                    .await
                    .map_err(|e| UmbraError::provider(self.name.clone(), "lookup-self", e))
            })
            .await?
            .status();
        if status.is_success() {
            Ok(())
        } else if status == 401 || status == 403 {
            Err(UmbraError::auth(
                &self.name,
                format!("token lookup-self returned status {status}"),
            ))
        } else {
            Err(UmbraError::provider(
                self.name.clone(),
                "lookup-self",
                std::io::Error::other(format!("status {status}")),
            )
            .with_retryable(status.is_server_error()))
        }
    }

    /// Authenticate with the configured method and return a fresh token.
    async fn login(&self, ctx: &OpContext) -> Result<SecretString> {
        match &self.config.auth {
            VaultAuthMethod::Token => {
                let token = self.config.token.clone().ok_or_else(|| {
                    UmbraError::config(
                        format!("secret_stores.{}.config.token", self.name),
                        "token auth selected but no token configured",
                    )
                    .with_suggestion("set `token` in the store config or export VAULT_TOKEN")
                })?;
                let token = SecretString::new(token);
                self.probe_token(ctx, &token).await?;
                Ok(token)
            }
            VaultAuthMethod::Userpass { username, password } => {
                let password = secret_from(password.clone(), "VAULT_USERPASS_PASSWORD")
                    .ok_or_else(|| {
                        UmbraError::config(
                            format!("secret_stores.{}.config.auth.password", self.name),
                            "userpass auth selected but no password available",
                        )
                        .with_suggestion("set `password` or export VAULT_USERPASS_PASSWORD")
                    })?;
                self.login_request(
                    ctx,
                    &format!("auth/userpass/login/{username}"),
                    password.expose(|p| json!({ "password": p })),
                )
                .await
            }
            VaultAuthMethod::Ldap { username, password } => {
                let password =
                    secret_from(password.clone(), "VAULT_LDAP_PASSWORD").ok_or_else(|| {
                        UmbraError::config(
                            format!("secret_stores.{}.config.auth.password", self.name),
                            "ldap auth selected but no password available",
                        )
                        .with_suggestion("set `password` or export VAULT_LDAP_PASSWORD")
                    })?;
                self.login_request(
                    ctx,
                    &format!("auth/ldap/login/{username}"),
                    password.expose(|p| json!({ "password": p })),
                )
                .await
            }
            VaultAuthMethod::Aws { role, pkcs7 } => {
                let pkcs7 = pkcs7.clone().ok_or_else(|| {
                    UmbraError::config(
                        format!("secret_stores.{}.config.auth.pkcs7", self.name),
                        "aws auth requires the signed instance identity document",
                    )
                    .with_suggestion(
                        "supply `pkcs7` from the instance metadata service",
                    )
                })?;
                self.login_request(ctx, "auth/aws/login", json!({ "role": role, "pkcs7": pkcs7 }))
                    .await
            }
            VaultAuthMethod::Kubernetes { role, token_path } => {
                let path = token_path
                    .clone()
                    .or_else(|| std::env::var("VAULT_K8S_TOKEN_PATH").ok())
                    .unwrap_or_else(|| K8S_DEFAULT_TOKEN_PATH.to_string());
                let jwt = tokio::fs::read_to_string(&path).await.map_err(|e| {
                    UmbraError::config(
                        format!("secret_stores.{}.config.auth.token_path", self.name),
                        format!("cannot read service account token '{path}': {e}"),
                    )
                })?;
                self.login_request(
                    ctx,
                    "auth/kubernetes/login",
                    json!({ "role": role, "jwt": jwt.trim() }),
                )
                .await
            }
        }
    }

    async fn login_request(
        &self,
        ctx: &OpContext,
        path: &str,
        body: Value,
    ) -> Result<SecretString> {
        let request = self.with_headers(self.client.post(self.url(path)), None).json(&body);
        let response = ctx
            .run("vault login", async {
                request
                    .send()
                    .await
                    .map_err(|e| UmbraError::provider(self.name.clone(), "login", e))
            })
            .await?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            let errors = body["errors"]
                .as_array()
                .map(|list| {
                    list.iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .join("; ")
                })
                .unwrap_or_default();
            return Err(UmbraError::auth(
                &self.name,
                format!(
                    "{} login returned status {status}: {errors}",
                    self.config.auth.name()
                ),
            ));
        }

        body["auth"]["client_token"]
            .as_str()
            .map(SecretString::new)
            .ok_or_else(|| {
                UmbraError::provider(
                    self.name.clone(),
                    "login",
                    std::io::Error::other("login response carried no client_token"),
                )
            })
    }

    /// Map a non-success data-path response onto the taxonomy.
    fn data_error(&self, operation: &str, path: &str, status: reqwest::StatusCode, body: &str) -> UmbraError {
        if status == 404 {
            UmbraError::not_found(&self.name, path)
        } else if status == 401 || status == 403 {
            UmbraError::auth(&self.name, format!("{operation} returned status {status}"))
        } else {
            UmbraError::provider(
                self.name.clone(),
                operation.to_string(),
                std::io::Error::other(format!("status {status}: {}", redacted(body))),
            )
            .with_retryable(status.is_server_error())
        }
    }

    fn check_reference(&self, reference: &StoreRef) -> Result<()> {
        if reference.path.is_empty() {
            return Err(UmbraError::validation("empty key for vault store"));
        }
        if reference.path.contains('#') {
            return Err(UmbraError::validation_field(
                &self.name,
                "path",
                format!(
                    "vault reference '{}' contains more than one '#'",
                    reference.path
                ),
            ));
        }
        Ok(())
    }

    /// Fetch the raw `data` envelope for a path, unwrapping KV v2.
    async fn fetch(
        &self,
        ctx: &OpContext,
        operation: &str,
        reference: &StoreRef,
    ) -> Result<Option<(Value, Option<String>, Option<String>)>> {
        let token = self.authenticated_token(ctx).await?;
        let mut request = self.with_headers(
            self.client.get(self.url(&reference.path)),
            Some(&token),
        );
        if let Some(version) = &reference.version {
            request = request.query(&[("version", version.as_str())]);
        }

        let response = ctx
            .run("vault fetch", async {
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
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.data_error(operation, &reference.path, status, &body));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| UmbraError::provider(self.name.clone(), operation.to_string(), e))?;

        // KV v2 wraps the payload one level deeper and adds metadata.
        let (payload, version, created) = match (&body["data"]["data"], &body["data"]["metadata"]) {
            (payload @ Value::Object(_), metadata @ Value::Object(_)) => (
                payload.clone(),
                metadata["version"].as_u64().map(|v| v.to_string()),
                metadata["created_time"].as_str().map(String::from),
            ),
            _ => (body["data"].clone(), None, None),
        };

        if payload.is_null() {
            return Err(UmbraError::provider(
                self.name.clone(),
                operation.to_string(),
                std::io::Error::other("response carried no data envelope"),
            ));
        }
        Ok(Some((payload, version, created)))
    }
}

#[async_trait]
impl SecretStore for VaultStore {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(skip(self, ctx), fields(store = %self.name, path = %reference.path))]
    async fn resolve(&self, ctx: &OpContext, reference: &StoreRef) -> Result<Secret> {
        let start = std::time::Instant::now();
        self.check_reference(reference)?;

        let result = self.fetch(ctx, "resolve", reference).await;
        let ok = result.is_ok();
        self.metrics.record_operation("resolve", start.elapsed(), ok);

        let (payload, version, created) = result?
            .ok_or_else(|| UmbraError::not_found(&self.name, &reference.path))?;

        let raw = serde_json::to_string(&payload)
            .map_err(|e| UmbraError::provider(self.name.clone(), "resolve", e))?;
        let value = extract_field(&self.name, &reference.path, &raw, reference.field.as_deref())?;

        let mut secret = Secret::new(value);
        if let Some(version) = version {
            secret = secret.with_version(version);
        }
        if let Some(created) = created {
            if let Ok(at) = created.parse() {
                secret = secret.with_updated_at(at);
            }
        }
        Ok(secret)
    }

    #[tracing::instrument(skip(self, ctx), fields(store = %self.name, path = %reference.path))]
    async fn describe(&self, ctx: &OpContext, reference: &StoreRef) -> Result<SecretMetadata> {
        let start = std::time::Instant::now();
        self.check_reference(reference)?;

        let result = self.fetch(ctx, "describe", reference).await;
        self.metrics
            .record_operation("describe", start.elapsed(), result.is_ok());

        Ok(match result? {
            Some((payload, version, created)) => {
                let mut meta = SecretMetadata::present();
                meta.version = version;
                meta.updated_at = created.and_then(|c| c.parse().ok());
                meta.size = serde_json::to_string(&payload).ok().map(|s| s.len() as u64);
                meta
            }
            None => SecretMetadata::absent(),
        })
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::none()
            .with_versioning()
            .with_metadata()
            .with_auth(["token", "userpass", "ldap", "aws", "kubernetes"])
    }

    #[tracing::instrument(skip(self, ctx), fields(store = %self.name))]
    async fn validate(&self, ctx: &OpContext) -> Result<()> {
        let start = std::time::Instant::now();
        let result = self.authenticated_token(ctx).await.map(|_| ());
        self.metrics
            .record_operation("validate", start.elapsed(), result.is_ok());
        result
    }
}

/// Prefer an explicit config value, fall back to an environment variable.
fn secret_from(configured: Option<String>, env_var: &str) -> Option<SecretString> {
    configured
        .or_else(|| std::env::var(env_var).ok())
        .map(SecretString::new)
}

/// Factory for the `vault` type.
pub struct VaultFactory;

#[async_trait]
impl StoreFactory for VaultFactory {
    fn type_name(&self) -> &'static str {
        "vault"
    }

    async fn create(
        &self,
        name: &str,
        config: &serde_json::Value,
    ) -> Result<Arc<dyn SecretStore>> {
        let parsed: VaultConfig = serde_json::from_value(config.clone()).map_err(|e| {
            UmbraError::config(
                format!("secret_stores.{name}.config"),
                format!("invalid vault store config: {e}"),
            )
        })?;
        Ok(Arc::new(VaultStore::new(name, parsed).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_rejects_missing_address() {
        let config = VaultConfig::default();
        let err = config.validate("v").unwrap_err();
        assert!(matches!(err.kind(), umbra_error::ErrorKind::Config { .. }));
        assert!(err.render().contains("VAULT_ADDR"));
    }

    #[test]
    fn config_rejects_schemeless_address() {
        let config = VaultConfig {
            address: "vault.example.com:8200".into(),
            ..VaultConfig::default()
        };
        assert!(config.validate("v").is_err());
    }

    #[tokio::test]
    async fn reference_with_hash_in_path_is_rejected() {
        let store = VaultStore::new(
            "v",
            VaultConfig {
                address: "http://127.0.0.1:1".into(),
                token: Some("t".into()),
                ..VaultConfig::default()
            },
        )
        .await
        .unwrap();
        let mut reference = StoreRef::new("v", "secret/app");
        reference.path = "secret/app#a#b".into();
        let err = store.resolve(&OpContext::new(), &reference).await.unwrap_err();
        assert!(matches!(err.kind(), umbra_error::ErrorKind::Validation { .. }));
    }

    #[test]
    fn auth_method_names_are_stable() {
        assert_eq!(VaultAuthMethod::Token.name(), "token");
        assert_eq!(
            VaultAuthMethod::Kubernetes {
                role: "r".into(),
                token_path: None
            }
            .name(),
            "kubernetes"
        );
    }
}
