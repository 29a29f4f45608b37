//! Environment resolution: single references, sequential and concurrent.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use umbra_core::{EnvSpec, Secret, SecretString, StoreRef, VarSpec};
use umbra_error::{ErrorKind, Result, UmbraError};
use umbra_store::{OpContext, StoreRegistry};

/// Default bound on in-flight store calls during fan-out.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Resolves references against the store registry.
///
/// Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct Resolver {
    registry: Arc<StoreRegistry>,
    concurrency: usize,
}

impl Resolver {
    /// A resolver over `registry` with the default concurrency bound.
    pub fn new(registry: Arc<StoreRegistry>) -> Self {
        Self {
            registry,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Return a copy with a different concurrency bound (minimum 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Resolve a single reference.
    #[tracing::instrument(skip(self, ctx), fields(store = %reference.store, path = %reference.path))]
    pub async fn resolve(&self, ctx: &OpContext, reference: &StoreRef) -> Result<Secret> {
        let store = self.registry.get(&reference.store).ok_or_else(|| {
            UmbraError::config(
                "secret_stores",
                format!("no secret store named '{}' is configured", reference.store),
            )
            .with_suggestion(format!(
                "configured stores: {}",
                self.registry.list().join(", ")
            ))
        })?;
        store.resolve(ctx, reference).await
    }

    async fn resolve_var(&self, ctx: &OpContext, spec: &VarSpec) -> Result<SecretString> {
        match spec {
            VarSpec::Value { value } => Ok(SecretString::new(value.clone())),
            VarSpec::From { from } => Ok(self.resolve(ctx, from).await?.value),
            VarSpec::ValueFrom { value_from } => {
                if value_from.is_empty() {
                    return Err(UmbraError::validation("empty value-from chain"));
                }
                // First reference that resolves wins; only a missing secret
                // falls through to the next entry.
                let mut last_miss = None;
                for reference in value_from {
                    match self.resolve(ctx, reference).await {
                        Ok(secret) => return Ok(secret.value),
                        Err(err) if matches!(err.kind(), ErrorKind::NotFound { .. }) => {
                            last_miss = Some(err);
                        }
                        Err(err) => return Err(err),
                    }
                }
                Err(last_miss.unwrap_or_else(|| {
                    UmbraError::validation("empty value-from chain")
                }))
            }
        }
    }

    /// Sequential reference implementation of environment resolution.
    ///
    /// Semantically equivalent to [`resolve_concurrently`](Self::resolve_concurrently);
    /// kept for tests and for callers that want strict ordering of backend
    /// traffic.
    pub async fn resolve_environment(
        &self,
        ctx: &OpContext,
        env: &EnvSpec,
    ) -> Result<BTreeMap<String, SecretString>> {
        let mut resolved = BTreeMap::new();
        for (name, spec) in env {
            ctx.ensure_live("resolve environment")?;
            let value = self.resolve_var(ctx, spec).await?;
            resolved.insert(name.clone(), value);
        }
        Ok(resolved)
    }

    /// Resolve every variable in parallel with bounded concurrency.
    ///
    /// All-or-nothing: on success the output has exactly the input's keys;
    /// on failure the first error (by delivery time) is returned, the
    /// remaining in-flight resolutions are cancelled, and no partial mapping
    /// escapes. No ordering is promised between distinct variables.
    #[tracing::instrument(skip_all, fields(variables = env.len()))]
    pub async fn resolve_concurrently(
        &self,
        ctx: &OpContext,
        env: &EnvSpec,
    ) -> Result<BTreeMap<String, SecretString>> {
        ctx.ensure_live("resolve environment")?;

        let child = ctx.child();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut join_set: JoinSet<(String, Result<SecretString>)> = JoinSet::new();

        for (name, spec) in env {
            let resolver = self.clone();
            let task_ctx = child.clone();
            let semaphore = Arc::clone(&semaphore);
            let name = name.clone();
            let spec = spec.clone();
            join_set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (name, Err(UmbraError::cancelled("resolve variable")));
                };
                if task_ctx.is_cancelled() {
                    return (name, Err(UmbraError::cancelled("resolve variable")));
                }
                let result = resolver.resolve_var(&task_ctx, &spec).await;
                (name, result)
            });
        }

        let mut resolved = BTreeMap::new();
        let mut first_error: Option<UmbraError> = None;

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((name, Ok(value))) => {
                    resolved.insert(name, value);
                }
                Ok((name, Err(err))) => {
                    if first_error.is_none() {
                        tracing::debug!(variable = %name, "first resolution failure, cancelling peers");
                        child.cancel();
                        first_error = Some(err);
                    }
                }
                Err(join_err) => {
                    if first_error.is_none() {
                        child.cancel();
                        first_error = Some(UmbraError::provider(
                            "resolver",
                            "resolve",
                            join_err,
                        ));
                    }
                }
            }
        }

        match first_error {
            // Partial results never escape; the whole environment failed.
            Some(err) => Err(err),
            None => {
                debug_assert_eq!(resolved.len(), env.len());
                Ok(resolved)
            }
        }
    }
}
