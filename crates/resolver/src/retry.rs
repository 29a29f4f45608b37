//! Retry policy and the retrying store decorator.
//!
//! The resolver never retries on its own; callers that want retries wrap a
//! store in [`RetryingStore`], which re-dispatches only requests whose
//! failure classifies as transient via `UmbraError::is_retryable`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng as _;
use serde::{Deserialize, Serialize};
use umbra_core::{Secret, SecretMetadata, StoreCapabilities, StoreRef};
use umbra_error::{Result, UmbraError};
use umbra_store::{OpContext, SecretStore};

/// Exponential backoff configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum retry attempts after the initial call (0–10).
    pub max_retries: u32,
    /// Initial delay in milliseconds (10–10 000).
    pub base_delay_ms: u64,
    /// Cap on the exponential growth; must exceed `base_delay_ms`.
    pub max_delay_ms: u64,
    /// Growth factor per attempt (1.0–10.0).
    pub multiplier: f64,
    /// Add ±25% randomness to each delay to avoid thundering herds.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Check the parameter windows.
    pub fn validate(&self) -> Result<()> {
        if self.max_retries > 10 {
            return Err(UmbraError::config(
                "retry.max_retries",
                format!("must be <= 10, got {}", self.max_retries),
            ));
        }
        if !(10..=10_000).contains(&self.base_delay_ms) {
            return Err(UmbraError::config(
                "retry.base_delay_ms",
                format!("must be between 10 and 10000, got {}", self.base_delay_ms),
            ));
        }
        if self.max_delay_ms <= self.base_delay_ms {
            return Err(UmbraError::config(
                "retry.max_delay_ms",
                format!(
                    "must exceed base_delay_ms ({}), got {}",
                    self.base_delay_ms, self.max_delay_ms
                ),
            ));
        }
        if !(1.0..=10.0).contains(&self.multiplier) {
            return Err(UmbraError::config(
                "retry.multiplier",
                format!("must be between 1.0 and 10.0, got {}", self.multiplier),
            ));
        }
        Ok(())
    }

    /// Delay before retry `attempt` (0-based), capped and optionally
    /// jittered.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let raw = self.base_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        let capped = raw.min(self.max_delay_ms as f64);
        let with_jitter = if self.jitter {
            let factor = rand::rng().random_range(0.75..=1.25);
            capped * factor
        } else {
            capped
        };
        Duration::from_millis(with_jitter as u64)
    }
}

/// Store decorator that retries transient failures.
pub struct RetryingStore {
    inner: Arc<dyn SecretStore>,
    policy: RetryPolicy,
}

impl RetryingStore {
    /// Wrap `inner` with `policy`.
    pub fn new(inner: Arc<dyn SecretStore>, policy: RetryPolicy) -> Result<Self> {
        policy.validate()?;
        Ok(Self { inner, policy })
    }

    async fn with_retries<T, F, Fut>(&self, ctx: &OpContext, operation: &str, call: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.policy.max_retries => {
                    let delay = self.policy.delay_for(attempt);
                    tracing::debug!(
                        store = self.inner.name(),
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient failure, retrying"
                    );
                    ctx.ensure_live(operation)?;
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl SecretStore for RetryingStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn resolve(&self, ctx: &OpContext, reference: &StoreRef) -> Result<Secret> {
        self.with_retries(ctx, "resolve", || self.inner.resolve(ctx, reference))
            .await
    }

    async fn describe(&self, ctx: &OpContext, reference: &StoreRef) -> Result<SecretMetadata> {
        self.with_retries(ctx, "describe", || self.inner.describe(ctx, reference))
            .await
    }

    fn capabilities(&self) -> StoreCapabilities {
        self.inner.capabilities()
    }

    async fn validate(&self, ctx: &OpContext) -> Result<()> {
        self.with_retries(ctx, "validate", || self.inner.validate(ctx))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Store that fails `failures` times before succeeding.
    struct FlakyStore {
        failures: AtomicU32,
        retryable: bool,
    }

    #[async_trait]
    impl SecretStore for FlakyStore {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn resolve(&self, _ctx: &OpContext, reference: &StoreRef) -> Result<Secret> {
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n > 0).then(|| n - 1)
            })
            .is_ok()
            {
                let err = UmbraError::provider(
                    "flaky",
                    "resolve",
                    std::io::Error::other("connection reset"),
                );
                return Err(if self.retryable {
                    err
                } else {
                    UmbraError::auth("flaky", "denied")
                });
            }
            let _ = reference;
            Ok(Secret::new("ok"))
        }

        async fn describe(&self, _: &OpContext, _: &StoreRef) -> Result<SecretMetadata> {
            Ok(SecretMetadata::present())
        }

        fn capabilities(&self) -> StoreCapabilities {
            StoreCapabilities::none()
        }

        async fn validate(&self, _: &OpContext) -> Result<()> {
            Ok(())
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay_ms: 10,
            max_delay_ms: 50,
            multiplier: 1.5,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let store = RetryingStore::new(
            Arc::new(FlakyStore {
                failures: AtomicU32::new(2),
                retryable: true,
            }),
            fast_policy(),
        )
        .unwrap();

        let secret = store
            .resolve(&OpContext::new(), &StoreRef::new("flaky", "k"))
            .await
            .unwrap();
        secret.value.expose(|s| assert_eq!(s, "ok"));
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let store = RetryingStore::new(
            Arc::new(FlakyStore {
                failures: AtomicU32::new(1),
                retryable: false,
            }),
            fast_policy(),
        )
        .unwrap();

        let err = store
            .resolve(&OpContext::new(), &StoreRef::new("flaky", "k"))
            .await
            .unwrap_err();
        assert!(matches!(err.kind(), umbra_error::ErrorKind::Auth { .. }));
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let store = RetryingStore::new(
            Arc::new(FlakyStore {
                failures: AtomicU32::new(10),
                retryable: true,
            }),
            fast_policy(),
        )
        .unwrap();

        let err = store
            .resolve(&OpContext::new(), &StoreRef::new("flaky", "k"))
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "the final error is still the transient one");
    }

    #[test]
    fn delay_growth_is_capped() {
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(20), Duration::from_millis(30_000));
    }

    #[test]
    fn policy_windows_are_enforced() {
        let bad = RetryPolicy {
            max_retries: 11,
            ..RetryPolicy::default()
        };
        assert!(bad.validate().is_err());

        let inverted = RetryPolicy {
            base_delay_ms: 5_000,
            max_delay_ms: 1_000,
            ..RetryPolicy::default()
        };
        assert!(inverted.validate().is_err());
    }
}
