//! Rotation strategies.
//!
//! A strategy decides *what steps* a rotation takes; the [`StepExecutor`]
//! seam decides *how a step touches the world*. Real service drivers live
//! outside the engine and implement `StepExecutor`; the in-memory
//! [`RecordingExecutor`] backs tests and dry-run-style usage.

mod custom;
mod immediate;
mod overlap;
mod two_key;

pub use custom::CustomStrategy;
pub use immediate::ImmediateStrategy;
pub use overlap::OverlapStrategy;
pub use two_key::TwoKeyStrategy;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use umbra_core::SecretString;
use umbra_error::{Result, UmbraError};
use umbra_store::OpContext;

use crate::catalog::{Constraints, ServiceCatalog};
use crate::model::{
    AuditStatus, PlanStep, RotationPlan, RotationRequest, RotationResult, RotationStatusKind,
    SecretInfo,
};

/// A named rotation algorithm.
#[async_trait]
pub trait RotationStrategy: Send + Sync {
    /// Registered strategy name.
    fn name(&self) -> &'static str;

    /// Whether this strategy can rotate the described credential.
    async fn supports_secret(&self, ctx: &OpContext, info: &SecretInfo) -> bool;

    /// Produce the ordered plan for a request without executing anything.
    async fn plan(&self, request: &RotationRequest) -> Result<RotationPlan>;

    /// Execute a rotation end to end, returning the result (failures are
    /// recorded in the result, not raised).
    async fn rotate(&self, ctx: &OpContext, request: &RotationRequest) -> Result<RotationResult>;

    /// Give the strategy access to the service-definitions catalog.
    ///
    /// Optional; the default ignores it.
    fn set_catalog(&self, _catalog: Arc<dyn ServiceCatalog>) {}
}

/// Effect of one executed step, as reported by the executor.
#[derive(Debug, Clone, Default)]
pub struct StepOutcome {
    /// Version that was replaced, when this step learned it.
    pub old_version: Option<String>,
    /// Version that was created or promoted, when this step learned it.
    pub new_version: Option<String>,
    /// Free-form details merged into the audit entry.
    pub details: BTreeMap<String, String>,
}

/// Performs individual plan steps against the real world.
///
/// Implementations are service drivers (database user creation, API token
/// issuance, ...). A `verify` step failing is how verification failures
/// enter the pipeline; `rollback` undoes the already-executed steps,
/// best-effort.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Execute one step.
    async fn execute(
        &self,
        ctx: &OpContext,
        request: &RotationRequest,
        step: &PlanStep,
        new_value: &SecretString,
    ) -> Result<StepOutcome>;

    /// Undo the given already-executed steps, newest first.
    async fn rollback(
        &self,
        ctx: &OpContext,
        request: &RotationRequest,
        executed: &[PlanStep],
    ) -> Result<()>;
}

/// Strategy table with stable registration order.
///
/// Registration order is the documented tie-break when several strategies
/// support a secret and neither the request nor the catalog names one.
#[derive(Default)]
pub struct StrategyRegistry {
    strategies: DashMap<String, Arc<dyn RotationStrategy>>,
    order: RwLock<Vec<String>>,
}

impl StrategyRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a strategy. Re-registering a name replaces the strategy but
    /// keeps its original position in the tie-break order.
    pub fn register(&self, strategy: Arc<dyn RotationStrategy>) {
        let name = strategy.name().to_string();
        let replaced = self.strategies.insert(name.clone(), strategy).is_some();
        if !replaced {
            self.order.write().push(name);
        }
    }

    /// Look up a strategy by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn RotationStrategy>> {
        self.strategies.get(name).map(|s| Arc::clone(s.value()))
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.order.read().clone()
    }

    /// Strategies in registration order.
    pub fn in_order(&self) -> Vec<Arc<dyn RotationStrategy>> {
        self.names()
            .iter()
            .filter_map(|name| self.get(name))
            .collect()
    }
}

/// The constraints for a request's credential kind, when a catalog knows it.
pub(crate) fn constraints_for(
    catalog: &RwLock<Option<Arc<dyn ServiceCatalog>>>,
    request: &RotationRequest,
) -> Constraints {
    catalog
        .read()
        .as_ref()
        .and_then(|c| c.service_type(&request.service_ref.service_type))
        .and_then(|t| t.credential_kinds.get(&request.service_ref.kind).cloned())
        .map(|k| k.constraints)
        .unwrap_or_default()
}

/// The replacement value: caller-supplied, or generated within constraints.
pub(crate) fn replacement_value(
    catalog: &RwLock<Option<Arc<dyn ServiceCatalog>>>,
    request: &RotationRequest,
) -> SecretString {
    match &request.new_value {
        Some(value) => value.clone(),
        None => crate::generate::generate_secret(&constraints_for(catalog, request)),
    }
}

/// Execute `steps` in order, recording audit entries and rolling back on the
/// first failure.
///
/// Returns `true` when every step completed. On failure the result is
/// already marked failed, with the rollback outcome (both errors, when the
/// rollback itself fails) rendered separately in the audit trail.
pub(crate) async fn execute_steps(
    ctx: &OpContext,
    component: &str,
    request: &RotationRequest,
    steps: &[PlanStep],
    executor: &Arc<dyn StepExecutor>,
    new_value: &SecretString,
    result: &mut RotationResult,
    executed: &mut Vec<PlanStep>,
) -> bool {
    for step in steps {
        if ctx.is_cancelled() {
            // Stop starting new steps; the in-flight one already finished.
            attempt_rollback(ctx, component, request, executor, executed, result).await;
            result.fail(component, format!("rotation cancelled before step '{}'", step.name));
            return false;
        }

        let entry = result.record(
            "step_started",
            component,
            AuditStatus::Info,
            format!("executing step '{}'", step.name),
        );
        entry.details.insert("step".into(), step.name.clone());
        entry.details.insert("target".into(), step.target.clone());

        match executor.execute(ctx, request, step, new_value).await {
            Ok(outcome) => {
                executed.push(step.clone());
                result.executed_steps.push(step.name.clone());
                if let Some(old) = &outcome.old_version {
                    result.metadata.insert("old_version".into(), old.clone());
                }
                if let Some(new) = &outcome.new_version {
                    result.metadata.insert("new_version".into(), new.clone());
                }
                let entry = result.record(
                    "step_completed",
                    component,
                    AuditStatus::Info,
                    format!("step '{}' completed", step.name),
                );
                entry.details.extend(outcome.details);
            }
            Err(err) => {
                let entry = result.record(
                    "step_failed",
                    component,
                    AuditStatus::Error,
                    format!("step '{}' failed: {err}", step.name),
                );
                entry.error = Some(err.to_string());

                attempt_rollback(ctx, component, request, executor, executed, result).await;
                result.fail(component, format!("step '{}' failed: {err}", step.name));
                return false;
            }
        }
    }
    true
}

/// Best-effort rollback of the executed steps, recorded either way.
async fn attempt_rollback(
    ctx: &OpContext,
    component: &str,
    request: &RotationRequest,
    executor: &Arc<dyn StepExecutor>,
    executed: &[PlanStep],
    result: &mut RotationResult,
) {
    if executed.is_empty() {
        return;
    }
    match executor.rollback(ctx, request, executed).await {
        Ok(()) => {
            result.record(
                "rollback_completed",
                component,
                AuditStatus::Warning,
                format!("rolled back {} executed step(s)", executed.len()),
            );
        }
        Err(rollback_err) => {
            let entry = result.record(
                "rollback_failed",
                component,
                AuditStatus::Error,
                format!("rollback failed: {rollback_err}"),
            );
            entry.error = Some(rollback_err.to_string());
        }
    }
}

/// Mark a successful run and stamp completion.
pub(crate) fn finish_completed(result: &mut RotationResult, component: &str) {
    result.status = RotationStatusKind::Completed;
    result.completed_at = Some(chrono::Utc::now());
    result.record(
        "rotation_completed",
        component,
        AuditStatus::Info,
        "all steps completed",
    );
}

// ── In-memory executor ──────────────────────────────────────────────────────

/// Executor that records every call and simulates versioned storage.
///
/// Steps succeed unless their name is in the failure set; versions count up
/// per service. Useful for tests and for exercising plans without a real
/// service driver.
#[derive(Default)]
pub struct RecordingExecutor {
    executed: RwLock<Vec<String>>,
    rolled_back: RwLock<Vec<String>>,
    fail_steps: RwLock<Vec<String>>,
    fail_rollback: RwLock<bool>,
    version: RwLock<u64>,
}

impl RecordingExecutor {
    /// A recording executor where every step succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make steps with `name` fail.
    pub fn fail_step(&self, name: impl Into<String>) -> &Self {
        self.fail_steps.write().push(name.into());
        self
    }

    /// Make rollback fail too.
    pub fn fail_rollback(&self) -> &Self {
        *self.fail_rollback.write() = true;
        self
    }

    /// Step names executed so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.executed.read().clone()
    }

    /// Step names rolled back so far.
    pub fn rolled_back(&self) -> Vec<String> {
        self.rolled_back.read().clone()
    }
}

#[async_trait]
impl StepExecutor for RecordingExecutor {
    async fn execute(
        &self,
        ctx: &OpContext,
        _request: &RotationRequest,
        step: &PlanStep,
        _new_value: &SecretString,
    ) -> Result<StepOutcome> {
        ctx.ensure_live("execute step")?;
        if self.fail_steps.read().contains(&step.name) {
            return Err(UmbraError::provider(
                "recording-executor",
                step.name.clone(),
                std::io::Error::other(format!("step '{}' scripted to fail", step.name)),
            ));
        }
        self.executed.write().push(step.name.clone());

        let mut outcome = StepOutcome::default();
        if step.action == crate::model::StepAction::Create {
            let mut version = self.version.write();
            outcome.old_version = (*version > 0).then(|| version.to_string());
            *version += 1;
            outcome.new_version = Some(version.to_string());
        }
        Ok(outcome)
    }

    async fn rollback(
        &self,
        _ctx: &OpContext,
        _request: &RotationRequest,
        executed: &[PlanStep],
    ) -> Result<()> {
        if *self.fail_rollback.read() {
            return Err(UmbraError::provider(
                "recording-executor",
                "rollback",
                std::io::Error::other("rollback scripted to fail"),
            ));
        }
        let mut rolled_back = self.rolled_back.write();
        for step in executed.iter().rev() {
            rolled_back.push(step.name.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl RotationStrategy for Named {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn supports_secret(&self, _: &OpContext, _: &SecretInfo) -> bool {
            true
        }

        async fn plan(&self, _: &RotationRequest) -> Result<RotationPlan> {
            Err(UmbraError::user("not used in this test"))
        }

        async fn rotate(&self, _: &OpContext, _: &RotationRequest) -> Result<RotationResult> {
            Err(UmbraError::user("not used in this test"))
        }
    }

    #[test]
    fn registration_order_is_the_tie_break_order() {
        let registry = StrategyRegistry::new();
        registry.register(Arc::new(Named("b")));
        registry.register(Arc::new(Named("a")));
        registry.register(Arc::new(Named("c")));
        assert_eq!(registry.names(), vec!["b", "a", "c"]);

        // Replacing keeps position.
        registry.register(Arc::new(Named("a")));
        assert_eq!(registry.names(), vec!["b", "a", "c"]);
    }
}
