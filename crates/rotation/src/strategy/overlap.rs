//! The `overlap` strategy: co-serve old and new for a window, retire after
//! an explicit cutover confirmation.
//!
//! The retire step never fires on its own: callers confirm cutover by
//! setting `cutover_confirmed=true` in the request metadata (typically on a
//! second invocation once consumers have migrated). Until then the rotation
//! stops cleanly in `Partial`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use umbra_error::Result;
use umbra_store::OpContext;

use crate::catalog::ServiceCatalog;
use crate::fingerprint::fingerprint;
use crate::model::{
    AuditStatus, PlanStep, RotationPlan, RotationRequest, RotationResult, RotationStatusKind,
    SecretInfo, StepAction,
};
use crate::strategy::{
    RotationStrategy, StepExecutor, execute_steps, finish_completed, replacement_value,
};

/// Request metadata key that confirms cutover.
pub const CUTOVER_CONFIRMED_KEY: &str = "cutover_confirmed";

/// Default co-serve window when the request does not override it.
const DEFAULT_OVERLAP: &str = "24h";

/// Create → verify → co-serve → (confirmed) retire.
pub struct OverlapStrategy {
    executor: Arc<dyn StepExecutor>,
    catalog: RwLock<Option<Arc<dyn ServiceCatalog>>>,
}

impl OverlapStrategy {
    /// A strategy executing through `executor`.
    pub fn new(executor: Arc<dyn StepExecutor>) -> Self {
        Self {
            executor,
            catalog: RwLock::new(None),
        }
    }

    fn cutover_confirmed(request: &RotationRequest) -> bool {
        request
            .metadata
            .get(CUTOVER_CONFIRMED_KEY)
            .is_some_and(|v| v == "true")
    }
}

#[async_trait]
impl RotationStrategy for OverlapStrategy {
    fn name(&self) -> &'static str {
        "overlap"
    }

    async fn supports_secret(&self, _ctx: &OpContext, _info: &SecretInfo) -> bool {
        true
    }

    async fn plan(&self, request: &RotationRequest) -> Result<RotationPlan> {
        let target = request.service_ref.to_string();
        let overlap = request
            .metadata
            .get("overlap_period")
            .cloned()
            .unwrap_or_else(|| DEFAULT_OVERLAP.to_string());
        Ok(RotationPlan {
            service_ref: request.service_ref.clone(),
            strategy: self.name().to_string(),
            steps: vec![
                PlanStep::new(
                    "create",
                    "create the new credential alongside the old",
                    StepAction::Create,
                    target.clone(),
                ),
                PlanStep::new(
                    "verify",
                    "verify the new credential works",
                    StepAction::Verify,
                    target.clone(),
                ),
                PlanStep::new(
                    "co-serve",
                    "serve both credentials for the overlap window",
                    StepAction::Custom,
                    target.clone(),
                )
                .with_option("overlap_period", overlap),
                PlanStep::new(
                    "retire",
                    "retire the old credential after confirmed cutover",
                    StepAction::Deprecate,
                    target,
                )
                .with_option("requires_confirmation", "true"),
            ],
            estimated_time: Duration::from_secs(120),
            fingerprint: fingerprint(request),
            created_at: Utc::now(),
            metadata: request.metadata.clone(),
        })
    }

    #[tracing::instrument(skip(self, ctx, request), fields(service = %request.service_ref))]
    async fn rotate(&self, ctx: &OpContext, request: &RotationRequest) -> Result<RotationResult> {
        let plan = self.plan(request).await?;
        let new_value = replacement_value(&self.catalog, request);

        let mut result = RotationResult::pending(plan.clone());
        result.status = RotationStatusKind::InProgress;
        let mut executed = Vec::new();

        // Everything before the confirmation-gated retire step.
        let (preamble, retire) = plan.steps.split_at(plan.steps.len() - 1);
        let ok = execute_steps(
            ctx,
            self.name(),
            request,
            preamble,
            &self.executor,
            &new_value,
            &mut result,
            &mut executed,
        )
        .await;
        if !ok {
            return Ok(result);
        }

        if !Self::cutover_confirmed(request) {
            result.status = RotationStatusKind::Partial;
            result.completed_at = Some(Utc::now());
            result.record(
                "awaiting_cutover",
                self.name(),
                AuditStatus::Warning,
                format!(
                    "old credential left in service; re-run with {CUTOVER_CONFIRMED_KEY}=true to retire it"
                ),
            );
            return Ok(result);
        }

        let ok = execute_steps(
            ctx,
            self.name(),
            request,
            retire,
            &self.executor,
            &new_value,
            &mut result,
            &mut executed,
        )
        .await;
        if ok {
            finish_completed(&mut result, self.name());
        }
        Ok(result)
    }

    fn set_catalog(&self, catalog: Arc<dyn ServiceCatalog>) {
        *self.catalog.write() = Some(catalog);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::RecordingExecutor;
    use umbra_core::ServiceRef;

    fn request() -> RotationRequest {
        RotationRequest::new(ServiceRef::new("kafka", "events", "api-key"))
    }

    #[tokio::test]
    async fn without_confirmation_stops_partial_before_retire() {
        let executor = Arc::new(RecordingExecutor::new());
        let strategy = OverlapStrategy::new(Arc::clone(&executor) as Arc<dyn StepExecutor>);

        let result = strategy
            .rotate(&OpContext::new(), &request())
            .await
            .unwrap();
        assert_eq!(result.status, RotationStatusKind::Partial);
        assert_eq!(result.executed_steps, vec!["create", "verify", "co-serve"]);
        assert!(!executor.executed().contains(&"retire".to_string()));
        assert!(
            result
                .audit_trail
                .iter()
                .any(|e| e.action == "awaiting_cutover")
        );
    }

    #[tokio::test]
    async fn with_confirmation_retires_and_completes() {
        let executor = Arc::new(RecordingExecutor::new());
        let strategy = OverlapStrategy::new(Arc::clone(&executor) as Arc<dyn StepExecutor>);

        let confirmed = request().with_metadata(CUTOVER_CONFIRMED_KEY, "true");
        let result = strategy
            .rotate(&OpContext::new(), &confirmed)
            .await
            .unwrap();
        assert_eq!(result.status, RotationStatusKind::Completed);
        assert_eq!(
            result.executed_steps,
            vec!["create", "verify", "co-serve", "retire"]
        );
    }

    #[tokio::test]
    async fn overlap_window_is_plannable_per_request() {
        let strategy = OverlapStrategy::new(Arc::new(RecordingExecutor::new()));
        let request = request().with_metadata("overlap_period", "72h");
        let plan = strategy.plan(&request).await.unwrap();
        assert_eq!(
            plan.steps[2].options.get("overlap_period").map(String::as_str),
            Some("72h")
        );
    }
}
