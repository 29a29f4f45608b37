//! Rotation data model: requests, plans, results, audit and persistence
//! records.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use umbra_core::{SecretString, ServiceRef, StoreCapabilities, StoreRef};

/// What a strategy knows about the credential it is asked to rotate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretInfo {
    /// The rotation target.
    pub service_ref: ServiceRef,
    /// Backing store name, when the new value is versioned into one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<String>,
    /// Capabilities of the backing store, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<StoreCapabilities>,
    /// Free-form descriptors.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl SecretInfo {
    /// Info for a target with nothing else known.
    pub fn new(service_ref: ServiceRef) -> Self {
        Self {
            service_ref,
            store: None,
            capabilities: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Return a copy with backing-store facts attached.
    pub fn with_store(mut self, store: impl Into<String>, capabilities: StoreCapabilities) -> Self {
        self.store = Some(store.into());
        self.capabilities = Some(capabilities);
        self
    }
}

/// A request to rotate one credential.
#[derive(Debug, Clone)]
pub struct RotationRequest {
    /// The rotation target.
    pub service_ref: ServiceRef,
    /// Strategy name; `None` lets the engine select.
    pub strategy: Option<String>,
    /// Named rotation policy, recorded into the fingerprint.
    pub policy: Option<String>,
    /// Caller-supplied replacement value; generated when absent.
    pub new_value: Option<SecretString>,
    /// Steps for the `custom` strategy, executed verbatim.
    pub steps: Option<Vec<PlanStep>>,
    /// Free-form request metadata (backing `store`, `environment`, ...).
    pub metadata: BTreeMap<String, String>,
    /// Plan only; touch nothing.
    pub dry_run: bool,
    /// Skip the at-most-once fingerprint guard.
    pub force: bool,
    /// Who asked; defaults to `$USER` when unset.
    pub initiated_by: Option<String>,
}

impl RotationRequest {
    /// A plain rotation request for `service_ref`.
    pub fn new(service_ref: ServiceRef) -> Self {
        Self {
            service_ref,
            strategy: None,
            policy: None,
            new_value: None,
            steps: None,
            metadata: BTreeMap::new(),
            dry_run: false,
            force: false,
            initiated_by: None,
        }
    }

    /// Return a copy with an explicit strategy.
    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    /// Return a copy with a caller-supplied new value.
    pub fn with_new_value(mut self, value: impl Into<SecretString>) -> Self {
        self.new_value = Some(value.into());
        self
    }

    /// Return a copy with a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Step verbs the engine knows how to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    /// Create the replacement credential.
    Create,
    /// Verify the replacement works end-to-end.
    Verify,
    /// Make the replacement the primary credential.
    Promote,
    /// Mark the old credential for retirement.
    Deprecate,
    /// Remove the old credential.
    Delete,
    /// Strategy- or request-defined behaviour.
    Custom,
}

/// One ordered step of a rotation plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Short step name (`create`, `verify`, ...).
    pub name: String,
    /// Human description for plans shown to operators.
    pub description: String,
    /// Dispatch verb.
    pub action: StepAction,
    /// What the step acts on (service instance, store path, ...).
    pub target: String,
    /// Step options.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

impl PlanStep {
    /// A step with an empty option set.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        action: StepAction,
        target: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            action,
            target: target.into(),
            options: BTreeMap::new(),
        }
    }

    /// Return a copy with an option set.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// The ordered plan a strategy produces for a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationPlan {
    /// The rotation target.
    pub service_ref: ServiceRef,
    /// Strategy that produced the plan.
    pub strategy: String,
    /// Steps, strictly ordered.
    pub steps: Vec<PlanStep>,
    /// Rough wall-clock estimate for the whole plan.
    #[serde(with = "humantime_serde")]
    pub estimated_time: Duration,
    /// Deterministic request fingerprint (at-most-once key).
    pub fingerprint: String,
    /// Plan creation time.
    pub created_at: DateTime<Utc>,
    /// Plan metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// Lifecycle states of a rotation result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationStatusKind {
    /// Planned but not started.
    Pending,
    /// Steps are executing.
    InProgress,
    /// Every step succeeded.
    Completed,
    /// A step failed (rollback may have run).
    Failed,
    /// Stopped cleanly partway (e.g. awaiting cutover confirmation).
    Partial,
}

/// Severity of an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    /// Normal progress.
    Info,
    /// Something odd but not fatal.
    Warning,
    /// A failure.
    Error,
}

/// One time-stamped record inside a rotation result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// What happened (`step_started`, `ttl_set`, `rollback`, ...).
    pub action: String,
    /// Which component did it (`engine`, strategy name, ...).
    pub component: String,
    /// Severity.
    pub status: AuditStatus,
    /// Human-readable description.
    pub message: String,
    /// Structured details.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
    /// Error text, for `Error` entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of one rotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationResult {
    /// The rotation target.
    pub service_ref: ServiceRef,
    /// The plan that was executed.
    pub plan: RotationPlan,
    /// Final status.
    pub status: RotationStatusKind,
    /// Where the old credential lives, when versioned in a store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_secret_ref: Option<StoreRef>,
    /// Where the new credential lives, when versioned in a store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_secret_ref: Option<StoreRef>,
    /// Names of steps that actually ran, in order.
    pub executed_steps: Vec<String>,
    /// When execution started.
    pub started_at: DateTime<Utc>,
    /// When execution finished (absent for in-progress/dry-run results).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// When the new credential expires, when the catalog publishes a TTL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Failure description, for failed results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Append-only audit trail.
    pub audit_trail: Vec<AuditEntry>,
    /// Result metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl RotationResult {
    /// A pending result for a freshly created plan.
    pub fn pending(plan: RotationPlan) -> Self {
        Self {
            service_ref: plan.service_ref.clone(),
            status: RotationStatusKind::Pending,
            old_secret_ref: None,
            new_secret_ref: None,
            executed_steps: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            expires_at: None,
            error: None,
            audit_trail: Vec::new(),
            metadata: BTreeMap::new(),
            plan,
        }
    }

    /// Append an audit entry stamped now.
    ///
    /// Entries are appended in call order, so timestamps are non-decreasing
    /// by construction.
    pub fn record(
        &mut self,
        action: impl Into<String>,
        component: impl Into<String>,
        status: AuditStatus,
        message: impl Into<String>,
    ) -> &mut AuditEntry {
        self.audit_trail.push(AuditEntry {
            timestamp: Utc::now(),
            action: action.into(),
            component: component.into(),
            status,
            message: message.into(),
            details: BTreeMap::new(),
            error: None,
        });
        self.audit_trail
            .last_mut()
            .unwrap_or_else(|| unreachable!("entry was just pushed"))
    }

    /// Mark the result failed with an error message.
    pub fn fail(&mut self, component: impl Into<String>, error: impl Into<String>) {
        let error = error.into();
        self.status = RotationStatusKind::Failed;
        self.completed_at = Some(Utc::now());
        let entry = self.record("rotation_failed", component, AuditStatus::Error, error.clone());
        entry.error = Some(error.clone());
        self.error = Some(error);
    }
}

/// One persisted line of a service's rotation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// When the rotation finished.
    pub timestamp: DateTime<Utc>,
    /// Service instance name.
    pub service_name: String,
    /// Credential kind that was rotated.
    pub credential_kind: String,
    /// What ran (`rotate`).
    pub action: String,
    /// Final status.
    pub status: RotationStatusKind,
    /// How long it took.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// Strategy used.
    pub strategy: String,
    /// Request fingerprint (the at-most-once key).
    pub fingerprint: String,
    /// Initiating user, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Old credential version, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_version: Option<String>,
    /// New credential version, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_version: Option<String>,
    /// Failure description, for failed rotations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Record metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// Overall rotation posture of one service + credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceRotationState {
    /// Credential is fresh.
    Current,
    /// Credential is due for rotation.
    NeedsRotation,
    /// A rotation is running now.
    InProgress,
    /// The last rotation failed.
    Failed,
}

/// The persisted last-known status of one service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationStatus {
    /// Service instance name.
    pub service_name: String,
    /// Posture.
    pub status: ServiceRotationState,
    /// When the last rotation finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_rotation: Option<DateTime<Utc>>,
    /// Status of the last rotation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result: Option<RotationStatusKind>,
    /// Total rotations recorded.
    pub rotation_count: u64,
    /// Successful rotations.
    pub success_count: u64,
    /// Failed rotations.
    pub failure_count: u64,
    /// Next scheduled rotation, when one is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_rotation: Option<DateTime<Utc>>,
    /// Last failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl RotationStatus {
    /// A zeroed status for a service never rotated before.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            status: ServiceRotationState::Current,
            last_rotation: None,
            last_result: None,
            rotation_count: 0,
            success_count: 0,
            failure_count: 0,
            next_rotation: None,
            last_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_timestamps_are_non_decreasing() {
        let service_ref = ServiceRef::new("postgres", "prod-db", "password");
        let plan = RotationPlan {
            service_ref: service_ref.clone(),
            strategy: "immediate".into(),
            steps: vec![],
            estimated_time: Duration::from_secs(30),
            fingerprint: "abc".into(),
            created_at: Utc::now(),
            metadata: BTreeMap::new(),
        };
        let mut result = RotationResult::pending(plan);
        for i in 0..10 {
            result.record(format!("step_{i}"), "engine", AuditStatus::Info, "ok");
        }
        let stamps: Vec<_> = result.audit_trail.iter().map(|e| e.timestamp).collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn history_record_round_trips_through_ndjson() {
        let record = HistoryRecord {
            timestamp: Utc::now(),
            service_name: "prod-db".into(),
            credential_kind: "password".into(),
            action: "rotate".into(),
            status: RotationStatusKind::Completed,
            duration: Duration::from_secs(12),
            strategy: "immediate".into(),
            fingerprint: "deadbeef".into(),
            user: Some("alice".into()),
            old_version: Some("3".into()),
            new_version: Some("4".into()),
            error: None,
            metadata: BTreeMap::new(),
        };
        let line = serde_json::to_string(&record).unwrap();
        assert!(!line.contains('\n'));
        let back: HistoryRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(back.fingerprint, "deadbeef");
        assert_eq!(back.duration, Duration::from_secs(12));
    }

    #[test]
    fn fail_sets_status_error_and_audit() {
        let plan = RotationPlan {
            service_ref: ServiceRef::new("postgres", "prod-db", "password"),
            strategy: "immediate".into(),
            steps: vec![],
            estimated_time: Duration::ZERO,
            fingerprint: "f".into(),
            created_at: Utc::now(),
            metadata: BTreeMap::new(),
        };
        let mut result = RotationResult::pending(plan);
        result.fail("engine", "boom");
        assert_eq!(result.status, RotationStatusKind::Failed);
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert_eq!(result.audit_trail.last().unwrap().error.as_deref(), Some("boom"));
    }
}
