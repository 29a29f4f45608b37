//! The rotation engine: strategy selection and the execution pipeline.
//!
//! Pipeline, in order: strategy lookup (unknown names raise `Config`),
//! capability gate (unsupported secrets return a failed result), *started*
//! event, fingerprint + at-most-once short-circuit, pre-validation,
//! catalog metadata merge, strategy execution (panics contained), TTL
//! attach, persistence (history append + status upsert + recent ring),
//! terminal event + metric.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt as _;
use futures::stream::{self, StreamExt as _};
use parking_lot::Mutex;
use umbra_error::{Result, UmbraError};
use umbra_store::{OpContext, StoreRegistry};

use crate::catalog::ServiceCatalog;
use crate::events::{
    EventBus, EventSink, MetricsRecorder, RotationEvent, RotationEventType, TracingMetrics,
};
use crate::fingerprint::fingerprint;
use crate::model::{
    AuditStatus, HistoryRecord, RotationPlan, RotationRequest, RotationResult, RotationStatus,
    RotationStatusKind, SecretInfo,
};
use crate::store::RotationStore;
use crate::strategy::{RotationStrategy, StrategyRegistry};
use crate::ttl::parse_ttl;
use crate::validator::validate_credential;

/// Default bound on in-flight rotations during a batch.
pub const DEFAULT_BATCH_CONCURRENCY: usize = 5;

/// Results kept in the in-memory recent ring.
const RECENT_RING_SIZE: usize = 64;

/// Orchestrates credential rotations.
pub struct RotationEngine {
    strategies: StrategyRegistry,
    catalog: Option<Arc<dyn ServiceCatalog>>,
    registry: Option<Arc<StoreRegistry>>,
    storage: RotationStore,
    events: EventBus,
    metrics: Arc<dyn MetricsRecorder>,
    recent: Mutex<VecDeque<RotationResult>>,
    batch_concurrency: usize,
}

/// Builder for [`RotationEngine`].
pub struct RotationEngineBuilder {
    root: Option<PathBuf>,
    catalog: Option<Arc<dyn ServiceCatalog>>,
    registry: Option<Arc<StoreRegistry>>,
    sinks: Vec<Arc<dyn EventSink>>,
    metrics: Arc<dyn MetricsRecorder>,
    batch_concurrency: usize,
}

impl RotationEngineBuilder {
    /// Persist rotation state under `root` instead of the per-user default.
    pub fn storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Wire the service-definitions catalog.
    pub fn catalog(mut self, catalog: Arc<dyn ServiceCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Wire the store registry, enabling backing-store capability lookups.
    pub fn store_registry(mut self, registry: Arc<StoreRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Attach an event sink.
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Replace the metrics recorder.
    pub fn metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Override the batch concurrency bound (minimum 1).
    pub fn batch_concurrency(mut self, bound: usize) -> Self {
        self.batch_concurrency = bound.max(1);
        self
    }

    /// Build the engine. Must be called inside a tokio runtime (event sinks
    /// spawn their drain tasks here).
    pub fn build(self) -> RotationEngine {
        let mut events = EventBus::new();
        for sink in self.sinks {
            events.subscribe(sink);
        }
        RotationEngine {
            strategies: StrategyRegistry::new(),
            catalog: self.catalog,
            registry: self.registry,
            storage: RotationStore::new(self.root.unwrap_or_else(RotationStore::default_root)),
            events,
            metrics: self.metrics,
            recent: Mutex::new(VecDeque::with_capacity(RECENT_RING_SIZE)),
            batch_concurrency: self.batch_concurrency,
        }
    }
}

impl RotationEngine {
    /// Start building an engine.
    pub fn builder() -> RotationEngineBuilder {
        RotationEngineBuilder {
            root: None,
            catalog: None,
            registry: None,
            sinks: Vec::new(),
            metrics: Arc::new(TracingMetrics),
            batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
        }
    }

    /// Register a strategy; the catalog is handed to it when wired.
    pub fn register_strategy(&self, strategy: Arc<dyn RotationStrategy>) {
        if let Some(catalog) = &self.catalog {
            strategy.set_catalog(Arc::clone(catalog));
        }
        self.strategies.register(strategy);
    }

    /// Registered strategy names, in registration order.
    pub fn strategy_names(&self) -> Vec<String> {
        self.strategies.names()
    }

    /// The event bus, for drop-counter inspection.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Recently completed results, newest last.
    pub fn recent(&self) -> Vec<RotationResult> {
        self.recent.lock().iter().cloned().collect()
    }

    /// Rotate one credential.
    ///
    /// Unknown strategy names raise `Config`; everything that goes wrong
    /// during execution is returned inside a failed [`RotationResult`].
    #[tracing::instrument(skip(self, ctx, request), fields(service = %request.service_ref))]
    pub async fn rotate(
        &self,
        ctx: &OpContext,
        request: &RotationRequest,
    ) -> Result<RotationResult> {
        let info = self.secret_info(request);
        let strategy = self.select_strategy(ctx, request, &info).await?;

        // Capability gate: unsupported is a failed result, not an error.
        if !strategy.supports_secret(ctx, &info).await {
            let result = self.failed_shell(
                request,
                strategy.name(),
                format!(
                    "strategy '{}' does not support this credential",
                    strategy.name()
                ),
            );
            self.persist_and_announce(request, &result).await;
            return Ok(result);
        }

        if request.dry_run {
            let plan = strategy.plan(request).await?;
            let mut result = RotationResult::pending(plan);
            result.record(
                "plan_generated",
                "engine",
                AuditStatus::Info,
                "dry run: plan generated, nothing executed",
            );
            return Ok(result);
        }

        self.announce_started(request, strategy.name());

        // At-most-once: a completed rotation with this fingerprint is
        // returned as-is rather than re-executed.
        let print = fingerprint(request);
        if !request.force {
            if let Some(previous) = self.find_previous(request, strategy.as_ref(), &print).await? {
                return Ok(previous);
            }
        }

        // Pre-validation of a caller-supplied value, before any backend work.
        if let (Some(new_value), Some(catalog)) = (&request.new_value, &self.catalog) {
            if let Some(type_def) = catalog.service_type(&request.service_ref.service_type) {
                let report = validate_credential(
                    &type_def,
                    &request.service_ref.kind,
                    new_value,
                    None,
                );
                if !report.valid {
                    let mut result = self.failed_shell(
                        request,
                        strategy.name(),
                        format!("pre-validation failed: {}", report.errors.join("; ")),
                    );
                    for error in &report.errors {
                        let entry = result.record(
                            "validation_failed",
                            "validator",
                            AuditStatus::Error,
                            error.clone(),
                        );
                        entry.error = Some(error.clone());
                    }
                    self.persist_and_announce(request, &result).await;
                    return Ok(result);
                }
            }
        }

        // Merge instance metadata from the catalog, non-overriding.
        let request = self.enrich_request(request);

        // Run the strategy; a panic inside it becomes a failed result.
        let started = std::time::Instant::now();
        let outcome = std::panic::AssertUnwindSafe(strategy.rotate(ctx, &request))
            .catch_unwind()
            .await;
        let mut result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                let mut result =
                    self.failed_shell(&request, strategy.name(), format!("strategy failed: {err}"));
                result.metadata.insert("elapsed_ms".into(), started.elapsed().as_millis().to_string());
                result
            }
            Err(_panic) => self.failed_shell(
                &request,
                strategy.name(),
                format!("strategy '{}' panicked", strategy.name()),
            ),
        };

        self.attach_ttl(&request, &mut result);
        self.persist_and_announce(&request, &result).await;
        Ok(result)
    }

    /// Rotate a batch with bounded concurrency.
    ///
    /// Results come back in input order; a failing request never aborts its
    /// peers — callers inspect each entry.
    pub async fn rotate_batch(
        &self,
        ctx: &OpContext,
        requests: Vec<RotationRequest>,
    ) -> Vec<Result<RotationResult>> {
        stream::iter(
            requests
                .iter()
                .map(|request| self.rotate(ctx, request)),
        )
        .buffered(self.batch_concurrency)
        .collect()
        .await
    }

    /// Scheduling hook. Validation only; execution is future work.
    pub fn schedule(&self, request: &RotationRequest, when: DateTime<Utc>) -> Result<()> {
        if when <= Utc::now() {
            return Err(UmbraError::validation(format!(
                "scheduled time {when} is in the past"
            )));
        }
        let _ = request;
        Err(UmbraError::user("rotation scheduling is not implemented")
            .with_suggestion("run `rotate` directly, or drive scheduling externally"))
    }

    /// Last-known status for a service.
    pub async fn get_status(&self, service: &str) -> Result<Option<RotationStatus>> {
        self.storage.read_status(service).await
    }

    /// Rotation history for a service, oldest first.
    pub async fn get_history(
        &self,
        service: &str,
        limit: Option<usize>,
    ) -> Result<Vec<HistoryRecord>> {
        self.storage.read_history(service, limit).await
    }

    /// Services with any persisted rotation state.
    pub async fn list_secrets(&self) -> Result<Vec<String>> {
        self.storage.list_services().await
    }

    // ── Pipeline pieces ─────────────────────────────────────────────────────

    fn secret_info(&self, request: &RotationRequest) -> SecretInfo {
        let mut info = SecretInfo::new(request.service_ref.clone());
        if let (Some(store_name), Some(registry)) =
            (request.metadata.get("store"), &self.registry)
        {
            if let Some(store) = registry.get(store_name) {
                info = info.with_store(store_name.clone(), store.capabilities());
            }
        }
        info
    }

    async fn select_strategy(
        &self,
        ctx: &OpContext,
        request: &RotationRequest,
        info: &SecretInfo,
    ) -> Result<Arc<dyn RotationStrategy>> {
        // 1. Explicit request.
        if let Some(name) = &request.strategy {
            return self.strategies.get(name).ok_or_else(|| {
                UmbraError::config(
                    "rotation.strategy",
                    format!("unknown rotation strategy: {name}"),
                )
                .with_suggestion(format!(
                    "registered strategies: {}",
                    self.strategies.names().join(", ")
                ))
            });
        }

        // 2. Catalog default for the service type.
        if let Some(catalog) = &self.catalog {
            if let Some(default) = catalog
                .service_type(&request.service_ref.service_type)
                .and_then(|t| t.default_strategy)
            {
                if let Some(strategy) = self.strategies.get(&default) {
                    return Ok(strategy);
                }
                tracing::warn!(
                    service_type = %request.service_ref.service_type,
                    default,
                    "catalog default strategy is not registered, falling back"
                );
            }
        }

        // 3. First registered strategy that supports the secret.
        for strategy in self.strategies.in_order() {
            if strategy.supports_secret(ctx, info).await {
                return Ok(strategy);
            }
        }

        Err(UmbraError::config(
            "rotation.strategy",
            format!(
                "no registered strategy supports '{}'",
                request.service_ref
            ),
        )
        .with_suggestion(format!(
            "candidates considered: {}",
            self.strategies.names().join(", ")
        )))
    }

    /// A failed result carrying a minimal plan, for failures that happen
    /// before (or instead of) strategy execution.
    fn failed_shell(
        &self,
        request: &RotationRequest,
        strategy: &str,
        error: String,
    ) -> RotationResult {
        let plan = RotationPlan {
            service_ref: request.service_ref.clone(),
            strategy: strategy.to_string(),
            steps: Vec::new(),
            estimated_time: Duration::ZERO,
            fingerprint: fingerprint(request),
            created_at: Utc::now(),
            metadata: request.metadata.clone(),
        };
        let mut result = RotationResult::pending(plan);
        result.fail("engine", error);
        result
    }

    async fn find_previous(
        &self,
        request: &RotationRequest,
        strategy: &dyn RotationStrategy,
        print: &str,
    ) -> Result<Option<RotationResult>> {
        // Fast path: the in-memory ring.
        {
            let ring = self.recent.lock();
            if let Some(hit) = ring.iter().rev().find(|r| {
                r.plan.fingerprint == print && r.status == RotationStatusKind::Completed
            }) {
                tracing::debug!(fingerprint = print, "fingerprint hit in recent ring");
                return Ok(Some(hit.clone()));
            }
        }

        // Durable path: reconstruct from the history record.
        let service = request.service_ref.instance.clone();
        let Some(record) = self
            .storage
            .find_completed_fingerprint(&service, print)
            .await?
        else {
            return Ok(None);
        };

        let plan = strategy.plan(request).await?;
        let mut result = RotationResult::pending(plan);
        result.status = RotationStatusKind::Completed;
        result.started_at = record.timestamp;
        result.completed_at = Some(record.timestamp);
        result.metadata.insert("deduplicated".into(), "true".into());
        if let Some(new_version) = &record.new_version {
            result.metadata.insert("new_version".into(), new_version.clone());
        }
        result.record(
            "deduplicated",
            "engine",
            AuditStatus::Info,
            format!(
                "rotation with fingerprint {print} already completed at {}; returning prior result",
                record.timestamp
            ),
        );
        Ok(Some(result))
    }

    fn enrich_request(&self, request: &RotationRequest) -> RotationRequest {
        let mut enriched = request.clone();
        if let Some(catalog) = &self.catalog {
            if let Some(instance) = catalog.service_instance(
                &request.service_ref.service_type,
                &request.service_ref.instance,
            ) {
                if let Some(endpoint) = instance.endpoint {
                    enriched
                        .metadata
                        .entry("endpoint".to_string())
                        .or_insert(endpoint);
                }
                for (key, value) in instance.config {
                    enriched.metadata.entry(key).or_insert(value);
                }
            }
        }
        enriched
    }

    fn attach_ttl(&self, request: &RotationRequest, result: &mut RotationResult) {
        if result.status != RotationStatusKind::Completed {
            return;
        }
        let Some(ttl_text) = self.catalog.as_ref().and_then(|catalog| {
            catalog
                .service_type(&request.service_ref.service_type)
                .and_then(|t| {
                    t.credential_kinds
                        .get(&request.service_ref.kind)
                        .and_then(|k| k.constraints.ttl.clone())
                })
        }) else {
            return;
        };
        match parse_ttl(&ttl_text) {
            Ok(ttl) => {
                let expires_at = result.started_at
                    + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
                result.expires_at = Some(expires_at);
                let entry = result.record(
                    "ttl_set",
                    "engine",
                    AuditStatus::Info,
                    format!("credential expires at {expires_at} (ttl {ttl_text})"),
                );
                entry.details.insert("ttl".into(), ttl_text);
            }
            Err(err) => {
                result.record(
                    "ttl_skipped",
                    "engine",
                    AuditStatus::Warning,
                    format!("catalog TTL '{ttl_text}' does not parse: {err}"),
                );
            }
        }
    }

    fn announce_started(&self, request: &RotationRequest, strategy: &str) {
        let environment = request.metadata.get("environment").cloned();
        self.metrics.rotation_started(
            &request.service_ref.service_type,
            environment.as_deref().unwrap_or(""),
            strategy,
        );
        self.events.emit(&RotationEvent {
            event_type: RotationEventType::Started,
            service: request.service_ref.instance.clone(),
            environment,
            strategy: strategy.to_string(),
            status: None,
            duration: None,
            timestamp: Utc::now(),
            previous_version: None,
            new_version: None,
            initiated_by: initiated_by(request),
            error: None,
            metadata: Default::default(),
        });
    }

    async fn persist_and_announce(&self, request: &RotationRequest, result: &RotationResult) {
        let duration = result
            .completed_at
            .map(|done| (done - result.started_at).to_std().unwrap_or(Duration::ZERO))
            .unwrap_or(Duration::ZERO);
        let service = request.service_ref.instance.clone();

        let record = HistoryRecord {
            timestamp: result.completed_at.unwrap_or_else(Utc::now),
            service_name: service.clone(),
            credential_kind: request.service_ref.kind.clone(),
            action: "rotate".into(),
            status: result.status,
            duration,
            strategy: result.plan.strategy.clone(),
            fingerprint: result.plan.fingerprint.clone(),
            user: initiated_by(request),
            old_version: result.metadata.get("old_version").cloned(),
            new_version: result.metadata.get("new_version").cloned(),
            error: result.error.clone(),
            metadata: result.metadata.clone(),
        };
        if let Err(err) = self.storage.append_history(&record).await {
            tracing::error!(service = %service, error = %err, "failed to append rotation history");
        }
        if let Err(err) = self
            .storage
            .record_outcome(&service, result.status, result.error.clone())
            .await
        {
            tracing::error!(service = %service, error = %err, "failed to update rotation status");
        }

        {
            let mut ring = self.recent.lock();
            if ring.len() == RECENT_RING_SIZE {
                ring.pop_front();
            }
            ring.push_back(result.clone());
        }

        let environment = request.metadata.get("environment").cloned();
        let event_type = match result.status {
            RotationStatusKind::Completed => RotationEventType::Completed,
            _ => RotationEventType::Failed,
        };
        self.metrics.rotation_completed(
            &request.service_ref.service_type,
            environment.as_deref().unwrap_or(""),
            result.status,
            duration,
        );
        self.events.emit(&RotationEvent {
            event_type,
            service,
            environment,
            strategy: result.plan.strategy.clone(),
            status: Some(result.status),
            duration: Some(duration),
            timestamp: Utc::now(),
            previous_version: result.metadata.get("old_version").cloned(),
            new_version: result.metadata.get("new_version").cloned(),
            initiated_by: initiated_by(request),
            error: result.error.clone(),
            metadata: Default::default(),
        });
    }
}

/// The initiating user: explicit on the request, else the `USER` variable.
fn initiated_by(request: &RotationRequest) -> Option<String> {
    request
        .initiated_by
        .clone()
        .or_else(|| std::env::var("USER").ok())
}
