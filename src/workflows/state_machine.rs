// Atomic work-order transitions.
// Every mutation is one unit of work: compare-and-set on the state row plus
// one history append, committed together or not at all.

use chrono::{DateTime, SubsecRound, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Instrument};

use super::errors::{ErrorKind, WorkflowError};
use super::graph::StateGraph;
use super::state::WorkflowState;
use super::types::{ItemsQuery, StateRow, TenantId, TransitionRecord, WorkOrderId};
use crate::config::EngineConfig;
use crate::observability::EngineMetrics;
use crate::store::{StoreError, WorkflowStore};
use crate::telemetry::{create_workflow_span, generate_correlation_id};

/// Runtime limits for a [`WorkflowEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub operation_timeout: Duration,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            operation_timeout: config.operation_timeout(),
            default_page_size: config.default_page_size.max(1),
            max_page_size: config.max_page_size.max(config.default_page_size).max(1),
        }
    }
}

/// Workflow state engine for one tenant-scoped store.
///
/// Cloning is cheap; clones share the store and metrics. There is no
/// engine-level lock: concurrent transitions of the same work order are
/// arbitrated by the store's compare-and-set, and the loser gets
/// [`WorkflowError::Conflict`]. The engine never retries on its own.
pub struct WorkflowEngine<S> {
    store: Arc<S>,
    settings: EngineSettings,
    metrics: Arc<EngineMetrics>,
}

impl<S> Clone for WorkflowEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            settings: self.settings.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<S> std::fmt::Debug for WorkflowEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("settings", &self.settings)
            .field("metrics", &self.metrics.get_stats())
            .finish()
    }
}

impl<S: WorkflowStore> WorkflowEngine<S> {
    pub fn new(store: S) -> Self {
        Self::from_shared(Arc::new(store), EngineSettings::default())
    }

    pub fn from_shared(store: Arc<S>, settings: EngineSettings) -> Self {
        Self {
            store,
            settings,
            metrics: Arc::new(EngineMetrics::new()),
        }
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub fn tenant(&self) -> &TenantId {
        self.store.tenant()
    }

    /// Create the state row in `Received` together with its creation record.
    ///
    /// Called once, when the owning received-item record is created.
    pub async fn register_work_order(
        &self,
        work_order: &WorkOrderId,
        actor: &str,
        notes: &str,
    ) -> Result<TransitionRecord, WorkflowError> {
        let operation = "register_work_order";
        let span = self.span(operation, Some(work_order));
        let result = async {
            let (tx, staged, record) = self
                .bounded(operation, async {
                    let record = TransitionRecord {
                        work_order: work_order.clone(),
                        from_state: None,
                        to_state: WorkflowState::INITIAL,
                        actor: actor.to_string(),
                        notes: notes.to_string(),
                        occurred_at: next_timestamp(None),
                    };

                    let mut tx = self.store.begin().await?;
                    let staged = self.stage_creation(&mut tx, &record).await;
                    Ok::<_, WorkflowError>((tx, staged, record))
                })
                .await?;
            // Commit is outside the deadline: a Timeout always means nothing was written.
            self.finish_unit(tx, staged).await?;

            info!(
                work_order = %work_order,
                state = %record.to_state,
                actor = %record.actor,
                "Work order registered"
            );
            Ok::<_, WorkflowError>(record)
        }
        .instrument(span)
        .await;

        if result.is_ok() {
            self.metrics.record_registration();
        }
        self.observe(operation, result)
    }

    pub async fn current_state(&self, work_order: &WorkOrderId) -> Result<WorkflowState, WorkflowError> {
        self.current_row(work_order).await.map(|row| row.state)
    }

    /// Current state together with its version token and last update time.
    pub async fn current_row(&self, work_order: &WorkOrderId) -> Result<StateRow, WorkflowError> {
        let operation = "current_state";
        self.metrics.record_read();
        let result = self
            .bounded(operation, async {
                self.store.get(work_order).await.map_err(WorkflowError::from)
            })
            .instrument(self.span(operation, Some(work_order)))
            .await;
        self.observe(operation, result)
    }

    /// Dry run of [`transition_to`](Self::transition_to): same checks, no writes.
    pub async fn validate_transition(
        &self,
        work_order: &WorkOrderId,
        target: WorkflowState,
    ) -> Result<(), WorkflowError> {
        let operation = "validate_transition";
        self.metrics.record_read();
        let result = self
            .bounded(operation, async {
                let row = self.store.get(work_order).await?;
                check_transition(&row, target)
            })
            .instrument(self.span(operation, Some(work_order)))
            .await;
        self.observe(operation, result)
    }

    /// Move a work order one edge forward.
    ///
    /// Reads `(state, version)`, validates the edge, then commits the
    /// compare-and-set and the history append as one unit of work.
    pub async fn transition_to(
        &self,
        work_order: &WorkOrderId,
        target: WorkflowState,
        actor: &str,
        notes: &str,
    ) -> Result<TransitionRecord, WorkflowError> {
        let operation = "transition_to";
        let span = self.span(operation, Some(work_order));
        let result = async {
            let (tx, staged, row, record) = self
                .bounded(operation, async {
                    let row = self.store.get(work_order).await?;
                    check_transition(&row, target)?;

                    let record = TransitionRecord {
                        work_order: work_order.clone(),
                        from_state: Some(row.state),
                        to_state: target,
                        actor: actor.to_string(),
                        notes: notes.to_string(),
                        occurred_at: next_timestamp(Some(row.updated_at)),
                    };

                    let mut tx = self.store.begin().await?;
                    let staged = self.stage_transition(&mut tx, &row, &record).await;
                    Ok::<_, WorkflowError>((tx, staged, row, record))
                })
                .await?;
            self.finish_unit(tx, staged).await?;

            info!(
                work_order = %work_order,
                from = %row.state,
                to = %target,
                version = row.version + 1,
                actor = %record.actor,
                "Work order transitioned"
            );
            Ok::<_, WorkflowError>(record)
        }
        .instrument(span)
        .await;

        if result.is_ok() {
            self.metrics.record_commit();
        }
        self.observe(operation, result)
    }

    /// Full lifecycle of a work order, oldest first.
    pub async fn state_history(
        &self,
        work_order: &WorkOrderId,
    ) -> Result<Vec<TransitionRecord>, WorkflowError> {
        let operation = "state_history";
        self.metrics.record_read();
        let result = self
            .bounded(operation, async {
                let records = self.store.list(work_order).await?;
                // Every known work order has at least its creation record.
                if records.is_empty() {
                    return Err(WorkflowError::NotFound {
                        work_order: work_order.clone(),
                    });
                }
                Ok::<_, WorkflowError>(records)
            })
            .instrument(self.span(operation, Some(work_order)))
            .await;
        self.observe(operation, result)
    }

    /// Work orders currently in `state`.
    pub async fn items_by_state(
        &self,
        state: WorkflowState,
        query: ItemsQuery,
    ) -> Result<Vec<WorkOrderId>, WorkflowError> {
        let operation = "items_by_state";
        self.metrics.record_read();
        let query = self.resolve_query(query);
        let result = self
            .bounded(operation, async {
                self.store
                    .list_by_state(state, &query)
                    .await
                    .map_err(WorkflowError::from)
            })
            .instrument(self.span(operation, None))
            .await;
        self.observe(operation, result)
    }

    /// Apply page-size defaults: limit 0 means the default, anything above the
    /// maximum is clamped.
    pub fn resolve_query(&self, query: ItemsQuery) -> ItemsQuery {
        let limit = match query.limit {
            0 => self.settings.default_page_size,
            limit => limit.min(self.settings.max_page_size),
        };
        ItemsQuery { limit, ..query }
    }

    async fn stage_creation(
        &self,
        tx: &mut S::Tx,
        record: &TransitionRecord,
    ) -> Result<(), StoreError> {
        self.store
            .create(tx, &record.work_order, record.to_state, record.occurred_at)
            .await?;
        self.store.append(tx, record).await
    }

    async fn stage_transition(
        &self,
        tx: &mut S::Tx,
        row: &StateRow,
        record: &TransitionRecord,
    ) -> Result<(), StoreError> {
        self.store
            .compare_and_set(tx, &row.work_order, row.version, record.to_state, record.occurred_at)
            .await?;
        self.store.append(tx, record).await
    }

    /// Commit when staging succeeded, otherwise roll back and return the staging error.
    async fn finish_unit(&self, tx: S::Tx, staged: Result<(), StoreError>) -> Result<(), StoreError> {
        match staged {
            Ok(()) => self.store.commit(tx).await,
            Err(err) => {
                if let Err(rollback_err) = self.store.rollback(tx).await {
                    warn!(error = %rollback_err, "Rollback failed after aborted unit of work");
                }
                Err(err)
            }
        }
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, WorkflowError>
    where
        F: Future<Output = Result<T, WorkflowError>>,
    {
        let limit = self.settings.operation_timeout;
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(WorkflowError::Timeout {
                operation,
                duration_ms: limit.as_millis() as u64,
            }),
        }
    }

    fn span(&self, operation: &str, work_order: Option<&WorkOrderId>) -> tracing::Span {
        create_workflow_span(
            operation,
            self.tenant().as_str(),
            work_order.map(|id| id.as_str()),
            &generate_correlation_id(),
        )
    }

    fn observe<T>(&self, operation: &'static str, result: Result<T, WorkflowError>) -> Result<T, WorkflowError> {
        if let Err(err) = &result {
            if let WorkflowError::AlreadyExists { .. } = err {
                warn!(operation, error = %err, "Duplicate registration rejected");
                return result;
            }
            match err.kind() {
                ErrorKind::InvalidTransition | ErrorKind::TerminalState
                    if operation == "validate_transition" =>
                {
                    self.metrics.record_validation_denied();
                    info!(operation, error = %err, "Transition would be rejected");
                }
                ErrorKind::InvalidTransition | ErrorKind::TerminalState => {
                    self.metrics.record_rejection();
                    warn!(operation, error = %err, "Transition rejected");
                }
                ErrorKind::Conflict => {
                    self.metrics.record_conflict();
                    warn!(operation, error = %err, "Lost optimistic concurrency race");
                }
                ErrorKind::StoreUnavailable => {
                    self.metrics.record_store_failure();
                    error!(operation, error = %err, "Workflow store failure");
                }
                ErrorKind::NotFound => {
                    info!(operation, error = %err, "Unknown work order");
                }
            }
        }
        result
    }
}

/// Terminal check first, then the graph.
fn check_transition(row: &StateRow, target: WorkflowState) -> Result<(), WorkflowError> {
    if StateGraph::is_terminal(row.state) {
        return Err(WorkflowError::TerminalState {
            work_order: row.work_order.clone(),
            state: row.state,
            target,
        });
    }
    StateGraph::validate(row.state, target)
}

/// Wall clock truncated to microseconds, never earlier than `after`.
fn next_timestamp(after: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now().trunc_subsecs(6);
    match after {
        Some(previous) if previous > now => previous,
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{FailurePoint, MemoryStore};
    use chrono::Duration as ChronoDuration;

    fn engine() -> WorkflowEngine<MemoryStore> {
        WorkflowEngine::new(MemoryStore::default())
    }

    fn wo(id: &str) -> WorkOrderId {
        WorkOrderId::new(id)
    }

    #[test]
    fn next_timestamp_never_goes_backwards() {
        let future = Utc::now() + ChronoDuration::hours(1);
        assert_eq!(next_timestamp(Some(future)), future);

        let past = Utc::now() - ChronoDuration::hours(1);
        assert!(next_timestamp(Some(past)) > past);
        assert_eq!(next_timestamp(None).timestamp_subsec_nanos() % 1_000, 0);
    }

    #[test]
    fn terminal_check_precedes_graph_check() {
        let row = StateRow {
            work_order: wo("WO-1"),
            state: WorkflowState::Completed,
            version: 6,
            updated_at: Utc::now(),
        };
        assert!(matches!(
            check_transition(&row, WorkflowState::Received),
            Err(WorkflowError::TerminalState { .. })
        ));
    }

    #[test]
    fn settings_come_from_engine_config() {
        let config = EngineConfig {
            operation_timeout_ms: 1_500,
            default_page_size: 0,
            max_page_size: 0,
        };
        let settings = EngineSettings::from(&config);
        assert_eq!(settings.operation_timeout, Duration::from_millis(1_500));
        assert_eq!(settings.default_page_size, 1);
        assert_eq!(settings.max_page_size, 1);
    }

    #[test]
    fn resolve_query_applies_defaults_and_clamps() {
        let engine = engine().with_settings(EngineSettings {
            operation_timeout: Duration::from_secs(1),
            default_page_size: 25,
            max_page_size: 100,
        });
        assert_eq!(engine.resolve_query(ItemsQuery::new(0, 5)).limit, 25);
        assert_eq!(engine.resolve_query(ItemsQuery::new(1_000, 0)).limit, 100);
        assert_eq!(engine.resolve_query(ItemsQuery::new(10, 3)).offset, 3);
    }

    #[tokio::test]
    async fn registration_failure_leaves_no_row() {
        let engine = engine();
        engine.store().fail_next(FailurePoint::Append);

        let err = engine
            .register_work_order(&wo("WO-1"), "receiving", "")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
        assert!(matches!(
            engine.current_state(&wo("WO-1")).await,
            Err(WorkflowError::NotFound { .. })
        ));
        assert_eq!(engine.metrics().get_stats().store_failures, 1);
    }

    #[tokio::test]
    async fn metrics_track_outcomes() {
        let engine = engine();
        engine.register_work_order(&wo("WO-1"), "receiving", "").await.unwrap();
        engine
            .transition_to(&wo("WO-1"), WorkflowState::Inspection, "alice", "")
            .await
            .unwrap();
        let _ = engine
            .transition_to(&wo("WO-1"), WorkflowState::Shipped, "alice", "")
            .await;

        let stats = engine.metrics().get_stats();
        assert_eq!(stats.work_orders_registered, 1);
        assert_eq!(stats.transitions_committed, 1);
        assert_eq!(stats.transitions_rejected, 1);
        assert_eq!(stats.validations_denied, 0);
    }

    #[tokio::test]
    async fn denied_validation_is_not_a_rejected_transition() {
        let engine = engine();
        engine.register_work_order(&wo("WO-1"), "receiving", "").await.unwrap();

        assert!(engine
            .validate_transition(&wo("WO-1"), WorkflowState::Shipped)
            .await
            .is_err());
        engine
            .validate_transition(&wo("WO-1"), WorkflowState::Inspection)
            .await
            .unwrap();

        let stats = engine.metrics().get_stats();
        assert_eq!(stats.validations_denied, 1);
        assert_eq!(stats.transitions_rejected, 0);
    }
}
