//! Persistence interface for the workflow engine.
//!
//! A store handle is already scoped to one tenant. It exposes two logical
//! tables, current state and transition history, that share one unit of
//! work so a transition is a single all-or-nothing commit.
//!
//! ## Unit of work
//!
//! 1. `begin()` opens a transaction and returns `Self::Tx`
//! 2. mutating calls take `&mut Self::Tx`
//! 3. `commit(tx)` makes every staged write durable, or none of them
//!
//! Dropping a `Tx` without committing discards its writes.
//!
//! ## Optimistic concurrency
//!
//! `compare_and_set` succeeds only while the stored version equals the
//! caller's expected version. A lost race is reported as
//! [`StoreError::Conflict`], either from `compare_and_set` itself or from
//! `commit` when another unit of work committed first.

pub mod conformance;
pub mod memory;
#[cfg(feature = "database")]
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::workflows::{ItemsQuery, StateRow, TenantId, TransitionRecord, WorkOrderId, WorkflowState};

pub use memory::MemoryStore;
#[cfg(feature = "database")]
pub use sqlite::SqliteStore;

/// Errors surfaced by store implementations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("no state row for work order {work_order}")]
    NotFound { work_order: WorkOrderId },

    #[error("version conflict on work order {work_order}: expected version {expected_version}")]
    Conflict {
        work_order: WorkOrderId,
        expected_version: i64,
    },

    #[error("work order {work_order} already has a state row")]
    AlreadyExists { work_order: WorkOrderId },

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Transaction scope shared by the state store and history log.
#[async_trait]
pub trait UnitOfWork: Send + Sync + 'static {
    type Tx: Send;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError>;

    async fn rollback(&self, tx: Self::Tx) -> Result<(), StoreError>;
}

/// Single current state per work order.
#[async_trait]
pub trait StateStore: UnitOfWork {
    /// Tenant this handle is bound to.
    fn tenant(&self) -> &TenantId;

    /// Committed state row. Never blocks on in-flight units of work.
    async fn get(&self, work_order: &WorkOrderId) -> Result<StateRow, StoreError>;

    /// Insert the first row for a work order at version 1.
    async fn create(
        &self,
        tx: &mut Self::Tx,
        work_order: &WorkOrderId,
        state: WorkflowState,
        at: DateTime<Utc>,
    ) -> Result<StateRow, StoreError>;

    /// Conditional write; returns the new version.
    async fn compare_and_set(
        &self,
        tx: &mut Self::Tx,
        work_order: &WorkOrderId,
        expected_version: i64,
        new_state: WorkflowState,
        at: DateTime<Utc>,
    ) -> Result<i64, StoreError>;

    /// Work orders currently in `state`, paginated per `query`.
    ///
    /// `query.limit` has already been resolved by the caller and is never 0.
    async fn list_by_state(
        &self,
        state: WorkflowState,
        query: &ItemsQuery,
    ) -> Result<Vec<WorkOrderId>, StoreError>;
}

/// Append-only transition ledger.
#[async_trait]
pub trait HistoryLog: UnitOfWork {
    async fn append(&self, tx: &mut Self::Tx, record: &TransitionRecord) -> Result<(), StoreError>;

    /// Committed records ordered by `occurred_at`, then insertion order.
    async fn list(&self, work_order: &WorkOrderId) -> Result<Vec<TransitionRecord>, StoreError>;
}

/// Everything the engine needs from a tenant-scoped persistence handle.
pub trait WorkflowStore: StateStore + HistoryLog {}

impl<T: StateStore + HistoryLog> WorkflowStore for T {}
