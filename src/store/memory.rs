//! In-process store. Every tenant gets its own `MemoryStore`; clones share data.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use super::{HistoryLog, StateStore, StoreError, UnitOfWork};
use crate::workflows::{
    ItemOrder, ItemsQuery, StateRow, TenantId, TransitionRecord, WorkOrderId, WorkflowState,
};

#[derive(Debug, Default)]
struct Tables {
    states: BTreeMap<WorkOrderId, StateRow>,
    history: BTreeMap<WorkOrderId, Vec<TransitionRecord>>,
}

/// Store operations that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    Begin,
    Create,
    CompareAndSet,
    Append,
    Commit,
    Read,
}

#[derive(Debug, Clone)]
enum StagedWrite {
    Create(StateRow),
    Set { expected_version: i64, row: StateRow },
    Append(TransitionRecord),
}

/// Uncommitted writes of one unit of work.
#[derive(Debug, Default)]
pub struct MemoryTx {
    writes: Vec<StagedWrite>,
}

impl MemoryTx {
    fn staged_row(&self, work_order: &WorkOrderId) -> Option<&StateRow> {
        self.writes.iter().rev().find_map(|write| match write {
            StagedWrite::Create(row) | StagedWrite::Set { row, .. } if &row.work_order == work_order => {
                Some(row)
            }
            _ => None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MemoryStore {
    tenant: TenantId,
    tables: Arc<Mutex<Tables>>,
    failures: Arc<Mutex<Vec<FailurePoint>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(TenantId::new("default"))
    }
}

impl MemoryStore {
    pub fn new(tenant: TenantId) -> Self {
        Self {
            tenant,
            tables: Arc::new(Mutex::new(Tables::default())),
            failures: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Make the next call reaching `point` fail with a backend error.
    pub fn fail_next(&self, point: FailurePoint) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push(point);
        }
    }

    /// Number of work orders with a state row.
    pub fn len(&self) -> usize {
        self.tables.lock().map(|tables| tables.states.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }

    fn check_failure(&self, point: FailurePoint) -> Result<(), StoreError> {
        let mut failures = self
            .failures
            .lock()
            .map_err(|_| StoreError::Backend("failure registry lock poisoned".to_string()))?;
        if let Some(index) = failures.iter().position(|candidate| *candidate == point) {
            failures.remove(index);
            return Err(StoreError::Backend(format!("injected failure at {point:?}")));
        }
        Ok(())
    }

    fn committed_row(&self, work_order: &WorkOrderId) -> Result<Option<StateRow>, StoreError> {
        Ok(self.tables()?.states.get(work_order).cloned())
    }
}

#[async_trait]
impl UnitOfWork for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, StoreError> {
        self.check_failure(FailurePoint::Begin)?;
        Ok(MemoryTx::default())
    }

    async fn commit(&self, tx: MemoryTx) -> Result<(), StoreError> {
        self.check_failure(FailurePoint::Commit)?;

        let mut tables = self.tables()?;

        // Validate every write against committed data before applying any.
        let mut overlay: HashMap<WorkOrderId, StateRow> = HashMap::new();
        let mut appends = Vec::new();
        for write in tx.writes {
            match write {
                StagedWrite::Create(row) => {
                    if overlay.contains_key(&row.work_order)
                        || tables.states.contains_key(&row.work_order)
                    {
                        return Err(StoreError::AlreadyExists {
                            work_order: row.work_order,
                        });
                    }
                    overlay.insert(row.work_order.clone(), row);
                }
                StagedWrite::Set {
                    expected_version,
                    row,
                } => {
                    let current = overlay
                        .get(&row.work_order)
                        .or_else(|| tables.states.get(&row.work_order))
                        .map(|current| current.version);
                    match current {
                        None => {
                            return Err(StoreError::NotFound {
                                work_order: row.work_order,
                            })
                        }
                        Some(version) if version != expected_version => {
                            return Err(StoreError::Conflict {
                                work_order: row.work_order,
                                expected_version,
                            })
                        }
                        Some(_) => {
                            overlay.insert(row.work_order.clone(), row);
                        }
                    }
                }
                StagedWrite::Append(record) => appends.push(record),
            }
        }

        let rows = overlay.len();
        for (work_order, row) in overlay {
            tables.states.insert(work_order, row);
        }
        let records = appends.len();
        for record in appends {
            tables
                .history
                .entry(record.work_order.clone())
                .or_default()
                .push(record);
        }

        debug!(tenant = %self.tenant, rows, records, "memory unit of work committed");
        Ok(())
    }

    async fn rollback(&self, tx: MemoryTx) -> Result<(), StoreError> {
        debug!(tenant = %self.tenant, discarded = tx.writes.len(), "memory unit of work rolled back");
        Ok(())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    async fn get(&self, work_order: &WorkOrderId) -> Result<StateRow, StoreError> {
        self.check_failure(FailurePoint::Read)?;
        self.committed_row(work_order)?
            .ok_or_else(|| StoreError::NotFound {
                work_order: work_order.clone(),
            })
    }

    async fn create(
        &self,
        tx: &mut MemoryTx,
        work_order: &WorkOrderId,
        state: WorkflowState,
        at: DateTime<Utc>,
    ) -> Result<StateRow, StoreError> {
        self.check_failure(FailurePoint::Create)?;
        if tx.staged_row(work_order).is_some() || self.committed_row(work_order)?.is_some() {
            return Err(StoreError::AlreadyExists {
                work_order: work_order.clone(),
            });
        }
        let row = StateRow {
            work_order: work_order.clone(),
            state,
            version: 1,
            updated_at: at,
        };
        tx.writes.push(StagedWrite::Create(row.clone()));
        Ok(row)
    }

    async fn compare_and_set(
        &self,
        tx: &mut MemoryTx,
        work_order: &WorkOrderId,
        expected_version: i64,
        new_state: WorkflowState,
        at: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        self.check_failure(FailurePoint::CompareAndSet)?;
        let current = match tx.staged_row(work_order) {
            Some(row) => Some(row.version),
            None => self.committed_row(work_order)?.map(|row| row.version),
        };
        match current {
            None => Err(StoreError::NotFound {
                work_order: work_order.clone(),
            }),
            Some(version) if version != expected_version => Err(StoreError::Conflict {
                work_order: work_order.clone(),
                expected_version,
            }),
            Some(version) => {
                let new_version = version + 1;
                tx.writes.push(StagedWrite::Set {
                    expected_version,
                    row: StateRow {
                        work_order: work_order.clone(),
                        state: new_state,
                        version: new_version,
                        updated_at: at,
                    },
                });
                Ok(new_version)
            }
        }
    }

    async fn list_by_state(
        &self,
        state: WorkflowState,
        query: &ItemsQuery,
    ) -> Result<Vec<WorkOrderId>, StoreError> {
        self.check_failure(FailurePoint::Read)?;
        let tables = self.tables()?;
        let mut rows: Vec<&StateRow> = tables
            .states
            .values()
            .filter(|row| row.state == state)
            .collect();
        if query.order == ItemOrder::RecentTransition {
            rows.sort_by(|a, b| {
                b.updated_at
                    .cmp(&a.updated_at)
                    .then_with(|| a.work_order.cmp(&b.work_order))
            });
        }
        Ok(rows
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .map(|row| row.work_order.clone())
            .collect())
    }
}

#[async_trait]
impl HistoryLog for MemoryStore {
    async fn append(&self, tx: &mut MemoryTx, record: &TransitionRecord) -> Result<(), StoreError> {
        self.check_failure(FailurePoint::Append)?;
        tx.writes.push(StagedWrite::Append(record.clone()));
        Ok(())
    }

    async fn list(&self, work_order: &WorkOrderId) -> Result<Vec<TransitionRecord>, StoreError> {
        self.check_failure(FailurePoint::Read)?;
        let mut records = self
            .tables()?
            .history
            .get(work_order)
            .cloned()
            .unwrap_or_default();
        // Stable sort keeps insertion order for equal timestamps.
        records.sort_by_key(|record| record.occurred_at);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wo(id: &str) -> WorkOrderId {
        WorkOrderId::new(id)
    }

    async fn seeded(store: &MemoryStore, id: &str) {
        let mut tx = store.begin().await.unwrap();
        store
            .create(&mut tx, &wo(id), WorkflowState::Received, Utc::now())
            .await
            .unwrap();
        store.commit(tx).await.unwrap();
    }

    #[tokio::test]
    async fn uncommitted_writes_are_invisible() {
        let store = MemoryStore::default();
        let mut tx = store.begin().await.unwrap();
        store
            .create(&mut tx, &wo("WO-1"), WorkflowState::Received, Utc::now())
            .await
            .unwrap();

        assert!(matches!(
            store.get(&wo("WO-1")).await,
            Err(StoreError::NotFound { .. })
        ));
        drop(tx);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn compare_and_set_bumps_version() {
        let store = MemoryStore::default();
        seeded(&store, "WO-1").await;

        let mut tx = store.begin().await.unwrap();
        let version = store
            .compare_and_set(&mut tx, &wo("WO-1"), 1, WorkflowState::Inspection, Utc::now())
            .await
            .unwrap();
        store.commit(tx).await.unwrap();

        assert_eq!(version, 2);
        let row = store.get(&wo("WO-1")).await.unwrap();
        assert_eq!(row.state, WorkflowState::Inspection);
        assert_eq!(row.version, 2);
    }

    #[tokio::test]
    async fn stale_version_conflicts_at_stage_time() {
        let store = MemoryStore::default();
        seeded(&store, "WO-1").await;

        let mut tx = store.begin().await.unwrap();
        let err = store
            .compare_and_set(&mut tx, &wo("WO-1"), 7, WorkflowState::Inspection, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::Conflict {
                work_order: wo("WO-1"),
                expected_version: 7
            }
        );
    }

    #[tokio::test]
    async fn second_commit_of_same_version_conflicts() {
        let store = MemoryStore::default();
        seeded(&store, "WO-1").await;

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        store
            .compare_and_set(&mut first, &wo("WO-1"), 1, WorkflowState::Inspection, Utc::now())
            .await
            .unwrap();
        store
            .compare_and_set(&mut second, &wo("WO-1"), 1, WorkflowState::Inspection, Utc::now())
            .await
            .unwrap();

        store.commit(first).await.unwrap();
        let err = store.commit(second).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { expected_version: 1, .. }));
        assert_eq!(store.get(&wo("WO-1")).await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn failed_commit_applies_nothing() {
        let store = MemoryStore::default();
        seeded(&store, "WO-1").await;

        let mut tx = store.begin().await.unwrap();
        store
            .compare_and_set(&mut tx, &wo("WO-1"), 1, WorkflowState::Inspection, Utc::now())
            .await
            .unwrap();
        store
            .append(
                &mut tx,
                &TransitionRecord {
                    work_order: wo("WO-1"),
                    from_state: Some(WorkflowState::Received),
                    to_state: WorkflowState::Inspection,
                    actor: "alice".into(),
                    notes: String::new(),
                    occurred_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        store.fail_next(FailurePoint::Commit);

        assert!(matches!(store.commit(tx).await, Err(StoreError::Backend(_))));
        assert_eq!(store.get(&wo("WO-1")).await.unwrap().state, WorkflowState::Received);
        assert!(store.list(&wo("WO-1")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn injected_failures_fire_once() {
        let store = MemoryStore::default();
        store.fail_next(FailurePoint::Begin);
        assert!(store.begin().await.is_err());
        assert!(store.begin().await.is_ok());
    }

    #[tokio::test]
    async fn list_by_state_paginates_in_id_order() {
        let store = MemoryStore::default();
        for id in ["WO-3", "WO-1", "WO-2", "WO-4"] {
            seeded(&store, id).await;
        }

        let page = store
            .list_by_state(WorkflowState::Received, &ItemsQuery::new(2, 1))
            .await
            .unwrap();
        assert_eq!(page, vec![wo("WO-2"), wo("WO-3")]);

        let empty = store
            .list_by_state(WorkflowState::Inspection, &ItemsQuery::new(10, 0))
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn clones_share_tables() {
        let store = MemoryStore::new(TenantId::new("yard-a"));
        let other = store.clone();
        seeded(&store, "WO-1").await;
        assert_eq!(other.len(), 1);
        assert_eq!(other.tenant().as_str(), "yard-a");
    }
}
