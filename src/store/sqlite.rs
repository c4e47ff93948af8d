//! SQLite-backed store. One database can hold many tenants; each
//! `SqliteStore` only ever reads and writes rows for its own `tenant_id`.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::debug;

use super::{HistoryLog, StateStore, StoreError, UnitOfWork};
use crate::workflows::{
    ItemOrder, ItemsQuery, StateRow, TenantId, TransitionRecord, WorkOrderId, WorkflowState,
};

/// SQLite primary and extended result codes for lock contention.
const CONTENTION_CODES: [&str; 5] = ["5", "6", "261", "262", "517"];

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

fn is_contention(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err
            .code()
            .as_deref()
            .map(|code| CONTENTION_CODES.contains(&code))
            .unwrap_or(false),
        _ => false,
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

fn encode_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend(format!("bad timestamp '{value}': {e}")))
}

fn decode_state(value: &str) -> Result<WorkflowState, StoreError> {
    value
        .parse()
        .map_err(|e| StoreError::Backend(format!("corrupt state column: {e}")))
}

/// Open SQLite transaction plus the CAS guard it holds, if any.
pub struct SqliteTx {
    inner: Transaction<'static, Sqlite>,
    guard: Option<(WorkOrderId, i64)>,
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    tenant: TenantId,
}

impl SqliteStore {
    /// The pool must already have the workflow migrations applied.
    pub fn new(pool: SqlitePool, tenant: TenantId) -> Self {
        Self { pool, tenant }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Translate a write failure, treating lock contention as a lost race.
    fn write_error(err: sqlx::Error, guard: Option<&(WorkOrderId, i64)>) -> StoreError {
        match guard {
            Some((work_order, expected_version)) if is_contention(&err) => StoreError::Conflict {
                work_order: work_order.clone(),
                expected_version: *expected_version,
            },
            _ => StoreError::from(err),
        }
    }
}

#[async_trait]
impl UnitOfWork for SqliteStore {
    type Tx = SqliteTx;

    async fn begin(&self) -> Result<SqliteTx, StoreError> {
        let inner = self.pool.begin().await?;
        Ok(SqliteTx { inner, guard: None })
    }

    async fn commit(&self, tx: SqliteTx) -> Result<(), StoreError> {
        let SqliteTx { inner, guard } = tx;
        inner
            .commit()
            .await
            .map_err(|e| Self::write_error(e, guard.as_ref()))?;
        debug!(tenant = %self.tenant, "sqlite unit of work committed");
        Ok(())
    }

    async fn rollback(&self, tx: SqliteTx) -> Result<(), StoreError> {
        tx.inner.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    async fn get(&self, work_order: &WorkOrderId) -> Result<StateRow, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT state, version, updated_at
            FROM workflow_states
            WHERE tenant_id = ?1 AND work_order = ?2
            "#,
        )
        .bind(self.tenant.as_str())
        .bind(work_order.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Err(StoreError::NotFound {
                work_order: work_order.clone(),
            });
        };

        let state: String = row.try_get("state")?;
        let version: i64 = row.try_get("version")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(StateRow {
            work_order: work_order.clone(),
            state: decode_state(&state)?,
            version,
            updated_at: decode_timestamp(&updated_at)?,
        })
    }

    async fn create(
        &self,
        tx: &mut SqliteTx,
        work_order: &WorkOrderId,
        state: WorkflowState,
        at: DateTime<Utc>,
    ) -> Result<StateRow, StoreError> {
        let stamp = encode_timestamp(at);
        let result = sqlx::query(
            r#"
            INSERT INTO workflow_states (tenant_id, work_order, state, version, created_at, updated_at)
            VALUES (?1, ?2, ?3, 1, ?4, ?5)
            "#,
        )
        .bind(self.tenant.as_str())
        .bind(work_order.as_str())
        .bind(state.as_str())
        .bind(&stamp)
        .bind(&stamp)
        .execute(&mut *tx.inner)
        .await;

        match result {
            Ok(_) => Ok(StateRow {
                work_order: work_order.clone(),
                state,
                version: 1,
                updated_at: at,
            }),
            Err(err) if is_unique_violation(&err) => Err(StoreError::AlreadyExists {
                work_order: work_order.clone(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    async fn compare_and_set(
        &self,
        tx: &mut SqliteTx,
        work_order: &WorkOrderId,
        expected_version: i64,
        new_state: WorkflowState,
        at: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let guard = (work_order.clone(), expected_version);

        // The conditional UPDATE is the first statement of the transaction, so
        // the write lock is taken before any read snapshot exists.
        let result = sqlx::query(
            r#"
            UPDATE workflow_states
            SET state = ?1, version = version + 1, updated_at = ?2
            WHERE tenant_id = ?3 AND work_order = ?4 AND version = ?5
            "#,
        )
        .bind(new_state.as_str())
        .bind(encode_timestamp(at))
        .bind(self.tenant.as_str())
        .bind(work_order.as_str())
        .bind(expected_version)
        .execute(&mut *tx.inner)
        .await
        .map_err(|e| Self::write_error(e, Some(&guard)))?;

        if result.rows_affected() == 1 {
            tx.guard = Some(guard);
            return Ok(expected_version + 1);
        }

        let exists = sqlx::query(
            "SELECT version FROM workflow_states WHERE tenant_id = ?1 AND work_order = ?2",
        )
        .bind(self.tenant.as_str())
        .bind(work_order.as_str())
        .fetch_optional(&mut *tx.inner)
        .await?;

        match exists {
            None => Err(StoreError::NotFound {
                work_order: work_order.clone(),
            }),
            Some(_) => Err(StoreError::Conflict {
                work_order: work_order.clone(),
                expected_version,
            }),
        }
    }

    async fn list_by_state(
        &self,
        state: WorkflowState,
        query: &ItemsQuery,
    ) -> Result<Vec<WorkOrderId>, StoreError> {
        let sql = match query.order {
            ItemOrder::WorkOrder => {
                r#"
                SELECT work_order FROM workflow_states
                WHERE tenant_id = ?1 AND state = ?2
                ORDER BY work_order ASC
                LIMIT ?3 OFFSET ?4
                "#
            }
            ItemOrder::RecentTransition => {
                r#"
                SELECT work_order FROM workflow_states
                WHERE tenant_id = ?1 AND state = ?2
                ORDER BY updated_at DESC, work_order ASC
                LIMIT ?3 OFFSET ?4
                "#
            }
        };

        let rows = sqlx::query(sql)
            .bind(self.tenant.as_str())
            .bind(state.as_str())
            .bind(i64::from(query.limit))
            .bind(i64::from(query.offset))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| {
                row.try_get::<String, _>("work_order")
                    .map(WorkOrderId::new)
                    .map_err(StoreError::from)
            })
            .collect()
    }
}

#[async_trait]
impl HistoryLog for SqliteStore {
    async fn append(&self, tx: &mut SqliteTx, record: &TransitionRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO workflow_transitions
                (tenant_id, work_order, from_state, to_state, actor, notes, occurred_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(self.tenant.as_str())
        .bind(record.work_order.as_str())
        .bind(record.from_state.map(|state| state.as_str()))
        .bind(record.to_state.as_str())
        .bind(&record.actor)
        .bind(&record.notes)
        .bind(encode_timestamp(record.occurred_at))
        .execute(&mut *tx.inner)
        .await
        .map_err(|e| Self::write_error(e, tx.guard.as_ref()))?;
        Ok(())
    }

    async fn list(&self, work_order: &WorkOrderId) -> Result<Vec<TransitionRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT from_state, to_state, actor, notes, occurred_at
            FROM workflow_transitions
            WHERE tenant_id = ?1 AND work_order = ?2
            ORDER BY occurred_at ASC, id ASC
            "#,
        )
        .bind(self.tenant.as_str())
        .bind(work_order.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let from_state: Option<String> = row.try_get("from_state")?;
            let to_state: String = row.try_get("to_state")?;
            let occurred_at: String = row.try_get("occurred_at")?;
            records.push(TransitionRecord {
                work_order: work_order.clone(),
                from_state: from_state.as_deref().map(decode_state).transpose()?,
                to_state: decode_state(&to_state)?,
                actor: row.try_get("actor")?,
                notes: row.try_get("notes")?,
                occurred_at: decode_timestamp(&occurred_at)?,
            });
        }
        Ok(records)
    }
}
