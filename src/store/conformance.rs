//! Backend-agnostic checks for [`WorkflowStore`] implementations.
//!
//! Adapters call [`run_conformance_suite`] with a factory producing a fresh,
//! empty store per check:
//!
//! ```ignore
//! use yardflow::store::{conformance::run_conformance_suite, MemoryStore};
//!
//! #[tokio::test(flavor = "multi_thread")]
//! async fn memory_conformance() {
//!     let report = run_conformance_suite(|| async { MemoryStore::default() }).await;
//!     assert_eq!(report.failed, 0, "{report}");
//! }
//! ```
//!
//! Stores handed to the suite must be safe to share across spawned tasks.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use super::{StoreError, WorkflowStore};
use crate::workflows::{ItemOrder, ItemsQuery, TransitionRecord, WorkOrderId, WorkflowState};

/// Tasks racing on one work order in the concurrency checks.
const RACERS: usize = 8;

/// Outcome of one conformance check.
#[derive(Debug, Clone)]
pub struct TestResult {
    pub category: String,
    pub name: String,
    pub passed: bool,
    pub message: Option<String>,
}

impl TestResult {
    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        let (passed, message) = match result {
            Ok(()) => (true, None),
            Err(msg) => (false, Some(msg)),
        };
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed,
            message,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl ConformanceReport {
    fn from_results(results: Vec<TestResult>) -> Self {
        let passed = results.iter().filter(|r| r.passed).count();
        let total = results.len();
        Self {
            results,
            passed,
            failed: total - passed,
            total,
        }
    }
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in self.results.iter().filter(|r| !r.passed) {
            writeln!(
                f,
                "  FAIL [{}/{}]: {}",
                r.category,
                r.name,
                r.message.as_deref().unwrap_or("(no message)")
            )?;
        }
        Ok(())
    }
}

macro_rules! check {
    ($results:ident, $category:literal, $name:ident, $factory:expr) => {
        $results.push(TestResult::from_result(
            $category,
            stringify!($name),
            $name($factory().await).await,
        ));
    };
}

/// Run every check, each against a fresh store from `factory`.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: WorkflowStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    check!(results, "create", create_starts_at_version_one, factory);
    check!(results, "create", duplicate_create_is_rejected, factory);
    check!(results, "create", missing_row_is_not_found, factory);

    check!(results, "unit_of_work", uncommitted_writes_are_invisible, factory);
    check!(results, "unit_of_work", rollback_discards_writes, factory);
    check!(results, "unit_of_work", dropped_tx_discards_writes, factory);
    check!(results, "unit_of_work", commit_applies_state_and_history_together, factory);

    check!(results, "cas", compare_and_set_bumps_version, factory);
    check!(results, "cas", stale_version_conflicts, factory);
    check!(results, "cas", interleaved_units_conflict, factory);
    check!(results, "cas", compare_and_set_on_missing_row_is_not_found, factory);

    check!(results, "history", history_preserves_order, factory);
    check!(results, "history", history_of_unknown_work_order_is_empty, factory);

    check!(results, "items", list_by_state_filters_and_paginates, factory);
    check!(results, "items", list_by_state_orders_by_recent_transition, factory);

    check!(results, "concurrent", concurrent_transitions_exactly_one_wins, factory);
    check!(results, "concurrent", concurrent_transitions_on_distinct_work_orders_all_succeed, factory);

    ConformanceReport::from_results(results)
}

/// Two handles on one backend bound to different tenants must not see each
/// other's rows, even for identical work-order ids.
pub async fn check_tenant_isolation<S: WorkflowStore>(first: &S, second: &S) -> ConformanceReport {
    let result = tenant_isolation(first, second).await;
    ConformanceReport::from_results(vec![TestResult::from_result(
        "tenant",
        "tenants_do_not_share_rows",
        result,
    )])
}

fn wo(id: &str) -> WorkOrderId {
    WorkOrderId::new(id)
}

fn stamp(offset_secs: i64) -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6) + Duration::seconds(offset_secs)
}

fn record(
    work_order: &WorkOrderId,
    from_state: Option<WorkflowState>,
    to_state: WorkflowState,
    at: DateTime<Utc>,
) -> TransitionRecord {
    TransitionRecord {
        work_order: work_order.clone(),
        from_state,
        to_state,
        actor: "conformance".to_string(),
        notes: String::new(),
        occurred_at: at,
    }
}

fn expect<T>(what: &str, result: Result<T, StoreError>) -> Result<T, String> {
    result.map_err(|e| format!("{what}: {e}"))
}

async fn seed<S: WorkflowStore>(store: &S, work_order: &WorkOrderId, at: DateTime<Utc>) -> Result<(), String> {
    let mut tx = expect("begin", store.begin().await)?;
    expect(
        "create",
        store.create(&mut tx, work_order, WorkflowState::Received, at).await,
    )?;
    expect(
        "append",
        store
            .append(&mut tx, &record(work_order, None, WorkflowState::Received, at))
            .await,
    )?;
    expect("commit", store.commit(tx).await)
}

/// One committed CAS plus history append from `from` at `version`.
async fn advance<S: WorkflowStore>(
    store: &S,
    work_order: &WorkOrderId,
    version: i64,
    from: WorkflowState,
    to: WorkflowState,
    at: DateTime<Utc>,
) -> Result<i64, StoreError> {
    let mut tx = store.begin().await?;
    let staged = async {
        let new_version = store.compare_and_set(&mut tx, work_order, version, to, at).await?;
        store.append(&mut tx, &record(work_order, Some(from), to, at)).await?;
        Ok::<_, StoreError>(new_version)
    }
    .await;
    match staged {
        Ok(new_version) => {
            store.commit(tx).await?;
            Ok(new_version)
        }
        Err(err) => {
            let _ = store.rollback(tx).await;
            Err(err)
        }
    }
}

fn ensure(condition: bool, message: impl FnOnce() -> String) -> Result<(), String> {
    if condition {
        Ok(())
    } else {
        Err(message())
    }
}

// create

async fn create_starts_at_version_one<S: WorkflowStore>(store: S) -> Result<(), String> {
    seed(&store, &wo("WO-1"), stamp(0)).await?;
    let row = expect("get", store.get(&wo("WO-1")).await)?;
    ensure(row.version == 1, || format!("expected version 1, got {}", row.version))?;
    ensure(row.state == WorkflowState::Received, || {
        format!("expected Received, got {}", row.state)
    })
}

async fn duplicate_create_is_rejected<S: WorkflowStore>(store: S) -> Result<(), String> {
    seed(&store, &wo("WO-1"), stamp(0)).await?;

    let mut tx = expect("begin", store.begin().await)?;
    let outcome = match store
        .create(&mut tx, &wo("WO-1"), WorkflowState::Received, stamp(1))
        .await
    {
        Ok(_) => store.commit(tx).await,
        Err(err) => {
            let _ = store.rollback(tx).await;
            Err(err)
        }
    };
    ensure(matches!(outcome, Err(StoreError::AlreadyExists { .. })), || {
        format!("expected AlreadyExists, got {outcome:?}")
    })
}

async fn missing_row_is_not_found<S: WorkflowStore>(store: S) -> Result<(), String> {
    let outcome = store.get(&wo("WO-404")).await;
    ensure(matches!(outcome, Err(StoreError::NotFound { .. })), || {
        format!("expected NotFound, got {outcome:?}")
    })
}

// unit of work

async fn uncommitted_writes_are_invisible<S: WorkflowStore>(store: S) -> Result<(), String> {
    seed(&store, &wo("WO-1"), stamp(0)).await?;

    let mut tx = expect("begin", store.begin().await)?;
    expect(
        "compare_and_set",
        store
            .compare_and_set(&mut tx, &wo("WO-1"), 1, WorkflowState::Inspection, stamp(1))
            .await,
    )?;

    let row = expect("get", store.get(&wo("WO-1")).await);
    let _ = store.rollback(tx).await;
    let row = row?;
    ensure(row.state == WorkflowState::Received && row.version == 1, || {
        format!("staged write leaked: {row:?}")
    })
}

async fn rollback_discards_writes<S: WorkflowStore>(store: S) -> Result<(), String> {
    let mut tx = expect("begin", store.begin().await)?;
    expect(
        "create",
        store
            .create(&mut tx, &wo("WO-1"), WorkflowState::Received, stamp(0))
            .await,
    )?;
    expect(
        "append",
        store
            .append(&mut tx, &record(&wo("WO-1"), None, WorkflowState::Received, stamp(0)))
            .await,
    )?;
    expect("rollback", store.rollback(tx).await)?;

    let outcome = store.get(&wo("WO-1")).await;
    ensure(matches!(outcome, Err(StoreError::NotFound { .. })), || {
        format!("row survived rollback: {outcome:?}")
    })?;
    let history = expect("list", store.list(&wo("WO-1")).await)?;
    ensure(history.is_empty(), || format!("history survived rollback: {history:?}"))
}

async fn dropped_tx_discards_writes<S: WorkflowStore>(store: S) -> Result<(), String> {
    {
        let mut tx = expect("begin", store.begin().await)?;
        expect(
            "create",
            store
                .create(&mut tx, &wo("WO-1"), WorkflowState::Received, stamp(0))
                .await,
        )?;
    }
    let outcome = store.get(&wo("WO-1")).await;
    ensure(matches!(outcome, Err(StoreError::NotFound { .. })), || {
        format!("row survived dropped unit of work: {outcome:?}")
    })
}

async fn commit_applies_state_and_history_together<S: WorkflowStore>(store: S) -> Result<(), String> {
    seed(&store, &wo("WO-1"), stamp(0)).await?;
    let version = expect(
        "advance",
        advance(
            &store,
            &wo("WO-1"),
            1,
            WorkflowState::Received,
            WorkflowState::Inspection,
            stamp(1),
        )
        .await,
    )?;

    let row = expect("get", store.get(&wo("WO-1")).await)?;
    let history = expect("list", store.list(&wo("WO-1")).await)?;
    ensure(version == 2 && row.version == 2, || {
        format!("expected version 2, got cas={version} row={}", row.version)
    })?;
    ensure(history.len() as i64 == row.version, || {
        format!("history length {} != version {}", history.len(), row.version)
    })?;
    ensure(
        history.last().map(|r| r.to_state) == Some(row.state),
        || "last history record does not match current state".to_string(),
    )
}

// cas

async fn compare_and_set_bumps_version<S: WorkflowStore>(store: S) -> Result<(), String> {
    seed(&store, &wo("WO-1"), stamp(0)).await?;
    let mut version = 1;
    for (offset, pair) in [
        (WorkflowState::Received, WorkflowState::Inspection),
        (WorkflowState::Inspection, WorkflowState::Production),
    ]
    .into_iter()
    .enumerate()
    {
        let next = expect(
            "advance",
            advance(&store, &wo("WO-1"), version, pair.0, pair.1, stamp(offset as i64 + 1)).await,
        )?;
        ensure(next == version + 1, || format!("expected {}, got {next}", version + 1))?;
        version = next;
    }
    Ok(())
}

async fn stale_version_conflicts<S: WorkflowStore>(store: S) -> Result<(), String> {
    seed(&store, &wo("WO-1"), stamp(0)).await?;
    expect(
        "advance",
        advance(
            &store,
            &wo("WO-1"),
            1,
            WorkflowState::Received,
            WorkflowState::Inspection,
            stamp(1),
        )
        .await,
    )?;

    let outcome = advance(
        &store,
        &wo("WO-1"),
        1,
        WorkflowState::Received,
        WorkflowState::Inspection,
        stamp(2),
    )
    .await;
    ensure(
        matches!(outcome, Err(StoreError::Conflict { expected_version: 1, .. })),
        || format!("expected Conflict at version 1, got {outcome:?}"),
    )?;
    let history = expect("list", store.list(&wo("WO-1")).await)?;
    ensure(history.len() == 2, || {
        format!("losing write appended history: {} records", history.len())
    })
}

async fn interleaved_units_conflict<S: WorkflowStore>(store: S) -> Result<(), String> {
    seed(&store, &wo("WO-1"), stamp(0)).await?;

    // Both units open before either writes; the second writes after the
    // first committed and must not see its expected version anymore.
    let mut first = expect("begin first", store.begin().await)?;
    let mut second = expect("begin second", store.begin().await)?;

    expect(
        "first compare_and_set",
        store
            .compare_and_set(&mut first, &wo("WO-1"), 1, WorkflowState::Inspection, stamp(1))
            .await,
    )?;
    expect("first commit", store.commit(first).await)?;

    let outcome = match store
        .compare_and_set(&mut second, &wo("WO-1"), 1, WorkflowState::Inspection, stamp(2))
        .await
    {
        Ok(_) => store.commit(second).await,
        Err(err) => {
            let _ = store.rollback(second).await;
            Err(err)
        }
    };
    ensure(matches!(outcome, Err(StoreError::Conflict { .. })), || {
        format!("expected Conflict, got {outcome:?}")
    })?;
    let row = expect("get", store.get(&wo("WO-1")).await)?;
    ensure(row.version == 2, || format!("expected version 2, got {}", row.version))
}

async fn compare_and_set_on_missing_row_is_not_found<S: WorkflowStore>(store: S) -> Result<(), String> {
    let mut tx = expect("begin", store.begin().await)?;
    let outcome = store
        .compare_and_set(&mut tx, &wo("WO-404"), 1, WorkflowState::Inspection, stamp(0))
        .await;
    let _ = store.rollback(tx).await;
    ensure(matches!(outcome, Err(StoreError::NotFound { .. })), || {
        format!("expected NotFound, got {outcome:?}")
    })
}

// history

async fn history_preserves_order<S: WorkflowStore>(store: S) -> Result<(), String> {
    seed(&store, &wo("WO-1"), stamp(0)).await?;
    let path = [
        WorkflowState::Received,
        WorkflowState::Inspection,
        WorkflowState::Production,
        WorkflowState::Inventory,
    ];
    for (index, pair) in path.windows(2).enumerate() {
        expect(
            "advance",
            advance(&store, &wo("WO-1"), index as i64 + 1, pair[0], pair[1], stamp(index as i64 + 1)).await,
        )?;
    }

    let history = expect("list", store.list(&wo("WO-1")).await)?;
    let states: Vec<_> = history.iter().map(|r| r.to_state).collect();
    ensure(states == path, || format!("history out of order: {states:?}"))?;
    ensure(history[0].from_state.is_none(), || {
        "creation record must have no from_state".to_string()
    })?;
    ensure(
        history.windows(2).all(|pair| pair[0].occurred_at <= pair[1].occurred_at),
        || "timestamps are not non-decreasing".to_string(),
    )?;
    ensure(
        history
            .windows(2)
            .all(|pair| pair[1].from_state == Some(pair[0].to_state)),
        || "history chain is broken".to_string(),
    )
}

async fn history_of_unknown_work_order_is_empty<S: WorkflowStore>(store: S) -> Result<(), String> {
    let history = expect("list", store.list(&wo("WO-404")).await)?;
    ensure(history.is_empty(), || format!("expected no records, got {}", history.len()))
}

// items

async fn list_by_state_filters_and_paginates<S: WorkflowStore>(store: S) -> Result<(), String> {
    for id in ["WO-3", "WO-1", "WO-5", "WO-2", "WO-4"] {
        seed(&store, &wo(id), stamp(0)).await?;
    }
    expect(
        "advance",
        advance(
            &store,
            &wo("WO-5"),
            1,
            WorkflowState::Received,
            WorkflowState::Inspection,
            stamp(1),
        )
        .await,
    )?;

    let first = expect(
        "list_by_state",
        store
            .list_by_state(WorkflowState::Received, &ItemsQuery::new(2, 0))
            .await,
    )?;
    let second = expect(
        "list_by_state",
        store
            .list_by_state(WorkflowState::Received, &ItemsQuery::new(2, 2))
            .await,
    )?;
    let past_end = expect(
        "list_by_state",
        store
            .list_by_state(WorkflowState::Received, &ItemsQuery::new(2, 10))
            .await,
    )?;
    let inspection = expect(
        "list_by_state",
        store
            .list_by_state(WorkflowState::Inspection, &ItemsQuery::new(10, 0))
            .await,
    )?;

    ensure(first == vec![wo("WO-1"), wo("WO-2")], || format!("first page: {first:?}"))?;
    ensure(second == vec![wo("WO-3"), wo("WO-4")], || format!("second page: {second:?}"))?;
    ensure(past_end.is_empty(), || format!("page past end: {past_end:?}"))?;
    ensure(inspection == vec![wo("WO-5")], || format!("inspection: {inspection:?}"))
}

async fn list_by_state_orders_by_recent_transition<S: WorkflowStore>(store: S) -> Result<(), String> {
    seed(&store, &wo("WO-A"), stamp(-30)).await?;
    seed(&store, &wo("WO-B"), stamp(-10)).await?;
    seed(&store, &wo("WO-C"), stamp(-20)).await?;

    let query = ItemsQuery::new(10, 0).ordered_by(ItemOrder::RecentTransition);
    let items = expect(
        "list_by_state",
        store.list_by_state(WorkflowState::Received, &query).await,
    )?;
    ensure(items == vec![wo("WO-B"), wo("WO-C"), wo("WO-A")], || {
        format!("expected most recent first, got {items:?}")
    })
}

// concurrent

async fn concurrent_transitions_exactly_one_wins<S: WorkflowStore>(store: S) -> Result<(), String> {
    let store = Arc::new(store);
    seed(store.as_ref(), &wo("WO-1"), stamp(0)).await?;

    let mut handles = Vec::with_capacity(RACERS);
    for _ in 0..RACERS {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            advance(
                store.as_ref(),
                &wo("WO-1"),
                1,
                WorkflowState::Received,
                WorkflowState::Inspection,
                stamp(1),
            )
            .await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.map_err(|e| format!("task panic: {e}"))? {
            Ok(_) => winners += 1,
            Err(StoreError::Conflict { .. }) => {}
            Err(other) => return Err(format!("unexpected error: {other}")),
        }
    }

    ensure(winners == 1, || format!("expected exactly 1 winner, got {winners}"))?;
    let row = expect("get", store.get(&wo("WO-1")).await)?;
    let history = expect("list", store.list(&wo("WO-1")).await)?;
    ensure(row.version == 2 && history.len() == 2, || {
        format!(
            "expected version 2 with 2 records, got version {} with {}",
            row.version,
            history.len()
        )
    })
}

async fn concurrent_transitions_on_distinct_work_orders_all_succeed<S: WorkflowStore>(
    store: S,
) -> Result<(), String> {
    let store = Arc::new(store);
    let ids: Vec<WorkOrderId> = (0..RACERS).map(|i| wo(&format!("WO-{i}"))).collect();
    for id in &ids {
        seed(store.as_ref(), id, stamp(0)).await?;
    }

    let mut handles = Vec::with_capacity(ids.len());
    for id in ids.iter().cloned() {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            advance(
                store.as_ref(),
                &id,
                1,
                WorkflowState::Received,
                WorkflowState::Inspection,
                stamp(1),
            )
            .await
        }));
    }
    for handle in handles {
        expect("advance", handle.await.map_err(|e| format!("task panic: {e}"))?)?;
    }

    for id in &ids {
        let row = expect("get", store.get(id).await)?;
        ensure(row.state == WorkflowState::Inspection, || {
            format!("{id} stuck in {}", row.state)
        })?;
    }
    Ok(())
}

// tenant

async fn tenant_isolation<S: WorkflowStore>(first: &S, second: &S) -> Result<(), String> {
    ensure(first.tenant() != second.tenant(), || {
        "tenant isolation needs two different tenants".to_string()
    })?;

    seed(first, &wo("WO-1"), stamp(0)).await?;
    let outcome = second.get(&wo("WO-1")).await;
    ensure(matches!(outcome, Err(StoreError::NotFound { .. })), || {
        format!("second tenant sees first tenant's row: {outcome:?}")
    })?;

    // Same id is free to register under the other tenant.
    seed(second, &wo("WO-1"), stamp(0)).await?;
    expect(
        "advance",
        advance(
            second,
            &wo("WO-1"),
            1,
            WorkflowState::Received,
            WorkflowState::Inspection,
            stamp(1),
        )
        .await,
    )?;

    let untouched = expect("get", first.get(&wo("WO-1")).await)?;
    ensure(untouched.state == WorkflowState::Received, || {
        format!("first tenant's row changed: {untouched:?}")
    })?;
    let listed = expect(
        "list_by_state",
        first
            .list_by_state(WorkflowState::Inspection, &ItemsQuery::new(10, 0))
            .await,
    )?;
    ensure(listed.is_empty(), || format!("first tenant lists foreign rows: {listed:?}"))?;
    let history = expect("list", first.list(&wo("WO-1")).await)?;
    ensure(history.len() == 1, || format!("first tenant history leaked: {history:?}"))
}
