//! Caller-facing contract for request handlers.
//!
//! Requests arrive as plain strings; this is the only layer that parses state
//! names and work-order ids. Every failure becomes an [`ApiError`] carrying an
//! HTTP-equivalent status and a serializable body.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use crate::store::WorkflowStore;
use crate::workflows::{
    ItemOrder, ItemsQuery, StateRow, TransitionRecord, WorkOrderId, WorkflowEngine, WorkflowError,
    WorkflowState,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateResponse {
    pub work_order: String,
    pub state: String,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl From<StateRow> for StateResponse {
    fn from(row: StateRow) -> Self {
        Self {
            work_order: row.work_order.0,
            state: row.state.to_string(),
            version: row.version,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub target_state: String,
    pub actor: String,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub actor: String,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionResponse {
    pub work_order: String,
    pub from_state: Option<String>,
    pub to_state: String,
    pub actor: String,
    pub notes: String,
    pub occurred_at: DateTime<Utc>,
}

impl From<TransitionRecord> for TransitionResponse {
    fn from(record: TransitionRecord) -> Self {
        Self {
            work_order: record.work_order.0,
            from_state: record.from_state.map(|state| state.to_string()),
            to_state: record.to_state.to_string(),
            actor: record.actor,
            notes: record.notes,
            occurred_at: record.occurred_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub from_state: Option<String>,
    pub to_state: String,
    pub actor: String,
    pub notes: String,
    pub occurred_at: DateTime<Utc>,
}

impl From<TransitionRecord> for HistoryEntry {
    fn from(record: TransitionRecord) -> Self {
        Self {
            from_state: record.from_state.map(|state| state.to_string()),
            to_state: record.to_state.to_string(),
            actor: record.actor,
            notes: record.notes,
            occurred_at: record.occurred_at,
        }
    }
}

/// Query parameters for [`WorkflowApi::get_items`]. Missing values use defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemsParams {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub order_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemsResponse {
    pub state: String,
    pub items: Vec<String>,
    /// Effective page size after defaults and clamping
    pub limit: u32,
    pub offset: u32,
    pub order_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResponse {
    pub work_order: String,
    pub target_state: String,
    pub allowed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{status} {}: {}", .body.error, .body.message)]
pub struct ApiError {
    pub status: u16,
    pub body: ErrorBody,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: 400,
            body: ErrorBody {
                error: "bad_request".to_string(),
                message: message.into(),
                retryable: false,
            },
        }
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        let status = err.status_code();
        let code = match &err {
            WorkflowError::AlreadyExists { .. } => "already_exists",
            WorkflowError::Timeout { .. } => "timeout",
            other => other.kind().as_str(),
        };
        if status >= 500 {
            error!(error = %err, "Workflow request failed");
        }
        Self {
            status,
            body: ErrorBody {
                error: code.to_string(),
                message: err.to_string(),
                retryable: err.is_retryable(),
            },
        }
    }
}

/// String-typed facade over a [`WorkflowEngine`].
#[derive(Debug)]
pub struct WorkflowApi<S> {
    engine: WorkflowEngine<S>,
}

impl<S> Clone for WorkflowApi<S> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
        }
    }
}

impl<S: WorkflowStore> WorkflowApi<S> {
    pub fn new(engine: WorkflowEngine<S>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &WorkflowEngine<S> {
        &self.engine
    }

    pub async fn get_state(&self, work_order: &str) -> Result<StateResponse, ApiError> {
        let work_order = parse_work_order(work_order)?;
        let row = self.engine.current_row(&work_order).await?;
        Ok(row.into())
    }

    pub async fn register(
        &self,
        work_order: &str,
        request: RegisterRequest,
    ) -> Result<TransitionResponse, ApiError> {
        let work_order = parse_work_order(work_order)?;
        let actor = parse_actor(&request.actor)?;
        let record = self
            .engine
            .register_work_order(&work_order, actor, &request.notes)
            .await?;
        Ok(record.into())
    }

    pub async fn post_transition(
        &self,
        work_order: &str,
        request: TransitionRequest,
    ) -> Result<TransitionResponse, ApiError> {
        let work_order = parse_work_order(work_order)?;
        let target = parse_state(&request.target_state)?;
        let actor = parse_actor(&request.actor)?;
        let record = self
            .engine
            .transition_to(&work_order, target, actor, &request.notes)
            .await?;
        Ok(record.into())
    }

    /// Pre-flight check; a disallowed edge comes back as the same 422 that
    /// [`post_transition`](Self::post_transition) would return.
    pub async fn validate(
        &self,
        work_order: &str,
        target_state: &str,
    ) -> Result<ValidationResponse, ApiError> {
        let work_order = parse_work_order(work_order)?;
        let target = parse_state(target_state)?;
        self.engine.validate_transition(&work_order, target).await?;
        Ok(ValidationResponse {
            work_order: work_order.0,
            target_state: target.to_string(),
            allowed: true,
        })
    }

    pub async fn get_history(&self, work_order: &str) -> Result<Vec<HistoryEntry>, ApiError> {
        let work_order = parse_work_order(work_order)?;
        let records = self.engine.state_history(&work_order).await?;
        Ok(records.into_iter().map(HistoryEntry::from).collect())
    }

    pub async fn get_items(&self, state: &str, params: ItemsParams) -> Result<ItemsResponse, ApiError> {
        let state = parse_state(state)?;
        let order = match params.order_by.as_deref() {
            None => ItemOrder::default(),
            Some(value) => ItemOrder::parse(value).ok_or_else(|| {
                ApiError::bad_request(format!(
                    "unknown order_by '{value}', expected work_order or recent_transition"
                ))
            })?,
        };
        let query = self.engine.resolve_query(
            ItemsQuery::new(params.limit.unwrap_or(0), params.offset.unwrap_or(0)).ordered_by(order),
        );
        let items = self.engine.items_by_state(state, query).await?;
        Ok(ItemsResponse {
            state: state.to_string(),
            items: items.into_iter().map(|id| id.0).collect(),
            limit: query.limit,
            offset: query.offset,
            order_by: order.as_str().to_string(),
        })
    }
}

fn parse_work_order(value: &str) -> Result<WorkOrderId, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::bad_request("work order id must not be empty"));
    }
    Ok(WorkOrderId::new(trimmed))
}

fn parse_state(value: &str) -> Result<WorkflowState, ApiError> {
    value
        .parse::<WorkflowState>()
        .map_err(|e| ApiError::from(WorkflowError::from(e)))
}

fn parse_actor(value: &str) -> Result<&str, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::bad_request("actor must not be empty"));
    }
    Ok(trimmed)
}
