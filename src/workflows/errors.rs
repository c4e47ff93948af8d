use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::state::{ParseStateError, WorkflowState};
use super::types::WorkOrderId;
use crate::store::StoreError;

/// Errors returned by the workflow engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("work order {work_order} not found")]
    NotFound { work_order: WorkOrderId },

    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: WorkflowState,
        to: WorkflowState,
    },

    #[error("unrecognized workflow state '{value}'")]
    UnrecognizedState { value: String },

    #[error("work order {work_order} is already {state} and cannot transition to {target}")]
    TerminalState {
        work_order: WorkOrderId,
        state: WorkflowState,
        target: WorkflowState,
    },

    #[error("conflict on work order {work_order}: state changed since version {expected_version}")]
    Conflict {
        work_order: WorkOrderId,
        expected_version: i64,
    },

    #[error("work order {work_order} already exists")]
    AlreadyExists { work_order: WorkOrderId },

    #[error("store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    #[error("{operation} timed out after {duration_ms}ms")]
    Timeout {
        operation: &'static str,
        duration_ms: u64,
    },
}

/// Coarse classification callers map to their own response codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidTransition,
    TerminalState,
    Conflict,
    StoreUnavailable,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::TerminalState => "terminal_state",
            ErrorKind::Conflict => "conflict",
            ErrorKind::StoreUnavailable => "store_unavailable",
        }
    }
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::NotFound { .. } => ErrorKind::NotFound,
            WorkflowError::InvalidTransition { .. } | WorkflowError::UnrecognizedState { .. } => {
                ErrorKind::InvalidTransition
            }
            WorkflowError::TerminalState { .. } => ErrorKind::TerminalState,
            WorkflowError::Conflict { .. } | WorkflowError::AlreadyExists { .. } => {
                ErrorKind::Conflict
            }
            WorkflowError::StoreUnavailable { .. } | WorkflowError::Timeout { .. } => {
                ErrorKind::StoreUnavailable
            }
        }
    }

    /// Whether re-reading state and trying again can succeed.
    ///
    /// A duplicate registration never will, so only lost races count.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkflowError::Conflict { .. })
    }

    /// HTTP-equivalent status for client-facing layers.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::NotFound => 404,
            ErrorKind::InvalidTransition | ErrorKind::TerminalState => 422,
            ErrorKind::Conflict => 409,
            ErrorKind::StoreUnavailable => 503,
        }
    }
}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { work_order } => WorkflowError::NotFound { work_order },
            StoreError::Conflict {
                work_order,
                expected_version,
            } => WorkflowError::Conflict {
                work_order,
                expected_version,
            },
            StoreError::AlreadyExists { work_order } => WorkflowError::AlreadyExists { work_order },
            StoreError::Backend(reason) => WorkflowError::StoreUnavailable { reason },
        }
    }
}

impl From<ParseStateError> for WorkflowError {
    fn from(err: ParseStateError) -> Self {
        WorkflowError::UnrecognizedState { value: err.value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wo() -> WorkOrderId {
        WorkOrderId::new("WO-7")
    }

    #[test]
    fn kinds_cover_taxonomy() {
        assert_eq!(
            WorkflowError::NotFound { work_order: wo() }.kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            WorkflowError::UnrecognizedState {
                value: "Scrap".into()
            }
            .kind(),
            ErrorKind::InvalidTransition
        );
        assert_eq!(
            WorkflowError::Timeout {
                operation: "transition_to",
                duration_ms: 10
            }
            .kind(),
            ErrorKind::StoreUnavailable
        );
        assert_eq!(
            WorkflowError::AlreadyExists { work_order: wo() }.kind(),
            ErrorKind::Conflict
        );
    }

    #[test]
    fn only_lost_races_are_retryable() {
        let conflict = WorkflowError::Conflict {
            work_order: wo(),
            expected_version: 3,
        };
        assert!(conflict.is_retryable());
        assert_eq!(conflict.status_code(), 409);

        let duplicate = WorkflowError::AlreadyExists { work_order: wo() };
        assert!(!duplicate.is_retryable());
        assert_eq!(duplicate.status_code(), 409);
    }

    #[test]
    fn status_codes_follow_kind() {
        let invalid = WorkflowError::InvalidTransition {
            from: WorkflowState::Inspection,
            to: WorkflowState::Shipped,
        };
        assert_eq!(invalid.status_code(), 422);
        assert_eq!(invalid.to_string(), "invalid transition: Inspection -> Shipped");

        let terminal = WorkflowError::TerminalState {
            work_order: wo(),
            state: WorkflowState::Completed,
            target: WorkflowState::Received,
        };
        assert_eq!(terminal.status_code(), 422);
        assert_eq!(
            WorkflowError::StoreUnavailable {
                reason: "disk".into()
            }
            .status_code(),
            503
        );
        assert_eq!(WorkflowError::NotFound { work_order: wo() }.status_code(), 404);
    }

    #[test]
    fn store_errors_translate_without_losing_meaning() {
        let err: WorkflowError = StoreError::Conflict {
            work_order: wo(),
            expected_version: 2,
        }
        .into();
        assert_eq!(
            err,
            WorkflowError::Conflict {
                work_order: wo(),
                expected_version: 2
            }
        );

        let err: WorkflowError = StoreError::Backend("connection reset".into()).into();
        assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
    }
}
