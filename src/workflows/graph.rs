//! Static transition graph for the work-order lifecycle.
//!
//! ```text
//! Received → Inspection → Production → Inventory → Shipped → Completed
//! ```
//!
//! Each non-terminal state has exactly one outgoing edge. There are no
//! skip-ahead, backward or same-state edges.

use super::errors::WorkflowError;
use super::state::WorkflowState;

/// Every legal `(from, to)` pair.
pub const TRANSITIONS: [(WorkflowState, WorkflowState); 5] = [
    (WorkflowState::Received, WorkflowState::Inspection),
    (WorkflowState::Inspection, WorkflowState::Production),
    (WorkflowState::Production, WorkflowState::Inventory),
    (WorkflowState::Inventory, WorkflowState::Shipped),
    (WorkflowState::Shipped, WorkflowState::Completed),
];

/// Transition validator over [`TRANSITIONS`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StateGraph;

impl StateGraph {
    pub fn is_allowed(from: WorkflowState, to: WorkflowState) -> bool {
        TRANSITIONS.contains(&(from, to))
    }

    /// `Completed` is the only state with no outgoing edges.
    pub fn is_terminal(state: WorkflowState) -> bool {
        Self::successor(state).is_none()
    }

    /// The single legal next state, if any.
    pub fn successor(state: WorkflowState) -> Option<WorkflowState> {
        TRANSITIONS
            .iter()
            .find(|(from, _)| *from == state)
            .map(|(_, to)| *to)
    }

    /// Pure graph check; terminal sources are rejected like any other missing edge.
    pub fn validate(from: WorkflowState, to: WorkflowState) -> Result<(), WorkflowError> {
        if Self::is_allowed(from, to) {
            Ok(())
        } else {
            Err(WorkflowError::InvalidTransition { from, to })
        }
    }
}
