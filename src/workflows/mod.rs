// Workflow state engine: closed state set, fixed transition graph,
// and the orchestrator that applies transitions atomically.

pub mod errors;
pub mod graph;
pub mod state;
pub mod state_machine;
pub mod types;

pub use errors::{ErrorKind, WorkflowError};
pub use graph::{StateGraph, TRANSITIONS};
pub use state::{ParseStateError, WorkflowState};
pub use state_machine::{EngineSettings, WorkflowEngine};
pub use types::{ItemOrder, ItemsQuery, StateRow, TenantId, TransitionRecord, WorkOrderId};
