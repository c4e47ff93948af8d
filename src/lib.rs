// Yardflow Library - Work-Order Workflow State Engine
// Tracks each pipe work order through
// Received → Inspection → Production → Inventory → Shipped → Completed

pub mod api;
pub mod config;
#[cfg(feature = "database")]
pub mod database;
pub mod observability;
pub mod store;
pub mod telemetry;
pub mod workflows;

// Re-export key types for easy access
pub use api::{ApiError, WorkflowApi};
pub use config::{DatabaseConfig, EngineConfig, ObservabilityConfig, YardflowConfig};
#[cfg(feature = "database")]
pub use database::DatabaseManager;
pub use observability::{EngineMetrics, EngineStats, OperationTimer};
pub use store::{HistoryLog, MemoryStore, StateStore, StoreError, UnitOfWork, WorkflowStore};
#[cfg(feature = "database")]
pub use store::SqliteStore;
pub use telemetry::{create_workflow_span, generate_correlation_id, init_telemetry};
pub use workflows::{
    EngineSettings, ErrorKind, ItemOrder, ItemsQuery, StateGraph, StateRow, TenantId, TRANSITIONS,
    TransitionRecord, WorkOrderId, WorkflowEngine, WorkflowError, WorkflowState,
};
