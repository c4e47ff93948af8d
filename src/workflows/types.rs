use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::state::WorkflowState;

/// Opaque work-order identifier, unique within a tenant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkOrderId(pub String);

impl WorkOrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkOrderId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for WorkOrderId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl PartialEq<str> for WorkOrderId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for WorkOrderId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Yard/location whose isolated data store a handle is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Current state of one work order, as held by the state store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRow {
    pub work_order: WorkOrderId,
    pub state: WorkflowState,
    /// CAS token. Starts at 1 and grows by one per committed transition.
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

/// One immutable entry of the transition history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub work_order: WorkOrderId,
    /// `None` only for the creation event.
    pub from_state: Option<WorkflowState>,
    pub to_state: WorkflowState,
    pub actor: String,
    pub notes: String,
    pub occurred_at: DateTime<Utc>,
}

impl TransitionRecord {
    pub fn is_creation(&self) -> bool {
        self.from_state.is_none()
    }
}

/// Ordering of [`ItemsQuery`] results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOrder {
    /// Ascending work-order id
    #[default]
    WorkOrder,
    /// Most recently transitioned first, ties by ascending id
    RecentTransition,
}

impl ItemOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemOrder::WorkOrder => "work_order",
            ItemOrder::RecentTransition => "recent_transition",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "work_order" => Some(ItemOrder::WorkOrder),
            "recent_transition" | "recent" => Some(ItemOrder::RecentTransition),
            _ => None,
        }
    }
}

/// Pagination and ordering for state-scoped queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ItemsQuery {
    pub limit: u32,
    pub offset: u32,
    pub order: ItemOrder,
}

impl ItemsQuery {
    pub fn new(limit: u32, offset: u32) -> Self {
        Self {
            limit,
            offset,
            order: ItemOrder::WorkOrder,
        }
    }

    pub fn ordered_by(mut self, order: ItemOrder) -> Self {
        self.order = order;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_order_id_serializes_as_plain_string() {
        let id = WorkOrderId::new("WO-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"WO-1\"");
        assert_eq!(id, "WO-1");
    }

    #[test]
    fn item_order_parses_known_names() {
        assert_eq!(ItemOrder::parse("work_order"), Some(ItemOrder::WorkOrder));
        assert_eq!(ItemOrder::parse("Recent"), Some(ItemOrder::RecentTransition));
        assert_eq!(ItemOrder::parse("priority"), None);
        assert_eq!(ItemOrder::default(), ItemOrder::WorkOrder);
    }

    #[test]
    fn items_query_builder_sets_order() {
        let query = ItemsQuery::new(10, 20).ordered_by(ItemOrder::RecentTransition);
        assert_eq!(query.limit, 10);
        assert_eq!(query.offset, 20);
        assert_eq!(query.order, ItemOrder::RecentTransition);
    }
}
