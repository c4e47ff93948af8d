//! Lifecycle states of a work order.
//!
//! The enumeration is closed. Its canonical text form is the variant name;
//! [`WorkflowState::from_str`] is the one place raw state strings are turned
//! into values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Lifecycle stage of one lot of received pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WorkflowState {
    /// Lot has arrived at the yard
    Received,
    /// Pipe is being inspected
    Inspection,
    /// Threading, coating or repair work in progress
    Production,
    /// Stored in yard inventory
    Inventory,
    /// Loaded out to the customer
    Shipped,
    /// Paperwork closed; terminal
    Completed,
}

impl WorkflowState {
    /// Every state in creation→terminal order.
    pub const ALL: [WorkflowState; 6] = [
        WorkflowState::Received,
        WorkflowState::Inspection,
        WorkflowState::Production,
        WorkflowState::Inventory,
        WorkflowState::Shipped,
        WorkflowState::Completed,
    ];

    /// State every work order starts in.
    pub const INITIAL: WorkflowState = WorkflowState::Received;

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Received => "Received",
            WorkflowState::Inspection => "Inspection",
            WorkflowState::Production => "Production",
            WorkflowState::Inventory => "Inventory",
            WorkflowState::Shipped => "Shipped",
            WorkflowState::Completed => "Completed",
        }
    }

    /// Position in the lifecycle, `0` for `Received`.
    pub fn ordinal(&self) -> usize {
        match self {
            WorkflowState::Received => 0,
            WorkflowState::Inspection => 1,
            WorkflowState::Production => 2,
            WorkflowState::Inventory => 3,
            WorkflowState::Shipped => 4,
            WorkflowState::Completed => 5,
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized workflow state '{value}'")]
pub struct ParseStateError {
    pub value: String,
}

impl FromStr for WorkflowState {
    type Err = ParseStateError;

    /// Accepts the canonical names, ignoring ASCII case and surrounding whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        WorkflowState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| ParseStateError {
                value: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_canonical_names() {
        assert_eq!(WorkflowState::Received.to_string(), "Received");
        assert_eq!(WorkflowState::Inspection.to_string(), "Inspection");
        assert_eq!(WorkflowState::Production.to_string(), "Production");
        assert_eq!(WorkflowState::Inventory.to_string(), "Inventory");
        assert_eq!(WorkflowState::Shipped.to_string(), "Shipped");
        assert_eq!(WorkflowState::Completed.to_string(), "Completed");
    }

    #[test]
    fn parse_accepts_any_case_and_whitespace() {
        assert_eq!("inspection".parse::<WorkflowState>(), Ok(WorkflowState::Inspection));
        assert_eq!("  SHIPPED ".parse::<WorkflowState>(), Ok(WorkflowState::Shipped));
        assert_eq!("Completed".parse::<WorkflowState>(), Ok(WorkflowState::Completed));
    }

    #[test]
    fn parse_rejects_unknown_names() {
        let err = "Scrapped".parse::<WorkflowState>().unwrap_err();
        assert_eq!(err.value, "Scrapped");
        assert!("".parse::<WorkflowState>().is_err());
        assert!("In Inspection".parse::<WorkflowState>().is_err());
    }

    #[test]
    fn parse_and_display_agree_for_every_state() {
        for state in WorkflowState::ALL {
            assert_eq!(state.as_str().parse::<WorkflowState>(), Ok(state));
        }
    }

    #[test]
    fn serde_matches_display() {
        let json = serde_json::to_string(&WorkflowState::Inventory).unwrap();
        assert_eq!(json, "\"Inventory\"");
        let decoded: WorkflowState = serde_json::from_str("\"Shipped\"").unwrap();
        assert_eq!(decoded, WorkflowState::Shipped);
    }

    #[test]
    fn ordinals_follow_lifecycle_order() {
        for (index, state) in WorkflowState::ALL.iter().enumerate() {
            assert_eq!(state.ordinal(), index);
        }
        assert_eq!(WorkflowState::INITIAL, WorkflowState::Received);
    }
}
