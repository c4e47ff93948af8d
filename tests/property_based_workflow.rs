// Property-Based Testing for the Workflow Engine
// Checks graph closure and lifecycle invariants over arbitrary request sequences

use proptest::prelude::*;
use yardflow::store::memory::MemoryStore;
use yardflow::{ErrorKind, StateGraph, WorkOrderId, WorkflowEngine, WorkflowState, TRANSITIONS};

fn state_strategy() -> impl Strategy<Value = WorkflowState> {
    prop::sample::select(WorkflowState::ALL.to_vec())
}

// Mixes canonical names with case and whitespace noise
fn spelled_state_strategy() -> impl Strategy<Value = (WorkflowState, String)> {
    (state_strategy(), 0usize..4).prop_map(|(state, style)| {
        let name = state.as_str();
        let spelled = match style {
            0 => name.to_string(),
            1 => name.to_lowercase(),
            2 => name.to_uppercase(),
            _ => format!("  {name}\t"),
        };
        (state, spelled)
    })
}

proptest! {
    #[test]
    fn graph_accepts_exactly_the_table(from in state_strategy(), to in state_strategy()) {
        let listed = TRANSITIONS.contains(&(from, to));
        match StateGraph::validate(from, to) {
            Ok(()) => prop_assert!(listed),
            Err(err) => {
                prop_assert!(!listed);
                prop_assert_eq!(err.kind(), ErrorKind::InvalidTransition);
            }
        }
    }

    #[test]
    fn every_edge_moves_exactly_one_step_forward(from in state_strategy(), to in state_strategy()) {
        if StateGraph::is_allowed(from, to) {
            prop_assert_eq!(to.ordinal(), from.ordinal() + 1);
        }
    }

    #[test]
    fn state_names_round_trip((state, spelled) in spelled_state_strategy()) {
        let parsed: WorkflowState = spelled.parse().unwrap();
        prop_assert_eq!(parsed, state);
        prop_assert_eq!(parsed.to_string(), state.as_str());
    }

    #[test]
    fn unknown_names_never_parse(name in "[a-z]{1,12}") {
        let known = WorkflowState::ALL
            .iter()
            .any(|state| state.as_str().eq_ignore_ascii_case(&name));
        prop_assert_eq!(name.parse::<WorkflowState>().is_ok(), known);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_walks_preserve_lifecycle_invariants(
        targets in prop::collection::vec(state_strategy(), 1..24)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let engine = WorkflowEngine::new(MemoryStore::default());
            let wo = WorkOrderId::new("WO-PROP");
            engine.register_work_order(&wo, "receiving", "").await.unwrap();

            let mut expected = WorkflowState::Received;
            for target in targets {
                let outcome = engine.transition_to(&wo, target, "crew", "").await;
                match StateGraph::successor(expected) {
                    Some(next) if next == target => {
                        prop_assert!(outcome.is_ok());
                        expected = next;
                    }
                    Some(_) => {
                        prop_assert_eq!(outcome.unwrap_err().kind(), ErrorKind::InvalidTransition);
                    }
                    None => {
                        prop_assert_eq!(outcome.unwrap_err().kind(), ErrorKind::TerminalState);
                    }
                }

                let row = engine.current_row(&wo).await.unwrap();
                let history = engine.state_history(&wo).await.unwrap();
                prop_assert_eq!(row.state, expected);
                prop_assert_eq!(row.version, history.len() as i64);
                prop_assert_eq!(history.len(), expected.ordinal() + 1);
            }
            Ok(())
        })?;
    }
}
