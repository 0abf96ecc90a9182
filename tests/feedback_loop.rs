use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use loomflow::app::App;
use loomflow::channels::Channel;
use loomflow::graphs::{GraphBuilder, IterationGuard};
use loomflow::node::{Node, NodeContext, NodeError, NodeOutput, NodePartial};
use loomflow::reducers::ReducerPolicy;
use loomflow::runtimes::RuntimeConfig;
use loomflow::state::{StateSnapshot, WorkflowState};
use loomflow::types::NodeKind;

fn custom(name: &str) -> NodeKind {
    NodeKind::Custom(name.to_string())
}

/// Each pass rewrites the metric from the seed and bumps the loop counter.
struct Draft;

#[async_trait]
impl Node for Draft {
    fn reads(&self) -> Vec<String> {
        vec!["seed_metric".into()]
    }

    fn writes(&self) -> Vec<String> {
        vec!["metric".into(), "iterations".into()]
    }

    async fn run(
        &self,
        snapshot: StateSnapshot,
        _: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let metric = snapshot
            .get_f64("seed_metric")
            .ok_or(NodeError::MissingInput { what: "seed_metric" })?;
        Ok(NodePartial::new()
            .with_update("metric", json!(metric))
            .with_update("iterations", json!(1))
            .into())
    }
}

fn refinement_app(max_iterations: u64) -> App {
    GraphBuilder::new()
        .add_node(custom("draft"), Draft)
        .add_edge(NodeKind::Start, custom("draft"))
        .add_guarded_conditional_edge(
            custom("draft"),
            Arc::new(|snapshot: &StateSnapshot| {
                if snapshot.get_f64("metric").unwrap_or(0.0) >= 0.8 {
                    vec![NodeKind::End]
                } else {
                    vec![NodeKind::Custom("draft".into())]
                }
            }),
            vec![custom("draft")],
            IterationGuard::new("iterations", max_iterations),
        )
        .with_policy("metric", ReducerPolicy::Overwrite)
        .with_policy("iterations", ReducerPolicy::Increment)
        .with_runtime_config(RuntimeConfig::default().with_quiet_event_bus())
        .compile()
        .expect("refinement graph compiles")
}

fn seeded(metric: f64) -> WorkflowState {
    WorkflowState::builder()
        .with_value("seed_metric", json!(metric))
        .build()
}

#[tokio::test]
async fn loop_exits_on_first_pass_when_metric_is_met() {
    let app = refinement_app(4);
    let state = app
        .invoke(seeded(0.9))
        .await
        .expect("run succeeds")
        .completed()
        .expect("run completes");

    assert_eq!(state.get("iterations"), Some(&json!(1)));
    assert!(!state.errors.snapshot().iter().any(|e| e.is_iteration_limit()));
}

#[tokio::test]
async fn rejecting_router_is_bounded_at_exactly_max_iterations() {
    let app = refinement_app(4);
    let state = app
        .invoke(seeded(0.5))
        .await
        .expect("run still completes")
        .completed()
        .expect("run completes");

    // The router rejects every pass; the guard forces End once the counter
    // reaches 4, after exactly four node executions.
    assert_eq!(state.get("iterations"), Some(&json!(4)));

    let warnings: Vec<_> = state
        .errors
        .snapshot()
        .into_iter()
        .filter(|e| e.is_iteration_limit())
        .collect();
    assert_eq!(warnings.len(), 1);

    // Best available state is preserved alongside the warning.
    assert_eq!(state.get("metric"), Some(&json!(0.5)));
}

#[tokio::test]
async fn guard_respects_a_different_maximum() {
    let app = refinement_app(2);
    let state = app
        .invoke(seeded(0.1))
        .await
        .expect("run succeeds")
        .completed()
        .expect("run completes");
    assert_eq!(state.get("iterations"), Some(&json!(2)));
    assert!(state.errors.snapshot().iter().any(|e| e.is_iteration_limit()));
}
