use async_trait::async_trait;
use serde_json::json;

use loomflow::app::App;
use loomflow::channels::errors::{ErrorChain, ErrorEvent};
use loomflow::graphs::GraphBuilder;
use loomflow::node::{Node, NodeContext, NodeError, NodeOutput, NodePartial};
use loomflow::reducers::{ReducerConflictError, ReducerPolicy};
use loomflow::runtimes::RuntimeConfig;
use loomflow::schedulers::Activation;
use loomflow::state::{StateSnapshot, WorkflowState};
use loomflow::types::NodeKind;

struct Writer;

#[async_trait]
impl Node for Writer {
    fn writes(&self) -> Vec<String> {
        vec!["greeting".into(), "count".into()]
    }

    async fn run(&self, _: StateSnapshot, _: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(NodePartial::default().into())
    }
}

fn custom(name: &str) -> NodeKind {
    NodeKind::Custom(name.to_string())
}

fn build_app() -> App {
    GraphBuilder::new()
        .add_node(custom("writer"), Writer)
        .add_edge(NodeKind::Start, custom("writer"))
        .add_edge(custom("writer"), NodeKind::End)
        .with_policy("greeting", ReducerPolicy::Overwrite)
        .with_policy("count", ReducerPolicy::Increment)
        .with_runtime_config(RuntimeConfig::default().with_quiet_event_bus())
        .compile()
        .expect("valid graph")
}

#[test]
fn apply_barrier_merges_declared_writes() {
    let app = build_app();
    let mut state = WorkflowState::new();
    let records = vec![(
        Activation::top_level(custom("writer")),
        NodePartial::new()
            .with_update("greeting", json!("hello"))
            .with_update("count", json!(2)),
    )];

    let outcome = app
        .apply_barrier(&mut state, &records)
        .expect("barrier succeeds");

    assert_eq!(
        outcome.updated_keys,
        vec!["count".to_string(), "greeting".to_string()]
    );
    assert_eq!(state.get("greeting"), Some(&json!("hello")));
    assert_eq!(state.get("count"), Some(&json!(2)));
}

#[test]
fn apply_barrier_rejects_undeclared_keys() {
    let app = build_app();
    let mut state = WorkflowState::new();
    let records = vec![(
        Activation::top_level(custom("writer")),
        NodePartial::new().with_update("sneaky", json!(true)),
    )];

    let err = app
        .apply_barrier(&mut state, &records)
        .expect_err("must fail");
    match err {
        ReducerConflictError::UndeclaredKey { node, key } => {
            assert_eq!(node, "writer");
            assert_eq!(key, "sneaky");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // Nothing merged.
    assert!(state.get("sneaky").is_none());
}

#[test]
fn apply_barrier_collects_node_errors() {
    let app = build_app();
    let mut state = WorkflowState::new();
    let event = ErrorEvent::node("writer", 1, ErrorChain::msg("low confidence"))
        .with_tag("quality");
    let records = vec![(
        Activation::top_level(custom("writer")),
        NodePartial::new().with_errors(vec![event]),
    )];

    let outcome = app
        .apply_barrier(&mut state, &records)
        .expect("barrier succeeds");
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(state.errors.len(), 1);
    assert!(outcome.updated_keys.is_empty());
}

#[test]
fn app_exposes_topology() {
    let app = build_app();
    assert_eq!(app.nodes().len(), 1);
    assert!(app.edges().contains_key(&NodeKind::Start));
    assert_eq!(
        app.reducer_registry().policy_for("count"),
        ReducerPolicy::Increment
    );
    let summary = app.incoming_summary(&custom("writer")).expect("summary");
    assert_eq!(summary.sources, vec![NodeKind::Start]);
    assert!(!summary.map_spawned);
}
