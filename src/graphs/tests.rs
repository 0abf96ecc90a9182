use std::sync::Arc;

use async_trait::async_trait;

use super::{GraphBuilder, GraphDefinitionError, IterationGuard};
use crate::node::{Node, NodeContext, NodeError, NodeOutput, NodePartial};
use crate::reducers::ReducerPolicy;
use crate::state::StateSnapshot;
use crate::types::NodeKind;

struct Probe {
    writes: Vec<String>,
}

impl Probe {
    fn new() -> Self {
        Self { writes: Vec::new() }
    }

    fn writing(key: &str) -> Self {
        Self {
            writes: vec![key.to_string()],
        }
    }
}

#[async_trait]
impl Node for Probe {
    fn writes(&self) -> Vec<String> {
        self.writes.clone()
    }

    async fn run(&self, _: StateSnapshot, _: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(NodePartial::default().into())
    }
}

fn custom(name: &str) -> NodeKind {
    NodeKind::Custom(name.to_string())
}

#[test]
fn linear_graph_compiles() {
    let app = GraphBuilder::new()
        .add_node(custom("a"), Probe::new())
        .add_node(custom("b"), Probe::new())
        .add_edge(NodeKind::Start, custom("a"))
        .add_edge(custom("a"), custom("b"))
        .add_edge(custom("b"), NodeKind::End)
        .compile()
        .expect("linear graph should compile");
    assert_eq!(app.nodes().len(), 2);
    assert!(!app.is_deferred(&custom("a")));
}

#[test]
fn empty_graph_rejected() {
    let err = GraphBuilder::new().compile().expect_err("must fail");
    assert!(matches!(err, GraphDefinitionError::EmptyGraph));
}

#[test]
fn missing_start_edge_rejected() {
    let err = GraphBuilder::new()
        .add_node(custom("a"), Probe::new())
        .add_edge(custom("a"), NodeKind::End)
        .compile()
        .expect_err("must fail");
    assert!(matches!(err, GraphDefinitionError::NoStartEdge));
}

#[test]
fn dangling_static_edge_rejected() {
    let err = GraphBuilder::new()
        .add_node(custom("a"), Probe::new())
        .add_edge(NodeKind::Start, custom("a"))
        .add_edge(custom("a"), custom("ghost"))
        .compile()
        .expect_err("must fail");
    match err {
        GraphDefinitionError::DanglingEdge { from, to } => {
            assert_eq!(from, custom("a"));
            assert_eq!(to, custom("ghost"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn unknown_map_target_rejected() {
    let err = GraphBuilder::new()
        .add_node(custom("a"), Probe::new())
        .add_edge(NodeKind::Start, custom("a"))
        .add_map_edge(custom("a"), Arc::new(|_| Vec::new()), vec![custom("ghost")])
        .compile()
        .expect_err("must fail");
    assert!(matches!(
        err,
        GraphDefinitionError::UnknownMapTarget { .. }
    ));
}

#[test]
fn unreachable_node_rejected() {
    let err = GraphBuilder::new()
        .add_node(custom("a"), Probe::new())
        .add_node(custom("island"), Probe::new())
        .add_edge(NodeKind::Start, custom("a"))
        .add_edge(custom("a"), NodeKind::End)
        .add_edge(custom("island"), NodeKind::End)
        .compile()
        .expect_err("must fail");
    match err {
        GraphDefinitionError::UnreachableNode { node } => assert_eq!(node, custom("island")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn guard_counter_requires_increment_policy() {
    let err = GraphBuilder::new()
        .add_node(custom("a"), Probe::new())
        .add_edge(NodeKind::Start, custom("a"))
        .add_guarded_conditional_edge(
            custom("a"),
            Arc::new(|_| vec![NodeKind::End]),
            vec![custom("a")],
            IterationGuard::new("rounds", 3),
        )
        .compile()
        .expect_err("must fail");
    match err {
        GraphDefinitionError::GuardCounterPolicy { counter_key, .. } => {
            assert_eq!(counter_key, "rounds");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn unguarded_cycle_rejected() {
    let err = GraphBuilder::new()
        .add_node(custom("a"), Probe::new())
        .add_node(custom("b"), Probe::new())
        .add_edge(NodeKind::Start, custom("a"))
        .add_edge(custom("a"), custom("b"))
        .add_edge(custom("b"), custom("a"))
        .compile()
        .expect_err("must fail");
    match err {
        GraphDefinitionError::UnguardedCycle { nodes } => {
            assert_eq!(nodes, vec!["a".to_string(), "b".to_string()]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn guarded_cycle_accepted() {
    let app = GraphBuilder::new()
        .add_node(custom("a"), Probe::writing("rounds"))
        .add_node(custom("b"), Probe::new())
        .add_edge(NodeKind::Start, custom("a"))
        .add_edge(custom("a"), custom("b"))
        .add_guarded_conditional_edge(
            custom("b"),
            Arc::new(|_| vec![NodeKind::Custom("a".into())]),
            vec![custom("a")],
            IterationGuard::new("rounds", 3),
        )
        .with_policy("rounds", ReducerPolicy::Increment)
        .compile()
        .expect("guarded cycle should compile");
    assert_eq!(app.conditional_edges().len(), 1);
}

#[test]
fn deferred_cycle_rejected() {
    let err = GraphBuilder::new()
        .add_deferred_node(custom("a"), Probe::new())
        .add_deferred_node(custom("b"), Probe::new())
        .add_edge(NodeKind::Start, custom("a"))
        .add_edge(custom("a"), custom("b"))
        .add_guarded_conditional_edge(
            custom("b"),
            Arc::new(|_| vec![NodeKind::End]),
            vec![custom("a")],
            IterationGuard::new("rounds", 3),
        )
        .with_policy("rounds", ReducerPolicy::Increment)
        .compile()
        .expect_err("must fail");
    assert!(matches!(err, GraphDefinitionError::DeferredCycle { .. }));
}

#[test]
fn incoming_summary_reports_map_spawn() {
    let app = GraphBuilder::new()
        .add_node(custom("plan"), Probe::new())
        .add_node(custom("worker"), Probe::new())
        .add_deferred_node(custom("join"), Probe::new())
        .add_edge(NodeKind::Start, custom("plan"))
        .add_map_edge(custom("plan"), Arc::new(|_| Vec::new()), vec![custom("worker")])
        .add_edge(custom("worker"), custom("join"))
        .add_edge(custom("join"), NodeKind::End)
        .compile()
        .expect("fan-out graph should compile");

    let worker = app
        .incoming_summary(&custom("worker"))
        .expect("worker summary");
    assert!(worker.map_spawned);
    assert!(worker.sources.is_empty());

    let join = app.incoming_summary(&custom("join")).expect("join summary");
    assert!(!join.map_spawned);
    assert_eq!(join.sources, vec![custom("worker")]);

    // The join is the deferred target a zero-item fan-out must satisfy.
    assert_eq!(app.map_joins(0), &[custom("join")]);
}

#[test]
fn virtual_node_registration_ignored() {
    let app = GraphBuilder::new()
        .add_node(NodeKind::Start, Probe::new())
        .add_node(custom("a"), Probe::new())
        .add_edge(NodeKind::Start, custom("a"))
        .compile()
        .expect("graph should compile");
    assert_eq!(app.nodes().len(), 1);
}
