use async_trait::async_trait;
use serde_json::json;

use loomflow::channels::errors::ErrorEvent;
use loomflow::control::{InterruptRequest, InterruptResponse};
use loomflow::event_bus::EventBus;
use loomflow::node::{
    Node, NodeContext, NodeContextError, NodeError, NodeOutput, NodePartial,
};
use loomflow::state::{StateSnapshot, WorkflowState};

fn make_ctx(step: u64, listen: bool) -> (NodeContext, EventBus) {
    let event_bus = EventBus::with_sinks(Vec::new());
    if listen {
        event_bus.listen_for_events();
    }
    let ctx = NodeContext {
        node_id: "test-node".to_string(),
        step,
        event_emitter: event_bus.get_emitter(),
    };
    (ctx, event_bus)
}

#[tokio::test]
async fn node_context_creation() {
    let (ctx, _event_bus) = make_ctx(5, true);
    assert_eq!(ctx.node_id, "test-node");
    assert_eq!(ctx.step, 5);
    assert!(ctx.emit("scope", "message").is_ok());
}

#[tokio::test]
async fn node_context_emit_fails_without_bus() {
    let (ctx, event_bus) = make_ctx(1, false);
    drop(event_bus);
    let result = ctx.emit("scope", "message");
    assert!(matches!(result, Err(NodeContextError::EventBusUnavailable)));
}

#[test]
fn node_partial_default_is_empty() {
    let partial = NodePartial::default();
    assert!(partial.updates.is_none());
    assert!(partial.errors.is_none());
}

#[test]
fn node_partial_builders() {
    let partial = NodePartial::new()
        .with_update("summary", json!("text"))
        .with_update("count", json!(1))
        .with_errors(vec![ErrorEvent::default()]);
    let updates = partial.updates.expect("updates set");
    assert_eq!(updates.len(), 2);
    assert_eq!(updates.get("summary"), Some(&json!("text")));
    assert_eq!(partial.errors.expect("errors set").len(), 1);
}

#[test]
fn node_output_from_impls() {
    let output: NodeOutput = NodePartial::new().with_update("k", json!(1)).into();
    assert!(matches!(output, NodeOutput::Partial(_)));

    let output: NodeOutput = InterruptRequest::new("review", json!({"q": "ok?"})).into();
    match output {
        NodeOutput::Interrupt(request) => {
            assert_eq!(request.kind, "review");
            assert_eq!(request.payload, json!({"q": "ok?"}));
        }
        NodeOutput::Partial(_) => panic!("expected interrupt"),
    }
}

#[test]
fn interrupt_response_builders() {
    let response = InterruptResponse::new("review")
        .with_value("answer", json!("fine"))
        .with_value("score", json!(0.9));
    assert_eq!(response.kind, "review");
    let updates = response.update.updates.expect("updates set");
    assert_eq!(updates.len(), 2);
}

struct EchoNode;

#[async_trait]
impl Node for EchoNode {
    fn reads(&self) -> Vec<String> {
        vec!["input".into()]
    }

    fn writes(&self) -> Vec<String> {
        vec!["echo".into()]
    }

    async fn run(
        &self,
        snapshot: StateSnapshot,
        ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        ctx.emit("echo", "running")?;
        let input = snapshot
            .get_str("input")
            .ok_or(NodeError::MissingInput { what: "input" })?;
        Ok(NodePartial::new()
            .with_update("echo", json!(input.to_uppercase()))
            .into())
    }
}

#[tokio::test]
async fn node_trait_success() {
    let (ctx, _event_bus) = make_ctx(0, true);
    let snapshot = WorkflowState::builder()
        .with_value("input", json!("hello"))
        .build()
        .snapshot();
    let output = EchoNode.run(snapshot, ctx).await.expect("node succeeds");
    match output {
        NodeOutput::Partial(partial) => {
            assert_eq!(
                partial.updates.expect("updates").get("echo"),
                Some(&json!("HELLO"))
            );
        }
        NodeOutput::Interrupt(_) => panic!("expected partial"),
    }
}

#[tokio::test]
async fn node_trait_missing_input() {
    let (ctx, _event_bus) = make_ctx(0, true);
    let snapshot = WorkflowState::new().snapshot();
    let result = EchoNode.run(snapshot, ctx).await;
    assert!(matches!(
        result,
        Err(NodeError::MissingInput { what: "input" })
    ));
}

#[test]
fn snapshot_typed_getters() {
    let snapshot = WorkflowState::builder()
        .with_value("name", json!("loomflow"))
        .with_value("metric", json!(0.75))
        .with_value("rounds", json!(3))
        .build()
        .snapshot();
    assert_eq!(snapshot.get_str("name"), Some("loomflow"));
    assert_eq!(snapshot.get_f64("metric"), Some(0.75));
    assert_eq!(snapshot.get_i64("rounds"), Some(3));
    assert!(snapshot.get("missing").is_none());
    assert!(snapshot.branch.is_none());
}
