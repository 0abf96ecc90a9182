use async_trait::async_trait;
use serde_json::json;

use loomflow::app::App;
use loomflow::control::InterruptRequest;
use loomflow::event_bus::{Event, STREAM_END_SCOPE};
use loomflow::graphs::GraphBuilder;
use loomflow::node::{Node, NodeContext, NodeError, NodeOutput, NodePartial};
use loomflow::reducers::ReducerPolicy;
use loomflow::runtimes::RuntimeConfig;
use loomflow::state::{StateSnapshot, WorkflowState};
use loomflow::types::NodeKind;

fn custom(name: &str) -> NodeKind {
    NodeKind::Custom(name.to_string())
}

struct Stamp {
    key: &'static str,
}

#[async_trait]
impl Node for Stamp {
    fn writes(&self) -> Vec<String> {
        vec![self.key.to_string()]
    }

    async fn run(&self, _: StateSnapshot, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        ctx.emit("stamp", format!("writing {}", self.key))?;
        Ok(NodePartial::new().with_update(self.key, json!(true)).into())
    }
}

fn linear_app() -> App {
    GraphBuilder::new()
        .add_node(custom("first"), Stamp { key: "first_done" })
        .add_node(custom("second"), Stamp { key: "second_done" })
        .add_edge(NodeKind::Start, custom("first"))
        .add_edge(custom("first"), custom("second"))
        .add_edge(custom("second"), NodeKind::End)
        .with_policy("first_done", ReducerPolicy::Overwrite)
        .with_policy("second_done", ReducerPolicy::Overwrite)
        .with_runtime_config(RuntimeConfig::default().with_quiet_event_bus())
        .compile()
        .expect("graph compiles")
}

#[tokio::test]
async fn stream_is_finite_and_ends_with_a_completion_marker() {
    let app = linear_app();
    let (handle, mut stream) = app.stream(WorkflowState::new()).await;

    let collector = tokio::spawn(async move {
        let mut events = Vec::new();
        while let Some(event) = stream.recv().await {
            events.push(event);
        }
        events
    });

    let outcome = handle.join().await.expect("run succeeds");
    assert!(outcome.is_completed());

    let events = collector.await.expect("collector succeeds");
    let last = events.last().expect("at least the end marker");
    assert_eq!(last.scope_label(), Some(STREAM_END_SCOPE));
    assert!(last.message().contains("status=completed"));

    // One step event per superstep, carrying the post-barrier values.
    let steps: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            Event::Step(step) => Some(step),
            _ => None,
        })
        .collect();
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].step(), 1);
    assert_eq!(steps[0].ran(), ["first".to_string()]);
    assert_eq!(steps[0].updated_keys(), ["first_done".to_string()]);
    assert_eq!(steps[1].values().get("second_done"), Some(&json!(true)));

    // Node-emitted events ride the same feed.
    assert!(
        events
            .iter()
            .any(|event| event.scope_label() == Some("stamp"))
    );
}

struct Pause;

#[async_trait]
impl Node for Pause {
    fn writes(&self) -> Vec<String> {
        vec!["answer".into()]
    }

    async fn run(&self, _: StateSnapshot, _: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(InterruptRequest::new("approval", json!({})).into())
    }
}

#[tokio::test]
async fn stream_ends_with_a_suspension_marker() {
    let app = GraphBuilder::new()
        .add_node(custom("pause"), Pause)
        .add_edge(NodeKind::Start, custom("pause"))
        .add_edge(custom("pause"), NodeKind::End)
        .with_policy("answer", ReducerPolicy::Overwrite)
        .with_runtime_config(RuntimeConfig::default().with_quiet_event_bus())
        .compile()
        .expect("graph compiles");

    let (handle, mut stream) = app.stream(WorkflowState::new()).await;

    let collector = tokio::spawn(async move {
        let mut events = Vec::new();
        while let Some(event) = stream.recv().await {
            events.push(event);
        }
        events
    });

    let outcome = handle.join().await.expect("run succeeds");
    assert!(outcome.is_suspended());

    let events = collector.await.expect("collector succeeds");
    let last = events.last().expect("at least the end marker");
    assert_eq!(last.scope_label(), Some(STREAM_END_SCOPE));
    assert!(last.message().contains("status=suspended"));
    assert!(last.message().contains("kind=approval"));
}
