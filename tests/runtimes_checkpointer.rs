use async_trait::async_trait;
use serde_json::json;

use loomflow::control::InterruptRequest;
use loomflow::graphs::GraphBuilder;
use loomflow::node::{Node, NodeContext, NodeError, NodeOutput};
use loomflow::reducers::ReducerPolicy;
use loomflow::runtimes::{
    Checkpoint, Checkpointer, InMemoryCheckpointer, PersistedCheckpoint, PersistenceError,
    RuntimeConfig, restore_session_state,
};
use loomflow::state::{StateSnapshot, WorkflowState};
use loomflow::types::NodeKind;
use loomflow::utils::json_ext::JsonSerializable;

fn custom(name: &str) -> NodeKind {
    NodeKind::Custom(name.to_string())
}

struct Ask;

#[async_trait]
impl Node for Ask {
    fn writes(&self) -> Vec<String> {
        vec!["answer".into()]
    }

    async fn run(&self, _: StateSnapshot, _: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(InterruptRequest::new("confirm", json!({"summary": "v1"})).into())
    }
}

async fn suspended_checkpoint() -> Checkpoint {
    let app = GraphBuilder::new()
        .add_node(custom("ask"), Ask)
        .add_edge(NodeKind::Start, custom("ask"))
        .add_edge(custom("ask"), NodeKind::End)
        .with_policy("answer", ReducerPolicy::Overwrite)
        .with_runtime_config(RuntimeConfig::default().with_quiet_event_bus())
        .compile()
        .expect("graph compiles");

    let initial = WorkflowState::builder()
        .with_value("draft", json!("cover letter v1"))
        .build();
    let (checkpoint, _) = app
        .invoke(initial)
        .await
        .expect("invoke succeeds")
        .suspended()
        .expect("run suspends");
    checkpoint
}

#[tokio::test]
async fn in_memory_store_saves_loads_and_deletes() {
    let checkpoint = suspended_checkpoint().await;
    let store = InMemoryCheckpointer::new();
    assert!(store.is_empty());

    store
        .save(checkpoint.clone())
        .await
        .expect("save succeeds");
    assert_eq!(store.len(), 1);

    let loaded = store
        .load_latest(&checkpoint.session_id)
        .await
        .expect("load succeeds")
        .expect("checkpoint present");
    assert_eq!(loaded.checkpoint_id, checkpoint.checkpoint_id);
    assert_eq!(loaded.interrupt.kind, "confirm");

    store
        .delete(&checkpoint.checkpoint_id)
        .await
        .expect("delete succeeds");
    assert!(
        store
            .load_latest(&checkpoint.session_id)
            .await
            .expect("load succeeds")
            .is_none()
    );
}

#[tokio::test]
async fn load_latest_returns_most_recent_checkpoint() {
    let first = suspended_checkpoint().await;
    let mut second = first.clone();
    second.checkpoint_id = "ckpt-later".to_string();
    second.step = first.step + 3;
    // Same session for both.
    second.session_id = first.session_id.clone();

    let store = InMemoryCheckpointer::new();
    store.save(first.clone()).await.expect("save first");
    store.save(second).await.expect("save second");

    let loaded = store
        .load_latest(&first.session_id)
        .await
        .expect("load succeeds")
        .expect("checkpoint present");
    assert_eq!(loaded.checkpoint_id, "ckpt-later");
}

#[tokio::test]
async fn checkpoint_round_trips_through_json() {
    let checkpoint = suspended_checkpoint().await;

    let persisted = PersistedCheckpoint::from(&checkpoint);
    let encoded = persisted.to_json_string().expect("serialize");
    let decoded: PersistedCheckpoint =
        JsonSerializable::<PersistenceError>::from_json_str(&encoded).expect("deserialize");
    assert_eq!(decoded, persisted);

    let restored = Checkpoint::try_from(decoded).expect("convert back");
    assert_eq!(restored.checkpoint_id, checkpoint.checkpoint_id);
    assert_eq!(restored.session_id, checkpoint.session_id);
    assert_eq!(restored.step, checkpoint.step);
    assert_eq!(restored.suspended.node, custom("ask"));
    assert_eq!(restored.interrupt, checkpoint.interrupt);
    assert_eq!(
        restored.state.get("draft"),
        Some(&json!("cover letter v1"))
    );
    // The round trip is lossless end to end.
    assert_eq!(PersistedCheckpoint::from(&restored), persisted);
}

#[tokio::test]
async fn restored_sessions_start_from_the_pending_frontier() {
    let checkpoint = suspended_checkpoint().await;
    let session = restore_session_state(&checkpoint, 4);
    assert_eq!(session.step, checkpoint.step);
    assert_eq!(session.frontier, checkpoint.pending);
    assert_eq!(session.state.get("draft"), Some(&json!("cover letter v1")));
}
