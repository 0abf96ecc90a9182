use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use loomflow::app::App;
use loomflow::control::{InterruptRequest, InterruptResponse};
use loomflow::graphs::{Dispatch, GraphBuilder};
use loomflow::node::{Node, NodeContext, NodeError, NodeOutput, NodePartial};
use loomflow::reducers::ReducerPolicy;
use loomflow::runtimes::{RunOutcome, RunnerError, RuntimeConfig};
use loomflow::state::{StateSnapshot, WorkflowState};
use loomflow::types::NodeKind;

fn custom(name: &str) -> NodeKind {
    NodeKind::Custom(name.to_string())
}

fn quiet_config() -> RuntimeConfig {
    RuntimeConfig::default().with_quiet_event_bus()
}

/// Always asks for human feedback; the resume response stands in for its
/// return value.
struct Ask;

#[async_trait]
impl Node for Ask {
    fn writes(&self) -> Vec<String> {
        vec!["answer".into()]
    }

    async fn run(&self, _: StateSnapshot, _: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(InterruptRequest::new(
            "human_feedback",
            json!({"question": "Any feedback on the cover letter?"}),
        )
        .into())
    }
}

fn ask_app() -> App {
    GraphBuilder::new()
        .add_node(custom("ask"), Ask)
        .add_edge(NodeKind::Start, custom("ask"))
        .add_edge(custom("ask"), NodeKind::End)
        .with_policy("answer", ReducerPolicy::Overwrite)
        .with_runtime_config(quiet_config())
        .compile()
        .expect("graph compiles")
}

#[tokio::test]
async fn sole_interrupting_node_suspends_instead_of_completing() {
    let app = ask_app();
    let outcome = app
        .invoke(WorkflowState::new())
        .await
        .expect("invoke succeeds");
    let (checkpoint, interrupt) = outcome.suspended().expect("run suspends");

    assert_eq!(interrupt.kind, "human_feedback");
    assert_eq!(
        interrupt.payload,
        json!({"question": "Any feedback on the cover letter?"})
    );
    assert_eq!(checkpoint.suspended.node, custom("ask"));
    assert!(checkpoint.pending.is_empty());

    // A matching-kind response replaces the node's return value and the
    // run reaches completion.
    let response = InterruptResponse::new("human_feedback")
        .with_value("answer", json!("tighten the second paragraph"));
    let state = app
        .resume(&checkpoint, response)
        .await
        .expect("resume succeeds")
        .completed()
        .expect("run completes");
    assert_eq!(
        state.get("answer"),
        Some(&json!("tighten the second paragraph"))
    );
}

#[tokio::test]
async fn mismatched_kind_is_rejected_and_checkpoint_stays_usable() {
    let app = ask_app();
    let (checkpoint, _) = app
        .invoke(WorkflowState::new())
        .await
        .expect("invoke succeeds")
        .suspended()
        .expect("run suspends");

    let err = app
        .resume(&checkpoint, InterruptResponse::new("wrong_kind"))
        .await
        .expect_err("mismatch must fail");
    match err {
        RunnerError::InterruptMismatch { expected, got } => {
            assert_eq!(expected, "human_feedback");
            assert_eq!(got, "wrong_kind");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // Corrected retry on the same checkpoint.
    let state = app
        .resume(
            &checkpoint,
            InterruptResponse::new("human_feedback").with_value("answer", json!("ok")),
        )
        .await
        .expect("corrected resume succeeds")
        .completed()
        .expect("run completes");
    assert_eq!(state.get("answer"), Some(&json!("ok")));
}

/// Reviews one item per branch; unanswered items raise an interrupt.
struct Review;

#[async_trait]
impl Node for Review {
    fn reads(&self) -> Vec<String> {
        vec!["answers".into()]
    }

    fn writes(&self) -> Vec<String> {
        vec!["reviews".into()]
    }

    async fn run(
        &self,
        snapshot: StateSnapshot,
        _: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let item = snapshot
            .branch
            .as_ref()
            .ok_or(NodeError::MissingInput { what: "branch" })?
            .item
            .clone();
        let id = item.as_str().unwrap_or_default().to_string();
        let answered = snapshot
            .get("answers")
            .and_then(|answers| answers.get(&id))
            .cloned();
        match answered {
            Some(answer) => Ok(NodePartial::new()
                .with_update("reviews", json!({ id: answer }))
                .into()),
            None => Ok(InterruptRequest::new("item_review", json!({"item": id})).into()),
        }
    }
}

/// Deferred join counting reviewed items.
struct Collect;

#[async_trait]
impl Node for Collect {
    fn reads(&self) -> Vec<String> {
        vec!["reviews".into()]
    }

    fn writes(&self) -> Vec<String> {
        vec!["collected".into()]
    }

    async fn run(
        &self,
        snapshot: StateSnapshot,
        _: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let collected = snapshot
            .get("reviews")
            .and_then(Value::as_object)
            .map(|reviews| reviews.len())
            .unwrap_or(0);
        Ok(NodePartial::new()
            .with_update("collected", json!(collected))
            .into())
    }
}

fn review_app() -> App {
    let fan_out = Arc::new(|snapshot: &StateSnapshot| {
        snapshot
            .get("items")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|item| Dispatch::new(custom("review"), item.clone()))
                    .collect()
            })
            .unwrap_or_default()
    });

    GraphBuilder::new()
        .add_node(custom("plan"), PassThrough)
        .add_node(custom("review"), Review)
        .add_deferred_node(custom("collect"), Collect)
        .add_edge(NodeKind::Start, custom("plan"))
        .add_map_edge(custom("plan"), fan_out, vec![custom("review")])
        .add_edge(custom("review"), custom("collect"))
        .add_edge(custom("collect"), NodeKind::End)
        .with_policy("reviews", ReducerPolicy::MergeBySubkey)
        .with_policy("collected", ReducerPolicy::Overwrite)
        .with_runtime_config(quiet_config())
        .compile()
        .expect("graph compiles")
}

struct PassThrough;

#[async_trait]
impl Node for PassThrough {
    fn writes(&self) -> Vec<String> {
        Vec::new()
    }

    async fn run(&self, _: StateSnapshot, _: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(NodePartial::default().into())
    }
}

#[tokio::test]
async fn branch_interrupt_suspends_whole_run_and_siblings_stay_pending() {
    let app = review_app();
    // "a" is pre-answered; the "b" branch interrupts mid-fan-out.
    let initial = WorkflowState::builder()
        .with_value("items", json!(["a", "b"]))
        .with_value("answers", json!({"a": "approved"}))
        .build();

    let (checkpoint, interrupt) = app
        .invoke(initial)
        .await
        .expect("invoke succeeds")
        .suspended()
        .expect("run suspends");
    assert_eq!(interrupt.kind, "item_review");
    assert_eq!(interrupt.payload, json!({"item": "b"}));
    // The sibling's merge already landed before suspension.
    assert_eq!(
        checkpoint.state.get("reviews"),
        Some(&json!({"a": "approved"}))
    );

    let state = app
        .resume(
            &checkpoint,
            InterruptResponse::new("item_review")
                .with_update(NodePartial::new().with_update("reviews", json!({"b": "revised"}))),
        )
        .await
        .expect("resume succeeds")
        .completed()
        .expect("run completes");

    assert_eq!(
        state.get("reviews"),
        Some(&json!({"a": "approved", "b": "revised"}))
    );
    assert_eq!(state.get("collected"), Some(&json!(2)));
}

#[tokio::test]
async fn a_run_may_suspend_and_resume_repeatedly() {
    let app = review_app();
    // No answers seeded: both branches interrupt, one suspension at a time.
    let initial = WorkflowState::builder()
        .with_value("items", json!(["a", "b"]))
        .build();

    let (first_checkpoint, first_interrupt) = app
        .invoke(initial)
        .await
        .expect("invoke succeeds")
        .suspended()
        .expect("first suspension");
    assert_eq!(first_interrupt.payload, json!({"item": "a"}));

    let (second_checkpoint, second_interrupt) = app
        .resume(
            &first_checkpoint,
            InterruptResponse::new("item_review")
                .with_update(NodePartial::new().with_update("reviews", json!({"a": "ok"}))),
        )
        .await
        .expect("first resume succeeds")
        .suspended()
        .expect("second suspension");
    assert_eq!(second_interrupt.payload, json!({"item": "b"}));

    let state = app
        .resume(
            &second_checkpoint,
            InterruptResponse::new("item_review")
                .with_update(NodePartial::new().with_update("reviews", json!({"b": "ok"}))),
        )
        .await
        .expect("second resume succeeds")
        .completed()
        .expect("run completes");

    assert_eq!(state.get("collected"), Some(&json!(2)));
}

#[tokio::test]
async fn resume_response_is_bound_by_the_suspended_nodes_writes() {
    let app = ask_app();
    let (checkpoint, _) = app
        .invoke(WorkflowState::new())
        .await
        .expect("invoke succeeds")
        .suspended()
        .expect("run suspends");

    let err = app
        .resume(
            &checkpoint,
            InterruptResponse::new("human_feedback").with_value("not_declared", json!(1)),
        )
        .await
        .expect_err("undeclared key must fail");
    assert!(matches!(err, RunnerError::ReducerConflict(_)));
}

#[tokio::test]
async fn run_outcome_helpers_expose_both_arms() {
    let app = ask_app();
    let outcome = app
        .invoke(WorkflowState::new())
        .await
        .expect("invoke succeeds");
    assert!(outcome.is_suspended());
    assert!(!outcome.is_completed());
    match outcome {
        RunOutcome::Suspended { checkpoint, .. } => {
            assert_eq!(checkpoint.session_id.is_empty(), false);
        }
        RunOutcome::Completed(_) => panic!("expected suspension"),
    }
}
