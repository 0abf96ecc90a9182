//! Node execution framework for the loomflow workflow engine.
//!
//! This module provides the core abstractions for executable workflow
//! nodes: the [`Node`] trait with its declared read/write contract, the
//! execution context, partial state updates, and error handling.

use std::sync::Arc;

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;

use crate::channels::errors::ErrorEvent;
use crate::control::InterruptRequest;
use crate::event_bus::{Event, EventEmitter};
use crate::state::StateSnapshot;

// ============================================================================
// Core Trait
// ============================================================================

/// Core trait defining executable workflow nodes.
///
/// A node reads part of the state snapshot and produces either a partial
/// update restricted to its declared write keys, or an interrupt request
/// that suspends the run. The engine's only contract with a node is this
/// declared interface — side effects (model calls, I/O) inside `run` are
/// invisible to it and are the node's own responsibility, including any
/// retry policy.
///
/// # Write declarations
///
/// [`writes`](Node::writes) names every key the node may update. An update
/// touching any other key is a fatal contract violation at the barrier.
/// [`reads`](Node::reads) documents inputs; snapshots are not filtered, so
/// a node may read any key, but it can never mutate in place.
///
/// # Examples
///
/// ```rust
/// use loomflow::node::{Node, NodeContext, NodeError, NodeOutput, NodePartial};
/// use loomflow::state::StateSnapshot;
/// use async_trait::async_trait;
/// use serde_json::json;
///
/// struct ScoreNode;
///
/// #[async_trait]
/// impl Node for ScoreNode {
///     fn reads(&self) -> Vec<String> {
///         vec!["draft".into()]
///     }
///
///     fn writes(&self) -> Vec<String> {
///         vec!["score".into()]
///     }
///
///     async fn run(
///         &self,
///         snapshot: StateSnapshot,
///         _ctx: NodeContext,
///     ) -> Result<NodeOutput, NodeError> {
///         let draft = snapshot
///             .get_str("draft")
///             .ok_or(NodeError::MissingInput { what: "draft" })?;
///         let score = draft.len() as f64 / 100.0;
///         Ok(NodePartial::new().with_update("score", json!(score)).into())
///     }
/// }
/// ```
#[async_trait]
pub trait Node: Send + Sync {
    /// Keys this node reads. Documentation-level contract; snapshots are
    /// not filtered.
    fn reads(&self) -> Vec<String> {
        Vec::new()
    }

    /// Keys this node may write. Enforced at the barrier.
    fn writes(&self) -> Vec<String>;

    /// Execute this node against the given snapshot.
    async fn run(
        &self,
        snapshot: StateSnapshot,
        ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError>;
}

// ============================================================================
// Execution Context
// ============================================================================

/// Execution context passed to nodes during workflow execution.
///
/// Provides nodes with their identity, the current superstep number, and a
/// handle for emitting observability events.
#[derive(Clone, Debug)]
pub struct NodeContext {
    /// Identifier of the executing node.
    pub node_id: String,
    /// Current superstep number.
    pub step: u64,
    /// Emitter for the run's event bus.
    pub event_emitter: Arc<dyn EventEmitter>,
}

impl NodeContext {
    /// Emit a node-scoped event enriched with this context's metadata.
    pub fn emit(
        &self,
        scope: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<(), NodeContextError> {
        self.event_emitter
            .emit(Event::node_message_with_meta(
                self.node_id.clone(),
                self.step,
                scope,
                message,
            ))
            .map_err(|_| NodeContextError::EventBusUnavailable)
    }
}

// ============================================================================
// Node Results
// ============================================================================

/// Partial state update returned by node execution.
///
/// Carries updates for the node's declared write keys plus optional
/// non-fatal error events. The barrier merges updates through each key's
/// declared reducer; it never applies them in place.
///
/// # Examples
///
/// ```rust
/// use loomflow::node::NodePartial;
/// use serde_json::json;
///
/// let partial = NodePartial::new()
///     .with_update("summary", json!("Led the migration..."))
///     .with_update("iterations", json!(1));
/// assert_eq!(partial.updates.as_ref().unwrap().len(), 2);
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodePartial {
    /// Key → value updates, restricted to the node's declared writes.
    pub updates: Option<FxHashMap<String, Value>>,
    /// Non-fatal diagnostics to append to the run's error channel.
    pub errors: Option<Vec<ErrorEvent>>,
}

impl NodePartial {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one key update.
    #[must_use]
    pub fn with_update(mut self, key: impl Into<String>, value: Value) -> Self {
        self.updates
            .get_or_insert_with(FxHashMap::default)
            .insert(key.into(), value);
        self
    }

    /// Replace the whole update map.
    #[must_use]
    pub fn with_updates(mut self, updates: FxHashMap<String, Value>) -> Self {
        self.updates = Some(updates);
        self
    }

    /// Attach non-fatal error events.
    #[must_use]
    pub fn with_errors(mut self, errors: Vec<ErrorEvent>) -> Self {
        self.errors = Some(errors);
        self
    }
}

/// Discriminated result of a node run: a normal update, or a request to
/// suspend the whole run awaiting external input.
#[derive(Clone, Debug)]
pub enum NodeOutput {
    /// Partial update to merge at the barrier.
    Partial(NodePartial),
    /// Suspend the run; the caller receives a checkpoint and this request's
    /// payload instead of a final state.
    Interrupt(InterruptRequest),
}

impl From<NodePartial> for NodeOutput {
    fn from(partial: NodePartial) -> Self {
        NodeOutput::Partial(partial)
    }
}

impl From<InterruptRequest> for NodeOutput {
    fn from(request: InterruptRequest) -> Self {
        NodeOutput::Interrupt(request)
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur when using NodeContext methods.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeContextError {
    /// Event could not be sent because the bus is disconnected.
    #[error("failed to emit event: event bus unavailable")]
    #[diagnostic(
        code(loomflow::node::event_bus_unavailable),
        help("The event bus may be disconnected. Check workflow state.")
    )]
    EventBusUnavailable,
}

/// Fatal errors raised by node execution.
///
/// Returning `Err` aborts the whole run with this node's identity attached.
/// For recoverable conditions that should be tracked without halting, use
/// `NodePartial::errors` instead.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeError {
    /// Expected input data is missing from the state snapshot.
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(loomflow::node::missing_input),
        help("Check that an upstream node produced the required key.")
    )]
    MissingInput { what: &'static str },

    /// External provider or service error.
    #[error("provider error ({provider}): {message}")]
    #[diagnostic(code(loomflow::node::provider))]
    Provider {
        provider: &'static str,
        message: String,
    },

    /// JSON serialization/deserialization error.
    #[error(transparent)]
    #[diagnostic(code(loomflow::node::serde_json))]
    Serde(#[from] serde_json::Error),

    /// Input validation failed.
    #[error("validation failed: {0}")]
    #[diagnostic(
        code(loomflow::node::validation),
        help("Check input data format and required fields.")
    )]
    ValidationFailed(String),

    /// Event bus communication error.
    #[error("event bus error: {0}")]
    #[diagnostic(code(loomflow::node::event_bus))]
    EventBus(#[from] NodeContextError),
}
