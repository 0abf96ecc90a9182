use std::fmt;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Scope of the diagnostic event that terminates every event stream.
///
/// The message reports final status: `status=completed`, `status=suspended`,
/// or `status=error`.
pub const STREAM_END_SCOPE: &str = "__loomflow_stream_end__";

/// Structured events emitted during workflow execution.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum Event {
    /// Emitted by nodes through their context.
    Node(NodeEvent),
    /// Emitted by the runner after each barrier: the intermediate-state
    /// payload of [`App::stream`](crate::app::App::stream).
    Step(StepEvent),
    /// Engine diagnostics (stream termination, warnings).
    Diagnostic(DiagnosticEvent),
}

impl Event {
    pub fn node_message(scope: impl Into<String>, message: impl Into<String>) -> Self {
        Event::Node(NodeEvent::new(None, None, scope.into(), message.into()))
    }

    pub fn node_message_with_meta(
        node_id: impl Into<String>,
        step: u64,
        scope: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Event::Node(NodeEvent::new(
            Some(node_id.into()),
            Some(step),
            scope.into(),
            message.into(),
        ))
    }

    pub fn diagnostic(scope: impl Into<String>, message: impl Into<String>) -> Self {
        Event::Diagnostic(DiagnosticEvent {
            scope: scope.into(),
            message: message.into(),
        })
    }

    pub fn step(
        step: u64,
        ran: Vec<String>,
        updated_keys: Vec<String>,
        values: FxHashMap<String, Value>,
    ) -> Self {
        let summary = format!(
            "step={} ran=[{}] updated=[{}]",
            step,
            ran.join(","),
            updated_keys.join(",")
        );
        Event::Step(StepEvent {
            step,
            ran,
            updated_keys,
            values,
            summary,
        })
    }

    pub fn scope_label(&self) -> Option<&str> {
        match self {
            Event::Node(node) => Some(node.scope()),
            Event::Step(_) => Some("step"),
            Event::Diagnostic(diag) => Some(diag.scope()),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Event::Node(node) => node.message(),
            Event::Step(step) => step.summary(),
            Event::Diagnostic(diag) => diag.message(),
        }
    }

    /// Convert to a normalized JSON shape for sinks that serialize events.
    pub fn to_json_value(&self) -> Value {
        use serde_json::json;

        let (event_type, metadata) = match self {
            Event::Node(node) => {
                let mut meta = serde_json::Map::new();
                if let Some(node_id) = node.node_id() {
                    meta.insert("node_id".to_string(), json!(node_id));
                }
                if let Some(step) = node.step() {
                    meta.insert("step".to_string(), json!(step));
                }
                ("node", Value::Object(meta))
            }
            Event::Step(step) => {
                let mut meta = serde_json::Map::new();
                meta.insert("step".to_string(), json!(step.step));
                meta.insert("ran".to_string(), json!(step.ran));
                meta.insert("updated_keys".to_string(), json!(step.updated_keys));
                ("step", Value::Object(meta))
            }
            Event::Diagnostic(_) => ("diagnostic", Value::Object(serde_json::Map::new())),
        };

        json!({
            "type": event_type,
            "scope": self.scope_label(),
            "message": self.message(),
            "metadata": metadata,
        })
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope_label() {
            Some(scope) => write!(f, "[{}] {}", scope, self.message()),
            None => write!(f, "{}", self.message()),
        }
    }
}

/// Event emitted by a node through its [`NodeContext`](crate::node::NodeContext).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeEvent {
    node_id: Option<String>,
    step: Option<u64>,
    scope: String,
    message: String,
}

impl NodeEvent {
    pub fn new(node_id: Option<String>, step: Option<u64>, scope: String, message: String) -> Self {
        Self {
            node_id,
            step,
            scope,
            message,
        }
    }

    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref()
    }

    pub fn step(&self) -> Option<u64> {
        self.step
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Intermediate-state event: one barrier's outcome.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StepEvent {
    step: u64,
    ran: Vec<String>,
    updated_keys: Vec<String>,
    values: FxHashMap<String, Value>,
    summary: String,
}

impl StepEvent {
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Nodes that ran in this superstep, in frontier order.
    pub fn ran(&self) -> &[String] {
        &self.ran
    }

    /// Keys whose content changed at the barrier, sorted.
    pub fn updated_keys(&self) -> &[String] {
        &self.updated_keys
    }

    /// Post-barrier state values.
    pub fn values(&self) -> &FxHashMap<String, Value> {
        &self.values
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }
}

/// Engine diagnostic event.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiagnosticEvent {
    scope: String,
    message: String,
}

impl DiagnosticEvent {
    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
