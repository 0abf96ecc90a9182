//! Core identifier types for the loomflow workflow engine.
//!
//! [`NodeKind`] names nodes in a workflow graph. `Start` and `End` are
//! virtual endpoints used for wiring only; every executable node is a
//! `Custom` kind. The encode/decode pair gives checkpoints a stable,
//! human-readable string form.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a node within a workflow graph.
///
/// `NodeKind` is the unique key for nodes in the execution graph. `Start`
/// and `End` receive special handling (they are never executed); arbitrary
/// application nodes use the `Custom` variant.
///
/// # Examples
///
/// ```rust
/// use loomflow::types::NodeKind;
///
/// let worker = NodeKind::Custom("summarize".to_string());
///
/// let encoded = worker.encode();
/// assert_eq!(encoded, "Custom:summarize");
/// assert_eq!(NodeKind::decode(&encoded), worker);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// Virtual entry point. Never registered or executed; edges from `Start`
    /// define the initial frontier.
    Start,

    /// Virtual terminal. Never registered or executed; routing to `End`
    /// completes that path of the workflow.
    End,

    /// Application node identified by a user-defined string, unique within
    /// the graph.
    Custom(String),
}

impl NodeKind {
    /// Encode a `NodeKind` into its persisted string form.
    ///
    /// - `Start` → `"Start"`
    /// - `End` → `"End"`
    /// - `Custom("X")` → `"Custom:X"`
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            NodeKind::Start => "Start".to_string(),
            NodeKind::End => "End".to_string(),
            NodeKind::Custom(s) => format!("Custom:{s}"),
        }
    }

    /// Decode a persisted string form back into a `NodeKind`.
    ///
    /// Unrecognized formats fall back to `Custom(s)` so older checkpoints
    /// keep round-tripping.
    pub fn decode(s: &str) -> Self {
        if s == "Start" {
            NodeKind::Start
        } else if s == "End" {
            NodeKind::End
        } else if let Some(rest) = s.strip_prefix("Custom:") {
            NodeKind::Custom(rest.to_string())
        } else {
            NodeKind::Custom(s.to_string())
        }
    }

    /// Returns `true` if this is the virtual [`Start`](Self::Start) node.
    #[must_use]
    pub fn is_start(&self) -> bool {
        matches!(self, Self::Start)
    }

    /// Returns `true` if this is the virtual [`End`](Self::End) node.
    #[must_use]
    pub fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }

    /// Returns `true` if this is an executable custom node.
    #[must_use]
    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom(_))
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "Start"),
            Self::End => write!(f, "End"),
            Self::Custom(name) => write!(f, "{}", name),
        }
    }
}

// Developer experience: allow string literals where a NodeKind is expected.
impl From<&str> for NodeKind {
    fn from(s: &str) -> Self {
        match s {
            "Start" => NodeKind::Start,
            "End" => NodeKind::End,
            other => NodeKind::Custom(other.to_string()),
        }
    }
}
