//! Control values a node may return instead of a state update.
//!
//! An [`InterruptRequest`] suspends the whole run until the caller supplies
//! a matching [`InterruptResponse`]. The pairing is declared by a shared
//! `kind` tag; a resume with a mismatched kind is rejected without
//! consuming the checkpoint. The payload shape is opaque to the engine —
//! the presentation layer turns it into a human prompt and back.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::node::NodePartial;

/// A typed request for external input, returned by a node to suspend the
/// run at its own position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptRequest {
    /// Pairing tag; the eventual response must carry the same kind.
    pub kind: String,
    /// Opaque payload describing what input is needed.
    pub payload: Value,
}

impl InterruptRequest {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// The externally supplied answer to a pending [`InterruptRequest`].
///
/// On resume the carried update is treated exactly as the suspended node's
/// return value: it passes through declared-write validation and reducer
/// merge like any other partial.
#[derive(Clone, Debug, Default)]
pub struct InterruptResponse {
    /// Must match the pending request's kind.
    pub kind: String,
    /// The update standing in for the suspended node's return value.
    pub update: NodePartial,
}

impl InterruptResponse {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            update: NodePartial::default(),
        }
    }

    /// Attach the partial update delivered on resume.
    #[must_use]
    pub fn with_update(mut self, update: NodePartial) -> Self {
        self.update = update;
        self
    }

    /// Convenience for single-key responses.
    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.update = self.update.with_update(key, value);
        self
    }
}
