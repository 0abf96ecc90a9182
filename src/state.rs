//! State management for the loomflow workflow engine.
//!
//! A run's state is a mapping from string key to JSON value, each key held
//! in its own versioned channel. How concurrent partial updates land in a
//! key is governed by the reducer policy declared for that key at graph
//! compile time ([`crate::reducers::ReducerPolicy`]); the state container
//! itself only stores values and versions.
//!
//! # Core Types
//!
//! - [`WorkflowState`]: the keyed state container plus the engine-owned
//!   errors channel
//! - [`StateSnapshot`]: immutable view handed to nodes and edge functions
//! - [`BranchContext`]: the per-branch binding carried by map-edge fan-out
//!
//! # Examples
//!
//! ```rust
//! use loomflow::state::WorkflowState;
//! use serde_json::json;
//!
//! let state = WorkflowState::builder()
//!     .with_value("job_title", json!("Staff Engineer"))
//!     .with_value("experience", json!({"exp-1": "...", "exp-2": "..."}))
//!     .build();
//!
//! let snapshot = state.snapshot();
//! assert_eq!(snapshot.get("job_title"), Some(&json!("Staff Engineer")));
//! assert!(snapshot.branch.is_none());
//! ```

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::channels::{Channel, ErrorsChannel, ValueChannel, errors::ErrorEvent};

/// The keyed state container for a single run.
///
/// Values are only ever changed by the barrier, which applies node partial
/// updates through each key's declared reducer. Nodes receive read access
/// via [`snapshot`](Self::snapshot).
///
/// The `errors` channel is engine-owned: node-reported non-fatal events,
/// routing failures, and iteration-limit warnings all accumulate there.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct WorkflowState {
    channels: FxHashMap<String, ValueChannel>,
    /// Diagnostic channel for the run.
    pub errors: ErrorsChannel,
}

/// Per-branch binding for an activation spawned by a map edge.
///
/// Branches see the full merged state plus this binding: the fan-out item
/// and its position in the emission order. The index doubles as the
/// deterministic merge rank for the branch's writes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchContext {
    /// Position of the item in the map function's emission order.
    pub index: usize,
    /// The item carried by this branch.
    pub item: Value,
}

/// Immutable view of workflow state at a point in time.
///
/// Snapshots are created by the runner once per superstep and handed to
/// every activation (with the activation's branch binding attached, if
/// any). They are independent of the live state: later barriers do not
/// affect an existing snapshot.
#[derive(Clone, Debug, Default)]
pub struct StateSnapshot {
    /// Key → value at snapshot time.
    pub values: FxHashMap<String, Value>,
    /// Key → channel version at snapshot time.
    pub versions: FxHashMap<String, u32>,
    /// Error events at snapshot time.
    pub errors: Vec<ErrorEvent>,
    /// Version of the errors channel.
    pub errors_version: u32,
    /// Branch binding, present only inside map-edge branches.
    pub branch: Option<BranchContext>,
}

impl StateSnapshot {
    /// Look up a state value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Look up a string value by key.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Look up a numeric value by key.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(Value::as_f64)
    }

    /// Look up an integer value by key.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(Value::as_i64)
    }

    /// Attach a branch binding, producing the view a map-edge branch sees.
    #[must_use]
    pub fn with_branch(mut self, branch: Option<BranchContext>) -> Self {
        self.branch = branch;
        self
    }
}

impl WorkflowState {
    /// Create an empty state (no seeded keys).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for seeding initial values.
    ///
    /// ```rust
    /// use loomflow::state::WorkflowState;
    /// use serde_json::json;
    ///
    /// let state = WorkflowState::builder()
    ///     .with_value("target", json!(0.8))
    ///     .build();
    /// assert_eq!(state.get("target"), Some(&json!(0.8)));
    /// ```
    pub fn builder() -> WorkflowStateBuilder {
        WorkflowStateBuilder::default()
    }

    /// Read a value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.channels.get(key).map(ValueChannel::get)
    }

    /// Version of a key's channel, if the key exists.
    pub fn version_of(&self, key: &str) -> Option<u32> {
        self.channels.get(key).map(|c| c.version())
    }

    /// Clone all current values.
    pub fn values_snapshot(&self) -> FxHashMap<String, Value> {
        self.channels
            .iter()
            .map(|(k, c)| (k.clone(), c.snapshot()))
            .collect()
    }

    /// Create an immutable snapshot of the current state.
    ///
    /// Clones every channel, so cost is proportional to state size.
    pub fn snapshot(&self) -> StateSnapshot {
        let mut values = FxHashMap::default();
        let mut versions = FxHashMap::default();
        for (key, channel) in &self.channels {
            values.insert(key.clone(), channel.snapshot());
            versions.insert(key.clone(), channel.version());
        }
        StateSnapshot {
            values,
            versions,
            errors: self.errors.snapshot(),
            errors_version: self.errors.version(),
            branch: None,
        }
    }

    /// Append a diagnostic event to the errors channel.
    pub fn push_error(&mut self, event: ErrorEvent) {
        let next = self.errors.version().saturating_add(1);
        self.errors.get_mut().push(event);
        self.errors.set_version(next);
    }

    /// Mutable channel access for reducer application; creates the channel
    /// on first write to a key.
    pub(crate) fn channel_entry(&mut self, key: &str) -> &mut ValueChannel {
        self.channels.entry(key.to_string()).or_default()
    }

    /// Iterate channels for persistence.
    pub(crate) fn channels(&self) -> &FxHashMap<String, ValueChannel> {
        &self.channels
    }

    /// Rebuild a state from persisted parts.
    pub(crate) fn from_parts(
        channels: FxHashMap<String, ValueChannel>,
        errors: ErrorsChannel,
    ) -> Self {
        Self { channels, errors }
    }
}

/// Builder for seeding a [`WorkflowState`].
///
/// Seeded keys start at version 1; reducer policies do not apply to the
/// seed (it is the pre-run baseline, not a partial update).
#[derive(Debug, Default)]
pub struct WorkflowStateBuilder {
    values: FxHashMap<String, Value>,
}

impl WorkflowStateBuilder {
    /// Seed one key with an initial value.
    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    /// Build the final state.
    pub fn build(self) -> WorkflowState {
        let channels = self
            .values
            .into_iter()
            .map(|(k, v)| (k, ValueChannel::new(v, 1)))
            .collect();
        WorkflowState {
            channels,
            errors: ErrorsChannel::default(),
        }
    }
}
