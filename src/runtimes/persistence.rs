/*!
Persistence primitives for serializing/deserializing checkpoints.

Design goals:
- Explicit serde-friendly structs decoupled from the in-memory
  representations, so the checkpoint shape stays language- and
  process-agnostic.
- Conversion logic localized in From / TryFrom impls.
- Forward compatibility: unknown NodeKind encodings round-trip as
  `NodeKind::Custom(encoded_string)`.

This module performs no I/O; it is pure data transformation glue for
whatever storage a [`Checkpointer`](super::Checkpointer) implementation
uses.
*/

use chrono::Utc;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::channels::{Channel, ErrorsChannel, ValueChannel, errors::ErrorEvent};
use crate::control::InterruptRequest;
use crate::runtimes::checkpointer::Checkpoint;
use crate::runtimes::runner::DeferredWait;
use crate::schedulers::Activation;
use crate::state::{BranchContext, WorkflowState};
use crate::types::NodeKind;
use crate::utils::json_ext::JsonSerializable;

/// Blanket JSON helpers for all persistence models.
impl<T> JsonSerializable<PersistenceError> for T
where
    T: serde::Serialize + for<'de> serde::de::DeserializeOwned,
{
    fn to_json_string(&self) -> std::result::Result<String, PersistenceError> {
        serde_json::to_string(self).map_err(|e| PersistenceError::Serde { source: e })
    }

    fn from_json_str(s: &str) -> std::result::Result<Self, PersistenceError> {
        serde_json::from_str(s).map_err(|e| PersistenceError::Serde { source: e })
    }
}

/// One persisted state cell: value plus version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedValueChannel {
    pub version: u32,
    #[serde(default)]
    pub value: Value,
}

/// Channel that stores a vector collection with version metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedVecChannel<T> {
    pub version: u32,
    #[serde(default)]
    pub items: Vec<T>,
}

impl<T> Default for PersistedVecChannel<T> {
    fn default() -> Self {
        Self {
            version: 1,
            items: Vec::new(),
        }
    }
}

/// Complete persisted shape of the in-memory WorkflowState.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedState {
    pub channels: FxHashMap<String, PersistedValueChannel>,
    #[serde(default)]
    pub errors: PersistedVecChannel<ErrorEvent>,
}

/// Persisted activation: node in encoded string form plus branch binding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedActivation {
    pub node: String,
    #[serde(default)]
    pub branch: Option<BranchContext>,
}

/// Full persisted checkpoint representation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedCheckpoint {
    pub checkpoint_id: String,
    pub session_id: String,
    pub step: u64,
    pub state: PersistedState,
    pub suspended: PersistedActivation,
    pub interrupt: InterruptRequest,
    #[serde(default)]
    pub pending: Vec<PersistedActivation>,
    /// Deferred wait-table keyed by NodeKind::encode().
    #[serde(default)]
    pub deferred_waits: FxHashMap<String, DeferredWait>,
    /// RFC3339 creation time (keeps chrono out of the serialized shape).
    pub created_at: String,
}

/// Conversion and serialization errors for persistence models.
#[derive(Debug, Error, Diagnostic)]
pub enum PersistenceError {
    #[error("missing field: {0}")]
    #[diagnostic(
        code(loomflow::persistence::missing_field),
        help("Populate the field in the persisted JSON before conversion.")
    )]
    MissingField(&'static str),

    #[error("JSON serialization/deserialization failed: {source}")]
    #[diagnostic(
        code(loomflow::persistence::serde),
        help("Ensure the JSON structure matches the Persisted* types.")
    )]
    Serde {
        #[source]
        source: serde_json::Error,
    },

    #[error("persistence error: {0}")]
    #[diagnostic(code(loomflow::persistence::other))]
    Other(String),
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

/* ---------- WorkflowState <-> PersistedState ---------- */

impl From<&WorkflowState> for PersistedState {
    fn from(s: &WorkflowState) -> Self {
        PersistedState {
            channels: s
                .channels()
                .iter()
                .map(|(key, channel)| {
                    (
                        key.clone(),
                        PersistedValueChannel {
                            version: channel.version(),
                            value: channel.snapshot(),
                        },
                    )
                })
                .collect(),
            errors: PersistedVecChannel {
                version: s.errors.version(),
                items: s.errors.snapshot(),
            },
        }
    }
}

impl TryFrom<PersistedState> for WorkflowState {
    type Error = PersistenceError;

    fn try_from(p: PersistedState) -> Result<Self> {
        let channels = p
            .channels
            .into_iter()
            .map(|(key, cell)| (key, ValueChannel::new(cell.value, cell.version)))
            .collect();
        Ok(WorkflowState::from_parts(
            channels,
            ErrorsChannel::new(p.errors.items, p.errors.version),
        ))
    }
}

/* ---------- Activation <-> PersistedActivation ---------- */

impl From<&Activation> for PersistedActivation {
    fn from(a: &Activation) -> Self {
        PersistedActivation {
            node: a.node.encode(),
            branch: a.branch.clone(),
        }
    }
}

impl From<PersistedActivation> for Activation {
    fn from(p: PersistedActivation) -> Self {
        Activation {
            node: NodeKind::decode(&p.node),
            branch: p.branch,
        }
    }
}

/* ---------- Checkpoint <-> PersistedCheckpoint ---------- */

impl From<&Checkpoint> for PersistedCheckpoint {
    fn from(cp: &Checkpoint) -> Self {
        PersistedCheckpoint {
            checkpoint_id: cp.checkpoint_id.clone(),
            session_id: cp.session_id.clone(),
            step: cp.step,
            state: PersistedState::from(&cp.state),
            suspended: PersistedActivation::from(&cp.suspended),
            interrupt: cp.interrupt.clone(),
            pending: cp.pending.iter().map(PersistedActivation::from).collect(),
            deferred_waits: cp
                .deferred_waits
                .iter()
                .map(|(node, wait)| (node.encode(), wait.clone()))
                .collect(),
            created_at: cp.created_at.to_rfc3339(),
        }
    }
}

impl TryFrom<PersistedCheckpoint> for Checkpoint {
    type Error = PersistenceError;

    fn try_from(p: PersistedCheckpoint) -> Result<Self> {
        let state = WorkflowState::try_from(p.state)?;
        let created_at = chrono::DateTime::parse_from_rfc3339(&p.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        Ok(Checkpoint {
            checkpoint_id: p.checkpoint_id,
            session_id: p.session_id,
            step: p.step,
            state,
            suspended: Activation::from(p.suspended),
            interrupt: p.interrupt,
            pending: p.pending.into_iter().map(Activation::from).collect(),
            deferred_waits: p
                .deferred_waits
                .into_iter()
                .map(|(node, wait)| (NodeKind::decode(&node), wait))
                .collect(),
            created_at,
        })
    }
}
