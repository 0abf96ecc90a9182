//! Checkpoint shape and pluggable checkpoint storage.
//!
//! A [`Checkpoint`] is created only when a run suspends on an interrupt: it
//! captures everything needed to resume from the exact suspension point —
//! the full state snapshot, the suspended activation and its pending
//! interrupt, the outstanding frontier (sibling branches included), and the
//! deferred wait-table. It is an explicit serializable value, never an
//! implicit continuation; durable storage beyond [`InMemoryCheckpointer`]
//! is an external collaborator implementing [`Checkpointer`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::runner::{DeferredWait, SessionState};
use crate::control::InterruptRequest;
use crate::schedulers::{Activation, Scheduler};
use crate::state::WorkflowState;
use crate::types::NodeKind;
use crate::utils::id_generator::IdGenerator;

/// Checkpoint storage strategy attached to a runner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckpointerType {
    /// Volatile storage; checkpoints live as long as the process.
    InMemory,
}

/// Snapshot of a suspended run, sufficient to resume it exactly.
#[derive(Clone, Debug)]
pub struct Checkpoint {
    /// Storage identity of this checkpoint.
    pub checkpoint_id: String,
    /// Session the checkpoint belongs to.
    pub session_id: String,
    /// Superstep counter at suspension time.
    pub step: u64,
    /// Full state snapshot, post-merge of the suspending superstep.
    pub state: WorkflowState,
    /// The activation whose interrupt suspended the run.
    pub suspended: Activation,
    /// The pending interrupt request.
    pub interrupt: InterruptRequest,
    /// Outstanding activations, sibling branches included.
    pub pending: Vec<Activation>,
    /// Deferred-node arrival bookkeeping at suspension time.
    pub deferred_waits: FxHashMap<NodeKind, DeferredWait>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Capture a suspended session.
    pub fn from_session(
        session_id: &str,
        session: &SessionState,
        suspended: Activation,
        interrupt: InterruptRequest,
    ) -> Self {
        Self {
            checkpoint_id: IdGenerator::new().generate_checkpoint_id(),
            session_id: session_id.to_string(),
            step: session.step,
            state: session.state.clone(),
            suspended,
            interrupt,
            pending: session.frontier.clone(),
            deferred_waits: session.deferred_waits.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Rebuild an in-memory session from a checkpoint.
pub fn restore_session_state(checkpoint: &Checkpoint, concurrency_limit: usize) -> SessionState {
    SessionState {
        state: checkpoint.state.clone(),
        step: checkpoint.step,
        frontier: checkpoint.pending.clone(),
        deferred_waits: checkpoint.deferred_waits.clone(),
        scheduler: Scheduler::new(concurrency_limit),
    }
}

/// Errors raised by checkpoint storage.
#[derive(Debug, Error, Diagnostic)]
pub enum CheckpointerError {
    #[error("checkpoint serialization failed: {0}")]
    #[diagnostic(code(loomflow::checkpointer::serde))]
    Serde(#[from] serde_json::Error),

    #[error("checkpoint storage error: {0}")]
    #[diagnostic(code(loomflow::checkpointer::storage))]
    Storage(String),
}

/// Pluggable persistence for suspended runs.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Persist a checkpoint.
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), CheckpointerError>;

    /// Load the most recent checkpoint for a session, if any.
    async fn load_latest(&self, session_id: &str)
    -> Result<Option<Checkpoint>, CheckpointerError>;

    /// Delete a checkpoint by id. Deleting an unknown id is a no-op.
    async fn delete(&self, checkpoint_id: &str) -> Result<(), CheckpointerError>;
}

/// Volatile checkpoint store for tests and development.
#[derive(Clone, Default)]
pub struct InMemoryCheckpointer {
    store: Arc<Mutex<FxHashMap<String, Vec<Checkpoint>>>>,
}

impl InMemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored checkpoints across all sessions.
    pub fn len(&self) -> usize {
        self.store
            .lock()
            .expect("checkpoint store poisoned")
            .values()
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), CheckpointerError> {
        self.store
            .lock()
            .map_err(|_| CheckpointerError::Storage("checkpoint store poisoned".into()))?
            .entry(checkpoint.session_id.clone())
            .or_default()
            .push(checkpoint);
        Ok(())
    }

    async fn load_latest(
        &self,
        session_id: &str,
    ) -> Result<Option<Checkpoint>, CheckpointerError> {
        Ok(self
            .store
            .lock()
            .map_err(|_| CheckpointerError::Storage("checkpoint store poisoned".into()))?
            .get(session_id)
            .and_then(|entries| entries.last().cloned()))
    }

    async fn delete(&self, checkpoint_id: &str) -> Result<(), CheckpointerError> {
        let mut store = self
            .store
            .lock()
            .map_err(|_| CheckpointerError::Storage("checkpoint store poisoned".into()))?;
        for entries in store.values_mut() {
            entries.retain(|cp| cp.checkpoint_id != checkpoint_id);
        }
        store.retain(|_, entries| !entries.is_empty());
        Ok(())
    }
}
