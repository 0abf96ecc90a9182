//! Concurrent superstep execution.
//!
//! The unit of scheduling is an [`Activation`]: a node plus an optional
//! branch binding. One superstep runs every ready activation concurrently
//! (bounded by a concurrency limit), then hands the results back to the
//! runner **in frontier order** — that ordering, not completion order, is
//! what the barrier merges by, which keeps reducer application
//! deterministic regardless of task interleaving.

use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::instrument;

use crate::event_bus::EventEmitter;
use crate::node::{Node, NodeContext, NodeError, NodeOutput};
use crate::state::{BranchContext, StateSnapshot};
use crate::types::NodeKind;

/// One schedulable unit: the top-level run of a node, or one map-branch
/// instance of it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Activation {
    pub node: NodeKind,
    pub branch: Option<BranchContext>,
}

impl Activation {
    /// Top-level activation (no branch binding).
    pub fn top_level(node: NodeKind) -> Self {
        Self { node, branch: None }
    }

    /// Branch activation carrying a fan-out binding.
    pub fn branch(node: NodeKind, branch: BranchContext) -> Self {
        Self {
            node,
            branch: Some(branch),
        }
    }

    /// Human-readable label, e.g. `process#2` for the third branch.
    #[must_use]
    pub fn label(&self) -> String {
        match &self.branch {
            Some(ctx) => format!("{}#{}", self.node, ctx.index),
            None => self.node.to_string(),
        }
    }
}

/// Result of one activation within a superstep.
#[derive(Debug)]
pub struct ActivationRecord {
    pub activation: Activation,
    pub output: NodeOutput,
}

/// Outputs of a superstep, in frontier order.
#[derive(Debug, Default)]
pub struct SuperstepResult {
    pub records: Vec<ActivationRecord>,
}

/// Errors raised while executing a superstep.
#[derive(Debug, Error, Diagnostic)]
pub enum SchedulerError {
    #[error("activation references unknown node {kind}")]
    #[diagnostic(code(loomflow::scheduler::unknown_node))]
    UnknownNode { kind: NodeKind },

    #[error("node {kind} failed at step {step}: {source}")]
    #[diagnostic(code(loomflow::scheduler::node_run))]
    NodeRun {
        kind: NodeKind,
        step: u64,
        #[source]
        source: NodeError,
    },

    #[error("superstep task join error: {0}")]
    #[diagnostic(code(loomflow::scheduler::join))]
    Join(#[from] JoinError),
}

/// Executes supersteps with bounded concurrency.
#[derive(Clone, Debug)]
pub struct Scheduler {
    concurrency_limit: usize,
}

impl Scheduler {
    pub fn new(concurrency_limit: usize) -> Self {
        Self {
            concurrency_limit: concurrency_limit.max(1),
        }
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    /// Run every activation of one superstep against the same snapshot.
    ///
    /// Activations execute concurrently; results are reassembled in the
    /// order `activations` was given. The first failing activation (in
    /// that order) aborts the superstep.
    #[instrument(skip(self, nodes, activations, snapshot, emitter), fields(count = activations.len()), err)]
    pub async fn superstep(
        &self,
        nodes: &FxHashMap<NodeKind, Arc<dyn Node>>,
        activations: Vec<Activation>,
        snapshot: StateSnapshot,
        step: u64,
        emitter: Arc<dyn EventEmitter>,
    ) -> Result<SuperstepResult, SchedulerError> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency_limit));
        let mut join_set: JoinSet<(usize, Result<NodeOutput, NodeError>)> = JoinSet::new();

        for (index, activation) in activations.iter().enumerate() {
            let node = nodes
                .get(&activation.node)
                .ok_or_else(|| SchedulerError::UnknownNode {
                    kind: activation.node.clone(),
                })?
                .clone();
            let view = snapshot.clone().with_branch(activation.branch.clone());
            let ctx = NodeContext {
                node_id: activation.label(),
                step,
                event_emitter: emitter.clone(),
            };
            let permits = semaphore.clone();
            join_set.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                (index, node.run(view, ctx).await)
            });
        }

        let mut slots: Vec<Option<Result<NodeOutput, NodeError>>> =
            (0..activations.len()).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            let (index, result) = joined?;
            slots[index] = Some(result);
        }

        let mut records = Vec::with_capacity(activations.len());
        for (activation, slot) in activations.into_iter().zip(slots) {
            let result = slot.expect("every spawned activation reports a result");
            match result {
                Ok(output) => records.push(ActivationRecord { activation, output }),
                Err(source) => {
                    return Err(SchedulerError::NodeRun {
                        kind: activation.node,
                        step,
                        source,
                    });
                }
            }
        }

        Ok(SuperstepResult { records })
    }
}
