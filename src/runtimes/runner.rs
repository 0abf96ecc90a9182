//! Session management and the scheduler loop.
//!
//! [`AppRunner`] drives a compiled [`App`]: it keeps per-session execution
//! state (frontier, deferred wait-table, step counter), runs supersteps,
//! applies barriers, routes edges, and handles suspension/resumption. The
//! separation mirrors the graph/runtime split: one `App` can be reused
//! across many runners, each with its own event bus and checkpoint store.

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::instrument;

use super::checkpointer::{
    Checkpoint, Checkpointer, CheckpointerError, CheckpointerType, InMemoryCheckpointer,
    restore_session_state,
};
use super::streaming::{StreamEndReason, finalize_event_stream};
use crate::app::App;
use crate::channels::errors::{ErrorChain, ErrorEvent, ITERATION_LIMIT_TAG};
use crate::control::{InterruptRequest, InterruptResponse};
use crate::event_bus::{Event, EventBus, EventStream};
use crate::node::{NodeOutput, NodePartial};
use crate::reducers::ReducerConflictError;
use crate::schedulers::{Activation, Scheduler, SchedulerError};
use crate::state::{BranchContext, StateSnapshot, WorkflowState};
use crate::types::NodeKind;

/// Arrival bookkeeping for one deferred node.
///
/// An entry exists only once some edge or branch has delivered control (or
/// a zero-item map edge marked the join vacuously satisfied).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredWait {
    /// Edges/branches that have delivered control and merged.
    pub arrivals: u64,
    /// Set when an empty fan-out left this join with nothing to wait for.
    pub vacuous: bool,
}

/// Per-session execution state persisted across supersteps.
#[derive(Clone, Debug)]
pub struct SessionState {
    pub state: WorkflowState,
    pub step: u64,
    /// Ready activations, in delivery order. Deferred nodes never appear
    /// here; they wait in `deferred_waits` until promoted.
    pub frontier: Vec<Activation>,
    pub deferred_waits: FxHashMap<NodeKind, DeferredWait>,
    pub scheduler: Scheduler,
}

/// Terminal result of driving a run.
#[derive(Debug)]
pub enum RunOutcome {
    /// The frontier drained; here is the final state.
    Completed(WorkflowState),
    /// A node requested external input; resume with a matching response.
    Suspended {
        checkpoint: Checkpoint,
        interrupt: InterruptRequest,
    },
}

impl RunOutcome {
    /// Final state, if the run completed.
    pub fn completed(self) -> Option<WorkflowState> {
        match self {
            RunOutcome::Completed(state) => Some(state),
            RunOutcome::Suspended { .. } => None,
        }
    }

    /// Checkpoint and interrupt, if the run suspended.
    pub fn suspended(self) -> Option<(Checkpoint, InterruptRequest)> {
        match self {
            RunOutcome::Completed(_) => None,
            RunOutcome::Suspended {
                checkpoint,
                interrupt,
            } => Some((checkpoint, interrupt)),
        }
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed(_))
    }

    #[must_use]
    pub fn is_suspended(&self) -> bool {
        matches!(self, RunOutcome::Suspended { .. })
    }
}

/// Fatal run failures.
#[derive(Debug, Error, Diagnostic)]
pub enum RunnerError {
    #[error("session not found: {session_id}")]
    #[diagnostic(code(loomflow::runner::session_not_found))]
    SessionNotFound { session_id: String },

    #[error("no nodes to run from Start (empty frontier)")]
    #[diagnostic(
        code(loomflow::runner::no_start_nodes),
        help("Add edges from Start or check the entry routing.")
    )]
    NoStartNodes,

    #[error("routing from {from} produced unknown target '{target}'")]
    #[diagnostic(
        code(loomflow::runner::routing),
        help("Routers and map functions must return registered nodes or End.")
    )]
    Routing { from: NodeKind, target: String },

    #[error(transparent)]
    #[diagnostic(code(loomflow::runner::reducer_conflict))]
    ReducerConflict(#[from] ReducerConflictError),

    #[error(transparent)]
    #[diagnostic(code(loomflow::runner::scheduler))]
    Scheduler(#[from] SchedulerError),

    #[error("interrupt kind mismatch: expected '{expected}', got '{got}'")]
    #[diagnostic(
        code(loomflow::runner::interrupt_mismatch),
        help("The checkpoint is untouched; retry with a response of the pending kind.")
    )]
    InterruptMismatch { expected: String, got: String },

    #[error(transparent)]
    #[diagnostic(code(loomflow::runner::checkpointer))]
    Checkpointer(#[from] CheckpointerError),

    #[error("workflow task join error: {0}")]
    #[diagnostic(code(loomflow::runner::join))]
    Join(#[from] JoinError),
}

/// Runtime execution engine for compiled workflow graphs.
pub struct AppRunner {
    app: Arc<App>,
    sessions: FxHashMap<String, SessionState>,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    autosave: bool,
    event_bus: EventBus,
    event_stream_taken: bool,
}

impl AppRunner {
    /// Create a runner with the app's configured event bus.
    #[must_use]
    pub fn new(app: App, checkpointer_type: CheckpointerType) -> Self {
        Self::with_options(app, checkpointer_type, true)
    }

    /// Create with an explicit autosave toggle.
    #[must_use]
    pub fn with_options(app: App, checkpointer_type: CheckpointerType, autosave: bool) -> Self {
        let event_bus = app.runtime_config().event_bus.build_event_bus();
        Self::with_options_and_bus(app, checkpointer_type, autosave, event_bus, true)
    }

    /// Create with a custom event bus, for callers that stream events to
    /// their own sinks or need per-request bus isolation.
    #[must_use]
    pub fn with_options_and_bus(
        app: App,
        checkpointer_type: CheckpointerType,
        autosave: bool,
        event_bus: EventBus,
        start_listener: bool,
    ) -> Self {
        if start_listener {
            event_bus.listen_for_events();
        }
        Self {
            app: Arc::new(app),
            sessions: FxHashMap::default(),
            checkpointer: Self::create_checkpointer(checkpointer_type),
            autosave,
            event_bus,
            event_stream_taken: false,
        }
    }

    fn create_checkpointer(checkpointer_type: CheckpointerType) -> Option<Arc<dyn Checkpointer>> {
        match checkpointer_type {
            CheckpointerType::InMemory => Some(Arc::new(InMemoryCheckpointer::new())),
        }
    }

    /// Subscribe to the underlying event stream.
    ///
    /// Returns `None` once the single subscription has been taken.
    pub fn event_stream(&mut self) -> Option<EventStream> {
        if self.event_stream_taken {
            return None;
        }
        self.event_stream_taken = true;
        Some(self.event_bus.subscribe())
    }

    fn concurrency_limit(&self) -> usize {
        self.app
            .runtime_config()
            .concurrency_limit
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
    }

    /// Initialize a new session with the given initial state.
    ///
    /// The virtual `Start` node's outgoing edges are evaluated against the
    /// initial snapshot to compute the first frontier, so conditional and
    /// map edges out of `Start` work like any other edge.
    #[instrument(skip(self, initial_state), err)]
    pub fn create_session(
        &mut self,
        session_id: String,
        initial_state: WorkflowState,
    ) -> Result<(), RunnerError> {
        let mut session = SessionState {
            state: initial_state,
            step: 0,
            frontier: Vec::new(),
            deferred_waits: FxHashMap::default(),
            scheduler: Scheduler::new(self.concurrency_limit()),
        };
        let snapshot = session.state.snapshot();
        self.route_outgoing(&mut session, &Activation::top_level(NodeKind::Start), &snapshot, 0)?;
        if session.frontier.is_empty() && session.deferred_waits.is_empty() {
            return Err(RunnerError::NoStartNodes);
        }
        self.sessions.insert(session_id, session);
        Ok(())
    }

    /// Drive a session until it completes or suspends.
    #[instrument(skip(self), err)]
    pub async fn run_until_outcome(
        &mut self,
        session_id: &str,
    ) -> Result<RunOutcome, RunnerError> {
        tracing::info!(session = %session_id, "workflow run started");

        loop {
            let mut session =
                self.sessions
                    .remove(session_id)
                    .ok_or_else(|| RunnerError::SessionNotFound {
                        session_id: session_id.to_string(),
                    })?;

            let ready = Self::take_ready(&self.app, &mut session);
            if ready.is_empty() {
                self.sessions.insert(session_id.to_string(), session);
                break;
            }

            let superstep = self.run_superstep(session_id, &mut session, ready).await;
            let step = session.step;
            // Reinsert first so the session (including partial state on
            // failure) stays inspectable.
            self.sessions.insert(session_id.to_string(), session);

            match superstep {
                Ok(None) => {}
                Ok(Some((checkpoint, interrupt))) => {
                    if self.autosave
                        && let Some(cp) = &self.checkpointer
                    {
                        cp.save(checkpoint.clone()).await?;
                    }
                    finalize_event_stream(
                        &self.event_bus,
                        session_id,
                        StreamEndReason::Suspended {
                            step,
                            kind: interrupt.kind.clone(),
                        },
                    );
                    tracing::info!(session = %session_id, step, kind = %interrupt.kind, "workflow run suspended");
                    return Ok(RunOutcome::Suspended {
                        checkpoint,
                        interrupt,
                    });
                }
                Err(err) => {
                    finalize_event_stream(
                        &self.event_bus,
                        session_id,
                        StreamEndReason::Error {
                            step: Some(step),
                            error: err.to_string(),
                        },
                    );
                    return Err(err);
                }
            }
        }

        let session =
            self.sessions
                .get(session_id)
                .ok_or_else(|| RunnerError::SessionNotFound {
                    session_id: session_id.to_string(),
                })?;
        let final_state = session.state.clone();
        let final_step = session.step;
        tracing::info!(session = %session_id, step = final_step, "workflow run completed");
        finalize_event_stream(
            &self.event_bus,
            session_id,
            StreamEndReason::Completed { step: final_step },
        );
        Ok(RunOutcome::Completed(final_state))
    }

    /// Resume a suspended run.
    ///
    /// Validates the response kind against the pending interrupt, replays
    /// the response as the suspended node's return value, and continues the
    /// scheduler loop — indistinguishable, from the engine's perspective,
    /// from the node simply taking longer to return. On kind mismatch the
    /// checkpoint is untouched and remains valid for a corrected retry; on
    /// completion the stored checkpoint is deleted.
    #[instrument(skip(self, checkpoint, response), fields(session = %checkpoint.session_id), err)]
    pub async fn resume(
        &mut self,
        checkpoint: &Checkpoint,
        response: InterruptResponse,
    ) -> Result<RunOutcome, RunnerError> {
        if response.kind != checkpoint.interrupt.kind {
            return Err(RunnerError::InterruptMismatch {
                expected: checkpoint.interrupt.kind.clone(),
                got: response.kind,
            });
        }

        let session_id = checkpoint.session_id.clone();
        let mut session = restore_session_state(checkpoint, self.concurrency_limit());
        session.step += 1;
        let step = session.step;
        tracing::info!(
            session = %session_id,
            step,
            node = %checkpoint.suspended.label(),
            "resuming from checkpoint"
        );

        let records = vec![(checkpoint.suspended.clone(), response.update)];
        let labels = vec![checkpoint.suspended.label()];
        let committed = self.commit_records(&mut session, step, labels, records);
        self.sessions.insert(session_id.clone(), session);
        if let Err(err) = committed {
            finalize_event_stream(
                &self.event_bus,
                &session_id,
                StreamEndReason::Error {
                    step: Some(step),
                    error: err.to_string(),
                },
            );
            return Err(err);
        }

        let outcome = self.run_until_outcome(&session_id).await?;
        if outcome.is_completed()
            && let Some(cp) = &self.checkpointer
        {
            cp.delete(&checkpoint.checkpoint_id).await?;
        }
        Ok(outcome)
    }

    /// Get a snapshot of the current session state.
    #[must_use]
    pub fn get_session(&self, session_id: &str) -> Option<&SessionState> {
        self.sessions.get(session_id)
    }

    /// List all active session IDs.
    #[must_use]
    pub fn list_sessions(&self) -> Vec<&String> {
        self.sessions.keys().collect()
    }

    /// Pop the activations ready to run.
    ///
    /// Non-deferred activations are ready as soon as any edge delivered
    /// control. A deferred node is promoted only when the frontier is
    /// drained and no other satisfied deferred node can still reach it —
    /// at that point every incoming edge and branch has delivered and
    /// merged (or was vacuously satisfied).
    fn take_ready(app: &App, session: &mut SessionState) -> Vec<Activation> {
        if !session.frontier.is_empty() {
            return std::mem::take(&mut session.frontier);
        }

        let mut candidates: Vec<NodeKind> = session
            .deferred_waits
            .iter()
            .filter(|(_, wait)| wait.arrivals > 0 || wait.vacuous)
            .map(|(node, _)| node.clone())
            .collect();
        candidates.sort_by_key(|k| k.encode());

        let promoted: Vec<NodeKind> = candidates
            .iter()
            .filter(|node| {
                !candidates.iter().any(|other| {
                    other != *node
                        && app
                            .reachable_set(other)
                            .map(|reach| reach.contains(*node))
                            .unwrap_or(false)
                })
            })
            .cloned()
            .collect();

        for node in &promoted {
            session.deferred_waits.remove(node);
        }
        promoted.into_iter().map(Activation::top_level).collect()
    }

    /// Execute one superstep. Returns the suspension pair if any
    /// activation requested an interrupt.
    #[instrument(skip(self, session, ready), fields(step = session.step + 1, count = ready.len()), err)]
    async fn run_superstep(
        &self,
        session_id: &str,
        session: &mut SessionState,
        ready: Vec<Activation>,
    ) -> Result<Option<(Checkpoint, InterruptRequest)>, RunnerError> {
        session.step += 1;
        let step = session.step;
        let ran_labels: Vec<String> = ready.iter().map(Activation::label).collect();
        tracing::debug!(step, frontier = ?ran_labels, "starting superstep");

        let snapshot = session.state.snapshot();
        let result = session
            .scheduler
            .superstep(
                self.app.nodes(),
                ready,
                snapshot,
                step,
                self.event_bus.get_emitter(),
            )
            .await;

        let result = match result {
            Ok(result) => result,
            Err(err) => {
                let event = match &err {
                    SchedulerError::NodeRun { kind, step, source } => ErrorEvent::node(
                        kind.encode(),
                        *step,
                        ErrorChain::msg(source.to_string()),
                    )
                    .with_tag("node"),
                    other => ErrorEvent::scheduler(step, ErrorChain::msg(other.to_string()))
                        .with_tag("scheduler"),
                };
                session.state.push_error(event);
                return Err(err.into());
            }
        };

        let mut merged: Vec<(Activation, NodePartial)> = Vec::new();
        let mut interrupts: Vec<(Activation, InterruptRequest)> = Vec::new();
        for record in result.records {
            match record.output {
                NodeOutput::Partial(partial) => merged.push((record.activation, partial)),
                NodeOutput::Interrupt(request) => {
                    interrupts.push((record.activation, request));
                }
            }
        }

        self.commit_records(session, step, ran_labels, merged)?;

        if !interrupts.is_empty() {
            let (suspended, request) = interrupts.remove(0);
            // Later interrupters re-enter the frontier: they re-run after
            // resumption and raise their own interrupts again.
            for (activation, _) in interrupts {
                session.frontier.push(activation);
            }
            let checkpoint =
                Checkpoint::from_session(session_id, session, suspended, request.clone());
            return Ok(Some((checkpoint, request)));
        }

        Ok(None)
    }

    /// Barrier + routing + step event for one ordered batch of partials.
    /// Shared by the superstep path and resumption.
    fn commit_records(
        &self,
        session: &mut SessionState,
        step: u64,
        ran_labels: Vec<String>,
        records: Vec<(Activation, NodePartial)>,
    ) -> Result<(), RunnerError> {
        let barrier = match self.app.apply_barrier(&mut session.state, &records) {
            Ok(outcome) => outcome,
            Err(err) => {
                session.state.push_error(
                    ErrorEvent::scheduler(step, ErrorChain::msg(err.to_string()))
                        .with_tag("reducer"),
                );
                return Err(err.into());
            }
        };

        let post_merge = session.state.snapshot();
        for (activation, _) in &records {
            self.route_outgoing(session, activation, &post_merge, step)?;
        }

        tracing::debug!(
            step,
            updated_keys = ?barrier.updated_keys,
            next_frontier = ?session.frontier.iter().map(Activation::label).collect::<Vec<_>>(),
            "barrier applied"
        );

        if let Err(err) = self.event_bus.get_emitter().emit(Event::step(
            step,
            ran_labels,
            barrier.updated_keys,
            session.state.values_snapshot(),
        )) {
            tracing::debug!(step, error = ?err, "failed to emit step event");
        }
        Ok(())
    }

    /// Evaluate every outgoing edge of one completed activation against the
    /// post-merge snapshot and deliver control to the produced targets.
    fn route_outgoing(
        &self,
        session: &mut SessionState,
        activation: &Activation,
        post_merge: &StateSnapshot,
        step: u64,
    ) -> Result<(), RunnerError> {
        let from = &activation.node;
        let view = post_merge.clone().with_branch(activation.branch.clone());

        // Static edges always fire, propagating the branch binding.
        if let Some(targets) = self.app.edges().get(from) {
            for target in targets.clone() {
                self.deliver(session, activation, target, activation.branch.clone(), step)?;
            }
        }

        // Conditional edges: guard check first, then the router.
        for edge in self
            .app
            .conditional_edges()
            .iter()
            .filter(|edge| edge.from() == from)
        {
            let targets = if let Some(guard) = edge.guard() {
                let counter = view.get_i64(&guard.counter_key).unwrap_or(0);
                if counter >= guard.max_iterations as i64 {
                    let message = format!(
                        "feedback loop counter '{}' reached {} (max {}); forcing End",
                        guard.counter_key, counter, guard.max_iterations
                    );
                    tracing::warn!(step, from = %from, "{message}");
                    session.state.push_error(
                        ErrorEvent::scheduler(step, ErrorChain::msg(message.clone()))
                            .with_tag(ITERATION_LIMIT_TAG)
                            .with_context(json!({
                                "edge_from": from.encode(),
                                "counter_key": guard.counter_key,
                                "max_iterations": guard.max_iterations,
                            })),
                    );
                    if let Err(err) = self
                        .event_bus
                        .get_emitter()
                        .emit(Event::diagnostic(ITERATION_LIMIT_TAG, message))
                    {
                        tracing::debug!(step, error = ?err, "failed to emit iteration-limit event");
                    }
                    vec![NodeKind::End]
                } else {
                    (edge.router())(&view)
                }
            } else {
                (edge.router())(&view)
            };
            for target in targets {
                self.deliver(session, activation, target, activation.branch.clone(), step)?;
            }
        }

        // Map edges: spawn one branch per emitted dispatch; an empty
        // emission vacuously satisfies the edge's deferred joins.
        for (index, edge) in self
            .app
            .map_edges()
            .iter()
            .enumerate()
            .filter(|(_, edge)| edge.from() == from)
        {
            let dispatches = (edge.fan_out())(&view);
            if dispatches.is_empty() {
                for join in self.app.map_joins(index) {
                    session
                        .deferred_waits
                        .entry(join.clone())
                        .or_default()
                        .vacuous = true;
                }
                continue;
            }
            for (item_index, dispatch) in dispatches.into_iter().enumerate() {
                let branch = BranchContext {
                    index: item_index,
                    item: dispatch.item,
                };
                self.deliver(session, activation, dispatch.target, Some(branch), step)?;
            }
        }

        Ok(())
    }

    /// Deliver control to one target: terminal, deferred arrival, or a new
    /// frontier activation. Unknown targets are a fatal routing error.
    fn deliver(
        &self,
        session: &mut SessionState,
        origin: &Activation,
        target: NodeKind,
        branch: Option<BranchContext>,
        step: u64,
    ) -> Result<(), RunnerError> {
        if target.is_end() {
            return Ok(());
        }

        let known = target.is_custom() && self.app.nodes().contains_key(&target);
        if !known {
            session.state.push_error(
                ErrorEvent::scheduler(
                    step,
                    ErrorChain::msg(format!(
                        "routing from {} produced unknown target '{}'",
                        origin.node, target
                    )),
                )
                .with_tag("routing")
                .with_context(json!({
                    "edge_from": origin.node.encode(),
                    "target": target.encode(),
                    "state": session.state.values_snapshot(),
                })),
            );
            return Err(RunnerError::Routing {
                from: origin.node.clone(),
                target: target.to_string(),
            });
        }

        if self.app.is_deferred(&target) {
            session.deferred_waits.entry(target).or_default().arrivals += 1;
            return Ok(());
        }

        let activation = Activation {
            node: target,
            branch,
        };
        // Duplicate top-level deliveries within a wave collapse into one
        // activation; branch activations are always distinct.
        if activation.branch.is_none()
            && session
                .frontier
                .iter()
                .any(|a| a.branch.is_none() && a.node == activation.node)
        {
            return Ok(());
        }
        session.frontier.push(activation);
        Ok(())
    }
}
