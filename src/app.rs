//! The compiled application: barrier merges and the public run surface.

use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

use crate::channels::errors::ErrorEvent;
use crate::control::InterruptResponse;
use crate::event_bus::EventStream;
use crate::graphs::{ConditionalEdge, IncomingSummary, MapEdge};
use crate::node::{Node, NodePartial};
use crate::reducers::{ReducerConflictError, ReducerRegistry};
use crate::runtimes::runner::{AppRunner, RunOutcome, RunnerError};
use crate::runtimes::{Checkpoint, CheckpointerType, RuntimeConfig};
use crate::schedulers::Activation;
use crate::state::WorkflowState;
use crate::types::NodeKind;
use crate::utils::collections::new_update_map;
use crate::utils::id_generator::IdGenerator;
use tokio::task::JoinHandle;
use tracing::instrument;

/// Everything compilation hands to [`App::from_parts`].
pub(crate) struct AppParts {
    pub nodes: FxHashMap<NodeKind, Arc<dyn Node>>,
    pub deferred: FxHashSet<NodeKind>,
    pub edges: FxHashMap<NodeKind, Vec<NodeKind>>,
    pub conditional_edges: Vec<ConditionalEdge>,
    pub map_edges: Vec<MapEdge>,
    pub reducer_registry: ReducerRegistry,
    pub reachability: FxHashMap<NodeKind, FxHashSet<NodeKind>>,
    pub map_joins: Vec<Vec<NodeKind>>,
    pub incoming: FxHashMap<NodeKind, IncomingSummary>,
    pub write_declarations: FxHashMap<NodeKind, FxHashSet<String>>,
    pub runtime_config: RuntimeConfig,
}

/// Executable workflow graph.
///
/// `App` owns the immutable topology (nodes, edges, reducer policies plus
/// the structures compilation precomputed) and exposes the run surface:
/// [`invoke`](Self::invoke), [`resume`](Self::resume), and
/// [`stream`](Self::stream). Graphs are immutable after compilation and
/// cheap to clone across runs.
///
/// # Examples
///
/// ```rust,no_run
/// use loomflow::graphs::GraphBuilder;
/// use loomflow::runtimes::runner::RunOutcome;
/// use loomflow::state::WorkflowState;
/// use loomflow::types::NodeKind;
/// # use loomflow::node::{Node, NodeContext, NodeError, NodeOutput, NodePartial};
/// # use loomflow::state::StateSnapshot;
/// # use async_trait::async_trait;
/// # struct Draft;
/// # #[async_trait]
/// # impl Node for Draft {
/// #     fn writes(&self) -> Vec<String> { vec!["draft".into()] }
/// #     async fn run(&self, _: StateSnapshot, _: NodeContext) -> Result<NodeOutput, NodeError> {
/// #         Ok(NodePartial::default().into())
/// #     }
/// # }
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let app = GraphBuilder::new()
///     .add_node(NodeKind::Custom("draft".into()), Draft)
///     .add_edge(NodeKind::Start, NodeKind::Custom("draft".into()))
///     .add_edge(NodeKind::Custom("draft".into()), NodeKind::End)
///     .compile()?;
///
/// match app.invoke(WorkflowState::new()).await? {
///     RunOutcome::Completed(state) => {
///         println!("draft: {:?}", state.get("draft"));
///     }
///     RunOutcome::Suspended { interrupt, .. } => {
///         println!("awaiting input: {}", interrupt.kind);
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct App {
    nodes: FxHashMap<NodeKind, Arc<dyn Node>>,
    deferred: FxHashSet<NodeKind>,
    edges: FxHashMap<NodeKind, Vec<NodeKind>>,
    conditional_edges: Vec<ConditionalEdge>,
    map_edges: Vec<MapEdge>,
    reducer_registry: ReducerRegistry,
    reachability: FxHashMap<NodeKind, FxHashSet<NodeKind>>,
    map_joins: Vec<Vec<NodeKind>>,
    incoming: FxHashMap<NodeKind, IncomingSummary>,
    write_declarations: FxHashMap<NodeKind, FxHashSet<String>>,
    runtime_config: RuntimeConfig,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("deferred", &self.deferred)
            .field("edges", &self.edges)
            .field("conditional_edges", &self.conditional_edges)
            .field("map_edges", &self.map_edges)
            .field("reducer_registry", &self.reducer_registry)
            .field("reachability", &self.reachability)
            .field("map_joins", &self.map_joins)
            .field("incoming", &self.incoming)
            .field("write_declarations", &self.write_declarations)
            .field("runtime_config", &self.runtime_config)
            .finish()
    }
}

/// Result of applying one barrier.
///
/// Updated keys are sorted and error events keep their collection order so
/// downstream consumers observe stable behaviour across executions.
#[derive(Debug, Clone, Default)]
pub struct BarrierOutcome {
    /// Keys whose content changed at this barrier.
    pub updated_keys: Vec<String>,
    /// Non-fatal error events emitted by nodes in the superstep.
    pub errors: Vec<ErrorEvent>,
}

/// Handle for a streaming invocation started by [`App::stream`].
///
/// Dropping the handle aborts the workflow task. Use
/// [`join`](InvocationHandle::join) to await the outcome; the paired event
/// stream emits a diagnostic with scope
/// [`STREAM_END_SCOPE`](crate::event_bus::STREAM_END_SCOPE) before closing.
pub struct InvocationHandle {
    join_handle: Option<JoinHandle<Result<RunOutcome, RunnerError>>>,
}

impl InvocationHandle {
    /// Abort the underlying workflow task.
    pub fn abort(&self) {
        if let Some(handle) = &self.join_handle {
            handle.abort();
        }
    }

    /// Returns true if the workflow task has completed or aborted.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join_handle
            .as_ref()
            .map(|h| h.is_finished())
            .unwrap_or(true)
    }

    /// Await the run outcome.
    pub async fn join(mut self) -> Result<RunOutcome, RunnerError> {
        let handle = self
            .join_handle
            .take()
            .expect("join_handle already awaited");
        match handle.await {
            Ok(result) => result,
            Err(err) => Err(RunnerError::Join(err)),
        }
    }
}

impl Drop for InvocationHandle {
    fn drop(&mut self) {
        if let Some(handle) = &self.join_handle {
            handle.abort();
        }
    }
}

impl App {
    /// Internal (crate) factory keeping the topology fields private.
    pub(crate) fn from_parts(parts: AppParts) -> Self {
        App {
            nodes: parts.nodes,
            deferred: parts.deferred,
            edges: parts.edges,
            conditional_edges: parts.conditional_edges,
            map_edges: parts.map_edges,
            reducer_registry: parts.reducer_registry,
            reachability: parts.reachability,
            map_joins: parts.map_joins,
            incoming: parts.incoming,
            write_declarations: parts.write_declarations,
            runtime_config: parts.runtime_config,
        }
    }

    /// Registered node implementations, keyed by identifier.
    #[must_use]
    pub fn nodes(&self) -> &FxHashMap<NodeKind, Arc<dyn Node>> {
        &self.nodes
    }

    /// Unconditional edges of the graph.
    #[must_use]
    pub fn edges(&self) -> &FxHashMap<NodeKind, Vec<NodeKind>> {
        &self.edges
    }

    /// Conditional edges of the graph.
    #[must_use]
    pub fn conditional_edges(&self) -> &[ConditionalEdge] {
        &self.conditional_edges
    }

    /// Map edges of the graph.
    #[must_use]
    pub fn map_edges(&self) -> &[MapEdge] {
        &self.map_edges
    }

    /// Whether the node waits for all incoming edges before running.
    #[must_use]
    pub fn is_deferred(&self, node: &NodeKind) -> bool {
        self.deferred.contains(node)
    }

    /// Incoming-edge summary computed at compile time.
    #[must_use]
    pub fn incoming_summary(&self, node: &NodeKind) -> Option<&IncomingSummary> {
        self.incoming.get(node)
    }

    /// The key → policy table fixed at compile time.
    #[must_use]
    pub fn reducer_registry(&self) -> &ReducerRegistry {
        &self.reducer_registry
    }

    /// Runtime configuration the graph was built with.
    #[must_use]
    pub fn runtime_config(&self) -> &RuntimeConfig {
        &self.runtime_config
    }

    /// Nodes reachable from `from` over declared edge candidates.
    pub(crate) fn reachable_set(&self, from: &NodeKind) -> Option<&FxHashSet<NodeKind>> {
        self.reachability.get(from)
    }

    /// Deferred joins of the map edge at `index`, for vacuous satisfaction.
    pub(crate) fn map_joins(&self, index: usize) -> &[NodeKind] {
        self.map_joins
            .get(index)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn resolve_checkpointer(&self) -> CheckpointerType {
        self.runtime_config
            .checkpointer
            .clone()
            .unwrap_or(CheckpointerType::InMemory)
    }

    fn next_session_id(&self) -> String {
        self.runtime_config
            .session_id
            .clone()
            .unwrap_or_else(|| IdGenerator::new().generate_run_id())
    }

    /// Merge the ordered node partials of one superstep into the state.
    ///
    /// Each partial is first checked against its node's declared write
    /// keys, then applied through the key reducers in the given order;
    /// node-reported non-fatal errors are appended to the state's error
    /// channel. Fatal merge violations abort the run.
    #[instrument(skip(self, state, records), err)]
    pub fn apply_barrier(
        &self,
        state: &mut WorkflowState,
        records: &[(Activation, NodePartial)],
    ) -> Result<BarrierOutcome, ReducerConflictError> {
        let mut updates = Vec::with_capacity(records.len());
        let mut errors_all: Vec<ErrorEvent> = Vec::new();

        for (activation, partial) in records {
            let update = partial.updates.clone().unwrap_or_else(new_update_map);
            if !update.is_empty() {
                let declared = self.write_declarations.get(&activation.node);
                for key in update.keys() {
                    let allowed = declared.map(|d| d.contains(key)).unwrap_or(false);
                    if !allowed {
                        return Err(ReducerConflictError::UndeclaredKey {
                            node: activation.label(),
                            key: key.clone(),
                        });
                    }
                }
                tracing::debug!(node = %activation.label(), keys = update.len(), "node produced updates");
            }
            updates.push(update);

            if let Some(errs) = &partial.errors
                && !errs.is_empty()
            {
                tracing::debug!(node = %activation.label(), count = errs.len(), "node produced errors");
                errors_all.extend(errs.iter().cloned());
            }
        }

        let updated_keys = self.reducer_registry.apply_step(state, &updates)?;
        for event in &errors_all {
            state.push_error(event.clone());
        }

        Ok(BarrierOutcome {
            updated_keys,
            errors: errors_all,
        })
    }

    /// Execute the workflow until it completes, fails, or suspends.
    ///
    /// This is the primary entry point: it builds the runtime-configured
    /// event bus, creates a fresh session, and drives supersteps until the
    /// frontier drains or a node requests an interrupt. On suspension the
    /// caller receives the checkpoint and the interrupt payload instead of
    /// a final state; hand both to [`resume`](Self::resume) once external
    /// input is available.
    #[instrument(skip(self, initial_state), err)]
    pub async fn invoke(
        &self,
        initial_state: WorkflowState,
    ) -> Result<RunOutcome, RunnerError> {
        let event_bus = self.runtime_config.event_bus.build_event_bus();
        let mut runner = AppRunner::with_options_and_bus(
            self.clone(),
            self.resolve_checkpointer(),
            true,
            event_bus,
            true,
        );
        let session_id = self.next_session_id();
        runner.create_session(session_id.clone(), initial_state)?;
        runner.run_until_outcome(&session_id).await
    }

    /// Resume a suspended run with the externally supplied response.
    ///
    /// The response kind must match the checkpoint's pending interrupt
    /// kind; on a mismatch the call fails without consuming the checkpoint,
    /// so a corrected retry can reuse it. A resumed run may suspend again
    /// any number of times before completing.
    #[instrument(skip(self, checkpoint, response), fields(session = %checkpoint.session_id), err)]
    pub async fn resume(
        &self,
        checkpoint: &Checkpoint,
        response: InterruptResponse,
    ) -> Result<RunOutcome, RunnerError> {
        let event_bus = self.runtime_config.event_bus.build_event_bus();
        let mut runner = AppRunner::with_options_and_bus(
            self.clone(),
            self.resolve_checkpointer(),
            true,
            event_bus,
            true,
        );
        runner.resume(checkpoint, response).await
    }

    /// Invoke the workflow while streaming events to the caller.
    ///
    /// Returns a handle for the run outcome and a finite [`EventStream`]:
    /// one [`Event::Step`](crate::event_bus::Event::Step) per superstep,
    /// terminated by a stream-end diagnostic reporting
    /// completed/suspended/error status. The subscription is single-use and
    /// not restartable. Dropping the handle aborts the run; dropping the
    /// stream does not.
    pub async fn stream(
        &self,
        initial_state: WorkflowState,
    ) -> (InvocationHandle, EventStream) {
        let event_bus = self.runtime_config.event_bus.build_event_bus();
        let mut runner = AppRunner::with_options_and_bus(
            self.clone(),
            self.resolve_checkpointer(),
            true,
            event_bus,
            true,
        );
        let event_stream = runner
            .event_stream()
            .expect("fresh runner owns its event stream");
        let session_id = self.next_session_id();

        let join = tokio::spawn(async move {
            runner.create_session(session_id.clone(), initial_state)?;
            runner.run_until_outcome(&session_id).await
        });

        (
            InvocationHandle {
                join_handle: Some(join),
            },
            event_stream,
        )
    }
}
