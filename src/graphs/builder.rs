//! GraphBuilder implementation for constructing workflow graphs.

use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

use super::edges::{ConditionalEdge, EdgePredicate, FanOutFn, IterationGuard, MapEdge};
use crate::node::Node;
use crate::reducers::ReducerPolicy;
use crate::runtimes::RuntimeConfig;
use crate::types::NodeKind;

/// Builder for constructing workflow graphs with a fluent API.
///
/// A graph needs at least one node, an edge out of [`NodeKind::Start`], and
/// reducer policies for the keys whose merge semantics matter (undeclared
/// keys default to `Overwrite`). `Start` and `End` are virtual endpoints:
/// they are wired into edges but never registered or executed.
///
/// # Examples
///
/// ```
/// use loomflow::graphs::GraphBuilder;
/// use loomflow::reducers::ReducerPolicy;
/// use loomflow::types::NodeKind;
/// # use loomflow::node::{Node, NodeContext, NodeError, NodeOutput, NodePartial};
/// # use loomflow::state::StateSnapshot;
/// # use async_trait::async_trait;
/// # struct Summarize;
/// # #[async_trait]
/// # impl Node for Summarize {
/// #     fn writes(&self) -> Vec<String> { vec!["summary".into()] }
/// #     async fn run(&self, _: StateSnapshot, _: NodeContext) -> Result<NodeOutput, NodeError> {
/// #         Ok(NodePartial::default().into())
/// #     }
/// # }
///
/// let app = GraphBuilder::new()
///     .add_node(NodeKind::Custom("summarize".into()), Summarize)
///     .add_edge(NodeKind::Start, NodeKind::Custom("summarize".into()))
///     .add_edge(NodeKind::Custom("summarize".into()), NodeKind::End)
///     .with_policy("summary", ReducerPolicy::Overwrite)
///     .compile()
///     .expect("valid graph");
/// ```
pub struct GraphBuilder {
    /// Registry of all nodes in the graph, keyed by their identifier.
    pub nodes: FxHashMap<NodeKind, Arc<dyn Node>>,
    /// Nodes that wait for every incoming edge/branch before running.
    pub deferred: FxHashSet<NodeKind>,
    /// Unconditional edges defining static graph topology.
    pub edges: FxHashMap<NodeKind, Vec<NodeKind>>,
    /// Conditional edges for dynamic routing based on state.
    pub conditional_edges: Vec<ConditionalEdge>,
    /// Map edges for dynamic fan-out over collections.
    pub map_edges: Vec<MapEdge>,
    /// Reducer policy per state key, fixed at compile time.
    pub policies: FxHashMap<String, ReducerPolicy>,
    /// Runtime configuration for the compiled application.
    pub runtime_config: RuntimeConfig,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    /// Creates a new, empty graph builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: FxHashMap::default(),
            deferred: FxHashSet::default(),
            edges: FxHashMap::default(),
            conditional_edges: Vec::new(),
            map_edges: Vec::new(),
            policies: FxHashMap::default(),
            runtime_config: RuntimeConfig::default(),
        }
    }

    /// Adds a node to the graph.
    ///
    /// `Start`/`End` are virtual; attempts to register them are ignored
    /// with a warning.
    #[must_use]
    pub fn add_node(mut self, id: NodeKind, node: impl Node + 'static) -> Self {
        match id {
            NodeKind::Start | NodeKind::End => {
                tracing::warn!(
                    ?id,
                    "ignoring registration of virtual node kind (Start/End are virtual)"
                );
            }
            _ => {
                self.nodes.insert(id, Arc::new(node));
            }
        }
        self
    }

    /// Adds a node that must not execute until **all** of its incoming
    /// edges — including every branch spawned by an upstream map edge —
    /// have delivered control and merged.
    #[must_use]
    pub fn add_deferred_node(mut self, id: NodeKind, node: impl Node + 'static) -> Self {
        if id.is_custom() {
            self.deferred.insert(id.clone());
        }
        self.add_node(id, node)
    }

    /// Adds an unconditional edge between two nodes. Static edges always
    /// fire when the `from` node completes.
    #[must_use]
    pub fn add_edge(mut self, from: NodeKind, to: NodeKind) -> Self {
        self.edges.entry(from).or_default().push(to);
        self
    }

    /// Adds a conditional edge.
    ///
    /// `targets` declares the candidate destinations the router may pick
    /// (used for compile-time reachability and cycle analysis); `End` need
    /// not be listed. The router is evaluated against the post-merge
    /// snapshot after each run of `from`.
    #[must_use]
    pub fn add_conditional_edge(
        mut self,
        from: NodeKind,
        router: EdgePredicate,
        targets: Vec<NodeKind>,
    ) -> Self {
        self.conditional_edges
            .push(ConditionalEdge::new(from, router, targets));
        self
    }

    /// Adds a conditional edge bounded by an [`IterationGuard`].
    ///
    /// The guard's counter key must carry the `Increment` policy; once the
    /// counter reaches the declared maximum the edge routes to `End` and a
    /// non-fatal iteration-limit warning is surfaced.
    #[must_use]
    pub fn add_guarded_conditional_edge(
        mut self,
        from: NodeKind,
        router: EdgePredicate,
        targets: Vec<NodeKind>,
        guard: IterationGuard,
    ) -> Self {
        self.conditional_edges
            .push(ConditionalEdge::new(from, router, targets).with_guard(guard));
        self
    }

    /// Adds a map edge: after `from` completes, `fan_out` is applied to the
    /// post-merge snapshot and each emitted dispatch spawns an independent
    /// branch. `targets` declares the candidate branch entry nodes.
    #[must_use]
    pub fn add_map_edge(
        mut self,
        from: NodeKind,
        fan_out: FanOutFn,
        targets: Vec<NodeKind>,
    ) -> Self {
        self.map_edges.push(MapEdge::new(from, fan_out, targets));
        self
    }

    /// Declares the reducer policy for a state key. Policies are fixed for
    /// the graph's lifetime; undeclared keys default to `Overwrite`.
    #[must_use]
    pub fn with_policy(mut self, key: impl Into<String>, policy: ReducerPolicy) -> Self {
        self.policies.insert(key.into(), policy);
        self
    }

    /// Configures runtime settings for the compiled application.
    #[must_use]
    pub fn with_runtime_config(mut self, runtime_config: RuntimeConfig) -> Self {
        self.runtime_config = runtime_config;
        self
    }
}
