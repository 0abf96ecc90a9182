//! Graph compilation: validation and assembly into an executable [`App`].
//!
//! Compilation catches statically-knowable defects (dangling references,
//! unreachable nodes, unguarded cycles) and precomputes the structures the
//! runtime needs: the reachability closure for deferred-node readiness,
//! per-node incoming-edge summaries, and the deferred joins of every map
//! edge for vacuous satisfaction. Router-returned identifiers can only be
//! validated at run time.

use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use super::builder::GraphBuilder;
use super::iteration::{
    CandidateAdjacency, has_self_loop, reachability_closure, reachable_from,
    strongly_connected_components,
};
use crate::app::App;
use crate::reducers::{ReducerPolicy, ReducerRegistry};
use crate::types::NodeKind;

/// Compile-time graph defects. Surfaced before any run starts.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphDefinitionError {
    #[error("graph has no executable nodes")]
    #[diagnostic(code(loomflow::graph::empty))]
    EmptyGraph,

    #[error("no edge out of Start")]
    #[diagnostic(
        code(loomflow::graph::no_start_edge),
        help("Add an edge from NodeKind::Start to the entry node.")
    )]
    NoStartEdge,

    #[error("edge source {from} is not a registered node")]
    #[diagnostic(code(loomflow::graph::unknown_edge_source))]
    UnknownEdgeSource { from: NodeKind },

    #[error("edge {from} -> {to} targets an unregistered node")]
    #[diagnostic(code(loomflow::graph::dangling_edge))]
    DanglingEdge { from: NodeKind, to: NodeKind },

    #[error("map edge from {from} declares invalid target {target}")]
    #[diagnostic(
        code(loomflow::graph::unknown_map_target),
        help("Map edges must target registered custom nodes.")
    )]
    UnknownMapTarget { from: NodeKind, target: NodeKind },

    #[error("node {node} has no path from Start")]
    #[diagnostic(code(loomflow::graph::unreachable_node))]
    UnreachableNode { node: NodeKind },

    #[error("iteration guard on edge from {from} uses counter '{counter_key}' without the increment policy")]
    #[diagnostic(
        code(loomflow::graph::guard_counter_policy),
        help("Declare the counter key with ReducerPolicy::Increment.")
    )]
    GuardCounterPolicy { from: NodeKind, counter_key: String },

    #[error("cycle through [{}] has no guarded conditional edge", nodes.join(", "))]
    #[diagnostic(
        code(loomflow::graph::unguarded_cycle),
        help("Bound every feedback loop with add_guarded_conditional_edge and an increment counter.")
    )]
    UnguardedCycle { nodes: Vec<String> },

    #[error("deferred nodes [{}] sit in one cycle and would deadlock each other", nodes.join(", "))]
    #[diagnostic(code(loomflow::graph::deferred_cycle))]
    DeferredCycle { nodes: Vec<String> },
}

/// Per-node incoming-edge summary computed at compile time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IncomingSummary {
    /// Distinct sources of static/conditional edges that can deliver
    /// control to the node, sorted by encoded name.
    pub sources: Vec<NodeKind>,
    /// Whether any map edge can spawn branches into the node.
    pub map_spawned: bool,
}

impl GraphBuilder {
    /// Compiles the graph into an executable application.
    ///
    /// # Errors
    ///
    /// Returns a [`GraphDefinitionError`] identifying the offending node or
    /// edge: dangling references, unreachable nodes, guard counters without
    /// the increment policy, unguarded cycles, or deferred-join deadlocks.
    pub fn compile(self) -> Result<App, GraphDefinitionError> {
        if self.nodes.is_empty() {
            return Err(GraphDefinitionError::EmptyGraph);
        }

        let is_known = |kind: &NodeKind| kind.is_custom() && self.nodes.contains_key(kind);
        let valid_source = |kind: &NodeKind| kind.is_start() || is_known(kind);

        // Static edges: validate both endpoints, iterate in sorted order so
        // the first reported defect is stable.
        let mut static_sources: Vec<&NodeKind> = self.edges.keys().collect();
        static_sources.sort_by_key(|k| k.encode());
        for from in static_sources {
            if !valid_source(from) {
                return Err(GraphDefinitionError::UnknownEdgeSource { from: from.clone() });
            }
            for to in &self.edges[from] {
                if !to.is_end() && !is_known(to) {
                    return Err(GraphDefinitionError::DanglingEdge {
                        from: from.clone(),
                        to: to.clone(),
                    });
                }
            }
        }

        for edge in &self.conditional_edges {
            if !valid_source(edge.from()) {
                return Err(GraphDefinitionError::UnknownEdgeSource {
                    from: edge.from().clone(),
                });
            }
            for target in edge.targets() {
                if !target.is_end() && !is_known(target) {
                    return Err(GraphDefinitionError::DanglingEdge {
                        from: edge.from().clone(),
                        to: target.clone(),
                    });
                }
            }
            if let Some(guard) = edge.guard()
                && self.policies.get(&guard.counter_key) != Some(&ReducerPolicy::Increment)
            {
                return Err(GraphDefinitionError::GuardCounterPolicy {
                    from: edge.from().clone(),
                    counter_key: guard.counter_key.clone(),
                });
            }
        }

        for edge in &self.map_edges {
            if !valid_source(edge.from()) {
                return Err(GraphDefinitionError::UnknownEdgeSource {
                    from: edge.from().clone(),
                });
            }
            for target in edge.targets() {
                if !is_known(target) {
                    return Err(GraphDefinitionError::UnknownMapTarget {
                        from: edge.from().clone(),
                        target: target.clone(),
                    });
                }
            }
        }

        // Candidate adjacency over all edge kinds, End excluded.
        let mut adjacency: CandidateAdjacency = FxHashMap::default();
        for (from, tos) in &self.edges {
            let entry = adjacency.entry(from.clone()).or_default();
            entry.extend(tos.iter().filter(|t| !t.is_end()).cloned());
        }
        for edge in &self.conditional_edges {
            let entry = adjacency.entry(edge.from().clone()).or_default();
            entry.extend(edge.targets().iter().filter(|t| !t.is_end()).cloned());
        }
        for edge in &self.map_edges {
            let entry = adjacency.entry(edge.from().clone()).or_default();
            entry.extend(edge.targets().iter().cloned());
        }

        if adjacency
            .get(&NodeKind::Start)
            .map(|t| t.is_empty())
            .unwrap_or(true)
        {
            return Err(GraphDefinitionError::NoStartEdge);
        }

        // Every registered node must be reachable from Start.
        let reachable = reachable_from(&adjacency, &NodeKind::Start);
        let mut registered: Vec<&NodeKind> = self.nodes.keys().collect();
        registered.sort_by_key(|k| k.encode());
        for node in registered {
            if !reachable.contains(node) {
                return Err(GraphDefinitionError::UnreachableNode { node: node.clone() });
            }
        }

        // Cycle analysis: every cycle needs a guarded exit, and deferred
        // joins must not wait on each other.
        let all_nodes: Vec<NodeKind> = {
            let mut nodes: Vec<NodeKind> =
                self.nodes.keys().cloned().chain([NodeKind::Start]).collect();
            nodes.sort_by_key(|k| k.encode());
            nodes
        };
        for component in strongly_connected_components(&adjacency, &all_nodes) {
            let cyclic =
                component.len() > 1 || has_self_loop(&adjacency, &component[0]);
            if !cyclic {
                continue;
            }
            let members: FxHashSet<&NodeKind> = component.iter().collect();
            let deferred_members: Vec<&NodeKind> = component
                .iter()
                .filter(|n| self.deferred.contains(*n))
                .collect();
            if deferred_members.len() > 1 {
                return Err(GraphDefinitionError::DeferredCycle {
                    nodes: deferred_members.iter().map(|n| n.to_string()).collect(),
                });
            }
            let guarded_exit = self.conditional_edges.iter().any(|edge| {
                edge.guard().is_some()
                    && members.contains(edge.from())
                    && edge.targets().iter().any(|t| members.contains(t))
            });
            if !guarded_exit {
                return Err(GraphDefinitionError::UnguardedCycle {
                    nodes: component.iter().map(|n| n.to_string()).collect(),
                });
            }
        }

        // Precompute runtime support structures.
        let reachability = reachability_closure(&adjacency, self.nodes.keys().cloned());

        let map_joins: Vec<Vec<NodeKind>> = self
            .map_edges
            .iter()
            .map(|edge| {
                let mut joins: FxHashSet<NodeKind> = FxHashSet::default();
                for target in edge.targets() {
                    if self.deferred.contains(target) {
                        joins.insert(target.clone());
                    }
                    if let Some(reach) = reachability.get(target) {
                        joins.extend(
                            reach.iter().filter(|n| self.deferred.contains(*n)).cloned(),
                        );
                    }
                }
                let mut joins: Vec<NodeKind> = joins.into_iter().collect();
                joins.sort_by_key(|k| k.encode());
                joins
            })
            .collect();

        let mut incoming: FxHashMap<NodeKind, IncomingSummary> = FxHashMap::default();
        for node in self.nodes.keys() {
            let mut sources: FxHashSet<NodeKind> = FxHashSet::default();
            for (from, tos) in &self.edges {
                if tos.contains(node) {
                    sources.insert(from.clone());
                }
            }
            for edge in &self.conditional_edges {
                if edge.targets().contains(node) {
                    sources.insert(edge.from().clone());
                }
            }
            let map_spawned = self
                .map_edges
                .iter()
                .any(|edge| edge.targets().contains(node));
            let mut sources: Vec<NodeKind> = sources.into_iter().collect();
            sources.sort_by_key(|k| k.encode());
            incoming.insert(
                node.clone(),
                IncomingSummary {
                    sources,
                    map_spawned,
                },
            );
        }

        let write_declarations: FxHashMap<NodeKind, FxHashSet<String>> = self
            .nodes
            .iter()
            .map(|(kind, node)| (kind.clone(), node.writes().into_iter().collect()))
            .collect();

        Ok(App::from_parts(crate::app::AppParts {
            nodes: self.nodes,
            deferred: self.deferred,
            edges: self.edges,
            conditional_edges: self.conditional_edges,
            map_edges: self.map_edges,
            reducer_registry: ReducerRegistry::new(self.policies),
            reachability,
            map_joins,
            incoming,
            write_declarations,
            runtime_config: self.runtime_config,
        }))
    }
}
