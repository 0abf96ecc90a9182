//! Edge variants and routing functions.
//!
//! Three transition kinds connect nodes:
//!
//! - *static* edges always fire;
//! - *conditional* edges consult a pure router against the post-merge
//!   snapshot and may carry an [`IterationGuard`] bounding a feedback loop;
//! - *map* edges fan out dynamically, spawning one branch per emitted
//!   [`Dispatch`].
//!
//! Routers and fan-out functions must be deterministic given the snapshot;
//! the engine re-evaluates them on resume.

use serde_json::Value;
use std::sync::Arc;

use crate::state::StateSnapshot;
use crate::types::NodeKind;

/// Router function for conditional edges.
///
/// Returns one or more targets; [`NodeKind::End`] is the terminal marker.
/// Targets are validated at run time — an identifier that is not a
/// registered node (or `End`) aborts the run with a routing error.
///
/// # Examples
///
/// ```
/// use loomflow::graphs::EdgePredicate;
/// use loomflow::types::NodeKind;
/// use std::sync::Arc;
///
/// let route_by_metric: EdgePredicate = Arc::new(|snapshot| {
///     if snapshot.get_f64("metric").unwrap_or(0.0) >= 0.8 {
///         vec![NodeKind::End]
///     } else {
///         vec![NodeKind::Custom("refine".into())]
///     }
/// });
/// ```
pub type EdgePredicate = Arc<dyn Fn(&StateSnapshot) -> Vec<NodeKind> + Send + Sync + 'static>;

/// Fan-out function for map edges.
///
/// Returns an ordered sequence of dispatches; order fixes the merge rank of
/// the spawned branches. An empty sequence spawns no branches and leaves
/// downstream deferred joins vacuously satisfied.
pub type FanOutFn = Arc<dyn Fn(&StateSnapshot) -> Vec<Dispatch> + Send + Sync + 'static>;

/// One branch to spawn: the target node and the item it carries.
#[derive(Clone, Debug, PartialEq)]
pub struct Dispatch {
    pub target: NodeKind,
    pub item: Value,
}

impl Dispatch {
    pub fn new(target: impl Into<NodeKind>, item: Value) -> Self {
        Self {
            target: target.into(),
            item,
        }
    }
}

/// Engine-level bound on a feedback loop.
///
/// When the counter key (which must carry the `Increment` reducer policy)
/// reaches `max_iterations`, the guarded edge skips its router, routes to
/// `End`, and surfaces a non-fatal iteration-limit warning. Some node in
/// the cycle is expected to increment the counter each pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IterationGuard {
    pub counter_key: String,
    pub max_iterations: u64,
}

impl IterationGuard {
    pub fn new(counter_key: impl Into<String>, max_iterations: u64) -> Self {
        Self {
            counter_key: counter_key.into(),
            max_iterations,
        }
    }
}

/// A conditional edge: source node, router, declared candidate targets, and
/// an optional iteration guard.
///
/// Candidate targets feed compile-time reachability and cycle analysis;
/// the router remains free to return any registered node at run time.
#[derive(Clone)]
pub struct ConditionalEdge {
    from: NodeKind,
    router: EdgePredicate,
    targets: Vec<NodeKind>,
    guard: Option<IterationGuard>,
}

impl ConditionalEdge {
    pub fn new(
        from: impl Into<NodeKind>,
        router: EdgePredicate,
        targets: Vec<NodeKind>,
    ) -> Self {
        Self {
            from: from.into(),
            router,
            targets,
            guard: None,
        }
    }

    /// Attach an iteration guard bounding the cycle this edge closes.
    #[must_use]
    pub fn with_guard(mut self, guard: IterationGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn from(&self) -> &NodeKind {
        &self.from
    }

    pub fn router(&self) -> &EdgePredicate {
        &self.router
    }

    pub fn targets(&self) -> &[NodeKind] {
        &self.targets
    }

    pub fn guard(&self) -> Option<&IterationGuard> {
        self.guard.as_ref()
    }
}

impl std::fmt::Debug for ConditionalEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionalEdge")
            .field("from", &self.from)
            .field("targets", &self.targets)
            .field("guard", &self.guard)
            .finish_non_exhaustive()
    }
}

/// A map edge: source node, fan-out function, and declared candidate
/// targets for the spawned branches.
#[derive(Clone)]
pub struct MapEdge {
    from: NodeKind,
    fan_out: FanOutFn,
    targets: Vec<NodeKind>,
}

impl MapEdge {
    pub fn new(from: impl Into<NodeKind>, fan_out: FanOutFn, targets: Vec<NodeKind>) -> Self {
        Self {
            from: from.into(),
            fan_out,
            targets,
        }
    }

    pub fn from(&self) -> &NodeKind {
        &self.from
    }

    pub fn fan_out(&self) -> &FanOutFn {
        &self.fan_out
    }

    pub fn targets(&self) -> &[NodeKind] {
        &self.targets
    }
}

impl std::fmt::Debug for MapEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapEdge")
            .field("from", &self.from)
            .field("targets", &self.targets)
            .finish_non_exhaustive()
    }
}
