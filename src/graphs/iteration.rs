//! Graph algorithms used by compilation.
//!
//! The candidate graph is the union of static edges, declared conditional
//! targets, and declared map targets, with virtual `End` excluded. On top
//! of it compilation runs reachability from `Start`, a full reachability
//! closure (consumed by deferred-node readiness checks at run time), and
//! strongly-connected-component analysis for cycle validation.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::types::NodeKind;

/// Adjacency over every edge kind's declared candidates; `End` excluded.
pub(crate) type CandidateAdjacency = FxHashMap<NodeKind, Vec<NodeKind>>;

/// Nodes reachable from `start` (excluding `start` itself unless it sits on
/// a cycle back to itself).
pub(crate) fn reachable_from(adj: &CandidateAdjacency, start: &NodeKind) -> FxHashSet<NodeKind> {
    let mut seen: FxHashSet<NodeKind> = FxHashSet::default();
    let mut stack: Vec<&NodeKind> = vec![start];
    while let Some(node) = stack.pop() {
        if let Some(next) = adj.get(node) {
            for target in next {
                if seen.insert(target.clone()) {
                    stack.push(target);
                }
            }
        }
    }
    seen
}

/// Reachability closure: for each key node, every node reachable from it.
///
/// Graphs here are small (tens of nodes); a DFS per node is simpler than
/// maintaining an incremental closure and fast enough.
pub(crate) fn reachability_closure(
    adj: &CandidateAdjacency,
    nodes: impl Iterator<Item = NodeKind>,
) -> FxHashMap<NodeKind, FxHashSet<NodeKind>> {
    nodes
        .map(|node| {
            let reach = reachable_from(adj, &node);
            (node, reach)
        })
        .collect()
}

/// Strongly connected components of the candidate graph, via iterative
/// Tarjan. Components are returned with their members sorted by encoded
/// name for deterministic error reporting.
pub(crate) fn strongly_connected_components(
    adj: &CandidateAdjacency,
    nodes: &[NodeKind],
) -> Vec<Vec<NodeKind>> {
    struct Frame<'a> {
        node: &'a NodeKind,
        edge_index: usize,
    }

    enum Step<'a> {
        Descend(&'a NodeKind),
        Retreat(&'a NodeKind, usize),
    }

    let empty: Vec<NodeKind> = Vec::new();
    let mut index_of: FxHashMap<&NodeKind, usize> = FxHashMap::default();
    let mut lowlink: FxHashMap<&NodeKind, usize> = FxHashMap::default();
    let mut on_stack: FxHashSet<&NodeKind> = FxHashSet::default();
    let mut stack: Vec<&NodeKind> = Vec::new();
    let mut next_index = 0usize;
    let mut components: Vec<Vec<NodeKind>> = Vec::new();

    for root in nodes {
        if index_of.contains_key(root) {
            continue;
        }
        let mut frames: Vec<Frame<'_>> = vec![Frame {
            node: root,
            edge_index: 0,
        }];
        index_of.insert(root, next_index);
        lowlink.insert(root, next_index);
        next_index += 1;
        stack.push(root);
        on_stack.insert(root);

        while !frames.is_empty() {
            let step = {
                let frame = frames.last_mut().expect("frames checked non-empty");
                let node = frame.node;
                let targets = adj.get(node).unwrap_or(&empty);
                let mut chosen = None;
                while frame.edge_index < targets.len() {
                    let target = &targets[frame.edge_index];
                    frame.edge_index += 1;
                    match index_of.get(target) {
                        None => {
                            chosen = Some(Step::Descend(target));
                            break;
                        }
                        Some(&target_index) => {
                            if on_stack.contains(target) && target_index < lowlink[node] {
                                lowlink.insert(node, target_index);
                            }
                        }
                    }
                }
                chosen.unwrap_or_else(|| Step::Retreat(node, lowlink[node]))
            };

            match step {
                Step::Descend(target) => {
                    index_of.insert(target, next_index);
                    lowlink.insert(target, next_index);
                    next_index += 1;
                    stack.push(target);
                    on_stack.insert(target);
                    frames.push(Frame {
                        node: target,
                        edge_index: 0,
                    });
                }
                Step::Retreat(node, node_low) => {
                    if node_low == index_of[node] {
                        let mut component = Vec::new();
                        while let Some(member) = stack.pop() {
                            on_stack.remove(member);
                            component.push(member.clone());
                            if member == node {
                                break;
                            }
                        }
                        component.sort_by_key(|n| n.encode());
                        components.push(component);
                    }
                    frames.pop();
                    if let Some(parent) = frames.last()
                        && node_low < lowlink[parent.node]
                    {
                        lowlink.insert(parent.node, node_low);
                    }
                }
            }
        }
    }

    components
}

/// Returns `true` if the candidate graph has an edge `node -> node`.
pub(crate) fn has_self_loop(adj: &CandidateAdjacency, node: &NodeKind) -> bool {
    adj.get(node)
        .map(|targets| targets.contains(node))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custom(name: &str) -> NodeKind {
        NodeKind::Custom(name.to_string())
    }

    fn adjacency(pairs: &[(&str, &str)]) -> CandidateAdjacency {
        let mut adj: CandidateAdjacency = FxHashMap::default();
        for (from, to) in pairs {
            adj.entry(NodeKind::from(*from))
                .or_default()
                .push(NodeKind::from(*to));
        }
        adj
    }

    #[test]
    fn reachable_from_follows_chains() {
        let adj = adjacency(&[("Start", "a"), ("a", "b"), ("b", "c"), ("x", "y")]);
        let reach = reachable_from(&adj, &NodeKind::Start);
        assert!(reach.contains(&custom("a")));
        assert!(reach.contains(&custom("c")));
        assert!(!reach.contains(&custom("y")));
    }

    #[test]
    fn closure_covers_cycles() {
        let adj = adjacency(&[("a", "b"), ("b", "a")]);
        let closure = reachability_closure(&adj, [custom("a"), custom("b")].into_iter());
        assert!(closure[&custom("a")].contains(&custom("a")));
        assert!(closure[&custom("b")].contains(&custom("a")));
    }

    #[test]
    fn scc_finds_cycle_members() {
        let adj = adjacency(&[("a", "b"), ("b", "c"), ("c", "a"), ("c", "d")]);
        let nodes = vec![custom("a"), custom("b"), custom("c"), custom("d")];
        let components = strongly_connected_components(&adj, &nodes);
        let cycle = components
            .iter()
            .find(|c| c.len() > 1)
            .expect("one cyclic component");
        assert_eq!(cycle.len(), 3);
        assert!(cycle.contains(&custom("a")));
        assert!(!cycle.contains(&custom("d")));
    }

    #[test]
    fn scc_is_deterministic() {
        let adj = adjacency(&[("a", "b"), ("b", "a")]);
        let nodes = vec![custom("a"), custom("b")];
        let first = strongly_connected_components(&adj, &nodes);
        let second = strongly_connected_components(&adj, &nodes);
        assert_eq!(first, second);
    }

    #[test]
    fn self_loop_detection() {
        let adj = adjacency(&[("a", "a"), ("b", "c")]);
        assert!(has_self_loop(&adj, &custom("a")));
        assert!(!has_self_loop(&adj, &custom("b")));
    }
}
