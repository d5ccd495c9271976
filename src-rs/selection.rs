use std::collections::HashSet;

use crate::scene::{NodeId, NodeKind, SceneGraph};

/// Expands `selection` into the candidate nodes to rasterize or rename.
///
/// With `top_level_only` the selection is returned untouched. Otherwise every
/// selected node is kept and frames/groups contribute their whole subtree;
/// the union is deduplicated (first occurrence wins, selected nodes first) and
/// nodes whose kind is in `excluded` are dropped. Ids the graph no longer knows
/// are skipped.
pub fn expand<G: SceneGraph>(
    graph: &G,
    selection: &[NodeId],
    excluded: &[NodeKind],
    top_level_only: bool,
) -> Vec<NodeId> {
    if top_level_only {
        return selection.to_vec();
    }

    let mut descendants: Vec<NodeId> = Vec::new();
    for id in selection {
        if let Some(node) = graph.node(id) {
            if node.kind.is_expandable() {
                descendants.extend(graph.descendants(id));
            }
        }
    }

    let mut seen: HashSet<&NodeId> = HashSet::new();
    let mut candidates = Vec::new();
    for id in selection.iter().chain(descendants.iter()) {
        if !seen.insert(id) {
            continue;
        }
        let Some(node) = graph.node(id) else {
            continue;
        };
        if excluded.contains(&node.kind) {
            continue;
        }
        candidates.push(id.clone());
    }
    candidates
}
