//! Dependency Walk
//!
//! Recomputes derived state top-down so that every node sees its parent's
//! result from the same pass. Uses an explicit stack instead of recursion so
//! deep trees cannot overflow.
//!
//! Within a dirty tree:
//! - the root is always recomputed
//! - any other node is recomputed iff it, or an ancestor below the root, was
//!   marked since the last walk
//!
//! Sibling order is re-sorted (via [`NodeKind::compare_siblings`]) on every
//! level whose child order was marked dirty, before that level is descended.

use crate::scene::hierarchy::Hierarchy;
use crate::scene::node::{NodeKey, NodeKind};

/// Counters from one or more tree walks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    pub trees_walked: usize,
    pub nodes_visited: usize,
    pub nodes_recomputed: usize,
    pub levels_sorted: usize,
}

impl std::ops::AddAssign for WalkStats {
    fn add_assign(&mut self, rhs: Self) {
        self.trees_walked += rhs.trees_walked;
        self.nodes_visited += rhs.nodes_visited;
        self.nodes_recomputed += rhs.nodes_recomputed;
        self.levels_sorted += rhs.levels_sorted;
    }
}

impl<N: NodeKind> Hierarchy<N> {
    /// Walks every tree with pending work.
    pub fn walk_all(&mut self) -> WalkStats {
        let mut stats = WalkStats::default();
        for root in self.roots.clone() {
            stats += self.walk_tree(root);
        }
        stats
    }

    /// Walks the tree rooted at `root` if it has pending work.
    ///
    /// A clean tree, a stale key or a non-root key is a no-op.
    pub fn walk_tree(&mut self, root: NodeKey) -> WalkStats {
        let mut stats = WalkStats::default();
        let Some(binding) = self.nodes.get(root).and_then(|e| e.binding.as_ref()) else {
            return stats;
        };
        let recompute = binding.tree_dirty;
        if !recompute && !binding.order_dirty {
            return stats;
        }
        stats.trees_walked = 1;

        // (node, an ancestor below the root was dirty)
        let mut stack: Vec<(NodeKey, bool)> = Vec::with_capacity(64);
        stack.push((root, false));

        while let Some((key, inherited)) = stack.pop() {
            stats.nodes_visited += 1;

            if self.nodes[key].child_order_dirty {
                self.sort_children(key);
                stats.levels_sorted += 1;
            }

            let entry = &mut self.nodes[key];
            let own_dirty = std::mem::take(&mut entry.dirty);
            let parent = entry.parent;

            if recompute && (key == root || own_dirty || inherited) {
                match parent {
                    Some(p) => {
                        if let Some([node, parent]) = self.nodes.get_disjoint_mut([key, p]) {
                            node.state.compute_derived(Some(&parent.state));
                        }
                    }
                    None => self.nodes[key].state.compute_derived(None),
                }
                stats.nodes_recomputed += 1;
            }

            // A forced root recompute does not cascade by itself.
            let propagate = own_dirty || inherited;
            let children = &self.nodes[key].children;
            stack.extend(children.iter().rev().map(|&c| (c, propagate)));
        }

        if let Some(binding) = self.nodes.get_mut(root).and_then(|e| e.binding.as_mut()) {
            binding.tree_dirty = false;
            binding.order_dirty = false;
        }

        log::trace!(
            "{}: walked {root:?} ({} visited, {} recomputed)",
            N::TYPE_NAME,
            stats.nodes_visited,
            stats.nodes_recomputed
        );
        stats
    }

    fn sort_children(&mut self, key: NodeKey) {
        let mut children = std::mem::take(&mut self.nodes[key].children);
        let nodes = &self.nodes;
        children.sort_by(|&a, &b| {
            nodes[a]
                .state
                .compare_siblings(&nodes[b].state)
                .then_with(|| a.cmp(&b))
        });
        let entry = &mut self.nodes[key];
        entry.children = children;
        entry.child_order_dirty = false;
    }
}
