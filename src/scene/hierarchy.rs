//! Node Hierarchy
//!
//! A forest of typed nodes stored in a slotmap arena. Every tree is bound to
//! exactly one [`FrameSynchronizer`] through its root; a child inherits the
//! binding of the tree it lives in.
//!
//! # Structural invariants
//!
//! - No cycles: a node is never attached under itself or a descendant.
//! - Single synchronizer per tree: attaching across synchronizers fails.
//! - Failed structural operations leave the hierarchy untouched.
//!
//! # Driving the walk
//!
//! A hierarchy created with [`Hierarchy::shared`] connects every root to its
//! synchronizer so the dependency walk runs automatically right before the
//! buffer indices rotate. A hierarchy created with [`Hierarchy::new`] is
//! walked explicitly with [`walk_tree`](Hierarchy::walk_tree) or
//! [`walk_all`](Hierarchy::walk_all).

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use slotmap::SlotMap;

use crate::errors::{Result, TesseraError};
use crate::scene::node::{NodeEntry, NodeKey, NodeKind, RootBinding};
use crate::sync::{FrameSynchronizer, SyncEvent, SyncPhase};

/// Callback order of the dependency walk at `(Rotate, Before)`.
pub const WALK_ORDER: i32 = -100;

/// A hierarchy shared with its synchronizer callbacks.
pub type SharedHierarchy<N> = Arc<Mutex<Hierarchy<N>>>;

pub struct Hierarchy<N: NodeKind> {
    pub(crate) nodes: SlotMap<NodeKey, NodeEntry<N>>,
    pub(crate) roots: Vec<NodeKey>,
    /// Set for shared hierarchies; root callbacks walk through it.
    self_ref: Option<Weak<Mutex<Hierarchy<N>>>>,
}

impl<N: NodeKind> Default for Hierarchy<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: NodeKind> Hierarchy<N> {
    /// Creates a hierarchy that is walked manually.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            roots: Vec::new(),
            self_ref: None,
        }
    }

    /// Creates a hierarchy whose trees are walked by their synchronizers.
    #[must_use]
    pub fn shared() -> SharedHierarchy<N> {
        Arc::new_cyclic(|weak| {
            Mutex::new(Self {
                nodes: SlotMap::with_key(),
                roots: Vec::new(),
                self_ref: Some(weak.clone()),
            })
        })
    }

    // ========================================================================
    // Construction & destruction
    // ========================================================================

    /// Creates a new tree bound to `sync`.
    pub fn create_root(&mut self, sync: &FrameSynchronizer, state: N) -> NodeKey {
        let key = self.nodes.insert_with_key(|key| NodeEntry::new(state, None, key));
        self.bind_root(key, sync.clone());
        self.roots.push(key);
        log::debug!("{}: created root {key:?} on sync #{}", N::TYPE_NAME, sync.id());
        key
    }

    /// Creates a node as the last child of `parent`.
    pub fn create_child(&mut self, parent: NodeKey, state: N) -> Result<NodeKey> {
        let root = self.entry(parent)?.root;
        let key = self.nodes.insert(NodeEntry::new(state, Some(parent), root));
        if let Some(p) = self.nodes.get_mut(parent) {
            p.children.push(key);
            p.child_order_dirty = true;
        }
        self.mark_tree_dirty(root);
        self.mark_order_dirty(root);
        Ok(key)
    }

    /// Removes `key` and its whole subtree. Returns the number of nodes removed.
    ///
    /// Slots still referring to removed nodes must be released by the caller.
    pub fn remove(&mut self, key: NodeKey) -> Result<usize> {
        let parent = self.entry(key)?.parent;
        self.unlink(key, parent);

        let subtree = self.collect_subtree(key);
        for &k in &subtree {
            // Dropping a root binding drops its walk subscription.
            self.nodes.remove(k);
        }
        log::debug!("{}: removed {} node(s) under {key:?}", N::TYPE_NAME, subtree.len());
        Ok(subtree.len())
    }

    // ========================================================================
    // Reparenting
    // ========================================================================

    /// Moves `node` (with its subtree) under `parent`, as its last child.
    ///
    /// Fails without side effects on a cycle or when the two trees are bound
    /// to different synchronizers.
    pub fn attach(&mut self, node: NodeKey, parent: NodeKey) -> Result<()> {
        let node_root = self.entry(node)?.root;
        let parent_root = self.entry(parent)?.root;

        if node == parent || self.is_descendant(parent, node) {
            return Err(TesseraError::ReparentCycle);
        }

        let node_sync = self.binding_sync_id(node_root);
        let parent_sync = self.binding_sync_id(parent_root);
        if node_sync != parent_sync {
            return Err(TesseraError::SynchronizerMismatch {
                node: node_sync,
                parent: parent_sync,
            });
        }

        let previous = self.nodes[node].parent;
        if previous == Some(parent) {
            return Ok(());
        }

        self.unlink(node, previous);
        if previous.is_none() {
            // No longer a root: its walk subscription goes away with the binding.
            self.nodes[node].binding = None;
        }

        self.nodes[node].parent = Some(parent);
        let p = &mut self.nodes[parent];
        p.children.push(node);
        p.child_order_dirty = true;

        self.set_subtree_root(node, parent_root);
        self.mark_tree_dirty(parent_root);
        self.mark_order_dirty(parent_root);
        self.nodes[node].state.on_parent_changed(previous);

        log::debug!("{}: attached {node:?} under {parent:?}", N::TYPE_NAME);
        Ok(())
    }

    /// Detaches `node` from its parent, making it the root of a new tree on
    /// the same synchronizer. A no-op for roots.
    pub fn detach(&mut self, node: NodeKey) -> Result<()> {
        let entry = self.entry(node)?;
        let Some(previous) = entry.parent else {
            return Ok(());
        };
        let old_root = entry.root;
        let sync = self.nodes[old_root]
            .binding
            .as_ref()
            .map(|b| b.sync.clone())
            .ok_or_else(|| TesseraError::NodeNotFound(format!("{old_root:?}")))?;

        self.unlink(node, Some(previous));
        self.nodes[node].parent = None;
        self.bind_root(node, sync);
        self.roots.push(node);
        self.set_subtree_root(node, node);
        self.nodes[node].state.on_parent_changed(Some(previous));

        log::debug!("{}: detached {node:?} from {previous:?}", N::TYPE_NAME);
        Ok(())
    }

    // ========================================================================
    // Change tracking
    // ========================================================================

    /// Schedules `key` (and through it, its subtree) for recomputation.
    pub fn mark_dirty(&mut self, key: NodeKey) -> Result<()> {
        let entry = self.entry_mut(key)?;
        entry.dirty = true;
        let root = entry.root;
        self.mark_tree_dirty(root);
        Ok(())
    }

    /// Schedules a re-sort of `key`'s children before the next walk.
    pub fn mark_child_order_dirty(&mut self, key: NodeKey) -> Result<()> {
        let entry = self.entry_mut(key)?;
        entry.child_order_dirty = true;
        let root = entry.root;
        self.mark_order_dirty(root);
        Ok(())
    }

    /// Whether the tree rooted at `root` has pending work.
    ///
    /// Returns `false` for non-root keys.
    #[must_use]
    pub fn hierarchy_dirty(&self, root: NodeKey) -> bool {
        self.nodes
            .get(root)
            .and_then(|e| e.binding.as_ref())
            .is_some_and(|b| b.tree_dirty || b.order_dirty)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    #[inline]
    #[must_use]
    pub fn get(&self, key: NodeKey) -> Option<&N> {
        self.nodes.get(key).map(|e| &e.state)
    }

    /// Mutable access to a node's state. Marks the node dirty.
    pub fn get_mut(&mut self, key: NodeKey) -> Option<&mut N> {
        let root = self.nodes.get(key)?.root;
        self.mark_tree_dirty(root);
        let entry = self.nodes.get_mut(key)?;
        entry.dirty = true;
        Some(&mut entry.state)
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, key: NodeKey) -> bool {
        self.nodes.contains_key(key)
    }

    #[inline]
    #[must_use]
    pub fn parent(&self, key: NodeKey) -> Option<NodeKey> {
        self.nodes.get(key).and_then(|e| e.parent)
    }

    /// Children in their current sibling order.
    #[must_use]
    pub fn children(&self, key: NodeKey) -> &[NodeKey] {
        self.nodes.get(key).map_or(&[] as &[NodeKey], |e| e.children.as_slice())
    }

    #[inline]
    #[must_use]
    pub fn root_of(&self, key: NodeKey) -> Option<NodeKey> {
        self.nodes.get(key).map(|e| e.root)
    }

    #[inline]
    #[must_use]
    pub fn is_root(&self, key: NodeKey) -> bool {
        self.nodes.get(key).is_some_and(|e| e.parent.is_none())
    }

    #[inline]
    #[must_use]
    pub fn roots(&self) -> &[NodeKey] {
        &self.roots
    }

    /// Whether `ancestor` lies strictly above `node`.
    #[must_use]
    pub fn is_descendant(&self, node: NodeKey, ancestor: NodeKey) -> bool {
        let mut current = self.parent(node);
        while let Some(p) = current {
            if p == ancestor {
                return true;
            }
            current = self.parent(p);
        }
        false
    }

    /// Synchronizer driving the tree that contains `key`.
    #[must_use]
    pub fn synchronizer_of(&self, key: NodeKey) -> Option<&FrameSynchronizer> {
        let root = self.nodes.get(key)?.root;
        self.nodes.get(root)?.binding.as_ref().map(|b| &b.sync)
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn entry(&self, key: NodeKey) -> Result<&NodeEntry<N>> {
        self.nodes
            .get(key)
            .ok_or_else(|| TesseraError::NodeNotFound(format!("{key:?}")))
    }

    fn entry_mut(&mut self, key: NodeKey) -> Result<&mut NodeEntry<N>> {
        self.nodes
            .get_mut(key)
            .ok_or_else(|| TesseraError::NodeNotFound(format!("{key:?}")))
    }

    fn binding_sync_id(&self, root: NodeKey) -> u64 {
        self.nodes
            .get(root)
            .and_then(|e| e.binding.as_ref())
            .map_or(0, |b| b.sync.id())
    }

    fn bind_root(&mut self, key: NodeKey, sync: FrameSynchronizer) {
        let subscription = self.self_ref.as_ref().map(|weak| {
            let weak = weak.clone();
            sync.connect(SyncEvent::Rotate, SyncPhase::Before, WALK_ORDER, move || {
                if let Some(hierarchy) = weak.upgrade() {
                    hierarchy.lock().walk_tree(key);
                }
            })
        });

        if let Some(entry) = self.nodes.get_mut(key) {
            entry.binding = Some(RootBinding {
                sync,
                tree_dirty: true,
                order_dirty: false,
                _subscription: subscription,
            });
            entry.dirty = true;
        }
    }

    /// Removes `key` from its parent's children, or from the root list.
    fn unlink(&mut self, key: NodeKey, parent: Option<NodeKey>) {
        match parent {
            Some(p) => {
                if let Some(parent) = self.nodes.get_mut(p)
                    && let Some(pos) = parent.children.iter().position(|&c| c == key)
                {
                    parent.children.remove(pos);
                }
            }
            None => {
                if let Some(pos) = self.roots.iter().position(|&r| r == key) {
                    self.roots.remove(pos);
                }
            }
        }
    }

    /// Pre-order keys of the subtree rooted at `key`.
    pub(crate) fn collect_subtree(&self, key: NodeKey) -> Vec<NodeKey> {
        let mut out = Vec::new();
        let mut stack = vec![key];
        while let Some(k) = stack.pop() {
            if let Some(entry) = self.nodes.get(k) {
                out.push(k);
                stack.extend(entry.children.iter().rev().copied());
            }
        }
        out
    }

    /// Rebinds a moved subtree to `root` and marks every node in it dirty.
    fn set_subtree_root(&mut self, key: NodeKey, root: NodeKey) {
        for k in self.collect_subtree(key) {
            if let Some(entry) = self.nodes.get_mut(k) {
                entry.root = root;
                entry.dirty = true;
            }
        }
    }

    fn mark_tree_dirty(&mut self, root: NodeKey) {
        if let Some(binding) = self.nodes.get_mut(root).and_then(|e| e.binding.as_mut()) {
            binding.tree_dirty = true;
        }
    }

    fn mark_order_dirty(&mut self, root: NodeKey) {
        if let Some(binding) = self.nodes.get_mut(root).and_then(|e| e.binding.as_mut()) {
            binding.order_dirty = true;
        }
    }
}

impl<N: NodeKind> std::fmt::Debug for Hierarchy<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hierarchy")
            .field("node_type", &N::TYPE_NAME)
            .field("nodes", &self.nodes.len())
            .field("roots", &self.roots.len())
            .field("shared", &self.self_ref.is_some())
            .finish()
    }
}
