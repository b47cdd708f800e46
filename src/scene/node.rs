use std::cmp::Ordering;

use slotmap::new_key_type;

use crate::packing::{ActiveValueDeclaration, ConsumptionStage};
use crate::registry::NodeFunction;
use crate::sync::{FrameSynchronizer, Subscription};

new_key_type! {
    /// Handle to a node inside a [`Hierarchy`](crate::scene::Hierarchy).
    pub struct NodeKey;
}

/// Behaviour of one node type.
///
/// A node type owns `VALUE_COUNT` numeric values. Derived state is recomputed
/// during the dependency walk (parents always before children) and then
/// extracted into a flat slice by the packer.
///
/// Most node types are composed from capability modules with
/// [`node_kind!`](crate::node_kind); implement this trait by hand for
/// anything more specialized.
pub trait NodeKind: Send + 'static {
    /// Registry name.
    const TYPE_NAME: &'static str;
    /// Number of values written by [`extract_values`](Self::extract_values).
    const VALUE_COUNT: usize;

    /// Recomputes derived state from local state and the parent's derived state.
    fn compute_derived(&mut self, parent: Option<&Self>);

    /// Writes exactly `VALUE_COUNT` values into `out`.
    fn extract_values(&self, out: &mut [f32]);

    /// Declares which values `stage` consumes.
    fn declare_active_values(stage: ConsumptionStage, decl: &mut ActiveValueDeclaration<'_>);

    /// Ordering among siblings, applied when a parent's child order is dirty.
    /// Ties fall back to key order.
    fn compare_siblings(&self, _other: &Self) -> Ordering {
        Ordering::Equal
    }

    /// Called after the node was attached to or detached from a parent.
    /// `previous` is the old parent.
    fn on_parent_changed(&mut self, _previous: Option<NodeKey>) {}

    /// Functions published to the registry for this type.
    fn node_functions() -> Vec<NodeFunction> {
        vec![NodeFunction::ActiveValues(Self::declare_active_values)]
    }
}

/// Per-root state: which synchronizer drives the tree and whether anything
/// below it changed since the last walk.
pub(crate) struct RootBinding {
    pub(crate) sync: FrameSynchronizer,
    pub(crate) tree_dirty: bool,
    pub(crate) order_dirty: bool,
    /// Walk callback. `None` for hierarchies driven manually.
    pub(crate) _subscription: Option<Subscription>,
}

/// Arena slot of a node.
pub(crate) struct NodeEntry<N> {
    pub(crate) state: N,
    pub(crate) parent: Option<NodeKey>,
    pub(crate) children: Vec<NodeKey>,
    pub(crate) root: NodeKey,
    /// Explicitly marked since the last walk.
    pub(crate) dirty: bool,
    pub(crate) child_order_dirty: bool,
    /// Present iff this node is a root.
    pub(crate) binding: Option<RootBinding>,
}

impl<N> NodeEntry<N> {
    pub(crate) fn new(state: N, parent: Option<NodeKey>, root: NodeKey) -> Self {
        Self {
            state,
            parent,
            children: Vec::new(),
            root,
            dirty: true,
            child_order_dirty: false,
            binding: None,
        }
    }
}
