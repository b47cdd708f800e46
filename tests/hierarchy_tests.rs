//! Hierarchy and dependency-walk tests
//!
//! Tests for:
//! - Structural invariants (no cycles, single synchronizer per tree)
//! - Attach / detach / remove bookkeeping
//! - Dependency order and dirty tracking of the walk
//! - Sibling ordering
//! - Synchronizer-driven walks on shared hierarchies

use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use rustc_hash::FxHashMap;
use tessera::packing::{ActiveValueDeclaration, ConsumptionStage};
use tessera::scene::{Hierarchy, NodeKey, NodeKind};
use tessera::sync::FrameSynchronizer;
use tessera::TesseraError;

// ============================================================================
// Helper
// ============================================================================

static CLOCK: AtomicU64 = AtomicU64::new(1);

/// Node that records when and how often it was recomputed.
#[derive(Debug, Default)]
struct StampNode {
    local: f32,
    derived: f32,
    priority: i32,
    recomputes: u32,
    stamp: u64,
    parent_changes: Vec<Option<NodeKey>>,
}

impl StampNode {
    fn new(local: f32) -> Self {
        Self {
            local,
            ..Default::default()
        }
    }

    fn with_priority(priority: i32) -> Self {
        Self {
            priority,
            ..Default::default()
        }
    }
}

impl NodeKind for StampNode {
    const TYPE_NAME: &'static str = "StampNode";
    const VALUE_COUNT: usize = 2;

    fn compute_derived(&mut self, parent: Option<&Self>) {
        self.derived = parent.map_or(0.0, |p| p.derived) + self.local;
        self.recomputes += 1;
        self.stamp = CLOCK.fetch_add(1, AtomicOrdering::Relaxed);
    }

    fn extract_values(&self, out: &mut [f32]) {
        out[0] = self.local;
        out[1] = self.derived;
    }

    fn declare_active_values(stage: ConsumptionStage, decl: &mut ActiveValueDeclaration<'_>) {
        if stage == ConsumptionStage::Vertex {
            decl.declare(1, "derived");
        }
    }

    fn compare_siblings(&self, other: &Self) -> Ordering {
        self.priority.cmp(&other.priority)
    }

    fn on_parent_changed(&mut self, previous: Option<NodeKey>) {
        self.parent_changes.push(previous);
    }
}

fn recomputes(h: &Hierarchy<StampNode>, key: NodeKey) -> u32 {
    h.get(key).unwrap().recomputes
}

fn parent_map(h: &Hierarchy<StampNode>, keys: &[NodeKey]) -> FxHashMap<NodeKey, Option<NodeKey>> {
    keys.iter().map(|&k| (k, h.parent(k))).collect()
}

/// ```text
///        r
///      /   \
///     a     b
///    / \     \
///   c   d     e
/// ```
fn sample_tree(sync: &FrameSynchronizer) -> (Hierarchy<StampNode>, Vec<NodeKey>) {
    let mut h = Hierarchy::new();
    let r = h.create_root(sync, StampNode::new(1.0));
    let a = h.create_child(r, StampNode::new(2.0)).unwrap();
    let b = h.create_child(r, StampNode::new(3.0)).unwrap();
    let c = h.create_child(a, StampNode::new(4.0)).unwrap();
    let d = h.create_child(a, StampNode::new(5.0)).unwrap();
    let e = h.create_child(b, StampNode::new(6.0)).unwrap();
    (h, vec![r, a, b, c, d, e])
}

// ============================================================================
// Structural Invariants
// ============================================================================

#[test]
fn attach_under_self_or_descendant_fails_without_changes() {
    let sync = FrameSynchronizer::new();
    let (mut h, keys) = sample_tree(&sync);
    let (r, a, c) = (keys[0], keys[1], keys[3]);
    let before = parent_map(&h, &keys);

    assert!(matches!(h.attach(a, a), Err(TesseraError::ReparentCycle)));
    assert!(matches!(h.attach(a, c), Err(TesseraError::ReparentCycle)));
    assert!(matches!(h.attach(r, c), Err(TesseraError::ReparentCycle)));

    assert_eq!(parent_map(&h, &keys), before);
    assert_eq!(h.roots(), &[r]);
}

#[test]
fn attach_fails_iff_target_is_descendant_or_self() {
    let sync = FrameSynchronizer::new();
    let (mut h, keys) = sample_tree(&sync);
    let original = parent_map(&h, &keys);

    for &node in &keys {
        for &target in &keys {
            let expect_cycle = node == target || h.is_descendant(target, node);
            let previous = h.parent(node);

            match h.attach(node, target) {
                Err(TesseraError::ReparentCycle) => {
                    assert!(expect_cycle, "{node:?} under {target:?} wrongly refused");
                    assert_eq!(h.parent(node), previous);
                }
                Ok(()) => {
                    assert!(!expect_cycle, "{node:?} under {target:?} created a cycle");
                    assert_eq!(h.parent(node), Some(target));
                    match previous {
                        Some(p) => h.attach(node, p).unwrap(),
                        None => h.detach(node).unwrap(),
                    }
                }
                Err(other) => panic!("unexpected error {other}"),
            }
            assert_eq!(parent_map(&h, &keys), original);
        }
    }
}

#[test]
fn attach_across_synchronizers_fails_without_changes() {
    let sync_a = FrameSynchronizer::new();
    let sync_b = FrameSynchronizer::new();
    let mut h = Hierarchy::new();
    let ra = h.create_root(&sync_a, StampNode::new(1.0));
    let rb = h.create_root(&sync_b, StampNode::new(1.0));
    let child = h.create_child(rb, StampNode::new(1.0)).unwrap();

    let err = h.attach(child, ra).unwrap_err();
    assert!(matches!(
        err,
        TesseraError::SynchronizerMismatch { node, parent } if node == sync_b.id() && parent == sync_a.id()
    ));
    assert_eq!(h.parent(child), Some(rb));
    assert!(h.children(ra).is_empty());
    assert_eq!(h.roots(), &[ra, rb]);
}

#[test]
fn attach_within_same_synchronizer_merges_trees() {
    let sync = FrameSynchronizer::new();
    let mut h = Hierarchy::new();
    let r1 = h.create_root(&sync, StampNode::new(1.0));
    let r2 = h.create_root(&sync, StampNode::new(10.0));
    let leaf = h.create_child(r2, StampNode::new(100.0)).unwrap();
    h.walk_all();

    h.attach(r2, r1).unwrap();
    assert_eq!(h.roots(), &[r1]);
    assert_eq!(h.root_of(leaf), Some(r1));
    assert!(!h.is_root(r2));
    assert_eq!(h.get(r2).unwrap().parent_changes, vec![None]);

    h.walk_all();
    assert!((h.get(leaf).unwrap().derived - 111.0).abs() < f32::EPSILON);
}

#[test]
fn missing_nodes_are_reported() {
    let sync = FrameSynchronizer::new();
    let mut h = Hierarchy::new();
    let r = h.create_root(&sync, StampNode::new(1.0));
    let gone = h.create_child(r, StampNode::new(1.0)).unwrap();
    h.remove(gone).unwrap();

    assert!(matches!(h.attach(gone, r), Err(TesseraError::NodeNotFound(_))));
    assert!(matches!(h.create_child(gone, StampNode::default()), Err(TesseraError::NodeNotFound(_))));
    assert!(matches!(h.mark_dirty(gone), Err(TesseraError::NodeNotFound(_))));
}

// ============================================================================
// Detach & Remove
// ============================================================================

#[test]
fn detach_makes_root_on_same_synchronizer() {
    let sync = FrameSynchronizer::new();
    let (mut h, keys) = sample_tree(&sync);
    let (r, a, c) = (keys[0], keys[1], keys[3]);

    h.detach(a).unwrap();
    assert!(h.is_root(a));
    assert_eq!(h.roots(), &[r, a]);
    assert_eq!(h.root_of(c), Some(a));
    assert!(h.synchronizer_of(c).unwrap().same_as(&sync));
    assert_eq!(h.get(a).unwrap().parent_changes, vec![Some(r)]);
    assert!(!h.children(r).contains(&a));

    // Detaching a root is a no-op.
    h.detach(a).unwrap();
    assert_eq!(h.roots(), &[r, a]);
}

#[test]
fn remove_drops_whole_subtree() {
    let sync = FrameSynchronizer::new();
    let (mut h, keys) = sample_tree(&sync);
    let (r, a, b, c, d) = (keys[0], keys[1], keys[2], keys[3], keys[4]);

    assert_eq!(h.remove(a).unwrap(), 3);
    assert_eq!(h.len(), 3);
    for k in [a, c, d] {
        assert!(!h.contains(k));
    }
    assert_eq!(h.children(r), &[b]);

    assert_eq!(h.remove(r).unwrap(), 3);
    assert!(h.is_empty());
    assert!(h.roots().is_empty());
}

// ============================================================================
// Dependency Walk
// ============================================================================

#[test]
fn parents_are_computed_before_descendants() {
    let sync = FrameSynchronizer::new();
    let (mut h, keys) = sample_tree(&sync);
    let stats = h.walk_all();

    assert_eq!(stats.trees_walked, 1);
    assert_eq!(stats.nodes_recomputed, keys.len());
    for &k in &keys {
        if let Some(p) = h.parent(k) {
            assert!(h.get(p).unwrap().stamp < h.get(k).unwrap().stamp);
        }
    }
    // c = r + a + c
    assert!((h.get(keys[3]).unwrap().derived - 7.0).abs() < f32::EPSILON);
}

#[test]
fn clean_walk_recomputes_nothing() {
    let sync = FrameSynchronizer::new();
    let (mut h, keys) = sample_tree(&sync);
    h.walk_all();
    let counts: Vec<u32> = keys.iter().map(|&k| recomputes(&h, k)).collect();

    let stats = h.walk_all();
    assert_eq!(stats.nodes_recomputed, 0);
    assert_eq!(stats.trees_walked, 0);
    let after: Vec<u32> = keys.iter().map(|&k| recomputes(&h, k)).collect();
    assert_eq!(counts, after);
}

#[test]
fn dirty_sibling_does_not_recompute_clean_sibling() {
    let sync = FrameSynchronizer::new();
    let mut h = Hierarchy::new();
    let r = h.create_root(&sync, StampNode::new(1.0));
    let x = h.create_child(r, StampNode::new(2.0)).unwrap();
    let y = h.create_child(r, StampNode::new(3.0)).unwrap();
    h.walk_all();
    assert!(!h.hierarchy_dirty(r));

    let (r0, x0, y0) = (recomputes(&h, r), recomputes(&h, x), recomputes(&h, y));
    h.mark_dirty(x).unwrap();
    assert!(h.hierarchy_dirty(r));
    h.walk_tree(r);

    assert_eq!(recomputes(&h, r), r0 + 1);
    assert_eq!(recomputes(&h, x), x0 + 1);
    assert_eq!(recomputes(&h, y), y0);
    assert!(!h.hierarchy_dirty(r));
}

#[test]
fn dirty_node_recomputes_its_subtree() {
    let sync = FrameSynchronizer::new();
    let (mut h, keys) = sample_tree(&sync);
    let (a, b, c, d, e) = (keys[1], keys[2], keys[3], keys[4], keys[5]);
    h.walk_all();

    h.get_mut(a).unwrap().local = 20.0;
    let stats = h.walk_all();

    // root (forced) + a + c + d
    assert_eq!(stats.nodes_recomputed, 4);
    assert_eq!(recomputes(&h, b), 1);
    assert_eq!(recomputes(&h, e), 1);
    assert_eq!(recomputes(&h, c), 2);
    assert!((h.get(d).unwrap().derived - 26.0).abs() < f32::EPSILON);
}

#[test]
fn dirty_child_order_sorts_siblings() {
    let sync = FrameSynchronizer::new();
    let mut h = Hierarchy::new();
    let r = h.create_root(&sync, StampNode::default());
    let high = h.create_child(r, StampNode::with_priority(3)).unwrap();
    let low = h.create_child(r, StampNode::with_priority(1)).unwrap();
    let mid = h.create_child(r, StampNode::with_priority(2)).unwrap();

    let stats = h.walk_all();
    assert_eq!(stats.levels_sorted, 1);
    assert_eq!(h.children(r), &[low, mid, high]);

    h.get_mut(low).unwrap().priority = 9;
    h.mark_child_order_dirty(r).unwrap();
    let stats = h.walk_all();
    assert_eq!(stats.levels_sorted, 1);
    assert_eq!(h.children(r), &[mid, high, low]);
}

#[test]
fn child_order_only_walk_recomputes_nothing() {
    let sync = FrameSynchronizer::new();
    let (mut h, keys) = sample_tree(&sync);
    h.walk_all();

    h.mark_child_order_dirty(keys[1]).unwrap();
    assert!(h.hierarchy_dirty(keys[0]));
    let stats = h.walk_all();
    assert_eq!(stats.nodes_recomputed, 0);
    assert_eq!(stats.levels_sorted, 1);
    assert!(!h.hierarchy_dirty(keys[0]));
}

// ============================================================================
// Synchronizer-driven Walks
// ============================================================================

#[test]
fn shared_hierarchy_walks_before_rotation() {
    let sync = FrameSynchronizer::new();
    let scene = Hierarchy::<StampNode>::shared();
    let r = scene.lock().create_root(&sync, StampNode::new(1.0));
    let child = scene.lock().create_child(r, StampNode::new(2.0)).unwrap();
    assert_eq!(sync.subscriber_count(), 1);

    sync.advance_frame();
    {
        let h = scene.lock();
        assert!(!h.hierarchy_dirty(r));
        assert!((h.get(child).unwrap().derived - 3.0).abs() < f32::EPSILON);
    }

    sync.advance_frame();
    assert_eq!(scene.lock().get(child).unwrap().recomputes, 1);
}

#[test]
fn root_subscriptions_follow_root_status() {
    let sync = FrameSynchronizer::new();
    let scene = Hierarchy::<StampNode>::shared();
    let r1 = scene.lock().create_root(&sync, StampNode::default());
    let r2 = scene.lock().create_root(&sync, StampNode::default());
    assert_eq!(sync.subscriber_count(), 2);

    scene.lock().attach(r2, r1).unwrap();
    assert_eq!(sync.subscriber_count(), 1);

    scene.lock().detach(r2).unwrap();
    assert_eq!(sync.subscriber_count(), 2);

    scene.lock().remove(r1).unwrap();
    assert_eq!(sync.subscriber_count(), 1);

    drop(scene);
    assert_eq!(sync.subscriber_count(), 0);
}
