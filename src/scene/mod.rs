//! Scene graph
//!
//! Typed node hierarchies with per-frame dependency walks:
//! - [`NodeKind`]: behaviour of a node type (derivation, extraction, declarations)
//! - [`Capability`]: composable slices of node state, combined with [`node_kind!`](crate::node_kind)
//! - [`Hierarchy`]: the arena, structural operations and change tracking
//! - [`WalkStats`]: what a dependency walk did

pub mod capability;
pub mod hierarchy;
pub mod kinds;
pub mod node;
pub mod walk;

pub use capability::{
    Capability, ClipCapability, ClipFn, ClipRect, ColorCapability, GradientCapability, GradientKind,
    TransformCapability,
};
pub use hierarchy::{Hierarchy, SharedHierarchy, WALK_ORDER};
pub use kinds::{ClippedPaintNode, GradientNode, PaintNode, TransformNode};
pub use node::{NodeKey, NodeKind};
pub use walk::WalkStats;
