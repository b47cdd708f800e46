#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

//! Scene-graph state marshaling for a batched 2D renderer.
//!
//! Simulation code mutates typed node hierarchies; once per frame, right before
//! the [`FrameSynchronizer`] rotates its triple buffer, every dirty tree is walked
//! parent-first and every [`Batch`] packs its slots into flat `f32` arrays that the
//! render thread reads from the present buffer.

pub mod errors;
pub mod packing;
pub mod registry;
pub mod scene;
pub mod sync;
pub mod utils;

pub use errors::{Result, TesseraError};
pub use packing::{
    ActiveValueTable, Batch, ConsumptionStage, PackedData, PackingConfig, PackingLayout, PackingSettings, SlotTable,
    StageSet, ValuePacker,
};
pub use registry::{NodeFunction, NodeTypeInfo};
pub use scene::{
    Capability, ClippedPaintNode, GradientNode, Hierarchy, NodeKey, NodeKind, PaintNode, SharedHierarchy,
    TransformNode, WalkStats,
};
pub use sync::{FrameSynchronizer, Subscription, SyncEvent, SyncPhase, ThreadRole};
pub use utils::interner;
