//! Value packing
//!
//! Turns per-node derived state into flat, triple-buffered `f32` arrays that a
//! renderer can bind without knowing anything about node types:
//! - [`ActiveValueTable`]: which of a node type's values a stage consumes
//! - [`PackingConfig`] / [`PackingSettings`]: buffer layout and alignment
//! - [`SlotTable`]: which node occupies which slot of a batch
//! - [`ValuePacker`]: per-frame extraction into the write buffer
//! - [`Batch`]: all of the above wired to a frame synchronizer

pub mod active_values;
pub mod batch;
pub mod config;
pub mod packer;
pub mod slot_table;

pub use active_values::{
    ActiveValueBuilder, ActiveValueDeclaration, ActiveValueTable, ConsumptionStage, DeclareFn, StageSet,
};
pub use batch::{Batch, PACK_ORDER};
pub use config::{PackingConfig, PackingLayout, PackingSettings, StageOverride, padded_len};
pub use packer::{PackStats, PackedData, PackingConfiguration, ValuePacker, ValuePackerBuilder};
pub use slot_table::SlotTable;
