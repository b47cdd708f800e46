//! Value Packer
//!
//! Owns triple-buffered flat `f32` storage for every distinct
//! [`PackingConfiguration`] a batch needs, and runs the per-frame extraction
//! pass that copies each occupied slot's values into the write buffer.
//!
//! Stages whose active-value tables are equivalent and whose configs match
//! share one configuration (and one set of buffers).
//!
//! The render side reads through [`PackedData`], which holds a read guard on
//! the *present* buffer. The synchronizer never lets the present buffer become
//! the write buffer while the previous present buffer may still be read, so
//! these locks are uncontended in steady state.

use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use smallvec::SmallVec;

use crate::errors::{Result, TesseraError};
use crate::packing::active_values::{ActiveValueTable, ConsumptionStage};
use crate::packing::config::{PackingConfig, PackingLayout};
use crate::packing::slot_table::SlotTable;
use crate::scene::{Hierarchy, NodeKind};
use crate::sync::{BUFFER_COUNT, FrameSynchronizer};

#[inline]
fn stage_index(stage: ConsumptionStage) -> usize {
    match stage {
        ConsumptionStage::Vertex => 0,
        ConsumptionStage::Fragment => 1,
        ConsumptionStage::Clip => 2,
    }
}

#[derive(Debug, Default)]
struct PackBuffer {
    values: Vec<f32>,
    slots_to_pack: usize,
    frame: u64,
}

/// One distinct (table, config) pair and its three buffers.
#[derive(Debug)]
pub struct PackingConfiguration {
    config: PackingConfig,
    table: Arc<ActiveValueTable>,
    permutation: Vec<usize>,
    /// `(source, offset)` pairs of the permutation that land in the active range.
    scatter: Vec<(usize, usize)>,
    buffers: [RwLock<PackBuffer>; BUFFER_COUNT],
}

impl PackingConfiguration {
    fn new(config: PackingConfig, table: Arc<ActiveValueTable>) -> Self {
        let active = table.active_count();
        let len = config.buffer_len(active);
        let permutation = table.permutation();
        let scatter = permutation
            .iter()
            .enumerate()
            .filter(|&(_, &position)| position < active)
            .map(|(source, &position)| (source, position))
            .collect();
        Self {
            config,
            table,
            permutation,
            scatter,
            buffers: std::array::from_fn(|_| {
                RwLock::new(PackBuffer {
                    values: vec![0.0; len],
                    ..Default::default()
                })
            }),
        }
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &PackingConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn table(&self) -> &Arc<ActiveValueTable> {
        &self.table
    }

    /// Write position for every native source index; see
    /// [`ActiveValueTable::permutation`].
    #[inline]
    #[must_use]
    pub fn permutation(&self) -> &[usize] {
        &self.permutation
    }

    fn write_slot(&self, buffer: &mut PackBuffer, slot: usize, extracted: &[f32]) {
        let active = self.table.active_count();
        for &(source, offset) in &self.scatter {
            buffer.values[self.config.index_of(active, slot, offset)] = extracted[source];
        }
    }

    fn clear_slot(&self, buffer: &mut PackBuffer, slot: usize) {
        let active = self.table.active_count();
        for offset in 0..active {
            buffer.values[self.config.index_of(active, slot, offset)] = 0.0;
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

struct StageRequest {
    stage: ConsumptionStage,
    table: Arc<ActiveValueTable>,
    layout: PackingLayout,
    alignment: usize,
}

/// Collects per-stage tables and layouts, then resolves them into
/// deduplicated configurations.
pub struct ValuePackerBuilder<N: NodeKind> {
    sync: FrameSynchronizer,
    max_slots: usize,
    max_configurations: usize,
    stages: Vec<StageRequest>,
    _node: PhantomData<fn() -> N>,
}

impl<N: NodeKind> ValuePackerBuilder<N> {
    /// Limit on distinct configurations (default 3).
    #[must_use]
    pub fn max_configurations(mut self, max: usize) -> Self {
        self.max_configurations = max;
        self
    }

    #[must_use]
    pub fn stage(
        mut self,
        stage: ConsumptionStage,
        table: Arc<ActiveValueTable>,
        layout: PackingLayout,
        alignment: usize,
    ) -> Self {
        self.stages.push(StageRequest {
            stage,
            table,
            layout,
            alignment,
        });
        self
    }

    pub fn build(self) -> Result<ValuePacker<N>> {
        let mut configurations: Vec<PackingConfiguration> = Vec::new();
        let mut stage_map = [None; 3];
        let mut declared = [false; 3];

        for request in self.stages {
            let index = stage_index(request.stage);
            if std::mem::replace(&mut declared[index], true) {
                return Err(TesseraError::DuplicateStage(request.stage));
            }
            if request.table.node_type() != N::TYPE_NAME || request.table.value_count() != N::VALUE_COUNT {
                return Err(TesseraError::TableMismatch {
                    table: request.table.node_type(),
                    packer: N::TYPE_NAME,
                });
            }
            let config = PackingConfig::new(request.layout, request.alignment, self.max_slots)?;

            if request.table.is_empty() {
                log::debug!("{}: stage {:?} consumes no values", N::TYPE_NAME, request.stage);
                continue;
            }

            let existing = configurations
                .iter()
                .position(|c| c.config == config && c.table.equivalent(&request.table));
            let slot = match existing {
                Some(i) => i,
                None => {
                    if configurations.len() == self.max_configurations {
                        return Err(TesseraError::TooManyConfigurations {
                            requested: configurations.len() + 1,
                            provisioned: self.max_configurations,
                        });
                    }
                    configurations.push(PackingConfiguration::new(config, request.table));
                    configurations.len() - 1
                }
            };
            stage_map[index] = Some(slot);
        }

        log::debug!(
            "{}: value packer with {} configuration(s) over {} slots",
            N::TYPE_NAME,
            configurations.len(),
            self.max_slots
        );

        Ok(ValuePacker {
            sync: self.sync,
            max_slots: self.max_slots,
            configurations,
            stage_map,
            _node: PhantomData,
        })
    }
}

// ============================================================================
// Packer
// ============================================================================

/// Counters from one pack pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackStats {
    pub buffer_index: usize,
    pub slots_visited: usize,
    pub nodes_packed: usize,
}

pub struct ValuePacker<N: NodeKind> {
    sync: FrameSynchronizer,
    max_slots: usize,
    configurations: Vec<PackingConfiguration>,
    stage_map: [Option<usize>; 3],
    _node: PhantomData<fn() -> N>,
}

impl<N: NodeKind> ValuePacker<N> {
    #[must_use]
    pub fn builder(sync: FrameSynchronizer, max_slots: usize) -> ValuePackerBuilder<N> {
        ValuePackerBuilder {
            sync,
            max_slots,
            max_configurations: 3,
            stages: Vec::new(),
            _node: PhantomData,
        }
    }

    #[inline]
    #[must_use]
    pub fn max_slots(&self) -> usize {
        self.max_slots
    }

    #[inline]
    #[must_use]
    pub fn synchronizer(&self) -> &FrameSynchronizer {
        &self.sync
    }

    #[inline]
    #[must_use]
    pub fn configuration_count(&self) -> usize {
        self.configurations.len()
    }

    #[must_use]
    pub fn configuration(&self, index: usize) -> Option<&PackingConfiguration> {
        self.configurations.get(index)
    }

    /// Configuration index serving `stage`, if it consumes any values.
    #[inline]
    #[must_use]
    pub fn configuration_index(&self, stage: ConsumptionStage) -> Option<usize> {
        self.stage_map[stage_index(stage)]
    }

    /// Extracts every occupied slot into the current write buffer.
    ///
    /// Unoccupied slots keep whatever the buffer held before. Readers must
    /// bound their reads by [`PackedData::number_slots_to_pack`]. A slot whose
    /// node has been removed from the hierarchy is zeroed.
    pub fn pack(&self, hierarchy: &Hierarchy<N>, slots: &SlotTable) -> PackStats {
        let write = self.sync.current_write_index();
        let slots_to_pack = slots.number_slots_to_pack().min(self.max_slots);
        let mut stats = PackStats {
            buffer_index: write,
            slots_visited: slots_to_pack,
            nodes_packed: 0,
        };
        if self.configurations.is_empty() {
            return stats;
        }

        let mut buffers: SmallVec<[RwLockWriteGuard<'_, PackBuffer>; 3]> =
            self.configurations.iter().map(|c| c.buffers[write].write()).collect();
        let mut extracted = vec![0.0_f32; N::VALUE_COUNT];

        for slot in 0..slots_to_pack {
            let Some(key) = slots.get(slot) else {
                continue;
            };
            let Some(state) = hierarchy.get(key) else {
                log::warn!("{}: slot {slot} refers to removed node {key:?}", N::TYPE_NAME);
                for (configuration, buffer) in self.configurations.iter().zip(buffers.iter_mut()) {
                    configuration.clear_slot(buffer, slot);
                }
                continue;
            };
            state.extract_values(&mut extracted);
            for (configuration, buffer) in self.configurations.iter().zip(buffers.iter_mut()) {
                configuration.write_slot(buffer, slot, &extracted);
            }
            stats.nodes_packed += 1;
        }

        let frame = self.sync.frame();
        for buffer in &mut buffers {
            buffer.slots_to_pack = slots_to_pack;
            buffer.frame = frame;
        }

        log::trace!(
            "{}: packed {} node(s) into buffer {write}",
            N::TYPE_NAME,
            stats.nodes_packed
        );
        stats
    }

    /// Presentable data for `stage`. Empty when the stage consumes nothing.
    #[must_use]
    pub fn data_for_stage(&self, stage: ConsumptionStage) -> PackedData<'_> {
        self.configuration_index(stage)
            .map_or_else(PackedData::empty, |i| self.data_for_configuration_index(i))
    }

    /// Presentable data for configuration `index`. Empty when out of range.
    #[must_use]
    pub fn data_for_configuration_index(&self, index: usize) -> PackedData<'_> {
        let Some(configuration) = self.configurations.get(index) else {
            return PackedData::empty();
        };
        let present = self.sync.present_read_index();
        let active_count = configuration.table.active_count();
        PackedData {
            guard: Some(configuration.buffers[present].read()),
            config: Some(configuration.config),
            buffer_index: present,
            active_count,
            row_len: configuration.config.row_len(active_count),
        }
    }
}

impl<N: NodeKind> std::fmt::Debug for ValuePacker<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValuePacker")
            .field("node_type", &N::TYPE_NAME)
            .field("max_slots", &self.max_slots)
            .field("configurations", &self.configurations.len())
            .field("stage_map", &self.stage_map)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// PackedData
// ============================================================================

/// Read-only view of one presentable buffer plus the metadata needed to bind
/// it. An empty view means "skip, do not bind".
pub struct PackedData<'a> {
    guard: Option<RwLockReadGuard<'a, PackBuffer>>,
    config: Option<PackingConfig>,
    buffer_index: usize,
    active_count: usize,
    row_len: usize,
}

impl PackedData<'_> {
    fn empty() -> Self {
        Self {
            guard: None,
            config: None,
            buffer_index: 0,
            active_count: 0,
            row_len: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guard.is_none()
    }

    /// Whole buffer, including padding and stale tail slots.
    #[must_use]
    pub fn values(&self) -> &[f32] {
        self.guard.as_ref().map_or(&[] as &[f32], |g| g.values.as_slice())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.values())
    }

    #[must_use]
    pub fn layout(&self) -> Option<PackingLayout> {
        self.config.map(|c| c.layout)
    }

    #[must_use]
    pub fn alignment(&self) -> Option<usize> {
        self.config.map(|c| c.alignment)
    }

    /// Padded row length in floats.
    #[inline]
    #[must_use]
    pub fn row_len(&self) -> usize {
        self.row_len
    }

    #[inline]
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active_count
    }

    /// Highest occupied slot + 1, as of the pack pass that produced this buffer.
    #[must_use]
    pub fn number_slots_to_pack(&self) -> usize {
        self.guard.as_ref().map_or(0, |g| g.slots_to_pack)
    }

    /// Frame number at which this buffer was packed.
    #[must_use]
    pub fn frame(&self) -> u64 {
        self.guard.as_ref().map_or(0, |g| g.frame)
    }

    #[inline]
    #[must_use]
    pub fn buffer_index(&self) -> usize {
        self.buffer_index
    }

    /// Active value `offset` of `slot`.
    #[must_use]
    pub fn value(&self, slot: usize, offset: usize) -> Option<f32> {
        let config = self.config?;
        if offset >= self.active_count || slot >= config.max_slots {
            return None;
        }
        self.values()
            .get(config.index_of(self.active_count, slot, offset))
            .copied()
    }

    /// All active values of `slot`, in offset order.
    #[must_use]
    pub fn slot_values(&self, slot: usize) -> Option<Vec<f32>> {
        if self.is_empty() {
            return None;
        }
        (0..self.active_count).map(|offset| self.value(slot, offset)).collect()
    }
}

impl std::fmt::Debug for PackedData<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackedData")
            .field("empty", &self.is_empty())
            .field("layout", &self.layout())
            .field("buffer_index", &self.buffer_index)
            .field("active_count", &self.active_count)
            .field("row_len", &self.row_len)
            .field("slots_to_pack", &self.number_slots_to_pack())
            .finish()
    }
}
