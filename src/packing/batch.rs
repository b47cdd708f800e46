use std::sync::Arc;

use crate::errors::Result;
use crate::packing::active_values::{ConsumptionStage, StageSet};
use crate::packing::config::PackingSettings;
use crate::packing::packer::{PackedData, ValuePacker};
use crate::packing::slot_table::SlotTable;
use crate::registry;
use crate::scene::{NodeKey, NodeKind, SharedHierarchy};
use crate::sync::{FrameSynchronizer, Subscription, SyncEvent, SyncPhase};

/// Callback order of the pack pass at `(Rotate, Before)`. Runs after the
/// dependency walk.
pub const PACK_ORDER: i32 = 0;

/// One draw batch: a slot table, its packer, and the per-frame pack callback.
///
/// ```rust,ignore
/// let sync = FrameSynchronizer::new();
/// let scene = Hierarchy::<PaintNode>::shared();
/// let batch = Batch::new(&sync, &scene, &PackingSettings::default(), StageSet::all())?;
///
/// let root = scene.lock().create_root(&sync, PaintNode::default());
/// batch.allocate(root);
/// sync.advance_frame(); // walk, then pack, then rotate
/// let fragment = batch.data_for_stage(ConsumptionStage::Fragment);
/// ```
pub struct Batch<N: NodeKind> {
    slots: Arc<SlotTable>,
    packer: Arc<ValuePacker<N>>,
    _subscription: Subscription,
}

impl<N: NodeKind> Batch<N> {
    /// Builds a packer for `stages` from `settings` and connects it.
    pub fn new(
        sync: &FrameSynchronizer,
        hierarchy: &SharedHierarchy<N>,
        settings: &PackingSettings,
        stages: StageSet,
    ) -> Result<Self> {
        settings.validate()?;
        let mut builder = ValuePacker::<N>::builder(sync.clone(), settings.max_slots)
            .max_configurations(settings.max_configurations);
        for stage in stages.stages() {
            let config = settings.config_for(stage)?;
            let table = registry::shared_table::<N>(stage.into());
            builder = builder.stage(stage, table, config.layout, config.alignment);
        }
        Ok(Self::with_packer(hierarchy, Arc::new(builder.build()?)))
    }

    /// Connects an already built packer to its synchronizer.
    pub fn with_packer(hierarchy: &SharedHierarchy<N>, packer: Arc<ValuePacker<N>>) -> Self {
        let slots = Arc::new(SlotTable::new(packer.max_slots()));
        let weak = Arc::downgrade(hierarchy);
        let pack_slots = Arc::clone(&slots);
        let pack_packer = Arc::clone(&packer);

        let subscription = packer
            .synchronizer()
            .connect(SyncEvent::Rotate, SyncPhase::Before, PACK_ORDER, move || {
                if let Some(hierarchy) = weak.upgrade() {
                    pack_packer.pack(&hierarchy.lock(), &pack_slots);
                }
            });

        Self {
            slots,
            packer,
            _subscription: subscription,
        }
    }

    /// Places `node` in the lowest free slot.
    pub fn allocate(&self, node: NodeKey) -> Option<usize> {
        self.slots.allocate(node)
    }

    pub fn release(&self, slot: usize) -> Option<NodeKey> {
        self.slots.release(slot)
    }

    #[inline]
    #[must_use]
    pub fn slots(&self) -> &Arc<SlotTable> {
        &self.slots
    }

    #[inline]
    #[must_use]
    pub fn packer(&self) -> &Arc<ValuePacker<N>> {
        &self.packer
    }

    #[must_use]
    pub fn data_for_stage(&self, stage: ConsumptionStage) -> PackedData<'_> {
        self.packer.data_for_stage(stage)
    }
}

impl<N: NodeKind> std::fmt::Debug for Batch<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("slots", &self.slots)
            .field("packer", &self.packer)
            .finish_non_exhaustive()
    }
}
