//! Active-Value Tables
//!
//! A node type declares `K` numeric values, but a given consumption stage
//! usually needs only some of them. An [`ActiveValueTable`] records which
//! source indices are required by a set of stages, compacts them into a dense
//! range of offsets, and keeps the symbolic labels each value was declared with.
//!
//! Tables are immutable once built and are meant to be shared (`Arc`) between
//! every packer that consumes the same node type and stage set.

use std::collections::BTreeMap;
use std::ops::Range;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::scene::NodeKind;
use crate::utils::interner::{self, Symbol};

/// Signature of a node type's active-value declaration function.
pub type DeclareFn = for<'a> fn(ConsumptionStage, &mut ActiveValueDeclaration<'a>);

type LabelSet = SmallVec<[Symbol; 2]>;

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// A downstream consumer of packed values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumptionStage {
    Vertex,
    Fragment,
    /// Clip-mask generation.
    Clip,
}

impl ConsumptionStage {
    pub const ALL: [ConsumptionStage; 3] = [Self::Vertex, Self::Fragment, Self::Clip];

    #[inline]
    #[must_use]
    pub fn flag(self) -> StageSet {
        match self {
            Self::Vertex => StageSet::VERTEX,
            Self::Fragment => StageSet::FRAGMENT,
            Self::Clip => StageSet::CLIP,
        }
    }
}

bitflags! {
    /// Set of [`ConsumptionStage`]s a table is built for.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct StageSet: u8 {
        const VERTEX   = 1 << 0;
        const FRAGMENT = 1 << 1;
        const CLIP     = 1 << 2;
    }
}

impl StageSet {
    /// Stages in declaration order.
    pub fn stages(self) -> impl Iterator<Item = ConsumptionStage> {
        ConsumptionStage::ALL
            .into_iter()
            .filter(move |stage| self.contains(stage.flag()))
    }
}

impl From<ConsumptionStage> for StageSet {
    fn from(stage: ConsumptionStage) -> Self {
        stage.flag()
    }
}

// ---------------------------------------------------------------------------
// Declaration
// ---------------------------------------------------------------------------

/// Window onto a table under construction.
///
/// Indices passed to [`declare`](Self::declare) are relative to the window, so a
/// capability module can declare its values without knowing where its node
/// type placed it. [`window`](Self::window) narrows further.
pub struct ActiveValueDeclaration<'a> {
    entries: &'a mut BTreeMap<usize, LabelSet>,
    base: usize,
    len: usize,
}

impl ActiveValueDeclaration<'_> {
    /// Marks value `index` as required, tagged with `label`.
    ///
    /// Declaring the same index again adds the label to its set.
    pub fn declare(&mut self, index: usize, label: &str) {
        assert!(
            index < self.len,
            "value index {index} outside declaration window of {} values",
            self.len
        );
        let labels = self.entries.entry(self.base + index).or_default();
        let symbol = interner::intern(label);
        if !labels.contains(&symbol) {
            labels.push(symbol);
        }
    }

    pub fn declare_range(&mut self, range: Range<usize>, label: &str) {
        for index in range {
            self.declare(index, label);
        }
    }

    /// Sub-window of `len` values starting at `base` (relative to this window).
    pub fn window(&mut self, base: usize, len: usize) -> ActiveValueDeclaration<'_> {
        assert!(
            base + len <= self.len,
            "window {base}..{} exceeds {} values",
            base + len,
            self.len
        );
        ActiveValueDeclaration {
            entries: &mut *self.entries,
            base: self.base + base,
            len,
        }
    }

    #[inline]
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.len
    }
}

/// Accumulates declarations for one node type.
#[derive(Debug)]
pub struct ActiveValueBuilder {
    node_type: &'static str,
    value_count: usize,
    entries: BTreeMap<usize, LabelSet>,
}

impl ActiveValueBuilder {
    #[must_use]
    pub fn new(node_type: &'static str, value_count: usize) -> Self {
        Self {
            node_type,
            value_count,
            entries: BTreeMap::new(),
        }
    }

    pub fn declaration(&mut self) -> ActiveValueDeclaration<'_> {
        ActiveValueDeclaration {
            entries: &mut self.entries,
            base: 0,
            len: self.value_count,
        }
    }

    /// Runs `declare` once per stage in `stages`.
    pub fn declare_stages(&mut self, stages: StageSet, declare: DeclareFn) {
        for stage in stages.stages() {
            declare(stage, &mut self.declaration());
        }
    }

    #[must_use]
    pub fn build(self, stages: StageSet) -> ActiveValueTable {
        let mut source_to_offset = vec![None; self.value_count];
        let mut sources = Vec::with_capacity(self.entries.len());
        let mut labels = Vec::with_capacity(self.entries.len());

        // BTreeMap iterates in source order, so offsets come out dense and sorted.
        for (offset, (source, label_set)) in self.entries.into_iter().enumerate() {
            source_to_offset[source] = Some(offset);
            sources.push(source);
            labels.push(label_set);
        }

        ActiveValueTable {
            node_type: self.node_type,
            stages,
            value_count: self.value_count,
            sources,
            labels,
            source_to_offset,
        }
    }
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// The subset of a node type's values required by a stage set.
#[derive(Debug, Clone)]
pub struct ActiveValueTable {
    node_type: &'static str,
    stages: StageSet,
    value_count: usize,
    /// Active source indices, ascending; position is the compacted offset.
    sources: Vec<usize>,
    labels: Vec<LabelSet>,
    source_to_offset: Vec<Option<usize>>,
}

impl ActiveValueTable {
    /// Builds the table for node type `N` over `stages`.
    #[must_use]
    pub fn build<N: NodeKind>(stages: StageSet) -> Self {
        let mut builder = ActiveValueBuilder::new(N::TYPE_NAME, N::VALUE_COUNT);
        builder.declare_stages(stages, N::declare_active_values);
        let table = builder.build(stages);
        log::debug!(
            "Active-value table for {} over {:?}: {}/{} values",
            N::TYPE_NAME,
            stages,
            table.active_count(),
            N::VALUE_COUNT
        );
        table
    }

    #[inline]
    #[must_use]
    pub fn node_type(&self) -> &'static str {
        self.node_type
    }

    #[inline]
    #[must_use]
    pub fn stages(&self) -> StageSet {
        self.stages
    }

    /// The node type's native value count `K`.
    #[inline]
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.value_count
    }

    #[inline]
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.sources.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    #[must_use]
    pub fn one_plus_highest_source_index(&self) -> usize {
        self.sources.last().map_or(0, |s| s + 1)
    }

    /// Compacted offset of `source`, if it is active.
    #[inline]
    #[must_use]
    pub fn offset_of(&self, source: usize) -> Option<usize> {
        self.source_to_offset.get(source).copied().flatten()
    }

    #[inline]
    #[must_use]
    pub fn source_of(&self, offset: usize) -> Option<usize> {
        self.sources.get(offset).copied()
    }

    /// Active source indices in offset order.
    #[inline]
    #[must_use]
    pub fn sources(&self) -> &[usize] {
        &self.sources
    }

    /// Labels attached to the value at `offset`.
    pub fn labels(&self, offset: usize) -> impl Iterator<Item = &'static str> + '_ {
        self.labels
            .get(offset)
            .into_iter()
            .flatten()
            .map(|&sym| interner::resolve(sym))
    }

    /// Offsets whose label set contains `label`, ascending.
    #[must_use]
    pub fn offsets_with_label(&self, label: &str) -> Vec<usize> {
        let Some(symbol) = interner::get(label) else {
            return Vec::new();
        };
        self.labels
            .iter()
            .enumerate()
            .filter(|(_, set)| set.contains(&symbol))
            .map(|(offset, _)| offset)
            .collect()
    }

    /// Two tables are equivalent iff they activate the same source indices;
    /// labels are ignored.
    #[must_use]
    pub fn equivalent(&self, other: &ActiveValueTable) -> bool {
        self.sources == other.sources
    }

    /// Maps every source index below
    /// [`one_plus_highest_source_index`](Self::one_plus_highest_source_index)
    /// to a write position.
    ///
    /// Active values map to their compacted offset. Inactive ones map to
    /// filler positions past `active_count`, which are never read back.
    #[must_use]
    pub fn permutation(&self) -> Vec<usize> {
        let mut filler = self.active_count();
        self.source_to_offset[..self.one_plus_highest_source_index()]
            .iter()
            .map(|offset| {
                offset.unwrap_or_else(|| {
                    let position = filler;
                    filler += 1;
                    position
                })
            })
            .collect()
    }
}
