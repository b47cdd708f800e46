//! Packing Configuration & Settings
//!
//! A [`PackingConfig`] describes how one flat buffer is laid out:
//!
//! | Layout    | Rows                | Row length                         |
//! |-----------|---------------------|------------------------------------|
//! | `ByNode`  | one per slot        | `padded_len(active_count, align)`  |
//! | `ByValue` | one per active value| `padded_len(max_slots, align)`     |
//!
//! Padding keeps consumers that bind the buffer as fixed-width vector tuples
//! (e.g. `vec4<f32>` arrays) from ever straddling a tuple boundary.
//!
//! [`PackingSettings`] is the user-facing configuration, loadable from JSON.
//!
//! ```rust,ignore
//! let settings = PackingSettings::from_json(r#"{
//!     "max_slots": 128,
//!     "default_alignment": 4,
//!     "overrides": [{ "stage": "fragment", "layout": "by_value" }]
//! }"#)?;
//! ```

use serde::{Deserialize, Serialize};

use crate::errors::{Result, TesseraError};
use crate::packing::ConsumptionStage;

/// Smallest multiple of `alignment` that is `>= count`.
///
/// `alignment` must be non-zero.
#[inline]
#[must_use]
pub const fn padded_len(count: usize, alignment: usize) -> usize {
    count.div_ceil(alignment) * alignment
}

// ---------------------------------------------------------------------------
// PackingLayout
// ---------------------------------------------------------------------------

/// Memory layout of a packed buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackingLayout {
    /// Row-major by node: all of one node's values are contiguous.
    #[default]
    ByNode,
    /// Column-major by value: value `i` of every slot is contiguous, which
    /// suits uniform-array style access.
    ByValue,
}

// ---------------------------------------------------------------------------
// PackingConfig
// ---------------------------------------------------------------------------

/// Alignment + layout + capacity of one packed buffer set.
///
/// Deserialization goes through [`PackingConfig::new`], so a zero alignment
/// is rejected there too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawPackingConfig")]
pub struct PackingConfig {
    pub layout: PackingLayout,
    /// Row length is padded to a multiple of this many floats.
    pub alignment: usize,
    /// Number of slots this configuration serves.
    pub max_slots: usize,
}

impl PackingConfig {
    pub fn new(layout: PackingLayout, alignment: usize, max_slots: usize) -> Result<Self> {
        if alignment == 0 {
            return Err(TesseraError::InvalidAlignment(alignment));
        }
        Ok(Self {
            layout,
            alignment,
            max_slots,
        })
    }

    /// Length in floats of one padded row.
    #[inline]
    #[must_use]
    pub fn row_len(&self, active_count: usize) -> usize {
        match self.layout {
            PackingLayout::ByNode => padded_len(active_count, self.alignment),
            PackingLayout::ByValue => padded_len(self.max_slots, self.alignment),
        }
    }

    /// Number of rows in the buffer.
    #[inline]
    #[must_use]
    pub fn row_count(&self, active_count: usize) -> usize {
        match self.layout {
            PackingLayout::ByNode => self.max_slots,
            PackingLayout::ByValue => active_count,
        }
    }

    /// Total buffer length in floats.
    #[inline]
    #[must_use]
    pub fn buffer_len(&self, active_count: usize) -> usize {
        self.row_len(active_count) * self.row_count(active_count)
    }

    /// Flat index of active value `offset` for `slot`.
    #[inline]
    #[must_use]
    pub fn index_of(&self, active_count: usize, slot: usize, offset: usize) -> usize {
        let row_len = self.row_len(active_count);
        match self.layout {
            PackingLayout::ByNode => slot * row_len + offset,
            PackingLayout::ByValue => offset * row_len + slot,
        }
    }
}

#[derive(Deserialize)]
struct RawPackingConfig {
    layout: PackingLayout,
    alignment: usize,
    max_slots: usize,
}

impl TryFrom<RawPackingConfig> for PackingConfig {
    type Error = TesseraError;

    fn try_from(raw: RawPackingConfig) -> Result<Self> {
        Self::new(raw.layout, raw.alignment, raw.max_slots)
    }
}

// ---------------------------------------------------------------------------
// PackingSettings
// ---------------------------------------------------------------------------

/// Per-stage deviation from the default layout or alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOverride {
    pub stage: ConsumptionStage,
    #[serde(default)]
    pub layout: Option<PackingLayout>,
    #[serde(default)]
    pub alignment: Option<usize>,
}

/// Configuration consumed when a [`Batch`](crate::packing::Batch) is created.
///
/// | Field                | Description                                   | Default  |
/// |----------------------|-----------------------------------------------|----------|
/// | `max_slots`          | Slot table capacity                           | `256`    |
/// | `max_configurations` | Distinct packing configurations per packer    | `3`      |
/// | `default_alignment`  | Row padding in floats                         | `4`      |
/// | `default_layout`     | Layout used by stages without an override     | `ByNode` |
/// | `overrides`          | Per-stage layout / alignment                  | empty    |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackingSettings {
    pub max_slots: usize,
    pub max_configurations: usize,
    pub default_alignment: usize,
    pub default_layout: PackingLayout,
    pub overrides: Vec<StageOverride>,
}

impl Default for PackingSettings {
    fn default() -> Self {
        Self {
            max_slots: 256,
            max_configurations: 3,
            default_alignment: 4,
            default_layout: PackingLayout::ByNode,
            overrides: Vec::new(),
        }
    }
}

impl PackingSettings {
    /// Parses and validates settings from a JSON document. Missing fields
    /// fall back to their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_alignment == 0 {
            return Err(TesseraError::InvalidAlignment(0));
        }
        if let Some(o) = self.overrides.iter().find(|o| o.alignment == Some(0)) {
            return Err(TesseraError::InvalidSettings(format!(
                "alignment override for {:?} must be non-zero",
                o.stage
            )));
        }
        if self.max_configurations == 0 {
            return Err(TesseraError::InvalidSettings(
                "max_configurations must be at least 1".to_string(),
            ));
        }
        if self.max_slots == 0 {
            return Err(TesseraError::InvalidSettings(
                "max_slots must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolved configuration for `stage`, applying the last matching override.
    pub fn config_for(&self, stage: ConsumptionStage) -> Result<PackingConfig> {
        let mut layout = self.default_layout;
        let mut alignment = self.default_alignment;
        for o in self.overrides.iter().filter(|o| o.stage == stage) {
            layout = o.layout.unwrap_or(layout);
            alignment = o.alignment.unwrap_or(alignment);
        }
        PackingConfig::new(layout, alignment, self.max_slots)
    }
}
