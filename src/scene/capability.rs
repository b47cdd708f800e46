//! Capability Modules
//!
//! Node kinds are built by composition: a kind holds one instance of each
//! capability it needs, and delegates derivation, extraction and active-value
//! declaration to them in declared order (see [`node_kind!`](crate::node_kind)).
//!
//! Each capability owns a contiguous window of `VALUE_COUNT` floats inside its
//! node kind's output; all indices below are relative to that window.

use glam::{Affine2, Vec2, Vec4};

use crate::packing::{ActiveValueDeclaration, ConsumptionStage};

/// Point-in-clip test over a capability's extracted values.
pub type ClipFn = fn(&[f32], Vec2) -> bool;

/// One composable slice of node state.
pub trait Capability: Clone + Default + Send + Sync + 'static {
    /// Number of floats this capability contributes.
    const VALUE_COUNT: usize;
    /// Symbol this capability contributes to shader assembly.
    const SHADER_SYMBOL: &'static str;
    /// Present only on capabilities that restrict drawing.
    const CLIP_TEST: Option<ClipFn> = None;

    /// Recomputes derived state. `parent` is the same capability on the parent node.
    fn derive(&mut self, parent: Option<&Self>);

    /// Writes exactly `VALUE_COUNT` floats.
    fn extract(&self, out: &mut [f32]);

    fn declare_active_values(stage: ConsumptionStage, decl: &mut ActiveValueDeclaration<'_>);
}

// ============================================================================
// Transform
// ============================================================================

/// Local TRS transform and its derived world matrix.
///
/// Values: `[m00, m01, m10, m11, tx, ty]` of the world transform (column major).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformCapability {
    pub translation: Vec2,
    /// Rotation in radians.
    pub rotation: f32,
    pub scale: Vec2,
    world: Affine2,
}

impl Default for TransformCapability {
    fn default() -> Self {
        Self {
            translation: Vec2::ZERO,
            rotation: 0.0,
            scale: Vec2::ONE,
            world: Affine2::IDENTITY,
        }
    }
}

impl TransformCapability {
    #[must_use]
    pub fn from_translation(translation: Vec2) -> Self {
        Self {
            translation,
            ..Self::default()
        }
    }

    #[inline]
    #[must_use]
    pub fn local_matrix(&self) -> Affine2 {
        Affine2::from_scale_angle_translation(self.scale, self.rotation, self.translation)
    }

    /// World matrix as of the last dependency walk.
    #[inline]
    #[must_use]
    pub fn world_matrix(&self) -> Affine2 {
        self.world
    }
}

impl Capability for TransformCapability {
    const VALUE_COUNT: usize = 6;
    const SHADER_SYMBOL: &'static str = "TRANSFORM_2D";

    fn derive(&mut self, parent: Option<&Self>) {
        let local = self.local_matrix();
        self.world = parent.map_or(local, |p| p.world * local);
    }

    fn extract(&self, out: &mut [f32]) {
        let m = self.world.matrix2;
        let t = self.world.translation;
        out.copy_from_slice(&[m.x_axis.x, m.x_axis.y, m.y_axis.x, m.y_axis.y, t.x, t.y]);
    }

    fn declare_active_values(stage: ConsumptionStage, decl: &mut ActiveValueDeclaration<'_>) {
        match stage {
            ConsumptionStage::Vertex | ConsumptionStage::Clip => {
                decl.declare_range(0..4, "transform");
                decl.declare_range(4..6, "transform_translation");
            }
            ConsumptionStage::Fragment => {}
        }
    }
}

// ============================================================================
// Color
// ============================================================================

/// RGBA tint, modulated by the parent's derived color.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorCapability {
    pub color: Vec4,
    derived: Vec4,
}

impl Default for ColorCapability {
    fn default() -> Self {
        Self {
            color: Vec4::ONE,
            derived: Vec4::ONE,
        }
    }
}

impl ColorCapability {
    #[must_use]
    pub fn new(color: Vec4) -> Self {
        Self {
            color,
            derived: color,
        }
    }

    #[inline]
    #[must_use]
    pub fn derived_color(&self) -> Vec4 {
        self.derived
    }
}

impl Capability for ColorCapability {
    const VALUE_COUNT: usize = 4;
    const SHADER_SYMBOL: &'static str = "COLOR";

    fn derive(&mut self, parent: Option<&Self>) {
        self.derived = parent.map_or(self.color, |p| p.derived * self.color);
    }

    fn extract(&self, out: &mut [f32]) {
        out.copy_from_slice(&self.derived.to_array());
    }

    fn declare_active_values(stage: ConsumptionStage, decl: &mut ActiveValueDeclaration<'_>) {
        if stage == ConsumptionStage::Fragment {
            decl.declare_range(0..4, "color");
        }
    }
}

// ============================================================================
// Gradient
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GradientKind {
    #[default]
    Linear,
    Radial,
}

impl GradientKind {
    #[inline]
    fn as_f32(self) -> f32 {
        match self {
            Self::Linear => 0.0,
            Self::Radial => 1.0,
        }
    }
}

/// Gradient descriptor. Not inherited from the parent.
///
/// Values: `[start.x, start.y, end.x, end.y, start_radius, end_radius, kind]`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GradientCapability {
    pub kind: GradientKind,
    pub start: Vec2,
    pub end: Vec2,
    pub start_radius: f32,
    pub end_radius: f32,
}

impl GradientCapability {
    #[must_use]
    pub fn linear(start: Vec2, end: Vec2) -> Self {
        Self {
            kind: GradientKind::Linear,
            start,
            end,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn radial(center: Vec2, start_radius: f32, end_radius: f32) -> Self {
        Self {
            kind: GradientKind::Radial,
            start: center,
            end: center,
            start_radius,
            end_radius,
        }
    }
}

impl Capability for GradientCapability {
    const VALUE_COUNT: usize = 7;
    const SHADER_SYMBOL: &'static str = "GRADIENT";

    fn derive(&mut self, _parent: Option<&Self>) {}

    fn extract(&self, out: &mut [f32]) {
        out.copy_from_slice(&[
            self.start.x,
            self.start.y,
            self.end.x,
            self.end.y,
            self.start_radius,
            self.end_radius,
            self.kind.as_f32(),
        ]);
    }

    fn declare_active_values(stage: ConsumptionStage, decl: &mut ActiveValueDeclaration<'_>) {
        match stage {
            ConsumptionStage::Vertex => decl.declare_range(0..4, "gradient_points"),
            ConsumptionStage::Fragment => {
                decl.declare_range(4..6, "gradient_radii");
                decl.declare(6, "gradient_kind");
            }
            ConsumptionStage::Clip => {}
        }
    }
}

// ============================================================================
// Clip
// ============================================================================

/// Axis-aligned rectangle in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipRect {
    pub min: Vec2,
    pub max: Vec2,
}

impl ClipRect {
    pub const UNBOUNDED: Self = Self {
        min: Vec2::splat(f32::MIN),
        max: Vec2::splat(f32::MAX),
    };

    #[must_use]
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    #[must_use]
    pub fn intersect(&self, other: &ClipRect) -> ClipRect {
        ClipRect {
            min: self.min.max(other.min),
            max: self.max.min(other.max),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y
    }

    #[must_use]
    pub fn contains(&self, point: Vec2) -> bool {
        point.x >= self.min.x && point.y >= self.min.y && point.x <= self.max.x && point.y <= self.max.y
    }
}

impl Default for ClipRect {
    fn default() -> Self {
        Self::UNBOUNDED
    }
}

/// Clip rectangle, intersected with the parent's derived clip.
///
/// Values: `[min.x, min.y, max.x, max.y]` of the derived rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClipCapability {
    pub rect: ClipRect,
    derived: ClipRect,
}

impl ClipCapability {
    #[must_use]
    pub fn new(rect: ClipRect) -> Self {
        Self { rect, derived: rect }
    }

    #[inline]
    #[must_use]
    pub fn derived_rect(&self) -> ClipRect {
        self.derived
    }
}

fn clip_contains(values: &[f32], point: Vec2) -> bool {
    ClipRect::new(Vec2::new(values[0], values[1]), Vec2::new(values[2], values[3])).contains(point)
}

impl Capability for ClipCapability {
    const VALUE_COUNT: usize = 4;
    const SHADER_SYMBOL: &'static str = "CLIP_RECT";
    const CLIP_TEST: Option<ClipFn> = Some(clip_contains);

    fn derive(&mut self, parent: Option<&Self>) {
        self.derived = parent.map_or(self.rect, |p| p.derived.intersect(&self.rect));
    }

    fn extract(&self, out: &mut [f32]) {
        out.copy_from_slice(&[self.derived.min.x, self.derived.min.y, self.derived.max.x, self.derived.max.y]);
    }

    fn declare_active_values(stage: ConsumptionStage, decl: &mut ActiveValueDeclaration<'_>) {
        match stage {
            ConsumptionStage::Clip | ConsumptionStage::Fragment => decl.declare_range(0..4, "clip_rect"),
            ConsumptionStage::Vertex => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    const EPSILON: f32 = 1e-5;

    #[test]
    fn test_transform_world_composes_with_parent() {
        let mut parent = TransformCapability::from_translation(Vec2::new(10.0, 0.0));
        parent.rotation = FRAC_PI_2;
        parent.derive(None);

        let mut child = TransformCapability::from_translation(Vec2::new(1.0, 0.0));
        child.derive(Some(&parent));

        let t = child.world_matrix().translation;
        assert!((t.x - 10.0).abs() < EPSILON);
        assert!((t.y - 1.0).abs() < EPSILON);
    }

    #[test]
    fn test_color_modulates_parent() {
        let mut parent = ColorCapability::new(Vec4::new(0.5, 1.0, 1.0, 1.0));
        parent.derive(None);
        let mut child = ColorCapability::new(Vec4::new(1.0, 0.5, 1.0, 0.5));
        child.derive(Some(&parent));

        let mut out = [0.0; 4];
        child.extract(&mut out);
        assert_eq!(out, [0.5, 0.5, 1.0, 0.5]);
    }

    #[test]
    fn test_clip_intersects_parent() {
        let mut parent = ClipCapability::new(ClipRect::new(Vec2::ZERO, Vec2::splat(10.0)));
        parent.derive(None);
        let mut child = ClipCapability::new(ClipRect::new(Vec2::splat(5.0), Vec2::splat(20.0)));
        child.derive(Some(&parent));

        assert_eq!(child.derived_rect(), ClipRect::new(Vec2::splat(5.0), Vec2::splat(10.0)));

        let mut values = [0.0; 4];
        child.extract(&mut values);
        let test = ClipCapability::CLIP_TEST.unwrap();
        assert!(test(&values, Vec2::splat(7.0)));
        assert!(!test(&values, Vec2::splat(12.0)));
    }

    #[test]
    fn test_gradient_ignores_parent() {
        let parent = GradientCapability::radial(Vec2::ONE, 0.0, 4.0);
        let mut child = GradientCapability::linear(Vec2::ZERO, Vec2::X);
        let before = child;
        child.derive(Some(&parent));
        assert_eq!(child, before);
    }
}
