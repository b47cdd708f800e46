//! Node kinds composed from capabilities.
//!
//! [`node_kind!`](crate::node_kind) lays the capabilities out back to back in
//! declaration order, so a kind's value vector is the concatenation of its
//! capabilities' values.

use crate::scene::capability::{ClipCapability, ColorCapability, GradientCapability, TransformCapability};

/// Declares a node kind as an ordered list of capability fields.
///
/// ```rust,ignore
/// tessera::node_kind! {
///     /// Transformed, tinted quad.
///     pub struct PaintNode {
///         transform: TransformCapability,
///         color: ColorCapability,
///     }
/// }
/// ```
#[macro_export]
macro_rules! node_kind {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $( $field:ident : $cap:ty ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default)]
        $vis struct $name {
            $( pub $field: $cap, )+
        }

        impl $crate::scene::NodeKind for $name {
            const TYPE_NAME: &'static str = stringify!($name);
            const VALUE_COUNT: usize = 0 $( + <$cap as $crate::scene::Capability>::VALUE_COUNT )+;

            fn compute_derived(&mut self, parent: Option<&Self>) {
                $(
                    $crate::scene::Capability::derive(&mut self.$field, parent.map(|p| &p.$field));
                )+
            }

            #[allow(unused_assignments)]
            fn extract_values(&self, out: &mut [f32]) {
                debug_assert_eq!(out.len(), <Self as $crate::scene::NodeKind>::VALUE_COUNT);
                let mut base = 0;
                $(
                    let len = <$cap as $crate::scene::Capability>::VALUE_COUNT;
                    $crate::scene::Capability::extract(&self.$field, &mut out[base..base + len]);
                    base += len;
                )+
            }

            #[allow(unused_assignments)]
            fn declare_active_values(
                stage: $crate::packing::ConsumptionStage,
                decl: &mut $crate::packing::ActiveValueDeclaration<'_>,
            ) {
                let mut base = 0;
                $(
                    let len = <$cap as $crate::scene::Capability>::VALUE_COUNT;
                    <$cap as $crate::scene::Capability>::declare_active_values(stage, &mut decl.window(base, len));
                    base += len;
                )+
            }

            #[allow(unused_assignments)]
            fn node_functions() -> Vec<$crate::registry::NodeFunction> {
                let mut functions = vec![$crate::registry::NodeFunction::ActiveValues(
                    <Self as $crate::scene::NodeKind>::declare_active_values,
                )];
                let mut symbols = Vec::new();
                let mut base = 0;
                $(
                    let len = <$cap as $crate::scene::Capability>::VALUE_COUNT;
                    symbols.push(<$cap as $crate::scene::Capability>::SHADER_SYMBOL);
                    if let Some(test) = <$cap as $crate::scene::Capability>::CLIP_TEST {
                        functions.push($crate::registry::NodeFunction::Clipping { offset: base, len, test });
                    }
                    base += len;
                )+
                functions.push($crate::registry::NodeFunction::ShaderSource(symbols));
                functions
            }
        }
    };
}

crate::node_kind! {
    /// Bare transform. Useful as a grouping node.
    pub struct TransformNode {
        transform: TransformCapability,
    }
}

crate::node_kind! {
    /// Transformed, tinted quad.
    pub struct PaintNode {
        transform: TransformCapability,
        color: ColorCapability,
    }
}

crate::node_kind! {
    /// Transformed, tinted gradient fill.
    pub struct GradientNode {
        transform: TransformCapability,
        color: ColorCapability,
        gradient: GradientCapability,
    }
}

crate::node_kind! {
    /// Paint node that also restricts its subtree to a clip rectangle.
    pub struct ClippedPaintNode {
        transform: TransformCapability,
        color: ColorCapability,
        clip: ClipCapability,
    }
}
