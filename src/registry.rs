//! Node Type Registry
//!
//! Process-wide table of node types and the functions each publishes, plus a
//! cache of shared [`ActiveValueTable`]s keyed by `(type, stages)`.
//!
//! The registry has an explicit lifecycle: [`init`] once at startup (it also
//! registers the built-in node kinds), [`teardown`] at shutdown. Both are
//! idempotent.

use std::fmt;
use std::sync::Arc;

use glam::Vec2;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::errors::{Result, TesseraError};
use crate::packing::{ActiveValueTable, DeclareFn, StageSet};
use crate::scene::{ClipFn, ClippedPaintNode, GradientNode, NodeKind, PaintNode, TransformNode};
use crate::utils::interner;

/// The closed set of functions a node type can publish.
#[derive(Clone)]
pub enum NodeFunction {
    /// Point-in-clip test over the value window `offset..offset + len`.
    Clipping { offset: usize, len: usize, test: ClipFn },
    /// Shader symbols contributed, in capability order.
    ShaderSource(Vec<&'static str>),
    ActiveValues(DeclareFn),
}

impl fmt::Debug for NodeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clipping { offset, len, .. } => f
                .debug_struct("Clipping")
                .field("offset", offset)
                .field("len", len)
                .finish_non_exhaustive(),
            Self::ShaderSource(symbols) => f.debug_tuple("ShaderSource").field(symbols).finish(),
            Self::ActiveValues(_) => f.write_str("ActiveValues"),
        }
    }
}

/// What the registry knows about one node type.
#[derive(Debug, Clone)]
pub struct NodeTypeInfo {
    pub name: &'static str,
    pub value_count: usize,
    pub functions: Vec<NodeFunction>,
}

impl NodeTypeInfo {
    #[must_use]
    pub fn of<N: NodeKind>() -> Self {
        Self {
            name: N::TYPE_NAME,
            value_count: N::VALUE_COUNT,
            functions: N::node_functions(),
        }
    }

    #[must_use]
    pub fn declare_fn(&self) -> Option<DeclareFn> {
        self.functions.iter().find_map(|f| match f {
            NodeFunction::ActiveValues(declare) => Some(*declare),
            _ => None,
        })
    }

    #[must_use]
    pub fn shader_symbols(&self) -> &[&'static str] {
        self.functions
            .iter()
            .find_map(|f| match f {
                NodeFunction::ShaderSource(symbols) => Some(symbols.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    #[must_use]
    pub fn clips(&self) -> bool {
        self.functions
            .iter()
            .any(|f| matches!(f, NodeFunction::Clipping { .. }))
    }

    /// Whether `point` survives every clip this type applies, given the
    /// node's extracted `values`. Types without clipping accept everything.
    #[must_use]
    pub fn clip_contains(&self, values: &[f32], point: Vec2) -> bool {
        self.functions.iter().all(|f| match f {
            NodeFunction::Clipping { offset, len, test } => test(&values[*offset..*offset + *len], point),
            _ => true,
        })
    }
}

struct Registry {
    types: FxHashMap<&'static str, NodeTypeInfo>,
    tables: FxHashMap<(&'static str, StageSet), Arc<ActiveValueTable>>,
}

impl Registry {
    fn insert<N: NodeKind>(&mut self) {
        self.types
            .entry(N::TYPE_NAME)
            .or_insert_with(NodeTypeInfo::of::<N>);
    }
}

static REGISTRY: RwLock<Option<Registry>> = parking_lot::const_rwlock(None);

/// Creates the registry and registers the built-in node kinds.
pub fn init() {
    let mut guard = REGISTRY.write();
    if guard.is_some() {
        return;
    }
    interner::preload_builtin_labels();

    let mut registry = Registry {
        types: FxHashMap::default(),
        tables: FxHashMap::default(),
    };
    registry.insert::<TransformNode>();
    registry.insert::<PaintNode>();
    registry.insert::<GradientNode>();
    registry.insert::<ClippedPaintNode>();

    log::info!("Node type registry initialized ({} built-in types)", registry.types.len());
    *guard = Some(registry);
}

/// Drops every registration and cached table.
pub fn teardown() {
    if REGISTRY.write().take().is_some() {
        log::info!("Node type registry torn down");
    }
}

#[must_use]
pub fn is_initialized() -> bool {
    REGISTRY.read().is_some()
}

/// Registers `N`. Registering twice is a no-op.
pub fn register<N: NodeKind>() -> Result<()> {
    let mut guard = REGISTRY.write();
    let registry = guard.as_mut().ok_or(TesseraError::RegistryNotInitialized)?;
    registry.insert::<N>();
    log::debug!("Registered node type {}", N::TYPE_NAME);
    Ok(())
}

#[must_use]
pub fn lookup(name: &str) -> Option<NodeTypeInfo> {
    REGISTRY.read().as_ref()?.types.get(name).cloned()
}

/// Names of all registered types, sorted.
#[must_use]
pub fn registered_types() -> Vec<&'static str> {
    let mut names: Vec<_> = REGISTRY
        .read()
        .as_ref()
        .map(|r| r.types.keys().copied().collect())
        .unwrap_or_default();
    names.sort_unstable();
    names
}

/// Shared table for a registered type, built on first request.
///
/// Declaration functions run without the registry lock held, so they may
/// query the registry themselves.
pub fn active_value_table(name: &str, stages: StageSet) -> Result<Arc<ActiveValueTable>> {
    let (type_name, value_count, declare) = {
        let guard = REGISTRY.read();
        let registry = guard.as_ref().ok_or(TesseraError::RegistryNotInitialized)?;
        let info = registry
            .types
            .get(name)
            .ok_or_else(|| TesseraError::UnknownNodeType(name.to_string()))?;
        if let Some(table) = registry.tables.get(&(info.name, stages)) {
            return Ok(Arc::clone(table));
        }
        let declare = info
            .declare_fn()
            .ok_or_else(|| TesseraError::UnknownNodeType(name.to_string()))?;
        (info.name, info.value_count, declare)
    };

    let mut builder = crate::packing::ActiveValueBuilder::new(type_name, value_count);
    builder.declare_stages(stages, declare);
    let table = Arc::new(builder.build(stages));

    let mut guard = REGISTRY.write();
    let registry = guard.as_mut().ok_or(TesseraError::RegistryNotInitialized)?;
    Ok(Arc::clone(registry.tables.entry((type_name, stages)).or_insert(table)))
}

/// Table for `N` over `stages`: cached (registering `N` on the way) when the
/// registry is up, freshly built otherwise.
#[must_use]
pub fn shared_table<N: NodeKind>(stages: StageSet) -> Arc<ActiveValueTable> {
    if let Some(registry) = REGISTRY.read().as_ref()
        && let Some(table) = registry.tables.get(&(N::TYPE_NAME, stages))
    {
        return Arc::clone(table);
    }

    let table = Arc::new(ActiveValueTable::build::<N>(stages));

    let mut guard = REGISTRY.write();
    let Some(registry) = guard.as_mut() else {
        return table;
    };
    registry.insert::<N>();
    Arc::clone(registry.tables.entry((N::TYPE_NAME, stages)).or_insert(table))
}
