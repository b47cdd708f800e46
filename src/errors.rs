//! Error Types
//!
//! This module defines the error types used throughout the crate.
//!
//! # Overview
//!
//! [`TesseraError`] covers the failures a caller is expected to handle:
//! - Structural failures when reshaping a node hierarchy (cycles, mismatched synchronizers)
//! - Configuration failures when building packers, tables and settings
//! - Registry lookups
//!
//! Steady-state invariant violations (stealing an occupied slot, indexing past the
//! slot table's capacity) are programmer errors and panic instead.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tessera::errors::{TesseraError, Result};
//!
//! fn reparent(h: &mut Hierarchy<PaintNode>, child: NodeKey, parent: NodeKey) -> Result<()> {
//!     h.attach(child, parent)?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

use crate::packing::ConsumptionStage;

/// The main error type for the crate.
///
/// Every variant returned from a mutating operation guarantees that no state
/// was changed by the failed call.
#[derive(Error, Debug)]
pub enum TesseraError {
    // ========================================================================
    // Hierarchy Errors
    // ========================================================================
    /// The requested parent is the node itself or one of its descendants.
    #[error("Cannot attach node under its own subtree")]
    ReparentCycle,

    /// The node and the requested parent are bound to different frame synchronizers.
    #[error("Frame synchronizer mismatch: node is bound to #{node}, parent to #{parent}")]
    SynchronizerMismatch {
        /// Synchronizer id of the node being moved
        node: u64,
        /// Synchronizer id of the requested parent
        parent: u64,
    },

    /// A node handle does not refer to a live node.
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    // ========================================================================
    // Packing Configuration Errors
    // ========================================================================
    /// Alignment must be at least one column.
    #[error("Invalid packing alignment: {0}")]
    InvalidAlignment(usize),

    /// More distinct packing configurations were requested than provisioned.
    #[error("Too many packing configurations: requested {requested}, provisioned {provisioned}")]
    TooManyConfigurations {
        /// Number of distinct configurations requested
        requested: usize,
        /// Configured limit
        provisioned: usize,
    },

    /// An active-value table was built for a different node type.
    #[error("Active-value table for '{table}' cannot drive a packer for '{packer}'")]
    TableMismatch {
        /// Node type the table was built for
        table: &'static str,
        /// Node type of the packer
        packer: &'static str,
    },

    /// A stage was declared twice on the same packer.
    #[error("Stage {0:?} declared more than once")]
    DuplicateStage(ConsumptionStage),

    // ========================================================================
    // Registry Errors
    // ========================================================================
    /// No node type is registered under this name.
    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    /// `registry::init` has not been called (or `teardown` already ran).
    #[error("Node type registry is not initialized")]
    RegistryNotInitialized,

    // ========================================================================
    // Settings Errors
    // ========================================================================
    /// Settings failed to parse.
    #[error("Settings parse error: {0}")]
    Settings(#[from] serde_json::Error),

    /// Settings parsed but are not usable.
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
}

/// Alias for `Result<T, TesseraError>`.
pub type Result<T> = std::result::Result<T, TesseraError>;
