//! Utility Module
//!
//! - [`interner`]: label interning for active-value tables
//!
//! Interned labels ([`Symbol`]) compare and hash in O(1):
//!
//! ```rust,ignore
//! use tessera::utils::interner;
//!
//! let a = interner::intern("color");
//! let b = interner::intern("color");
//! assert_eq!(a, b);
//! ```

pub mod interner;

pub use interner::Symbol;
