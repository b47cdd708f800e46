//! Global label interner
//!
//! Active-value labels are compared and hashed constantly while tables are
//! built and merged, so they are stored as integer [`Symbol`]s instead of strings.

use std::sync::LazyLock;

use lasso::{Spur, ThreadedRodeo};

static INTERNER: LazyLock<ThreadedRodeo> = LazyLock::new(ThreadedRodeo::new);

/// Compact identifier for an interned label.
pub type Symbol = Spur;

/// Interns `s`, returning the existing symbol when it was interned before.
#[inline]
pub fn intern(s: &str) -> Symbol {
    INTERNER.get_or_intern(s)
}

/// Looks up an already interned string without allocating.
#[inline]
#[must_use]
pub fn get(s: &str) -> Option<Symbol> {
    INTERNER.get(s)
}

/// Resolves a symbol back to its string.
#[inline]
#[must_use]
pub fn resolve(sym: Symbol) -> &'static str {
    INTERNER.resolve(&sym)
}

/// Interns the labels declared by the built-in capabilities so table
/// construction on the simulation thread does not allocate.
pub fn preload_builtin_labels() {
    let common = [
        "transform",
        "transform_translation",
        "color",
        "gradient_points",
        "gradient_radii",
        "gradient_kind",
        "clip_rect",
    ];

    for name in common {
        intern(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_and_resolve() {
        let s1 = intern("color");
        let s2 = intern("color");
        let s3 = intern("transform");

        assert_eq!(s1, s2);
        assert_ne!(s1, s3);

        assert_eq!(resolve(s1), "color");
        assert_eq!(resolve(s3), "transform");
    }

    #[test]
    fn test_get() {
        let _ = intern("existing_label");

        assert!(get("existing_label").is_some());
        assert!(get("never_interned_label").is_none());
    }
}
