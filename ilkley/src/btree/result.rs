//! Structural operation outcomes
//!
//! Page algorithms never fail; they describe what happened so the level
//! above can rebuild itself. Each recursion step consumes its child's
//! outcome and produces its own.

use std::sync::Arc;

use super::page::Page;

/// Outcome of an insert at one level of the tree.
#[derive(Debug)]
pub(crate) enum InsertResult<K, V> {
    /// The page was rewritten in place. `previous` carries the value which
    /// was replaced when the key already existed.
    Modify {
        page: Arc<Page<K, V>>,
        previous: Option<V>,
    },

    /// The page was full and split in two. The pivot is the leftmost key of
    /// the right half and must be inserted into the parent.
    Split {
        pivot: K,
        left: Arc<Page<K, V>>,
        right: Arc<Page<K, V>>,
    },
}

/// Outcome of a delete at one level of the tree.
///
/// `new_leftmost` is set when the smallest key of the rewritten subtree
/// changed, so ancestors can refresh the separator which replicated it.
#[derive(Debug)]
pub(crate) enum DeleteResult<K, V> {
    /// The key was not in the tree; nothing changed anywhere.
    NotPresent,

    /// The entry was removed and the page still holds enough elements.
    Remove {
        page: Arc<Page<K, V>>,
        removed: (K, V),
        new_leftmost: Option<K>,
    },

    /// The page underflowed and took one element from a sibling. The parent
    /// must install both rewritten pages and the new separator between them.
    Borrow {
        page: Arc<Page<K, V>>,
        sibling: Arc<Page<K, V>>,
        sibling_pos: usize,
        separator: K,
        removed: (K, V),
        new_leftmost: Option<K>,
    },

    /// The page underflowed and was combined with a sibling at minimum fill.
    /// The parent must drop the separator between the two and replace both
    /// children with the merged page.
    Merge {
        page: Arc<Page<K, V>>,
        sibling_pos: usize,
        removed: (K, V),
        new_leftmost: Option<K>,
    },
}
