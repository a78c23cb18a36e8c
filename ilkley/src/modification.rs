//! Modification records
//!
//! Queued by the write path, drained by the journal task.

/// Journal tag for an insertion record.
pub(crate) const ADDITION: u8 = 0x00;

/// Journal tag for a deletion record.
pub(crate) const DELETION: u8 = 0x01;

/// One logical change to the tree.
///
/// `Poison` is the shutdown sentinel for the journal task. It never reaches
/// the disk, so it has no tag.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Modification<K, V> {
    Addition(K, V),
    Deletion(K),
    Poison,
}
