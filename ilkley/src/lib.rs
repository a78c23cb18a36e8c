#![warn(missing_docs)]
//! Ilkley MVCC B+Tree
//!
//! # Why is this called Ilkley?
//!
//! All the good names for B+Trees have gone, so the crate is named after a
//! town on the edge of a moor instead.
//!
//! # Implementation Details
//!
//! Provides an embedded B+Tree implementation for storing keys and values in
//! a file, with multi-version concurrency control.
//!
//! The tree is built from immutable pages. A mutation never touches an
//! existing page; it rewrites the pages along the affected path and publishes
//! a new root with a fresh revision. Readers pin whichever root was current
//! when they started and traverse it without locks, so a cursor always sees a
//! consistent snapshot no matter how many writes land while it is open.
//!
//! Durability is two tier. Every mutation is appended to a journal by a
//! background task and synced to disk. A flush writes the whole current
//! snapshot to a temporary file, atomically swaps it in as the data file and
//! truncates the journal. If the process dies between flushes, the next open
//! loads the last data file and replays the journal on top of it.
//!
//! Keys and values are serialized with bincode. The user experience should be
//! similar to working with a BTreeMap, but slower when I/O is involved.
//!

pub mod btree;
mod io;
mod modification;

use bincode::config::AllowTrailing;
use bincode::config::FixintEncoding;
use bincode::config::WithOtherIntEncoding;
use bincode::config::WithOtherTrailing;
use bincode::{DefaultOptions, Options};
use std::sync::LazyLock;

static BINCODER: LazyLock<
    WithOtherIntEncoding<WithOtherTrailing<DefaultOptions, AllowTrailing>, FixintEncoding>,
> = LazyLock::new(|| {
    bincode::DefaultOptions::new()
        .allow_trailing_bytes()
        .with_fixint_encoding()
});
