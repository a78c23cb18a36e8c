//! Snapshot cursors
//!
//! A cursor walks the tree pinned by its read transaction in ascending key
//! order. It keeps a stack of (page, position) frames for the path from the
//! root to its current leaf; advancing within a leaf bumps the top frame,
//! and an exhausted leaf pops frames until some ancestor still has an
//! unvisited child to descend into.

use std::sync::Arc;

use super::page::Page;
use super::transaction::ReadTransaction;
use crate::btree::ilkley::IlkleyKey;
use crate::btree::ilkley::IlkleyValue;

/// One step of the path from the root down to the current position.
#[derive(Debug)]
struct ParentPos<K, V> {
    page: Arc<Page<K, V>>,
    pos: usize,
}

/// An ordered iterator over one snapshot of the tree.
///
/// The cursor owns its read transaction; dropping the cursor closes it.
/// Because the snapshot is immutable the cursor never observes concurrent
/// mutations, and it needs no locks while iterating.
#[derive(Debug)]
pub struct Cursor<K, V> {
    transaction: Arc<ReadTransaction<K, V>>,
    stack: Vec<ParentPos<K, V>>,
}

impl<K, V> Cursor<K, V>
where
    K: IlkleyKey,
    V: IlkleyValue,
{
    /// Position a new cursor at `from`, or at the smallest key when `from`
    /// is absent. Starting above every stored key yields an immediately
    /// exhausted cursor.
    pub(crate) fn new(transaction: Arc<ReadTransaction<K, V>>, from: Option<&K>) -> Self {
        let mut stack = Vec::new();
        let mut page = transaction.root().clone();
        loop {
            match page.as_ref() {
                Page::Node(node) => {
                    let pos = match from {
                        Some(key) => node.child_index(key),
                        None => 0,
                    };
                    let child = node.child_at(pos).clone();
                    stack.push(ParentPos { page, pos });
                    page = child;
                }
                Page::Leaf(leaf) => {
                    let pos = match from {
                        Some(key) => leaf.position_for(key),
                        None => 0,
                    };
                    stack.push(ParentPos { page, pos });
                    break;
                }
            }
        }

        Self { transaction, stack }
    }

    /// Is there another entry ahead of the cursor?
    pub fn has_next(&self) -> bool {
        self.stack.iter().any(|frame| match frame.page.as_ref() {
            Page::Node(node) => frame.pos < node.nb_elems(),
            Page::Leaf(leaf) => frame.pos < leaf.nb_elems(),
        })
    }

    /// The transaction holding this cursor's snapshot.
    pub fn transaction(&self) -> &ReadTransaction<K, V> {
        &self.transaction
    }

    /// Close the cursor and its transaction.
    pub fn close(self) {
        // Drop does the work
    }

    /// Push the whole leftmost path of `page` onto the stack.
    fn descend(&mut self, mut page: Arc<Page<K, V>>) {
        loop {
            match page.as_ref() {
                Page::Node(node) => {
                    let child = node.child_at(0).clone();
                    self.stack.push(ParentPos { page, pos: 0 });
                    page = child;
                }
                Page::Leaf(_) => {
                    self.stack.push(ParentPos { page, pos: 0 });
                    return;
                }
            }
        }
    }
}

impl<K, V> Iterator for Cursor<K, V>
where
    K: IlkleyKey,
    V: IlkleyValue,
{
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        loop {
            let mut frame = self.stack.pop()?;
            let descend_into = match frame.page.as_ref() {
                Page::Leaf(leaf) => {
                    if frame.pos < leaf.nb_elems() {
                        let tuple = leaf.tuple_at(frame.pos);
                        frame.pos += 1;
                        self.stack.push(frame);
                        return Some(tuple);
                    }
                    None
                }
                Page::Node(node) => {
                    if frame.pos < node.nb_elems() {
                        frame.pos += 1;
                        Some(node.child_at(frame.pos).clone())
                    } else {
                        None
                    }
                }
            };
            match descend_into {
                Some(child) => {
                    self.stack.push(frame);
                    self.descend(child);
                }
                // This frame is exhausted; keep popping
                None => continue,
            }
        }
    }
}

impl<K, V> Drop for Cursor<K, V> {
    fn drop(&mut self) {
        self.transaction.close();
    }
}
