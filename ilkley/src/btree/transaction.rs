//! Read transactions
//!
//! A read transaction pins one published root. While any clone of the
//! transaction is alive, every page reachable from that root stays alive
//! with it, so readers never need a lock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::page::Page;

/// A handle on one snapshot of the tree.
///
/// Transactions are closed explicitly by dropping their cursor, or by the
/// background reaper once they outlive the configured read timeout. Reaping
/// only drops the store's reference; a cursor still holding the transaction
/// keeps its pages valid.
#[derive(Debug)]
pub struct ReadTransaction<K, V> {
    root: Arc<Page<K, V>>,
    revision: u64,
    created: Instant,
    closed: AtomicBool,
}

impl<K, V> ReadTransaction<K, V> {
    pub(crate) fn new(root: Arc<Page<K, V>>, revision: u64) -> Self {
        Self {
            root,
            revision,
            created: Instant::now(),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn root(&self) -> &Arc<Page<K, V>> {
        &self.root
    }

    /// The revision which was current when this transaction opened. Purely
    /// diagnostic; the pinned root is what fixes the snapshot.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Has this transaction been closed, explicitly or by the reaper?
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the transaction closed. Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) fn age(&self) -> Duration {
        self.created.elapsed()
    }
}

pub(crate) type TransactionQueue<K, V> = Arc<Mutex<VecDeque<Arc<ReadTransaction<K, V>>>>>;

/// Spawn the reaper task. Each cycle walks the FIFO from the head, dropping
/// transactions which are already closed or have outlived the timeout. The
/// queue keeps creation order, so the walk can stop at the first live entry.
pub(crate) fn spawn_reaper<K, V>(
    transactions: TransactionQueue<K, V>,
    read_timeout: Duration,
) -> JoinHandle<()>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(read_timeout).await;
            let mut queue = transactions.lock().await;
            let mut reaped = 0;
            while let Some(transaction) = queue.front() {
                if transaction.is_closed() || transaction.age() >= read_timeout {
                    transaction.close();
                    queue.pop_front();
                    reaped += 1;
                    continue;
                }
                break;
            }
            if reaped > 0 {
                tracing::debug!("reaped {reaped} read transactions");
            }
        }
    })
}
