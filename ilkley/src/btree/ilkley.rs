//! B+Tree engine
//!
//! This is the main data structure exposed by the library.
//!

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use super::cursor::Cursor;
use super::page::{Node, Page, Revision};
use super::result::{DeleteResult, InsertResult};
use super::transaction;
use super::transaction::ReadTransaction;
use super::transaction::TransactionQueue;
use crate::io::data;
use crate::io::data::{SnapshotReader, SnapshotWriter};
use crate::io::journal;
use crate::io::journal::{Journal, JournalReader};
use crate::modification::Modification;

/// Default page size (number of entries per page).
pub const DEFAULT_PAGE_SIZE: usize = 16;

/// Default timeout before the reaper closes an abandoned read transaction.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Journal file name used when the data path has no usable stem.
pub const DEFAULT_JOURNAL: &str = "ilkley.log";

/// Keys which we wish to store in an Ilkley tree.
pub trait IlkleyKey: Clone + Ord + Serialize + DeserializeOwned + std::fmt::Debug {}

// Blanket implementation which satisfies the compiler
impl<K> IlkleyKey for K where K: Clone + Ord + Serialize + DeserializeOwned + std::fmt::Debug {}

/// Values which we wish to store in an Ilkley tree.
pub trait IlkleyValue: Clone + PartialEq + Serialize + DeserializeOwned + std::fmt::Debug {}

// Blanket implementation which satisfies the compiler
impl<V> IlkleyValue for V where V: Clone + PartialEq + Serialize + DeserializeOwned + std::fmt::Debug
{}

/// Ilkley specific errors.
#[derive(Error, Debug)]
pub enum IlkleyError {
    /// The requested key is not in the tree
    #[error("key not found")]
    KeyNotFound,

    /// Refusing to create a store over a leftover journal
    #[error("journal already exists: {0}")]
    JournalExists(PathBuf),

    /// Asked to open a store which has no data file
    #[error("data file does not exist: {0}")]
    MissingDataFile(PathBuf),

    /// The store has been closed
    #[error("store is closed")]
    Closed,
}

/// An embedded MVCC B+Tree key/value store.
///
/// Writers are serialized by a single lock and publish copy-on-write roots;
/// readers pin the current root and traverse it without locks. A background
/// task journals every mutation and a second one reaps abandoned read
/// transactions.
#[derive(Debug)]
pub struct Ilkley<K, V>
// Constraints are required because Drop is implemented
where
    K: IlkleyKey + Send + Sync + 'static,
    V: IlkleyValue + Send + Sync + 'static,
{
    path: PathBuf,
    journal_path: PathBuf,
    page_size: usize,
    root: RwLock<Arc<Page<K, V>>>,
    revision: AtomicU64,
    record_ids: AtomicU64,
    nb_elems: AtomicU64,
    write_lock: Mutex<()>,
    modifications: UnboundedSender<Modification<K, V>>,
    journal_task: Mutex<Option<JoinHandle<()>>>,
    reaper_task: Mutex<Option<JoinHandle<()>>>,
    transactions: TransactionQueue<K, V>,
    read_timeout: Duration,
    closed: AtomicBool,
}

impl<K, V> Ilkley<K, V>
where
    K: IlkleyKey + Send + Sync + 'static,
    V: IlkleyValue + Send + Sync + 'static,
{
    /// Create a new store at the specified path with the specified page size.
    pub async fn try_new<P: AsRef<Path>>(origin: P, page_size: usize) -> Result<Self> {
        Self::try_new_with_timeout(origin, page_size, DEFAULT_READ_TIMEOUT).await
    }

    /// Create a new store with a custom read transaction timeout.
    pub async fn try_new_with_timeout<P: AsRef<Path>>(
        origin: P,
        page_size: usize,
        read_timeout: Duration,
    ) -> Result<Self> {
        let path = data_path(origin.as_ref());
        let journal_path = journal_path(&path);
        let page_size = coerce_page_size(page_size);

        tracing::info!("Creating B+Tree at: {}", path.display());

        // A leftover journal means a previous store crashed here and its
        // records would be silently discarded. That needs manual clean up.
        if journal_path.exists() {
            return Err(IlkleyError::JournalExists(journal_path).into());
        }

        let (this, modifications) = Self::assemble(path, journal_path, page_size, read_timeout);

        // Write an empty snapshot so a crash before the first flush still
        // recovers cleanly
        let mut writer = SnapshotWriter::try_create(&this.path).await?;
        writer.write_count(0).await?;
        writer.finish().await?;

        let journal = Journal::try_create(&this.journal_path).await?;
        this.start(journal, modifications).await;
        Ok(this)
    }

    /// Open an existing store at the specified path.
    pub async fn try_open<P: AsRef<Path>>(origin: P, page_size: usize) -> Result<Self> {
        Self::try_open_with_timeout(origin, page_size, DEFAULT_READ_TIMEOUT).await
    }

    /// Open an existing store with a custom read transaction timeout.
    pub async fn try_open_with_timeout<P: AsRef<Path>>(
        origin: P,
        page_size: usize,
        read_timeout: Duration,
    ) -> Result<Self> {
        let path = data_path(origin.as_ref());
        let journal_path = journal_path(&path);
        let page_size = coerce_page_size(page_size);

        tracing::info!("Opening B+Tree at: {}", path.display());

        if !path.exists() {
            return Err(IlkleyError::MissingDataFile(path).into());
        }

        let (this, modifications) = Self::assemble(path, journal_path, page_size, read_timeout);

        if std::fs::metadata(&this.path)?.len() > 0 {
            this.load().await?;
        }

        // Journaling is still off, so replayed records cannot re-enter the
        // journal they came from
        if this.journal_path.exists() && std::fs::metadata(&this.journal_path)?.len() > 0 {
            this.replay().await?;
            journal::truncate(&this.journal_path).await?;
        }

        let journal = Journal::try_append(&this.journal_path).await?;
        this.start(journal, modifications).await;
        Ok(this)
    }

    /// Insert a Key and Value, returning any value which was replaced.
    pub async fn insert(&self, key: K, value: V) -> Result<Option<V>> {
        self.ensure_open()?;
        let record = Modification::Addition(key.clone(), value.clone());
        let _guard = self.write_lock.lock().await;
        let previous = self.apply_insert(key, value).await;
        self.enqueue(record);
        Ok(previous)
    }

    /// Delete a Key, returning the removed entry if it was present.
    pub async fn delete(&self, key: &K) -> Result<Option<(K, V)>> {
        self.ensure_open()?;
        let _guard = self.write_lock.lock().await;
        let removed = self.apply_delete(key, None).await;
        if removed.is_some() {
            self.enqueue(Modification::Deletion(key.clone()));
        }
        Ok(removed)
    }

    /// Delete a Key only if it currently holds the given Value.
    pub async fn delete_value(&self, key: &K, value: &V) -> Result<Option<(K, V)>> {
        self.ensure_open()?;
        let _guard = self.write_lock.lock().await;
        let removed = self.apply_delete(key, Some(value)).await;
        if removed.is_some() {
            self.enqueue(Modification::Deletion(key.clone()));
        }
        Ok(removed)
    }

    /// Get the value associated with a Key.
    pub async fn get(&self, key: &K) -> Result<V> {
        let root = self.root.read().await.clone();
        root.get(key)
            .cloned()
            .ok_or_else(|| IlkleyError::KeyNotFound.into())
    }

    /// Does the tree contain this key?
    pub async fn exist(&self, key: &K) -> bool {
        let root = self.root.read().await.clone();
        root.exist(key)
    }

    /// Open a cursor over the whole key range.
    pub async fn browse(&self) -> Cursor<K, V> {
        Cursor::new(self.begin_read().await, None)
    }

    /// Open a cursor positioned at `key`, or at the first key above it.
    pub async fn browse_from(&self, key: &K) -> Cursor<K, V> {
        Cursor::new(self.begin_read().await, Some(key))
    }

    /// Commit the current snapshot to the data file and retire the journal.
    pub async fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        self.checkpoint().await
    }

    /// Stop the background tasks, drain the journal, write a final snapshot
    /// and clear the tree. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!("Closing B+Tree at: {}", self.path.display());

        if let Some(reaper) = self.reaper_task.lock().await.take() {
            reaper.abort();
        }
        self.transactions.lock().await.clear();

        // The journal task drains everything queued behind the pill, then
        // exits
        let _ = self.modifications.send(Modification::Poison);
        if let Some(journal) = self.journal_task.lock().await.take() {
            let _ = journal.await;
        }

        self.checkpoint().await?;

        *self.root.write().await = Page::empty();
        self.nb_elems.store(0, Ordering::SeqCst);
        Ok(())
    }

    /// Number of entries reachable from the current root.
    pub fn nb_elems(&self) -> u64 {
        self.nb_elems.load(Ordering::SeqCst)
    }

    /// The revision of the most recent mutation. Diagnostic only.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// Walk the current snapshot asserting every structural invariant.
    pub async fn verify(&self) {
        let root = self.root.read().await.clone();
        root.check(self.page_size, true);
    }

    /// Log basic information about our B+Tree.
    pub async fn info(&self) {
        tracing::info!(
            path = %self.path.display(),
            page_size = self.page_size,
            nb_elems = self.nb_elems.load(Ordering::SeqCst),
            revision = self.revision.load(Ordering::SeqCst),
            "B+Tree"
        );
    }

    fn assemble(
        path: PathBuf,
        journal_path: PathBuf,
        page_size: usize,
        read_timeout: Duration,
    ) -> (Self, UnboundedReceiver<Modification<K, V>>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let this = Self {
            path,
            journal_path,
            page_size,
            root: RwLock::new(Page::empty()),
            revision: AtomicU64::new(0),
            record_ids: AtomicU64::new(1),
            nb_elems: AtomicU64::new(0),
            write_lock: Mutex::new(()),
            modifications: sender,
            journal_task: Mutex::new(None),
            reaper_task: Mutex::new(None),
            transactions: Arc::new(Mutex::new(VecDeque::new())),
            read_timeout,
            closed: AtomicBool::new(false),
        };
        (this, receiver)
    }

    async fn start(
        &self,
        journal: Journal,
        modifications: UnboundedReceiver<Modification<K, V>>,
    ) {
        *self.journal_task.lock().await = Some(journal::spawn_writer(journal, modifications));
        *self.reaper_task.lock().await = Some(transaction::spawn_reaper(
            self.transactions.clone(),
            self.read_timeout,
        ));
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(IlkleyError::Closed.into());
        }
        Ok(())
    }

    fn enqueue(&self, record: Modification<K, V>) {
        if self.modifications.send(record).is_err() {
            tracing::warn!("journal task is gone, record dropped");
        }
    }

    /// Rebuild the tree from the data file. Runs before the journal task
    /// starts, so nothing here is journaled.
    async fn load(&self) -> Result<()> {
        let mut reader = SnapshotReader::try_open(&self.path).await?;
        let expected = reader.count();
        while let Some((key, value)) = reader.next().await? {
            self.apply_insert(key, value).await;
        }
        let loaded = self.nb_elems.load(Ordering::SeqCst);
        if loaded != expected {
            tracing::warn!("data file advertised {expected} entries but held {loaded}");
        }
        tracing::info!("loaded {loaded} entries");
        Ok(())
    }

    /// Re-apply journal records on top of the loaded snapshot.
    async fn replay(&self) -> Result<()> {
        tracing::info!("Recovering from journal...");
        let mut reader = JournalReader::try_open(&self.journal_path).await?;
        let mut replayed = 0usize;
        while let Some(modification) = reader.next().await? {
            match modification {
                Modification::Addition(key, value) => {
                    self.apply_insert(key, value).await;
                }
                Modification::Deletion(key) => {
                    self.apply_delete(&key, None).await;
                }
                Modification::Poison => {}
            }
            replayed += 1;
        }
        tracing::info!("Recovered {replayed} modifications");
        Ok(())
    }

    /// Run one insert against the current root and publish the result. The
    /// caller must hold the write lock (or otherwise be the only writer).
    async fn apply_insert(&self, key: K, value: V) -> Option<V> {
        let number = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        let rev = Revision::new(number, self.page_size, &self.record_ids);
        let root = self.root.read().await.clone();

        let (root, previous) = match root.insert(&rev, key, value) {
            InsertResult::Modify { page, previous } => (page, previous),
            InsertResult::Split { pivot, left, right } => {
                // The old root split; a new one holds the promoted pivot
                (Node::page(&rev, vec![pivot], vec![left, right]), None)
            }
        };

        *self.root.write().await = root;
        if previous.is_none() {
            self.nb_elems.fetch_add(1, Ordering::SeqCst);
        }
        previous
    }

    /// Run one delete against the current root and publish the result. With
    /// `expected` set, the entry is only removed when it holds that value.
    /// The caller must hold the write lock.
    async fn apply_delete(&self, key: &K, expected: Option<&V>) -> Option<(K, V)> {
        let root = self.root.read().await.clone();
        if let Some(expected) = expected {
            if root.get(key) != Some(expected) {
                return None;
            }
        }

        let number = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        let rev = Revision::new(number, self.page_size, &self.record_ids);

        match root.delete(&rev, key, None) {
            DeleteResult::NotPresent => None,
            DeleteResult::Remove { page, removed, .. } => {
                *self.root.write().await = page;
                self.nb_elems.fetch_sub(1, Ordering::SeqCst);
                Some(removed)
            }
            // The root has no siblings
            DeleteResult::Borrow { .. } | DeleteResult::Merge { .. } => {
                unreachable!("root delete cannot borrow or merge")
            }
        }
    }

    async fn begin_read(&self) -> Arc<ReadTransaction<K, V>> {
        let root = self.root.read().await.clone();
        let transaction = Arc::new(ReadTransaction::new(
            root,
            self.revision.load(Ordering::SeqCst),
        ));
        self.transactions.lock().await.push_back(transaction.clone());
        transaction
    }

    /// Write the pinned snapshot to a temporary file, swap it in as the data
    /// file and reset the journal.
    async fn checkpoint(&self) -> Result<()> {
        // Pin a consistent (root, count) pair
        let (root, count) = {
            let _guard = self.write_lock.lock().await;
            (
                self.root.read().await.clone(),
                self.nb_elems.load(Ordering::SeqCst),
            )
        };
        let revision = self.revision.load(Ordering::SeqCst);

        let tmp = data::scratch_path(&self.path, revision, "tmp");
        let mut writer = SnapshotWriter::try_create(&tmp).await?;
        writer.write_count(count).await?;

        let transaction = Arc::new(ReadTransaction::new(root, revision));
        let mut cursor = Cursor::new(transaction, None);
        while let Some((key, value)) = cursor.next() {
            writer.write_pair(&key, &value).await?;
        }
        writer.finish().await?;

        data::replace_file(&tmp, &self.path, revision).await?;
        journal::truncate(&self.journal_path).await?;

        tracing::info!("flushed {count} entries to {}", self.path.display());
        Ok(())
    }
}

impl<K, V> Drop for Ilkley<K, V>
where
    K: IlkleyKey + Send + Sync + 'static,
    V: IlkleyValue + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // A cut down close: stop the tasks and write a final snapshot. The
        // journal task lives on a runtime which may be unable to make
        // progress while this thread blocks, so we must not wait for it.
        std::thread::scope(|s| {
            let hdl = s.spawn(|| {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .enable_all()
                    .build()
                    .unwrap();
                runtime.block_on(async {
                    if let Some(reaper) = self.reaper_task.lock().await.take() {
                        reaper.abort();
                    }
                    let _ = self.modifications.send(Modification::Poison);
                    if let Err(e) = self.checkpoint().await {
                        tracing::warn!("could not flush data file to disk: {}", e);
                    }
                });
            });
            hdl.join().expect("thread finished");
        });
    }
}

/// The data file is the path as given when it already exists, otherwise the
/// path with a `data` extension.
fn data_path(origin: &Path) -> PathBuf {
    if origin.exists() {
        origin.to_path_buf()
    } else {
        origin.with_extension("data")
    }
}

/// The journal lives alongside the data file with a `log` extension.
fn journal_path(data: &Path) -> PathBuf {
    match data.file_stem() {
        Some(_) => data.with_extension("log"),
        None => data.with_file_name(DEFAULT_JOURNAL),
    }
}

/// Page sizes at or below 2 fall back to the default; anything else is
/// rounded up to the next power of two.
fn coerce_page_size(page_size: usize) -> usize {
    if page_size <= 2 {
        DEFAULT_PAGE_SIZE
    } else {
        page_size.next_power_of_two()
    }
}
