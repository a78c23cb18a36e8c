//! Data file functions
//!
//! The data file is a flat snapshot: a big-endian count of entries followed
//! by that many framed key/value pairs in ascending key order. There is no
//! per-page framing; opening a store rebuilds the tree by insertion.

use std::path::Path;
use std::path::PathBuf;

use anyhow::Error;
use anyhow::Result;
use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::buffer::BufferHandler;
use crate::BINCODER;

#[derive(Debug)]
pub(crate) struct SnapshotWriter {
    file: File,
}

impl SnapshotWriter {
    pub(crate) async fn try_create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .await?;

        Ok(Self { file })
    }

    pub(crate) async fn write_count(&mut self, count: u64) -> Result<()> {
        self.file.write_u64(count).await.map_err(Error::new)
    }

    pub(crate) async fn write_pair<K, V>(&mut self, key: &K, value: &V) -> Result<()>
    where
        K: Serialize,
        V: Serialize,
    {
        self.write_frame(key).await?;
        self.write_frame(value).await
    }

    /// Force everything to disk.
    pub(crate) async fn finish(self) -> Result<()> {
        self.file.sync_all().await.map_err(Error::new)
    }

    async fn write_frame<T>(&mut self, value: &T) -> Result<()>
    where
        T: Serialize,
    {
        let bytes = BINCODER.serialize(value)?;
        self.file.write_u64(bytes.len() as u64).await?;
        self.file.write_all(&bytes).await?;
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct SnapshotReader {
    handler: BufferHandler,
    count: u64,
    remaining: u64,
}

impl SnapshotReader {
    pub(crate) async fn try_open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).open(path).await?;
        let mut handler = BufferHandler::new(file);
        let count = handler.read_u64().await?;

        Ok(Self {
            handler,
            count,
            remaining: count,
        })
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }

    pub(crate) async fn next<K, V>(&mut self) -> Result<Option<(K, V)>>
    where
        K: DeserializeOwned,
        V: DeserializeOwned,
    {
        if self.remaining == 0 {
            return Ok(None);
        }
        let key = self.handler.read_value().await?;
        let value = self.handler.read_value().await?;
        self.remaining -= 1;
        Ok(Some((key, value)))
    }
}

/// A sibling path which will not collide with other checkpoints: other
/// processes differ by pid, earlier flushes of this store by revision.
pub(crate) fn scratch_path(target: &Path, revision: u64, kind: &str) -> PathBuf {
    let name = match target.file_name() {
        Some(name) => format!("{}.{}.{revision}.{kind}", name.to_string_lossy(), std::process::id()),
        None => format!("{}.{revision}.{kind}", std::process::id()),
    };
    target.with_file_name(name)
}

/// Swap a freshly written snapshot into place. The old data file is renamed
/// aside first, so a crash part way through leaves either the old or the new
/// file intact.
pub(crate) async fn replace_file(tmp: &Path, target: &Path, revision: u64) -> Result<()> {
    let backup = scratch_path(target, revision, "bak");
    let had_previous = fs::try_exists(target).await?;
    if had_previous {
        fs::rename(target, &backup).await?;
    }
    fs::rename(tmp, target).await?;
    if had_previous {
        fs::remove_file(&backup).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn it_round_trips_a_snapshot() {
        let path = Path::new("data_roundtrip.data");
        let mut writer = SnapshotWriter::try_create(path).await.expect("creates file");
        writer.write_count(2).await.expect("writes count");
        writer
            .write_pair(&"a".to_string(), &1usize)
            .await
            .expect("writes pair");
        writer
            .write_pair(&"b".to_string(), &2usize)
            .await
            .expect("writes pair");
        writer.finish().await.expect("synced");

        let mut reader = SnapshotReader::try_open(path).await.expect("opens file");
        assert_eq!(reader.count(), 2);
        assert_eq!(
            reader.next::<String, usize>().await.expect("reads"),
            Some(("a".to_string(), 1))
        );
        assert_eq!(
            reader.next::<String, usize>().await.expect("reads"),
            Some(("b".to_string(), 2))
        );
        assert_eq!(reader.next::<String, usize>().await.expect("reads"), None);
        std::fs::remove_file(path).expect("cleanup");
    }

    #[tokio::test]
    async fn it_replaces_the_data_file() {
        let target = Path::new("data_replace.data");
        std::fs::write(target, b"old").expect("writes old");
        let tmp = scratch_path(target, 7, "tmp");
        std::fs::write(&tmp, b"new").expect("writes new");

        replace_file(&tmp, target, 7).await.expect("replaces");

        assert_eq!(std::fs::read(target).expect("reads"), b"new");
        assert!(!tmp.exists());
        assert!(!scratch_path(target, 7, "bak").exists());
        std::fs::remove_file(target).expect("cleanup");
    }
}
