//! Journal functions
//!
//! Each record is one tag byte followed by the framed key, plus the framed
//! value for additions. The file is append only and synced after every
//! record; a flush of the tree resets it to zero length.

use std::path::Path;

use anyhow::Error;
use anyhow::Result;
use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use super::buffer::BufferHandler;
use super::buffer::ReadError;
use crate::modification::Modification;
use crate::modification::{ADDITION, DELETION};
use crate::BINCODER;

#[derive(Debug)]
pub(crate) struct Journal {
    file: File,
}

impl Journal {
    /// Create a fresh journal. Fails if one already exists at the path,
    /// because that means a previous store crashed here and needs manual
    /// clean up first.
    pub(crate) async fn try_create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(path)
            .await?;

        Ok(Self { file })
    }

    /// Open a journal for appending, creating it if required. Appends always
    /// land at the current end of file, so a concurrent truncation simply
    /// restarts the log.
    pub(crate) async fn try_append(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        Ok(Self { file })
    }

    /// Write one record and force it to disk.
    pub(crate) async fn append<K, V>(&mut self, modification: &Modification<K, V>) -> Result<()>
    where
        K: Serialize,
        V: Serialize,
    {
        match modification {
            Modification::Addition(key, value) => {
                self.file.write_u8(ADDITION).await?;
                self.write_frame(key).await?;
                self.write_frame(value).await?;
            }
            Modification::Deletion(key) => {
                self.file.write_u8(DELETION).await?;
                self.write_frame(key).await?;
            }
            // The poison pill never reaches the disk
            Modification::Poison => return Ok(()),
        }
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

/// Spawn the background writer. It drains the modification queue one record
/// at a time until it sees the poison pill or the channel closes. A write
/// failure is logged and the task keeps accepting records; durability is
/// re-established at the next flush.
pub(crate) fn spawn_writer<K, V>(
    mut journal: Journal,
    mut modifications: UnboundedReceiver<Modification<K, V>>,
) -> JoinHandle<()>
where
    K: Serialize + Send + Sync + 'static,
    V: Serialize + Send + Sync + 'static,
{
    tokio::spawn(async move {
        while let Some(modification) = modifications.recv().await {
            if matches!(modification, Modification::Poison) {
                // Drain anything still queued before exiting
                while let Ok(pending) = modifications.try_recv() {
                    if matches!(pending, Modification::Poison) {
                        continue;
                    }
                    if let Err(e) = journal.append(&pending).await {
                        tracing::error!("could not write journal record: {e}");
                    }
                }
                break;
            }
            if let Err(e) = journal.append(&modification).await {
                tracing::error!("could not write journal record: {e}");
            }
        }
        tracing::debug!("journal writer finished");
    })
}

/// Reset a journal to zero length and sync the truncation.
pub(crate) async fn truncate(path: &Path) -> Result<()> {
    let file = OpenOptions::new().write(true).open(path).await?;
    file.set_len(0).await?;
    file.sync_all().await.map_err(Error::new)
}

#[derive(Debug)]
pub(crate) struct JournalReader {
    handler: BufferHandler,
}

impl JournalReader {
    pub(crate) async fn try_open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).open(path).await?;

        Ok(Self {
            handler: BufferHandler::new(file),
        })
    }

    /// Read the next record. `None` means the journal is exhausted, which
    /// includes a torn record at the tail left behind by a crash.
    pub(crate) async fn next<K, V>(&mut self) -> Result<Option<Modification<K, V>>>
    where
        K: DeserializeOwned,
        V: DeserializeOwned,
    {
        let tag = match self.handler.read(1).await {
            Ok(bytes) => bytes[0],
            Err(e) => {
                return match e.downcast_ref::<ReadError>() {
                    Some(ReadError::EndOfInput) => Ok(None),
                    _ => Err(e),
                }
            }
        };

        match tag {
            ADDITION => {
                let Some(key) = Self::tail_tolerant(self.handler.read_value().await)? else {
                    return Ok(None);
                };
                let Some(value) = Self::tail_tolerant(self.handler.read_value().await)? else {
                    return Ok(None);
                };
                Ok(Some(Modification::Addition(key, value)))
            }
            DELETION => {
                let Some(key) = Self::tail_tolerant(self.handler.read_value().await)? else {
                    return Ok(None);
                };
                Ok(Some(Modification::Deletion(key)))
            }
            unknown => {
                tracing::warn!("unknown journal tag {unknown}, discarding tail");
                Ok(None)
            }
        }
    }

    /// A record cut short by a crash is expected; anything else is an error.
    fn tail_tolerant<T>(result: Result<T>) -> Result<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) => match e.downcast_ref::<ReadError>() {
                Some(ReadError::EndOfInput) | Some(ReadError::ShortRead { .. }) => {
                    tracing::warn!("torn journal record at tail, discarding");
                    Ok(None)
                }
                None => Err(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::Path;

    #[tokio::test]
    async fn it_round_trips_records() {
        let path = Path::new("journal_roundtrip.log");
        let mut journal = Journal::try_create(path).await.expect("creates journal");
        journal
            .append(&Modification::Addition("this".to_string(), 3usize))
            .await
            .expect("appends");
        journal
            .append(&Modification::<String, usize>::Deletion("that".to_string()))
            .await
            .expect("appends");
        drop(journal);

        let mut reader = JournalReader::try_open(path).await.expect("opens journal");
        assert_eq!(
            reader.next::<String, usize>().await.expect("reads"),
            Some(Modification::Addition("this".to_string(), 3))
        );
        assert_eq!(
            reader.next::<String, usize>().await.expect("reads"),
            Some(Modification::Deletion("that".to_string()))
        );
        assert_eq!(reader.next::<String, usize>().await.expect("reads"), None);
        std::fs::remove_file(path).expect("cleanup");
    }

    #[tokio::test]
    async fn it_never_writes_the_poison_pill() {
        let path = Path::new("journal_poison.log");
        let mut journal = Journal::try_create(path).await.expect("creates journal");
        journal
            .append(&Modification::<String, usize>::Poison)
            .await
            .expect("appends");
        drop(journal);

        assert_eq!(std::fs::metadata(path).expect("metadata").len(), 0);
        std::fs::remove_file(path).expect("cleanup");
    }

    #[tokio::test]
    async fn it_discards_a_torn_tail() {
        let path = Path::new("journal_torn.log");
        let mut journal = Journal::try_create(path).await.expect("creates journal");
        journal
            .append(&Modification::Addition("whole".to_string(), 1usize))
            .await
            .expect("appends");
        drop(journal);

        // Append a truncated copy of the record to fake a crash mid-write
        let bytes = std::fs::read(path).expect("reads");
        let torn = [&bytes[..], &bytes[..bytes.len() - 3]].concat();
        std::fs::write(path, torn).expect("writes");

        let mut reader = JournalReader::try_open(path).await.expect("opens journal");
        assert_eq!(
            reader.next::<String, usize>().await.expect("reads"),
            Some(Modification::Addition("whole".to_string(), 1))
        );
        assert_eq!(reader.next::<String, usize>().await.expect("reads"), None);
        std::fs::remove_file(path).expect("cleanup");
    }
}
