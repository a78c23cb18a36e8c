//! Buffer functions
//!
//! A pull reader over a file channel. Callers ask for exactly the bytes they
//! need and the handler refills its fixed buffer from the file on demand.

use anyhow::Error;
use anyhow::Result;
use bincode::Options;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::BINCODER;

const BUFFER_SIZE: usize = 64 * 1024;

/// Reading failures which are not plain I/O errors.
#[derive(Error, Debug)]
pub enum ReadError {
    /// The file ended cleanly before the requested read started.
    #[error("end of input")]
    EndOfInput,

    /// The file ended part way through a requested read.
    #[error("short read: needed {needed} bytes, got {got}")]
    ShortRead {
        /// How many bytes the caller asked for.
        needed: usize,
        /// How many bytes were actually available.
        got: usize,
    },
}

#[derive(Debug)]
pub(crate) struct BufferHandler {
    file: File,
    buf: Vec<u8>,
    pos: usize,
    len: usize,
}

impl BufferHandler {
    pub(crate) fn new(file: File) -> Self {
        Self::with_capacity(file, BUFFER_SIZE)
    }

    pub(crate) fn with_capacity(file: File, capacity: usize) -> Self {
        Self {
            file,
            buf: vec![0; capacity],
            pos: 0,
            len: 0,
        }
    }

    /// Return the next `n` bytes, refilling the buffer as required.
    pub(crate) async fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            if self.pos == self.len {
                self.len = self.file.read(&mut self.buf).await?;
                self.pos = 0;
                if self.len == 0 {
                    if out.is_empty() {
                        return Err(ReadError::EndOfInput.into());
                    }
                    return Err(ReadError::ShortRead {
                        needed: n,
                        got: out.len(),
                    }
                    .into());
                }
            }
            let take = (n - out.len()).min(self.len - self.pos);
            out.extend_from_slice(&self.buf[self.pos..self.pos + take]);
            self.pos += take;
        }
        Ok(out)
    }

    /// Read a big-endian u64.
    pub(crate) async fn read_u64(&mut self) -> Result<u64> {
        let bytes = self.read(8).await?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes);
        Ok(u64::from_be_bytes(raw))
    }

    /// Read one length-prefixed frame.
    pub(crate) async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u64().await? as usize;
        self.read(len).await
    }

    /// Read one framed, bincode encoded element.
    pub(crate) async fn read_value<T>(&mut self) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let frame = self.read_frame().await?;
        BINCODER.deserialize(&frame).map_err(Error::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    use tokio::fs::OpenOptions;

    async fn read_handler(path: &str) -> BufferHandler {
        let file = OpenOptions::new()
            .read(true)
            .open(path)
            .await
            .expect("opens file");
        // A tiny buffer forces plenty of refills
        BufferHandler::with_capacity(file, 4)
    }

    #[tokio::test]
    async fn it_reads_across_refills() {
        let mut out = std::fs::File::create("buffer_refill.db").expect("creates file");
        out.write_all(b"abcdefghij").expect("writes");
        drop(out);

        let mut handler = read_handler("buffer_refill.db").await;
        assert_eq!(handler.read(3).await.expect("reads"), b"abc");
        assert_eq!(handler.read(6).await.expect("reads"), b"defghi");
        assert_eq!(handler.read(1).await.expect("reads"), b"j");
        std::fs::remove_file("buffer_refill.db").expect("cleanup");
    }

    #[tokio::test]
    async fn it_signals_end_of_input() {
        let mut out = std::fs::File::create("buffer_eof.db").expect("creates file");
        out.write_all(b"ab").expect("writes");
        drop(out);

        let mut handler = read_handler("buffer_eof.db").await;
        assert_eq!(handler.read(2).await.expect("reads"), b"ab");
        let err = handler.read(1).await.expect_err("end of input");
        assert!(matches!(
            err.downcast_ref::<ReadError>(),
            Some(ReadError::EndOfInput)
        ));
        std::fs::remove_file("buffer_eof.db").expect("cleanup");
    }

    #[tokio::test]
    async fn it_signals_short_reads() {
        let mut out = std::fs::File::create("buffer_short.db").expect("creates file");
        out.write_all(b"abcde").expect("writes");
        drop(out);

        let mut handler = read_handler("buffer_short.db").await;
        let err = handler.read(9).await.expect_err("short read");
        assert!(matches!(
            err.downcast_ref::<ReadError>(),
            Some(ReadError::ShortRead { needed: 9, got: 5 })
        ));
        std::fs::remove_file("buffer_short.db").expect("cleanup");
    }
}
