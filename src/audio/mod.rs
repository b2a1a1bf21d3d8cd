//! Bounded, ordered chunking of bulk audio for paced transmission.
//!
//! A chunk source is single pass and single consumer: it yields chunks of at
//! most `chunk_size` bytes in order, then `None` once, and keeps returning
//! `None` afterwards. Reads observe a cancellation token and stop with
//! [`Error::Cancelled`].

pub mod pool;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
pub use pool::{BufferPool, PooledBuffer};

pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

pub trait ChunkSource: Send {
    /// Next chunk, or `None` at the end of the data.
    fn next_chunk<'a>(
        &'a mut self,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Option<&'a [u8]>>>;
}

/// Slices an in-memory buffer.
#[derive(Debug)]
pub struct MemoryChunkSource<B> {
    data: B,
    cursor: usize,
    chunk_size: usize,
}

impl<B: AsRef<[u8]>> MemoryChunkSource<B> {
    #[must_use]
    pub fn new(data: B) -> Self {
        Self::with_chunk_size(data, DEFAULT_CHUNK_SIZE)
    }

    #[must_use]
    pub fn with_chunk_size(data: B, chunk_size: usize) -> Self {
        Self {
            data,
            cursor: 0,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Synchronous form of [`ChunkSource::next_chunk`]; nothing here can block.
    pub fn next_slice(&mut self) -> Option<&[u8]> {
        let data = self.data.as_ref();
        if self.cursor >= data.len() {
            return None;
        }
        let end = data.len().min(self.cursor + self.chunk_size);
        let chunk = &data[self.cursor..end];
        self.cursor = end;
        Some(chunk)
    }
}

impl<B: AsRef<[u8]> + Send> ChunkSource for MemoryChunkSource<B> {
    fn next_chunk<'a>(
        &'a mut self,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Option<&'a [u8]>>> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            Ok(self.next_slice())
        })
    }
}

/// Pulls chunks from an async reader through one pooled buffer.
///
/// The buffer goes back to the pool at end of stream, on cancellation, on a
/// read error, or when the source is dropped.
#[derive(Debug)]
pub struct StreamChunkSource<R> {
    reader: R,
    buffer: Option<PooledBuffer>,
}

impl<R: AsyncRead + Unpin + Send> StreamChunkSource<R> {
    #[must_use]
    pub fn new(reader: R, pool: &BufferPool) -> Self {
        Self {
            reader,
            buffer: Some(pool.rent()),
        }
    }

    fn release(&mut self) {
        self.buffer = None;
    }
}

impl<R: AsyncRead + Unpin + Send> ChunkSource for StreamChunkSource<R> {
    fn next_chunk<'a>(
        &'a mut self,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Option<&'a [u8]>>> {
        Box::pin(async move {
            let Some(buffer) = self.buffer.as_mut() else {
                return Ok(None);
            };
            let read = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                read = self.reader.read(buffer.as_mut_slice()) => Some(read),
            };
            match read {
                None => {
                    self.release();
                    Err(Error::Cancelled)
                }
                Some(Err(err)) => {
                    self.release();
                    Err(err.into())
                }
                Some(Ok(0)) => {
                    self.release();
                    Ok(None)
                }
                Some(Ok(n)) => Ok(self.buffer.as_deref().map(|buf| &buf[..n])),
            }
        })
    }
}
