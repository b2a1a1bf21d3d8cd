use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;

const DEFAULT_MAX_IDLE: usize = 32;

/// Fixed-size byte buffers shared between readers.
///
/// Buffers go back to the pool when their [`PooledBuffer`] is dropped; at most
/// `max_idle` are retained, the rest are freed.
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    buffer_size: usize,
    max_idle: usize,
    idle: Mutex<Vec<Box<[u8]>>>,
}

impl BufferPool {
    #[must_use]
    pub fn new(buffer_size: usize, max_idle: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                buffer_size: buffer_size.max(1),
                max_idle,
                idle: Mutex::new(Vec::new()),
            }),
        }
    }

    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Number of buffers currently waiting in the pool.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.inner.idle.lock().len()
    }

    #[must_use]
    pub fn rent(&self) -> PooledBuffer {
        let buf = self
            .inner
            .idle
            .lock()
            .pop()
            .unwrap_or_else(|| vec![0; self.inner.buffer_size].into_boxed_slice());
        PooledBuffer {
            buf: Some(buf),
            pool: Arc::clone(&self.inner),
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(super::DEFAULT_CHUNK_SIZE, DEFAULT_MAX_IDLE)
    }
}

/// A rented buffer; returns itself to the pool on drop.
#[derive(Debug)]
pub struct PooledBuffer {
    buf: Option<Box<[u8]>>,
    pool: Arc<PoolInner>,
}

impl PooledBuffer {
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or_default()
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or_default()
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let Some(buf) = self.buf.take() else {
            return;
        };
        let mut idle = self.pool.idle.lock();
        if idle.len() < self.pool.max_idle {
            idle.push(buf);
        }
    }
}
