//! Unbounded single-reader queues between participants.
//!
//! Writers share the queue by reference. Completing it drops the only sender,
//! so the reader drains what was already queued and then sees end of stream.
//! Writes after completion fail with [`Error::QueueClosed`].

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::events::Event;

pub type EventQueue = Queue<Event>;

#[derive(Debug)]
pub struct Queue<T> {
    tx: Mutex<Option<mpsc::UnboundedSender<T>>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<T>>>,
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Queue<T> {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
        }
    }

    /// # Errors
    /// Returns `Error::QueueClosed` once the queue is completed or its reader is gone.
    pub fn send(&self, item: T) -> Result<()> {
        let guard = self.tx.lock();
        let tx = guard.as_ref().ok_or(Error::QueueClosed)?;
        tx.send(item).map_err(|_| Error::QueueClosed)
    }

    /// Stop accepting writes. Idempotent.
    pub fn complete(&self) {
        self.tx.lock().take();
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.tx.lock().is_none()
    }

    /// Hand out the reading end. Only the first caller gets it.
    #[must_use]
    pub fn take_reader(&self) -> Option<QueueReader<T>> {
        self.rx.lock().take().map(|rx| QueueReader { rx })
    }
}

#[derive(Debug)]
pub struct QueueReader<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> QueueReader<T> {
    /// Next item, or `None` after the queue is completed and drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}
