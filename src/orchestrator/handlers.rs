use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::error::Result;
use crate::provider::{ProviderUpdate, UpdateKind};
use crate::tools::bridge::panic_message;

pub type UpdateHandler = Arc<dyn Fn(ProviderUpdate) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Observers of provider updates, keyed by update kind.
///
/// Registration may happen from any task. Dispatch works on a snapshot taken
/// before the first handler runs, and a failing handler does not stop the
/// ones after it.
#[derive(Default)]
pub struct UpdateHandlers {
    handlers: Mutex<HashMap<UpdateKind, Vec<UpdateHandler>>>,
}

impl std::fmt::Debug for UpdateHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<UpdateKind, usize> = self
            .handlers
            .lock()
            .iter()
            .map(|(kind, list)| (*kind, list.len()))
            .collect();
        f.debug_struct("UpdateHandlers").field("handlers", &counts).finish()
    }
}

impl UpdateHandlers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F, Fut>(&self, kind: UpdateKind, handler: F)
    where
        F: Fn(ProviderUpdate) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler: UpdateHandler =
            Arc::new(move |update| -> BoxFuture<'static, Result<()>> { Box::pin(handler(update)) });
        self.handlers.lock().entry(kind).or_default().push(handler);
    }

    #[must_use]
    pub fn count(&self, kind: UpdateKind) -> usize {
        self.handlers.lock().get(&kind).map_or(0, Vec::len)
    }

    pub fn clear(&self) {
        self.handlers.lock().clear();
    }

    fn snapshot(&self, kind: UpdateKind) -> Vec<UpdateHandler> {
        self.handlers.lock().get(&kind).cloned().unwrap_or_default()
    }

    /// Run every handler registered for the update's kind, in registration order.
    pub async fn dispatch(&self, update: &ProviderUpdate) {
        let kind = update.kind();
        for handler in self.snapshot(kind) {
            let call = AssertUnwindSafe(async { handler(update.clone()).await });
            match call.catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::error!(%kind, "Update handler failed: {err}"),
                Err(panic) => {
                    tracing::error!(%kind, "Update handler panicked: {}", panic_message(panic.as_ref()));
                }
            }
        }
    }
}
