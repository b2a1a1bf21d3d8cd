//! Conversation participants: actors that exchange [`Event`](crate::events::Event)s
//! through queues.
//!
//! A participant owns two queues. Others push into its inbound queue; it
//! pushes into its outbound queue and others drain it. `start` runs an
//! ingress loop (outside world to outbound queue) and an egress loop (inbound
//! queue to outside world) until cancelled, and returns once both stopped.
//! Both queues are completed on the way out.

pub mod ai;
pub mod media;
pub mod queue;

use std::future::Future;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::tools::bridge::panic_message;

pub use ai::AiParticipant;
pub use media::MediaParticipant;
pub use queue::{EventQueue, Queue, QueueReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantState {
    Created,
    Running,
    Stopping,
    Stopped,
}

#[async_trait]
pub trait Participant: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    /// Queue this participant drains.
    fn inbound(&self) -> &EventQueue;

    /// Queue this participant fills.
    fn outbound(&self) -> &EventQueue;

    fn state(&self) -> ParticipantState;

    /// Run both loops until `cancel` fires, the participant is stopped, or
    /// its transport closes. Valid once per instance.
    ///
    /// # Errors
    /// `Error::AlreadyStarted` on a second call; otherwise the first loop fault.
    async fn start(&self, cancel: CancellationToken) -> Result<()>;

    /// Cancel the participant's lifetime scope.
    fn stop(&self);
}

/// State shared by every participant implementation.
#[derive(Debug)]
pub struct ParticipantCore {
    id: String,
    name: String,
    inbound: EventQueue,
    outbound: EventQueue,
    state: Mutex<ParticipantState>,
    scope: CancellationToken,
}

impl ParticipantCore {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            inbound: EventQueue::new(),
            outbound: EventQueue::new(),
            state: Mutex::new(ParticipantState::Created),
            scope: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn inbound(&self) -> &EventQueue {
        &self.inbound
    }

    #[must_use]
    pub const fn outbound(&self) -> &EventQueue {
        &self.outbound
    }

    #[must_use]
    pub fn state(&self) -> ParticipantState {
        *self.state.lock()
    }

    #[must_use]
    pub const fn scope(&self) -> &CancellationToken {
        &self.scope
    }

    pub fn stop(&self) {
        self.scope.cancel();
    }

    fn begin(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state != ParticipantState::Created {
            return Err(Error::AlreadyStarted(self.id.clone()));
        }
        *state = ParticipantState::Running;
        Ok(())
    }

    fn set_state(&self, next: ParticipantState) {
        *self.state.lock() = next;
    }

    /// Run `ingress` and `egress` under the participant's scope, then
    /// complete both queues.
    ///
    /// # Errors
    /// `Error::AlreadyStarted` when called twice, otherwise the first fault.
    pub async fn supervise<I, E>(&self, cancel: &CancellationToken, ingress: I, egress: E) -> Result<()>
    where
        I: Future<Output = Result<()>> + Send,
        E: Future<Output = Result<()>> + Send,
    {
        self.begin()?;
        tracing::info!(participant_id = %self.id, name = %self.name, "Starting participant");

        let result = supervise_loops(&self.id, &self.scope, cancel, ("ingress", ingress), ("egress", egress)).await;

        self.set_state(ParticipantState::Stopping);
        self.inbound.complete();
        self.outbound.complete();
        self.set_state(ParticipantState::Stopped);
        tracing::info!(participant_id = %self.id, "Participant stopped");
        result
    }
}

/// Run two loops concurrently under `scope` until both have ended.
///
/// A loop that faults (error or panic) cancels `scope` so its sibling stops
/// too. `cancel` is linked into `scope` for the duration of the run.
/// Cancellation is not a fault.
pub(crate) async fn supervise_loops<A, B>(
    owner: &str,
    scope: &CancellationToken,
    cancel: &CancellationToken,
    first: (&'static str, A),
    second: (&'static str, B),
) -> Result<()>
where
    A: Future<Output = Result<()>> + Send,
    B: Future<Output = Result<()>> + Send,
{
    let first_fault = Mutex::new(None);
    let loops = futures::future::join(
        run_loop(owner, scope, first.0, first.1, &first_fault),
        run_loop(owner, scope, second.0, second.1, &first_fault),
    );
    tokio::pin!(loops);
    tokio::select! {
        _ = &mut loops => {}
        () = cancel.cancelled() => {
            scope.cancel();
            loops.await;
        }
    }
    first_fault.lock().take().map_or(Ok(()), Err)
}

async fn run_loop<F>(
    owner: &str,
    scope: &CancellationToken,
    name: &'static str,
    work: F,
    first_fault: &Mutex<Option<Error>>,
) where
    F: Future<Output = Result<()>> + Send,
{
    let fault = match AssertUnwindSafe(work).catch_unwind().await {
        Ok(Ok(())) => {
            tracing::debug!(owner, loop_name = name, "Loop finished");
            return;
        }
        Ok(Err(err)) if err.is_cancellation() => {
            tracing::info!(owner, loop_name = name, "Loop cancelled");
            return;
        }
        Ok(Err(err)) => err,
        Err(panic) => Error::Panicked(panic_message(panic.as_ref())),
    };
    tracing::error!(owner, loop_name = name, "Loop faulted: {fault}");
    scope.cancel();
    first_fault.lock().get_or_insert(fault);
}
