use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::RelayError;
use crate::orchestrator::{Orchestrator, Request, Response};

struct Job {
    request: Request,
    reply: oneshot::Sender<Result<Response, RelayError>>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Job>,
    in_flight: usize,
}

struct QueueInner {
    orchestrator: Arc<Orchestrator>,
    max_concurrent: usize,
    state: Mutex<QueueState>,
}

impl QueueInner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// FIFO admission into at most `max_concurrent` simultaneous orchestrations.
///
/// Admission is driven by enqueue and completion events; nothing polls.
/// Completion order is unconstrained. Failed requests resolve with their
/// error; retries live in the retry engine, not here.
///
/// Must be used from within a tokio runtime.
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<QueueInner>,
}

impl RequestQueue {
    pub fn new(orchestrator: Arc<Orchestrator>, max_concurrent: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                orchestrator,
                max_concurrent: max_concurrent.max(1),
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.inner.orchestrator
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }

    /// Requests currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.lock().in_flight
    }

    /// Requests waiting for a free slot.
    pub fn pending(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Submit a request; the returned handle resolves to its terminal outcome.
    pub fn enqueue(&self, request: Request) -> PendingResponse {
        let (reply, rx) = oneshot::channel();
        self.inner.lock().pending.push_back(Job { request, reply });
        admit(&self.inner);
        PendingResponse { rx }
    }

    /// Enqueue and wait.
    pub async fn send(&self, request: Request) -> Result<Response, RelayError> {
        self.enqueue(request).await
    }
}

/// Admit queued jobs while slots are free.
fn admit(inner: &Arc<QueueInner>) {
    loop {
        let job = {
            let mut state = inner.lock();
            if state.in_flight >= inner.max_concurrent {
                return;
            }
            let Some(job) = state.pending.pop_front() else {
                return;
            };
            state.in_flight += 1;
            tracing::debug!(
                in_flight = state.in_flight,
                pending = state.pending.len(),
                "admitted request"
            );
            job
        };

        let slot = Slot(Arc::clone(inner));
        tokio::spawn(async move {
            let result = slot.0.orchestrator.send_request(&job.request).await;
            drop(slot);
            // Receiver may have been dropped; nothing to do then.
            let _ = job.reply.send(result);
        });
    }
}

/// One occupied concurrency slot. Released on drop, so a panicking
/// orchestration still frees its slot.
struct Slot(Arc<QueueInner>);

impl Drop for Slot {
    fn drop(&mut self) {
        self.0.lock().in_flight -= 1;
        admit(&self.0);
    }
}

/// Handle to a queued request's outcome.
pub struct PendingResponse {
    rx: oneshot::Receiver<Result<Response, RelayError>>,
}

impl Future for PendingResponse {
    type Output = Result<Response, RelayError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|outcome| {
            outcome.unwrap_or_else(|_| {
                Err(RelayError::Other(
                    "request dropped before completion".to_string(),
                ))
            })
        })
    }
}
