use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tether_types::CancellationSignal;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::DispatchError;

/// Whether a request changes shared workspace state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestMode {
    /// Runs alone.
    Mutating,
    /// Runs alongside other read-only requests.
    ReadOnly,
}

impl RequestMode {
    pub fn is_mutating(self) -> bool {
        matches!(self, Self::Mutating)
    }
}

/// Observable state of the admission state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    /// One mutating request is running.
    ExclusiveRunning,
    /// This many read-only requests are running.
    ConcurrentRunning(usize),
}

struct Waiter {
    ticket: u64,
    mode: RequestMode,
    admit: oneshot::Sender<Permit>,
}

struct State {
    running: DispatcherState,
    queue: VecDeque<Waiter>,
    shutdown: bool,
    next_ticket: u64,
}

impl State {
    fn can_start(&self, mode: RequestMode) -> bool {
        match mode {
            RequestMode::Mutating => self.running == DispatcherState::Idle,
            RequestMode::ReadOnly => self.running != DispatcherState::ExclusiveRunning,
        }
    }

    fn start(&mut self, mode: RequestMode) {
        self.running = match (mode, self.running) {
            (RequestMode::Mutating, _) => DispatcherState::ExclusiveRunning,
            (RequestMode::ReadOnly, DispatcherState::ConcurrentRunning(n)) => {
                DispatcherState::ConcurrentRunning(n + 1)
            }
            (RequestMode::ReadOnly, _) => DispatcherState::ConcurrentRunning(1),
        };
    }

    fn finish(&mut self, mode: RequestMode) {
        self.running = match (mode, self.running) {
            (RequestMode::ReadOnly, DispatcherState::ConcurrentRunning(n)) if n > 1 => {
                DispatcherState::ConcurrentRunning(n - 1)
            }
            _ => DispatcherState::Idle,
        };
    }

    /// Admit queued requests from the front while they may start.
    fn pump(&mut self, shared: &Arc<Mutex<State>>) -> Vec<(oneshot::Sender<Permit>, Permit)> {
        let mut admitted = Vec::new();
        while let Some(front) = self.queue.front() {
            if !self.can_start(front.mode) {
                break;
            }
            let Some(waiter) = self.queue.pop_front() else {
                break;
            };
            self.start(waiter.mode);
            admitted.push((
                waiter.admit,
                Permit {
                    shared: Arc::clone(shared),
                    mode: waiter.mode,
                },
            ));
        }
        admitted
    }
}

/// Deliver admissions outside the state lock. A permit whose waiter gave up
/// is dropped here, which releases its slot again.
fn deliver(admitted: Vec<(oneshot::Sender<Permit>, Permit)>) {
    for (tx, permit) in admitted {
        if let Err(permit) = tx.send(permit) {
            drop(permit);
        }
    }
}

/// A running slot. Dropping it completes the request in the state machine.
struct Permit {
    shared: Arc<Mutex<State>>,
    mode: RequestMode,
}

impl Drop for Permit {
    fn drop(&mut self) {
        let admitted = {
            let mut state = self.shared.lock().expect("lock poisoned");
            state.finish(self.mode);
            state.pump(&self.shared)
        };
        deliver(admitted);
    }
}

/// Admission-control queue for one logical workspace.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Mutex<State>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(State {
                running: DispatcherState::Idle,
                queue: VecDeque::new(),
                shutdown: false,
                next_ticket: 0,
            })),
        }
    }

    /// Current state.
    pub fn state(&self) -> DispatcherState {
        self.shared.lock().expect("lock poisoned").running
    }

    /// Number of requests waiting for admission.
    pub fn queued(&self) -> usize {
        self.shared.lock().expect("lock poisoned").queue.len()
    }

    /// Reject new submissions and every queued request. Running requests
    /// finish normally.
    pub fn shutdown(&self) {
        let rejected = {
            let mut state = self.shared.lock().expect("lock poisoned");
            state.shutdown = true;
            std::mem::take(&mut state.queue)
        };
        if !rejected.is_empty() {
            debug!(count = rejected.len(), "rejected queued requests at shutdown");
        }
    }

    /// Submit a request and wait for its outcome.
    ///
    /// `handler` is only invoked once the request is admitted; a request
    /// canceled while queued never runs. Once running, the handler executes
    /// on its own task and receives `cancel` to observe cooperatively. If
    /// `cancel` fires while it runs, [`DispatchError::Canceled`] is returned
    /// at once and the handler keeps its slot until it actually returns. A
    /// panic in the handler becomes [`DispatchError::Faulted`].
    pub async fn submit<F, Fut, T, E>(
        &self,
        mode: RequestMode,
        cancel: &CancellationSignal,
        handler: F,
    ) -> Result<T, DispatchError<E>>
    where
        F: FnOnce(CancellationSignal) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let permit = self.admit::<E>(mode, cancel).await?;
        let work = handler(cancel.clone());
        let mut task = tokio::spawn(async move {
            let out = work.await;
            drop(permit);
            out
        });

        tokio::select! {
            biased;
            joined = &mut task => match joined {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(DispatchError::Handler(e)),
                Err(e) if e.is_panic() => {
                    let msg = panic_message(e.into_panic());
                    warn!(?mode, panic = %msg, "request handler panicked");
                    Err(DispatchError::Faulted(msg))
                }
                Err(_) => Err(DispatchError::Canceled),
            },
            _ = cancel.cancelled() => {
                debug!(?mode, "running request canceled");
                Err(DispatchError::Canceled)
            }
        }
    }

    async fn admit<E>(
        &self,
        mode: RequestMode,
        cancel: &CancellationSignal,
    ) -> Result<Permit, DispatchError<E>> {
        if cancel.is_cancelled() {
            return Err(DispatchError::Canceled);
        }
        let (ticket, mut rx) = {
            let mut state = self.shared.lock().expect("lock poisoned");
            if state.shutdown {
                return Err(DispatchError::QueueRejected);
            }
            if state.queue.is_empty() && state.can_start(mode) {
                state.start(mode);
                return Ok(Permit {
                    shared: Arc::clone(&self.shared),
                    mode,
                });
            }
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            let (tx, rx) = oneshot::channel();
            state.queue.push_back(Waiter {
                ticket,
                mode,
                admit: tx,
            });
            debug!(?mode, ticket, queued = state.queue.len(), "request queued");
            (ticket, rx)
        };

        tokio::select! {
            biased;
            admitted = &mut rx => admitted.map_err(|_| DispatchError::QueueRejected),
            _ = cancel.cancelled() => {
                let (removed, admitted) = {
                    let mut state = self.shared.lock().expect("lock poisoned");
                    let position = state.queue.iter().position(|w| w.ticket == ticket);
                    let removed = position.and_then(|i| state.queue.remove(i)).is_some();
                    // Requests held back only by this one may start now.
                    let admitted = if removed { state.pump(&self.shared) } else { Vec::new() };
                    (removed, admitted)
                };
                deliver(admitted);
                if !removed {
                    // Admitted concurrently: give the slot back.
                    rx.close();
                    if let Ok(permit) = rx.try_recv() {
                        drop(permit);
                    }
                }
                debug!(?mode, ticket, "queued request canceled");
                Err(DispatchError::Canceled)
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock().expect("lock poisoned");
        f.debug_struct("Dispatcher")
            .field("running", &state.running)
            .field("queued", &state.queue.len())
            .field("shutdown", &state.shutdown)
            .finish()
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
