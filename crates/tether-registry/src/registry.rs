use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tether_types::OwnerId;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Default capacity of the event channel.
const EVENT_CAPACITY: usize = 64;

/// Transition of the registry between idle and busy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GlobalOperationEvent {
    /// The first operation started while the registry was idle.
    Started { owner: OwnerId },
    /// The last running operation was released; the registry is idle.
    Stopped { owner: OwnerId },
}

/// A receiver of registry transitions.
pub type EventStream = broadcast::Receiver<GlobalOperationEvent>;

struct Inner {
    /// Outstanding registrations per owner.
    active: Mutex<HashMap<OwnerId, usize>>,
    events: broadcast::Sender<GlobalOperationEvent>,
    idle: watch::Sender<bool>,
}

/// Reference-counted registry of in-progress global operations.
#[derive(Clone)]
pub struct GlobalOperationRegistry {
    inner: Arc<Inner>,
}

impl GlobalOperationRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (idle, _) = watch::channel(true);
        Self {
            inner: Arc::new(Inner {
                active: Mutex::new(HashMap::new()),
                events,
                idle,
            }),
        }
    }

    /// Register a running operation. Fires `Started` if the registry was
    /// idle. The operation ends when the registration is released or
    /// dropped.
    pub fn start(&self, owner: OwnerId) -> GlobalOperationRegistration {
        let mut active = self.inner.active.lock().expect("lock poisoned");
        let was_idle = active.is_empty();
        *active.entry(owner).or_insert(0) += 1;
        if was_idle {
            info!(%owner, "global operation started");
            self.inner.idle.send_replace(false);
            // No receivers is fine.
            let _ = self.inner.events.send(GlobalOperationEvent::Started { owner });
        } else {
            debug!(%owner, "nested global operation started");
        }
        GlobalOperationRegistration {
            inner: Arc::clone(&self.inner),
            owner,
            released: false,
        }
    }

    /// Subscribe to `Started`/`Stopped` transitions.
    pub fn subscribe(&self) -> EventStream {
        self.inner.events.subscribe()
    }

    /// Whether any operation is in progress.
    pub fn is_active(&self) -> bool {
        !self.inner.active.lock().expect("lock poisoned").is_empty()
    }

    /// Total outstanding registrations.
    pub fn active_count(&self) -> usize {
        self.inner
            .active
            .lock()
            .expect("lock poisoned")
            .values()
            .sum()
    }

    /// Wait until no operation is in progress. Returns at once when idle.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.idle.subscribe();
        // The sender lives in `inner`, which `self` keeps alive.
        let _ = rx.wait_for(|idle| *idle).await;
    }
}

impl Default for GlobalOperationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GlobalOperationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalOperationRegistry")
            .field("active", &self.active_count())
            .finish()
    }
}

impl Inner {
    fn release(&self, owner: OwnerId) {
        let mut active = self.active.lock().expect("lock poisoned");
        let Some(count) = active.get_mut(&owner) else {
            warn!(%owner, "release of unknown global operation");
            return;
        };
        *count -= 1;
        if *count == 0 {
            active.remove(&owner);
        }
        if active.is_empty() {
            info!(%owner, "global operations stopped");
            self.idle.send_replace(true);
            let _ = self.events.send(GlobalOperationEvent::Stopped { owner });
        }
    }
}

/// Scoped registration of one running global operation.
///
/// Released exactly once: explicitly via [`release`](Self::release) or on
/// drop, so every exit path of the owning operation is covered.
pub struct GlobalOperationRegistration {
    inner: Arc<Inner>,
    owner: OwnerId,
    released: bool,
}

impl GlobalOperationRegistration {
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.inner.release(self.owner);
        }
    }
}

impl Drop for GlobalOperationRegistration {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl std::fmt::Debug for GlobalOperationRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalOperationRegistration")
            .field("owner", &self.owner)
            .finish()
    }
}
