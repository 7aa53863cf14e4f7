use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tether_protocol::methods::{INVOKE, RELEASE_PIN, SET_PRIMARY_SOLUTION, SYNCHRONIZE_SOLUTION};
use tether_protocol::{
    InvokeParams, ReleasePinParams, SetPrimaryResult, SynchronizeParams, SynchronizeResult,
    MAX_ASSET_BATCH_BYTES,
};
use tether_registry::{GlobalOperationEvent, GlobalOperationRegistry};
use tether_rpc::{RpcClient, RpcConnection, RpcError};
use tether_snapshot::Snapshot;
use tether_store::ContentStore;
use tether_types::{CancellationSignal, Checksum, PinId};
use tokio::process::Child;
use tracing::{debug, info, warn};

use crate::assets::HostAssetService;
use crate::error::{HostError, HostResult};
use crate::launcher::WorkerLauncher;

/// A snapshot pinned on a particular worker generation.
///
/// Only meaningful to the worker that issued it; after a worker is
/// replaced the handle is ignored and calls resolve by checksum.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemotePin {
    pin: PinId,
    checksum: Checksum,
    generation: u64,
    fetched: usize,
    whole_snapshot_hit: bool,
}

impl RemotePin {
    pub fn id(&self) -> PinId {
        self.pin
    }

    pub fn checksum(&self) -> Checksum {
        self.checksum
    }

    /// Worker generation that issued the pin.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Nodes the worker pulled to resolve the snapshot.
    pub fn fetched(&self) -> usize {
        self.fetched
    }

    pub fn whole_snapshot_hit(&self) -> bool {
        self.whole_snapshot_hit
    }
}

struct WorkerHandle {
    generation: u64,
    connection: RpcConnection,
    process: Mutex<Option<Child>>,
}

impl WorkerHandle {
    fn client(&self) -> &RpcClient {
        self.connection.client()
    }

    fn kill(&self) {
        let process = self.process.lock().expect("lock poisoned").take();
        if let Some(mut child) = process {
            if let Err(e) = child.start_kill() {
                debug!(generation = self.generation, error = %e, "worker process already gone");
            }
        }
    }
}

/// Keeps a snapshot's nodes in the host store while a call that names it
/// is in flight. Nodes evicted since the snapshot was built are put back.
struct SnapshotHold<'a> {
    store: &'a dyn ContentStore,
    checksums: Vec<Checksum>,
}

impl<'a> SnapshotHold<'a> {
    fn new(store: &'a dyn ContentStore, snapshot: &Snapshot) -> HostResult<Self> {
        let checksums = snapshot.all_checksums();
        store.retain(&checksums);
        let hold = Self { store, checksums };
        let republished = snapshot.publish(store)?;
        if republished > 0 {
            debug!(checksum = %snapshot.checksum(), republished, "republished evicted nodes");
        }
        Ok(hold)
    }
}

impl Drop for SnapshotHold<'_> {
    fn drop(&mut self) {
        self.store.release(&self.checksums);
    }
}

/// The host's view of its worker.
///
/// The worker is launched on first use and replaced when its connection
/// is lost. A call failing with `ConnectionLost` or `SyncFailed` is
/// retried exactly once against a fresh worker; a second failure is
/// returned to the caller.
pub struct RemoteHost {
    store: Arc<dyn ContentStore>,
    launcher: Arc<dyn WorkerLauncher>,
    registry: GlobalOperationRegistry,
    worker: tokio::sync::Mutex<Option<Arc<WorkerHandle>>>,
    generation: AtomicU64,
    served: Arc<AtomicUsize>,
    asset_batch_bytes: usize,
}

impl RemoteHost {
    pub fn new(
        store: Arc<dyn ContentStore>,
        launcher: Arc<dyn WorkerLauncher>,
        registry: GlobalOperationRegistry,
    ) -> Self {
        Self {
            store,
            launcher,
            registry,
            worker: tokio::sync::Mutex::new(None),
            generation: AtomicU64::new(0),
            served: Arc::new(AtomicUsize::new(0)),
            asset_batch_bytes: MAX_ASSET_BATCH_BYTES,
        }
    }

    /// Payload bytes per `fetch-assets` reply sent to workers.
    pub fn with_asset_batch_bytes(mut self, bytes: usize) -> Self {
        self.asset_batch_bytes = bytes;
        self
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    pub fn registry(&self) -> &GlobalOperationRegistry {
        &self.registry
    }

    /// Number of workers launched so far.
    pub fn launches(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Nodes served to workers so far.
    pub fn assets_served(&self) -> usize {
        self.served.load(Ordering::Relaxed)
    }

    /// Resolve and pin `snapshot` on the worker.
    pub async fn synchronize(
        &self,
        snapshot: &Snapshot,
        cancel: &CancellationSignal,
    ) -> HostResult<RemotePin> {
        let _hold = SnapshotHold::new(self.store.as_ref(), snapshot)?;
        let params = SynchronizeParams {
            checksum: snapshot.checksum(),
            version: snapshot.version(),
        };
        let (result, generation): (SynchronizeResult, u64) = self
            .call(SYNCHRONIZE_SOLUTION, cancel, |_| params.clone())
            .await?;
        debug!(
            checksum = %result.checksum,
            pin = %result.pin,
            fetched = result.fetched,
            whole_snapshot_hit = result.whole_snapshot_hit,
            "snapshot synchronized"
        );
        Ok(RemotePin {
            pin: result.pin,
            checksum: result.checksum,
            generation,
            fetched: result.fetched,
            whole_snapshot_hit: result.whole_snapshot_hit,
        })
    }

    /// Run a language-service method against `snapshot`. `pin` skips
    /// resolution when it was issued by the current worker for the same
    /// snapshot.
    pub async fn invoke(
        &self,
        snapshot: &Snapshot,
        method: &str,
        params: Value,
        pin: Option<&RemotePin>,
        cancel: &CancellationSignal,
    ) -> HostResult<Value> {
        let _hold = SnapshotHold::new(self.store.as_ref(), snapshot)?;
        let checksum = snapshot.checksum();
        let version = snapshot.version();
        let (value, _): (Value, u64) = self
            .call(INVOKE, cancel, |generation| InvokeParams {
                method: method.to_string(),
                checksum,
                version,
                pin: pin
                    .filter(|p| p.generation == generation && p.checksum == checksum)
                    .map(RemotePin::id),
                params: params.clone(),
            })
            .await?;
        Ok(value)
    }

    /// Make `snapshot` the worker's primary snapshot. Returns the previous
    /// primary checksum on the same worker.
    pub async fn set_primary(
        &self,
        snapshot: &Snapshot,
        cancel: &CancellationSignal,
    ) -> HostResult<Option<Checksum>> {
        let _hold = SnapshotHold::new(self.store.as_ref(), snapshot)?;
        let params = SynchronizeParams {
            checksum: snapshot.checksum(),
            version: snapshot.version(),
        };
        let (result, _): (SetPrimaryResult, u64) = self
            .call(SET_PRIMARY_SOLUTION, cancel, |_| params.clone())
            .await?;
        Ok(result.previous)
    }

    /// Release a pin. A pin from a replaced worker is already gone.
    pub async fn release_pin(&self, pin: RemotePin) -> HostResult<()> {
        let slot = self.worker.lock().await;
        let Some(worker) = slot.as_ref().filter(|w| w.generation == pin.generation) else {
            debug!(pin = %pin.pin, generation = pin.generation, "pin belongs to a replaced worker");
            return Ok(());
        };
        match worker.client().notify(RELEASE_PIN, &ReleasePinParams { pin: pin.pin }) {
            Ok(()) | Err(RpcError::ConnectionLost) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Warm the worker with `snapshot` in the background.
    ///
    /// Waits until no global operation is running, and stands down if one
    /// starts while the sync is in flight. Returns the number of nodes the
    /// worker pulled, or `None` if it stood down.
    pub async fn prefetch(
        &self,
        snapshot: &Snapshot,
        cancel: &CancellationSignal,
    ) -> HostResult<Option<usize>> {
        let mut events = loop {
            self.registry.wait_idle().await;
            let events = self.registry.subscribe();
            if !self.registry.is_active() {
                break events;
            }
        };

        let stand_down = CancellationSignal::new();
        let mut interrupted = false;
        let sync = self.synchronize(snapshot, &stand_down);
        tokio::pin!(sync);
        let outcome = loop {
            tokio::select! {
                out = &mut sync => break out,
                event = events.recv(), if !stand_down.is_cancelled() => {
                    if !matches!(event, Ok(GlobalOperationEvent::Stopped { .. })) {
                        interrupted = true;
                        stand_down.cancel();
                    }
                }
                _ = cancel.cancelled(), if !stand_down.is_cancelled() => stand_down.cancel(),
            }
        };

        match outcome {
            Ok(pin) => {
                let fetched = pin.fetched;
                self.release_pin(pin).await?;
                info!(checksum = %snapshot.checksum(), fetched, "prefetch complete");
                Ok(Some(fetched))
            }
            Err(HostError::Canceled) if interrupted => {
                info!(checksum = %snapshot.checksum(), "prefetch stood down for a global operation");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Close the worker connection and stop its process.
    pub async fn shutdown(&self) {
        let worker = self.worker.lock().await.take();
        let Some(worker) = worker else {
            return;
        };
        worker.client().close();
        let process = worker.process.lock().expect("lock poisoned").take();
        if let Some(mut child) = process {
            if let Err(e) = child.kill().await {
                debug!(error = %e, "worker process already gone");
            }
        }
        info!(generation = worker.generation, "worker shut down");
    }

    /// Issue a request, retrying once on a fresh worker after a
    /// retryable failure. `params` is rebuilt per attempt from the worker
    /// generation it is sent to.
    async fn call<P, R, F>(
        &self,
        method: &str,
        cancel: &CancellationSignal,
        params: F,
    ) -> HostResult<(R, u64)>
    where
        P: Serialize,
        R: DeserializeOwned,
        F: Fn(u64) -> P,
    {
        let mut retried = false;
        loop {
            let worker = self.worker().await?;
            let outcome = worker
                .client()
                .call::<P, R>(method, &params(worker.generation), cancel)
                .await
                .map_err(HostError::from);
            match outcome {
                Ok(value) => return Ok((value, worker.generation)),
                Err(e) if e.is_retryable() => {
                    self.discard(&worker).await;
                    if retried {
                        warn!(method, error = %e, "worker failed again after retry");
                        return Err(e);
                    }
                    warn!(method, error = %e, generation = worker.generation, "worker failed, retrying on a new worker");
                    retried = true;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// The live worker, launching one if needed.
    async fn worker(&self) -> HostResult<Arc<WorkerHandle>> {
        let mut slot = self.worker.lock().await;
        if let Some(worker) = slot.as_ref() {
            if !worker.client().is_closed() {
                return Ok(Arc::clone(worker));
            }
            debug!(generation = worker.generation, "replacing closed worker");
            worker.kill();
        }

        let streams = self.launcher.launch().await?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let store = Arc::clone(&self.store);
        let served = Arc::clone(&self.served);
        let batch_bytes = self.asset_batch_bytes;
        let connection = RpcConnection::spawn(
            format!("host/worker-{generation}"),
            streams.reader,
            streams.writer,
            move |_| HostAssetService::with_counter(store, served).with_batch_bytes(batch_bytes),
        );
        info!(generation, "worker launched");

        let worker = Arc::new(WorkerHandle {
            generation,
            connection,
            process: Mutex::new(streams.process),
        });
        *slot = Some(Arc::clone(&worker));
        Ok(worker)
    }

    async fn discard(&self, worker: &WorkerHandle) {
        {
            let mut slot = self.worker.lock().await;
            if slot.as_ref().is_some_and(|w| w.generation == worker.generation) {
                *slot = None;
            }
        }
        worker.client().close();
        worker.kill();
        info!(generation = worker.generation, "worker discarded");
    }
}

impl std::fmt::Debug for RemoteHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteHost")
            .field("launches", &self.launches())
            .field("assets_served", &self.assets_served())
            .finish()
    }
}
