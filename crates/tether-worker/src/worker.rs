use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tether_cache::{CacheKey, CacheStats, ResultCache};
use tether_dispatch::{Dispatcher, RequestMode};
use tether_protocol::methods::{INVOKE, RELEASE_PIN, SET_PRIMARY_SOLUTION, SYNCHRONIZE_SOLUTION};
use tether_protocol::{
    decode_params, encode_params, InvokeParams, ReleasePinParams, RemoteError, SetPrimaryParams,
    SetPrimaryResult, SynchronizeParams, SynchronizeResult,
};
use tether_rpc::{RequestHandler, RpcConnection};
use tether_store::ContentStore;
use tether_sync::{AssetSource, PinGuard, PinTable, SyncEngine};
use tether_types::{CancellationSignal, Checksum, PinId, SnapshotVersion};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::service::{LanguageService, MethodDescriptor};
use crate::source::RpcAssetSource;

struct WorkerInner {
    engine: SyncEngine,
    dispatcher: Dispatcher,
    cache: ResultCache<Value>,
    service: Arc<dyn LanguageService>,
    methods: HashMap<String, MethodDescriptor>,
    /// Snapshot made primary by `set-primary-solution`.
    primary: Mutex<Option<PinGuard>>,
}

/// Serves one host connection.
///
/// Every request runs through the dispatcher: `synchronize-solution` and
/// read-only service methods run together, `set-primary-solution` and
/// mutating service methods run alone.
#[derive(Clone)]
pub struct WorkerService {
    inner: Arc<WorkerInner>,
}

impl WorkerService {
    pub fn new(
        store: Arc<dyn ContentStore>,
        source: Arc<dyn AssetSource>,
        service: Arc<dyn LanguageService>,
        cache_capacity: usize,
    ) -> Self {
        let pins = PinTable::new(Arc::clone(&store));
        let methods = service
            .methods()
            .into_iter()
            .map(|d| (d.name.clone(), d))
            .collect();
        Self {
            inner: Arc::new(WorkerInner {
                engine: SyncEngine::new(store, source, pins),
                dispatcher: Dispatcher::new(),
                cache: ResultCache::new(cache_capacity),
                service,
                methods,
                primary: Mutex::new(None),
            }),
        }
    }

    pub fn pins(&self) -> &Arc<PinTable> {
        self.inner.engine.pins()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    /// Checksum of the primary snapshot, if one is set.
    pub fn primary(&self) -> Option<Checksum> {
        self.inner
            .primary
            .lock()
            .expect("lock poisoned")
            .as_ref()
            .map(PinGuard::checksum)
    }

    /// Resolve and pin a snapshot, leasing the pin to the caller.
    ///
    /// The lease is taken only once the request has completed, so a
    /// request canceled at any point leaves no pin behind.
    pub async fn synchronize(
        &self,
        params: SynchronizeParams,
        cancel: &CancellationSignal,
    ) -> WorkerResult<SynchronizeResult> {
        let inner = Arc::clone(&self.inner);
        let checksum = params.checksum;
        let (guard, report) = self
            .inner
            .dispatcher
            .submit(RequestMode::ReadOnly, cancel, move |cancel| async move {
                let resolved = inner
                    .engine
                    .synchronize(params.checksum, params.version, &cancel)
                    .await?;
                Ok::<_, WorkerError>(resolved)
            })
            .await?;
        if cancel.is_cancelled() {
            return Err(WorkerError::Canceled);
        }
        let pin = self.inner.engine.pins().lease(guard);
        Ok(SynchronizeResult {
            pin,
            checksum,
            fetched: report.fetched,
            whole_snapshot_hit: report.whole_snapshot_hit,
        })
    }

    /// Run a language-service method against a snapshot.
    pub async fn invoke(
        &self,
        params: InvokeParams,
        cancel: &CancellationSignal,
    ) -> WorkerResult<Value> {
        let descriptor = self
            .inner
            .methods
            .get(&params.method)
            .cloned()
            .ok_or_else(|| WorkerError::MethodNotFound(params.method.clone()))?;
        let inner = Arc::clone(&self.inner);
        let value = self
            .inner
            .dispatcher
            .submit(descriptor.mode, cancel, move |cancel| async move {
                inner.run_invoke(&descriptor, params, cancel).await
            })
            .await?;
        Ok(value)
    }

    /// Make a snapshot the primary one. Runs exclusively.
    pub async fn set_primary(
        &self,
        params: SetPrimaryParams,
        cancel: &CancellationSignal,
    ) -> WorkerResult<SetPrimaryResult> {
        let inner = Arc::clone(&self.inner);
        let result = self
            .inner
            .dispatcher
            .submit(RequestMode::Mutating, cancel, move |cancel| async move {
                let (guard, _) = inner
                    .engine
                    .synchronize(params.checksum, params.version, &cancel)
                    .await?;
                let old = inner
                    .primary
                    .lock()
                    .expect("lock poisoned")
                    .replace(guard);
                let previous = old.as_ref().map(PinGuard::checksum);
                drop(old);
                info!(checksum = %params.checksum, ?previous, "primary solution set");
                Ok::<_, WorkerError>(SetPrimaryResult { previous })
            })
            .await?;
        Ok(result)
    }

    /// Drop one lease taken by `synchronize`.
    pub fn release_pin(&self, pin: PinId) -> bool {
        let released = self.inner.engine.pins().release_lease(pin);
        if !released {
            debug!(%pin, "release of unknown pin");
        }
        released
    }

    /// Reject queued and future requests and drop every pin held on the
    /// host's behalf.
    pub fn shutdown(&self) {
        self.inner.dispatcher.shutdown();
        let leases = self.inner.engine.pins().clear_leases();
        let primary = self.inner.primary.lock().expect("lock poisoned").take();
        drop(primary);
        info!(leases, "worker shut down");
    }

    async fn route(
        &self,
        method: &str,
        params: Value,
        cancel: &CancellationSignal,
    ) -> WorkerResult<Value> {
        match method {
            SYNCHRONIZE_SOLUTION => {
                let result = self.synchronize(decode_params(params)?, cancel).await?;
                Ok(encode_params(&result)?)
            }
            INVOKE => self.invoke(decode_params(params)?, cancel).await,
            SET_PRIMARY_SOLUTION => {
                let result = self.set_primary(decode_params(params)?, cancel).await?;
                Ok(encode_params(&result)?)
            }
            other => Err(WorkerError::MethodNotFound(other.to_string())),
        }
    }
}

impl WorkerInner {
    async fn run_invoke(
        &self,
        descriptor: &MethodDescriptor,
        params: InvokeParams,
        cancel: CancellationSignal,
    ) -> WorkerResult<Value> {
        let key = descriptor
            .cacheable
            .then(|| CacheKey::for_request(&params.method, &params.params, params.checksum));
        if let Some(hit) = key.as_ref().and_then(|k| self.cache.get(k)) {
            debug!(method = %params.method, checksum = %params.checksum, "result cache hit");
            return Ok(hit);
        }

        let guard = self
            .resolve(params.checksum, params.version, params.pin, &cancel)
            .await?;
        let snapshot = Arc::clone(guard.snapshot());
        let value = self
            .service
            .execute(&params.method, snapshot, params.params, cancel)
            .await?;
        drop(guard);

        if let Some(key) = key {
            self.cache.put(key, value.clone());
        }
        Ok(value)
    }

    /// Pin the snapshot for one call, reusing a leased pin when it still
    /// names the same checksum.
    async fn resolve(
        &self,
        checksum: Checksum,
        version: SnapshotVersion,
        pin: Option<PinId>,
        cancel: &CancellationSignal,
    ) -> WorkerResult<PinGuard> {
        if let Some(id) = pin {
            match self.engine.pins().acquire_by_id(id) {
                Some(guard) if guard.checksum() == checksum => return Ok(guard),
                _ => debug!(pin = %id, "stale pin, resolving by checksum"),
            }
        }
        let (guard, _) = self.engine.synchronize(checksum, version, cancel).await?;
        Ok(guard)
    }
}

#[async_trait]
impl RequestHandler for WorkerService {
    async fn handle_request(
        &self,
        method: &str,
        params: Value,
        cancel: CancellationSignal,
    ) -> Result<Value, RemoteError> {
        self.route(method, params, &cancel).await.map_err(|e| {
            debug!(method, error = %e, "request failed");
            e.into_remote()
        })
    }

    async fn handle_notification(&self, method: &str, params: Value) {
        match method {
            RELEASE_PIN => match decode_params::<ReleasePinParams>(params) {
                Ok(p) => {
                    self.release_pin(p.pin);
                }
                Err(e) => warn!(error = %e, "bad release-pin notification"),
            },
            other => debug!(method = other, "ignoring notification"),
        }
    }
}

impl std::fmt::Debug for WorkerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerService")
            .field("pins", self.pins())
            .field("dispatcher", &self.inner.dispatcher.state())
            .field("cache", &self.inner.cache)
            .finish()
    }
}

/// Serve a host connection until it closes.
pub async fn serve<R, W>(
    reader: R,
    writer: W,
    config: &WorkerConfig,
    service: Arc<dyn LanguageService>,
) -> WorkerResult<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let store: Arc<dyn ContentStore> = config.open_store()?;
    let mut worker = None;
    let connection = RpcConnection::spawn("worker", reader, writer, |client| {
        let source = Arc::new(RpcAssetSource::new(client));
        let service = WorkerService::new(store, source, service, config.cache_capacity);
        worker = Some(service.clone());
        service
    });
    info!("worker serving");

    connection.client().closed().await;
    if let Some(worker) = worker {
        worker.shutdown();
    }
    connection.shutdown().await;
    info!("worker connection closed");
    Ok(())
}

/// Serve a host connection over stdin and stdout.
pub async fn serve_stdio(config: &WorkerConfig, service: Arc<dyn LanguageService>) -> WorkerResult<()> {
    serve(tokio::io::stdin(), tokio::io::stdout(), config, service).await
}
