//! Asynchronous metadata fetching with at most one fetch in flight per app.
//!
//! [`MetadataFetcher::fetch`] returns immediately with a [`FetchHandle`]. While
//! a fetch for an app is pending, every caller receives a clone of the same
//! handle; once it has completed (or was cancelled) the next call starts a
//! fresh fetch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::app::App;
use crate::cache::MetadataCache;
use crate::error::{Result, UpdaterError};
use crate::platform::DeviceEnvironment;
use crate::release::AvailableMetadata;
use crate::upstream::Upstreams;

type Outcome = std::result::Result<AvailableMetadata, Arc<UpdaterError>>;

struct HandleState {
    app: App,
    result: watch::Receiver<Option<Outcome>>,
    abort: Mutex<Option<AbortHandle>>,
    cancelled: AtomicBool,
}

/// Shared view on one metadata fetch.
#[derive(Clone)]
pub struct FetchHandle {
    state: Arc<HandleState>,
}

impl FetchHandle {
    fn spawn<F>(runtime: &Handle, app: App, work: F) -> Self
    where
        F: std::future::Future<Output = Result<AvailableMetadata>> + Send + 'static,
    {
        let (tx, rx) = watch::channel(None);
        let handle = Self {
            state: Arc::new(HandleState {
                app,
                result: rx,
                abort: Mutex::new(None),
                cancelled: AtomicBool::new(false),
            }),
        };
        let task = runtime.spawn(async move {
            let outcome = work.await.map_err(Arc::new);
            tx.send_replace(Some(outcome));
        });
        *handle
            .state
            .abort
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task.abort_handle());
        handle
    }

    pub fn app(&self) -> App {
        self.state.app
    }

    /// Wait for the result. Failures are shared between all clones.
    pub async fn wait(&self) -> Result<AvailableMetadata> {
        let mut result = self.state.result.clone();
        loop {
            let current = result.borrow_and_update().clone();
            if let Some(outcome) = current {
                return outcome.map_err(UpdaterError::Fetch);
            }
            if result.changed().await.is_err() {
                // The task went away without publishing: aborted or panicked.
                return Err(if self.is_cancelled() {
                    UpdaterError::Cancelled
                } else {
                    UpdaterError::validation(format!("fetch for {} ended without result", self.app()))
                });
            }
        }
    }

    pub async fn wait_timeout(&self, timeout: Duration) -> Result<AvailableMetadata> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| UpdaterError::Timeout(timeout))?
    }

    /// Result without waiting, if there is one.
    pub fn try_result(&self) -> Option<Result<AvailableMetadata>> {
        let current = self.state.result.borrow().clone();
        current.map(|outcome| outcome.map_err(UpdaterError::Fetch))
    }

    pub fn is_done(&self) -> bool {
        self.state.result.borrow().is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Cancel a pending fetch. Returns false if it had already completed.
    pub fn cancel(&self) -> bool {
        if self.is_done() {
            return false;
        }
        self.state.cancelled.store(true, Ordering::SeqCst);
        if let Some(abort) = self
            .state
            .abort
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            abort.abort();
        }
        true
    }

    /// True when both handles observe the same fetch.
    pub fn ptr_eq(&self, other: &FetchHandle) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    fn is_pending(&self) -> bool {
        !self.is_done() && !self.is_cancelled()
    }
}

impl std::fmt::Debug for FetchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchHandle")
            .field("app", &self.app())
            .field("done", &self.is_done())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Resolves [`AvailableMetadata`] for catalog apps on a tokio runtime.
pub struct MetadataFetcher {
    upstreams: Arc<Upstreams>,
    device: Arc<DeviceEnvironment>,
    cache: Option<MetadataCache>,
    runtime: Handle,
    handles: Mutex<HashMap<App, FetchHandle>>,
}

impl MetadataFetcher {
    /// Create a fetcher spawning onto the current tokio runtime.
    pub fn new(upstreams: Upstreams, device: Arc<DeviceEnvironment>) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|err| UpdaterError::validation(format!("no tokio runtime: {err}")))?;
        Ok(Self::with_runtime(upstreams, device, runtime))
    }

    pub fn with_runtime(upstreams: Upstreams, device: Arc<DeviceEnvironment>, runtime: Handle) -> Self {
        Self {
            upstreams: Arc::new(upstreams),
            device,
            cache: None,
            runtime,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Consult and fill `cache` on every fetch.
    pub fn with_cache(mut self, cache: MetadataCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn device(&self) -> &DeviceEnvironment {
        &self.device
    }

    /// Start (or join) fetches for every app in `apps`.
    pub fn fetch_metadata<I>(&self, apps: I) -> HashMap<App, FetchHandle>
    where
        I: IntoIterator<Item = App>,
    {
        apps.into_iter().map(|app| (app, self.fetch(app))).collect()
    }

    /// Handle of the pending fetch for `app`, or of a newly started one.
    pub fn fetch(&self, app: App) -> FetchHandle {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = handles.get(&app).filter(|handle| handle.is_pending()) {
            debug!(%app, "joining in-flight fetch");
            return existing.clone();
        }

        let work = resolve(
            app,
            self.upstreams.clone(),
            self.device.clone(),
            self.cache.clone(),
        );
        let handle = FetchHandle::spawn(&self.runtime, app, work);
        handles.insert(app, handle.clone());
        handle
    }

    /// Cancel every pending fetch and forget all handles.
    pub fn shutdown(&self) {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        for (app, handle) in handles.drain() {
            if handle.cancel() {
                debug!(%app, "cancelled pending fetch");
            }
        }
    }
}

async fn resolve(
    app: App,
    upstreams: Arc<Upstreams>,
    device: Arc<DeviceEnvironment>,
    cache: Option<MetadataCache>,
) -> Result<AvailableMetadata> {
    let platform = device.platform_for(app)?;
    if let Some(cache) = &cache {
        if let Some(cached) = cache.get(app, platform)? {
            return Ok(cached);
        }
    }

    let metadata = upstreams.resolve(app.spec(), platform).await?;
    let actual = metadata.release_id().kind();
    if actual != app.release_id_kind() {
        return Err(UpdaterError::ReleaseIdMismatch {
            app,
            expected: app.release_id_kind(),
            actual,
        });
    }
    info!(%app, %platform, release_id = %metadata.release_id(), "fetched metadata");

    if let Some(cache) = &cache {
        if let Err(err) = cache.put(app, platform, &metadata) {
            warn!(%app, error = %err, "could not persist metadata");
        }
    }
    Ok(metadata)
}
