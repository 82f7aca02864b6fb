//! Offline cache controller.
//!
//! Implements the worker's three lifecycle handlers:
//!
//! - **install**: fetch every static asset and store them in the versioned
//!   cache. Any failure aborts the install and nothing is written.
//! - **activate**: delete every cache whose name is not the current one.
//! - **fetch**: navigations go to the network first and fall back to the
//!   offline page; everything else is served cache-first, with misses written
//!   back to the cache in the background.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use errqr_net::{Fetch, Request, Response};
use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheEntry, CacheKey, CacheStorage};
use crate::config::SwConfig;
use crate::SwError;

/// Result of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    /// Assets stored, in configuration order.
    pub cached: Vec<Url>,
    /// Activate right away instead of waiting for open pages to close.
    pub skip_waiting: bool,
}

/// Result of a successful activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivateOutcome {
    /// Names of the caches that were removed.
    pub deleted: Vec<String>,
    /// Take control of already open pages.
    pub claim_clients: bool,
}

/// Lifecycle callbacks of a worker, free of any platform event types.
#[async_trait]
pub trait LifecycleHandler: Send + Sync {
    /// Name of the cache this worker version owns.
    fn version(&self) -> &str;

    async fn on_install(&self) -> Result<InstallOutcome, SwError>;

    async fn on_activate(&self) -> Result<ActivateOutcome, SwError>;

    /// Answer an intercepted request. Never fails; every failure degrades to
    /// a fallback response.
    async fn on_fetch(&self, request: Request) -> Response;
}

/// The errqr offline cache controller.
pub struct OfflineCacheController {
    config: SwConfig,
    asset_urls: Vec<Url>,
    offline_key: CacheKey,
    caches: Arc<dyn CacheStorage>,
    network: Arc<dyn Fetch>,
    pending_writes: Mutex<Vec<JoinHandle<()>>>,
}

impl OfflineCacheController {
    /// Create a controller. Fails if the configuration is unusable.
    pub fn new(
        config: SwConfig,
        caches: Arc<dyn CacheStorage>,
        network: Arc<dyn Fetch>,
    ) -> Result<Self, SwError> {
        config.validate()?;
        let asset_urls = config.asset_urls()?;
        let offline_key = CacheKey::get(&config.resolve(&config.offline_page)?);

        Ok(Self {
            config,
            asset_urls,
            offline_key,
            caches,
            network,
            pending_writes: Mutex::new(Vec::new()),
        })
    }

    pub fn caches(&self) -> &Arc<dyn CacheStorage> {
        &self.caches
    }

    /// Wait for background cache writes started so far.
    pub async fn flush(&self) {
        let handles: Vec<JoinHandle<()>> = match self.pending_writes.lock() {
            Ok(mut pending) => pending.drain(..).collect(),
            Err(_) => return,
        };
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Fetch one static asset for install. Error statuses count as failures.
    async fn fetch_asset(&self, url: &Url) -> Result<(CacheKey, CacheEntry), SwError> {
        let request = Request::get(url.clone());
        let response = self
            .network
            .fetch(&request)
            .await
            .map_err(|e| SwError::InstallFailed(format!("{url}: {e}")))?;
        if !response.ok() {
            return Err(SwError::InstallFailed(format!(
                "{url}: status {}",
                response.status
            )));
        }
        let key = CacheKey::for_request(&request);
        let entry = CacheEntry::from_response(&key, &response);
        Ok((key, entry))
    }

    /// Network-first with the offline page as fallback. Never cached.
    async fn respond_navigation(&self, request: &Request) -> Response {
        match self.network.fetch(request).await {
            Ok(response) => {
                debug!(url = %request.url, status = %response.status, "Navigation from network");
                response
            }
            Err(e) => {
                info!(url = %request.url, error = %e, "Navigation offline, serving offline page");
                self.offline_page().await
            }
        }
    }

    async fn offline_page(&self) -> Response {
        match self
            .caches
            .match_request(&self.config.cache_name, &self.offline_key)
            .await
        {
            Ok(Some(entry)) => entry.to_response(),
            Ok(None) => {
                warn!(key = %self.offline_key, "Offline page missing from cache");
                Response::gateway_timeout()
            }
            Err(e) => {
                warn!(key = %self.offline_key, error = %e, "Offline page lookup failed");
                Response::gateway_timeout()
            }
        }
    }

    /// Cache-first; misses are fetched and written back in the background.
    async fn respond_subresource(&self, request: &Request) -> Response {
        let key = CacheKey::for_request(request);

        match self.caches.match_request(&self.config.cache_name, &key).await {
            Ok(Some(entry)) => {
                debug!(%key, "Cache hit");
                return entry.to_response();
            }
            Ok(None) => debug!(%key, "Cache miss"),
            Err(e) => debug!(%key, error = %e, "Cache lookup failed, treating as miss"),
        }

        match self.network.fetch(request).await {
            Ok(response) => {
                self.store_in_background(key, &response);
                response
            }
            Err(e) => {
                debug!(%key, error = %e, "Sub-resource unreachable");
                Response::gateway_timeout()
            }
        }
    }

    /// Best-effort copy into the cache. Failures are logged and dropped.
    fn store_in_background(&self, key: CacheKey, response: &Response) {
        let entry = CacheEntry::from_response(&key, response);
        let caches = Arc::clone(&self.caches);
        let name = self.config.cache_name.clone();

        let handle = tokio::spawn(async move {
            let result = async {
                caches.open(&name).await?;
                caches.put(&name, key.clone(), entry).await
            }
            .await;

            // TODO: count dropped writes once errqr reports metrics.
            if let Err(e) = result {
                debug!(%key, error = %e, "Background cache write dropped");
            }
        });

        if let Ok(mut pending) = self.pending_writes.lock() {
            pending.retain(|h| !h.is_finished());
            pending.push(handle);
        }
    }
}

#[async_trait]
impl LifecycleHandler for OfflineCacheController {
    fn version(&self) -> &str {
        &self.config.cache_name
    }

    async fn on_install(&self) -> Result<InstallOutcome, SwError> {
        info!(cache = %self.config.cache_name, assets = self.asset_urls.len(), "Installing");

        let fetched = join_all(self.asset_urls.iter().map(|url| self.fetch_asset(url))).await;
        let entries = match fetched.into_iter().collect::<Result<Vec<_>, SwError>>() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(cache = %self.config.cache_name, error = %e, "Install aborted");
                return Err(e);
            }
        };

        let name = &self.config.cache_name;
        let existed = self.caches.has(name).await.unwrap_or(true);
        self.caches.open(name).await?;
        if let Err(e) = self.caches.put_all(name, entries).await {
            warn!(cache = %name, error = %e, "Install write failed");
            if !existed {
                if let Err(cleanup) = self.caches.delete(name).await {
                    warn!(cache = %name, error = %cleanup, "Partial cache not removed");
                }
            }
            return Err(e);
        }

        info!(cache = %self.config.cache_name, "Installed");
        Ok(InstallOutcome {
            cached: self.asset_urls.clone(),
            skip_waiting: true,
        })
    }

    async fn on_activate(&self) -> Result<ActivateOutcome, SwError> {
        let mut deleted = Vec::new();
        for name in self.caches.keys().await? {
            if name != self.config.cache_name {
                if self.caches.delete(&name).await? {
                    info!(cache = %name, "Deleted stale cache");
                }
                deleted.push(name);
            }
        }

        Ok(ActivateOutcome {
            deleted,
            claim_clients: true,
        })
    }

    async fn on_fetch(&self, request: Request) -> Response {
        if request.is_navigation() {
            self.respond_navigation(&request).await
        } else {
            self.respond_subresource(&request).await
        }
    }
}
