//! # errqr Service Worker
//!
//! Offline cache controller for the errqr error-report form.
//!
//! ## Features
//!
//! - **Lifecycle**: install (pre-cache static assets), activate (drop caches of
//!   older versions), fetch interception
//! - **Fetch policy**: network-first for navigations with an offline page
//!   fallback, cache-first for every other request
//! - **Cache storage**: in-memory and SQLite-backed named caches
//! - **Host**: worker registration state, skip-waiting and client claim
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerHost (platform adapter)
//!     │
//!     └── Registration
//!             ├── installing / waiting / active (ServiceWorker)
//!             └── LifecycleHandler ── OfflineCacheController
//!                                          ├── SwConfig
//!                                          ├── CacheStorage (named caches)
//!                                          └── Fetch (network)
//! ```

use errqr_common::ErrqrError;
use thiserror::Error;

pub mod cache;
pub mod config;
pub mod controller;
pub mod host;
pub mod sqlite;

pub use cache::{CacheEntry, CacheKey, CacheStorage, MemoryCacheStorage};
pub use config::{SwConfig, OFFLINE_PAGE, STATIC_ASSETS, STATIC_CACHE};
pub use controller::{ActivateOutcome, InstallOutcome, LifecycleHandler, OfflineCacheController};
pub use host::{HostEvent, ServiceWorker, ServiceWorkerHost, ServiceWorkerId, ServiceWorkerState};
pub use sqlite::SqliteCacheStorage;

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum SwError {
    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<SwError> for ErrqrError {
    fn from(err: SwError) -> Self {
        match err {
            SwError::NotFound(what) => ErrqrError::NotFound(what),
            SwError::Config(message) => ErrqrError::config(message),
            other => ErrqrError::cache_with_source("service worker", other),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted network fake shared by the controller and host tests.

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use errqr_net::{Fetch, NetError, Request, Response};
    use http::StatusCode;

    use crate::cache::{CacheEntry, CacheKey, CacheStorage, MemoryCacheStorage};
    use crate::SwError;

    /// What the fake network does for a URL.
    #[derive(Clone)]
    pub enum Route {
        Respond(StatusCode, &'static str),
        Fail,
    }

    /// Records every request and answers from a route table.
    #[derive(Default)]
    pub struct FakeNetwork {
        routes: Mutex<HashMap<String, Route>>,
        offline: Mutex<bool>,
        log: Mutex<Vec<String>>,
    }

    impl FakeNetwork {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn route(&self, path: &str, route: Route) {
            self.routes.lock().unwrap().insert(path.to_string(), route);
        }

        pub fn set_offline(&self, offline: bool) {
            *self.offline.lock().unwrap() = offline;
        }

        pub fn calls(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        pub fn calls_to(&self, path: &str) -> usize {
            self.log.lock().unwrap().iter().filter(|p| *p == path).count()
        }
    }

    #[async_trait]
    impl Fetch for FakeNetwork {
        async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
            let path = request.url.path().to_string();
            self.log.lock().unwrap().push(path.clone());

            if *self.offline.lock().unwrap() {
                return Err(NetError::RequestFailed("offline".into()));
            }

            let route = self.routes.lock().unwrap().get(&path).cloned();
            match route {
                Some(Route::Respond(status, body)) => {
                    Ok(Response::new(status, body).with_url(request.url.clone()))
                }
                Some(Route::Fail) => Err(NetError::RequestFailed("connection reset".into())),
                None => Ok(Response::new(StatusCode::NOT_FOUND, "").with_url(request.url.clone())),
            }
        }
    }

    /// In-memory storage whose bulk writes and deletes can be made to fail.
    #[derive(Default)]
    pub struct FlakyStorage {
        inner: MemoryCacheStorage,
        fail_put_all: AtomicBool,
        fail_delete: AtomicBool,
    }

    impl FlakyStorage {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn fail_put_all(&self, fail: bool) {
            self.fail_put_all.store(fail, Ordering::SeqCst);
        }

        pub fn fail_delete(&self, fail: bool) {
            self.fail_delete.store(fail, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl CacheStorage for FlakyStorage {
        async fn open(&self, name: &str) -> Result<(), SwError> {
            self.inner.open(name).await
        }

        async fn has(&self, name: &str) -> Result<bool, SwError> {
            self.inner.has(name).await
        }

        async fn keys(&self) -> Result<Vec<String>, SwError> {
            self.inner.keys().await
        }

        async fn delete(&self, name: &str) -> Result<bool, SwError> {
            if self.fail_delete.load(Ordering::SeqCst) {
                return Err(SwError::CacheError("delete: disk full".into()));
            }
            self.inner.delete(name).await
        }

        async fn match_request(
            &self,
            name: &str,
            key: &CacheKey,
        ) -> Result<Option<CacheEntry>, SwError> {
            self.inner.match_request(name, key).await
        }

        async fn put(&self, name: &str, key: CacheKey, entry: CacheEntry) -> Result<(), SwError> {
            self.inner.put(name, key, entry).await
        }

        async fn put_all(
            &self,
            name: &str,
            entries: Vec<(CacheKey, CacheEntry)>,
        ) -> Result<(), SwError> {
            if self.fail_put_all.load(Ordering::SeqCst) {
                return Err(SwError::CacheError("put_all: disk full".into()));
            }
            self.inner.put_all(name, entries).await
        }

        async fn requests(&self, name: &str) -> Result<Vec<CacheKey>, SwError> {
            self.inner.requests(name).await
        }
    }
}
