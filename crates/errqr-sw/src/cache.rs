//! Named cache storage.
//!
//! A storage holds any number of named caches; each cache maps a request key
//! (method + URL) to a stored response. The controller only ever writes to
//! the cache named by its configuration and deletes the rest on activation.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use errqr_net::{Request, Response};
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use tokio::sync::RwLock;
use url::Url;

use crate::SwError;

/// Lookup key for a stored response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub method: String,
    /// URL without fragment.
    pub url: String,
}

impl CacheKey {
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: method.as_str().to_string(),
            url: url.into(),
        }
    }

    pub fn for_request(request: &Request) -> Self {
        Self::new(&request.method, &request.url)
    }

    /// Key for a plain GET of `url`.
    pub fn get(url: &Url) -> Self {
        Self::new(&Method::GET, url)
    }

    /// Only GET responses may be stored.
    pub fn is_cacheable(&self) -> bool {
        self.method == Method::GET.as_str()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A stored response.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub url: String,
    pub status: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
    /// Milliseconds since the epoch.
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot a response for storage.
    pub fn from_response(key: &CacheKey, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            url: key.url.clone(),
            status: response.status.as_u16(),
            status_text: response.status_text.clone(),
            headers,
            body: response.body.clone(),
            cached_at: now_millis(),
        }
    }

    /// Rebuild the response. Headers that no longer parse are dropped.
    pub fn to_response(&self) -> Response {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.insert(n, v);
            }
        }

        Response {
            url: Url::parse(&self.url).ok(),
            status: StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK),
            status_text: self.status_text.clone(),
            headers,
            body: self.body.clone(),
        }
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Named cache store.
///
/// Implementations must make single-key reads and writes atomic; nothing
/// else is coordinated across concurrent requests.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a cache, creating it if it does not exist.
    async fn open(&self, name: &str) -> Result<(), SwError>;

    /// Check if a cache exists.
    async fn has(&self, name: &str) -> Result<bool, SwError>;

    /// Names of all caches.
    async fn keys(&self) -> Result<Vec<String>, SwError>;

    /// Delete a cache and everything in it. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool, SwError>;

    /// Look up a stored response in one cache.
    async fn match_request(&self, name: &str, key: &CacheKey)
        -> Result<Option<CacheEntry>, SwError>;

    /// Store a response in an existing cache, replacing any previous entry.
    async fn put(&self, name: &str, key: CacheKey, entry: CacheEntry) -> Result<(), SwError>;

    /// Store several responses at once; either all are stored or none.
    async fn put_all(&self, name: &str, entries: Vec<(CacheKey, CacheEntry)>)
        -> Result<(), SwError>;

    /// Keys stored in one cache.
    async fn requests(&self, name: &str) -> Result<Vec<CacheKey>, SwError>;
}

pub(crate) fn ensure_cacheable(key: &CacheKey) -> Result<(), SwError> {
    if key.is_cacheable() {
        Ok(())
    } else {
        Err(SwError::CacheError(format!(
            "{} requests cannot be cached",
            key.method
        )))
    }
}

/// A single in-memory cache.
#[derive(Debug, Default)]
struct Cache {
    entries: HashMap<CacheKey, CacheEntry>,
}

/// In-memory cache storage. Lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<HashMap<String, Cache>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<(), SwError> {
        self.caches
            .write()
            .await
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool, SwError> {
        Ok(self.caches.read().await.contains_key(name))
    }

    async fn keys(&self) -> Result<Vec<String>, SwError> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool, SwError> {
        Ok(self.caches.write().await.remove(name).is_some())
    }

    async fn match_request(
        &self,
        name: &str,
        key: &CacheKey,
    ) -> Result<Option<CacheEntry>, SwError> {
        Ok(self
            .caches
            .read()
            .await
            .get(name)
            .and_then(|cache| cache.entries.get(key).cloned()))
    }

    async fn put(&self, name: &str, key: CacheKey, entry: CacheEntry) -> Result<(), SwError> {
        ensure_cacheable(&key)?;
        let mut caches = self.caches.write().await;
        let cache = caches
            .get_mut(name)
            .ok_or_else(|| SwError::NotFound(format!("cache {name}")))?;
        cache.entries.insert(key, entry);
        Ok(())
    }

    async fn put_all(
        &self,
        name: &str,
        entries: Vec<(CacheKey, CacheEntry)>,
    ) -> Result<(), SwError> {
        for (key, _) in &entries {
            ensure_cacheable(key)?;
        }
        let mut caches = self.caches.write().await;
        let cache = caches
            .get_mut(name)
            .ok_or_else(|| SwError::NotFound(format!("cache {name}")))?;
        cache.entries.extend(entries);
        Ok(())
    }

    async fn requests(&self, name: &str) -> Result<Vec<CacheKey>, SwError> {
        let caches = self.caches.read().await;
        let cache = caches
            .get(name)
            .ok_or_else(|| SwError::NotFound(format!("cache {name}")))?;
        let mut keys: Vec<CacheKey> = cache.entries.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
