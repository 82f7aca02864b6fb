//! Controller configuration.

use url::Url;

use crate::SwError;

/// Name of the single versioned static cache. Bump to invalidate.
pub const STATIC_CACHE: &str = "errqr-static-v2";

/// Page served when a navigation cannot reach the network.
pub const OFFLINE_PAGE: &str = "/offline.html";

/// Assets that must be cached before the worker is ready. `index.html` is
/// deliberately absent: navigations always go to the network.
pub const STATIC_ASSETS: &[&str] = &["/offline.html", "/manifest.webmanifest"];

/// Configuration handed to the controller at construction.
#[derive(Debug, Clone)]
pub struct SwConfig {
    /// Origin that asset paths are resolved against.
    pub origin: Url,
    /// Versioned cache name.
    pub cache_name: String,
    /// Paths pre-cached at install, in order.
    pub static_assets: Vec<String>,
    /// Offline fallback page. Must be one of `static_assets`.
    pub offline_page: String,
}

impl SwConfig {
    /// Built-in cache name and asset list for `origin`.
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            cache_name: STATIC_CACHE.to_string(),
            static_assets: STATIC_ASSETS.iter().map(|s| s.to_string()).collect(),
            offline_page: OFFLINE_PAGE.to_string(),
        }
    }

    /// Override the cache name.
    pub fn with_cache_name(mut self, name: impl Into<String>) -> Self {
        self.cache_name = name.into();
        self
    }

    /// Override the static asset list.
    pub fn with_static_assets<I, S>(mut self, assets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.static_assets = assets.into_iter().map(Into::into).collect();
        self
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<(), SwError> {
        if self.cache_name.trim().is_empty() {
            return Err(SwError::Config("cache name must not be empty".into()));
        }
        if self.origin.cannot_be_a_base() {
            return Err(SwError::Config(format!(
                "origin {} cannot resolve relative paths",
                self.origin
            )));
        }
        if !self.static_assets.iter().any(|a| *a == self.offline_page) {
            return Err(SwError::Config(format!(
                "offline page {} is not a static asset",
                self.offline_page
            )));
        }
        Ok(())
    }

    /// Resolve a path against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url, SwError> {
        self.origin
            .join(path)
            .map_err(|e| SwError::Config(format!("invalid asset path {path}: {e}")))
    }

    /// Absolute URLs of the static assets, in order.
    pub fn asset_urls(&self) -> Result<Vec<Url>, SwError> {
        self.static_assets.iter().map(|a| self.resolve(a)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Url {
        Url::parse("https://errqr.example.com/").unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = SwConfig::new(origin());

        assert_eq!(config.cache_name, "errqr-static-v2");
        assert_eq!(config.static_assets, vec!["/offline.html", "/manifest.webmanifest"]);
        assert_eq!(config.offline_page, "/offline.html");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_asset_urls_keep_order() {
        let urls = SwConfig::new(origin()).asset_urls().unwrap();

        assert_eq!(urls[0].as_str(), "https://errqr.example.com/offline.html");
        assert_eq!(urls[1].as_str(), "https://errqr.example.com/manifest.webmanifest");
    }

    #[test]
    fn test_offline_page_must_be_precached() {
        let config = SwConfig::new(origin()).with_static_assets(["/manifest.webmanifest"]);
        assert!(matches!(config.validate(), Err(SwError::Config(_))));
    }

    #[test]
    fn test_empty_cache_name_rejected() {
        let config = SwConfig::new(origin()).with_cache_name("  ");
        assert!(config.validate().is_err());
    }
}
