//! Data store connection settings.

use url::Url;

use crate::ReportError;

/// Environment variable holding the data store base URL.
pub const URL_ENV: &str = "SUPABASE_URL";
/// Environment variable holding the anonymous API key.
pub const ANON_KEY_ENV: &str = "SUPABASE_ANON_KEY";

/// Where the data store lives and how to authenticate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreConfig {
    pub url: Option<String>,
    pub anon_key: Option<String>,
}

impl StoreConfig {
    /// Build from raw values. Blank values count as missing.
    pub fn new(url: Option<&str>, anon_key: Option<&str>) -> Self {
        let clean = |v: Option<&str>| v.map(str::trim).filter(|v| !v.is_empty()).map(String::from);
        Self {
            url: clean(url),
            anon_key: clean(anon_key),
        }
    }

    /// Read from `SUPABASE_URL` / `SUPABASE_ANON_KEY`.
    pub fn from_env() -> Self {
        let url = std::env::var(URL_ENV).ok();
        let key = std::env::var(ANON_KEY_ENV).ok();
        Self::new(url.as_deref(), key.as_deref())
    }

    /// Keep values already set; fill the rest from `other`.
    pub fn or(self, other: StoreConfig) -> Self {
        Self {
            url: self.url.or(other.url),
            anon_key: self.anon_key.or(other.anon_key),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some() && self.anon_key.is_some()
    }

    /// Parsed base URL and key, or `NotConfigured`.
    pub fn credentials(&self) -> Result<(Url, &str), ReportError> {
        let (Some(url), Some(key)) = (self.url.as_deref(), self.anon_key.as_deref()) else {
            return Err(ReportError::NotConfigured);
        };
        let url = Url::parse(url).map_err(|e| ReportError::InvalidUrl(format!("{url}: {e}")))?;
        Ok((url, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_values_are_missing() {
        let config = StoreConfig::new(Some("  "), Some("key"));
        assert_eq!(config.url, None);
        assert!(!config.is_configured());
        assert!(matches!(config.credentials(), Err(ReportError::NotConfigured)));
    }

    #[test]
    fn test_values_are_trimmed() {
        let config = StoreConfig::new(Some(" https://db.example.com \n"), Some(" anon "));
        let (url, key) = config.credentials().unwrap();

        assert_eq!(url.as_str(), "https://db.example.com/");
        assert_eq!(key, "anon");
    }

    #[test]
    fn test_or_prefers_self() {
        let file = StoreConfig::new(Some("https://a.example.com"), None);
        let env = StoreConfig::new(Some("https://b.example.com"), Some("k"));
        let merged = file.or(env);

        assert_eq!(merged.url.as_deref(), Some("https://a.example.com"));
        assert_eq!(merged.anon_key.as_deref(), Some("k"));
    }

    #[test]
    fn test_invalid_url() {
        let config = StoreConfig::new(Some("not a url"), Some("k"));
        assert!(matches!(config.credentials(), Err(ReportError::InvalidUrl(_))));
    }
}
