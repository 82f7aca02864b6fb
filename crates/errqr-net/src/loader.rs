//! reqwest-backed resource loader.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, trace, warn};

use crate::{build_client, Fetch, NetError, Request, Response};

/// Resource loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Whole-request timeout. Unset means a request may wait forever.
    pub timeout: Option<Duration>,
    /// Connection establishment timeout.
    pub connect_timeout: Option<Duration>,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("errqr/{}", env!("CARGO_PKG_VERSION")),
            timeout: None,
            connect_timeout: None,
            max_redirects: 10,
        }
    }
}

/// Resource loader for fetching URLs over the real network.
pub struct ResourceLoader {
    client: Client,
    config: LoaderConfig,
}

impl ResourceLoader {
    /// Create a new resource loader.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let client = build_client(&config)?;
        Ok(Self { client, config })
    }

    fn timeout_error(&self) -> NetError {
        NetError::Timeout(
            self.config
                .timeout
                .or(self.config.connect_timeout)
                .unwrap_or_default(),
        )
    }
}

#[async_trait]
impl Fetch for ResourceLoader {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        debug!(
            url = %request.url,
            method = %request.method,
            mode = request.mode.as_str(),
            "Fetching resource"
        );

        let mut req_builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        for (name, value) in request.headers.iter() {
            req_builder = req_builder.header(name, value);
        }

        if let Some(ref body) = request.body {
            req_builder = req_builder.body(body.clone());
        }

        let response = req_builder.send().await.map_err(|e| {
            warn!(url = %request.url, error = %e, "Request did not complete");
            if e.is_timeout() {
                self.timeout_error()
            } else {
                NetError::HttpError(e)
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await?;

        trace!(
            url = %url,
            status = %status,
            body_len = body.len(),
            "Response received"
        );

        Ok(Response {
            url: Some(url),
            status,
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use url::Url;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_loader_config_default() {
        let config = LoaderConfig::default();
        assert!(config.user_agent.starts_with("errqr/"));
        assert_eq!(config.max_redirects, 10);
        assert_eq!(config.timeout, None);
        assert_eq!(config.connect_timeout, None);
    }

    #[tokio::test]
    async fn test_slow_response_is_not_cut_off_by_default() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("LIVE PAGE")
                    .set_delay(Duration::from_millis(1500)),
            )
            .mount(&server)
            .await;

        let loader = ResourceLoader::new(LoaderConfig::default()).unwrap();
        let url = Url::parse(&server.uri()).unwrap();
        let response = loader.fetch(&Request::navigate(url)).await.unwrap();

        assert_eq!(response.text().unwrap(), "LIVE PAGE");
    }

    #[tokio::test]
    async fn test_configured_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let config = LoaderConfig {
            timeout: Some(Duration::from_millis(100)),
            ..LoaderConfig::default()
        };
        let loader = ResourceLoader::new(config).unwrap();
        let url = Url::parse(&server.uri()).unwrap();

        match loader.fetch(&Request::get(url)).await {
            Err(NetError::Timeout(after)) => assert_eq!(after, Duration::from_millis(100)),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/app.js"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/javascript")
                    .set_body_string("console.log(1)"),
            )
            .mount(&server)
            .await;

        let loader = ResourceLoader::new(LoaderConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/app.js", server.uri())).unwrap();
        let response = loader.fetch(&Request::get(url)).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.content_type(), Some("application/javascript"));
        assert_eq!(response.text().unwrap(), "console.log(1)");
    }

    #[tokio::test]
    async fn test_error_status_is_a_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let loader = ResourceLoader::new(LoaderConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/missing", server.uri())).unwrap();
        let response = loader.fetch(&Request::navigate(url)).await.unwrap();

        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(response.status_text, "Not Found");
    }

    #[tokio::test]
    async fn test_request_headers_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("apikey", "anon"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let loader = ResourceLoader::new(LoaderConfig::default()).unwrap();
        let url = Url::parse(&server.uri()).unwrap();
        let request = Request::get(url).header(
            http::HeaderName::from_static("apikey"),
            http::HeaderValue::from_static("anon"),
        );

        assert!(loader.fetch(&request).await.unwrap().ok());
    }

    #[tokio::test]
    async fn test_connection_refused_is_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let url = Url::parse(&format!("http://127.0.0.1:{port}/app.js")).unwrap();

        let loader = ResourceLoader::new(LoaderConfig::default()).unwrap();
        assert!(loader.fetch(&Request::get(url)).await.is_err());
    }
}
