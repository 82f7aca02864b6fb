//! Client for the remote data store (PostgREST rows + object storage).

use std::sync::Arc;

use bytes::Bytes;
use errqr_net::{Fetch, Request, Response};
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::{ReportError, StoreConfig};

const APIKEY: HeaderName = HeaderName::from_static("apikey");
const PREFER: HeaderName = HeaderName::from_static("prefer");
const X_UPSERT: HeaderName = HeaderName::from_static("x-upsert");

/// Row queries, inserts and blob uploads against one project.
pub struct DataStore {
    base: Url,
    apikey: HeaderValue,
    bearer: HeaderValue,
    network: Arc<dyn Fetch>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

impl DataStore {
    pub fn new(config: &StoreConfig, network: Arc<dyn Fetch>) -> Result<Self, ReportError> {
        let (base, key) = config.credentials()?;
        let (Ok(apikey), Ok(bearer)) = (
            HeaderValue::from_str(key),
            HeaderValue::from_str(&format!("Bearer {key}")),
        ) else {
            warn!("Anon key is not a valid header value");
            return Err(ReportError::NotConfigured);
        };

        Ok(Self {
            base,
            apikey,
            bearer,
            network,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ReportError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ReportError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: Request) -> Request {
        request
            .header(APIKEY, self.apikey.clone())
            .header(AUTHORIZATION, self.bearer.clone())
    }

    async fn send(&self, request: Request) -> Result<Response, ReportError> {
        debug!(method = %request.method, url = %request.url, "Data store request");
        let response = self.network.fetch(&request).await?;
        if response.ok() {
            return Ok(response);
        }

        let message = serde_json::from_slice::<ErrorBody>(&response.body)
            .ok()
            .and_then(|b| b.message.or(b.error))
            .unwrap_or_else(|| String::from_utf8_lossy(&response.body).into_owned());
        warn!(status = response.status.as_u16(), %message, "Data store error");
        Err(ReportError::Store {
            status: response.status.as_u16(),
            message,
        })
    }

    fn decode<T: DeserializeOwned>(response: &Response) -> Result<T, ReportError> {
        serde_json::from_slice(&response.body).map_err(|e| ReportError::Decode(e.to_string()))
    }

    /// `SELECT *` from a table.
    pub async fn select_all<T: DeserializeOwned>(&self, table: &str) -> Result<Vec<T>, ReportError> {
        let mut url = self.endpoint(&["rest", "v1", table])?;
        url.query_pairs_mut().append_pair("select", "*");

        let response = self.send(self.authorize(Request::get(url))).await?;
        Self::decode(&response)
    }

    /// At most one row where `column = value`. More than one row is an error.
    pub async fn select_one_eq<T: DeserializeOwned>(
        &self,
        table: &str,
        columns: &str,
        column: &str,
        value: &str,
    ) -> Result<Option<T>, ReportError> {
        let mut url = self.endpoint(&["rest", "v1", table])?;
        url.query_pairs_mut()
            .append_pair("select", columns)
            .append_pair(column, &format!("eq.{value}"));

        let response = self.send(self.authorize(Request::get(url))).await?;
        let mut rows: Vec<T> = Self::decode(&response)?;
        match rows.len() {
            0 => Ok(None),
            1 => Ok(rows.pop()),
            n => Err(ReportError::Decode(format!(
                "expected at most one {table} row for {column}={value}, got {n}"
            ))),
        }
    }

    /// Insert one row and return it as stored.
    pub async fn insert_one<P: Serialize, T: DeserializeOwned>(
        &self,
        table: &str,
        row: &P,
    ) -> Result<T, ReportError> {
        let url = self.endpoint(&["rest", "v1", table])?;
        let body = serde_json::to_vec(row).map_err(|e| ReportError::Decode(e.to_string()))?;

        let request = Request::post(url, Bytes::from(body))
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .header(PREFER, HeaderValue::from_static("return=representation"));

        let response = self.send(self.authorize(request)).await?;
        let mut rows: Vec<T> = Self::decode(&response)?;
        if rows.len() != 1 {
            return Err(ReportError::Decode(format!(
                "expected one inserted {table} row, got {}",
                rows.len()
            )));
        }
        rows.pop()
            .ok_or_else(|| ReportError::Decode(format!("no inserted {table} row")))
    }

    /// Upload a blob without overwriting. Returns the stored object path.
    pub async fn upload(
        &self,
        bucket: &str,
        path: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<String, ReportError> {
        let url = self.endpoint(&["storage", "v1", "object", bucket, path])?;
        let content_type = HeaderValue::from_str(content_type)
            .map_err(|_| ReportError::UnsupportedImageType(content_type.to_string()))?;

        let request = Request::post(url, body)
            .header(CONTENT_TYPE, content_type)
            .header(X_UPSERT, HeaderValue::from_static("false"));

        self.send(self.authorize(request)).await?;
        Ok(path.to_string())
    }

    /// Public URL of an object in a public bucket.
    pub fn public_url(&self, bucket: &str, path: &str) -> Result<Url, ReportError> {
        self.endpoint(&["storage", "v1", "object", "public", bucket, path])
    }
}
