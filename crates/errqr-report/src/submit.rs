//! Report submission: validate, resolve the order, upload the photo, insert.

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::photo::PHOTO_BUCKET;
use crate::{DataStore, Photo, ReportError};

const ORDERS_TABLE: &str = "orders";
const REPORTS_TABLE: &str = "order_error_reports";

/// Status given to every new report.
pub const FLAGGED: &str = "flagged";

/// Shown after a successful insert.
pub const REPORT_ADDED: &str = "Report added.";

/// Raw field values as entered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportForm {
    pub order_no: String,
    pub category: String,
    pub sub_category: String,
    pub description: String,
}

impl ReportForm {
    /// Trimmed fields, or `MissingFields` if any is blank.
    fn validated(&self) -> Result<[&str; 4], ReportError> {
        let fields = [
            self.order_no.trim(),
            self.category.trim(),
            self.sub_category.trim(),
            self.description.trim(),
        ];
        if fields.iter().any(|f| f.is_empty()) {
            return Err(ReportError::MissingFields);
        }
        Ok(fields)
    }
}

/// A row of `order_error_reports`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub order_id: Value,
    pub category: String,
    pub sub_category: String,
    pub description: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Deserialize)]
struct OrderRow {
    id: Value,
}

/// An order id counts only when it is not null, zero, empty or false.
fn is_present(id: &Value) -> bool {
    match id {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Runs the submit flow against the data store.
pub struct ReportSubmitter {
    store: Option<DataStore>,
}

impl ReportSubmitter {
    pub fn new(store: Option<DataStore>) -> Self {
        Self { store }
    }

    /// Submit one report and return the inserted row.
    #[instrument(skip(self, form, photo), fields(order = %form.order_no.trim()))]
    pub async fn submit(
        &self,
        form: &ReportForm,
        photo: Option<&Photo>,
    ) -> Result<ErrorReport, ReportError> {
        let [order_no, category, sub_category, description] = form.validated()?;
        let store = self.store.as_ref().ok_or(ReportError::NotConfigured)?;

        let order: Option<OrderRow> = store
            .select_one_eq(ORDERS_TABLE, "id,order_no", "order_no", order_no)
            .await?;
        let order_id = match order {
            Some(row) if is_present(&row.id) => row.id,
            _ => {
                warn!("Order not found");
                return Err(ReportError::OrderNotFound(order_no.to_string()));
            }
        };

        let image = match photo {
            Some(photo) => Some(self.upload_photo(store, photo).await?),
            None => None,
        };

        let payload = ErrorReport {
            id: None,
            order_id,
            category: category.to_string(),
            sub_category: sub_category.to_string(),
            description: description.to_string(),
            status: FLAGGED.to_string(),
            image,
        };
        let row: ErrorReport = store.insert_one(REPORTS_TABLE, &payload).await?;
        info!(id = ?row.id, "Report added");
        Ok(row)
    }

    async fn upload_photo(&self, store: &DataStore, photo: &Photo) -> Result<String, ReportError> {
        let mime = photo.content_type()?;
        let name = photo.object_name(Local::now())?;
        let stored = store
            .upload(PHOTO_BUCKET, &name, photo.bytes.clone(), mime)
            .await?;
        Ok(store.public_url(PHOTO_BUCKET, &stored)?.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreConfig;
    use errqr_net::{LoaderConfig, ResourceLoader};
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{body_partial_json, method, path, path_regex, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn submitter(server: &MockServer) -> ReportSubmitter {
        let config = StoreConfig::new(Some(&server.uri()), Some("anon-key"));
        let network = Arc::new(ResourceLoader::new(LoaderConfig::default()).unwrap());
        ReportSubmitter::new(Some(DataStore::new(&config, network).unwrap()))
    }

    fn form() -> ReportForm {
        ReportForm {
            order_no: " SO-1001 ".into(),
            category: "packing ".into(),
            sub_category: " wrong item".into(),
            description: " Blue mug instead of red ".into(),
        }
    }

    async fn mount_order(server: &MockServer, rows: Value) {
        Mock::given(method("GET"))
            .and(path("/rest/v1/orders"))
            .and(query_param("order_no", "eq.SO-1001"))
            .and(query_param("select", "id,order_no"))
            .respond_with(ResponseTemplate::new(200).set_body_json(rows))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_missing_fields() {
        let server = MockServer::start().await;
        let mut blank = form();
        blank.description = "   ".into();

        let err = submitter(&server).submit(&blank, None).await.unwrap_err();
        assert!(matches!(err, ReportError::MissingFields));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_not_configured() {
        let err = ReportSubmitter::new(None)
            .submit(&form(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::NotConfigured));
    }

    #[tokio::test]
    async fn test_unknown_order() {
        let server = MockServer::start().await;
        mount_order(&server, json!([])).await;

        let err = submitter(&server).submit(&form(), None).await.unwrap_err();
        assert!(matches!(err, ReportError::OrderNotFound(ref o) if o == "SO-1001"));
        assert_eq!(err.user_message(), "Order not found.");
    }

    #[tokio::test]
    async fn test_falsy_order_id_is_not_found() {
        for id in [json!(0), json!(""), json!(false)] {
            let server = MockServer::start().await;
            mount_order(&server, json!([{"id": id, "order_no": "SO-1001"}])).await;

            let err = submitter(&server).submit(&form(), None).await.unwrap_err();
            assert!(matches!(err, ReportError::OrderNotFound(_)), "id {id}");
            assert_eq!(server.received_requests().await.unwrap().len(), 1);
        }
    }

    #[test]
    fn test_order_id_presence() {
        assert!(is_present(&json!(7)));
        assert!(is_present(&json!("b7c1")));
        assert!(!is_present(&Value::Null));
        assert!(!is_present(&json!(0.0)));
    }

    #[tokio::test]
    async fn test_inserts_flagged_report_without_image() {
        let server = MockServer::start().await;
        mount_order(&server, json!([{"id": 7, "order_no": "SO-1001"}])).await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/order_error_reports"))
            .and(body_partial_json(json!({
                "order_id": 7,
                "category": "packing",
                "sub_category": "wrong item",
                "description": "Blue mug instead of red",
                "status": "flagged"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([{
                "id": 12,
                "order_id": 7,
                "category": "packing",
                "sub_category": "wrong item",
                "description": "Blue mug instead of red",
                "status": "flagged",
                "image": null
            }])))
            .expect(1)
            .mount(&server)
            .await;

        let row = submitter(&server).submit(&form(), None).await.unwrap();
        assert_eq!(row.id, Some(json!(12)));
        assert_eq!(row.image, None);

        let requests = server.received_requests().await.unwrap();
        let insert = requests.iter().find(|r| r.method.as_str() == "POST").unwrap();
        let sent: Value = serde_json::from_slice(&insert.body).unwrap();
        assert!(sent.get("image").is_none());
        assert!(sent.get("id").is_none());
    }

    #[tokio::test]
    async fn test_uploads_photo_and_links_public_url() {
        let server = MockServer::start().await;
        mount_order(&server, json!([{"id": "b7c1", "order_no": "SO-1001"}])).await;
        Mock::given(method("POST"))
            .and(path_regex(
                r"^/storage/v1/object/error_report_images/error-report-\d{10}-[0-9a-f]{8}\.png$",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Key": "ok"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/order_error_reports"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([{
                "id": 13,
                "order_id": "b7c1",
                "category": "packing",
                "sub_category": "wrong item",
                "description": "Blue mug instead of red",
                "status": "flagged",
                "image": "stored"
            }])))
            .expect(1)
            .mount(&server)
            .await;

        let photo = Photo::new(&b"\x89PNG"[..], Some("image/png"));
        submitter(&server)
            .submit(&form(), Some(&photo))
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let insert = requests
            .iter()
            .find(|r| r.url.path() == "/rest/v1/order_error_reports")
            .unwrap();
        let sent: Value = serde_json::from_slice(&insert.body).unwrap();
        let image = sent["image"].as_str().unwrap();
        assert!(image.starts_with(&format!(
            "{}/storage/v1/object/public/error_report_images/error-report-",
            server.uri()
        )));
        assert!(image.ends_with(".png"));
    }

    #[tokio::test]
    async fn test_unsupported_photo_skips_insert() {
        let server = MockServer::start().await;
        mount_order(&server, json!([{"id": 7, "order_no": "SO-1001"}])).await;

        let photo = Photo::new(&b"GIF89a"[..], Some("image/gif"));
        let err = submitter(&server)
            .submit(&form(), Some(&photo))
            .await
            .unwrap_err();

        assert!(matches!(err, ReportError::UnsupportedImageType(_)));
        let requests = server.received_requests().await.unwrap();
        assert!(requests.iter().all(|r| r.method.as_str() == "GET"));
    }

    #[tokio::test]
    async fn test_store_failure_is_generic_to_user() {
        let server = MockServer::start().await;
        mount_order(&server, json!([{"id": 7, "order_no": "SO-1001"}])).await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(403).set_body_json(json!({"message": "row-level security"})),
            )
            .mount(&server)
            .await;

        let err = submitter(&server).submit(&form(), None).await.unwrap_err();
        assert!(matches!(err, ReportError::Store { status: 403, .. }));
        assert_eq!(err.user_message(), "Failed to add report.");
    }
}
