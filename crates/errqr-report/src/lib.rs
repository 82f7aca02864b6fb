//! # errqr Report
//!
//! Everything behind the error-report form except the page itself: the
//! remote data store client, the category / sub-category cascade, photo
//! naming and validation, and the submission flow.

use errqr_common::ErrqrError;
use errqr_net::NetError;
use thiserror::Error;

pub mod config;
pub mod form;
pub mod options;
pub mod photo;
pub mod store;
pub mod submit;

pub use config::StoreConfig;
pub use form::{FormControls, OrderNumber};
pub use options::{ErrorOption, ErrorOptions};
pub use photo::Photo;
pub use store::DataStore;
pub use submit::{ErrorReport, ReportForm, ReportSubmitter};

/// Errors from the report flow.
///
/// `Display` is the message shown to the worker filling in the form.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("All fields are required.")]
    MissingFields,

    #[error("Data store not configured. Set SUPABASE_URL and SUPABASE_ANON_KEY.")]
    NotConfigured,

    #[error("Order not found.")]
    OrderNotFound(String),

    #[error("Unsupported image type")]
    UnsupportedImageType(String),

    #[error("Data store returned {status}: {message}")]
    Store { status: u16, message: String },

    #[error("Unexpected data store response: {0}")]
    Decode(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Network error: {0}")]
    Network(#[from] NetError),
}

impl ReportError {
    /// Short message for the form's status line.
    pub fn user_message(&self) -> String {
        match self {
            ReportError::MissingFields
            | ReportError::NotConfigured
            | ReportError::OrderNotFound(_)
            | ReportError::UnsupportedImageType(_) => self.to_string(),
            _ => "Failed to add report.".to_string(),
        }
    }
}

impl From<ReportError> for ErrqrError {
    fn from(err: ReportError) -> Self {
        match err {
            ReportError::OrderNotFound(order) => ErrqrError::NotFound(format!("order {order}")),
            ReportError::MissingFields | ReportError::UnsupportedImageType(_) => {
                ErrqrError::InvalidArgument(err.to_string())
            }
            ReportError::NotConfigured | ReportError::InvalidUrl(_) => {
                ErrqrError::config(err.to_string())
            }
            ReportError::Network(e) => e.into(),
            other => ErrqrError::store_with_source("report", other),
        }
    }
}
