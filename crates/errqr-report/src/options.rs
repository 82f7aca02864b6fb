//! Category / sub-category cascade built from the flat options table.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::DataStore;

/// Table holding one row per (category, sub-category) pair.
pub const OPTIONS_TABLE: &str = "options_error_list";

/// One row of the options table. Either column may be missing or null.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorOption {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub sub_category: Option<String>,
}

impl ErrorOption {
    pub fn new(category: &str, sub_category: &str) -> Self {
        Self {
            category: Some(category.to_string()),
            sub_category: Some(sub_category.to_string()),
        }
    }

    fn trimmed_category(&self) -> &str {
        self.category.as_deref().unwrap_or_default().trim()
    }

    fn trimmed_sub_category(&self) -> &str {
        self.sub_category.as_deref().unwrap_or_default().trim()
    }
}

/// The loaded options list.
#[derive(Debug, Clone, Default)]
pub struct ErrorOptions {
    items: Vec<ErrorOption>,
}

impl ErrorOptions {
    pub fn new(items: Vec<ErrorOption>) -> Self {
        Self { items }
    }

    /// Load every row. A missing store or a failed query yields an empty list.
    pub async fn load(store: Option<&DataStore>) -> Self {
        let Some(store) = store else {
            warn!("Data store not configured, no options loaded");
            return Self::default();
        };

        match store.select_all::<ErrorOption>(OPTIONS_TABLE).await {
            Ok(items) => {
                info!(rows = items.len(), "Loaded error options");
                Self::new(items)
            }
            Err(e) => {
                warn!(table = OPTIONS_TABLE, error = %e, "Options fetch failed");
                Self::default()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Distinct non-empty categories, trimmed and sorted.
    pub fn categories(&self) -> Vec<String> {
        self.items
            .iter()
            .map(ErrorOption::trimmed_category)
            .filter(|c| !c.is_empty())
            .map(String::from)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Category selected when the list first loads.
    pub fn default_category(&self) -> Option<String> {
        self.categories().into_iter().next()
    }

    /// Distinct non-empty sub-categories of `category`, trimmed and sorted.
    /// Category comparison ignores case and surrounding whitespace.
    pub fn sub_categories(&self, category: &str) -> Vec<String> {
        let wanted = category.trim().to_lowercase();
        self.items
            .iter()
            .filter(|item| item.trimmed_category().to_lowercase() == wanted)
            .map(ErrorOption::trimmed_sub_category)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Text shown for an option value.
    pub fn label(value: &str) -> String {
        value.to_uppercase()
    }
}
