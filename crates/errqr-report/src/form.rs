//! Order number capture and the form's control state.

use std::fmt;

/// Order number taken from a decoded QR code (or typed in).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderNumber(String);

impl OrderNumber {
    /// Trimmed decoded text. Empty text is ignored.
    pub fn from_decoded(text: &str) -> Option<Self> {
        let text = text.trim();
        (!text.is_empty()).then(|| Self(text.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which controls are live, derived from the current order and store state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormControls {
    pub submit_enabled: bool,
    pub clear_enabled: bool,
    pub form_visible: bool,
}

impl FormControls {
    pub fn derive(order: Option<&OrderNumber>, store_configured: bool) -> Self {
        let has_order = order.is_some();
        Self {
            submit_enabled: has_order && store_configured,
            clear_enabled: has_order,
            form_visible: has_order,
        }
    }
}
