//! Evidence photo validation and naming.

use bytes::Bytes;
use chrono::{DateTime, Local};
use rand::Rng;

use crate::ReportError;

/// Public bucket holding report photos.
pub const PHOTO_BUCKET: &str = "error_report_images";

/// Content type assumed when the picker gives none.
pub const DEFAULT_MIME: &str = "image/jpeg";

/// A photo attached to a report.
#[derive(Debug, Clone)]
pub struct Photo {
    pub bytes: Bytes,
    pub mime: Option<String>,
}

impl Photo {
    pub fn new(bytes: impl Into<Bytes>, mime: Option<&str>) -> Self {
        Self {
            bytes: bytes.into(),
            mime: mime.map(String::from),
        }
    }

    /// Effective content type. Only PNG and JPEG are accepted.
    pub fn content_type(&self) -> Result<&str, ReportError> {
        let mime = match self.mime.as_deref() {
            Some(m) if !m.is_empty() => m,
            _ => DEFAULT_MIME,
        };
        match mime {
            "image/png" | "image/jpeg" | "image/jpg" => Ok(mime),
            other => Err(ReportError::UnsupportedImageType(other.to_string())),
        }
    }

    /// Object name for an upload at `now`.
    pub fn object_name(&self, now: DateTime<Local>) -> Result<String, ReportError> {
        let mime = self.content_type()?;
        Ok(photo_filename(mime, now, &random_suffix()))
    }
}

/// `error-report-{MMDDYYHHMM}-{suffix}.{ext}`; `jpeg` is written as `jpg`.
pub fn photo_filename(mime: &str, now: DateTime<Local>, suffix: &str) -> String {
    let ext = match mime.rsplit('/').next() {
        Some("jpeg") | None => "jpg",
        Some(ext) => ext,
    };
    format!("error-report-{}-{suffix}.{ext}", now.format("%m%d%y%H%M"))
}

/// Eight lowercase hex digits.
fn random_suffix() -> String {
    format!("{:08x}", rand::thread_rng().gen::<u32>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 3, 7, 9, 5, 42).unwrap()
    }

    #[test]
    fn test_missing_mime_defaults_to_jpeg() {
        assert_eq!(Photo::new(&b"x"[..], None).content_type().unwrap(), "image/jpeg");
        assert_eq!(Photo::new(&b"x"[..], Some("")).content_type().unwrap(), "image/jpeg");
    }

    #[test]
    fn test_rejects_other_types() {
        for mime in ["image/gif", "image/webp", "application/pdf", "image/pngx"] {
            assert!(matches!(
                Photo::new(&b"x"[..], Some(mime)).content_type(),
                Err(ReportError::UnsupportedImageType(_))
            ));
        }
    }

    #[test]
    fn test_filename_format() {
        assert_eq!(
            photo_filename("image/jpeg", at(), "0a1b2c3d"),
            "error-report-0307250905-0a1b2c3d.jpg"
        );
        assert_eq!(
            photo_filename("image/png", at(), "0a1b2c3d"),
            "error-report-0307250905-0a1b2c3d.png"
        );
        assert_eq!(
            photo_filename("image/jpg", at(), "0a1b2c3d"),
            "error-report-0307250905-0a1b2c3d.jpg"
        );
    }

    #[test]
    fn test_object_name_suffix() {
        let name = Photo::new(&b"x"[..], Some("image/png"))
            .object_name(at())
            .unwrap();
        let suffix = name
            .strip_prefix("error-report-0307250905-")
            .and_then(|rest| rest.strip_suffix(".png"))
            .unwrap();

        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
