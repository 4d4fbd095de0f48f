//! ReportArtifact - 生成されたレポート（平文）
//!
//! 外部のレポート生成 API が返すバイト列と media type。
//! Encryption Gateway に一度だけ渡され、その後は保持しない。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Media type assumed when the generator does not send one.
pub const DEFAULT_MEDIA_TYPE: &str = "application/pdf";

/// Raw report bytes plus their media type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportArtifact {
    pub bytes: Vec<u8>,
    pub media_type: String,
}

impl ReportArtifact {
    pub fn new(bytes: Vec<u8>, media_type: impl Into<String>) -> Self {
        Self {
            bytes,
            media_type: media_type.into(),
        }
    }

    pub fn pdf(bytes: Vec<u8>) -> Self {
        Self::new(bytes, DEFAULT_MEDIA_TYPE)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_image(&self) -> bool {
        self.media_type.starts_with("image")
    }
}

/// Download file name for a report, e.g. `report_20250101_120000.pdf`.
pub fn report_file_name(now: DateTime<Utc>) -> String {
    format!("report_{}.pdf", now.format("%Y%m%d_%H%M%S"))
}

/// A decrypted report ready to be handed to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedReport {
    pub bytes: Vec<u8>,
    pub media_type: String,
    pub file_name: String,
}
