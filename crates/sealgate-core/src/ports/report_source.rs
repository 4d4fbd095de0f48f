//! ReportGenerator port - 監査レポートの生成元
//!
//! package id を受け取り、レポート（通常は PDF）のバイト列を返す。

use async_trait::async_trait;

use crate::domain::{ObjectId, ReportArtifact};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReportError {
    #[error("invalid package id: {0}")]
    InvalidPackage(String),

    #[error("report service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("empty report")]
    Empty,

    #[error("report transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait ReportGenerator: Send + Sync {
    async fn generate(&self, package_id: &ObjectId) -> Result<ReportArtifact, ReportError>;
}
