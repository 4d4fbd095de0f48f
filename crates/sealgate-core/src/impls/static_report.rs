//! StaticReportGenerator - ネットワークを使わないレポート生成
//!
//! package id から決定的に PDF 風のバイト列を作る。デモとテスト用。

use async_trait::async_trait;

use crate::domain::{ObjectId, ReportArtifact};
use crate::ports::{ReportError, ReportGenerator};

const PDF_HEADER: &[u8] = b"%PDF-1.4\n";

#[derive(Debug, Clone)]
pub struct StaticReportGenerator {
    size: usize,
}

impl StaticReportGenerator {
    /// Reports of exactly `size` bytes (`0` produces an empty report).
    pub fn new(size: usize) -> Self {
        Self { size }
    }
}

#[async_trait]
impl ReportGenerator for StaticReportGenerator {
    async fn generate(&self, package_id: &ObjectId) -> Result<ReportArtifact, ReportError> {
        let mut bytes = PDF_HEADER.to_vec();
        let mut body = vec![0u8; self.size.saturating_sub(PDF_HEADER.len())];
        blake3::Hasher::new()
            .update(package_id.as_bytes())
            .finalize_xof()
            .fill(&mut body);
        bytes.extend_from_slice(&body);
        bytes.truncate(self.size);
        tracing::debug!(package_id = %package_id, size = bytes.len(), "static report generated");
        Ok(ReportArtifact::pdf(bytes))
    }
}
