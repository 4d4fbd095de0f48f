//! EncryptionGateway - policy id + nonce でレポートを閾値暗号化する
//!
//! 暗号文のヘッダから読み出した EncryptionId が、暗号化に使った
//! `policy_id ‖ nonce` と一致することをここで確かめる。
//! 鍵サーバー側のエラーはローカルで回復せず、そのまま返す。

use std::sync::Arc;

use crate::domain::{EncryptionId, EncryptionPolicy, ObjectId, PipelineError, ReportArtifact};
use crate::ports::ThresholdEncryption;

/// Ciphertext together with the policy it was produced under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encrypted {
    pub policy: EncryptionPolicy,
    pub encryption_id: EncryptionId,
    pub ciphertext: Vec<u8>,
}

pub struct EncryptionGateway {
    service: Arc<dyn ThresholdEncryption>,
}

impl EncryptionGateway {
    pub fn new(service: Arc<dyn ThresholdEncryption>) -> Self {
        Self { service }
    }

    pub async fn encrypt(
        &self,
        package_id: &ObjectId,
        artifact: &ReportArtifact,
        policy: EncryptionPolicy,
    ) -> Result<Encrypted, PipelineError> {
        let encryption_id = policy.encryption_id();
        let ciphertext = self
            .service
            .encrypt(package_id, &encryption_id, policy.threshold, &artifact.bytes)
            .await
            .map_err(|e| PipelineError::EncryptionFailed(e.to_string()))?;

        let embedded = self
            .service
            .parse_encryption_id(&ciphertext)
            .map_err(|e| PipelineError::EncryptionFailed(e.to_string()))?;
        if embedded != encryption_id {
            return Err(PipelineError::EncryptionFailed(format!(
                "ciphertext carries encryption id {embedded}, expected {encryption_id}"
            )));
        }

        tracing::debug!(
            encryption_id = %encryption_id,
            plaintext = artifact.len(),
            ciphertext = ciphertext.len(),
            "artifact encrypted"
        );
        Ok(Encrypted {
            policy,
            encryption_id,
            ciphertext,
        })
    }
}
