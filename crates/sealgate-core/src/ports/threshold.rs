//! ThresholdEncryption port - 閾値鍵サーバーによる暗号化と復号
//!
//! # プロトコル
//! 1. `encrypt`: policy package と encryption id に束縛した暗号文を作る
//! 2. `fetch_key_shares`: 各鍵サーバーが seal_approve を評価し、通れば share を返す
//! 3. `decrypt`: 閾値以上の share が揃っていれば平文を復元する
//!
//! 鍵サーバーへの認証は `SessionCertificate` で行う。

use async_trait::async_trait;

use crate::domain::{EncryptionId, ObjectId, SessionCertificate};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ThresholdError {
    /// A key server refused because the approval check failed.
    #[error("no access: {0}")]
    NoAccess(String),

    #[error("only {available} of {threshold} key servers answered")]
    Unreachable { available: usize, threshold: u8 },

    #[error("invalid ciphertext: {0}")]
    InvalidCiphertext(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("key servers misconfigured: {0}")]
    Misconfigured(String),
}

#[async_trait]
pub trait ThresholdEncryption: Send + Sync {
    async fn encrypt(
        &self,
        package_id: &ObjectId,
        id: &EncryptionId,
        threshold: u8,
        data: &[u8],
    ) -> Result<Vec<u8>, ThresholdError>;

    /// Reads the encryption id out of a ciphertext header.
    fn parse_encryption_id(&self, encrypted: &[u8]) -> Result<EncryptionId, ThresholdError>;

    /// Asks key servers for shares of `ids`, authorized by the approval transaction kind.
    async fn fetch_key_shares(
        &self,
        ids: &[EncryptionId],
        tx_kind: &[u8],
        certificate: &SessionCertificate,
        threshold: u8,
    ) -> Result<(), ThresholdError>;

    async fn decrypt(
        &self,
        encrypted: &[u8],
        certificate: &SessionCertificate,
        tx_kind: &[u8],
    ) -> Result<Vec<u8>, ThresholdError>;
}
