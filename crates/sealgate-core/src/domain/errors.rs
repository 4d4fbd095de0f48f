//! Errors - エラー型と分類
//!
//! `PipelineError` は利用者に見せる失敗で、どの stage で何が起きたかを表す。
//! `ErrorKind` はその Copy 可能な分類で、`FlowState::Error(kind)` に保持される。
//!
//! # 回復方針
//! - stage をまたいだ自動リトライはしない
//! - 内部でリトライするのは Capability Resolver だけ
//! - 利用者は失敗した stage だけをやり直せる（`Pipeline::retry` / `Pipeline::download`）

use serde::{Deserialize, Serialize};

use super::blob::BlobId;
use super::ids::ObjectId;

/// Classification of a pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ReportGenerationFailed,
    EncryptionFailed,
    BlobUploadFailed,
    BlobUnavailable,
    InsufficientBalance,
    PurchaseFailed,
    CapabilityUnresolved,
    NoAccess,
    DecryptionFailed,
    SignatureDeclined,
    InvalidTransition,
}

impl ErrorKind {
    /// Message suitable for showing to the user as-is.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::ReportGenerationFailed => "Failed to generate the report, try again",
            Self::EncryptionFailed => "Failed to encrypt the report",
            Self::BlobUploadFailed => {
                "Failed to upload to the storage network, select another publisher and try again"
            }
            Self::BlobUnavailable => {
                "Cannot retrieve the file from this aggregator, try again (a randomly selected aggregator will be used). \
                 Files stored past their retention epochs have been deleted."
            }
            Self::InsufficientBalance => "Insufficient balance to pay for access",
            Self::PurchaseFailed => "Failed to purchase access",
            Self::CapabilityUnresolved => {
                "Access was purchased but could not be confirmed on-chain yet, try again shortly"
            }
            Self::NoAccess => "No access to decryption keys",
            Self::DecryptionFailed => "Unable to decrypt files, try again",
            Self::SignatureDeclined => "The session signature was declined",
            Self::InvalidTransition => "This action is not available right now",
        }
    }
}

/// A failure surfaced by the pipeline, with the specific sub-failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("report generation failed: {0}")]
    ReportGenerationFailed(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("blob upload failed: {0}")]
    BlobUploadFailed(String),

    #[error("blob {blob_id} unavailable: {reason}")]
    BlobUnavailable { blob_id: BlobId, reason: String },

    #[error("insufficient balance: need {required}, have {available}")]
    InsufficientBalance { required: u64, available: u128 },

    #[error("purchase failed: {0}")]
    PurchaseFailed(String),

    #[error("capability {id} unresolved after {attempts} attempts")]
    CapabilityUnresolved { id: ObjectId, attempts: u32 },

    #[error("no access to decryption keys: {0}")]
    NoAccess(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("session key signature declined")]
    SignatureDeclined,

    #[error("cannot {action} while {from}")]
    InvalidTransition { from: String, action: &'static str },
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ReportGenerationFailed(_) => ErrorKind::ReportGenerationFailed,
            Self::EncryptionFailed(_) => ErrorKind::EncryptionFailed,
            Self::BlobUploadFailed(_) => ErrorKind::BlobUploadFailed,
            Self::BlobUnavailable { .. } => ErrorKind::BlobUnavailable,
            Self::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            Self::PurchaseFailed(_) => ErrorKind::PurchaseFailed,
            Self::CapabilityUnresolved { .. } => ErrorKind::CapabilityUnresolved,
            Self::NoAccess(_) => ErrorKind::NoAccess,
            Self::DecryptionFailed(_) => ErrorKind::DecryptionFailed,
            Self::SignatureDeclined => ErrorKind::SignatureDeclined,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
        }
    }
}

impl From<super::coin::InsufficientBalance> for PipelineError {
    fn from(e: super::coin::InsufficientBalance) -> Self {
        Self::InsufficientBalance {
            required: e.required,
            available: e.available,
        }
    }
}
