//! State - パイプラインの状態
//!
//! # 状態遷移
//! ```text
//! Idle → Generating → Encrypting → Uploading → Paying → VerifyingCapability → Ready
//! Ready ⇄ Downloading → Decrypted (→ Downloading を何度でも)
//! どの stage からも → Error(kind)
//! ```
//!
//! `Error` は自動進行を止める吸収状態。利用者は失敗した stage だけをやり直せる
//! （`Error → 失敗した stage`）。`reset()` なら `Idle` へ戻す。

use serde::{Deserialize, Serialize};
use std::fmt;

use super::blob::BlobRecord;
use super::capability::Capability;
use super::errors::ErrorKind;
use super::ids::ObjectId;
use super::policy::EncryptionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum FlowState {
    Idle,
    Generating,
    Encrypting,
    Uploading,
    Paying,
    VerifyingCapability,
    Ready,
    Downloading,
    Decrypted,
    Error(ErrorKind),
}

impl FlowState {
    /// Whether `self → next` is an edge of the state machine.
    ///
    /// `Error → stage` restarts a failed stage; the orchestrator only takes
    /// it into the stage that actually failed.
    pub fn allows(self, next: FlowState) -> bool {
        use FlowState::*;
        match (self, next) {
            (_, Error(_)) => !matches!(self, Idle | Ready | Decrypted | Error(_)),
            (Idle, Generating)
            | (Generating, Encrypting)
            | (Encrypting, Uploading)
            | (Uploading, Paying)
            | (Paying, VerifyingCapability)
            | (VerifyingCapability, Ready)
            | (Ready, Downloading)
            | (Downloading, Decrypted)
            | (Decrypted, Downloading) => true,
            (Error(_), next) => next.is_restartable(),
            _ => false,
        }
    }

    /// Working stages a failed flow may be restarted in.
    pub fn is_restartable(self) -> bool {
        use FlowState::*;
        matches!(
            self,
            Generating | Encrypting | Uploading | Paying | VerifyingCapability | Downloading
        )
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowState::Error(kind) => write!(f, "Error({kind:?})"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Everything needed to download and decrypt once the capability is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyFlow {
    pub service_id: ObjectId,
    pub encryption_id: EncryptionId,
    pub blob: BlobRecord,
    pub capability: Capability,
    pub media_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::start(FlowState::Idle, FlowState::Generating)]
    #[case::encrypt(FlowState::Generating, FlowState::Encrypting)]
    #[case::upload(FlowState::Encrypting, FlowState::Uploading)]
    #[case::pay(FlowState::Uploading, FlowState::Paying)]
    #[case::verify(FlowState::Paying, FlowState::VerifyingCapability)]
    #[case::ready(FlowState::VerifyingCapability, FlowState::Ready)]
    #[case::download(FlowState::Ready, FlowState::Downloading)]
    #[case::decrypted(FlowState::Downloading, FlowState::Decrypted)]
    #[case::again(FlowState::Decrypted, FlowState::Downloading)]
    #[case::fail_paying(FlowState::Paying, FlowState::Error(ErrorKind::PurchaseFailed))]
    #[case::reverify(FlowState::Error(ErrorKind::CapabilityUnresolved), FlowState::VerifyingCapability)]
    #[case::reupload(FlowState::Error(ErrorKind::BlobUploadFailed), FlowState::Uploading)]
    #[case::redownload(FlowState::Error(ErrorKind::BlobUnavailable), FlowState::Downloading)]
    fn legal_edges(#[case] from: FlowState, #[case] to: FlowState) {
        assert!(from.allows(to));
    }

    #[rstest]
    #[case::download_before_ready(FlowState::Uploading, FlowState::Downloading)]
    #[case::double_purchase(FlowState::Paying, FlowState::Paying)]
    #[case::pay_from_ready(FlowState::Ready, FlowState::Paying)]
    #[case::skip_verification(FlowState::Paying, FlowState::Ready)]
    #[case::error_from_idle(FlowState::Idle, FlowState::Error(ErrorKind::NoAccess))]
    #[case::error_skips_to_ready(FlowState::Error(ErrorKind::CapabilityUnresolved), FlowState::Ready)]
    #[case::error_to_idle_edge(FlowState::Error(ErrorKind::PurchaseFailed), FlowState::Idle)]
    #[case::error_to_decrypted(FlowState::Error(ErrorKind::DecryptionFailed), FlowState::Decrypted)]
    fn illegal_edges(#[case] from: FlowState, #[case] to: FlowState) {
        assert!(!from.allows(to));
    }

    #[test]
    fn state_serializes_with_error_kind() {
        let s = serde_json::to_string(&FlowState::Error(ErrorKind::NoAccess)).unwrap();
        assert_eq!(s, r#"{"state":"error","error":"no_access"}"#);
        let s = serde_json::to_string(&FlowState::Ready).unwrap();
        assert_eq!(s, r#"{"state":"ready"}"#);
    }
}
