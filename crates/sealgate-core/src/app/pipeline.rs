//! Pipeline - レポート配布フロー全体のオーケストレーター
//!
//! # 状態遷移
//! ```text
//! Idle → Generating → Encrypting → Uploading → Paying → VerifyingCapability → Ready
//! Ready → Downloading → Decrypted → Downloading → ...
//! 失敗したら Error(kind) で止まる（stage をまたいだ自動リトライはしない）
//! Error(kind) → 失敗した stage（`retry()` / `download()` で利用者が再開）
//! ```
//!
//! 失敗時も、それまでの stage の成果（report, 暗号文, blob, 購入済み capability）は
//! `Progress` として保持し、再開時は失敗した stage からやり直す。
//! 支払い済みの capability を買い直すことはない。
//!
//! # 設計原則
//! - 操作はすべて `&mut self` なので、同じ flow で購入や検証が並行することはない
//! - 各 stage が持つデータは `Stage` の variant に入っていて、
//!   capability 解決前のダウンロードのような遷移は表現できない
//! - session key は `SessionKeyManager` が保持し、account の変更は
//!   `watch` channel で通知される
//! - 遷移ごとに `FlowEvent` を `EventSink` に流し、tracing にも記録する

use std::sync::Arc;
use tokio::sync::watch;

use super::approval::{ApprovalCall, approval_tx_kind};
use super::blob_client::BlobClient;
use super::config::PipelineConfig;
use super::encryption::{Encrypted, EncryptionGateway};
use super::purchaser::CapabilityPurchaser;
use super::resolver::CapabilityResolver;
use super::session::SessionKeyManager;
use crate::domain::{
    Address, BlobRecord, DecryptedReport, EncryptionPolicy, ErrorKind, FlowEvent, FlowId, FlowState,
    ObjectId, PipelineError, ReadyFlow, ReportArtifact, SessionState, report_file_name,
};
use crate::ports::{
    BlobStore, Clock, EventSink, IdGenerator, Ledger, ReportGenerator, Sleeper,
    ThresholdEncryption, ThresholdError, UlidGenerator, Wallet,
};

/// External collaborators the pipeline is wired with.
#[derive(Clone)]
pub struct Collaborators {
    pub ledger: Arc<dyn Ledger>,
    pub wallet: Arc<dyn Wallet>,
    pub threshold: Arc<dyn ThresholdEncryption>,
    pub blob_store: Arc<dyn BlobStore>,
    pub reports: Arc<dyn ReportGenerator>,
    pub clock: Arc<dyn Clock>,
    pub sleeper: Arc<dyn Sleeper>,
    pub events: Arc<dyn EventSink>,
}

/// Internal stage, carrying the data that stage owns.
#[derive(Debug, Clone)]
enum Stage {
    Idle,
    /// Generating through VerifyingCapability; stage outputs live in `Progress`.
    Running(FlowState),
    Ready(ReadyFlow),
    Downloading(ReadyFlow),
    Decrypted(ReadyFlow),
    Failed {
        kind: ErrorKind,
        failure: Failure,
    },
}

/// What survives a failed stage.
#[derive(Debug, Clone)]
enum Failure {
    /// Failed before `Ready`; restart from the first stage without output.
    Creating(Box<Progress>),
    /// Failed while downloading; the resolved flow is kept.
    Downloading(ReadyFlow),
}

/// Outputs of the stages completed so far in `create_report`.
#[derive(Debug, Clone, Default)]
struct Progress {
    target: Option<ObjectId>,
    artifact: Option<ReportArtifact>,
    encrypted: Option<Encrypted>,
    blob: Option<BlobRecord>,
    capability_id: Option<ObjectId>,
}

impl Stage {
    fn state(&self) -> FlowState {
        match self {
            Stage::Idle => FlowState::Idle,
            Stage::Running(state) => *state,
            Stage::Ready(_) => FlowState::Ready,
            Stage::Downloading(_) => FlowState::Downloading,
            Stage::Decrypted(_) => FlowState::Decrypted,
            Stage::Failed { kind, .. } => FlowState::Error(*kind),
        }
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    ids: UlidGenerator<Arc<dyn Clock>>,
    flow_id: FlowId,
    stage: Stage,
    service_id: Option<ObjectId>,
    ledger: Arc<dyn Ledger>,
    threshold: Arc<dyn ThresholdEncryption>,
    reports: Arc<dyn ReportGenerator>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    gateway: EncryptionGateway,
    blobs: BlobClient,
    purchaser: CapabilityPurchaser,
    resolver: CapabilityResolver,
    sessions: SessionKeyManager,
    account: Option<watch::Receiver<Address>>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, deps: Collaborators) -> Self {
        let ids = UlidGenerator::new(deps.clock.clone());
        let flow_id = ids.generate_flow_id();
        Self {
            gateway: EncryptionGateway::new(deps.threshold.clone()),
            blobs: BlobClient::new(deps.blob_store.clone(), &config),
            purchaser: CapabilityPurchaser::new(
                deps.ledger.clone(),
                deps.wallet.clone(),
                config.package_id,
                config.coin_type.clone(),
                config.price,
                config.gas_budget,
            ),
            resolver: CapabilityResolver::new(
                deps.ledger.clone(),
                deps.sleeper.clone(),
                config.resolver,
                config.capability_ttl(),
            ),
            sessions: SessionKeyManager::new(
                deps.wallet.clone(),
                deps.clock.clone(),
                config.package_id,
                config.session_ttl_minutes,
            ),
            service_id: config.service_id,
            ids,
            flow_id,
            stage: Stage::Idle,
            ledger: deps.ledger,
            threshold: deps.threshold,
            reports: deps.reports,
            clock: deps.clock,
            events: deps.events,
            account: None,
            config,
        }
    }

    /// Subscribes to active-account changes; the cached session key is
    /// dropped when the account it was signed for is no longer active.
    pub fn with_account_changes(mut self, account: watch::Receiver<Address>) -> Self {
        self.account = Some(account);
        self
    }

    pub fn flow_id(&self) -> FlowId {
        self.flow_id
    }

    pub fn state(&self) -> FlowState {
        self.stage.state()
    }

    /// The resolved flow, once the capability has been verified.
    pub fn ready_flow(&self) -> Option<&ReadyFlow> {
        match &self.stage {
            Stage::Ready(flow) | Stage::Downloading(flow) | Stage::Decrypted(flow) => Some(flow),
            Stage::Failed {
                failure: Failure::Downloading(flow),
                ..
            } => Some(flow),
            Stage::Failed { .. } | Stage::Idle | Stage::Running(_) => None,
        }
    }

    /// Service/policy object in use (configured or bootstrapped).
    pub fn service_id(&self) -> Option<ObjectId> {
        self.service_id
    }

    pub fn session_state(&self) -> Option<SessionState> {
        self.sessions.state()
    }

    pub fn invalidate_session(&mut self) {
        self.sessions.invalidate();
    }

    /// Selects the blob service used by the next upload (including a retried one).
    pub fn select_publisher(&mut self, name: &str) -> Result<(), PipelineError> {
        self.blobs.select_publisher(name)
    }

    pub fn selected_publisher(&self) -> Option<&str> {
        self.blobs.selected_publisher()
    }

    /// Generates, encrypts, uploads and pays for the report of `package`.
    ///
    /// Only allowed from `Idle`. On failure the pipeline stays in `Error(kind)`
    /// until `retry()` or `reset()`.
    pub async fn create_report(&mut self, package: &str) -> Result<ReadyFlow, PipelineError> {
        let from = self.state();
        if from != FlowState::Idle {
            return Err(PipelineError::InvalidTransition {
                from: from.to_string(),
                action: "create a report",
            });
        }
        self.flow_id = self.ids.generate_flow_id();

        let target = match package.parse::<ObjectId>() {
            Ok(target) => target,
            Err(e) => {
                // nothing to resume from: the package itself is wrong
                self.advance(Stage::Running(FlowState::Generating))?;
                let e = PipelineError::ReportGenerationFailed(format!("invalid package id: {e}"));
                self.fail(&e, Failure::Creating(Box::default()));
                return Err(e);
            }
        };
        let progress = Progress {
            target: Some(target),
            ..Progress::default()
        };
        self.run_create(progress).await
    }

    /// Restarts the stage that failed, keeping everything produced before it.
    ///
    /// A purchased capability is never bought again: a flow that failed in
    /// `VerifyingCapability` only re-polls the ledger. Failed downloads are
    /// resumed with `download()`.
    pub async fn retry(&mut self) -> Result<ReadyFlow, PipelineError> {
        let from = self.state();
        let progress = match &self.stage {
            Stage::Failed {
                failure: Failure::Creating(progress),
                ..
            } if progress.target.is_some() => (**progress).clone(),
            _ => {
                return Err(PipelineError::InvalidTransition {
                    from: from.to_string(),
                    action: "retry",
                });
            }
        };
        tracing::info!(flow = %self.flow_id, from = %from, "retrying failed stage");
        self.run_create(progress).await
    }

    async fn run_create(&mut self, mut progress: Progress) -> Result<ReadyFlow, PipelineError> {
        match self.run_stages(&mut progress).await {
            Ok(flow) => Ok(flow),
            Err(e) => {
                self.fail(&e, Failure::Creating(Box::new(progress)));
                Err(e)
            }
        }
    }

    /// Runs every stage whose output is missing from `progress`, in order.
    async fn run_stages(&mut self, progress: &mut Progress) -> Result<ReadyFlow, PipelineError> {
        let target = progress.target.ok_or_else(|| {
            PipelineError::ReportGenerationFailed("no package to generate a report for".into())
        })?;

        let artifact = match &progress.artifact {
            Some(artifact) => artifact.clone(),
            None => {
                self.advance(Stage::Running(FlowState::Generating))?;
                let artifact = self
                    .reports
                    .generate(&target)
                    .await
                    .map_err(|e| PipelineError::ReportGenerationFailed(e.to_string()))?;
                if artifact.is_empty() {
                    return Err(PipelineError::ReportGenerationFailed("empty report".into()));
                }
                progress.artifact = Some(artifact.clone());
                artifact
            }
        };

        let encrypted = match &progress.encrypted {
            Some(encrypted) => encrypted.clone(),
            None => {
                self.advance(Stage::Running(FlowState::Encrypting))?;
                let service_id = self.purchaser.ensure_service(self.service_id).await?;
                self.service_id = Some(service_id);
                let policy = EncryptionPolicy::generate(
                    service_id,
                    self.config.threshold,
                    self.config.nonce_len,
                );
                let encrypted = self
                    .gateway
                    .encrypt(&self.config.package_id, &artifact, policy)
                    .await?;
                progress.encrypted = Some(encrypted.clone());
                encrypted
            }
        };
        let service_id = encrypted.policy.policy_id;

        let blob = match &progress.blob {
            Some(blob) => blob.clone(),
            None => {
                self.advance(Stage::Running(FlowState::Uploading))?;
                let blob = self
                    .blobs
                    .upload(&encrypted.ciphertext, &artifact.media_type)
                    .await?;
                progress.blob = Some(blob.clone());
                blob
            }
        };

        let capability_id = match progress.capability_id {
            Some(id) => id,
            None => {
                self.advance(Stage::Running(FlowState::Paying))?;
                let purchase = self.purchaser.purchase(service_id).await?;
                tracing::info!(
                    flow = %self.flow_id,
                    capability = %purchase.capability_id,
                    digest = %purchase.digest,
                    "capability purchased"
                );
                progress.capability_id = Some(purchase.capability_id);
                purchase.capability_id
            }
        };

        self.advance(Stage::Running(FlowState::VerifyingCapability))?;
        let capability = self.resolver.resolve(&capability_id).await?;

        let flow = ReadyFlow {
            service_id,
            encryption_id: encrypted.encryption_id,
            blob,
            capability,
            media_type: artifact.media_type,
        };
        self.advance(Stage::Ready(flow.clone()))?;
        Ok(flow)
    }

    /// Downloads and decrypts the report.
    ///
    /// Allowed from `Ready` and `Decrypted` any number of times, and from
    /// `Error` when the previous download failed. A still-valid session key is
    /// reused without asking the wallet again.
    pub async fn download(&mut self) -> Result<DecryptedReport, PipelineError> {
        self.sync_account();

        let flow = match &self.stage {
            Stage::Ready(flow) | Stage::Decrypted(flow) => flow.clone(),
            Stage::Failed {
                failure: Failure::Downloading(flow),
                ..
            } => flow.clone(),
            other => {
                return Err(PipelineError::InvalidTransition {
                    from: other.state().to_string(),
                    action: "download",
                });
            }
        };
        self.advance(Stage::Downloading(flow.clone()))?;

        match self.run_download(&flow).await {
            Ok(report) => {
                self.advance(Stage::Decrypted(flow))?;
                Ok(report)
            }
            Err(e) => {
                self.fail(&e, Failure::Downloading(flow));
                Err(e)
            }
        }
    }

    async fn run_download(&mut self, flow: &ReadyFlow) -> Result<DecryptedReport, PipelineError> {
        let ledger_time = self
            .ledger
            .ledger_time()
            .await
            .map_err(|e| PipelineError::DecryptionFailed(e.to_string()))?;
        if !flow.capability.is_valid_at(ledger_time) {
            return Err(PipelineError::NoAccess(format!(
                "capability {} expired at {}",
                flow.capability.id,
                flow.capability.expires_at()
            )));
        }

        let session = self.sessions.acquire().await?;

        let ciphertext = self.blobs.download(&flow.blob.blob_id).await?;
        let id = self
            .threshold
            .parse_encryption_id(&ciphertext)
            .map_err(from_threshold)?;
        if id != flow.encryption_id {
            return Err(PipelineError::DecryptionFailed(format!(
                "blob {} is encrypted under {id}, expected {}",
                flow.blob.blob_id, flow.encryption_id
            )));
        }

        let approval = ApprovalCall::new(self.config.package_id, flow.service_id, flow.capability.id);
        let tx_kind = approval_tx_kind(&approval, std::slice::from_ref(&id))
            .map_err(|e| PipelineError::DecryptionFailed(e.to_string()))?;
        let certificate = session
            .certificate(&tx_kind)
            .ok_or(PipelineError::SignatureDeclined)?;

        self.threshold
            .fetch_key_shares(std::slice::from_ref(&id), &tx_kind, &certificate, self.config.threshold)
            .await
            .map_err(from_threshold)?;
        let bytes = self
            .threshold
            .decrypt(&ciphertext, &certificate, &tx_kind)
            .await
            .map_err(from_threshold)?;

        Ok(DecryptedReport {
            bytes,
            media_type: flow.media_type.clone(),
            file_name: report_file_name(self.clock.now()),
        })
    }

    /// Abandons the current flow; on-ledger objects and the session key are kept.
    pub fn reset(&mut self) {
        let from = self.state();
        self.stage = Stage::Idle;
        self.emit(from, FlowState::Idle);
    }

    /// Any account notification since the last download drops the session key,
    /// even when the active address ends up the same (A → B → A).
    fn sync_account(&mut self) {
        if let Some(account) = self.account.as_mut()
            && account.has_changed().unwrap_or(false)
        {
            let active = *account.borrow_and_update();
            tracing::info!(flow = %self.flow_id, active = %active, "account changed");
            self.sessions.invalidate();
        }
    }

    fn advance(&mut self, next: Stage) -> Result<(), PipelineError> {
        let from = self.state();
        let to = next.state();
        if !from.allows(to) {
            return Err(PipelineError::InvalidTransition {
                from: from.to_string(),
                action: "advance",
            });
        }
        self.stage = next;
        self.emit(from, to);
        Ok(())
    }

    fn fail(&mut self, error: &PipelineError, failure: Failure) {
        let from = self.state();
        let kind = error.kind();
        tracing::warn!(flow = %self.flow_id, from = %from, kind = ?kind, error = %error, "stage failed");
        self.stage = Stage::Failed { kind, failure };
        self.emit(from, FlowState::Error(kind));
    }

    fn emit(&self, from: FlowState, to: FlowState) {
        tracing::info!(flow = %self.flow_id, from = %from, to = %to, "transition");
        self.events.emit(FlowEvent {
            flow_id: self.flow_id,
            from,
            to,
            at: self.clock.now(),
        });
    }
}

fn from_threshold(error: ThresholdError) -> PipelineError {
    match error {
        ThresholdError::NoAccess(reason) => PipelineError::NoAccess(reason),
        other => PipelineError::DecryptionFailed(other.to_string()),
    }
}
