//! SessionKeyManager - 復号セッションの作成・署名・再利用
//!
//! # 再利用ルール
//! - キャッシュが「署名済み・期限内・address 一致」なら署名を求めずに使い回す
//! - それ以外は新しく作って wallet に署名してもらう
//! - account の切り替えが通知されたら、期限内でも `invalidate` でキャッシュを捨てる
//!
//! キャッシュはこの struct が所有し、orchestrator の state と一緒に渡される。

use std::sync::Arc;

use crate::domain::{Address, ObjectId, PipelineError, SessionKey, SessionState};
use crate::ports::{Clock, Wallet, WalletError};

pub struct SessionKeyManager {
    wallet: Arc<dyn Wallet>,
    clock: Arc<dyn Clock>,
    package_id: ObjectId,
    ttl_minutes: u32,
    cached: Option<SessionKey>,
}

impl SessionKeyManager {
    pub fn new(
        wallet: Arc<dyn Wallet>,
        clock: Arc<dyn Clock>,
        package_id: ObjectId,
        ttl_minutes: u32,
    ) -> Self {
        Self {
            wallet,
            clock,
            package_id,
            ttl_minutes,
            cached: None,
        }
    }

    /// A signed, unexpired session key for the active account.
    ///
    /// Prompts the wallet only when the cached key cannot be reused.
    pub async fn acquire(&mut self) -> Result<&SessionKey, PipelineError> {
        let address = self
            .wallet
            .address()
            .map_err(|e| PipelineError::DecryptionFailed(e.to_string()))?;
        let now = self.clock.now();

        let key = match self.cached.take() {
            Some(key) if key.is_usable_for(&address, now) && key.package_id() == self.package_id => {
                tracing::debug!(address = %address, expires_at = %key.expires_at(), "reusing session key");
                key
            }
            previous => {
                tracing::debug!(
                    address = %address,
                    previous = ?previous.as_ref().map(|k| k.state(now)),
                    "creating session key"
                );
                self.create_signed(address).await?
            }
        };
        let key: &SessionKey = self.cached.insert(key);
        Ok(key)
    }

    async fn create_signed(&self, address: Address) -> Result<SessionKey, PipelineError> {
        let mut key = SessionKey::create(address, self.package_id, self.ttl_minutes, self.clock.now());
        let signature = self
            .wallet
            .sign_personal_message(&key.personal_message())
            .await
            .map_err(|e| match e {
                WalletError::Declined => PipelineError::SignatureDeclined,
                other => PipelineError::DecryptionFailed(other.to_string()),
            })?;
        key.set_personal_message_signature(signature)
            .map_err(|e| PipelineError::DecryptionFailed(e.to_string()))?;
        Ok(key)
    }

    pub fn invalidate(&mut self) {
        if self.cached.take().is_some() {
            tracing::debug!("session key invalidated");
        }
    }

    /// State of the cached key, `None` when there is none.
    pub fn state(&self) -> Option<SessionState> {
        self.cached.as_ref().map(|k| k.state(self.clock.now()))
    }
}
