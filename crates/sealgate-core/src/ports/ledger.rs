//! Ledger port - オブジェクト台帳（Sui 相当）への読み書き
//!
//! # 責務
//! - coin の列挙（残高確認と支払い計画の入力）
//! - object の読み取り（capability の解決）
//! - transaction の実行と dry-run（seal_approve の評価）
//! - 台帳時刻の取得（capability の有効期限判定は台帳の時計で行う）
//!
//! # 整合性
//! `execute` が返した created object が `get_object` で見えるまでには遅延がある。
//! 呼び出し側は「まだ見えない」と「存在しない」を区別できない前提でリトライする。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Address, Coin, ObjectId, TransactionBuilder};

/// Owner of an object created by a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Owner {
    AddressOwner(Address),
    Shared,
    Immutable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedObject {
    pub id: ObjectId,
    pub owner: Owner,
    /// Fully qualified Move type, e.g. `0x..::subscription::Subscription`.
    pub object_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEffects {
    pub digest: String,
    pub created: Vec<CreatedObject>,
}

impl TransactionEffects {
    /// First created object owned by `address`.
    pub fn created_owned_by(&self, address: &Address) -> Option<&CreatedObject> {
        self.created
            .iter()
            .find(|o| o.owner == Owner::AddressOwner(*address))
    }

    pub fn created_shared(&self) -> Option<&CreatedObject> {
        self.created.iter().find(|o| o.owner == Owner::Shared)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectContent {
    pub object_type: String,
    pub fields: serde_json::Value,
}

/// An object as read back from the ledger.
///
/// `content` is `None` while the object exists but is not yet indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerObject {
    pub id: ObjectId,
    pub content: Option<ObjectContent>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("object {0} not found")]
    NotFound(ObjectId),

    #[error("transaction rejected: {0}")]
    Rejected(String),

    /// Move abort during execution or dry-run.
    #[error("move abort in {function}: code {code}")]
    Aborted { function: String, code: u64 },

    #[error("ledger transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Coins of `coin_type` owned by `owner`.
    async fn coins(&self, owner: &Address, coin_type: &str) -> Result<Vec<Coin>, LedgerError>;

    async fn get_object(&self, id: &ObjectId) -> Result<LedgerObject, LedgerError>;

    /// Executes an already signed transaction on behalf of `sender`.
    async fn execute(
        &self,
        sender: &Address,
        tx: &TransactionBuilder,
    ) -> Result<TransactionEffects, LedgerError>;

    /// Dry-runs transaction kind bytes without committing anything.
    async fn simulate(&self, sender: &Address, tx_kind: &[u8]) -> Result<(), LedgerError>;

    /// The ledger's own clock (the `0x6` clock object).
    async fn ledger_time(&self) -> Result<DateTime<Utc>, LedgerError>;
}
