//! Wallet port - 利用者の署名者
//!
//! wallet は 1 つの active account を持ち、transaction と personal message に署名する。
//! 利用者は署名を拒否できる（`WalletError::Declined`）。

use async_trait::async_trait;

use crate::domain::{Address, PersonalSignature, TransactionBuilder};
use crate::ports::ledger::TransactionEffects;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalletError {
    #[error("user declined to sign")]
    Declined,

    #[error("no account connected")]
    NotConnected,

    #[error("transaction rejected: {0}")]
    Rejected(String),

    #[error("wallet transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Wallet: Send + Sync {
    /// Currently active account.
    fn address(&self) -> Result<Address, WalletError>;

    async fn sign_and_execute(
        &self,
        tx: TransactionBuilder,
    ) -> Result<TransactionEffects, WalletError>;

    async fn sign_personal_message(&self, message: &[u8]) -> Result<PersonalSignature, WalletError>;
}
