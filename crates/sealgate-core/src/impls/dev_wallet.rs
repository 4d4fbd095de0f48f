//! DevWallet - ed25519 鍵を持つ開発用 wallet
//!
//! - transaction は署名して `Ledger::execute` にそのまま送る
//! - personal message は現在の鍵で署名する
//! - `switch_account` で active account を切り替え、購読者に通知する
//! - `decline_*` で利用者の拒否を再現できる

use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use crate::domain::{Address, PersonalSignature, TransactionBuilder, address_of};
use crate::ports::{Ledger, LedgerError, TransactionEffects, Wallet, WalletError};

pub struct DevWallet {
    ledger: Arc<dyn Ledger>,
    key: Mutex<SigningKey>,
    account: watch::Sender<Address>,
    decline_messages: AtomicBool,
    decline_transactions: AtomicBool,
    message_prompts: AtomicU32,
    transaction_prompts: AtomicU32,
}

impl DevWallet {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self::with_key(ledger, SigningKey::generate(&mut rand::rngs::OsRng))
    }

    /// Deterministic account, for tests and reproducible demos.
    pub fn from_seed(ledger: Arc<dyn Ledger>, seed: [u8; 32]) -> Self {
        Self::with_key(ledger, SigningKey::from_bytes(&seed))
    }

    fn with_key(ledger: Arc<dyn Ledger>, key: SigningKey) -> Self {
        let (account, _) = watch::channel(address_of(&key.verifying_key()));
        Self {
            ledger,
            key: Mutex::new(key),
            account,
            decline_messages: AtomicBool::new(false),
            decline_transactions: AtomicBool::new(false),
            message_prompts: AtomicU32::new(0),
            transaction_prompts: AtomicU32::new(0),
        }
    }

    /// Receiver notified whenever the active account changes.
    pub fn subscribe(&self) -> watch::Receiver<Address> {
        self.account.subscribe()
    }

    /// Makes `seed`'s key the active account and returns its address.
    pub fn switch_account(&self, seed: [u8; 32]) -> Address {
        let key = SigningKey::from_bytes(&seed);
        let address = address_of(&key.verifying_key());
        *self.key.lock().unwrap_or_else(|e| e.into_inner()) = key;
        self.account.send_replace(address);
        tracing::info!(address = %address, "wallet account switched");
        address
    }

    pub fn decline_messages(&self, decline: bool) {
        self.decline_messages.store(decline, Ordering::SeqCst);
    }

    pub fn decline_transactions(&self, decline: bool) {
        self.decline_transactions.store(decline, Ordering::SeqCst);
    }

    /// Number of personal-message signature prompts shown so far.
    pub fn message_prompts(&self) -> u32 {
        self.message_prompts.load(Ordering::SeqCst)
    }

    pub fn transaction_prompts(&self) -> u32 {
        self.transaction_prompts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Wallet for DevWallet {
    fn address(&self) -> Result<Address, WalletError> {
        Ok(*self.account.borrow())
    }

    async fn sign_and_execute(
        &self,
        tx: TransactionBuilder,
    ) -> Result<TransactionEffects, WalletError> {
        self.transaction_prompts.fetch_add(1, Ordering::SeqCst);
        if self.decline_transactions.load(Ordering::SeqCst) {
            return Err(WalletError::Declined);
        }
        let sender = self.address()?;
        self.ledger.execute(&sender, &tx).await.map_err(|e| match e {
            LedgerError::Transport(reason) => WalletError::Transport(reason),
            other => WalletError::Rejected(other.to_string()),
        })
    }

    async fn sign_personal_message(&self, message: &[u8]) -> Result<PersonalSignature, WalletError> {
        self.message_prompts.fetch_add(1, Ordering::SeqCst);
        if self.decline_messages.load(Ordering::SeqCst) {
            return Err(WalletError::Declined);
        }
        let key = self.key.lock().unwrap_or_else(|e| e.into_inner());
        Ok(PersonalSignature {
            public_key: key.verifying_key().to_bytes(),
            signature: key.sign(message).to_bytes(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryLedger;
    use crate::ports::SystemClock;

    fn wallet() -> DevWallet {
        let ledger = InMemoryLedger::new(
            crate::domain::ObjectId::from_u64(1),
            "0x2::usdc::USDC",
            10,
            chrono::Duration::days(1),
            Arc::new(SystemClock),
        );
        DevWallet::from_seed(Arc::new(ledger), [7; 32])
    }

    #[tokio::test]
    async fn personal_signature_verifies_for_active_account() {
        let wallet = wallet();
        let address = wallet.address().unwrap();

        let signature = wallet.sign_personal_message(b"hello").await.unwrap();

        assert!(signature.verify(&address, b"hello"));
        assert!(!signature.verify(&address, b"other"));
        assert_eq!(wallet.message_prompts(), 1);
    }

    #[tokio::test]
    async fn switching_account_notifies_subscribers() {
        let wallet = wallet();
        let mut rx = wallet.subscribe();
        let before = wallet.address().unwrap();

        let after = wallet.switch_account([8; 32]);

        assert_ne!(before, after);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), after);
        assert_eq!(wallet.address().unwrap(), after);
    }

    #[tokio::test]
    async fn declines_are_reported() {
        let wallet = wallet();
        wallet.decline_messages(true);
        wallet.decline_transactions(true);

        assert_eq!(
            wallet.sign_personal_message(b"m").await.unwrap_err(),
            WalletError::Declined
        );
        assert_eq!(
            wallet.sign_and_execute(TransactionBuilder::new()).await.unwrap_err(),
            WalletError::Declined
        );
        assert_eq!(wallet.transaction_prompts(), 1);
    }

    #[tokio::test]
    async fn ledger_rejection_surfaces_as_rejected() {
        let wallet = wallet();
        // no gas budget
        let err = wallet.sign_and_execute(TransactionBuilder::new()).await.unwrap_err();
        assert!(matches!(err, WalletError::Rejected(_)));
    }
}
