//! CapabilityPurchaser - capability（subscription）を買う transaction を組んで送る
//!
//! # 流れ
//! 1. wallet の coin を列挙して `PaymentPlan` を作る（不足ならチェーンに触れずに失敗）
//! 2. merge/split で支払い coin を作り、`main::buy_suiaudit_key<Coin>` を呼ぶ
//! 3. effects から payer 所有の created object を capability として取り出す
//!
//! service（policy object）がまだない場合は `ensure_service` が
//! `main::setup_suiaudit_service` で作る。EncryptionId に policy id が入るので、
//! これは暗号化より前に行う。

use std::sync::Arc;

use crate::domain::{Address, ObjectId, PaymentPlan, PipelineError, TransactionBuilder, clock_object_id};
use crate::ports::{Ledger, TransactionEffects, Wallet, WalletError};

pub const MAIN_MODULE: &str = "main";
pub const SETUP_FUNCTION: &str = "setup_suiaudit_service";
pub const BUY_FUNCTION: &str = "buy_suiaudit_key";

/// Result of a successful purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Purchase {
    pub capability_id: ObjectId,
    pub digest: String,
    pub plan: PaymentPlan,
}

pub struct CapabilityPurchaser {
    ledger: Arc<dyn Ledger>,
    wallet: Arc<dyn Wallet>,
    package_id: ObjectId,
    coin_type: String,
    price: u64,
    gas_budget: u64,
}

impl CapabilityPurchaser {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        wallet: Arc<dyn Wallet>,
        package_id: ObjectId,
        coin_type: impl Into<String>,
        price: u64,
        gas_budget: u64,
    ) -> Self {
        Self {
            ledger,
            wallet,
            package_id,
            coin_type: coin_type.into(),
            price,
            gas_budget,
        }
    }

    /// Returns `existing`, or creates the shared service object and returns its id.
    pub async fn ensure_service(
        &self,
        existing: Option<ObjectId>,
    ) -> Result<ObjectId, PipelineError> {
        if let Some(id) = existing {
            return Ok(id);
        }
        let mut tx = TransactionBuilder::new();
        tx.move_call(self.package_id, MAIN_MODULE, SETUP_FUNCTION, vec![], vec![]);
        tx.set_gas_budget(self.gas_budget);

        let effects = self.wallet.sign_and_execute(tx).await.map_err(|e| {
            PipelineError::EncryptionFailed(format!("service setup failed: {e}"))
        })?;
        let service = effects.created_shared().ok_or_else(|| {
            PipelineError::EncryptionFailed("service setup created no shared object".into())
        })?;
        tracing::info!(service = %service.id, digest = %effects.digest, "service created");
        Ok(service.id)
    }

    /// Selects coins for the price; fails before any chain write when short.
    pub async fn plan_payment(&self, payer: &Address) -> Result<PaymentPlan, PipelineError> {
        let coins = self
            .ledger
            .coins(payer, &self.coin_type)
            .await
            .map_err(|e| PipelineError::PurchaseFailed(e.to_string()))?;
        Ok(PaymentPlan::select(&coins, self.price)?)
    }

    /// Builds the purchase transaction for `plan` against `service_id`.
    pub fn build(&self, plan: &PaymentPlan, service_id: ObjectId) -> TransactionBuilder {
        let mut tx = TransactionBuilder::new();
        let payment = plan.apply(&mut tx);
        let args = vec![payment, tx.object(service_id), tx.object(clock_object_id())];
        tx.move_call(
            self.package_id,
            MAIN_MODULE,
            BUY_FUNCTION,
            vec![self.coin_type.clone()],
            args,
        );
        tx.set_gas_budget(self.gas_budget);
        tx
    }

    pub async fn purchase(&self, service_id: ObjectId) -> Result<Purchase, PipelineError> {
        let payer = self
            .wallet
            .address()
            .map_err(|e| PipelineError::PurchaseFailed(e.to_string()))?;
        let plan = self.plan_payment(&payer).await?;
        tracing::debug!(
            payer = %payer,
            inputs = plan.inputs().len(),
            change = %plan.change(),
            "payment planned"
        );

        let tx = self.build(&plan, service_id);
        let effects = self
            .wallet
            .sign_and_execute(tx)
            .await
            .map_err(|e| match e {
                WalletError::Declined => PipelineError::PurchaseFailed("user declined to sign".into()),
                other => PipelineError::PurchaseFailed(other.to_string()),
            })?;

        let capability_id = capability_of(&effects, &payer)?;
        Ok(Purchase {
            capability_id,
            digest: effects.digest,
            plan,
        })
    }
}

fn capability_of(effects: &TransactionEffects, payer: &Address) -> Result<ObjectId, PipelineError> {
    if effects.created.is_empty() {
        return Err(PipelineError::PurchaseFailed(format!(
            "transaction {} created no objects",
            effects.digest
        )));
    }
    effects
        .created_owned_by(payer)
        .map(|o| o.id)
        .ok_or_else(|| {
            PipelineError::PurchaseFailed(format!(
                "transaction {} created no object owned by {payer}",
                effects.digest
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Coin, ErrorKind, PersonalSignature};
    use crate::domain::transaction::Command;
    use crate::ports::{CreatedObject, LedgerError, LedgerObject, Owner};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;

    struct CoinLedger(Vec<Coin>);

    #[async_trait]
    impl Ledger for CoinLedger {
        async fn coins(&self, _: &Address, _: &str) -> Result<Vec<Coin>, LedgerError> {
            Ok(self.0.clone())
        }
        async fn get_object(&self, id: &ObjectId) -> Result<LedgerObject, LedgerError> {
            Err(LedgerError::NotFound(*id))
        }
        async fn execute(&self, _: &Address, _: &TransactionBuilder) -> Result<TransactionEffects, LedgerError> {
            Err(LedgerError::Rejected("unused".into()))
        }
        async fn simulate(&self, _: &Address, _: &[u8]) -> Result<(), LedgerError> {
            Ok(())
        }
        async fn ledger_time(&self) -> Result<DateTime<Utc>, LedgerError> {
            Ok(Utc::now())
        }
    }

    /// Records submitted transactions and answers with canned effects.
    struct ScriptedWallet {
        address: Address,
        effects: Result<Vec<CreatedObject>, WalletError>,
        submitted: Mutex<Vec<TransactionBuilder>>,
    }

    #[async_trait]
    impl Wallet for ScriptedWallet {
        fn address(&self) -> Result<Address, WalletError> {
            Ok(self.address)
        }
        async fn sign_and_execute(&self, tx: TransactionBuilder) -> Result<TransactionEffects, WalletError> {
            self.submitted.lock().unwrap().push(tx);
            self.effects.clone().map(|created| TransactionEffects {
                digest: "D".into(),
                created,
            })
        }
        async fn sign_personal_message(&self, _: &[u8]) -> Result<PersonalSignature, WalletError> {
            Err(WalletError::Declined)
        }
    }

    fn purchaser(coins: &[u64], effects: Result<Vec<CreatedObject>, WalletError>) -> (CapabilityPurchaser, Arc<ScriptedWallet>) {
        let coins = coins
            .iter()
            .enumerate()
            .map(|(i, b)| Coin::new(ObjectId::from_u64(100 + i as u64), *b))
            .collect();
        let wallet = Arc::new(ScriptedWallet {
            address: Address::from_u64(1),
            effects,
            submitted: Mutex::new(vec![]),
        });
        let purchaser = CapabilityPurchaser::new(
            Arc::new(CoinLedger(coins)),
            wallet.clone(),
            ObjectId::from_u64(0xbeef),
            "0x2::usdc::USDC",
            100_000,
            10_000_000,
        );
        (purchaser, wallet)
    }

    fn owned(id: u64) -> CreatedObject {
        CreatedObject {
            id: ObjectId::from_u64(id),
            owner: Owner::AddressOwner(Address::from_u64(1)),
            object_type: "subscription::Subscription".into(),
        }
    }

    #[tokio::test]
    async fn merges_then_splits_and_calls_buy() {
        let (purchaser, wallet) = purchaser(&[60_000, 50_000], Ok(vec![owned(42)]));

        let purchase = purchaser.purchase(ObjectId::from_u64(7)).await.unwrap();

        assert_eq!(purchase.capability_id, ObjectId::from_u64(42));
        assert!(matches!(purchase.plan, PaymentPlan::MergeThenSplit { .. }));
        let submitted = wallet.submitted.lock().unwrap();
        let tx = &submitted[0];
        assert!(matches!(tx.commands()[0], Command::MergeCoins { .. }));
        assert!(matches!(tx.commands()[1], Command::SplitCoins { .. }));
        let buy = tx.move_calls().next().unwrap();
        assert!(buy.is(MAIN_MODULE, BUY_FUNCTION));
        assert_eq!(buy.type_arguments, vec!["0x2::usdc::USDC".to_string()]);
        assert_eq!(tx.gas_budget(), Some(10_000_000));
    }

    #[tokio::test]
    async fn insufficient_balance_submits_nothing() {
        let (purchaser, wallet) = purchaser(&[60_000, 30_000], Ok(vec![owned(42)]));

        let err = purchaser.purchase(ObjectId::from_u64(7)).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InsufficientBalance);
        assert!(wallet.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn declined_signature_is_purchase_failed() {
        let (purchaser, _) = purchaser(&[200_000], Err(WalletError::Declined));
        let err = purchaser.purchase(ObjectId::from_u64(7)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PurchaseFailed);
    }

    #[tokio::test]
    async fn no_created_object_is_purchase_failed() {
        let (purchaser, _) = purchaser(&[200_000], Ok(vec![]));
        let err = purchaser.purchase(ObjectId::from_u64(7)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PurchaseFailed);
    }

    #[tokio::test]
    async fn ensure_service_reuses_configured_id() {
        let (purchaser, wallet) = purchaser(&[], Ok(vec![]));
        let id = purchaser.ensure_service(Some(ObjectId::from_u64(3))).await.unwrap();
        assert_eq!(id, ObjectId::from_u64(3));
        assert!(wallet.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn ensure_service_takes_shared_object() {
        let shared = CreatedObject {
            id: ObjectId::from_u64(9),
            owner: Owner::Shared,
            object_type: "main::Service".into(),
        };
        let (purchaser, wallet) = purchaser(&[], Ok(vec![owned(1), shared]));
        let id = purchaser.ensure_service(None).await.unwrap();
        assert_eq!(id, ObjectId::from_u64(9));
        let submitted = wallet.submitted.lock().unwrap();
        assert!(submitted[0].move_calls().next().unwrap().is(MAIN_MODULE, SETUP_FUNCTION));
    }
}
