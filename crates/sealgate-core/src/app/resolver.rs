//! CapabilityResolver - 購入直後の capability を台帳から読めるまで待つ
//!
//! # 学習ポイント
//! - 台帳の read-after-write は即時ではない
//! - 読み取りは副作用がないので何度リトライしても安全
//! - リトライ予算を使い切ったら `CapabilityUnresolved`（`PurchaseFailed` とは別）

use std::sync::Arc;

use super::retry::{BackoffPolicy, retry_fetch};
use crate::domain::{Capability, ObjectId, PipelineError};
use crate::ports::{Ledger, LedgerError, Sleeper};

pub struct CapabilityResolver {
    ledger: Arc<dyn Ledger>,
    sleeper: Arc<dyn Sleeper>,
    policy: BackoffPolicy,
    capability_ttl: chrono::Duration,
}

impl CapabilityResolver {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        sleeper: Arc<dyn Sleeper>,
        policy: BackoffPolicy,
        capability_ttl: chrono::Duration,
    ) -> Self {
        Self {
            ledger,
            sleeper,
            policy,
            capability_ttl,
        }
    }

    /// Polls the ledger until `id` is readable with its fields populated.
    pub async fn resolve(&self, id: &ObjectId) -> Result<Capability, PipelineError> {
        let ledger = &self.ledger;
        let ttl = self.capability_ttl;
        let fetched = retry_fetch(&self.policy, self.sleeper.as_ref(), move |_| async move {
            let object = ledger.get_object(id).await?;
            Ok::<_, LedgerError>(
                object
                    .content
                    .and_then(|c| Capability::from_fields(&c.fields, ttl)),
            )
        })
        .await;

        match fetched {
            Ok(fetched) => {
                tracing::debug!(capability = %id, attempts = fetched.attempts, "capability resolved");
                Ok(fetched.value)
            }
            Err(exhausted) => {
                tracing::warn!(
                    capability = %id,
                    attempts = exhausted.attempts,
                    last_error = ?exhausted.last_error,
                    "capability unresolved"
                );
                Err(PipelineError::CapabilityUnresolved {
                    id: *id,
                    attempts: exhausted.attempts,
                })
            }
        }
    }
}
