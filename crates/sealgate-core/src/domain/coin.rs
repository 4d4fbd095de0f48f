//! Coin selection: assemble an exact payment amount from a wallet's coins.
//!
//! # アルゴリズム
//! 1. 単独で `amount` 以上の coin があれば、そこから split する（触る object が最小）
//! 2. なければ合計を計算し、不足なら `InsufficientBalance`
//! 3. 足りる場合は先頭を primary とし、残りを merge してから split
//!
//! 選択自体は純粋関数で、チェーンへの副作用は呼び出し側が transaction を
//! 送信するまで発生しない。

use serde::{Deserialize, Serialize};

use super::ids::ObjectId;
use super::transaction::{Argument, TransactionBuilder};

/// One fungible-token object and its balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub id: ObjectId,
    pub balance: u64,
}

impl Coin {
    pub fn new(id: ObjectId, balance: u64) -> Self {
        Self { id, balance }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("insufficient balance: need {required}, have {available}")]
pub struct InsufficientBalance {
    pub required: u64,
    pub available: u128,
}

/// How the payment coin is produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentPlan {
    /// Split `amount` off a single coin that already covers it.
    Split { source: Coin, amount: u64 },

    /// Merge `merged` into `primary`, then split `amount` off the result.
    MergeThenSplit {
        primary: Coin,
        merged: Vec<Coin>,
        amount: u64,
    },
}

impl PaymentPlan {
    pub fn select(coins: &[Coin], amount: u64) -> Result<Self, InsufficientBalance> {
        if let Some(source) = coins.iter().find(|c| c.balance >= amount) {
            return Ok(Self::Split {
                source: *source,
                amount,
            });
        }

        let available: u128 = coins.iter().map(|c| u128::from(c.balance)).sum();
        let Some((primary, rest)) = coins.split_first() else {
            return Err(InsufficientBalance {
                required: amount,
                available,
            });
        };
        if available < u128::from(amount) {
            return Err(InsufficientBalance {
                required: amount,
                available,
            });
        }

        Ok(Self::MergeThenSplit {
            primary: *primary,
            merged: rest.to_vec(),
            amount,
        })
    }

    pub fn amount(&self) -> u64 {
        match self {
            Self::Split { amount, .. } | Self::MergeThenSplit { amount, .. } => *amount,
        }
    }

    /// Coin object that keeps the residual change.
    pub fn primary(&self) -> &Coin {
        match self {
            Self::Split { source, .. } => source,
            Self::MergeThenSplit { primary, .. } => primary,
        }
    }

    /// Every coin object the plan touches.
    pub fn inputs(&self) -> Vec<ObjectId> {
        match self {
            Self::Split { source, .. } => vec![source.id],
            Self::MergeThenSplit {
                primary, merged, ..
            } => std::iter::once(primary.id)
                .chain(merged.iter().map(|c| c.id))
                .collect(),
        }
    }

    /// Residual left on the primary coin after the split.
    pub fn change(&self) -> u128 {
        let total: u128 = match self {
            Self::Split { source, .. } => u128::from(source.balance),
            Self::MergeThenSplit {
                primary, merged, ..
            } => {
                u128::from(primary.balance) + merged.iter().map(|c| u128::from(c.balance)).sum::<u128>()
            }
        };
        total - u128::from(self.amount())
    }

    /// Appends the merge/split commands and returns the payment coin argument.
    pub fn apply(&self, tx: &mut TransactionBuilder) -> Argument {
        let primary = tx.object(self.primary().id);
        if let Self::MergeThenSplit { merged, .. } = self
            && !merged.is_empty()
        {
            let sources = merged.iter().map(|c| tx.object(c.id)).collect();
            tx.merge_coins(primary.clone(), sources);
        }
        let amount = tx.pure_u64(self.amount());
        tx.split_coins(primary, vec![amount])
    }
}
