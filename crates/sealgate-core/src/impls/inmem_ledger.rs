//! InMemoryLedger - 開発用の台帳
//!
//! # 学習ポイント
//! - transaction は state の clone に適用し、成功したときだけ差し替える（atomic）
//! - 作成直後の object は `visibility_lag` 回の読み取りまで content を返さない
//! - `simulate` は同じ処理を clone に対して行い、結果を捨てる（dry-run）
//!
//! # 対応している Move 呼び出し
//! - `main::setup_suiaudit_service()` → shared な Service を作成
//! - `main::buy_suiaudit_key<C>(coin, service, clock)` → payer 所有の Subscription を作成
//! - `subscription::seal_approve(id, subscription, service, clock)` → 検査のみ

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::app::approval::{APPROVE_FUNCTION, APPROVE_MODULE};
use crate::app::purchaser::{BUY_FUNCTION, MAIN_MODULE, SETUP_FUNCTION};
use crate::domain::transaction::{Argument, PureValue};
use crate::domain::{
    Address, Coin, Command, EncryptionId, MoveCall, ObjectId, TransactionBuilder, clock_object_id,
};
use crate::ports::{
    Clock, CreatedObject, Ledger, LedgerError, LedgerObject, ObjectContent, Owner,
    TransactionEffects,
};

/// Abort code of a failed access check (`ENoAccess`).
pub const E_NO_ACCESS: u64 = 77;
/// Abort code of a payment that does not match the service fee.
pub const E_INVALID_FEE: u64 = 1;

#[derive(Debug, Clone)]
struct CoinObject {
    owner: Address,
    coin_type: String,
    balance: u64,
}

#[derive(Debug, Clone)]
struct ServiceObject {
    owner: Address,
    fee: u64,
}

#[derive(Debug, Clone)]
struct SubscriptionObject {
    owner: Address,
    service_id: ObjectId,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
struct LedgerState {
    coins: HashMap<ObjectId, CoinObject>,
    services: HashMap<ObjectId, ServiceObject>,
    subscriptions: HashMap<ObjectId, SubscriptionObject>,
    /// Reads left before a created object exposes its content.
    hidden_reads: HashMap<ObjectId, u32>,
    executed: Vec<TransactionBuilder>,
}

pub struct InMemoryLedger {
    package_id: ObjectId,
    coin_type: String,
    fee: u64,
    capability_ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
    visibility_lag: Mutex<u32>,
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new(
        package_id: ObjectId,
        coin_type: impl Into<String>,
        fee: u64,
        capability_ttl: chrono::Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            package_id,
            coin_type: coin_type.into(),
            fee,
            capability_ttl,
            clock,
            visibility_lag: Mutex::new(0),
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Number of reads a newly created object stays without content.
    pub fn set_visibility_lag(&self, reads: u32) {
        *self.visibility_lag.lock().unwrap_or_else(|e| e.into_inner()) = reads;
    }

    /// Creates a coin of the ledger's coin type owned by `owner`.
    pub fn mint(&self, owner: Address, balance: u64) -> ObjectId {
        let id = ObjectId::random();
        self.lock().coins.insert(
            id,
            CoinObject {
                owner,
                coin_type: self.coin_type.clone(),
                balance,
            },
        );
        id
    }

    /// Registers an existing service object (as if set up earlier).
    pub fn insert_service(&self, owner: Address) -> ObjectId {
        let id = ObjectId::random();
        self.lock().services.insert(id, ServiceObject { owner, fee: self.fee });
        id
    }

    pub fn balance_of(&self, owner: &Address) -> u128 {
        self.lock()
            .coins
            .values()
            .filter(|c| c.owner == *owner && c.coin_type == self.coin_type)
            .map(|c| u128::from(c.balance))
            .sum()
    }

    pub fn subscriptions_of(&self, owner: &Address) -> Vec<ObjectId> {
        self.lock()
            .subscriptions
            .iter()
            .filter(|(_, s)| s.owner == *owner)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Every successfully executed transaction, in order.
    pub fn executed(&self) -> Vec<TransactionBuilder> {
        self.lock().executed.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn apply(
        &self,
        state: &mut LedgerState,
        sender: &Address,
        tx: &TransactionBuilder,
    ) -> Result<Vec<CreatedObject>, LedgerError> {
        let mut exec = Execution {
            ledger: self,
            state,
            sender: *sender,
            results: Vec::new(),
            created: Vec::new(),
        };
        for command in tx.commands() {
            let result = exec.command(command)?;
            exec.results.push(result);
        }
        Ok(exec.created)
    }
}

/// One transaction being applied to a scratch copy of the state.
struct Execution<'a> {
    ledger: &'a InMemoryLedger,
    state: &'a mut LedgerState,
    sender: Address,
    results: Vec<Vec<ObjectId>>,
    created: Vec<CreatedObject>,
}

impl Execution<'_> {
    fn command(&mut self, command: &Command) -> Result<Vec<ObjectId>, LedgerError> {
        match command {
            Command::MergeCoins {
                destination,
                sources,
            } => {
                let destination = self.object(destination)?;
                for source in sources {
                    let source = self.object(source)?;
                    if source == destination {
                        return Err(rejected("cannot merge a coin into itself"));
                    }
                    let coin = self.take_coin(&source)?;
                    let dest = self.owned_coin(&destination)?;
                    if dest.coin_type != coin.coin_type {
                        return Err(rejected("cannot merge coins of different types"));
                    }
                    dest.balance = dest
                        .balance
                        .checked_add(coin.balance)
                        .ok_or_else(|| rejected("coin balance overflow"))?;
                }
                Ok(vec![])
            }
            Command::SplitCoins { coin, amounts } => {
                let coin_id = self.object(coin)?;
                let mut split = Vec::with_capacity(amounts.len());
                for amount in amounts {
                    let amount = self.pure_u64(amount)?;
                    let source = self.owned_coin(&coin_id)?;
                    source.balance = source.balance.checked_sub(amount).ok_or(LedgerError::Aborted {
                        function: "split_coins".into(),
                        code: 0,
                    })?;
                    let piece = CoinObject {
                        balance: amount,
                        ..source.clone()
                    };
                    let id = ObjectId::random();
                    self.state.coins.insert(id, piece);
                    split.push(id);
                }
                Ok(split)
            }
            Command::MoveCall(call) => self.move_call(call),
        }
    }

    fn move_call(&mut self, call: &MoveCall) -> Result<Vec<ObjectId>, LedgerError> {
        if call.package != self.ledger.package_id {
            return Err(rejected(&format!("package {} is not published", call.package)));
        }
        if call.is(MAIN_MODULE, SETUP_FUNCTION) {
            let id = ObjectId::random();
            self.state.services.insert(
                id,
                ServiceObject {
                    owner: self.sender,
                    fee: self.ledger.fee,
                },
            );
            self.created.push(CreatedObject {
                id,
                owner: Owner::Shared,
                object_type: format!("{}::main::Service", call.package),
            });
            return Ok(vec![id]);
        }
        if call.is(MAIN_MODULE, BUY_FUNCTION) {
            return self.buy(call);
        }
        if call.is(APPROVE_MODULE, APPROVE_FUNCTION) {
            self.seal_approve(call)?;
            return Ok(vec![]);
        }
        Err(rejected(&format!("function {} does not exist", call.target())))
    }

    fn buy(&mut self, call: &MoveCall) -> Result<Vec<ObjectId>, LedgerError> {
        if call.type_arguments.first() != Some(&self.ledger.coin_type) {
            return Err(rejected("type argument does not match the service coin"));
        }
        let [coin, service, clock] = call.arguments.as_slice() else {
            return Err(rejected("buy expects (coin, service, clock)"));
        };
        let coin_id = self.object(coin)?;
        let service_id = self.object(service)?;
        self.expect_clock(clock)?;

        let service = self
            .state
            .services
            .get(&service_id)
            .cloned()
            .ok_or(LedgerError::NotFound(service_id))?;
        let payment = self.take_coin(&coin_id)?;
        if payment.balance != service.fee {
            return Err(LedgerError::Aborted {
                function: call.target(),
                code: E_INVALID_FEE,
            });
        }
        self.state.coins.insert(
            ObjectId::random(),
            CoinObject {
                owner: service.owner,
                ..payment
            },
        );

        let id = ObjectId::random();
        self.state.subscriptions.insert(
            id,
            SubscriptionObject {
                owner: self.sender,
                service_id,
                created_at: self.ledger.clock.now(),
            },
        );
        self.created.push(CreatedObject {
            id,
            owner: Owner::AddressOwner(self.sender),
            object_type: format!("{}::subscription::Subscription", call.package),
        });
        Ok(vec![id])
    }

    fn seal_approve(&mut self, call: &MoveCall) -> Result<(), LedgerError> {
        let no_access = || LedgerError::Aborted {
            function: call.target(),
            code: E_NO_ACCESS,
        };
        let [id, subscription, service, clock] = call.arguments.as_slice() else {
            return Err(rejected("seal_approve expects (id, subscription, service, clock)"));
        };
        let Argument::Pure(PureValue::Bytes(id)) = id else {
            return Err(rejected("seal_approve id must be bytes"));
        };
        let subscription_id = self.object(subscription)?;
        let service_id = self.object(service)?;
        self.expect_clock(clock)?;

        let Some(sub) = self.state.subscriptions.get(&subscription_id) else {
            return Err(no_access());
        };
        let valid = sub.owner == self.sender
            && sub.service_id == service_id
            && EncryptionId::from_bytes(id.clone()).has_prefix(&service_id)
            && sub.created_at + self.ledger.capability_ttl > self.ledger.clock.now();
        if valid { Ok(()) } else { Err(no_access()) }
    }

    fn object(&self, argument: &Argument) -> Result<ObjectId, LedgerError> {
        let missing = || rejected("argument refers to a missing result");
        match argument {
            Argument::Object(id) => Ok(*id),
            Argument::Result(i) => self
                .results
                .get(usize::from(*i))
                .and_then(|r| r.first())
                .copied()
                .ok_or_else(missing),
            Argument::NestedResult(i, j) => self
                .results
                .get(usize::from(*i))
                .and_then(|r| r.get(usize::from(*j)))
                .copied()
                .ok_or_else(missing),
            Argument::Pure(_) => Err(rejected("expected an object argument")),
        }
    }

    fn pure_u64(&self, argument: &Argument) -> Result<u64, LedgerError> {
        match argument {
            Argument::Pure(PureValue::U64(v)) => Ok(*v),
            _ => Err(rejected("expected a u64 argument")),
        }
    }

    fn expect_clock(&self, argument: &Argument) -> Result<(), LedgerError> {
        if self.object(argument)? == clock_object_id() {
            Ok(())
        } else {
            Err(rejected("expected the clock object"))
        }
    }

    fn owned_coin(&mut self, id: &ObjectId) -> Result<&mut CoinObject, LedgerError> {
        let sender = self.sender;
        match self.state.coins.get_mut(id) {
            Some(coin) if coin.owner == sender => Ok(coin),
            Some(_) => Err(rejected(&format!("coin {id} is not owned by {sender}"))),
            None => Err(LedgerError::NotFound(*id)),
        }
    }

    fn take_coin(&mut self, id: &ObjectId) -> Result<CoinObject, LedgerError> {
        self.owned_coin(id)?;
        self.state
            .coins
            .remove(id)
            .ok_or(LedgerError::NotFound(*id))
    }
}

fn rejected(reason: &str) -> LedgerError {
    LedgerError::Rejected(reason.to_string())
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn coins(&self, owner: &Address, coin_type: &str) -> Result<Vec<Coin>, LedgerError> {
        let state = self.lock();
        let mut coins: Vec<Coin> = state
            .coins
            .iter()
            .filter(|(_, c)| c.owner == *owner && c.coin_type == coin_type)
            .map(|(id, c)| Coin::new(*id, c.balance))
            .collect();
        coins.sort_by(|a, b| b.balance.cmp(&a.balance).then(a.id.cmp(&b.id)));
        Ok(coins)
    }

    async fn get_object(&self, id: &ObjectId) -> Result<LedgerObject, LedgerError> {
        let mut state = self.lock();
        if let Some(left) = state.hidden_reads.get_mut(id)
            && *left > 0
        {
            *left -= 1;
            return Ok(LedgerObject {
                id: *id,
                content: None,
            });
        }

        let content = if let Some(sub) = state.subscriptions.get(id) {
            ObjectContent {
                object_type: format!("{}::subscription::Subscription", self.package_id),
                fields: json!({
                    "id": { "id": id.to_string() },
                    "created_at": sub.created_at.timestamp_millis().to_string(),
                    "service_id": sub.service_id.to_string(),
                }),
            }
        } else if let Some(service) = state.services.get(id) {
            ObjectContent {
                object_type: format!("{}::main::Service", self.package_id),
                fields: json!({
                    "id": { "id": id.to_string() },
                    "fee": service.fee.to_string(),
                    "ttl": self.capability_ttl.num_milliseconds().to_string(),
                    "owner": service.owner.to_string(),
                }),
            }
        } else if let Some(coin) = state.coins.get(id) {
            ObjectContent {
                object_type: format!("0x2::coin::Coin<{}>", coin.coin_type),
                fields: json!({
                    "id": { "id": id.to_string() },
                    "balance": coin.balance.to_string(),
                }),
            }
        } else {
            return Err(LedgerError::NotFound(*id));
        };
        Ok(LedgerObject {
            id: *id,
            content: Some(content),
        })
    }

    async fn execute(
        &self,
        sender: &Address,
        tx: &TransactionBuilder,
    ) -> Result<TransactionEffects, LedgerError> {
        if tx.gas_budget().is_none() {
            return Err(rejected("gas budget not set"));
        }
        let lag = *self.visibility_lag.lock().unwrap_or_else(|e| e.into_inner());
        let mut state = self.lock();
        let mut scratch = state.clone();
        let created = self.apply(&mut scratch, sender, tx)?;

        for object in &created {
            scratch.hidden_reads.insert(object.id, lag);
        }
        scratch.executed.push(tx.clone());
        let kind = tx
            .kind_bytes()
            .map_err(|e| rejected(&format!("unserializable transaction: {e}")))?;
        let mut hasher = blake3::Hasher::new();
        hasher.update(sender.as_bytes());
        hasher.update(&(scratch.executed.len() as u64).to_le_bytes());
        hasher.update(&kind);
        *state = scratch;

        Ok(TransactionEffects {
            digest: hasher.finalize().to_hex().to_string(),
            created,
        })
    }

    async fn simulate(&self, sender: &Address, tx_kind: &[u8]) -> Result<(), LedgerError> {
        let tx = TransactionBuilder::from_kind_bytes(tx_kind)
            .map_err(|e| rejected(&format!("malformed transaction kind: {e}")))?;
        let mut scratch = self.lock().clone();
        self.apply(&mut scratch, sender, &tx).map(|_| ())
    }

    async fn ledger_time(&self) -> Result<DateTime<Utc>, LedgerError> {
        Ok(self.clock.now())
    }
}
