//! Approval call - 鍵 share の解放を許可する `seal_approve` 呼び出し
//!
//! この呼び出しは台帳で実行されることはなく、鍵サーバーが dry-run して
//! capability の有効性を確かめるためだけに使われる。

use crate::domain::{EncryptionId, ObjectId, TransactionBuilder, clock_object_id};

pub const APPROVE_MODULE: &str = "subscription";
pub const APPROVE_FUNCTION: &str = "seal_approve";

/// Appends an access-approval call for one encryption id.
pub trait MoveCallConstructor: Send + Sync {
    fn construct(&self, tx: &mut TransactionBuilder, id: &EncryptionId);
}

impl<F> MoveCallConstructor for F
where
    F: Fn(&mut TransactionBuilder, &EncryptionId) + Send + Sync,
{
    fn construct(&self, tx: &mut TransactionBuilder, id: &EncryptionId) {
        self(tx, id)
    }
}

/// `subscription::seal_approve(id, subscription, service, clock)` for one capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApprovalCall {
    pub package_id: ObjectId,
    pub service_id: ObjectId,
    pub capability_id: ObjectId,
}

impl ApprovalCall {
    pub fn new(package_id: ObjectId, service_id: ObjectId, capability_id: ObjectId) -> Self {
        Self {
            package_id,
            service_id,
            capability_id,
        }
    }
}

impl MoveCallConstructor for ApprovalCall {
    fn construct(&self, tx: &mut TransactionBuilder, id: &EncryptionId) {
        let args = vec![
            tx.pure_bytes(id.as_bytes()),
            tx.object(self.capability_id),
            tx.object(self.service_id),
            tx.object(clock_object_id()),
        ];
        tx.move_call(self.package_id, APPROVE_MODULE, APPROVE_FUNCTION, vec![], args);
    }
}

/// Transaction kind bytes approving every id in `ids`, for simulation only.
pub fn approval_tx_kind(
    constructor: &dyn MoveCallConstructor,
    ids: &[EncryptionId],
) -> Result<Vec<u8>, serde_json::Error> {
    let mut tx = TransactionBuilder::new();
    for id in ids {
        constructor.construct(&mut tx, id);
    }
    tx.kind_bytes()
}
