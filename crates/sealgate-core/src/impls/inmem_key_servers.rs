//! InMemoryKeyServers - 開発用の閾値鍵サーバー群
//!
//! # 暗号化
//! 1. ランダムな data key で本文を ChaCha20-Poly1305 暗号化（aad = id || package）
//! 2. data key を Shamir 分割（`sharks`）し、サーバー数ぶんの share を作る
//! 3. share i はサーバー i の id 鍵 `blake3::keyed_hash(master_i, id)` で包む
//!
//! # 鍵の取得
//! 各サーバーは session certificate を検証し、approval transaction を台帳で
//! dry-run する。通ったサーバーだけが id 鍵を返す。閾値以上集まれば復号できる。
//!
//! 取得した id 鍵は `(server, address, id)` 単位でキャッシュする。

use async_trait::async_trait;
use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use serde::{Deserialize, Serialize};
use sharks::{Share, Sharks};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::app::approval::{APPROVE_FUNCTION, APPROVE_MODULE};
use crate::domain::transaction::{Argument, PureValue};
use crate::domain::{Address, EncryptionId, ObjectId, SessionCertificate, TransactionBuilder};
use crate::ports::{Clock, Ledger, LedgerError, ThresholdEncryption, ThresholdError};

const FORMAT_VERSION: u8 = 1;
const NONCE_SIZE: usize = 12;

type IdKey = [u8; 32];

struct KeyServer {
    name: String,
    master_key: [u8; 32],
    online: AtomicBool,
}

/// Share of the data key wrapped under one server's id key.
#[derive(Debug, Serialize, Deserialize)]
struct WrappedShare {
    server: usize,
    #[serde(with = "hex")]
    nonce: Vec<u8>,
    #[serde(with = "hex")]
    ciphertext: Vec<u8>,
}

/// Wire format of an encrypted artifact.
#[derive(Debug, Serialize, Deserialize)]
struct EncryptedObject {
    version: u8,
    package_id: ObjectId,
    id: EncryptionId,
    threshold: u8,
    shares: Vec<WrappedShare>,
    #[serde(with = "hex")]
    nonce: Vec<u8>,
    #[serde(with = "hex")]
    ciphertext: Vec<u8>,
}

impl EncryptedObject {
    fn parse(bytes: &[u8]) -> Result<Self, ThresholdError> {
        let object: Self = serde_json::from_slice(bytes)
            .map_err(|e| ThresholdError::InvalidCiphertext(e.to_string()))?;
        if object.version != FORMAT_VERSION {
            return Err(ThresholdError::InvalidCiphertext(format!(
                "unsupported version {}",
                object.version
            )));
        }
        Ok(object)
    }

    fn aad(&self) -> Vec<u8> {
        associated_data(&self.id, &self.package_id)
    }
}

pub struct InMemoryKeyServers {
    ledger: Arc<dyn Ledger>,
    clock: Arc<dyn Clock>,
    servers: Vec<KeyServer>,
    keys: Mutex<HashMap<(usize, Address, EncryptionId), IdKey>>,
}

impl InMemoryKeyServers {
    /// `count` servers with fresh random master keys, all online.
    pub fn new(ledger: Arc<dyn Ledger>, clock: Arc<dyn Clock>, count: usize) -> Self {
        let servers = (0..count)
            .map(|i| KeyServer {
                name: format!("key-server-{}", i + 1),
                master_key: rand::random(),
                online: AtomicBool::new(true),
            })
            .collect();
        Self {
            ledger,
            clock,
            servers,
            keys: Mutex::new(HashMap::new()),
        }
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    /// Takes server `index` offline (or back online).
    pub fn set_online(&self, index: usize, online: bool) {
        if let Some(server) = self.servers.get(index) {
            server.online.store(online, Ordering::SeqCst);
            tracing::info!(server = %server.name, online, "key server availability changed");
        }
    }

    /// Drops every cached id key.
    pub fn clear_cache(&self) {
        self.lock_keys().clear();
    }

    fn lock_keys(&self) -> std::sync::MutexGuard<'_, HashMap<(usize, Address, EncryptionId), IdKey>> {
        self.keys.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn id_key(server: &KeyServer, id: &EncryptionId) -> IdKey {
        *blake3::keyed_hash(&server.master_key, id.as_bytes()).as_bytes()
    }

    fn cached_keys(&self, address: &Address, id: &EncryptionId) -> HashMap<usize, IdKey> {
        self.lock_keys()
            .iter()
            .filter(|((_, a, i), _)| a == address && i == id)
            .map(|((server, _, _), key)| (*server, *key))
            .collect()
    }
}

/// Checks the approval transaction only calls `seal_approve` of `package_id` and covers `ids`.
fn check_approval(tx_kind: &[u8], package_id: &ObjectId, ids: &[EncryptionId]) -> Result<(), String> {
    let tx = TransactionBuilder::from_kind_bytes(tx_kind)
        .map_err(|e| format!("malformed approval transaction: {e}"))?;
    let mut approved = Vec::new();
    for call in tx.move_calls() {
        if call.package != *package_id || !call.is(APPROVE_MODULE, APPROVE_FUNCTION) {
            return Err(format!("{} is not an approval call of the policy package", call.target()));
        }
        if let Some(Argument::Pure(PureValue::Bytes(id))) = call.arguments.first() {
            approved.push(id.as_slice());
        }
    }
    match ids.iter().find(|id| !approved.contains(&id.as_bytes())) {
        Some(id) => Err(format!("approval transaction does not cover id {id}")),
        None => Ok(()),
    }
}

fn associated_data(id: &EncryptionId, package_id: &ObjectId) -> Vec<u8> {
    let mut aad = id.as_bytes().to_vec();
    aad.extend_from_slice(package_id.as_bytes());
    aad
}

fn seal(key: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<(Vec<u8>, Vec<u8>), ThresholdError> {
    let cipher = ChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| ThresholdError::Misconfigured(e.to_string()))?;
    let nonce: [u8; NONCE_SIZE] = rand::random();
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad })
        .map_err(|_| ThresholdError::Misconfigured("encryption failed".into()))?;
    Ok((nonce.to_vec(), ciphertext))
}

fn open(key: &[u8], nonce: &[u8], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, ThresholdError> {
    if nonce.len() != NONCE_SIZE {
        return Err(ThresholdError::InvalidCiphertext("bad nonce length".into()));
    }
    let cipher = ChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| ThresholdError::Decryption(e.to_string()))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| ThresholdError::Decryption("authentication failed".into()))
}

#[async_trait]
impl ThresholdEncryption for InMemoryKeyServers {
    async fn encrypt(
        &self,
        package_id: &ObjectId,
        id: &EncryptionId,
        threshold: u8,
        data: &[u8],
    ) -> Result<Vec<u8>, ThresholdError> {
        if threshold == 0 || usize::from(threshold) > self.servers.len() {
            return Err(ThresholdError::Misconfigured(format!(
                "threshold {threshold} with {} key servers",
                self.servers.len()
            )));
        }
        let data_key: [u8; 32] = rand::random();
        let aad = associated_data(id, package_id);
        let (nonce, ciphertext) = seal(&data_key, data, &aad)?;

        let dealer = Sharks(threshold).dealer(&data_key);
        let shares = self
            .servers
            .iter()
            .zip(dealer)
            .enumerate()
            .map(|(i, (server, share))| {
                let (nonce, ciphertext) = seal(&Self::id_key(server, id), &Vec::from(&share), &aad)?;
                Ok(WrappedShare {
                    server: i,
                    nonce,
                    ciphertext,
                })
            })
            .collect::<Result<Vec<_>, ThresholdError>>()?;

        let object = EncryptedObject {
            version: FORMAT_VERSION,
            package_id: *package_id,
            id: id.clone(),
            threshold,
            shares,
            nonce,
            ciphertext,
        };
        serde_json::to_vec(&object).map_err(|e| ThresholdError::Misconfigured(e.to_string()))
    }

    fn parse_encryption_id(&self, encrypted: &[u8]) -> Result<EncryptionId, ThresholdError> {
        Ok(EncryptedObject::parse(encrypted)?.id)
    }

    async fn fetch_key_shares(
        &self,
        ids: &[EncryptionId],
        tx_kind: &[u8],
        certificate: &SessionCertificate,
        threshold: u8,
    ) -> Result<(), ThresholdError> {
        let address = certificate.address;
        let mut answered = 0usize;
        let mut denial: Option<String> = None;

        for (index, server) in self.servers.iter().enumerate() {
            if !server.online.load(Ordering::SeqCst) {
                tracing::debug!(server = %server.name, "key server offline");
                continue;
            }
            if !certificate.verify(tx_kind, self.clock.now()) {
                denial = Some("session certificate rejected".into());
                continue;
            }
            if let Err(reason) = check_approval(tx_kind, &certificate.package_id, ids) {
                denial = Some(reason);
                continue;
            }
            match self.ledger.simulate(&address, tx_kind).await {
                Ok(()) => {
                    let mut keys = self.lock_keys();
                    for id in ids {
                        keys.insert((index, address, id.clone()), Self::id_key(server, id));
                    }
                    answered += 1;
                }
                Err(LedgerError::Transport(reason)) => {
                    tracing::warn!(server = %server.name, %reason, "key server could not reach the ledger");
                }
                Err(e) => {
                    tracing::debug!(server = %server.name, error = %e, "approval denied");
                    denial = Some(e.to_string());
                }
            }
        }

        tracing::debug!(answered, threshold, ids = ids.len(), "key shares fetched");
        if answered >= usize::from(threshold) {
            Ok(())
        } else if let Some(reason) = denial {
            Err(ThresholdError::NoAccess(reason))
        } else {
            Err(ThresholdError::Unreachable {
                available: answered,
                threshold,
            })
        }
    }

    async fn decrypt(
        &self,
        encrypted: &[u8],
        certificate: &SessionCertificate,
        tx_kind: &[u8],
    ) -> Result<Vec<u8>, ThresholdError> {
        let object = EncryptedObject::parse(encrypted)?;
        if object.package_id != certificate.package_id {
            return Err(ThresholdError::InvalidCiphertext(format!(
                "ciphertext is bound to package {}",
                object.package_id
            )));
        }
        let needed = usize::from(object.threshold);
        let mut keys = self.cached_keys(&certificate.address, &object.id);
        if keys.len() < needed {
            self.fetch_key_shares(std::slice::from_ref(&object.id), tx_kind, certificate, object.threshold)
                .await?;
            keys = self.cached_keys(&certificate.address, &object.id);
        }

        let aad = object.aad();
        let shares = object
            .shares
            .iter()
            .filter_map(|wrapped| keys.get(&wrapped.server).map(|key| (wrapped, key)))
            .take(needed)
            .map(|(wrapped, key)| {
                let bytes = open(key, &wrapped.nonce, &wrapped.ciphertext, &aad)?;
                Share::try_from(bytes.as_slice())
                    .map_err(|e| ThresholdError::InvalidCiphertext(e.to_string()))
            })
            .collect::<Result<Vec<_>, ThresholdError>>()?;
        if shares.len() < needed {
            return Err(ThresholdError::Unreachable {
                available: shares.len(),
                threshold: object.threshold,
            });
        }

        let data_key = Sharks(object.threshold)
            .recover(shares.as_slice())
            .map_err(|e| ThresholdError::Decryption(e.to_string()))?;
        open(&data_key, &object.nonce, &object.ciphertext, &aad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::approval::{ApprovalCall, approval_tx_kind};
    use crate::domain::session::tests::sign;
    use crate::domain::{SessionKey, address_of};
    use crate::impls::InMemoryLedger;
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};
    use ed25519_dalek::SigningKey;

    struct Fixture {
        ledger: Arc<InMemoryLedger>,
        servers: InMemoryKeyServers,
        clock: Arc<FixedClock>,
        package: ObjectId,
        service: ObjectId,
        key: SigningKey,
    }

    fn fixture(count: usize) -> Fixture {
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()));
        let package = ObjectId::from_u64(0x5ea1);
        let ledger = Arc::new(InMemoryLedger::new(
            package,
            "0x2::usdc::USDC",
            100,
            chrono::Duration::days(1),
            clock.clone(),
        ));
        let servers = InMemoryKeyServers::new(ledger.clone(), clock.clone(), count);
        let service = ledger.insert_service(Address::from_u64(0xad));
        Fixture {
            ledger,
            servers,
            clock,
            package,
            service,
            key: SigningKey::from_bytes(&[3; 32]),
        }
    }

    impl Fixture {
        fn id(&self) -> EncryptionId {
            EncryptionId::new(&self.service, &[1, 2, 3, 4, 5])
        }

        async fn subscribe(&self) -> ObjectId {
            use crate::app::purchaser::{BUY_FUNCTION, MAIN_MODULE};
            use crate::domain::clock_object_id;
            let owner = address_of(&self.key.verifying_key());
            let coin = self.ledger.mint(owner, 100);
            let mut tx = TransactionBuilder::new();
            let args = vec![tx.object(coin), tx.object(self.service), tx.object(clock_object_id())];
            tx.move_call(self.package, MAIN_MODULE, BUY_FUNCTION, vec!["0x2::usdc::USDC".into()], args);
            tx.set_gas_budget(1);
            self.ledger.execute(&owner, &tx).await.unwrap().created[0].id
        }

        fn request(&self, capability: ObjectId) -> (SessionCertificate, Vec<u8>) {
            let address = address_of(&self.key.verifying_key());
            let mut session = SessionKey::create(address, self.package, 10, self.clock.now());
            session
                .set_personal_message_signature(sign(&self.key, &session.personal_message()))
                .unwrap();
            let approval = ApprovalCall::new(self.package, self.service, capability);
            let tx_kind = approval_tx_kind(&approval, &[self.id()]).unwrap();
            (session.certificate(&tx_kind).unwrap(), tx_kind)
        }
    }

    #[tokio::test]
    async fn subscriber_recovers_plaintext() {
        let f = fixture(3);
        let encrypted = f.servers.encrypt(&f.package, &f.id(), 2, b"audit report").await.unwrap();
        assert_eq!(f.servers.parse_encryption_id(&encrypted).unwrap(), f.id());

        let cap = f.subscribe().await;
        let (cert, tx_kind) = f.request(cap);
        f.servers.fetch_key_shares(&[f.id()], &tx_kind, &cert, 2).await.unwrap();

        assert_eq!(f.servers.decrypt(&encrypted, &cert, &tx_kind).await.unwrap(), b"audit report");
    }

    #[tokio::test]
    async fn cached_keys_survive_outage_until_cleared() {
        let f = fixture(3);
        let encrypted = f.servers.encrypt(&f.package, &f.id(), 2, b"cached").await.unwrap();
        let cap = f.subscribe().await;
        let (cert, tx_kind) = f.request(cap);
        f.servers.fetch_key_shares(&[f.id()], &tx_kind, &cert, 2).await.unwrap();

        for i in 0..f.servers.server_count() {
            f.servers.set_online(i, false);
        }
        assert_eq!(f.servers.decrypt(&encrypted, &cert, &tx_kind).await.unwrap(), b"cached");

        f.servers.clear_cache();
        assert_eq!(
            f.servers.decrypt(&encrypted, &cert, &tx_kind).await.unwrap_err(),
            ThresholdError::Unreachable { available: 0, threshold: 2 }
        );
    }

    #[tokio::test]
    async fn threshold_of_servers_is_enough() {
        let f = fixture(3);
        let encrypted = f.servers.encrypt(&f.package, &f.id(), 2, b"x").await.unwrap();
        f.servers.set_online(0, false);

        let cap = f.subscribe().await;
        let (cert, tx_kind) = f.request(cap);

        assert_eq!(f.servers.decrypt(&encrypted, &cert, &tx_kind).await.unwrap(), b"x");
    }

    #[tokio::test]
    async fn too_few_servers_is_unreachable() {
        let f = fixture(3);
        f.servers.set_online(0, false);
        f.servers.set_online(1, false);

        let cap = f.subscribe().await;
        let (cert, tx_kind) = f.request(cap);
        let err = f.servers.fetch_key_shares(&[f.id()], &tx_kind, &cert, 2).await.unwrap_err();

        assert_eq!(err, ThresholdError::Unreachable { available: 1, threshold: 2 });
    }

    #[tokio::test]
    async fn unknown_capability_is_denied() {
        let f = fixture(2);
        let (cert, tx_kind) = f.request(ObjectId::from_u64(0xdead));
        let err = f.servers.fetch_key_shares(&[f.id()], &tx_kind, &cert, 2).await.unwrap_err();
        assert!(matches!(err, ThresholdError::NoAccess(_)));
    }

    #[tokio::test]
    async fn expired_capability_is_denied() {
        let f = fixture(2);
        let cap = f.subscribe().await;
        f.clock.advance(chrono::Duration::days(1));
        let (cert, tx_kind) = f.request(cap);

        let err = f.servers.fetch_key_shares(&[f.id()], &tx_kind, &cert, 2).await.unwrap_err();
        assert!(matches!(err, ThresholdError::NoAccess(_)));
    }

    #[tokio::test]
    async fn tampered_request_signature_is_denied() {
        let f = fixture(2);
        let cap = f.subscribe().await;
        let (cert, _) = f.request(cap);
        let other = approval_tx_kind(
            &ApprovalCall::new(f.package, f.service, cap),
            &[EncryptionId::new(&f.service, &[9])],
        )
        .unwrap();

        let err = f.servers.fetch_key_shares(&[f.id()], &other, &cert, 2).await.unwrap_err();
        assert_eq!(err, ThresholdError::NoAccess("session certificate rejected".into()));
    }

    #[tokio::test]
    async fn corrupted_ciphertext_is_rejected() {
        let f = fixture(2);
        assert!(matches!(
            f.servers.parse_encryption_id(b"not an object"),
            Err(ThresholdError::InvalidCiphertext(_))
        ));
    }

    #[tokio::test]
    async fn threshold_above_server_count_is_misconfigured() {
        let f = fixture(2);
        let err = f.servers.encrypt(&f.package, &f.id(), 3, b"x").await.unwrap_err();
        assert!(matches!(err, ThresholdError::Misconfigured(_)));
    }
}
