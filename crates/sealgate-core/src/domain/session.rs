//! SessionKey - 短命な復号セッション
//!
//! # 状態遷移
//! ```text
//! Absent → Created → Signed → (Valid: 期限内かつ address 一致) → Expired
//! ```
//!
//! - `create()` で 1 つの address と 1 つの policy package に束縛された鍵を作る
//! - wallet が personal message に署名するまで key share の要求には使えない
//! - 期限は作成時刻からの wall-clock（個々の download とは無関係）

use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use super::ids::{Address, ObjectId};

/// Derives the account address of an ed25519 public key.
pub fn address_of(public_key: &VerifyingKey) -> Address {
    Address::from_bytes(*blake3::hash(public_key.as_bytes()).as_bytes())
}

/// A wallet signature over a personal message, with the signer's public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalSignature {
    #[serde(with = "hex_array")]
    pub public_key: [u8; 32],
    #[serde(with = "hex_array")]
    pub signature: [u8; 64],
}

impl PersonalSignature {
    /// Checks the signature over `message` and that it was made by `address`.
    pub fn verify(&self, address: &Address, message: &[u8]) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(&self.public_key) else {
            return false;
        };
        if address_of(&key) != *address {
            return false;
        }
        key.verify(message, &Signature::from_bytes(&self.signature))
            .is_ok()
    }
}

/// Lifecycle state of a session key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created but not yet signed by the wallet.
    Created,
    /// Signed and unexpired.
    Valid,
    Expired,
}

/// Short-lived decryption session bound to one address and one policy package.
pub struct SessionKey {
    address: Address,
    package_id: ObjectId,
    created_at: DateTime<Utc>,
    ttl: Duration,
    ephemeral: SigningKey,
    signature: Option<PersonalSignature>,
}

impl SessionKey {
    pub fn create(
        address: Address,
        package_id: ObjectId,
        ttl_minutes: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            address,
            package_id,
            created_at: now,
            ttl: Duration::minutes(i64::from(ttl_minutes)),
            ephemeral: SigningKey::generate(&mut rand::rngs::OsRng),
            signature: None,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn package_id(&self) -> ObjectId {
        self.package_id
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + self.ttl
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    pub fn state(&self, now: DateTime<Utc>) -> SessionState {
        if self.is_expired(now) {
            SessionState::Expired
        } else if self.is_signed() {
            SessionState::Valid
        } else {
            SessionState::Created
        }
    }

    /// Usable for `address` at `now`: signed, unexpired and bound to that address.
    pub fn is_usable_for(&self, address: &Address, now: DateTime<Utc>) -> bool {
        self.state(now) == SessionState::Valid && self.address == *address
    }

    pub fn session_public_key(&self) -> [u8; 32] {
        self.ephemeral.verifying_key().to_bytes()
    }

    /// Canonical message the wallet signs to authorize this session.
    pub fn personal_message(&self) -> Vec<u8> {
        format!(
            "Accessing keys of package {} for {} mins from {}, session key {}",
            self.package_id,
            self.ttl.num_minutes(),
            self.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            hex::encode(self.session_public_key()),
        )
        .into_bytes()
    }

    /// Attaches the wallet signature; rejects a signature that does not verify.
    pub fn set_personal_message_signature(
        &mut self,
        signature: PersonalSignature,
    ) -> Result<(), InvalidSessionSignature> {
        if !signature.verify(&self.address, &self.personal_message()) {
            return Err(InvalidSessionSignature);
        }
        self.signature = Some(signature);
        Ok(())
    }

    /// Certificate presented to key servers, or `None` while unsigned.
    ///
    /// The request signature binds the transaction kind bytes to this session.
    pub fn certificate(&self, tx_kind: &[u8]) -> Option<SessionCertificate> {
        let signature = self.signature.clone()?;
        Some(SessionCertificate {
            address: self.address,
            package_id: self.package_id,
            personal_message: self.personal_message(),
            wallet_signature: signature,
            session_public_key: self.session_public_key(),
            request_signature: self.ephemeral.sign(tx_kind).to_bytes().to_vec(),
            expires_at: self.expires_at(),
        })
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey")
            .field("address", &self.address)
            .field("package_id", &self.package_id)
            .field("created_at", &self.created_at)
            .field("ttl_minutes", &self.ttl.num_minutes())
            .field("signed", &self.is_signed())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("personal message signature does not match the session key")]
pub struct InvalidSessionSignature;

/// What a key server sees of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCertificate {
    pub address: Address,
    pub package_id: ObjectId,
    #[serde(with = "hex_vec")]
    pub personal_message: Vec<u8>,
    pub wallet_signature: PersonalSignature,
    #[serde(with = "hex_array")]
    pub session_public_key: [u8; 32],
    #[serde(with = "hex_vec")]
    pub request_signature: Vec<u8>,
    pub expires_at: DateTime<Utc>,
}

impl SessionCertificate {
    /// Key-server side check of the whole certificate for one request.
    pub fn verify(&self, tx_kind: &[u8], now: DateTime<Utc>) -> bool {
        if now >= self.expires_at {
            return false;
        }
        if !self
            .wallet_signature
            .verify(&self.address, &self.personal_message)
        {
            return false;
        }
        // The signed message must name this session's ephemeral key.
        let key_hex = hex::encode(self.session_public_key);
        if !String::from_utf8_lossy(&self.personal_message).ends_with(&key_hex) {
            return false;
        }
        let Ok(session_key) = VerifyingKey::from_bytes(&self.session_public_key) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&self.request_signature) else {
            return false;
        };
        session_key.verify(tx_kind, &signature).is_ok()
    }
}

mod hex_array {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        let s = String::deserialize(deserializer)?;
        let mut out = [0u8; N];
        hex::decode_to_slice(s, &mut out).map_err(serde::de::Error::custom)?;
        Ok(out)
    }
}

mod hex_vec {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn sign(key: &SigningKey, message: &[u8]) -> PersonalSignature {
        PersonalSignature {
            public_key: key.verifying_key().to_bytes(),
            signature: key.sign(message).to_bytes(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
    }

    fn account() -> (SigningKey, Address) {
        let key = SigningKey::generate(&mut rand::rngs::OsRng);
        let address = address_of(&key.verifying_key());
        (key, address)
    }

    #[test]
    fn new_key_is_created_but_not_usable() {
        let (_, address) = account();
        let session = SessionKey::create(address, ObjectId::from_u64(1), 10, now());
        assert_eq!(session.state(now()), SessionState::Created);
        assert!(!session.is_usable_for(&address, now()));
        assert!(session.certificate(b"tx").is_none());
    }

    #[test]
    fn signed_key_is_valid_until_ttl() {
        let (wallet, address) = account();
        let mut session = SessionKey::create(address, ObjectId::from_u64(1), 10, now());
        let sig = sign(&wallet, &session.personal_message());
        session.set_personal_message_signature(sig).unwrap();

        assert_eq!(session.state(now()), SessionState::Valid);
        assert!(session.is_usable_for(&address, now() + Duration::minutes(9)));
        assert_eq!(session.state(now() + Duration::minutes(10)), SessionState::Expired);
    }

    #[test]
    fn key_is_not_usable_for_other_address() {
        let (wallet, address) = account();
        let (_, other) = account();
        let mut session = SessionKey::create(address, ObjectId::from_u64(1), 10, now());
        let sig = sign(&wallet, &session.personal_message());
        session.set_personal_message_signature(sig).unwrap();

        assert!(!session.is_usable_for(&other, now()));
    }

    #[test]
    fn signature_from_another_wallet_is_rejected() {
        let (_, address) = account();
        let (intruder, _) = account();
        let mut session = SessionKey::create(address, ObjectId::from_u64(1), 10, now());
        let sig = sign(&intruder, &session.personal_message());
        assert_eq!(
            session.set_personal_message_signature(sig),
            Err(InvalidSessionSignature)
        );
        assert!(!session.is_signed());
    }

    #[test]
    fn certificate_verifies_for_its_request_only() {
        let (wallet, address) = account();
        let mut session = SessionKey::create(address, ObjectId::from_u64(1), 10, now());
        let sig = sign(&wallet, &session.personal_message());
        session.set_personal_message_signature(sig).unwrap();

        let cert = session.certificate(b"tx-a").unwrap();
        assert!(cert.verify(b"tx-a", now()));
        assert!(!cert.verify(b"tx-b", now()));
        assert!(!cert.verify(b"tx-a", now() + Duration::minutes(11)));
    }
}
