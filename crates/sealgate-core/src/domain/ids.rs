//! Domain identifiers (strongly-typed IDs).
//!
//! # 二種類の ID
//! - **`Id<T>`**: ULID ベースのローカル ID（FlowId など）。生成順でソート可能。
//! - **`HexId<T>`**: 台帳上の 32 byte ID（ObjectId, Address）。`0x` + hex で表示。
//!
//! どちらも Phantom type パターンで、`ObjectId` と `Address` のように
//! 同じ表現を持つ ID をコンパイル時に区別します。

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"flow-" など）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    /// Display で使うプレフィックス（例: "flow-"）
    fn prefix() -> &'static str;
}

/// ULID ベースのジェネリック ID 型
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    /// ULID から Id を作成
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    /// 内部の ULID を取得
    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Flow のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Flow {}

impl IdMarker for Flow {
    fn prefix() -> &'static str {
        "flow-"
    }
}

/// Identifier of one pipeline run (generate → ... → download).
pub type FlowId = Id<Flow>;

// ========================================
// 台帳 ID（32 byte）
// ========================================

/// Length in bytes of ledger object ids and addresses.
pub const LEDGER_ID_LENGTH: usize = 32;

/// HexIdError は 16 進 ID のパース失敗
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HexIdError {
    #[error("empty id")]
    Empty,

    #[error("id is longer than 32 bytes: {0}")]
    TooLong(String),

    #[error("id contains non-hex characters: {0}")]
    NotHex(String),
}

/// 台帳上の 32 byte ID
///
/// - 入力は `0x` 省略可、1..=64 桁の hex
/// - 短い入力は左側をゼロで埋める（`0x6` → clock object）
/// - 表示は常に `0x` + 64 桁
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HexId<T: IdMarker> {
    bytes: [u8; LEDGER_ID_LENGTH],
    _marker: PhantomData<T>,
}

impl<T: IdMarker> HexId<T> {
    pub const fn from_bytes(bytes: [u8; LEDGER_ID_LENGTH]) -> Self {
        Self {
            bytes,
            _marker: PhantomData,
        }
    }

    /// Builds an id from a small integer, e.g. system objects such as the clock.
    pub fn from_u64(value: u64) -> Self {
        let mut bytes = [0u8; LEDGER_ID_LENGTH];
        bytes[LEDGER_ID_LENGTH - 8..].copy_from_slice(&value.to_be_bytes());
        Self::from_bytes(bytes)
    }

    /// Random id (used by the in-memory ledger when creating objects).
    pub fn random() -> Self {
        Self::from_bytes(rand::random())
    }

    pub fn as_bytes(&self) -> &[u8; LEDGER_ID_LENGTH] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Reinterprets the id under another marker (e.g. an address used as an object owner key).
    pub fn cast<U: IdMarker>(self) -> HexId<U> {
        HexId::from_bytes(self.bytes)
    }
}

impl<T: IdMarker> FromStr for HexId<T> {
    type Err = HexIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        if digits.is_empty() {
            return Err(HexIdError::Empty);
        }
        if digits.len() > LEDGER_ID_LENGTH * 2 {
            return Err(HexIdError::TooLong(s.to_string()));
        }
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HexIdError::NotHex(s.to_string()));
        }
        let padded = format!("{:0>width$}", digits, width = LEDGER_ID_LENGTH * 2);
        let mut bytes = [0u8; LEDGER_ID_LENGTH];
        hex::decode_to_slice(&padded, &mut bytes).map_err(|_| HexIdError::NotHex(s.to_string()))?;
        Ok(Self::from_bytes(bytes))
    }
}

impl<T: IdMarker> fmt::Display for HexId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl<T: IdMarker> fmt::Debug for HexId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}0x{}", T::prefix(), self.to_hex())
    }
}

impl<T: IdMarker> Serialize for HexId<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de, T: IdMarker> Deserialize<'de> for HexId<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Ledger object のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Object {}

impl IdMarker for Object {
    fn prefix() -> &'static str {
        "object:"
    }
}

/// Account のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Account {}

impl IdMarker for Account {
    fn prefix() -> &'static str {
        "address:"
    }
}

/// Identifier of an on-ledger object (package, service, capability, coin, clock).
pub type ObjectId = HexId<Object>;

/// Identifier of a wallet account.
pub type Address = HexId<Account>;

/// The shared clock object (`0x6`).
pub fn clock_object_id() -> ObjectId {
    ObjectId::from_u64(6)
}
