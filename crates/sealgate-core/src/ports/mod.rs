//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（台帳, wallet, 鍵サーバー, blob storage, レポート生成）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - 台帳が capability と coin の正本
//! - 鍵サーバーは台帳上の seal_approve を評価してから share を返す
//! - blob storage は暗号文しか見ない

pub mod blob_store;
pub mod clock;
pub mod event_sink;
pub mod id_generator;
pub mod ledger;
pub mod report_source;
pub mod threshold;
pub mod wallet;

// 主要な trait を再エクスポート
pub use self::blob_store::{BlobStore, BlobStoreError};
pub use self::clock::{Clock, FixedClock, RecordingSleeper, Sleeper, SystemClock, TokioSleeper};
pub use self::event_sink::{EventSink, NoopEventSink, RecordingEventSink};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::ledger::{
    CreatedObject, Ledger, LedgerError, LedgerObject, ObjectContent, Owner, TransactionEffects,
};
pub use self::report_source::{ReportError, ReportGenerator};
pub use self::threshold::{ThresholdEncryption, ThresholdError};
pub use self::wallet::{Wallet, WalletError};
