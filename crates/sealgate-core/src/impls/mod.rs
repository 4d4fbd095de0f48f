//! Impls - 実装（開発用・テスト用・HTTP）
//!
//! このモジュールには ports の実装を含めます。
//!
//! # 含まれる実装
//! - **InMemoryLedger**: coin / service / subscription を持つ開発用の台帳
//! - **DevWallet**: ed25519 鍵で署名し、InMemoryLedger に送信する wallet
//! - **InMemoryKeyServers**: Shamir 分割した data key を id 鍵で包む鍵サーバー群
//! - **InMemoryBlobStore**: epoch 付きの blob storage
//! - **StaticReportGenerator**: 決定的なダミーレポート
//!
//! # HTTP 実装
//! - **HttpBlobStore**: Walrus publisher / aggregator
//! - **HttpReportGenerator**: レポート生成 API

pub mod dev_wallet;
pub mod http_blob_store;
pub mod http_report;
pub mod inmem_blob_store;
pub mod inmem_key_servers;
pub mod inmem_ledger;
pub mod static_report;

// 主要な型を再エクスポート
pub use self::dev_wallet::DevWallet;
pub use self::http_blob_store::HttpBlobStore;
pub use self::http_report::HttpReportGenerator;
pub use self::inmem_blob_store::InMemoryBlobStore;
pub use self::inmem_key_servers::InMemoryKeyServers;
pub use self::inmem_ledger::InMemoryLedger;
pub use self::static_report::StaticReportGenerator;
