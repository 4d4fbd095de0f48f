//! sealgate-core
//!
//! Core building blocks for gated report distribution: a generated report is
//! encrypted under an on-ledger access policy, stored on a blob network, and
//! only released to the holder of a purchased capability.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, artifact, policy, transaction, coin, capability, blob, session, state, errors, events）
//! - **ports**: 抽象化レイヤー（Ledger, Wallet, ThresholdEncryption, BlobStore, ReportGenerator, Clock, EventSink）
//! - **app**: アプリケーションロジック（pipeline, encryption, blob_client, purchaser, resolver, session, approval, config）
//! - **impls**: 実装（InMemoryLedger, DevWallet, InMemoryKeyServers などの開発用と HTTP クライアント）

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
