//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **Pipeline**: 作成フローと復号フローの orchestrator（状態機械）
//! - **EncryptionGateway**: policy に束縛した暗号化
//! - **BlobClient**: 暗号文のアップロード／ダウンロード
//! - **CapabilityPurchaser**: coin 選択と capability の購入
//! - **CapabilityResolver**: 作成直後の capability を backoff 付きで読む
//! - **SessionKeyManager**: 復号セッションの作成と再利用
//! - **ApprovalCall**: 鍵サーバーに見せる approval transaction の構築

pub mod approval;
pub mod blob_client;
pub mod config;
pub mod encryption;
pub mod pipeline;
pub mod purchaser;
pub mod resolver;
pub mod retry;
pub mod session;

// 主要な型を再エクスポート
pub use self::approval::{ApprovalCall, MoveCallConstructor, approval_tx_kind};
pub use self::blob_client::BlobClient;
pub use self::config::{ConfigError, PipelineConfig, WalrusService};
pub use self::encryption::{Encrypted, EncryptionGateway};
pub use self::pipeline::{Collaborators, Pipeline};
pub use self::purchaser::{CapabilityPurchaser, Purchase};
pub use self::resolver::CapabilityResolver;
pub use self::retry::{BackoffPolicy, Exhausted, Fetched, retry_fetch};
pub use self::session::SessionKeyManager;
