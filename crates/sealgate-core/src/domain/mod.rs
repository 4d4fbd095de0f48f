//! Domain model (ids, artifacts, policies, blobs, coins, capabilities, sessions, ...).
//!
//! ここにあるのは純粋なデータと純粋関数だけで、ネットワークや台帳への
//! 副作用は持たない。副作用は `ports` の trait を通して `app` が起こす。

pub mod artifact;
pub mod blob;
pub mod capability;
pub mod coin;
pub mod errors;
pub mod events;
pub mod ids;
pub mod policy;
pub mod session;
pub mod state;
pub mod transaction;

pub use artifact::{DecryptedReport, ReportArtifact, report_file_name};
pub use blob::{BlobId, BlobRecord, BlobRecordError, LedgerRef, RecordUrls, StoreResponse, StoreStatus};
pub use capability::Capability;
pub use coin::{Coin, InsufficientBalance, PaymentPlan};
pub use errors::{ErrorKind, PipelineError};
pub use events::FlowEvent;
pub use ids::{Address, FlowId, HexIdError, ObjectId, clock_object_id};
pub use policy::{EncryptionId, EncryptionPolicy};
pub use session::{PersonalSignature, SessionCertificate, SessionKey, SessionState, address_of};
pub use state::{FlowState, ReadyFlow};
pub use transaction::{Argument, Command, MoveCall, TransactionBuilder};
