//! Events - ドメインイベント
//!
//! パイプラインの状態遷移ごとに 1 つ発行され、`EventSink` に渡される。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::FlowId;
use super::state::FlowState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowEvent {
    pub flow_id: FlowId,
    pub from: FlowState,
    pub to: FlowState,
    pub at: DateTime<Utc>,
}
