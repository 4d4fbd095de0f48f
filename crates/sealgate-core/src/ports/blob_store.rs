//! BlobStore port - 分散 blob ストレージ（Walrus 相当）
//!
//! publisher に書き込み、aggregator から読み出す。
//! 保存期間は epoch 単位で、期限を過ぎた blob は読めなくなる。

use async_trait::async_trait;

use crate::domain::{BlobId, StoreResponse};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlobStoreError {
    #[error("publisher rejected upload: {0}")]
    Rejected(String),

    #[error("blob {0} not found")]
    NotFound(BlobId),

    #[error("blob {0} expired")]
    Expired(BlobId),

    #[error("blob store transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `data` for `epochs` epochs through the publisher at `publisher_base`.
    async fn store(
        &self,
        publisher_base: &str,
        data: &[u8],
        epochs: u32,
    ) -> Result<StoreResponse, BlobStoreError>;

    /// Reads a blob through the aggregator at `aggregator_base`.
    async fn read(&self, aggregator_base: &str, blob_id: &BlobId) -> Result<Vec<u8>, BlobStoreError>;
}
