//! HttpBlobStore - Walrus publisher / aggregator の HTTP クライアント
//!
//! - 保存: `PUT {publisher}/v1/blobs?epochs=N`（本文は暗号文そのまま）
//! - 読み出し: `GET {aggregator}/v1/blobs/{blob_id}`
//!
//! タイムアウトは呼び出し側（`BlobClient`）が掛ける。

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::domain::blob::endpoint_url;
use crate::domain::{BlobId, StoreResponse};
use crate::ports::{BlobStore, BlobStoreError};

#[derive(Debug, Clone, Default)]
pub struct HttpBlobStore {
    client: reqwest::Client,
}

impl HttpBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn transport(e: reqwest::Error) -> BlobStoreError {
    BlobStoreError::Transport(e.to_string())
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn store(
        &self,
        publisher_base: &str,
        data: &[u8],
        epochs: u32,
    ) -> Result<StoreResponse, BlobStoreError> {
        let url = endpoint_url(publisher_base, &format!("blobs?epochs={epochs}"));
        tracing::debug!(%url, size = data.len(), "storing blob");
        let response = self
            .client
            .put(url)
            .body(data.to_vec())
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(BlobStoreError::Rejected(format!("status {}: {body}", status.as_u16())));
        }
        let value: serde_json::Value = response.json().await.map_err(transport)?;
        Ok(StoreResponse::from_json(value))
    }

    async fn read(&self, aggregator_base: &str, blob_id: &BlobId) -> Result<Vec<u8>, BlobStoreError> {
        let url = endpoint_url(aggregator_base, &format!("blobs/{blob_id}"));
        let response = self.client.get(url).send().await.map_err(transport)?;
        match response.status() {
            status if status.is_success() => {
                Ok(response.bytes().await.map_err(transport)?.to_vec())
            }
            StatusCode::NOT_FOUND => Err(BlobStoreError::NotFound(blob_id.clone())),
            status => Err(BlobStoreError::Transport(format!(
                "aggregator returned status {}",
                status.as_u16()
            ))),
        }
    }
}
