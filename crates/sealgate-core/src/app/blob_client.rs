//! BlobClient - 暗号文のアップロードとダウンロード
//!
//! # アップロード
//! - 選択中の publisher（初期値は先頭）に `epochs` を指定して PUT
//! - 失敗は `BlobUploadFailed`（別の publisher へ自動で切り替えない。
//!   呼び出し側が `select_publisher` で選び直す）
//! - 応答（alreadyCertified / newlyCreated）は `BlobRecord` に正規化する
//!
//! # ダウンロード
//! - aggregator をランダムに選び、タイムアウト付きで GET
//! - 失敗・タイムアウトはどちらも `BlobUnavailable`

use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;

use super::config::{PipelineConfig, WalrusService};
use crate::domain::{BlobId, BlobRecord, PipelineError, RecordUrls};
use crate::ports::{BlobStore, BlobStoreError};

pub struct BlobClient {
    store: Arc<dyn BlobStore>,
    services: Vec<WalrusService>,
    selected: usize,
    explorer_base: String,
    epochs: u32,
    timeout: Duration,
}

impl BlobClient {
    pub fn new(store: Arc<dyn BlobStore>, config: &PipelineConfig) -> Self {
        Self {
            store,
            services: config.walrus_services.clone(),
            selected: 0,
            explorer_base: config.explorer_base_url.clone(),
            epochs: config.storage_epochs,
            timeout: config.download_timeout(),
        }
    }

    /// Uses the service called `name` for subsequent uploads.
    pub fn select_publisher(&mut self, name: &str) -> Result<(), PipelineError> {
        let index = self
            .services
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| PipelineError::BlobUploadFailed(format!("unknown publisher {name}")))?;
        self.selected = index;
        tracing::info!(publisher = %name, "publisher selected");
        Ok(())
    }

    pub fn selected_publisher(&self) -> Option<&str> {
        self.services.get(self.selected).map(|s| s.name.as_str())
    }

    fn publisher(&self) -> Result<&WalrusService, PipelineError> {
        self.services
            .get(self.selected)
            .ok_or_else(|| PipelineError::BlobUploadFailed("no publisher configured".into()))
    }

    pub async fn upload(
        &self,
        ciphertext: &[u8],
        media_type: &str,
    ) -> Result<BlobRecord, PipelineError> {
        let service = self.publisher()?;
        let response = self
            .store
            .store(&service.publisher_url, ciphertext, self.epochs)
            .await
            .map_err(|e| PipelineError::BlobUploadFailed(e.to_string()))?;

        let urls = RecordUrls {
            aggregator_base: &service.aggregator_url,
            explorer_base: &self.explorer_base,
        };
        let record = BlobRecord::from_response(response, urls, media_type)
            .map_err(|e| PipelineError::BlobUploadFailed(e.to_string()))?;
        tracing::info!(
            blob_id = %record.blob_id,
            status = ?record.status,
            end_epoch = record.end_epoch,
            publisher = %service.name,
            "blob stored"
        );
        Ok(record)
    }

    pub async fn download(&self, blob_id: &BlobId) -> Result<Vec<u8>, PipelineError> {
        let unavailable = |reason: String| PipelineError::BlobUnavailable {
            blob_id: blob_id.clone(),
            reason,
        };
        let service = self
            .services
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| unavailable("no aggregator configured".into()))?;
        tracing::debug!(blob_id = %blob_id, aggregator = %service.name, "downloading blob");

        match tokio::time::timeout(self.timeout, self.store.read(&service.aggregator_url, blob_id)).await {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(BlobStoreError::Expired(_))) => {
                Err(unavailable("retention period has ended".into()))
            }
            Ok(Err(e)) => Err(unavailable(format!("{}: {e}", service.name))),
            Err(_) => Err(unavailable(format!(
                "{} timed out after {}ms",
                service.name,
                self.timeout.as_millis()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ErrorKind, StoreResponse, StoreStatus};
    use crate::impls::InMemoryBlobStore;
    use async_trait::async_trait;
    use serde_json::json;

    enum Mode {
        Store(serde_json::Value),
        Fail,
        Stall,
        Expired,
    }

    struct FakeStore(Mode);

    #[async_trait]
    impl BlobStore for FakeStore {
        async fn store(&self, _: &str, _: &[u8], _: u32) -> Result<StoreResponse, BlobStoreError> {
            match &self.0 {
                Mode::Store(v) => Ok(StoreResponse::from_json(v.clone())),
                _ => Err(BlobStoreError::Rejected("status 500".into())),
            }
        }

        async fn read(&self, _: &str, blob_id: &BlobId) -> Result<Vec<u8>, BlobStoreError> {
            match &self.0 {
                Mode::Stall => std::future::pending().await,
                Mode::Expired => Err(BlobStoreError::Expired(blob_id.clone())),
                Mode::Fail => Err(BlobStoreError::NotFound(blob_id.clone())),
                Mode::Store(_) => Ok(vec![1, 2, 3]),
            }
        }
    }

    fn client(mode: Mode) -> BlobClient {
        BlobClient::new(Arc::new(FakeStore(mode)), &PipelineConfig::default())
    }

    #[tokio::test]
    async fn newly_created_upload_is_normalized() {
        let client = client(Mode::Store(json!({
            "newlyCreated": {
                "blobObject": { "id": "0xobj", "blobId": "B1", "storage": { "endEpoch": 12 } }
            }
        })));

        let record = client.upload(&[0u8; 8], "application/pdf").await.unwrap();

        assert_eq!(record.status, StoreStatus::NewlyStored);
        assert_eq!(
            record.download_url,
            "https://aggregator.walrus-testnet.walrus.space/v1/blobs/B1"
        );
        assert_eq!(record.explorer_url, "https://suiscan.xyz/testnet/object/0xobj");
        assert!(!record.is_image);
    }

    #[tokio::test]
    async fn unrecognized_response_is_upload_failure() {
        let client = client(Mode::Store(json!({ "somethingElse": {} })));
        let err = client.upload(&[0u8; 8], "application/pdf").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BlobUploadFailed);
    }

    #[tokio::test]
    async fn rejected_upload_is_upload_failure() {
        let err = client(Mode::Fail).upload(&[0u8; 8], "application/pdf").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BlobUploadFailed);
    }

    #[tokio::test]
    async fn reselected_publisher_is_used_for_upload() {
        let store = Arc::new(InMemoryBlobStore::new());
        let config = PipelineConfig::default();
        let first = config.walrus_services[0].clone();
        let second = config.walrus_services[1].clone();
        store.set_publisher_down(&first.publisher_url, true);
        let mut client = BlobClient::new(store.clone(), &config);

        let err = client.upload(b"cipher", "application/pdf").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BlobUploadFailed);

        client.select_publisher(&second.name).unwrap();
        let record = client.upload(b"cipher", "application/pdf").await.unwrap();

        assert_eq!(client.selected_publisher(), Some(second.name.as_str()));
        assert_eq!(store.writes(), vec![second.publisher_url.clone()]);
        assert!(record.download_url.starts_with(&second.aggregator_url));
    }

    #[test]
    fn unknown_publisher_keeps_selection() {
        let mut client = client(Mode::Fail);
        let before = client.selected_publisher().map(str::to_string);

        let err = client.select_publisher("nowhere").unwrap_err();

        assert_eq!(err.kind(), ErrorKind::BlobUploadFailed);
        assert_eq!(client.selected_publisher().map(str::to_string), before);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_download_times_out_as_unavailable() {
        let err = client(Mode::Stall).download(&BlobId::new("B1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BlobUnavailable);
        assert!(err.to_string().contains("timed out after 10000ms"));
    }

    #[tokio::test]
    async fn expired_blob_is_unavailable() {
        let err = client(Mode::Expired).download(&BlobId::new("B1")).await.unwrap_err();
        assert_eq!(
            err,
            PipelineError::BlobUnavailable {
                blob_id: BlobId::new("B1"),
                reason: "retention period has ended".into(),
            }
        );
    }

    #[tokio::test]
    async fn successful_download_returns_bytes() {
        let client = client(Mode::Store(json!({})));
        assert_eq!(client.download(&BlobId::new("B1")).await.unwrap(), vec![1, 2, 3]);
    }
}
