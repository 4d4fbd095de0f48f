//! InMemoryBlobStore - 開発用の blob storage
//!
//! - blob id は内容の blake3 ハッシュ（同じ内容なら同じ id）
//! - 初回の保存は `newlyCreated`、2 回目以降は `alreadyCertified`
//! - `advance_epochs` で epoch を進め、`end_epoch` を過ぎた blob を期限切れにする
//! - `stall` で読み出しを止め、タイムアウトを再現する
//! - `set_publisher_down` で特定の publisher への保存を拒否させる

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::domain::blob::{AlreadyCertified, BlobObject, BlobStorage, CertifiedEvent, NewlyCreated};
use crate::domain::{BlobId, ObjectId, StoreResponse};
use crate::ports::{BlobStore, BlobStoreError};

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Vec<u8>,
    end_epoch: u64,
}

#[derive(Debug, Default)]
struct State {
    epoch: u64,
    blobs: HashMap<BlobId, StoredBlob>,
    reads: Vec<String>,
    writes: Vec<String>,
    down_publishers: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    state: Mutex<State>,
    stalled: AtomicBool,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_epoch(&self) -> u64 {
        self.lock().epoch
    }

    pub fn advance_epochs(&self, epochs: u64) {
        let mut state = self.lock();
        state.epoch += epochs;
        tracing::debug!(epoch = state.epoch, "blob store epoch advanced");
    }

    /// While stalled, reads never complete.
    pub fn stall(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.lock().blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rejects stores sent to `publisher_base` while `down` is set.
    pub fn set_publisher_down(&self, publisher_base: &str, down: bool) {
        let mut state = self.lock();
        if down {
            state.down_publishers.insert(publisher_base.to_string());
        } else {
            state.down_publishers.remove(publisher_base);
        }
    }

    /// Publisher base URLs of every accepted store so far.
    pub fn writes(&self) -> Vec<String> {
        self.lock().writes.clone()
    }

    /// Aggregator base URLs of every read so far.
    pub fn reads(&self) -> Vec<String> {
        self.lock().reads.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn store(
        &self,
        publisher_base: &str,
        data: &[u8],
        epochs: u32,
    ) -> Result<StoreResponse, BlobStoreError> {
        if epochs == 0 {
            return Err(BlobStoreError::Rejected("epochs must be at least 1".into()));
        }
        let blob_id = BlobId::new(blake3::hash(data).to_hex().to_string());
        let mut state = self.lock();
        if state.down_publishers.contains(publisher_base) {
            return Err(BlobStoreError::Rejected("status 503: publisher unavailable".into()));
        }
        state.writes.push(publisher_base.to_string());
        let end_epoch = state.epoch + u64::from(epochs);

        if let Some(existing) = state.blobs.get(&blob_id)
            && existing.end_epoch > state.epoch
        {
            let digest = blake3::hash(format!("{blob_id}:{}", state.epoch).as_bytes());
            return Ok(StoreResponse::AlreadyCertified(AlreadyCertified {
                blob_id,
                end_epoch: existing.end_epoch,
                event: Some(CertifiedEvent {
                    tx_digest: digest.to_hex().to_string(),
                }),
                object: None,
            }));
        }

        state.blobs.insert(
            blob_id.clone(),
            StoredBlob {
                data: data.to_vec(),
                end_epoch,
            },
        );
        Ok(StoreResponse::NewlyCreated(NewlyCreated {
            blob_object: BlobObject {
                id: ObjectId::random().to_string(),
                blob_id,
                storage: BlobStorage { end_epoch },
            },
        }))
    }

    async fn read(&self, aggregator_base: &str, blob_id: &BlobId) -> Result<Vec<u8>, BlobStoreError> {
        if self.stalled.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }
        let mut state = self.lock();
        state.reads.push(aggregator_base.to_string());
        let blob = state
            .blobs
            .get(blob_id)
            .ok_or_else(|| BlobStoreError::NotFound(blob_id.clone()))?;
        if state.epoch >= blob.end_epoch {
            return Err(BlobStoreError::Expired(blob_id.clone()));
        }
        Ok(blob.data.clone())
    }
}
