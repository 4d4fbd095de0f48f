//! Blob store responses and the canonical BlobRecord.
//!
//! The publisher answers a store request with one of two shapes:
//!
//! ```text
//! {"alreadyCertified": {"blobId": ..., "endEpoch": ..., "event": {"txDigest": ...}}}
//! {"newlyCreated": {"blobObject": {"id": ..., "blobId": ..., "storage": {"endEpoch": ...}}}}
//! ```
//!
//! Both are modelled as variants of [`StoreResponse`] and normalized into a
//! [`BlobRecord`]. Anything else becomes [`StoreResponse::Unrecognized`] so
//! that a new publisher response shape surfaces as an explicit error instead of
//! silently defaulting.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Content-derived blob identifier assigned by the storage network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobId(String);

impl BlobId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertifiedEvent {
    pub tx_digest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlreadyCertified {
    pub blob_id: BlobId,
    pub end_epoch: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<CertifiedEvent>,
    /// Newer publishers reference the blob object instead of the certify event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobStorage {
    pub end_epoch: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobObject {
    pub id: String,
    pub blob_id: BlobId,
    pub storage: BlobStorage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewlyCreated {
    pub blob_object: BlobObject,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
enum KnownResponse {
    AlreadyCertified(AlreadyCertified),
    NewlyCreated(NewlyCreated),
}

/// Publisher response to a store request.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreResponse {
    AlreadyCertified(AlreadyCertified),
    NewlyCreated(NewlyCreated),
    Unrecognized(serde_json::Value),
}

impl StoreResponse {
    /// Total over any JSON value: unknown shapes become `Unrecognized`.
    pub fn from_json(value: serde_json::Value) -> Self {
        match serde_json::from_value::<KnownResponse>(value.clone()) {
            Ok(KnownResponse::AlreadyCertified(inner)) => Self::AlreadyCertified(inner),
            Ok(KnownResponse::NewlyCreated(inner)) => Self::NewlyCreated(inner),
            Err(_) => Self::Unrecognized(value),
        }
    }

    /// JSON as the publisher would send it (used by the in-memory store).
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::AlreadyCertified(inner) => serde_json::json!({ "alreadyCertified": inner }),
            Self::NewlyCreated(inner) => serde_json::json!({ "newlyCreated": inner }),
            Self::Unrecognized(value) => value.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreStatus {
    AlreadyStored,
    NewlyStored,
}

/// Where the blob is referenced on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum LedgerRef {
    /// Transaction that certified an earlier upload.
    CertifiedEvent(String),
    /// Blob object created by this upload.
    BlobObject(String),
}

impl LedgerRef {
    pub fn id(&self) -> &str {
        match self {
            Self::CertifiedEvent(id) | Self::BlobObject(id) => id,
        }
    }

    fn explorer_path(&self) -> &'static str {
        match self {
            Self::CertifiedEvent(_) => "tx",
            Self::BlobObject(_) => "object",
        }
    }
}

/// Canonical, immutable record of one upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRecord {
    pub status: StoreStatus,
    pub blob_id: BlobId,
    /// Blob is retained until this storage epoch; afterwards it is gone for good.
    pub end_epoch: u64,
    pub object_ref: LedgerRef,
    pub download_url: String,
    pub explorer_url: String,
    pub is_image: bool,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BlobRecordError {
    #[error("unrecognized store response: {0}")]
    Unrecognized(serde_json::Value),

    #[error("store response carries an empty blob id")]
    EmptyBlobId,

    #[error("already-certified response carries no ledger reference")]
    MissingLedgerRef,
}

/// Endpoints used to build the user-facing URLs of a record.
#[derive(Debug, Clone, Copy)]
pub struct RecordUrls<'a> {
    pub aggregator_base: &'a str,
    pub explorer_base: &'a str,
}

impl BlobRecord {
    pub fn from_response(
        response: StoreResponse,
        urls: RecordUrls<'_>,
        media_type: &str,
    ) -> Result<Self, BlobRecordError> {
        let (status, blob_id, end_epoch, object_ref) = match response {
            StoreResponse::AlreadyCertified(inner) => {
                let object_ref = match (inner.event, inner.object) {
                    (Some(event), _) => LedgerRef::CertifiedEvent(event.tx_digest),
                    (None, Some(object)) => LedgerRef::BlobObject(object),
                    (None, None) => return Err(BlobRecordError::MissingLedgerRef),
                };
                (
                    StoreStatus::AlreadyStored,
                    inner.blob_id,
                    inner.end_epoch,
                    object_ref,
                )
            }
            StoreResponse::NewlyCreated(inner) => (
                StoreStatus::NewlyStored,
                inner.blob_object.blob_id,
                inner.blob_object.storage.end_epoch,
                LedgerRef::BlobObject(inner.blob_object.id),
            ),
            StoreResponse::Unrecognized(value) => return Err(BlobRecordError::Unrecognized(value)),
        };
        if blob_id.is_empty() {
            return Err(BlobRecordError::EmptyBlobId);
        }

        let download_url = endpoint_url(urls.aggregator_base, &format!("blobs/{blob_id}"));
        let explorer_url = format!(
            "{}/{}/{}",
            urls.explorer_base.trim_end_matches('/'),
            object_ref.explorer_path(),
            object_ref.id()
        );
        Ok(Self {
            status,
            blob_id,
            end_epoch,
            object_ref,
            download_url,
            explorer_url,
            is_image: media_type.starts_with("image"),
        })
    }
}

/// Joins a service base URL and an API path under `/v1/`.
///
/// Leading slashes and a redundant `v1/` prefix on `path` are dropped, so
/// `"/v1/blobs/x"` and `"blobs/x"` produce the same URL.
pub fn endpoint_url(base: &str, path: &str) -> String {
    let path = path.trim_start_matches('/');
    let path = path.strip_prefix("v1/").unwrap_or(path);
    format!("{}/v1/{}", base.trim_end_matches('/'), path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    const URLS: RecordUrls<'static> = RecordUrls {
        aggregator_base: "https://aggregator.example",
        explorer_base: "https://explorer.example/testnet",
    };

    #[test]
    fn already_certified_is_normalized() {
        let raw = json!({
            "alreadyCertified": {
                "blobId": "abc",
                "endEpoch": 42,
                "event": { "txDigest": "D1", "eventSeq": "0" }
            }
        });
        let record =
            BlobRecord::from_response(StoreResponse::from_json(raw), URLS, "application/pdf").unwrap();

        assert_eq!(record.status, StoreStatus::AlreadyStored);
        assert_eq!(record.blob_id.as_str(), "abc");
        assert_eq!(record.end_epoch, 42);
        assert_eq!(record.object_ref, LedgerRef::CertifiedEvent("D1".to_string()));
        assert_eq!(record.download_url, "https://aggregator.example/v1/blobs/abc");
        assert_eq!(record.explorer_url, "https://explorer.example/testnet/tx/D1");
        assert!(!record.is_image);
    }

    #[test]
    fn newly_created_is_normalized() {
        let raw = json!({
            "newlyCreated": {
                "blobObject": {
                    "id": "0xb10b",
                    "registeredEpoch": 3,
                    "blobId": "xyz",
                    "size": 1000,
                    "storage": { "id": "0x5", "startEpoch": 3, "endEpoch": 4, "storageSize": 66034000 },
                    "deletable": false
                },
                "cost": 132300
            }
        });
        let record = BlobRecord::from_response(StoreResponse::from_json(raw), URLS, "image/png").unwrap();

        assert_eq!(record.status, StoreStatus::NewlyStored);
        assert_eq!(record.blob_id.as_str(), "xyz");
        assert_eq!(record.end_epoch, 4);
        assert_eq!(record.object_ref, LedgerRef::BlobObject("0xb10b".to_string()));
        assert_eq!(record.explorer_url, "https://explorer.example/testnet/object/0xb10b");
        assert!(record.is_image);
    }

    #[rstest]
    #[case::empty_object(json!({}))]
    #[case::unknown_key(json!({"markedInvalid": {"blobId": "a"}}))]
    #[case::not_an_object(json!("ok"))]
    #[case::missing_fields(json!({"newlyCreated": {"blobObject": {"blobId": "a"}}}))]
    fn other_shapes_are_unrecognized(#[case] raw: serde_json::Value) {
        let response = StoreResponse::from_json(raw.clone());
        assert_eq!(response, StoreResponse::Unrecognized(raw));
        assert!(matches!(
            BlobRecord::from_response(response, URLS, "application/pdf"),
            Err(BlobRecordError::Unrecognized(_))
        ));
    }

    #[test]
    fn empty_blob_id_is_an_error() {
        let raw = json!({"alreadyCertified": {"blobId": "", "endEpoch": 1, "event": {"txDigest": "d"}}});
        assert_eq!(
            BlobRecord::from_response(StoreResponse::from_json(raw), URLS, "x"),
            Err(BlobRecordError::EmptyBlobId)
        );
    }

    #[test]
    fn certified_object_reference_is_accepted() {
        let raw = json!({"alreadyCertified": {"blobId": "b", "endEpoch": 1, "object": "0x99"}});
        let record = BlobRecord::from_response(StoreResponse::from_json(raw), URLS, "x").unwrap();
        assert_eq!(record.object_ref, LedgerRef::BlobObject("0x99".to_string()));
    }

    #[test]
    fn to_json_round_trips_known_shapes() {
        let response = StoreResponse::NewlyCreated(NewlyCreated {
            blob_object: BlobObject {
                id: "0x1".to_string(),
                blob_id: BlobId::new("q"),
                storage: BlobStorage { end_epoch: 9 },
            },
        });
        assert_eq!(StoreResponse::from_json(response.to_json()), response);
    }

    #[rstest]
    #[case::plain("blobs/x")]
    #[case::leading_slash("/blobs/x")]
    #[case::with_version("/v1/blobs/x")]
    #[case::double_slash("//v1/blobs/x")]
    fn endpoint_paths_are_normalized(#[case] path: &str) {
        assert_eq!(endpoint_url("https://a.example/", path), "https://a.example/v1/blobs/x");
    }
}
