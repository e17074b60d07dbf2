//! Blob Store Adapter.
//!
//! Streams bytes in and out, computes the bit-exact MD5 checksum the
//! original service relies on for compatibility, and enforces
//! `max_blob_size` mid-stream. Backed in-process by a content-addressed
//! byte store; a production deployment would swap this for an object
//! store client behind the same trait, same idea as a `Put`-style
//! adapter wrapping a real storage backend.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use md5::{Digest, Md5};
use tokio::sync::RwLock;

use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone)]
pub struct PutOutcome {
    pub size: u64,
    pub checksum: String,
    pub content_type: String,
}

/// Streams a byte source into the backing store, hashing as it goes and
/// aborting as soon as `max_bytes` is exceeded. Returns the
/// size/checksum/content-type triple the store records on finalize.
pub async fn put<S, E>(
    blob_store: &InMemoryBlobStore,
    key: &str,
    mut stream: S,
    max_bytes: u64,
    content_type: Option<String>,
) -> ApiResult<PutOutcome>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    let mut hasher = Md5::new();
    let mut buf = Vec::new();
    let mut total: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|_| ApiError::internal("blob stream read error"))?;
        total += chunk.len() as u64;
        if total > max_bytes {
            return Err(ApiError::PayloadTooLarge(format!(
                "blob exceeds the maximum allowed size of {max_bytes} bytes"
            )));
        }
        hasher.update(&chunk);
        buf.extend_from_slice(&chunk);
    }

    let checksum = format!("{:x}", hasher.finalize());
    let content_type = content_type.unwrap_or_else(|| "application/octet-stream".to_string());
    blob_store.store(key, buf).await;

    Ok(PutOutcome { size: total, checksum, content_type })
}

/// An in-process content-addressed byte store standing in for an object
/// store. Keys are the caller-assigned slot
/// keys (`{artifact_id}/{slot_path}`), not content hashes, so overwrite
/// semantics mirror a real bucket.
pub struct InMemoryBlobStore {
    objects: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self { objects: Arc::new(RwLock::new(HashMap::new())) }
    }

    async fn store(&self, key: &str, bytes: Vec<u8>) {
        self.objects.write().await.insert(key.to_string(), Bytes::from(bytes));
    }

    pub async fn get(&self, key: &str) -> ApiResult<Bytes> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| ApiError::internal("blob bytes missing from backing store"))
    }

    pub async fn delete(&self, key: &str) {
        self.objects.write().await.remove(key);
    }

    /// Follows an externally-registered URL and buffers its content
    /// through the same hashing path as a direct upload, producing the
    /// metadata `RegisterExternalBlob` records. The URL itself is never
    /// retained here — only the caller (the store) keeps it, and even
    /// there it is never rendered back in an API response.
    pub async fn probe_external(&self, url: &str) -> ApiResult<PutOutcome> {
        let response = reqwest::get(url).await.map_err(|e| ApiError::bad_value(format!("failed to probe external location: {e}")))?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let bytes = response.bytes().await.map_err(|_| ApiError::bad_value("failed to read external location"))?;
        let mut hasher = Md5::new();
        hasher.update(&bytes);
        let checksum = format!("{:x}", hasher.finalize());
        let size = bytes.len() as u64;
        Ok(PutOutcome { size, checksum, content_type })
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn put_computes_md5_and_size() {
        let store = InMemoryBlobStore::new();
        let data = b"data".repeat(100);
        let body = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from(data.clone()))]);
        let outcome = put(&store, "slot-a", body, 1_000_000, None).await.unwrap();
        assert_eq!(outcome.size, data.len() as u64);
        assert_eq!(outcome.content_type, "application/octet-stream");
        let stored = store.get("slot-a").await.unwrap();
        assert_eq!(stored.as_ref(), data.as_slice());
    }

    #[tokio::test]
    async fn put_rejects_oversize_stream() {
        let store = InMemoryBlobStore::new();
        let data = vec![0u8; 20];
        let body = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from(data))]);
        let err = put(&store, "slot-b", body, 10, None).await.unwrap_err();
        assert!(matches!(err, ApiError::PayloadTooLarge(_)));
    }
}
