//! The transport seam and its in-memory implementation.

use crate::error::{CloudError, CloudResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A blob as listed by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteBlob {
    pub remote_id: String,
    pub size: u64,
    /// Unix milliseconds, when the backend reports it.
    pub last_modified: Option<i64>,
}

/// Moves opaque byte blobs to and from remote storage.
///
/// Blobs are already encrypted when they reach a transport; transports
/// never inspect them.
#[async_trait]
pub trait BlobTransport: Send + Sync {
    /// Stores `data` and returns the identifier it can be fetched by.
    async fn upload(&self, data: Vec<u8>) -> CloudResult<String>;

    async fn download(&self, remote_id: &str) -> CloudResult<Vec<u8>>;

    async fn list(&self) -> CloudResult<Vec<RemoteBlob>>;

    async fn delete(&self, remote_id: &str) -> CloudResult<()>;
}

/// Transport that keeps blobs in process memory.
#[derive(Default)]
pub struct MemoryTransport {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }

    /// Replaces a stored blob, simulating corruption in transit or at rest.
    pub async fn replace(&self, remote_id: &str, data: Vec<u8>) -> CloudResult<()> {
        let mut blobs = self.blobs.write().await;
        match blobs.get_mut(remote_id) {
            Some(slot) => {
                *slot = data;
                Ok(())
            }
            None => Err(CloudError::NotFound(remote_id.to_string())),
        }
    }
}

#[async_trait]
impl BlobTransport for MemoryTransport {
    async fn upload(&self, data: Vec<u8>) -> CloudResult<String> {
        let remote_id = Uuid::new_v4().to_string();
        self.blobs.write().await.insert(remote_id.clone(), data);
        Ok(remote_id)
    }

    async fn download(&self, remote_id: &str) -> CloudResult<Vec<u8>> {
        self.blobs
            .read()
            .await
            .get(remote_id)
            .cloned()
            .ok_or_else(|| CloudError::NotFound(remote_id.to_string()))
    }

    async fn list(&self) -> CloudResult<Vec<RemoteBlob>> {
        Ok(self
            .blobs
            .read()
            .await
            .iter()
            .map(|(id, data)| RemoteBlob {
                remote_id: id.clone(),
                size: data.len() as u64,
                last_modified: None,
            })
            .collect())
    }

    async fn delete(&self, remote_id: &str) -> CloudResult<()> {
        self.blobs
            .write()
            .await
            .remove(remote_id)
            .map(|_| ())
            .ok_or_else(|| CloudError::NotFound(remote_id.to_string()))
    }
}
