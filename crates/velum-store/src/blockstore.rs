//! Block payload storage.
//!
//! Payloads are immutable and addressed by `(organization, block_id)`.
//! The trait hides the backend (object store in production, in-memory
//! here); backends are allowed to fail transiently, which surfaces as
//! [`BlockstoreError::Unavailable`] so handlers can map it to a retry
//! response instead of an internal error.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use velum_core::id::{BlockId, OrganizationId};

/// Failure reading or writing a block payload.
#[derive(Debug, thiserror::Error)]
pub enum BlockstoreError {
    /// No payload under this id.
    #[error("block not found")]
    NotFound,
    /// Backend temporarily unreachable; safe to retry.
    #[error("blockstore unavailable: {0}")]
    Unavailable(String),
}

/// Backend-agnostic payload storage.
#[async_trait]
pub trait Blockstore: Send + Sync {
    /// Fetch a payload.
    async fn read(
        &self,
        organization_id: &OrganizationId,
        block_id: BlockId,
    ) -> Result<Vec<u8>, BlockstoreError>;

    /// Store a payload. Re-creating an existing block is a no-op:
    /// blocks are immutable and content-addressed by the caller, so a
    /// duplicate write can only carry the same bytes.
    async fn create(
        &self,
        organization_id: &OrganizationId,
        block_id: BlockId,
        payload: Vec<u8>,
    ) -> Result<(), BlockstoreError>;
}

/// Process-local backend used by tests and single-node deployments.
#[derive(Default)]
pub struct MemoryBlockstore {
    blocks: Mutex<HashMap<(OrganizationId, BlockId), Vec<u8>>>,
}

impl MemoryBlockstore {
    /// Create an empty blockstore.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Blockstore for MemoryBlockstore {
    async fn read(
        &self,
        organization_id: &OrganizationId,
        block_id: BlockId,
    ) -> Result<Vec<u8>, BlockstoreError> {
        self.blocks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(organization_id.clone(), block_id))
            .cloned()
            .ok_or(BlockstoreError::NotFound)
    }

    async fn create(
        &self,
        organization_id: &OrganizationId,
        block_id: BlockId,
        payload: Vec<u8>,
    ) -> Result<(), BlockstoreError> {
        self.blocks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry((organization_id.clone(), block_id))
            .or_insert(payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn org() -> OrganizationId {
        "TestOrg".parse().unwrap()
    }

    #[tokio::test]
    async fn create_then_read() {
        let blockstore = MemoryBlockstore::new();
        let block_id = BlockId::new();
        blockstore
            .create(&org(), block_id, b"payload".to_vec())
            .await
            .unwrap();
        assert_eq!(blockstore.read(&org(), block_id).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn missing_block_is_not_found() {
        let blockstore = MemoryBlockstore::new();
        assert_matches!(
            blockstore.read(&org(), BlockId::new()).await,
            Err(BlockstoreError::NotFound)
        );
    }

    #[tokio::test]
    async fn duplicate_create_is_a_noop() {
        let blockstore = MemoryBlockstore::new();
        let block_id = BlockId::new();
        blockstore
            .create(&org(), block_id, b"original".to_vec())
            .await
            .unwrap();
        // Retried upload after a lost response: first write wins
        blockstore
            .create(&org(), block_id, b"original".to_vec())
            .await
            .unwrap();
        assert_eq!(
            blockstore.read(&org(), block_id).await.unwrap(),
            b"original"
        );
    }
}
