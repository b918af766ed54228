//! Block storage: metadata in the store, payload in the blockstore.
//!
//! The metadata row is reserved under the topic locks *before* the
//! payload is written: the blockstore is first-write-wins, so a
//! payload that failed validation must never reach it and squat the
//! block id. A failed payload write rolls the row back so the client
//! can retry the whole create. Reads fetch the payload after every
//! lock has been released.

use std::sync::Arc;

use velum_core::config::ServerConfig;
use velum_core::id::{BlockId, RealmId};
use velum_core::time::Timestamp;
use velum_store::{BlockEntry, Blockstore, BlockstoreError, Topic};

use crate::auth::AuthenticatedContext;

/// Failure creating a block.
#[derive(Debug, thiserror::Error)]
pub enum CreateBlockError {
    #[error("realm not found")]
    RealmNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("stale key index")]
    BadKeyIndex,
    #[error("block already exists")]
    BlockAlreadyExists,
    #[error("block exceeds the configured maximum")]
    BlockTooLarge,
    #[error("blockstore unavailable")]
    StoreUnavailable,
}

/// Failure reading a block.
#[derive(Debug, thiserror::Error)]
pub enum ReadBlockError {
    #[error("block not found")]
    BlockNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("blockstore unavailable")]
    StoreUnavailable,
}

/// Reply of a block read.
#[derive(Debug)]
pub struct BlockRead {
    pub realm_id: RealmId,
    pub key_index: u64,
    pub payload: Vec<u8>,
    pub needed_realm_certificate_timestamp: Timestamp,
}

/// The block component.
pub struct BlockComponent {
    config: Arc<ServerConfig>,
    blockstore: Arc<dyn Blockstore>,
}

impl BlockComponent {
    pub fn new(config: Arc<ServerConfig>, blockstore: Arc<dyn Blockstore>) -> Self {
        Self { config, blockstore }
    }

    /// Store a block payload and its metadata.
    pub async fn create(
        &self,
        ctx: &AuthenticatedContext,
        realm_id: RealmId,
        block_id: BlockId,
        key_index: u64,
        payload: Vec<u8>,
    ) -> Result<(), CreateBlockError> {
        if payload.len() > self.config.max_block_size {
            return Err(CreateBlockError::BlockTooLarge);
        }
        let size = payload.len() as u64;

        let (_hold, _) = ctx
            .organization
            .lock_topics(&[Topic::Common, Topic::Realm(realm_id)], &[])
            .await;
        ctx.organization.with(|state| {
            let realm = state
                .realms
                .get(&realm_id)
                .ok_or(CreateBlockError::RealmNotFound)?;
            let role = realm
                .current_role_for(&ctx.user_id)
                .ok_or(CreateBlockError::AuthorNotAllowed)?;
            if !role.can_write() {
                return Err(CreateBlockError::AuthorNotAllowed);
            }
            if key_index != realm.current_key_index() {
                return Err(CreateBlockError::BadKeyIndex);
            }
            if state.blocks.contains_key(&block_id) {
                return Err(CreateBlockError::BlockAlreadyExists);
            }
            state.blocks.insert(
                block_id,
                BlockEntry {
                    realm_id,
                    block_id,
                    key_index,
                    author: ctx.device_id.clone(),
                    size,
                    created_on: Timestamp::now(),
                },
            );
            Ok(())
        })?;

        let written = self
            .blockstore
            .create(ctx.organization.id(), block_id, payload)
            .await;
        if written.is_err() {
            // Drop the reservation so a retry re-runs the whole create
            ctx.organization.with(|state| {
                state.blocks.remove(&block_id);
            });
            return Err(CreateBlockError::StoreUnavailable);
        }
        Ok(())
    }

    /// Fetch a block payload.
    pub async fn read(
        &self,
        ctx: &AuthenticatedContext,
        block_id: BlockId,
    ) -> Result<BlockRead, ReadBlockError> {
        // Resolve metadata and authorize under the state mutex, then
        // release everything before the external fetch
        let (realm_id, key_index, needed_realm_certificate_timestamp) =
            ctx.organization.with(|state| {
                let block = state
                    .blocks
                    .get(&block_id)
                    .ok_or(ReadBlockError::BlockNotFound)?;
                let realm = state
                    .realms
                    .get(&block.realm_id)
                    .ok_or(ReadBlockError::BlockNotFound)?;
                if realm.current_role_for(&ctx.user_id).is_none() {
                    return Err(ReadBlockError::AuthorNotAllowed);
                }
                Ok((
                    block.realm_id,
                    block.key_index,
                    state.topic_last_timestamp(&Topic::Realm(block.realm_id)),
                ))
            })?;

        let payload = self
            .blockstore
            .read(ctx.organization.id(), block_id)
            .await
            .map_err(|err| match err {
                BlockstoreError::NotFound => ReadBlockError::BlockNotFound,
                BlockstoreError::Unavailable(_) => ReadBlockError::StoreUnavailable,
            })?;
        Ok(BlockRead {
            realm_id,
            key_index,
            payload,
            needed_realm_certificate_timestamp,
        })
    }
}
