//! The vlob engine: append-only versioned blobs with per-realm
//! checkpoints.
//!
//! Writes hold `common` and `realm(R)` in read mode: they must be
//! ordered against certificate writes (which take those topics in
//! write mode) but not against each other. Two concurrent writes to
//! one realm serialize on the state mutex, which assigns their
//! checkpoints atomically with the atom insert, so the index sequence
//! stays dense without a retry loop.

use std::collections::HashMap;
use std::sync::Arc;

use velum_core::ballpark::RequireGreaterTimestamp;
use velum_core::config::ServerConfig;
use velum_core::id::{DeviceId, RealmId, SequesterServiceId, VlobId};
use velum_core::time::Timestamp;
use velum_store::{Topic, VlobAtom, VlobUpdateEntry};

use crate::auth::AuthenticatedContext;
use crate::events::{Event, EventBus, EVENT_VLOB_MAX_BLOB_SIZE};

use super::{check_timestamp, TimestampError};

/// Failure creating a vlob.
#[derive(Debug, thiserror::Error)]
pub enum CreateVlobError {
    #[error("realm not found")]
    RealmNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("stale key index, realm certificates up to {}", .0.strictly_greater_than)]
    BadKeyIndex(RequireGreaterTimestamp),
    #[error("vlob already exists")]
    VlobAlreadyExists,
    #[error("blob exceeds the configured maximum")]
    BlobTooLarge,
    #[error("sequestered blobs do not match the active services")]
    SequesterServiceMismatch,
    #[error("bad timestamp")]
    Timestamp(#[from] TimestampError),
}

/// Failure updating a vlob.
#[derive(Debug, thiserror::Error)]
pub enum UpdateVlobError {
    #[error("realm not found")]
    RealmNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("vlob not found")]
    VlobNotFound,
    #[error("stale key index, realm certificates up to {}", .0.strictly_greater_than)]
    BadKeyIndex(RequireGreaterTimestamp),
    #[error("version must be the current one plus 1")]
    BadVlobVersion,
    #[error("blob exceeds the configured maximum")]
    BlobTooLarge,
    #[error("sequestered blobs do not match the active services")]
    SequesterServiceMismatch,
    #[error("bad timestamp")]
    Timestamp(#[from] TimestampError),
}

/// Failure reading vlobs.
#[derive(Debug, thiserror::Error)]
pub enum ReadVlobError {
    #[error("realm not found")]
    RealmNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
}

/// One item of a `read_batch` reply.
#[derive(Debug, Clone)]
pub struct VlobReadItem {
    pub vlob_id: VlobId,
    pub key_index: u64,
    pub version: u64,
    pub author: DeviceId,
    pub created_on: Timestamp,
    pub blob: Vec<u8>,
}

/// Reply of `read_batch`: the found atoms plus the certificate
/// watermarks the caller must have caught up to before trusting them.
#[derive(Debug, Clone)]
pub struct VlobReadBatch {
    pub items: Vec<Option<VlobReadItem>>,
    pub needed_common_certificate_timestamp: Timestamp,
    pub needed_realm_certificate_timestamp: Timestamp,
}

/// Reply of `poll_changes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VlobChanges {
    /// Highest checkpoint covered by this reply. Repeat the poll until
    /// it stops moving.
    pub current_checkpoint: u64,
    /// Latest version per changed vlob, in checkpoint order.
    pub changes: Vec<(VlobId, u64)>,
}

/// The vlob component.
pub struct VlobComponent {
    config: Arc<ServerConfig>,
    event_bus: EventBus,
}

impl VlobComponent {
    pub fn new(config: Arc<ServerConfig>, event_bus: EventBus) -> Self {
        Self { config, event_bus }
    }

    /// Append version 1 of a new vlob.
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        ctx: &AuthenticatedContext,
        realm_id: RealmId,
        vlob_id: VlobId,
        key_index: u64,
        timestamp: Timestamp,
        blob: Vec<u8>,
        sequestered_blobs: Option<HashMap<SequesterServiceId, Vec<u8>>>,
    ) -> Result<(), CreateVlobError> {
        if blob.len() > self.config.max_blob_size {
            return Err(CreateVlobError::BlobTooLarge);
        }
        let (_hold, watermarks) = ctx
            .organization
            .lock_topics(&[Topic::Common, Topic::Realm(realm_id)], &[])
            .await;
        check_timestamp(timestamp, Timestamp::now(), &watermarks)?;

        let event_blob = (blob.len() <= EVENT_VLOB_MAX_BLOB_SIZE).then(|| blob.clone());
        let version = 1;
        ctx.organization.with(|state| {
            check_sequestered_blobs(state, sequestered_blobs.as_ref())
                .map_err(|_| CreateVlobError::SequesterServiceMismatch)?;
            let realm = state
                .realms
                .get(&realm_id)
                .ok_or(CreateVlobError::RealmNotFound)?;
            let role = realm
                .current_role_for(&ctx.user_id)
                .ok_or(CreateVlobError::AuthorNotAllowed)?;
            if !role.can_write() {
                return Err(CreateVlobError::AuthorNotAllowed);
            }
            if key_index != realm.current_key_index() {
                return Err(CreateVlobError::BadKeyIndex(RequireGreaterTimestamp {
                    strictly_greater_than: state.topic_last_timestamp(&Topic::Realm(realm_id)),
                }));
            }
            if state.vlobs.contains_key(&vlob_id) {
                return Err(CreateVlobError::VlobAlreadyExists);
            }

            let atom = Arc::new(VlobAtom {
                realm_id,
                vlob_id,
                key_index,
                version,
                blob,
                author: ctx.device_id.clone(),
                created_on: timestamp,
                sequestered_blobs,
            });
            state.vlobs.insert(vlob_id, vec![atom.clone()]);
            let realm = state
                .realms
                .get_mut(&realm_id)
                .ok_or(CreateVlobError::RealmNotFound)?;
            let index = realm.next_checkpoint();
            realm.vlob_updates.push(VlobUpdateEntry { index, atom });
            realm.note_vlob_timestamp(timestamp);
            if let Some(user) = state.users.get_mut(&ctx.user_id) {
                user.last_vlob_operation_timestamp = Some(timestamp);
            }
            Ok(())
        })?;

        self.publish_vlob(ctx, realm_id, vlob_id, version, timestamp, event_blob, &watermarks);
        Ok(())
    }

    /// Append the next version of an existing vlob.
    #[allow(clippy::too_many_arguments)]
    pub async fn update(
        &self,
        ctx: &AuthenticatedContext,
        realm_id: RealmId,
        vlob_id: VlobId,
        version: u64,
        key_index: u64,
        timestamp: Timestamp,
        blob: Vec<u8>,
        sequestered_blobs: Option<HashMap<SequesterServiceId, Vec<u8>>>,
    ) -> Result<(), UpdateVlobError> {
        if blob.len() > self.config.max_blob_size {
            return Err(UpdateVlobError::BlobTooLarge);
        }
        let (_hold, watermarks) = ctx
            .organization
            .lock_topics(&[Topic::Common, Topic::Realm(realm_id)], &[])
            .await;
        check_timestamp(timestamp, Timestamp::now(), &watermarks)?;

        let event_blob = (blob.len() <= EVENT_VLOB_MAX_BLOB_SIZE).then(|| blob.clone());
        ctx.organization.with(|state| {
            check_sequestered_blobs(state, sequestered_blobs.as_ref())
                .map_err(|_| UpdateVlobError::SequesterServiceMismatch)?;
            let realm = state
                .realms
                .get(&realm_id)
                .ok_or(UpdateVlobError::RealmNotFound)?;
            let role = realm
                .current_role_for(&ctx.user_id)
                .ok_or(UpdateVlobError::AuthorNotAllowed)?;
            if !role.can_write() {
                return Err(UpdateVlobError::AuthorNotAllowed);
            }
            if key_index != realm.current_key_index() {
                return Err(UpdateVlobError::BadKeyIndex(RequireGreaterTimestamp {
                    strictly_greater_than: state.topic_last_timestamp(&Topic::Realm(realm_id)),
                }));
            }
            let atoms = state
                .vlobs
                .get(&vlob_id)
                .filter(|atoms| atoms.first().is_some_and(|a| a.realm_id == realm_id))
                .ok_or(UpdateVlobError::VlobNotFound)?;
            // Versions are dense: only the next one is accepted
            if version != atoms.len() as u64 + 1 {
                return Err(UpdateVlobError::BadVlobVersion);
            }

            let atom = Arc::new(VlobAtom {
                realm_id,
                vlob_id,
                key_index,
                version,
                blob,
                author: ctx.device_id.clone(),
                created_on: timestamp,
                sequestered_blobs,
            });
            // Re-borrow mutably now that every check has passed
            if let Some(atoms) = state.vlobs.get_mut(&vlob_id) {
                atoms.push(atom.clone());
            }
            let realm = state
                .realms
                .get_mut(&realm_id)
                .ok_or(UpdateVlobError::RealmNotFound)?;
            let index = realm.next_checkpoint();
            realm.vlob_updates.push(VlobUpdateEntry { index, atom });
            realm.note_vlob_timestamp(timestamp);
            if let Some(user) = state.users.get_mut(&ctx.user_id) {
                user.last_vlob_operation_timestamp = Some(timestamp);
            }
            Ok(())
        })?;

        self.publish_vlob(ctx, realm_id, vlob_id, version, timestamp, event_blob, &watermarks);
        Ok(())
    }

    /// Read the latest atom of each requested vlob, optionally
    /// at-or-before a per-item timestamp.
    pub async fn read_batch(
        &self,
        ctx: &AuthenticatedContext,
        realm_id: RealmId,
        items: &[(VlobId, Option<Timestamp>)],
    ) -> Result<VlobReadBatch, ReadVlobError> {
        let (_hold, watermarks) = ctx
            .organization
            .lock_topics(&[Topic::Common, Topic::Realm(realm_id)], &[])
            .await;

        ctx.organization.with(|state| {
            let realm = state
                .realms
                .get(&realm_id)
                .ok_or(ReadVlobError::RealmNotFound)?;
            if realm.current_role_for(&ctx.user_id).is_none() {
                return Err(ReadVlobError::AuthorNotAllowed);
            }
            let found = items
                .iter()
                .map(|(vlob_id, at)| {
                    let atoms = state
                        .vlobs
                        .get(vlob_id)
                        .filter(|atoms| atoms.first().is_some_and(|a| a.realm_id == realm_id))?;
                    let atom = match at {
                        Some(at) => atoms.iter().rev().find(|a| a.created_on <= *at)?,
                        None => atoms.last()?,
                    };
                    Some(VlobReadItem {
                        vlob_id: *vlob_id,
                        key_index: atom.key_index,
                        version: atom.version,
                        author: atom.author.clone(),
                        created_on: atom.created_on,
                        blob: atom.blob.clone(),
                    })
                })
                .collect();
            Ok(VlobReadBatch {
                items: found,
                needed_common_certificate_timestamp: watermarks[0],
                needed_realm_certificate_timestamp: watermarks[1],
            })
        })
    }

    /// Everything newer than `from_checkpoint`, page-bounded.
    pub async fn poll_changes(
        &self,
        ctx: &AuthenticatedContext,
        realm_id: RealmId,
        from_checkpoint: u64,
    ) -> Result<VlobChanges, ReadVlobError> {
        let (_hold, _) = ctx
            .organization
            .lock_topics(&[Topic::Common, Topic::Realm(realm_id)], &[])
            .await;

        ctx.organization.with(|state| {
            let realm = state
                .realms
                .get(&realm_id)
                .ok_or(ReadVlobError::RealmNotFound)?;
            if realm.current_role_for(&ctx.user_id).is_none() {
                return Err(ReadVlobError::AuthorNotAllowed);
            }
            let page: Vec<&VlobUpdateEntry> = realm
                .vlob_updates
                .iter()
                .filter(|entry| entry.index > from_checkpoint)
                .take(self.config.poll_changes_page_size)
                .collect();
            let current_checkpoint = page
                .last()
                .map(|entry| entry.index)
                .unwrap_or(from_checkpoint.min(realm.vlob_updates.len() as u64));
            // Collapse to the latest version per vlob within the page
            let mut latest: Vec<(VlobId, u64)> = Vec::new();
            for entry in page {
                match latest.iter_mut().find(|(id, _)| *id == entry.atom.vlob_id) {
                    Some((_, version)) => *version = entry.atom.version,
                    None => latest.push((entry.atom.vlob_id, entry.atom.version)),
                }
            }
            Ok(VlobChanges {
                current_checkpoint,
                changes: latest,
            })
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn publish_vlob(
        &self,
        ctx: &AuthenticatedContext,
        realm_id: RealmId,
        vlob_id: VlobId,
        version: u64,
        timestamp: Timestamp,
        blob: Option<Vec<u8>>,
        watermarks: &[Timestamp],
    ) {
        self.event_bus.send(&Event::Vlob {
            organization_id: ctx.organization.id().clone(),
            author: ctx.device_id.clone(),
            realm_id,
            timestamp,
            vlob_id,
            version,
            blob,
            last_common_certificate_timestamp: watermarks[0],
            last_realm_certificate_timestamp: watermarks[1],
        });
    }
}

fn check_sequestered_blobs(
    state: &velum_store::OrgState,
    sequestered_blobs: Option<&HashMap<SequesterServiceId, Vec<u8>>>,
) -> Result<(), ()> {
    match (state.is_sequestered(), sequestered_blobs) {
        (false, None) => Ok(()),
        (false, Some(_)) => Err(()),
        (true, None) => {
            // Tolerated while no service is registered yet
            if state
                .sequester_services
                .values()
                .any(|s| s.revoked_on.is_none())
            {
                Err(())
            } else {
                Ok(())
            }
        }
        (true, Some(blobs)) => {
            let active: Vec<&SequesterServiceId> = state
                .sequester_services
                .iter()
                .filter(|(_, s)| s.revoked_on.is_none())
                .map(|(id, _)| id)
                .collect();
            if active.len() == blobs.len() && active.iter().all(|id| blobs.contains_key(id)) {
                Ok(())
            } else {
                Err(())
            }
        }
    }
}
