//! The realm state machine: membership, name, key rotation.
//!
//! Every transition appends a certificate under the `realm(R)` topic
//! while holding `common` in read mode, so a concurrent user
//! revocation (a `common` write) can never interleave with a role
//! grant that would resurrect the revoked user.

use std::collections::HashMap;

use tracing::info;

use velum_certif::{
    Certificate, CertificateAuthor, RealmKeyRotationCertificate, RealmNameCertificate,
    RealmRoleCertificate,
};
use velum_core::ballpark::RequireGreaterTimestamp;
use velum_core::crypto::VerifyKey;
use velum_core::id::{DeviceId, OrganizationId, RealmId, UserId};
use velum_core::time::Timestamp;
use velum_core::types::{RealmRole, UserProfile};
use velum_store::{
    OrganizationStore, RealmEntry, RealmKeyRotationEntry, RealmRenameEntry, RealmRoleEntry, Topic,
};

use crate::auth::AuthenticatedContext;
use crate::events::{Event, EventBus};

use super::{check_timestamp, TimestampError};

/// Realm certificate writes must also postdate every vlob already in
/// the realm, or the certificate could rewrite the past of data that
/// references it.
fn check_last_vlob(realm: &RealmEntry, timestamp: Timestamp) -> Result<(), TimestampError> {
    if let Some(last_vlob) = realm.last_vlob_timestamp {
        if timestamp <= last_vlob {
            return Err(TimestampError::RequireGreater(RequireGreaterTimestamp {
                strictly_greater_than: last_vlob,
            }));
        }
    }
    Ok(())
}

/// Failure creating a realm.
#[derive(Debug, thiserror::Error)]
pub enum CreateRealmError {
    #[error("invalid certificate")]
    InvalidCertificate,
    #[error("realm already exists, last certificate at {}", .0.strictly_greater_than)]
    AlreadyExists(RequireGreaterTimestamp),
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("bad timestamp")]
    Timestamp(#[from] TimestampError),
}

/// Failure sharing or unsharing a realm.
#[derive(Debug, thiserror::Error)]
pub enum ShareRealmError {
    #[error("invalid certificate")]
    InvalidCertificate,
    #[error("realm not found")]
    RealmNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("recipient not found")]
    RecipientNotFound,
    #[error("recipient is revoked")]
    RecipientRevoked,
    #[error("recipient is frozen")]
    RecipientFrozen,
    #[error("OUTSIDER recipients cannot be OWNER or MANAGER")]
    RoleIncompatibleWithOutsider,
    #[error("stale key index, realm certificates up to {}", .0.strictly_greater_than)]
    BadKeyIndex(RequireGreaterTimestamp),
    #[error("recipient already has this role since {}", .0.strictly_greater_than)]
    AlreadyGranted(RequireGreaterTimestamp),
    #[error("bad timestamp")]
    Timestamp(#[from] TimestampError),
}

/// Failure renaming a realm.
#[derive(Debug, thiserror::Error)]
pub enum RenameRealmError {
    #[error("invalid certificate")]
    InvalidCertificate,
    #[error("realm not found")]
    RealmNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("stale key index, realm certificates up to {}", .0.strictly_greater_than)]
    BadKeyIndex(RequireGreaterTimestamp),
    #[error("realm already has a name")]
    InitialNameAlreadySet,
    #[error("bad timestamp")]
    Timestamp(#[from] TimestampError),
}

/// Failure rotating a realm key.
#[derive(Debug, thiserror::Error)]
pub enum RotateKeyError {
    #[error("invalid certificate")]
    InvalidCertificate,
    #[error("realm not found")]
    RealmNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("stale key index, realm certificates up to {}", .0.strictly_greater_than)]
    BadKeyIndex(RequireGreaterTimestamp),
    #[error("participants must be exactly the non-revoked members")]
    ParticipantMismatch,
    #[error("bad timestamp")]
    Timestamp(#[from] TimestampError),
}

/// Failure fetching a keys bundle.
#[derive(Debug, thiserror::Error)]
pub enum GetKeysBundleError {
    #[error("realm not found")]
    RealmNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("unknown key index")]
    BadKeyIndex,
    #[error("no access for this user")]
    AccessNotAvailable,
}

/// The realm component.
pub struct RealmComponent {
    event_bus: EventBus,
}

impl RealmComponent {
    pub fn new(event_bus: EventBus) -> Self {
        Self { event_bus }
    }

    /// Create a realm from its initial OWNER role certificate.
    ///
    /// Idempotent on resubmission: an existing realm yields
    /// `AlreadyExists` carrying its last certificate timestamp.
    pub async fn create(
        &self,
        ctx: &AuthenticatedContext,
        realm_role_certificate: &[u8],
    ) -> Result<RealmId, CreateRealmError> {
        // No realm lock: the realm does not exist yet, the state mutex
        // provides the uniqueness check
        let (_hold, watermarks) = ctx.organization.lock_topics(&[Topic::Common], &[]).await;

        let role = self
            .load_role_certificate(ctx, realm_role_certificate)
            .map_err(|_| CreateRealmError::InvalidCertificate)?;
        // The creation certificate grants OWNER to its own author
        if role.user_id != ctx.user_id || role.role != Some(RealmRole::Owner) {
            return Err(CreateRealmError::InvalidCertificate);
        }
        if ctx.profile == UserProfile::Outsider {
            return Err(CreateRealmError::AuthorNotAllowed);
        }
        check_timestamp(role.timestamp, Timestamp::now(), &watermarks)?;

        let realm_id = role.realm_id;
        let timestamp = role.timestamp;
        ctx.organization.with(|state| {
            if state.realms.contains_key(&realm_id) {
                let last = state.topic_last_timestamp(&Topic::Realm(realm_id));
                return Err(CreateRealmError::AlreadyExists(RequireGreaterTimestamp {
                    strictly_greater_than: last,
                }));
            }
            state.realms.insert(
                realm_id,
                RealmEntry::new(
                    realm_id,
                    timestamp,
                    RealmRoleEntry {
                        cooked: role,
                        certificate: realm_role_certificate.to_vec(),
                    },
                ),
            );
            state.bump_topic(Topic::Realm(realm_id), timestamp);
            Ok(())
        })?;

        info!(organization = %ctx.organization.id(), realm = %realm_id, "realm created");
        self.publish_realm(ctx.organization.id(), realm_id, timestamp, Some(ctx.user_id), false);
        Ok(realm_id)
    }

    /// Grant or change a role, delivering the recipient's key access.
    pub async fn share(
        &self,
        ctx: &AuthenticatedContext,
        realm_role_certificate: &[u8],
        key_index: u64,
        recipient_keys_bundle_access: Vec<u8>,
    ) -> Result<(), ShareRealmError> {
        let role = self
            .load_role_certificate(ctx, realm_role_certificate)
            .map_err(|_| ShareRealmError::InvalidCertificate)?;
        let new_role = role.role.ok_or(ShareRealmError::InvalidCertificate)?;
        let realm_id = role.realm_id;
        let (_hold, watermarks) = ctx
            .organization
            .lock_topics(&[Topic::Common], &[Topic::Realm(realm_id)])
            .await;
        check_timestamp(role.timestamp, Timestamp::now(), &watermarks)?;

        let timestamp = role.timestamp;
        let user_id = role.user_id;
        ctx.organization.with(|state| {
            let recipient = state
                .users
                .get(&user_id)
                .ok_or(ShareRealmError::RecipientNotFound)?;
            if recipient.is_revoked() {
                return Err(ShareRealmError::RecipientRevoked);
            }
            if recipient.is_frozen {
                return Err(ShareRealmError::RecipientFrozen);
            }
            if recipient.current_profile() == UserProfile::Outsider
                && new_role >= RealmRole::Manager
            {
                return Err(ShareRealmError::RoleIncompatibleWithOutsider);
            }
            let realm = state
                .realms
                .get(&realm_id)
                .ok_or(ShareRealmError::RealmNotFound)?;
            check_last_vlob(realm, timestamp)?;
            let author_role = realm
                .current_role_for(&ctx.user_id)
                .ok_or(ShareRealmError::AuthorNotAllowed)?;
            // Granting OWNER/MANAGER requires OWNER, and so does
            // overwriting an existing OWNER/MANAGER
            let current = realm.current_role_for(&user_id);
            let mut required = RealmRole::required_to_manage(new_role);
            if let Some(current) = current {
                required = required.max(RealmRole::required_to_manage(current));
            }
            if author_role < required {
                return Err(ShareRealmError::AuthorNotAllowed);
            }
            if current == Some(new_role) {
                let last = realm
                    .roles
                    .last()
                    .map(|entry| entry.cooked.timestamp)
                    .unwrap_or(Timestamp::EPOCH);
                return Err(ShareRealmError::AlreadyGranted(RequireGreaterTimestamp {
                    strictly_greater_than: last,
                }));
            }
            if key_index != realm.current_key_index() {
                return Err(ShareRealmError::BadKeyIndex(RequireGreaterTimestamp {
                    strictly_greater_than: state.topic_last_timestamp(&Topic::Realm(realm_id)),
                }));
            }

            let realm = state
                .realms
                .get_mut(&realm_id)
                .ok_or(ShareRealmError::RealmNotFound)?;
            realm.roles.push(RealmRoleEntry {
                cooked: role,
                certificate: realm_role_certificate.to_vec(),
            });
            if let Some(rotation) = realm.key_rotations.last_mut() {
                rotation
                    .per_participant_keys_bundle_access
                    .insert(user_id, recipient_keys_bundle_access);
            }
            state.bump_topic(Topic::Realm(realm_id), timestamp);
            Ok(())
        })?;

        self.publish_realm(ctx.organization.id(), realm_id, timestamp, Some(user_id), false);
        Ok(())
    }

    /// Remove a user's access (`role = None` certificate).
    pub async fn unshare(
        &self,
        ctx: &AuthenticatedContext,
        realm_role_certificate: &[u8],
    ) -> Result<(), ShareRealmError> {
        let role = self
            .load_role_certificate(ctx, realm_role_certificate)
            .map_err(|_| ShareRealmError::InvalidCertificate)?;
        if role.role.is_some() {
            return Err(ShareRealmError::InvalidCertificate);
        }
        let realm_id = role.realm_id;
        let (_hold, watermarks) = ctx
            .organization
            .lock_topics(&[Topic::Common], &[Topic::Realm(realm_id)])
            .await;
        check_timestamp(role.timestamp, Timestamp::now(), &watermarks)?;

        let timestamp = role.timestamp;
        let user_id = role.user_id;
        ctx.organization.with(|state| {
            let realm = state
                .realms
                .get(&realm_id)
                .ok_or(ShareRealmError::RealmNotFound)?;
            check_last_vlob(realm, timestamp)?;
            let author_role = realm
                .current_role_for(&ctx.user_id)
                .ok_or(ShareRealmError::AuthorNotAllowed)?;
            let current = match realm.current_role_for(&user_id) {
                Some(current) => current,
                // Idempotent: already unshared
                None => {
                    let last = realm
                        .roles
                        .last()
                        .map(|entry| entry.cooked.timestamp)
                        .unwrap_or(Timestamp::EPOCH);
                    return Err(ShareRealmError::AlreadyGranted(RequireGreaterTimestamp {
                        strictly_greater_than: last,
                    }));
                }
            };
            if author_role < RealmRole::required_to_manage(current) {
                return Err(ShareRealmError::AuthorNotAllowed);
            }

            let realm = state
                .realms
                .get_mut(&realm_id)
                .ok_or(ShareRealmError::RealmNotFound)?;
            realm.roles.push(RealmRoleEntry {
                cooked: role,
                certificate: realm_role_certificate.to_vec(),
            });
            state.bump_topic(Topic::Realm(realm_id), timestamp);
            Ok(())
        })?;

        self.publish_realm(ctx.organization.id(), realm_id, timestamp, Some(user_id), true);
        Ok(())
    }

    /// Set the encrypted display name.
    pub async fn rename(
        &self,
        ctx: &AuthenticatedContext,
        realm_name_certificate: &[u8],
        initial_name_or_fail: bool,
    ) -> Result<(), RenameRealmError> {
        let author = CertificateAuthor::Device(ctx.device_id.clone());
        let verify_key = self.device_verify_key(&ctx.organization, &ctx.device_id);
        let name = RealmNameCertificate::verify_and_load(
            realm_name_certificate,
            &verify_key,
            Some(&author),
        )
        .map_err(|_| RenameRealmError::InvalidCertificate)?;
        let realm_id = name.realm_id;
        let (_hold, watermarks) = ctx
            .organization
            .lock_topics(&[Topic::Common], &[Topic::Realm(realm_id)])
            .await;
        check_timestamp(name.timestamp, Timestamp::now(), &watermarks)?;

        let timestamp = name.timestamp;
        ctx.organization.with(|state| {
            let realm = state
                .realms
                .get(&realm_id)
                .ok_or(RenameRealmError::RealmNotFound)?;
            check_last_vlob(realm, timestamp)?;
            if realm.current_role_for(&ctx.user_id) != Some(RealmRole::Owner) {
                return Err(RenameRealmError::AuthorNotAllowed);
            }
            if name.key_index != realm.current_key_index() {
                return Err(RenameRealmError::BadKeyIndex(RequireGreaterTimestamp {
                    strictly_greater_than: state.topic_last_timestamp(&Topic::Realm(realm_id)),
                }));
            }
            if initial_name_or_fail && !realm.renames.is_empty() {
                return Err(RenameRealmError::InitialNameAlreadySet);
            }
            let realm = state
                .realms
                .get_mut(&realm_id)
                .ok_or(RenameRealmError::RealmNotFound)?;
            realm.renames.push(RealmRenameEntry {
                cooked: name,
                certificate: realm_name_certificate.to_vec(),
            });
            state.bump_topic(Topic::Realm(realm_id), timestamp);
            Ok(())
        })?;

        self.publish_realm(ctx.organization.id(), realm_id, timestamp, None, false);
        Ok(())
    }

    /// Introduce the next key index with its per-member bundle access.
    pub async fn rotate_key(
        &self,
        ctx: &AuthenticatedContext,
        realm_key_rotation_certificate: &[u8],
        keys_bundle: Vec<u8>,
        per_participant_keys_bundle_access: HashMap<UserId, Vec<u8>>,
    ) -> Result<(), RotateKeyError> {
        let author = CertificateAuthor::Device(ctx.device_id.clone());
        let verify_key = self.device_verify_key(&ctx.organization, &ctx.device_id);
        let rotation = RealmKeyRotationCertificate::verify_and_load(
            realm_key_rotation_certificate,
            &verify_key,
            Some(&author),
        )
        .map_err(|_| RotateKeyError::InvalidCertificate)?;
        let realm_id = rotation.realm_id;
        let (_hold, watermarks) = ctx
            .organization
            .lock_topics(&[Topic::Common], &[Topic::Realm(realm_id)])
            .await;
        check_timestamp(rotation.timestamp, Timestamp::now(), &watermarks)?;

        let timestamp = rotation.timestamp;
        ctx.organization.with(|state| {
            // Borrow users immutably before realms mutably
            let non_revoked =
                |user_id: &UserId| state.users.get(user_id).is_some_and(|u| !u.is_revoked());
            let realm = state
                .realms
                .get(&realm_id)
                .ok_or(RotateKeyError::RealmNotFound)?;
            check_last_vlob(realm, timestamp)?;
            if realm.current_role_for(&ctx.user_id) != Some(RealmRole::Owner) {
                return Err(RotateKeyError::AuthorNotAllowed);
            }
            if rotation.key_index != realm.current_key_index() + 1 {
                return Err(RotateKeyError::BadKeyIndex(RequireGreaterTimestamp {
                    strictly_greater_than: state.topic_last_timestamp(&Topic::Realm(realm_id)),
                }));
            }
            // Exactly the currently-non-revoked members
            let members: Vec<UserId> = realm
                .members()
                .into_keys()
                .filter(|user_id| non_revoked(user_id))
                .collect();
            if members.len() != per_participant_keys_bundle_access.len()
                || !members
                    .iter()
                    .all(|m| per_participant_keys_bundle_access.contains_key(m))
            {
                return Err(RotateKeyError::ParticipantMismatch);
            }
            let realm = state
                .realms
                .get_mut(&realm_id)
                .ok_or(RotateKeyError::RealmNotFound)?;
            realm.key_rotations.push(RealmKeyRotationEntry {
                cooked: rotation,
                certificate: realm_key_rotation_certificate.to_vec(),
                keys_bundle,
                per_participant_keys_bundle_access,
            });
            state.bump_topic(Topic::Realm(realm_id), timestamp);
            Ok(())
        })?;

        info!(organization = %ctx.organization.id(), realm = %realm_id, "realm key rotated");
        self.publish_realm(ctx.organization.id(), realm_id, timestamp, None, false);
        Ok(())
    }

    /// Fetch the keys bundle of `key_index` plus the caller's access.
    pub async fn get_keys_bundle(
        &self,
        ctx: &AuthenticatedContext,
        realm_id: RealmId,
        key_index: u64,
    ) -> Result<(Vec<u8>, Vec<u8>), GetKeysBundleError> {
        ctx.organization.with(|state| {
            let realm = state
                .realms
                .get(&realm_id)
                .ok_or(GetKeysBundleError::RealmNotFound)?;
            if realm.current_role_for(&ctx.user_id).is_none() {
                return Err(GetKeysBundleError::AuthorNotAllowed);
            }
            if key_index == 0 || key_index > realm.current_key_index() {
                return Err(GetKeysBundleError::BadKeyIndex);
            }
            let rotation = &realm.key_rotations[(key_index - 1) as usize];
            let access = rotation
                .per_participant_keys_bundle_access
                .get(&ctx.user_id)
                .ok_or(GetKeysBundleError::AccessNotAvailable)?;
            Ok((rotation.keys_bundle.clone(), access.clone()))
        })
    }

    fn load_role_certificate(
        &self,
        ctx: &AuthenticatedContext,
        raw: &[u8],
    ) -> Result<RealmRoleCertificate, velum_certif::CertifError> {
        let author = CertificateAuthor::Device(ctx.device_id.clone());
        let verify_key = self.device_verify_key(&ctx.organization, &ctx.device_id);
        RealmRoleCertificate::verify_and_load(raw, &verify_key, Some(&author))
    }

    fn device_verify_key(
        &self,
        organization: &OrganizationStore,
        device_id: &DeviceId,
    ) -> VerifyKey {
        organization.with(|state| {
            state
                .devices
                .get(device_id)
                .map(|device| device.cooked.verify_key)
                // Resolved by the session gate; fail closed on a race
                // with organization erase
                .unwrap_or_else(|| velum_core::crypto::SigningKey::generate().verify_key())
        })
    }

    fn publish_realm(
        &self,
        organization_id: &OrganizationId,
        realm_id: RealmId,
        timestamp: Timestamp,
        user_id: Option<UserId>,
        role_removed: bool,
    ) {
        self.event_bus.send(&Event::RealmCertificate {
            organization_id: organization_id.clone(),
            realm_id,
            timestamp,
            user_id,
            role_removed,
        });
    }
}
