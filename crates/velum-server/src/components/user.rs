//! User and device lifecycle, plus certificate retrieval.
//!
//! Every operation here writes the `common` topic. User and device
//! creation additionally hold the `UserCreation` advisory lock: the
//! at-most-one-non-revoked-user-per-email rule cannot be expressed as
//! a plain unique index, so the whole check-then-insert is serialized.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use velum_certif::{
    Certificate, CertificateAuthor, DeviceCertificate, RedactedCompare, RevokedUserCertificate,
    UserCertificate, UserUpdateCertificate,
};
use velum_core::ballpark::RequireGreaterTimestamp;
use velum_core::id::{DeviceId, EmailAddress, OrganizationId, RealmId, UserId};
use velum_core::time::Timestamp;
use velum_core::types::{RealmRole, UserProfile};
use velum_store::{
    AdvisoryLock, DeviceEntry, OrganizationStore, ProfileUpdateEntry, RevokedEntry, Store, Topic,
    UserEntry,
};

use crate::auth::AuthenticatedContext;
use crate::events::{Event, EventBus};

use super::{check_timestamp, TimestampError};

/// Failure creating a user.
#[derive(Debug, thiserror::Error)]
pub enum CreateUserError {
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("invalid certificate")]
    InvalidCertificate,
    #[error("user already exists")]
    UserAlreadyExists,
    #[error("a non-revoked user already holds this email")]
    HumanHandleAlreadyTaken,
    #[error("active users limit reached")]
    ActiveUsersLimitReached,
    #[error("bad timestamp")]
    Timestamp(#[from] TimestampError),
}

/// Failure creating a device.
#[derive(Debug, thiserror::Error)]
pub enum CreateDeviceError {
    #[error("invalid certificate")]
    InvalidCertificate,
    #[error("device already exists")]
    DeviceAlreadyExists,
    #[error("bad timestamp")]
    Timestamp(#[from] TimestampError),
}

/// Failure revoking a user.
#[derive(Debug, thiserror::Error)]
pub enum RevokeUserError {
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("invalid certificate")]
    InvalidCertificate,
    #[error("user not found")]
    UserNotFound,
    #[error("user already revoked at {}", .0.strictly_greater_than)]
    AlreadyRevoked(RequireGreaterTimestamp),
    #[error("bad timestamp")]
    Timestamp(#[from] TimestampError),
}

/// Failure updating a user's profile.
#[derive(Debug, thiserror::Error)]
pub enum UpdateUserError {
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("invalid certificate")]
    InvalidCertificate,
    #[error("user not found")]
    UserNotFound,
    #[error("user is revoked")]
    UserRevoked,
    #[error("profile already has this value")]
    NoChange,
    #[error("user is OWNER or MANAGER of a realm")]
    UserOwnsRealms,
    #[error("bad timestamp")]
    Timestamp(#[from] TimestampError),
}

/// Failure toggling the frozen flag.
#[derive(Debug, thiserror::Error)]
pub enum FreezeUserError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("user not found")]
    UserNotFound,
}

/// One topic-ordered stream of raw certificates.
pub type CertificateStream = Vec<Vec<u8>>;

/// Reply of `certificate_get`: per-topic streams, each sorted by
/// certificate timestamp and filtered by the caller's watermarks.
#[derive(Debug, Default)]
pub struct CertificateBundles {
    pub common: CertificateStream,
    pub sequester: CertificateStream,
    pub shamir_recovery: CertificateStream,
    pub realm: HashMap<RealmId, CertificateStream>,
}

/// The user component.
pub struct UserComponent {
    store: Arc<Store>,
    event_bus: EventBus,
}

impl UserComponent {
    pub fn new(store: Arc<Store>, event_bus: EventBus) -> Self {
        Self { store, event_bus }
    }

    /// Authenticated (ADMIN): enroll a new user with its first device.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_user(
        &self,
        ctx: &AuthenticatedContext,
        user_certificate: &[u8],
        redacted_user_certificate: &[u8],
        device_certificate: &[u8],
        redacted_device_certificate: &[u8],
    ) -> Result<UserId, CreateUserError> {
        if ctx.profile != UserProfile::Admin {
            return Err(CreateUserError::AuthorNotAllowed);
        }
        let (_hold, watermarks) = ctx
            .organization
            .lock_topics(
                &[],
                &[
                    Topic::Common,
                    Topic::Advisory(AdvisoryLock::UserCreation),
                ],
            )
            .await;

        let author = CertificateAuthor::Device(ctx.device_id.clone());
        let author_verify_key = self.author_verify_key(&ctx.organization, &ctx.device_id);
        let user = UserCertificate::verify_and_load(
            user_certificate,
            &author_verify_key,
            Some(&author),
        )
        .map_err(|_| CreateUserError::InvalidCertificate)?;
        let redacted_user = UserCertificate::verify_and_load(
            redacted_user_certificate,
            &author_verify_key,
            Some(&author),
        )
        .map_err(|_| CreateUserError::InvalidCertificate)?;
        let device = DeviceCertificate::verify_and_load(
            device_certificate,
            &author_verify_key,
            Some(&author),
        )
        .map_err(|_| CreateUserError::InvalidCertificate)?;
        let redacted_device = DeviceCertificate::verify_and_load(
            redacted_device_certificate,
            &author_verify_key,
            Some(&author),
        )
        .map_err(|_| CreateUserError::InvalidCertificate)?;

        let handle = user
            .human_handle
            .clone()
            .ok_or(CreateUserError::InvalidCertificate)?;
        if user.timestamp != device.timestamp
            || device.user_id != user.user_id
            || !user.redacted_compare(&redacted_user)
            || !device.redacted_compare(&redacted_device)
        {
            return Err(CreateUserError::InvalidCertificate);
        }
        // watermarks[0] is common: the advisory pseudo-topic never
        // carries a timestamp
        check_timestamp(user.timestamp, Timestamp::now(), &watermarks[..1])?;

        let timestamp = user.timestamp;
        let user_id = user.user_id;
        let device_id = DeviceId::new(user.user_id, device.device_name.clone());
        ctx.organization.with(|state| {
            if !state.user_profile_outsider_allowed && user.profile == UserProfile::Outsider {
                return Err(CreateUserError::AuthorNotAllowed);
            }
            if state.users.contains_key(&user.user_id) {
                return Err(CreateUserError::UserAlreadyExists);
            }
            if state.active_user_by_email(&handle.email).is_some() {
                return Err(CreateUserError::HumanHandleAlreadyTaken);
            }
            if state.active_user_limit_reached() {
                return Err(CreateUserError::ActiveUsersLimitReached);
            }
            state.users.insert(
                user.user_id,
                UserEntry {
                    cooked: user,
                    certificate: user_certificate.to_vec(),
                    redacted_certificate: redacted_user_certificate.to_vec(),
                    profile_updates: Vec::new(),
                    revoked: None,
                    is_frozen: false,
                    last_vlob_operation_timestamp: None,
                },
            );
            state.devices.insert(
                device_id.clone(),
                DeviceEntry {
                    cooked: device,
                    certificate: device_certificate.to_vec(),
                    redacted_certificate: redacted_device_certificate.to_vec(),
                },
            );
            state.bump_topic(Topic::Common, timestamp);
            Ok(())
        })?;

        info!(organization = %ctx.organization.id(), user = %user_id, "user created");
        self.publish_common(ctx.organization.id(), timestamp);
        Ok(user_id)
    }

    /// Authenticated: enroll an additional device for one's own user.
    pub async fn create_device(
        &self,
        ctx: &AuthenticatedContext,
        device_certificate: &[u8],
        redacted_device_certificate: &[u8],
    ) -> Result<DeviceId, CreateDeviceError> {
        let (_hold, watermarks) = ctx.organization.lock_topics(&[], &[Topic::Common]).await;

        let author = CertificateAuthor::Device(ctx.device_id.clone());
        let author_verify_key = self.author_verify_key(&ctx.organization, &ctx.device_id);
        let device = DeviceCertificate::verify_and_load(
            device_certificate,
            &author_verify_key,
            Some(&author),
        )
        .map_err(|_| CreateDeviceError::InvalidCertificate)?;
        let redacted_device = DeviceCertificate::verify_and_load(
            redacted_device_certificate,
            &author_verify_key,
            Some(&author),
        )
        .map_err(|_| CreateDeviceError::InvalidCertificate)?;

        // Only for one's own user
        if device.user_id != ctx.user_id || !device.redacted_compare(&redacted_device) {
            return Err(CreateDeviceError::InvalidCertificate);
        }
        check_timestamp(device.timestamp, Timestamp::now(), &watermarks)?;

        let timestamp = device.timestamp;
        let device_id = DeviceId::new(device.user_id, device.device_name.clone());
        ctx.organization.with(|state| {
            if state.devices.contains_key(&device_id) {
                return Err(CreateDeviceError::DeviceAlreadyExists);
            }
            state.devices.insert(
                device_id.clone(),
                DeviceEntry {
                    cooked: device,
                    certificate: device_certificate.to_vec(),
                    redacted_certificate: redacted_device_certificate.to_vec(),
                },
            );
            state.bump_topic(Topic::Common, timestamp);
            Ok(())
        })?;

        self.publish_common(ctx.organization.id(), timestamp);
        Ok(device_id)
    }

    /// Authenticated (ADMIN): irreversibly revoke a user.
    pub async fn revoke_user(
        &self,
        ctx: &AuthenticatedContext,
        revoked_user_certificate: &[u8],
    ) -> Result<UserId, RevokeUserError> {
        if ctx.profile != UserProfile::Admin {
            return Err(RevokeUserError::AuthorNotAllowed);
        }
        let (_hold, watermarks) = ctx.organization.lock_topics(&[], &[Topic::Common]).await;

        let author = CertificateAuthor::Device(ctx.device_id.clone());
        let author_verify_key = self.author_verify_key(&ctx.organization, &ctx.device_id);
        let revoked = RevokedUserCertificate::verify_and_load(
            revoked_user_certificate,
            &author_verify_key,
            Some(&author),
        )
        .map_err(|_| RevokeUserError::InvalidCertificate)?;
        if revoked.user_id == ctx.user_id {
            // An ADMIN cannot revoke itself
            return Err(RevokeUserError::AuthorNotAllowed);
        }
        check_timestamp(revoked.timestamp, Timestamp::now(), &watermarks)?;

        let timestamp = revoked.timestamp;
        let user_id = revoked.user_id;
        ctx.organization.with(|state| {
            let user = state
                .users
                .get_mut(&user_id)
                .ok_or(RevokeUserError::UserNotFound)?;
            // None of the target's own vlob writes may postdate the
            // revocation: the certificate must win the causality race
            if let Some(last_vlob) = user.last_vlob_operation_timestamp {
                if timestamp <= last_vlob {
                    return Err(RevokeUserError::Timestamp(TimestampError::RequireGreater(
                        RequireGreaterTimestamp {
                            strictly_greater_than: last_vlob,
                        },
                    )));
                }
            }
            if let Some(previous) = &user.revoked {
                return Err(RevokeUserError::AlreadyRevoked(RequireGreaterTimestamp {
                    strictly_greater_than: previous.cooked.timestamp,
                }));
            }
            user.revoked = Some(RevokedEntry {
                cooked: revoked,
                certificate: revoked_user_certificate.to_vec(),
            });
            state.bump_topic(Topic::Common, timestamp);
            Ok(())
        })?;

        info!(organization = %ctx.organization.id(), user = %user_id, "user revoked");
        self.publish_common(ctx.organization.id(), timestamp);
        self.event_bus.send(&Event::UserRevokedOrFrozen {
            organization_id: ctx.organization.id().clone(),
            user_id,
        });
        Ok(user_id)
    }

    /// Authenticated (ADMIN): change a user's profile.
    pub async fn update_user(
        &self,
        ctx: &AuthenticatedContext,
        user_update_certificate: &[u8],
    ) -> Result<(), UpdateUserError> {
        if ctx.profile != UserProfile::Admin {
            return Err(UpdateUserError::AuthorNotAllowed);
        }
        let (_hold, watermarks) = ctx.organization.lock_topics(&[], &[Topic::Common]).await;

        let author = CertificateAuthor::Device(ctx.device_id.clone());
        let author_verify_key = self.author_verify_key(&ctx.organization, &ctx.device_id);
        let update = UserUpdateCertificate::verify_and_load(
            user_update_certificate,
            &author_verify_key,
            Some(&author),
        )
        .map_err(|_| UpdateUserError::InvalidCertificate)?;
        if update.user_id == ctx.user_id {
            return Err(UpdateUserError::AuthorNotAllowed);
        }
        check_timestamp(update.timestamp, Timestamp::now(), &watermarks)?;

        let timestamp = update.timestamp;
        let user_id = update.user_id;
        ctx.organization.with(|state| {
            // An OUTSIDER cannot hold OWNER or MANAGER anywhere
            if update.new_profile == UserProfile::Outsider {
                let owns_realms = state.realms.values().any(|realm| {
                    realm
                        .current_role_for(&user_id)
                        .is_some_and(|role| role >= RealmRole::Manager)
                });
                if owns_realms {
                    return Err(UpdateUserError::UserOwnsRealms);
                }
            }
            let user = state
                .users
                .get_mut(&user_id)
                .ok_or(UpdateUserError::UserNotFound)?;
            if user.is_revoked() {
                return Err(UpdateUserError::UserRevoked);
            }
            if user.current_profile() == update.new_profile {
                return Err(UpdateUserError::NoChange);
            }
            user.profile_updates.push(ProfileUpdateEntry {
                cooked: update,
                certificate: user_update_certificate.to_vec(),
            });
            state.bump_topic(Topic::Common, timestamp);
            Ok(())
        })?;

        self.publish_common(ctx.organization.id(), timestamp);
        Ok(())
    }

    /// Administration: toggle the frozen flag of a user, addressed by
    /// id or by email.
    pub fn freeze_user(
        &self,
        organization_id: &OrganizationId,
        user_id: Option<UserId>,
        email: Option<&EmailAddress>,
        frozen: bool,
    ) -> Result<UserId, FreezeUserError> {
        let organization = self
            .store
            .organization(organization_id)
            .ok_or(FreezeUserError::OrganizationNotFound)?;
        let user_id = organization.with(|state| {
            let user_id = match (user_id, email) {
                (Some(user_id), _) => user_id,
                (None, Some(email)) => state
                    .active_user_by_email(email)
                    .map(|(id, _)| *id)
                    .ok_or(FreezeUserError::UserNotFound)?,
                (None, None) => return Err(FreezeUserError::UserNotFound),
            };
            let user = state
                .users
                .get_mut(&user_id)
                .ok_or(FreezeUserError::UserNotFound)?;
            user.is_frozen = frozen;
            Ok(user_id)
        })?;
        if frozen {
            self.event_bus.send(&Event::UserRevokedOrFrozen {
                organization_id: organization_id.clone(),
                user_id,
            });
        }
        Ok(user_id)
    }

    /// Authenticated: every certificate newer than the caller's
    /// per-topic watermarks. OUTSIDER callers receive redacted user
    /// and device certificates.
    pub async fn certificate_get(
        &self,
        ctx: &AuthenticatedContext,
        common_after: Option<Timestamp>,
        sequester_after: Option<Timestamp>,
        shamir_after: Option<Timestamp>,
        realm_after: &HashMap<RealmId, Timestamp>,
    ) -> CertificateBundles {
        let redacted = ctx.profile == UserProfile::Outsider;
        let newer = |after: Option<Timestamp>, t: Timestamp| after.map_or(true, |a| t > a);

        ctx.organization.with(|state| {
            let mut bundles = CertificateBundles::default();

            // common: users, devices, profile updates, revocations
            let mut common: Vec<(Timestamp, &Vec<u8>)> = Vec::new();
            for user in state.users.values() {
                let raw = if redacted {
                    &user.redacted_certificate
                } else {
                    &user.certificate
                };
                if newer(common_after, user.cooked.timestamp) {
                    common.push((user.cooked.timestamp, raw));
                }
                for update in &user.profile_updates {
                    if newer(common_after, update.cooked.timestamp) {
                        common.push((update.cooked.timestamp, &update.certificate));
                    }
                }
                if let Some(revoked) = &user.revoked {
                    if newer(common_after, revoked.cooked.timestamp) {
                        common.push((revoked.cooked.timestamp, &revoked.certificate));
                    }
                }
            }
            for device in state.devices.values() {
                let raw = if redacted {
                    &device.redacted_certificate
                } else {
                    &device.certificate
                };
                if newer(common_after, device.cooked.timestamp) {
                    common.push((device.cooked.timestamp, raw));
                }
            }
            common.sort_by_key(|(t, _)| *t);
            bundles.common = common.into_iter().map(|(_, raw)| raw.clone()).collect();

            // sequester
            if let Some(authority) = &state.sequester_authority {
                let mut sequester: Vec<(Timestamp, &Vec<u8>)> = Vec::new();
                if newer(sequester_after, authority.cooked.timestamp) {
                    sequester.push((authority.cooked.timestamp, &authority.certificate));
                }
                for service in state.sequester_services.values() {
                    if newer(sequester_after, service.cooked.timestamp) {
                        sequester.push((service.cooked.timestamp, &service.certificate));
                    }
                }
                sequester.sort_by_key(|(t, _)| *t);
                bundles.sequester =
                    sequester.into_iter().map(|(_, raw)| raw.clone()).collect();
            }

            // shamir: only setups the caller participates in
            let mut shamir: Vec<(Timestamp, &Vec<u8>)> = Vec::new();
            for (user_id, setups) in &state.shamir_setups {
                for setup in setups {
                    let participates = *user_id == ctx.user_id
                        || setup.brief.per_recipient_shares.contains_key(&ctx.user_id);
                    if !participates {
                        continue;
                    }
                    if newer(shamir_after, setup.brief.timestamp) {
                        shamir.push((setup.brief.timestamp, &setup.brief_certificate));
                    }
                    if let Some(deletion) = &setup.deletion {
                        if newer(shamir_after, deletion.cooked.timestamp) {
                            shamir.push((deletion.cooked.timestamp, &deletion.certificate));
                        }
                    }
                }
            }
            shamir.sort_by_key(|(t, _)| *t);
            bundles.shamir_recovery =
                shamir.into_iter().map(|(_, raw)| raw.clone()).collect();

            // realms the caller currently belongs to
            for (realm_id, realm) in &state.realms {
                if realm.current_role_for(&ctx.user_id).is_none() {
                    continue;
                }
                let after = realm_after.get(realm_id).copied();
                let mut stream: Vec<(Timestamp, &Vec<u8>)> = Vec::new();
                for entry in &realm.roles {
                    if newer(after, entry.cooked.timestamp) {
                        stream.push((entry.cooked.timestamp, &entry.certificate));
                    }
                }
                for entry in &realm.key_rotations {
                    if newer(after, entry.cooked.timestamp) {
                        stream.push((entry.cooked.timestamp, &entry.certificate));
                    }
                }
                for entry in &realm.renames {
                    if newer(after, entry.cooked.timestamp) {
                        stream.push((entry.cooked.timestamp, &entry.certificate));
                    }
                }
                stream.sort_by_key(|(t, _)| *t);
                bundles.realm.insert(
                    *realm_id,
                    stream.into_iter().map(|(_, raw)| raw.clone()).collect(),
                );
            }

            bundles
        })
    }

    fn author_verify_key(
        &self,
        organization: &OrganizationStore,
        device_id: &DeviceId,
    ) -> velum_core::crypto::VerifyKey {
        organization.with(|state| {
            state
                .devices
                .get(device_id)
                .map(|device| device.cooked.verify_key)
                // The session gate already resolved this device; a miss
                // can only follow an organization erase mid-request, in
                // which case signature checks fail closed
                .unwrap_or_else(|| velum_core::crypto::SigningKey::generate().verify_key())
        })
    }

    fn publish_common(&self, organization_id: &OrganizationId, timestamp: Timestamp) {
        self.event_bus.send(&Event::CommonCertificate {
            organization_id: organization_id.clone(),
            timestamp,
        });
    }
}
