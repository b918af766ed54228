//! Organization lifecycle: creation, bootstrap, expiry, stats.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use velum_certif::{Certificate, CertificateAuthor, DeviceCertificate, RedactedCompare, SequesterAuthorityCertificate, SequesterServiceCertificate, UserCertificate};
use velum_core::ballpark::{timestamps_in_the_ballpark, TimestampOutOfBallpark};
use velum_core::config::ServerConfig;
use velum_core::crypto::VerifyKey;
use velum_core::id::{DeviceId, OrganizationId, SequesterServiceId};
use velum_core::time::Timestamp;
use velum_core::token::BootstrapToken;
use velum_core::types::{ActiveUsersLimit, UserProfile};
use velum_store::{
    DeviceEntry, OrgState, OrganizationStore, SequesterAuthority, SequesterServiceEntry, Store,
    Topic, UserEntry,
};

use crate::events::{Event, EventBus};

use super::{check_timestamp, TimestampError};

/// Creation-time knobs of the administration REST surface.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateOrganizationParams {
    /// Override of the server-wide default.
    pub user_profile_outsider_allowed: Option<bool>,
    /// Override of the server-wide default; `null` means unlimited.
    pub active_users_limit: Option<ActiveUsersLimit>,
}

/// Patchable fields of an existing organization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateOrganizationParams {
    pub is_expired: Option<bool>,
    pub user_profile_outsider_allowed: Option<bool>,
    pub active_users_limit: Option<ActiveUsersLimit>,
}

/// Snapshot returned by the administration GET.
#[derive(Debug, Clone, Serialize)]
pub struct OrganizationInfo {
    pub is_bootstrapped: bool,
    pub is_expired: bool,
    pub user_profile_outsider_allowed: bool,
    pub active_users_limit: Option<u64>,
}

/// Per-profile user counts, split active/revoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProfileDetail {
    pub active: u64,
    pub revoked: u64,
}

/// Usage numbers of one organization.
#[derive(Debug, Clone, Serialize)]
pub struct OrganizationStats {
    pub users: u64,
    pub active_users: u64,
    pub admin_users: ProfileDetail,
    pub standard_users: ProfileDetail,
    pub outsider_users: ProfileDetail,
    pub realms: u64,
    /// Total bytes of vlob blobs.
    pub metadata_size: u64,
    /// Total bytes of block payloads.
    pub data_size: u64,
}

/// Failure creating an organization.
#[derive(Debug, thiserror::Error)]
pub enum CreateOrganizationError {
    #[error("organization already exists")]
    AlreadyExists,
}

/// Failure bootstrapping an organization.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("invalid bootstrap token")]
    InvalidBootstrapToken,
    #[error("organization already bootstrapped")]
    AlreadyBootstrapped,
    #[error("invalid certificate")]
    InvalidCertificate,
    #[error("timestamp out of ballpark")]
    TimestampOutOfBallpark(TimestampOutOfBallpark),
}

/// Failure certifying an escrow service.
#[derive(Debug, thiserror::Error)]
pub enum CreateSequesterServiceError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("organization is not sequestered")]
    NotSequestered,
    #[error("invalid certificate")]
    InvalidCertificate,
    #[error("service already exists")]
    ServiceAlreadyExists,
    #[error("bad timestamp")]
    Timestamp(#[from] TimestampError),
}

/// The organization component.
pub struct OrganizationComponent {
    store: Arc<Store>,
    config: Arc<ServerConfig>,
    event_bus: EventBus,
}

impl OrganizationComponent {
    pub fn new(store: Arc<Store>, config: Arc<ServerConfig>, event_bus: EventBus) -> Self {
        Self {
            store,
            config,
            event_bus,
        }
    }

    /// Administration: create an organization and mint its token.
    pub fn create(
        &self,
        organization_id: OrganizationId,
        params: CreateOrganizationParams,
    ) -> Result<BootstrapToken, CreateOrganizationError> {
        let bootstrap_token = BootstrapToken::new();
        let state = OrgState::new(
            Timestamp::now(),
            Some(bootstrap_token),
            params
                .active_users_limit
                .unwrap_or(self.config.organization_initial_active_users_limit),
            params
                .user_profile_outsider_allowed
                .unwrap_or(self.config.organization_initial_user_profile_outsider_allowed),
            self.config.organization_initial_minimum_archiving_period,
        );
        self.store
            .create_organization(organization_id.clone(), state)
            .map_err(|_| CreateOrganizationError::AlreadyExists)?;
        info!(organization = %organization_id, "organization created");
        Ok(bootstrap_token)
    }

    /// Administration: snapshot of one organization.
    pub fn get(&self, organization_id: &OrganizationId) -> Option<OrganizationInfo> {
        let organization = self.store.organization(organization_id)?;
        Some(organization.with(|state| OrganizationInfo {
            is_bootstrapped: state.is_bootstrapped(),
            is_expired: state.is_expired,
            user_profile_outsider_allowed: state.user_profile_outsider_allowed,
            active_users_limit: state.active_users_limit.into(),
        }))
    }

    /// Administration: partial update; `is_expired` publishes an event
    /// so live sessions drop.
    pub fn update(
        &self,
        organization_id: &OrganizationId,
        params: UpdateOrganizationParams,
    ) -> Option<()> {
        let organization = self.store.organization(organization_id)?;
        let expiry_changed = organization.with(|state| {
            let mut changed = None;
            if let Some(is_expired) = params.is_expired {
                if state.is_expired != is_expired {
                    state.is_expired = is_expired;
                    changed = Some(is_expired);
                }
            }
            if let Some(allowed) = params.user_profile_outsider_allowed {
                state.user_profile_outsider_allowed = allowed;
            }
            if let Some(limit) = params.active_users_limit {
                state.active_users_limit = limit;
            }
            changed
        });
        if let Some(is_expired) = expiry_changed {
            self.event_bus.send(&Event::OrganizationExpired {
                organization_id: organization_id.clone(),
                is_expired,
            });
        }
        Some(())
    }

    /// Administration: usage numbers of one organization, bounded by
    /// `at` when given.
    pub fn stats(
        &self,
        organization_id: &OrganizationId,
        at: Option<Timestamp>,
    ) -> Option<OrganizationStats> {
        let organization = self.store.organization(organization_id)?;
        Some(organization.with(|state| compute_stats(state, at)))
    }

    /// Administration: server-wide snapshot.
    pub fn server_stats(
        &self,
        at: Option<Timestamp>,
    ) -> Vec<(OrganizationId, OrganizationStats)> {
        let mut ids = self.store.organization_ids();
        ids.sort();
        ids.into_iter()
            .filter_map(|id| {
                let stats = self.stats(&id, at)?;
                Some((id, stats))
            })
            .collect()
    }

    /// Administration: certify a new escrow service. Only the
    /// sequester authority fixed at bootstrap can sign one.
    pub async fn create_sequester_service(
        &self,
        organization_id: &OrganizationId,
        service_certificate: &[u8],
    ) -> Result<SequesterServiceId, CreateSequesterServiceError> {
        let organization = self
            .store
            .organization(organization_id)
            .ok_or(CreateSequesterServiceError::OrganizationNotFound)?;
        let (_hold, watermarks) = organization.lock_topics(&[], &[Topic::Sequester]).await;

        let authority_key = organization
            .with(|state| {
                state
                    .sequester_authority
                    .as_ref()
                    .map(|authority| authority.verify_key)
            })
            .ok_or(CreateSequesterServiceError::NotSequestered)?;
        let expected = CertificateAuthor::Root;
        let cooked = SequesterServiceCertificate::verify_and_load(
            service_certificate,
            &authority_key,
            Some(&expected),
        )
        .map_err(|_| CreateSequesterServiceError::InvalidCertificate)?;
        check_timestamp(cooked.timestamp, Timestamp::now(), &watermarks)?;

        let service_id = cooked.service_id;
        let timestamp = cooked.timestamp;
        organization.with(|state| {
            if state.sequester_services.contains_key(&service_id) {
                return Err(CreateSequesterServiceError::ServiceAlreadyExists);
            }
            state.sequester_services.insert(
                service_id,
                SequesterServiceEntry {
                    cooked,
                    certificate: service_certificate.to_vec(),
                    revoked_on: None,
                },
            );
            state.bump_topic(Topic::Sequester, timestamp);
            Ok(())
        })?;

        info!(organization = %organization_id, service = %service_id, "sequester service created");
        self.event_bus.send(&Event::SequesterCertificate {
            organization_id: organization_id.clone(),
            timestamp,
        });
        Ok(service_id)
    }

    /// Anonymous: bootstrap, consuming the token and issuing the first
    /// user and device certificates.
    #[allow(clippy::too_many_arguments)]
    pub async fn bootstrap(
        &self,
        organization: &Arc<OrganizationStore>,
        bootstrap_token: Option<BootstrapToken>,
        root_verify_key: VerifyKey,
        user_certificate: &[u8],
        redacted_user_certificate: &[u8],
        device_certificate: &[u8],
        redacted_device_certificate: &[u8],
        sequester_authority_certificate: Option<&[u8]>,
    ) -> Result<DeviceId, BootstrapError> {
        // Bootstrap issues the first common certificates; it still
        // writes the common topic like everyone else.
        let (_hold, _) = organization.lock_topics(&[], &[Topic::Common]).await;

        let verified = verify_bootstrap_certificates(
            &root_verify_key,
            user_certificate,
            redacted_user_certificate,
            device_certificate,
            redacted_device_certificate,
            sequester_authority_certificate,
        )?;
        timestamps_in_the_ballpark(verified.timestamp, Timestamp::now())
            .map_err(BootstrapError::TimestampOutOfBallpark)?;

        let device_id = DeviceId::new(
            verified.user.user_id,
            verified.device.device_name.clone(),
        );
        let timestamp = verified.timestamp;
        organization.with(|state| {
            if state.is_bootstrapped() {
                return Err(BootstrapError::AlreadyBootstrapped);
            }
            if state.bootstrap_token != bootstrap_token && state.bootstrap_token.is_some() {
                return Err(BootstrapError::InvalidBootstrapToken);
            }

            state.root_verify_key = Some(root_verify_key);
            state.bootstrapped_on = Some(Timestamp::now());
            state.bootstrap_token = None;
            if let Some((cooked, raw, verify_key)) = verified.sequester {
                state.sequester_authority = Some(SequesterAuthority {
                    cooked,
                    certificate: raw,
                    verify_key,
                });
                state.bump_topic(Topic::Sequester, timestamp);
            }
            state.users.insert(
                verified.user.user_id,
                UserEntry {
                    cooked: verified.user,
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
                    cooked: verified.device,
                    certificate: device_certificate.to_vec(),
                    redacted_certificate: redacted_device_certificate.to_vec(),
                },
            );
            state.bump_topic(Topic::Common, timestamp);
            Ok(())
        })?;

        info!(organization = %organization.id(), device = %device_id, "organization bootstrapped");
        self.event_bus.send(&Event::CommonCertificate {
            organization_id: organization.id().clone(),
            timestamp,
        });
        Ok(device_id)
    }
}

struct VerifiedBootstrap {
    user: UserCertificate,
    device: DeviceCertificate,
    timestamp: Timestamp,
    sequester: Option<(SequesterAuthorityCertificate, Vec<u8>, VerifyKey)>,
}

fn verify_bootstrap_certificates(
    root_verify_key: &VerifyKey,
    user_certificate: &[u8],
    redacted_user_certificate: &[u8],
    device_certificate: &[u8],
    redacted_device_certificate: &[u8],
    sequester_authority_certificate: Option<&[u8]>,
) -> Result<VerifiedBootstrap, BootstrapError> {
    let expected = CertificateAuthor::Root;
    let user =
        UserCertificate::verify_and_load(user_certificate, root_verify_key, Some(&expected))
            .map_err(|_| BootstrapError::InvalidCertificate)?;
    let redacted_user = UserCertificate::verify_and_load(
        redacted_user_certificate,
        root_verify_key,
        Some(&expected),
    )
    .map_err(|_| BootstrapError::InvalidCertificate)?;
    let device =
        DeviceCertificate::verify_and_load(device_certificate, root_verify_key, Some(&expected))
            .map_err(|_| BootstrapError::InvalidCertificate)?;
    let redacted_device = DeviceCertificate::verify_and_load(
        redacted_device_certificate,
        root_verify_key,
        Some(&expected),
    )
    .map_err(|_| BootstrapError::InvalidCertificate)?;

    // The first user is the first ADMIN; all four certificates share
    // one timestamp and the device belongs to the user.
    if user.profile != UserProfile::Admin
        || user.timestamp != device.timestamp
        || device.user_id != user.user_id
        || !user.redacted_compare(&redacted_user)
        || !device.redacted_compare(&redacted_device)
    {
        return Err(BootstrapError::InvalidCertificate);
    }

    let sequester = match sequester_authority_certificate {
        Some(raw) => {
            let cooked = SequesterAuthorityCertificate::verify_and_load(
                raw,
                root_verify_key,
                Some(&expected),
            )
            .map_err(|_| BootstrapError::InvalidCertificate)?;
            if cooked.timestamp != user.timestamp {
                return Err(BootstrapError::InvalidCertificate);
            }
            let verify_key = VerifyKey::from_bytes(&cooked.verify_key_der)
                .map_err(|_| BootstrapError::InvalidCertificate)?;
            Some((cooked, raw.to_vec(), verify_key))
        }
        None => None,
    };

    let timestamp = user.timestamp;
    Ok(VerifiedBootstrap {
        user,
        device,
        timestamp,
        sequester,
    })
}

fn compute_stats(state: &OrgState, at: Option<Timestamp>) -> OrganizationStats {
    let in_range = |t: Timestamp| at.map_or(true, |bound| t <= bound);

    let mut stats = OrganizationStats {
        users: 0,
        active_users: 0,
        admin_users: ProfileDetail::default(),
        standard_users: ProfileDetail::default(),
        outsider_users: ProfileDetail::default(),
        realms: 0,
        metadata_size: 0,
        data_size: 0,
    };
    for user in state.users.values() {
        if !in_range(user.cooked.timestamp) {
            continue;
        }
        stats.users += 1;
        let revoked = user
            .revoked
            .as_ref()
            .is_some_and(|r| in_range(r.cooked.timestamp));
        let detail = match user.current_profile() {
            UserProfile::Admin => &mut stats.admin_users,
            UserProfile::Standard => &mut stats.standard_users,
            UserProfile::Outsider => &mut stats.outsider_users,
        };
        if revoked {
            detail.revoked += 1;
        } else {
            detail.active += 1;
            stats.active_users += 1;
        }
    }
    stats.realms = state
        .realms
        .values()
        .filter(|realm| in_range(realm.created_on))
        .count() as u64;
    for atoms in state.vlobs.values() {
        for atom in atoms {
            if in_range(atom.created_on) {
                stats.metadata_size += atom.blob.len() as u64;
            }
        }
    }
    for block in state.blocks.values() {
        if in_range(block.created_on) {
            stats.data_size += block.size;
        }
    }
    stats
}
