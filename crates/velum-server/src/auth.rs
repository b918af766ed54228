//! The session gate.
//!
//! Three session kinds, each resolved from headers before the command
//! payload is even decoded. Failures here never carry a body: they map
//! to the custom HTTP statuses of the RPC edge, and clients key off
//! the number alone.

use std::sync::Arc;

use velum_core::config::ServerConfig;
use velum_core::crypto::VerifyKey;
use velum_core::id::{DeviceId, OrganizationId, UserId};
use velum_core::time::Timestamp;
use velum_core::token::InvitationToken;
use velum_core::types::{InvitationType, UserProfile};
use velum_store::{OrgState, OrganizationStore, Store};

/// Handshake-level refusal; maps 1:1 to a custom HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// 404.
    #[error("organization not found")]
    OrganizationNotFound,
    /// 410.
    #[error("organization expired")]
    OrganizationExpired,
    /// 401: unknown device, bad signature, or unknown invitation.
    #[error("bad authentication info")]
    BadAuthenticationInfo,
    /// 403.
    #[error("user revoked")]
    UserRevoked,
    /// 403.
    #[error("user frozen")]
    UserFrozen,
    /// 409.
    #[error("invitation already used or deleted")]
    InvitationAlreadyUsedOrDeleted,
}

/// An anonymous session: organization only.
pub struct AnonymousContext {
    /// The resolved organization.
    pub organization: Arc<OrganizationStore>,
}

/// An invited session: organization plus a live invitation token.
pub struct InvitedContext {
    /// The resolved organization.
    pub organization: Arc<OrganizationStore>,
    /// The presented token.
    pub token: InvitationToken,
    /// Kind of the invitation.
    pub invitation_type: InvitationType,
}

/// An authenticated session: a live device of a live user.
pub struct AuthenticatedContext {
    /// The resolved organization.
    pub organization: Arc<OrganizationStore>,
    /// The authenticated device.
    pub device_id: DeviceId,
    /// Its owning user.
    pub user_id: UserId,
    /// The user's current profile.
    pub profile: UserProfile,
}

fn resolve_organization(
    store: &Store,
    organization_id: &OrganizationId,
) -> Result<Arc<OrganizationStore>, AuthError> {
    let organization = store
        .organization(organization_id)
        .ok_or(AuthError::OrganizationNotFound)?;
    if organization.with(|state| state.is_expired) {
        return Err(AuthError::OrganizationExpired);
    }
    Ok(organization)
}

/// Resolve an anonymous session.
///
/// When the server is configured for spontaneous bootstrap, an unknown
/// organization is created on the fly instead of refused.
pub fn authenticate_anonymous(
    store: &Store,
    config: &ServerConfig,
    organization_id: &OrganizationId,
) -> Result<AnonymousContext, AuthError> {
    let organization = match store.organization(organization_id) {
        Some(organization) => organization,
        None if config.organization_spontaneous_bootstrap => {
            let state = OrgState::new(
                Timestamp::now(),
                // Token-less: the first bootstrap wins
                None,
                config.organization_initial_active_users_limit,
                config.organization_initial_user_profile_outsider_allowed,
                config.organization_initial_minimum_archiving_period,
            );
            match store.create_organization(organization_id.clone(), state) {
                Ok(organization) => organization,
                // Lost the creation race; the other request's copy is fine
                Err(_) => store
                    .organization(organization_id)
                    .ok_or(AuthError::OrganizationNotFound)?,
            }
        }
        None => return Err(AuthError::OrganizationNotFound),
    };
    if organization.with(|state| state.is_expired) {
        return Err(AuthError::OrganizationExpired);
    }
    Ok(AnonymousContext { organization })
}

/// Resolve an invited session from its token.
pub fn authenticate_invited(
    store: &Store,
    organization_id: &OrganizationId,
    token: InvitationToken,
) -> Result<InvitedContext, AuthError> {
    let organization = resolve_organization(store, organization_id)?;
    let invitation_type = organization.with(|state| {
        let invitation = state
            .invitations
            .get(&token)
            .ok_or(AuthError::BadAuthenticationInfo)?;
        if invitation.is_deleted() {
            return Err(AuthError::InvitationAlreadyUsedOrDeleted);
        }
        Ok(invitation.invitation_type)
    })?;
    Ok(InvitedContext {
        organization,
        token,
        invitation_type,
    })
}

/// Resolve an authenticated session and verify the request signature.
///
/// `signature` must be the device's detached signature over the raw
/// request body.
pub fn authenticate_authenticated(
    store: &Store,
    organization_id: &OrganizationId,
    device_id: &DeviceId,
    signature: &[u8],
    body: &[u8],
) -> Result<AuthenticatedContext, AuthError> {
    let organization = resolve_organization(store, organization_id)?;
    let (verify_key, profile) = organization.with(|state| {
        let (device, user) = state
            .device_and_user(device_id)
            .ok_or(AuthError::BadAuthenticationInfo)?;
        if user.is_revoked() {
            return Err(AuthError::UserRevoked);
        }
        if user.is_frozen {
            return Err(AuthError::UserFrozen);
        }
        Ok((device.cooked.verify_key, user.current_profile()))
    })?;
    verify_signature(&verify_key, signature, body)?;
    Ok(AuthenticatedContext {
        organization,
        device_id: device_id.clone(),
        user_id: device_id.user_id,
        profile,
    })
}

fn verify_signature(
    verify_key: &VerifyKey,
    signature: &[u8],
    body: &[u8],
) -> Result<(), AuthError> {
    verify_key
        .verify(signature, body)
        .map_err(|_| AuthError::BadAuthenticationInfo)
}
