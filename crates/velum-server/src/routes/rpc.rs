//! The RPC edge: `POST /<family>/<organization>`.
//!
//! The edge settles the API version, authenticates the session from
//! headers, decodes the MessagePack command, dispatches, and encodes
//! the reply. Handshake refusals surface as bare custom HTTP statuses;
//! everything past the handshake is a regular `status`-tagged reply.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::connect_info::ConnectInfo;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use serde::Serialize;
use serde_bytes::ByteBuf;
use tracing::debug;

use velum_core::id::{DeviceId, OrganizationId};
use velum_core::time::Timestamp;
use velum_core::token::InvitationToken;

use crate::auth::{
    authenticate_anonymous, authenticate_authenticated, authenticate_invited, AnonymousContext,
    AuthError, AuthenticatedContext, InvitedContext,
};
use crate::backend::Backend;
use crate::components::account::{AccountError, CreateAccountError};
use crate::components::enrollment::{EnrollmentState, SubmitEnrollmentError};
use crate::components::invite::{GreetingAttemptError, GreetingStepReply, InvitationEmailSentStatus};
use crate::components::organization::BootstrapError;
use crate::protocol::anonymous::*;
use crate::protocol::authenticated::*;
use crate::protocol::invited::*;
use crate::protocol::{settle_api_version, ApiVersion, SUPPORTED_API_VERSIONS};

pub const API_VERSION_HEADER: &str = "Api-Version";
pub const SUPPORTED_API_VERSIONS_HEADER: &str = "Supported-Api-Versions";
pub const SIGNATURE_HEADER: &str = "Parsec-Client-Signature";
pub const DEVICE_ID_HEADER: &str = "Parsec-Device-Id";
pub const INVITATION_TOKEN_HEADER: &str = "Parsec-Invitation-Token";

const MSGPACK_CONTENT_TYPE: &str = "application/msgpack";

fn supported_versions_header_value() -> String {
    SUPPORTED_API_VERSIONS
        .iter()
        .map(|version| version.to_string())
        .collect::<Vec<_>>()
        .join(";")
}

/// 422 carrying the versions this server speaks.
fn unsupported_api_version() -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        [(
            SUPPORTED_API_VERSIONS_HEADER,
            supported_versions_header_value(),
        )],
    )
        .into_response()
}

fn settle_from_headers(headers: &HeaderMap) -> Result<ApiVersion, Response> {
    let raw = headers
        .get(API_VERSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(unsupported_api_version)?;
    let client = ApiVersion::from_str(raw).map_err(|_| unsupported_api_version())?;
    settle_api_version(client).ok_or_else(unsupported_api_version)
}

fn auth_failure(err: AuthError) -> Response {
    let status = match err {
        AuthError::OrganizationNotFound => StatusCode::NOT_FOUND,
        AuthError::OrganizationExpired => StatusCode::GONE,
        AuthError::BadAuthenticationInfo => StatusCode::UNAUTHORIZED,
        AuthError::UserRevoked | AuthError::UserFrozen => StatusCode::FORBIDDEN,
        AuthError::InvitationAlreadyUsedOrDeleted => StatusCode::CONFLICT,
    };
    status.into_response()
}

fn parse_organization_id(raw: &str) -> Result<OrganizationId, Response> {
    OrganizationId::from_str(raw).map_err(|_| StatusCode::NOT_FOUND.into_response())
}

/// Encode a settled reply.
fn reply(settled: ApiVersion, value: &impl Serialize) -> Response {
    match rmp_serde::to_vec_named(value) {
        Ok(bytes) => (
            StatusCode::OK,
            [
                (API_VERSION_HEADER, settled.to_string()),
                ("Content-Type", MSGPACK_CONTENT_TYPE.to_owned()),
            ],
            bytes,
        )
            .into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum DecodeFailureRep {
    UnknownCommand,
    InvalidPayload,
}

fn decode<'a, T: serde::Deserialize<'a>>(body: &'a [u8]) -> Result<T, DecodeFailureRep> {
    rmp_serde::from_slice(body).map_err(|err| {
        debug!(error = %err, "rpc command decode failed");
        // serde reports an unrecognized `cmd` tag as an unknown variant
        if err.to_string().contains("unknown variant") {
            DecodeFailureRep::UnknownCommand
        } else {
            DecodeFailureRep::InvalidPayload
        }
    })
}

pub async fn anonymous_rpc(
    State(backend): State<Arc<Backend>>,
    Path(raw_organization_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let settled = match settle_from_headers(&headers) {
        Ok(settled) => settled,
        Err(refusal) => return refusal,
    };
    let organization_id = match parse_organization_id(&raw_organization_id) {
        Ok(id) => id,
        Err(refusal) => return refusal,
    };
    let ctx = match authenticate_anonymous(&backend.store, &backend.config, &organization_id) {
        Ok(ctx) => ctx,
        Err(err) => return auth_failure(err),
    };
    let req = match decode::<AnonymousReq>(&body) {
        Ok(req) => req,
        Err(failure) => return reply(settled, &failure),
    };
    dispatch_anonymous(&backend, &ctx, req, settled).await
}

async fn dispatch_anonymous(
    backend: &Backend,
    ctx: &AnonymousContext,
    req: AnonymousReq,
    settled: ApiVersion,
) -> Response {
    match req {
        AnonymousReq::OrganizationBootstrap {
            bootstrap_token,
            root_verify_key,
            user_certificate,
            redacted_user_certificate,
            device_certificate,
            redacted_device_certificate,
            sequester_authority_certificate,
        } => {
            let rep = match backend
                .organization
                .bootstrap(
                    &ctx.organization,
                    bootstrap_token,
                    root_verify_key,
                    &user_certificate,
                    &redacted_user_certificate,
                    &device_certificate,
                    &redacted_device_certificate,
                    sequester_authority_certificate.as_ref().map(|raw| &raw[..]),
                )
                .await
            {
                Ok(_) => OrganizationBootstrapRep::Ok,
                Err(BootstrapError::InvalidBootstrapToken) => {
                    OrganizationBootstrapRep::InvalidBootstrapToken
                }
                Err(BootstrapError::AlreadyBootstrapped) => {
                    OrganizationBootstrapRep::OrganizationAlreadyBootstrapped
                }
                Err(BootstrapError::InvalidCertificate) => {
                    OrganizationBootstrapRep::InvalidCertificate
                }
                Err(BootstrapError::TimestampOutOfBallpark(inner)) => {
                    OrganizationBootstrapRep::TimestampOutOfBallpark(inner)
                }
            };
            reply(settled, &rep)
        }
        AnonymousReq::PkiEnrollmentSubmit {
            enrollment_id,
            force,
            email,
            submitter_der_x509_certificate,
            submit_payload_signature,
            submit_payload,
        } => {
            let rep = match backend
                .enrollment
                .submit(
                    ctx,
                    enrollment_id,
                    force,
                    email,
                    submitter_der_x509_certificate.into_vec(),
                    submit_payload_signature.into_vec(),
                    submit_payload.into_vec(),
                )
                .await
            {
                Ok(()) => PkiEnrollmentSubmitRep::Ok,
                Err(SubmitEnrollmentError::EnrollmentIdAlreadyUsed) => {
                    PkiEnrollmentSubmitRep::EnrollmentIdAlreadyUsed
                }
                Err(SubmitEnrollmentError::EmailAlreadySubmitted) => {
                    PkiEnrollmentSubmitRep::EmailAlreadySubmitted
                }
                Err(SubmitEnrollmentError::EmailAlreadyEnrolled) => {
                    PkiEnrollmentSubmitRep::EmailAlreadyEnrolled
                }
            };
            reply(settled, &rep)
        }
        AnonymousReq::PkiEnrollmentInfo { enrollment_id } => {
            let rep = match backend.enrollment.info(ctx, enrollment_id) {
                Some((EnrollmentState::Submitted, _)) => PkiEnrollmentInfoRep::Submitted,
                Some((EnrollmentState::Accepted, accept_payload)) => {
                    PkiEnrollmentInfoRep::Accepted {
                        accept_payload: ByteBuf::from(accept_payload.unwrap_or_default()),
                    }
                }
                Some((EnrollmentState::Rejected, _)) => PkiEnrollmentInfoRep::Rejected,
                Some((EnrollmentState::Cancelled, _)) => PkiEnrollmentInfoRep::Cancelled,
                None => PkiEnrollmentInfoRep::EnrollmentNotFound,
            };
            reply(settled, &rep)
        }
        AnonymousReq::AccountCreate {
            email,
            auth_method_id,
            vault_key_access,
        } => {
            let rep = match backend.account.create(
                ctx,
                email,
                auth_method_id,
                vault_key_access.into_vec(),
            ) {
                Ok(vault_id) => AccountCreateRep::Ok { vault_id },
                Err(CreateAccountError::AccountAlreadyExists) => {
                    AccountCreateRep::AccountAlreadyExists
                }
            };
            reply(settled, &rep)
        }
        AnonymousReq::AccountVaultItemUpload {
            email,
            auth_method_id,
            data,
        } => {
            let rep = match backend
                .account
                .vault_item_upload(ctx, &email, &auth_method_id, data.into_vec())
            {
                Ok(fingerprint) => AccountVaultItemUploadRep::Ok { fingerprint },
                Err(AccountError::AccountNotFound) => AccountVaultItemUploadRep::AccountNotFound,
                Err(AccountError::ItemFingerprintMismatch) => {
                    AccountVaultItemUploadRep::FingerprintMismatch
                }
                Err(_) => AccountVaultItemUploadRep::BadAuthenticationInfo,
            };
            reply(settled, &rep)
        }
        AnonymousReq::AccountVaultItemList {
            email,
            auth_method_id,
        } => {
            let rep = match backend.account.vault_item_list(ctx, &email, &auth_method_id) {
                Ok((vault_id, rows)) => AccountVaultItemListRep::Ok {
                    vault_id,
                    items: rows
                        .into_iter()
                        .map(|row| AccountVaultItemRow {
                            fingerprint: row.fingerprint,
                            data: ByteBuf::from(row.data),
                        })
                        .collect(),
                },
                Err(AccountError::AccountNotFound) => AccountVaultItemListRep::AccountNotFound,
                Err(_) => AccountVaultItemListRep::BadAuthenticationInfo,
            };
            reply(settled, &rep)
        }
        AnonymousReq::AccountAuthMethodCreate {
            email,
            auth_method_id,
            new_auth_method_id,
            vault_key_access,
        } => {
            let rep = match backend.account.auth_method_create(
                ctx,
                &email,
                &auth_method_id,
                new_auth_method_id,
                vault_key_access.into_vec(),
            ) {
                Ok(()) => AccountAuthMethodRep::Ok,
                Err(err) => account_auth_method_failure(err),
            };
            reply(settled, &rep)
        }
        AnonymousReq::AccountAuthMethodDisable {
            email,
            auth_method_id,
            target,
        } => {
            let rep = match backend
                .account
                .auth_method_disable(ctx, &email, &auth_method_id, &target)
            {
                Ok(()) => AccountAuthMethodRep::Ok,
                Err(err) => account_auth_method_failure(err),
            };
            reply(settled, &rep)
        }
        AnonymousReq::AccountVaultKeyRotation {
            email,
            auth_method_id,
            new_auth_method_id,
            vault_key_access,
            items,
        } => {
            let rep = match backend.account.vault_key_rotation(
                ctx,
                &email,
                &auth_method_id,
                new_auth_method_id,
                vault_key_access.into_vec(),
                items.into_iter().map(ByteBuf::into_vec).collect(),
            ) {
                Ok(vault_id) => AccountVaultKeyRotationRep::Ok { vault_id },
                Err(AccountError::AccountNotFound) => AccountVaultKeyRotationRep::AccountNotFound,
                Err(_) => AccountVaultKeyRotationRep::BadAuthenticationInfo,
            };
            reply(settled, &rep)
        }
    }
}

fn account_auth_method_failure(err: AccountError) -> AccountAuthMethodRep {
    match err {
        AccountError::AccountNotFound => AccountAuthMethodRep::AccountNotFound,
        AccountError::BadAuthenticationInfo => AccountAuthMethodRep::BadAuthenticationInfo,
        AccountError::AuthMethodAlreadyExists => AccountAuthMethodRep::AuthMethodAlreadyExists,
        AccountError::AuthMethodNotFound => AccountAuthMethodRep::AuthMethodNotFound,
        AccountError::LastAuthMethod => AccountAuthMethodRep::LastAuthMethod,
        AccountError::ItemFingerprintMismatch => AccountAuthMethodRep::BadAuthenticationInfo,
    }
}

pub async fn invited_rpc(
    State(backend): State<Arc<Backend>>,
    Path(raw_organization_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let settled = match settle_from_headers(&headers) {
        Ok(settled) => settled,
        Err(refusal) => return refusal,
    };
    let organization_id = match parse_organization_id(&raw_organization_id) {
        Ok(id) => id,
        Err(refusal) => return refusal,
    };
    let token = match headers
        .get(INVITATION_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| InvitationToken::from_str(raw).ok())
    {
        Some(token) => token,
        None => return StatusCode::UNAUTHORIZED.into_response(),
    };
    let ctx = match authenticate_invited(&backend.store, &organization_id, token) {
        Ok(ctx) => ctx,
        Err(err) => return auth_failure(err),
    };
    let req = match decode::<InvitedReq>(&body) {
        Ok(req) => req,
        Err(failure) => return reply(settled, &failure),
    };
    dispatch_invited(&backend, &ctx, req, settled)
}

fn dispatch_invited(
    backend: &Backend,
    ctx: &InvitedContext,
    req: InvitedReq,
    settled: ApiVersion,
) -> Response {
    match req {
        InvitedReq::InviteInfo => {
            let rep = match backend.invite.info(ctx) {
                Some(info) => InviteInfoRep::Ok {
                    invitation_type: info.invitation_type,
                    claimer_email: info.claimer_email,
                    created_by: info.created_by,
                    created_on: info.created_on,
                    status: info.status,
                },
                None => InviteInfoRep::InvitationNotFound,
            };
            reply(settled, &rep)
        }
        InvitedReq::InviteClaimerStartGreetingAttempt { greeter } => {
            let rep = match backend.invite.claimer_start_attempt(ctx, greeter) {
                Ok(greeting_attempt) => {
                    InviteClaimerStartGreetingAttemptRep::Ok { greeting_attempt }
                }
                Err(GreetingAttemptError::InvitationNotFound) => {
                    InviteClaimerStartGreetingAttemptRep::InvitationNotFound
                }
                Err(GreetingAttemptError::InvitationAlreadyDeleted) => {
                    InviteClaimerStartGreetingAttemptRep::InvitationAlreadyDeleted
                }
                Err(_) => InviteClaimerStartGreetingAttemptRep::GreeterNotAllowed,
            };
            reply(settled, &rep)
        }
        InvitedReq::InviteClaimerStep {
            greeting_attempt,
            step_index,
            claimer_step,
        } => {
            let rep = match backend.invite.claimer_step(
                ctx,
                greeting_attempt,
                step_index as usize,
                claimer_step.into_vec(),
            ) {
                Ok(GreetingStepReply::Done(greeter_step)) => InviteClaimerStepRep::Ok {
                    greeter_step: ByteBuf::from(greeter_step),
                },
                Ok(GreetingStepReply::NotReady) => InviteClaimerStepRep::NotReady,
                Err(GreetingAttemptError::AttemptNotFound) => {
                    InviteClaimerStepRep::GreetingAttemptNotFound
                }
                Err(GreetingAttemptError::AttemptCancelled) => {
                    InviteClaimerStepRep::GreetingAttemptCancelled
                }
                Err(GreetingAttemptError::StepMismatch) => InviteClaimerStepRep::StepMismatch,
                Err(GreetingAttemptError::StepTooAdvanced) => InviteClaimerStepRep::StepTooAdvanced,
                Err(_) => InviteClaimerStepRep::GreetingAttemptNotFound,
            };
            reply(settled, &rep)
        }
    }
}

pub async fn authenticated_rpc(
    State(backend): State<Arc<Backend>>,
    Path(raw_organization_id): Path<String>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let settled = match settle_from_headers(&headers) {
        Ok(settled) => settled,
        Err(refusal) => return refusal,
    };
    let organization_id = match parse_organization_id(&raw_organization_id) {
        Ok(id) => id,
        Err(refusal) => return refusal,
    };
    let device_id = match headers
        .get(DEVICE_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| DeviceId::from_str(raw).ok())
    {
        Some(device_id) => device_id,
        None => return StatusCode::UNAUTHORIZED.into_response(),
    };
    let signature = match headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| base64::engine::general_purpose::STANDARD.decode(raw).ok())
    {
        Some(signature) => signature,
        None => return StatusCode::UNAUTHORIZED.into_response(),
    };
    let ctx = match authenticate_authenticated(
        &backend.store,
        &organization_id,
        &device_id,
        &signature,
        &body,
    ) {
        Ok(ctx) => ctx,
        Err(err) => return auth_failure(err),
    };
    let req = match decode::<AuthenticatedReq>(&body) {
        Ok(req) => req,
        Err(failure) => return reply(settled, &failure),
    };
    let client_ip = connect_info.map(|ConnectInfo(addr)| addr.ip());
    dispatch_authenticated(&backend, &ctx, req, settled, client_ip).await
}

fn email_sent_wire(status: InvitationEmailSentStatus) -> InvitationEmailSentWire {
    match status {
        InvitationEmailSentStatus::Success => InvitationEmailSentWire::Success,
        InvitationEmailSentStatus::NotRequested => InvitationEmailSentWire::NotRequested,
        InvitationEmailSentStatus::RateLimited { wait_until } => {
            InvitationEmailSentWire::RateLimited { wait_until }
        }
        InvitationEmailSentStatus::BadConfig => InvitationEmailSentWire::BadConfig,
        InvitationEmailSentStatus::RecipientRefused => InvitationEmailSentWire::RecipientRefused,
        InvitationEmailSentStatus::ServerUnavailable => InvitationEmailSentWire::ServerUnavailable,
    }
}

fn byte_streams(streams: Vec<Vec<u8>>) -> Vec<ByteBuf> {
    streams.into_iter().map(ByteBuf::from).collect()
}

async fn dispatch_authenticated(
    backend: &Backend,
    ctx: &AuthenticatedContext,
    req: AuthenticatedReq,
    settled: ApiVersion,
    client_ip: Option<std::net::IpAddr>,
) -> Response {
    match req {
        AuthenticatedReq::CertificateGet {
            common_after,
            sequester_after,
            shamir_recovery_after,
            realm_after,
        } => {
            let bundles = backend
                .user
                .certificate_get(
                    ctx,
                    common_after,
                    sequester_after,
                    shamir_recovery_after,
                    &realm_after,
                )
                .await;
            let rep = CertificateGetRep::Ok {
                common_certificates: byte_streams(bundles.common),
                sequester_certificates: byte_streams(bundles.sequester),
                shamir_recovery_certificates: byte_streams(bundles.shamir_recovery),
                realm_certificates: bundles
                    .realm
                    .into_iter()
                    .map(|(realm_id, stream)| (realm_id, byte_streams(stream)))
                    .collect(),
            };
            reply(settled, &rep)
        }
        AuthenticatedReq::UserCreate {
            user_certificate,
            redacted_user_certificate,
            device_certificate,
            redacted_device_certificate,
        } => {
            let rep = match backend
                .user
                .create_user(
                    ctx,
                    &user_certificate,
                    &redacted_user_certificate,
                    &device_certificate,
                    &redacted_device_certificate,
                )
                .await
            {
                Ok(_) => UserCreateRep::Ok,
                Err(err) => err.into(),
            };
            reply(settled, &rep)
        }
        AuthenticatedReq::DeviceCreate {
            device_certificate,
            redacted_device_certificate,
        } => {
            let rep = match backend
                .user
                .create_device(ctx, &device_certificate, &redacted_device_certificate)
                .await
            {
                Ok(_) => DeviceCreateRep::Ok,
                Err(err) => err.into(),
            };
            reply(settled, &rep)
        }
        AuthenticatedReq::UserRevoke {
            revoked_user_certificate,
        } => {
            let rep = match backend.user.revoke_user(ctx, &revoked_user_certificate).await {
                Ok(_) => UserRevokeRep::Ok,
                Err(err) => err.into(),
            };
            reply(settled, &rep)
        }
        AuthenticatedReq::UserUpdate {
            user_update_certificate,
        } => {
            let rep = match backend.user.update_user(ctx, &user_update_certificate).await {
                Ok(()) => UserUpdateRep::Ok,
                Err(err) => err.into(),
            };
            reply(settled, &rep)
        }
        AuthenticatedReq::RealmCreate {
            realm_role_certificate,
        } => {
            let rep = match backend.realm.create(ctx, &realm_role_certificate).await {
                Ok(_) => RealmCreateRep::Ok,
                Err(err) => err.into(),
            };
            reply(settled, &rep)
        }
        AuthenticatedReq::RealmShare {
            realm_role_certificate,
            key_index,
            recipient_keys_bundle_access,
        } => {
            let rep = match backend
                .realm
                .share(
                    ctx,
                    &realm_role_certificate,
                    key_index,
                    recipient_keys_bundle_access.into_vec(),
                )
                .await
            {
                Ok(()) => RealmShareRep::Ok,
                Err(err) => err.into(),
            };
            reply(settled, &rep)
        }
        AuthenticatedReq::RealmUnshare {
            realm_role_certificate,
        } => {
            let rep = match backend.realm.unshare(ctx, &realm_role_certificate).await {
                Ok(()) => RealmShareRep::Ok,
                Err(err) => err.into(),
            };
            reply(settled, &rep)
        }
        AuthenticatedReq::RealmRename {
            realm_name_certificate,
            initial_name_or_fail,
        } => {
            let rep = match backend
                .realm
                .rename(ctx, &realm_name_certificate, initial_name_or_fail)
                .await
            {
                Ok(()) => RealmRenameRep::Ok,
                Err(err) => err.into(),
            };
            reply(settled, &rep)
        }
        AuthenticatedReq::RealmRotateKey {
            realm_key_rotation_certificate,
            keys_bundle,
            per_participant_keys_bundle_access,
        } => {
            let access: HashMap<_, _> = per_participant_keys_bundle_access
                .into_iter()
                .map(|(user_id, bytes)| (user_id, bytes.into_vec()))
                .collect();
            let rep = match backend
                .realm
                .rotate_key(
                    ctx,
                    &realm_key_rotation_certificate,
                    keys_bundle.into_vec(),
                    access,
                )
                .await
            {
                Ok(()) => RealmRotateKeyRep::Ok,
                Err(err) => err.into(),
            };
            reply(settled, &rep)
        }
        AuthenticatedReq::RealmGetKeysBundle {
            realm_id,
            key_index,
        } => {
            let rep = match backend.realm.get_keys_bundle(ctx, realm_id, key_index).await {
                Ok((keys_bundle, keys_bundle_access)) => RealmGetKeysBundleRep::Ok {
                    keys_bundle: ByteBuf::from(keys_bundle),
                    keys_bundle_access: ByteBuf::from(keys_bundle_access),
                },
                Err(err) => err.into(),
            };
            reply(settled, &rep)
        }
        AuthenticatedReq::VlobCreate {
            realm_id,
            vlob_id,
            key_index,
            timestamp,
            blob,
            sequester_blob,
        } => {
            let sequestered = sequester_blob.map(|blobs| {
                blobs
                    .into_iter()
                    .map(|(service_id, bytes)| (service_id, bytes.into_vec()))
                    .collect()
            });
            let rep = match backend
                .vlob
                .create(
                    ctx,
                    realm_id,
                    vlob_id,
                    key_index,
                    timestamp,
                    blob.into_vec(),
                    sequestered,
                )
                .await
            {
                Ok(()) => VlobCreateRep::Ok,
                Err(err) => err.into(),
            };
            reply(settled, &rep)
        }
        AuthenticatedReq::VlobUpdate {
            realm_id,
            vlob_id,
            version,
            key_index,
            timestamp,
            blob,
            sequester_blob,
        } => {
            let sequestered = sequester_blob.map(|blobs| {
                blobs
                    .into_iter()
                    .map(|(service_id, bytes)| (service_id, bytes.into_vec()))
                    .collect()
            });
            let rep = match backend
                .vlob
                .update(
                    ctx,
                    realm_id,
                    vlob_id,
                    version,
                    key_index,
                    timestamp,
                    blob.into_vec(),
                    sequestered,
                )
                .await
            {
                Ok(()) => VlobUpdateRep::Ok,
                Err(err) => err.into(),
            };
            reply(settled, &rep)
        }
        AuthenticatedReq::VlobReadBatch {
            realm_id,
            vlobs,
            at,
        } => {
            let items: Vec<_> = vlobs.into_iter().map(|vlob_id| (vlob_id, at)).collect();
            let rep = match backend.vlob.read_batch(ctx, realm_id, &items).await {
                Ok(batch) => VlobReadBatchRep::Ok {
                    items: batch
                        .items
                        .into_iter()
                        .map(|item| {
                            item.map(|item| VlobReadBatchItem {
                                vlob_id: item.vlob_id,
                                key_index: item.key_index,
                                version: item.version,
                                author: item.author,
                                created_on: item.created_on,
                                blob: ByteBuf::from(item.blob),
                            })
                        })
                        .collect(),
                    needed_common_certificate_timestamp: batch.needed_common_certificate_timestamp,
                    needed_realm_certificate_timestamp: batch.needed_realm_certificate_timestamp,
                },
                Err(crate::components::vlob::ReadVlobError::RealmNotFound) => {
                    VlobReadBatchRep::RealmNotFound
                }
                Err(crate::components::vlob::ReadVlobError::AuthorNotAllowed) => {
                    VlobReadBatchRep::AuthorNotAllowed
                }
            };
            reply(settled, &rep)
        }
        AuthenticatedReq::VlobPollChanges {
            realm_id,
            last_checkpoint,
        } => {
            let rep = match backend.vlob.poll_changes(ctx, realm_id, last_checkpoint).await {
                Ok(changes) => VlobPollChangesRep::Ok {
                    current_checkpoint: changes.current_checkpoint,
                    changes: changes.changes,
                },
                Err(err) => VlobPollChangesRep::from_error(err),
            };
            reply(settled, &rep)
        }
        AuthenticatedReq::BlockCreate {
            realm_id,
            block_id,
            key_index,
            block,
        } => {
            let rep = match backend
                .block
                .create(ctx, realm_id, block_id, key_index, block.into_vec())
                .await
            {
                Ok(()) => BlockCreateRep::Ok,
                Err(err) => err.into(),
            };
            reply(settled, &rep)
        }
        AuthenticatedReq::BlockRead { block_id } => {
            let rep = match backend.block.read(ctx, block_id).await {
                Ok(read) => BlockReadRep::Ok {
                    realm_id: read.realm_id,
                    key_index: read.key_index,
                    block: ByteBuf::from(read.payload),
                    needed_realm_certificate_timestamp: read.needed_realm_certificate_timestamp,
                },
                Err(err) => err.into(),
            };
            reply(settled, &rep)
        }
        AuthenticatedReq::InviteNewUser {
            claimer_email,
            send_email,
        } => {
            let rep = match backend
                .invite
                .new_user(ctx, claimer_email, send_email, client_ip)
                .await
            {
                Ok((token, email_sent)) => InviteNewRep::Ok {
                    token,
                    email_sent: email_sent_wire(email_sent),
                },
                Err(err) => InviteNewRep::from_error(err),
            };
            reply(settled, &rep)
        }
        AuthenticatedReq::InviteNewDevice { send_email } => {
            let rep = match backend.invite.new_device(ctx, send_email, client_ip).await {
                Ok((token, email_sent)) => InviteNewRep::Ok {
                    token,
                    email_sent: email_sent_wire(email_sent),
                },
                Err(err) => InviteNewRep::from_error(err),
            };
            reply(settled, &rep)
        }
        AuthenticatedReq::InviteList => {
            let invitations = backend
                .invite
                .list(ctx)
                .into_iter()
                .map(|info| InviteListItem {
                    token: info.token,
                    invitation_type: info.invitation_type,
                    created_by: info.created_by,
                    claimer_email: info.claimer_email,
                    created_on: info.created_on,
                    status: info.status,
                })
                .collect();
            reply(settled, &InviteListRep::Ok { invitations })
        }
        AuthenticatedReq::InviteCancel { token } => {
            let rep = match backend.invite.cancel(ctx, token) {
                Ok(()) => InviteCancelRep::Ok,
                Err(err) => err.into(),
            };
            reply(settled, &rep)
        }
        AuthenticatedReq::InviteComplete { token } => {
            let rep = match backend.invite.complete(ctx, token) {
                Ok(()) => InviteCompleteRep::Ok,
                Err(err) => err.into(),
            };
            reply(settled, &rep)
        }
        AuthenticatedReq::InviteGreeterStartGreetingAttempt { token } => {
            let rep = match backend.invite.greeter_start_attempt(ctx, token) {
                Ok(greeting_attempt) => {
                    InviteGreeterStartGreetingAttemptRep::Ok { greeting_attempt }
                }
                Err(GreetingAttemptError::InvitationNotFound) => {
                    InviteGreeterStartGreetingAttemptRep::InvitationNotFound
                }
                Err(GreetingAttemptError::InvitationAlreadyDeleted) => {
                    InviteGreeterStartGreetingAttemptRep::InvitationAlreadyDeleted
                }
                Err(_) => InviteGreeterStartGreetingAttemptRep::AuthorNotAllowed,
            };
            reply(settled, &rep)
        }
        AuthenticatedReq::InviteGreeterStep {
            greeting_attempt,
            step_index,
            greeter_step,
        } => {
            let rep = match backend.invite.greeter_step(
                ctx,
                greeting_attempt,
                step_index as usize,
                greeter_step.into_vec(),
            ) {
                Ok(GreetingStepReply::Done(claimer_step)) => InviteGreeterStepRep::Ok {
                    claimer_step: ByteBuf::from(claimer_step),
                },
                Ok(GreetingStepReply::NotReady) => InviteGreeterStepRep::NotReady,
                Err(err) => err.into(),
            };
            reply(settled, &rep)
        }
        AuthenticatedReq::PkiEnrollmentList => {
            let rep = match backend.enrollment.list(ctx) {
                Ok(rows) => PkiEnrollmentListRep::Ok {
                    enrollments: rows
                        .into_iter()
                        .map(|row| PkiEnrollmentListItem {
                            enrollment_id: row.enrollment_id,
                            email: row.email,
                            submitted_on: row.submitted_on,
                            submitter_der_x509_certificate: ByteBuf::from(
                                row.submitter_x509_certificate,
                            ),
                            submit_payload_signature: ByteBuf::from(row.submit_payload_signature),
                            submit_payload: ByteBuf::from(row.submit_payload),
                        })
                        .collect(),
                },
                Err(_) => PkiEnrollmentListRep::AuthorNotAllowed,
            };
            reply(settled, &rep)
        }
        AuthenticatedReq::PkiEnrollmentAccept {
            enrollment_id,
            accept_payload,
            user_certificate,
            redacted_user_certificate,
            device_certificate,
            redacted_device_certificate,
        } => {
            let rep = match backend
                .enrollment
                .accept(
                    ctx,
                    enrollment_id,
                    accept_payload.into_vec(),
                    &user_certificate,
                    &redacted_user_certificate,
                    &device_certificate,
                    &redacted_device_certificate,
                )
                .await
            {
                Ok(_) => PkiEnrollmentDecideRep::Ok,
                Err(err) => err.into(),
            };
            reply(settled, &rep)
        }
        AuthenticatedReq::PkiEnrollmentReject { enrollment_id } => {
            let rep = match backend.enrollment.reject(ctx, enrollment_id) {
                Ok(()) => PkiEnrollmentDecideRep::Ok,
                Err(err) => err.into(),
            };
            reply(settled, &rep)
        }
        AuthenticatedReq::ShamirRecoverySetup {
            ciphered_data,
            reveal_token,
            shamir_recovery_brief_certificate,
            shamir_recovery_share_certificates,
        } => {
            let shares = shamir_recovery_share_certificates
                .into_iter()
                .map(|(user_id, share)| (user_id, share.into_vec()))
                .collect();
            let rep = match backend
                .shamir
                .setup(
                    ctx,
                    ciphered_data.into_vec(),
                    reveal_token,
                    &shamir_recovery_brief_certificate,
                    shares,
                )
                .await
            {
                Ok(()) => ShamirRecoverySetupRep::Ok,
                Err(err) => err.into(),
            };
            reply(settled, &rep)
        }
        AuthenticatedReq::ShamirRecoveryDelete {
            shamir_recovery_deletion_certificate,
        } => {
            let rep = match backend
                .shamir
                .delete(ctx, &shamir_recovery_deletion_certificate)
                .await
            {
                Ok(()) => ShamirRecoveryDeleteRep::Ok,
                Err(err) => err.into(),
            };
            reply(settled, &rep)
        }
        AuthenticatedReq::TotpSetupGetSecret => {
            let secret = backend.totp.setup_get_secret(ctx);
            reply(
                settled,
                &TotpSetupGetSecretRep::Ok {
                    secret: ByteBuf::from(secret),
                },
            )
        }
        AuthenticatedReq::TotpSetupConfirm { one_time_password } => {
            let rep = match backend
                .totp
                .setup_confirm(ctx, &one_time_password, Timestamp::now())
            {
                Ok(()) => TotpRep::Ok,
                Err(err) => err.into(),
            };
            reply(settled, &rep)
        }
        AuthenticatedReq::TotpCreateOpaqueKey { opaque_key } => {
            let rep = match backend.totp.create_opaque_key(ctx, opaque_key.into_vec()) {
                Ok(()) => TotpRep::Ok,
                Err(err) => err.into(),
            };
            reply(settled, &rep)
        }
        AuthenticatedReq::TotpFetchOpaqueKey { one_time_password } => {
            let rep = match backend
                .totp
                .fetch_opaque_key(ctx, &one_time_password, Timestamp::now())
            {
                Ok(opaque_key) => TotpFetchOpaqueKeyRep::Ok {
                    opaque_key: ByteBuf::from(opaque_key),
                },
                Err(err) => err.into(),
            };
            reply(settled, &rep)
        }
        AuthenticatedReq::TotpReset => {
            let rep = match backend.totp.reset(ctx) {
                Ok(()) => TotpRep::Ok,
                Err(err) => err.into(),
            };
            reply(settled, &rep)
        }
    }
}
