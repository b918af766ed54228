//! Administration REST: organization lifecycle, stats, user freezing.
//!
//! Everything here sits behind the server-wide administration token;
//! no organization credential is involved.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use base64::Engine;
use serde::{Deserialize, Serialize};

use velum_core::id::{
    BlockId, DeviceId, EmailAddress, OrganizationId, RealmId, SequesterServiceId, UserId, VlobId,
};
use velum_core::time::Timestamp;

use crate::backend::Backend;
use crate::components::export::{ExportError, ExportSnapshot};
use crate::components::organization::{
    CreateOrganizationError, CreateOrganizationParams, CreateSequesterServiceError,
    OrganizationStats, UpdateOrganizationParams,
};
use crate::components::user::FreezeUserError;

pub fn router() -> Router<Arc<Backend>> {
    Router::new()
        .route("/administration/organizations", post(create_organization))
        .route(
            "/administration/organizations/:organization_id",
            get(get_organization).patch(update_organization),
        )
        .route(
            "/administration/organizations/:organization_id/stats",
            get(organization_stats),
        )
        .route(
            "/administration/organizations/:organization_id/users/freeze",
            patch(freeze_user),
        )
        .route(
            "/administration/organizations/:organization_id/sequester/services",
            post(create_sequester_service),
        )
        .route(
            "/administration/organizations/:organization_id/realms/:realm_id/export",
            post(export_snapshot),
        )
        .route(
            "/administration/organizations/:organization_id/export/vlobs",
            post(export_vlob_batch),
        )
        .route(
            "/administration/organizations/:organization_id/export/blocks",
            post(export_block_batch),
        )
        .route(
            "/administration/organizations/:organization_id/export/certificates",
            post(export_certificates),
        )
        .route("/administration/stats", get(server_stats))
}

fn check_admin_token(backend: &Backend, headers: &HeaderMap) -> Result<(), Response> {
    let presented = headers
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.strip_prefix("Bearer "));
    match presented {
        Some(token) if token == backend.config.administration_token => Ok(()),
        _ => Err(StatusCode::FORBIDDEN.into_response()),
    }
}

#[derive(Debug, Deserialize)]
struct CreateOrganizationBody {
    organization_id: String,
    #[serde(flatten)]
    params: CreateOrganizationParams,
}

#[derive(Debug, Serialize)]
struct CreateOrganizationReply {
    bootstrap_token: String,
}

async fn create_organization(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    Json(body): Json<CreateOrganizationBody>,
) -> Response {
    if let Err(refusal) = check_admin_token(&backend, &headers) {
        return refusal;
    }
    let organization_id = match OrganizationId::from_str(&body.organization_id) {
        Ok(id) => id,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };
    match backend.organization.create(organization_id, body.params) {
        Ok(bootstrap_token) => Json(CreateOrganizationReply {
            bootstrap_token: bootstrap_token.hex(),
        })
        .into_response(),
        Err(CreateOrganizationError::AlreadyExists) => StatusCode::CONFLICT.into_response(),
    }
}

async fn get_organization(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    Path(raw_organization_id): Path<String>,
) -> Response {
    if let Err(refusal) = check_admin_token(&backend, &headers) {
        return refusal;
    }
    let organization_id = match OrganizationId::from_str(&raw_organization_id) {
        Ok(id) => id,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };
    match backend.organization.get(&organization_id) {
        Some(info) => Json(info).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn update_organization(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    Path(raw_organization_id): Path<String>,
    Json(params): Json<UpdateOrganizationParams>,
) -> Response {
    if let Err(refusal) = check_admin_token(&backend, &headers) {
        return refusal;
    }
    let organization_id = match OrganizationId::from_str(&raw_organization_id) {
        Ok(id) => id,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };
    match backend.organization.update(&organization_id, params) {
        Some(()) => StatusCode::OK.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct StatsQuery {
    at: Option<String>,
    format: Option<String>,
}

fn parse_at(query: &StatsQuery) -> Result<Option<Timestamp>, Response> {
    match &query.at {
        None => Ok(None),
        Some(raw) => Timestamp::from_rfc3339(raw)
            .map(Some)
            .map_err(|_| StatusCode::BAD_REQUEST.into_response()),
    }
}

async fn organization_stats(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    Path(raw_organization_id): Path<String>,
    Query(query): Query<StatsQuery>,
) -> Response {
    if let Err(refusal) = check_admin_token(&backend, &headers) {
        return refusal;
    }
    let organization_id = match OrganizationId::from_str(&raw_organization_id) {
        Ok(id) => id,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };
    let at = match parse_at(&query) {
        Ok(at) => at,
        Err(refusal) => return refusal,
    };
    match backend.organization.stats(&organization_id, at) {
        Some(stats) => Json(stats).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Debug, Serialize)]
struct ServerStatsRow {
    organization_id: OrganizationId,
    #[serde(flatten)]
    stats: OrganizationStats,
}

#[derive(Debug, Serialize)]
struct ServerStatsReply {
    stats: Vec<ServerStatsRow>,
}

fn stats_csv(rows: &[(OrganizationId, OrganizationStats)]) -> String {
    let mut out = String::from(
        "organization_id,users,active_users,admin_users_active,admin_users_revoked,\
         standard_users_active,standard_users_revoked,outsider_users_active,\
         outsider_users_revoked,realms,metadata_size,data_size\n",
    );
    for (organization_id, stats) in rows {
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{},{},{},{},{}\n",
            organization_id,
            stats.users,
            stats.active_users,
            stats.admin_users.active,
            stats.admin_users.revoked,
            stats.standard_users.active,
            stats.standard_users.revoked,
            stats.outsider_users.active,
            stats.outsider_users.revoked,
            stats.realms,
            stats.metadata_size,
            stats.data_size,
        ));
    }
    out
}

async fn server_stats(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    Query(query): Query<StatsQuery>,
) -> Response {
    if let Err(refusal) = check_admin_token(&backend, &headers) {
        return refusal;
    }
    let at = match parse_at(&query) {
        Ok(at) => at,
        Err(refusal) => return refusal,
    };
    let rows = backend.organization.server_stats(at);
    match query.format.as_deref() {
        Some("csv") => (
            StatusCode::OK,
            [("Content-Type", "text/csv")],
            stats_csv(&rows),
        )
            .into_response(),
        None | Some("json") => Json(ServerStatsReply {
            stats: rows
                .into_iter()
                .map(|(organization_id, stats)| ServerStatsRow {
                    organization_id,
                    stats,
                })
                .collect(),
        })
        .into_response(),
        Some(_) => StatusCode::BAD_REQUEST.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct CreateSequesterServiceBody {
    /// Base64 of the certificate signed by the sequester authority.
    sequester_service_certificate: String,
}

#[derive(Debug, Serialize)]
struct CreateSequesterServiceReply {
    service_id: SequesterServiceId,
}

async fn create_sequester_service(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    Path(raw_organization_id): Path<String>,
    Json(body): Json<CreateSequesterServiceBody>,
) -> Response {
    if let Err(refusal) = check_admin_token(&backend, &headers) {
        return refusal;
    }
    let organization_id = match OrganizationId::from_str(&raw_organization_id) {
        Ok(id) => id,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };
    let raw = match base64::engine::general_purpose::STANDARD
        .decode(&body.sequester_service_certificate)
    {
        Ok(raw) => raw,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };
    match backend
        .organization
        .create_sequester_service(&organization_id, &raw)
        .await
    {
        Ok(service_id) => Json(CreateSequesterServiceReply { service_id }).into_response(),
        Err(CreateSequesterServiceError::OrganizationNotFound) => {
            StatusCode::NOT_FOUND.into_response()
        }
        Err(CreateSequesterServiceError::ServiceAlreadyExists) => {
            StatusCode::CONFLICT.into_response()
        }
        Err(
            CreateSequesterServiceError::NotSequestered
            | CreateSequesterServiceError::InvalidCertificate
            | CreateSequesterServiceError::Timestamp(_),
        ) => StatusCode::BAD_REQUEST.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct ExportSnapshotBody {
    snapshot_timestamp: String,
}

#[derive(Debug, Deserialize)]
struct ExportBatchBody {
    snapshot: ExportSnapshot,
    after: u64,
    page_size: usize,
}

#[derive(Debug, Deserialize)]
struct ExportCertificatesBody {
    snapshot: ExportSnapshot,
}

#[derive(Debug, Serialize)]
struct ExportVlobRow {
    checkpoint: u64,
    vlob_id: VlobId,
    version: u64,
    key_index: u64,
    /// Base64 of the encrypted blob.
    blob: String,
    author: DeviceId,
    timestamp: Timestamp,
}

#[derive(Debug, Serialize)]
struct ExportBlockRow {
    sequence: u64,
    block_id: BlockId,
    key_index: u64,
    author: DeviceId,
    size: u64,
    timestamp: Timestamp,
}

#[derive(Debug, Serialize)]
struct ExportCertificatesReply {
    /// Base64 of each signed certificate, per stream.
    common: Vec<String>,
    realm: Vec<String>,
    sequester: Vec<String>,
}

fn export_refusal(err: ExportError) -> Response {
    match err {
        ExportError::OrganizationNotFound | ExportError::RealmNotFound => {
            StatusCode::NOT_FOUND.into_response()
        }
        ExportError::SnapshotTooRecent { .. } => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn export_snapshot(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    Path((raw_organization_id, raw_realm_id)): Path<(String, String)>,
    Json(body): Json<ExportSnapshotBody>,
) -> Response {
    if let Err(refusal) = check_admin_token(&backend, &headers) {
        return refusal;
    }
    let organization_id = match OrganizationId::from_str(&raw_organization_id) {
        Ok(id) => id,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };
    let realm_id = match RealmId::from_str(&raw_realm_id) {
        Ok(id) => id,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };
    let snapshot_timestamp = match Timestamp::from_rfc3339(&body.snapshot_timestamp) {
        Ok(timestamp) => timestamp,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };
    match backend.export.snapshot(
        &organization_id,
        realm_id,
        snapshot_timestamp,
        Timestamp::now(),
    ) {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(err) => export_refusal(err),
    }
}

async fn export_vlob_batch(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    Path(raw_organization_id): Path<String>,
    Json(body): Json<ExportBatchBody>,
) -> Response {
    if let Err(refusal) = check_admin_token(&backend, &headers) {
        return refusal;
    }
    let organization_id = match OrganizationId::from_str(&raw_organization_id) {
        Ok(id) => id,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };
    match backend
        .export
        .vlob_batch(&organization_id, &body.snapshot, body.after, body.page_size)
    {
        Ok(items) => Json(
            items
                .into_iter()
                .map(|item| ExportVlobRow {
                    checkpoint: item.checkpoint,
                    vlob_id: item.vlob_id,
                    version: item.version,
                    key_index: item.key_index,
                    blob: base64::engine::general_purpose::STANDARD.encode(&item.blob),
                    author: item.author,
                    timestamp: item.timestamp,
                })
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(err) => export_refusal(err),
    }
}

async fn export_block_batch(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    Path(raw_organization_id): Path<String>,
    Json(body): Json<ExportBatchBody>,
) -> Response {
    if let Err(refusal) = check_admin_token(&backend, &headers) {
        return refusal;
    }
    let organization_id = match OrganizationId::from_str(&raw_organization_id) {
        Ok(id) => id,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };
    match backend
        .export
        .block_batch(&organization_id, &body.snapshot, body.after, body.page_size)
    {
        Ok(items) => Json(
            items
                .into_iter()
                .map(|item| ExportBlockRow {
                    sequence: item.sequence,
                    block_id: item.block_id,
                    key_index: item.key_index,
                    author: item.author,
                    size: item.size,
                    timestamp: item.timestamp,
                })
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(err) => export_refusal(err),
    }
}

async fn export_certificates(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    Path(raw_organization_id): Path<String>,
    Json(body): Json<ExportCertificatesBody>,
) -> Response {
    if let Err(refusal) = check_admin_token(&backend, &headers) {
        return refusal;
    }
    let organization_id = match OrganizationId::from_str(&raw_organization_id) {
        Ok(id) => id,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };
    let encode = |rows: Vec<Vec<u8>>| {
        rows.into_iter()
            .map(|raw| base64::engine::general_purpose::STANDARD.encode(raw))
            .collect()
    };
    match backend.export.certificates(&organization_id, &body.snapshot) {
        Ok(certificates) => Json(ExportCertificatesReply {
            common: encode(certificates.common),
            realm: encode(certificates.realm),
            sequester: encode(certificates.sequester),
        })
        .into_response(),
        Err(err) => export_refusal(err),
    }
}

#[derive(Debug, Deserialize)]
struct FreezeUserBody {
    user_id: Option<UserId>,
    user_email: Option<EmailAddress>,
    frozen: bool,
}

#[derive(Debug, Serialize)]
struct FreezeUserReply {
    user_id: UserId,
    frozen: bool,
}

async fn freeze_user(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    Path(raw_organization_id): Path<String>,
    Json(body): Json<FreezeUserBody>,
) -> Response {
    if let Err(refusal) = check_admin_token(&backend, &headers) {
        return refusal;
    }
    let organization_id = match OrganizationId::from_str(&raw_organization_id) {
        Ok(id) => id,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };
    if body.user_id.is_none() == body.user_email.is_none() {
        // Exactly one selector
        return StatusCode::BAD_REQUEST.into_response();
    }
    match backend.user.freeze_user(
        &organization_id,
        body.user_id,
        body.user_email.as_ref(),
        body.frozen,
    ) {
        Ok(user_id) => Json(FreezeUserReply {
            user_id,
            frozen: body.frozen,
        })
        .into_response(),
        Err(FreezeUserError::OrganizationNotFound) | Err(FreezeUserError::UserNotFound) => {
            StatusCode::NOT_FOUND.into_response()
        }
    }
}
