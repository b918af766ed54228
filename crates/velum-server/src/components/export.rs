//! Realm export for offline archival.
//!
//! An export walks a self-consistent prefix of a realm: the caller
//! first takes a snapshot, which freezes upper bounds over every
//! sequence involved (vlob checkpoints, blocks, certificate
//! timestamps), then pages through vlobs and blocks below those
//! bounds. The snapshot timestamp must lag the server clock by at
//! least the ballpark late offset so no in-flight write can still
//! land below it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use velum_certif::envelope::Certificate;
use velum_core::ballpark::BALLPARK_CLIENT_LATE_OFFSET;
use velum_core::id::{BlockId, DeviceId, OrganizationId, RealmId, VlobId};
use velum_core::time::Timestamp;
use velum_store::{OrgState, RealmEntry, Store};

/// Failure of an export operation.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("realm not found")]
    RealmNotFound,
    #[error("snapshot timestamp must lag the server clock by at least {minimum_lag_seconds} seconds")]
    SnapshotTooRecent { minimum_lag_seconds: f64 },
}

/// Frozen upper bounds of one export run. Serializable so the admin
/// surface can hand it to the caller and take it back page after page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSnapshot {
    pub realm_id: RealmId,
    pub snapshot_timestamp: Timestamp,
    /// Highest vlob checkpoint whose atom was written at or before the
    /// snapshot; 0 when none.
    pub vlob_upper_bound: u64,
    /// Number of realm blocks written at or before the snapshot.
    pub block_count: u64,
    /// Highest common certificate timestamp at or before the snapshot.
    pub common_certificate_timestamp: Option<Timestamp>,
    /// Highest realm certificate timestamp at or before the snapshot.
    pub realm_certificate_timestamp: Option<Timestamp>,
    /// Highest sequester certificate timestamp at or before the snapshot.
    pub sequester_certificate_timestamp: Option<Timestamp>,
}

/// One exported vlob atom.
#[derive(Debug, Clone)]
pub struct ExportVlobItem {
    pub checkpoint: u64,
    pub vlob_id: VlobId,
    pub version: u64,
    pub key_index: u64,
    pub blob: Vec<u8>,
    pub author: DeviceId,
    pub timestamp: Timestamp,
}

/// One exported block row. Payloads travel through the regular block
/// read path; the export only lists what to fetch.
#[derive(Debug, Clone)]
pub struct ExportBlockItem {
    pub sequence: u64,
    pub block_id: BlockId,
    pub key_index: u64,
    pub author: DeviceId,
    pub size: u64,
    pub timestamp: Timestamp,
}

/// The export component. Reached through the administration surface,
/// never through client RPC.
pub struct ExportComponent {
    store: Arc<Store>,
}

impl ExportComponent {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Freeze the bounds of an export run.
    pub fn snapshot(
        &self,
        organization_id: &OrganizationId,
        realm_id: RealmId,
        snapshot_timestamp: Timestamp,
        now: Timestamp,
    ) -> Result<ExportSnapshot, ExportError> {
        let minimum_lag_us = (BALLPARK_CLIENT_LATE_OFFSET * 1e6) as i64;
        if now.us_since(snapshot_timestamp) < minimum_lag_us {
            return Err(ExportError::SnapshotTooRecent {
                minimum_lag_seconds: BALLPARK_CLIENT_LATE_OFFSET,
            });
        }
        let organization = self
            .store
            .organization(organization_id)
            .ok_or(ExportError::OrganizationNotFound)?;
        organization.with(|state| {
            let realm = state
                .realms
                .get(&realm_id)
                .ok_or(ExportError::RealmNotFound)?;
            Ok(ExportSnapshot {
                realm_id,
                snapshot_timestamp,
                vlob_upper_bound: realm
                    .vlob_updates
                    .iter()
                    .rev()
                    .find(|update| update.atom.created_on <= snapshot_timestamp)
                    .map(|update| update.index)
                    .unwrap_or(0),
                block_count: realm_blocks(state, realm_id)
                    .filter(|block| block.created_on <= snapshot_timestamp)
                    .count() as u64,
                common_certificate_timestamp: max_common_certificate_timestamp(
                    state,
                    snapshot_timestamp,
                ),
                realm_certificate_timestamp: max_realm_certificate_timestamp(
                    realm,
                    snapshot_timestamp,
                ),
                sequester_certificate_timestamp: max_sequester_certificate_timestamp(
                    state,
                    snapshot_timestamp,
                ),
            })
        })
    }

    /// Page through the realm's vlob sequence.
    ///
    /// Returns atoms with `after < checkpoint <= snapshot bound`, in
    /// checkpoint order, at most `page_size` of them. Repeat with the
    /// last returned checkpoint until the page comes back empty.
    pub fn vlob_batch(
        &self,
        organization_id: &OrganizationId,
        snapshot: &ExportSnapshot,
        after: u64,
        page_size: usize,
    ) -> Result<Vec<ExportVlobItem>, ExportError> {
        let organization = self
            .store
            .organization(organization_id)
            .ok_or(ExportError::OrganizationNotFound)?;
        organization.with(|state| {
            let realm = state
                .realms
                .get(&snapshot.realm_id)
                .ok_or(ExportError::RealmNotFound)?;
            Ok(realm
                .vlob_updates
                .iter()
                .filter(|update| update.index > after && update.index <= snapshot.vlob_upper_bound)
                .take(page_size)
                .map(|update| ExportVlobItem {
                    checkpoint: update.index,
                    vlob_id: update.atom.vlob_id,
                    version: update.atom.version,
                    key_index: update.atom.key_index,
                    blob: update.atom.blob.clone(),
                    author: update.atom.author.clone(),
                    timestamp: update.atom.created_on,
                })
                .collect())
        })
    }

    /// Page through the realm's blocks in `(timestamp, block_id)`
    /// order, which is stable across runs.
    pub fn block_batch(
        &self,
        organization_id: &OrganizationId,
        snapshot: &ExportSnapshot,
        after: u64,
        page_size: usize,
    ) -> Result<Vec<ExportBlockItem>, ExportError> {
        let organization = self
            .store
            .organization(organization_id)
            .ok_or(ExportError::OrganizationNotFound)?;
        organization.with(|state| {
            state
                .realms
                .get(&snapshot.realm_id)
                .ok_or(ExportError::RealmNotFound)?;
            let mut rows: Vec<_> = realm_blocks(state, snapshot.realm_id)
                .filter(|block| block.created_on <= snapshot.snapshot_timestamp)
                .collect();
            rows.sort_by_key(|block| (block.created_on, block.block_id));
            Ok(rows
                .into_iter()
                .enumerate()
                .map(|(position, block)| (position as u64 + 1, block))
                .filter(|(sequence, _)| *sequence > after)
                .take(page_size)
                .map(|(sequence, block)| ExportBlockItem {
                    sequence,
                    block_id: block.block_id,
                    key_index: block.key_index,
                    author: block.author.clone(),
                    size: block.size,
                    timestamp: block.created_on,
                })
                .collect())
        })
    }

    /// The certificates an importer must replay before trusting the
    /// exported data: every common, realm, and sequester certificate
    /// below the snapshot's bounds, each stream in timestamp order.
    pub fn certificates(
        &self,
        organization_id: &OrganizationId,
        snapshot: &ExportSnapshot,
    ) -> Result<ExportCertificates, ExportError> {
        let organization = self
            .store
            .organization(organization_id)
            .ok_or(ExportError::OrganizationNotFound)?;
        organization.with(|state| {
            let realm = state
                .realms
                .get(&snapshot.realm_id)
                .ok_or(ExportError::RealmNotFound)?;
            let cutoff = snapshot.snapshot_timestamp;

            let mut common: Vec<(Timestamp, Vec<u8>)> = Vec::new();
            for user in state.users.values() {
                push_below(&mut common, user.cooked.timestamp(), &user.certificate, cutoff);
                for update in &user.profile_updates {
                    push_below(&mut common, update.cooked.timestamp(), &update.certificate, cutoff);
                }
                if let Some(revoked) = &user.revoked {
                    push_below(&mut common, revoked.cooked.timestamp(), &revoked.certificate, cutoff);
                }
            }
            for device in state.devices.values() {
                push_below(&mut common, device.cooked.timestamp(), &device.certificate, cutoff);
            }
            common.sort_by_key(|(timestamp, _)| *timestamp);

            let mut realm_certificates: Vec<(Timestamp, Vec<u8>)> = Vec::new();
            for role in &realm.roles {
                push_below(&mut realm_certificates, role.cooked.timestamp(), &role.certificate, cutoff);
            }
            for rotation in &realm.key_rotations {
                push_below(
                    &mut realm_certificates,
                    rotation.cooked.timestamp(),
                    &rotation.certificate,
                    cutoff,
                );
            }
            for rename in &realm.renames {
                push_below(&mut realm_certificates, rename.cooked.timestamp(), &rename.certificate, cutoff);
            }
            realm_certificates.sort_by_key(|(timestamp, _)| *timestamp);

            let mut sequester: Vec<(Timestamp, Vec<u8>)> = Vec::new();
            if let Some(authority) = &state.sequester_authority {
                push_below(&mut sequester, authority.cooked.timestamp(), &authority.certificate, cutoff);
            }
            for service in state.sequester_services.values() {
                push_below(&mut sequester, service.cooked.timestamp(), &service.certificate, cutoff);
            }
            sequester.sort_by_key(|(timestamp, _)| *timestamp);

            Ok(ExportCertificates {
                common: strip(common),
                realm: strip(realm_certificates),
                sequester: strip(sequester),
            })
        })
    }
}

/// The certificate streams of an export, each in timestamp order.
#[derive(Debug, Clone)]
pub struct ExportCertificates {
    pub common: Vec<Vec<u8>>,
    pub realm: Vec<Vec<u8>>,
    pub sequester: Vec<Vec<u8>>,
}

fn realm_blocks(
    state: &OrgState,
    realm_id: RealmId,
) -> impl Iterator<Item = &velum_store::BlockEntry> {
    state
        .blocks
        .values()
        .filter(move |block| block.realm_id == realm_id)
}

fn max_common_certificate_timestamp(state: &OrgState, cutoff: Timestamp) -> Option<Timestamp> {
    let mut max = None;
    for user in state.users.values() {
        keep_max(&mut max, user.cooked.timestamp(), cutoff);
        for update in &user.profile_updates {
            keep_max(&mut max, update.cooked.timestamp(), cutoff);
        }
        if let Some(revoked) = &user.revoked {
            keep_max(&mut max, revoked.cooked.timestamp(), cutoff);
        }
    }
    for device in state.devices.values() {
        keep_max(&mut max, device.cooked.timestamp(), cutoff);
    }
    max
}

fn max_realm_certificate_timestamp(realm: &RealmEntry, cutoff: Timestamp) -> Option<Timestamp> {
    let mut max = None;
    for role in &realm.roles {
        keep_max(&mut max, role.cooked.timestamp(), cutoff);
    }
    for rotation in &realm.key_rotations {
        keep_max(&mut max, rotation.cooked.timestamp(), cutoff);
    }
    for rename in &realm.renames {
        keep_max(&mut max, rename.cooked.timestamp(), cutoff);
    }
    max
}

fn max_sequester_certificate_timestamp(state: &OrgState, cutoff: Timestamp) -> Option<Timestamp> {
    let mut max = None;
    if let Some(authority) = &state.sequester_authority {
        keep_max(&mut max, authority.cooked.timestamp(), cutoff);
    }
    for service in state.sequester_services.values() {
        keep_max(&mut max, service.cooked.timestamp(), cutoff);
    }
    max
}

fn keep_max(max: &mut Option<Timestamp>, candidate: Timestamp, cutoff: Timestamp) {
    if candidate <= cutoff && max.map_or(true, |current| candidate > current) {
        *max = Some(candidate);
    }
}

fn push_below(
    rows: &mut Vec<(Timestamp, Vec<u8>)>,
    timestamp: Timestamp,
    certificate: &[u8],
    cutoff: Timestamp,
) {
    if timestamp <= cutoff {
        rows.push((timestamp, certificate.to_vec()));
    }
}

fn strip(rows: Vec<(Timestamp, Vec<u8>)>) -> Vec<Vec<u8>> {
    rows.into_iter().map(|(_, certificate)| certificate).collect()
}
