//! The in-memory datamodel.
//!
//! One [`Store`] per process, one [`OrganizationStore`] per tenant.
//! Entity state is plain data behind a synchronous mutex: critical
//! sections never suspend, so every mutation made under
//! [`OrganizationStore::with`] is atomic with respect to other
//! requests. Cross-request ordering is the business of the topic
//! locks ([`crate::locks`]), which *are* held across await points.
//!
//! Certificates are stored twice: raw canonical bytes (what clients
//! fetch and verify) and the decoded form (what the server reasons
//! on), following the cooked-vs-raw split of the wire contract.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use velum_certif::{
    DeviceCertificate, RealmKeyRotationCertificate, RealmNameCertificate, RealmRoleCertificate,
    RevokedUserCertificate, SequesterAuthorityCertificate, SequesterServiceCertificate,
    ShamirRecoveryBriefCertificate, ShamirRecoveryDeletionCertificate, UserCertificate,
    UserUpdateCertificate,
};
use velum_core::crypto::{HashDigest, VerifyKey};
use velum_core::id::{
    AccountVaultId, BlockId, DeviceId, EmailAddress, EnrollmentId, GreetingAttemptId,
    OrganizationId, RealmId, SequesterServiceId, UserId, VlobId,
};
use velum_core::time::Timestamp;
use velum_core::token::{BootstrapToken, InvitationToken};
use velum_core::types::{
    ActiveUsersLimit, GreeterOrClaimer, InvitationType, RealmRole, UserProfile,
};

use crate::locks::{Topic, TopicLockTable};

/// Process-wide store: every organization lives here.
#[derive(Default)]
pub struct Store {
    organizations: RwLock<HashMap<OrganizationId, Arc<OrganizationStore>>>,
}

impl Store {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an organization.
    pub fn organization(&self, id: &OrganizationId) -> Option<Arc<OrganizationStore>> {
        self.organizations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    /// Register a new organization; fails if the id is taken.
    pub fn create_organization(
        &self,
        id: OrganizationId,
        state: OrgState,
    ) -> Result<Arc<OrganizationStore>, OrganizationAlreadyExists> {
        let mut organizations = self
            .organizations
            .write()
            .unwrap_or_else(|e| e.into_inner());
        if organizations.contains_key(&id) {
            return Err(OrganizationAlreadyExists);
        }
        let org = Arc::new(OrganizationStore {
            id: id.clone(),
            state: Mutex::new(state),
            topics: Arc::new(TopicLockTable::new()),
        });
        organizations.insert(id, org.clone());
        Ok(org)
    }

    /// Cascade-delete an organization and everything inside it.
    pub fn erase_organization(&self, id: &OrganizationId) -> bool {
        self.organizations
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .is_some()
    }

    /// Snapshot of all organization ids.
    pub fn organization_ids(&self) -> Vec<OrganizationId> {
        self.organizations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}

/// Duplicate organization id on creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("organization already exists")]
pub struct OrganizationAlreadyExists;

/// One tenant: plain-data state plus its topic lock table.
pub struct OrganizationStore {
    id: OrganizationId,
    state: Mutex<OrgState>,
    topics: Arc<TopicLockTable>,
}

impl OrganizationStore {
    /// The organization id.
    pub fn id(&self) -> &OrganizationId {
        &self.id
    }

    /// The topic lock table.
    pub fn topics(&self) -> &Arc<TopicLockTable> {
        &self.topics
    }

    /// Run `f` inside the state critical section.
    ///
    /// `f` must not block: no I/O, no awaits (enforced by the
    /// synchronous closure signature).
    pub fn with<R>(&self, f: impl FnOnce(&mut OrgState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    /// Acquire topic locks, then read the `last_timestamp` of every
    /// requested topic (read topics first, then write topics, in the
    /// order given). Topics never written report the Unix epoch.
    pub async fn lock_topics(
        &self,
        read: &[Topic],
        write: &[Topic],
    ) -> (crate::locks::LockHold, Vec<Timestamp>) {
        let hold = self.topics.acquire(read, write).await;
        let timestamps = self.with(|state| {
            read.iter()
                .chain(write)
                .map(|topic| state.topic_last_timestamp(topic))
                .collect()
        });
        (hold, timestamps)
    }
}

/// Everything an organization owns.
pub struct OrgState {
    /// Creation instant.
    pub created_on: Timestamp,
    /// One-shot bootstrap credential; `None` once consumed or when the
    /// organization allows token-less spontaneous bootstrap.
    pub bootstrap_token: Option<BootstrapToken>,
    /// Set exactly once, by bootstrap.
    pub bootstrapped_on: Option<Timestamp>,
    /// Set exactly once, by bootstrap; never changes afterwards.
    pub root_verify_key: Option<VerifyKey>,
    /// Reversible expiry flag; expired organizations refuse sessions.
    pub is_expired: bool,
    /// Cap on non-revoked users.
    pub active_users_limit: ActiveUsersLimit,
    /// Whether OUTSIDER users may be created.
    pub user_profile_outsider_allowed: bool,
    /// Floor on client-requested archiving delays.
    pub minimum_archiving_period: Duration,
    /// Sequester authority; `None` for non-sequestered organizations.
    pub sequester_authority: Option<SequesterAuthority>,
    /// Escrow services (sequestered organizations only).
    pub sequester_services: HashMap<SequesterServiceId, SequesterServiceEntry>,
    /// Users by id.
    pub users: HashMap<UserId, UserEntry>,
    /// Devices by fully-qualified id.
    pub devices: HashMap<DeviceId, DeviceEntry>,
    /// Invitations by token.
    pub invitations: HashMap<InvitationToken, InvitationEntry>,
    /// Greeting attempts by id.
    pub greeting_attempts: HashMap<GreetingAttemptId, GreetingAttemptEntry>,
    /// Async enrollments by id.
    pub enrollments: HashMap<EnrollmentId, EnrollmentEntry>,
    /// Realms by id.
    pub realms: HashMap<RealmId, RealmEntry>,
    /// All versions of every vlob, oldest first.
    pub vlobs: HashMap<VlobId, Vec<Arc<VlobAtom>>>,
    /// Block metadata (payloads live in the blockstore).
    pub blocks: HashMap<BlockId, BlockEntry>,
    /// Shamir recovery setups, keyed by the protected user, oldest
    /// first; the last entry is in force unless deleted.
    pub shamir_setups: HashMap<UserId, Vec<ShamirSetupEntry>>,
    /// TOTP opaque keys, keyed by the protected user.
    pub totp_keys: HashMap<UserId, TotpKeyEntry>,
    /// Recovery accounts, keyed by email.
    pub accounts: HashMap<EmailAddress, AccountEntry>,
    /// Monotonic per-topic watermarks.
    pub per_topic_last_timestamp: HashMap<Topic, Timestamp>,
}

impl OrgState {
    /// Fresh, not-yet-bootstrapped organization.
    pub fn new(
        created_on: Timestamp,
        bootstrap_token: Option<BootstrapToken>,
        active_users_limit: ActiveUsersLimit,
        user_profile_outsider_allowed: bool,
        minimum_archiving_period: Duration,
    ) -> Self {
        Self {
            created_on,
            bootstrap_token,
            bootstrapped_on: None,
            root_verify_key: None,
            is_expired: false,
            active_users_limit,
            user_profile_outsider_allowed,
            minimum_archiving_period,
            sequester_authority: None,
            sequester_services: HashMap::new(),
            users: HashMap::new(),
            devices: HashMap::new(),
            invitations: HashMap::new(),
            greeting_attempts: HashMap::new(),
            enrollments: HashMap::new(),
            realms: HashMap::new(),
            vlobs: HashMap::new(),
            blocks: HashMap::new(),
            shamir_setups: HashMap::new(),
            totp_keys: HashMap::new(),
            accounts: HashMap::new(),
            per_topic_last_timestamp: HashMap::new(),
        }
    }

    /// Whether bootstrap has happened.
    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped_on.is_some()
    }

    /// Whether the organization carries a sequester authority.
    pub fn is_sequestered(&self) -> bool {
        self.sequester_authority.is_some()
    }

    /// Number of non-revoked users.
    pub fn active_users(&self) -> u64 {
        self.users.values().filter(|u| !u.is_revoked()).count() as u64
    }

    /// Whether creating one more user would exceed the limit.
    pub fn active_user_limit_reached(&self) -> bool {
        self.active_users_limit.is_reached(self.active_users())
    }

    /// The watermark of `topic`, epoch if never written.
    pub fn topic_last_timestamp(&self, topic: &Topic) -> Timestamp {
        self.per_topic_last_timestamp
            .get(topic)
            .copied()
            .unwrap_or(Timestamp::EPOCH)
    }

    /// Advance the watermark of `topic`. Callers must have checked
    /// strict monotonicity under the topic's write lock.
    pub fn bump_topic(&mut self, topic: Topic, timestamp: Timestamp) {
        let entry = self
            .per_topic_last_timestamp
            .entry(topic)
            .or_insert(Timestamp::EPOCH);
        debug_assert!(*entry < timestamp);
        *entry = timestamp;
    }

    /// Resolve a device and its owning user.
    pub fn device_and_user(&self, device_id: &DeviceId) -> Option<(&DeviceEntry, &UserEntry)> {
        let device = self.devices.get(device_id)?;
        let user = self.users.get(&device_id.user_id)?;
        Some((device, user))
    }

    /// The non-revoked user owning `email`, if any.
    pub fn active_user_by_email(&self, email: &EmailAddress) -> Option<(&UserId, &UserEntry)> {
        self.users.iter().find(|(_, user)| {
            !user.is_revoked()
                && user
                    .cooked
                    .human_handle
                    .as_ref()
                    .is_some_and(|handle| handle.email == *email)
        })
    }
}

/// Sequester authority fixed at bootstrap.
pub struct SequesterAuthority {
    /// Decoded certificate.
    pub cooked: SequesterAuthorityCertificate,
    /// Canonical signed bytes.
    pub certificate: Vec<u8>,
    /// The authority's verify key, for validating service certificates.
    pub verify_key: VerifyKey,
}

/// An escrow service of a sequestered organization.
pub struct SequesterServiceEntry {
    /// Decoded certificate.
    pub cooked: SequesterServiceCertificate,
    /// Canonical signed bytes.
    pub certificate: Vec<u8>,
    /// Revocation instant, if revoked.
    pub revoked_on: Option<Timestamp>,
}

/// A user and its certificate history.
pub struct UserEntry {
    /// Decoded full certificate.
    pub cooked: UserCertificate,
    /// Canonical full certificate bytes.
    pub certificate: Vec<u8>,
    /// Canonical redacted certificate bytes (served to OUTSIDERs).
    pub redacted_certificate: Vec<u8>,
    /// Profile updates, oldest first.
    pub profile_updates: Vec<ProfileUpdateEntry>,
    /// Revocation, at most one, irreversible.
    pub revoked: Option<RevokedEntry>,
    /// Server-side toggle; frozen users cannot authenticate.
    pub is_frozen: bool,
    /// Most recent vlob create/update by any of this user's devices.
    pub last_vlob_operation_timestamp: Option<Timestamp>,
}

impl UserEntry {
    /// The profile currently in force.
    pub fn current_profile(&self) -> UserProfile {
        self.profile_updates
            .last()
            .map(|update| update.cooked.new_profile)
            .unwrap_or(self.cooked.profile)
    }

    /// Whether the user has been revoked.
    pub fn is_revoked(&self) -> bool {
        self.revoked.is_some()
    }
}

/// One profile update of a user.
pub struct ProfileUpdateEntry {
    /// Decoded certificate.
    pub cooked: UserUpdateCertificate,
    /// Canonical signed bytes.
    pub certificate: Vec<u8>,
}

/// A user revocation.
pub struct RevokedEntry {
    /// Decoded certificate.
    pub cooked: RevokedUserCertificate,
    /// Canonical signed bytes.
    pub certificate: Vec<u8>,
}

/// A device and its certificate.
pub struct DeviceEntry {
    /// Decoded full certificate.
    pub cooked: DeviceCertificate,
    /// Canonical full certificate bytes.
    pub certificate: Vec<u8>,
    /// Canonical redacted certificate bytes.
    pub redacted_certificate: Vec<u8>,
}

/// A realm and its certificate logs.
pub struct RealmEntry {
    /// The realm id.
    pub realm_id: RealmId,
    /// Creation instant (timestamp of the initial role certificate).
    pub created_on: Timestamp,
    /// Role log, oldest first; effective role = last entry per user.
    pub roles: Vec<RealmRoleEntry>,
    /// Key rotation log; `current_key_index == key_rotations.len()`.
    pub key_rotations: Vec<RealmKeyRotationEntry>,
    /// Rename log; current name = last entry.
    pub renames: Vec<RealmRenameEntry>,
    /// Checkpoint log: one entry per vlob create/update.
    pub vlob_updates: Vec<VlobUpdateEntry>,
    /// Most recent vlob timestamp in this realm.
    pub last_vlob_timestamp: Option<Timestamp>,
}

impl RealmEntry {
    /// New realm holding only its creation role entry.
    pub fn new(realm_id: RealmId, created_on: Timestamp, initial_role: RealmRoleEntry) -> Self {
        Self {
            realm_id,
            created_on,
            roles: vec![initial_role],
            key_rotations: Vec::new(),
            renames: Vec::new(),
            vlob_updates: Vec::new(),
            last_vlob_timestamp: None,
        }
    }

    /// Effective role of `user_id`: the most recent role entry.
    pub fn current_role_for(&self, user_id: &UserId) -> Option<RealmRole> {
        self.roles
            .iter()
            .rev()
            .find(|entry| entry.cooked.user_id == *user_id)
            .and_then(|entry| entry.cooked.role)
    }

    /// Key index data-plane writes must use right now.
    pub fn current_key_index(&self) -> u64 {
        self.key_rotations.len() as u64
    }

    /// Users with a current role, and that role.
    pub fn members(&self) -> HashMap<UserId, RealmRole> {
        let mut members = HashMap::new();
        for entry in &self.roles {
            match entry.cooked.role {
                Some(role) => {
                    members.insert(entry.cooked.user_id, role);
                }
                None => {
                    members.remove(&entry.cooked.user_id);
                }
            }
        }
        members
    }

    /// Next checkpoint index (dense, starting at 1).
    pub fn next_checkpoint(&self) -> u64 {
        self.vlob_updates.len() as u64 + 1
    }

    /// Record a vlob operation at `timestamp`.
    pub fn note_vlob_timestamp(&mut self, timestamp: Timestamp) {
        self.last_vlob_timestamp = Some(match self.last_vlob_timestamp {
            Some(previous) => previous.max(timestamp),
            None => timestamp,
        });
    }
}

/// One entry of a realm's role log.
pub struct RealmRoleEntry {
    /// Decoded certificate.
    pub cooked: RealmRoleCertificate,
    /// Canonical signed bytes.
    pub certificate: Vec<u8>,
}

/// One entry of a realm's key rotation log.
pub struct RealmKeyRotationEntry {
    /// Decoded certificate.
    pub cooked: RealmKeyRotationCertificate,
    /// Canonical signed bytes.
    pub certificate: Vec<u8>,
    /// The encrypted keys bundle for this index.
    pub keys_bundle: Vec<u8>,
    /// Bundle access material, encrypted per recipient.
    pub per_participant_keys_bundle_access: HashMap<UserId, Vec<u8>>,
}

/// One entry of a realm's rename log.
pub struct RealmRenameEntry {
    /// Decoded certificate.
    pub cooked: RealmNameCertificate,
    /// Canonical signed bytes.
    pub certificate: Vec<u8>,
}

/// One checkpoint: a vlob atom and its per-realm index.
pub struct VlobUpdateEntry {
    /// Strictly increasing, dense, per realm.
    pub index: u64,
    /// The atom written at this checkpoint.
    pub atom: Arc<VlobAtom>,
}

/// An immutable vlob version.
pub struct VlobAtom {
    /// Owning realm.
    pub realm_id: RealmId,
    /// The vlob.
    pub vlob_id: VlobId,
    /// Realm key index the blob is encrypted under.
    pub key_index: u64,
    /// Dense version, starting at 1.
    pub version: u64,
    /// Opaque encrypted payload.
    pub blob: Vec<u8>,
    /// Authoring device.
    pub author: DeviceId,
    /// Client-declared write instant.
    pub created_on: Timestamp,
    /// Per-service ciphertexts; `None` unless sequestered.
    pub sequestered_blobs: Option<HashMap<SequesterServiceId, Vec<u8>>>,
}

/// Block metadata; the payload lives in the blockstore.
pub struct BlockEntry {
    /// Owning realm.
    pub realm_id: RealmId,
    /// The block.
    pub block_id: BlockId,
    /// Realm key index the payload is encrypted under.
    pub key_index: u64,
    /// Authoring device.
    pub author: DeviceId,
    /// Payload size in bytes.
    pub size: u64,
    /// Write instant.
    pub created_on: Timestamp,
}

/// Why an invitation stopped being usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvitationDeletedReason {
    /// The greeting completed; the claimer is now enrolled.
    Finished,
    /// Cancelled by the greeter.
    Cancelled,
}

/// An invitation and its greeting sessions.
pub struct InvitationEntry {
    /// The credential.
    pub token: InvitationToken,
    /// User or device invitation.
    pub invitation_type: InvitationType,
    /// Greeter user.
    pub created_by_user_id: UserId,
    /// Greeter device.
    pub created_by_device_id: DeviceId,
    /// Set for new-user invitations only.
    pub claimer_email: Option<EmailAddress>,
    /// Creation instant.
    pub created_on: Timestamp,
    /// Deletion instant, if deleted.
    pub deleted_on: Option<Timestamp>,
    /// Why it was deleted.
    pub deleted_reason: Option<InvitationDeletedReason>,
    /// One greeting session per greeter user.
    pub greeting_sessions: HashMap<UserId, GreetingSession>,
}

impl InvitationEntry {
    /// Whether the invitation can still be used.
    pub fn is_deleted(&self) -> bool {
        self.deleted_on.is_some()
    }

    /// Whether it completed successfully.
    pub fn is_finished(&self) -> bool {
        self.deleted_reason == Some(InvitationDeletedReason::Finished)
    }
}

/// All greeting attempts between one greeter and the claimer.
#[derive(Default)]
pub struct GreetingSession {
    /// Attempt ids, oldest first; at most one active.
    pub attempts: Vec<GreetingAttemptId>,
}

/// Outcome of submitting a greeting step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GreetingStepOutcome {
    /// The peer's payload for this step.
    Done(Vec<u8>),
    /// Same step resubmitted with different bytes.
    Mismatch,
    /// The peer has not produced this step yet.
    NotReady,
    /// Submitted a step beyond the frontier.
    TooAdvanced,
}

/// One greeter/claimer exchange: symmetric indexed steps.
pub struct GreetingAttemptEntry {
    /// Attempt id.
    pub id: GreetingAttemptId,
    /// Owning invitation.
    pub token: InvitationToken,
    /// Greeter user.
    pub greeter_id: UserId,
    /// When the claimer joined, if it has.
    pub claimer_joined: Option<Timestamp>,
    /// When the greeter joined, if it has.
    pub greeter_joined: Option<Timestamp>,
    /// Cancellation, if any: who, when.
    pub cancelled: Option<(GreeterOrClaimer, Timestamp)>,
    /// Steps submitted by the greeter, in order.
    pub greeter_steps: Vec<Vec<u8>>,
    /// Steps submitted by the claimer, in order.
    pub claimer_steps: Vec<Vec<u8>>,
}

impl GreetingAttemptEntry {
    /// Fresh attempt for `token` and `greeter_id`.
    pub fn new(token: InvitationToken, greeter_id: UserId) -> Self {
        Self {
            id: GreetingAttemptId::new(),
            token,
            greeter_id,
            claimer_joined: None,
            greeter_joined: None,
            cancelled: None,
            greeter_steps: Vec::new(),
            claimer_steps: Vec::new(),
        }
    }

    /// Whether the attempt is still usable.
    pub fn is_active(&self) -> bool {
        self.cancelled.is_none()
    }

    /// Join as `side`; joining twice cancels the attempt.
    pub fn join_or_cancel(&mut self, side: GreeterOrClaimer, now: Timestamp) {
        let joined = match side {
            GreeterOrClaimer::Greeter => &mut self.greeter_joined,
            GreeterOrClaimer::Claimer => &mut self.claimer_joined,
        };
        if joined.is_none() {
            *joined = Some(now);
        } else {
            self.cancelled = Some((side, now));
        }
    }

    /// Submit step `index` as `side`; idempotent on identical bytes.
    pub fn step(
        &mut self,
        side: GreeterOrClaimer,
        index: usize,
        payload: Vec<u8>,
    ) -> GreetingStepOutcome {
        let (mine, theirs) = match side {
            GreeterOrClaimer::Greeter => (&mut self.greeter_steps, &self.claimer_steps),
            GreeterOrClaimer::Claimer => (&mut self.claimer_steps, &self.greeter_steps),
        };
        if index < mine.len() && mine[index] != payload {
            return GreetingStepOutcome::Mismatch;
        }
        if index > mine.len() || index > theirs.len() {
            return GreetingStepOutcome::TooAdvanced;
        }
        if index == mine.len() {
            mine.push(payload);
        }
        if index >= theirs.len() {
            return GreetingStepOutcome::NotReady;
        }
        GreetingStepOutcome::Done(theirs[index].clone())
    }
}

/// Terminal/submitted state of an async enrollment.
pub enum EnrollmentInfo {
    /// Awaiting an ADMIN's decision.
    Submitted,
    /// Accepted: the user and device certificates were issued.
    Accepted {
        /// When it was accepted.
        accepted_on: Timestamp,
        /// Accepting device.
        accepter: DeviceId,
        /// ADMIN-signed acceptance payload.
        accept_payload: Vec<u8>,
    },
    /// Rejected by an ADMIN.
    Rejected {
        /// When it was rejected.
        rejected_on: Timestamp,
    },
    /// Superseded by a forced re-submission.
    Cancelled {
        /// When it was cancelled.
        cancelled_on: Timestamp,
    },
}

/// An out-of-band enrollment submission.
pub struct EnrollmentEntry {
    /// Submission id, chosen by the submitter.
    pub enrollment_id: EnrollmentId,
    /// Claimed email, unique among SUBMITTED enrollments.
    pub email: EmailAddress,
    /// Submitter's X.509 certificate (opaque DER).
    pub submitter_x509_certificate: Vec<u8>,
    /// Signature over the payload by the X.509 key.
    pub submit_payload_signature: Vec<u8>,
    /// The opaque submission payload.
    pub submit_payload: Vec<u8>,
    /// Submission instant.
    pub submitted_on: Timestamp,
    /// Current state.
    pub info: EnrollmentInfo,
}

impl EnrollmentEntry {
    /// Whether the enrollment is still awaiting a decision.
    pub fn is_submitted(&self) -> bool {
        matches!(self.info, EnrollmentInfo::Submitted)
    }
}

/// A shamir recovery setup.
pub struct ShamirSetupEntry {
    /// Recovery data, encrypted with the split key.
    pub ciphered_data: Vec<u8>,
    /// Proof-of-quorum token handed to the claimer.
    pub reveal_token: InvitationToken,
    /// Decoded brief certificate.
    pub brief: ShamirRecoveryBriefCertificate,
    /// Canonical brief certificate bytes.
    pub brief_certificate: Vec<u8>,
    /// Per-recipient share certificates (opaque).
    pub shares: HashMap<UserId, Vec<u8>>,
    /// Deletion, if the setup was retired.
    pub deletion: Option<ShamirDeletionEntry>,
}

impl ShamirSetupEntry {
    /// Whether the setup is still in force.
    pub fn is_deleted(&self) -> bool {
        self.deletion.is_some()
    }
}

/// The deletion certificate retiring a shamir setup.
pub struct ShamirDeletionEntry {
    /// Decoded certificate.
    pub cooked: ShamirRecoveryDeletionCertificate,
    /// Canonical signed bytes.
    pub certificate: Vec<u8>,
}

/// A TOTP-protected opaque key.
pub struct TotpKeyEntry {
    /// The protected key material.
    pub opaque_key: Vec<u8>,
    /// Shared TOTP secret (opaque to the store).
    pub totp_secret: Vec<u8>,
    /// Whether setup was confirmed with a valid one-time password.
    pub confirmed: bool,
    /// Consecutive failures since the last success.
    pub failures: u32,
    /// Fetches refused until this instant, if throttled.
    pub throttle_until: Option<Timestamp>,
}

/// A recovery account.
pub struct AccountEntry {
    /// Vaults, oldest first; the last one is current.
    pub vaults: Vec<VaultEntry>,
}

impl AccountEntry {
    /// The current vault.
    pub fn current_vault(&self) -> Option<&VaultEntry> {
        self.vaults.last()
    }

    /// The current vault, mutable.
    pub fn current_vault_mut(&mut self) -> Option<&mut VaultEntry> {
        self.vaults.last_mut()
    }
}

/// One vault: authentication methods plus opaque items.
pub struct VaultEntry {
    /// Vault id.
    pub id: AccountVaultId,
    /// Creation instant.
    pub created_on: Timestamp,
    /// Authentication methods keyed by their identity digest.
    pub auth_methods: HashMap<HashDigest, AuthMethodEntry>,
    /// Items addressed by content hash, in insertion order.
    pub items: BTreeMap<HashDigest, VaultItem>,
}

/// One way to open a vault.
pub struct AuthMethodEntry {
    /// Creation instant.
    pub created_on: Timestamp,
    /// Opaque, possibly password-derived, key material.
    pub vault_key_access: Vec<u8>,
    /// Disabled methods stay for audit but cannot authenticate.
    pub disabled_on: Option<Timestamp>,
}

/// One opaque encrypted item of a vault.
pub struct VaultItem {
    /// Encrypted payload.
    pub data: Vec<u8>,
    /// Upload instant.
    pub created_on: Timestamp,
}

#[cfg(test)]
mod tests {
    use velum_certif::envelope::CertificateAuthor;
    use velum_core::types::GreeterOrClaimer;

    use super::*;

    fn role_entry(user_id: UserId, role: Option<RealmRole>, at: &str) -> RealmRoleEntry {
        RealmRoleEntry {
            cooked: RealmRoleCertificate {
                author: CertificateAuthor::Root,
                timestamp: Timestamp::from_rfc3339(at).unwrap(),
                realm_id: RealmId::new(),
                user_id,
                role,
            },
            certificate: Vec::new(),
        }
    }

    #[test]
    fn effective_role_is_most_recent_entry() {
        let alice = UserId::new();
        let realm_id = RealmId::new();
        let mut realm = RealmEntry::new(
            realm_id,
            Timestamp::EPOCH,
            role_entry(alice, Some(RealmRole::Owner), "2024-01-01T00:00:00Z"),
        );
        assert_eq!(realm.current_role_for(&alice), Some(RealmRole::Owner));

        let bob = UserId::new();
        assert_eq!(realm.current_role_for(&bob), None);

        realm
            .roles
            .push(role_entry(bob, Some(RealmRole::Reader), "2024-01-02T00:00:00Z"));
        realm
            .roles
            .push(role_entry(bob, None, "2024-01-03T00:00:00Z"));
        assert_eq!(realm.current_role_for(&bob), None);
        assert!(!realm.members().contains_key(&bob));
        assert!(realm.members().contains_key(&alice));
    }

    #[test]
    fn greeting_steps_are_idempotent_and_ordered() {
        let mut attempt = GreetingAttemptEntry::new(InvitationToken::new(), UserId::new());

        // Greeter submits step 0 before the claimer: not ready
        assert_eq!(
            attempt.step(GreeterOrClaimer::Greeter, 0, b"g0".to_vec()),
            GreetingStepOutcome::NotReady
        );
        // Claimer submits step 0 and receives the greeter's payload
        assert_eq!(
            attempt.step(GreeterOrClaimer::Claimer, 0, b"c0".to_vec()),
            GreetingStepOutcome::Done(b"g0".to_vec())
        );
        // Resubmitting the same step with the same bytes replays the answer
        assert_eq!(
            attempt.step(GreeterOrClaimer::Claimer, 0, b"c0".to_vec()),
            GreetingStepOutcome::Done(b"g0".to_vec())
        );
        // ... but different bytes are a mismatch
        assert_eq!(
            attempt.step(GreeterOrClaimer::Claimer, 0, b"evil".to_vec()),
            GreetingStepOutcome::Mismatch
        );
        // Jumping ahead is refused
        assert_eq!(
            attempt.step(GreeterOrClaimer::Greeter, 2, b"g2".to_vec()),
            GreetingStepOutcome::TooAdvanced
        );
    }

    #[test]
    fn joining_twice_cancels_the_attempt() {
        let mut attempt = GreetingAttemptEntry::new(InvitationToken::new(), UserId::new());
        let now = Timestamp::now();
        attempt.join_or_cancel(GreeterOrClaimer::Greeter, now);
        assert!(attempt.is_active());
        attempt.join_or_cancel(GreeterOrClaimer::Greeter, now);
        assert!(!attempt.is_active());
    }

    #[test]
    fn store_create_and_erase() {
        let store = Store::new();
        let org_id: OrganizationId = "Org1".parse().unwrap();
        let state = OrgState::new(
            Timestamp::now(),
            Some(BootstrapToken::new()),
            ActiveUsersLimit::NoLimit,
            true,
            Duration::from_secs(0),
        );
        store.create_organization(org_id.clone(), state).unwrap();
        assert!(store.organization(&org_id).is_some());
        assert!(store
            .create_organization(
                org_id.clone(),
                OrgState::new(
                    Timestamp::now(),
                    None,
                    ActiveUsersLimit::NoLimit,
                    true,
                    Duration::from_secs(0),
                ),
            )
            .is_err());
        assert!(store.erase_organization(&org_id));
        assert!(store.organization(&org_id).is_none());
    }

    #[test]
    fn topic_watermark_defaults_to_epoch() {
        let state = OrgState::new(
            Timestamp::now(),
            None,
            ActiveUsersLimit::NoLimit,
            true,
            Duration::from_secs(0),
        );
        assert_eq!(state.topic_last_timestamp(&Topic::Common), Timestamp::EPOCH);
    }
}
