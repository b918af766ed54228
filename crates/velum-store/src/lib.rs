//! Transactional in-memory store.
//!
//! The store is the shared authority of a single-server deployment:
//! one [`datamodel::Store`] holds every organization, each organization
//! couples a plain-data state (mutated only inside short synchronous
//! critical sections) with the topic lock table that orders
//! certificate-producing operations. The blockstore is a separate,
//! content-addressed world reached through the [`blockstore::Blockstore`]
//! trait so handlers never hold topic locks across that external I/O.

#![forbid(unsafe_code)]

pub mod blockstore;
pub mod datamodel;
pub mod locks;

pub use blockstore::{Blockstore, BlockstoreError, MemoryBlockstore};
pub use datamodel::{
    AccountEntry, AuthMethodEntry, BlockEntry, DeviceEntry, EnrollmentEntry, EnrollmentInfo,
    GreetingAttemptEntry, GreetingSession, GreetingStepOutcome, InvitationDeletedReason,
    InvitationEntry, OrgState, OrganizationAlreadyExists, OrganizationStore, ProfileUpdateEntry,
    RealmEntry, RealmKeyRotationEntry, RealmRenameEntry, RealmRoleEntry, RevokedEntry,
    SequesterAuthority, SequesterServiceEntry, ShamirDeletionEntry, ShamirSetupEntry, Store,
    TotpKeyEntry, UserEntry,
    VaultEntry, VaultItem, VlobAtom, VlobUpdateEntry,
};
pub use locks::{AdvisoryLock, LockHold, Topic, TopicLockTable};
