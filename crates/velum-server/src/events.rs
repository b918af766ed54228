//! Server-side events.
//!
//! Every certificate write and every vlob write publishes exactly one
//! event after its critical section commits. Connected clients (and
//! tests) observe them through the bus waiters; nothing in the server
//! ever blocks on an event being consumed.

use velum_core::id::{DeviceId, EnrollmentId, GreetingAttemptId, OrganizationId, RealmId, UserId, VlobId};
use velum_core::time::Timestamp;
use velum_core::token::InvitationToken;
use velum_core::types::GreeterOrClaimer;

/// Blob payloads above this size are stripped from [`Event::Vlob`];
/// clients fall back to an explicit read.
pub const EVENT_VLOB_MAX_BLOB_SIZE: usize = 8 * 1024;

/// Status carried by invitation events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvitationStatus {
    /// Usable, nobody greeted yet or greeting in progress.
    Idle,
    /// Cancelled by the greeter.
    Cancelled,
    /// Completed; the claimer is enrolled.
    Finished,
}

/// Everything the server publishes on its bus.
#[derive(Debug, Clone)]
pub enum Event {
    /// A certificate was appended under the `common` topic.
    CommonCertificate {
        organization_id: OrganizationId,
        timestamp: Timestamp,
    },
    /// A certificate was appended under the `sequester` topic.
    SequesterCertificate {
        organization_id: OrganizationId,
        timestamp: Timestamp,
    },
    /// A shamir recovery setup or deletion was appended.
    ShamirRecoveryCertificate {
        organization_id: OrganizationId,
        timestamp: Timestamp,
        /// The protected user plus every share recipient.
        participants: Vec<UserId>,
    },
    /// A certificate was appended under a `realm(R)` topic.
    RealmCertificate {
        organization_id: OrganizationId,
        realm_id: RealmId,
        timestamp: Timestamp,
        /// Affected user for role certificates.
        user_id: Option<UserId>,
        /// Whether the certificate removed that user's access.
        role_removed: bool,
    },
    /// A vlob was created or updated.
    Vlob {
        organization_id: OrganizationId,
        author: DeviceId,
        realm_id: RealmId,
        timestamp: Timestamp,
        vlob_id: VlobId,
        version: u64,
        /// Inline payload; `None` above [`EVENT_VLOB_MAX_BLOB_SIZE`].
        blob: Option<Vec<u8>>,
        last_common_certificate_timestamp: Timestamp,
        last_realm_certificate_timestamp: Timestamp,
    },
    /// An invitation changed status.
    Invitation {
        organization_id: OrganizationId,
        token: InvitationToken,
        /// Greeter whose session the change belongs to.
        possible_greeter: Option<UserId>,
        status: InvitationStatus,
    },
    /// A greeting attempt progressed (join, step, cancel).
    GreetingAttempt {
        organization_id: OrganizationId,
        token: InvitationToken,
        greeting_attempt: GreetingAttemptId,
        /// Side that acted.
        actor: GreeterOrClaimer,
    },
    /// An async enrollment was submitted or decided.
    PkiEnrollment {
        organization_id: OrganizationId,
        enrollment_id: EnrollmentId,
    },
    /// The organization was switched to or from expired.
    OrganizationExpired {
        organization_id: OrganizationId,
        is_expired: bool,
    },
    /// A user was revoked or frozen; its sessions must drop.
    UserRevokedOrFrozen {
        organization_id: OrganizationId,
        user_id: UserId,
    },
}

impl Event {
    /// The organization the event belongs to.
    pub fn organization_id(&self) -> &OrganizationId {
        match self {
            Event::CommonCertificate {
                organization_id, ..
            }
            | Event::SequesterCertificate {
                organization_id, ..
            }
            | Event::ShamirRecoveryCertificate {
                organization_id, ..
            }
            | Event::RealmCertificate {
                organization_id, ..
            }
            | Event::Vlob {
                organization_id, ..
            }
            | Event::Invitation {
                organization_id, ..
            }
            | Event::GreetingAttempt {
                organization_id, ..
            }
            | Event::PkiEnrollment {
                organization_id, ..
            }
            | Event::OrganizationExpired {
                organization_id, ..
            }
            | Event::UserRevokedOrFrozen {
                organization_id, ..
            } => organization_id,
        }
    }
}

/// The bus instantiated over [`Event`].
pub type EventBus = velum_events::EventBus<Event>;
