//! Core types shared by every Velum crate.
//!
//! This crate holds the vocabulary of the system and nothing else:
//! opaque 128-bit identifiers, the microsecond-resolution [`Timestamp`]
//! with its ballpark drift check, thin wrappers around the
//! cryptographic primitives, one-shot tokens, and the server
//! configuration. No I/O, no storage, no protocol.

#![forbid(unsafe_code)]

pub mod ballpark;
pub mod config;
pub mod crypto;
pub mod id;
pub mod time;
pub mod token;
pub mod types;

pub use ballpark::{
    timestamps_in_the_ballpark, RequireGreaterTimestamp, TimestampOutOfBallpark,
    BALLPARK_CLIENT_EARLY_OFFSET, BALLPARK_CLIENT_LATE_OFFSET,
};
pub use config::ServerConfig;
pub use crypto::{HashDigest, KeyDerivation, SecretKey, SigningKey, VerifyKey};
pub use id::{
    AccountVaultId, BlockId, DeviceId, DeviceLabel, DeviceName, EmailAddress, EnrollmentId,
    GreetingAttemptId, HumanHandle, OrganizationId, RealmId, SequesterServiceId, UserId, VlobId,
};
pub use time::Timestamp;
pub use token::{BootstrapToken, InvitationToken};
pub use types::{ActiveUsersLimit, GreeterOrClaimer, InvitationType, RealmRole, UserProfile};
