//! Authenticated-family commands.
//!
//! One request enum for the whole family, one reply enum per command.
//! Component errors convert into reply variants through `From` so the
//! route handlers stay a straight dispatch table.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use velum_core::ballpark::{RequireGreaterTimestamp, TimestampOutOfBallpark};
use velum_core::id::{
    DeviceId, EmailAddress, EnrollmentId, GreetingAttemptId, RealmId, UserId, VlobId,
};
use velum_core::id::BlockId;
use velum_core::time::Timestamp;
use velum_core::token::InvitationToken;
use velum_core::types::InvitationType;
use velum_core::id::SequesterServiceId;

use crate::components::block::{CreateBlockError, ReadBlockError};
use crate::components::enrollment::DecideEnrollmentError;
use crate::components::invite::{
    CancelInvitationError, CompleteInvitationError, GreetingAttemptError, NewInvitationError,
};
use crate::components::TimestampError;
use crate::components::realm::{
    CreateRealmError, GetKeysBundleError, RenameRealmError, RotateKeyError, ShareRealmError,
};
use crate::components::shamir::{DeleteShamirError, SetupShamirError};
use crate::components::totp::TotpError;
use crate::components::user::{
    CreateDeviceError, CreateUserError, RevokeUserError, UpdateUserError,
};
use crate::components::vlob::{CreateVlobError, ReadVlobError, UpdateVlobError};
use crate::events::InvitationStatus;

#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum AuthenticatedReq {
    CertificateGet {
        common_after: Option<Timestamp>,
        sequester_after: Option<Timestamp>,
        shamir_recovery_after: Option<Timestamp>,
        realm_after: HashMap<RealmId, Timestamp>,
    },
    UserCreate {
        user_certificate: ByteBuf,
        redacted_user_certificate: ByteBuf,
        device_certificate: ByteBuf,
        redacted_device_certificate: ByteBuf,
    },
    DeviceCreate {
        device_certificate: ByteBuf,
        redacted_device_certificate: ByteBuf,
    },
    UserRevoke {
        revoked_user_certificate: ByteBuf,
    },
    UserUpdate {
        user_update_certificate: ByteBuf,
    },
    RealmCreate {
        realm_role_certificate: ByteBuf,
    },
    RealmShare {
        realm_role_certificate: ByteBuf,
        key_index: u64,
        recipient_keys_bundle_access: ByteBuf,
    },
    RealmUnshare {
        realm_role_certificate: ByteBuf,
    },
    RealmRename {
        realm_name_certificate: ByteBuf,
        initial_name_or_fail: bool,
    },
    RealmRotateKey {
        realm_key_rotation_certificate: ByteBuf,
        keys_bundle: ByteBuf,
        per_participant_keys_bundle_access: HashMap<UserId, ByteBuf>,
    },
    RealmGetKeysBundle {
        realm_id: RealmId,
        key_index: u64,
    },
    VlobCreate {
        realm_id: RealmId,
        vlob_id: VlobId,
        key_index: u64,
        timestamp: Timestamp,
        blob: ByteBuf,
        sequester_blob: Option<HashMap<SequesterServiceId, ByteBuf>>,
    },
    VlobUpdate {
        realm_id: RealmId,
        vlob_id: VlobId,
        version: u64,
        key_index: u64,
        timestamp: Timestamp,
        blob: ByteBuf,
        sequester_blob: Option<HashMap<SequesterServiceId, ByteBuf>>,
    },
    VlobReadBatch {
        realm_id: RealmId,
        vlobs: Vec<VlobId>,
        at: Option<Timestamp>,
    },
    VlobPollChanges {
        realm_id: RealmId,
        last_checkpoint: u64,
    },
    BlockCreate {
        realm_id: RealmId,
        block_id: BlockId,
        key_index: u64,
        block: ByteBuf,
    },
    BlockRead {
        block_id: BlockId,
    },
    InviteNewUser {
        claimer_email: EmailAddress,
        send_email: bool,
    },
    InviteNewDevice {
        send_email: bool,
    },
    InviteList,
    InviteCancel {
        token: InvitationToken,
    },
    InviteComplete {
        token: InvitationToken,
    },
    InviteGreeterStartGreetingAttempt {
        token: InvitationToken,
    },
    InviteGreeterStep {
        greeting_attempt: GreetingAttemptId,
        step_index: u64,
        greeter_step: ByteBuf,
    },
    PkiEnrollmentList,
    PkiEnrollmentAccept {
        enrollment_id: EnrollmentId,
        accept_payload: ByteBuf,
        user_certificate: ByteBuf,
        redacted_user_certificate: ByteBuf,
        device_certificate: ByteBuf,
        redacted_device_certificate: ByteBuf,
    },
    PkiEnrollmentReject {
        enrollment_id: EnrollmentId,
    },
    ShamirRecoverySetup {
        ciphered_data: ByteBuf,
        reveal_token: InvitationToken,
        shamir_recovery_brief_certificate: ByteBuf,
        shamir_recovery_share_certificates: HashMap<UserId, ByteBuf>,
    },
    ShamirRecoveryDelete {
        shamir_recovery_deletion_certificate: ByteBuf,
    },
    TotpSetupGetSecret,
    TotpSetupConfirm {
        one_time_password: String,
    },
    TotpCreateOpaqueKey {
        opaque_key: ByteBuf,
    },
    TotpFetchOpaqueKey {
        one_time_password: String,
    },
    TotpReset,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CertificateGetRep {
    Ok {
        common_certificates: Vec<ByteBuf>,
        sequester_certificates: Vec<ByteBuf>,
        shamir_recovery_certificates: Vec<ByteBuf>,
        realm_certificates: HashMap<RealmId, Vec<ByteBuf>>,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UserCreateRep {
    Ok,
    AuthorNotAllowed,
    InvalidCertificate,
    UserAlreadyExists,
    HumanHandleAlreadyTaken,
    ActiveUsersLimitReached,
    TimestampOutOfBallpark(TimestampOutOfBallpark),
    RequireGreaterTimestamp(RequireGreaterTimestamp),
}

impl From<CreateUserError> for UserCreateRep {
    fn from(err: CreateUserError) -> Self {
        match err {
            CreateUserError::AuthorNotAllowed => Self::AuthorNotAllowed,
            CreateUserError::InvalidCertificate => Self::InvalidCertificate,
            CreateUserError::UserAlreadyExists => Self::UserAlreadyExists,
            CreateUserError::HumanHandleAlreadyTaken => Self::HumanHandleAlreadyTaken,
            CreateUserError::ActiveUsersLimitReached => Self::ActiveUsersLimitReached,
            CreateUserError::Timestamp(TimestampError::OutOfBallpark(inner)) => {
                Self::TimestampOutOfBallpark(inner)
            }
            CreateUserError::Timestamp(TimestampError::RequireGreater(inner)) => {
                Self::RequireGreaterTimestamp(inner)
            }
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeviceCreateRep {
    Ok,
    InvalidCertificate,
    DeviceAlreadyExists,
    TimestampOutOfBallpark(TimestampOutOfBallpark),
    RequireGreaterTimestamp(RequireGreaterTimestamp),
}

impl From<CreateDeviceError> for DeviceCreateRep {
    fn from(err: CreateDeviceError) -> Self {
        match err {
            CreateDeviceError::InvalidCertificate => Self::InvalidCertificate,
            CreateDeviceError::DeviceAlreadyExists => Self::DeviceAlreadyExists,
            CreateDeviceError::Timestamp(TimestampError::OutOfBallpark(inner)) => {
                Self::TimestampOutOfBallpark(inner)
            }
            CreateDeviceError::Timestamp(TimestampError::RequireGreater(inner)) => {
                Self::RequireGreaterTimestamp(inner)
            }
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UserRevokeRep {
    Ok,
    AuthorNotAllowed,
    InvalidCertificate,
    UserNotFound,
    UserAlreadyRevoked(RequireGreaterTimestamp),
    TimestampOutOfBallpark(TimestampOutOfBallpark),
    RequireGreaterTimestamp(RequireGreaterTimestamp),
}

impl From<RevokeUserError> for UserRevokeRep {
    fn from(err: RevokeUserError) -> Self {
        match err {
            RevokeUserError::AuthorNotAllowed => Self::AuthorNotAllowed,
            RevokeUserError::InvalidCertificate => Self::InvalidCertificate,
            RevokeUserError::UserNotFound => Self::UserNotFound,
            RevokeUserError::AlreadyRevoked(inner) => Self::UserAlreadyRevoked(inner),
            RevokeUserError::Timestamp(TimestampError::OutOfBallpark(inner)) => {
                Self::TimestampOutOfBallpark(inner)
            }
            RevokeUserError::Timestamp(TimestampError::RequireGreater(inner)) => {
                Self::RequireGreaterTimestamp(inner)
            }
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UserUpdateRep {
    Ok,
    AuthorNotAllowed,
    InvalidCertificate,
    UserNotFound,
    UserRevoked,
    NoChange,
    UserOwnsRealms,
    TimestampOutOfBallpark(TimestampOutOfBallpark),
    RequireGreaterTimestamp(RequireGreaterTimestamp),
}

impl From<UpdateUserError> for UserUpdateRep {
    fn from(err: UpdateUserError) -> Self {
        match err {
            UpdateUserError::AuthorNotAllowed => Self::AuthorNotAllowed,
            UpdateUserError::InvalidCertificate => Self::InvalidCertificate,
            UpdateUserError::UserNotFound => Self::UserNotFound,
            UpdateUserError::UserRevoked => Self::UserRevoked,
            UpdateUserError::NoChange => Self::NoChange,
            UpdateUserError::UserOwnsRealms => Self::UserOwnsRealms,
            UpdateUserError::Timestamp(TimestampError::OutOfBallpark(inner)) => {
                Self::TimestampOutOfBallpark(inner)
            }
            UpdateUserError::Timestamp(TimestampError::RequireGreater(inner)) => {
                Self::RequireGreaterTimestamp(inner)
            }
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RealmCreateRep {
    Ok,
    InvalidCertificate,
    RealmAlreadyExists(RequireGreaterTimestamp),
    AuthorNotAllowed,
    TimestampOutOfBallpark(TimestampOutOfBallpark),
    RequireGreaterTimestamp(RequireGreaterTimestamp),
}

impl From<CreateRealmError> for RealmCreateRep {
    fn from(err: CreateRealmError) -> Self {
        match err {
            CreateRealmError::InvalidCertificate => Self::InvalidCertificate,
            CreateRealmError::AlreadyExists(inner) => Self::RealmAlreadyExists(inner),
            CreateRealmError::AuthorNotAllowed => Self::AuthorNotAllowed,
            CreateRealmError::Timestamp(TimestampError::OutOfBallpark(inner)) => {
                Self::TimestampOutOfBallpark(inner)
            }
            CreateRealmError::Timestamp(TimestampError::RequireGreater(inner)) => {
                Self::RequireGreaterTimestamp(inner)
            }
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RealmShareRep {
    Ok,
    InvalidCertificate,
    RealmNotFound,
    AuthorNotAllowed,
    RecipientNotFound,
    RecipientRevoked,
    RecipientFrozen,
    RoleIncompatibleWithOutsider,
    BadKeyIndex(RequireGreaterTimestamp),
    RoleAlreadyGranted(RequireGreaterTimestamp),
    TimestampOutOfBallpark(TimestampOutOfBallpark),
    RequireGreaterTimestamp(RequireGreaterTimestamp),
}

impl From<ShareRealmError> for RealmShareRep {
    fn from(err: ShareRealmError) -> Self {
        match err {
            ShareRealmError::InvalidCertificate => Self::InvalidCertificate,
            ShareRealmError::RealmNotFound => Self::RealmNotFound,
            ShareRealmError::AuthorNotAllowed => Self::AuthorNotAllowed,
            ShareRealmError::RecipientNotFound => Self::RecipientNotFound,
            ShareRealmError::RecipientRevoked => Self::RecipientRevoked,
            ShareRealmError::RecipientFrozen => Self::RecipientFrozen,
            ShareRealmError::RoleIncompatibleWithOutsider => Self::RoleIncompatibleWithOutsider,
            ShareRealmError::BadKeyIndex(inner) => Self::BadKeyIndex(inner),
            ShareRealmError::AlreadyGranted(inner) => Self::RoleAlreadyGranted(inner),
            ShareRealmError::Timestamp(TimestampError::OutOfBallpark(inner)) => {
                Self::TimestampOutOfBallpark(inner)
            }
            ShareRealmError::Timestamp(TimestampError::RequireGreater(inner)) => {
                Self::RequireGreaterTimestamp(inner)
            }
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RealmRenameRep {
    Ok,
    InvalidCertificate,
    RealmNotFound,
    AuthorNotAllowed,
    BadKeyIndex(RequireGreaterTimestamp),
    InitialNameAlreadySet,
    TimestampOutOfBallpark(TimestampOutOfBallpark),
    RequireGreaterTimestamp(RequireGreaterTimestamp),
}

impl From<RenameRealmError> for RealmRenameRep {
    fn from(err: RenameRealmError) -> Self {
        match err {
            RenameRealmError::InvalidCertificate => Self::InvalidCertificate,
            RenameRealmError::RealmNotFound => Self::RealmNotFound,
            RenameRealmError::AuthorNotAllowed => Self::AuthorNotAllowed,
            RenameRealmError::BadKeyIndex(inner) => Self::BadKeyIndex(inner),
            RenameRealmError::InitialNameAlreadySet => Self::InitialNameAlreadySet,
            RenameRealmError::Timestamp(TimestampError::OutOfBallpark(inner)) => {
                Self::TimestampOutOfBallpark(inner)
            }
            RenameRealmError::Timestamp(TimestampError::RequireGreater(inner)) => {
                Self::RequireGreaterTimestamp(inner)
            }
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RealmRotateKeyRep {
    Ok,
    InvalidCertificate,
    RealmNotFound,
    AuthorNotAllowed,
    BadKeyIndex(RequireGreaterTimestamp),
    ParticipantMismatch,
    TimestampOutOfBallpark(TimestampOutOfBallpark),
    RequireGreaterTimestamp(RequireGreaterTimestamp),
}

impl From<RotateKeyError> for RealmRotateKeyRep {
    fn from(err: RotateKeyError) -> Self {
        match err {
            RotateKeyError::InvalidCertificate => Self::InvalidCertificate,
            RotateKeyError::RealmNotFound => Self::RealmNotFound,
            RotateKeyError::AuthorNotAllowed => Self::AuthorNotAllowed,
            RotateKeyError::BadKeyIndex(inner) => Self::BadKeyIndex(inner),
            RotateKeyError::ParticipantMismatch => Self::ParticipantMismatch,
            RotateKeyError::Timestamp(TimestampError::OutOfBallpark(inner)) => {
                Self::TimestampOutOfBallpark(inner)
            }
            RotateKeyError::Timestamp(TimestampError::RequireGreater(inner)) => {
                Self::RequireGreaterTimestamp(inner)
            }
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RealmGetKeysBundleRep {
    Ok {
        keys_bundle: ByteBuf,
        keys_bundle_access: ByteBuf,
    },
    RealmNotFound,
    AuthorNotAllowed,
    BadKeyIndex,
    AccessNotAvailable,
}

impl From<GetKeysBundleError> for RealmGetKeysBundleRep {
    fn from(err: GetKeysBundleError) -> Self {
        match err {
            GetKeysBundleError::RealmNotFound => Self::RealmNotFound,
            GetKeysBundleError::AuthorNotAllowed => Self::AuthorNotAllowed,
            GetKeysBundleError::BadKeyIndex => Self::BadKeyIndex,
            GetKeysBundleError::AccessNotAvailable => Self::AccessNotAvailable,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VlobCreateRep {
    Ok,
    RealmNotFound,
    AuthorNotAllowed,
    BadKeyIndex(RequireGreaterTimestamp),
    VlobAlreadyExists,
    BlobTooLarge,
    SequesterServiceMismatch,
    TimestampOutOfBallpark(TimestampOutOfBallpark),
    RequireGreaterTimestamp(RequireGreaterTimestamp),
}

impl From<CreateVlobError> for VlobCreateRep {
    fn from(err: CreateVlobError) -> Self {
        match err {
            CreateVlobError::RealmNotFound => Self::RealmNotFound,
            CreateVlobError::AuthorNotAllowed => Self::AuthorNotAllowed,
            CreateVlobError::BadKeyIndex(inner) => Self::BadKeyIndex(inner),
            CreateVlobError::VlobAlreadyExists => Self::VlobAlreadyExists,
            CreateVlobError::BlobTooLarge => Self::BlobTooLarge,
            CreateVlobError::SequesterServiceMismatch => Self::SequesterServiceMismatch,
            CreateVlobError::Timestamp(TimestampError::OutOfBallpark(inner)) => {
                Self::TimestampOutOfBallpark(inner)
            }
            CreateVlobError::Timestamp(TimestampError::RequireGreater(inner)) => {
                Self::RequireGreaterTimestamp(inner)
            }
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VlobUpdateRep {
    Ok,
    RealmNotFound,
    AuthorNotAllowed,
    VlobNotFound,
    BadKeyIndex(RequireGreaterTimestamp),
    BadVlobVersion,
    BlobTooLarge,
    SequesterServiceMismatch,
    TimestampOutOfBallpark(TimestampOutOfBallpark),
    RequireGreaterTimestamp(RequireGreaterTimestamp),
}

impl From<UpdateVlobError> for VlobUpdateRep {
    fn from(err: UpdateVlobError) -> Self {
        match err {
            UpdateVlobError::RealmNotFound => Self::RealmNotFound,
            UpdateVlobError::AuthorNotAllowed => Self::AuthorNotAllowed,
            UpdateVlobError::VlobNotFound => Self::VlobNotFound,
            UpdateVlobError::BadKeyIndex(inner) => Self::BadKeyIndex(inner),
            UpdateVlobError::BadVlobVersion => Self::BadVlobVersion,
            UpdateVlobError::BlobTooLarge => Self::BlobTooLarge,
            UpdateVlobError::SequesterServiceMismatch => Self::SequesterServiceMismatch,
            UpdateVlobError::Timestamp(TimestampError::OutOfBallpark(inner)) => {
                Self::TimestampOutOfBallpark(inner)
            }
            UpdateVlobError::Timestamp(TimestampError::RequireGreater(inner)) => {
                Self::RequireGreaterTimestamp(inner)
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VlobReadBatchItem {
    pub vlob_id: VlobId,
    pub key_index: u64,
    pub version: u64,
    pub author: DeviceId,
    pub created_on: Timestamp,
    pub blob: ByteBuf,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VlobReadBatchRep {
    Ok {
        items: Vec<Option<VlobReadBatchItem>>,
        needed_common_certificate_timestamp: Timestamp,
        needed_realm_certificate_timestamp: Timestamp,
    },
    RealmNotFound,
    AuthorNotAllowed,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VlobPollChangesRep {
    Ok {
        current_checkpoint: u64,
        changes: Vec<(VlobId, u64)>,
    },
    RealmNotFound,
    AuthorNotAllowed,
}

impl VlobPollChangesRep {
    pub fn from_error(err: ReadVlobError) -> Self {
        match err {
            ReadVlobError::RealmNotFound => Self::RealmNotFound,
            ReadVlobError::AuthorNotAllowed => Self::AuthorNotAllowed,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BlockCreateRep {
    Ok,
    RealmNotFound,
    AuthorNotAllowed,
    BadKeyIndex,
    BlockAlreadyExists,
    BlockTooLarge,
    StoreUnavailable,
}

impl From<CreateBlockError> for BlockCreateRep {
    fn from(err: CreateBlockError) -> Self {
        match err {
            CreateBlockError::RealmNotFound => Self::RealmNotFound,
            CreateBlockError::AuthorNotAllowed => Self::AuthorNotAllowed,
            CreateBlockError::BadKeyIndex => Self::BadKeyIndex,
            CreateBlockError::BlockAlreadyExists => Self::BlockAlreadyExists,
            CreateBlockError::BlockTooLarge => Self::BlockTooLarge,
            CreateBlockError::StoreUnavailable => Self::StoreUnavailable,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BlockReadRep {
    Ok {
        realm_id: RealmId,
        key_index: u64,
        block: ByteBuf,
        needed_realm_certificate_timestamp: Timestamp,
    },
    BlockNotFound,
    AuthorNotAllowed,
    StoreUnavailable,
}

impl From<ReadBlockError> for BlockReadRep {
    fn from(err: ReadBlockError) -> Self {
        match err {
            ReadBlockError::BlockNotFound => Self::BlockNotFound,
            ReadBlockError::AuthorNotAllowed => Self::AuthorNotAllowed,
            ReadBlockError::StoreUnavailable => Self::StoreUnavailable,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InvitationEmailSentWire {
    Success,
    NotRequested,
    RateLimited { wait_until: Timestamp },
    BadConfig,
    RecipientRefused,
    ServerUnavailable,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InviteNewRep {
    Ok {
        token: InvitationToken,
        email_sent: InvitationEmailSentWire,
    },
    AuthorNotAllowed,
    ClaimerEmailAlreadyEnrolled,
}

impl InviteNewRep {
    pub fn from_error(err: NewInvitationError) -> Self {
        match err {
            NewInvitationError::AuthorNotAllowed => Self::AuthorNotAllowed,
            NewInvitationError::ClaimerEmailAlreadyEnrolled => Self::ClaimerEmailAlreadyEnrolled,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InviteListItem {
    pub token: InvitationToken,
    #[serde(rename = "type")]
    pub invitation_type: InvitationType,
    pub created_by: UserId,
    pub claimer_email: Option<EmailAddress>,
    pub created_on: Timestamp,
    pub status: InvitationStatus,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InviteListRep {
    Ok { invitations: Vec<InviteListItem> },
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InviteCancelRep {
    Ok,
    InvitationNotFound,
    InvitationAlreadyDeleted,
    AuthorNotAllowed,
}

impl From<CancelInvitationError> for InviteCancelRep {
    fn from(err: CancelInvitationError) -> Self {
        match err {
            CancelInvitationError::InvitationNotFound => Self::InvitationNotFound,
            CancelInvitationError::InvitationAlreadyDeleted => Self::InvitationAlreadyDeleted,
            CancelInvitationError::AuthorNotAllowed => Self::AuthorNotAllowed,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InviteCompleteRep {
    Ok,
    InvitationNotFound,
    InvitationAlreadyDeleted,
}

impl From<CompleteInvitationError> for InviteCompleteRep {
    fn from(err: CompleteInvitationError) -> Self {
        match err {
            CompleteInvitationError::InvitationNotFound => Self::InvitationNotFound,
            CompleteInvitationError::InvitationAlreadyDeleted => Self::InvitationAlreadyDeleted,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InviteGreeterStartGreetingAttemptRep {
    Ok { greeting_attempt: GreetingAttemptId },
    InvitationNotFound,
    InvitationAlreadyDeleted,
    AuthorNotAllowed,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InviteGreeterStepRep {
    Ok { claimer_step: ByteBuf },
    NotReady,
    GreetingAttemptNotFound,
    GreetingAttemptCancelled,
    StepMismatch,
    StepTooAdvanced,
    AuthorNotAllowed,
    InvitationNotFound,
    InvitationAlreadyDeleted,
}

impl From<GreetingAttemptError> for InviteGreeterStepRep {
    fn from(err: GreetingAttemptError) -> Self {
        match err {
            GreetingAttemptError::InvitationNotFound => Self::InvitationNotFound,
            GreetingAttemptError::InvitationAlreadyDeleted => Self::InvitationAlreadyDeleted,
            GreetingAttemptError::AuthorNotAllowed => Self::AuthorNotAllowed,
            GreetingAttemptError::AttemptNotFound => Self::GreetingAttemptNotFound,
            GreetingAttemptError::AttemptCancelled => Self::GreetingAttemptCancelled,
            GreetingAttemptError::StepMismatch => Self::StepMismatch,
            GreetingAttemptError::StepTooAdvanced => Self::StepTooAdvanced,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PkiEnrollmentListItem {
    pub enrollment_id: EnrollmentId,
    pub email: EmailAddress,
    pub submitted_on: Timestamp,
    pub submitter_der_x509_certificate: ByteBuf,
    pub submit_payload_signature: ByteBuf,
    pub submit_payload: ByteBuf,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PkiEnrollmentListRep {
    Ok { enrollments: Vec<PkiEnrollmentListItem> },
    AuthorNotAllowed,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PkiEnrollmentDecideRep {
    Ok,
    AuthorNotAllowed,
    EnrollmentNotFound,
    EnrollmentNoLongerAvailable,
    InvalidCertificate,
    UserAlreadyExists,
    HumanHandleAlreadyTaken,
    ActiveUsersLimitReached,
    TimestampOutOfBallpark(TimestampOutOfBallpark),
    RequireGreaterTimestamp(RequireGreaterTimestamp),
}

impl From<DecideEnrollmentError> for PkiEnrollmentDecideRep {
    fn from(err: DecideEnrollmentError) -> Self {
        match err {
            DecideEnrollmentError::AuthorNotAllowed => Self::AuthorNotAllowed,
            DecideEnrollmentError::EnrollmentNotFound => Self::EnrollmentNotFound,
            DecideEnrollmentError::EnrollmentNoLongerAvailable => Self::EnrollmentNoLongerAvailable,
            DecideEnrollmentError::CreateUser(inner) => match inner {
                CreateUserError::AuthorNotAllowed => Self::AuthorNotAllowed,
                CreateUserError::InvalidCertificate => Self::InvalidCertificate,
                CreateUserError::UserAlreadyExists => Self::UserAlreadyExists,
                CreateUserError::HumanHandleAlreadyTaken => Self::HumanHandleAlreadyTaken,
                CreateUserError::ActiveUsersLimitReached => Self::ActiveUsersLimitReached,
                CreateUserError::Timestamp(TimestampError::OutOfBallpark(inner)) => {
                    Self::TimestampOutOfBallpark(inner)
                }
                CreateUserError::Timestamp(TimestampError::RequireGreater(inner)) => {
                    Self::RequireGreaterTimestamp(inner)
                }
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ShamirRecoverySetupRep {
    Ok,
    InvalidCertificate,
    RecipientNotFound,
    RecipientRevoked,
    ShamirRecoveryAlreadyExists(RequireGreaterTimestamp),
    TimestampOutOfBallpark(TimestampOutOfBallpark),
    RequireGreaterTimestamp(RequireGreaterTimestamp),
}

impl From<SetupShamirError> for ShamirRecoverySetupRep {
    fn from(err: SetupShamirError) -> Self {
        match err {
            SetupShamirError::InvalidCertificate => Self::InvalidCertificate,
            SetupShamirError::RecipientNotFound => Self::RecipientNotFound,
            SetupShamirError::RecipientRevoked => Self::RecipientRevoked,
            SetupShamirError::AlreadyExists(inner) => Self::ShamirRecoveryAlreadyExists(inner),
            SetupShamirError::Timestamp(TimestampError::OutOfBallpark(inner)) => {
                Self::TimestampOutOfBallpark(inner)
            }
            SetupShamirError::Timestamp(TimestampError::RequireGreater(inner)) => {
                Self::RequireGreaterTimestamp(inner)
            }
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ShamirRecoveryDeleteRep {
    Ok,
    InvalidCertificate,
    ShamirRecoveryNotFound,
    ShamirRecoveryAlreadyDeleted(RequireGreaterTimestamp),
    TimestampOutOfBallpark(TimestampOutOfBallpark),
    RequireGreaterTimestamp(RequireGreaterTimestamp),
}

impl From<DeleteShamirError> for ShamirRecoveryDeleteRep {
    fn from(err: DeleteShamirError) -> Self {
        match err {
            DeleteShamirError::InvalidCertificate => Self::InvalidCertificate,
            DeleteShamirError::RecoveryNotFound => Self::ShamirRecoveryNotFound,
            DeleteShamirError::AlreadyDeleted(inner) => Self::ShamirRecoveryAlreadyDeleted(inner),
            DeleteShamirError::Timestamp(TimestampError::OutOfBallpark(inner)) => {
                Self::TimestampOutOfBallpark(inner)
            }
            DeleteShamirError::Timestamp(TimestampError::RequireGreater(inner)) => {
                Self::RequireGreaterTimestamp(inner)
            }
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TotpSetupGetSecretRep {
    Ok { secret: ByteBuf },
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TotpRep {
    Ok,
    NotSetup,
    AlreadyConfirmed,
    NotConfirmed,
    InvalidOneTimePassword,
    Throttled { wait_until: Timestamp },
}

impl From<TotpError> for TotpRep {
    fn from(err: TotpError) -> Self {
        match err {
            TotpError::NotSetup => Self::NotSetup,
            TotpError::AlreadyConfirmed => Self::AlreadyConfirmed,
            TotpError::NotConfirmed => Self::NotConfirmed,
            TotpError::InvalidOneTimePassword => Self::InvalidOneTimePassword,
            TotpError::Throttled { wait_until } => Self::Throttled { wait_until },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TotpFetchOpaqueKeyRep {
    Ok { opaque_key: ByteBuf },
    NotSetup,
    NotConfirmed,
    InvalidOneTimePassword,
    Throttled { wait_until: Timestamp },
    AlreadyConfirmed,
}

impl From<TotpError> for TotpFetchOpaqueKeyRep {
    fn from(err: TotpError) -> Self {
        match err {
            TotpError::NotSetup => Self::NotSetup,
            TotpError::NotConfirmed => Self::NotConfirmed,
            TotpError::InvalidOneTimePassword => Self::InvalidOneTimePassword,
            TotpError::Throttled { wait_until } => Self::Throttled { wait_until },
            TotpError::AlreadyConfirmed => Self::AlreadyConfirmed,
        }
    }
}
