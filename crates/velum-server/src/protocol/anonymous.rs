//! Anonymous-family commands: bootstrap, enrollment submission and
//! polling, recovery accounts.

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use velum_core::ballpark::TimestampOutOfBallpark;
use velum_core::crypto::{HashDigest, VerifyKey};
use velum_core::id::{AccountVaultId, EmailAddress, EnrollmentId};
use velum_core::token::BootstrapToken;

#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum AnonymousReq {
    OrganizationBootstrap {
        bootstrap_token: Option<BootstrapToken>,
        root_verify_key: VerifyKey,
        user_certificate: ByteBuf,
        redacted_user_certificate: ByteBuf,
        device_certificate: ByteBuf,
        redacted_device_certificate: ByteBuf,
        sequester_authority_certificate: Option<ByteBuf>,
    },
    PkiEnrollmentSubmit {
        enrollment_id: EnrollmentId,
        force: bool,
        email: EmailAddress,
        submitter_der_x509_certificate: ByteBuf,
        submit_payload_signature: ByteBuf,
        submit_payload: ByteBuf,
    },
    PkiEnrollmentInfo {
        enrollment_id: EnrollmentId,
    },
    AccountCreate {
        email: EmailAddress,
        auth_method_id: HashDigest,
        vault_key_access: ByteBuf,
    },
    AccountVaultItemUpload {
        email: EmailAddress,
        auth_method_id: HashDigest,
        data: ByteBuf,
    },
    AccountVaultItemList {
        email: EmailAddress,
        auth_method_id: HashDigest,
    },
    AccountAuthMethodCreate {
        email: EmailAddress,
        auth_method_id: HashDigest,
        new_auth_method_id: HashDigest,
        vault_key_access: ByteBuf,
    },
    AccountAuthMethodDisable {
        email: EmailAddress,
        auth_method_id: HashDigest,
        target: HashDigest,
    },
    AccountVaultKeyRotation {
        email: EmailAddress,
        auth_method_id: HashDigest,
        new_auth_method_id: HashDigest,
        vault_key_access: ByteBuf,
        items: Vec<ByteBuf>,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OrganizationBootstrapRep {
    Ok,
    InvalidBootstrapToken,
    OrganizationAlreadyBootstrapped,
    InvalidCertificate,
    TimestampOutOfBallpark(TimestampOutOfBallpark),
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PkiEnrollmentSubmitRep {
    Ok,
    EnrollmentIdAlreadyUsed,
    EmailAlreadySubmitted,
    EmailAlreadyEnrolled,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PkiEnrollmentInfoRep {
    Submitted,
    Accepted { accept_payload: ByteBuf },
    Rejected,
    Cancelled,
    EnrollmentNotFound,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AccountCreateRep {
    Ok { vault_id: AccountVaultId },
    AccountAlreadyExists,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AccountVaultItemUploadRep {
    Ok { fingerprint: HashDigest },
    AccountNotFound,
    BadAuthenticationInfo,
    FingerprintMismatch,
}

#[derive(Debug, Serialize)]
pub struct AccountVaultItemRow {
    pub fingerprint: HashDigest,
    pub data: ByteBuf,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AccountVaultItemListRep {
    Ok {
        vault_id: AccountVaultId,
        items: Vec<AccountVaultItemRow>,
    },
    AccountNotFound,
    BadAuthenticationInfo,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AccountAuthMethodRep {
    Ok,
    AccountNotFound,
    BadAuthenticationInfo,
    AuthMethodAlreadyExists,
    AuthMethodNotFound,
    LastAuthMethod,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AccountVaultKeyRotationRep {
    Ok { vault_id: AccountVaultId },
    AccountNotFound,
    BadAuthenticationInfo,
}
