//! Shamir recovery setups: publish, retire.
//!
//! A setup is keyed by the protected user and at most one is in force
//! at a time. Writes hold `common` in read mode and `shamir_recovery`
//! in write mode; the write lock also provides the per-user exclusion,
//! and the common read lock keeps a concurrent revocation (a `common`
//! write) from interleaving with a setup naming the revoked user.

use std::collections::HashMap;

use tracing::info;

use velum_certif::{
    Certificate, CertificateAuthor, ShamirRecoveryBriefCertificate,
    ShamirRecoveryDeletionCertificate,
};
use velum_core::ballpark::RequireGreaterTimestamp;
use velum_core::crypto::VerifyKey;
use velum_core::id::UserId;
use velum_core::time::Timestamp;
use velum_core::token::InvitationToken;
use velum_store::{ShamirDeletionEntry, ShamirSetupEntry, Topic};

use crate::auth::AuthenticatedContext;
use crate::events::{Event, EventBus};

use super::{check_timestamp, TimestampError};

/// Failure publishing a setup.
#[derive(Debug, thiserror::Error)]
pub enum SetupShamirError {
    #[error("invalid certificate")]
    InvalidCertificate,
    #[error("recipient not found")]
    RecipientNotFound,
    #[error("recipient is revoked")]
    RecipientRevoked,
    #[error("a setup is already in force, certificates up to {}", .0.strictly_greater_than)]
    AlreadyExists(RequireGreaterTimestamp),
    #[error("bad timestamp")]
    Timestamp(#[from] TimestampError),
}

/// Failure retiring a setup.
#[derive(Debug, thiserror::Error)]
pub enum DeleteShamirError {
    #[error("invalid certificate")]
    InvalidCertificate,
    #[error("no setup matches the deletion certificate")]
    RecoveryNotFound,
    #[error("setup already deleted at {}", .0.strictly_greater_than)]
    AlreadyDeleted(RequireGreaterTimestamp),
    #[error("bad timestamp")]
    Timestamp(#[from] TimestampError),
}

/// The shamir recovery component.
pub struct ShamirComponent {
    event_bus: EventBus,
}

impl ShamirComponent {
    pub fn new(event_bus: EventBus) -> Self {
        Self { event_bus }
    }

    /// Publish a setup: the brief certificate, the ciphered recovery
    /// data, the reveal token and one share certificate per recipient.
    pub async fn setup(
        &self,
        ctx: &AuthenticatedContext,
        ciphered_data: Vec<u8>,
        reveal_token: InvitationToken,
        shamir_recovery_brief_certificate: &[u8],
        shares: HashMap<UserId, Vec<u8>>,
    ) -> Result<(), SetupShamirError> {
        let author = CertificateAuthor::Device(ctx.device_id.clone());
        let verify_key = device_verify_key(ctx);
        let brief = ShamirRecoveryBriefCertificate::verify_and_load(
            shamir_recovery_brief_certificate,
            &verify_key,
            Some(&author),
        )
        .map_err(|_| SetupShamirError::InvalidCertificate)?;
        // A user can only set up recovery of their own account, the
        // quorum must be reachable, the author cannot hold shares, and
        // the share certificates must match the announced recipients
        let total_shares: u64 = brief
            .per_recipient_shares
            .values()
            .map(|count| u64::from(*count))
            .sum();
        if brief.user_id != ctx.user_id
            || brief.threshold == 0
            || u64::from(brief.threshold) > total_shares
            || brief.per_recipient_shares.is_empty()
            || brief.per_recipient_shares.contains_key(&ctx.user_id)
            || shares.len() != brief.per_recipient_shares.len()
            || !brief
                .per_recipient_shares
                .keys()
                .all(|recipient| shares.contains_key(recipient))
        {
            return Err(SetupShamirError::InvalidCertificate);
        }

        let (_hold, watermarks) = ctx
            .organization
            .lock_topics(&[Topic::Common], &[Topic::ShamirRecovery])
            .await;
        check_timestamp(brief.timestamp, Timestamp::now(), &watermarks)?;

        let timestamp = brief.timestamp;
        let participants: Vec<UserId> = std::iter::once(ctx.user_id)
            .chain(brief.per_recipient_shares.keys().copied())
            .collect();
        ctx.organization.with(|state| {
            for recipient in brief.per_recipient_shares.keys() {
                let user = state
                    .users
                    .get(recipient)
                    .ok_or(SetupShamirError::RecipientNotFound)?;
                if user.is_revoked() {
                    return Err(SetupShamirError::RecipientRevoked);
                }
            }
            let setups = state.shamir_setups.entry(ctx.user_id).or_default();
            if setups.last().is_some_and(|setup| !setup.is_deleted()) {
                let last = state.topic_last_timestamp(&Topic::ShamirRecovery);
                return Err(SetupShamirError::AlreadyExists(RequireGreaterTimestamp {
                    strictly_greater_than: last,
                }));
            }
            let setups = state.shamir_setups.entry(ctx.user_id).or_default();
            setups.push(ShamirSetupEntry {
                ciphered_data,
                reveal_token,
                brief,
                brief_certificate: shamir_recovery_brief_certificate.to_vec(),
                shares,
                deletion: None,
            });
            state.bump_topic(Topic::ShamirRecovery, timestamp);
            Ok(())
        })?;

        info!(organization = %ctx.organization.id(), user = %ctx.user_id, "shamir recovery setup");
        self.publish(ctx, timestamp, participants);
        Ok(())
    }

    /// Retire the setup pinned by the deletion certificate.
    pub async fn delete(
        &self,
        ctx: &AuthenticatedContext,
        shamir_recovery_deletion_certificate: &[u8],
    ) -> Result<(), DeleteShamirError> {
        let author = CertificateAuthor::Device(ctx.device_id.clone());
        let verify_key = device_verify_key(ctx);
        let deletion = ShamirRecoveryDeletionCertificate::verify_and_load(
            shamir_recovery_deletion_certificate,
            &verify_key,
            Some(&author),
        )
        .map_err(|_| DeleteShamirError::InvalidCertificate)?;
        if deletion.setup_to_delete_user_id != ctx.user_id {
            return Err(DeleteShamirError::InvalidCertificate);
        }

        let (_hold, watermarks) = ctx
            .organization
            .lock_topics(&[Topic::Common], &[Topic::ShamirRecovery])
            .await;
        check_timestamp(deletion.timestamp, Timestamp::now(), &watermarks)?;

        let timestamp = deletion.timestamp;
        let participants = ctx.organization.with(|state| {
            let setup = state
                .shamir_setups
                .get_mut(&ctx.user_id)
                .and_then(|setups| {
                    setups
                        .iter_mut()
                        .find(|setup| setup.brief.timestamp == deletion.setup_to_delete_timestamp)
                })
                .ok_or(DeleteShamirError::RecoveryNotFound)?;
            // The certificate must name exactly the setup's recipients
            if deletion.share_recipients.len() != setup.brief.per_recipient_shares.len()
                || !deletion
                    .share_recipients
                    .iter()
                    .all(|recipient| setup.brief.per_recipient_shares.contains_key(recipient))
            {
                return Err(DeleteShamirError::InvalidCertificate);
            }
            if let Some(existing) = &setup.deletion {
                return Err(DeleteShamirError::AlreadyDeleted(RequireGreaterTimestamp {
                    strictly_greater_than: existing.cooked.timestamp,
                }));
            }
            let participants: Vec<UserId> = std::iter::once(ctx.user_id)
                .chain(setup.brief.per_recipient_shares.keys().copied())
                .collect();
            setup.deletion = Some(ShamirDeletionEntry {
                cooked: deletion,
                certificate: shamir_recovery_deletion_certificate.to_vec(),
            });
            state.bump_topic(Topic::ShamirRecovery, timestamp);
            Ok(participants)
        })?;

        info!(organization = %ctx.organization.id(), user = %ctx.user_id, "shamir recovery deleted");
        self.publish(ctx, timestamp, participants);
        Ok(())
    }

    fn publish(&self, ctx: &AuthenticatedContext, timestamp: Timestamp, participants: Vec<UserId>) {
        self.event_bus.send(&Event::ShamirRecoveryCertificate {
            organization_id: ctx.organization.id().clone(),
            timestamp,
            participants,
        });
    }
}

fn device_verify_key(ctx: &AuthenticatedContext) -> VerifyKey {
    ctx.organization.with(|state| {
        state
            .devices
            .get(&ctx.device_id)
            .map(|device| device.cooked.verify_key)
            // Resolved by the session gate; fail closed on a race with
            // organization erase
            .unwrap_or_else(|| velum_core::crypto::SigningKey::generate().verify_key())
    })
}
