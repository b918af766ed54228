//! Out-of-band (PKI) enrollment.
//!
//! A prospective user submits a payload signed by an external
//! trustchain; an ADMIN later accepts (issuing the real user and
//! device certificates) or rejects. Submission is serialized by the
//! `AsyncEnrollmentCreation` advisory lock so at most one SUBMITTED
//! enrollment per email can exist.

use std::sync::Arc;

use tracing::info;

use velum_core::id::{EmailAddress, EnrollmentId, UserId};
use velum_core::time::Timestamp;
use velum_store::{EnrollmentEntry, EnrollmentInfo, Topic};
use velum_store::AdvisoryLock;

use crate::auth::{AnonymousContext, AuthenticatedContext};
use crate::events::{Event, EventBus};

use super::user::{CreateUserError, UserComponent};

/// Failure submitting an enrollment.
#[derive(Debug, thiserror::Error)]
pub enum SubmitEnrollmentError {
    #[error("enrollment id already used")]
    EnrollmentIdAlreadyUsed,
    #[error("a submitted enrollment already exists for this email")]
    EmailAlreadySubmitted,
    #[error("a non-revoked user already holds this email")]
    EmailAlreadyEnrolled,
}

/// Failure deciding an enrollment.
#[derive(Debug, thiserror::Error)]
pub enum DecideEnrollmentError {
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("enrollment not found")]
    EnrollmentNotFound,
    #[error("enrollment no longer submitted")]
    EnrollmentNoLongerAvailable,
    #[error("user creation failed: {0}")]
    CreateUser(#[from] CreateUserError),
}

/// Externally visible state of an enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentState {
    Submitted,
    Accepted,
    Rejected,
    Cancelled,
}

/// One row of the ADMIN's enrollment listing.
#[derive(Debug, Clone)]
pub struct EnrollmentListItem {
    pub enrollment_id: EnrollmentId,
    pub email: EmailAddress,
    pub submitted_on: Timestamp,
    pub submitter_x509_certificate: Vec<u8>,
    pub submit_payload_signature: Vec<u8>,
    pub submit_payload: Vec<u8>,
}

/// The enrollment component.
pub struct EnrollmentComponent {
    event_bus: EventBus,
    user: Arc<UserComponent>,
}

impl EnrollmentComponent {
    pub fn new(event_bus: EventBus, user: Arc<UserComponent>) -> Self {
        Self { event_bus, user }
    }

    /// Anonymous: submit an enrollment request.
    ///
    /// `force` cancels a previous SUBMITTED enrollment for the same
    /// email instead of refusing.
    #[allow(clippy::too_many_arguments)]
    pub async fn submit(
        &self,
        ctx: &AnonymousContext,
        enrollment_id: EnrollmentId,
        force: bool,
        email: EmailAddress,
        submitter_x509_certificate: Vec<u8>,
        submit_payload_signature: Vec<u8>,
        submit_payload: Vec<u8>,
    ) -> Result<(), SubmitEnrollmentError> {
        let (_hold, _) = ctx
            .organization
            .lock_topics(
                &[],
                &[Topic::Advisory(AdvisoryLock::AsyncEnrollmentCreation)],
            )
            .await;

        let now = Timestamp::now();
        ctx.organization.with(|state| {
            if state.enrollments.contains_key(&enrollment_id) {
                return Err(SubmitEnrollmentError::EnrollmentIdAlreadyUsed);
            }
            if state.active_user_by_email(&email).is_some() {
                return Err(SubmitEnrollmentError::EmailAlreadyEnrolled);
            }
            let pending: Vec<EnrollmentId> = state
                .enrollments
                .values()
                .filter(|e| e.is_submitted() && e.email == email)
                .map(|e| e.enrollment_id)
                .collect();
            if !pending.is_empty() {
                if !force {
                    return Err(SubmitEnrollmentError::EmailAlreadySubmitted);
                }
                for id in pending {
                    if let Some(previous) = state.enrollments.get_mut(&id) {
                        previous.info = EnrollmentInfo::Cancelled { cancelled_on: now };
                    }
                }
            }
            state.enrollments.insert(
                enrollment_id,
                EnrollmentEntry {
                    enrollment_id,
                    email,
                    submitter_x509_certificate,
                    submit_payload_signature,
                    submit_payload,
                    submitted_on: now,
                    info: EnrollmentInfo::Submitted,
                },
            );
            Ok(())
        })?;

        info!(organization = %ctx.organization.id(), enrollment = %enrollment_id, "enrollment submitted");
        self.publish(ctx.organization.id(), enrollment_id);
        Ok(())
    }

    /// Anonymous: poll the state of one's submission. `Accepted`
    /// additionally carries the ADMIN's accept payload.
    pub fn info(
        &self,
        ctx: &AnonymousContext,
        enrollment_id: EnrollmentId,
    ) -> Option<(EnrollmentState, Option<Vec<u8>>)> {
        ctx.organization.with(|state| {
            state.enrollments.get(&enrollment_id).map(|e| match &e.info {
                EnrollmentInfo::Submitted => (EnrollmentState::Submitted, None),
                EnrollmentInfo::Accepted { accept_payload, .. } => {
                    (EnrollmentState::Accepted, Some(accept_payload.clone()))
                }
                EnrollmentInfo::Rejected { .. } => (EnrollmentState::Rejected, None),
                EnrollmentInfo::Cancelled { .. } => (EnrollmentState::Cancelled, None),
            })
        })
    }

    /// Authenticated (ADMIN): the SUBMITTED enrollments.
    pub fn list(
        &self,
        ctx: &AuthenticatedContext,
    ) -> Result<Vec<EnrollmentListItem>, DecideEnrollmentError> {
        if ctx.profile != velum_core::types::UserProfile::Admin {
            return Err(DecideEnrollmentError::AuthorNotAllowed);
        }
        Ok(ctx.organization.with(|state| {
            let mut rows: Vec<EnrollmentListItem> = state
                .enrollments
                .values()
                .filter(|e| e.is_submitted())
                .map(|e| EnrollmentListItem {
                    enrollment_id: e.enrollment_id,
                    email: e.email.clone(),
                    submitted_on: e.submitted_on,
                    submitter_x509_certificate: e.submitter_x509_certificate.clone(),
                    submit_payload_signature: e.submit_payload_signature.clone(),
                    submit_payload: e.submit_payload.clone(),
                })
                .collect();
            rows.sort_by_key(|row| row.submitted_on);
            rows
        }))
    }

    /// Authenticated (ADMIN): accept, issuing the real certificates.
    #[allow(clippy::too_many_arguments)]
    pub async fn accept(
        &self,
        ctx: &AuthenticatedContext,
        enrollment_id: EnrollmentId,
        accept_payload: Vec<u8>,
        user_certificate: &[u8],
        redacted_user_certificate: &[u8],
        device_certificate: &[u8],
        redacted_device_certificate: &[u8],
    ) -> Result<UserId, DecideEnrollmentError> {
        if ctx.profile != velum_core::types::UserProfile::Admin {
            return Err(DecideEnrollmentError::AuthorNotAllowed);
        }
        ctx.organization.with(|state| {
            let enrollment = state
                .enrollments
                .get(&enrollment_id)
                .ok_or(DecideEnrollmentError::EnrollmentNotFound)?;
            if !enrollment.is_submitted() {
                return Err(DecideEnrollmentError::EnrollmentNoLongerAvailable);
            }
            Ok(())
        })?;

        // Same path, same constraints, as a direct user creation
        let user_id = self
            .user
            .create_user(
                ctx,
                user_certificate,
                redacted_user_certificate,
                device_certificate,
                redacted_device_certificate,
            )
            .await?;

        ctx.organization.with(|state| {
            if let Some(enrollment) = state.enrollments.get_mut(&enrollment_id) {
                enrollment.info = EnrollmentInfo::Accepted {
                    accepted_on: Timestamp::now(),
                    accepter: ctx.device_id.clone(),
                    accept_payload,
                };
            }
        });
        info!(organization = %ctx.organization.id(), enrollment = %enrollment_id, "enrollment accepted");
        self.publish(ctx.organization.id(), enrollment_id);
        Ok(user_id)
    }

    /// Authenticated (ADMIN): reject a submitted enrollment.
    pub fn reject(
        &self,
        ctx: &AuthenticatedContext,
        enrollment_id: EnrollmentId,
    ) -> Result<(), DecideEnrollmentError> {
        if ctx.profile != velum_core::types::UserProfile::Admin {
            return Err(DecideEnrollmentError::AuthorNotAllowed);
        }
        ctx.organization.with(|state| {
            let enrollment = state
                .enrollments
                .get_mut(&enrollment_id)
                .ok_or(DecideEnrollmentError::EnrollmentNotFound)?;
            if !enrollment.is_submitted() {
                return Err(DecideEnrollmentError::EnrollmentNoLongerAvailable);
            }
            enrollment.info = EnrollmentInfo::Rejected {
                rejected_on: Timestamp::now(),
            };
            Ok(())
        })?;
        self.publish(ctx.organization.id(), enrollment_id);
        Ok(())
    }

    fn publish(&self, organization_id: &velum_core::id::OrganizationId, enrollment_id: EnrollmentId) {
        self.event_bus.send(&Event::PkiEnrollment {
            organization_id: organization_id.clone(),
            enrollment_id,
        });
    }
}
