//! Invitations and the greeting ceremony.
//!
//! Creation holds the `InvitationCreation` advisory lock so the
//! one-active-invitation-per-claimer-email rule survives concurrent
//! submissions. The ceremony itself runs on the greeting attempt step
//! engine of the store: both sides submit indexed steps, identical
//! resubmissions replay, and joining an attempt twice cancels it in
//! favor of a fresh one.

use std::net::IpAddr;
use std::sync::Arc;

use tracing::{info, warn};

use velum_core::id::{EmailAddress, GreetingAttemptId, UserId};
use velum_core::time::Timestamp;
use velum_core::token::InvitationToken;
use velum_core::types::{GreeterOrClaimer, InvitationType, UserProfile};
use velum_store::{
    AdvisoryLock, GreetingAttemptEntry, GreetingStepOutcome, InvitationDeletedReason,
    InvitationEntry, Topic,
};

use crate::auth::{AuthenticatedContext, InvitedContext};
use crate::email::{EmailRateLimiter, EmailSender, SendEmailError};
use crate::events::{Event, EventBus, InvitationStatus};

/// Delivery outcome reported alongside a created invitation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvitationEmailSentStatus {
    Success,
    /// Sending was not requested.
    NotRequested,
    RateLimited { wait_until: Timestamp },
    BadConfig,
    RecipientRefused,
    ServerUnavailable,
}

/// Failure creating an invitation.
#[derive(Debug, thiserror::Error)]
pub enum NewInvitationError {
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("a non-revoked user already holds this email")]
    ClaimerEmailAlreadyEnrolled,
}

/// Failure cancelling an invitation.
#[derive(Debug, thiserror::Error)]
pub enum CancelInvitationError {
    #[error("invitation not found")]
    InvitationNotFound,
    #[error("invitation already deleted")]
    InvitationAlreadyDeleted,
    #[error("author not allowed")]
    AuthorNotAllowed,
}

/// Failure completing an invitation.
#[derive(Debug, thiserror::Error)]
pub enum CompleteInvitationError {
    #[error("invitation not found")]
    InvitationNotFound,
    #[error("invitation already deleted")]
    InvitationAlreadyDeleted,
}

/// Failure starting or driving a greeting attempt.
#[derive(Debug, thiserror::Error)]
pub enum GreetingAttemptError {
    #[error("invitation not found")]
    InvitationNotFound,
    #[error("invitation already deleted")]
    InvitationAlreadyDeleted,
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("greeting attempt not found")]
    AttemptNotFound,
    #[error("greeting attempt was cancelled")]
    AttemptCancelled,
    #[error("step payload differs from the first submission")]
    StepMismatch,
    #[error("a step beyond the exchange frontier was submitted")]
    StepTooAdvanced,
}

/// Reply of a step submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GreetingStepReply {
    /// The peer's payload for this step index.
    Done(Vec<u8>),
    /// The peer has not reached this step yet; poll again.
    NotReady,
}

/// One row of `invite_list`.
#[derive(Debug, Clone)]
pub struct InvitationInfo {
    pub token: InvitationToken,
    pub invitation_type: InvitationType,
    pub created_by: UserId,
    pub claimer_email: Option<EmailAddress>,
    pub created_on: Timestamp,
    pub status: InvitationStatus,
}

/// The invitation component.
pub struct InviteComponent {
    event_bus: EventBus,
    email_sender: Arc<dyn EmailSender>,
    rate_limiter: Arc<EmailRateLimiter>,
}

impl InviteComponent {
    pub fn new(
        event_bus: EventBus,
        email_sender: Arc<dyn EmailSender>,
        rate_limiter: Arc<EmailRateLimiter>,
    ) -> Self {
        Self {
            event_bus,
            email_sender,
            rate_limiter,
        }
    }

    /// Authenticated (ADMIN): invite a new user by email.
    ///
    /// Idempotent: a live invitation for the same email is returned
    /// instead of a second one being minted.
    pub async fn new_user(
        &self,
        ctx: &AuthenticatedContext,
        claimer_email: EmailAddress,
        send_email: bool,
        client_ip: Option<IpAddr>,
    ) -> Result<(InvitationToken, InvitationEmailSentStatus), NewInvitationError> {
        if ctx.profile != UserProfile::Admin {
            return Err(NewInvitationError::AuthorNotAllowed);
        }
        let (_hold, _) = ctx
            .organization
            .lock_topics(&[], &[Topic::Advisory(AdvisoryLock::InvitationCreation)])
            .await;

        let (token, reused) = ctx.organization.with(|state| {
            if state.active_user_by_email(&claimer_email).is_some() {
                return Err(NewInvitationError::ClaimerEmailAlreadyEnrolled);
            }
            let existing = state.invitations.values().find(|invitation| {
                !invitation.is_deleted()
                    && invitation.invitation_type == InvitationType::User
                    && invitation.claimer_email.as_ref() == Some(&claimer_email)
            });
            if let Some(existing) = existing {
                return Ok((existing.token, true));
            }
            let token = InvitationToken::new();
            state.invitations.insert(
                token,
                InvitationEntry {
                    token,
                    invitation_type: InvitationType::User,
                    created_by_user_id: ctx.user_id,
                    created_by_device_id: ctx.device_id.clone(),
                    claimer_email: Some(claimer_email.clone()),
                    created_on: Timestamp::now(),
                    deleted_on: None,
                    deleted_reason: None,
                    greeting_sessions: Default::default(),
                },
            );
            Ok((token, false))
        })?;

        if !reused {
            info!(organization = %ctx.organization.id(), "user invitation created");
            self.publish_invitation(ctx, token, InvitationStatus::Idle);
        }
        let email_status = if send_email {
            self.deliver_invitation_email(ctx, &claimer_email, client_ip)
                .await
        } else {
            InvitationEmailSentStatus::NotRequested
        };
        Ok((token, email_status))
    }

    /// Authenticated: invite one's own next device.
    pub async fn new_device(
        &self,
        ctx: &AuthenticatedContext,
        send_email: bool,
        client_ip: Option<IpAddr>,
    ) -> Result<(InvitationToken, InvitationEmailSentStatus), NewInvitationError> {
        let (_hold, _) = ctx
            .organization
            .lock_topics(&[], &[Topic::Advisory(AdvisoryLock::InvitationCreation)])
            .await;

        let (token, email, reused) = ctx.organization.with(|state| {
            let existing = state.invitations.values().find(|invitation| {
                !invitation.is_deleted()
                    && invitation.invitation_type == InvitationType::Device
                    && invitation.created_by_user_id == ctx.user_id
            });
            let email = state
                .users
                .get(&ctx.user_id)
                .and_then(|user| user.cooked.human_handle.as_ref())
                .map(|handle| handle.email.clone());
            if let Some(existing) = existing {
                return (existing.token, email, true);
            }
            let token = InvitationToken::new();
            state.invitations.insert(
                token,
                InvitationEntry {
                    token,
                    invitation_type: InvitationType::Device,
                    created_by_user_id: ctx.user_id,
                    created_by_device_id: ctx.device_id.clone(),
                    claimer_email: None,
                    created_on: Timestamp::now(),
                    deleted_on: None,
                    deleted_reason: None,
                    greeting_sessions: Default::default(),
                },
            );
            (token, email, false)
        });

        if !reused {
            self.publish_invitation(ctx, token, InvitationStatus::Idle);
        }
        let email_status = match (send_email, email) {
            (false, _) => InvitationEmailSentStatus::NotRequested,
            (true, None) => InvitationEmailSentStatus::RecipientRefused,
            (true, Some(email)) => self.deliver_invitation_email(ctx, &email, client_ip).await,
        };
        Ok((token, email_status))
    }

    /// Authenticated: invitations created by the caller (plus, for
    /// ADMINs, every user invitation).
    pub fn list(&self, ctx: &AuthenticatedContext) -> Vec<InvitationInfo> {
        ctx.organization.with(|state| {
            let mut rows: Vec<InvitationInfo> = state
                .invitations
                .values()
                .filter(|invitation| {
                    invitation.created_by_user_id == ctx.user_id
                        || (ctx.profile == UserProfile::Admin
                            && invitation.invitation_type == InvitationType::User)
                })
                .map(|invitation| InvitationInfo {
                    token: invitation.token,
                    invitation_type: invitation.invitation_type,
                    created_by: invitation.created_by_user_id,
                    claimer_email: invitation.claimer_email.clone(),
                    created_on: invitation.created_on,
                    status: invitation_status(invitation),
                })
                .collect();
            rows.sort_by_key(|row| row.created_on);
            rows
        })
    }

    /// Authenticated: cancel a live invitation.
    pub fn cancel(
        &self,
        ctx: &AuthenticatedContext,
        token: InvitationToken,
    ) -> Result<(), CancelInvitationError> {
        ctx.organization.with(|state| {
            let invitation = state
                .invitations
                .get_mut(&token)
                .ok_or(CancelInvitationError::InvitationNotFound)?;
            if invitation.is_deleted() {
                return Err(CancelInvitationError::InvitationAlreadyDeleted);
            }
            // The creator, or any ADMIN for user invitations
            let allowed = invitation.created_by_user_id == ctx.user_id
                || (ctx.profile == UserProfile::Admin
                    && invitation.invitation_type == InvitationType::User);
            if !allowed {
                return Err(CancelInvitationError::AuthorNotAllowed);
            }
            invitation.deleted_on = Some(Timestamp::now());
            invitation.deleted_reason = Some(InvitationDeletedReason::Cancelled);
            Ok(())
        })?;
        self.publish_invitation(ctx, token, InvitationStatus::Cancelled);
        Ok(())
    }

    /// Authenticated: mark the ceremony finished; the invitation
    /// becomes unusable.
    pub fn complete(
        &self,
        ctx: &AuthenticatedContext,
        token: InvitationToken,
    ) -> Result<(), CompleteInvitationError> {
        ctx.organization.with(|state| {
            let invitation = state
                .invitations
                .get_mut(&token)
                .ok_or(CompleteInvitationError::InvitationNotFound)?;
            if invitation.is_deleted() {
                return Err(CompleteInvitationError::InvitationAlreadyDeleted);
            }
            invitation.deleted_on = Some(Timestamp::now());
            invitation.deleted_reason = Some(InvitationDeletedReason::Finished);
            Ok(())
        })?;
        self.publish_invitation(ctx, token, InvitationStatus::Finished);
        Ok(())
    }

    /// Invited: what the claimer needs to run the ceremony.
    pub fn info(&self, ctx: &InvitedContext) -> Option<InvitationInfo> {
        ctx.organization.with(|state| {
            state.invitations.get(&ctx.token).map(|invitation| InvitationInfo {
                token: invitation.token,
                invitation_type: invitation.invitation_type,
                created_by: invitation.created_by_user_id,
                claimer_email: invitation.claimer_email.clone(),
                created_on: invitation.created_on,
                status: invitation_status(invitation),
            })
        })
    }

    /// Greeter side: join (or restart) the attempt with the claimer.
    pub fn greeter_start_attempt(
        &self,
        ctx: &AuthenticatedContext,
        token: InvitationToken,
    ) -> Result<GreetingAttemptId, GreetingAttemptError> {
        let attempt_id = self.start_attempt(
            &ctx.organization,
            token,
            ctx.user_id,
            GreeterOrClaimer::Greeter,
        )?;
        self.publish_attempt(ctx.organization.id(), token, attempt_id, GreeterOrClaimer::Greeter);
        Ok(attempt_id)
    }

    /// Claimer side: join (or restart) the attempt with `greeter`.
    pub fn claimer_start_attempt(
        &self,
        ctx: &InvitedContext,
        greeter: UserId,
    ) -> Result<GreetingAttemptId, GreetingAttemptError> {
        let attempt_id = self.start_attempt(
            &ctx.organization,
            ctx.token,
            greeter,
            GreeterOrClaimer::Claimer,
        )?;
        self.publish_attempt(
            ctx.organization.id(),
            ctx.token,
            attempt_id,
            GreeterOrClaimer::Claimer,
        );
        Ok(attempt_id)
    }

    /// Greeter side: submit step `index` and collect the claimer's.
    pub fn greeter_step(
        &self,
        ctx: &AuthenticatedContext,
        attempt_id: GreetingAttemptId,
        index: usize,
        payload: Vec<u8>,
    ) -> Result<GreetingStepReply, GreetingAttemptError> {
        let (reply, token) = self.submit_step(
            &ctx.organization,
            attempt_id,
            Some(ctx.user_id),
            GreeterOrClaimer::Greeter,
            index,
            payload,
        )?;
        self.publish_attempt(ctx.organization.id(), token, attempt_id, GreeterOrClaimer::Greeter);
        Ok(reply)
    }

    /// Claimer side: submit step `index` and collect the greeter's.
    pub fn claimer_step(
        &self,
        ctx: &InvitedContext,
        attempt_id: GreetingAttemptId,
        index: usize,
        payload: Vec<u8>,
    ) -> Result<GreetingStepReply, GreetingAttemptError> {
        let (reply, token) = self.submit_step(
            &ctx.organization,
            attempt_id,
            None,
            GreeterOrClaimer::Claimer,
            index,
            payload,
        )?;
        self.publish_attempt(ctx.organization.id(), token, attempt_id, GreeterOrClaimer::Claimer);
        Ok(reply)
    }

    fn start_attempt(
        &self,
        organization: &velum_store::OrganizationStore,
        token: InvitationToken,
        greeter: UserId,
        side: GreeterOrClaimer,
    ) -> Result<GreetingAttemptId, GreetingAttemptError> {
        organization.with(|state| {
            let invitation = state
                .invitations
                .get_mut(&token)
                .ok_or(GreetingAttemptError::InvitationNotFound)?;
            if invitation.is_deleted() {
                return Err(GreetingAttemptError::InvitationAlreadyDeleted);
            }
            let session = invitation.greeting_sessions.entry(greeter).or_default();
            let now = Timestamp::now();

            let active = session.attempts.last().copied().and_then(|id| {
                state
                    .greeting_attempts
                    .get_mut(&id)
                    .filter(|attempt| attempt.is_active())
            });
            if let Some(attempt) = active {
                attempt.join_or_cancel(side, now);
                if attempt.is_active() {
                    return Ok(attempt.id);
                }
                // Joined twice: the old attempt is dead, fall through
                // and open a fresh one already joined by this side
            }
            let mut fresh = GreetingAttemptEntry::new(token, greeter);
            fresh.join_or_cancel(side, now);
            let id = fresh.id;
            state.greeting_attempts.insert(id, fresh);
            // Re-borrow the invitation; the entry above released it
            if let Some(invitation) = state.invitations.get_mut(&token) {
                if let Some(session) = invitation.greeting_sessions.get_mut(&greeter) {
                    session.attempts.push(id);
                }
            }
            Ok(id)
        })
    }

    fn submit_step(
        &self,
        organization: &velum_store::OrganizationStore,
        attempt_id: GreetingAttemptId,
        expected_greeter: Option<UserId>,
        side: GreeterOrClaimer,
        index: usize,
        payload: Vec<u8>,
    ) -> Result<(GreetingStepReply, InvitationToken), GreetingAttemptError> {
        organization.with(|state| {
            let attempt = state
                .greeting_attempts
                .get_mut(&attempt_id)
                .ok_or(GreetingAttemptError::AttemptNotFound)?;
            if let Some(expected) = expected_greeter {
                if attempt.greeter_id != expected {
                    return Err(GreetingAttemptError::AuthorNotAllowed);
                }
            }
            if !attempt.is_active() {
                return Err(GreetingAttemptError::AttemptCancelled);
            }
            let token = attempt.token;
            match attempt.step(side, index, payload) {
                GreetingStepOutcome::Done(peer) => Ok((GreetingStepReply::Done(peer), token)),
                GreetingStepOutcome::NotReady => Ok((GreetingStepReply::NotReady, token)),
                GreetingStepOutcome::Mismatch => Err(GreetingAttemptError::StepMismatch),
                GreetingStepOutcome::TooAdvanced => Err(GreetingAttemptError::StepTooAdvanced),
            }
        })
    }

    async fn deliver_invitation_email(
        &self,
        ctx: &AuthenticatedContext,
        recipient: &EmailAddress,
        client_ip: Option<IpAddr>,
    ) -> InvitationEmailSentStatus {
        if let Some(wait_until) =
            self.rate_limiter
                .register_send_intent(Timestamp::now(), client_ip, recipient)
        {
            return InvitationEmailSentStatus::RateLimited { wait_until };
        }
        let subject = format!("Invitation to join {}", ctx.organization.id());
        let body = format!(
            "<p>You have been invited to join the {} organization.</p>",
            ctx.organization.id()
        );
        match self.email_sender.send(recipient, &subject, &body).await {
            Ok(()) => InvitationEmailSentStatus::Success,
            Err(err) => {
                // Delivery failures never abort invitation creation
                warn!(organization = %ctx.organization.id(), error = %err, "invitation email failed");
                match err {
                    SendEmailError::BadConfig => InvitationEmailSentStatus::BadConfig,
                    SendEmailError::RecipientRefused => InvitationEmailSentStatus::RecipientRefused,
                    SendEmailError::ServerUnavailable => {
                        InvitationEmailSentStatus::ServerUnavailable
                    }
                }
            }
        }
    }

    fn publish_invitation(
        &self,
        ctx: &AuthenticatedContext,
        token: InvitationToken,
        status: InvitationStatus,
    ) {
        self.event_bus.send(&Event::Invitation {
            organization_id: ctx.organization.id().clone(),
            token,
            possible_greeter: Some(ctx.user_id),
            status,
        });
    }

    fn publish_attempt(
        &self,
        organization_id: &velum_core::id::OrganizationId,
        token: InvitationToken,
        greeting_attempt: GreetingAttemptId,
        actor: GreeterOrClaimer,
    ) {
        self.event_bus.send(&Event::GreetingAttempt {
            organization_id: organization_id.clone(),
            token,
            greeting_attempt,
            actor,
        });
    }
}

fn invitation_status(invitation: &InvitationEntry) -> InvitationStatus {
    match invitation.deleted_reason {
        Some(InvitationDeletedReason::Finished) => InvitationStatus::Finished,
        Some(InvitationDeletedReason::Cancelled) => InvitationStatus::Cancelled,
        None => InvitationStatus::Idle,
    }
}
