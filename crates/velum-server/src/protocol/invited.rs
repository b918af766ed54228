//! Invited-family commands: the claimer's side of a greeting.

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use velum_core::id::{EmailAddress, GreetingAttemptId, UserId};
use velum_core::time::Timestamp;
use velum_core::types::InvitationType;

use crate::events::InvitationStatus;

#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum InvitedReq {
    InviteInfo,
    InviteClaimerStartGreetingAttempt {
        greeter: UserId,
    },
    InviteClaimerStep {
        greeting_attempt: GreetingAttemptId,
        step_index: u64,
        claimer_step: ByteBuf,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InviteInfoRep {
    Ok {
        #[serde(rename = "type")]
        invitation_type: InvitationType,
        claimer_email: Option<EmailAddress>,
        created_by: UserId,
        created_on: Timestamp,
        #[serde(rename = "invitation_status")]
        status: InvitationStatus,
    },
    InvitationNotFound,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InviteClaimerStartGreetingAttemptRep {
    Ok { greeting_attempt: GreetingAttemptId },
    InvitationNotFound,
    InvitationAlreadyDeleted,
    GreeterNotAllowed,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InviteClaimerStepRep {
    Ok { greeter_step: ByteBuf },
    NotReady,
    GreetingAttemptNotFound,
    GreetingAttemptCancelled,
    StepMismatch,
    StepTooAdvanced,
}
