//! TOTP-protected opaque keys.
//!
//! The server never sees what the opaque key protects; it only gates
//! its release behind a time-based one-time password. Failures feed an
//! exponential throttle: after `totp_max_failures` consecutive wrong
//! codes the key refuses fetches until a deadline that doubles with
//! every further failure. A correct code resets everything.
//!
//! All operations take `now` explicitly so the throttle window is
//! deterministic under test.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use velum_core::config::ServerConfig;
use velum_core::time::Timestamp;

use crate::auth::AuthenticatedContext;

const TOTP_STEP_SECONDS: i64 = 30;
const TOTP_DIGITS: u32 = 6;

/// Failure of a TOTP operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TotpError {
    #[error("no TOTP setup for this user")]
    NotSetup,
    #[error("setup already confirmed")]
    AlreadyConfirmed,
    #[error("setup not confirmed yet")]
    NotConfirmed,
    #[error("invalid one-time password")]
    InvalidOneTimePassword,
    #[error("throttled until {wait_until}")]
    Throttled { wait_until: Timestamp },
}

/// The TOTP component.
pub struct TotpComponent {
    config: Arc<ServerConfig>,
}

impl TotpComponent {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self { config }
    }

    /// Start (or restart) setup: mint a fresh shared secret.
    ///
    /// Restarting drops any previous key for the user, confirmed or
    /// not; the caller re-protects its material afterwards.
    pub fn setup_get_secret(&self, ctx: &AuthenticatedContext) -> Vec<u8> {
        let mut secret = vec![0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut secret);
        ctx.organization.with(|state| {
            state.totp_keys.insert(
                ctx.user_id,
                velum_store::TotpKeyEntry {
                    opaque_key: Vec::new(),
                    totp_secret: secret.clone(),
                    confirmed: false,
                    failures: 0,
                    throttle_until: None,
                },
            );
        });
        secret
    }

    /// Prove possession of the secret with one valid code.
    pub fn setup_confirm(
        &self,
        ctx: &AuthenticatedContext,
        one_time_password: &str,
        now: Timestamp,
    ) -> Result<(), TotpError> {
        ctx.organization.with(|state| {
            let entry = state
                .totp_keys
                .get_mut(&ctx.user_id)
                .ok_or(TotpError::NotSetup)?;
            if entry.confirmed {
                return Err(TotpError::AlreadyConfirmed);
            }
            if !totp_verify(&entry.totp_secret, one_time_password, now) {
                return Err(TotpError::InvalidOneTimePassword);
            }
            entry.confirmed = true;
            Ok(())
        })
    }

    /// Store the opaque key behind the confirmed setup.
    pub fn create_opaque_key(
        &self,
        ctx: &AuthenticatedContext,
        opaque_key: Vec<u8>,
    ) -> Result<(), TotpError> {
        ctx.organization.with(|state| {
            let entry = state
                .totp_keys
                .get_mut(&ctx.user_id)
                .ok_or(TotpError::NotSetup)?;
            if !entry.confirmed {
                return Err(TotpError::NotConfirmed);
            }
            entry.opaque_key = opaque_key;
            Ok(())
        })
    }

    /// Release the opaque key against a valid code.
    pub fn fetch_opaque_key(
        &self,
        ctx: &AuthenticatedContext,
        one_time_password: &str,
        now: Timestamp,
    ) -> Result<Vec<u8>, TotpError> {
        let max_failures = self.config.totp_max_failures;
        let base_delay = self.config.totp_throttle_base_delay;
        ctx.organization.with(|state| {
            let entry = state
                .totp_keys
                .get_mut(&ctx.user_id)
                .ok_or(TotpError::NotSetup)?;
            if !entry.confirmed {
                return Err(TotpError::NotConfirmed);
            }
            if let Some(wait_until) = entry.throttle_until {
                if now < wait_until {
                    return Err(TotpError::Throttled { wait_until });
                }
            }
            if !totp_verify(&entry.totp_secret, one_time_password, now) {
                entry.failures += 1;
                if entry.failures >= max_failures {
                    // Doubles with every failure past the threshold
                    let exponent = (entry.failures - max_failures).min(16);
                    let delay = base_delay * 2u32.saturating_pow(exponent);
                    entry.throttle_until = Some(now + delay);
                }
                return Err(TotpError::InvalidOneTimePassword);
            }
            entry.failures = 0;
            entry.throttle_until = None;
            Ok(entry.opaque_key.clone())
        })
    }

    /// Drop the setup and its opaque key entirely.
    pub fn reset(&self, ctx: &AuthenticatedContext) -> Result<(), TotpError> {
        ctx.organization.with(|state| {
            state
                .totp_keys
                .remove(&ctx.user_id)
                .map(|_| ())
                .ok_or(TotpError::NotSetup)
        })
    }
}

fn totp_code(secret: &[u8], step: i64) -> String {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(secret)
        // HMAC accepts any key length
        .unwrap_or_else(|_| unreachable!());
    mac.update(&step.to_be_bytes());
    let digest = mac.finalize().into_bytes();
    // Dynamic truncation (RFC 4226 §5.3)
    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let code = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);
    format!("{:06}", code % 10u32.pow(TOTP_DIGITS))
}

/// Accept the current step and its two neighbors to tolerate clock
/// skew between the server and the authenticator.
fn totp_verify(secret: &[u8], one_time_password: &str, now: Timestamp) -> bool {
    let step = now.as_us() / 1_000_000 / TOTP_STEP_SECONDS;
    [step - 1, step, step + 1]
        .iter()
        .any(|s| totp_code(secret, *s) == one_time_password)
}

/// Compute the code a client authenticator would show at `now`.
///
/// Exposed for tests and for the enrollment tooling; the server never
/// calls it on the request path.
pub fn compute_one_time_password(secret: &[u8], now: Timestamp) -> String {
    totp_code(secret, now.as_us() / 1_000_000 / TOTP_STEP_SECONDS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_is_six_digits_and_step_stable() {
        let secret = [7u8; 32];
        let now = Timestamp::from_rfc3339("2024-01-01T00:00:10Z").unwrap();
        let code = compute_one_time_password(&secret, now);
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
        // Same 30-second step, same code
        let near = Timestamp::from_rfc3339("2024-01-01T00:00:20Z").unwrap();
        assert_eq!(compute_one_time_password(&secret, near), code);
    }

    #[test]
    fn verify_tolerates_one_step_of_skew() {
        let secret = [9u8; 32];
        let now = Timestamp::from_rfc3339("2024-01-01T00:01:00Z").unwrap();
        let previous_step = Timestamp::from_rfc3339("2024-01-01T00:00:40Z").unwrap();
        let code = compute_one_time_password(&secret, previous_step);
        assert!(totp_verify(&secret, &code, now));
        let stale = Timestamp::from_rfc3339("2023-12-31T00:00:00Z").unwrap();
        let old_code = compute_one_time_password(&secret, stale);
        assert!(!totp_verify(&secret, &old_code, now) || old_code == code);
    }
}
