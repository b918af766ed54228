//! Email delivery and its rate limiter.
//!
//! Delivery failures never abort the operation that wanted the email;
//! the caller reports the outcome in its response and moves on.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;

use async_trait::async_trait;

use velum_core::id::EmailAddress;
use velum_core::time::Timestamp;

/// Non-fatal delivery failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendEmailError {
    /// The server has no usable email configuration.
    #[error("email backend not configured")]
    BadConfig,
    /// The destination address was refused.
    #[error("recipient refused")]
    RecipientRefused,
    /// The relay is temporarily unreachable.
    #[error("email server unavailable")]
    ServerUnavailable,
}

/// Outbound email backend.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver one message.
    async fn send(
        &self,
        recipient: &EmailAddress,
        subject: &str,
        body_html: &str,
    ) -> Result<(), SendEmailError>;
}

/// Records outbound mail instead of delivering it. Tests and
/// single-node deployments without an SMTP relay.
#[derive(Default)]
pub struct MemoryEmailSender {
    sent: Mutex<Vec<(EmailAddress, String)>>,
}

impl MemoryEmailSender {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// `(recipient, subject)` of every recorded message.
    pub fn sent(&self) -> Vec<(EmailAddress, String)> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl EmailSender for MemoryEmailSender {
    async fn send(
        &self,
        recipient: &EmailAddress,
        subject: &str,
        _body_html: &str,
    ) -> Result<(), SendEmailError> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((recipient.clone(), subject.to_owned()));
        Ok(())
    }
}

/// Sliding-window limiter on invitation emails, keyed by both source
/// ip and recipient.
pub struct EmailRateLimiter {
    max_per_hour: u32,
    sends: Mutex<HashMap<RateKey, Vec<Timestamp>>>,
}

#[derive(PartialEq, Eq, Hash)]
enum RateKey {
    Ip(IpAddr),
    Recipient(EmailAddress),
}

impl EmailRateLimiter {
    /// `max_per_hour = 0` disables limiting entirely.
    pub fn new(max_per_hour: u32) -> Self {
        Self {
            max_per_hour,
            sends: Mutex::new(HashMap::new()),
        }
    }

    /// Declare the intent to send an email now. Returns `None` when
    /// sending is allowed (and counts it), or the instant at which the
    /// caller may try again.
    pub fn register_send_intent(
        &self,
        now: Timestamp,
        client_ip: Option<IpAddr>,
        recipient: &EmailAddress,
    ) -> Option<Timestamp> {
        if self.max_per_hour == 0 {
            return None;
        }
        let window = std::time::Duration::from_secs(3600);
        let cutoff = now - window;

        let mut sends = self.sends.lock().unwrap_or_else(|e| e.into_inner());
        let mut keys = vec![RateKey::Recipient(recipient.clone())];
        if let Some(ip) = client_ip {
            keys.push(RateKey::Ip(ip));
        }

        let mut wait_until: Option<Timestamp> = None;
        for key in &keys {
            if let Some(history) = sends.get_mut(key) {
                history.retain(|t| *t > cutoff);
                if history.len() >= self.max_per_hour as usize {
                    // Oldest send in the window decides when a slot frees up
                    if let Some(oldest) = history.iter().min() {
                        let candidate = *oldest + window;
                        wait_until = Some(wait_until.map_or(candidate, |w| w.max(candidate)));
                    }
                }
            }
        }
        if wait_until.is_some() {
            return wait_until;
        }
        for key in keys {
            sends.entry(key).or_default().push(now);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient() -> EmailAddress {
        "claimer@example.com".parse().unwrap()
    }

    #[test]
    fn limiter_counts_per_recipient() {
        let limiter = EmailRateLimiter::new(2);
        let t0 = Timestamp::from_rfc3339("2024-01-01T00:00:00Z").unwrap();
        assert_eq!(limiter.register_send_intent(t0, None, &recipient()), None);
        assert_eq!(limiter.register_send_intent(t0, None, &recipient()), None);
        let wait = limiter
            .register_send_intent(t0, None, &recipient())
            .unwrap();
        assert!(wait > t0);
        // A different recipient is unaffected
        let other: EmailAddress = "other@example.com".parse().unwrap();
        assert_eq!(limiter.register_send_intent(t0, None, &other), None);
    }

    #[test]
    fn limiter_window_slides() {
        let limiter = EmailRateLimiter::new(1);
        let t0 = Timestamp::from_rfc3339("2024-01-01T00:00:00Z").unwrap();
        assert_eq!(limiter.register_send_intent(t0, None, &recipient()), None);
        assert!(limiter
            .register_send_intent(t0, None, &recipient())
            .is_some());
        let t1 = t0 + std::time::Duration::from_secs(3601);
        assert_eq!(limiter.register_send_intent(t1, None, &recipient()), None);
    }

    #[test]
    fn zero_disables_limiting() {
        let limiter = EmailRateLimiter::new(0);
        let t0 = Timestamp::now();
        for _ in 0..100 {
            assert_eq!(limiter.register_send_intent(t0, None, &recipient()), None);
        }
    }

    #[tokio::test]
    async fn memory_sender_records() {
        let sender = MemoryEmailSender::new();
        sender
            .send(&recipient(), "You are invited", "<p>hi</p>")
            .await
            .unwrap();
        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "You are invited");
    }
}
