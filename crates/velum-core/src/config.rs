//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

use crate::types::ActiveUsersLimit;

/// Default cap on a vlob blob, in bytes.
pub const DEFAULT_MAX_BLOB_SIZE: usize = 1024 * 1024;

/// Default cap on a block payload, in bytes.
pub const DEFAULT_MAX_BLOCK_SIZE: usize = 4 * 1024 * 1024;

/// Default archiving floor for new organizations (30 days).
pub const DEFAULT_MINIMUM_ARCHIVING_PERIOD: Duration = Duration::from_secs(30 * 24 * 3600);

/// Static configuration of a server process.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address of the HTTP listener.
    pub bind_addr: SocketAddr,
    /// Bearer token protecting the administration REST surface.
    pub administration_token: String,
    /// Create unknown organizations on the fly on anonymous POST.
    pub organization_spontaneous_bootstrap: bool,
    /// Default outsider policy for new organizations.
    pub organization_initial_user_profile_outsider_allowed: bool,
    /// Default active-user cap for new organizations.
    pub organization_initial_active_users_limit: ActiveUsersLimit,
    /// Default archiving floor for new organizations.
    pub organization_initial_minimum_archiving_period: Duration,
    /// Hard cap on a vlob blob.
    pub max_blob_size: usize,
    /// Hard cap on a block payload.
    pub max_block_size: usize,
    /// Page size of `vlob_poll_changes` responses.
    pub poll_changes_page_size: usize,
    /// Invitation emails per hour and recipient; 0 disables limiting.
    pub email_rate_limit_max_per_hour: u32,
    /// Wrong one-time-password attempts before TOTP throttling starts.
    pub totp_max_failures: u32,
    /// Base delay of the exponential TOTP throttle.
    pub totp_throttle_base_delay: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: ([127, 0, 0, 1], 6770).into(),
            administration_token: String::new(),
            organization_spontaneous_bootstrap: false,
            organization_initial_user_profile_outsider_allowed: true,
            organization_initial_active_users_limit: ActiveUsersLimit::NoLimit,
            organization_initial_minimum_archiving_period: DEFAULT_MINIMUM_ARCHIVING_PERIOD,
            max_blob_size: DEFAULT_MAX_BLOB_SIZE,
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
            poll_changes_page_size: 1000,
            email_rate_limit_max_per_hour: 3,
            totp_max_failures: 5,
            totp_throttle_base_delay: Duration::from_secs(30),
        }
    }
}
