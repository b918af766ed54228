//! Shared enumerations of the data model.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Profile of a user inside its organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserProfile {
    /// May create/revoke users and administer the organization.
    Admin,
    /// Regular user: may create realms and invite devices.
    Standard,
    /// Restricted user: receives redacted certificates, cannot create
    /// realms nor be OWNER/MANAGER of one.
    Outsider,
}

impl fmt::Display for UserProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserProfile::Admin => f.write_str("ADMIN"),
            UserProfile::Standard => f.write_str("STANDARD"),
            UserProfile::Outsider => f.write_str("OUTSIDER"),
        }
    }
}

/// Role of a user inside a realm.
///
/// Ordered from weakest to strongest so `>=` comparisons read
/// naturally in permission checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RealmRole {
    /// Read-only access.
    Reader,
    /// May write vlobs and blocks.
    Contributor,
    /// May also share/unshare with READER and CONTRIBUTOR.
    Manager,
    /// Full control, including OWNER/MANAGER grants and key rotation.
    Owner,
}

impl RealmRole {
    /// Whether this role permits writing vlobs and blocks.
    pub fn can_write(self) -> bool {
        self >= RealmRole::Contributor
    }

    /// The minimum role an author needs to grant or remove `target`.
    ///
    /// OWNER and MANAGER grants require OWNER; the rest requires
    /// MANAGER.
    pub fn required_to_manage(target: RealmRole) -> RealmRole {
        if target >= RealmRole::Manager {
            RealmRole::Owner
        } else {
            RealmRole::Manager
        }
    }
}

impl fmt::Display for RealmRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RealmRole::Owner => f.write_str("OWNER"),
            RealmRole::Manager => f.write_str("MANAGER"),
            RealmRole::Contributor => f.write_str("CONTRIBUTOR"),
            RealmRole::Reader => f.write_str("READER"),
        }
    }
}

/// Kind of an invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvitationType {
    /// A new human joins the organization.
    User,
    /// An existing user enrolls an additional device.
    Device,
}

/// Which side of a greeting attempt acted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GreeterOrClaimer {
    /// The existing member running the ceremony.
    Greeter,
    /// The joining party.
    Claimer,
}

/// Cap on the number of non-revoked users of an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<u64>", into = "Option<u64>")]
pub enum ActiveUsersLimit {
    /// At most this many active users.
    LimitedTo(u64),
    /// Unlimited.
    NoLimit,
}

impl ActiveUsersLimit {
    /// Whether `active_users` already saturates the limit.
    pub fn is_reached(&self, active_users: u64) -> bool {
        match self {
            ActiveUsersLimit::LimitedTo(limit) => active_users >= *limit,
            ActiveUsersLimit::NoLimit => false,
        }
    }
}

impl From<Option<u64>> for ActiveUsersLimit {
    fn from(value: Option<u64>) -> Self {
        match value {
            Some(limit) => ActiveUsersLimit::LimitedTo(limit),
            None => ActiveUsersLimit::NoLimit,
        }
    }
}

impl From<ActiveUsersLimit> for Option<u64> {
    fn from(value: ActiveUsersLimit) -> Self {
        match value {
            ActiveUsersLimit::LimitedTo(limit) => Some(limit),
            ActiveUsersLimit::NoLimit => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_ordering_matches_permissions() {
        assert!(RealmRole::Owner > RealmRole::Manager);
        assert!(RealmRole::Manager > RealmRole::Contributor);
        assert!(RealmRole::Contributor > RealmRole::Reader);
        assert!(RealmRole::Contributor.can_write());
        assert!(!RealmRole::Reader.can_write());
    }

    #[test]
    fn managing_owner_or_manager_requires_owner() {
        assert_eq!(RealmRole::required_to_manage(RealmRole::Owner), RealmRole::Owner);
        assert_eq!(RealmRole::required_to_manage(RealmRole::Manager), RealmRole::Owner);
        assert_eq!(
            RealmRole::required_to_manage(RealmRole::Contributor),
            RealmRole::Manager
        );
        assert_eq!(RealmRole::required_to_manage(RealmRole::Reader), RealmRole::Manager);
    }

    #[test]
    fn zero_active_users_limit_is_always_reached() {
        assert!(ActiveUsersLimit::LimitedTo(0).is_reached(0));
        assert!(!ActiveUsersLimit::NoLimit.is_reached(u64::MAX));
    }
}
