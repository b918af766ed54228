//! Wire protocol: version negotiation and per-family command enums.
//!
//! Commands and replies travel as MessagePack. A request is an enum
//! tagged by its `cmd` field; a reply is a per-command enum tagged by
//! `status`, so every enumerated refusal of the engine surfaces as a
//! regular reply variant rather than an HTTP failure.

pub mod anonymous;
pub mod authenticated;
pub mod invited;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A protocol version as negotiated at the RPC edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
}

impl ApiVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Failed parse of an `Api-Version` header.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid api version")]
pub struct InvalidApiVersion;

impl FromStr for ApiVersion {
    type Err = InvalidApiVersion;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (major, minor) = raw.split_once('.').ok_or(InvalidApiVersion)?;
        Ok(Self {
            major: major.parse().map_err(|_| InvalidApiVersion)?,
            minor: minor.parse().map_err(|_| InvalidApiVersion)?,
        })
    }
}

/// Versions this server speaks, one entry per supported major carrying
/// the highest minor implemented for it.
pub const SUPPORTED_API_VERSIONS: &[ApiVersion] = &[ApiVersion::new(4, 1)];

/// Settle the version for a handshake: the client's major must be
/// supported, and the settled minor is the highest both sides speak.
pub fn settle_api_version(client: ApiVersion) -> Option<ApiVersion> {
    SUPPORTED_API_VERSIONS
        .iter()
        .find(|server| server.major == client.major)
        .map(|server| ApiVersion::new(client.major, client.minor.min(server.minor)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_round_trip() {
        let version: ApiVersion = "4.1".parse().unwrap();
        assert_eq!(version, ApiVersion::new(4, 1));
        assert_eq!(version.to_string(), "4.1");
        assert!("4".parse::<ApiVersion>().is_err());
        assert!("a.b".parse::<ApiVersion>().is_err());
    }

    #[test]
    fn settles_to_lowest_common_minor() {
        assert_eq!(
            settle_api_version(ApiVersion::new(4, 7)),
            Some(ApiVersion::new(4, 1))
        );
        assert_eq!(
            settle_api_version(ApiVersion::new(4, 0)),
            Some(ApiVersion::new(4, 0))
        );
        assert_eq!(settle_api_version(ApiVersion::new(3, 0)), None);
    }

    proptest::proptest! {
        #[test]
        fn display_parse_round_trip(major in 0u32..1000, minor in 0u32..1000) {
            let version = ApiVersion::new(major, minor);
            let parsed: ApiVersion = version.to_string().parse().unwrap();
            proptest::prop_assert_eq!(parsed, version);
        }

        #[test]
        fn settled_version_is_never_above_either_side(major in 0u32..8, minor in 0u32..8) {
            if let Some(settled) = settle_api_version(ApiVersion::new(major, minor)) {
                proptest::prop_assert_eq!(settled.major, major);
                proptest::prop_assert!(settled.minor <= minor);
                let server = SUPPORTED_API_VERSIONS
                    .iter()
                    .find(|server| server.major == major)
                    .unwrap();
                proptest::prop_assert!(settled.minor <= server.minor);
            }
        }
    }
}
