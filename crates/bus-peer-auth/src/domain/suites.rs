//! Authentication suites and mechanism names.
//!
//! | Mechanism             | Bit                  | Weight |
//! |-----------------------|----------------------|--------|
//! | `ANONYMOUS`           | `0x0001_0000`        | 1      |
//! | `EXTERNAL`            | `0x0002_0000`        | 2      |
//! | `ALLJOYN_ECDHE_NULL`  | `ECDHE \| 1`         | 3      |
//! | `ALLJOYN_SRP_KEYX`    | `0x0008_0000`        | 4      |
//! | `ALLJOYN_SRP_LOGON`   | `0x0010_0000`        | 5      |
//! | `ALLJOYN_ECDHE_PSK`   | `ECDHE \| 2`         | 6      |
//! | `GSSAPI`              | `0x0080_0000`        | 7      |
//! | `ALLJOYN_ECDHE_ECDSA` | `ECDHE \| 4`         | 8      |

use std::fmt;
use std::str::FromStr;

use bus_types::BusError;

pub const AUTH_SUITE_ANONYMOUS: u32 = 0x0001_0000;
pub const AUTH_SUITE_EXTERNAL: u32 = 0x0002_0000;
pub const AUTH_SUITE_SRP_KEYX: u32 = 0x0008_0000;
pub const AUTH_SUITE_SRP_LOGON: u32 = 0x0010_0000;
pub const AUTH_SUITE_ECDHE: u32 = 0x0040_0000;
pub const AUTH_SUITE_GSSAPI: u32 = 0x0080_0000;
pub const AUTH_SUITE_ECDHE_NULL: u32 = AUTH_SUITE_ECDHE | 0x01;
pub const AUTH_SUITE_ECDHE_PSK: u32 = AUTH_SUITE_ECDHE | 0x02;
pub const AUTH_SUITE_ECDHE_ECDSA: u32 = AUTH_SUITE_ECDHE | 0x04;

/// A named authentication mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMechanism {
    Anonymous,
    External,
    EcdheNull,
    SrpKeyx,
    SrpLogon,
    EcdhePsk,
    Gssapi,
    EcdheEcdsa,
}

impl AuthMechanism {
    pub const ALL: [AuthMechanism; 8] = [
        Self::Anonymous,
        Self::External,
        Self::EcdheNull,
        Self::SrpKeyx,
        Self::SrpLogon,
        Self::EcdhePsk,
        Self::Gssapi,
        Self::EcdheEcdsa,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Anonymous => "ANONYMOUS",
            Self::External => "EXTERNAL",
            Self::EcdheNull => "ALLJOYN_ECDHE_NULL",
            Self::SrpKeyx => "ALLJOYN_SRP_KEYX",
            Self::SrpLogon => "ALLJOYN_SRP_LOGON",
            Self::EcdhePsk => "ALLJOYN_ECDHE_PSK",
            Self::Gssapi => "GSSAPI",
            Self::EcdheEcdsa => "ALLJOYN_ECDHE_ECDSA",
        }
    }

    /// Precedence weight; offers list heavier suites first.
    #[must_use]
    pub const fn weight(self) -> u8 {
        match self {
            Self::Anonymous => 1,
            Self::External => 2,
            Self::EcdheNull => 3,
            Self::SrpKeyx => 4,
            Self::SrpLogon => 5,
            Self::EcdhePsk => 6,
            Self::Gssapi => 7,
            Self::EcdheEcdsa => 8,
        }
    }

    #[must_use]
    pub const fn suite(self) -> u32 {
        match self {
            Self::Anonymous => AUTH_SUITE_ANONYMOUS,
            Self::External => AUTH_SUITE_EXTERNAL,
            Self::EcdheNull => AUTH_SUITE_ECDHE_NULL,
            Self::SrpKeyx => AUTH_SUITE_SRP_KEYX,
            Self::SrpLogon => AUTH_SUITE_SRP_LOGON,
            Self::EcdhePsk => AUTH_SUITE_ECDHE_PSK,
            Self::Gssapi => AUTH_SUITE_GSSAPI,
            Self::EcdheEcdsa => AUTH_SUITE_ECDHE_ECDSA,
        }
    }

    #[must_use]
    pub fn from_suite(suite: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.suite() == suite)
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }

    /// Mechanisms negotiated through a key exchanger rather than SASL.
    #[must_use]
    pub const fn is_ecdhe(self) -> bool {
        matches!(self, Self::EcdheNull | Self::EcdhePsk | Self::EcdheEcdsa)
    }
}

impl fmt::Display for AuthMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AuthMechanism {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or(BusError::NoAuthenticationMechanism)
    }
}

/// Parse a space separated mechanism list, dropping unknown names.
#[must_use]
pub fn parse_mechanisms(list: &str) -> Vec<AuthMechanism> {
    list.split_whitespace()
        .filter_map(AuthMechanism::from_name)
        .collect()
}

/// Suites for `mechanisms`, heaviest first, without duplicates.
#[must_use]
pub fn sorted_suites(mechanisms: &[AuthMechanism]) -> Vec<u32> {
    let mut sorted: Vec<AuthMechanism> = mechanisms.to_vec();
    sorted.sort_by(|a, b| b.weight().cmp(&a.weight()));
    sorted.dedup();
    sorted.into_iter().map(AuthMechanism::suite).collect()
}

/// Bitwise union of every suite in `suites`.
#[must_use]
pub fn suite_mask(suites: &[u32]) -> u32 {
    suites.iter().fold(0, |acc, s| acc | s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorted_by_weight_descending() {
        let mechs = parse_mechanisms("ANONYMOUS ALLJOYN_ECDHE_ECDSA ALLJOYN_SRP_KEYX ALLJOYN_ECDHE_NULL");
        assert_eq!(
            sorted_suites(&mechs),
            vec![
                AUTH_SUITE_ECDHE_ECDSA,
                AUTH_SUITE_SRP_KEYX,
                AUTH_SUITE_ECDHE_NULL,
                AUTH_SUITE_ANONYMOUS
            ]
        );
    }

    #[test]
    fn test_unknown_names_are_dropped() {
        assert_eq!(parse_mechanisms("BOGUS  GSSAPI"), vec![AuthMechanism::Gssapi]);
    }

    #[test]
    fn test_ecdhe_variants_share_bit() {
        for mech in [AuthMechanism::EcdheNull, AuthMechanism::EcdhePsk, AuthMechanism::EcdheEcdsa] {
            assert_eq!(mech.suite() & AUTH_SUITE_ECDHE, AUTH_SUITE_ECDHE);
            assert!(mech.is_ecdhe());
        }
        assert_eq!(AuthMechanism::SrpKeyx.suite() & AUTH_SUITE_ECDHE, 0);
    }

    #[test]
    fn test_name_round_trip() {
        for mech in AuthMechanism::ALL {
            assert_eq!(mech.name().parse::<AuthMechanism>().unwrap(), mech);
            assert_eq!(AuthMechanism::from_suite(mech.suite()), Some(mech));
        }
    }
}
