//! Authentication version negotiation.
//!
//! A composite version packs the authentication protocol version in the
//! upper 16 bits and the key generation version in the low byte.

/// Lowest authentication version this node speaks.
pub const MIN_AUTH_VERSION: u16 = 1;
/// Highest authentication version this node speaks.
pub const MAX_AUTH_VERSION: u16 = 4;
pub const MIN_KEYGEN_VERSION: u8 = 0;
pub const MAX_KEYGEN_VERSION: u8 = 1;

/// Version proposed in `ExchangeGuids`.
pub const PREFERRED_AUTH_VERSION: u32 = ((MAX_AUTH_VERSION as u32) << 16) | MIN_KEYGEN_VERSION as u32;

/// Peers at or below this version cannot be offered ECDHE_ECDSA.
pub const NON_ECDSA_X509_VERSION: u16 = 2;

/// First version that exchanges manifests and membership certificates.
pub const CAPABLE_MEMBERSHIP_CERT_VERSION: u16 = 4;

/// First version that hashes whole messages into the transcript.
pub const CONVERSATION_V4: u16 = 4;

/// Oldest version that understands key exchangers at all.
pub const LEGACY_AUTH_VERSION: u16 = 1;

#[must_use]
pub const fn compose(auth: u16, keygen: u8) -> u32 {
    ((auth as u32) << 16) | keygen as u32
}

#[must_use]
pub const fn auth_version(version: u32) -> u16 {
    (version >> 16) as u16
}

#[must_use]
pub const fn keygen_version(version: u32) -> u8 {
    (version & 0xFF) as u8
}

/// True when `version` is one this node can run.
#[must_use]
pub fn is_compatible(version: u32) -> bool {
    let auth = auth_version(version);
    let keygen = keygen_version(version);
    (MIN_AUTH_VERSION..=MAX_AUTH_VERSION).contains(&auth)
        && (MIN_KEYGEN_VERSION..=MAX_KEYGEN_VERSION).contains(&keygen)
        && version & 0xFF00 == 0
}

/// The lower of two versions: auth first, keygen on a tie.
///
/// Both peers evaluate this independently and land on the same answer.
#[must_use]
pub fn lower_version(a: u32, b: u32) -> u32 {
    let (auth_a, auth_b) = (auth_version(a), auth_version(b));
    if auth_a != auth_b {
        return if auth_a < auth_b { a } else { b };
    }
    if keygen_version(b) < keygen_version(a) {
        b
    } else {
        a
    }
}

/// Whether suite negotiation uses typed key exchangers rather than SASL.
#[must_use]
pub fn uses_key_exchanger(version: u32, configured_suites: u32) -> bool {
    auth_version(version) >= 2 && configured_suites & super::suites::AUTH_SUITE_ECDHE != 0
}

#[must_use]
pub fn is_membership_capable(version: u32) -> bool {
    auth_version(version) >= CAPABLE_MEMBERSHIP_CERT_VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preferred_is_compatible() {
        assert!(is_compatible(PREFERRED_AUTH_VERSION));
        assert_eq!(auth_version(PREFERRED_AUTH_VERSION), 4);
        assert_eq!(keygen_version(PREFERRED_AUTH_VERSION), 0);
    }

    #[test]
    fn test_incompatible_versions() {
        assert!(!is_compatible(compose(0, 0)));
        assert!(!is_compatible(compose(5, 0)));
        assert!(!is_compatible(compose(4, 2)));
        assert!(!is_compatible(compose(4, 0) | 0x0100));
    }

    #[test]
    fn test_lower_version_is_symmetric() {
        let versions = [compose(1, 0), compose(2, 1), compose(4, 0), compose(4, 1), compose(3, 0)];
        for a in versions {
            for b in versions {
                assert_eq!(lower_version(a, b), lower_version(b, a), "{a:#x} vs {b:#x}");
            }
        }
    }

    #[test]
    fn test_lower_version_prefers_auth_then_keygen() {
        assert_eq!(lower_version(compose(4, 0), compose(3, 1)), compose(3, 1));
        assert_eq!(lower_version(compose(4, 1), compose(4, 0)), compose(4, 0));
    }

    #[test]
    fn test_membership_capability_threshold() {
        assert!(is_membership_capable(compose(4, 0)));
        assert!(!is_membership_capable(compose(3, 0)));
    }
}
