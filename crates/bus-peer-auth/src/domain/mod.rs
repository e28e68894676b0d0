//! # Domain Layer
//!
//! Pure authentication state: versions, suites, rights, key material,
//! certificates, per-peer state, the ECDHE key exchangers and the SASL
//! engine. Nothing here performs I/O.

pub mod certificate;
pub mod credentials;
pub mod key_blob;
pub mod key_exchanger;
pub mod peer_state;
pub mod rights;
pub mod sasl;
pub mod suites;
pub mod version;

pub use certificate::{Certificate, CertificateType};
pub use credentials::{cred, Credentials};
pub use key_blob::{KeyBlob, KeyKind, KeyRole, PeerSecretRecord, GROUP_KEY_TAG, SELF_KEY_TAG};
pub use key_exchanger::{KeyExchanger, PeerIdentity, AUTH_VERIFIER_LEN};
pub use peer_state::{AuthClaim, PeerState, PeerStateTable, Transcript};
pub use rights::{AccessRights, ALLOW_SECURE_RX, ALLOW_SECURE_TX};
pub use sasl::{InitiatorStep, ResponderStep, SaslCommand, SaslInitiator, SaslResponder};
pub use suites::{parse_mechanisms, sorted_suites, suite_mask, AuthMechanism};
