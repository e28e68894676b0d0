//! Credentials supplied by the application's auth listener.

use zeroize::Zeroizing;

use super::certificate::Certificate;

/// Bits of the `mask` argument of a credential request.
pub mod cred {
    pub const PASSWORD: u16 = 0x0001;
    pub const USER_NAME: u16 = 0x0002;
    pub const CERT_CHAIN: u16 = 0x0004;
    pub const PRIVATE_KEY: u16 = 0x0008;
    pub const LOGON_ENTRY: u16 = 0x0010;
    pub const EXPIRATION: u16 = 0x0020;
    /// Request a fresh password (SRP_KEYX one-time passwords).
    pub const NEW_PASSWORD: u16 = 0x1001;
    pub const ONE_TIME_PWD: u16 = 0x2001;
}

/// Whatever the listener chose to supply. Unset fields stay `None`.
#[derive(Clone, Default)]
pub struct Credentials {
    pub password: Option<Zeroizing<String>>,
    pub user_name: Option<String>,
    /// Signing key bytes for the ECDSA suite.
    pub private_key: Option<Zeroizing<Vec<u8>>>,
    /// Leaf first.
    pub cert_chain: Option<Vec<Certificate>>,
    /// Precomputed SRP verifier, hex encoded as `<salt>:<verifier>`.
    pub logon_entry: Option<String>,
    /// Lifetime in seconds of the master secret these credentials establish.
    pub expiration: Option<u32>,
}

impl Credentials {
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(Zeroizing::new(password.into()));
        self
    }

    #[must_use]
    pub fn with_user_name(mut self, user_name: impl Into<String>) -> Self {
        self.user_name = Some(user_name.into());
        self
    }

    #[must_use]
    pub fn with_private_key(mut self, key: Vec<u8>) -> Self {
        self.private_key = Some(Zeroizing::new(key));
        self
    }

    #[must_use]
    pub fn with_cert_chain(mut self, chain: Vec<Certificate>) -> Self {
        self.cert_chain = Some(chain);
        self
    }

    #[must_use]
    pub fn with_logon_entry(mut self, entry: impl Into<String>) -> Self {
        self.logon_entry = Some(entry.into());
        self
    }

    #[must_use]
    pub fn with_expiration(mut self, seconds: u32) -> Self {
        self.expiration = Some(seconds);
        self
    }

    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.password.as_ref().map(|p| p.as_str())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("user_name", &self.user_name)
            .field("private_key", &self.private_key.as_ref().map(|_| "[REDACTED]"))
            .field("cert_chain", &self.cert_chain.as_ref().map(Vec::len))
            .field("expiration", &self.expiration)
            .finish()
    }
}
