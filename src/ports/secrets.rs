use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// An API key that is wiped from memory when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Source of provider credentials.
pub trait SecretProvider: Send + Sync {
    /// Look up a secret by name. Blank values count as missing.
    fn secret(&self, name: &str) -> Option<ApiKey>;
}
