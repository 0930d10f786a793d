//! Caller identity resolution.

use std::fmt;

/// The key a rate limit is enforced against.
///
/// An identity is either an API token or a network address. Tokens take
/// priority: a request that carries a token is counted against the token, no
/// matter which address it came from. Only tokens can carry policy overrides.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// An API token presented by the caller.
    Token(String),
    /// The caller's network address.
    Address(String),
}

impl Identity {
    /// Resolve the identity for a request from an optional token and the peer
    /// address. Blank tokens are treated as absent.
    pub fn resolve(token: Option<&str>, address: &str) -> Self {
        match token.map(str::trim) {
            Some(token) if !token.is_empty() => Identity::Token(token.to_string()),
            _ => Identity::Address(address.to_string()),
        }
    }

    /// Storage key for this identity.
    ///
    /// Tokens and addresses live in separate key spaces so a token that happens
    /// to look like an address never shares a counter with that address.
    pub fn storage_key(&self) -> String {
        match self {
            Identity::Token(token) => format!("token:{}", token),
            Identity::Address(addr) => format!("addr:{}", addr),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.storage_key())
    }
}
