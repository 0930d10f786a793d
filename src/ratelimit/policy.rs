//! Rate policies and the registry that resolves them per identity.
//!
//! Every identity is governed by the default policy unless an override has been
//! installed for its token. Overrides inherit the default window and replace
//! the limit and block duration.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::info;

use super::identity::Identity;
use crate::error::{GateError, Result};

/// Longest window or block duration a policy may carry: 365 days.
///
/// Every store must be able to express these as millisecond TTLs.
pub const MAX_POLICY_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Largest limit a policy may carry, 2^53 - 1.
///
/// Counts are compared inside a Redis script whose numbers are doubles, so the
/// limit must stay exactly representable.
pub const MAX_LIMIT: u64 = (1 << 53) - 1;

/// The `{limit, window, block_duration}` tuple governing one identity.
///
/// A `Policy` can only be built through [`Policy::new`], so every value in
/// circulation has `1 <= limit <= MAX_LIMIT`, a non-zero window, and durations
/// no longer than [`MAX_POLICY_DURATION`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    limit: u64,
    window: Duration,
    block_duration: Duration,
}

impl Policy {
    /// Create a validated policy.
    pub fn new(limit: u64, window: Duration, block_duration: Duration) -> Result<Self> {
        if limit == 0 {
            return Err(GateError::InvalidPolicy("limit must be at least 1".to_string()));
        }
        if limit > MAX_LIMIT {
            return Err(GateError::InvalidPolicy(format!("limit must not exceed {}", MAX_LIMIT)));
        }
        if window.is_zero() {
            return Err(GateError::InvalidPolicy("window must be greater than zero".to_string()));
        }
        if window > MAX_POLICY_DURATION {
            return Err(GateError::InvalidPolicy(format!(
                "window must not exceed {}ms",
                MAX_POLICY_DURATION.as_millis()
            )));
        }
        if block_duration > MAX_POLICY_DURATION {
            return Err(GateError::InvalidPolicy(format!(
                "block duration must not exceed {}ms",
                MAX_POLICY_DURATION.as_millis()
            )));
        }
        Ok(Self {
            limit,
            window,
            block_duration,
        })
    }

    /// Maximum requests allowed in one window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Length of a counting window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// How long an identity stays blocked after exceeding its limit.
    pub fn block_duration(&self) -> Duration {
        self.block_duration
    }
}

/// Holds the default policy and per-token overrides.
///
/// Reads take a shared lock and copy the policy out, so a check always works
/// with one consistent snapshot. Writes replace a whole entry under the
/// exclusive lock.
#[derive(Debug)]
pub struct PolicyRegistry {
    default: Policy,
    overrides: RwLock<HashMap<String, Policy>>,
}

impl PolicyRegistry {
    /// Create a registry with no overrides.
    pub fn new(default: Policy) -> Self {
        Self {
            default,
            overrides: RwLock::new(HashMap::new()),
        }
    }

    /// The policy applied to identities without an override.
    pub fn default_policy(&self) -> Policy {
        self.default
    }

    /// Resolve the effective policy for an identity.
    pub fn resolve(&self, identity: &Identity) -> Policy {
        match identity {
            Identity::Token(token) => self
                .overrides
                .read()
                .get(token)
                .copied()
                .unwrap_or(self.default),
            Identity::Address(_) => self.default,
        }
    }

    /// Install or replace the override for a token.
    ///
    /// The override keeps the default window. Invalid values are rejected here
    /// so a bad override can never reach a check.
    pub fn set_override(&self, token: &str, limit: u64, block_duration: Duration) -> Result<Policy> {
        if token.trim().is_empty() {
            return Err(GateError::InvalidPolicy("token must not be empty".to_string()));
        }
        let policy = Policy::new(limit, self.default.window, block_duration)?;

        self.overrides.write().insert(token.to_string(), policy);

        info!(
            limit = policy.limit,
            block_duration_ms = policy.block_duration.as_millis() as u64,
            "Installed token policy override"
        );
        Ok(policy)
    }

    /// Number of installed overrides.
    pub fn override_count(&self) -> usize {
        self.overrides.read().len()
    }
}
