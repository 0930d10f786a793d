//! Counter store trait for abstracting local and shared implementations.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::identity::Identity;
use super::policy::Policy;

/// Errors surfaced by a counter store.
///
/// Either variant means the decision is unknown. Callers must not turn a store
/// error into an implicit allow or deny.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing service could not be reached or rejected the command.
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    /// The store did not answer within the allotted time.
    #[error("counter store timed out after {0:?}")]
    Timeout(Duration),
}

/// Outcome of a single `allow` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Requests left in the current window. Always zero when denied.
    pub remaining: u64,
}

impl Admission {
    /// An admitted request with `remaining` quota left.
    pub fn allowed(remaining: u64) -> Self {
        Self {
            allowed: true,
            remaining,
        }
    }

    /// A rejected request.
    pub fn denied() -> Self {
        Self {
            allowed: false,
            remaining: 0,
        }
    }
}

/// Trait for counter store implementations.
///
/// Both the local and the shared store run the same fixed-window algorithm:
///
/// 1. An identity with an unexpired block is denied without mutation.
/// 2. Otherwise its counter is incremented; the first increment of a fresh
///    window starts the window at `now` and sets the count to 1.
/// 3. A count above the limit establishes a block lasting the policy's block
///    duration, resets the counter, and denies the request.
/// 4. Otherwise the request is allowed with `limit - count` remaining.
///
/// Steps 1-3 are serialized per identity.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Count one request for `identity` under `policy`.
    async fn allow(&self, identity: &Identity, policy: &Policy) -> Result<Admission, StoreError>;
}
