//! Admission engine: resolves a policy and asks the counter store for a decision.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use super::identity::Identity;
use super::policy::{Policy, PolicyRegistry};
use super::store::{CounterStore, StoreError};
use crate::error::Result;

/// The outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Requests left in the current window
    pub remaining: u64,
    /// How long the caller should wait; zero when allowed
    pub retry_after: Duration,
    /// The limit that was applied
    pub limit: u64,
}

/// Coordinates the policy registry and the counter store.
///
/// The engine keeps no counter state of its own. It is cheap to share behind
/// an `Arc` and safe to call from any number of tasks.
pub struct AdmissionEngine {
    registry: PolicyRegistry,
    store: Arc<dyn CounterStore>,
}

impl AdmissionEngine {
    /// Create an engine over the given store with the given default policy.
    pub fn new(default_policy: Policy, store: Arc<dyn CounterStore>) -> Self {
        Self {
            registry: PolicyRegistry::new(default_policy),
            store,
        }
    }

    /// Check one request for `identity`.
    ///
    /// Store failures are returned as errors and never converted into a
    /// decision. Nothing is retried here.
    pub async fn check(&self, identity: &Identity) -> std::result::Result<Decision, StoreError> {
        let policy = self.registry.resolve(identity);

        trace!(
            identity = %identity,
            limit = policy.limit(),
            window_ms = policy.window().as_millis() as u64,
            "Checking admission"
        );

        let admission = self.store.allow(identity, &policy).await?;

        let retry_after = if admission.allowed {
            Duration::ZERO
        } else {
            debug!(identity = %identity, "Request denied");
            policy.block_duration()
        };

        Ok(Decision {
            allowed: admission.allowed,
            remaining: admission.remaining,
            retry_after,
            limit: policy.limit(),
        })
    }

    /// Check one request, giving up after `deadline`.
    ///
    /// The store call may still complete after the deadline passes; its
    /// result is dropped.
    pub async fn check_within(
        &self,
        identity: &Identity,
        deadline: Duration,
    ) -> std::result::Result<Decision, StoreError> {
        tokio::time::timeout(deadline, self.check(identity))
            .await
            .map_err(|_| StoreError::Timeout(deadline))?
    }

    /// Install or replace the policy override for an API token.
    ///
    /// Takes effect for checks that resolve their policy after this returns.
    pub fn set_override(&self, token: &str, limit: u64, block_duration: Duration) -> Result<Policy> {
        self.registry.set_override(token, limit, block_duration)
    }

    /// The policy registry.
    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }
}
