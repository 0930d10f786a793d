//! Process-local counter store.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

use super::clock::{Clock, SystemClock};
use super::identity::Identity;
use super::policy::Policy;
use super::store::{Admission, CounterStore, StoreError};

/// Counter state for one identity.
#[derive(Debug, Clone)]
struct CounterState {
    /// Requests counted in the current window
    count: u64,
    /// When the current window started
    window_started_at: Instant,
    /// End of the active block, if any
    blocked_until: Option<Instant>,
}

impl CounterState {
    fn fresh(now: Instant) -> Self {
        Self {
            count: 0,
            window_started_at: now,
            blocked_until: None,
        }
    }

    /// Whether this entry can no longer influence any decision.
    fn is_stale(&self, now: Instant, policy_window_elapsed: bool) -> bool {
        let blocked = self.blocked_until.map_or(false, |until| now < until);
        !blocked && (self.count == 0 || policy_window_elapsed)
    }
}

/// In-memory counter store for single-process deployments.
///
/// Counters live in a sharded map. Each `allow` call holds the shard lock for
/// its identity across the whole check-increment-writeback sequence, so
/// requests for one identity are linearized while identities on other shards
/// proceed in parallel. Expired windows and blocks are detected lazily on the
/// next access. Idle entries are dropped by [`LocalStore::spawn_janitor`].
pub struct LocalStore<C: Clock = SystemClock> {
    counters: DashMap<Identity, CounterState>,
    clock: C,
}

impl LocalStore<SystemClock> {
    /// Create a store driven by the system clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for LocalStore<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> LocalStore<C> {
    /// Create a store driven by the given clock.
    pub fn with_clock(clock: C) -> Self {
        Self {
            counters: DashMap::new(),
            clock,
        }
    }

    /// Count one request synchronously.
    fn allow_now(&self, identity: &Identity, policy: &Policy) -> Admission {
        let now = self.clock.now();

        let mut entry = self
            .counters
            .entry(identity.clone())
            .or_insert_with(|| CounterState::fresh(now));
        let state = entry.value_mut();

        if let Some(until) = state.blocked_until {
            if now < until {
                trace!(identity = %identity, "Identity is blocked");
                return Admission::denied();
            }
            debug!(identity = %identity, "Block expired");
            state.blocked_until = None;
        }

        if state.count == 0 || now >= state.window_started_at + policy.window() {
            state.count = 0;
            state.window_started_at = now;
        }
        state.count += 1;

        if state.count > policy.limit() {
            state.count = 0;
            if !policy.block_duration().is_zero() {
                state.blocked_until = Some(now + policy.block_duration());
            }
            debug!(
                identity = %identity,
                limit = policy.limit(),
                block_duration_ms = policy.block_duration().as_millis() as u64,
                "Rate limit exceeded, blocking identity"
            );
            return Admission::denied();
        }

        let remaining = policy.limit() - state.count;
        trace!(identity = %identity, count = state.count, remaining, "Request admitted");
        Admission::allowed(remaining)
    }

    /// Drop entries that no longer carry a live window or block.
    ///
    /// Correctness never depends on this; it only reclaims memory held for
    /// identities that stopped sending requests. Returns the number removed.
    pub fn purge_expired(&self, policy: &Policy) -> usize {
        let now = self.clock.now();
        let before = self.counters.len();
        self.counters.retain(|_, state| {
            let window_elapsed = now >= state.window_started_at + policy.window();
            !state.is_stale(now, window_elapsed)
        });
        let removed = before.saturating_sub(self.counters.len());
        if removed > 0 {
            debug!(removed, "Purged expired counters");
        }
        removed
    }

    /// Periodically purge idle entries in the background.
    ///
    /// The task holds only a weak reference and exits once the store is
    /// dropped. Abort the returned handle to stop it earlier.
    pub fn spawn_janitor(store: &Arc<Self>, policy: Policy, period: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(store);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            info!(period_ms = period.as_millis() as u64, "Local store janitor started");
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    debug!("Local store dropped, janitor exiting");
                    return;
                };
                store.purge_expired(&policy);
            }
        })
    }

    /// Number of identities currently tracked.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Whether no identity is tracked.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[async_trait]
impl<C: Clock> CounterStore for LocalStore<C> {
    async fn allow(&self, identity: &Identity, policy: &Policy) -> Result<Admission, StoreError> {
        Ok(self.allow_now(identity, policy))
    }
}
