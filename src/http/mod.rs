//! HTTP surface: the request gate, the admin endpoint and the server.

mod admin;
mod gate;
mod server;

use std::sync::Arc;
use std::time::Duration;

use crate::ratelimit::AdmissionEngine;

pub use admin::{update_config, TokenConfigRequest};
pub use gate::{rate_limit_gate, API_KEY, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING};
pub use server::{router, GateServer};

/// State shared by the gate middleware and the admin handler.
#[derive(Clone)]
pub struct GateState {
    /// The admission engine
    pub engine: Arc<AdmissionEngine>,
    /// Deadline for one admission check
    pub request_timeout: Duration,
}

impl GateState {
    /// Create gate state.
    pub fn new(engine: Arc<AdmissionEngine>, request_timeout: Duration) -> Self {
        Self {
            engine,
            request_timeout,
        }
    }
}
