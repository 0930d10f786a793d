//! Administrative endpoint for installing per-token policy overrides.

use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::GateState;
use crate::error::GateError;

/// Body of `POST /config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfigRequest {
    /// The API token to override
    pub token: String,
    /// Requests allowed per window
    pub limit: u64,
    /// Block duration in milliseconds
    #[serde(default)]
    pub block_duration_ms: u64,
}

/// Install or replace the policy override for a token.
#[instrument(skip_all, fields(limit = body.limit, block_duration_ms = body.block_duration_ms))]
pub async fn update_config(
    State(state): State<GateState>,
    Json(body): Json<TokenConfigRequest>,
) -> Response {
    match state.engine.set_override(
        &body.token,
        body.limit,
        Duration::from_millis(body.block_duration_ms),
    ) {
        Ok(_) => {
            info!("Token override updated");
            (
                StatusCode::OK,
                Json(serde_json::json!({ "status": "config updated" })),
            )
                .into_response()
        }
        Err(GateError::InvalidPolicy(reason)) => {
            warn!(reason = %reason, "Rejected token override");
            (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": reason })),
            )
                .into_response()
        }
        Err(e) => {
            warn!(error = %e, "Failed to update token override");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "internal server error" })),
            )
                .into_response()
        }
    }
}
