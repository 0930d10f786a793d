//! HTTP server implementation.

use std::net::SocketAddr;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tracing::{error, info};

use super::admin::update_config;
use super::gate::rate_limit_gate;
use super::GateState;
use crate::error::Result;

/// Build the application router.
///
/// `POST /config` is the admin endpoint and is not rate limited. Every other
/// route sits behind the gate.
pub fn router(state: GateState) -> Router {
    let gated = Router::new()
        .route("/", get(hello))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit_gate));

    Router::new()
        .route("/config", post(update_config))
        .merge(gated)
        .with_state(state)
}

async fn hello() -> &'static str {
    "Hello, rate limited world!"
}

/// HTTP server for the gated application.
pub struct GateServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Shared gate state
    state: GateState,
}

impl GateServer {
    /// Create a new server.
    pub fn new(addr: SocketAddr, state: GateState) -> Self {
        Self { addr, state }
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;

        info!(addr = %self.addr, "Starting HTTP server with graceful shutdown");

        axum::serve(
            listener,
            router(self.state).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            e.into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{
        Admission, AdmissionEngine, CounterStore, Identity, LocalStore, ManualClock, Policy,
        StoreError,
    };
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state(clock: ManualClock) -> GateState {
        let policy = Policy::new(2, Duration::from_secs(1), Duration::from_secs(3)).unwrap();
        let engine = AdmissionEngine::new(policy, Arc::new(LocalStore::with_clock(clock)));
        GateState::new(Arc::new(engine), Duration::from_secs(1))
    }

    fn app(state: GateState) -> Router {
        router(state).layer(MockConnectInfo(SocketAddr::from(([10, 0, 0, 1], 4321))))
    }

    async fn get_root(app: &Router, token: Option<&str>) -> Response {
        let mut builder = Request::builder().uri("/");
        if let Some(token) = token {
            builder = builder.header("API_KEY", token);
        }
        app.clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn post_config(app: &Router, body: &str) -> Response {
        app.clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/config")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_allowed_request_carries_quota_headers() {
        let app = app(test_state(ManualClock::new()));

        let response = get_root(&app, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("x-ratelimit-limit").unwrap(), "2");
        assert_eq!(response.headers().get("x-ratelimit-remaining").unwrap(), "1");
    }

    #[tokio::test]
    async fn test_exceeding_limit_returns_429_with_retry_after() {
        let app = app(test_state(ManualClock::new()));

        assert_eq!(get_root(&app, None).await.status(), StatusCode::OK);
        assert_eq!(get_root(&app, None).await.status(), StatusCode::OK);

        let response = get_root(&app, None).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("Retry-After").unwrap(), "3");

        let body = json_body(response).await;
        assert_eq!(body["error"], "rate limit exceeded");
        assert_eq!(body["limit"], 2);
    }

    #[tokio::test]
    async fn test_block_lifts_after_block_duration() {
        let clock = ManualClock::new();
        let app = app(test_state(clock.clone()));

        for _ in 0..3 {
            get_root(&app, None).await;
        }
        clock.advance(Duration::from_millis(2900));
        assert_eq!(get_root(&app, None).await.status(), StatusCode::TOO_MANY_REQUESTS);

        clock.advance(Duration::from_millis(200));
        assert_eq!(get_root(&app, None).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_token_is_limited_separately_from_address() {
        let app = app(test_state(ManualClock::new()));

        for _ in 0..3 {
            get_root(&app, None).await;
        }
        assert_eq!(get_root(&app, None).await.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(get_root(&app, Some("abc")).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_config_endpoint_installs_override() {
        let app = app(test_state(ManualClock::new()));

        let response = post_config(
            &app,
            r#"{"token":"premium","limit":10,"block_duration_ms":5000}"#,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "config updated");

        let response = get_root(&app, Some("premium")).await;
        assert_eq!(response.headers().get("x-ratelimit-limit").unwrap(), "10");
        assert_eq!(response.headers().get("x-ratelimit-remaining").unwrap(), "9");
    }

    #[tokio::test]
    async fn test_override_block_duration_sets_retry_after() {
        let app = app(test_state(ManualClock::new()));
        post_config(&app, r#"{"token":"t","limit":1,"block_duration_ms":7000}"#).await;

        assert_eq!(get_root(&app, Some("t")).await.status(), StatusCode::OK);
        let response = get_root(&app, Some("t")).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("Retry-After").unwrap(), "7");
    }

    #[tokio::test]
    async fn test_config_endpoint_rejects_invalid_policy() {
        let app = app(test_state(ManualClock::new()));

        let response = post_config(&app, r#"{"token":"premium","limit":0}"#).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = post_config(&app, r#"{"token":"","limit":3}"#).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_config_endpoint_rejects_oversized_block_duration() {
        let app = app(test_state(ManualClock::new()));

        let response = post_config(
            &app,
            r#"{"token":"t","limit":1,"block_duration_ms":18446744073709551615}"#,
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = get_root(&app, Some("t")).await;
        assert_eq!(response.headers().get("x-ratelimit-limit").unwrap(), "2");
    }

    #[tokio::test]
    async fn test_config_endpoint_rejects_malformed_json() {
        let app = app(test_state(ManualClock::new()));

        let response = post_config(&app, "{not json").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_config_endpoint_is_not_rate_limited() {
        let app = app(test_state(ManualClock::new()));

        for _ in 0..5 {
            let response = post_config(&app, r#"{"token":"x","limit":1}"#).await;
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    struct DownStore;

    #[async_trait]
    impl CounterStore for DownStore {
        async fn allow(&self, _: &Identity, _: &Policy) -> std::result::Result<Admission, StoreError> {
            Err(StoreError::Unavailable("connection reset".to_string()))
        }
    }

    #[tokio::test]
    async fn test_store_failure_returns_500() {
        let policy = Policy::new(2, Duration::from_secs(1), Duration::from_secs(3)).unwrap();
        let engine = AdmissionEngine::new(policy, Arc::new(DownStore));
        let app = app(GateState::new(Arc::new(engine), Duration::from_secs(1)));

        let response = get_root(&app, None).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get("Retry-After").is_none());
    }
}
