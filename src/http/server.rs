//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::handlers::{self, HttpOptions, ServiceState};
use crate::error::{Result, TurnstileError};
use crate::ratelimit::AdmissionBackend;

/// Build the router serving the rate-limited resource.
pub fn router<A: AdmissionBackend + 'static>(backend: Arc<A>, options: HttpOptions) -> Router {
    let state = Arc::new(ServiceState { backend, options });

    Router::new()
        .route("/api/resource", get(handlers::resource::<A>))
        .route("/api/rate-limit/status", get(handlers::status::<A>))
        .route("/health", get(handlers::health))
        .with_state(state)
}

/// HTTP server for the admission controller.
pub struct HttpServer<A: AdmissionBackend + 'static> {
    /// Address to bind to
    addr: SocketAddr,
    /// The admission backend
    backend: Arc<A>,
    /// Request handling options
    options: HttpOptions,
}

impl<A: AdmissionBackend + 'static> HttpServer<A> {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, backend: Arc<A>, options: HttpOptions) -> Self {
        Self {
            addr,
            backend,
            options,
        }
    }

    /// Start the HTTP server.
    ///
    /// This method will block until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            TurnstileError::Io(e)
        })?;

        info!(
            addr = %self.addr,
            limit = self.backend.policy().limit(),
            period_secs = self.backend.policy().period_secs(),
            "Starting HTTP server"
        );

        axum::serve(listener, router(self.backend, self.options))
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                TurnstileError::Io(e)
            })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::config::FailurePolicy;
    use crate::ratelimit::{
        AnonymousPolicy, Decision, Identity, RateLimitPolicy, RateLimitStatus, RateLimiter,
    };
    use crate::store::test_support::UnavailableStore;
    use crate::store::InMemoryCounterStore;

    fn memory_router(limit: u64, options: HttpOptions) -> Router {
        let limiter = RateLimiter::new(
            Arc::new(InMemoryCounterStore::new()),
            RateLimitPolicy::new(limit, 10).unwrap(),
        );
        router(Arc::new(limiter), options)
    }

    async fn get(app: &Router, uri: &str) -> Response {
        app.clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn header(response: &Response, name: &str) -> Option<String> {
        response
            .headers()
            .get(name)
            .map(|value| value.to_str().unwrap().to_string())
    }

    /// A backend whose store never answers.
    struct StalledBackend;

    #[async_trait]
    impl AdmissionBackend for StalledBackend {
        async fn evaluate(&self, _identity: &Identity) -> crate::error::Result<Decision> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Decision::allow(0, 0))
        }

        async fn status(&self, _identity: &Identity) -> crate::error::Result<RateLimitStatus> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(RateLimitStatus {
                remaining: 0,
                time_left_secs: 0,
            })
        }

        fn policy(&self) -> RateLimitPolicy {
            RateLimitPolicy::default()
        }

        fn name(&self) -> &'static str {
            "stalled"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_allowed_then_rate_limited() {
        let app = memory_router(4, HttpOptions::default());

        for expected in [3, 2, 1, 0] {
            let response = get(&app, "/api/resource?user_id=u1").await;
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(header(&response, "x-ratelimit-limit").as_deref(), Some("4"));
            assert!(header(&response, "retry-after").is_none());

            let body = json_body(response).await;
            assert_eq!(body["message"], "Request successful");
            assert_eq!(body["remaining_requests"], expected);
            assert_eq!(body["time_left"], 10);
        }

        let response = get(&app, "/api/resource?user_id=u1").await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(header(&response, "retry-after").as_deref(), Some("10"));
        assert_eq!(header(&response, "x-ratelimit-remaining").as_deref(), Some("0"));

        let body = json_body(response).await;
        assert_eq!(body["message"], "Rate limit exceeded");
        assert_eq!(body["remaining_requests"], 0);
        assert_eq!(body["time_left"], 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_identity_rejected_by_default() {
        let app = memory_router(4, HttpOptions::default());

        let response = get(&app, "/api/resource").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = get(&app, "/api/resource?user_id=").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_identity_shares_anonymous_bucket() {
        let options = HttpOptions {
            anonymous: AnonymousPolicy::Shared,
            ..HttpOptions::default()
        };
        let app = memory_router(2, options);

        assert_eq!(get(&app, "/api/resource").await.status(), StatusCode::OK);
        assert_eq!(get(&app, "/api/resource?user_id=").await.status(), StatusCode::OK);
        assert_eq!(
            get(&app, "/api/resource").await.status(),
            StatusCode::TOO_MANY_REQUESTS
        );

        // Identified callers keep their own quota.
        assert_eq!(get(&app, "/api/resource?user_id=u1").await.status(), StatusCode::OK);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_endpoint_does_not_bill() {
        let app = memory_router(4, HttpOptions::default());

        get(&app, "/api/resource?user_id=u1").await;

        for _ in 0..2 {
            let response = get(&app, "/api/rate-limit/status?user_id=u1").await;
            assert_eq!(response.status(), StatusCode::OK);
            let body = json_body(response).await;
            assert_eq!(body["remaining_requests"], 3);
            assert_eq!(body["time_left"], 10);
        }

        let body = json_body(get(&app, "/api/resource?user_id=u1").await).await;
        assert_eq!(body["remaining_requests"], 2);
    }

    #[tokio::test]
    async fn test_store_down_fails_closed() {
        let limiter = RateLimiter::new(Arc::new(UnavailableStore), RateLimitPolicy::default());
        let app = router(Arc::new(limiter), HttpOptions::default());

        let response = get(&app, "/api/resource?user_id=u1").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(header(&response, "retry-after").as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_store_down_fails_open() {
        let limiter = RateLimiter::new(Arc::new(UnavailableStore), RateLimitPolicy::default());
        let options = HttpOptions {
            failure_policy: FailurePolicy::FailOpen,
            ..HttpOptions::default()
        };
        let app = router(Arc::new(limiter), options);

        let response = get(&app, "/api/resource?user_id=u1").await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["message"], "Request successful");
        assert!(body["remaining_requests"].is_null());
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_timeout_treated_as_unavailable() {
        let app = router(Arc::new(StalledBackend), HttpOptions::default());

        let response = get(&app, "/api/resource?user_id=u1").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = get(&app, "/api/rate-limit/status?user_id=u1").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_health() {
        let app = memory_router(4, HttpOptions::default());

        let response = get(&app, "/health").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[test]
    fn test_server_creation() {
        let addr: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let limiter = RateLimiter::new(
            Arc::new(InMemoryCounterStore::new()),
            RateLimitPolicy::default(),
        );
        let _server = HttpServer::new(addr, Arc::new(limiter), HttpOptions::default());
    }
}
