//! HTTP handlers translating admission decisions into responses.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::header::{HeaderName, HeaderValue, RETRY_AFTER};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, warn};

use crate::config::{FailurePolicy, TurnstileConfig};
use crate::error::{Result, TurnstileError};
use crate::ratelimit::{AdmissionBackend, AnonymousPolicy, Decision, Identity};

static X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
static X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
static X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Seconds a client is asked to wait when the store is down and we fail closed.
const UNAVAILABLE_RETRY_AFTER_SECS: u64 = 1;

/// Request handling options taken from the server configuration.
#[derive(Debug, Clone, Copy)]
pub struct HttpOptions {
    /// Handling of requests without an identity
    pub anonymous: AnonymousPolicy,
    /// Behaviour when the counter store is unavailable
    pub failure_policy: FailurePolicy,
    /// Upper bound on one admission check
    pub store_timeout: Duration,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self::from(&TurnstileConfig::default())
    }
}

impl From<&TurnstileConfig> for HttpOptions {
    fn from(config: &TurnstileConfig) -> Self {
        Self {
            anonymous: config.rate_limiting.anonymous,
            failure_policy: config.server.failure_policy,
            store_timeout: config.server.store_timeout(),
        }
    }
}

/// Shared state for the HTTP handlers.
pub struct ServiceState<A: AdmissionBackend> {
    /// The admission backend
    pub backend: Arc<A>,
    /// Request handling options
    pub options: HttpOptions,
}

/// Query parameters identifying the caller.
#[derive(Debug, Deserialize)]
pub struct IdentityQuery {
    /// Caller identity
    pub user_id: Option<String>,
}

/// JSON body returned by the rate-limited resource.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResourceBody {
    pub message: String,
    pub remaining_requests: Option<u64>,
    pub time_left: Option<u64>,
}

/// JSON body returned by the status endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusBody {
    pub remaining_requests: u64,
    pub time_left: u64,
}

/// `GET /api/resource`: count the request and admit or reject it.
pub async fn resource<A: AdmissionBackend + 'static>(
    State(state): State<Arc<ServiceState<A>>>,
    Query(query): Query<IdentityQuery>,
) -> Response {
    let identity = match Identity::resolve(query.user_id.as_deref(), state.options.anonymous) {
        Ok(identity) => identity,
        Err(err) => return bad_request(err),
    };

    let result = bounded(state.options.store_timeout, state.backend.evaluate(&identity)).await;

    match result {
        Ok(decision) => {
            debug!(
                identity = %identity,
                allowed = decision.allowed,
                remaining = decision.remaining,
                "Admission decision made"
            );
            decision_response(state.backend.policy().limit(), decision)
        }
        Err(TurnstileError::StoreUnavailable(reason)) => {
            error!(
                identity = %identity,
                store = state.backend.name(),
                reason = %reason,
                "Counter store unavailable"
            );
            store_unavailable(state.options.failure_policy, &identity)
        }
        Err(err) => {
            error!(
                identity = %identity,
                store = state.backend.name(),
                error = %err,
                "Admission check failed"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "message": "Internal Server Error" })),
            )
                .into_response()
        }
    }
}

/// `GET /api/rate-limit/status`: report quota without counting a request.
pub async fn status<A: AdmissionBackend + 'static>(
    State(state): State<Arc<ServiceState<A>>>,
    Query(query): Query<IdentityQuery>,
) -> Response {
    let identity = match Identity::resolve(query.user_id.as_deref(), state.options.anonymous) {
        Ok(identity) => identity,
        Err(err) => return bad_request(err),
    };

    match bounded(state.options.store_timeout, state.backend.status(&identity)).await {
        Ok(status) => Json(StatusBody {
            remaining_requests: status.remaining,
            time_left: status.time_left_secs,
        })
        .into_response(),
        Err(err) => {
            error!(
                identity = %identity,
                store = state.backend.name(),
                error = %err,
                "Status lookup failed"
            );
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "message": "Rate limit status unavailable" })),
            )
                .into_response()
        }
    }
}

/// `GET /health`
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Run a store-backed call, treating an elapsed timeout as store unavailability.
async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(TurnstileError::StoreUnavailable(format!(
            "no reply within {}ms",
            timeout.as_millis()
        ))),
    }
}

fn decision_response(limit: u64, decision: Decision) -> Response {
    let (status, body) = if decision.allowed {
        (
            StatusCode::OK,
            ResourceBody {
                message: "Request successful".to_string(),
                remaining_requests: Some(decision.remaining),
                time_left: Some(decision.time_left_secs),
            },
        )
    } else {
        (
            StatusCode::TOO_MANY_REQUESTS,
            ResourceBody {
                message: "Rate limit exceeded".to_string(),
                remaining_requests: Some(0),
                time_left: Some(decision.retry_after_secs),
            },
        )
    };

    let mut response = (status, Json(body)).into_response();
    let headers = response.headers_mut();
    headers.insert(X_RATELIMIT_LIMIT.clone(), HeaderValue::from(limit));
    headers.insert(X_RATELIMIT_REMAINING.clone(), HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET.clone(), HeaderValue::from(decision.time_left_secs));
    if !decision.allowed {
        headers.insert(RETRY_AFTER, HeaderValue::from(decision.retry_after_secs));
    }
    response
}

fn store_unavailable(policy: FailurePolicy, identity: &Identity) -> Response {
    match policy {
        FailurePolicy::FailOpen => {
            warn!(identity = %identity, "Admitting request without a rate limit check");
            Json(ResourceBody {
                message: "Request successful".to_string(),
                remaining_requests: None,
                time_left: None,
            })
            .into_response()
        }
        FailurePolicy::FailClosed => {
            let mut response = (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "message": "Rate limiting temporarily unavailable" })),
            )
                .into_response();
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(UNAVAILABLE_RETRY_AFTER_SECS));
            response
        }
    }
}

fn bad_request(err: TurnstileError) -> Response {
    warn!(error = %err, "Rejected request without a usable identity");
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "message": err.to_string() })),
    )
        .into_response()
}
