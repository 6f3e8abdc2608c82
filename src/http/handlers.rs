//! HTTP handlers for the limit endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{Extensions, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn, Span};

use super::identity::IdentityResolver;
use crate::config::StoreErrorPolicy;
use crate::error::LimiterError;
use crate::ratelimit::{Category, Decision, DecisionService, Mode};

/// Error tag carried by blocked responses.
pub const RATE_LIMIT_ERROR: &str = "rate_limit";

/// Shared state for the limit handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: DecisionService,
    pub identity: Arc<dyn IdentityResolver>,
    pub on_store_error: StoreErrorPolicy,
}

/// Query string of the read-only check.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LimitQuery {
    pub category: Option<String>,
}

impl LimitQuery {
    /// Take the first `type` (or `category`) parameter. Repeated or
    /// conflicting keys never reject the request.
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        Self {
            category: pairs
                .into_iter()
                .find(|(key, _)| key == "type" || key == "category")
                .map(|(_, value)| value),
        }
    }
}

/// JSON body of the consuming check.
#[derive(Debug, Default, Deserialize)]
pub struct LimitBody {
    #[serde(rename = "type", alias = "category")]
    pub category: Option<String>,
}

/// Payload of a 429 response: the decision plus an error tag and a
/// human-readable explanation.
#[derive(Debug, Serialize)]
pub struct BlockedResponse {
    pub error: &'static str,
    pub message: String,
    #[serde(flatten)]
    pub decision: Decision,
}

impl BlockedResponse {
    pub fn new(decision: Decision) -> Self {
        Self {
            error: RATE_LIMIT_ERROR,
            message: decision.notice().to_string(),
            decision,
        }
    }
}

/// GET /api/limit
///
/// Reports the caller's standing without spending quota.
#[instrument(skip_all, fields(category, identity))]
pub async fn check_limit(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    extensions: Extensions,
) -> Response {
    let query = LimitQuery::from_pairs(pairs);
    let category = Category::from_param(query.category.as_deref());
    let identity = state.identity.resolve(&headers, peer_addr(&extensions));
    record_span(category, &identity);

    match state.service.decide(&identity, category, Mode::PeekOnly).await {
        Ok(decision) => {
            debug!(
                identity = %identity,
                category = %category,
                allowed = decision.allowed,
                remaining = decision.remaining,
                "Rate limit checked"
            );
            Json(decision).into_response()
        }
        Err(e) => store_failure(&state, &identity, category, e, "Error checking rate limit."),
    }
}

/// POST /api/limit
///
/// Spends one unit of quota. Blocked requests get 429 with the decision.
#[instrument(skip_all, fields(category, identity))]
pub async fn consume_limit(
    State(state): State<AppState>,
    headers: HeaderMap,
    extensions: Extensions,
    body: Bytes,
) -> Response {
    // Unparseable bodies fall back to the default category
    let requested = serde_json::from_slice::<LimitBody>(&body)
        .ok()
        .and_then(|b| b.category);
    let category = Category::from_param(requested.as_deref());
    let identity = state.identity.resolve(&headers, peer_addr(&extensions));
    record_span(category, &identity);

    match state.service.decide(&identity, category, Mode::Consume).await {
        Ok(decision) if decision.allowed => {
            info!(
                identity = %identity,
                category = %category,
                remaining = decision.remaining,
                "Rate limit consumed"
            );
            Json(decision).into_response()
        }
        Ok(decision) => {
            info!(
                identity = %identity,
                category = %category,
                limit = decision.limit,
                "Rate limit blocked request"
            );
            (StatusCode::TOO_MANY_REQUESTS, Json(BlockedResponse::new(decision))).into_response()
        }
        Err(e) => store_failure(&state, &identity, category, e, "Error updating rate limit."),
    }
}

fn record_span(category: Category, identity: &str) {
    let span = Span::current();
    span.record("category", category.as_str());
    span.record("identity", identity);
}

fn peer_addr(extensions: &Extensions) -> Option<SocketAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

fn store_failure(
    state: &AppState,
    identity: &str,
    category: Category,
    err: LimiterError,
    message: &'static str,
) -> Response {
    match (state.on_store_error, &err) {
        (StoreErrorPolicy::FailOpen, LimiterError::Store(_)) => {
            warn!(
                identity = %identity,
                category = %category,
                error = %err,
                "Rate limit store failed, allowing request"
            );
            Json(state.service.unmetered(identity, category)).into_response()
        }
        _ => {
            error!(
                identity = %identity,
                category = %category,
                error = %err,
                "Rate limit check failed"
            );
            (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
        }
    }
}
