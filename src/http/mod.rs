//! HTTP boundary for the limit endpoint.
//!
//! `GET /api/limit?type=<category>` reports the caller's standing without
//! spending quota. `POST /api/limit` with `{"type": "<category>"}` spends one
//! unit and answers 429 with the decision when the caller is over the limit.

mod handlers;
mod identity;
mod server;

pub use handlers::{AppState, BlockedResponse, LimitBody, LimitQuery, RATE_LIMIT_ERROR};
pub use identity::{
    resolver_for, ForwardedForResolver, IdentityResolver, PeerAddressResolver, UNKNOWN_IDENTITY,
};
pub use server::{router, HttpServer, LIMIT_PATH};
