//! Quota Gate - per-client request quotas over calendar windows
//!
//! This crate decides whether a client, identified by network address, may
//! perform an action in a category (generation, download) within the current
//! UTC calendar day or week, and records the action when it is allowed.
//! Counters live in a store that provides an atomic insert-or-increment, so
//! any number of instances can serve the same clients.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
