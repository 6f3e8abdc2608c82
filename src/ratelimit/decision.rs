//! Decision service: composes the limit policy with a counter store.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use tracing::{debug, trace};

use super::bucket::BucketKey;
use super::clock::{Clock, SystemClock};
use super::policy::{resolve_window, Category, WindowKind};
use super::store::LimitStore;
use crate::error::Result;

/// Whether a check spends quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Report the current standing without recording anything
    PeekOnly,
    /// Record one unit of usage and report the standing after it
    Consume,
}

/// The outcome of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub allowed: bool,
    pub limit: u64,
    pub window: WindowKind,
    pub remaining: u64,
    #[serde(serialize_with = "serialize_instant")]
    pub reset_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub category: Category,
    pub identity: String,
    /// Set when no store is configured and nothing is being metered
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
}

/// What a user-facing notice needs to explain a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockNotice {
    /// Plural noun for the category, e.g. "generations"
    pub label: &'static str,
    pub limit: u64,
    pub window: WindowKind,
    pub reset_at: DateTime<Utc>,
}

impl Decision {
    /// An allowed decision that meters nothing.
    ///
    /// The full ceiling is reported as remaining.
    pub fn unmetered(identity: &str, category: Category, now: DateTime<Utc>) -> Self {
        let limits = category.limits();
        let window = resolve_window(category, now);
        Self {
            allowed: true,
            limit: limits.ceiling,
            window: limits.window,
            remaining: limits.ceiling,
            reset_at: window.end,
            category,
            identity: identity.to_string(),
            disabled: true,
        }
    }

    /// The data a notification surface needs to render this decision.
    pub fn notice(&self) -> BlockNotice {
        BlockNotice {
            label: self.category.label(),
            limit: self.limit,
            window: self.window,
            reset_at: self.reset_at,
        }
    }
}

impl fmt::Display for BlockNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "You've reached the limit of {} {} per {} per IP address. Please try again after {}.",
            self.limit,
            self.label,
            self.window,
            self.reset_at.format("%Y-%m-%d %H:%M UTC")
        )
    }
}

fn serialize_instant<S: Serializer>(
    instant: &DateTime<Utc>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&instant.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Decides whether an identity may act in a category.
///
/// Without a store the service runs disabled: every check is allowed and
/// flagged as unmetered. With a store, store failures propagate to the caller.
#[derive(Clone)]
pub struct DecisionService {
    store: Option<Arc<dyn LimitStore>>,
    clock: Arc<dyn Clock>,
}

impl DecisionService {
    /// Create a metered service backed by `store`.
    pub fn new(store: Arc<dyn LimitStore>) -> Self {
        Self::with_clock(Some(store), Arc::new(SystemClock))
    }

    /// Create a service that allows everything.
    pub fn disabled() -> Self {
        Self::with_clock(None, Arc::new(SystemClock))
    }

    /// Create a service with an explicit clock. `None` means disabled.
    pub fn with_clock(store: Option<Arc<dyn LimitStore>>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Whether the service is running without a store.
    pub fn is_disabled(&self) -> bool {
        self.store.is_none()
    }

    /// An unmetered decision at the service's current time.
    pub fn unmetered(&self, identity: &str, category: Category) -> Decision {
        Decision::unmetered(identity, category, self.clock.now())
    }

    /// Check, and in `Consume` mode record, one request.
    pub async fn decide(&self, identity: &str, category: Category, mode: Mode) -> Result<Decision> {
        let now = self.clock.now();

        let store = match &self.store {
            Some(store) => store,
            None => {
                trace!(identity = %identity, category = %category, "Rate limiting disabled");
                return Ok(Decision::unmetered(identity, category, now));
            }
        };

        let limits = category.limits();
        let window = resolve_window(category, now);
        let key = BucketKey::new(identity, category, &window);

        trace!(key = %key, mode = ?mode, "Checking rate limit");

        let (allowed, count, reset_at) = match mode {
            Mode::PeekOnly => {
                let usage = store.peek(&key, window.end).await?;
                (usage.count < limits.ceiling, usage.count, usage.reset_at)
            }
            Mode::Consume => {
                let count = store.consume(&key, window.end).await?;
                (count <= limits.ceiling, count, window.end)
            }
        };

        if !allowed {
            debug!(
                key = %key,
                count,
                limit = limits.ceiling,
                "Rate limit exceeded"
            );
        }

        Ok(Decision {
            allowed,
            limit: limits.ceiling,
            window: limits.window,
            remaining: limits.ceiling.saturating_sub(count),
            reset_at,
            category,
            identity: identity.to_string(),
            disabled: false,
        })
    }
}

impl fmt::Debug for DecisionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecisionService")
            .field("disabled", &self.is_disabled())
            .field("clock", &self.clock)
            .finish()
    }
}
