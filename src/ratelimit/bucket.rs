//! Bucket key generation.

use chrono::NaiveDate;

use super::policy::{Category, Window};

/// A key that uniquely identifies one counter.
///
/// The window's start date rather than an instant is part of the key, so every
/// request in the same calendar window lands on the same counter and a new
/// window produces a fresh key without any cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    /// Opaque client identity
    pub identity: String,
    /// Category being metered
    pub category: Category,
    /// First calendar day of the window
    pub window_start: NaiveDate,
}

impl BucketKey {
    /// Create a bucket key for an identity in the given window.
    pub fn new(identity: &str, category: Category, window: &Window) -> Self {
        Self {
            identity: identity.to_string(),
            category,
            window_start: window.start_date(),
        }
    }

    /// The per-identity bucket name, e.g. `generation:2026-10-19`.
    ///
    /// Stored next to the identity in the persisted counter table.
    pub fn bucket(&self) -> String {
        format!("{}:{}", self.category, self.window_start.format("%Y-%m-%d"))
    }
}

impl std::fmt::Display for BucketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.identity, self.bucket())
    }
}
