//! Static limit policy: categories, ceilings and calendar windows.
//!
//! Everything here is a pure function of its inputs. Callers pass the current
//! instant explicitly so window resolution can be pinned in tests.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// The action being rate limited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Content generation, metered per UTC day
    #[default]
    Generation,
    /// Downloads, metered per UTC week starting Monday
    Download,
}

/// Calendar unit a window is aligned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    /// UTC calendar day
    Day,
    /// UTC calendar week, Monday 00:00 to the following Monday 00:00
    Week,
}

/// Ceiling and window for a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryLimit {
    /// Maximum count permitted within one window
    pub ceiling: u64,
    /// Calendar unit of the window
    pub window: WindowKind,
}

/// A half-open interval `[start, end)` anchored to a calendar boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Returned when a category name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown category: {0}")]
pub struct UnknownCategory(pub String);

impl Category {
    /// All categories, in declaration order.
    pub const ALL: [Category; 2] = [Category::Generation, Category::Download];

    /// Get the static limit for this category.
    pub fn limits(self) -> CategoryLimit {
        match self {
            Category::Generation => CategoryLimit {
                ceiling: 20,
                window: WindowKind::Day,
            },
            Category::Download => CategoryLimit {
                ceiling: 10,
                window: WindowKind::Week,
            },
        }
    }

    /// Wire name of the category.
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Generation => "generation",
            Category::Download => "download",
        }
    }

    /// Plural noun used when telling a user what they ran out of.
    pub fn label(self) -> &'static str {
        match self {
            Category::Generation => "generations",
            Category::Download => "downloads",
        }
    }

    /// Parse a request parameter, falling back to `Generation` when the value
    /// is absent or unrecognized.
    pub fn from_param(value: Option<&str>) -> Self {
        value
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }
}

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "generation" => Ok(Category::Generation),
            "download" => Ok(Category::Download),
            other => Err(UnknownCategory(other.to_string())),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl WindowKind {
    /// Wire name of the window kind.
    pub fn as_str(self) -> &'static str {
        match self {
            WindowKind::Day => "day",
            WindowKind::Week => "week",
        }
    }

    /// Resolve the calendar window containing `now`.
    pub fn resolve(self, now: DateTime<Utc>) -> Window {
        let midnight = start_of_day(now.date_naive());
        match self {
            WindowKind::Day => Window {
                start: midnight,
                end: midnight + Duration::days(1),
            },
            WindowKind::Week => {
                let days_since_monday = i64::from(now.weekday().num_days_from_monday());
                let start = midnight - Duration::days(days_since_monday);
                Window {
                    start,
                    end: start + Duration::days(7),
                }
            }
        }
    }
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Window {
    /// Whether `instant` falls inside this window (start inclusive, end exclusive).
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    /// Calendar date the window starts on. Used as part of the bucket key.
    pub fn start_date(&self) -> NaiveDate {
        self.start.date_naive()
    }
}

/// Get the static limit for a category.
pub fn limits(category: Category) -> CategoryLimit {
    category.limits()
}

/// Resolve the window `now` falls into for the given category.
pub fn resolve_window(category: Category, now: DateTime<Utc>) -> Window {
    category.limits().window.resolve(now)
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}
