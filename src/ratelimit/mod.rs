//! Rate limiting logic: calendar-window policy, counter stores and decisions.

mod bucket;
mod clock;
mod decision;
mod memory;
mod policy;
mod postgres;
mod store;

pub use bucket::BucketKey;
pub use clock::{Clock, ManualClock, SystemClock};
pub use decision::{BlockNotice, Decision, DecisionService, Mode};
pub use memory::MemoryStore;
pub use policy::{limits, resolve_window, Category, CategoryLimit, UnknownCategory, Window, WindowKind};
pub use postgres::PostgresStore;
pub use store::{CounterRecord, LimitStore, StoreError, Usage};
