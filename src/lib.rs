// RosterStore - Flat-file student roster with legacy format migration and auto save/reload

pub mod codec;
pub mod config;
pub mod filter;
pub mod record;
pub mod store;
pub mod sync;
pub mod validation;

// Re-export main types for convenience
pub use config::{Config, SyncSettings};
pub use filter::Filter;
pub use record::{Record, parse_flexible_date};
pub use store::{LoadSummary, Mutation, RecordStore};
pub use sync::{Clock, ManualClock, Notice, NoticeKind, SyncController, SystemClock};
pub use validation::{Conflict, join_errors, validate};
