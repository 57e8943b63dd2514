//! Holiday cache for the dCalendar month view.
//!
//! # Intention
//!
//! - Keep a local SQLite mirror of the national holiday list published as a
//!   CSV feed, refreshed at most once a month and only rewritten when the
//!   feed's content hash changes.
//! - Provide the month grid model the calendar view renders from.
//!
//! # Architectural Boundaries
//!
//! - [`sqlite`] is the only persistence boundary.
//! - [`source`] is the only network boundary.
//! - No rendering code belongs here; the binary prints a plain text view.

pub mod calendar;
pub mod config;
pub mod error;
pub mod session;
pub mod source;
pub mod sqlite;
pub mod staleness;
pub mod sync;

pub use calendar::{holiday_name, holidays_between, DayCell, DayKind, MonthGrid};
pub use config::{AppConfig, SourceConfig};
pub use error::{SyncError, SyncResult};
pub use session::{load_holidays, refresh_holidays, SessionReport};
pub use source::{DatasetSource, FetchError, HttpSource};
pub use sqlite::{RowStore, SqliteConfig, StoreError};
pub use sync::{Holiday, SyncOutcome, SyncState, Synchronizer};
