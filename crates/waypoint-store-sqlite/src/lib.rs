//! SQLite backends for Waypoint progress tracking.
//!
//! One database file holds both physical representations side by side: the
//! legacy activity log with key-value metadata, and the dedicated per-kind
//! progress tables. Both wrap [`tokio_rusqlite`] so all database access runs
//! on a dedicated thread without blocking the async runtime.

mod database;
mod encode;
mod legacy;
mod options;
mod schema;
mod tables;

pub mod error;

pub use database::Database;
pub use error::{Error, Result};
pub use legacy::LegacyLogStore;
pub use options::OptionsStore;
pub use tables::TableStore;
