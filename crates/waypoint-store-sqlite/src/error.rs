//! Error type for `waypoint-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] waypoint_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("unknown activity log entry type: {0:?}")]
  UnknownEntryType(String),

  /// An identifier that does not fit the column type.
  #[error("identifier out of range: {0}")]
  IdOutOfRange(String),
}

impl Error {
  /// Carry an error out of a `tokio_rusqlite` call closure.
  pub(crate) fn into_call(self) -> tokio_rusqlite::Error {
    tokio_rusqlite::Error::Other(Box::new(self))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
