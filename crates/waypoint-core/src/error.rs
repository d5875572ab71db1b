//! Error types for `waypoint-core`.

use thiserror::Error;

use crate::selector::MigrationState;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown progress kind: {0:?}")]
  UnknownKind(String),

  #[error("unknown migration state: {0:?}")]
  UnknownMigrationState(String),

  /// A migration control request that would risk losing progress data.
  #[error("cannot move migration from {from} to {to}: {reason}")]
  InvalidTransition {
    from:   MigrationState,
    to:     MigrationState,
    reason: &'static str,
  },

  #[error("store lock poisoned")]
  Poisoned,

  #[error("injected failure: {0}")]
  Injected(&'static str),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  /// Box a backend error so it can cross the core boundary.
  pub fn store<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(err))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
