//! Chooses which backend serves live progress traffic.
//!
//! The choice is a pure function of the per-installation migration flag. The
//! flag is read once per request and handed to [`RepositorySelector::select`],
//! so a request sees either the pre-cutover or the post-cutover backend in
//! full.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  model::{Progress, ProgressKey, ProgressKind, Transition},
  store::ProgressStore,
};

// ─── Migration state ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
  #[default]
  NotStarted,
  InProgress,
  Done,
}

impl MigrationState {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::NotStarted => "not_started",
      Self::InProgress => "in_progress",
      Self::Done => "done",
    }
  }
}

impl fmt::Display for MigrationState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for MigrationState {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "not_started" => Ok(Self::NotStarted),
      "in_progress" => Ok(Self::InProgress),
      "done" => Ok(Self::Done),
      other => Err(Error::UnknownMigrationState(other.to_owned())),
    }
  }
}

// ─── Selector ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SelectorConfig {
  /// While the migration is in progress, mirror legacy writes into the
  /// relational backend.
  #[serde(default)]
  pub dual_write: bool,
}

/// Holds both backends and hands out the one the migration flag calls for.
///
/// Backends are expected to be cheap to clone (shared connection handles).
#[derive(Debug, Clone)]
pub struct RepositorySelector<L, R> {
  legacy:     L,
  relational: R,
  config:     SelectorConfig,
}

impl<L: Clone, R: Clone> RepositorySelector<L, R> {
  pub fn new(legacy: L, relational: R, config: SelectorConfig) -> Self {
    Self { legacy, relational, config }
  }

  pub fn select(&self, state: MigrationState, kind: ProgressKind) -> Backend<L, R> {
    let backend = match state {
      MigrationState::NotStarted => Backend::Legacy(self.legacy.clone()),
      MigrationState::InProgress if self.config.dual_write => Backend::DualWrite {
        primary: self.legacy.clone(),
        mirror:  self.relational.clone(),
      },
      MigrationState::InProgress => Backend::Legacy(self.legacy.clone()),
      MigrationState::Done => Backend::Relational(self.relational.clone()),
    };
    tracing::debug!(%state, %kind, backend = backend.name(), "selected progress backend");
    backend
  }

  pub fn legacy(&self) -> &L { &self.legacy }

  pub fn relational(&self) -> &R { &self.relational }
}

// ─── Backend ─────────────────────────────────────────────────────────────────

/// The backend answering one request.
#[derive(Debug, Clone)]
pub enum Backend<L, R> {
  Legacy(L),
  Relational(R),
  /// Legacy stays authoritative; successful writes are copied to the mirror.
  DualWrite { primary: L, mirror: R },
}

impl<L, R> Backend<L, R> {
  pub fn name(&self) -> &'static str {
    match self {
      Self::Legacy(_) => "legacy",
      Self::Relational(_) => "relational",
      Self::DualWrite { .. } => "dual_write",
    }
  }
}

impl<L, R> Backend<L, R>
where
  L: ProgressStore,
  R: ProgressStore,
{
  /// Copy a primary write into the relational backend. Failures are logged
  /// and swallowed; the catch-up pass repairs the mirror later.
  async fn mirror(mirror: &R, progress: &Progress) {
    if let Err(err) = mirror.import(progress).await {
      tracing::warn!(
        key = %progress.key(),
        error = %err,
        "mirror write to relational backend failed"
      );
    }
  }
}

impl<L, R> ProgressStore for Backend<L, R>
where
  L: ProgressStore,
  R: ProgressStore,
{
  type Error = Error;

  async fn find(&self, key: ProgressKey) -> Result<Option<Progress>> {
    match self {
      Self::Legacy(legacy) | Self::DualWrite { primary: legacy, .. } => {
        legacy.find(key).await.map_err(Error::store)
      }
      Self::Relational(relational) => relational.find(key).await.map_err(Error::store),
    }
  }

  async fn record(
    &self,
    key: ProgressKey,
    transition: Transition,
    now: DateTime<Utc>,
  ) -> Result<Progress> {
    match self {
      Self::Legacy(legacy) => legacy.record(key, transition, now).await.map_err(Error::store),
      Self::Relational(relational) => {
        relational.record(key, transition, now).await.map_err(Error::store)
      }
      Self::DualWrite { primary, mirror } => {
        let progress = primary
          .record(key, transition, now)
          .await
          .map_err(Error::store)?;
        Self::mirror(mirror, &progress).await;
        Ok(progress)
      }
    }
  }

  async fn import(&self, progress: &Progress) -> Result<Progress> {
    match self {
      Self::Legacy(legacy) => legacy.import(progress).await.map_err(Error::store),
      Self::Relational(relational) => relational.import(progress).await.map_err(Error::store),
      Self::DualWrite { primary, mirror } => {
        let stored = primary.import(progress).await.map_err(Error::store)?;
        Self::mirror(mirror, &stored).await;
        Ok(stored)
      }
    }
  }

  async fn count(&self, kind: ProgressKind) -> Result<u64> {
    match self {
      Self::Legacy(legacy) | Self::DualWrite { primary: legacy, .. } => {
        legacy.count(kind).await.map_err(Error::store)
      }
      Self::Relational(relational) => relational.count(kind).await.map_err(Error::store),
    }
  }
}
