//! Storage contracts implemented by the progress backends.
//!
//! Higher layers depend on these traits, not on any concrete backend. All
//! methods return `Send` futures so the traits work in multi-threaded async
//! runtimes.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::{
  migration::MigrationCursor,
  model::{Progress, ProgressKey, ProgressKind, Transition},
  selector::MigrationState,
};

// ─── Progress storage ────────────────────────────────────────────────────────

/// A backend holding progress records.
///
/// Uniqueness of [`ProgressKey`] is enforced by the backend itself; callers
/// never lock. Concurrent writes to one key resolve last-writer-wins.
pub trait ProgressStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Look up the record for `key`. `None` means the learner has not engaged.
  fn find(
    &self,
    key: ProgressKey,
  ) -> impl Future<Output = Result<Option<Progress>, Self::Error>> + Send + '_;

  /// Atomically load or create the record for `key`, apply `transition`, and
  /// write it back. `now` becomes `created_at` for a new record and
  /// `updated_at` in every case.
  fn record(
    &self,
    key: ProgressKey,
    transition: Transition,
    now: DateTime<Utc>,
  ) -> impl Future<Output = Result<Progress, Self::Error>> + Send + '_;

  /// Upsert `progress` by its natural key, copying status and timestamps
  /// verbatim. The stored record keeps this backend's own identifier.
  fn import<'a>(
    &'a self,
    progress: &'a Progress,
  ) -> impl Future<Output = Result<Progress, Self::Error>> + Send + 'a;

  /// Number of records of `kind`.
  fn count(
    &self,
    kind: ProgressKind,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;
}

/// Ordered reads the migration runner needs from the legacy backend.
pub trait LegacySource: ProgressStore {
  /// Up to `limit` records with id greater than `after_id`, in id order.
  fn scan_after(
    &self,
    after_id: i64,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<Progress>, Self::Error>> + Send + '_;

  /// Like [`scan_after`](Self::scan_after), restricted to records whose
  /// `updated_at` is at or after `since`.
  fn scan_modified_since(
    &self,
    since: DateTime<Utc>,
    after_id: i64,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<Progress>, Self::Error>> + Send + '_;
}

// ─── Migration control ───────────────────────────────────────────────────────

/// Per-installation migration bookkeeping: the state flag, the cursor, and the
/// reconciliation marker. Each setter is a single atomic write.
pub trait MigrationControl: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn migration_state(
    &self,
  ) -> impl Future<Output = Result<MigrationState, Self::Error>> + Send + '_;

  fn set_migration_state(
    &self,
    state: MigrationState,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn cursor(
    &self,
  ) -> impl Future<Output = Result<MigrationCursor, Self::Error>> + Send + '_;

  fn set_cursor(
    &self,
    cursor: MigrationCursor,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// When reconciliation last succeeded, if it has since the last reset.
  fn reconciled_at(
    &self,
  ) -> impl Future<Output = Result<Option<DateTime<Utc>>, Self::Error>> + Send + '_;

  fn set_reconciled_at(
    &self,
    at: Option<DateTime<Utc>>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}
