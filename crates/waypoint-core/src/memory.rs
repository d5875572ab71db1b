//! In-memory backend for testing and prototyping.

use std::{
  collections::{BTreeMap, HashMap},
  sync::{Arc, Mutex, MutexGuard},
};

use chrono::{DateTime, Utc};

use crate::{
  Error, Result,
  migration::MigrationCursor,
  model::{Progress, ProgressKey, ProgressKind, Transition},
  selector::MigrationState,
  store::{LegacySource, MigrationControl, ProgressStore},
};

#[derive(Default)]
struct Inner {
  next_id:       i64,
  records:       BTreeMap<i64, Progress>,
  by_key:        HashMap<ProgressKey, i64>,
  state:         MigrationState,
  cursor:        MigrationCursor,
  reconciled_at: Option<DateTime<Utc>>,
  fail_writes:   bool,
}

impl Inner {
  fn allocate_id(&mut self) -> i64 {
    self.next_id += 1;
    self.next_id
  }

  fn check_writable(&self) -> Result<()> {
    if self.fail_writes {
      return Err(Error::Injected("writes disabled"));
    }
    Ok(())
  }
}

/// Implements every storage contract over shared in-process maps. Clones see
/// the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
  inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
  pub fn new() -> Self { Self::default() }

  /// Make every subsequent progress write fail until switched back.
  pub fn fail_writes(&self, fail: bool) {
    let mut guard = match self.inner.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    };
    guard.fail_writes = fail;
  }

  fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
    self.inner.lock().map_err(|_| Error::Poisoned)
  }
}

impl ProgressStore for MemoryStore {
  type Error = Error;

  async fn find(&self, key: ProgressKey) -> Result<Option<Progress>> {
    let guard = self.lock()?;
    Ok(guard.by_key.get(&key).and_then(|id| guard.records.get(id)).cloned())
  }

  async fn record(
    &self,
    key: ProgressKey,
    transition: Transition,
    now: DateTime<Utc>,
  ) -> Result<Progress> {
    let mut guard = self.lock()?;
    guard.check_writable()?;

    let existing = guard.by_key.get(&key).and_then(|id| guard.records.get(id)).cloned();
    let mut progress = match existing {
      Some(p) => p,
      None => {
        let id = guard.allocate_id();
        guard.by_key.insert(key, id);
        Progress::new(id, key, now)
      }
    };
    progress.apply(&transition, now);
    guard.records.insert(progress.id(), progress.clone());
    Ok(progress)
  }

  async fn import(&self, progress: &Progress) -> Result<Progress> {
    let mut guard = self.lock()?;
    guard.check_writable()?;

    let key = progress.key();
    let id = match guard.by_key.get(&key) {
      Some(id) => *id,
      None => {
        let id = guard.allocate_id();
        guard.by_key.insert(key, id);
        id
      }
    };
    let stored = progress.clone().with_id(id);
    guard.records.insert(id, stored.clone());
    Ok(stored)
  }

  async fn count(&self, kind: ProgressKind) -> Result<u64> {
    let guard = self.lock()?;
    Ok(guard.records.values().filter(|p| p.kind() == kind).count() as u64)
  }
}

impl LegacySource for MemoryStore {
  async fn scan_after(&self, after_id: i64, limit: usize) -> Result<Vec<Progress>> {
    let guard = self.lock()?;
    Ok(
      guard
        .records
        .range(after_id.saturating_add(1)..)
        .map(|(_, p)| p.clone())
        .take(limit)
        .collect(),
    )
  }

  async fn scan_modified_since(
    &self,
    since: DateTime<Utc>,
    after_id: i64,
    limit: usize,
  ) -> Result<Vec<Progress>> {
    let guard = self.lock()?;
    Ok(
      guard
        .records
        .range(after_id.saturating_add(1)..)
        .map(|(_, p)| p)
        .filter(|p| p.updated_at() >= since)
        .take(limit)
        .cloned()
        .collect(),
    )
  }
}

impl MigrationControl for MemoryStore {
  type Error = Error;

  async fn migration_state(&self) -> Result<MigrationState> { Ok(self.lock()?.state) }

  async fn set_migration_state(&self, state: MigrationState) -> Result<()> {
    self.lock()?.state = state;
    Ok(())
  }

  async fn cursor(&self) -> Result<MigrationCursor> { Ok(self.lock()?.cursor.clone()) }

  async fn set_cursor(&self, cursor: MigrationCursor) -> Result<()> {
    self.lock()?.cursor = cursor;
    Ok(())
  }

  async fn reconciled_at(&self) -> Result<Option<DateTime<Utc>>> {
    Ok(self.lock()?.reconciled_at)
  }

  async fn set_reconciled_at(&self, at: Option<DateTime<Utc>>) -> Result<()> {
    self.lock()?.reconciled_at = at;
    Ok(())
  }
}
