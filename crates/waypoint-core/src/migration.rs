//! Resumable batch migration from the legacy log backend into the relational
//! backend.
//!
//! Each call to [`MigrationRunner::advance_migration`] does one bounded unit of
//! work and persists where it got to, so the runner can be driven by a
//! recurring scheduled job and interrupted at any point. The phases are:
//!
//! 1. **Copy** every legacy record in id order, starting after the cursor.
//! 2. **Catch up** on records modified since the copy began, since live
//!    traffic keeps writing to the legacy backend meanwhile. Each pass remembers
//!    when it started. At the end of a pass, any record written since then that
//!    the relational backend does not yet match starts another pass.
//! 3. **Reconcile** per-kind row counts, then cut over by flipping the flag to
//!    [`MigrationState::Done`].
//!
//! Records are copied through [`ProgressStore::import`], so status and
//! timestamps arrive verbatim and re-running any batch is idempotent. The
//! legacy backend is only ever read.

use std::num::NonZeroUsize;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  clock::Clock,
  model::{Progress, ProgressKind},
  selector::MigrationState,
  store::{LegacySource, MigrationControl, ProgressStore},
};

// ─── Configuration ───────────────────────────────────────────────────────────

const DEFAULT_BATCH_SIZE: NonZeroUsize = match NonZeroUsize::new(500) {
  Some(n) => n,
  None => unreachable!(),
};

fn default_batch_size() -> NonZeroUsize { DEFAULT_BATCH_SIZE }

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MigrationConfig {
  /// Records copied per invocation; bounds the time one run takes.
  #[serde(default = "default_batch_size")]
  pub batch_size:          NonZeroUsize,
  /// Allowed per-kind difference between legacy and relational row counts at
  /// reconciliation.
  #[serde(default)]
  pub reconcile_tolerance: u64,
}

impl Default for MigrationConfig {
  fn default() -> Self {
    Self { batch_size: default_batch_size(), reconcile_tolerance: 0 }
  }
}

// ─── Cursor ──────────────────────────────────────────────────────────────────

/// The persisted high-water mark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum MigrationCursor {
  Copy {
    last_id:    i64,
    /// When the copy phase began; the catch-up pass starts from here.
    started_at: Option<DateTime<Utc>>,
  },
  CatchUp {
    /// Records modified at or after this instant are copied by this pass.
    since:        DateTime<Utc>,
    /// When this pass began; the next pass, if any, starts from here.
    pass_started: DateTime<Utc>,
    last_id:      i64,
  },
}

impl MigrationCursor {
  /// The start of a catch-up pass over records modified since `since`.
  pub fn catch_up(since: DateTime<Utc>, now: DateTime<Utc>) -> Self {
    Self::CatchUp { since, pass_started: now, last_id: 0 }
  }
}

impl Default for MigrationCursor {
  fn default() -> Self { Self::Copy { last_id: 0, started_at: None } }
}

// ─── Outcomes ────────────────────────────────────────────────────────────────

/// What one call to [`MigrationRunner::advance_migration`] accomplished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum MigrationStep {
  Copied { copied: usize, last_id: i64 },
  CaughtUp { copied: usize, last_id: i64 },
  /// Records written behind the cursor during the last pass differ from their
  /// relational copy; another pass starts from `since`.
  PassRestarted { since: DateTime<Utc> },
  /// The batch could not be read or written; the cursor did not move and the
  /// next run retries it.
  BatchFailed { reason: String },
  /// Row counts disagree beyond tolerance; another catch-up pass follows.
  Mismatch { kind: ProgressKind, legacy: u64, relational: u64 },
  Cutover,
  AlreadyDone,
}

/// A snapshot for operational tooling.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
  pub state:         MigrationState,
  pub cursor:        MigrationCursor,
  pub reconciled_at: Option<DateTime<Utc>>,
  pub counts:        Vec<KindCounts>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KindCounts {
  pub kind:       ProgressKind,
  pub legacy:     u64,
  pub relational: u64,
}

// ─── Runner ──────────────────────────────────────────────────────────────────

/// Drives the migration and owns the migration control surface.
#[derive(Debug, Clone)]
pub struct MigrationRunner<L, R, C> {
  legacy:     L,
  relational: R,
  control:    C,
  config:     MigrationConfig,
  clock:      Clock,
}

impl<L, R, C> MigrationRunner<L, R, C>
where
  L: LegacySource,
  R: ProgressStore,
  C: MigrationControl,
{
  pub fn new(
    legacy: L,
    relational: R,
    control: C,
    config: MigrationConfig,
    clock: Clock,
  ) -> Self {
    Self { legacy, relational, control, config, clock }
  }

  pub async fn get_migration_state(&self) -> Result<MigrationState> {
    self.control.migration_state().await.map_err(Error::store)
  }

  pub async fn report(&self) -> Result<MigrationReport> {
    let mut counts = Vec::with_capacity(ProgressKind::ALL.len());
    for kind in ProgressKind::ALL {
      counts.push(self.counts(kind).await?);
    }
    Ok(MigrationReport {
      state: self.get_migration_state().await?,
      cursor: self.control.cursor().await.map_err(Error::store)?,
      reconciled_at: self.control.reconciled_at().await.map_err(Error::store)?,
      counts,
    })
  }

  /// Do one bounded unit of migration work.
  pub async fn advance_migration(&self) -> Result<MigrationStep> {
    match self.get_migration_state().await? {
      MigrationState::Done => return Ok(MigrationStep::AlreadyDone),
      MigrationState::NotStarted => {
        self
          .control
          .set_migration_state(MigrationState::InProgress)
          .await
          .map_err(Error::store)?;
        tracing::info!("progress migration started");
      }
      MigrationState::InProgress => {}
    }

    match self.control.cursor().await.map_err(Error::store)? {
      MigrationCursor::Copy { last_id, started_at } => {
        let started_at = match started_at {
          Some(at) => at,
          None => {
            let at = self.clock.now();
            self
              .set_cursor(MigrationCursor::Copy { last_id, started_at: Some(at) })
              .await?;
            at
          }
        };
        self.advance_copy(last_id, started_at).await
      }
      MigrationCursor::CatchUp { since, pass_started, last_id } => {
        self.advance_catch_up(since, pass_started, last_id).await
      }
    }
  }

  /// Move the flag by hand. Cutover is refused until reconciliation has
  /// succeeded; reverting always works and rewinds the cursor so a later
  /// cutover re-verifies.
  pub async fn set_migration_state(&self, target: MigrationState) -> Result<()> {
    let current = self.get_migration_state().await?;
    if current == target {
      return Ok(());
    }

    match target {
      MigrationState::Done => {
        if current != MigrationState::InProgress {
          return Err(Error::InvalidTransition {
            from:   current,
            to:     target,
            reason: "the migration has not been run",
          });
        }
        if self.control.reconciled_at().await.map_err(Error::store)?.is_none() {
          return Err(Error::InvalidTransition {
            from:   current,
            to:     target,
            reason: "reconciliation has not succeeded",
          });
        }
      }
      MigrationState::InProgress => {
        if current == MigrationState::Done {
          self.set_reconciled_at(None).await?;
          let now = self.clock.now();
          self.set_cursor(MigrationCursor::catch_up(now, now)).await?;
        }
      }
      MigrationState::NotStarted => {
        self.set_reconciled_at(None).await?;
        self.set_cursor(MigrationCursor::default()).await?;
      }
    }

    self
      .control
      .set_migration_state(target)
      .await
      .map_err(Error::store)?;
    tracing::info!(from = %current, to = %target, "progress migration state changed");
    Ok(())
  }

  // ── Phases ────────────────────────────────────────────────────────────────

  async fn advance_copy(&self, last_id: i64, started_at: DateTime<Utc>) -> Result<MigrationStep> {
    let batch = match self.legacy.scan_after(last_id, self.config.batch_size.get()).await {
      Ok(batch) => batch,
      Err(err) => return Ok(batch_failed(&err)),
    };

    let Some(new_last_id) = batch.last().map(Progress::id) else {
      tracing::info!("copy phase finished; starting catch-up pass");
      let pass_started = self.clock.now();
      self
        .set_cursor(MigrationCursor::catch_up(started_at, pass_started))
        .await?;
      return self.advance_catch_up(started_at, pass_started, 0).await;
    };

    if let Err(err) = self.copy_batch(&batch).await {
      return Ok(batch_failed(&err));
    }
    self
      .set_cursor(MigrationCursor::Copy { last_id: new_last_id, started_at: Some(started_at) })
      .await?;
    tracing::debug!(copied = batch.len(), last_id = new_last_id, "copied legacy batch");
    Ok(MigrationStep::Copied { copied: batch.len(), last_id: new_last_id })
  }

  async fn advance_catch_up(
    &self,
    since: DateTime<Utc>,
    pass_started: DateTime<Utc>,
    last_id: i64,
  ) -> Result<MigrationStep> {
    let batch = match self
      .legacy
      .scan_modified_since(since, last_id, self.config.batch_size.get())
      .await
    {
      Ok(batch) => batch,
      Err(err) => return Ok(batch_failed(&err)),
    };

    let Some(new_last_id) = batch.last().map(Progress::id) else {
      return self.finish_pass(since, pass_started).await;
    };

    if let Err(err) = self.copy_batch(&batch).await {
      return Ok(batch_failed(&err));
    }
    self
      .set_cursor(MigrationCursor::CatchUp { since, pass_started, last_id: new_last_id })
      .await?;
    tracing::debug!(copied = batch.len(), last_id = new_last_id, "caught up modified records");
    Ok(MigrationStep::CaughtUp { copied: batch.len(), last_id: new_last_id })
  }

  /// A pass has scanned every record modified since `since`. Writes that
  /// landed behind the cursor after `pass_started` were missed, so check those
  /// before trusting the relational copy.
  async fn finish_pass(
    &self,
    since: DateTime<Utc>,
    pass_started: DateTime<Utc>,
  ) -> Result<MigrationStep> {
    match self.out_of_sync_since(pass_started).await {
      Ok(0) => self.reconcile(since).await,
      Ok(stale) => {
        tracing::info!(
          stale,
          %pass_started,
          "records changed during catch-up; starting another pass"
        );
        self
          .set_cursor(MigrationCursor::catch_up(pass_started, self.clock.now()))
          .await?;
        Ok(MigrationStep::PassRestarted { since: pass_started })
      }
      Err(err) => Ok(batch_failed(&err)),
    }
  }

  async fn reconcile(&self, since: DateTime<Utc>) -> Result<MigrationStep> {
    for kind in ProgressKind::ALL {
      let counts = self.counts(kind).await?;
      if counts.legacy.abs_diff(counts.relational) > self.config.reconcile_tolerance {
        tracing::warn!(
          %kind,
          legacy = counts.legacy,
          relational = counts.relational,
          "reconciliation mismatch; scheduling another catch-up pass"
        );
        self.set_cursor(MigrationCursor::catch_up(since, self.clock.now())).await?;
        return Ok(MigrationStep::Mismatch {
          kind,
          legacy: counts.legacy,
          relational: counts.relational,
        });
      }
    }

    self.set_reconciled_at(Some(self.clock.now())).await?;
    self.set_migration_state(MigrationState::Done).await?;
    tracing::info!("progress migration reconciled; relational backend is now authoritative");
    Ok(MigrationStep::Cutover)
  }

  // ── Helpers ───────────────────────────────────────────────────────────────

  async fn copy_batch(&self, batch: &[Progress]) -> Result<(), R::Error> {
    for progress in batch {
      self.relational.import(progress).await?;
    }
    Ok(())
  }

  /// Number of legacy records modified at or after `since` whose relational
  /// copy is missing or differs. Pages through every such record in one call.
  async fn out_of_sync_since(&self, since: DateTime<Utc>) -> Result<usize> {
    let mut stale = 0;
    let mut after_id = 0;
    loop {
      let batch = self
        .legacy
        .scan_modified_since(since, after_id, self.config.batch_size.get())
        .await
        .map_err(Error::store)?;
      let Some(last_id) = batch.last().map(Progress::id) else {
        return Ok(stale);
      };
      for legacy in &batch {
        let relational = self.relational.find(legacy.key()).await.map_err(Error::store)?;
        if !relational.is_some_and(|r| r.same_state(legacy)) {
          stale += 1;
        }
      }
      after_id = last_id;
    }
  }

  async fn counts(&self, kind: ProgressKind) -> Result<KindCounts> {
    Ok(KindCounts {
      kind,
      legacy: self.legacy.count(kind).await.map_err(Error::store)?,
      relational: self.relational.count(kind).await.map_err(Error::store)?,
    })
  }

  async fn set_cursor(&self, cursor: MigrationCursor) -> Result<()> {
    self.control.set_cursor(cursor).await.map_err(Error::store)
  }

  async fn set_reconciled_at(&self, at: Option<DateTime<Utc>>) -> Result<()> {
    self.control.set_reconciled_at(at).await.map_err(Error::store)
  }
}

fn batch_failed(err: &dyn std::error::Error) -> MigrationStep {
  tracing::warn!(error = %err, "migration batch failed; will retry on next run");
  MigrationStep::BatchFailed { reason: err.to_string() }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use chrono::{Duration, TimeZone};

  use super::*;
  use crate::{
    memory::MemoryStore,
    model::ProgressKey,
    quiz::{LessonQuiz, QuizSettings},
    status::{RawStatus, StatusMachine},
    tracker::ProgressTracker,
  };

  struct Fixture {
    legacy:     MemoryStore,
    relational: MemoryStore,
    control:    MemoryStore,
    clock:      Clock,
    runner:     MigrationRunner<MemoryStore, MemoryStore, MemoryStore>,
  }

  fn epoch() -> DateTime<Utc> { Utc.timestamp_opt(1_700_000_000, 0).unwrap() }

  fn machine() -> StatusMachine {
    StatusMachine::new(Arc::new(QuizSettings::default().with_lesson(LessonQuiz {
      lesson_id:     10,
      quiz_id:       Some(100),
      gradable:      true,
      pass_required: true,
    })))
  }

  fn fixture(batch_size: usize) -> Fixture {
    let legacy = MemoryStore::new();
    let relational = MemoryStore::new();
    let control = MemoryStore::new();
    let clock = Clock::manual(epoch());
    let runner = MigrationRunner::new(
      legacy.clone(),
      relational.clone(),
      control.clone(),
      MigrationConfig {
        batch_size:          NonZeroUsize::new(batch_size).unwrap(),
        reconcile_tolerance: 0,
      },
      clock.clone(),
    );
    Fixture { legacy, relational, control, clock, runner }
  }

  impl Fixture {
    fn legacy_tracker(&self) -> ProgressTracker<MemoryStore> {
      ProgressTracker::new(self.legacy.clone(), machine(), self.clock.clone())
    }

    async fn seed(&self) -> Vec<ProgressKey> {
      let t = self.legacy_tracker();
      let keys = vec![
        ProgressKey::course(1, 1),
        ProgressKey::lesson(10, 1),
        ProgressKey::lesson(11, 1),
        ProgressKey::quiz(100, 1),
        ProgressKey::course(1, 2),
      ];
      t.start(keys[0], None).await.unwrap();
      t.complete(keys[1], None).await.unwrap();
      t.start(keys[2], None).await.unwrap();
      t.complete(keys[2], None).await.unwrap();
      let mut failed = t.complete(keys[3], None).await.unwrap();
      failed.complete(epoch(), RawStatus::Failed, epoch());
      self.legacy.import(&failed).await.unwrap();
      t.complete(keys[4], None).await.unwrap();
      keys
    }

    async fn run_to_end(&self) -> Vec<MigrationStep> {
      let mut steps = Vec::new();
      for _ in 0..50 {
        let step = self.runner.advance_migration().await.unwrap();
        let finished = matches!(step, MigrationStep::Cutover | MigrationStep::AlreadyDone);
        steps.push(step);
        if finished {
          break;
        }
      }
      steps
    }

    async fn relational_rows(&self) -> Vec<Progress> {
      let mut rows = Vec::new();
      let mut after = 0;
      loop {
        let batch = self.relational.scan_after(after, 100).await.unwrap();
        let Some(last) = batch.last() else { break };
        after = last.id();
        rows.extend(batch);
      }
      rows
    }
  }

  #[tokio::test]
  async fn migrated_status_matches_legacy_status() {
    let f = fixture(2);
    let keys = f.seed().await;
    let m = machine();

    let mut before = Vec::new();
    for key in &keys {
      let p = f.legacy.find(*key).await.unwrap().unwrap();
      before.push((m.status_of(&p), p));
    }

    let steps = f.run_to_end().await;
    assert_eq!(steps.last(), Some(&MigrationStep::Cutover));
    assert_eq!(f.runner.get_migration_state().await.unwrap(), MigrationState::Done);

    for (key, (status, legacy)) in keys.iter().zip(before) {
      let migrated = f.relational.find(*key).await.unwrap().unwrap();
      assert_eq!(m.status_of(&migrated), status, "{key}");
      assert_eq!(migrated.raw_status(), legacy.raw_status());
      assert_eq!(migrated.started_at(), legacy.started_at());
      assert_eq!(migrated.completed_at(), legacy.completed_at());
      assert_eq!(migrated.created_at(), legacy.created_at());
      assert_eq!(migrated.updated_at(), legacy.updated_at());
    }
  }

  #[tokio::test]
  async fn running_twice_yields_the_same_rows() {
    let f = fixture(3);
    f.seed().await;

    f.run_to_end().await;
    let once = f.relational_rows().await;

    f.runner.set_migration_state(MigrationState::NotStarted).await.unwrap();
    f.run_to_end().await;
    let twice = f.relational_rows().await;

    assert_eq!(once.len(), 5);
    assert_eq!(once, twice);
  }

  #[tokio::test]
  async fn failed_batch_keeps_cursor_and_retries() {
    let f = fixture(2);
    f.seed().await;

    assert!(matches!(
      f.runner.advance_migration().await.unwrap(),
      MigrationStep::Copied { copied: 2, .. }
    ));
    let cursor = f.control.cursor().await.unwrap();

    f.relational.fail_writes(true);
    assert!(matches!(
      f.runner.advance_migration().await.unwrap(),
      MigrationStep::BatchFailed { .. }
    ));
    assert_eq!(f.control.cursor().await.unwrap(), cursor);
    assert_eq!(f.runner.get_migration_state().await.unwrap(), MigrationState::InProgress);

    f.relational.fail_writes(false);
    let steps = f.run_to_end().await;
    assert_eq!(steps.last(), Some(&MigrationStep::Cutover));
    assert_eq!(f.relational_rows().await.len(), 5);
  }

  #[tokio::test]
  async fn catch_up_copies_records_changed_after_copy() {
    let f = fixture(10);
    let keys = f.seed().await;
    f.clock.advance(Duration::minutes(1));

    // One batch copies everything.
    assert!(matches!(
      f.runner.advance_migration().await.unwrap(),
      MigrationStep::Copied { copied: 5, .. }
    ));

    // Live traffic keeps writing to the legacy backend.
    f.clock.advance(Duration::minutes(1));
    let t = f.legacy_tracker();
    t.complete(keys[0], None).await.unwrap();
    t.start(ProgressKey::course(2, 9), None).await.unwrap();

    let steps = f.run_to_end().await;
    assert!(steps.iter().any(|s| matches!(s, MigrationStep::CaughtUp { .. })));
    assert_eq!(steps.last(), Some(&MigrationStep::Cutover));

    let m = machine();
    let migrated = f.relational.find(keys[0]).await.unwrap().unwrap();
    assert!(m.is_complete(&migrated));
    assert!(f.relational.find(ProgressKey::course(2, 9)).await.unwrap().is_some());
  }

  #[tokio::test]
  async fn writes_behind_the_catch_up_cursor_are_not_lost() {
    let f = fixture(1);
    let t = f.legacy_tracker();
    let first = t.start(ProgressKey::course(1, 1), None).await.unwrap();
    t.start(ProgressKey::course(1, 2), None).await.unwrap();

    let mut steps = Vec::new();
    loop {
      let step = f.runner.advance_migration().await.unwrap();
      let caught_up_first =
        matches!(step, MigrationStep::CaughtUp { last_id, .. } if last_id == first.id());
      steps.push(step);
      if caught_up_first {
        break;
      }
      assert!(steps.len() < 10, "catch-up never reached the first record: {steps:?}");
    }

    // The cursor has moved past the first record when the learner finishes.
    f.clock.advance(Duration::minutes(1));
    t.complete(first.key(), None).await.unwrap();

    let rest = f.run_to_end().await;
    assert!(rest.iter().any(|s| matches!(s, MigrationStep::PassRestarted { .. })));
    assert_eq!(rest.last(), Some(&MigrationStep::Cutover));

    let legacy = f.legacy.find(first.key()).await.unwrap().unwrap();
    let migrated = f.relational.find(first.key()).await.unwrap().unwrap();
    assert!(migrated.same_state(&legacy));
    assert!(machine().is_complete(&migrated));
  }

  #[tokio::test]
  async fn quiet_catch_up_pass_cuts_over_without_restarting() {
    let f = fixture(2);
    f.seed().await;

    let steps = f.run_to_end().await;
    assert!(!steps.iter().any(|s| matches!(s, MigrationStep::PassRestarted { .. })));
    assert_eq!(steps.last(), Some(&MigrationStep::Cutover));
  }

  #[tokio::test]
  async fn mismatch_blocks_cutover() {
    let f = fixture(10);
    f.seed().await;
    // A relational row with no legacy counterpart.
    let stray = Progress::new(0, ProgressKey::course(77, 77), epoch());
    f.relational.import(&stray).await.unwrap();

    let steps = f.run_to_end().await;
    assert!(steps.iter().any(|s| matches!(
      s,
      MigrationStep::Mismatch { kind: ProgressKind::Course, legacy: 2, relational: 3 }
    )));
    assert_ne!(steps.last(), Some(&MigrationStep::Cutover));
    assert_eq!(f.runner.get_migration_state().await.unwrap(), MigrationState::InProgress);
    assert!(f.control.reconciled_at().await.unwrap().is_none());
  }

  #[tokio::test]
  async fn cutover_requires_reconciliation() {
    let f = fixture(10);
    f.seed().await;

    let err = f.runner.set_migration_state(MigrationState::Done).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { from: MigrationState::NotStarted, .. }));

    f.runner.set_migration_state(MigrationState::InProgress).await.unwrap();
    let err = f.runner.set_migration_state(MigrationState::Done).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { from: MigrationState::InProgress, .. }));
    assert_eq!(f.runner.get_migration_state().await.unwrap(), MigrationState::InProgress);
  }

  #[tokio::test]
  async fn reverting_restores_legacy_and_requires_fresh_reconciliation() {
    let f = fixture(10);
    f.seed().await;
    f.run_to_end().await;

    f.runner.set_migration_state(MigrationState::InProgress).await.unwrap();
    assert!(f.control.reconciled_at().await.unwrap().is_none());
    assert!(matches!(f.control.cursor().await.unwrap(), MigrationCursor::CatchUp { last_id: 0, .. }));
    assert!(f.runner.set_migration_state(MigrationState::Done).await.is_err());

    // Legacy data was never touched.
    assert_eq!(f.legacy.count(ProgressKind::Course).await.unwrap(), 2);

    let steps = f.run_to_end().await;
    assert_eq!(steps.last(), Some(&MigrationStep::Cutover));
  }

  #[tokio::test]
  async fn done_is_terminal_for_advance() {
    let f = fixture(10);
    f.run_to_end().await;
    assert_eq!(f.runner.advance_migration().await.unwrap(), MigrationStep::AlreadyDone);
  }
}
