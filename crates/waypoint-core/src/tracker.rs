//! [`ProgressTracker`]: the progress interface controllers, cron jobs, and
//! render callbacks talk to.

use chrono::{DateTime, Utc};

use crate::{
  clock::Clock,
  model::{Progress, ProgressKey, Transition},
  status::{ProgressStatus, StatusMachine},
  store::ProgressStore,
};

/// Start, complete, and read progress through whichever backend it was built
/// with. Holds no mutable state between calls.
#[derive(Debug, Clone)]
pub struct ProgressTracker<S> {
  store:   S,
  machine: StatusMachine,
  clock:   Clock,
}

impl<S: ProgressStore> ProgressTracker<S> {
  pub fn new(store: S, machine: StatusMachine, clock: Clock) -> Self {
    Self { store, machine, clock }
  }

  pub fn store(&self) -> &S { &self.store }

  pub fn machine(&self) -> &StatusMachine { &self.machine }

  /// Mark `key` in progress, creating the record if needed. Without `at`,
  /// `started_at` is overwritten with the current time on every call.
  pub async fn start(
    &self,
    key: ProgressKey,
    at: Option<DateTime<Utc>>,
  ) -> Result<Progress, S::Error> {
    let now = self.clock.now();
    let at = at.unwrap_or(now);
    let progress = self.store.record(key, Transition::Start { at }, now).await?;
    tracing::debug!(%key, id = progress.id(), "progress started");
    Ok(progress)
  }

  /// Mark `key` complete, creating the record if needed. Lessons with a
  /// gradable quiz record a quiz outcome instead of a plain completion.
  pub async fn complete(
    &self,
    key: ProgressKey,
    at: Option<DateTime<Utc>>,
  ) -> Result<Progress, S::Error> {
    let now = self.clock.now();
    let at = at.unwrap_or(now);
    let raw = self.machine.completion_marker(&key);
    let progress = self
      .store
      .record(key, Transition::Complete { at, raw }, now)
      .await?;
    tracing::debug!(%key, id = progress.id(), raw = ?progress.raw_status(), "progress completed");
    Ok(progress)
  }

  pub async fn get(&self, key: ProgressKey) -> Result<Option<Progress>, S::Error> {
    self.store.find(key).await
  }

  /// The learner-facing status, or `None` if the learner has not engaged.
  pub async fn status(&self, key: ProgressKey) -> Result<Option<ProgressStatus>, S::Error> {
    Ok(self.store.find(key).await?.map(|p| self.machine.status_of(&p)))
  }

  pub async fn is_complete(&self, key: ProgressKey) -> Result<bool, S::Error> {
    Ok(self.status(key).await? == Some(ProgressStatus::Complete))
  }

  pub fn status_of(&self, progress: &Progress) -> ProgressStatus {
    self.machine.status_of(progress)
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use chrono::{Duration, TimeZone};

  use super::*;
  use crate::{
    memory::MemoryStore,
    quiz::{LessonQuiz, QuizSettings},
    status::RawStatus,
  };

  const STRICT_LESSON: u64 = 10;
  const LENIENT_LESSON: u64 = 20;
  const PLAIN_LESSON: u64 = 30;

  fn epoch() -> DateTime<Utc> { Utc.timestamp_opt(1_700_000_000, 0).unwrap() }

  fn tracker() -> (ProgressTracker<MemoryStore>, Clock) {
    let quizzes = QuizSettings::default()
      .with_lesson(LessonQuiz {
        lesson_id:     STRICT_LESSON,
        quiz_id:       Some(100),
        gradable:      true,
        pass_required: true,
      })
      .with_lesson(LessonQuiz {
        lesson_id:     LENIENT_LESSON,
        quiz_id:       Some(200),
        gradable:      true,
        pass_required: false,
      });
    let clock = Clock::manual(epoch());
    let tracker = ProgressTracker::new(
      MemoryStore::new(),
      StatusMachine::new(Arc::new(quizzes)),
      clock.clone(),
    );
    (tracker, clock)
  }

  #[tokio::test]
  async fn start_returns_exact_started_at() {
    let (t, _) = tracker();
    let key = ProgressKey::course(1, 2);
    let at = epoch() - Duration::days(3) + Duration::nanoseconds(7);

    t.start(key, Some(at)).await.unwrap();

    let p = t.get(key).await.unwrap().unwrap();
    assert_eq!(p.started_at(), Some(at));
  }

  #[tokio::test]
  async fn complete_returns_exact_completed_at() {
    let (t, _) = tracker();
    let key = ProgressKey::course(1, 2);
    let at = epoch() + Duration::milliseconds(1);

    t.complete(key, Some(at)).await.unwrap();

    let p = t.get(key).await.unwrap().unwrap();
    assert_eq!(p.completed_at(), Some(at));
    assert_eq!(p.started_at(), None);
  }

  #[tokio::test]
  async fn fresh_start_is_in_progress() {
    let (t, _) = tracker();
    let key = ProgressKey::lesson(PLAIN_LESSON, 2);

    t.start(key, None).await.unwrap();

    assert_eq!(t.status(key).await.unwrap(), Some(ProgressStatus::InProgress));
    assert!(!t.is_complete(key).await.unwrap());
  }

  #[tokio::test]
  async fn complete_without_quiz_is_complete() {
    let (t, _) = tracker();
    let key = ProgressKey::lesson(PLAIN_LESSON, 2);

    let p = t.complete(key, None).await.unwrap();

    assert_eq!(p.raw_status(), Some(&RawStatus::Complete));
    assert!(t.is_complete(key).await.unwrap());
  }

  #[tokio::test]
  async fn complete_with_gradable_quiz_records_pass() {
    let (t, _) = tracker();
    let key = ProgressKey::lesson(STRICT_LESSON, 2);

    let p = t.complete(key, None).await.unwrap();

    assert_eq!(p.raw_status(), Some(&RawStatus::Passed));
    assert_eq!(t.status(key).await.unwrap(), Some(ProgressStatus::Complete));
  }

  #[tokio::test]
  async fn failed_quiz_outcome_respects_pass_requirement() {
    let (t, _) = tracker();

    for (lesson, expected) in [
      (STRICT_LESSON, ProgressStatus::InProgress),
      (LENIENT_LESSON, ProgressStatus::Complete),
    ] {
      let key = ProgressKey::lesson(lesson, 2);
      let mut graded = t.complete(key, None).await.unwrap();
      // The grading collaborator overwrites the outcome.
      graded.complete(graded.completed_at().unwrap(), RawStatus::Failed, epoch());
      t.store().import(&graded).await.unwrap();

      assert_eq!(t.status(key).await.unwrap(), Some(expected));
    }
  }

  #[tokio::test]
  async fn repeated_starts_share_one_record_and_latest_wins() {
    let (t, clock) = tracker();
    let key = ProgressKey::lesson(PLAIN_LESSON, 2);

    let first = t.start(key, None).await.unwrap();
    clock.advance(Duration::seconds(90));
    let second = t.start(key, None).await.unwrap();

    assert_eq!(first.id(), second.id());
    assert_eq!(second.started_at(), Some(epoch() + Duration::seconds(90)));
    assert_eq!(second.created_at(), epoch());
    assert_eq!(t.store().count(key.kind).await.unwrap(), 1);
  }

  #[tokio::test]
  async fn restart_after_completion_reopens_progress() {
    let (t, clock) = tracker();
    let key = ProgressKey::course(1, 2);

    t.complete(key, None).await.unwrap();
    clock.advance(Duration::seconds(5));
    let p = t.start(key, None).await.unwrap();

    assert_eq!(t.status_of(&p), ProgressStatus::InProgress);
    assert_eq!(p.completed_at(), Some(epoch()));
    assert_eq!(p.updated_at(), epoch() + Duration::seconds(5));
  }

  #[tokio::test]
  async fn unknown_key_is_absent_not_an_error() {
    let (t, _) = tracker();
    let key = ProgressKey::quiz(5, 6);

    assert_eq!(t.get(key).await.unwrap(), None);
    assert_eq!(t.status(key).await.unwrap(), None);
    assert!(!t.is_complete(key).await.unwrap());
  }
}
