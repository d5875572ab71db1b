//! Status derivation: internal raw values plus quiz facts in, one of two
//! learner-facing statuses out.

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
  model::{Progress, ProgressKey, ProgressKind},
  quiz::QuizCatalog,
};

// ─── Raw status ──────────────────────────────────────────────────────────────

/// The status value a backend stores.
///
/// Only the values confirmed by the grading collaborator get their own
/// variant. Anything else is kept verbatim in `Other` so it survives storage
/// and migration unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RawStatus {
  InProgress,
  Complete,
  Graded,
  Passed,
  Failed,
  Other(String),
}

impl RawStatus {
  pub fn as_str(&self) -> &str {
    match self {
      Self::InProgress => "in-progress",
      Self::Complete => "complete",
      Self::Graded => "graded",
      Self::Passed => "passed",
      Self::Failed => "failed",
      Self::Other(s) => s,
    }
  }

  pub fn parse(s: &str) -> Self {
    match s {
      "in-progress" => Self::InProgress,
      "complete" => Self::Complete,
      "graded" => Self::Graded,
      "passed" => Self::Passed,
      "failed" => Self::Failed,
      other => Self::Other(other.to_owned()),
    }
  }
}

impl From<String> for RawStatus {
  fn from(s: String) -> Self { Self::parse(&s) }
}

impl From<RawStatus> for String {
  fn from(raw: RawStatus) -> Self { raw.as_str().to_owned() }
}

impl fmt::Display for RawStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

// ─── External status ─────────────────────────────────────────────────────────

/// The only two statuses callers ever see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProgressStatus {
  InProgress,
  Complete,
}

impl ProgressStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::InProgress => "in-progress",
      Self::Complete => "complete",
    }
  }
}

impl fmt::Display for ProgressStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

// ─── State machine ───────────────────────────────────────────────────────────

/// Maps raw status to [`ProgressStatus`], consulting the quiz catalog for the
/// one rule that depends on course design: a failed quiz only counts as
/// complete when passing is not required.
#[derive(Clone)]
pub struct StatusMachine {
  quizzes: Arc<dyn QuizCatalog>,
}

impl StatusMachine {
  pub fn new(quizzes: Arc<dyn QuizCatalog>) -> Self { Self { quizzes } }

  pub fn derive(
    &self,
    kind: ProgressKind,
    owner_id: u64,
    raw: Option<&RawStatus>,
  ) -> ProgressStatus {
    match raw {
      Some(RawStatus::Complete | RawStatus::Graded | RawStatus::Passed) => {
        ProgressStatus::Complete
      }
      Some(RawStatus::Failed) => match self.lesson_of(kind, owner_id) {
        Some(lesson_id) if !self.quizzes.quiz_requires_pass(lesson_id) => {
          ProgressStatus::Complete
        }
        _ => ProgressStatus::InProgress,
      },
      _ => ProgressStatus::InProgress,
    }
  }

  pub fn status_of(&self, progress: &Progress) -> ProgressStatus {
    self.derive(progress.kind(), progress.owner_id(), progress.raw_status())
  }

  pub fn is_complete(&self, progress: &Progress) -> bool {
    self.status_of(progress) == ProgressStatus::Complete
  }

  /// The raw value `complete()` writes for `key`. Lessons with a gradable
  /// quiz record a quiz outcome; everything else is plainly complete.
  pub fn completion_marker(&self, key: &ProgressKey) -> RawStatus {
    match key.kind {
      ProgressKind::Lesson if self.quizzes.lesson_has_gradable_quiz(key.owner_id) => {
        RawStatus::Passed
      }
      _ => RawStatus::Complete,
    }
  }

  fn lesson_of(&self, kind: ProgressKind, owner_id: u64) -> Option<u64> {
    match kind {
      ProgressKind::Lesson => Some(owner_id),
      ProgressKind::Quiz => self.quizzes.lesson_for_quiz(owner_id),
      ProgressKind::Course => None,
    }
  }
}

impl fmt::Debug for StatusMachine {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StatusMachine").finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::quiz::{LessonQuiz, QuizSettings};

  fn machine() -> StatusMachine {
    let quizzes = QuizSettings::default()
      .with_lesson(LessonQuiz {
        lesson_id:     10,
        quiz_id:       Some(100),
        gradable:      true,
        pass_required: true,
      })
      .with_lesson(LessonQuiz {
        lesson_id:     20,
        quiz_id:       Some(200),
        gradable:      true,
        pass_required: false,
      });
    StatusMachine::new(Arc::new(quizzes))
  }

  #[test]
  fn terminal_raw_values_are_complete() {
    let m = machine();
    for raw in [RawStatus::Complete, RawStatus::Graded, RawStatus::Passed] {
      assert_eq!(
        m.derive(ProgressKind::Lesson, 10, Some(&raw)),
        ProgressStatus::Complete
      );
    }
  }

  #[test]
  fn failed_depends_on_pass_requirement() {
    let m = machine();
    let failed = Some(&RawStatus::Failed);
    assert_eq!(m.derive(ProgressKind::Lesson, 10, failed), ProgressStatus::InProgress);
    assert_eq!(m.derive(ProgressKind::Lesson, 20, failed), ProgressStatus::Complete);
    // No quiz configured for the lesson: the learner still has to retry.
    assert_eq!(m.derive(ProgressKind::Lesson, 30, failed), ProgressStatus::InProgress);
  }

  #[test]
  fn failed_quiz_progress_resolves_through_its_lesson() {
    let m = machine();
    let failed = Some(&RawStatus::Failed);
    assert_eq!(m.derive(ProgressKind::Quiz, 100, failed), ProgressStatus::InProgress);
    assert_eq!(m.derive(ProgressKind::Quiz, 200, failed), ProgressStatus::Complete);
    assert_eq!(m.derive(ProgressKind::Course, 20, failed), ProgressStatus::InProgress);
  }

  #[test]
  fn everything_else_is_in_progress() {
    let m = machine();
    let other = RawStatus::parse("ungraded");
    assert_eq!(other, RawStatus::Other("ungraded".into()));
    assert_eq!(m.derive(ProgressKind::Lesson, 20, Some(&other)), ProgressStatus::InProgress);
    assert_eq!(
      m.derive(ProgressKind::Lesson, 20, Some(&RawStatus::InProgress)),
      ProgressStatus::InProgress
    );
    assert_eq!(m.derive(ProgressKind::Course, 1, None), ProgressStatus::InProgress);
  }

  #[test]
  fn completion_marker_follows_gradable_quiz() {
    let m = machine();
    assert_eq!(m.completion_marker(&ProgressKey::lesson(10, 1)), RawStatus::Passed);
    assert_eq!(m.completion_marker(&ProgressKey::lesson(30, 1)), RawStatus::Complete);
    assert_eq!(m.completion_marker(&ProgressKey::course(10, 1)), RawStatus::Complete);
  }

  #[test]
  fn raw_status_round_trips_through_strings() {
    for s in ["in-progress", "complete", "graded", "passed", "failed", "ungraded"] {
      assert_eq!(RawStatus::parse(s).as_str(), s);
    }
    assert_eq!(ProgressStatus::InProgress.to_string(), "in-progress");
  }
}
