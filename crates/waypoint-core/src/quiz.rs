//! The quiz capability check consulted by the status machine.
//!
//! Grading itself lives elsewhere; this crate only asks whether a lesson has a
//! gradable quiz and whether that quiz demands a passing mark.

use serde::{Deserialize, Serialize};

/// Facts about lesson quizzes, supplied by the grading collaborator.
pub trait QuizCatalog: Send + Sync {
  /// Whether completing the lesson produces a quiz outcome.
  fn lesson_has_gradable_quiz(&self, lesson_id: u64) -> bool;

  /// Whether the lesson's quiz must be passed for the lesson to count as
  /// complete.
  fn quiz_requires_pass(&self, lesson_id: u64) -> bool;

  /// The lesson a quiz belongs to, if known.
  fn lesson_for_quiz(&self, _quiz_id: u64) -> Option<u64> { None }
}

/// Quiz settings for one lesson.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonQuiz {
  pub lesson_id:     u64,
  #[serde(default)]
  pub quiz_id:       Option<u64>,
  #[serde(default)]
  pub gradable:      bool,
  #[serde(default)]
  pub pass_required: bool,
}

/// A [`QuizCatalog`] read from configuration.
///
/// Lessons without an entry have no gradable quiz and require a pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuizSettings {
  #[serde(default)]
  pub lessons: Vec<LessonQuiz>,
}

impl QuizSettings {
  pub fn with_lesson(mut self, quiz: LessonQuiz) -> Self {
    self.lessons.retain(|q| q.lesson_id != quiz.lesson_id);
    self.lessons.push(quiz);
    self
  }

  fn lesson(&self, lesson_id: u64) -> Option<&LessonQuiz> {
    self.lessons.iter().find(|q| q.lesson_id == lesson_id)
  }
}

impl QuizCatalog for QuizSettings {
  fn lesson_has_gradable_quiz(&self, lesson_id: u64) -> bool {
    self.lesson(lesson_id).is_some_and(|q| q.gradable)
  }

  fn quiz_requires_pass(&self, lesson_id: u64) -> bool {
    self.lesson(lesson_id).is_none_or(|q| q.pass_required)
  }

  fn lesson_for_quiz(&self, quiz_id: u64) -> Option<u64> {
    self
      .lessons
      .iter()
      .find(|q| q.quiz_id == Some(quiz_id))
      .map(|q| q.lesson_id)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn later_entries_replace_earlier_ones() {
    let settings = QuizSettings::default()
      .with_lesson(LessonQuiz {
        lesson_id:     1,
        quiz_id:       Some(9),
        gradable:      true,
        pass_required: true,
      })
      .with_lesson(LessonQuiz {
        lesson_id:     1,
        quiz_id:       Some(9),
        gradable:      true,
        pass_required: false,
      });

    assert_eq!(settings.lessons.len(), 1);
    assert!(!settings.quiz_requires_pass(1));
    assert_eq!(settings.lesson_for_quiz(9), Some(1));
  }

  #[test]
  fn unknown_lessons_have_no_quiz_and_require_pass() {
    let settings = QuizSettings::default();
    assert!(!settings.lesson_has_gradable_quiz(7));
    assert!(settings.quiz_requires_pass(7));
    assert_eq!(settings.lesson_for_quiz(7), None);
  }
}
