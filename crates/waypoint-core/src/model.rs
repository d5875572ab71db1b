//! The progress record shared by course, lesson, and quiz progress.
//!
//! All three kinds have one shape; only the owner reference differs. Both
//! storage backends build their records through the mutators here so that a
//! `start` or `complete` means the same thing whichever backend serves it.

use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, status::RawStatus};

// ─── Kind ────────────────────────────────────────────────────────────────────

/// What a progress record tracks advancement through.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ProgressKind {
  Course,
  Lesson,
  Quiz,
}

impl ProgressKind {
  pub const ALL: [Self; 3] = [Self::Course, Self::Lesson, Self::Quiz];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Course => "course",
      Self::Lesson => "lesson",
      Self::Quiz => "quiz",
    }
  }
}

impl fmt::Display for ProgressKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ProgressKind {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "course" => Ok(Self::Course),
      "lesson" => Ok(Self::Lesson),
      "quiz" => Ok(Self::Quiz),
      other => Err(Error::UnknownKind(other.to_owned())),
    }
  }
}

// ─── Key ─────────────────────────────────────────────────────────────────────

/// The natural key of a progress record. At most one record exists per key.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ProgressKey {
  pub kind:     ProgressKind,
  /// Course, lesson, or quiz identifier depending on `kind`.
  pub owner_id: u64,
  pub user_id:  u64,
}

impl ProgressKey {
  pub fn new(kind: ProgressKind, owner_id: u64, user_id: u64) -> Self {
    Self { kind, owner_id, user_id }
  }

  pub fn course(course_id: u64, user_id: u64) -> Self {
    Self::new(ProgressKind::Course, course_id, user_id)
  }

  pub fn lesson(lesson_id: u64, user_id: u64) -> Self {
    Self::new(ProgressKind::Lesson, lesson_id, user_id)
  }

  pub fn quiz(quiz_id: u64, user_id: u64) -> Self {
    Self::new(ProgressKind::Quiz, quiz_id, user_id)
  }
}

impl fmt::Display for ProgressKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}/user:{}", self.kind, self.owner_id, self.user_id)
  }
}

// ─── Transition ──────────────────────────────────────────────────────────────

/// A mutation a backend applies atomically: load or create the record for a
/// key, apply the transition, write it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
  Start { at: DateTime<Utc> },
  /// `raw` is the completion marker chosen by the status machine.
  Complete { at: DateTime<Utc>, raw: RawStatus },
}

// ─── Progress ────────────────────────────────────────────────────────────────

/// Plain field bag used by backends to rebuild a [`Progress`] from storage.
#[derive(Debug, Clone)]
pub struct ProgressParts {
  pub id:           i64,
  pub key:          ProgressKey,
  pub raw_status:   Option<RawStatus>,
  pub started_at:   Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
  pub created_at:   DateTime<Utc>,
  pub updated_at:   DateTime<Utc>,
  pub metadata:     BTreeMap<String, String>,
}

/// Durable state of one learner's advancement through a course, lesson, or
/// quiz.
///
/// `raw_status` is backend vocabulary; callers read it only through
/// [`StatusMachine`](crate::status::StatusMachine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
  id:           i64,
  key:          ProgressKey,
  raw_status:   Option<RawStatus>,
  started_at:   Option<DateTime<Utc>>,
  completed_at: Option<DateTime<Utc>>,
  created_at:   DateTime<Utc>,
  updated_at:   DateTime<Utc>,
  metadata:     BTreeMap<String, String>,
}

impl Progress {
  /// A freshly created record with no status and no timestamps besides the
  /// creation time.
  pub fn new(id: i64, key: ProgressKey, created_at: DateTime<Utc>) -> Self {
    Self {
      id,
      key,
      raw_status: None,
      started_at: None,
      completed_at: None,
      created_at,
      updated_at: created_at,
      metadata: BTreeMap::new(),
    }
  }

  /// Rebuild a record from stored fields. `updated_at` is clamped to never
  /// precede `created_at`.
  pub fn from_parts(parts: ProgressParts) -> Self {
    Self {
      id:           parts.id,
      key:          parts.key,
      raw_status:   parts.raw_status,
      started_at:   parts.started_at,
      completed_at: parts.completed_at,
      created_at:   parts.created_at,
      updated_at:   parts.updated_at.max(parts.created_at),
      metadata:     parts.metadata,
    }
  }

  pub fn into_parts(self) -> ProgressParts {
    ProgressParts {
      id:           self.id,
      key:          self.key,
      raw_status:   self.raw_status,
      started_at:   self.started_at,
      completed_at: self.completed_at,
      created_at:   self.created_at,
      updated_at:   self.updated_at,
      metadata:     self.metadata,
    }
  }

  /// The same record under a backend-assigned identifier.
  pub fn with_id(mut self, id: i64) -> Self {
    self.id = id;
    self
  }

  /// Whether `other` holds the same progress, ignoring backend identifiers.
  pub fn same_state(&self, other: &Progress) -> bool {
    self.key == other.key
      && self.raw_status == other.raw_status
      && self.started_at == other.started_at
      && self.completed_at == other.completed_at
      && self.created_at == other.created_at
      && self.updated_at == other.updated_at
      && self.metadata == other.metadata
  }

  // ── Accessors ─────────────────────────────────────────────────────────────

  pub fn id(&self) -> i64 { self.id }

  pub fn key(&self) -> ProgressKey { self.key }

  pub fn kind(&self) -> ProgressKind { self.key.kind }

  pub fn owner_id(&self) -> u64 { self.key.owner_id }

  pub fn user_id(&self) -> u64 { self.key.user_id }

  pub fn raw_status(&self) -> Option<&RawStatus> { self.raw_status.as_ref() }

  pub fn started_at(&self) -> Option<DateTime<Utc>> { self.started_at }

  pub fn completed_at(&self) -> Option<DateTime<Utc>> { self.completed_at }

  pub fn created_at(&self) -> DateTime<Utc> { self.created_at }

  pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

  pub fn metadata(&self) -> &BTreeMap<String, String> { &self.metadata }

  // ── Mutators ──────────────────────────────────────────────────────────────

  /// Mark the record in progress. Every call overwrites `started_at`, so the
  /// latest start wins. `completed_at` is left as history.
  pub fn start(&mut self, at: DateTime<Utc>, now: DateTime<Utc>) {
    self.started_at = Some(at);
    self.raw_status = Some(RawStatus::InProgress);
    self.touch(now);
  }

  /// Mark the record complete with the given raw outcome. A record may be
  /// completed without ever having been started.
  pub fn complete(&mut self, at: DateTime<Utc>, raw: RawStatus, now: DateTime<Utc>) {
    self.completed_at = Some(at);
    self.raw_status = Some(raw);
    self.touch(now);
  }

  pub fn apply(&mut self, transition: &Transition, now: DateTime<Utc>) {
    match transition {
      Transition::Start { at } => self.start(*at, now),
      Transition::Complete { at, raw } => self.complete(*at, raw.clone(), now),
    }
  }

  /// Explicit setter used when importing records verbatim.
  pub fn set_updated_at(&mut self, at: DateTime<Utc>) {
    self.updated_at = at.max(self.created_at);
  }

  pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
    self.metadata.insert(key.into(), value.into());
  }

  fn touch(&mut self, now: DateTime<Utc>) {
    self.updated_at = now.max(self.created_at);
  }
}
