//! Encoding and decoding helpers between domain types and the plain values
//! stored in SQLite columns.
//!
//! All timestamps are stored as fixed-width RFC 3339 UTC strings with
//! nanoseconds, so they round-trip exactly and compare correctly as text.
//! Relational metadata is stored as compact JSON.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use waypoint_core::{
  model::{Progress, ProgressKey, ProgressKind, ProgressParts},
  status::RawStatus,
};

use crate::{Error, Result};

// ─── Identifiers ─────────────────────────────────────────────────────────────

pub fn encode_id(id: u64) -> Result<i64> {
  i64::try_from(id).map_err(|_| Error::IdOutOfRange(id.to_string()))
}

pub fn decode_id(id: i64) -> Result<u64> {
  u64::try_from(id).map_err(|_| Error::IdOutOfRange(id.to_string()))
}

pub fn encode_limit(limit: usize) -> i64 { i64::try_from(limit).unwrap_or(i64::MAX) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339_opts(SecondsFormat::Nanos, true) }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<&str>) -> Result<Option<DateTime<Utc>>> {
  s.map(decode_dt).transpose()
}

// ─── Activity log entry types ────────────────────────────────────────────────

pub fn encode_entry_type(kind: ProgressKind) -> &'static str {
  match kind {
    ProgressKind::Course => "course_status",
    ProgressKind::Lesson => "lesson_status",
    ProgressKind::Quiz => "quiz_status",
  }
}

pub fn decode_entry_type(s: &str) -> Result<ProgressKind> {
  match s {
    "course_status" => Ok(ProgressKind::Course),
    "lesson_status" => Ok(ProgressKind::Lesson),
    "quiz_status" => Ok(ProgressKind::Quiz),
    other => Err(Error::UnknownEntryType(other.to_owned())),
  }
}

// ─── Progress tables ─────────────────────────────────────────────────────────

/// Table and owner column for one progress kind.
#[derive(Debug, Clone, Copy)]
pub struct ProgressTable {
  pub name:         &'static str,
  pub owner_column: &'static str,
}

pub fn progress_table(kind: ProgressKind) -> ProgressTable {
  match kind {
    ProgressKind::Course => ProgressTable { name: "course_progress", owner_column: "course_id" },
    ProgressKind::Lesson => ProgressTable { name: "lesson_progress", owner_column: "lesson_id" },
    ProgressKind::Quiz => ProgressTable { name: "quiz_progress", owner_column: "quiz_id" },
  }
}

// ─── Metadata ────────────────────────────────────────────────────────────────

pub fn encode_metadata(metadata: &BTreeMap<String, String>) -> Result<String> {
  Ok(serde_json::to_string(metadata)?)
}

pub fn decode_metadata(s: &str) -> Result<BTreeMap<String, String>> {
  Ok(serde_json::from_str(s)?)
}

/// Activity log meta keys that carry progress fields. Every other key is
/// surfaced as record metadata.
pub const META_STATUS: &str = "status";
pub const META_START: &str = "start";
pub const META_COMPLETE: &str = "complete";
pub const META_UPDATED: &str = "updated";

fn is_reserved_meta(key: &str) -> bool {
  matches!(key, META_STATUS | META_START | META_COMPLETE | META_UPDATED)
}

/// The full meta key-value set for a log entry holding `progress`.
pub fn encode_log_meta(progress: &Progress) -> Vec<(String, String)> {
  let mut meta = Vec::with_capacity(4 + progress.metadata().len());
  if let Some(raw) = progress.raw_status() {
    meta.push((META_STATUS.to_owned(), raw.as_str().to_owned()));
  }
  if let Some(at) = progress.started_at() {
    meta.push((META_START.to_owned(), encode_dt(at)));
  }
  if let Some(at) = progress.completed_at() {
    meta.push((META_COMPLETE.to_owned(), encode_dt(at)));
  }
  meta.push((META_UPDATED.to_owned(), encode_dt(progress.updated_at())));
  meta.extend(
    progress
      .metadata()
      .iter()
      .filter(|(k, _)| !is_reserved_meta(k))
      .map(|(k, v)| (k.clone(), v.clone())),
  );
  meta
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read from an `activity_log` row plus its `activity_meta` rows.
pub struct RawLogEntry {
  pub entry_id:   i64,
  pub entry_type: String,
  pub owner_id:   i64,
  pub user_id:    i64,
  pub logged_at:  String,
  pub meta:       Vec<(String, String)>,
}

impl RawLogEntry {
  pub fn into_progress(self) -> Result<Progress> {
    let kind = decode_entry_type(&self.entry_type)?;
    let created_at = decode_dt(&self.logged_at)?;
    let mut parts = ProgressParts {
      id: self.entry_id,
      key: ProgressKey::new(kind, decode_id(self.owner_id)?, decode_id(self.user_id)?),
      raw_status: None,
      started_at: None,
      completed_at: None,
      created_at,
      updated_at: created_at,
      metadata: BTreeMap::new(),
    };

    for (key, value) in self.meta {
      if !is_reserved_meta(&key) {
        parts.metadata.insert(key, value);
        continue;
      }
      match key.as_str() {
        META_STATUS => parts.raw_status = Some(RawStatus::parse(&value)),
        META_START => parts.started_at = Some(decode_dt(&value)?),
        META_COMPLETE => parts.completed_at = Some(decode_dt(&value)?),
        _ => parts.updated_at = decode_dt(&value)?,
      }
    }

    Ok(Progress::from_parts(parts))
  }
}

/// Raw values read from a `*_progress` row.
pub struct RawProgressRow {
  pub id:           i64,
  pub owner_id:     i64,
  pub user_id:      i64,
  pub status:       Option<String>,
  pub started_at:   Option<String>,
  pub completed_at: Option<String>,
  pub created_at:   String,
  pub updated_at:   String,
  pub metadata:     String,
}

impl RawProgressRow {
  pub fn into_progress(self, kind: ProgressKind) -> Result<Progress> {
    Ok(Progress::from_parts(ProgressParts {
      id:           self.id,
      key:          ProgressKey::new(kind, decode_id(self.owner_id)?, decode_id(self.user_id)?),
      raw_status:   self.status.as_deref().map(RawStatus::parse),
      started_at:   decode_opt_dt(self.started_at.as_deref())?,
      completed_at: decode_opt_dt(self.completed_at.as_deref())?,
      created_at:   decode_dt(&self.created_at)?,
      updated_at:   decode_dt(&self.updated_at)?,
      metadata:     decode_metadata(&self.metadata)?,
    }))
  }
}

/// Column values ready to bind for an upsert into a `*_progress` table.
pub struct EncodedProgressRow {
  pub owner_id:     i64,
  pub user_id:      i64,
  pub status:       Option<String>,
  pub started_at:   Option<String>,
  pub completed_at: Option<String>,
  pub created_at:   String,
  pub updated_at:   String,
  pub metadata:     String,
}

impl EncodedProgressRow {
  pub fn encode(progress: &Progress) -> Result<Self> {
    Ok(Self {
      owner_id:     encode_id(progress.owner_id())?,
      user_id:      encode_id(progress.user_id())?,
      status:       progress.raw_status().map(|raw| raw.as_str().to_owned()),
      started_at:   progress.started_at().map(encode_dt),
      completed_at: progress.completed_at().map(encode_dt),
      created_at:   encode_dt(progress.created_at()),
      updated_at:   encode_dt(progress.updated_at()),
      metadata:     encode_metadata(progress.metadata())?,
    })
  }
}

#[cfg(test)]
mod tests {
  use chrono::{Duration, TimeZone};

  use super::*;

  #[test]
  fn timestamps_round_trip_and_sort_as_text() {
    let base = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let later = base + Duration::nanoseconds(5);

    assert_eq!(decode_dt(&encode_dt(later)).unwrap(), later);
    assert!(encode_dt(base) < encode_dt(later));
    assert_eq!(encode_dt(base).len(), encode_dt(later).len());
  }

  #[test]
  fn log_meta_round_trips_progress() {
    let at = Utc.timestamp_opt(1_700_000_000, 42).unwrap();
    let mut p = Progress::new(7, ProgressKey::lesson(3, 4), at);
    p.complete(at, RawStatus::Failed, at + Duration::seconds(1));
    p.set_metadata("grade", "40");

    let raw = RawLogEntry {
      entry_id:   7,
      entry_type: encode_entry_type(ProgressKind::Lesson).to_owned(),
      owner_id:   3,
      user_id:    4,
      logged_at:  encode_dt(at),
      meta:       encode_log_meta(&p),
    };

    assert_eq!(raw.into_progress().unwrap(), p);
  }

  #[test]
  fn negative_ids_are_rejected() {
    assert!(matches!(decode_id(-1), Err(Error::IdOutOfRange(_))));
    assert!(matches!(encode_id(u64::MAX), Err(Error::IdOutOfRange(_))));
  }
}
