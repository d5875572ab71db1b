//! [`LegacyLogStore`]: progress kept as activity log entries with key-value
//! metadata.
//!
//! Each (entry type, owner, user) has at most one entry, enforced by a UNIQUE
//! constraint on `activity_log`. Writes create that entry if needed and then
//! replace its metadata in place.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension as _, TransactionBehavior};
use waypoint_core::{
  model::{Progress, ProgressKey, ProgressKind, Transition},
  store::{LegacySource, ProgressStore},
};

use crate::{
  Error, Result,
  encode::{
    META_UPDATED, RawLogEntry, decode_id, encode_dt, encode_entry_type, encode_id,
    encode_limit, encode_log_meta,
  },
};

const ENTRY_COLUMNS: &str = "l.entry_id, l.entry_type, l.owner_id, l.user_id, l.logged_at";

/// SQL list of the entry types that hold progress. The log is shared with
/// other activity, which scans must skip.
fn progress_entry_types() -> String {
  ProgressKind::ALL
    .iter()
    .map(|kind| format!("'{}'", encode_entry_type(*kind)))
    .collect::<Vec<_>>()
    .join(", ")
}

// ─── Store ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct LegacyLogStore {
  conn: tokio_rusqlite::Connection,
}

impl LegacyLogStore {
  pub(crate) fn new(conn: tokio_rusqlite::Connection) -> Self { Self { conn } }

  async fn scan(
    &self,
    sql: String,
    since: Option<String>,
    after_id: i64,
    limit: usize,
  ) -> Result<Vec<Progress>> {
    let limit = encode_limit(limit);

    let raws: Vec<RawLogEntry> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let mut entries = match since {
          Some(since) => stmt
            .query_map(rusqlite::params![since, after_id, limit], read_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?,
          None => stmt
            .query_map(rusqlite::params![after_id, limit], read_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?,
        };
        for entry in &mut entries {
          load_meta(conn, entry)?;
        }
        Ok(entries)
      })
      .await?;

    raws.into_iter().map(RawLogEntry::into_progress).collect()
  }
}

// ─── Row helpers ─────────────────────────────────────────────────────────────

fn read_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawLogEntry> {
  Ok(RawLogEntry {
    entry_id:   row.get(0)?,
    entry_type: row.get(1)?,
    owner_id:   row.get(2)?,
    user_id:    row.get(3)?,
    logged_at:  row.get(4)?,
    meta:       Vec::new(),
  })
}

fn load_meta(conn: &rusqlite::Connection, entry: &mut RawLogEntry) -> rusqlite::Result<()> {
  let mut stmt =
    conn.prepare_cached("SELECT meta_key, meta_value FROM activity_meta WHERE entry_id = ?1")?;
  entry.meta = stmt
    .query_map(rusqlite::params![entry.entry_id], |row| Ok((row.get(0)?, row.get(1)?)))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(())
}

fn load_entry(
  conn: &rusqlite::Connection,
  entry_type: &str,
  owner_id: i64,
  user_id: i64,
) -> rusqlite::Result<Option<RawLogEntry>> {
  let entry = conn
    .query_row(
      &format!(
        "SELECT {ENTRY_COLUMNS} FROM activity_log l
         WHERE l.entry_type = ?1 AND l.owner_id = ?2 AND l.user_id = ?3"
      ),
      rusqlite::params![entry_type, owner_id, user_id],
      read_entry,
    )
    .optional()?;

  match entry {
    Some(mut entry) => {
      load_meta(conn, &mut entry)?;
      Ok(Some(entry))
    }
    None => Ok(None),
  }
}

fn insert_entry(
  conn: &rusqlite::Connection,
  entry_type: &str,
  owner_id: i64,
  user_id: i64,
  logged_at: DateTime<Utc>,
) -> rusqlite::Result<i64> {
  conn.execute(
    "INSERT INTO activity_log (entry_type, owner_id, user_id, logged_at)
     VALUES (?1, ?2, ?3, ?4)",
    rusqlite::params![entry_type, owner_id, user_id, encode_dt(logged_at)],
  )?;
  Ok(conn.last_insert_rowid())
}

/// Replace every meta row of `entry_id` with the fields of `progress`.
fn replace_meta(
  conn: &rusqlite::Connection,
  entry_id: i64,
  progress: &Progress,
) -> rusqlite::Result<()> {
  conn.execute(
    "DELETE FROM activity_meta WHERE entry_id = ?1",
    rusqlite::params![entry_id],
  )?;
  let mut stmt = conn.prepare_cached(
    "INSERT INTO activity_meta (entry_id, meta_key, meta_value) VALUES (?1, ?2, ?3)",
  )?;
  for (key, value) in encode_log_meta(progress) {
    stmt.execute(rusqlite::params![entry_id, key, value])?;
  }
  Ok(())
}

struct EncodedKey {
  entry_type: &'static str,
  owner_id:   i64,
  user_id:    i64,
}

impl EncodedKey {
  fn new(key: ProgressKey) -> Result<Self> {
    Ok(Self {
      entry_type: encode_entry_type(key.kind),
      owner_id:   encode_id(key.owner_id)?,
      user_id:    encode_id(key.user_id)?,
    })
  }
}

// ─── ProgressStore impl ──────────────────────────────────────────────────────

impl ProgressStore for LegacyLogStore {
  type Error = Error;

  async fn find(&self, key: ProgressKey) -> Result<Option<Progress>> {
    let k = EncodedKey::new(key)?;

    let raw: Option<RawLogEntry> = self
      .conn
      .call(move |conn| Ok(load_entry(conn, k.entry_type, k.owner_id, k.user_id)?))
      .await?;

    raw.map(RawLogEntry::into_progress).transpose()
  }

  async fn record(
    &self,
    key: ProgressKey,
    transition: Transition,
    now: DateTime<Utc>,
  ) -> Result<Progress> {
    let k = EncodedKey::new(key)?;

    let progress = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut progress = match load_entry(&tx, k.entry_type, k.owner_id, k.user_id)? {
          Some(raw) => raw.into_progress().map_err(Error::into_call)?,
          None => {
            let entry_id = insert_entry(&tx, k.entry_type, k.owner_id, k.user_id, now)?;
            Progress::new(entry_id, key, now)
          }
        };
        progress.apply(&transition, now);
        replace_meta(&tx, progress.id(), &progress)?;

        tx.commit()?;
        Ok(progress)
      })
      .await?;

    Ok(progress)
  }

  async fn import(&self, progress: &Progress) -> Result<Progress> {
    let k = EncodedKey::new(progress.key())?;
    let progress = progress.clone();

    let stored = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: Option<i64> = tx
          .query_row(
            "SELECT entry_id FROM activity_log
             WHERE entry_type = ?1 AND owner_id = ?2 AND user_id = ?3",
            rusqlite::params![k.entry_type, k.owner_id, k.user_id],
            |row| row.get(0),
          )
          .optional()?;

        let entry_id = match existing {
          Some(entry_id) => {
            tx.execute(
              "UPDATE activity_log SET logged_at = ?2 WHERE entry_id = ?1",
              rusqlite::params![entry_id, encode_dt(progress.created_at())],
            )?;
            entry_id
          }
          None => insert_entry(&tx, k.entry_type, k.owner_id, k.user_id, progress.created_at())?,
        };

        let stored = progress.with_id(entry_id);
        replace_meta(&tx, entry_id, &stored)?;

        tx.commit()?;
        Ok(stored)
      })
      .await?;

    Ok(stored)
  }

  async fn count(&self, kind: ProgressKind) -> Result<u64> {
    let entry_type = encode_entry_type(kind);

    let count: i64 = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "SELECT COUNT(*) FROM activity_log WHERE entry_type = ?1",
          rusqlite::params![entry_type],
          |row| row.get(0),
        )?)
      })
      .await?;

    decode_id(count)
  }
}

// ─── LegacySource impl ───────────────────────────────────────────────────────

impl LegacySource for LegacyLogStore {
  async fn scan_after(&self, after_id: i64, limit: usize) -> Result<Vec<Progress>> {
    let sql = format!(
      "SELECT {ENTRY_COLUMNS} FROM activity_log l
       WHERE l.entry_id > ?1
         AND l.entry_type IN ({types})
       ORDER BY l.entry_id
       LIMIT ?2",
      types = progress_entry_types(),
    );
    self.scan(sql, None, after_id, limit).await
  }

  async fn scan_modified_since(
    &self,
    since: DateTime<Utc>,
    after_id: i64,
    limit: usize,
  ) -> Result<Vec<Progress>> {
    // Entries written before `updated` was tracked fall back to their log time.
    let sql = format!(
      "SELECT {ENTRY_COLUMNS} FROM activity_log l
       LEFT JOIN activity_meta m
         ON m.entry_id = l.entry_id AND m.meta_key = '{META_UPDATED}'
       WHERE COALESCE(m.meta_value, l.logged_at) >= ?1
         AND l.entry_id > ?2
         AND l.entry_type IN ({types})
       ORDER BY l.entry_id
       LIMIT ?3",
      types = progress_entry_types(),
    );
    self.scan(sql, Some(encode_dt(since)), after_id, limit).await
  }
}
