//! [`TableStore`]: progress kept in one typed table per kind.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension as _, TransactionBehavior};
use waypoint_core::{
  model::{Progress, ProgressKey, ProgressKind, Transition},
  store::ProgressStore,
};

use crate::{
  Error, Result,
  encode::{EncodedProgressRow, ProgressTable, RawProgressRow, decode_id, encode_id, progress_table},
};

#[derive(Clone)]
pub struct TableStore {
  conn: tokio_rusqlite::Connection,
}

impl TableStore {
  pub(crate) fn new(conn: tokio_rusqlite::Connection) -> Self { Self { conn } }
}

// ─── Row helpers ─────────────────────────────────────────────────────────────

fn select_row(
  conn: &rusqlite::Connection,
  table: ProgressTable,
  owner_id: i64,
  user_id: i64,
) -> rusqlite::Result<Option<RawProgressRow>> {
  let ProgressTable { name, owner_column } = table;
  conn
    .query_row(
      &format!(
        "SELECT id, {owner_column}, user_id, status, started_at, completed_at,
                created_at, updated_at, metadata
         FROM {name}
         WHERE {owner_column} = ?1 AND user_id = ?2"
      ),
      rusqlite::params![owner_id, user_id],
      |row| {
        Ok(RawProgressRow {
          id:           row.get(0)?,
          owner_id:     row.get(1)?,
          user_id:      row.get(2)?,
          status:       row.get(3)?,
          started_at:   row.get(4)?,
          completed_at: row.get(5)?,
          created_at:   row.get(6)?,
          updated_at:   row.get(7)?,
          metadata:     row.get(8)?,
        })
      },
    )
    .optional()
}

/// Insert or overwrite the row for `row`'s natural key and return its id.
fn upsert_row(
  conn: &rusqlite::Connection,
  table: ProgressTable,
  row: &EncodedProgressRow,
) -> rusqlite::Result<i64> {
  let ProgressTable { name, owner_column } = table;
  conn.query_row(
    &format!(
      "INSERT INTO {name}
         ({owner_column}, user_id, status, started_at, completed_at,
          created_at, updated_at, metadata)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
       ON CONFLICT ({owner_column}, user_id) DO UPDATE SET
         status       = excluded.status,
         started_at   = excluded.started_at,
         completed_at = excluded.completed_at,
         created_at   = excluded.created_at,
         updated_at   = excluded.updated_at,
         metadata     = excluded.metadata
       RETURNING id"
    ),
    rusqlite::params![
      row.owner_id,
      row.user_id,
      row.status,
      row.started_at,
      row.completed_at,
      row.created_at,
      row.updated_at,
      row.metadata,
    ],
    |r| r.get(0),
  )
}

// ─── ProgressStore impl ──────────────────────────────────────────────────────

impl ProgressStore for TableStore {
  type Error = Error;

  async fn find(&self, key: ProgressKey) -> Result<Option<Progress>> {
    let table = progress_table(key.kind);
    let owner_id = encode_id(key.owner_id)?;
    let user_id = encode_id(key.user_id)?;

    let raw: Option<RawProgressRow> = self
      .conn
      .call(move |conn| Ok(select_row(conn, table, owner_id, user_id)?))
      .await?;

    raw.map(|r| r.into_progress(key.kind)).transpose()
  }

  async fn record(
    &self,
    key: ProgressKey,
    transition: Transition,
    now: DateTime<Utc>,
  ) -> Result<Progress> {
    let table = progress_table(key.kind);
    let owner_id = encode_id(key.owner_id)?;
    let user_id = encode_id(key.user_id)?;

    let progress = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut progress = match select_row(&tx, table, owner_id, user_id)? {
          Some(raw) => raw.into_progress(key.kind).map_err(Error::into_call)?,
          None => Progress::new(0, key, now),
        };
        progress.apply(&transition, now);

        let row = EncodedProgressRow::encode(&progress).map_err(Error::into_call)?;
        let id = upsert_row(&tx, table, &row)?;

        tx.commit()?;
        Ok(progress.with_id(id))
      })
      .await?;

    Ok(progress)
  }

  async fn import(&self, progress: &Progress) -> Result<Progress> {
    let table = progress_table(progress.kind());
    let row = EncodedProgressRow::encode(progress)?;

    let id = self
      .conn
      .call(move |conn| Ok(upsert_row(conn, table, &row)?))
      .await?;

    Ok(progress.clone().with_id(id))
  }

  async fn count(&self, kind: ProgressKind) -> Result<u64> {
    let ProgressTable { name, .. } = progress_table(kind);

    let count: i64 = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {name}"), [], |row| row.get(0))?)
      })
      .await?;

    decode_id(count)
  }
}
