//! [`Database`]: one SQLite connection shared by every store.

use std::path::Path;

use crate::{LegacyLogStore, OptionsStore, Result, TableStore, schema::SCHEMA};

/// A Waypoint database backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted. The stores it
/// hands out share that connection.
#[derive(Clone)]
pub struct Database {
  conn: tokio_rusqlite::Connection,
}

impl Database {
  /// Open (or create) a database at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let db = Self { conn };
    db.init_schema().await?;
    Ok(db)
  }

  /// Open an in-memory database for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let db = Self { conn };
    db.init_schema().await?;
    Ok(db)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    tracing::debug!("progress schema initialised");
    Ok(())
  }

  /// The legacy activity-log backend.
  pub fn legacy_log(&self) -> LegacyLogStore { LegacyLogStore::new(self.conn.clone()) }

  /// The relational per-kind table backend.
  pub fn tables(&self) -> TableStore { TableStore::new(self.conn.clone()) }

  /// Migration flag, cursor, and reconciliation marker.
  pub fn options(&self) -> OptionsStore { OptionsStore::new(self.conn.clone()) }

  #[cfg(test)]
  pub(crate) async fn execute_batch(&self, sql: &'static str) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute_batch(sql)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}
