//! [`OptionsStore`]: the per-installation migration settings, kept as named
//! options.

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;
use waypoint_core::{migration::MigrationCursor, selector::MigrationState, store::MigrationControl};

use crate::{
  Error, Result,
  encode::{decode_dt, encode_dt},
};

const MIGRATION_STATE: &str = "migration_state";
const MIGRATION_CURSOR: &str = "migration_cursor";
const MIGRATION_RECONCILED_AT: &str = "migration_reconciled_at";

#[derive(Clone)]
pub struct OptionsStore {
  conn: tokio_rusqlite::Connection,
}

impl OptionsStore {
  pub(crate) fn new(conn: tokio_rusqlite::Connection) -> Self { Self { conn } }

  /// The raw value of option `name`, if set.
  pub async fn get_option(&self, name: &'static str) -> Result<Option<String>> {
    let value = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT option_value FROM progress_options WHERE option_name = ?1",
              rusqlite::params![name],
              |row| row.get(0),
            )
            .optional()?,
        )
      })
      .await?;
    Ok(value)
  }

  /// Set option `name`, or delete it when `value` is `None`.
  pub async fn set_option(&self, name: &'static str, value: Option<String>) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        match value {
          Some(value) => conn.execute(
            "INSERT INTO progress_options (option_name, option_value) VALUES (?1, ?2)
             ON CONFLICT (option_name) DO UPDATE SET option_value = excluded.option_value",
            rusqlite::params![name, value],
          )?,
          None => conn.execute(
            "DELETE FROM progress_options WHERE option_name = ?1",
            rusqlite::params![name],
          )?,
        };
        Ok(())
      })
      .await?;
    Ok(())
  }
}

impl MigrationControl for OptionsStore {
  type Error = Error;

  async fn migration_state(&self) -> Result<MigrationState> {
    match self.get_option(MIGRATION_STATE).await? {
      Some(s) => Ok(s.parse()?),
      None => Ok(MigrationState::default()),
    }
  }

  async fn set_migration_state(&self, state: MigrationState) -> Result<()> {
    self.set_option(MIGRATION_STATE, Some(state.as_str().to_owned())).await?;
    tracing::info!(%state, "migration state stored");
    Ok(())
  }

  async fn cursor(&self) -> Result<MigrationCursor> {
    match self.get_option(MIGRATION_CURSOR).await? {
      Some(s) => Ok(serde_json::from_str(&s)?),
      None => Ok(MigrationCursor::default()),
    }
  }

  async fn set_cursor(&self, cursor: MigrationCursor) -> Result<()> {
    self.set_option(MIGRATION_CURSOR, Some(serde_json::to_string(&cursor)?)).await
  }

  async fn reconciled_at(&self) -> Result<Option<DateTime<Utc>>> {
    self
      .get_option(MIGRATION_RECONCILED_AT)
      .await?
      .map(|s| decode_dt(&s))
      .transpose()
  }

  async fn set_reconciled_at(&self, at: Option<DateTime<Utc>>) -> Result<()> {
    self.set_option(MIGRATION_RECONCILED_AT, at.map(encode_dt)).await
  }
}
