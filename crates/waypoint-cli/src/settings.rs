//! Runtime settings for the `waypoint` binary.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Deserialize;
use waypoint_core::{migration::MigrationConfig, quiz::QuizSettings, selector::SelectorConfig};

fn default_database_path() -> PathBuf { PathBuf::from("waypoint.db") }

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
  /// SQLite file holding both backends and the migration options.
  #[serde(default = "default_database_path")]
  pub database_path: PathBuf,
  /// Mirror legacy writes into the relational tables while migrating.
  #[serde(default)]
  pub dual_write:    bool,
  #[serde(default)]
  pub migration:     MigrationConfig,
  #[serde(default)]
  pub quizzes:       QuizSettings,
}

impl Settings {
  /// Layer `WAYPOINT_*` environment variables over the optional TOML file at
  /// `path`. Nested keys use `__`, e.g. `WAYPOINT_MIGRATION__BATCH_SIZE`.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    Self::from_builder(
      config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(
          config::Environment::with_prefix("WAYPOINT")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
        ),
    )
  }

  fn from_builder(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
  ) -> anyhow::Result<Self> {
    builder
      .build()
      .context("failed to read config file")?
      .try_deserialize()
      .context("failed to deserialise Settings")
  }

  pub fn selector(&self) -> SelectorConfig { SelectorConfig { dual_write: self.dual_write } }

  /// The database path with a leading `~` expanded.
  pub fn database_path(&self) -> PathBuf { expand_tilde(&self.database_path) }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use waypoint_core::quiz::QuizCatalog as _;

  use super::*;

  fn parse(toml: &str) -> Settings {
    Settings::from_builder(
      config::Config::builder().add_source(config::File::from_str(toml, config::FileFormat::Toml)),
    )
    .unwrap()
  }

  #[test]
  fn empty_file_uses_defaults() {
    let s = parse("");
    assert_eq!(s.database_path, PathBuf::from("waypoint.db"));
    assert!(!s.dual_write);
    assert_eq!(s.migration.batch_size.get(), 500);
    assert_eq!(s.migration.reconcile_tolerance, 0);
    assert!(s.quizzes.lessons.is_empty());
  }

  #[test]
  fn full_file_is_read() {
    let s = parse(
      r#"
      database_path = "/var/lib/waypoint/progress.db"
      dual_write = true

      [migration]
      batch_size = 50
      reconcile_tolerance = 2

      [[quizzes.lessons]]
      lesson_id = 10
      quiz_id = 100
      gradable = true
      pass_required = false
      "#,
    );

    assert_eq!(s.database_path(), PathBuf::from("/var/lib/waypoint/progress.db"));
    assert!(s.selector().dual_write);
    assert_eq!(s.migration.batch_size.get(), 50);
    assert_eq!(s.migration.reconcile_tolerance, 2);
    assert!(s.quizzes.lesson_has_gradable_quiz(10));
    assert!(!s.quizzes.quiz_requires_pass(10));
    assert_eq!(s.quizzes.lesson_for_quiz(100), Some(10));
  }

  #[test]
  fn zero_batch_size_is_rejected() {
    let result = Settings::from_builder(config::Config::builder().add_source(
      config::File::from_str("[migration]\nbatch_size = 0\n", config::FileFormat::Toml),
    ));
    assert!(result.is_err());
  }
}
