//! `waypoint`: operational tooling for learner progress.
//!
//! Reads `waypoint.toml` (or the path given with `--config`), opens the SQLite
//! database holding both progress backends, and either drives the migration
//! from the legacy activity log to the relational tables or reads and writes
//! progress through whichever backend the migration flag selects.
//!
//! ```text
//! waypoint migrate status
//! waypoint migrate advance --runs 20
//! waypoint migrate set-state in_progress
//! waypoint progress start --kind lesson --owner 12 --user 7
//! waypoint progress status --kind lesson --owner 12 --user 7
//! ```

mod settings;

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use waypoint_core::{
  clock::Clock,
  migration::{MigrationRunner, MigrationStep},
  model::{Progress, ProgressKey, ProgressKind},
  selector::{MigrationState, RepositorySelector},
  status::{ProgressStatus, StatusMachine},
  store::MigrationControl as _,
  tracker::ProgressTracker,
};
use waypoint_store_sqlite::Database;

use crate::settings::Settings;

#[derive(Parser)]
#[command(author, version, about = "Waypoint progress tracking")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "waypoint.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Inspect and drive the legacy-to-relational migration.
  #[command(subcommand)]
  Migrate(MigrateCommand),
  /// Read or write one learner's progress.
  #[command(subcommand)]
  Progress(ProgressCommand),
}

#[derive(Subcommand)]
enum MigrateCommand {
  /// Print the migration flag, cursor, and per-kind row counts.
  Status,
  /// Run the migration forward, one batch per run.
  Advance {
    /// Maximum number of batches; stops early at cutover.
    #[arg(long, default_value_t = 1)]
    runs: u32,
  },
  /// Move the migration flag by hand (not_started, in_progress, done).
  SetState { state: MigrationState },
}

#[derive(Subcommand)]
enum ProgressCommand {
  Start(TransitionArgs),
  Complete(TransitionArgs),
  Status(KeyArgs),
}

#[derive(Args)]
struct KeyArgs {
  /// course, lesson, or quiz
  #[arg(long)]
  kind:  ProgressKind,
  #[arg(long)]
  owner: u64,
  #[arg(long)]
  user:  u64,
}

impl KeyArgs {
  fn key(&self) -> ProgressKey { ProgressKey::new(self.kind, self.owner, self.user) }
}

#[derive(Args)]
struct TransitionArgs {
  #[command(flatten)]
  key: KeyArgs,
  /// RFC 3339 timestamp to record instead of now.
  #[arg(long)]
  at:  Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct StatusView {
  key:      String,
  backend:  &'static str,
  status:   Option<ProgressStatus>,
  progress: Option<Progress>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let settings = Settings::load(&cli.config)?;

  let db_path = settings.database_path();
  let db = Database::open(&db_path)
    .await
    .with_context(|| format!("failed to open database at {db_path:?}"))?;

  match cli.command {
    Command::Migrate(cmd) => migrate(&db, &settings, cmd).await,
    Command::Progress(cmd) => progress(&db, &settings, cmd).await,
  }
}

async fn migrate(db: &Database, settings: &Settings, cmd: MigrateCommand) -> anyhow::Result<()> {
  let runner = MigrationRunner::new(
    db.legacy_log(),
    db.tables(),
    db.options(),
    settings.migration,
    Clock::System,
  );

  match cmd {
    MigrateCommand::Status => {}
    MigrateCommand::Advance { runs } => {
      for run in 1..=runs {
        let step = runner.advance_migration().await.context("migration run failed")?;
        tracing::info!(run, ?step, "migration run finished");
        print_json(&step)?;
        if matches!(step, MigrationStep::Cutover | MigrationStep::AlreadyDone) {
          break;
        }
      }
      return Ok(());
    }
    MigrateCommand::SetState { state } => {
      runner
        .set_migration_state(state)
        .await
        .with_context(|| format!("cannot move migration to {state}"))?;
    }
  }

  print_json(&runner.report().await?)
}

async fn progress(db: &Database, settings: &Settings, cmd: ProgressCommand) -> anyhow::Result<()> {
  let state = db.options().migration_state().await?;
  let selector = RepositorySelector::new(db.legacy_log(), db.tables(), settings.selector());
  let machine = StatusMachine::new(Arc::new(settings.quizzes.clone()));

  let tracker = |kind: ProgressKind| {
    ProgressTracker::new(selector.select(state, kind), machine.clone(), Clock::System)
  };

  match cmd {
    ProgressCommand::Start(args) => {
      let key = args.key.key();
      print_json(&tracker(key.kind).start(key, args.at).await?)
    }
    ProgressCommand::Complete(args) => {
      let key = args.key.key();
      print_json(&tracker(key.kind).complete(key, args.at).await?)
    }
    ProgressCommand::Status(args) => {
      let key = args.key();
      let tracker = tracker(key.kind);
      let progress = tracker.get(key).await?;
      print_json(&StatusView {
        key: key.to_string(),
        backend: tracker.store().name(),
        status: progress.as_ref().map(|p| tracker.status_of(p)),
        progress,
      })
    }
  }
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
