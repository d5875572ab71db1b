//! SQL schema for the Waypoint SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Legacy representation: a generic activity log, one entry per
-- (entry_type, owner_id, user_id), with status and timestamps as metadata.
CREATE TABLE IF NOT EXISTS activity_log (
    entry_id    INTEGER PRIMARY KEY AUTOINCREMENT,
    entry_type  TEXT    NOT NULL,   -- 'course_status' | 'lesson_status' | 'quiz_status'
    owner_id    INTEGER NOT NULL,
    user_id     INTEGER NOT NULL,
    logged_at   TEXT    NOT NULL,   -- RFC 3339 UTC; creation time
    UNIQUE (entry_type, owner_id, user_id)
);

CREATE TABLE IF NOT EXISTS activity_meta (
    entry_id    INTEGER NOT NULL REFERENCES activity_log(entry_id) ON DELETE CASCADE,
    meta_key    TEXT    NOT NULL,
    meta_value  TEXT    NOT NULL,
    PRIMARY KEY (entry_id, meta_key)
);

CREATE INDEX IF NOT EXISTS activity_log_user_idx ON activity_log(user_id, entry_type);
CREATE INDEX IF NOT EXISTS activity_meta_key_idx ON activity_meta(meta_key, meta_value);

-- Relational representation: one typed table per progress kind.
CREATE TABLE IF NOT EXISTS course_progress (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    course_id     INTEGER NOT NULL,
    user_id       INTEGER NOT NULL,
    status        TEXT,
    started_at    TEXT,
    completed_at  TEXT,
    created_at    TEXT    NOT NULL,
    updated_at    TEXT    NOT NULL,
    metadata      TEXT    NOT NULL DEFAULT '{}',
    UNIQUE (course_id, user_id)
);

CREATE TABLE IF NOT EXISTS lesson_progress (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    lesson_id     INTEGER NOT NULL,
    user_id       INTEGER NOT NULL,
    status        TEXT,
    started_at    TEXT,
    completed_at  TEXT,
    created_at    TEXT    NOT NULL,
    updated_at    TEXT    NOT NULL,
    metadata      TEXT    NOT NULL DEFAULT '{}',
    UNIQUE (lesson_id, user_id)
);

CREATE TABLE IF NOT EXISTS quiz_progress (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    quiz_id       INTEGER NOT NULL,
    user_id       INTEGER NOT NULL,
    status        TEXT,
    started_at    TEXT,
    completed_at  TEXT,
    created_at    TEXT    NOT NULL,
    updated_at    TEXT    NOT NULL,
    metadata      TEXT    NOT NULL DEFAULT '{}',
    UNIQUE (quiz_id, user_id)
);

CREATE INDEX IF NOT EXISTS course_progress_user_idx ON course_progress(user_id);
CREATE INDEX IF NOT EXISTS lesson_progress_user_idx ON lesson_progress(user_id);
CREATE INDEX IF NOT EXISTS quiz_progress_user_idx   ON quiz_progress(user_id);

-- Per-installation settings: migration flag, cursor, reconciliation marker.
CREATE TABLE IF NOT EXISTS progress_options (
    option_name   TEXT PRIMARY KEY,
    option_value  TEXT NOT NULL
);

PRAGMA user_version = 1;
";
