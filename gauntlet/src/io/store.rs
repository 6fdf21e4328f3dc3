//! Persistence Sink: append-only SQLite store of runs and attempts.

use std::path::Path;

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, instrument};

use crate::core::types::{AttemptRecord, ErrorKind, RunRecord};

/// Durable record store consumed by the orchestrator.
///
/// Calls may repeat across a run; neither operation rewrites prior rows.
pub trait AttemptSink {
    /// Register the run. Repeating the call with identical metadata is a no-op.
    fn create_run(&mut self, run: &RunRecord) -> Result<()>;

    /// Append one attempt row. Re-using an attempt slot is an error.
    fn append_attempt(&mut self, attempt: &AttemptRecord) -> Result<()>;
}

struct Migration {
    version: u32,
    name: &'static str,
    up: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    up: include_str!("migrations/001_initial_schema.sql"),
}];

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .context("create migrations table")?;

    let current: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )
        .context("read schema version")?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        info!(
            version = migration.version,
            name = migration.name,
            "applying migration"
        );
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.up)
            .with_context(|| format!("apply migration {}", migration.name))?;
        tx.execute(
            "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
            params![migration.version, migration.name],
        )?;
        tx.commit()?;
    }
    Ok(())
}

/// SQLite-backed [`AttemptSink`] with the reporting queries.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let conn =
            Connection::open(path).with_context(|| format!("open database {}", path.display()))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory().context("open in-memory database")?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("enable foreign keys")?;
        run_migrations(&conn)?;
        Ok(Self { conn })
    }

    pub fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        self.conn
            .query_row(
                "SELECT run_id, started_at, model, base_url, git_commit FROM runs WHERE run_id = ?1",
                params![run_id],
                |row| {
                    Ok(RunRecord {
                        run_id: row.get(0)?,
                        started_at: row.get(1)?,
                        model: row.get(2)?,
                        base_url: row.get(3)?,
                        git_commit: row.get(4)?,
                    })
                },
            )
            .optional()
            .with_context(|| format!("query run {run_id}"))
    }

    pub fn attempt_count(&self, run_id: &str) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM attempts WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .with_context(|| format!("count attempts for {run_id}"))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// All attempts of a run, ordered by task, strategy and attempt number.
    pub fn attempts_for_run(&self, run_id: &str) -> Result<Vec<AttemptRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, task_name, strategy_name, attempt_num, success, score, latency_ms,
                    error_type, artifact_dir, created_at, prompt_tokens, completion_tokens
             FROM attempts
             WHERE run_id = ?1
             ORDER BY task_name, strategy_name, attempt_num",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok((
                AttemptRecord {
                    run_id: row.get(0)?,
                    task_name: row.get(1)?,
                    strategy_name: row.get(2)?,
                    attempt_num: row.get(3)?,
                    success: row.get(4)?,
                    score: row.get(5)?,
                    latency_ms: from_sql_int(row.get(6)?),
                    error_kind: None,
                    artifact_dir: row.get(8)?,
                    created_at: row.get(9)?,
                    prompt_tokens: row.get::<_, Option<i64>>(10)?.map(from_sql_int),
                    completion_tokens: row.get::<_, Option<i64>>(11)?.map(from_sql_int),
                },
                row.get::<_, Option<String>>(7)?,
            ))
        })?;

        let mut attempts = Vec::new();
        for row in rows {
            let (mut attempt, error_type) = row.context("read attempt row")?;
            if let Some(tag) = error_type {
                let Some(kind) = ErrorKind::parse(&tag) else {
                    bail!("unknown error_type '{tag}' in attempts for run {run_id}");
                };
                attempt.error_kind = Some(kind);
            }
            attempts.push(attempt);
        }
        Ok(attempts)
    }
}

impl AttemptSink for SqliteStore {
    #[instrument(skip_all, fields(run_id = %run.run_id))]
    fn create_run(&mut self, run: &RunRecord) -> Result<()> {
        if let Some(existing) = self.get_run(&run.run_id)? {
            if existing != *run {
                bail!(
                    "run '{}' already exists with different metadata",
                    run.run_id
                );
            }
            if self.attempt_count(&run.run_id)? > 0 {
                bail!(
                    "run '{}' already has recorded attempts; choose another run id",
                    run.run_id
                );
            }
            debug!("run already registered");
            return Ok(());
        }
        self.conn
            .execute(
                "INSERT INTO runs (run_id, started_at, model, base_url, git_commit)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    run.run_id,
                    run.started_at,
                    run.model,
                    run.base_url,
                    run.git_commit
                ],
            )
            .with_context(|| format!("insert run {}", run.run_id))?;
        Ok(())
    }

    fn append_attempt(&mut self, attempt: &AttemptRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO attempts (run_id, task_name, strategy_name, attempt_num, success,
                    score, latency_ms, error_type, artifact_dir, created_at, prompt_tokens,
                    completion_tokens)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    attempt.run_id,
                    attempt.task_name,
                    attempt.strategy_name,
                    attempt.attempt_num,
                    attempt.success,
                    attempt.score,
                    to_sql_int(attempt.latency_ms),
                    attempt.error_kind.map(ErrorKind::as_str),
                    attempt.artifact_dir,
                    attempt.created_at,
                    attempt.prompt_tokens.map(to_sql_int),
                    attempt.completion_tokens.map(to_sql_int),
                ],
            )
            .with_context(|| {
                format!(
                    "insert attempt {}/{}#{} for run {}",
                    attempt.task_name, attempt.strategy_name, attempt.attempt_num, attempt.run_id
                )
            })?;
        Ok(())
    }
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_int(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(run_id: &str) -> RunRecord {
        RunRecord {
            run_id: run_id.to_string(),
            started_at: "2026-01-01T00:00:00Z".to_string(),
            model: "local-model".to_string(),
            base_url: "http://localhost:1234/v1".to_string(),
            git_commit: Some("abc123".to_string()),
        }
    }

    fn attempt(run_id: &str, attempt_num: u32, error_kind: Option<ErrorKind>) -> AttemptRecord {
        AttemptRecord {
            run_id: run_id.to_string(),
            task_name: "json_schema".to_string(),
            strategy_name: "critique_fix".to_string(),
            attempt_num,
            success: error_kind.is_none(),
            score: if error_kind.is_none() { 1.0 } else { 0.0 },
            latency_ms: 250,
            error_kind,
            artifact_dir: format!("runs/{run_id}/json_schema_critique_fix/attempt_{attempt_num}"),
            created_at: "2026-01-01T00:00:01Z".to_string(),
            prompt_tokens: Some(40),
            completion_tokens: None,
        }
    }

    #[test]
    fn appends_and_queries_attempts_in_order() {
        let mut store = SqliteStore::open_in_memory().expect("open");
        store.create_run(&run("r1")).expect("create run");
        store
            .append_attempt(&attempt("r1", 2, None))
            .expect("append");
        store
            .append_attempt(&attempt("r1", 1, Some(ErrorKind::SchemaError)))
            .expect("append");

        let rows = store.attempts_for_run("r1").expect("query");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], attempt("r1", 1, Some(ErrorKind::SchemaError)));
        assert_eq!(rows[1], attempt("r1", 2, None));
        assert_eq!(store.get_run("r1").expect("get"), Some(run("r1")));
        assert_eq!(store.get_run("missing").expect("get"), None);
    }

    #[test]
    fn duplicate_attempt_slot_is_rejected() {
        let mut store = SqliteStore::open_in_memory().expect("open");
        store.create_run(&run("r1")).expect("create run");
        store
            .append_attempt(&attempt("r1", 1, None))
            .expect("append");
        assert!(store.append_attempt(&attempt("r1", 1, None)).is_err());
        assert_eq!(store.attempt_count("r1").expect("count"), 1);
    }

    #[test]
    fn attempt_requires_registered_run() {
        let mut store = SqliteStore::open_in_memory().expect("open");
        assert!(store.append_attempt(&attempt("ghost", 1, None)).is_err());
    }

    #[test]
    fn create_run_is_idempotent_until_attempts_exist() {
        let mut store = SqliteStore::open_in_memory().expect("open");
        store.create_run(&run("r1")).expect("first");
        store.create_run(&run("r1")).expect("repeat");

        let mut changed = run("r1");
        changed.model = "other".to_string();
        assert!(store.create_run(&changed).is_err());

        store
            .append_attempt(&attempt("r1", 1, None))
            .expect("append");
        let err = store.create_run(&run("r1")).expect_err("reused run id");
        assert!(err.to_string().contains("already has recorded attempts"));
    }

    #[test]
    fn reopening_file_keeps_rows() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("results.sqlite");
        {
            let mut store = SqliteStore::open(&path).expect("open");
            store.create_run(&run("r1")).expect("create run");
            store
                .append_attempt(&attempt("r1", 1, None))
                .expect("append");
        }
        let store = SqliteStore::open(&path).expect("reopen");
        assert_eq!(store.attempts_for_run("r1").expect("query").len(), 1);
    }
}
