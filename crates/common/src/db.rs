//! SQLite result store for vidprobe runs

use crate::types::{format_timestamp, parse_timestamp, Diagnosis, RunRecord, RunStatus, RunSummary, StepResult};
use crate::{Error, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Database wrapper for run persistence
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path.as_ref())?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        info!("Opened database at {:?}", path.as_ref());
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS test_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                test_id TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                steps TEXT NOT NULL DEFAULT '[]',
                ai_analysis TEXT
            );
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Persist a finished run. Each run is written once; a second save of the
    /// same id is rejected rather than overwriting the first.
    pub fn save(&self, record: &RunRecord) -> Result<()> {
        let steps = serde_json::to_string(&record.steps)?;
        let analysis = record
            .diagnosis
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO test_results (test_id, status, start_time, end_time, steps, ai_analysis)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.run_id,
                record.final_status.as_str(),
                format_timestamp(&record.started_at),
                format_timestamp(&record.ended_at),
                steps,
                analysis,
            ],
        )?;

        if inserted == 0 {
            return Err(Error::AlreadyExists {
                kind: "run".to_string(),
                id: record.run_id.clone(),
            });
        }

        debug!("Saved run {} ({})", record.run_id, record.final_status);
        Ok(())
    }

    /// Look up a run by its identifier
    pub fn get_by_id(&self, run_id: &str) -> Result<RunRecord> {
        let conn = self.conn.lock();

        let row = conn
            .query_row(
                "SELECT test_id, status, start_time, end_time, steps, ai_analysis
                 FROM test_results WHERE test_id = ?1",
                params![run_id],
                |row| {
                    Ok(RawRow {
                        test_id: row.get(0)?,
                        status: row.get(1)?,
                        start_time: row.get(2)?,
                        end_time: row.get(3)?,
                        steps: row.get(4)?,
                        ai_analysis: row.get(5)?,
                    })
                },
            )
            .optional()?;

        match row {
            Some(raw) => raw.parse(),
            None => Err(Error::run_not_found(run_id)),
        }
    }

    /// Most recent runs first
    pub fn list_recent(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            "SELECT test_id, status, start_time, end_time
             FROM test_results ORDER BY id DESC LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut results = Vec::new();
        for row in rows {
            let (test_id, status, start_time, end_time) = row?;
            results.push(RunSummary {
                final_status: parse_status(&test_id, &status)?,
                started_at: parse_timestamp(&start_time)?,
                ended_at: parse_timestamp(&end_time)?,
                run_id: test_id,
            });
        }

        Ok(results)
    }
}

fn parse_status(run_id: &str, status: &str) -> Result<RunStatus> {
    RunStatus::parse(status).ok_or_else(|| Error::CorruptRecord {
        id: run_id.to_string(),
        reason: format!("unknown status '{}'", status),
    })
}

/// Raw database row before parsing
struct RawRow {
    test_id: String,
    status: String,
    start_time: String,
    end_time: String,
    steps: String,
    ai_analysis: Option<String>,
}

impl RawRow {
    fn parse(self) -> Result<RunRecord> {
        let steps: Vec<StepResult> = serde_json::from_str(&self.steps)?;
        // Older rows may hold the literal JSON `null` instead of SQL NULL.
        let diagnosis: Option<Diagnosis> = match self.ai_analysis.as_deref() {
            Some(text) => serde_json::from_str(text)?,
            None => None,
        };

        Ok(RunRecord {
            final_status: parse_status(&self.test_id, &self.status)?,
            started_at: parse_timestamp(&self.start_time)?,
            ended_at: parse_timestamp(&self.end_time)?,
            run_id: self.test_id,
            steps,
            diagnosis,
        })
    }
}
