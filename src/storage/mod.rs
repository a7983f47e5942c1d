//! Result persistence -- SQLite run store and CSV results files.

pub mod results;
pub mod schema;

use crate::detect::engine::Outcome;
use crate::detect::Incident;
use anyhow::{Context, Result};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use tracing::{debug, info};
use uuid::Uuid;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Rows buffered before a results batch is committed.
const BATCH_SIZE: usize = 500;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Destination for per-tick outcomes.
pub trait OutcomeSink {
    fn record(&mut self, outcome: &Outcome) -> Result<()>;

    /// Called once after the last tick with the run's incident summary.
    fn finish(&mut self, _incidents: &[Incident]) -> Result<()> {
        Ok(())
    }
}

impl OutcomeSink for Vec<Outcome> {
    fn record(&mut self, outcome: &Outcome) -> Result<()> {
        self.push(*outcome);
        Ok(())
    }
}

/// Writes one run's outcomes and incidents into the database.
pub struct SqliteSink {
    pool: Pool,
    run_id: Uuid,
    pending: Vec<Outcome>,
}

impl SqliteSink {
    /// Register a new run. `config` is stored as JSON alongside it.
    pub fn begin(pool: Pool, source: &str, config: &serde_json::Value) -> Result<Self> {
        let run_id = Uuid::new_v4();
        let conn = pool.get()?;
        conn.execute(
            "INSERT INTO runs (id, source, config_json, started_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                run_id.to_string(),
                source,
                serde_json::to_string(config)?,
                chrono::Utc::now().to_rfc3339()
            ],
        )
        .context("Failed to register run")?;
        info!(%run_id, %source, "Recording run to database");

        Ok(Self {
            pool,
            run_id,
            pending: Vec::with_capacity(BATCH_SIZE),
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO results (run_id, timestamp, target, prediction, stddev, statistic, anomaly)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            let run_id = self.run_id.to_string();
            for o in &self.pending {
                stmt.execute(params![
                    run_id,
                    o.timestamp,
                    o.target,
                    o.prediction,
                    o.predictive_stddev,
                    o.statistic,
                    o.anomaly as i32
                ])?;
            }
        }
        tx.commit()?;
        debug!(rows = self.pending.len(), "Flushed results batch");
        self.pending.clear();
        Ok(())
    }
}

impl OutcomeSink for SqliteSink {
    fn record(&mut self, outcome: &Outcome) -> Result<()> {
        self.pending.push(*outcome);
        if self.pending.len() >= BATCH_SIZE {
            self.flush()?;
        }
        Ok(())
    }

    fn finish(&mut self, incidents: &[Incident]) -> Result<()> {
        self.flush()?;

        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let run_id = self.run_id.to_string();
        for i in incidents {
            tx.execute(
                "INSERT INTO incidents (run_id, severity, start_ts, end_ts, ticks, anomaly_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    run_id,
                    i.severity.to_string(),
                    i.start,
                    i.end,
                    i.ticks as i64,
                    i.anomaly_count as i64
                ],
            )?;
        }
        tx.execute(
            "UPDATE runs SET finished_at = ?1 WHERE id = ?2",
            params![chrono::Utc::now().to_rfc3339(), run_id],
        )?;
        tx.commit()?;
        Ok(())
    }
}

/// Load the outcomes of a stored run in tick order.
pub fn load_results(pool: &Pool, run_id: &str) -> Result<Vec<Outcome>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT timestamp, target, prediction, stddev, statistic, anomaly
         FROM results WHERE run_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![run_id], |row| {
        Ok(Outcome {
            timestamp: row.get(0)?,
            target: row.get(1)?,
            prediction: row.get(2)?,
            predictive_stddev: row.get(3)?,
            statistic: row.get(4)?,
            anomaly: row.get::<_, i32>(5)? != 0,
        })
    })?;

    let mut outcomes = Vec::new();
    for r in rows {
        outcomes.push(r?);
    }
    Ok(outcomes)
}

/// Most recent runs: (id, source, started_at).
pub fn list_runs(pool: &Pool, limit: usize) -> Result<Vec<(String, String, String)>> {
    let conn = pool.get()?;
    let mut stmt =
        conn.prepare("SELECT id, source, started_at FROM runs ORDER BY started_at DESC LIMIT ?1")?;
    let rows = stmt.query_map(params![limit as i64], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
    })?;
    let mut runs = Vec::new();
    for r in rows {
        runs.push(r?);
    }
    Ok(runs)
}
