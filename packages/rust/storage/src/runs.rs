//! Run journal.

use chrono::{DateTime, Utc};
use libsql::params;
use radar_shared::Result;
use uuid::Uuid;

use crate::{Storage, db_err, parse_timestamp, timestamp};

/// One row of the `runs` table.
#[derive(Debug, Clone)]
pub struct RunRow {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Serialized run summary; `None` while the run is in progress or if it
    /// was interrupted.
    pub summary_json: Option<String>,
}

impl Storage {
    /// Start a run. Returns the new run ID.
    pub async fn insert_run(&self) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = timestamp(Utc::now());
        self.conn
            .execute(
                "INSERT INTO runs (id, started_at) VALUES (?1, ?2)",
                params![id.as_str(), now.as_str()],
            )
            .await
            .map_err(db_err)?;
        Ok(id)
    }

    /// Close a run with its summary.
    pub async fn finish_run(&self, id: &str, summary_json: &str) -> Result<()> {
        self.check_writable()?;
        let now = timestamp(Utc::now());
        self.conn
            .execute(
                "UPDATE runs SET finished_at = ?2, summary_json = ?3 WHERE id = ?1",
                params![id, now.as_str(), summary_json],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Most recent runs first.
    pub async fn recent_runs(&self, limit: u32) -> Result<Vec<RunRow>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, started_at, finished_at, summary_json
                 FROM runs ORDER BY started_at DESC, id DESC LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(db_err)?;

        let mut runs = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            runs.push(RunRow {
                id: row.get::<String>(0).map_err(db_err)?,
                started_at: parse_timestamp(&row.get::<String>(1).map_err(db_err)?)?,
                finished_at: row
                    .get::<String>(2)
                    .ok()
                    .map(|s| parse_timestamp(&s))
                    .transpose()?,
                summary_json: row.get::<String>(3).ok(),
            });
        }
        Ok(runs)
    }
}
