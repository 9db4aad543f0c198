//! Read-only tracker queries behind the drain readiness report.

use rusqlite::{Row, params};
use serde::Serialize;
use tracing::warn;

use super::state::JobState;
use super::store::SqliteTracker;
use crate::error::DrainError;

/// Status of a file attached to a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubFileStatus {
    /// Waiting for job creation.
    Available,
    /// Waiting for jobs to finish.
    Acquired,
}

impl SubFileStatus {
    fn as_str(&self) -> &'static str {
        match self {
            SubFileStatus::Available => "available",
            SubFileStatus::Acquired => "acquired",
        }
    }
}

/// A catalog block that has not been closed yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenBlock {
    pub name: String,
    pub status: String,
}

// Files never expected in the transfer system.
const NOT_INJECTED_EXCLUSIONS: &str = "
      AND lfn NOT LIKE '%unmerged%'
      AND lfn NOT LIKE 'MCFakeFile%'
      AND lfn NOT LIKE '%BACKFILL%'
      AND lfn NOT LIKE '/store/backfill/%'
      AND lfn NOT LIKE '/store/user%'
";

impl SqliteTracker {
    fn strings(&self, sql: &str) -> Result<Vec<String>, DrainError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn known_workflows(&self) -> Result<Vec<String>, DrainError> {
        self.strings("SELECT DISTINCT name FROM workflow ORDER BY name")
    }

    pub fn incomplete_workflows(&self) -> Result<Vec<String>, DrainError> {
        self.strings("SELECT DISTINCT name FROM workflow WHERE completed = 0 ORDER BY name")
    }

    pub fn uninjected_workflows(&self) -> Result<Vec<String>, DrainError> {
        self.strings("SELECT DISTINCT name FROM workflow WHERE injected = 0 ORDER BY name")
    }

    /// Workflows that still have at least one unfinished subscription.
    pub fn unfinished_subscriptions(&self) -> Result<Vec<String>, DrainError> {
        self.strings(
            "
            SELECT DISTINCT workflow.name
            FROM subscription
            INNER JOIN workflow ON workflow.id = subscription.workflow_id
            WHERE subscription.finished = 0
            ORDER BY workflow.name
            ",
        )
    }

    /// Job counts per raw state name. Names are kept as stored so an
    /// unexpected state still shows up in the report, with a warning.
    pub fn job_counts_by_state(&self) -> Result<Vec<(String, usize)>, DrainError> {
        let mut stmt = self
            .conn
            .prepare("SELECT state, COUNT(*) FROM job GROUP BY state ORDER BY state")?;
        let rows = stmt.query_map([], name_and_count)?;
        let counts = rows.collect::<Result<Vec<_>, _>>()?;
        for (name, jobs) in &counts {
            if let Err(e) = name.parse::<JobState>() {
                warn!(jobs, "{e}");
            }
        }
        Ok(counts)
    }

    /// Every workflow with executing jobs, regardless of age.
    pub fn executing_workflows(&self) -> Result<Vec<(String, usize)>, DrainError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT workflow.name, COUNT(DISTINCT job.id)
            FROM job
            INNER JOIN subscription ON job.subscription_id = subscription.id
            INNER JOIN workflow ON subscription.workflow_id = workflow.id
            WHERE job.state = ?1
            GROUP BY workflow.name
            ORDER BY workflow.name
            ",
        )?;
        let rows = stmt.query_map(params![JobState::Executing.as_str()], name_and_count)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Number of files in `status` per subscription id.
    pub fn files_per_subscription(
        &self,
        status: SubFileStatus,
    ) -> Result<Vec<(i64, usize)>, DrainError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT subscription_id, COUNT(*)
            FROM sub_file
            WHERE status = ?1
            GROUP BY subscription_id
            ORDER BY subscription_id
            ",
        )?;
        let rows = stmt.query_map(params![status.as_str()], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)? as usize))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn open_blocks(&self) -> Result<Vec<OpenBlock>, DrainError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, status FROM dbs_block WHERE status != 'Closed' ORDER BY name")?;
        let rows = stmt.query_map([], |row| {
            Ok(OpenBlock {
                name: row.get(0)?,
                status: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn files_not_uploaded(&self) -> Result<Vec<String>, DrainError> {
        self.strings("SELECT lfn FROM dbs_file WHERE status = 'NOTUPLOADED' ORDER BY lfn")
    }

    /// Files not injected into the transfer system. Files with a block are
    /// recoverable, files without one are not.
    pub fn files_not_injected(&self, with_block: bool) -> Result<Vec<String>, DrainError> {
        let block_filter = if with_block {
            "block_id IS NOT NULL"
        } else {
            "block_id IS NULL"
        };
        self.strings(&format!(
            "SELECT lfn FROM dbs_file WHERE in_phedex = 0 AND {block_filter} {NOT_INJECTED_EXCLUSIONS} ORDER BY lfn"
        ))
    }
}

fn name_and_count(row: &Row<'_>) -> rusqlite::Result<(String, usize)> {
    Ok((row.get(0)?, row.get::<_, i64>(1)? as usize))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn seeded() -> SqliteTracker {
        let tracker = SqliteTracker::in_memory().unwrap();
        let a = tracker.add_workflow("A");
        let b = tracker.add_workflow("B");
        tracker
            .conn
            .execute_batch(
                "
                UPDATE workflow SET injected = 1, completed = 1 WHERE name = 'A';
                UPDATE subscription SET finished = 1 WHERE workflow_id = 1;
                INSERT INTO dbs_block (name, status) VALUES ('/P/E-v1/RAW#1', 'Closed');
                INSERT INTO dbs_block (name, status) VALUES ('/P/E-v1/RAW#2', 'Open');
                INSERT INTO dbs_file (lfn, status, in_phedex, block_id)
                    VALUES ('/store/data/E/P/RAW/v1/000/1.root', 'NOTUPLOADED', 0, 2);
                INSERT INTO dbs_file (lfn, status, in_phedex, block_id)
                    VALUES ('/store/data/E/P/RAW/v1/000/2.root', 'InDBS', 0, NULL);
                INSERT INTO dbs_file (lfn, status, in_phedex, block_id)
                    VALUES ('/store/unmerged/E/P/RAW/v1/000/3.root', 'InDBS', 0, 2);
                INSERT INTO dbs_file (lfn, status, in_phedex, block_id)
                    VALUES ('/store/data/E/P/RAW/v1/000/4.root', 'InDBS', 1, 2);
                ",
            )
            .unwrap();
        tracker
            .conn
            .execute(
                "INSERT INTO sub_file (subscription_id, lfn, status) VALUES (?1, 'x', 'available'), (?1, 'y', 'available'), (?1, 'z', 'acquired')",
                params![b],
            )
            .unwrap();
        tracker.add_jobs(a, JobState::Success, Utc::now(), 2);
        tracker.add_jobs(b, JobState::Executing, Utc::now(), 3);
        tracker
    }

    #[test]
    fn workflow_listings() {
        let tracker = seeded();
        assert_eq!(tracker.known_workflows().unwrap(), vec!["A", "B"]);
        assert_eq!(tracker.incomplete_workflows().unwrap(), vec!["B"]);
        assert_eq!(tracker.uninjected_workflows().unwrap(), vec!["B"]);
        assert_eq!(tracker.unfinished_subscriptions().unwrap(), vec!["B"]);
    }

    #[test]
    fn job_counts() {
        let tracker = seeded();
        assert_eq!(
            tracker.job_counts_by_state().unwrap(),
            vec![("executing".to_string(), 3), ("success".to_string(), 2)]
        );
        assert_eq!(
            tracker.executing_workflows().unwrap(),
            vec![("B".to_string(), 3)]
        );
    }

    #[test]
    fn job_counts_keep_unrecognized_states() {
        let tracker = seeded();
        tracker
            .conn
            .execute(
                "INSERT INTO job (subscription_id, state, state_time) VALUES (1, 'zombie', 0)",
                [],
            )
            .unwrap();

        let counts = tracker.job_counts_by_state().unwrap();
        assert!(counts.contains(&("zombie".to_string(), 1)));
        let unrecognized: Vec<&str> = counts
            .iter()
            .filter(|(name, _)| name.parse::<JobState>().is_err())
            .map(|(name, _)| name.as_str())
            .collect();
        assert_eq!(unrecognized, vec!["zombie"]);
    }

    #[test]
    fn subscription_files() {
        let tracker = seeded();
        assert_eq!(
            tracker
                .files_per_subscription(SubFileStatus::Available)
                .unwrap(),
            vec![(2, 2)]
        );
        assert_eq!(
            tracker
                .files_per_subscription(SubFileStatus::Acquired)
                .unwrap(),
            vec![(2, 1)]
        );
    }

    #[test]
    fn catalog_probes() {
        let tracker = seeded();
        let blocks = tracker.open_blocks().unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].status, "Open");
        assert_eq!(
            tracker.files_not_uploaded().unwrap(),
            vec!["/store/data/E/P/RAW/v1/000/1.root"]
        );
        assert_eq!(
            tracker.files_not_injected(true).unwrap(),
            vec!["/store/data/E/P/RAW/v1/000/1.root"]
        );
        assert_eq!(
            tracker.files_not_injected(false).unwrap(),
            vec!["/store/data/E/P/RAW/v1/000/2.root"]
        );
    }
}
