use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags, params};
use serde::Serialize;
use tracing::debug;

use super::state::{JobState, TargetState};
use crate::error::DrainError;

/// Tracker-assigned job identifier.
pub type JobId = i64;

/// Workflow name plus the number of its jobs stuck in `executing` past the cutoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowStaleGroup {
    pub workflow: String,
    pub count: usize,
}

/// Read and write access to the local job tracker.
///
/// Implementations are the only place where persisted job state changes.
pub trait JobTracker {
    /// Workflows with at least one job in `executing` whose state was entered
    /// before `cutoff`, with the number of distinct such jobs.
    fn find_stale_executing_groups(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<WorkflowStaleGroup>, DrainError>;

    /// The distinct job ids behind one stale group.
    fn find_stale_job_ids(
        &self,
        workflow: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<JobId>, DrainError>;

    /// Moves the given jobs to `target` in a single transaction and returns the
    /// number of rows changed.
    ///
    /// Only jobs still in `executing` are touched, so a job that moved on since
    /// it was read is skipped and re-applying the same call returns 0.
    fn apply_state_transition(
        &mut self,
        job_ids: &[JobId],
        target: TargetState,
    ) -> Result<usize, DrainError>;
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS workflow (
        id        INTEGER PRIMARY KEY,
        name      TEXT NOT NULL,
        injected  INTEGER NOT NULL DEFAULT 0,
        completed INTEGER NOT NULL DEFAULT 0
    );
    CREATE TABLE IF NOT EXISTS subscription (
        id          INTEGER PRIMARY KEY,
        workflow_id INTEGER NOT NULL REFERENCES workflow(id),
        finished    INTEGER NOT NULL DEFAULT 0
    );
    CREATE TABLE IF NOT EXISTS job (
        id              INTEGER PRIMARY KEY,
        subscription_id INTEGER NOT NULL REFERENCES subscription(id),
        state           TEXT NOT NULL,
        state_time      INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS job_state_time ON job(state, state_time);
    CREATE TABLE IF NOT EXISTS sub_file (
        subscription_id INTEGER NOT NULL REFERENCES subscription(id),
        lfn             TEXT NOT NULL,
        status          TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS dbs_block (
        id     INTEGER PRIMARY KEY,
        name   TEXT NOT NULL UNIQUE,
        status TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS dbs_file (
        id        INTEGER PRIMARY KEY,
        lfn       TEXT NOT NULL UNIQUE,
        status    TEXT NOT NULL,
        in_phedex INTEGER NOT NULL DEFAULT 0,
        block_id  INTEGER REFERENCES dbs_block(id)
    );
";

/// SQLite-backed job tracker.
pub struct SqliteTracker {
    pub(super) conn: Connection,
}

impl SqliteTracker {
    /// Opens an existing tracker database for reading and writing.
    ///
    /// Nothing is created: a missing file, or one without the job tables, is
    /// an error rather than a fresh empty tracker.
    pub fn open(path: &Path) -> Result<Self, DrainError> {
        Self::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_WRITE)
    }

    /// Opens an existing tracker database that can only be read. Used by the
    /// drain report and by dry runs.
    pub fn open_read_only(path: &Path) -> Result<Self, DrainError> {
        Self::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
    }

    /// A private in-memory tracker with the job tables created.
    pub fn in_memory() -> Result<Self, DrainError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Self::from_connection(conn)
    }

    fn open_with_flags(path: &Path, mode: OpenFlags) -> Result<Self, DrainError> {
        let conn = Connection::open_with_flags(path, mode | OpenFlags::SQLITE_OPEN_NO_MUTEX)?;
        let tracker = Self::from_connection(conn)?;
        debug!(path = %path.display(), "tracker database opened");
        Ok(tracker)
    }

    fn from_connection(conn: Connection) -> Result<Self, DrainError> {
        // Writers from the agent itself may hold the lock briefly.
        conn.busy_timeout(Duration::from_secs(30))?;
        // Fails with "no such table/column" on anything that is not a tracker.
        conn.prepare(
            "
            SELECT job.id, job.state, job.state_time, workflow.name, subscription.finished
            FROM job
            INNER JOIN subscription ON job.subscription_id = subscription.id
            INNER JOIN workflow ON subscription.workflow_id = workflow.id
            LIMIT 0
            ",
        )?;
        Ok(Self { conn })
    }
}

impl JobTracker for SqliteTracker {
    fn find_stale_executing_groups(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<WorkflowStaleGroup>, DrainError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT workflow.name, COUNT(DISTINCT job.id)
            FROM job
            INNER JOIN subscription ON job.subscription_id = subscription.id
            INNER JOIN workflow ON subscription.workflow_id = workflow.id
            WHERE job.state = ?1 AND job.state_time < ?2
            GROUP BY workflow.name
            ORDER BY workflow.name
            ",
        )?;
        let rows = stmt.query_map(
            params![JobState::Executing.as_str(), cutoff.timestamp()],
            |row| {
                Ok(WorkflowStaleGroup {
                    workflow: row.get(0)?,
                    count: row.get::<_, i64>(1)? as usize,
                })
            },
        )?;
        let groups = rows.collect::<Result<Vec<_>, _>>()?;
        debug!(groups = groups.len(), %cutoff, "stale executing groups loaded");
        Ok(groups)
    }

    fn find_stale_job_ids(
        &self,
        workflow: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<JobId>, DrainError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT DISTINCT job.id
            FROM job
            INNER JOIN subscription ON job.subscription_id = subscription.id
            INNER JOIN workflow ON subscription.workflow_id = workflow.id
            WHERE workflow.name = ?1 AND job.state = ?2 AND job.state_time < ?3
            ORDER BY job.id
            ",
        )?;
        let rows = stmt.query_map(
            params![workflow, JobState::Executing.as_str(), cutoff.timestamp()],
            |row| row.get::<_, JobId>(0),
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn apply_state_transition(
        &mut self,
        job_ids: &[JobId],
        target: TargetState,
    ) -> Result<usize, DrainError> {
        let now = Utc::now().timestamp();
        let tx = self.conn.transaction()?;
        let mut updated = 0;
        {
            let mut stmt = tx.prepare(
                "UPDATE job SET state = ?1, state_time = ?2 WHERE id = ?3 AND state = ?4",
            )?;
            for id in job_ids {
                updated += stmt.execute(params![
                    target.job_state().as_str(),
                    now,
                    id,
                    JobState::Executing.as_str()
                ])?;
            }
        }
        tx.commit()?;
        debug!(requested = job_ids.len(), updated, %target, "state transition committed");
        Ok(updated)
    }
}
