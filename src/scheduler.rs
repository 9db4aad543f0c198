//! Point-in-time snapshot of the jobs HTCondor knows about for this agent.
//!
//! The snapshot is taken once per run. Anything short of a clean answer from
//! `condor_q` is [`DrainError::SchedulerUnavailable`]: "could not ask" must never
//! be read as "no jobs".

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, trace};

use crate::error::DrainError;

/// HTCondor `JobStatus` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum SchedulerJobStatus {
    Idle,
    Running,
    Removed,
    Completed,
    Held,
    TransferringOutput,
    Suspended,
    Other(i64),
}

impl From<i64> for SchedulerJobStatus {
    fn from(code: i64) -> Self {
        match code {
            1 => SchedulerJobStatus::Idle,
            2 => SchedulerJobStatus::Running,
            3 => SchedulerJobStatus::Removed,
            4 => SchedulerJobStatus::Completed,
            5 => SchedulerJobStatus::Held,
            6 => SchedulerJobStatus::TransferringOutput,
            7 => SchedulerJobStatus::Suspended,
            other => SchedulerJobStatus::Other(other),
        }
    }
}

impl fmt::Display for SchedulerJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerJobStatus::Idle => write!(f, "Idle"),
            SchedulerJobStatus::Running => write!(f, "Running"),
            SchedulerJobStatus::Removed => write!(f, "Removed"),
            SchedulerJobStatus::Completed => write!(f, "Completed"),
            SchedulerJobStatus::Held => write!(f, "Held"),
            SchedulerJobStatus::TransferringOutput => write!(f, "TransferringOutput"),
            SchedulerJobStatus::Suspended => write!(f, "Suspended"),
            SchedulerJobStatus::Other(code) => write!(f, "Status{code}"),
        }
    }
}

/// One job in the scheduler queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveSchedulerJob {
    /// Workflow the job belongs to (`WMAgent_RequestName`).
    pub workflow: String,
    /// Scheduler-native id, `ClusterId.ProcId`.
    pub scheduler_id: String,
    pub status: SchedulerJobStatus,
    /// Tracker job id (`WMAgent_JobID`), when the job carries one.
    pub tracker_job_id: Option<i64>,
}

/// Source of the live scheduler job set.
#[allow(async_fn_in_trait)]
pub trait SchedulerQuery {
    async fn snapshot_live_jobs(&self) -> Result<Vec<LiveSchedulerJob>, DrainError>;
}

/// Number of live jobs per workflow.
pub fn live_counts(jobs: &[LiveSchedulerJob]) -> HashMap<&str, usize> {
    let mut counts = HashMap::new();
    for job in jobs {
        *counts.entry(job.workflow.as_str()).or_insert(0) += 1;
    }
    counts
}

/// Job counts by scheduler status, then by workflow.
pub fn counts_by_status(
    jobs: &[LiveSchedulerJob],
) -> BTreeMap<SchedulerJobStatus, BTreeMap<String, usize>> {
    let mut counts: BTreeMap<SchedulerJobStatus, BTreeMap<String, usize>> = BTreeMap::new();
    for job in jobs {
        *counts
            .entry(job.status)
            .or_default()
            .entry(job.workflow.clone())
            .or_insert(0) += 1;
    }
    counts
}

// Attributes requested from condor_q.
const ATTRIBUTES: &str = "ClusterId,ProcId,JobStatus,WMAgent_RequestName,WMAgent_JobID";

#[derive(Debug, Deserialize)]
struct ClassAd {
    #[serde(rename = "ClusterId")]
    cluster_id: i64,
    #[serde(rename = "ProcId")]
    proc_id: i64,
    #[serde(rename = "JobStatus")]
    job_status: i64,
    #[serde(rename = "WMAgent_RequestName")]
    request_name: Option<String>,
    #[serde(rename = "WMAgent_JobID")]
    job_id: Option<i64>,
}

/// `condor_q` based scheduler query scoped to one agent name.
pub struct CondorQuery {
    executable: PathBuf,
    agent_name: String,
    timeout: Duration,
}

impl CondorQuery {
    pub fn new(executable: PathBuf, agent_name: String, timeout: Duration) -> Self {
        Self {
            executable,
            agent_name,
            timeout,
        }
    }

    fn constraint(&self) -> String {
        format!(
            "WMAgent_AgentName == \"{}\"",
            self.agent_name.replace('"', "\\\"")
        )
    }

    fn unavailable(&self, reason: impl fmt::Display) -> DrainError {
        DrainError::SchedulerUnavailable(format!("{}: {reason}", self.executable.display()))
    }
}

impl SchedulerQuery for CondorQuery {
    async fn snapshot_live_jobs(&self) -> Result<Vec<LiveSchedulerJob>, DrainError> {
        let constraint = self.constraint();
        trace!(executable = %self.executable.display(), %constraint, "querying scheduler");

        let child = Command::new(&self.executable)
            .args([
                "-allusers",
                "-json",
                "-constraint",
                &constraint,
                "-attributes",
                ATTRIBUTES,
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.unavailable(e))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| self.unavailable(format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| self.unavailable(e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.unavailable(format!(
                "exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let jobs = parse_condor_json(&String::from_utf8_lossy(&output.stdout))
            .map_err(|e| self.unavailable(e))?;
        debug!(jobs = jobs.len(), agent = %self.agent_name, "scheduler snapshot taken");
        Ok(jobs)
    }
}

/// Parses `condor_q -json` output. An empty queue prints nothing at all.
fn parse_condor_json(stdout: &str) -> Result<Vec<LiveSchedulerJob>, serde_json::Error> {
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }
    let ads: Vec<ClassAd> = serde_json::from_str(stdout)?;
    Ok(ads
        .into_iter()
        .map(|ad| LiveSchedulerJob {
            // Jobs without a request name still count as live, just not for any workflow.
            workflow: ad.request_name.unwrap_or_default(),
            scheduler_id: format!("{}.{}", ad.cluster_id, ad.proc_id),
            status: SchedulerJobStatus::from(ad.job_status),
            tracker_job_id: ad.job_id,
        })
        .collect())
}
