//! Cross-checks stale `executing` jobs against the scheduler and the workflow
//! service, then moves them to a terminal state once an operator agrees.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::DrainError;
use crate::policy::RemediationPolicy;
use crate::reqmgr::{StatusSource, WorkflowStatus, WorkflowStatusClient};
use crate::scheduler::{SchedulerQuery, live_counts};
use crate::tracker::{JobTracker, TargetState, WorkflowStaleGroup};

/// What the operator is asked to approve for one workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemediationProposal<'a> {
    pub workflow: &'a str,
    pub status: WorkflowStatus,
    pub target: TargetState,
    pub job_count: usize,
    pub live_jobs: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approval {
    Approve,
    Decline,
    /// Stop the run: this group and every later one are left alone.
    Abort,
}

/// Gate in front of every tracker write.
pub trait Approver {
    fn confirm(&mut self, proposal: &RemediationProposal<'_>) -> Approval;
}

/// Result of reconciling one stale group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GroupOutcome {
    Remediated {
        status: WorkflowStatus,
        target: TargetState,
        jobs_transitioned: usize,
    },
    /// Dry run: would have been proposed to the operator.
    Planned {
        status: WorkflowStatus,
        target: TargetState,
        jobs: usize,
    },
    SkippedLiveJobs {
        live_jobs: usize,
    },
    SkippedUnknownStatus,
    SkippedAlreadyResolved {
        status: WorkflowStatus,
    },
    Declined {
        status: WorkflowStatus,
        target: TargetState,
    },
    Aborted,
    Failed {
        error: String,
    },
}

impl fmt::Display for GroupOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupOutcome::Remediated {
                status,
                target,
                jobs_transitioned,
            } => write!(f, "{jobs_transitioned} jobs -> {target} (workflow {status})"),
            GroupOutcome::Planned {
                status,
                target,
                jobs,
            } => write!(f, "would move {jobs} jobs -> {target} (workflow {status})"),
            GroupOutcome::SkippedLiveJobs { live_jobs } => {
                write!(f, "skipped: {live_jobs} live scheduler jobs")
            }
            GroupOutcome::SkippedUnknownStatus => write!(f, "skipped: unknown status"),
            GroupOutcome::SkippedAlreadyResolved { .. } => write!(f, "skipped: already resolved"),
            GroupOutcome::Declined { .. } => write!(f, "skipped: operator declined"),
            GroupOutcome::Aborted => write!(f, "skipped: operator aborted"),
            GroupOutcome::Failed { error } => write!(f, "error: {error}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupReport {
    pub workflow: String,
    pub stale_jobs: usize,
    #[serde(flatten)]
    pub outcome: GroupOutcome,
}

/// Everything a run did, in the order the groups were visited.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cutoff: DateTime<Utc>,
    pub dry_run: bool,
    pub live_scheduler_jobs: usize,
    pub status_lookups: usize,
    pub groups: Vec<GroupReport>,
    pub examined: usize,
    pub remediated: usize,
    pub planned: usize,
    pub skipped_live_jobs: usize,
    pub skipped_unknown_status: usize,
    pub skipped_already_resolved: usize,
    pub declined: usize,
    pub aborted: usize,
    pub failed: usize,
    pub jobs_transitioned: usize,
}

impl RunSummary {
    fn new(run_id: Uuid, started_at: DateTime<Utc>, cutoff: DateTime<Utc>, dry_run: bool) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: None,
            cutoff,
            dry_run,
            live_scheduler_jobs: 0,
            status_lookups: 0,
            groups: Vec::new(),
            examined: 0,
            remediated: 0,
            planned: 0,
            skipped_live_jobs: 0,
            skipped_unknown_status: 0,
            skipped_already_resolved: 0,
            declined: 0,
            aborted: 0,
            failed: 0,
            jobs_transitioned: 0,
        }
    }

    fn record(&mut self, report: GroupReport) {
        self.examined += 1;
        match &report.outcome {
            GroupOutcome::Remediated {
                jobs_transitioned, ..
            } => {
                self.remediated += 1;
                self.jobs_transitioned += jobs_transitioned;
            }
            GroupOutcome::Planned { .. } => self.planned += 1,
            GroupOutcome::SkippedLiveJobs { .. } => self.skipped_live_jobs += 1,
            GroupOutcome::SkippedUnknownStatus => self.skipped_unknown_status += 1,
            GroupOutcome::SkippedAlreadyResolved { .. } => self.skipped_already_resolved += 1,
            GroupOutcome::Declined { .. } => self.declined += 1,
            GroupOutcome::Aborted => self.aborted += 1,
            GroupOutcome::Failed { .. } => self.failed += 1,
        }
        self.groups.push(report);
    }

    pub fn skipped(&self) -> usize {
        self.skipped_live_jobs
            + self.skipped_unknown_status
            + self.skipped_already_resolved
            + self.declined
            + self.aborted
    }

    /// Every examined group lands in exactly one category.
    pub fn is_consistent(&self) -> bool {
        self.examined == self.groups.len()
            && self.examined == self.remediated + self.planned + self.skipped() + self.failed
    }
}

/// Drives one reconciliation run over a tracker, a scheduler and a status source.
pub struct ReconciliationEngine<T, Q, S> {
    tracker: T,
    scheduler: Q,
    statuses: WorkflowStatusClient<S>,
    policy: RemediationPolicy,
    age_threshold: Duration,
    dry_run: bool,
}

impl<T, Q, S> ReconciliationEngine<T, Q, S>
where
    T: JobTracker,
    Q: SchedulerQuery,
    S: StatusSource,
{
    pub fn new(
        tracker: T,
        scheduler: Q,
        statuses: WorkflowStatusClient<S>,
        policy: RemediationPolicy,
        age_threshold: Duration,
    ) -> Self {
        Self {
            tracker,
            scheduler,
            statuses,
            policy,
            age_threshold,
            dry_run: false,
        }
    }

    /// Decide everything, ask nobody, write nothing.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    /// Runs one reconciliation pass.
    ///
    /// Errors only on the fatal paths: a failed tracker read or an unavailable
    /// scheduler. Both happen before any write of the affected group, and a
    /// scheduler failure happens before any write at all. Status lookups are
    /// never carried over from a previous run.
    pub async fn run(&mut self, approver: &mut impl Approver) -> Result<RunSummary, DrainError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let cutoff = started_at - self.age_threshold;
        let mut summary = RunSummary::new(run_id, started_at, cutoff, self.dry_run);
        self.statuses.reset_cache();

        let groups = self.tracker.find_stale_executing_groups(cutoff)?;
        let stale_jobs: usize = groups.iter().map(|g| g.count).sum();
        info!(%run_id, %cutoff, groups = groups.len(), stale_jobs, "stale executing jobs found");

        // Taken even when nothing is stale: an unreachable scheduler is still fatal.
        let snapshot = self.scheduler.snapshot_live_jobs().await?;
        let live = live_counts(&snapshot);
        summary.live_scheduler_jobs = snapshot.len();
        info!(%run_id, live_jobs = snapshot.len(), "scheduler snapshot taken");

        let mut aborted = false;
        for group in groups {
            let live_jobs = live.get(group.workflow.as_str()).copied().unwrap_or(0);
            let outcome = if aborted {
                GroupOutcome::Aborted
            } else {
                self.reconcile_group(&group, live_jobs, cutoff, approver)
                    .await?
            };
            if outcome == GroupOutcome::Aborted {
                aborted = true;
            }
            log_outcome(&run_id, &group, &outcome);
            summary.record(GroupReport {
                workflow: group.workflow,
                stale_jobs: group.count,
                outcome,
            });
        }

        summary.status_lookups = self.statuses.cache().len();
        summary.finished_at = Some(Utc::now());
        Ok(summary)
    }

    async fn reconcile_group(
        &mut self,
        group: &WorkflowStaleGroup,
        live_jobs: usize,
        cutoff: DateTime<Utc>,
        approver: &mut impl Approver,
    ) -> Result<GroupOutcome, DrainError> {
        if live_jobs > 0 {
            return Ok(GroupOutcome::SkippedLiveJobs { live_jobs });
        }

        let status = self.statuses.get_status(&group.workflow).await;
        let Some(target) = self.policy.target_for(status) else {
            return Ok(GroupOutcome::SkippedUnknownStatus);
        };

        // The id list, not the advisory count, decides what gets written.
        let job_ids = self.tracker.find_stale_job_ids(&group.workflow, cutoff)?;
        if job_ids.is_empty() {
            return Ok(GroupOutcome::SkippedAlreadyResolved { status });
        }
        if self.dry_run {
            return Ok(GroupOutcome::Planned {
                status,
                target,
                jobs: job_ids.len(),
            });
        }

        let proposal = RemediationProposal {
            workflow: &group.workflow,
            status,
            target,
            job_count: job_ids.len(),
            live_jobs,
        };
        match approver.confirm(&proposal) {
            Approval::Decline => Ok(GroupOutcome::Declined { status, target }),
            Approval::Abort => Ok(GroupOutcome::Aborted),
            Approval::Approve => match self.tracker.apply_state_transition(&job_ids, target) {
                Ok(jobs_transitioned) => Ok(GroupOutcome::Remediated {
                    status,
                    target,
                    jobs_transitioned,
                }),
                Err(e) => Ok(GroupOutcome::Failed {
                    error: e.to_string(),
                }),
            },
        }
    }
}

fn log_outcome(run_id: &Uuid, group: &WorkflowStaleGroup, outcome: &GroupOutcome) {
    let workflow = group.workflow.as_str();
    match outcome {
        GroupOutcome::Remediated { .. } | GroupOutcome::Planned { .. } => {
            info!(%run_id, workflow, stale_jobs = group.count, "{outcome}")
        }
        GroupOutcome::Failed { .. } => {
            error!(%run_id, workflow, stale_jobs = group.count, "{outcome}")
        }
        GroupOutcome::SkippedUnknownStatus => {
            warn!(%run_id, workflow, stale_jobs = group.count, "{outcome}")
        }
        _ => info!(%run_id, workflow, stale_jobs = group.count, "{outcome}"),
    }
}
