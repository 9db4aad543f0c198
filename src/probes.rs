//! Read-only readiness report for an agent about to be drained.
//!
//! Each probe asks one authority (scheduler, tracker, workflow service) a
//! single question. Nothing here writes anywhere.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::DrainError;
use crate::reqmgr::{RequestInfo, StatusSource, WorkflowStatus, WorkflowStatusClient};
use crate::scheduler::{SchedulerQuery, counts_by_status};
use crate::tracker::{JobState, OpenBlock, SqliteTracker, SubFileStatus};

// Open blocks listed in the text report; the JSON report carries all of them.
const OPEN_BLOCKS_SHOWN: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowLine {
    pub workflow: String,
    pub status: WorkflowStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutingWorkflow {
    pub workflow: String,
    pub status: WorkflowStatus,
    pub jobs: usize,
}

/// A dataset with pending files that one of the agent's workflows produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetMatch {
    pub workflow: String,
    pub status: WorkflowStatus,
    pub dataset: String,
}

/// Files stuck on their way to the catalog or the transfer system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileAudit {
    pub files: usize,
    pub datasets: Vec<String>,
    pub produced_by: Vec<DatasetMatch>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DrainReport {
    pub generated_at: DateTime<Utc>,
    /// Scheduler job counts, status name -> workflow -> jobs.
    pub scheduler_jobs: Option<BTreeMap<String, BTreeMap<String, usize>>>,
    pub scheduler_error: Option<String>,
    pub known_workflows: Vec<WorkflowLine>,
    pub incomplete_workflows: Vec<WorkflowLine>,
    pub uninjected_workflows: Vec<WorkflowLine>,
    pub jobs_by_state: Vec<(String, usize)>,
    pub executing_workflows: Vec<ExecutingWorkflow>,
    pub unfinished_subscriptions: Vec<WorkflowLine>,
    pub files_available: Vec<(i64, usize)>,
    pub files_acquired: Vec<(i64, usize)>,
    pub open_blocks: Vec<OpenBlock>,
    pub files_not_uploaded: FileAudit,
    pub files_not_injected: FileAudit,
    pub files_not_injected_without_block: FileAudit,
}

/// Runs every probe in order and gathers the answers.
///
/// An unreachable scheduler is reported, not fatal. Tracker errors are.
pub async fn collect<Q, S>(
    tracker: &SqliteTracker,
    scheduler: &Q,
    statuses: &mut WorkflowStatusClient<S>,
) -> Result<DrainReport, DrainError>
where
    Q: SchedulerQuery,
    S: StatusSource,
{
    let generated_at = Utc::now();

    let (scheduler_jobs, scheduler_error) = match scheduler.snapshot_live_jobs().await {
        Ok(jobs) => {
            let counts = counts_by_status(&jobs)
                .into_iter()
                .map(|(status, per_workflow)| (status.to_string(), per_workflow))
                .collect();
            (Some(counts), None)
        }
        Err(e) => {
            warn!(error = %e, "scheduler snapshot failed, continuing without it");
            (None, Some(e.to_string()))
        }
    };

    let known = tracker.known_workflows()?;
    info!(workflows = known.len(), "looking up workflow statuses");
    let mut requests = BTreeMap::new();
    for workflow in &known {
        let info = statuses.get_request(workflow).await;
        requests.insert(workflow.clone(), info);
    }

    let jobs_by_state = tracker.job_counts_by_state()?;
    let has_executing = jobs_by_state
        .iter()
        .any(|(state, _)| state == JobState::Executing.as_str());
    let executing_workflows = if has_executing {
        let mut lines = Vec::new();
        for (workflow, jobs) in tracker.executing_workflows()? {
            let status = statuses.get_status(&workflow).await;
            lines.push(ExecutingWorkflow {
                workflow,
                status,
                jobs,
            });
        }
        lines
    } else {
        Vec::new()
    };

    Ok(DrainReport {
        generated_at,
        scheduler_jobs,
        scheduler_error,
        known_workflows: with_status(statuses, known).await,
        incomplete_workflows: with_status(statuses, tracker.incomplete_workflows()?).await,
        uninjected_workflows: with_status(statuses, tracker.uninjected_workflows()?).await,
        jobs_by_state,
        executing_workflows,
        unfinished_subscriptions: with_status(statuses, tracker.unfinished_subscriptions()?)
            .await,
        files_available: tracker.files_per_subscription(SubFileStatus::Available)?,
        files_acquired: tracker.files_per_subscription(SubFileStatus::Acquired)?,
        open_blocks: tracker.open_blocks()?,
        files_not_uploaded: audit_files(&tracker.files_not_uploaded()?, &requests),
        files_not_injected: audit_files(&tracker.files_not_injected(true)?, &requests),
        files_not_injected_without_block: audit_files(
            &tracker.files_not_injected(false)?,
            &requests,
        ),
    })
}

async fn with_status<S: StatusSource>(
    statuses: &mut WorkflowStatusClient<S>,
    workflows: Vec<String>,
) -> Vec<WorkflowLine> {
    let mut lines = Vec::with_capacity(workflows.len());
    for workflow in workflows {
        let status = statuses.get_status(&workflow).await;
        lines.push(WorkflowLine { workflow, status });
    }
    lines
}

/// Dataset name for a logical file name.
///
/// `/store/<kind>/<era>/<primary>/<tier>/<version>/...` becomes
/// `/<primary>/<era>-<version>/<tier>`.
pub fn lfn_to_dataset(lfn: &str) -> Option<String> {
    let mut parts = lfn.split('/').skip(3);
    let era = parts.next()?;
    let primary = parts.next()?;
    let tier = parts.next()?;
    let version = parts.next()?;
    if [era, primary, tier, version].iter().any(|p| p.is_empty()) {
        return None;
    }
    Some(format!("/{primary}/{era}-{version}/{tier}"))
}

// Drops the last two path components: files of one dataset share this prefix.
fn lfn_directory(lfn: &str) -> &str {
    lfn.rsplitn(3, '/').nth(2).unwrap_or(lfn)
}

fn audit_files(lfns: &[String], requests: &BTreeMap<String, RequestInfo>) -> FileAudit {
    let directories: BTreeSet<&str> = lfns.iter().map(|lfn| lfn_directory(lfn)).collect();
    let datasets: BTreeSet<String> = directories
        .into_iter()
        .filter_map(lfn_to_dataset)
        .collect();

    let mut produced_by = Vec::new();
    for dataset in &datasets {
        for (workflow, info) in requests {
            if info.output_datasets.iter().any(|d| d == dataset) {
                produced_by.push(DatasetMatch {
                    workflow: workflow.clone(),
                    status: info.status,
                    dataset: dataset.clone(),
                });
            }
        }
    }

    FileAudit {
        files: lfns.len(),
        datasets: datasets.into_iter().collect(),
        produced_by,
    }
}

impl DrainReport {
    /// The text report, optionally wrapped in `<pre>` so it pastes into a wiki page.
    pub fn render(&self, twiki: bool) -> String {
        if twiki {
            format!("<pre>\n{self}</pre>\n")
        } else {
            self.to_string()
        }
    }
}

fn write_workflows(f: &mut fmt::Formatter<'_>, lines: &[WorkflowLine]) -> fmt::Result {
    for line in lines {
        writeln!(f, "{:<100}\t{}", line.workflow, line.status)?;
    }
    Ok(())
}

fn write_files(f: &mut fmt::Formatter<'_>, audit: &FileAudit) -> fmt::Result {
    if audit.files == 0 {
        return Ok(());
    }
    writeln!(
        f,
        "==> Which maps to {} unique datasets:",
        audit.datasets.len()
    )?;
    for dataset in &audit.datasets {
        writeln!(f, "    {dataset}")?;
    }
    if audit.produced_by.is_empty() {
        writeln!(
            f,
            "... that were NOT produced by any workflow known to this agent, or the workflows are gone already."
        )?;
    } else {
        writeln!(f, "... produced by the following workflows:")?;
        for m in &audit.produced_by {
            writeln!(f, "    {}\t{}\t{}", m.workflow, m.status, m.dataset)?;
        }
    }
    Ok(())
}

impl fmt::Display for DrainReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Drain check time: {}\n",
            self.generated_at.format("%a, %d %b %Y %H:%M:%S +0000")
        )?;

        writeln!(f, "*** SCHEDULER: jobs per workflow, by job status:")?;
        match (&self.scheduler_jobs, &self.scheduler_error) {
            (Some(counts), _) if counts.is_empty() => writeln!(f, "no jobs")?,
            (Some(counts), _) => {
                for (status, workflows) in counts {
                    writeln!(f, "{status}:")?;
                    for (workflow, jobs) in workflows {
                        writeln!(f, "    {workflow}: {jobs}")?;
                    }
                }
            }
            (None, error) => writeln!(
                f,
                "WARNING: scheduler unavailable: {}",
                error.as_deref().unwrap_or("no answer")
            )?,
        }

        writeln!(
            f,
            "\n*** WORKFLOWS: found {} distinct workflows in this agent.",
            self.known_workflows.len()
        )?;
        write_workflows(f, &self.known_workflows)?;

        writeln!(
            f,
            "\n*** WORKFLOWS: there are {} distinct workflows not completed.",
            self.incomplete_workflows.len()
        )?;
        write_workflows(f, &self.incomplete_workflows)?;

        writeln!(
            f,
            "\n*** WORKFLOWS: found {} workflows not fully injected.",
            self.uninjected_workflows.len()
        )?;
        write_workflows(f, &self.uninjected_workflows)?;

        writeln!(f, "\n*** TRACKER: jobs in each state:")?;
        for (state, count) in &self.jobs_by_state {
            writeln!(f, "    {state}: {count}")?;
        }
        if !self.executing_workflows.is_empty() {
            writeln!(
                f,
                "\n*** TRACKER: {} workflows with executing jobs:",
                self.executing_workflows.len()
            )?;
            for line in &self.executing_workflows {
                writeln!(f, "{:<100}\t{}\t{}", line.workflow, line.status, line.jobs)?;
            }
        }

        writeln!(
            f,
            "\n*** SUBSCRIPTIONS: subscriptions not finished: {}",
            self.unfinished_subscriptions.len()
        )?;
        write_workflows(f, &self.unfinished_subscriptions)?;

        let available: usize = self.files_available.iter().map(|(_, n)| n).sum();
        writeln!(
            f,
            "\n*** SUBSCRIPTIONS: found {available} files available (waiting for job creation):"
        )?;
        for (subscription, files) in &self.files_available {
            writeln!(f, "    subscription {subscription}: {files}")?;
        }
        let acquired: usize = self.files_acquired.iter().map(|(_, n)| n).sum();
        writeln!(
            f,
            "\n*** SUBSCRIPTIONS: found {acquired} files acquired (waiting for jobs to finish):"
        )?;
        for (subscription, files) in &self.files_acquired {
            writeln!(f, "    subscription {subscription}: {files}")?;
        }

        write!(
            f,
            "\n*** CATALOG: found {} open blocks.",
            self.open_blocks.len()
        )?;
        if self.open_blocks.is_empty() {
            writeln!(f)?;
        } else {
            writeln!(f, " Printing the first {OPEN_BLOCKS_SHOWN} blocks only:")?;
            for block in self.open_blocks.iter().take(OPEN_BLOCKS_SHOWN) {
                writeln!(f, "    {}\t{}", block.name, block.status)?;
            }
        }

        writeln!(
            f,
            "\n*** CATALOG: found {} files not uploaded.",
            self.files_not_uploaded.files
        )?;
        write_files(f, &self.files_not_uploaded)?;

        writeln!(
            f,
            "\n*** TRANSFERS: found {} files not injected, with a block (recoverable).",
            self.files_not_injected.files
        )?;
        write_files(f, &self.files_not_injected)?;

        writeln!(
            f,
            "\n*** TRANSFERS: found {} files not injected, without a block (unrecoverable).",
            self.files_not_injected_without_block.files
        )?;
        write_files(f, &self.files_not_injected_without_block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reqmgr::StatusCache;
    use crate::reqmgr::cache::mock::MockSource;
    use crate::scheduler::mock::MockScheduler;

    #[test]
    fn lfn_maps_to_dataset() {
        assert_eq!(
            lfn_to_dataset("/store/data/Run2018A/EGamma/RAW/v1/000/315/252/00000/F6.root")
                .as_deref(),
            Some("/EGamma/Run2018A-v1/RAW")
        );
        assert_eq!(
            lfn_to_dataset("/store/mc/RunIIFall17/TTbar/AODSIM/94X_v2/10000").as_deref(),
            Some("/TTbar/RunIIFall17-94X_v2/AODSIM")
        );
    }

    #[test]
    fn short_lfn_has_no_dataset() {
        assert_eq!(lfn_to_dataset("/store/data/Run2018A"), None);
        assert_eq!(lfn_to_dataset("MCFakeFile-abc"), None);
    }

    #[test]
    fn directory_drops_last_two_components() {
        assert_eq!(
            lfn_directory("/store/data/Run2018A/EGamma/RAW/v1/000/315/a.root"),
            "/store/data/Run2018A/EGamma/RAW/v1/000"
        );
        assert_eq!(lfn_directory("a.root"), "a.root");
    }

    #[test]
    fn file_audit_matches_output_datasets() {
        let lfns = vec![
            "/store/data/Run2018A/EGamma/RAW/v1/000/315/a.root".to_string(),
            "/store/data/Run2018A/EGamma/RAW/v1/000/316/b.root".to_string(),
            "/store/data/Run2018A/Muon/RAW/v1/000/315/c.root".to_string(),
        ];
        let requests = BTreeMap::from([(
            "Express_Run315".to_string(),
            RequestInfo {
                status: WorkflowStatus::Completed,
                output_datasets: vec!["/EGamma/Run2018A-v1/RAW".to_string()],
            },
        )]);

        let audit = audit_files(&lfns, &requests);
        assert_eq!(audit.files, 3);
        assert_eq!(
            audit.datasets,
            vec!["/EGamma/Run2018A-v1/RAW", "/Muon/Run2018A-v1/RAW"]
        );
        assert_eq!(
            audit.produced_by,
            vec![DatasetMatch {
                workflow: "Express_Run315".into(),
                status: WorkflowStatus::Completed,
                dataset: "/EGamma/Run2018A-v1/RAW".into(),
            }]
        );
    }

    fn seeded_tracker() -> SqliteTracker {
        let tracker = SqliteTracker::in_memory().unwrap();
        let sub = tracker.add_workflow("W1");
        tracker.add_jobs(sub, JobState::Executing, Utc::now(), 2);
        tracker.add_workflow("W2");
        tracker.add_file("/store/data/Era/W1/AOD/v1/000/1/x.root", "NOTUPLOADED", None);
        tracker
    }

    #[tokio::test]
    async fn report_covers_every_probe() {
        let tracker = seeded_tracker();
        let scheduler = MockScheduler::with(&[("W1", 2)]);
        let source = MockSource::with(&[("W1", WorkflowStatus::RunningOpen)]);
        let mut statuses = WorkflowStatusClient::new(&source, StatusCache::new());

        let report = collect(&tracker, &scheduler, &mut statuses).await.unwrap();

        assert_eq!(report.scheduler_jobs.as_ref().unwrap()["Running"]["W1"], 2);
        assert_eq!(report.known_workflows.len(), 2);
        assert_eq!(report.known_workflows[1].status, WorkflowStatus::Unknown);
        assert_eq!(
            report.executing_workflows,
            vec![ExecutingWorkflow {
                workflow: "W1".into(),
                status: WorkflowStatus::RunningOpen,
                jobs: 2
            }]
        );
        assert_eq!(report.files_not_uploaded.files, 1);
        // MockSource lists "/W1/Era-v1/AOD" as W1's output.
        assert_eq!(
            report.files_not_uploaded.produced_by,
            vec![DatasetMatch {
                workflow: "W1".into(),
                status: WorkflowStatus::RunningOpen,
                dataset: "/W1/Era-v1/AOD".into(),
            }]
        );
        assert_eq!(report.files_not_injected.files, 0);
        assert_eq!(report.files_not_injected_without_block.files, 1);
        // One lookup per workflow despite appearing in several probes.
        assert_eq!(source.calls.borrow().len(), 2);
    }

    #[tokio::test]
    async fn unavailable_scheduler_is_only_a_warning() {
        let tracker = seeded_tracker();
        let scheduler = MockScheduler::unavailable();
        let source = MockSource::default();
        let mut statuses = WorkflowStatusClient::new(&source, StatusCache::new());

        let report = collect(&tracker, &scheduler, &mut statuses).await.unwrap();

        assert!(report.scheduler_jobs.is_none());
        let text = report.render(false);
        assert!(text.contains("WARNING: scheduler unavailable: "));
        assert!(text.contains("*** WORKFLOWS: found 2 distinct workflows in this agent."));
    }

    #[tokio::test]
    async fn twiki_output_is_preformatted() {
        let tracker = SqliteTracker::in_memory().unwrap();
        let scheduler = MockScheduler::with(&[]);
        let source = MockSource::default();
        let mut statuses = WorkflowStatusClient::new(&source, StatusCache::new());

        let report = collect(&tracker, &scheduler, &mut statuses).await.unwrap();
        let text = report.render(true);

        assert!(text.starts_with("<pre>\nDrain check time: "));
        assert!(text.ends_with("</pre>\n"));
        assert!(report.executing_workflows.is_empty());
    }
}
