use std::collections::{HashMap, HashSet};

use crate::config::PolicyConfig;
use crate::reqmgr::WorkflowStatus;
use crate::tracker::TargetState;

/// Maps a workflow's lifecycle status to the state its stale jobs move to.
///
/// Statuses in the fail set mean the workflow is still being worked on, so its
/// jobs are failed and left to the agent's retry logic. Every other known
/// status means the workflow is finished or gone and the jobs are cleaned out.
/// `UNKNOWN` never maps to anything.
#[derive(Debug, Clone)]
pub struct RemediationPolicy {
    fail_statuses: HashSet<WorkflowStatus>,
    overrides: HashMap<WorkflowStatus, TargetState>,
}

impl Default for RemediationPolicy {
    fn default() -> Self {
        Self::from_config(&PolicyConfig::default())
    }
}

impl RemediationPolicy {
    pub fn from_config(config: &PolicyConfig) -> Self {
        Self {
            fail_statuses: config.fail_statuses.iter().copied().collect(),
            overrides: config
                .overrides
                .iter()
                .map(|(status, target)| (WorkflowStatus::from(status.clone()), *target))
                .filter(|(status, _)| !status.is_unknown())
                .collect(),
        }
    }

    pub fn target_for(&self, status: WorkflowStatus) -> Option<TargetState> {
        if status.is_unknown() {
            return None;
        }
        if let Some(target) = self.overrides.get(&status) {
            return Some(*target);
        }
        if self.fail_statuses.contains(&status) {
            Some(TargetState::JobFailed)
        } else {
            Some(TargetState::Cleanout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_workflows_fail_their_jobs() {
        let policy = RemediationPolicy::default();
        for status in [
            WorkflowStatus::Acquired,
            WorkflowStatus::RunningOpen,
            WorkflowStatus::RunningClosed,
        ] {
            assert_eq!(policy.target_for(status), Some(TargetState::JobFailed));
        }
    }

    #[test]
    fn every_other_known_status_cleans_out() {
        let policy = RemediationPolicy::default();
        let fail = [
            WorkflowStatus::Acquired,
            WorkflowStatus::RunningOpen,
            WorkflowStatus::RunningClosed,
        ];
        for status in WorkflowStatus::KNOWN {
            if fail.contains(&status) {
                continue;
            }
            assert_eq!(
                policy.target_for(status),
                Some(TargetState::Cleanout),
                "{status}"
            );
        }
    }

    #[test]
    fn unknown_status_has_no_target() {
        assert_eq!(
            RemediationPolicy::default().target_for(WorkflowStatus::Unknown),
            None
        );
    }

    #[test]
    fn configured_policy_is_honoured() {
        let config = PolicyConfig {
            fail_statuses: vec![WorkflowStatus::RunningOpen],
            overrides: HashMap::from([("completed".to_string(), TargetState::JobFailed)]),
        };
        let policy = RemediationPolicy::from_config(&config);
        assert_eq!(
            policy.target_for(WorkflowStatus::RunningOpen),
            Some(TargetState::JobFailed)
        );
        assert_eq!(
            policy.target_for(WorkflowStatus::RunningClosed),
            Some(TargetState::Cleanout)
        );
        assert_eq!(
            policy.target_for(WorkflowStatus::Completed),
            Some(TargetState::JobFailed)
        );
    }
}
