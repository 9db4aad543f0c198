use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DrainError;

/// Lifecycle states a tracker job can be in.
///
/// The tracker stores the lowercase name (`executing`, `jobfailed`, ...) in
/// `job.state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    New,
    Created,
    Executing,
    Complete,
    Success,
    CreateFailed,
    SubmitFailed,
    JobFailed,
    CreateCooloff,
    SubmitCooloff,
    JobCooloff,
    Exhausted,
    Killed,
    RetryDone,
    Cleanout,
}

impl JobState {
    pub const ALL: [JobState; 15] = [
        JobState::New,
        JobState::Created,
        JobState::Executing,
        JobState::Complete,
        JobState::Success,
        JobState::CreateFailed,
        JobState::SubmitFailed,
        JobState::JobFailed,
        JobState::CreateCooloff,
        JobState::SubmitCooloff,
        JobState::JobCooloff,
        JobState::Exhausted,
        JobState::Killed,
        JobState::RetryDone,
        JobState::Cleanout,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::New => "new",
            JobState::Created => "created",
            JobState::Executing => "executing",
            JobState::Complete => "complete",
            JobState::Success => "success",
            JobState::CreateFailed => "createfailed",
            JobState::SubmitFailed => "submitfailed",
            JobState::JobFailed => "jobfailed",
            JobState::CreateCooloff => "createcooloff",
            JobState::SubmitCooloff => "submitcooloff",
            JobState::JobCooloff => "jobcooloff",
            JobState::Exhausted => "exhausted",
            JobState::Killed => "killed",
            JobState::RetryDone => "retrydone",
            JobState::Cleanout => "cleanout",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = DrainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| DrainError::UnknownJobState(s.to_string()))
    }
}

/// The two terminal states a stale executing job can be moved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetState {
    /// The workflow is still alive: let the tracker retry or account the job as failed.
    JobFailed,
    /// The workflow is gone: the job only needs to be cleaned out.
    Cleanout,
}

impl TargetState {
    pub fn job_state(&self) -> JobState {
        match self {
            TargetState::JobFailed => JobState::JobFailed,
            TargetState::Cleanout => JobState::Cleanout,
        }
    }
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.job_state().fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_state_parses_every_stored_name() {
        for state in JobState::ALL {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
    }

    #[test]
    fn job_state_rejects_unknown_name() {
        let err = "zombie".parse::<JobState>().unwrap_err();
        assert!(matches!(err, DrainError::UnknownJobState(ref s) if s == "zombie"));
    }

    #[test]
    fn target_state_display_matches_tracker_names() {
        assert_eq!(TargetState::JobFailed.to_string(), "jobfailed");
        assert_eq!(TargetState::Cleanout.to_string(), "cleanout");
        assert_eq!(TargetState::Cleanout.job_state(), JobState::Cleanout);
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&TargetState::JobFailed).unwrap();
        assert_eq!(json, r#""jobfailed""#);
        let state: JobState = serde_json::from_str(r#""retrydone""#).unwrap();
        assert_eq!(state, JobState::RetryDone);
    }
}
