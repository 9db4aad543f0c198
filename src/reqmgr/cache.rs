use std::collections::HashMap;

use tracing::{debug, warn};

use super::client::StatusSource;
use super::types::{RequestInfo, WorkflowStatus};

/// Per-run memo of workflow lookups, keyed by workflow name.
///
/// Created empty at the start of a run and dropped with it; failed lookups are
/// stored as `UNKNOWN` so a flaky service is asked once per workflow.
#[derive(Debug, Default)]
pub struct StatusCache {
    entries: HashMap<String, RequestInfo>,
}

impl StatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, workflow: &str) -> Option<&RequestInfo> {
        self.entries.get(workflow)
    }

    pub fn insert(&mut self, workflow: &str, info: RequestInfo) {
        self.entries.insert(workflow.to_string(), info);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Workflow status lookups through a [`StatusCache`].
///
/// Never fails: any lookup error resolves to [`WorkflowStatus::Unknown`],
/// which callers treat as "not enough information to act".
pub struct WorkflowStatusClient<S> {
    source: S,
    cache: StatusCache,
}

impl<S: StatusSource> WorkflowStatusClient<S> {
    pub fn new(source: S, cache: StatusCache) -> Self {
        Self { source, cache }
    }

    /// Full lookup result, from the cache when possible.
    pub async fn get_request(&mut self, workflow: &str) -> RequestInfo {
        if let Some(info) = self.cache.get(workflow) {
            debug!(workflow, status = %info.status, "status cache hit");
            return info.clone();
        }

        let info = match self.source.fetch_request(workflow).await {
            Ok(info) => {
                if info.status.is_unknown() {
                    warn!(workflow, "ReqMgr returned an unrecognized status");
                }
                info
            }
            Err(e) => {
                warn!(workflow, error = %e, "ReqMgr lookup failed, status is UNKNOWN");
                RequestInfo::unknown()
            }
        };
        self.cache.insert(workflow, info.clone());
        info
    }

    pub async fn get_status(&mut self, workflow: &str) -> WorkflowStatus {
        self.get_request(workflow).await.status
    }

    pub fn cache(&self) -> &StatusCache {
        &self.cache
    }

    /// Forgets every lookup, UNKNOWN ones included. Called at the start of a run.
    pub fn reset_cache(&mut self) {
        self.cache = StatusCache::new();
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use super::*;
    use crate::reqmgr::ReqMgrError;

    /// Scripted lookup source that records every workflow it is asked about.
    #[derive(Default)]
    pub(crate) struct MockSource {
        pub(crate) statuses: HashMap<String, WorkflowStatus>,
        pub(crate) calls: RefCell<Vec<String>>,
    }

    impl MockSource {
        pub(crate) fn with(entries: &[(&str, WorkflowStatus)]) -> Self {
            Self {
                statuses: entries
                    .iter()
                    .map(|(wf, status)| (wf.to_string(), *status))
                    .collect(),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl StatusSource for MockSource {
        async fn fetch_request(&self, workflow: &str) -> Result<RequestInfo, ReqMgrError> {
            self.calls.borrow_mut().push(workflow.to_string());
            match self.statuses.get(workflow) {
                Some(status) => Ok(RequestInfo {
                    status: *status,
                    output_datasets: vec![format!("/{workflow}/Era-v1/AOD")],
                }),
                None => Err(ReqMgrError::ParseError("timed out".into())),
            }
        }
    }

    impl StatusSource for &MockSource {
        async fn fetch_request(&self, workflow: &str) -> Result<RequestInfo, ReqMgrError> {
            <MockSource as StatusSource>::fetch_request(*self, workflow).await
        }
    }
}
