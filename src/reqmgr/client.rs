use std::path::Path;
use std::time::Duration;

use reqwest::{Client, Identity};

use super::error::ReqMgrError;
use super::types::{RequestInfo, RequestResponse, WorkflowStatus};

pub const DEFAULT_BASE_URL: &str = "https://cmsweb.cern.ch";

/// Anything that can look up a workflow in the lifecycle service.
#[allow(async_fn_in_trait)]
pub trait StatusSource {
    async fn fetch_request(&self, workflow: &str) -> Result<RequestInfo, ReqMgrError>;
}

pub struct ReqMgrClient {
    client: Client,
    base_url: String,
}

impl ReqMgrClient {
    /// Builds a client authenticating with the X.509 proxy at `proxy`, which
    /// holds both the certificate chain and the private key.
    pub fn new(
        base_url: String,
        proxy: Option<&Path>,
        timeout: Duration,
    ) -> Result<Self, ReqMgrError> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout);

        if let Some(path) = proxy {
            let pem = std::fs::read(path).map_err(|e| ReqMgrError::Credentials {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
            let identity = Identity::from_pem(&pem).map_err(|e| ReqMgrError::Credentials {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
            builder = builder.identity(identity);
        }

        Ok(Self {
            client: builder.build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn request_url(&self, workflow: &str) -> String {
        format!("{}/reqmgr2/data/request/{workflow}", self.base_url)
    }
}

impl StatusSource for ReqMgrClient {
    async fn fetch_request(&self, workflow: &str) -> Result<RequestInfo, ReqMgrError> {
        let response = self
            .client
            .get(self.request_url(workflow))
            .header("accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ReqMgrError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body: RequestResponse = response
            .json()
            .await
            .map_err(|e| ReqMgrError::ParseError(e.to_string()))?;
        let document = body
            .result
            .into_iter()
            .find_map(|mut entry| entry.remove(workflow))
            .ok_or_else(|| ReqMgrError::ParseError(format!("no document for {workflow}")))?;

        Ok(RequestInfo {
            status: WorkflowStatus::from(document.request_status),
            output_datasets: document.output_datasets,
        })
    }
}
