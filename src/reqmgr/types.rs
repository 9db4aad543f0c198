//! Tipos de dados do serviço de ciclo de vida de workflows (ReqMgr).
//!
//! O endpoint `reqmgr2/data/request/<workflow>` devolve um documento JSON cujo
//! campo `RequestStatus` pertence a um vocabulário fechado. Qualquer valor fora
//! desse vocabulário vira [`WorkflowStatus::Unknown`], nunca um default destrutivo.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Status de ciclo de vida de um workflow conforme o ReqMgr.
///
/// `Unknown` representa tanto uma consulta que falhou quanto um valor não reconhecido.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WorkflowStatus {
    New,
    AssignmentApproved,
    Assigned,
    Staging,
    Staged,
    Acquired,
    RunningOpen,
    RunningClosed,
    Failed,
    ForceComplete,
    Completed,
    ClosedOut,
    Announced,
    NormalArchived,
    Aborted,
    AbortedCompleted,
    AbortedArchived,
    Rejected,
    RejectedArchived,
    Unknown,
}

impl WorkflowStatus {
    /// Todos os status conhecidos, sem `Unknown`.
    pub const KNOWN: [WorkflowStatus; 19] = [
        WorkflowStatus::New,
        WorkflowStatus::AssignmentApproved,
        WorkflowStatus::Assigned,
        WorkflowStatus::Staging,
        WorkflowStatus::Staged,
        WorkflowStatus::Acquired,
        WorkflowStatus::RunningOpen,
        WorkflowStatus::RunningClosed,
        WorkflowStatus::Failed,
        WorkflowStatus::ForceComplete,
        WorkflowStatus::Completed,
        WorkflowStatus::ClosedOut,
        WorkflowStatus::Announced,
        WorkflowStatus::NormalArchived,
        WorkflowStatus::Aborted,
        WorkflowStatus::AbortedCompleted,
        WorkflowStatus::AbortedArchived,
        WorkflowStatus::Rejected,
        WorkflowStatus::RejectedArchived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::New => "new",
            WorkflowStatus::AssignmentApproved => "assignment-approved",
            WorkflowStatus::Assigned => "assigned",
            WorkflowStatus::Staging => "staging",
            WorkflowStatus::Staged => "staged",
            WorkflowStatus::Acquired => "acquired",
            WorkflowStatus::RunningOpen => "running-open",
            WorkflowStatus::RunningClosed => "running-closed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::ForceComplete => "force-complete",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::ClosedOut => "closed-out",
            WorkflowStatus::Announced => "announced",
            WorkflowStatus::NormalArchived => "normal-archived",
            WorkflowStatus::Aborted => "aborted",
            WorkflowStatus::AbortedCompleted => "aborted-completed",
            WorkflowStatus::AbortedArchived => "aborted-archived",
            WorkflowStatus::Rejected => "rejected",
            WorkflowStatus::RejectedArchived => "rejected-archived",
            WorkflowStatus::Unknown => "UNKNOWN",
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, WorkflowStatus::Unknown)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Ok(WorkflowStatus::KNOWN
            .into_iter()
            .find(|status| status.as_str() == s)
            .unwrap_or(WorkflowStatus::Unknown))
    }
}

impl From<String> for WorkflowStatus {
    fn from(s: String) -> Self {
        let Ok(status) = s.parse::<WorkflowStatus>();
        status
    }
}

impl From<WorkflowStatus> for String {
    fn from(status: WorkflowStatus) -> Self {
        status.as_str().to_string()
    }
}

/// Corpo de resposta de `reqmgr2/data/request/<workflow>`.
///
/// `result` é uma lista com um único mapa `nome do workflow -> documento`.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestResponse {
    pub result: Vec<HashMap<String, RequestDocument>>,
}

/// Campos do documento do workflow que interessam aqui; o resto é ignorado.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestDocument {
    #[serde(rename = "RequestStatus")]
    pub request_status: String,
    /// Datasets de saída, usados para associar arquivos pendentes a workflows.
    #[serde(rename = "OutputDatasets", default)]
    pub output_datasets: Vec<String>,
}

/// O que se sabe de um workflow após uma consulta (bem-sucedida ou não).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestInfo {
    pub status: WorkflowStatus,
    pub output_datasets: Vec<String>,
}

impl RequestInfo {
    /// Resultado de uma consulta que falhou.
    pub fn unknown() -> Self {
        Self {
            status: WorkflowStatus::Unknown,
            output_datasets: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_statuses_parse_back() {
        for status in WorkflowStatus::KNOWN {
            assert_eq!(status.as_str().parse::<WorkflowStatus>().unwrap(), status);
        }
    }

    #[test]
    fn unrecognized_status_is_unknown() {
        let status: WorkflowStatus = "running-sideways".parse().unwrap();
        assert_eq!(status, WorkflowStatus::Unknown);
        let status: WorkflowStatus = "".parse().unwrap();
        assert!(status.is_unknown());
    }

    #[test]
    fn unknown_displays_upper_case() {
        assert_eq!(WorkflowStatus::Unknown.to_string(), "UNKNOWN");
        assert_eq!(WorkflowStatus::RunningClosed.to_string(), "running-closed");
    }

    #[test]
    fn status_serde_uses_service_strings() {
        let json = serde_json::to_string(&WorkflowStatus::AbortedArchived).unwrap();
        assert_eq!(json, r#""aborted-archived""#);
        let status: WorkflowStatus = serde_json::from_str(r#""closed-out""#).unwrap();
        assert_eq!(status, WorkflowStatus::ClosedOut);
    }

    #[test]
    fn request_response_deserialize_from_service_format() {
        let json = r#"{
            "result": [{
                "pdmvserv_task_HIG-001": {
                    "RequestStatus": "running-closed",
                    "OutputDatasets": ["/Primary/Era-v1/AODSIM"],
                    "RequestType": "TaskChain",
                    "Campaign": "RunIISpring16DR80"
                }
            }]
        }"#;
        let resp: RequestResponse = serde_json::from_str(json).unwrap();
        let doc = &resp.result[0]["pdmvserv_task_HIG-001"];
        assert_eq!(doc.request_status, "running-closed");
        assert_eq!(doc.output_datasets, vec!["/Primary/Era-v1/AODSIM"]);
    }

    #[test]
    fn output_datasets_default_to_empty() {
        let json = r#"{"result": [{"wf": {"RequestStatus": "acquired"}}]}"#;
        let resp: RequestResponse = serde_json::from_str(json).unwrap();
        assert!(resp.result[0]["wf"].output_datasets.is_empty());
    }
}
