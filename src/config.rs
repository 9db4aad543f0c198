//! Configuração do agentdrain carregada a partir de `agentdrain.toml`.
//!
//! A struct [`DrainConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! As variáveis de ambiente `X509_USER_PROXY`, `AGENTDRAIN_TRACKER_DB` e
//! `AGENTDRAIN_AGENT_NAME` têm precedência sobre o arquivo.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::DrainError;
use crate::reqmgr::WorkflowStatus;
use crate::reqmgr::client::DEFAULT_BASE_URL;
use crate::tracker::TargetState;

/// Configuração de nível superior carregada de `agentdrain.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct DrainConfig {
    /// Caminho do banco SQLite do rastreador de jobs.
    #[serde(default = "default_tracker_db")]
    pub tracker_db: PathBuf,

    /// Nome do agente, usado para filtrar os jobs no HTCondor.
    #[serde(default = "default_agent_name")]
    pub agent_name: String,

    /// URL base do ReqMgr.
    #[serde(default = "default_reqmgr_url")]
    pub reqmgr_url: String,

    /// Proxy X.509 (certificado e chave no mesmo PEM) para autenticar no ReqMgr.
    #[serde(default)]
    pub proxy_path: Option<PathBuf>,

    /// Executável do `condor_q`.
    #[serde(default = "default_condor_q")]
    pub condor_q: PathBuf,

    /// Tempo máximo de espera pela resposta do HTCondor, em segundos.
    #[serde(default = "default_scheduler_timeout_secs")]
    pub scheduler_timeout_secs: u64,

    /// Tempo máximo de uma consulta ao ReqMgr, em segundos.
    #[serde(default = "default_reqmgr_timeout_secs")]
    pub reqmgr_timeout_secs: u64,

    /// Idade mínima, em dias, para um job em `executing` ser considerado preso.
    #[serde(default = "default_age_threshold_days")]
    pub age_threshold_days: u32,

    /// Política de remediação.
    #[serde(default)]
    pub policy: PolicyConfig,
}

/// Mapeamento entre status do workflow e estado de destino dos jobs presos.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    /// Status de workflows ainda vivos: os jobs vão para `jobfailed`.
    #[serde(default = "default_fail_statuses")]
    pub fail_statuses: Vec<WorkflowStatus>,

    /// Exceções explícitas, status -> estado de destino. Têm precedência sobre `fail_statuses`.
    #[serde(default)]
    pub overrides: HashMap<String, TargetState>,
}

// Valor padrão do banco do rastreador: "tracker.db" no diretório atual.
fn default_tracker_db() -> PathBuf {
    PathBuf::from("tracker.db")
}

// Valor padrão do nome do agente.
fn default_agent_name() -> String {
    "WMAgentCommissioning".to_string()
}

fn default_reqmgr_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_condor_q() -> PathBuf {
    PathBuf::from("condor_q")
}

// Valor padrão do timeout do HTCondor: 120s.
fn default_scheduler_timeout_secs() -> u64 {
    120
}

// Valor padrão do timeout do ReqMgr: 30s.
fn default_reqmgr_timeout_secs() -> u64 {
    30
}

// Valor padrão da idade mínima: 6 dias.
fn default_age_threshold_days() -> u32 {
    6
}

// Workflows ainda em andamento.
fn default_fail_statuses() -> Vec<WorkflowStatus> {
    vec![
        WorkflowStatus::Acquired,
        WorkflowStatus::RunningOpen,
        WorkflowStatus::RunningClosed,
    ]
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            fail_statuses: default_fail_statuses(),
            overrides: HashMap::new(),
        }
    }
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            tracker_db: default_tracker_db(),
            agent_name: default_agent_name(),
            reqmgr_url: default_reqmgr_url(),
            proxy_path: None,
            condor_q: default_condor_q(),
            scheduler_timeout_secs: default_scheduler_timeout_secs(),
            reqmgr_timeout_secs: default_reqmgr_timeout_secs(),
            age_threshold_days: default_age_threshold_days(),
            policy: PolicyConfig::default(),
        }
    }
}

impl DrainConfig {
    /// Carrega a configuração de `path`, ou de `agentdrain.toml` no diretório atual.
    /// Usa valores padrão se o arquivo padrão não existir; um `path` explícito tem que existir.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => {
                let default_path = Path::new("agentdrain.toml");
                if default_path.exists() {
                    Self::from_file(default_path).context("loading ./agentdrain.toml")?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, DrainError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str::<DrainConfig>(&contents)?)
    }

    // Variáveis de ambiente têm precedência sobre o arquivo de configuração.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(proxy) = var("X509_USER_PROXY")
            && !proxy.is_empty()
        {
            self.proxy_path = Some(PathBuf::from(proxy));
        }
        if let Some(db) = var("AGENTDRAIN_TRACKER_DB")
            && !db.is_empty()
        {
            self.tracker_db = PathBuf::from(db);
        }
        if let Some(agent) = var("AGENTDRAIN_AGENT_NAME")
            && !agent.is_empty()
        {
            self.agent_name = agent;
        }
    }

    /// Rejeita políticas que mencionam status desconhecidos: um erro de digitação
    /// não pode mudar silenciosamente o destino dos jobs.
    fn validate(&self) -> Result<(), DrainError> {
        if self.policy.fail_statuses.iter().any(|s| s.is_unknown()) {
            return Err(DrainError::Config(
                "policy.fail_statuses contains an unrecognized workflow status".into(),
            ));
        }
        for status in self.policy.overrides.keys() {
            if status.parse::<WorkflowStatus>().is_ok_and(|s| s.is_unknown()) {
                return Err(DrainError::Config(format!(
                    "policy.overrides contains an unrecognized workflow status: {status}"
                )));
            }
        }
        if self.agent_name.trim().is_empty() {
            return Err(DrainError::Config("agent_name must not be empty".into()));
        }
        Ok(())
    }

    pub fn scheduler_timeout(&self) -> Duration {
        Duration::from_secs(self.scheduler_timeout_secs)
    }

    pub fn reqmgr_timeout(&self) -> Duration {
        Duration::from_secs(self.reqmgr_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn default_config_values() {
        let config = DrainConfig::default();
        assert_eq!(config.age_threshold_days, 6);
        assert_eq!(config.scheduler_timeout_secs, 120);
        assert_eq!(config.condor_q, PathBuf::from("condor_q"));
        assert_eq!(config.reqmgr_url, "https://cmsweb.cern.ch");
        assert_eq!(
            config.policy.fail_statuses,
            vec![
                WorkflowStatus::Acquired,
                WorkflowStatus::RunningOpen,
                WorkflowStatus::RunningClosed
            ]
        );
        assert!(config.proxy_path.is_none());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            agent_name = "T0Agent"
            age_threshold_days = 10

            [policy]
            fail_statuses = ["running-open"]
            overrides = { "force-complete" = "jobfailed" }
        "#;
        let config: DrainConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.agent_name, "T0Agent");
        assert_eq!(config.age_threshold_days, 10);
        assert_eq!(config.policy.fail_statuses, vec![WorkflowStatus::RunningOpen]);
        assert_eq!(
            config.policy.overrides.get("force-complete"),
            Some(&TargetState::JobFailed)
        );
        assert_eq!(config.reqmgr_timeout_secs, 30);
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = DrainConfig::default();
        config.apply_env(|key| match key {
            "X509_USER_PROXY" => Some("/tmp/x509up_u1000".into()),
            "AGENTDRAIN_TRACKER_DB" => Some("/data/tracker.db".into()),
            "AGENTDRAIN_AGENT_NAME" => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.proxy_path, Some(PathBuf::from("/tmp/x509up_u1000")));
        assert_eq!(config.tracker_db, PathBuf::from("/data/tracker.db"));
        // Valores vazios são ignorados.
        assert_eq!(config.agent_name, "WMAgentCommissioning");
    }

    #[test]
    fn typo_in_policy_is_rejected() {
        let mut config = DrainConfig::default();
        config.policy.fail_statuses.push(WorkflowStatus::from("runing-closed".to_string()));
        assert!(matches!(config.validate(), Err(DrainError::Config(_))));
    }

    #[test]
    fn typo_in_override_is_rejected() {
        let mut config = DrainConfig::default();
        config
            .policy
            .overrides
            .insert("aborted-archivd".into(), TargetState::Cleanout);
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_explicit_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "scheduler_timeout_secs = 5").unwrap();
        let config = DrainConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.scheduler_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn load_missing_explicit_file_fails() {
        assert!(DrainConfig::load(Some(Path::new("/definitely/not/agentdrain.toml"))).is_err());
        assert!(matches!(
            DrainConfig::from_file(Path::new("/definitely/not/agentdrain.toml")),
            Err(DrainError::Io(_))
        ));
    }

    #[test]
    fn malformed_file_is_a_toml_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "age_threshold_days = \"six\"").unwrap();
        assert!(matches!(
            DrainConfig::from_file(file.path()),
            Err(DrainError::Toml(_))
        ));
    }
}
