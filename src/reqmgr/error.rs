//! Tipos de erro para o cliente do ReqMgr.
//!
//! Nenhum destes erros interrompe uma execução: o [`WorkflowStatusClient`](super::WorkflowStatusClient)
//! converte qualquer um deles em status `UNKNOWN`, o que faz o workflow ser pulado.

use thiserror::Error;

/// Erros que podem ocorrer ao consultar o ReqMgr.
#[derive(Debug, Error)]
pub enum ReqMgrError {
    /// O serviço respondeu com um status HTTP de erro (4xx/5xx).
    #[error("ReqMgr error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// A resposta não tem o formato esperado ou não menciona o workflow pedido.
    #[error("failed to parse ReqMgr response: {0}")]
    ParseError(String),

    /// O proxy X.509 não pôde ser lido ou não contém certificado e chave válidos.
    #[error("invalid client credentials at {path}: {message}")]
    Credentials { path: String, message: String },

    /// Falha de rede subjacente (DNS, conexão recusada, timeout).
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}
