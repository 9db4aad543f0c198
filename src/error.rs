use thiserror::Error;

#[derive(Debug, Error)]
pub enum DrainError {
    #[error("Config error: {0}")]
    Config(String),

    /// The scheduler could not produce a trustworthy snapshot. Fatal to a run.
    #[error("Scheduler unavailable: {0}")]
    SchedulerUnavailable(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("Unknown job state in tracker: {0}")]
    UnknownJobState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}
