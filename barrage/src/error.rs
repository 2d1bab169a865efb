use barrage_core::{ConfigError, SnapshotError, EXIT_CONFIG_ERROR, EXIT_INTERNAL_ERROR};
use thiserror::Error;

/// Reasons a run could not produce a [`RunResult`](barrage_core::RunResult).
#[derive(Debug, Error)]
pub enum RunError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("internal error: {0}")]
    Internal(#[from] InternalError),
}

impl RunError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => EXIT_CONFIG_ERROR,
            Self::Internal(_) => EXIT_INTERNAL_ERROR,
        }
    }
}

/// Broken engine invariants. Always fatal to the run.
#[derive(Debug, Error)]
pub enum InternalError {
    #[error("metrics aggregation failed for `{workload}`: {source}")]
    Aggregation {
        workload: String,
        #[source]
        source: SnapshotError,
    },

    #[error("merging workload metrics failed: {0}")]
    Merge(#[source] SnapshotError),

    #[error("virtual user of `{workload}` panicked: {source}")]
    VirtualUser {
        workload: String,
        #[source]
        source: tokio::task::JoinError,
    },

    #[error("unable to build the HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}
