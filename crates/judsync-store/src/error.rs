use judsync_core::CaseId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("case {0} not found")]
    CaseNotFound(CaseId),

    #[cfg(feature = "duckdb")]
    #[error("duckdb error: {0}")]
    DuckDb(#[from] ::duckdb::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("{0}")]
    Other(String),
}
