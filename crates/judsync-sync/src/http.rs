//! HTTP client for the DataJud public search API.

use async_trait::async_trait;
use judsync_core::{
    DataJudConfig, ProcessNumber, ResolutionError, TribunalResolver, truncate_chars,
};
use judsync_core::process::CNJ_DIGITS;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{error, info, warn};

/// Upstream statuses passed through to callers; anything else becomes 502.
const PASSTHROUGH_STATUSES: &[u16] = &[400, 401, 403, 404, 429, 500, 502, 503, 504];

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("CNJ API key is not configured")]
    MissingApiKey,
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error("could not connect to DataJud: {0}")]
    Connect(String),
    #[error("DataJud did not answer in time: {0}")]
    Timeout(String),
    #[error("DataJud returned {status}")]
    Upstream { status: u16, body: String },
    #[error("DataJud response is not valid JSON: {0}")]
    Decode(String),
    #[error("HTTP request failed: {0}")]
    Request(String),
}

impl QueryError {
    /// HTTP-like status reported to callers for this failure.
    pub fn status(&self) -> u16 {
        match self {
            Self::MissingApiKey | Self::Request(_) => 500,
            Self::Resolution(_) => 400,
            Self::Connect(_) => 503,
            Self::Timeout(_) => 504,
            Self::Upstream { status, .. } if PASSTHROUGH_STATUSES.contains(status) => *status,
            Self::Upstream { .. } | Self::Decode(_) => 502,
        }
    }

    /// JSON body describing the failure: `{"error": ..., "detail": ...}`.
    pub fn payload(&self) -> Value {
        match self {
            Self::Upstream { body, .. } => json!({ "error": self.to_string(), "detail": body }),
            _ => json!({ "error": self.to_string() }),
        }
    }

    /// Connection and timeout failures; the next scheduled run retries them.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Timeout(_))
    }
}

impl From<reqwest::Error> for QueryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_connect() {
            Self::Connect(e.to_string())
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Request(e.to_string())
        }
    }
}

/// Result of one DataJud query. Never an `Err`: failures carry a status and
/// an error payload instead.
#[derive(Debug)]
pub struct QueryOutcome {
    pub status: u16,
    pub payload: Value,
    pub error: Option<QueryError>,
}

impl QueryOutcome {
    pub fn ok(status: u16, payload: Value) -> Self {
        Self {
            status,
            payload,
            error: None,
        }
    }

    pub fn failed(error: QueryError) -> Self {
        Self {
            status: error.status(),
            payload: error.payload(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

impl From<Result<(u16, Value), QueryError>> for QueryOutcome {
    fn from(result: Result<(u16, Value), QueryError>) -> Self {
        match result {
            Ok((status, payload)) => Self::ok(status, payload),
            Err(e) => Self::failed(e),
        }
    }
}

/// Anything that can look up a process and hand back its raw search response.
#[async_trait]
pub trait ProcessSource: Send + Sync {
    /// Fails fast when the source cannot run at all (missing credentials).
    fn ready(&self) -> Result<(), QueryError> {
        Ok(())
    }

    async fn query(&self, number: &ProcessNumber) -> QueryOutcome;
}

/// DataJud client: resolves the tribunal index and runs one `_search` per process.
pub struct DataJudClient {
    client: reqwest::Client,
    config: DataJudConfig,
    resolver: TribunalResolver,
}

impl DataJudClient {
    pub fn new(config: DataJudConfig, resolver: TribunalResolver) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            resolver,
        }
    }

    pub fn config(&self) -> &DataJudConfig {
        &self.config
    }

    /// Request body for a digits-only process number.
    pub fn search_body(digits: &str) -> Value {
        json!({
            "query": { "match": { "numeroProcesso": digits } },
            "size": 1
        })
    }

    /// POST the search for `number` against the index `alias`.
    ///
    /// Returns the decoded JSON and the remote status on 2xx.
    pub async fn search(
        &self,
        number: &ProcessNumber,
        alias: &str,
    ) -> Result<(u16, Value), QueryError> {
        let Some(api_key) = self.config.api_key() else {
            error!(fatal = true, "CNJ API key is not configured, refusing to query DataJud");
            return Err(QueryError::MissingApiKey);
        };

        let digits = number.digits();
        if digits.len() != CNJ_DIGITS {
            warn!(
                process_number = %number,
                digits = %digits,
                len = digits.len(),
                "process number does not normalise to 20 digits, querying anyway"
            );
        }

        let url = self.config.search_url(alias);
        info!(url = %url, process_number = %number, "querying DataJud");
        let resp = self
            .client
            .post(&url)
            .timeout(self.config.timeout)
            .header("Authorization", format!("APIKey {api_key}"))
            .header("User-Agent", self.config.user_agent())
            .json(&Self::search_body(&digits))
            .send()
            .await
            .inspect_err(|e| error!(process_number = %number, error = %e, "DataJud request failed"))?;

        let status = resp.status();
        let body = resp.text().await?;
        if status.is_client_error() || status.is_server_error() {
            error!(
                process_number = %number,
                status = status.as_u16(),
                body = %truncate_chars(&body, 500),
                "DataJud rejected the query"
            );
            return Err(QueryError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = serde_json::from_str(&body).map_err(|e| {
            error!(
                process_number = %number,
                error = %e,
                body = %truncate_chars(&body, 200),
                "DataJud response is not JSON"
            );
            QueryError::Decode(e.to_string())
        })?;
        info!(process_number = %number, status = status.as_u16(), "DataJud answered");
        Ok((status.as_u16(), payload))
    }
}

#[async_trait]
impl ProcessSource for DataJudClient {
    fn ready(&self) -> Result<(), QueryError> {
        match self.config.api_key() {
            Some(_) => Ok(()),
            None => Err(QueryError::MissingApiKey),
        }
    }

    async fn query(&self, number: &ProcessNumber) -> QueryOutcome {
        if self.ready().is_err() {
            error!(fatal = true, "CNJ API key is not configured, refusing to query DataJud");
            return QueryOutcome::failed(QueryError::MissingApiKey);
        }
        let alias = match self.resolver.resolve(number) {
            Ok(alias) => alias,
            Err(e) => {
                error!(process_number = %number, "cannot determine DataJud alias");
                return QueryOutcome::failed(e.into());
            }
        };
        self.search(number, alias).await.into()
    }
}
