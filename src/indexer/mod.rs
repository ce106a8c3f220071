//! Clients for third-party indexing services: GraphQL subgraphs and the Dune SQL API.

pub mod dune;
pub mod subgraph;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("HTTP error {code}: {text}")]
    Http {
        code: reqwest::StatusCode,
        text: String,
    },
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Invalid JSON response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("GraphQL errors: {0}")]
    GraphQl(String),
    #[error("response carries no data")]
    MissingData,
    #[error("execution {execution_id} ended in state {state:?}")]
    Execution {
        execution_id: String,
        state: dune::ExecutionState,
    },
}

pub type IndexerResult<T> = Result<T, IndexerError>;

/// Turns a non-2xx response into [`IndexerError::Http`] with the body text.
async fn check_status(response: reqwest::Response) -> IndexerResult<reqwest::Response> {
    let code = response.status();
    if code.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    Err(IndexerError::Http { code, text })
}
