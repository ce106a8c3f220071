use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use super::{check_status, IndexerError, IndexerResult};

pub const DUNE_API_URL: &str = "https://api.dune.com/api/v1";
const API_KEY_HEADER: &str = "X-Dune-API-Key";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ExecutionState {
    #[serde(rename = "QUERY_STATE_PENDING")]
    Pending,
    #[serde(rename = "QUERY_STATE_EXECUTING")]
    Executing,
    #[serde(rename = "QUERY_STATE_COMPLETED")]
    Completed,
    #[serde(rename = "QUERY_STATE_COMPLETED_PARTIAL")]
    CompletedPartial,
    #[serde(rename = "QUERY_STATE_FAILED")]
    Failed,
    #[serde(rename = "QUERY_STATE_CANCELLED")]
    Cancelled,
    #[serde(rename = "QUERY_STATE_EXPIRED")]
    Expired,
    #[serde(other)]
    Unknown,
}

impl ExecutionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionState::Pending | ExecutionState::Executing)
    }

    pub fn has_results(self) -> bool {
        matches!(
            self,
            ExecutionState::Completed | ExecutionState::CompletedPartial
        )
    }
}

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    query_parameters: &'a Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct ExecutionStatus {
    pub execution_id: String,
    pub state: ExecutionState,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResultMetadata {
    #[serde(default)]
    pub column_names: Vec<String>,
    #[serde(default)]
    pub total_row_count: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResultSet {
    #[serde(default)]
    pub rows: Vec<Map<String, Value>>,
    #[serde(default)]
    pub metadata: ResultMetadata,
}

#[derive(Debug, Deserialize)]
pub struct ExecutionResults {
    pub execution_id: String,
    pub state: ExecutionState,
    #[serde(default)]
    pub result: Option<ResultSet>,
}

/// Client for Dune's SQL analytics API: execute a saved query, poll, fetch rows.
#[derive(Clone)]
pub struct DuneClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl DuneClient {
    pub fn new(api_key: String) -> Self {
        Self::new_with_base_url(api_key, DUNE_API_URL.to_string())
    }

    pub fn new_with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            client: Default::default(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn execute(
        &self,
        query_id: u64,
        parameters: &Map<String, Value>,
    ) -> IndexerResult<String> {
        let response = self
            .client
            .post(format!("{}/query/{}/execute", self.base_url, query_id))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&ExecuteRequest {
                query_parameters: parameters,
            })
            .send()
            .await?;
        let status: ExecutionStatus = check_status(response).await?.json().await?;
        info!(
            "query {} submitted as execution {}",
            query_id, status.execution_id
        );
        Ok(status.execution_id)
    }

    pub async fn status(&self, execution_id: &str) -> IndexerResult<ExecutionState> {
        let response = self
            .client
            .get(format!("{}/execution/{}/status", self.base_url, execution_id))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        let status: ExecutionStatus = check_status(response).await?.json().await?;
        Ok(status.state)
    }

    pub async fn results(&self, execution_id: &str) -> IndexerResult<ResultSet> {
        let response = self
            .client
            .get(format!("{}/execution/{}/results", self.base_url, execution_id))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        let results: ExecutionResults = check_status(response).await?.json().await?;
        results.into_result_set()
    }

    /// Executes `query_id` and polls every `poll_interval` until the execution ends.
    /// Bounding the total wait is up to the caller.
    pub async fn run_query(
        &self,
        query_id: u64,
        parameters: &Map<String, Value>,
        poll_interval: Duration,
    ) -> IndexerResult<ResultSet> {
        let execution_id = self.execute(query_id, parameters).await?;
        loop {
            let state = self.status(&execution_id).await?;
            debug!("execution {} state {:?}", execution_id, state);
            if state.has_results() {
                return self.results(&execution_id).await;
            }
            if state.is_terminal() {
                return Err(IndexerError::Execution {
                    execution_id,
                    state,
                });
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

impl ExecutionResults {
    pub fn into_result_set(self) -> IndexerResult<ResultSet> {
        if !self.state.has_results() {
            return Err(IndexerError::Execution {
                execution_id: self.execution_id,
                state: self.state,
            });
        }
        self.result.ok_or(IndexerError::MissingData)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn states_parse() {
        let status: ExecutionStatus = serde_json::from_value(json!({
            "execution_id": "01HKZJ2683PHF9Q9PHHQ8FW4Q1",
            "query_id": 1215383,
            "state": "QUERY_STATE_EXECUTING",
            "submitted_at": "2024-01-12T21:34:37.447476Z"
        }))
        .unwrap();
        assert_eq!(status.state, ExecutionState::Executing);
        assert!(!status.state.is_terminal());

        let state: ExecutionState = serde_json::from_value(json!("QUERY_STATE_SOMETHING_NEW")).unwrap();
        assert_eq!(state, ExecutionState::Unknown);
        assert!(state.is_terminal());
    }

    #[test]
    fn completed_results_yield_rows() {
        let results: ExecutionResults = serde_json::from_value(json!({
            "execution_id": "01HKZJ2683PHF9Q9PHHQ8FW4Q1",
            "query_id": 1215383,
            "state": "QUERY_STATE_COMPLETED",
            "result": {
                "rows": [
                    { "day": "2024-01-01", "volume": 1200.5 },
                    { "day": "2024-01-02", "volume": 990.0 }
                ],
                "metadata": {
                    "column_names": ["day", "volume"],
                    "total_row_count": 2
                }
            }
        }))
        .unwrap();
        let set = results.into_result_set().unwrap();
        assert_eq!(set.rows.len(), 2);
        assert_eq!(set.rows[0]["day"], "2024-01-01");
        assert_eq!(set.metadata.column_names, vec!["day", "volume"]);
        assert_eq!(set.metadata.total_row_count, Some(2));
    }

    #[test]
    fn failed_execution_is_an_error() {
        let results: ExecutionResults = serde_json::from_value(json!({
            "execution_id": "abc",
            "state": "QUERY_STATE_FAILED"
        }))
        .unwrap();
        match results.into_result_set() {
            Err(IndexerError::Execution {
                execution_id,
                state,
            }) => {
                assert_eq!(execution_id, "abc");
                assert_eq!(state, ExecutionState::Failed);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn execute_body_carries_parameters() {
        let mut parameters = Map::new();
        parameters.insert("token".to_string(), json!("0xa0b8"));
        let body = serde_json::to_value(ExecuteRequest {
            query_parameters: &parameters,
        })
        .unwrap();
        assert_eq!(body, json!({ "query_parameters": { "token": "0xa0b8" } }));
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let client = DuneClient::new_with_base_url("key".into(), "http://localhost:9000/".into());
        assert_eq!(client.base_url, "http://localhost:9000");
    }

    mod http {
        use super::super::*;
        use serde_json::json;
        use wiremock::matchers::{body_json, header, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        const API_KEY: &str = "test-key";
        const EXECUTION_ID: &str = "01HKZJ2683PHF9Q9PHHQ8FW4Q1";
        const POLL: Duration = Duration::from_millis(10);

        fn status_body(state: &str) -> Value {
            json!({ "execution_id": EXECUTION_ID, "query_id": 42, "state": state })
        }

        async fn mount_execute(server: &MockServer) {
            Mock::given(method("POST"))
                .and(path("/query/42/execute"))
                .and(header(API_KEY_HEADER, API_KEY))
                .and(body_json(json!({ "query_parameters": { "token": "0xa0b8" } })))
                .respond_with(
                    ResponseTemplate::new(200).set_body_json(status_body("QUERY_STATE_PENDING")),
                )
                .expect(1)
                .mount(server)
                .await;
        }

        async fn mount_status(server: &MockServer, state: &str, times: u64) {
            Mock::given(method("GET"))
                .and(path(format!("/execution/{}/status", EXECUTION_ID)))
                .and(header(API_KEY_HEADER, API_KEY))
                .respond_with(ResponseTemplate::new(200).set_body_json(status_body(state)))
                .up_to_n_times(times)
                .expect(times)
                .mount(server)
                .await;
        }

        fn parameters() -> Map<String, Value> {
            let mut parameters = Map::new();
            parameters.insert("token".to_string(), json!("0xa0b8"));
            parameters
        }

        fn client(server: &MockServer) -> DuneClient {
            DuneClient::new_with_base_url(API_KEY.to_string(), server.uri())
        }

        #[tokio::test]
        async fn run_query_polls_until_completed() {
            let server = MockServer::start().await;
            mount_execute(&server).await;
            mount_status(&server, "QUERY_STATE_EXECUTING", 2).await;
            mount_status(&server, "QUERY_STATE_COMPLETED", 1).await;
            Mock::given(method("GET"))
                .and(path(format!("/execution/{}/results", EXECUTION_ID)))
                .and(header(API_KEY_HEADER, API_KEY))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "execution_id": EXECUTION_ID,
                    "query_id": 42,
                    "state": "QUERY_STATE_COMPLETED",
                    "result": {
                        "rows": [{ "day": "2024-01-01", "transfers": 17 }],
                        "metadata": { "column_names": ["day", "transfers"], "total_row_count": 1 }
                    }
                })))
                .expect(1)
                .mount(&server)
                .await;

            let set = client(&server)
                .run_query(42, &parameters(), POLL)
                .await
                .unwrap();
            assert_eq!(set.rows.len(), 1);
            assert_eq!(set.rows[0]["transfers"], 17);
            assert_eq!(set.metadata.column_names, vec!["day", "transfers"]);
        }

        #[tokio::test]
        async fn run_query_surfaces_failed_execution() {
            let server = MockServer::start().await;
            mount_execute(&server).await;
            mount_status(&server, "QUERY_STATE_EXECUTING", 1).await;
            mount_status(&server, "QUERY_STATE_FAILED", 1).await;
            Mock::given(method("GET"))
                .and(path(format!("/execution/{}/results", EXECUTION_ID)))
                .respond_with(ResponseTemplate::new(200))
                .expect(0)
                .mount(&server)
                .await;

            let err = client(&server)
                .run_query(42, &parameters(), POLL)
                .await
                .unwrap_err();
            match err {
                IndexerError::Execution {
                    execution_id,
                    state,
                } => {
                    assert_eq!(execution_id, EXECUTION_ID);
                    assert_eq!(state, ExecutionState::Failed);
                }
                other => panic!("unexpected: {other:?}"),
            }
        }

        #[tokio::test]
        async fn run_query_surfaces_cancelled_execution() {
            let server = MockServer::start().await;
            mount_execute(&server).await;
            mount_status(&server, "QUERY_STATE_CANCELLED", 1).await;

            let err = client(&server)
                .run_query(42, &parameters(), POLL)
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                IndexerError::Execution {
                    state: ExecutionState::Cancelled,
                    ..
                }
            ));
        }

        #[tokio::test]
        async fn rejected_api_key_maps_to_http_error() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/query/42/execute"))
                .respond_with(ResponseTemplate::new(401).set_body_string("invalid API Key"))
                .expect(1)
                .mount(&server)
                .await;

            let err = client(&server)
                .execute(42, &Map::new())
                .await
                .unwrap_err();
            match err {
                IndexerError::Http { code, text } => {
                    assert_eq!(code, reqwest::StatusCode::UNAUTHORIZED);
                    assert_eq!(text, "invalid API Key");
                }
                other => panic!("unexpected: {other:?}"),
            }
        }

        #[tokio::test]
        async fn status_reads_state() {
            let server = MockServer::start().await;
            mount_status(&server, "QUERY_STATE_COMPLETED_PARTIAL", 1).await;

            let state = client(&server).status(EXECUTION_ID).await.unwrap();
            assert_eq!(state, ExecutionState::CompletedPartial);
        }
    }
}
