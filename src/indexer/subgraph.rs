use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{check_status, IndexerError, IndexerResult};

#[derive(Debug, Serialize)]
pub struct GraphQlRequest<'a, V> {
    pub query: &'a str,
    pub variables: V,
}

#[derive(Debug, Deserialize)]
pub struct GraphQlError {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct GraphQlResponse<R> {
    pub data: Option<R>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

impl<R> GraphQlResponse<R> {
    /// Errors win over partial data.
    pub fn into_result(self) -> IndexerResult<R> {
        if !self.errors.is_empty() {
            let messages: Vec<&str> = self.errors.iter().map(|e| e.message.as_str()).collect();
            return Err(IndexerError::GraphQl(messages.join("; ")));
        }
        self.data.ok_or(IndexerError::MissingData)
    }
}

/// Client for a subgraph's GraphQL endpoint.
#[derive(Clone)]
pub struct SubgraphClient {
    client: reqwest::Client,
    endpoint_url: String,
}

impl SubgraphClient {
    pub fn new(endpoint_url: String) -> Self {
        Self::new_with_client(endpoint_url, Default::default())
    }

    pub fn new_with_client(endpoint_url: String, client: reqwest::Client) -> Self {
        Self {
            client,
            endpoint_url,
        }
    }

    pub async fn query<V, R>(&self, query: &str, variables: V) -> IndexerResult<R>
    where
        V: Serialize,
        R: DeserializeOwned,
    {
        debug!("subgraph query to {}", self.endpoint_url);
        let response = self
            .client
            .post(&self.endpoint_url)
            .json(&GraphQlRequest { query, variables })
            .send()
            .await?;
        let response: GraphQlResponse<R> = check_status(response).await?.json().await?;
        response.into_result()
    }
}
