//! Neo4j HTTP 事务端点后端
//!
//! POST {uri}/db/{database}/tx/commit，body = {"statements": [{statement, parameters}]}；
//! 响应 results[0].columns + data[].row 拼成 Row。Neo.TransientError.* 与连接/超时错误可重试。

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::graph::{to_cypher, GraphError, GraphQuery, GraphStore, Row};

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<TxResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Debug, Deserialize)]
struct TxResult {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<TxRow>,
}

#[derive(Debug, Deserialize)]
struct TxRow {
    #[serde(default)]
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TxError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

pub struct Neo4jHttpStore {
    client: reqwest::Client,
    endpoint: String,
    user: String,
    password: String,
}

impl Neo4jHttpStore {
    pub fn new(uri: &str, database: &str, user: &str, password: &str) -> Result<Self, GraphError> {
        Self::with_timeout(uri, database, user, password, Duration::from_secs(30))
    }

    pub fn with_timeout(
        uri: &str,
        database: &str,
        user: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self, GraphError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GraphError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/db/{}/tx/commit", uri.trim_end_matches('/'), database),
            user: user.to_string(),
            password: password.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn classify_request_error(e: reqwest::Error) -> GraphError {
    if e.is_timeout() {
        GraphError::Timeout
    } else if e.is_connect() {
        GraphError::Connection(e.to_string())
    } else {
        GraphError::Query(e.to_string())
    }
}

fn classify_tx_error(err: &TxError) -> GraphError {
    let text = format!("{}: {}", err.code, err.message);
    if err.code.starts_with("Neo.TransientError") {
        GraphError::Transient(text)
    } else {
        GraphError::Query(text)
    }
}

/// 把事务响应转换成行
fn rows_from_response(resp: TxResponse) -> Result<Vec<Row>, GraphError> {
    if let Some(err) = resp.errors.first() {
        return Err(classify_tx_error(err));
    }
    let Some(result) = resp.results.into_iter().next() else {
        return Ok(Vec::new());
    };
    let columns = result.columns;
    Ok(result
        .data
        .into_iter()
        .map(|r| columns.iter().cloned().zip(r.row).collect::<Row>())
        .collect())
}

#[async_trait]
impl GraphStore for Neo4jHttpStore {
    async fn execute(&self, query: &GraphQuery) -> Result<Vec<Row>, GraphError> {
        let stmt = to_cypher(query);
        let body = json!({
            "statements": [{
                "statement": stmt.statement,
                "parameters": stmt.parameters,
            }]
        });

        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.user, Some(&self.password))
            .json(&body)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if status.is_server_error() {
            return Err(GraphError::Transient(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GraphError::Query(format!("HTTP {}: {}", status, text)));
        }

        let parsed: TxResponse = response
            .json()
            .await
            .map_err(|e| GraphError::Query(format!("bad response body: {}", e)))?;
        rows_from_response(parsed)
    }

    fn backend(&self) -> &str {
        "neo4j"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_from_response() {
        let resp: TxResponse = serde_json::from_value(json!({
            "results": [{
                "columns": ["drug_id", "drug_name"],
                "data": [{"row": ["DB00682", "Warfarin"], "meta": []}]
            }],
            "errors": []
        }))
        .unwrap();
        let rows = rows_from_response(resp).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["drug_name"], "Warfarin");
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        let resp: TxResponse = serde_json::from_value(json!({
            "results": [],
            "errors": [{"code": "Neo.TransientError.Transaction.DeadlockDetected", "message": "deadlock"}]
        }))
        .unwrap();
        let err = rows_from_response(resp).unwrap_err();
        assert!(err.is_transient());

        let resp: TxResponse = serde_json::from_value(json!({
            "errors": [{"code": "Neo.ClientError.Statement.SyntaxError", "message": "bad"}]
        }))
        .unwrap();
        assert!(!rows_from_response(resp).unwrap_err().is_transient());
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let store = Neo4jHttpStore::new("http://localhost:7474/", "neo4j", "neo4j", "pw").unwrap();
        assert_eq!(store.endpoint(), "http://localhost:7474/db/neo4j/tx/commit");
    }
}
