// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Protocol-neutral interface to remote processing services.

use async_trait::async_trait;
use serde_json::{Map, Value};

/// Errors from the remote client layer.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("Remote API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The requested process or job does not exist remotely.
    #[error("Not found on remote service: {0}")]
    NotFound(String),

    /// The service answered with something the protocol does not allow.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl ClientError {
    /// Whether repeating an idempotent call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Request(e) => e.is_timeout() || e.is_connect(),
            ClientError::Api { status, .. } => *status >= 500 || *status == 429,
            ClientError::NotFound(_) | ClientError::Protocol(_) => false,
        }
    }
}

/// Status snapshot of a remote job, in the service's own vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteStatus {
    /// Raw status word.
    pub status: String,
    /// Percent complete reported by the service.
    pub progress: Option<f64>,
    /// Status message.
    pub message: Option<String>,
}

/// A remote processing service speaking one protocol.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Protocol name for logs.
    fn protocol(&self) -> &'static str;

    /// Describe a remote process. [`ClientError::NotFound`] when absent.
    async fn describe(&self, process_id: &str) -> Result<Value, ClientError>;

    /// Submit an execution and return the remote job ID.
    async fn submit(
        &self,
        process_id: &str,
        inputs: &Map<String, Value>,
    ) -> Result<String, ClientError>;

    /// Current status of a remote job.
    async fn get_status(&self, job_id: &str) -> Result<RemoteStatus, ClientError>;

    /// Results of a finished remote job, keyed by output ID.
    async fn get_results(&self, job_id: &str) -> Result<Map<String, Value>, ClientError>;

    /// Ask the service to stop a job. `false` when the service refused.
    async fn cancel(&self, job_id: &str) -> Result<bool, ClientError>;
}

/// Ensure the response has a success status code.
pub(super) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(ClientError::Api {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

/// Parse a successful JSON response body into the expected type.
pub(super) async fn parse_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ClientError> {
    let response = ensure_success(response).await?;
    Ok(response.json::<T>().await?)
}

/// Parse a percentage that may arrive as a number or a numeric string.
pub(super) fn percent(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').parse().ok(),
        _ => None,
    }
}

/// Normalise a results document into an output map.
///
/// Accepts `{"outputs": {...}}`, `{"outputs": [{"id": ..}, ..]}` or a
/// bare `{id: value}` map.
pub(super) fn output_map(document: Value) -> Result<Map<String, Value>, ClientError> {
    let outputs = match document {
        Value::Object(mut obj) => match obj.remove("outputs") {
            Some(outputs) => outputs,
            None => Value::Object(obj),
        },
        other => other,
    };
    match outputs {
        Value::Object(map) => Ok(map),
        Value::Array(items) => {
            let mut map = Map::new();
            for mut item in items {
                let id = item
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| ClientError::Protocol("output without 'id'".to_string()))?;
                if let Some(obj) = item.as_object_mut() {
                    obj.remove("id");
                }
                map.insert(id, item);
            }
            Ok(map)
        }
        _ => Err(ClientError::Protocol(
            "results document is not an object".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_percent_parsing() {
        assert_eq!(percent(Some(&json!(42))), Some(42.0));
        assert_eq!(percent(Some(&json!("37.5%"))), Some(37.5));
        assert_eq!(percent(Some(&json!(null))), None);
        assert_eq!(percent(None), None);
    }

    #[test]
    fn test_output_map_shapes() {
        let nested = output_map(json!({"outputs": {"output": {"href": "http://x/o.nc"}}})).unwrap();
        assert_eq!(nested["output"]["href"], "http://x/o.nc");

        let listed = output_map(json!({"outputs": [{"id": "output", "value": 3}]})).unwrap();
        assert_eq!(listed["output"], json!({"value": 3}));

        let bare = output_map(json!({"output": "text"})).unwrap();
        assert_eq!(bare["output"], "text");

        assert!(output_map(json!([1, 2])).is_err());
    }

    #[test]
    fn test_transient_classification() {
        assert!(ClientError::Api { status: 503, body: String::new() }.is_transient());
        assert!(ClientError::Api { status: 429, body: String::new() }.is_transient());
        assert!(!ClientError::Api { status: 400, body: String::new() }.is_transient());
        assert!(!ClientError::NotFound("echo".to_string()).is_transient());
    }

    #[tokio::test]
    async fn test_only_connect_and_timeout_failures_are_transient() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = reqwest::Client::new();
        let refused = client
            .get(format!("http://{}/processes", addr))
            .send()
            .await
            .unwrap_err();
        assert!(ClientError::Request(refused).is_transient());

        let malformed = client.get("http://[::1/processes").send().await.unwrap_err();
        assert!(!ClientError::Request(malformed).is_transient());
    }
}
