// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Client for OGC API - Processes services.
//!
//! Besides the common execute/monitor/fetch calls, this protocol lets the
//! environment deploy the package on the remote service when it is not
//! there yet and make it public.

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::LOCATION;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use super::client::{
    ClientError, RemoteClient, RemoteStatus, ensure_success, output_map, parse_response, percent,
};

/// HTTP client for an OGC API - Processes endpoint.
pub struct OgcClient {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

impl OgcClient {
    /// Create a client for `api_url`, authenticating with `token` when set.
    pub fn new(client: reqwest::Client, api_url: &str, token: Option<String>) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.api_url, path))
            .header("Accept", "application/json");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Deploy `package` as `process_id`. An existing process is accepted.
    pub async fn deploy(&self, process_id: &str, package: &Value) -> Result<(), ClientError> {
        let body = json!({
            "processDescription": { "id": process_id },
            "executionUnit": [{ "unit": package }],
        });
        let response = self
            .request(reqwest::Method::POST, "/processes")
            .json(&body)
            .send()
            .await?;
        if response.status() == StatusCode::CONFLICT {
            debug!(process_id = %process_id, "Process already deployed remotely");
            return Ok(());
        }
        ensure_success(response).await?;
        info!(process_id = %process_id, api_url = %self.api_url, "Deployed process on remote service");
        Ok(())
    }

    /// Set the visibility of a remote process.
    pub async fn set_visibility(&self, process_id: &str, visibility: &str) -> Result<(), ClientError> {
        let response = self
            .request(
                reqwest::Method::PUT,
                &format!("/processes/{}/visibility", process_id),
            )
            .json(&json!({ "value": visibility }))
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteClient for OgcClient {
    fn protocol(&self) -> &'static str {
        "ogc"
    }

    async fn describe(&self, process_id: &str) -> Result<Value, ClientError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/processes/{}", process_id))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(process_id.to_string()));
        }
        parse_response(response).await
    }

    async fn submit(
        &self,
        process_id: &str,
        inputs: &Map<String, Value>,
    ) -> Result<String, ClientError> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/processes/{}/execution", process_id),
            )
            .header("Prefer", "respond-async")
            .json(&json!({ "inputs": inputs, "response": "document" }))
            .send()
            .await?;
        let response = ensure_success(response).await?;

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim_end_matches('/').rsplit('/').next())
            .map(str::to_string);
        let body: Value = response.json().await.unwrap_or(Value::Null);

        body.get("jobID")
            .or_else(|| body.get("jobId"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or(location)
            .ok_or_else(|| ClientError::Protocol("execution response without a job ID".to_string()))
    }

    async fn get_status(&self, job_id: &str) -> Result<RemoteStatus, ClientError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/jobs/{}", job_id))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(job_id.to_string()));
        }
        let body: Value = parse_response(response).await?;
        let status = body
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::Protocol("status document without 'status'".to_string()))?;
        Ok(RemoteStatus {
            status: status.to_string(),
            progress: percent(body.get("progress")),
            message: body
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    async fn get_results(&self, job_id: &str) -> Result<Map<String, Value>, ClientError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/jobs/{}/results", job_id))
            .send()
            .await?;
        output_map(parse_response(response).await?)
    }

    async fn cancel(&self, job_id: &str) -> Result<bool, ClientError> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("/jobs/{}", job_id))
            .send()
            .await?;
        if response.status().is_client_error() {
            return Ok(false);
        }
        ensure_success(response).await?;
        Ok(true)
    }
}
