// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Client for WPS 1.0 style services using key-value-pair requests with
//! JSON responses. The ESGF compute client is the same protocol with an
//! `api_key` header and a `/wps` endpoint suffix.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use super::client::{ClientError, RemoteClient, RemoteStatus, ensure_success, output_map, percent};

/// HTTP client for a WPS 1.0 style endpoint.
pub struct Wps1Client {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    protocol: &'static str,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(rename = "jobID", alias = "jobId", alias = "job_id")]
    job_id: String,
}

impl Wps1Client {
    /// Client for a plain WPS 1.0 endpoint.
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: None,
            protocol: "wps1",
        }
    }

    /// Client for an ESGF compute endpoint.
    pub fn esgf(client: reqwest::Client, provider: &str, api_key: Option<String>) -> Self {
        let base = provider.trim_end_matches('/');
        let endpoint = if base.ends_with("/wps") {
            base.to_string()
        } else {
            format!("{}/wps", base)
        };
        Self {
            client,
            endpoint,
            api_key,
            protocol: "esgf",
        }
    }

    /// Endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request(&self, method: reqwest::Method, query: &[(&str, &str)]) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, &self.endpoint)
            .query(&[("service", "WPS"), ("version", "1.0.0")])
            .query(query);
        if let Some(key) = &self.api_key {
            builder = builder.header("api_key", key);
        }
        builder
    }
}

#[async_trait]
impl RemoteClient for Wps1Client {
    fn protocol(&self) -> &'static str {
        self.protocol
    }

    async fn describe(&self, process_id: &str) -> Result<Value, ClientError> {
        let response = self
            .request(
                reqwest::Method::GET,
                &[("request", "DescribeProcess"), ("identifier", process_id)],
            )
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(process_id.to_string()));
        }
        Ok(ensure_success(response).await?.json().await?)
    }

    async fn submit(
        &self,
        process_id: &str,
        inputs: &Map<String, Value>,
    ) -> Result<String, ClientError> {
        let response = self
            .request(
                reqwest::Method::POST,
                &[("request", "Execute"), ("identifier", process_id)],
            )
            .json(&json!({ "inputs": inputs }))
            .send()
            .await?;
        let submitted: SubmitResponse = ensure_success(response).await?.json().await?;
        debug!(protocol = self.protocol, job_id = %submitted.job_id, "Remote job submitted");
        Ok(submitted.job_id)
    }

    async fn get_status(&self, job_id: &str) -> Result<RemoteStatus, ClientError> {
        let response = self
            .request(
                reqwest::Method::GET,
                &[("request", "GetStatus"), ("jobID", job_id)],
            )
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(job_id.to_string()));
        }
        let body: Value = ensure_success(response).await?.json().await?;
        let status = body
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::Protocol("status document without 'status'".to_string()))?;
        Ok(RemoteStatus {
            status: status.to_string(),
            progress: percent(body.get("percentCompleted").or_else(|| body.get("progress"))),
            message: body
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    async fn get_results(&self, job_id: &str) -> Result<Map<String, Value>, ClientError> {
        let response = self
            .request(
                reqwest::Method::GET,
                &[("request", "GetResult"), ("jobID", job_id)],
            )
            .send()
            .await?;
        let body: Value = ensure_success(response).await?.json().await?;
        output_map(body)
    }

    async fn cancel(&self, job_id: &str) -> Result<bool, ClientError> {
        let response = self
            .request(
                reqwest::Method::POST,
                &[("request", "Dismiss"), ("jobID", job_id)],
            )
            .send()
            .await?;
        if response.status().is_client_error() {
            return Ok(false);
        }
        ensure_success(response).await?;
        Ok(true)
    }
}
