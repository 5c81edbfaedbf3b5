//! HTTP client for the external delivery system.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;

use crate::config::DeliveryConfig;
use crate::delivery::types::{JobStatusResponse, SubmitRequest, SubmitResponse};
use crate::error::DeliveryError;

/// The two delivery-system calls the pipeline makes.
#[async_trait]
pub trait DeliveryClient: Send + Sync {
    /// `POST /submit`.
    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitResponse, DeliveryError>;

    /// `GET /jobs/{job_id}`.
    async fn job_status(&self, job_id: &str) -> Result<JobStatusResponse, DeliveryError>;
}

/// Whether `job_id` is safe to place in a `/jobs/{id}` path segment.
///
/// Job ids are opaque tokens: ASCII alphanumerics plus `-`, `_`, `.` and
/// `:`, and never a bare dot segment.
pub fn is_valid_job_id(job_id: &str) -> bool {
    !job_id.is_empty()
        && job_id.len() <= 128
        && job_id != "."
        && job_id != ".."
        && job_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
}

/// reqwest-backed delivery client.
pub struct HttpDeliveryClient {
    base_url: String,
    api_key: Option<SecretString>,
    submit_timeout: Duration,
    client: reqwest::Client,
}

impl HttpDeliveryClient {
    pub fn new(config: &DeliveryConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            submit_timeout: config.submit_timeout,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// `{base}/jobs/{job_id}`, with the id pushed as a single path segment.
    fn job_url(&self, endpoint: &str, job_id: &str) -> Result<reqwest::Url, DeliveryError> {
        if !is_valid_job_id(job_id) {
            return Err(DeliveryError::InvalidJobId(job_id.to_string()));
        }
        let mut url = reqwest::Url::parse(&self.base_url).map_err(|e| DeliveryError::RequestFailed {
            endpoint: endpoint.to_string(),
            reason: format!("invalid base url: {e}"),
        })?;
        url.path_segments_mut()
            .map_err(|_| DeliveryError::RequestFailed {
                endpoint: endpoint.to_string(),
                reason: "base url cannot carry a path".into(),
            })?
            .pop_if_empty()
            .push("jobs")
            .push(job_id);
        Ok(url)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key.expose_secret()),
            None => builder,
        }
    }

    async fn read_json<T: DeserializeOwned>(
        endpoint: &str,
        response: reqwest::Response,
    ) -> Result<T, DeliveryError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Http {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| DeliveryError::InvalidResponse {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })
    }

    fn send_error(endpoint: &str, timeout: Option<Duration>, e: reqwest::Error) -> DeliveryError {
        match timeout {
            Some(timeout) if e.is_timeout() => DeliveryError::Timeout {
                endpoint: endpoint.to_string(),
                timeout,
            },
            _ => DeliveryError::RequestFailed {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            },
        }
    }
}

#[async_trait]
impl DeliveryClient for HttpDeliveryClient {
    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitResponse, DeliveryError> {
        let endpoint = "/submit";
        let response = self
            .authorize(self.client.post(self.url(endpoint)))
            .timeout(self.submit_timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| Self::send_error(endpoint, Some(self.submit_timeout), e))?;

        let parsed: SubmitResponse = Self::read_json(endpoint, response).await?;
        if !is_valid_job_id(&parsed.job_id) {
            return Err(DeliveryError::InvalidResponse {
                endpoint: endpoint.to_string(),
                reason: format!("unusable jobId '{}'", parsed.job_id),
            });
        }
        tracing::debug!(
            job_id = %parsed.job_id,
            queued = parsed.queued_submissions,
            "Delivery job created"
        );
        Ok(parsed)
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatusResponse, DeliveryError> {
        let endpoint = format!("/jobs/{job_id}");
        let url = self.job_url(&endpoint, job_id)?;
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| Self::send_error(&endpoint, None, e))?;

        Self::read_json(&endpoint, response).await
    }
}
