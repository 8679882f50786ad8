//! HTTP adapter for the extraction service.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use super::client::{DispatchReceipt, ExtractionRequest, ExtractionService};
use super::error::ExtractionError;
use crate::config::ExtractionConfig;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitBody<'a> {
    job_id: &'a str,
    filename: &'a str,
    media_type: &'a str,
    content_base64: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<&'a str>,
}

#[derive(Deserialize)]
struct SubmitResponse {
    id: String,
}

/// Talks to the service over JSON/HTTP.
///
/// `POST {base_url}/jobs` submits a document, `POST {base_url}/jobs/{id}/cancel`
/// cancels it.
#[derive(Clone)]
pub struct HttpExtractionService {
    client: reqwest::Client,
    base_url: String,
    callback_url: Option<String>,
}

impl HttpExtractionService {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ExtractionError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            callback_url: None,
        })
    }

    /// Builds the adapter from the `extraction` config section.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, ExtractionError> {
        let base_url = config.base_url.as_deref().ok_or_else(|| {
            ExtractionError::NotConfigured("extraction.base_url is not set".to_string())
        })?;
        let mut service = Self::new(base_url, Duration::from_secs(config.request_timeout_secs))?;
        service.callback_url = config.callback_url.clone();
        Ok(service)
    }

    fn jobs_url(&self) -> String {
        format!("{}/jobs", self.base_url)
    }

    fn cancel_url(&self, external_ref: &str) -> String {
        format!("{}/jobs/{}/cancel", self.base_url, external_ref)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ExtractionError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ExtractionError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ExtractionService for HttpExtractionService {
    async fn submit(&self, request: ExtractionRequest) -> Result<DispatchReceipt, ExtractionError> {
        let callback_url = request
            .callback_url
            .as_deref()
            .or(self.callback_url.as_deref());
        let body = SubmitBody {
            job_id: &request.job_id,
            filename: &request.filename,
            media_type: &request.media_type,
            content_base64: base64::engine::general_purpose::STANDARD.encode(&request.content),
            callback_url,
        };

        let response = self.client.post(self.jobs_url()).json(&body).send().await?;
        let response = Self::check_status(response).await?;
        let parsed: SubmitResponse = response.json().await?;

        Ok(DispatchReceipt {
            external_ref: parsed.id,
        })
    }

    async fn cancel(&self, external_ref: &str) -> Result<(), ExtractionError> {
        let response = self
            .client
            .post(self.cancel_url(external_ref))
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }
}
