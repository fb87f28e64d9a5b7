use async_trait::async_trait;
use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

use crate::app_config::ComputeConfig;
use crate::errors::ProviderError;
use crate::providers::{error_body, ComputeResource, ResourceStatus};

// Start responses carry this text when the datacenter has no free GPU
static CAPACITY_ERROR_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)not\s+enough\s+free\s+gpus|no\s+gpus?\s+available|insufficient\s+capacity")
        .expect("capacity regex is valid")
});

/// Client for the RunPod REST pod lifecycle API
pub struct RunPod {
    /// HTTP client for API requests
    client: Client,
    /// Bearer credential
    api_key: String,
    /// Pod identifier
    pod_id: String,
    /// REST base URL, e.g. `https://rest.runpod.io/v1`
    endpoint: String,
}

/// Subset of the pod resource we read
#[derive(Debug, Deserialize)]
struct PodResponse {
    /// Status the pod is converging to
    #[serde(rename = "desiredStatus")]
    desired_status: Option<String>,
}

impl fmt::Debug for RunPod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunPod")
            .field("pod_id", &self.pod_id)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl RunPod {
    /// Create a new lifecycle client
    pub fn new(
        api_key: impl Into<String>,
        pod_id: impl Into<String>,
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            pod_id: pod_id.into(),
            endpoint: endpoint.into(),
        }
    }

    /// Create a client from the compute configuration
    pub fn from_config(config: &ComputeConfig) -> Self {
        Self::new(
            config.api_key.clone(),
            config.pod_id.clone(),
            config.endpoint.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn pod_url(&self, action: Option<&str>) -> String {
        let base = format!("{}/pods/{}", self.endpoint.trim_end_matches('/'), self.pod_id);
        match action {
            Some(action) => format!("{}/{}", base, action),
            None => base,
        }
    }
}

/// Whether a start response body reports exhausted GPU capacity
pub fn is_capacity_error(body: &str) -> bool {
    CAPACITY_ERROR_REGEX.is_match(body)
}

#[async_trait]
impl ComputeResource for RunPod {
    async fn status(&self) -> Result<ResourceStatus, ProviderError> {
        let response = self
            .client
            .get(self.pod_url(None))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::ApiError {
                status_code: status.as_u16(),
                message: error_body(response).await,
            });
        }

        let pod: PodResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;
        let reported = pod.desired_status.unwrap_or_else(|| "UNKNOWN".to_string());
        debug!("Pod {} status: {}", self.pod_id, reported);
        Ok(ResourceStatus::from_api(&reported))
    }

    async fn request_start(&self) -> Result<(), ProviderError> {
        let response = self
            .client
            .post(self.pod_url(Some("start")))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        info!("Starting pod {}, response: {} {}", self.pod_id, status.as_u16(), body);

        if is_capacity_error(&body) {
            return Err(ProviderError::CapacityExhausted(body));
        }
        if !status.is_success() {
            return Err(ProviderError::ApiError {
                status_code: status.as_u16(),
                message: body,
            });
        }
        Ok(())
    }

    async fn request_pause(&self) -> Result<(), ProviderError> {
        let response = self
            .client
            .post(self.pod_url(Some("stop")))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::ApiError {
                status_code: status.as_u16(),
                message: error_body(response).await,
            });
        }
        info!("Pause requested for pod {}", self.pod_id);
        Ok(())
    }
}
