use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::BackendConfig;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// A text-generation backend: one prompt in, one completion out.
#[async_trait]
pub trait TextBackend: Send + Sync {
    async fn complete(&self, prompt: &str, timeout: Duration) -> Result<String>;
}

/// Client for an Ollama-style `/api/generate` endpoint (non-streaming).
pub struct OllamaClient {
    client: reqwest::Client,
    config: BackendConfig,
}

impl OllamaClient {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Startup probe: a tiny prompt must succeed before any loop starts.
    pub async fn check(&self) -> Result<()> {
        let timeout = Duration::from_secs(self.config.check_timeout_secs);
        let Err(e) = self.complete("hi", timeout).await else {
            return Ok(());
        };

        let (connect, timed_out) = match e.downcast_ref::<reqwest::Error>() {
            Some(re) => (re.is_connect(), re.is_timeout()),
            None => (false, false),
        };
        if connect {
            anyhow::bail!("Backend not running at {}", self.config.url);
        }
        if timed_out {
            anyhow::bail!(
                "Backend at {} did not answer within {}s",
                self.config.url,
                self.config.check_timeout_secs
            );
        }
        if is_status_error(&e) {
            return Err(e.context(format!("Model '{}' not available", self.config.model)));
        }
        Err(e)
    }
}

#[async_trait]
impl TextBackend for OllamaClient {
    async fn complete(&self, prompt: &str, timeout: Duration) -> Result<String> {
        let request = GenerateRequest {
            model: &self.config.model,
            prompt,
            stream: false,
        };

        debug!("Sending request to backend: {}", self.config.url);

        let response = self
            .client
            .post(&self.config.url)
            .timeout(timeout)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(StatusError {
                status: status.as_u16(),
                body: error_body,
            }
            .into());
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .context("Failed to parse backend response")?;

        Ok(generated.response)
    }
}

/// Non-success HTTP status from the backend.
#[derive(Debug)]
pub struct StatusError {
    pub status: u16,
    pub body: String,
}

impl std::fmt::Display for StatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "backend returned HTTP {}: {}", self.status, self.body)
    }
}

impl std::error::Error for StatusError {}

fn is_status_error(e: &anyhow::Error) -> bool {
    e.downcast_ref::<StatusError>().is_some()
}

/// Short classification of a backend failure for log lines.
pub fn describe_failure(e: &anyhow::Error) -> String {
    if let Some(status) = e.downcast_ref::<StatusError>() {
        return format!("HTTP error {}", status.status);
    }
    for cause in e.chain() {
        if let Some(re) = cause.downcast_ref::<reqwest::Error>() {
            if re.is_timeout() {
                return "request timed out".to_string();
            }
            if re.is_connect() {
                return "cannot connect to backend".to_string();
            }
            if re.is_decode() {
                return "malformed response body".to_string();
            }
        }
    }
    format!("{:#}", e)
}
