use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::BrainConfig;

#[derive(Debug, thiserror::Error)]
pub enum BrainError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{backend} returned {status}: {body}")]
    Status {
        backend: &'static str,
        status: u16,
        body: String,
    },
    #[error("malformed response from {0}")]
    Malformed(&'static str),
    #[error("no brain backend available")]
    NoBackend,
}

/// One text-generation call
#[derive(Debug, Clone, PartialEq)]
pub struct ThinkRequest {
    pub prompt: String,
    pub temperature: Option<f32>,
    pub timeout: Duration,
}

impl ThinkRequest {
    pub fn new(prompt: impl Into<String>, timeout: Duration) -> Self {
        Self {
            prompt: prompt.into(),
            temperature: None,
            timeout,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Opaque text-in/text-out capability
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Brain: Send + Sync {
    fn name(&self) -> &'static str;

    /// Bounded probe; never errors
    async fn healthcheck(&self) -> bool;

    async fn think(&self, request: &ThinkRequest) -> Result<String, BrainError>;
}

// ─── Local backend (Ollama HTTP API) ─────────────────────────────────

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: Option<serde_json::Value>,
}

pub struct OllamaBrain {
    client: Client,
    host: String,
    model: String,
    temperature: f32,
    health_timeout: Duration,
}

impl OllamaBrain {
    pub fn new(host: &str, model: &str) -> Result<Self, BrainError> {
        Ok(Self {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(5))
                .build()?,
            host: host.trim_end_matches('/').to_string(),
            model: model.to_string(),
            temperature: 0.2,
            health_timeout: Duration::from_secs(5),
        })
    }

    pub fn from_config(config: &BrainConfig) -> Result<Self, BrainError> {
        let mut brain = Self::new(&config.local_host, &config.local_model)?;
        brain.temperature = config.temperature;
        brain.health_timeout = Duration::from_secs(config.health_timeout_secs);
        Ok(brain)
    }
}

#[async_trait]
impl Brain for OllamaBrain {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn healthcheck(&self) -> bool {
        let url = format!("{}/api/tags", self.host);
        match self.client.get(&url).timeout(self.health_timeout).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(host = %self.host, error = %e, "local brain health probe failed");
                false
            }
        }
    }

    async fn think(&self, request: &ThinkRequest) -> Result<String, BrainError> {
        let url = format!("{}/api/generate", self.host);
        let body = GenerateRequest {
            model: &self.model,
            prompt: &request.prompt,
            stream: false,
            options: GenerateOptions {
                temperature: request.temperature.unwrap_or(self.temperature),
            },
        };

        info!(model = %self.model, prompt_length = request.prompt.len(), "sending local brain request");

        let response = self
            .client
            .post(&url)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(BrainError::Status {
                backend: "local",
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&text).map_err(|_| BrainError::Malformed("local"))?;
        match parsed.response {
            Some(serde_json::Value::String(s)) => Ok(s.trim().to_string()),
            _ => Err(BrainError::Malformed("local")),
        }
    }
}

// ─── Remote backend (AXIS MUNDI tool-call bridge) ────────────────────

#[derive(Debug, Serialize)]
struct ToolCall<'a> {
    name: &'static str,
    arguments: ToolArguments<'a>,
}

#[derive(Debug, Serialize)]
struct ToolArguments<'a> {
    message: &'a str,
    thread_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct ToolReply {
    reply: Option<serde_json::Value>,
}

pub struct AxisBrain {
    client: Client,
    base_url: String,
    thread_id: String,
    health_timeout: Duration,
}

impl AxisBrain {
    pub fn new(base_url: &str, thread_id: &str) -> Result<Self, BrainError> {
        Ok(Self {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            thread_id: thread_id.to_string(),
            health_timeout: Duration::from_secs(5),
        })
    }

    pub fn from_config(config: &BrainConfig, thread_id: &str) -> Result<Self, BrainError> {
        let mut brain = Self::new(&config.remote_url, thread_id)?;
        brain.health_timeout = Duration::from_secs(config.health_timeout_secs);
        Ok(brain)
    }
}

#[async_trait]
impl Brain for AxisBrain {
    fn name(&self) -> &'static str {
        "remote"
    }

    /// Reachability only: any HTTP answer counts
    async fn healthcheck(&self) -> bool {
        self.client
            .get(&self.base_url)
            .timeout(self.health_timeout)
            .send()
            .await
            .is_ok()
    }

    async fn think(&self, request: &ThinkRequest) -> Result<String, BrainError> {
        let url = format!("{}/mcp/tools/call", self.base_url);
        let body = ToolCall {
            name: "axis_chat",
            arguments: ToolArguments {
                message: &request.prompt,
                thread_id: &self.thread_id,
            },
        };

        info!(thread = %self.thread_id, prompt_length = request.prompt.len(), "sending remote brain request");

        let response = self
            .client
            .post(&url)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(BrainError::Status {
                backend: "remote",
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: ToolReply =
            serde_json::from_str(&text).map_err(|_| BrainError::Malformed("remote"))?;
        match parsed.reply {
            Some(serde_json::Value::String(s)) => Ok(s.trim().to_string()),
            _ => Err(BrainError::Malformed("remote")),
        }
    }
}

// ─── Fallback routing ────────────────────────────────────────────────

/// Prefers the local backend when its probe succeeds, otherwise the remote.
/// Empty text counts as a failure.
pub struct FallbackBrain {
    local: Option<Arc<dyn Brain>>,
    remote: Option<Arc<dyn Brain>>,
}

impl FallbackBrain {
    pub fn new(local: Option<Arc<dyn Brain>>, remote: Option<Arc<dyn Brain>>) -> Self {
        Self { local, remote }
    }

    /// Build the configured chain. Empty host/url disables a backend.
    pub fn from_config(config: &BrainConfig) -> Result<Self, BrainError> {
        let local: Option<Arc<dyn Brain>> = if config.local_host.is_empty() {
            None
        } else {
            Some(Arc::new(OllamaBrain::from_config(config)?))
        };
        let remote: Option<Arc<dyn Brain>> = if config.remote_url.is_empty() {
            None
        } else {
            Some(Arc::new(AxisBrain::from_config(config, "gesher_brain")?))
        };
        Ok(Self::new(local, remote))
    }
}

#[async_trait]
impl Brain for FallbackBrain {
    fn name(&self) -> &'static str {
        "fallback"
    }

    async fn healthcheck(&self) -> bool {
        for backend in [&self.local, &self.remote].into_iter().flatten() {
            if backend.healthcheck().await {
                return true;
            }
        }
        false
    }

    async fn think(&self, request: &ThinkRequest) -> Result<String, BrainError> {
        let mut last_error = BrainError::NoBackend;

        if let Some(local) = &self.local {
            if local.healthcheck().await {
                match local.think(request).await {
                    Ok(text) if !text.trim().is_empty() => return Ok(text),
                    Ok(_) => debug!(backend = local.name(), "empty response, falling back"),
                    Err(e) => {
                        debug!(backend = local.name(), error = %e, "brain call failed, falling back");
                        last_error = e;
                    }
                }
            } else {
                debug!(backend = local.name(), "health probe failed, falling back");
            }
        }

        if let Some(remote) = &self.remote {
            match remote.think(request).await {
                Ok(text) if !text.trim().is_empty() => return Ok(text),
                Ok(_) => debug!(backend = remote.name(), "empty response"),
                Err(e) => {
                    debug!(backend = remote.name(), error = %e, "brain call failed");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}
