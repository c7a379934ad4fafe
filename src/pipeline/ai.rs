//! AI completion collaborator.
//!
//! `POST {endpoint}/bot/chat` with `{bot_id, user, query, stream: false}`.
//! The reply is the `content` string of the response body; a non-2xx
//! status, an unparsable body or an empty `content` is a failure.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::AiConfig;
use crate::error::PipelineError;
use crate::event::Event;

/// Produces a reply for an event.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(&self, event: &Event) -> Result<String, PipelineError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    bot_id: &'a str,
    user: &'a str,
    query: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    content: Option<String>,
}

/// HTTP client for the AI backend.
pub struct AiClient {
    client: Client,
    endpoint: String,
    token: SecretString,
    bot_id: String,
}

impl AiClient {
    pub fn new(endpoint: impl Into<String>, token: SecretString, bot_id: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(crate::config::DEFAULT_HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            endpoint: endpoint.into(),
            token,
            bot_id: bot_id.into(),
        }
    }

    /// `None` when the backend is not fully configured.
    pub fn from_config(config: &AiConfig) -> Option<Self> {
        if !config.is_enabled() {
            return None;
        }
        let token = config.token.clone()?;
        Some(Self::new(config.endpoint.clone(), token, config.bot_id.clone()))
    }

    fn api_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.endpoint.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl ReplyGenerator for AiClient {
    async fn generate(&self, event: &Event) -> Result<String, PipelineError> {
        let query = event.text().unwrap_or_default();
        let body = ChatRequest {
            bot_id: &self.bot_id,
            user: &event.user_id,
            query,
            stream: false,
        };

        let response = self
            .client
            .post(self.api_url("bot/chat"))
            .bearer_auth(self.token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PipelineError::AiTimeout {
                        timeout: crate::config::DEFAULT_HTTP_TIMEOUT,
                    }
                } else {
                    PipelineError::AiFailed {
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| PipelineError::AiFailed {
            reason: format!("failed to read body: {}", e),
        })?;

        if !status.is_success() {
            return Err(PipelineError::AiFailed {
                reason: format!("HTTP {}: {}", status, text.chars().take(200).collect::<String>()),
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| PipelineError::AiFailed {
            reason: format!("invalid response body: {}", e),
        })?;

        match parsed.content.map(|c| c.trim().to_string()) {
            Some(reply) if !reply.is_empty() => Ok(reply),
            _ => Err(PipelineError::AiFailed {
                reason: "response has no content".to_string(),
            }),
        }
    }
}
