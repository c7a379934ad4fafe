//! CRM collaborator: scored leads posted to `{endpoint}/leads`.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::config::CrmConfig;
use crate::error::PipelineError;
use crate::event::Event;

/// A scored CRM record derived from one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lead {
    pub tenant_id: String,
    pub uid: String,
    pub nick: String,
    pub channel: String,
    pub score: u32,
    /// RFC 3339.
    pub created_at: String,
}

impl Lead {
    pub fn from_event(event: &Event, tenant_id: &str, score: u32, at: DateTime<Utc>) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            uid: event.user_id.clone(),
            nick: event.nickname.clone(),
            channel: event.channel.clone(),
            score,
            created_at: at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

/// Accepts leads.
#[async_trait]
pub trait LeadSink: Send + Sync {
    fn tenant_id(&self) -> &str;

    async fn submit(&self, lead: &Lead) -> Result<(), PipelineError>;
}

/// HTTP client for the CRM backend.
pub struct CrmClient {
    client: Client,
    endpoint: String,
    token: SecretString,
    tenant_id: String,
}

impl CrmClient {
    pub fn new(
        endpoint: impl Into<String>,
        token: SecretString,
        tenant_id: impl Into<String>,
    ) -> Self {
        let client = Client::builder()
            .timeout(crate::config::DEFAULT_HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            endpoint: endpoint.into(),
            token,
            tenant_id: tenant_id.into(),
        }
    }

    /// `None` unless both endpoint and token are set.
    pub fn from_config(config: &CrmConfig) -> Option<Self> {
        let endpoint = config.endpoint.clone()?;
        let token = config.token.clone()?;
        Some(Self::new(endpoint, token, config.tenant_id.clone()))
    }
}

#[async_trait]
impl LeadSink for CrmClient {
    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    async fn submit(&self, lead: &Lead) -> Result<(), PipelineError> {
        let url = format!("{}/leads", self.endpoint.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .bearer_auth(self.token.expose_secret())
            .json(lead)
            .send()
            .await
            .map_err(|e| PipelineError::CrmFailed {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK && status != reqwest::StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::CrmFailed {
                reason: format!("HTTP {}: {}", status, body.chars().take(200).collect::<String>()),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use httpmock::prelude::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::event::EventType;

    fn lead() -> Lead {
        let evt = Event::new(EventType::Follow, "douyin", "u1", "Alice").with_room("123");
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        Lead::from_event(&evt, "tenant-1", 5, at)
    }

    #[test]
    fn test_lead_from_event() {
        assert_eq!(
            lead(),
            Lead {
                tenant_id: "tenant-1".to_string(),
                uid: "u1".to_string(),
                nick: "Alice".to_string(),
                channel: "douyin".to_string(),
                score: 5,
                created_at: "2024-05-01T12:00:00Z".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_submit_posts_lead() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/leads")
                .header("authorization", "Bearer nb")
                .json_body(json!({
                    "tenant_id": "tenant-1",
                    "uid": "u1",
                    "nick": "Alice",
                    "channel": "douyin",
                    "score": 5,
                    "created_at": "2024-05-01T12:00:00Z"
                }));
            then.status(201);
        });

        let client = CrmClient::new(server.base_url(), SecretString::from("nb"), "tenant-1");
        client.submit(&lead()).await.unwrap();
        mock.assert();
    }

    #[tokio::test]
    async fn test_other_success_codes_are_failures() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/leads");
            then.status(202);
        });

        let client = CrmClient::new(server.base_url(), SecretString::from("nb"), "tenant-1");
        let err = client.submit(&lead()).await.unwrap_err();
        assert!(matches!(err, PipelineError::CrmFailed { .. }));
    }

    #[test]
    fn test_from_config_requires_endpoint_and_token() {
        let config = CrmConfig {
            endpoint: Some("https://crm.example.com".to_string()),
            token: None,
            tenant_id: "tenant-1".to_string(),
        };
        assert!(CrmClient::from_config(&config).is_none());
    }
}
