//! Platform OAuth authorization-code flow.
//!
//! 1. `authorize_url()` issues a random state and returns the consent URL
//! 2. the platform redirects back with `code` + `state`
//! 3. `handle_callback()` checks the state, exchanges the code for tokens
//!    and fetches the account profile when the granted scope allows it
//!
//! Tokens are returned as `AccountCredential` for the `CredentialStore`;
//! they are never logged.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use rand::distributions::Alphanumeric;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::config::{DEFAULT_HTTP_TIMEOUT, OAuthSettings};
use crate::credentials::AccountCredential;
use crate::error::OAuthError;

pub const DEFAULT_SCOPE: &str = "user_info,video.list,video.comment";
pub const WHITELIST_SCOPE: &str = "trial.whitelist";

/// Pending states older than this are rejected.
const STATE_TTL: Duration = Duration::from_secs(600);

/// Token grant returned by the platform.
#[derive(Debug, Clone, Deserialize)]
struct TokenData {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: String,
    #[serde(default)]
    expires_in: u64,
    #[serde(default)]
    scope: String,
    #[serde(default)]
    open_id: String,
    #[serde(default)]
    error_code: i64,
    #[serde(default)]
    description: String,
}

/// Account profile returned by the platform.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub open_id: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    error_code: i64,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

/// OAuth client for the platform's open API.
pub struct DouyinOAuth {
    client: reqwest::Client,
    base_url: String,
    settings: OAuthSettings,
    pending_states: Arc<Mutex<HashMap<String, Instant>>>,
}

impl DouyinOAuth {
    pub fn new(settings: OAuthSettings, base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.into(),
            settings,
            pending_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Build the consent URL for `scope` and remember its state.
    pub async fn authorize_url(&self, scope: &str) -> String {
        let state: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(24)
            .map(char::from)
            .collect();

        {
            let mut pending = self.pending_states.lock().await;
            pending.retain(|_, issued| issued.elapsed() < STATE_TTL);
            pending.insert(state.clone(), Instant::now());
        }

        let params = [
            ("client_key", self.settings.app_id.as_str()),
            ("response_type", "code"),
            ("scope", scope),
            ("redirect_uri", self.settings.redirect_uri.as_str()),
            ("state", state.as_str()),
        ];
        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        tracing::debug!(scope, "Issued OAuth authorization URL");
        format!("{}?{}", self.api_url("platform/oauth/connect/"), query)
    }

    /// Complete the flow for a callback carrying `code` and `state`.
    ///
    /// A profile lookup failure is tolerated: whitelist grants carry no
    /// `user_info` scope, so the credential is stored without a nickname.
    pub async fn handle_callback(
        &self,
        code: &str,
        state: &str,
    ) -> Result<AccountCredential, OAuthError> {
        let issued = self.pending_states.lock().await.remove(state);
        match issued {
            Some(at) if at.elapsed() < STATE_TTL => {}
            _ => return Err(OAuthError::UnknownState(state.to_string())),
        }

        let token = self.exchange_code(code).await?;

        let mut credential = AccountCredential::new(
            token.open_id.clone(),
            SecretString::from(token.access_token.clone()),
        );
        credential.refresh_token =
            Some(token.refresh_token.clone()).filter(|t| !t.is_empty()).map(SecretString::from);
        credential.expires_in = token.expires_in;
        credential.scope = token.scope.clone();

        match self.user_info(&credential.access_token, &token.open_id).await {
            Ok(info) => {
                if credential.open_id.is_empty() {
                    credential.open_id = info.open_id.clone();
                }
                credential.nickname = Some(info.nickname).filter(|n| !n.is_empty());
                credential.avatar = Some(info.avatar).filter(|a| !a.is_empty());
            }
            Err(e) => {
                tracing::warn!(error = %e, "Profile lookup failed, storing credential without profile");
            }
        }

        if credential.open_id.is_empty() {
            credential.open_id = format!("whitelist_{}", state);
        }

        Ok(credential)
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenData, OAuthError> {
        let secret = self
            .settings
            .app_secret
            .as_ref()
            .ok_or(OAuthError::NotConfigured("DOUYIN_APP_SECRET"))?;

        let form = [
            ("client_key", self.settings.app_id.as_str()),
            ("client_secret", secret.expose_secret()),
            ("code", code),
            ("grant_type", "authorization_code"),
        ];

        let response = self
            .client
            .post(self.api_url("oauth/access_token/"))
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(OAuthError::RequestFailed(format!("HTTP {}", status)));
        }

        let envelope: Envelope<TokenData> = serde_json::from_str(&body)
            .map_err(|e| OAuthError::InvalidResponse(e.to_string()))?;
        let token = envelope.data;

        if token.error_code != 0 {
            return Err(OAuthError::Upstream {
                code: token.error_code,
                description: token.description,
            });
        }
        if token.access_token.is_empty() {
            return Err(OAuthError::InvalidResponse(
                "empty access_token, the authorization code may be invalid".to_string(),
            ));
        }

        tracing::info!(open_id = %token.open_id, scope = %token.scope, "Exchanged authorization code");
        Ok(token)
    }

    /// Fetch the profile of the account owning `access_token`.
    pub async fn user_info(
        &self,
        access_token: &SecretString,
        open_id: &str,
    ) -> Result<UserInfo, OAuthError> {
        let response = self
            .client
            .get(self.api_url("oauth/userinfo/"))
            .query(&[
                ("access_token", access_token.expose_secret()),
                ("open_id", open_id),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(OAuthError::RequestFailed(format!("HTTP {}", status)));
        }

        let envelope: Envelope<UserInfo> = serde_json::from_str(&body)
            .map_err(|e| OAuthError::InvalidResponse(e.to_string()))?;
        let info = envelope.data;

        if info.error_code != 0 {
            return Err(OAuthError::Upstream {
                code: info.error_code,
                description: info.description,
            });
        }
        if info.open_id.is_empty() {
            return Err(OAuthError::InvalidResponse("empty open_id".to_string()));
        }
        Ok(info)
    }
}
