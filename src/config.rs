//! Environment-driven configuration.
//!
//! `Config::from_env()` loads `.env` (if present) and then reads process
//! environment variables. Everything else goes through `from_lookup`, which
//! takes any key → value function so tests never touch the real
//! environment.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::error::ConfigError;
use crate::event::EventType;

pub const DEFAULT_AI_ENDPOINT: &str = "https://api.coze.com/open/v1";
pub const DEFAULT_DOUYIN_API_BASE: &str = "https://open.douyin.com";
pub const DEFAULT_DOUYIN_PUSH_URL: &str = "wss://live.douyin.com/webcast/im/push/v2/";

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BOT_ID: &str = "default_bot";
pub const DEFAULT_TENANT_ID: &str = "tenant-1";

/// Outbound HTTP timeout shared by every collaborator call.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// AI completion backend settings.
#[derive(Debug, Clone)]
pub struct AiConfig {
    pub endpoint: String,
    pub token: Option<SecretString>,
    pub bot_id: String,
}

impl AiConfig {
    /// Both an endpoint and a credential are required to call the backend.
    pub fn is_enabled(&self) -> bool {
        !self.endpoint.is_empty() && self.token.is_some()
    }
}

/// CRM backend settings.
#[derive(Debug, Clone)]
pub struct CrmConfig {
    pub endpoint: Option<String>,
    pub token: Option<SecretString>,
    pub tenant_id: String,
}

impl CrmConfig {
    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some() && self.token.is_some()
    }
}

/// OAuth client registration with the platform.
#[derive(Debug, Clone)]
pub struct OAuthSettings {
    pub app_id: String,
    pub app_secret: Option<SecretString>,
    pub redirect_uri: String,
}

/// Platform endpoints used by channels.
#[derive(Debug, Clone)]
pub struct PlatformEndpoints {
    pub douyin_api_base: String,
    /// `None` disables the push strategy.
    pub douyin_push_url: Option<String>,
    /// Default room scope per platform tag, used by `StartChannel(tag)`.
    pub room_ids: HashMap<String, String>,
}

/// Pipeline worker pool and reply policy.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    /// Event types that trigger an auto-reply.
    pub auto_reply_types: Vec<EventType>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            queue_capacity: 1024,
            auto_reply_types: vec![EventType::Comment],
        }
    }
}

/// Token bucket parameters.
#[derive(Debug, Clone, Copy)]
pub struct LimiterConfig {
    pub rate: u32,
    pub burst: usize,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self { rate: 10, burst: 20 }
    }
}

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub ai: AiConfig,
    pub crm: CrmConfig,
    pub oauth: OAuthSettings,
    pub platforms: PlatformEndpoints,
    pub limiter: LimiterConfig,
    pub pipeline: PipelineConfig,
    pub auto_start: Vec<String>,
}

impl Config {
    /// Load from `.env` and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary lookup function. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let secret = |key: &str| get(key).map(SecretString::from);

        let port = parse_or(&get, "PORT", DEFAULT_PORT)?;

        let ai = AiConfig {
            endpoint: get("COZE_API").unwrap_or_else(|| DEFAULT_AI_ENDPOINT.to_string()),
            token: secret("COZE_TOKEN"),
            bot_id: get("COZE_BOT_ID").unwrap_or_else(|| DEFAULT_BOT_ID.to_string()),
        };

        let crm = CrmConfig {
            endpoint: get("NB_API"),
            token: secret("NB_TOKEN"),
            tenant_id: get("NB_TENANT_ID").unwrap_or_else(|| DEFAULT_TENANT_ID.to_string()),
        };

        let oauth = OAuthSettings {
            app_id: get("DOUYIN_APP_ID").unwrap_or_default(),
            app_secret: secret("DOUYIN_APP_SECRET"),
            redirect_uri: get("REDIRECT_URI")
                .unwrap_or_else(|| default_redirect_uri(port)),
        };

        let mut room_ids = HashMap::new();
        for tag in ["douyin", "kuaishou", "wechat", "xiaohongshu"] {
            if let Some(room) = get(&format!("{}_ROOM_ID", tag.to_uppercase())) {
                room_ids.insert(tag.to_string(), room);
            }
        }

        // An explicitly empty DOUYIN_PUSH_URL disables push.
        let douyin_push_url = match lookup("DOUYIN_PUSH_URL") {
            Some(v) if v.trim().is_empty() => None,
            Some(v) => Some(v.trim().to_string()),
            None => Some(DEFAULT_DOUYIN_PUSH_URL.to_string()),
        };

        let platforms = PlatformEndpoints {
            douyin_api_base: get("DOUYIN_API_BASE")
                .unwrap_or_else(|| DEFAULT_DOUYIN_API_BASE.to_string()),
            douyin_push_url,
            room_ids,
        };

        let defaults = LimiterConfig::default();
        let limiter = LimiterConfig {
            rate: parse_or(&get, "AI_RATE", defaults.rate)?,
            burst: parse_or(&get, "AI_BURST", defaults.burst)?,
        };
        if limiter.rate == 0 {
            return Err(ConfigError::InvalidValue {
                key: "AI_RATE".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if limiter.burst == 0 {
            return Err(ConfigError::InvalidValue {
                key: "AI_BURST".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        let auto_reply_types = match get("AUTO_REPLY_TYPES") {
            Some(raw) => split_list(&raw)
                .map(|t| {
                    EventType::from_str(&t).map_err(|message| ConfigError::InvalidValue {
                        key: "AUTO_REPLY_TYPES".to_string(),
                        message,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => PipelineConfig::default().auto_reply_types,
        };

        let defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            workers: parse_or(&get, "PIPELINE_WORKERS", defaults.workers)?.max(1),
            queue_capacity: parse_or(&get, "PIPELINE_QUEUE", defaults.queue_capacity)?.max(1),
            auto_reply_types,
        };

        let auto_start = get("AUTO_START_CHANNELS")
            .map(|raw| split_list(&raw).collect())
            .unwrap_or_default();

        Ok(Self {
            port,
            ai,
            crm,
            oauth,
            platforms,
            limiter,
            pipeline,
            auto_start,
        })
    }

    /// Log the effective configuration with secrets masked.
    pub fn log_summary(&self) {
        tracing::info!(
            port = self.port,
            ai_enabled = self.ai.is_enabled(),
            crm_enabled = self.crm.is_enabled(),
            rate = self.limiter.rate,
            burst = self.limiter.burst,
            workers = self.pipeline.workers,
            auto_start = ?self.auto_start,
            "Configuration loaded"
        );
        tracing::info!(
            app_id = %self.oauth.app_id,
            app_secret = %self
                .oauth
                .app_secret
                .as_ref()
                .map(|s| mask_secret(s.expose_secret()))
                .unwrap_or_else(|| "<unset>".to_string()),
            redirect_uri = %self.oauth.redirect_uri,
            "OAuth client"
        );
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            ai: AiConfig {
                endpoint: DEFAULT_AI_ENDPOINT.to_string(),
                token: None,
                bot_id: DEFAULT_BOT_ID.to_string(),
            },
            crm: CrmConfig {
                endpoint: None,
                token: None,
                tenant_id: DEFAULT_TENANT_ID.to_string(),
            },
            oauth: OAuthSettings {
                app_id: String::new(),
                app_secret: None,
                redirect_uri: default_redirect_uri(DEFAULT_PORT),
            },
            platforms: PlatformEndpoints {
                douyin_api_base: DEFAULT_DOUYIN_API_BASE.to_string(),
                douyin_push_url: Some(DEFAULT_DOUYIN_PUSH_URL.to_string()),
                room_ids: HashMap::new(),
            },
            limiter: LimiterConfig::default(),
            pipeline: PipelineConfig::default(),
            auto_start: Vec::new(),
        }
    }
}

fn default_redirect_uri(port: u16) -> String {
    format!("http://localhost:{}/oauth/callback", port)
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = String> + '_ {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Keep the first and last four characters of a secret.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() < 8 {
        return "***".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}
