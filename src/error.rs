//! Error types for the live IM proxy.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Rate limiter error: {0}")]
    Limiter(#[from] LimiterError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("OAuth error: {0}")]
    OAuth(#[from] OAuthError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Channel-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} is not connected")]
    NotConnected { name: String },

    #[error("Channel {name} has no access token")]
    MissingCredential { name: String },

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Channel {name} is missing {what}")]
    MissingScope { name: String, what: &'static str },

    #[error("Upstream API error {code}: {message}")]
    UpstreamApi { code: i64, message: String },

    #[error("Failed to parse upstream response: {0}")]
    Parse(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Channel {name} cannot {action} while {state}")]
    InvalidState {
        name: String,
        action: &'static str,
        state: String,
    },

    #[error("Channel {name} failed to connect: {reason}")]
    ConnectFailed { name: String, reason: String },
}

impl From<reqwest::Error> for ChannelError {
    fn from(e: reqwest::Error) -> Self {
        ChannelError::Http(e.to_string())
    }
}

/// Token bucket errors.
#[derive(Debug, thiserror::Error)]
pub enum LimiterError {
    #[error("Wait for a rate limit token was cancelled")]
    Cancelled,
}

/// Errors raised while producing a reply or a lead for one event.
///
/// None of these reach the caller of `Pipeline::process_event`; they end
/// up in the log.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("AI backend rate limited")]
    RateLimited,

    #[error("AI backend request failed: {reason}")]
    AiFailed { reason: String },

    #[error("AI backend timed out after {timeout:?}")]
    AiTimeout { timeout: Duration },

    #[error("CRM request failed: {reason}")]
    CrmFailed { reason: String },

    #[error("Reply on channel {channel} failed: {source}")]
    ReplyFailed {
        channel: String,
        #[source]
        source: ChannelError,
    },

    #[error("No reply sender registered for channel {channel}")]
    NoReplySender { channel: String },

    #[error("Pipeline is shut down")]
    QueueClosed,
}

/// OAuth collaborator errors.
#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("OAuth request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid OAuth response: {0}")]
    InvalidResponse(String),

    #[error("OAuth provider returned error {code}: {description}")]
    Upstream { code: i64, description: String },

    #[error("Unknown or expired OAuth state: {0}")]
    UnknownState(String),

    #[error("OAuth client is not configured: {0}")]
    NotConfigured(&'static str),
}

impl From<reqwest::Error> for OAuthError {
    fn from(e: reqwest::Error) -> Self {
        OAuthError::RequestFailed(e.to_string())
    }
}

/// HTTP control surface errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind to {addr}: {reason}")]
    Bind {
        addr: std::net::SocketAddr,
        reason: String,
    },
}

/// Result type alias for the proxy.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_invalid_value_display() {
        let err = ConfigError::InvalidValue {
            key: "AI_RATE".to_string(),
            message: "must be a positive integer".to_string(),
        };
        assert!(err.to_string().contains("AI_RATE"));
        assert!(err.to_string().contains("must be a positive integer"));
    }

    #[test]
    fn test_channel_error_not_connected_display() {
        let err = ChannelError::NotConnected {
            name: "douyin".to_string(),
        };
        assert!(err.to_string().contains("douyin"));
        assert!(err.to_string().contains("not connected"));
    }

    #[test]
    fn test_channel_error_upstream_display() {
        let err = ChannelError::UpstreamApi {
            code: 28001003,
            message: "access_token expired".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("28001003"));
        assert!(msg.contains("access_token expired"));
    }

    #[test]
    fn test_channel_error_invalid_state_display() {
        let err = ChannelError::InvalidState {
            name: "kuaishou".to_string(),
            action: "start",
            state: "stopped".to_string(),
        };
        assert_eq!(err.to_string(), "Channel kuaishou cannot start while stopped");
    }

    #[test]
    fn test_pipeline_error_reply_failed_keeps_source() {
        let err = PipelineError::ReplyFailed {
            channel: "douyin".to_string(),
            source: ChannelError::MissingCredential {
                name: "douyin".to_string(),
            },
        };
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("no access token"));
    }

    #[test]
    fn test_error_from_channel_error() {
        let err = Error::from(ChannelError::UnsupportedPlatform("tiktok".to_string()));
        assert!(err.to_string().contains("Channel error"));
        assert!(err.to_string().contains("tiktok"));
    }

    #[test]
    fn test_error_from_limiter_error() {
        let err = Error::from(LimiterError::Cancelled);
        assert!(err.to_string().contains("cancelled"));
    }
}
