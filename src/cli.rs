//! Command-line flags for the binary.
//!
//! Every flag falls back to an environment variable, and explicit flags
//! override the values `Config::from_env()` read.

use clap::{Parser, ValueEnum};

use crate::config::Config;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "live-im-proxy")]
#[command(about = "Live-stream interaction proxy with rate-limited auto-reply and lead scoring")]
#[command(version)]
pub struct Cli {
    /// HTTP control surface port
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Platform tags to start at boot (comma separated)
    #[arg(long, env = "AUTO_START_CHANNELS", value_delimiter = ',')]
    pub channels: Vec<String>,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Cli {
    /// Apply explicit flags on top of the loaded configuration.
    pub fn apply(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.port = port;
        }
        let channels: Vec<String> = self
            .channels
            .iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        if !channels.is_empty() {
            config.auto_start = channels;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "live-im-proxy",
            "--port",
            "9090",
            "--channels",
            "douyin, kuaishou",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);

        let mut config = Config::default();
        cli.apply(&mut config);
        assert_eq!(config.port, 9090);
        assert_eq!(config.auto_start, vec!["douyin", "kuaishou"]);
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        assert!(Cli::try_parse_from(["live-im-proxy", "--port", "http"]).is_err());
    }
}
