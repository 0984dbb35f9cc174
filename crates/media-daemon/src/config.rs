//! Command line and environment configuration.

use anyhow::{Result, bail};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "media-daemon")]
#[command(about = "Media metadata store with live change notifications")]
pub struct Config {
    /// Directory holding the media files
    #[arg(long, env = "MEDIA_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Externally reachable origin that serves the media files
    #[arg(long, env = "MEDIA_SERVER_URL")]
    pub public_url: String,

    /// JSON store file (in-memory store when omitted)
    #[arg(long, env = "MEDIA_STORE")]
    pub store: Option<PathBuf>,

    /// Address for the HTTP API
    #[arg(long, default_value = "0.0.0.0:8080", env = "MEDIA_HTTP_ADDR")]
    pub http: String,

    /// Address for the WebSocket event server (disabled when omitted)
    #[arg(long, env = "MEDIA_WS_ADDR")]
    pub ws: Option<String>,

    /// Key prefix of the media collection
    #[arg(long, default_value = "metadata/")]
    pub prefix: String,

    /// Keepalive interval for idle event streams, in seconds
    #[arg(long, default_value_t = 30)]
    pub keepalive_secs: u64,

    /// Per-subscriber event queue capacity
    #[arg(long, default_value_t = media_store::DEFAULT_EVENT_BUFFER)]
    pub event_buffer: usize,

    /// Enable verbose logging
    #[arg(long)]
    pub verbose: bool,
}

impl Config {
    /// Reject settings clap cannot check on its own.
    pub fn validate(&self) -> Result<()> {
        if !(self.public_url.starts_with("http://") || self.public_url.starts_with("https://")) {
            bail!("public URL must start with http:// or https://, got {:?}", self.public_url);
        }
        if self.keepalive_secs == 0 {
            bail!("keepalive interval must be at least one second");
        }
        if self.event_buffer == 0 {
            bail!("event buffer must hold at least one event");
        }
        if !self.data_dir.is_dir() {
            bail!("data directory {:?} is not a directory", self.data_dir);
        }
        Ok(())
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    /// Default log filter, used when `RUST_LOG` is not set.
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "info,media_daemon=debug,media_store=debug,tower_http=debug"
        } else {
            "info,media_daemon=info,media_store=info"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(dir: &TempDir, extra: &[&str]) -> Config {
        let dir = dir.path().to_str().unwrap();
        let mut args = vec![
            "media-daemon",
            "--data-dir",
            dir,
            "--public-url",
            "https://media.example.com",
        ];
        args.extend_from_slice(extra);
        Config::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_defaults() {
        let dir = TempDir::new().unwrap();
        let config = parse(&dir, &[]);

        assert_eq!(config.http, "0.0.0.0:8080");
        assert_eq!(config.prefix, "metadata/");
        assert_eq!(config.keepalive(), Duration::from_secs(30));
        assert_eq!(config.event_buffer, 32);
        assert!(config.ws.is_none());
        assert!(config.store.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_rejects_bad_values() {
        let dir = TempDir::new().unwrap();

        let mut config = parse(&dir, &["--keepalive-secs", "0"]);
        assert!(config.validate().is_err());

        config.keepalive_secs = 5;
        config.public_url = "ftp://media".to_string();
        assert!(config.validate().is_err());

        config.public_url = "http://media".to_string();
        config.data_dir = dir.path().join("missing");
        assert!(config.validate().is_err());

        let config = parse(&dir, &["--event-buffer", "0"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_required_args() {
        assert!(Config::try_parse_from(["media-daemon"]).is_err());
    }
}
