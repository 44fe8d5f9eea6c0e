//! Connection and directory configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable that switches on frame tracing
pub const TRACE_FRAMES_ENV: &str = "DEBUG";

/// Per-target connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Upper bound of every wait: socket read, reply poll, event dequeue
    pub poll_quantum: Duration,
    /// Message ids start above this value
    pub first_message_id: u64,
    pub connect_timeout: Duration,
    /// How long `stop()` waits for the channel to close
    pub close_timeout: Duration,
    /// Log every sent/received frame at trace level
    pub trace_frames: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            poll_quantum: Duration::from_secs(1),
            first_message_id: 1000,
            connect_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(5),
            trace_frames: false,
        }
    }
}

impl ConnectionConfig {
    /// Defaults, with `trace_frames` taken from `DEBUG`
    pub fn from_env() -> Self {
        let trace_frames = std::env::var(TRACE_FRAMES_ENV)
            .map(|v| !v.is_empty())
            .unwrap_or(false);
        Self {
            trace_frames,
            ..Self::default()
        }
    }
}

/// Control-plane (`/json/*`) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub url: String,
    pub request_timeout: Option<Duration>,
    /// Pause between attempts while the endpoint is not reachable yet
    pub retry_interval: Duration,
    /// Give up waiting after this long. `None` waits forever.
    pub max_wait: Option<Duration>,
    /// Applied to every target the directory hands out
    pub connection: ConnectionConfig,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:9222".to_string(),
            request_timeout: None,
            retry_interval: Duration::from_secs(1),
            max_wait: None,
            connection: ConnectionConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.poll_quantum, Duration::from_secs(1));
        assert_eq!(config.first_message_id, 1000);
        assert_eq!(config.close_timeout, Duration::from_secs(5));
        assert!(!config.trace_frames);

        let directory = DirectoryConfig::default();
        assert_eq!(directory.url, "http://127.0.0.1:9222");
        assert!(directory.max_wait.is_none());
    }

    #[test]
    fn test_partial_deserialize() {
        let config: DirectoryConfig = serde_json::from_str(
            r#"{"url": "http://10.0.0.2:9333", "connection": {"trace_frames": true}}"#,
        )
        .unwrap();
        assert_eq!(config.url, "http://10.0.0.2:9333");
        assert!(config.connection.trace_frames);
        assert_eq!(config.connection.first_message_id, 1000);
        assert_eq!(config.retry_interval, Duration::from_secs(1));
    }
}
