//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use gomer_settings::ServerSettings;

/// Runtime configuration for [`GomerServer`](crate::GomerServer).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent viewer connections.
    pub max_connections: usize,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Max `/run` and `/format` body size in bytes.
    pub max_body_bytes: usize,
    /// Outbound queue depth per viewer.
    pub send_queue_capacity: usize,
    /// How long one send may wait for queue capacity.
    pub send_timeout: Duration,
    /// Interval between server Ping frames.
    pub ping_interval: Duration,
    /// Disconnect viewers silent for longer than this.
    pub pong_timeout: Duration,
    /// Static asset directory served for unmatched routes.
    pub static_dir: Option<PathBuf>,
    /// Attach a permissive CORS layer.
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            ..Self::from(&ServerSettings::default())
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            max_connections: settings.max_connections,
            max_message_size: settings.max_message_size,
            max_body_bytes: settings.max_body_bytes,
            send_queue_capacity: settings.send_queue_capacity.max(1),
            send_timeout: Duration::from_millis(settings.send_timeout_ms),
            ping_interval: Duration::from_millis(settings.ping_interval_ms),
            pong_timeout: Duration::from_millis(settings.pong_timeout_ms),
            static_dir: settings.static_dir.as_ref().map(PathBuf::from),
            cors: settings.cors,
        }
    }
}

impl ServerConfig {
    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
