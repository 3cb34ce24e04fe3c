//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a settings
//! file may name only the fields it overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Buffer every viewer sees before the first edit.
pub const INITIAL_GO_CODE: &str = r#"package main

import "fmt"

func main() {
	fmt.Println("Hello, gomer!")
}
"#;

/// Root settings type.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GomerSettings {
    /// HTTP and WebSocket surface.
    pub server: ServerSettings,
    /// Execution sandbox.
    pub sandbox: SandboxSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
    /// Shared document defaults.
    pub document: DocumentSettings,
}

/// HTTP and WebSocket settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent viewer connections.
    pub max_connections: usize,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Max `/run` and `/format` request body in bytes.
    pub max_body_bytes: usize,
    /// Outbound frames queued per viewer before sends start waiting.
    pub send_queue_capacity: usize,
    /// How long a broadcast waits on one viewer's full queue, in milliseconds.
    pub send_timeout_ms: u64,
    /// Interval between server Ping frames, in milliseconds.
    pub ping_interval_ms: u64,
    /// Disconnect a viewer silent for longer than this, in milliseconds.
    pub pong_timeout_ms: u64,
    /// Directory of static assets served as fallback route.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_dir: Option<String>,
    /// Attach a permissive CORS layer.
    pub cors: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_connections: 256,
            max_message_size: 1024 * 1024,
            max_body_bytes: 1024 * 1024,
            send_queue_capacity: 64,
            send_timeout_ms: 5_000,
            ping_interval_ms: 30_000,
            pong_timeout_ms: 60_000,
            static_dir: None,
            cors: true,
        }
    }
}

/// Execution sandbox settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SandboxSettings {
    /// Go toolchain binary.
    pub go_binary: String,
    /// Formatter binary.
    pub gofmt_binary: String,
    /// Module path passed to `go mod init`.
    pub module_name: String,
    /// Wall-clock deadline for `go run`, in milliseconds.
    pub run_timeout_ms: u64,
    /// Deadline for `go mod tidy` and `gofmt`, in milliseconds.
    pub resolve_timeout_ms: u64,
    /// Parent directory for per-request workspaces (system temp dir when unset).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<String>,
}

impl SandboxSettings {
    /// Run deadline as a [`Duration`].
    pub fn run_timeout(&self) -> Duration {
        Duration::from_millis(self.run_timeout_ms)
    }

    /// Dependency-resolution deadline as a [`Duration`].
    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            go_binary: "go".to_string(),
            gofmt_binary: "gofmt".to_string(),
            module_name: "gomer".to_string(),
            run_timeout_ms: 10_000,
            resolve_timeout_ms: 60_000,
            workspace_root: None,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Shared document settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DocumentSettings {
    /// Buffer content at process start.
    pub initial_code: String,
}

impl Default for DocumentSettings {
    fn default() -> Self {
        Self {
            initial_code: INITIAL_GO_CODE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let json = r#"{"server": {"port": 9000}, "sandbox": {"goBinary": "/usr/local/go/bin/go"}}"#;
        let settings: GomerSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.sandbox.go_binary, "/usr/local/go/bin/go");
        assert_eq!(settings.sandbox.gofmt_binary, "gofmt");
    }

    #[test]
    fn camel_case_wire_names() {
        let value = serde_json::to_value(GomerSettings::default()).unwrap();
        assert!(value["server"]["maxConnections"].is_number());
        assert!(value["sandbox"]["runTimeoutMs"].is_number());
        assert!(value["server"].get("staticDir").is_none());
    }

    #[test]
    fn durations_follow_millis() {
        let sandbox = SandboxSettings {
            run_timeout_ms: 2_500,
            resolve_timeout_ms: 100,
            ..SandboxSettings::default()
        };
        assert_eq!(sandbox.run_timeout(), Duration::from_millis(2_500));
        assert_eq!(sandbox.resolve_timeout(), Duration::from_millis(100));
    }
}
