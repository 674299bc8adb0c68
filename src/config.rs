//! Configuration module for the echo server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values. Running with
//! no arguments at all serves on `127.0.0.1:3000`.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;

/// Command-line arguments for the echo server
#[derive(Parser, Debug)]
#[command(name = "echo-socket")]
#[command(author = "echo-socket authors")]
#[command(version = "0.1.0")]
#[command(about = "A WebSocket server that echoes text messages", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:3000)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum number of concurrently served connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Largest accepted WebSocket message in bytes
    #[arg(long)]
    pub max_message_size: Option<usize>,

    /// Seconds a client has to complete the WebSocket handshake
    #[arg(long)]
    pub handshake_timeout: Option<u64>,

    /// What to do with binary frames
    #[arg(long, value_enum)]
    pub binary: Option<BinaryPolicy>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Handling of binary frames. Only text frames are echoed with a prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BinaryPolicy {
    /// Close the connection with status 1003 (unsupported data).
    #[default]
    Reject,
    /// Send the payload back unchanged.
    Echo,
    /// Ignore the frame.
    Drop,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub websocket: WebSocketSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Number of worker threads
    pub workers: Option<usize>,
    /// Connection cap
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            workers: None,
            max_connections: default_max_connections(),
        }
    }
}

/// WebSocket protocol configuration
#[derive(Debug, Deserialize)]
pub struct WebSocketSection {
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Handshake deadline in seconds
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout: u64,
    #[serde(default)]
    pub binary: BinaryPolicy,
}

impl Default for WebSocketSection {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            handshake_timeout: default_handshake_timeout(),
            binary: BinaryPolicy::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_max_message_size() -> usize {
    16 * 1024 * 1024 // 16 MB
}

fn default_handshake_timeout() -> u64 {
    10 // 10 seconds
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub workers: Option<usize>,
    pub max_connections: usize,
    pub max_message_size: usize,
    pub handshake_timeout: Duration,
    pub binary: BinaryPolicy,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config::resolve(CliArgs::parse_from(["echo-socket"]), TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Config::from_cli(CliArgs::parse())
    }

    /// Read the TOML file named by `cli`, if any, then merge and validate.
    fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Config::resolve(cli, toml_config).validate()
    }

    /// Merge CLI args with TOML config (CLI takes precedence)
    fn resolve(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            workers: cli.workers.or(toml_config.server.workers),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            max_message_size: cli
                .max_message_size
                .unwrap_or(toml_config.websocket.max_message_size),
            handshake_timeout: Duration::from_secs(
                cli.handshake_timeout
                    .unwrap_or(toml_config.websocket.handshake_timeout),
            ),
            binary: cli.binary.unwrap_or(toml_config.websocket.binary),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.max_connections == 0 || self.max_connections > Semaphore::MAX_PERMITS {
            return Err(ConfigError::MaxConnections(self.max_connections));
        }
        if self.handshake_timeout.is_zero() {
            return Err(ConfigError::HandshakeTimeout);
        }
        Ok(self)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("max_connections must be between 1 and {}, got {}", Semaphore::MAX_PERMITS, .0)]
    MaxConnections(usize),
    #[error("handshake_timeout must be at least 1 second")]
    HandshakeTimeout,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.listen, "127.0.0.1:3000");
        assert_eq!(config.workers, None);
        assert_eq!(config.max_connections, 10_000);
        assert_eq!(config.max_message_size, 16 * 1024 * 1024);
        assert_eq!(config.binary, BinaryPolicy::Reject);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "0.0.0.0:9001"
            workers = 2
            max_connections = 64

            [websocket]
            max_message_size = 1024
            binary = "echo"

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:9001");
        assert_eq!(config.server.workers, Some(2));
        assert_eq!(config.server.max_connections, 64);
        assert_eq!(config.websocket.max_message_size, 1024);
        assert_eq!(config.websocket.binary, BinaryPolicy::Echo);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: TomlConfig = toml::from_str("[websocket]\nbinary = \"drop\"\n").unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:3000");
        assert_eq!(config.websocket.binary, BinaryPolicy::Drop);
        assert_eq!(config.websocket.max_message_size, 16 * 1024 * 1024);
    }

    #[test]
    fn test_unknown_binary_policy_is_rejected() {
        let result: Result<TomlConfig, _> = toml::from_str("[websocket]\nbinary = \"mirror\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            listen = "0.0.0.0:9001"

            [websocket]
            binary = "echo"

            [logging]
            level = "warn"
        "#,
        )
        .unwrap();
        let cli = CliArgs::parse_from([
            "echo-socket",
            "--listen",
            "127.0.0.1:4000",
            "--binary",
            "drop",
        ]);

        let config = Config::resolve(cli, toml_config);
        assert_eq!(config.listen, "127.0.0.1:4000");
        assert_eq!(config.binary, BinaryPolicy::Drop);
        // log level was left at its default on the command line
        assert_eq!(config.log_level, "warn");
    }

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_missing_config_file_error() {
        let cli = CliArgs::parse_from([
            "echo-socket",
            "--config",
            "/nonexistent/echo-socket.toml",
        ]);
        match Config::from_cli(cli) {
            Err(err @ ConfigError::FileRead(..)) => assert!(err
                .to_string()
                .starts_with("Failed to read config file '/nonexistent/echo-socket.toml'")),
            other => panic!("expected FileRead, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_config_file_error() {
        let file = write_config("[server\nlisten = ");
        let path = file.path().to_str().unwrap();
        let cli = CliArgs::parse_from(["echo-socket", "--config", path]);
        match Config::from_cli(cli) {
            Err(ConfigError::TomlParse(failed, _)) => assert_eq!(failed, file.path()),
            other => panic!("expected TomlParse, got {other:?}"),
        }
    }

    #[test]
    fn test_config_file_overrides_defaults() {
        let file = write_config(
            r#"
            [server]
            listen = "127.0.0.1:4100"
            max_connections = 8

            [websocket]
            handshake_timeout = 3
            binary = "echo"
        "#,
        );
        let path = file.path().to_str().unwrap();
        let cli = CliArgs::parse_from(["echo-socket", "-c", path, "--max-connections", "2"]);

        let config = Config::from_cli(cli).unwrap();
        assert_eq!(config.listen, "127.0.0.1:4100");
        assert_eq!(config.max_connections, 2);
        assert_eq!(config.handshake_timeout, Duration::from_secs(3));
        assert_eq!(config.binary, BinaryPolicy::Echo);
        assert_eq!(config.max_message_size, 16 * 1024 * 1024);
    }

    #[test]
    fn test_zero_max_connections_rejected() {
        let cli = CliArgs::parse_from(["echo-socket", "--max-connections", "0"]);
        assert!(matches!(
            Config::from_cli(cli),
            Err(ConfigError::MaxConnections(0))
        ));
    }

    #[test]
    fn test_max_connections_above_semaphore_limit_rejected() {
        let too_many = Semaphore::MAX_PERMITS + 1;
        let cli = CliArgs::parse_from([
            "echo-socket".to_string(),
            "--max-connections".to_string(),
            too_many.to_string(),
        ]);
        assert!(matches!(
            Config::from_cli(cli),
            Err(ConfigError::MaxConnections(n)) if n == too_many
        ));

        let cli = CliArgs::parse_from([
            "echo-socket".to_string(),
            "--max-connections".to_string(),
            Semaphore::MAX_PERMITS.to_string(),
        ]);
        assert!(Config::from_cli(cli).is_ok());
    }

    #[test]
    fn test_zero_handshake_timeout_rejected() {
        let file = write_config("[websocket]\nhandshake_timeout = 0\n");
        let path = file.path().to_str().unwrap();
        let cli = CliArgs::parse_from(["echo-socket", "-c", path]);
        assert!(matches!(
            Config::from_cli(cli),
            Err(ConfigError::HandshakeTimeout)
        ));
    }
}
