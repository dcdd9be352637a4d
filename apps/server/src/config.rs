//! Receiver configuration.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/tcpfile/server.toml`
//! - Windows: `%APPDATA%/tcpfile/server.toml`
//!
//! `TCPFILE_CONFIG` points at a different file.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tcpfile_receiver::{DEFAULT_PORT, DEFAULT_READ_BUFFER_SIZE, ServerConfig, SessionConfig};

/// Environment variable overriding the config file location.
const CONFIG_ENV: &str = "TCPFILE_CONFIG";

/// Receiver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// IP address to listen on.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// TCP port to listen on (0 = auto-assign).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory received files are written to.
    #[serde(default = "default_destination_dir")]
    pub destination_dir: PathBuf,

    /// Socket read size in bytes.
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,

    /// Seconds without data before a transfer is abandoned (0 = never).
    #[serde(default)]
    pub idle_timeout_secs: u64,

    /// Extra bind attempts when the address is busy.
    #[serde(default = "default_bind_retries")]
    pub bind_retries: u32,

    #[serde(default = "default_bind_retry_delay_ms")]
    pub bind_retry_delay_ms: u64,

    /// Capacity of the event channel feeding the log presenter.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

fn default_bind_address() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_destination_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_read_buffer_size() -> usize {
    DEFAULT_READ_BUFFER_SIZE
}

fn default_bind_retries() -> u32 {
    3
}

fn default_bind_retry_delay_ms() -> u64 {
    1000
}

fn default_event_channel_capacity() -> usize {
    256
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            destination_dir: default_destination_dir(),
            read_buffer_size: default_read_buffer_size(),
            idle_timeout_secs: 0,
            bind_retries: default_bind_retries(),
            bind_retry_delay_ms: default_bind_retry_delay_ms(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path()?)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Rejects values the receiver cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.bind_address
            .parse::<IpAddr>()
            .with_context(|| format!("invalid bind_address {:?}", self.bind_address))?;
        anyhow::ensure!(self.read_buffer_size > 0, "read_buffer_size must be non-zero");
        anyhow::ensure!(
            self.event_channel_capacity > 0,
            "event_channel_capacity must be non-zero"
        );
        Ok(())
    }

    /// Listening socket address.
    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        let ip: IpAddr = self
            .bind_address
            .parse()
            .with_context(|| format!("invalid bind_address {:?}", self.bind_address))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn server_config(&self) -> anyhow::Result<ServerConfig> {
        Ok(ServerConfig {
            bind_addr: self.bind_addr()?,
            bind_retries: self.bind_retries,
            bind_retry_delay: Duration::from_millis(self.bind_retry_delay_ms),
            session: SessionConfig {
                destination_dir: self.destination_dir.clone(),
                read_buffer_size: self.read_buffer_size,
                idle_timeout: (self.idle_timeout_secs > 0)
                    .then(|| Duration::from_secs(self.idle_timeout_secs)),
            },
        })
    }
}

/// Returns the configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }

    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("tcpfile")
            .join("server.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("tcpfile").join("server.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/tcpfile/server.toml"))
    }
}
