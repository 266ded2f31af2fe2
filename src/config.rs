//! Configuration management for wharf-ftpd
//!
//! Separates startup configuration (requires restart) from runtime configuration
//! (bandwidth ceilings, updatable through `SITE LIMITBANDWIDTH`).

use config::{Config, Environment, File};
use serde::Deserialize;
use std::net::IpAddr;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::error::ConfigError;

/// Sentinel disabling a bandwidth ceiling. Any value `<= 0` is treated the same way.
pub const NO_LIMIT: i64 = -1;

/// Complete server configuration with startup/runtime separation
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ServerConfig {
    #[serde(flatten)]
    pub startup: StartupConfig,

    #[serde(flatten)]
    pub runtime: RuntimeConfig,
}

/// Configuration that requires server restart to take effect
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StartupConfig {
    // ═══ NETWORK INFRASTRUCTURE ═══
    /// IP address to bind the FTP control connection
    pub bind_address: String,

    /// Port for FTP control connection
    pub control_port: u16,

    /// Address published in 227 replies. Defaults to the control connection's local IP.
    pub passive_address: Option<IpAddr>,

    /// Inclusive port range for PASV/EPSV data listeners
    pub passive_port_min: u16,
    pub passive_port_max: u16,

    /// Base directory; every user root lives below it
    pub server_root: String,

    // ═══ INTERNAL BEHAVIOR ═══
    /// Bytes moved per block during a transfer
    pub block_size: usize,

    /// How long a transfer waits for its data connection
    pub data_timeout_secs: u64,

    /// Control connections idle for longer than this are closed with 421
    pub idle_timeout_secs: u64,

    /// Grace period given to running transfers on shutdown
    pub shutdown_grace_secs: u64,

    pub max_command_length: usize,
    pub max_clients: usize,

    // ═══ ADMINISTRATION & SECURITY ═══
    /// Password required by `SITE INTERNALSHUTDOWN`; shutdown is refused when unset
    pub admin_password: Option<String>,

    /// Whether CCC may drop the control channel back to cleartext
    pub allow_ccc: bool,

    pub tls_cert_file: Option<PathBuf>,
    pub tls_key_file: Option<PathBuf>,

    pub users: Vec<UserConfig>,
}

/// One entry of the built-in user table
#[derive(Debug, Deserialize, Clone, Default)]
pub struct UserConfig {
    pub name: String,
    pub password: String,

    /// Accounts the user may select with ACCT. Empty means login completes at PASS.
    #[serde(default)]
    pub accounts: Vec<String>,

    #[serde(default)]
    pub admin: bool,

    /// Overrides the derived `/user[/account]` root
    #[serde(default)]
    pub root: Option<String>,
}

/// Bandwidth ceilings in bytes per second, changeable while the server runs
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub global_read_limit: i64,
    pub global_write_limit: i64,
    pub session_read_limit: i64,
    pub session_write_limit: i64,
}

/// Thread-safe runtime configuration wrapper
pub type SharedRuntimeConfig = Arc<RwLock<RuntimeConfig>>;

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            control_port: 2121,
            passive_address: None,
            passive_port_min: 50000,
            passive_port_max: 50100,
            server_root: "./server_root".to_string(),
            block_size: 8192,
            data_timeout_secs: 30,
            idle_timeout_secs: 300,
            shutdown_grace_secs: 10,
            max_command_length: 512,
            max_clients: 50,
            admin_password: None,
            allow_ccc: false,
            tls_cert_file: None,
            tls_key_file: None,
            users: Vec::new(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            global_read_limit: NO_LIMIT,
            global_write_limit: NO_LIMIT,
            session_read_limit: NO_LIMIT,
            session_write_limit: NO_LIMIT,
        }
    }
}

impl ServerConfig {
    /// Load configuration with `WHARF_FTP_*` environment overrides.
    ///
    /// Without an explicit path, `/etc/wharf-ftpd/config.toml` and then
    /// `./config.toml` are merged when present.
    pub fn load(path: Option<&Path>, root_override: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        builder = match path {
            Some(path) => builder.add_source(File::from(path)),
            None => builder
                .add_source(File::with_name("/etc/wharf-ftpd/config").required(false))
                .add_source(File::with_name("config").required(false)),
        };
        builder = builder.add_source(
            Environment::with_prefix("WHARF_FTP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );
        if let Some(root) = root_override {
            builder = builder.set_override("server_root", root)?;
        }

        let config: ServerConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Split into startup (immutable) and runtime (mutable) parts
    pub fn split(self) -> (StartupConfig, SharedRuntimeConfig) {
        let runtime = Arc::new(RwLock::new(self.runtime));
        (self.startup, runtime)
    }

    /// Validation for all configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let startup = &self.startup;
        if startup.passive_port_min == 0 || startup.passive_port_min > startup.passive_port_max {
            return Err(ConfigError::Invalid(format!(
                "invalid passive port range {}-{}",
                startup.passive_port_min, startup.passive_port_max
            )));
        }
        if startup.block_size == 0 {
            return Err(ConfigError::Invalid("block_size must be greater than 0".into()));
        }
        if startup.server_root.is_empty() {
            return Err(ConfigError::Invalid("server_root cannot be empty".into()));
        }
        if startup.max_clients == 0 {
            return Err(ConfigError::Invalid("max_clients must be greater than 0".into()));
        }
        if startup.tls_cert_file.is_some() != startup.tls_key_file.is_some() {
            return Err(ConfigError::Invalid(
                "tls_cert_file and tls_key_file must be set together".into(),
            ));
        }
        Ok(())
    }
}

impl StartupConfig {
    /// Bind address and control port as a socket address string
    pub fn control_socket(&self) -> String {
        format!("{}:{}", self.bind_address, self.control_port)
    }

    pub fn passive_port_range(&self) -> RangeInclusive<u16> {
        self.passive_port_min..=self.passive_port_max
    }

    pub fn server_root_path(&self) -> PathBuf {
        PathBuf::from(&self.server_root)
    }

    pub fn data_timeout(&self) -> Duration {
        Duration::from_secs(self.data_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_cert_file.is_some() && self.tls_key_file.is_some()
    }
}
