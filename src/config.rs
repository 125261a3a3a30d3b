//! Configuration structures for service-bootstrap
//!
//! The bootstrap reads one immutable [`BootstrapConfig`] snapshot at startup:
//! built-in defaults, then an optional YAML file, then the process environment
//! for the database connection and the run-mode flag. Everything else in the
//! environment belongs to the dispatched service and is passed through as is.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::validation::{
    validate_command, validate_host_port, validate_not_blank, validate_numeric_range,
};

/// Environment variable selecting the development run mode
pub const DEV_MODE_ENV: &str = "DEV_MODE";

/// Environment variable overriding the Kafka bootstrap servers
pub const KAFKA_BOOTSTRAP_SERVERS_ENV: &str = "KAFKA_BOOTSTRAP_SERVERS";

// =============================================================================
// Connection parameters
// =============================================================================

/// Database connection parameters, read from `DB_*` environment variables
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionParameters {
    pub name: String,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub host: String,
    pub port: u16,
}

impl ConnectionParameters {
    /// Build from an environment lookup (`DB_NAME`, `DB_USER`, `DB_PASSWORD`,
    /// `DB_HOST`, `DB_PORT`)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = match lookup("DB_PORT").filter(|p| !p.trim().is_empty()) {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidValue {
                    field: "DB_PORT".to_string(),
                    value: raw.clone(),
                })?,
            None => default_db_port(),
        };

        Ok(Self {
            name: lookup("DB_NAME").unwrap_or_default(),
            user: lookup("DB_USER").unwrap_or_default(),
            password: lookup("DB_PASSWORD").unwrap_or_default(),
            host: lookup("DB_HOST")
                .filter(|h| !h.trim().is_empty())
                .unwrap_or_else(default_db_host),
            port,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_not_blank(&self.host, "DB_HOST")?;
        if self.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "DB_PORT".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectionParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParameters")
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    5432
}

// =============================================================================
// Run mode
// =============================================================================

/// Launch behavior for the service process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Supervised with restart on source change
    Dev,
    /// Process image replacement
    Prod,
}

impl RunMode {
    /// Derive the run mode from a boolean-like flag value. Unset, empty and
    /// unrecognised values all mean production.
    pub fn from_flag(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("1" | "true" | "yes" | "on" | "dev") => RunMode::Dev,
            _ => RunMode::Prod,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RunMode::Dev => "DEV",
            RunMode::Prod => "PROD",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Commands
// =============================================================================

/// An external command as an argv list (`[program, arg, ...]`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandSpec(Vec<String>);

impl CommandSpec {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(argv.into_iter().map(Into::into).collect())
    }

    pub fn program(&self) -> &str {
        self.0.first().map(String::as_str).unwrap_or_default()
    }

    pub fn args(&self) -> &[String] {
        self.0.get(1..).unwrap_or_default()
    }

    pub fn argv(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" "))
    }
}

// =============================================================================
// File sections
// =============================================================================

/// Readiness gate settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessConfig {
    /// Fixed backoff between probe attempts (default: 1, range: 1-60)
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,

    /// Per-attempt connect timeout (default: 5, range: 1-300)
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl ReadinessConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Migration applier settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Upgrade-to-latest command
    #[serde(default = "default_migration_command")]
    pub command: CommandSpec,
}

/// The long-running service process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_command")]
    pub command: CommandSpec,
}

/// Development supervisor settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Paths watched recursively for source changes
    #[serde(default = "default_watch_paths")]
    pub paths: Vec<PathBuf>,

    /// File extensions that trigger a restart (empty = any file)
    #[serde(default = "default_watch_extensions")]
    pub extensions: Vec<String>,

    /// Quiet period that coalesces bursts of change events (default: 500, range: 50-10000)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Time a child gets to exit after SIGINT before SIGKILL (default: 5, range: 1-120)
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

/// Optional Kafka readiness gate, disabled by default
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KafkaConfig {
    #[serde(default)]
    pub enabled: bool,

    /// `host:port` addresses that must all accept a TCP connection
    #[serde(default)]
    pub bootstrap_servers: Vec<String>,

    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
}

/// On-disk YAML layout. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub readiness: ReadinessConfig,
    pub migration: MigrationConfig,
    pub service: ServiceConfig,
    pub watch: WatchConfig,
    pub kafka: KafkaConfig,
}

fn default_retry_interval_secs() -> u64 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_migration_command() -> CommandSpec {
    CommandSpec::new(["alembic", "upgrade", "head"])
}

fn default_service_command() -> CommandSpec {
    CommandSpec::new(["python", "-m", "src.core.entrypoint"])
}

fn default_watch_paths() -> Vec<PathBuf> {
    vec![PathBuf::from("src")]
}

fn default_watch_extensions() -> Vec<String> {
    vec!["py".to_string()]
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_grace_period_secs() -> u64 {
    5
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            retry_interval_secs: default_retry_interval_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            command: default_migration_command(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            command: default_service_command(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            paths: default_watch_paths(),
            extensions: default_watch_extensions(),
            debounce_ms: default_debounce_ms(),
            grace_period_secs: default_grace_period_secs(),
        }
    }
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bootstrap_servers: Vec::new(),
            retry_interval_secs: default_retry_interval_secs(),
        }
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Complete, validated bootstrap configuration
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapConfig {
    pub connection: ConnectionParameters,
    pub run_mode: RunMode,
    pub readiness: ReadinessConfig,
    pub migration: MigrationConfig,
    pub service: ServiceConfig,
    pub watch: WatchConfig,
    pub kafka: KafkaConfig,
}

impl BootstrapConfig {
    /// Load from the real process environment and an optional YAML file
    pub fn load(path: Option<&Path>, force_dev: bool) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => read_file_config(path)?,
            None => FileConfig::default(),
        };
        Self::from_parts(file, |key| std::env::var(key).ok(), force_dev)
    }

    /// Combine a parsed file with an environment lookup, then validate
    pub fn from_parts<F>(file: FileConfig, lookup: F, force_dev: bool) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let connection = ConnectionParameters::from_lookup(&lookup)?;

        let run_mode = if force_dev {
            RunMode::Dev
        } else {
            RunMode::from_flag(lookup(DEV_MODE_ENV).as_deref())
        };

        // With the gate disabled the value belongs to the service alone
        let mut kafka = file.kafka;
        if kafka.enabled {
            if let Some(raw) = lookup(KAFKA_BOOTSTRAP_SERVERS_ENV) {
                let servers = parse_server_list(&raw)?;
                if !servers.is_empty() {
                    kafka.bootstrap_servers = servers;
                }
            }
        }

        let config = Self {
            connection,
            run_mode,
            readiness: file.readiness,
            migration: file.migration,
            service: file.service,
            watch: file.watch,
            kafka,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values are within reasonable bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.connection.validate()?;

        validate_numeric_range(
            self.readiness.retry_interval_secs,
            "readiness.retry_interval_secs",
            1,
            60,
        )?;
        validate_numeric_range(
            self.readiness.connect_timeout_secs,
            "readiness.connect_timeout_secs",
            1,
            300,
        )?;

        validate_command(self.migration.command.argv(), "migration.command")?;
        validate_command(self.service.command.argv(), "service.command")?;

        if self.run_mode == RunMode::Dev {
            if self.watch.paths.is_empty() {
                return Err(ConfigError::MissingField {
                    field: "watch.paths".to_string(),
                });
            }
            validate_numeric_range(self.watch.debounce_ms, "watch.debounce_ms", 50, 10_000)?;
            validate_numeric_range(
                self.watch.grace_period_secs,
                "watch.grace_period_secs",
                1,
                120,
            )?;
        }

        if self.kafka.enabled {
            if self.kafka.bootstrap_servers.is_empty() {
                return Err(ConfigError::MissingField {
                    field: "kafka.bootstrap_servers".to_string(),
                });
            }
            for (i, server) in self.kafka.bootstrap_servers.iter().enumerate() {
                validate_host_port(server, &format!("kafka.bootstrap_servers[{}]", i))?;
            }
            validate_numeric_range(
                self.kafka.retry_interval_secs,
                "kafka.retry_interval_secs",
                1,
                60,
            )?;
        }

        Ok(())
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;

    // An empty file is a valid "all defaults" config
    if content.trim().is_empty() {
        return Ok(FileConfig::default());
    }

    serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Parse a server list given either as a JSON array or comma-separated
fn parse_server_list(raw: &str) -> Result<Vec<String>, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.starts_with('[') {
        return serde_json::from_str::<Vec<String>>(trimmed).map_err(|e| {
            ConfigError::InvalidValue {
                field: KAFKA_BOOTSTRAP_SERVERS_ENV.to_string(),
                value: format!("{} ({})", raw, e),
            }
        });
    }

    Ok(trimmed
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}
