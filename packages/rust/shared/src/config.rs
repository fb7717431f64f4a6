//! Application configuration for the EPPN coordination core.
//!
//! User config lives at `~/.eppn/eppn.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EppnError, Result};
use crate::types::{ParticipantId, Role};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "eppn.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".eppn";

// ---------------------------------------------------------------------------
// Config structs (matching eppn.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Durable state location.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Addresses of the pipeline roles on the delivery substrate.
    #[serde(default)]
    pub participants: ParticipantsConfig,

    /// Routing behaviour.
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Heartbeat intervals.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Per-participant inbox settings.
    #[serde(default)]
    pub inbox: InboxConfig,
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for registry, ledger, sink logs and outbox spool.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl StorageConfig {
    /// Directory holding `registry.json` and `ledger.json`.
    pub fn registry_dir(&self) -> PathBuf {
        Path::new(&self.data_dir).join("registry")
    }

    /// Directory the sink appends its JSON-lines logs to.
    pub fn sink_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    /// Spool directory for messages addressed to external workers.
    pub fn outbox_dir(&self) -> PathBuf {
        Path::new(&self.data_dir).join("outbox")
    }
}

fn default_data_dir() -> String {
    "data".into()
}

/// `[participants]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantsConfig {
    #[serde(default = "default_ingestion")]
    pub ingestion: String,
    #[serde(default = "default_extraction")]
    pub extraction: String,
    #[serde(default = "default_summarization")]
    pub summarization: String,
    #[serde(default = "default_ethics")]
    pub ethics: String,
    #[serde(default = "default_sink")]
    pub sink: String,
    #[serde(default = "default_registry")]
    pub registry: String,
}

impl Default for ParticipantsConfig {
    fn default() -> Self {
        Self {
            ingestion: default_ingestion(),
            extraction: default_extraction(),
            summarization: default_summarization(),
            ethics: default_ethics(),
            sink: default_sink(),
            registry: default_registry(),
        }
    }
}

impl ParticipantsConfig {
    /// Resolve a role to its configured address. An empty string means the
    /// role is unassigned.
    pub fn address(&self, role: Role) -> Option<ParticipantId> {
        let addr = match role {
            Role::Ingestion => &self.ingestion,
            Role::Extraction => &self.extraction,
            Role::Summarization => &self.summarization,
            Role::Ethics => &self.ethics,
            Role::Sink => &self.sink,
            Role::Registry => &self.registry,
        };
        let addr = addr.trim();
        (!addr.is_empty()).then(|| ParticipantId::new(addr))
    }
}

fn default_ingestion() -> String {
    "ingestion-worker".into()
}
fn default_extraction() -> String {
    "extraction-worker".into()
}
fn default_summarization() -> String {
    "summarization-worker".into()
}
fn default_ethics() -> String {
    "ethics-worker".into()
}
fn default_sink() -> String {
    "sink-worker".into()
}
fn default_registry() -> String {
    "registry".into()
}

/// `[routing]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Fail at startup when a message kind has no destination, instead of
    /// dropping such messages at runtime.
    #[serde(default)]
    pub strict: bool,

    /// Upper bound on one destination's send, in milliseconds.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            strict: false,
            send_timeout_ms: default_send_timeout(),
        }
    }
}

impl RoutingConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

fn default_send_timeout() -> u64 {
    5_000
}

/// `[heartbeat]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_router_secs")]
    pub router_secs: u64,
    #[serde(default = "default_registry_secs")]
    pub registry_secs: u64,
    #[serde(default = "default_sink_secs")]
    pub sink_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            router_secs: default_router_secs(),
            registry_secs: default_registry_secs(),
            sink_secs: default_sink_secs(),
        }
    }
}

fn default_router_secs() -> u64 {
    45
}
fn default_registry_secs() -> u64 {
    60
}
fn default_sink_secs() -> u64 {
    30
}

/// `[inbox]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxConfig {
    /// Bounded queue depth per local participant.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Upper bound on handling one message, in milliseconds.
    #[serde(default = "default_handle_timeout")]
    pub handle_timeout_ms: u64,
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            handle_timeout_ms: default_handle_timeout(),
        }
    }
}

impl InboxConfig {
    pub fn handle_timeout(&self) -> Duration {
        Duration::from_millis(self.handle_timeout_ms)
    }
}

fn default_capacity() -> usize {
    64
}
fn default_handle_timeout() -> u64 {
    30_000
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.eppn/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| EppnError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.eppn/eppn.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| EppnError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content)
        .map_err(|e| EppnError::config(format!("failed to parse {}: {e}", path.display())))?;
    validate_config(&config)?;
    Ok(config)
}

/// Reject values that would make the runtime misbehave.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.storage.data_dir.trim().is_empty() {
        return Err(EppnError::config("storage.data_dir must not be empty"));
    }
    if config.inbox.capacity == 0 {
        return Err(EppnError::config("inbox.capacity must be at least 1"));
    }
    let hb = &config.heartbeat;
    if hb.router_secs == 0 || hb.registry_secs == 0 || hb.sink_secs == 0 {
        return Err(EppnError::config("heartbeat intervals must be at least 1 second"));
    }
    Ok(())
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| EppnError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content = toml::to_string_pretty(&config).map_err(|e| EppnError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| EppnError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
