//! YAML configuration surface and validation.
//!
//! A missing file or empty document yields the defaults: a strict-mode server
//! on 0.0.0.0:8080 with the built-in masking patterns and no host access.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
    pub audit: AuditConfig,
    pub cli: CliConfig,
    pub host_access: HostAccessConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    /// Kept wide so an out-of-range value is caught by validation, not by a
    /// serde overflow error with no context.
    pub port: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub mode: String,
    pub allowed_containers: Vec<String>,
    /// container name (or "*") -> allowed command patterns
    pub exec_whitelist: HashMap<String, Vec<String>>,
    pub exec_dangerously: ExecDangerouslyConfig,
    pub permissions: PermissionsConfig,
    pub blocked_paths: BlockedPathsConfig,
    pub output_masking: OutputMaskingConfig,
    pub host_path_masking: HostPathMaskingConfig,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            mode: "strict".to_string(),
            allowed_containers: Vec::new(),
            exec_whitelist: HashMap::new(),
            exec_dangerously: ExecDangerouslyConfig::default(),
            permissions: PermissionsConfig::default(),
            blocked_paths: BlockedPathsConfig::default(),
            output_masking: OutputMaskingConfig::default(),
            host_path_masking: HostPathMaskingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecDangerouslyConfig {
    pub enabled: bool,
    /// container name (or "*") -> allowed base commands
    pub commands: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PermissionsConfig {
    pub logs: bool,
    pub inspect: bool,
    pub stats: bool,
    pub exec: bool,
    pub lifecycle: bool,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            logs: true,
            inspect: true,
            stats: true,
            exec: true,
            lifecycle: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BlockedPathsConfig {
    /// container name (or "*") -> manually blocked path globs
    pub manual: HashMap<String, Vec<String>>,
    pub auto_import: AutoImportConfig,
    pub claude_code_settings: SettingsImportConfig,
    pub gemini_settings: SettingsImportConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AutoImportConfig {
    pub enabled: bool,
    pub compose_files: Vec<String>,
    pub devcontainer_files: Vec<String>,
    pub gitignore_files: Vec<String>,
    /// Always-blocked basenames applied with container scope "*".
    /// `None` selects the mode-dependent defaults.
    pub global_patterns: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SettingsImportConfig {
    pub enabled: bool,
    pub paths: Vec<String>,
    /// Directory levels below the workspace root scanned for settings files;
    /// 0 means the root only.
    pub max_depth: usize,
}

impl Default for SettingsImportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            paths: Vec::new(),
            max_depth: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputMaskingConfig {
    pub enabled: bool,
    /// `None` selects the mode-dependent default pattern set.
    pub patterns: Option<Vec<String>>,
    pub replacement: String,
    /// Output kinds the masks apply to: "logs", "exec", "inspect".
    pub apply_to: Vec<String>,
}

impl Default for OutputMaskingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            patterns: None,
            replacement: "[MASKED]".to_string(),
            apply_to: vec!["logs".to_string(), "exec".to_string(), "inspect".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HostPathMaskingConfig {
    pub enabled: bool,
    pub replacement: String,
}

impl Default for HostPathMaskingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            replacement: "[HOST_PATH]".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    pub file: String,
    /// Event categories: tool_calls, access_denied, client_connections,
    /// security_policy.
    pub events: Vec<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            file: "dkmcp-audit.log".to_string(),
            events: vec![
                "tool_calls".to_string(),
                "access_denied".to_string(),
                "client_connections".to_string(),
                "security_policy".to_string(),
            ],
        }
    }
}

/// Settings consumed by the mirror CLI client, carried here so a shared config
/// file round-trips. The server itself never reads them.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CliConfig {
    pub server_url: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct HostAccessConfig {
    pub workspace_root: String,
    pub host_tools: HostToolsConfig,
    pub host_commands: HostCommandsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HostToolsConfig {
    pub enabled: bool,
    pub tools_dir: String,
    /// When set, only tools promoted by `dkmcp --sync` into this directory
    /// may run (secure mode). When unset, the staging dir is the approved dir
    /// (legacy mode).
    pub approved_dir: Option<String>,
    pub timeout_secs: i64,
    /// Show unpromoted staging tools in listings.
    pub list_staging: bool,
}

impl Default for HostToolsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            tools_dir: String::new(),
            approved_dir: None,
            timeout_secs: 30,
            list_staging: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HostCommandsConfig {
    pub enabled: bool,
    /// base command -> argument patterns ("status", "diff *")
    pub whitelist: HashMap<String, Vec<String>>,
    /// second, more permissive whitelist gated by the dangerously parameter
    pub dangerously: HashMap<String, Vec<String>>,
    /// full-command patterns that override both whitelists
    pub deny: Vec<String>,
    pub timeout_secs: i64,
}

impl Default for HostCommandsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            whitelist: HashMap::new(),
            dangerously: HashMap::new(),
            deny: Vec::new(),
            timeout_secs: 30,
        }
    }
}

pub const SECURITY_MODES: &[&str] = &["strict", "moderate", "permissive"];
pub const LOG_LEVELS: &[&str] = &["debug", "info", "warn", "error"];

impl Config {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = if raw.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(raw)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Structural validation. The block-list importer has its own softer
    /// error posture; everything checked here is fatal at boot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port < 1 || self.server.port > 65535 {
            return Err(ConfigError::Invalid(format!(
                "server.port must be in 1-65535, got {}",
                self.server.port
            )));
        }
        if !SECURITY_MODES.contains(&self.security.mode.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "security.mode must be one of strict/moderate/permissive, got {:?}",
                self.security.mode
            )));
        }
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "logging.level must be one of debug/info/warn/error, got {:?}",
                self.logging.level
            )));
        }
        if self.host_access.host_commands.enabled && self.host_access.workspace_root.is_empty() {
            return Err(ConfigError::Invalid(
                "host_access.workspace_root is required when host_commands.enabled is true"
                    .to_string(),
            ));
        }
        if self.host_access.host_tools.enabled && self.host_access.host_tools.timeout_secs <= 0 {
            return Err(ConfigError::Invalid(format!(
                "host_access.host_tools.timeout_secs must be positive, got {}",
                self.host_access.host_tools.timeout_secs
            )));
        }
        Ok(())
    }

    pub fn port(&self) -> u16 {
        // validate() guarantees the range
        self.server.port as u16
    }
}
