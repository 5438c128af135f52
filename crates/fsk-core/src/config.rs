//! Configuration types and loading for the application.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use config::{Config, Environment, File, FileFormat};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::credentials::Service;
use crate::paths::{expand_str_path, write_default_config};
use crate::{AppPaths, env_prefix};

/// Default Feishu open platform API root.
pub const DEFAULT_BASE_URL: &str = "https://open.feishu.cn/open-apis";

/// Default Volcengine ARK chat completions endpoint.
pub const DEFAULT_VISION_ENDPOINT: &str = "https://ark.cn-beijing.volces.com/api/v3/chat/completions";

/// Default vision model.
pub const DEFAULT_VISION_MODEL: &str = "doubao-seed-1-6-vision-250815";

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
#[schemars(
    title = "Application Configuration",
    description = "Main configuration for the application"
)]
pub struct AppConfig {
    /// JSON Schema reference for editor support.
    #[serde(rename = "$schema", default, skip_serializing_if = "Option::is_none")]
    #[schemars(skip)]
    pub schema: Option<String>,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Runtime behavior configuration.
    pub runtime: RuntimeConfig,

    /// Open platform endpoint and token lifetime settings.
    pub platform: PlatformConfig,

    /// Credential file locations and fallback chains.
    pub credentials: CredentialsConfig,

    /// Calendar defaults.
    pub calendar: CalendarConfig,

    /// Task defaults.
    pub task: TaskConfig,

    /// Interactive card defaults.
    pub card: CardConfig,

    /// Image analysis settings.
    pub vision: VisionConfig,
}

impl AppConfig {
    /// Load configuration from file and environment, creating defaults if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read, parsed, or written.
    pub fn load(paths: &AppPaths, dry_run: bool) -> Result<Self> {
        if !paths.config_file.exists() {
            if dry_run {
                log::info!(
                    "dry-run: would create default config at {}",
                    paths.config_file.display()
                );
            } else {
                write_default_config(&paths.config_file)?;
            }
        }

        Self::load_from_path(&paths.config_file)
    }

    /// Load configuration from a specific path.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed.
    pub fn load_from_path(config_file: &Path) -> Result<Self> {
        let env_prefix = env_prefix();
        let built = Config::builder()
            .set_default("logging.level", "warn")?
            .set_default("runtime.timeout", 60_i64)?
            .set_default("platform.base_url", DEFAULT_BASE_URL)?
            .set_default("platform.token_safety_margin", 60_i64)?
            .set_default("platform.default_token_ttl", 7200_i64)?
            .add_source(
                File::from(config_file)
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(Environment::with_prefix(env_prefix.as_str()).separator("__"))
            .build()?;

        let mut config: Self = built.try_deserialize()?;

        if let Some(ref file) = config.logging.file {
            let expanded = expand_str_path(file)?;
            config.logging.file = Some(expanded.display().to_string());
        }

        Ok(config)
    }

    /// HTTP timeout for API calls.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.runtime.timeout.unwrap_or(60).max(1))
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
#[schemars(description = "Logging configuration")]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace).
    #[schemars(default = "default_log_level")]
    pub level: LogLevel,

    /// Optional path for log file output. Supports ~ and environment variables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// Log level enumeration for schema validation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only emit error-level messages.
    Error,
    /// Emit warnings and errors (default).
    #[default]
    Warn,
    /// Emit informational messages and above.
    Info,
    /// Emit debug diagnostics and above.
    Debug,
    /// Emit all messages including fine-grained traces.
    Trace,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warn => write!(f, "warn"),
            Self::Info => write!(f, "info"),
            Self::Debug => write!(f, "debug"),
            Self::Trace => write!(f, "trace"),
        }
    }
}

const fn default_log_level() -> LogLevel {
    LogLevel::Warn
}

/// Runtime behavior configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
#[schemars(description = "Runtime behavior configuration")]
pub struct RuntimeConfig {
    /// Timeout in seconds for each HTTP call (default: 60).
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 1))]
    pub timeout: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { timeout: Some(60) }
    }
}

/// Open platform settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
#[schemars(description = "Open platform endpoint and token lifetime settings")]
pub struct PlatformConfig {
    /// API root, without a trailing slash.
    pub base_url: String,

    /// Seconds subtracted from a token's reported lifetime.
    pub token_safety_margin: u64,

    /// Lifetime in seconds assumed when the token endpoint omits one.
    pub default_token_ttl: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token_safety_margin: 60,
            default_token_ttl: 7200,
        }
    }
}

/// Credential file configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
#[schemars(description = "Credential file locations and fallback chains")]
pub struct CredentialsConfig {
    /// Directory holding `<service>.json` credential files. Supports ~ and
    /// environment variables. Defaults to `$XDG_CONFIG_HOME/fsk/credentials`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,

    /// Also consider the legacy `~/.feishu_*_config.json` files.
    pub legacy_files: bool,

    /// Replace a service's fallback list, e.g. `card = ["drive"]`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fallbacks: BTreeMap<String, Vec<Service>>,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            legacy_files: true,
            fallbacks: BTreeMap::new(),
        }
    }
}

impl CredentialsConfig {
    /// Configured fallback list for `service`, if overridden.
    #[must_use]
    pub fn fallbacks_for(&self, service: Service) -> Option<&[Service]> {
        self.fallbacks
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(service.name()))
            .map(|(_, v)| v.as_slice())
    }
}

/// Calendar defaults applied when creating events.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
#[schemars(description = "Calendar defaults")]
pub struct CalendarConfig {
    /// Invite the configured user when no attendees are given.
    pub add_self_as_attendee: bool,

    /// Description used when none is given. `{summary}` is replaced.
    pub description_template: String,

    /// Event length in minutes when only a start time is given.
    pub default_duration: u32,

    /// Days shown by `calendar list`.
    pub list_days: u32,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            add_self_as_attendee: true,
            description_template: "Meeting topic: {summary}\nScheduled automatically.".to_string(),
            default_duration: 60,
            list_days: 7,
        }
    }
}

impl CalendarConfig {
    /// Render the description template for an event summary.
    #[must_use]
    pub fn render_description(&self, summary: &str) -> String {
        self.description_template.replace("{summary}", summary)
    }
}

/// Task defaults.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
#[schemars(description = "Task defaults")]
pub struct TaskConfig {
    /// Assign new tasks to the configured user when no members are given.
    pub assign_self_by_default: bool,

    /// Page size for `task list`.
    #[schemars(range(min = 1, max = 100))]
    pub page_size: u32,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            assign_self_by_default: true,
            page_size: 20,
        }
    }
}

/// Interactive card defaults.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
#[schemars(description = "Interactive card defaults")]
pub struct CardConfig {
    /// Header color template (blue, green, red, ...).
    pub template: String,

    /// How `receive_id` is interpreted (`open_id`, `user_id`, `union_id`, `email`, `chat_id`).
    pub receive_id_type: String,
}

impl Default for CardConfig {
    fn default() -> Self {
        Self {
            template: "blue".to_string(),
            receive_id_type: "open_id".to_string(),
        }
    }
}

/// Image analysis settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
#[schemars(description = "Image analysis settings")]
pub struct VisionConfig {
    /// Chat completions endpoint.
    pub endpoint: String,

    /// Model identifier.
    pub model: String,

    /// Prompt used when none is given.
    pub prompt: String,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_VISION_ENDPOINT.to_string(),
            model: DEFAULT_VISION_MODEL.to_string(),
            prompt: "What is the main content of this image?".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_defaults_when_file_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = AppConfig::load_from_path(&dir.path().join("missing.toml")).expect("load");
        assert_eq!(cfg.platform.base_url, DEFAULT_BASE_URL);
        assert_eq!(cfg.platform.token_safety_margin, 60);
        assert_eq!(cfg.request_timeout(), Duration::from_secs(60));
        assert!(cfg.credentials.legacy_files);
    }

    #[test]
    fn reads_fallback_overrides() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[credentials]\nlegacy_files = false\n\n[credentials.fallbacks]\ncard = [\"task\"]\n",
        )
        .expect("write");

        let cfg = AppConfig::load_from_path(&path).expect("load");
        assert!(!cfg.credentials.legacy_files);
        assert_eq!(cfg.credentials.fallbacks_for(Service::Card), Some(&[Service::Task][..]));
        assert_eq!(cfg.credentials.fallbacks_for(Service::Drive), None);
    }

    #[test]
    fn renders_description_template() {
        let cfg = CalendarConfig::default();
        assert_eq!(
            cfg.render_description("Standup"),
            "Meeting topic: Standup\nScheduled automatically."
        );
    }
}
