//! Credential files and per-service fallback chains.
//!
//! Every service owns one canonical JSON file under the credentials
//! directory. When it is missing, a declared chain of other files is tried
//! in order (the service's legacy home-directory file, then the files of the
//! services it falls back to). The first hit is copied to the canonical
//! location so later runs read it directly.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::CredentialsConfig;
use crate::paths::AppPaths;
use crate::{CoreError, Result};

/// A platform service with its own credential file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    /// Calendar events.
    Calendar,
    /// Drive files and documents.
    Drive,
    /// Task management.
    Task,
    /// Interactive chat cards.
    Card,
    /// Image analysis (static API key, no token exchange).
    Vision,
}

impl Service {
    /// All services, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Calendar,
        Self::Drive,
        Self::Task,
        Self::Card,
        Self::Vision,
    ];

    /// Lowercase service name, used for file names and config keys.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Calendar => "calendar",
            Self::Drive => "drive",
            Self::Task => "task",
            Self::Card => "card",
            Self::Vision => "vision",
        }
    }

    /// File names in the home directory written by older tooling.
    #[must_use]
    pub const fn legacy_file_names(self) -> &'static [&'static str] {
        match self {
            Self::Calendar => &[
                ".feishu_calendar_config.json",
                ".feishu_assistant_config.json",
            ],
            Self::Drive => &[".feishu_drive_config.json"],
            Self::Task => &[".feishu_task_config.json"],
            Self::Card => &[".feishu_card_config.json"],
            Self::Vision => &[".volcengine_config.json"],
        }
    }

    /// Services whose credentials may stand in when this one has none.
    #[must_use]
    pub const fn default_fallbacks(self) -> &'static [Self] {
        match self {
            Self::Drive => &[Self::Calendar],
            Self::Card => &[Self::Drive, Self::Calendar, Self::Task],
            Self::Calendar | Self::Task | Self::Vision => &[],
        }
    }

    /// Whether `fsk init` must resolve the user's `open_id` for this service.
    #[must_use]
    pub const fn requires_open_id(self) -> bool {
        matches!(self, Self::Calendar | Self::Task)
    }

    /// Whether the service authenticates with an app id/secret exchange.
    #[must_use]
    pub const fn uses_token_exchange(self) -> bool {
        !matches!(self, Self::Vision)
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Service {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|svc| svc.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CoreError::Config(format!("unknown service: {s}")))
    }
}

/// A credential file format.
pub trait CredentialFile: Serialize + DeserializeOwned {
    /// Whether the loaded values are usable. Incomplete files count as absent.
    fn is_complete(&self) -> bool;
}

/// App id/secret pair for one tenant, with the optional resolved user.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Application id.
    #[serde(rename = "app_id", alias = "client_id")]
    pub client_id: String,
    /// Application secret.
    #[serde(rename = "app_secret", alias = "client_secret")]
    pub client_secret: String,
    /// Pre-resolved `open_id` of the person the tools act for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_id: Option<String>,
    /// Mobile number used to resolve `open_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl Credentials {
    /// Create credentials from an app id and secret.
    #[must_use]
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            open_id: None,
            phone: None,
        }
    }

    /// Attach the resolved user id.
    #[must_use]
    pub fn with_open_id(mut self, open_id: impl Into<String>) -> Self {
        self.open_id = Some(open_id.into());
        self
    }

    /// Attach the mobile number.
    #[must_use]
    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    /// The resolved user id, or a configuration error naming what is missing.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Config` when no `open_id` was stored.
    pub fn require_open_id(&self) -> Result<&str> {
        self.open_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                CoreError::Config("no open_id stored - run 'fsk init' with a phone number".into())
            })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("open_id", &self.open_id)
            .field("phone", &self.phone)
            .finish()
    }
}

impl CredentialFile for Credentials {
    fn is_complete(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.client_secret.trim().is_empty()
    }
}

/// Static API key credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyCredentials {
    /// Bearer key sent as-is.
    #[serde(rename = "ark_api_key", alias = "api_key")]
    pub api_key: String,
}

impl fmt::Debug for ApiKeyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeyCredentials")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl CredentialFile for ApiKeyCredentials {
    fn is_complete(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

/// Read a credential file. Missing, unreadable, malformed or incomplete
/// files all yield `None`.
#[must_use]
pub fn load<T: CredentialFile>(path: &Path) -> Option<T> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            log::warn!("cannot read credentials {}: {e}", path.display());
            return None;
        }
    };

    match serde_json::from_str::<T>(&content) {
        Ok(creds) if creds.is_complete() => Some(creds),
        Ok(_) => {
            log::warn!("ignoring incomplete credentials in {}", path.display());
            None
        }
        Err(e) => {
            log::warn!("ignoring malformed credentials in {}: {e}", path.display());
            None
        }
    }
}

/// Write a credential file as pretty JSON, readable only by the owner on Unix.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be written.
pub fn persist<T: CredentialFile>(path: &Path, creds: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(creds)?;
    fs::write(path, json)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

/// Ordered credential sources for one service.
#[derive(Debug, Clone)]
pub struct CredentialChain {
    service: Service,
    canonical: PathBuf,
    fallbacks: Vec<PathBuf>,
    migrate: bool,
}

impl CredentialChain {
    /// A chain with only the canonical file.
    #[must_use]
    pub fn new(service: Service, canonical: impl Into<PathBuf>) -> Self {
        Self {
            service,
            canonical: canonical.into(),
            fallbacks: Vec::new(),
            migrate: true,
        }
    }

    /// Whether a fallback hit is copied to the canonical path. On by default;
    /// dry runs turn it off so loading never writes.
    #[must_use]
    pub fn with_migration(mut self, migrate: bool) -> Self {
        self.migrate = migrate;
        self
    }

    /// Append a fallback source.
    #[must_use]
    pub fn with_fallback(mut self, path: impl Into<PathBuf>) -> Self {
        self.fallbacks.push(path.into());
        self
    }

    /// Build the declared chain for `service`.
    ///
    /// Order: canonical file, the service's legacy files, then for each
    /// fallback service its canonical and legacy files.
    #[must_use]
    pub fn for_service(service: Service, paths: &AppPaths, cfg: &CredentialsConfig) -> Self {
        let canonical_of = |svc: Service| paths.credentials_dir.join(format!("{}.json", svc.name()));
        let legacy_of = |svc: Service| -> Vec<PathBuf> {
            match (&paths.home_dir, cfg.legacy_files) {
                (Some(home), true) => svc
                    .legacy_file_names()
                    .iter()
                    .map(|name| home.join(name))
                    .collect(),
                _ => Vec::new(),
            }
        };

        let mut chain = Self::new(service, canonical_of(service));
        chain.fallbacks.extend(legacy_of(service));

        let fallback_services = cfg
            .fallbacks_for(service)
            .unwrap_or_else(|| service.default_fallbacks());
        for &other in fallback_services {
            if other == service {
                continue;
            }
            chain.fallbacks.push(canonical_of(other));
            chain.fallbacks.extend(legacy_of(other));
        }

        chain
    }

    /// The service this chain belongs to.
    #[must_use]
    pub const fn service(&self) -> Service {
        self.service
    }

    /// Where the service's own credentials live.
    #[must_use]
    pub fn canonical(&self) -> &Path {
        &self.canonical
    }

    /// All sources in the order they are tried.
    pub fn sources(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.canonical.as_path()).chain(self.fallbacks.iter().map(PathBuf::as_path))
    }

    /// Load from the first usable source.
    ///
    /// A hit on a fallback source is copied to the canonical path unless
    /// migration is off; failing to write the copy is logged and does not
    /// fail the load.
    #[must_use]
    pub fn load<T: CredentialFile>(&self) -> Option<T> {
        if let Some(creds) = load(&self.canonical) {
            return Some(creds);
        }

        for source in &self.fallbacks {
            let Some(creds) = load::<T>(source) else {
                continue;
            };
            log::info!(
                "{} credentials not found at {}, using {}",
                self.service,
                self.canonical.display(),
                source.display()
            );
            if !self.migrate {
                log::info!(
                    "dry-run: would copy {} credentials to {}",
                    self.service,
                    self.canonical.display()
                );
                return Some(creds);
            }
            match persist(&self.canonical, &creds) {
                Ok(()) => log::info!(
                    "copied {} credentials to {}",
                    self.service,
                    self.canonical.display()
                ),
                Err(e) => log::warn!(
                    "could not copy credentials to {}: {e}",
                    self.canonical.display()
                ),
            }
            return Some(creds);
        }

        None
    }

    /// Load credentials or fail with a configuration error.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Config` when no source yields usable credentials.
    pub fn require<T: CredentialFile>(&self) -> Result<T> {
        self.load().ok_or_else(|| {
            CoreError::Config(format!(
                "no {} credentials found (looked in {}) - run 'fsk init {}'",
                self.service,
                self.sources()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
                self.service
            ))
        })
    }

    /// Store credentials at the canonical path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn store<T: CredentialFile>(&self, creds: &T) -> Result<()> {
        persist(&self.canonical, creds)?;
        log::info!(
            "stored {} credentials at {}",
            self.service,
            self.canonical.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, body: &str) {
        fs::write(path, body).expect("write fixture");
    }

    #[test]
    fn missing_file_is_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(load::<Credentials>(&dir.path().join("nope.json")).is_none());
    }

    #[test]
    fn malformed_or_incomplete_file_is_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bad = dir.path().join("bad.json");
        write(&bad, "{not json");
        assert!(load::<Credentials>(&bad).is_none());

        let empty = dir.path().join("empty.json");
        write(&empty, r#"{"app_id": "", "app_secret": "s"}"#);
        assert!(load::<Credentials>(&empty).is_none());
    }

    #[test]
    fn accepts_platform_and_generic_field_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = dir.path().join("a.json");
        write(&a, r#"{"app_id": "X", "app_secret": "Y", "open_id": "ou_1", "phone": "123"}"#);
        let creds: Credentials = load(&a).expect("loaded");
        assert_eq!(creds.client_id, "X");
        assert_eq!(creds.open_id.as_deref(), Some("ou_1"));

        let b = dir.path().join("b.json");
        write(&b, r#"{"client_id": "X", "client_secret": "Y"}"#);
        let creds: Credentials = load(&b).expect("loaded");
        assert_eq!(creds, Credentials::new("X", "Y"));
    }

    #[test]
    fn fallback_hit_is_persisted_to_canonical_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let canonical = dir.path().join("creds").join("drive.json");
        let absent = dir.path().join("a.json");
        let present = dir.path().join("b.json");
        write(&present, r#"{"app_id": "X", "app_secret": "Y"}"#);

        let chain = CredentialChain::new(Service::Drive, &canonical)
            .with_fallback(&absent)
            .with_fallback(&present);

        let creds: Credentials = chain.load().expect("loaded from fallback");
        assert_eq!(creds, Credentials::new("X", "Y"));

        let copied: Credentials = load(&canonical).expect("persisted");
        assert_eq!(copied, creds);
    }

    #[test]
    fn fallback_hit_without_migration_leaves_canonical_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let canonical = dir.path().join("creds").join("drive.json");
        let absent = dir.path().join("a.json");
        let present = dir.path().join("b.json");
        write(&present, r#"{"app_id": "X", "app_secret": "Y"}"#);

        let chain = CredentialChain::new(Service::Drive, &canonical)
            .with_fallback(&absent)
            .with_fallback(&present)
            .with_migration(false);

        let creds: Credentials = chain.load().expect("loaded from fallback");
        assert_eq!(creds, Credentials::new("X", "Y"));
        assert!(!canonical.exists());
        assert!(!canonical.parent().expect("parent").exists());
    }

    #[test]
    fn canonical_file_wins_over_fallbacks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let canonical = dir.path().join("card.json");
        let other = dir.path().join("drive.json");
        write(&canonical, r#"{"app_id": "own", "app_secret": "s"}"#);
        write(&other, r#"{"app_id": "other", "app_secret": "s"}"#);

        let chain = CredentialChain::new(Service::Card, &canonical).with_fallback(&other);
        let creds: Credentials = chain.load().expect("loaded");
        assert_eq!(creds.client_id, "own");
    }

    #[test]
    fn require_reports_configuration_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let chain = CredentialChain::new(Service::Task, dir.path().join("task.json"));
        let err = chain.require::<Credentials>().expect_err("nothing configured");
        assert!(err.is_configuration());
    }

    #[test]
    fn declared_chain_follows_service_fallbacks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths {
            config_file: dir.path().join("config.toml"),
            credentials_dir: dir.path().join("credentials"),
            home_dir: Some(dir.path().join("home")),
        };
        let chain = CredentialChain::for_service(Service::Card, &paths, &CredentialsConfig::default());
        let sources: Vec<PathBuf> = chain.sources().map(Path::to_path_buf).collect();

        assert_eq!(sources[0], paths.credentials_dir.join("card.json"));
        assert_eq!(sources[1], dir.path().join("home").join(".feishu_card_config.json"));
        assert_eq!(sources[2], paths.credentials_dir.join("drive.json"));
        assert!(sources.contains(&paths.credentials_dir.join("task.json")));

        let mut cfg = CredentialsConfig {
            legacy_files: false,
            ..CredentialsConfig::default()
        };
        cfg.fallbacks.insert("card".into(), vec![Service::Task]);
        let chain = CredentialChain::for_service(Service::Card, &paths, &cfg);
        let sources: Vec<PathBuf> = chain.sources().map(Path::to_path_buf).collect();
        assert_eq!(
            sources,
            vec![
                paths.credentials_dir.join("card.json"),
                paths.credentials_dir.join("task.json"),
            ]
        );
    }

    #[test]
    fn debug_output_hides_secrets() {
        let creds = Credentials::new("X", "super-secret");
        assert!(!format!("{creds:?}").contains("super-secret"));
        let key = ApiKeyCredentials { api_key: "ark-key".into() };
        assert!(!format!("{key:?}").contains("ark-key"));
    }

    #[test]
    fn parses_service_names() {
        assert_eq!("Drive".parse::<Service>().expect("parse"), Service::Drive);
        assert!("mail".parse::<Service>().is_err());
        assert!(!Service::Vision.uses_token_exchange());
    }
}
