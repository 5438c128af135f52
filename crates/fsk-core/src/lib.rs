//! Core library for fsk - a Feishu (Lark) open platform toolkit.
//!
//! This crate provides:
//! - Configuration loading and management
//! - XDG-compliant path resolution
//! - Schema and example config generation
//! - Credential files with per-service fallback chains
//! - The tenant token session shared by all API wrappers
//! - Calendar, drive, task, card and contact API wrappers
//! - An image analysis client

pub mod config;
pub mod credentials;
pub mod error;
pub mod feishu;
pub mod paths;
pub mod schema;
pub mod vision;

pub use config::{AppConfig, LogLevel, LoggingConfig, RuntimeConfig};
pub use credentials::{ApiKeyCredentials, CredentialChain, Credentials, Service};
pub use error::{CoreError, Result};
pub use feishu::{FeishuClient, SessionToken, TokenSession};
pub use paths::AppPaths;
pub use schema::{check_generated_files, generate_example_config, generate_schema, write_generated_files};
pub use vision::VisionClient;

/// Application name used for config directories and environment prefix.
pub const APP_NAME: &str = "fsk";

/// Repository URL, used for schema ids.
pub const REPO_URL: &str = "https://github.com/byteowlz/fsk";

/// Returns the environment variable prefix for this application.
#[must_use]
pub fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_prefix_is_uppercase_app_name() {
        assert_eq!(env_prefix(), "FSK");
    }
}
