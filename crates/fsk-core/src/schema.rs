//! JSON schema and example config generation.
//!
//! Both are derived from `AppConfig`, so `fsk config generate` always
//! matches the loader. `--check` compares an existing directory instead of
//! writing to it.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use schemars::Schema;
use schemars::generate::SchemaSettings;
use serde_json::json;

use crate::config::AppConfig;

/// Generated schema filename.
pub const SCHEMA_FILENAME: &str = "config.schema.json";

/// Generated config filename.
pub const CONFIG_FILENAME: &str = "config.toml";

/// Generate the JSON schema for `AppConfig`.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn generate_schema(project_name: &str, repo_url: &str) -> Result<String> {
    // draft-07 has the widest TOML editor support
    let generator = SchemaSettings::draft07().into_generator();
    let mut schema: Schema = generator.into_root_schema_for::<AppConfig>();

    schema.insert(
        "$id".to_string(),
        json!(format!("{repo_url}/schemas/{SCHEMA_FILENAME}")),
    );
    schema.insert(
        "title".to_string(),
        json!(format!("{project_name} configuration")),
    );
    schema.insert(
        "description".to_string(),
        json!(format!(
            "Configuration schema for {project_name}, the Feishu open platform toolkit"
        )),
    );

    if let Some(props) = schema.get_mut("properties")
        && let Some(props_obj) = props.as_object_mut()
    {
        props_obj.insert(
            "$schema".to_string(),
            json!({
                "type": "string",
                "description": "JSON Schema reference for editor support"
            }),
        );
    }

    serde_json::to_string_pretty(&schema).context("serializing JSON schema")
}

/// Generate the example TOML configuration from the default `AppConfig`.
///
/// # Errors
///
/// Returns an error if TOML serialization fails.
pub fn generate_example_config(project_name: &str, repo_url: &str) -> Result<String> {
    let toml_body = toml::to_string_pretty(&AppConfig::default())
        .context("serializing default config to TOML")?;

    let mut output = String::new();
    let _ = write!(
        output,
        r#""$schema" = "{repo_url}/schemas/{SCHEMA_FILENAME}"

# Configuration for {project_name}.
# Copy this file to $XDG_CONFIG_HOME/{project_name}/config.toml and adjust as needed.
# App credentials are not stored here; run '{project_name} init <service>'.

"#
    );
    output.push_str(&toml_body);

    Ok(output)
}

/// Write the schema and example config into `output_dir`.
///
/// # Errors
///
/// Returns an error if directory creation or file writing fails.
pub fn write_generated_files(output_dir: &Path, project_name: &str, repo_url: &str) -> Result<()> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("creating output directory: {}", output_dir.display()))?;

    for (name, body) in generated_files(project_name, repo_url)? {
        let path = output_dir.join(name);
        fs::write(&path, body).with_context(|| format!("writing {}", path.display()))?;
    }

    Ok(())
}

/// Check that `dir` holds up-to-date generated files.
///
/// # Errors
///
/// Returns an error listing every missing or stale file.
pub fn check_generated_files(dir: &Path, project_name: &str, repo_url: &str) -> Result<()> {
    let mut errors = Vec::new();

    for (name, expected) in generated_files(project_name, repo_url)? {
        let path = dir.join(name);
        if !path.exists() {
            errors.push(format!("{} does not exist", path.display()));
            continue;
        }
        let existing =
            fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        if existing != expected {
            errors.push(format!("{} is out of date", path.display()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        anyhow::bail!(
            "generated files need updating (run '{project_name} config generate'):\n  - {}",
            errors.join("\n  - ")
        )
    }
}

fn generated_files(project_name: &str, repo_url: &str) -> Result<[(&'static str, String); 2]> {
    Ok([
        (SCHEMA_FILENAME, generate_schema(project_name, repo_url)?),
        (CONFIG_FILENAME, generate_example_config(project_name, repo_url)?),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{APP_NAME, REPO_URL};

    #[test]
    fn schema_describes_all_sections() {
        let schema = generate_schema(APP_NAME, REPO_URL).expect("schema generation failed");
        assert!(schema.contains("fsk configuration"));
        assert!(schema.contains("\"$schema\""));
        for section in ["logging", "platform", "credentials", "calendar", "task", "card", "vision"] {
            assert!(schema.contains(&format!("\"{section}\"")), "missing {section}");
        }
    }

    #[test]
    fn example_config_loads() {
        let config = generate_example_config(APP_NAME, REPO_URL).expect("config generation failed");
        assert!(config.contains("[platform]"));
        assert!(config.contains("[calendar]"));

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILENAME);
        fs::write(&path, &config).expect("write");
        let loaded = AppConfig::load_from_path(&path).expect("load");
        assert_eq!(loaded.task.page_size, 20);
        assert!(loaded.schema.is_some());
    }

    #[test]
    fn check_detects_stale_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(check_generated_files(dir.path(), APP_NAME, REPO_URL).is_err());

        write_generated_files(dir.path(), APP_NAME, REPO_URL).expect("write");
        check_generated_files(dir.path(), APP_NAME, REPO_URL).expect("fresh files pass");

        fs::write(dir.path().join(CONFIG_FILENAME), "# edited\n").expect("edit");
        let err = check_generated_files(dir.path(), APP_NAME, REPO_URL).expect_err("stale");
        assert!(err.to_string().contains("out of date"));
    }
}
