//! Config file loader.

use crate::config::{validator, ProvisionConfig};
use crate::error::ConfigError;
use std::fs;
use std::path::Path;

/// Load config from a TOML file. Missing sections fall back to defaults.
pub fn load_config_from_file(path: &Path) -> Result<ProvisionConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound(path.to_path_buf())
        } else {
            ConfigError::IoError(e)
        }
    })?;

    parse_config(&content)
}

/// Parse TOML content into a config.
pub fn parse_config(content: &str) -> Result<ProvisionConfig, ConfigError> {
    let config: ProvisionConfig = toml::from_str(content)?;
    Ok(config)
}

/// Build the startup configuration: file (if any), then CLI overrides, then validation.
pub fn load(path: Option<&Path>, jobs_override: Option<usize>) -> Result<ProvisionConfig, ConfigError> {
    let config = read_with_overrides(path, jobs_override)?;
    validator::validate_config(&config)?;
    Ok(config)
}

/// Like [`load`], for `--verify-only`: nothing is cloned, so repositories may be unset.
pub fn load_for_verification(
    path: Option<&Path>,
    jobs_override: Option<usize>,
) -> Result<ProvisionConfig, ConfigError> {
    let config = read_with_overrides(path, jobs_override)?;
    validator::validate_host_settings(&config)?;
    Ok(config)
}

fn read_with_overrides(path: Option<&Path>, jobs_override: Option<usize>) -> Result<ProvisionConfig, ConfigError> {
    let mut config = match path {
        Some(path) => load_config_from_file(path)?,
        None => ProvisionConfig::default(),
    };
    if let Some(jobs) = jobs_override {
        config.jobs = jobs;
    }
    Ok(config)
}

/// Where the configuration came from, for the startup log line.
pub fn describe_source(path: Option<&Path>) -> String {
    match path {
        Some(path) => format!("Loaded configuration from {}", path.display()),
        None => "No configuration file given, using defaults".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = parse_config(
            r#"
jobs = 4

[framework]
repository = "https://example.org/rtf.git"

[tuning]
isolated_cpus = "2-3"
"#,
        )
        .unwrap();

        assert_eq!(config.jobs, 4);
        assert_eq!(config.framework.repository, "https://example.org/rtf.git");
        assert_eq!(config.framework.root_var, "RTF_ROOT");
        assert_eq!(config.tuning.isolated_cpus.as_deref(), Some("2-3"));
        assert_eq!(config.access_group, "evl");
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        let result = parse_config("jobs = [");
        assert!(matches!(result, Err(ConfigError::InvalidToml(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = load_config_from_file(&PathBuf::from("/nonexistent/rt-provision.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_applies_jobs_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provision.toml");
        fs::write(
            &path,
            "jobs = 2\n[framework]\nrepository = \"https://example.org/rtf.git\"\n",
        )
        .unwrap();

        let config = load(Some(&path), Some(6)).unwrap();
        assert_eq!(config.jobs, 6);
    }

    #[test]
    fn test_verification_load_accepts_defaults() {
        assert!(load(None, None).is_err());
        let config = load_for_verification(None, Some(2)).unwrap();
        assert_eq!(config.jobs, 2);
        assert!(config.framework.repository.is_empty());
    }

    #[test]
    fn test_describe_source() {
        let path = PathBuf::from("/etc/rt-provision.toml");
        assert_eq!(
            describe_source(Some(&path)),
            "Loaded configuration from /etc/rt-provision.toml"
        );
        assert_eq!(describe_source(None), "No configuration file given, using defaults");
    }
}
