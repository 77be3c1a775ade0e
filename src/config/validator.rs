//! Config validation.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::ProvisionConfig;
use crate::error::ConfigError;

static CPU_LIST_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(-\d+)?(,\d+(-\d+)?)*$").expect("Invalid CPU list regex"));

static SHELL_IDENT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Invalid identifier regex"));

static GROUP_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_-]*$").expect("Invalid group name regex"));

/// Validate a CPU list such as `1-3` or `2,4-7`.
pub fn validate_cpu_list(list: &str) -> Result<(), ConfigError> {
    if !CPU_LIST_REGEX.is_match(list) {
        return Err(ConfigError::ValidationFailed(format!(
            "Invalid CPU list '{}': expected ranges like 1-3 or 2,4-7",
            list
        )));
    }

    for range in list.split(',') {
        if let Some((lo, hi)) = range.split_once('-') {
            let lo: u32 = lo.parse().unwrap_or(0);
            let hi: u32 = hi.parse().unwrap_or(0);
            if lo > hi {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid CPU range '{}': start exceeds end",
                    range
                )));
            }
        }
    }

    Ok(())
}

fn require_non_empty(value: &str, field: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::ValidationFailed(format!("{} must be set", field)));
    }
    Ok(())
}

/// Validate the complete configuration before anything runs.
pub fn validate_config(config: &ProvisionConfig) -> Result<(), ConfigError> {
    validate_sources(config)?;
    validate_host_settings(config)
}

/// Repositories and branches the stages clone from.
pub fn validate_sources(config: &ProvisionConfig) -> Result<(), ConfigError> {
    require_non_empty(&config.kernel.repository, "kernel.repository")?;
    require_non_empty(&config.kernel.branch, "kernel.branch")?;
    require_non_empty(&config.libevl.repository, "libevl.repository")?;
    require_non_empty(&config.framework.repository, "framework.repository")?;
    Ok(())
}

/// Everything verification depends on: paths, names, CPU lists and tuning.
pub fn validate_host_settings(config: &ProvisionConfig) -> Result<(), ConfigError> {
    require_non_empty(&config.framework.tool, "framework.tool")?;
    require_non_empty(&config.libevl.tool, "libevl.tool")?;

    if !config.workspace.is_absolute() {
        return Err(ConfigError::ValidationFailed(format!(
            "workspace must be an absolute path, got {}",
            config.workspace.display()
        )));
    }

    if !SHELL_IDENT_REGEX.is_match(&config.framework.root_var) {
        return Err(ConfigError::ValidationFailed(format!(
            "framework.root_var '{}' is not a valid shell variable name",
            config.framework.root_var
        )));
    }

    if !GROUP_NAME_REGEX.is_match(&config.access_group) {
        return Err(ConfigError::ValidationFailed(format!(
            "access_group '{}' is not a valid group name",
            config.access_group
        )));
    }

    if let Some(list) = &config.tuning.isolated_cpus {
        validate_cpu_list(list)?;
    }

    if config.tuning.rt_priority == 0 || config.tuning.rt_priority > 99 {
        return Err(ConfigError::ValidationFailed(format!(
            "tuning.rt_priority must be within 1-99, got {}",
            config.tuning.rt_priority
        )));
    }

    require_non_empty(&config.tuning.governor, "tuning.governor")?;

    Ok(())
}
