//! Kernel `.config` requirements for an EVL real-time build.
//!
//! The same option table drives both sides: the kernel stage turns it into
//! `ConfigAssertion`s applied to the source tree's `.config`, and
//! verification checks the installed kernel's config against it.

use std::collections::HashMap;
use std::path::Path;

use crate::models::ConfigAssertion;

/// Options that must be built in.
pub const ENABLED_OPTIONS: &[(&str, &str)] = &[
    ("CONFIG_EVL", "y"),
    ("CONFIG_EVL_LATMUS", "y"),
    ("CONFIG_PREEMPT_RT", "y"),
    ("CONFIG_NO_HZ_FULL", "y"),
    ("CONFIG_CPU_ISOLATION", "y"),
    ("CONFIG_RCU_NOCB_CPU", "y"),
    ("CONFIG_RCU_BOOST", "y"),
    ("CONFIG_RCU_BOOST_DELAY", "500"),
];

/// Options that introduce latency and must be off.
pub const DISABLED_OPTIONS: &[&str] = &["CONFIG_CPU_IDLE", "CONFIG_CPU_FREQ", "CONFIG_SCHED_AUTOGROUP"];

/// Every required `(key, value)` pair, `n` meaning "is not set".
///
/// `CONFIG_LOCALVERSION` carries `release_tag` so the installed kernel's
/// release string identifies it.
pub fn required_options(release_tag: &str) -> Vec<(String, String)> {
    let mut options: Vec<(String, String)> = ENABLED_OPTIONS
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    options.extend(DISABLED_OPTIONS.iter().map(|k| (k.to_string(), "n".to_string())));
    options.push((
        "CONFIG_LOCALVERSION".to_string(),
        format!("\"-{}\"", release_tag),
    ));
    options
}

/// Assertions for the kernel tree's `.config`.
pub fn required_assertions(config_path: &Path, release_tag: &str) -> Vec<ConfigAssertion> {
    required_options(release_tag)
        .into_iter()
        .map(|(key, value)| ConfigAssertion::kconfig(&key, &value, config_path))
        .collect()
}

/// Parse `.config` content into key/value pairs. `# KEY is not set` yields `n`.
pub fn parse_kconfig(content: &str) -> HashMap<String, String> {
    let mut options = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("# ") {
            if let Some(key) = rest.strip_suffix(" is not set") {
                if key.starts_with("CONFIG_") {
                    options.insert(key.to_string(), "n".to_string());
                }
            }
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if key.starts_with("CONFIG_") {
                options.insert(key.to_string(), value.to_string());
            }
        }
    }
    options
}

/// Required options the parsed config does not satisfy, rendered as `KEY=expected (found X)`.
pub fn missing_options(options: &HashMap<String, String>, required: &[(String, String)]) -> Vec<String> {
    required
        .iter()
        .filter_map(|(key, expected)| {
            let found = options.get(key).map(String::as_str).unwrap_or("n");
            if found == expected {
                None
            } else {
                Some(format!("{}={} (found {})", key, expected, found))
            }
        })
        .collect()
}
