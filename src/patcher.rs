//! Idempotent configuration file patching.
//!
//! `ConfigMutator` applies `ConfigAssertion`s to text configuration files
//! (kernel `.config`, `sysctl.conf`, GRUB defaults, profile scripts, PAM
//! limits). Each assertion is parse-and-patch: the first line that encodes the
//! key is replaced in place, later duplicates are dropped, and a missing key
//! is appended. Files are only rewritten when their content changes, so
//! applying the same assertion twice leaves the file byte-for-byte identical.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::error::{ConfigMutationError, ConfigVerificationError};
use crate::models::{ConfigAssertion, ConfigSyntax};

/// Result type for mutation operations
pub type MutationResult<T> = std::result::Result<T, ConfigMutationError>;

/// What `apply` did to the target file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// Key already present exactly once with the desired value
    Unchanged,
    /// An existing line for the key was rewritten
    Replaced,
    /// No line encoded the key; one was appended
    Appended,
}

/// Applies and verifies key/value assertions against configuration files.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigMutator;

impl ConfigMutator {
    pub fn new() -> Self {
        ConfigMutator
    }

    /// Apply one assertion, creating the target (and its parent directories) if absent.
    pub fn apply(&self, assertion: &ConfigAssertion) -> MutationResult<MutationOutcome> {
        validate_key(assertion)?;
        let path = assertion.target.as_path();
        let content = read_or_empty(path)?;

        let (patched, outcome) = patch_content(&content, assertion);
        if outcome == MutationOutcome::Unchanged {
            log::debug!("[Patcher] {} already set in {}", assertion.key, path.display());
            return Ok(outcome);
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| ConfigMutationError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        fs::write(path, patched).map_err(|source| ConfigMutationError::Write {
            path: path.to_path_buf(),
            source,
        })?;

        log::info!(
            "[Patcher] {:?} {} in {}",
            outcome,
            render_line(assertion),
            path.display()
        );
        Ok(outcome)
    }

    /// Apply a batch of assertions in order, stopping at the first error.
    pub fn apply_all(&self, assertions: &[ConfigAssertion]) -> MutationResult<Vec<MutationOutcome>> {
        assertions.iter().map(|a| self.apply(a)).collect()
    }

    /// Re-read `path` and confirm every assertion targeting it is present exactly once.
    ///
    /// This is the gate run after kernel config mutation and `olddefconfig`,
    /// before starting a multi-hour build.
    pub fn assert_present(
        &self,
        path: &Path,
        assertions: &[ConfigAssertion],
    ) -> Result<(), ConfigVerificationError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(source) => {
                return Err(ConfigVerificationError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let mut missing = Vec::new();
        for assertion in assertions.iter().filter(|a| a.target == path) {
            let expected = render_line(assertion);
            let matching: Vec<&str> = content
                .lines()
                .map(strip_cr)
                .filter(|line| line_matches(line, assertion))
                .collect();
            if matching.len() != 1 || matching[0].trim() != expected {
                missing.push(expected);
            }
        }

        if missing.is_empty() {
            log::info!("[Patcher] [GATE] All required settings present in {}", path.display());
            Ok(())
        } else {
            Err(ConfigVerificationError::MissingKeys {
                path: path.to_path_buf(),
                keys: missing,
            })
        }
    }

    /// Current value of `key` in `path` under `syntax`, if a line encodes it.
    pub fn current_value(
        &self,
        path: &Path,
        key: &str,
        syntax: ConfigSyntax,
    ) -> MutationResult<Option<String>> {
        let probe = ConfigAssertion::new(key, "", path, syntax);
        let content = read_or_empty(path)?;
        Ok(content
            .lines()
            .map(strip_cr)
            .find(|line| line_matches(line, &probe))
            .map(|line| extract_value(line, syntax)))
    }
}

fn validate_key(assertion: &ConfigAssertion) -> MutationResult<()> {
    let key = assertion.key.trim();
    let bad = key.is_empty()
        || key.contains('\n')
        || (assertion.syntax != ConfigSyntax::Limits && key.contains('='))
        || (assertion.syntax != ConfigSyntax::Limits && key.contains(char::is_whitespace));
    if bad {
        return Err(ConfigMutationError::InvalidKey(assertion.key.clone()));
    }
    Ok(())
}

fn read_or_empty(path: &Path) -> MutationResult<String> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(source) => Err(ConfigMutationError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn strip_cr(line: &str) -> &str {
    line.strip_suffix('\r').unwrap_or(line)
}

/// Patch `content` in memory. Pure, so idempotence can be tested without I/O.
pub fn patch_content(content: &str, assertion: &ConfigAssertion) -> (String, MutationOutcome) {
    let rendered = render_line(assertion);
    let mut out = String::with_capacity(content.len() + rendered.len() + 1);
    let mut seen = 0usize;
    let mut changed = false;

    for segment in content.split_inclusive('\n') {
        let body = segment.strip_suffix('\n').unwrap_or(segment);
        let line = strip_cr(body);
        if !line_matches(line, assertion) {
            out.push_str(segment);
            continue;
        }
        seen += 1;
        if seen > 1 {
            // Duplicate from an earlier blind append
            changed = true;
            continue;
        }
        if line == rendered {
            out.push_str(segment);
        } else {
            changed = true;
            out.push_str(&rendered);
            if segment.ends_with('\n') {
                out.push('\n');
            }
        }
    }

    if seen == 0 {
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&rendered);
        out.push('\n');
        return (out, MutationOutcome::Appended);
    }

    if changed {
        (out, MutationOutcome::Replaced)
    } else {
        (out, MutationOutcome::Unchanged)
    }
}

/// Render the single line that represents `assertion` in its file syntax.
pub fn render_line(assertion: &ConfigAssertion) -> String {
    let key = assertion.key.trim();
    let value = assertion.value.trim();
    match assertion.syntax {
        ConfigSyntax::Kconfig => {
            if value == "n" {
                format!("# {} is not set", key)
            } else {
                format!("{}={}", key, value)
            }
        }
        ConfigSyntax::Sysctl => format!("{} = {}", key, value),
        ConfigSyntax::Shell => {
            if assertion.export {
                format!("export {}={}", key, value)
            } else {
                format!("{}={}", key, value)
            }
        }
        ConfigSyntax::Limits => {
            let mut fields: Vec<&str> = key.split_whitespace().collect();
            fields.push(value);
            fields.join(" ")
        }
    }
}

/// Whether `line` encodes `assertion.key` under the assertion's syntax.
fn line_matches(line: &str, assertion: &ConfigAssertion) -> bool {
    let key = assertion.key.trim();
    let trimmed = line.trim();
    match assertion.syntax {
        ConfigSyntax::Kconfig => {
            trimmed
                .strip_prefix(key)
                .map(|rest| rest.starts_with('='))
                .unwrap_or(false)
                || trimmed == format!("# {} is not set", key)
        }
        ConfigSyntax::Sysctl => {
            if trimmed.starts_with('#') || trimmed.starts_with(';') {
                return false;
            }
            trimmed
                .split_once('=')
                .map(|(k, _)| k.trim() == key)
                .unwrap_or(false)
        }
        ConfigSyntax::Shell => {
            if trimmed.starts_with('#') {
                return false;
            }
            let assignment = trimmed
                .strip_prefix("export ")
                .map(str::trim_start)
                .unwrap_or(trimmed);
            assignment
                .split_once('=')
                .map(|(k, _)| k == key)
                .unwrap_or(false)
        }
        ConfigSyntax::Limits => {
            if trimmed.starts_with('#') {
                return false;
            }
            let fields: Vec<&str> = trimmed.split_whitespace().collect();
            let wanted: Vec<&str> = key.split_whitespace().collect();
            fields.len() == wanted.len() + 1 && fields[..wanted.len()] == wanted[..]
        }
    }
}

fn extract_value(line: &str, syntax: ConfigSyntax) -> String {
    let trimmed = line.trim();
    match syntax {
        ConfigSyntax::Kconfig if trimmed.starts_with('#') => "n".to_string(),
        ConfigSyntax::Limits => trimmed
            .split_whitespace()
            .last()
            .unwrap_or_default()
            .to_string(),
        _ => trimmed
            .split_once('=')
            .map(|(_, v)| v.trim().to_string())
            .unwrap_or_default(),
    }
}
