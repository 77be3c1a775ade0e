//! Core data structures shared across rt-provision modules.
//!
//! - `ConfigSyntax` / `ConfigAssertion`: desired key/value state of a text config file
//! - `RequirementSpec` / `HostFacts`: host preconditions and the observed values
//! - `Severity` / `CheckStatus` / `ReportEntry` / `Report`: verification output

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::VerificationWarning;

/// Line syntax used to locate and render a key in a configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfigSyntax {
    /// Kernel `.config`: `CONFIG_X=y` or `# CONFIG_X is not set`
    Kconfig,
    /// `/etc/sysctl.conf`: `key = value`
    Sysctl,
    /// Shell assignment: `KEY=value` or `export KEY=value`
    Shell,
    /// PAM limits: `domain type item value`, first three fields are the key
    Limits,
}

/// A desired key/value pair that must appear exactly once in `target`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigAssertion {
    pub key: String,
    pub value: String,
    pub target: PathBuf,
    pub syntax: ConfigSyntax,
    /// Emit `export KEY=value` instead of `KEY=value` (Shell syntax only)
    #[serde(default)]
    pub export: bool,
}

impl ConfigAssertion {
    pub fn new(
        key: impl Into<String>,
        value: impl Into<String>,
        target: impl Into<PathBuf>,
        syntax: ConfigSyntax,
    ) -> Self {
        ConfigAssertion {
            key: key.into(),
            value: value.into(),
            target: target.into(),
            syntax,
            export: false,
        }
    }

    pub fn kconfig(key: &str, value: &str, target: impl Into<PathBuf>) -> Self {
        Self::new(key, value, target, ConfigSyntax::Kconfig)
    }

    pub fn sysctl(key: &str, value: &str, target: impl Into<PathBuf>) -> Self {
        Self::new(key, value, target, ConfigSyntax::Sysctl)
    }

    pub fn shell(key: &str, value: &str, target: impl Into<PathBuf>) -> Self {
        Self::new(key, value, target, ConfigSyntax::Shell)
    }

    /// Shell assignment rendered with a leading `export`.
    pub fn exported(key: &str, value: &str, target: impl Into<PathBuf>) -> Self {
        let mut assertion = Self::new(key, value, target, ConfigSyntax::Shell);
        assertion.export = true;
        assertion
    }
}

/// Host preconditions checked once before any mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementSpec {
    pub min_disk_bytes: u64,
    pub min_memory_bytes: u64,
    /// File whose presence identifies the required OS family
    pub os_marker: PathBuf,
}

/// Live host facts gathered for the requirement check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostFacts {
    pub euid: u32,
    pub free_disk_bytes: u64,
    pub available_memory_bytes: u64,
    pub cpu_count: usize,
    pub os_marker_present: bool,
}

/// Severity of a verification check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Fatal,
    Warning,
}

/// Result status of one verification check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckStatus {
    Ok,
    Fail,
    Warn,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Fail => "FAIL",
            CheckStatus::Warn => "WARN",
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the verification report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub check: String,
    pub status: CheckStatus,
    pub detail: String,
}

/// Ordered verification results, one entry per registered check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub entries: Vec<ReportEntry>,
}

impl Report {
    pub fn push(&mut self, entry: ReportEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, status: CheckStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    /// True when no fatal check failed.
    pub fn passed(&self) -> bool {
        self.count(CheckStatus::Fail) == 0
    }

    pub fn entry(&self, check: &str) -> Option<&ReportEntry> {
        self.entries.iter().find(|e| e.check == check)
    }

    /// Non-fatal discrepancies collected during verification.
    pub fn warnings(&self) -> Vec<VerificationWarning> {
        self.entries
            .iter()
            .filter(|e| e.status == CheckStatus::Warn)
            .map(|e| VerificationWarning {
                check: e.check.clone(),
                detail: e.detail.clone(),
            })
            .collect()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "==================== Verification Report ====================")?;
        for entry in &self.entries {
            writeln!(f, "[{:>4}] {:<28} {}", entry.status.as_str(), entry.check, entry.detail)?;
        }
        writeln!(f, "=============================================================")?;
        write!(
            f,
            "{} ok, {} warnings, {} failed",
            self.count(CheckStatus::Ok),
            self.count(CheckStatus::Warn),
            self.count(CheckStatus::Fail)
        )
    }
}
