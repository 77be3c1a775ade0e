//! Unified error type hierarchy for rt-provision
//!
//! Provides structured error handling with PrerequisiteError, CommandError,
//! ConfigMutationError, ConfigVerificationError, StageError, ConfigError and
//! the top-level ProvisionError.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A single failed host precondition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PrerequisiteFailure {
    #[error("root privileges required (effective uid {euid})")]
    NotPrivileged { euid: u32 },

    #[error("insufficient disk space: {available} bytes free, {required} bytes required")]
    InsufficientDisk { available: u64, required: u64 },

    #[error("unsupported OS family: marker {0} not found")]
    MissingOsMarker(PathBuf),
}

/// Host preconditions failed. Raised before any stage runs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("prerequisite check failed: {}", join_failures(.failures))]
pub struct PrerequisiteError {
    pub failures: Vec<PrerequisiteFailure>,
}

fn join_failures(failures: &[PrerequisiteFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// External program execution errors.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("'{program} {}' exited with {}", .args.join(" "), describe_code(.code))]
    NonZeroExit {
        program: String,
        args: Vec<String>,
        code: Option<i32>,
        stderr_tail: String,
    },

    #[error("'{program}' interrupted")]
    Interrupted { program: String },

    #[error("I/O error while running '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {}", c),
        None => "termination by signal".to_string(),
    }
}

/// Configuration file mutation errors.
#[derive(Error, Debug)]
pub enum ConfigMutationError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid assertion key '{0}'")]
    InvalidKey(String),
}

/// A required key is absent (or duplicated) after mutation.
#[derive(Error, Debug)]
pub enum ConfigVerificationError {
    #[error("{path}: required settings missing or duplicated: {}", .keys.join(", "))]
    MissingKeys { path: PathBuf, keys: Vec<String> },

    #[error("failed to re-read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Provisioning configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid TOML in config: {0}")]
    InvalidToml(#[from] toml::de::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error during config operations: {0}")]
    IoError(#[from] io::Error),
}

/// Failure inside a single stage action.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("dependency installation failed: {0}")]
    DependencyInstall(#[source] CommandError),

    #[error("build step failed: {0}")]
    Build(#[source] CommandError),

    #[error(transparent)]
    ConfigMutation(#[from] ConfigMutationError),

    #[error(transparent)]
    ConfigVerification(#[from] ConfigVerificationError),

    #[error("unexpected output from '{program}': {detail}")]
    UnexpectedOutput { program: String, detail: String },

    #[error("interrupted")]
    Interrupted,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StageError {
    /// Wrap a command failure as a build error, keeping interruption distinct.
    pub fn build(err: CommandError) -> Self {
        match err {
            CommandError::Interrupted { .. } => StageError::Interrupted,
            other => StageError::Build(other),
        }
    }

    /// Wrap a package manager failure, keeping interruption distinct.
    pub fn dependency(err: CommandError) -> Self {
        match err {
            CommandError::Interrupted { .. } => StageError::Interrupted,
            other => StageError::DependencyInstall(other),
        }
    }
}

/// Top-level error surfaced to the process entry point.
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error(transparent)]
    Prerequisite(#[from] PrerequisiteError),

    #[error("stage '{stage}' failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: StageError,
    },

    #[error("interrupted during {0}")]
    Interrupted(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("reboot failed: {0}")]
    Reboot(#[source] CommandError),

    #[error("invalid pipeline state: {0}")]
    State(String),
}

impl ProvisionError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            ProvisionError::Interrupted(_) => 130,
            _ => 1,
        }
    }
}

/// Non-fatal discrepancy found during verification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{check}: {detail}")]
pub struct VerificationWarning {
    pub check: String,
    pub detail: String,
}

/// Top-level result type for provisioning operations.
pub type Result<T> = std::result::Result<T, ProvisionError>;
