//! rt-provision
//!
//! Provisions a Debian host as an EVL real-time target and verifies the result.
//!
//! The system is organized into functional modules:
//! - **error**: Unified error type hierarchy
//! - **models**: Config assertions, host facts and the verification report
//! - **config**: TOML configuration loading and validation
//! - **hardware**: Host fact gathering for the prerequisite check
//! - **patcher**: Idempotent parse-and-patch of text configuration files
//! - **kernel**: Required kernel options and boot command line handling
//! - **system**: Host path resolution, sysfs knobs and verification
//! - **orchestrator**: Command execution, stages and pipeline coordination
//! - **log_collector**: Timestamped process-wide logger

// Core foundational modules
pub mod error;
pub mod models;

pub mod cli;
pub mod config;
pub mod hardware;
pub mod kernel;
pub mod log_collector;
pub mod orchestrator;
pub mod patcher;
pub mod system;

// Re-export the log crate for macro usage
pub use log;

pub use config::ProvisionConfig;
pub use error::{ProvisionError, Result};
pub use log_collector::{init_logging, ConsoleLogger};
pub use models::{CheckStatus, ConfigAssertion, ConfigSyntax, Report, ReportEntry};
pub use orchestrator::{Orchestrator, RunSummary};
pub use patcher::ConfigMutator;
