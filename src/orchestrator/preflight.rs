//! Host prerequisite checks, run once before any stage touches the system.

use std::path::Path;

use crate::error::{PrerequisiteError, PrerequisiteFailure};
use crate::hardware::HostProbe;
use crate::models::{HostFacts, RequirementSpec};

/// Facts and warnings from a passed prerequisite check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrerequisiteReport {
    pub facts: HostFacts,
    pub warnings: Vec<String>,
}

pub struct RequirementChecker<'a> {
    probe: &'a dyn HostProbe,
}

impl<'a> RequirementChecker<'a> {
    pub fn new(probe: &'a dyn HostProbe) -> Self {
        RequirementChecker { probe }
    }

    /// Gather host facts for a build in `workspace` and evaluate them against `spec`.
    pub fn check(
        &self,
        spec: &RequirementSpec,
        workspace: &Path,
    ) -> Result<PrerequisiteReport, PrerequisiteError> {
        let facts = self.probe.facts(spec, workspace);
        log::info!(
            "[Preflight] euid={} disk_free={} MiB memory_available={} MiB cpus={}",
            facts.euid,
            facts.free_disk_bytes / (1024 * 1024),
            facts.available_memory_bytes / (1024 * 1024),
            facts.cpu_count
        );
        evaluate(spec, facts)
    }
}

/// Evaluate every requirement, collecting all fatal failures.
pub fn evaluate(spec: &RequirementSpec, facts: HostFacts) -> Result<PrerequisiteReport, PrerequisiteError> {
    let mut failures = Vec::new();

    if facts.euid != 0 {
        failures.push(PrerequisiteFailure::NotPrivileged { euid: facts.euid });
    }

    if facts.free_disk_bytes < spec.min_disk_bytes {
        failures.push(PrerequisiteFailure::InsufficientDisk {
            available: facts.free_disk_bytes,
            required: spec.min_disk_bytes,
        });
    }

    if !facts.os_marker_present {
        failures.push(PrerequisiteFailure::MissingOsMarker(spec.os_marker.clone()));
    }

    if !failures.is_empty() {
        for failure in &failures {
            log::error!("[Preflight] {}", failure);
        }
        return Err(PrerequisiteError { failures });
    }

    let mut warnings = Vec::new();
    if facts.available_memory_bytes < spec.min_memory_bytes {
        let warning = format!(
            "low memory: {} bytes available, {} bytes recommended; the kernel build may be slow",
            facts.available_memory_bytes, spec.min_memory_bytes
        );
        log::warn!("[Preflight] {}", warning);
        warnings.push(warning);
    }

    log::info!("[Preflight] All prerequisites met");
    Ok(PrerequisiteReport { facts, warnings })
}
