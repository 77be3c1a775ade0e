//! Host fact gathering for the requirement check.
//!
//! `HostProbe` is the seam between the preflight logic and the live machine:
//! `LiveHostProbe` asks the kernel, tests hand in fixed `HostFacts`.

pub mod ram;
pub mod storage;

pub use ram::detect_available_memory_bytes;
pub use storage::detect_free_disk_bytes;

use std::path::Path;

use crate::models::{HostFacts, RequirementSpec};
use crate::system::paths::SystemPaths;

/// Source of host facts.
pub trait HostProbe: Send + Sync {
    /// Gather facts needed to evaluate `spec` for a build rooted at `workspace`.
    fn facts(&self, spec: &RequirementSpec, workspace: &Path) -> HostFacts;
}

/// Reads facts from the running system.
#[derive(Debug, Clone, Default)]
pub struct LiveHostProbe {
    paths: SystemPaths,
}

impl LiveHostProbe {
    pub fn new(paths: SystemPaths) -> Self {
        LiveHostProbe { paths }
    }
}

impl HostProbe for LiveHostProbe {
    fn facts(&self, spec: &RequirementSpec, workspace: &Path) -> HostFacts {
        let facts = HostFacts {
            euid: nix::unistd::geteuid().as_raw(),
            free_disk_bytes: detect_free_disk_bytes(&self.paths.resolve(workspace)),
            available_memory_bytes: detect_available_memory_bytes(&self.paths.proc_file("meminfo")),
            cpu_count: num_cpus::get(),
            os_marker_present: self.paths.resolve(&spec.os_marker).is_file(),
        };
        log::debug!("[Hardware] Host facts: {:?}", facts);
        facts
    }
}

/// Fixed facts, for dry runs and tests.
#[derive(Debug, Clone)]
pub struct StaticHostProbe(pub HostFacts);

impl HostProbe for StaticHostProbe {
    fn facts(&self, _spec: &RequirementSpec, _workspace: &Path) -> HostFacts {
        self.0.clone()
    }
}
