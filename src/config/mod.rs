//! Provisioning configuration.
//!
//! `ProvisionConfig` is built once at startup (defaults, optionally overlaid by
//! a TOML file and CLI flags) and passed by reference to every component. It
//! is never mutated after validation.
//!
//! # Module Structure
//!
//! - `loader`: Reads the TOML file and applies CLI overrides
//! - `validator`: Validates repositories, CPU lists and identifiers

pub mod loader;
pub mod validator;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::models::RequirementSpec;

const GIB: u64 = 1024 * 1024 * 1024;

/// Complete, immutable provisioning configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Directory holding the cloned source trees
    pub workspace: PathBuf,
    /// Parallel job hint for make/ninja/cmake; 0 means one per CPU
    pub jobs: usize,
    /// Debian packages installed by the dependencies stage
    pub packages: Vec<String>,
    /// Group granted access to the EVL devices
    pub access_group: String,
    /// Optional log file receiving a copy of every log line
    pub log_file: Option<PathBuf>,
    pub requirements: RequirementsConfig,
    pub kernel: KernelSection,
    pub libevl: LibevlSection,
    pub framework: FrameworkSection,
    pub tuning: TuningSection,
    pub paths: PathsSection,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequirementsConfig {
    pub min_disk_gb: u64,
    pub min_memory_gb: u64,
    pub os_marker: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelSection {
    pub repository: String,
    pub branch: String,
    /// Directory name under the workspace
    pub directory: String,
    /// Substring expected in the running kernel release after reboot
    pub release_tag: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibevlSection {
    pub repository: String,
    pub branch: String,
    pub directory: String,
    pub prefix: PathBuf,
    /// Command-line tool installed under `<prefix>/bin`
    pub tool: String,
    pub version_arg: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameworkSection {
    pub name: String,
    pub repository: String,
    pub branch: String,
    pub directory: String,
    pub prefix: PathBuf,
    /// Environment variable exported with the install prefix
    pub root_var: String,
    /// Tool probed during verification
    pub tool: String,
    pub version_arg: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningSection {
    /// CPU list for isolcpus/rcu_nocbs/nohz_full; derived from the CPU count when unset
    pub isolated_cpus: Option<String>,
    pub disable_mitigations: bool,
    pub governor: String,
    pub disable_turbo: bool,
    pub disable_smt: bool,
    pub disable_watchdog: bool,
    pub rt_priority: u32,
}

/// Host file locations. Every absolute path is resolved under `root`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    pub root: PathBuf,
    pub sysctl_conf: PathBuf,
    pub grub_default: PathBuf,
    pub profile_script: PathBuf,
    pub limits_conf: PathBuf,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        ProvisionConfig {
            workspace: PathBuf::from("/usr/src/rt-provision"),
            jobs: 0,
            packages: default_packages(),
            access_group: "evl".to_string(),
            log_file: Some(PathBuf::from("/var/log/rt-provision.log")),
            requirements: RequirementsConfig::default(),
            kernel: KernelSection::default(),
            libevl: LibevlSection::default(),
            framework: FrameworkSection::default(),
            tuning: TuningSection::default(),
            paths: PathsSection::default(),
        }
    }
}

impl Default for RequirementsConfig {
    fn default() -> Self {
        RequirementsConfig {
            min_disk_gb: 30,
            min_memory_gb: 4,
            os_marker: PathBuf::from("/etc/debian_version"),
        }
    }
}

impl Default for KernelSection {
    fn default() -> Self {
        KernelSection {
            repository: "https://source.denx.de/Xenomai/xenomai4/linux-evl.git".to_string(),
            branch: "v6.6.y-evl-rebase".to_string(),
            directory: "linux-evl".to_string(),
            release_tag: "evl".to_string(),
        }
    }
}

impl Default for LibevlSection {
    fn default() -> Self {
        LibevlSection {
            repository: "https://source.denx.de/Xenomai/xenomai4/libevl.git".to_string(),
            branch: "master".to_string(),
            directory: "libevl".to_string(),
            prefix: PathBuf::from("/usr/evl"),
            tool: "evl".to_string(),
            version_arg: "-V".to_string(),
        }
    }
}

impl Default for FrameworkSection {
    fn default() -> Self {
        // No upstream default: the framework repository must come from the config file
        FrameworkSection {
            name: "rtf".to_string(),
            repository: String::new(),
            branch: "main".to_string(),
            directory: "rtf".to_string(),
            prefix: PathBuf::from("/opt/rtf"),
            root_var: "RTF_ROOT".to_string(),
            tool: "rtf".to_string(),
            version_arg: "--version".to_string(),
        }
    }
}

impl Default for TuningSection {
    fn default() -> Self {
        TuningSection {
            isolated_cpus: None,
            disable_mitigations: true,
            governor: "performance".to_string(),
            disable_turbo: true,
            disable_smt: true,
            disable_watchdog: true,
            rt_priority: 99,
        }
    }
}

impl Default for PathsSection {
    fn default() -> Self {
        PathsSection {
            root: PathBuf::from("/"),
            sysctl_conf: PathBuf::from("/etc/sysctl.conf"),
            grub_default: PathBuf::from("/etc/default/grub"),
            profile_script: PathBuf::from("/etc/profile.d/rt-provision.sh"),
            limits_conf: PathBuf::from("/etc/security/limits.d/99-rt-provision.conf"),
        }
    }
}

fn default_packages() -> Vec<String> {
    [
        "build-essential",
        "git",
        "bc",
        "bison",
        "flex",
        "libssl-dev",
        "libelf-dev",
        "dwarves",
        "rsync",
        "cpio",
        "kmod",
        "initramfs-tools",
        "meson",
        "ninja-build",
        "cmake",
        "pkg-config",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl ProvisionConfig {
    /// Parallel job count handed to the build tools.
    pub fn effective_jobs(&self) -> usize {
        if self.jobs == 0 {
            num_cpus::get().max(1)
        } else {
            self.jobs
        }
    }

    pub fn requirement_spec(&self) -> RequirementSpec {
        RequirementSpec {
            min_disk_bytes: self.requirements.min_disk_gb.saturating_mul(GIB),
            min_memory_bytes: self.requirements.min_memory_gb.saturating_mul(GIB),
            os_marker: self.requirements.os_marker.clone(),
        }
    }

    /// CPU list to isolate, explicit or derived from `cpu_count`.
    ///
    /// CPU 0 always stays with the general scheduler; single-CPU hosts isolate nothing.
    pub fn isolated_cpus(&self, cpu_count: usize) -> Option<String> {
        if let Some(list) = &self.tuning.isolated_cpus {
            return Some(list.clone());
        }
        match cpu_count {
            0 | 1 => None,
            2 => Some("1".to_string()),
            n => Some(format!("1-{}", n - 1)),
        }
    }

    pub fn kernel_dir(&self) -> PathBuf {
        self.workspace.join(&self.kernel.directory)
    }

    pub fn libevl_dir(&self) -> PathBuf {
        self.workspace.join(&self.libevl.directory)
    }

    pub fn framework_dir(&self) -> PathBuf {
        self.workspace.join(&self.framework.directory)
    }
}
