/// Host path resolution anchored at a configurable root.
///
/// Every absolute host path the provisioner touches (`/etc/sysctl.conf`,
/// `/sys/devices/system/cpu/...`, `/boot/config-*`) goes through
/// `SystemPaths::resolve`. On a live host the root is `/` and paths are used
/// unchanged; tests point the root at a temporary directory so the same code
/// reads and writes a fake filesystem tree.
use std::path::{Component, Path, PathBuf};

use crate::config::ProvisionConfig;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SystemPaths {
    root: PathBuf,
}

impl Default for SystemPaths {
    fn default() -> Self {
        SystemPaths {
            root: PathBuf::from("/"),
        }
    }
}

impl SystemPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        SystemPaths { root: root.into() }
    }

    pub fn from_config(config: &ProvisionConfig) -> Self {
        Self::new(config.paths.root.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True when paths resolve against the real filesystem root.
    pub fn is_live(&self) -> bool {
        self.root == Path::new("/")
    }

    /// Map an absolute host path under the configured root.
    ///
    /// Relative paths are returned joined to the root as well.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if self.is_live() {
            return path.to_path_buf();
        }
        let relative: PathBuf = path
            .components()
            .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
            .collect();
        self.root.join(relative)
    }

    pub fn proc_file(&self, name: &str) -> PathBuf {
        self.resolve(Path::new("/proc").join(name))
    }

    pub fn cpu_sysfs(&self) -> PathBuf {
        self.resolve("/sys/devices/system/cpu")
    }

    pub fn boot_config(&self, release: &str) -> PathBuf {
        self.resolve(format!("/boot/config-{}", release))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_root_is_identity() {
        let paths = SystemPaths::default();
        assert_eq!(paths.resolve("/etc/sysctl.conf"), PathBuf::from("/etc/sysctl.conf"));
    }

    #[test]
    fn test_prefixed_root() {
        let paths = SystemPaths::new("/tmp/fake");
        assert_eq!(
            paths.resolve("/etc/default/grub"),
            PathBuf::from("/tmp/fake/etc/default/grub")
        );
        assert_eq!(
            paths.proc_file("cmdline"),
            PathBuf::from("/tmp/fake/proc/cmdline")
        );
        assert_eq!(
            paths.boot_config("6.6.0-evl"),
            PathBuf::from("/tmp/fake/boot/config-6.6.0-evl")
        );
    }
}
