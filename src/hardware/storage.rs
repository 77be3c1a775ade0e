//! Free disk space detection for the build workspace.

use std::path::{Path, PathBuf};

use nix::sys::statvfs::statvfs;

/// Free bytes available to unprivileged writers on the filesystem holding `path`.
///
/// The workspace usually does not exist yet before the first run, so the
/// nearest existing ancestor is measured instead. Returns 0 if no ancestor
/// can be queried.
pub fn detect_free_disk_bytes(path: &Path) -> u64 {
    let target = nearest_existing(path);
    match statvfs(&target) {
        Ok(stat) => (stat.blocks_available() as u64).saturating_mul(stat.fragment_size() as u64),
        Err(e) => {
            log::warn!(
                "[Hardware] [DISK] statvfs({}) failed: {}",
                target.display(),
                e
            );
            0
        }
    }
}

/// Walk up from `path` until an existing directory is found.
pub fn nearest_existing(path: &Path) -> PathBuf {
    let mut current = path;
    loop {
        if current.exists() {
            return current.to_path_buf();
        }
        match current.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => current = parent,
            _ => return PathBuf::from("/"),
        }
    }
}
