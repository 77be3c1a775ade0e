//! Pattern-based resource enumeration and best-effort kernel knob writes.
//!
//! Per-CPU attributes live at paths such as
//! `/sys/devices/system/cpu/cpu3/cpufreq/scaling_governor`. A `ResourceScan`
//! expands `cpu*/cpufreq/scaling_governor` under the CPU directory lazily,
//! one directory level at a time, and can be walked any number of times.

use std::fs;
use std::path::{Path, PathBuf};

/// A directory plus a `/`-separated pattern whose segments may contain `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceScan {
    dir: PathBuf,
    segments: Vec<String>,
}

impl ResourceScan {
    pub fn new(dir: impl Into<PathBuf>, pattern: &str) -> Self {
        ResourceScan {
            dir: dir.into(),
            segments: pattern
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Matching paths, in sorted order per directory. Each call starts a fresh walk.
    pub fn paths(&self) -> ScanIter<'_> {
        ScanIter {
            segments: &self.segments,
            stack: vec![(self.dir.clone(), 0)],
        }
    }
}

/// Depth-first walk over the pattern segments.
pub struct ScanIter<'a> {
    segments: &'a [String],
    stack: Vec<(PathBuf, usize)>,
}

impl Iterator for ScanIter<'_> {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        while let Some((path, depth)) = self.stack.pop() {
            if depth == self.segments.len() {
                if path.exists() {
                    return Some(path);
                }
                continue;
            }

            let segment = &self.segments[depth];
            if !segment.contains('*') {
                self.stack.push((path.join(segment), depth + 1));
                continue;
            }

            let mut names: Vec<String> = match fs::read_dir(&path) {
                Ok(entries) => entries
                    .flatten()
                    .filter_map(|e| e.file_name().into_string().ok())
                    .filter(|name| wildcard_match(segment, name))
                    .collect(),
                Err(_) => continue,
            };
            names.sort_by(|a, b| natural_key(a).cmp(&natural_key(b)));
            // Reverse so the stack pops in ascending order
            for name in names.into_iter().rev() {
                self.stack.push((path.join(name), depth + 1));
            }
        }
        None
    }
}

/// Sort `cpu2` before `cpu10`.
fn natural_key(name: &str) -> (String, u64) {
    let split = name
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(name.len());
    let (prefix, digits) = name.split_at(split);
    (prefix.to_string(), digits.parse().unwrap_or(u64::MAX))
}

/// Match `name` against a segment where `*` stands for any run of characters.
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == name;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    if !name.starts_with(first) || name.len() < first.len() + last.len() {
        return false;
    }
    let mut rest = &name[first.len()..];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

/// Result of a best-effort knob write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KnobOutcome {
    Written,
    /// The knob does not exist on this host (no SMT, no intel_pstate, ...)
    Absent,
    Failed(String),
}

/// Write `value` to a sysfs/procfs knob. Never errors; problems are logged as warnings.
pub fn write_knob(path: &Path, value: &str) -> KnobOutcome {
    if !path.exists() {
        log::warn!("[Knob] {} not present, skipping", path.display());
        return KnobOutcome::Absent;
    }
    match fs::write(path, value) {
        Ok(()) => {
            log::info!("[Knob] {} <- {}", path.display(), value);
            KnobOutcome::Written
        }
        Err(e) => {
            log::warn!("[Knob] Failed to write {} to {}: {}", value, path.display(), e);
            KnobOutcome::Failed(e.to_string())
        }
    }
}

/// Trimmed content of a knob, or `None` if it cannot be read.
pub fn read_knob(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu_tree(cpus: &[u32]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for cpu in cpus {
            let freq = dir.path().join(format!("cpu{}/cpufreq", cpu));
            fs::create_dir_all(&freq).unwrap();
            fs::write(freq.join("scaling_governor"), "powersave\n").unwrap();
        }
        fs::create_dir_all(dir.path().join("cpuidle")).unwrap();
        dir
    }

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("cpu*", "cpu0"));
        assert!(wildcard_match("cpu*", "cpufreq"));
        assert!(!wildcard_match("cpu*", "smt"));
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("a*c*e", "abcde"));
        assert!(!wildcard_match("a*c*e", "abde"));
        assert!(wildcard_match("exact", "exact"));
    }

    #[test]
    fn test_scan_is_ordered_and_restartable() {
        let dir = cpu_tree(&[0, 2, 10, 1]);
        let scan = ResourceScan::new(dir.path(), "cpu*/cpufreq/scaling_governor");

        let first: Vec<PathBuf> = scan.paths().collect();
        let names: Vec<String> = first
            .iter()
            .map(|p| p.parent().unwrap().parent().unwrap().file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["cpu0", "cpu1", "cpu2", "cpu10"]);

        let second: Vec<PathBuf> = scan.paths().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_scan_missing_dir_is_empty() {
        let scan = ResourceScan::new("/nonexistent/rt-provision", "cpu*/x");
        assert_eq!(scan.paths().count(), 0);
    }

    #[test]
    fn test_write_knob_outcomes() {
        let dir = cpu_tree(&[0]);
        let knob = dir.path().join("cpu0/cpufreq/scaling_governor");
        assert_eq!(write_knob(&knob, "performance"), KnobOutcome::Written);
        assert_eq!(read_knob(&knob).as_deref(), Some("performance"));

        let absent = dir.path().join("smt/control");
        assert_eq!(write_knob(&absent, "off"), KnobOutcome::Absent);
    }
}
