//! Available memory detection.
//!
//! Uses `sysinfo` for the live figure and falls back to parsing
//! `/proc/meminfo` when sysinfo reports nothing (restricted containers).

use std::fs;
use std::path::Path;

use sysinfo::System;

/// Detect memory available for new allocations, in bytes.
///
/// Returns 0 when neither source yields a value; callers treat that as
/// "unknown" and only warn.
pub fn detect_available_memory_bytes(meminfo: &Path) -> u64 {
    let mut sys = System::new();
    sys.refresh_memory();
    let available = sys.available_memory();
    if available > 0 {
        return available;
    }

    match fs::read_to_string(meminfo) {
        Ok(content) => parse_mem_available(&content).unwrap_or(0),
        Err(e) => {
            log::debug!("[Hardware] [RAM] Cannot read {}: {}", meminfo.display(), e);
            0
        }
    }
}

/// Extract `MemAvailable` (reported in kB) from `/proc/meminfo` content, in bytes.
pub fn parse_mem_available(content: &str) -> Option<u64> {
    content
        .lines()
        .find(|line| line.starts_with("MemAvailable:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb.saturating_mul(1024))
}
