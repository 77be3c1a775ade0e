//! Post-provisioning verification.
//!
//! Evaluates an ordered list of checks against host state read at call time
//! and produces a `Report` with exactly one entry per check. A failing check
//! never stops the ones after it; severity only decides whether a failure is
//! reported as `FAIL` or `WARN`.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;

use flate2::read::GzDecoder;

use crate::config::ProvisionConfig;
use crate::kernel::{cmdline, kconfig};
use crate::models::{CheckStatus, Report, ReportEntry, Severity};
use crate::system::paths::SystemPaths;
use crate::system::sysfs::{read_knob, ResourceScan};

/// Runs a tool to learn its version.
pub trait ToolProbe: Send + Sync {
    /// First line printed by `program arg`, or a description of why it failed.
    fn version(&self, program: &Path, arg: &str) -> Result<String, String>;
}

/// Spawns the tool with `std::process::Command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessToolProbe;

impl ToolProbe for ProcessToolProbe {
    fn version(&self, program: &Path, arg: &str) -> Result<String, String> {
        let output = Command::new(program)
            .arg(arg)
            .output()
            .map_err(|e| format!("{} not runnable: {}", program.display(), e))?;
        if !output.status.success() {
            return Err(format!(
                "{} {} exited with {}",
                program.display(),
                arg,
                output.status
            ));
        }
        let text = if output.stdout.is_empty() {
            String::from_utf8_lossy(&output.stderr).into_owned()
        } else {
            String::from_utf8_lossy(&output.stdout).into_owned()
        };
        Ok(text
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("version unknown")
            .to_string())
    }
}

/// Everything a check may look at.
pub struct VerificationContext<'a> {
    pub config: &'a ProvisionConfig,
    pub paths: &'a SystemPaths,
    pub tools: &'a dyn ToolProbe,
    pub cpu_count: usize,
}

type Predicate = Box<dyn Fn(&VerificationContext<'_>) -> Result<String, String> + Send + Sync>;

/// A named predicate over host state. `Ok(detail)` passes; `Err(detail)` fails.
pub struct VerificationCheck {
    pub name: String,
    pub severity: Severity,
    predicate: Predicate,
}

impl VerificationCheck {
    pub fn new<F>(name: impl Into<String>, severity: Severity, predicate: F) -> Self
    where
        F: Fn(&VerificationContext<'_>) -> Result<String, String> + Send + Sync + 'static,
    {
        VerificationCheck {
            name: name.into(),
            severity,
            predicate: Box::new(predicate),
        }
    }

    fn evaluate(&self, ctx: &VerificationContext<'_>) -> ReportEntry {
        let (status, detail) = match (self.predicate)(ctx) {
            Ok(detail) => (CheckStatus::Ok, detail),
            Err(detail) => match self.severity {
                Severity::Fatal => (CheckStatus::Fail, detail),
                Severity::Warning => (CheckStatus::Warn, detail),
            },
        };
        ReportEntry {
            check: self.name.clone(),
            status,
            detail,
        }
    }
}

pub struct VerificationEngine<'a> {
    ctx: VerificationContext<'a>,
}

impl<'a> VerificationEngine<'a> {
    pub fn new(ctx: VerificationContext<'a>) -> Self {
        VerificationEngine { ctx }
    }

    /// Evaluate every check in order.
    pub fn verify(&self, checks: &[VerificationCheck]) -> Report {
        log::info!("[Verify] Running {} checks", checks.len());
        let mut report = Report::default();
        for check in checks {
            let entry = check.evaluate(&self.ctx);
            match entry.status {
                CheckStatus::Ok => log::info!("[Verify] {}: {}", entry.check, entry.detail),
                CheckStatus::Warn => log::warn!("[Verify] {}: {}", entry.check, entry.detail),
                CheckStatus::Fail => log::error!("[Verify] {}: {}", entry.check, entry.detail),
            }
            report.push(entry);
        }
        report
    }
}

/// Release string of the running kernel.
pub fn running_release(paths: &SystemPaths) -> Result<String, String> {
    let path = paths.proc_file("sys/kernel/osrelease");
    fs::read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))
}

/// Config of kernel `release`: `/boot/config-<release>`, else `/proc/config.gz`.
pub fn read_kernel_config(paths: &SystemPaths, release: &str) -> Result<String, String> {
    let boot = paths.boot_config(release);
    if let Ok(content) = fs::read_to_string(&boot) {
        return Ok(content);
    }

    let proc_gz = paths.proc_file("config.gz");
    let file = fs::File::open(&proc_gz).map_err(|_| {
        format!(
            "no kernel config at {} or {}",
            boot.display(),
            proc_gz.display()
        )
    })?;
    let mut content = String::new();
    GzDecoder::new(file)
        .read_to_string(&mut content)
        .map_err(|e| format!("cannot decompress {}: {}", proc_gz.display(), e))?;
    Ok(content)
}

/// `<prefix>/bin/<tool>` when installed there, else the bare name for PATH lookup.
pub fn locate_tool(paths: &SystemPaths, prefix: &Path, tool: &str) -> PathBuf {
    let installed = paths.resolve(prefix.join("bin").join(tool));
    if installed.is_file() {
        installed
    } else {
        PathBuf::from(tool)
    }
}

fn check_kernel_identity(ctx: &VerificationContext<'_>) -> Result<String, String> {
    let release = running_release(ctx.paths)?;
    let tag = &ctx.config.kernel.release_tag;
    if release.contains(tag.as_str()) {
        Ok(format!("running {}", release))
    } else {
        Err(format!("running {}, expected a release containing '{}'", release, tag))
    }
}

fn check_kernel_flags(ctx: &VerificationContext<'_>) -> Result<String, String> {
    let release = running_release(ctx.paths)?;
    let content = read_kernel_config(ctx.paths, &release)?;
    let options = kconfig::parse_kconfig(&content);
    let required = kconfig::required_options(&ctx.config.kernel.release_tag);
    let missing = kconfig::missing_options(&options, &required);
    if missing.is_empty() {
        Ok(format!("{} required options set", required.len()))
    } else {
        Err(missing.join(", "))
    }
}

fn check_cpu_isolation(ctx: &VerificationContext<'_>) -> Result<String, String> {
    let expected = match ctx.config.isolated_cpus(ctx.cpu_count) {
        Some(list) => list,
        None => return Ok("single CPU host, nothing to isolate".to_string()),
    };
    let expected_set = cmdline::parse_cpu_list(&expected)
        .ok_or_else(|| format!("invalid configured CPU list '{}'", expected))?;

    let isolated = read_knob(&ctx.paths.cpu_sysfs().join("isolated"))
        .ok_or_else(|| "isolated CPU list not readable".to_string())?;
    let isolated_set = cmdline::parse_cpu_list(&isolated)
        .ok_or_else(|| format!("unparseable isolated list '{}'", isolated))?;
    if isolated_set != expected_set {
        return Err(format!(
            "isolated CPUs '{}', expected '{}'",
            isolated, expected
        ));
    }

    let proc_cmdline = fs::read_to_string(ctx.paths.proc_file("cmdline"))
        .map_err(|e| format!("cannot read kernel command line: {}", e))?;
    match cmdline::param_value(&proc_cmdline, "isolcpus") {
        Some(value) if cmdline::parse_cpu_list(value).as_ref() == Some(&expected_set) => {
            Ok(format!("CPUs {} isolated", expected))
        }
        Some(value) => Err(format!("isolcpus={} on command line, expected {}", value, expected)),
        None => Err("isolcpus missing from kernel command line".to_string()),
    }
}

fn check_governor(ctx: &VerificationContext<'_>) -> Result<String, String> {
    let wanted = &ctx.config.tuning.governor;
    let scan = ResourceScan::new(ctx.paths.cpu_sysfs(), "cpu*/cpufreq/scaling_governor");
    let mut total = 0;
    let mut mismatched = Vec::new();
    for path in scan.paths() {
        total += 1;
        let current = read_knob(&path).unwrap_or_default();
        if &current != wanted {
            mismatched.push(format!("{} ({})", path.display(), current));
        }
    }
    if total == 0 {
        return Ok("frequency scaling not present".to_string());
    }
    if mismatched.is_empty() {
        Ok(format!("{} on {} CPUs", wanted, total))
    } else {
        Err(format!("not '{}': {}", wanted, mismatched.join(", ")))
    }
}

fn check_hyperthreading(ctx: &VerificationContext<'_>) -> Result<String, String> {
    if !ctx.config.tuning.disable_smt {
        return Ok("not managed".to_string());
    }
    match read_knob(&ctx.paths.cpu_sysfs().join("smt/active")).as_deref() {
        Some("0") => Ok("disabled".to_string()),
        Some(_) => Err("SMT still active".to_string()),
        None => Err("SMT control not present".to_string()),
    }
}

fn check_tool(ctx: &VerificationContext<'_>, prefix: &Path, tool: &str, arg: &str) -> Result<String, String> {
    let program = locate_tool(ctx.paths, prefix, tool);
    ctx.tools.version(&program, arg)
}

/// The standard checks, in report order.
pub fn default_checks(config: &ProvisionConfig) -> Vec<VerificationCheck> {
    let framework_name = config.framework.name.clone();
    vec![
        VerificationCheck::new("kernel identity", Severity::Fatal, check_kernel_identity),
        VerificationCheck::new("kernel flags", Severity::Fatal, check_kernel_flags),
        VerificationCheck::new("cpu isolation", Severity::Fatal, check_cpu_isolation),
        VerificationCheck::new("cpu governor", Severity::Warning, check_governor),
        VerificationCheck::new("hyperthreading", Severity::Warning, check_hyperthreading),
        VerificationCheck::new("libevl", Severity::Fatal, |ctx| {
            let libevl = &ctx.config.libevl;
            check_tool(ctx, &libevl.prefix, &libevl.tool, &libevl.version_arg)
        }),
        VerificationCheck::new(framework_name, Severity::Fatal, |ctx| {
            let framework = &ctx.config.framework;
            check_tool(ctx, &framework.prefix, &framework.tool, &framework.version_arg)
        }),
    ]
}
