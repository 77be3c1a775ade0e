//! Verification against a fake host that has already rebooted into the
//! real-time kernel.

mod common;

use common::*;
use rt_provision::hardware::StaticHostProbe;
use rt_provision::kernel::kconfig;
use rt_provision::orchestrator::{FixedConfirm, Orchestrator};
use rt_provision::system::ToolProbe;
use rt_provision::{CheckStatus, ConfigMutator, ProvisionConfig, Report};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;
use tokio::sync::watch;

/// Records which binaries were probed.
#[derive(Default)]
struct ProbedTools(Mutex<Vec<(PathBuf, String)>>);

impl ToolProbe for ProbedTools {
    fn version(&self, program: &Path, arg: &str) -> Result<String, String> {
        self.0
            .lock()
            .unwrap()
            .push((program.to_path_buf(), arg.to_string()));
        Ok("1.0".to_string())
    }
}

/// Host after a successful provisioning run and reboot.
fn provisioned_host(root: &Path) {
    fake_host(root);
    write(root, "proc/sys/kernel/osrelease", &format!("{}\n", BUILT_RELEASE));
    let boot_config = root.join(format!("boot/config-{}", BUILT_RELEASE));
    write(root, &format!("boot/config-{}", BUILT_RELEASE), "CONFIG_X86_64=y\n");
    ConfigMutator::new()
        .apply_all(&kconfig::required_assertions(&boot_config, "evl"))
        .unwrap();

    write(root, "sys/devices/system/cpu/isolated", "1-3\n");
    write(
        root,
        "proc/cmdline",
        "BOOT_IMAGE=/vmlinuz-6.6.30-evl root=/dev/sda1 quiet isolcpus=managed_irq,domain,1-3 nohz_full=1-3\n",
    );
    for cpu in 0..4 {
        write(
            root,
            &format!("sys/devices/system/cpu/cpu{}/cpufreq/scaling_governor", cpu),
            "performance\n",
        );
    }
    write(root, "sys/devices/system/cpu/smt/active", "0\n");
    write(root, "usr/evl/bin/evl", "#!/bin/sh\n");
}

fn verify(config: &ProvisionConfig, tools: &dyn ToolProbe, cpu_count: usize) -> Report {
    let runner = RecordingRunner::new();
    let probe = StaticHostProbe(healthy_facts());
    let confirm = FixedConfirm(false);
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let orchestrator = Orchestrator::new(config, &runner, &probe, tools, &confirm, cancel_rx);
    let report = orchestrator.verify(cpu_count);
    assert!(runner.calls().is_empty(), "verification must not run commands");
    report
}

#[test]
fn test_provisioned_host_passes_every_check() {
    let dir = TempDir::new().unwrap();
    provisioned_host(dir.path());
    let config = config_for(dir.path());
    let tools = ProbedTools::default();

    let report = verify(&config, &tools, 4);

    assert_eq!(report.len(), 7);
    assert!(report.passed(), "{}", report);
    assert_eq!(report.count(CheckStatus::Ok), 7, "{}", report);
    assert!(report.warnings().is_empty());

    let probed = tools.0.lock().unwrap().clone();
    assert_eq!(
        probed,
        vec![
            (dir.path().join("usr/evl/bin/evl"), "-V".to_string()),
            (PathBuf::from("rtf"), "--version".to_string()),
        ]
    );
}

#[test]
fn test_report_order_and_rendering() {
    let dir = TempDir::new().unwrap();
    provisioned_host(dir.path());
    let config = config_for(dir.path());

    let report = verify(&config, &FakeTools, 4);
    let names: Vec<&str> = report.entries.iter().map(|e| e.check.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "kernel identity",
            "kernel flags",
            "cpu isolation",
            "cpu governor",
            "hyperthreading",
            "libevl",
            "rtf"
        ]
    );

    let rendered = report.to_string();
    assert!(rendered.contains("[  OK] kernel identity"));
    assert!(rendered.ends_with("7 ok, 0 warnings, 0 failed"));
}

#[test]
fn test_missing_option_fails_kernel_flags_only() {
    let dir = TempDir::new().unwrap();
    provisioned_host(dir.path());
    let boot_config = format!("boot/config-{}", BUILT_RELEASE);
    let content = read(dir.path(), &boot_config).replace("CONFIG_PREEMPT_RT=y", "# CONFIG_PREEMPT_RT is not set");
    write(dir.path(), &boot_config, &content);
    let config = config_for(dir.path());

    let report = verify(&config, &FakeTools, 4);

    let flags = report.entry("kernel flags").unwrap();
    assert_eq!(flags.status, CheckStatus::Fail);
    assert!(flags.detail.contains("CONFIG_PREEMPT_RT=y (found n)"), "{}", flags.detail);
    assert_eq!(report.count(CheckStatus::Fail), 1);
    assert_eq!(report.len(), 7);
}

#[test]
fn test_soft_discrepancies_are_warnings() {
    let dir = TempDir::new().unwrap();
    provisioned_host(dir.path());
    write(dir.path(), "sys/devices/system/cpu/cpu2/cpufreq/scaling_governor", "schedutil\n");
    write(dir.path(), "sys/devices/system/cpu/smt/active", "1\n");
    let config = config_for(dir.path());

    let report = verify(&config, &FakeTools, 4);

    assert!(report.passed());
    assert_eq!(report.count(CheckStatus::Warn), 2);
    let warned: Vec<String> = report.warnings().into_iter().map(|w| w.check).collect();
    assert_eq!(warned, vec!["cpu governor", "hyperthreading"]);
}

#[test]
fn test_isolation_mismatch_fails() {
    let dir = TempDir::new().unwrap();
    provisioned_host(dir.path());
    write(dir.path(), "sys/devices/system/cpu/isolated", "2-3\n");
    let config = config_for(dir.path());

    let report = verify(&config, &FakeTools, 4);

    assert_eq!(report.entry("cpu isolation").unwrap().status, CheckStatus::Fail);
    assert!(!report.passed());
}

#[test]
fn test_single_cpu_host_needs_no_isolation() {
    let dir = TempDir::new().unwrap();
    provisioned_host(dir.path());
    write(dir.path(), "sys/devices/system/cpu/isolated", "\n");
    write(dir.path(), "proc/cmdline", "BOOT_IMAGE=/vmlinuz root=/dev/sda1\n");
    let config = config_for(dir.path());

    let report = verify(&config, &FakeTools, 1);

    assert_eq!(report.entry("cpu isolation").unwrap().status, CheckStatus::Ok);
}

#[test]
fn test_unavailable_tool_fails_its_check() {
    struct BrokenFramework;

    impl ToolProbe for BrokenFramework {
        fn version(&self, program: &Path, _arg: &str) -> Result<String, String> {
            if program.ends_with("rtf") {
                Err("rtf: command not found".to_string())
            } else {
                Ok("evl 1.0".to_string())
            }
        }
    }

    let dir = TempDir::new().unwrap();
    provisioned_host(dir.path());
    let config = config_for(dir.path());

    let report = verify(&config, &BrokenFramework, 4);

    let entry = report.entry("rtf").unwrap();
    assert_eq!(entry.status, CheckStatus::Fail);
    assert_eq!(entry.detail, "rtf: command not found");
    assert_eq!(report.entry("libevl").unwrap().status, CheckStatus::Ok);
}
