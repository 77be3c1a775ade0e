//! Shared fakes and fixtures for the integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use futures::future::BoxFuture;
use rt_provision::config::ProvisionConfig;
use rt_provision::error::CommandError;
use rt_provision::models::HostFacts;
use rt_provision::orchestrator::{CommandOutput, CommandRunner, CommandSpec};
use rt_provision::system::ToolProbe;

pub const GIB: u64 = 1024 * 1024 * 1024;
pub const BUILT_RELEASE: &str = "6.6.30-evl";

type Effect = Box<dyn Fn(&CommandSpec) + Send + Sync>;

/// Records every command line; fails or answers according to prefix rules.
#[derive(Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<String>>,
    fail_on: Vec<String>,
    interrupt_on: Vec<String>,
    stdout: Vec<(String, String)>,
    effects: Vec<(String, Effect)>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        RecordingRunner::default().with_stdout("make -s kernelrelease", &format!("{}\n", BUILT_RELEASE))
    }

    /// Commands whose line starts with `prefix` exit with code 2.
    pub fn failing_on(mut self, prefix: &str) -> Self {
        self.fail_on.push(prefix.to_string());
        self
    }

    /// Commands whose line starts with `prefix` report an interruption.
    pub fn interrupting_on(mut self, prefix: &str) -> Self {
        self.interrupt_on.push(prefix.to_string());
        self
    }

    pub fn with_stdout(mut self, prefix: &str, stdout: &str) -> Self {
        self.stdout.push((prefix.to_string(), stdout.to_string()));
        self
    }

    /// Run `effect` when a command starting with `prefix` succeeds, standing
    /// in for what the real tool would do to the filesystem.
    pub fn with_effect(mut self, prefix: &str, effect: impl Fn(&CommandSpec) + Send + Sync + 'static) -> Self {
        self.effects.push((prefix.to_string(), Box::new(effect)));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Index of the first recorded call starting with `prefix`.
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.calls().iter().position(|c| c.starts_with(prefix))
    }

    pub fn ran(&self, prefix: &str) -> bool {
        self.position(prefix).is_some()
    }
}

impl CommandRunner for RecordingRunner {
    fn run<'a>(&'a self, spec: &'a CommandSpec) -> BoxFuture<'a, Result<CommandOutput, CommandError>> {
        let line = spec.command_line();
        self.calls.lock().unwrap().push(line.clone());

        let result = if self.interrupt_on.iter().any(|p| line.starts_with(p.as_str())) {
            Err(CommandError::Interrupted {
                program: spec.program.clone(),
            })
        } else if self.fail_on.iter().any(|p| line.starts_with(p.as_str())) {
            Err(CommandError::NonZeroExit {
                program: spec.program.clone(),
                args: spec.args.clone(),
                code: Some(2),
                stderr_tail: "simulated failure".to_string(),
            })
        } else {
            for (_, effect) in self.effects.iter().filter(|(p, _)| line.starts_with(p.as_str())) {
                effect(spec);
            }
            let stdout = self
                .stdout
                .iter()
                .find(|(p, _)| line.starts_with(p.as_str()))
                .map(|(_, out)| out.clone())
                .unwrap_or_default();
            Ok(CommandOutput {
                code: Some(0),
                stdout,
                stderr_tail: String::new(),
            })
        };
        Box::pin(async move { result })
    }
}

/// Every tool reports a version.
pub struct FakeTools;

impl ToolProbe for FakeTools {
    fn version(&self, program: &Path, _arg: &str) -> Result<String, String> {
        Ok(format!("{} 1.0", program.display()))
    }
}

/// A privileged Debian host with 4 CPUs and plenty of room.
pub fn healthy_facts() -> HostFacts {
    HostFacts {
        euid: 0,
        free_disk_bytes: 100 * GIB,
        available_memory_bytes: 16 * GIB,
        cpu_count: 4,
        os_marker_present: true,
    }
}

pub fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

pub fn read(root: &Path, rel: &str) -> String {
    fs::read_to_string(root.join(rel)).unwrap_or_default()
}

/// Config whose host paths all live under `root`.
pub fn config_for(root: &Path) -> ProvisionConfig {
    let mut config = ProvisionConfig::default();
    config.paths.root = root.to_path_buf();
    config.jobs = 4;
    config.log_file = None;
    config.framework.repository = "https://example.org/rtf.git".to_string();
    config
}

/// A fake Debian host tree: running distro kernel, GRUB defaults, four CPUs
/// with cpufreq, a limits directory, and no SMT control.
pub fn fake_host(root: &Path) {
    write(root, "etc/debian_version", "12.5\n");
    write(root, "proc/sys/kernel/osrelease", "6.1.0-18-amd64\n");
    write(root, "boot/config-6.1.0-18-amd64", "CONFIG_EVL=n\nCONFIG_CPU_FREQ=y\n");
    write(
        root,
        "etc/default/grub",
        "GRUB_DEFAULT=0\nGRUB_TIMEOUT=5\nGRUB_CMDLINE_LINUX_DEFAULT=\"quiet splash\"\nGRUB_CMDLINE_LINUX=\"\"\n",
    );
    write(root, "etc/sysctl.conf", "# sysctl settings\nvm.swappiness = 10\n");
    fs::create_dir_all(root.join("etc/security/limits.d")).unwrap();
    for cpu in 0..4 {
        write(
            root,
            &format!("sys/devices/system/cpu/cpu{}/cpufreq/scaling_governor", cpu),
            "powersave\n",
        );
    }
    write(root, "sys/devices/system/cpu/isolated", "\n");
    write(root, "proc/cmdline", "BOOT_IMAGE=/vmlinuz root=/dev/sda1 quiet\n");
}

/// Pre-existing kernel checkout with a stale `.config`.
pub fn existing_kernel_tree(root: &Path, dot_config: &str) -> PathBuf {
    let tree = root.join("usr/src/rt-provision/linux-evl");
    fs::create_dir_all(tree.join(".git")).unwrap();
    fs::write(tree.join(".config"), dot_config).unwrap();
    tree
}

/// All regular files under `dir`, relative, sorted.
pub fn list_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        if let Ok(entries) = fs::read_dir(&current) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    files.push(path.strip_prefix(dir).unwrap().to_path_buf());
                }
            }
        }
    }
    files.sort();
    files
}
