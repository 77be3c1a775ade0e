//! The six provisioning stages.
//!
//! Each stage is a `StageAction`: it receives a `StageContext` and changes
//! the host only through the context's `CommandRunner` and `ConfigMutator`
//! (plus best-effort knob writes in the tuning stage). Required sub-actions
//! propagate their error; best-effort ones are logged as warnings and skipped.

use std::path::{Path, PathBuf};

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::watch;

use crate::config::ProvisionConfig;
use crate::error::{CommandError, StageError};
use crate::kernel::{cmdline, kconfig};
use crate::models::{ConfigAssertion, ConfigSyntax};
use crate::orchestrator::executor::{CommandOutput, CommandRunner, CommandSpec};
use crate::patcher::{ConfigMutator, MutationOutcome};
use crate::system::paths::SystemPaths;
use crate::system::sysfs::{write_knob, KnobOutcome, ResourceScan};
use crate::system::verification::running_release;

/// Scheduler tunables written to the sysctl configuration.
pub const SYSCTL_TUNABLES: &[(&str, &str)] = &[
    ("kernel.sched_rt_runtime_us", "-1"),
    ("kernel.sched_rt_period_us", "1000000"),
    ("kernel.sched_autogroup_enabled", "0"),
    ("kernel.timer_migration", "0"),
    ("kernel.numa_balancing", "0"),
    ("kernel.sched_schedstats", "0"),
];

/// Everything a stage may use.
pub struct StageContext<'a> {
    pub config: &'a ProvisionConfig,
    pub paths: &'a SystemPaths,
    pub runner: &'a dyn CommandRunner,
    pub mutator: &'a ConfigMutator,
    pub cpu_count: usize,
    /// User who invoked the tool through sudo, added to the access group
    pub invoking_user: Option<String>,
    pub cancel_rx: watch::Receiver<bool>,
}

impl<'a> StageContext<'a> {
    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Run a required command. Checks cancellation first.
    pub async fn run(&self, spec: CommandSpec) -> Result<CommandOutput, StageError> {
        if self.is_cancelled() {
            return Err(StageError::Interrupted);
        }
        self.runner.run(&spec).await.map_err(StageError::build)
    }

    /// Run a command whose failure only warrants a warning. Interruption still propagates.
    pub async fn run_best_effort(&self, spec: CommandSpec) -> Result<(), StageError> {
        if self.is_cancelled() {
            return Err(StageError::Interrupted);
        }
        match self.runner.run(&spec).await {
            Ok(_) => Ok(()),
            Err(CommandError::Interrupted { .. }) => Err(StageError::Interrupted),
            Err(e) => {
                log::warn!("[Stage] Best-effort step failed, continuing: {}", e);
                Ok(())
            }
        }
    }

    /// Host path for `path` under the configured root.
    pub fn host(&self, path: impl AsRef<Path>) -> PathBuf {
        self.paths.resolve(path)
    }

    fn jobs(&self) -> String {
        self.config.effective_jobs().to_string()
    }
}

/// One named unit of the pipeline.
pub trait StageAction: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Whether a rerun on an already-provisioned host changes nothing.
    fn idempotent(&self) -> bool {
        false
    }

    fn execute<'a>(&'a self, ctx: &'a StageContext<'a>) -> BoxFuture<'a, Result<(), StageError>>;
}

/// The stages in execution order.
pub fn default_stages() -> Vec<Box<dyn StageAction>> {
    vec![
        Box::new(DependenciesStage),
        Box::new(KernelStage),
        Box::new(LibevlStage),
        Box::new(FrameworkStage),
        Box::new(EnvironmentStage),
        Box::new(TuningStage),
    ]
}

/// Clone `repository` into `dest` unless a checkout is already there.
async fn clone_if_missing(
    ctx: &StageContext<'_>,
    repository: &str,
    branch: &str,
    dest: &Path,
) -> Result<(), StageError> {
    if dest.join(".git").exists() {
        log::info!("[Stage] {} already cloned, reusing it", dest.display());
        return Ok(());
    }
    ctx.run(
        CommandSpec::new("git")
            .args(["clone", "--depth", "1", "--branch", branch, repository])
            .arg(dest.to_string_lossy()),
    )
    .await?;
    Ok(())
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

pub struct DependenciesStage;

impl StageAction for DependenciesStage {
    fn name(&self) -> &'static str {
        "dependencies"
    }

    fn description(&self) -> &'static str {
        "Install build and runtime packages"
    }

    fn idempotent(&self) -> bool {
        true
    }

    fn execute<'a>(&'a self, ctx: &'a StageContext<'a>) -> BoxFuture<'a, Result<(), StageError>> {
        async move {
            if ctx.is_cancelled() {
                return Err(StageError::Interrupted);
            }
            ctx.runner
                .run(&CommandSpec::new("apt-get").arg("update"))
                .await
                .map_err(StageError::dependency)?;

            if ctx.is_cancelled() {
                return Err(StageError::Interrupted);
            }
            let install = CommandSpec::new("apt-get")
                .args(["install", "-y", "--no-install-recommends"])
                .args(ctx.config.packages.iter().cloned())
                .env("DEBIAN_FRONTEND", "noninteractive");
            ctx.runner
                .run(&install)
                .await
                .map_err(StageError::dependency)?;

            log::info!("[Deps] {} packages present", ctx.config.packages.len());
            Ok(())
        }
        .boxed()
    }
}

pub struct KernelStage;

impl KernelStage {
    /// Start `.config` from the running kernel's config, or the architecture defaults.
    async fn seed_config(ctx: &StageContext<'_>, tree: &Path, dot_config: &Path) -> Result<(), StageError> {
        if dot_config.exists() {
            log::info!("[Kernel] Keeping existing {}", dot_config.display());
            return Ok(());
        }

        let boot_config = running_release(ctx.paths)
            .ok()
            .map(|release| ctx.paths.boot_config(&release))
            .filter(|path| path.is_file());

        match boot_config {
            Some(source) => {
                log::info!("[Kernel] Seeding .config from {}", source.display());
                ctx.run(CommandSpec::new("cp").arg(path_arg(&source)).arg(path_arg(dot_config)))
                    .await?;
            }
            None => {
                log::info!("[Kernel] No running kernel config found, using defconfig");
                ctx.run(CommandSpec::new("make").arg("defconfig").current_dir(tree))
                    .await?;
            }
        }
        Ok(())
    }
}

impl StageAction for KernelStage {
    fn name(&self) -> &'static str {
        "kernel"
    }

    fn description(&self) -> &'static str {
        "Build and install the EVL real-time kernel"
    }

    fn execute<'a>(&'a self, ctx: &'a StageContext<'a>) -> BoxFuture<'a, Result<(), StageError>> {
        async move {
            let section = &ctx.config.kernel;
            let tree = ctx.host(ctx.config.kernel_dir());
            let dot_config = tree.join(".config");

            clone_if_missing(ctx, &section.repository, &section.branch, &tree).await?;
            Self::seed_config(ctx, &tree, &dot_config).await?;

            let assertions = kconfig::required_assertions(&dot_config, &section.release_tag);
            ctx.mutator.apply_all(&assertions)?;
            ctx.run(CommandSpec::new("make").arg("olddefconfig").current_dir(&tree))
                .await?;

            // olddefconfig silently drops options with unmet dependencies
            ctx.mutator.assert_present(&dot_config, &assertions)?;

            ctx.run(
                CommandSpec::new("make")
                    .arg(format!("-j{}", ctx.jobs()))
                    .current_dir(&tree),
            )
            .await?;
            ctx.run(CommandSpec::new("make").arg("modules_install").current_dir(&tree))
                .await?;
            ctx.run(CommandSpec::new("make").arg("install").current_dir(&tree))
                .await?;

            let output = ctx
                .run(CommandSpec::new("make").args(["-s", "kernelrelease"]).current_dir(&tree))
                .await?;
            let release = output.stdout.trim().to_string();
            if release.is_empty() || release.contains(char::is_whitespace) {
                return Err(StageError::UnexpectedOutput {
                    program: "make -s kernelrelease".to_string(),
                    detail: format!("'{}' is not a kernel release", release),
                });
            }
            log::info!("[Kernel] Installed kernel {}", release);

            let initrd = ctx.host(format!("/boot/initrd.img-{}", release));
            let mode = if initrd.exists() { "-u" } else { "-c" };
            ctx.run(CommandSpec::new("update-initramfs").args([mode, "-k", release.as_str()]))
                .await?;
            ctx.run(CommandSpec::new("update-grub")).await?;
            Ok(())
        }
        .boxed()
    }
}

pub struct LibevlStage;

impl StageAction for LibevlStage {
    fn name(&self) -> &'static str {
        "libevl"
    }

    fn description(&self) -> &'static str {
        "Build and install the EVL user-space library"
    }

    fn execute<'a>(&'a self, ctx: &'a StageContext<'a>) -> BoxFuture<'a, Result<(), StageError>> {
        async move {
            let section = &ctx.config.libevl;
            let tree = ctx.host(ctx.config.libevl_dir());
            let build = tree.join("build");
            let kernel_tree = ctx.host(ctx.config.kernel_dir());

            clone_if_missing(ctx, &section.repository, &section.branch, &tree).await?;

            let mut setup = CommandSpec::new("meson")
                .arg("setup")
                .arg(path_arg(&build))
                .arg(format!("--prefix={}", section.prefix.display()))
                .arg(format!("-Duapi={}", kernel_tree.display()))
                .current_dir(&tree);
            if build.join("meson-private").exists() {
                setup = setup.arg("--reconfigure");
            }
            ctx.run(setup).await?;

            ctx.run(
                CommandSpec::new("ninja")
                    .arg("-C")
                    .arg(path_arg(&build))
                    .arg(format!("-j{}", ctx.jobs())),
            )
            .await?;
            ctx.run(CommandSpec::new("ninja").arg("-C").arg(path_arg(&build)).arg("install"))
                .await?;
            ctx.run(CommandSpec::new("ldconfig")).await?;
            Ok(())
        }
        .boxed()
    }
}

pub struct FrameworkStage;

impl StageAction for FrameworkStage {
    fn name(&self) -> &'static str {
        "framework"
    }

    fn description(&self) -> &'static str {
        "Build and install the real-time framework"
    }

    fn execute<'a>(&'a self, ctx: &'a StageContext<'a>) -> BoxFuture<'a, Result<(), StageError>> {
        async move {
            let section = &ctx.config.framework;
            let tree = ctx.host(ctx.config.framework_dir());

            clone_if_missing(ctx, &section.repository, &section.branch, &tree).await?;

            ctx.run(
                CommandSpec::new("cmake")
                    .args(["-S", ".", "-B", "build"])
                    .arg(format!("-DCMAKE_INSTALL_PREFIX={}", section.prefix.display()))
                    .arg(format!("-DCMAKE_PREFIX_PATH={}", ctx.config.libevl.prefix.display()))
                    .arg("-DCMAKE_BUILD_TYPE=Release")
                    .current_dir(&tree),
            )
            .await?;
            ctx.run(
                CommandSpec::new("cmake")
                    .args(["--build", "build", "-j"])
                    .arg(ctx.jobs())
                    .current_dir(&tree),
            )
            .await?;
            ctx.run(CommandSpec::new("cmake").args(["--install", "build"]).current_dir(&tree))
                .await?;
            Ok(())
        }
        .boxed()
    }
}

/// Assertions making up the login environment block.
pub fn environment_assertions(config: &ProvisionConfig, profile: &Path) -> Vec<ConfigAssertion> {
    let fw = &config.framework.prefix;
    let evl = &config.libevl.prefix;
    let prepend = |var: &str, a: PathBuf, b: PathBuf| {
        format!(
            "{}:{}${{{var}:+:${var}}}",
            a.display(),
            b.display(),
            var = var
        )
    };
    vec![
        ConfigAssertion::exported(&config.framework.root_var, &fw.display().to_string(), profile),
        ConfigAssertion::exported("PATH", &prepend("PATH", fw.join("bin"), evl.join("bin")), profile),
        ConfigAssertion::exported(
            "LD_LIBRARY_PATH",
            &prepend("LD_LIBRARY_PATH", fw.join("lib"), evl.join("lib")),
            profile,
        ),
        ConfigAssertion::exported(
            "PKG_CONFIG_PATH",
            &prepend("PKG_CONFIG_PATH", fw.join("lib/pkgconfig"), evl.join("lib/pkgconfig")),
            profile,
        ),
    ]
}

/// Write the environment block into the login profile and confirm it.
pub fn install_environment_block(ctx: &StageContext<'_>) -> Result<Vec<MutationOutcome>, StageError> {
    let profile = ctx.host(&ctx.config.paths.profile_script);
    let assertions = environment_assertions(ctx.config, &profile);
    let outcomes = ctx.mutator.apply_all(&assertions)?;
    ctx.mutator.assert_present(&profile, &assertions)?;
    log::info!("[Env] Environment block installed in {}", profile.display());
    Ok(outcomes)
}

pub struct EnvironmentStage;

impl StageAction for EnvironmentStage {
    fn name(&self) -> &'static str {
        "environment"
    }

    fn description(&self) -> &'static str {
        "Install the login environment and access group"
    }

    fn idempotent(&self) -> bool {
        true
    }

    fn execute<'a>(&'a self, ctx: &'a StageContext<'a>) -> BoxFuture<'a, Result<(), StageError>> {
        async move {
            install_environment_block(ctx)?;

            let group = &ctx.config.access_group;
            ctx.run(CommandSpec::new("groupadd").args(["-f", group.as_str()]))
                .await?;

            match ctx.invoking_user.as_deref() {
                Some(user) if user != "root" => {
                    ctx.run_best_effort(CommandSpec::new("usermod").args(["-aG", group.as_str(), user]))
                        .await?;
                }
                _ => log::info!("[Env] No sudo user to add to group '{}'", group),
            }
            Ok(())
        }
        .boxed()
    }
}

pub struct TuningStage;

impl TuningStage {
    fn apply_sysctl(ctx: &StageContext<'_>) -> Result<PathBuf, StageError> {
        let conf = ctx.host(&ctx.config.paths.sysctl_conf);
        let assertions: Vec<ConfigAssertion> = SYSCTL_TUNABLES
            .iter()
            .map(|(key, value)| ConfigAssertion::sysctl(key, value, &conf))
            .collect();
        ctx.mutator.apply_all(&assertions)?;
        ctx.mutator.assert_present(&conf, &assertions)?;
        Ok(conf)
    }

    fn apply_grub(ctx: &StageContext<'_>) -> Result<(), StageError> {
        let grub = ctx.host(&ctx.config.paths.grub_default);
        let current = ctx
            .mutator
            .current_value(&grub, cmdline::GRUB_CMDLINE_VAR, ConfigSyntax::Shell)?
            .unwrap_or_default();

        let isolated = ctx.config.isolated_cpus(ctx.cpu_count);
        let required = cmdline::required_params(isolated.as_deref(), ctx.config.tuning.disable_mitigations);
        let merged = cmdline::merge_cmdline(cmdline::unquote(&current), &required);
        log::info!("[Tuning] [GRUB] {}=\"{}\"", cmdline::GRUB_CMDLINE_VAR, merged);

        let assertion = ConfigAssertion::shell(cmdline::GRUB_CMDLINE_VAR, &cmdline::quote(&merged), &grub);
        ctx.mutator.apply(&assertion)?;
        ctx.mutator.assert_present(&grub, std::slice::from_ref(&assertion))?;
        Ok(())
    }

    /// Runtime knobs; a missing knob is a warning, never a failure.
    fn apply_knobs(ctx: &StageContext<'_>) -> Vec<(PathBuf, KnobOutcome)> {
        let tuning = &ctx.config.tuning;
        let cpu = ctx.paths.cpu_sysfs();
        let mut outcomes = Vec::new();

        let governors: Vec<PathBuf> = ResourceScan::new(&cpu, "cpu*/cpufreq/scaling_governor")
            .paths()
            .collect();
        if governors.is_empty() {
            log::warn!("[Tuning] No cpufreq governors under {}", cpu.display());
        }
        for path in governors {
            let outcome = write_knob(&path, &tuning.governor);
            outcomes.push((path, outcome));
        }

        let mut knobs: Vec<(PathBuf, &str)> = Vec::new();
        if tuning.disable_turbo {
            knobs.push((cpu.join("intel_pstate/no_turbo"), "1"));
            knobs.push((cpu.join("cpufreq/boost"), "0"));
        }
        if tuning.disable_smt {
            knobs.push((cpu.join("smt/control"), "off"));
        }
        if tuning.disable_watchdog {
            knobs.push((ctx.paths.proc_file("sys/kernel/watchdog"), "0"));
        }
        for (path, value) in knobs {
            let outcome = write_knob(&path, value);
            outcomes.push((path, outcome));
        }
        outcomes
    }

    fn apply_limits(ctx: &StageContext<'_>) -> Result<(), StageError> {
        let limits = ctx.host(&ctx.config.paths.limits_conf);
        match limits.parent() {
            Some(dir) if dir.is_dir() => {}
            _ => {
                log::warn!("[Tuning] {} has no limits directory, skipping RT limits", limits.display());
                return Ok(());
            }
        }
        let domain = format!("@{}", ctx.config.access_group);
        let assertions = vec![
            ConfigAssertion::new(
                format!("{} - rtprio", domain),
                ctx.config.tuning.rt_priority.to_string(),
                &limits,
                ConfigSyntax::Limits,
            ),
            ConfigAssertion::new(format!("{} - memlock", domain), "unlimited", &limits, ConfigSyntax::Limits),
        ];
        ctx.mutator.apply_all(&assertions)?;
        Ok(())
    }
}

impl StageAction for TuningStage {
    fn name(&self) -> &'static str {
        "tuning"
    }

    fn description(&self) -> &'static str {
        "Apply scheduler, boot and power tuning"
    }

    fn idempotent(&self) -> bool {
        true
    }

    fn execute<'a>(&'a self, ctx: &'a StageContext<'a>) -> BoxFuture<'a, Result<(), StageError>> {
        async move {
            let conf = Self::apply_sysctl(ctx)?;
            ctx.run_best_effort(CommandSpec::new("sysctl").arg("-p").arg(path_arg(&conf)))
                .await?;

            Self::apply_grub(ctx)?;
            ctx.run(CommandSpec::new("update-grub")).await?;

            let outcomes = Self::apply_knobs(ctx);
            let written = outcomes
                .iter()
                .filter(|(_, o)| *o == KnobOutcome::Written)
                .count();
            log::info!("[Tuning] {} of {} knobs written", written, outcomes.len());

            Self::apply_limits(ctx)?;
            Ok(())
        }
        .boxed()
    }
}
