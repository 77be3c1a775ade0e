//! Provisioning orchestration: prerequisites -> six ordered stages -> verification -> reboot prompt.

pub mod executor;
pub mod preflight;
pub mod reboot;
pub mod stages;
pub mod state;

pub use executor::{CommandOutput, CommandRunner, CommandSpec, TokioCommandRunner};
pub use preflight::{PrerequisiteReport, RequirementChecker};
pub use reboot::{ConfirmPort, FixedConfirm, StdinConfirm};
pub use stages::{default_stages, StageAction, StageContext};
pub use state::{OrchestrationState, PipelineState, StageState};

use futures::future;
use tokio::sync::watch;

use crate::config::ProvisionConfig;
use crate::error::{ProvisionError, Result, StageError};
use crate::hardware::HostProbe;
use crate::log_collector;
use crate::models::Report;
use crate::patcher::ConfigMutator;
use crate::system::paths::SystemPaths;
use crate::system::verification::{default_checks, ToolProbe, VerificationContext, VerificationEngine};

/// Outcome of a completed pipeline.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub state: OrchestrationState,
    pub prerequisites: PrerequisiteReport,
    pub report: Report,
    pub rebooting: bool,
}

/// Drives a provisioning run.
///
/// Runs stages strictly in order, stopping at the first failure. There is no
/// retry and no rollback: a rerun relies on every stage being idempotent.
pub struct Orchestrator<'a> {
    config: &'a ProvisionConfig,
    paths: SystemPaths,
    runner: &'a dyn CommandRunner,
    probe: &'a dyn HostProbe,
    tools: &'a dyn ToolProbe,
    confirm: &'a dyn ConfirmPort,
    stages: Vec<Box<dyn StageAction>>,
    mutator: ConfigMutator,
    cancel_rx: watch::Receiver<bool>,
    invoking_user: Option<String>,
    reboot_prompt: bool,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a ProvisionConfig,
        runner: &'a dyn CommandRunner,
        probe: &'a dyn HostProbe,
        tools: &'a dyn ToolProbe,
        confirm: &'a dyn ConfirmPort,
        cancel_rx: watch::Receiver<bool>,
    ) -> Self {
        Orchestrator {
            config,
            paths: SystemPaths::from_config(config),
            runner,
            probe,
            tools,
            confirm,
            stages: default_stages(),
            mutator: ConfigMutator::new(),
            cancel_rx,
            invoking_user: None,
            reboot_prompt: true,
        }
    }

    /// Replace the stage list.
    pub fn with_stages(mut self, stages: Vec<Box<dyn StageAction>>) -> Self {
        self.stages = stages;
        self
    }

    pub fn with_invoking_user(mut self, user: Option<String>) -> Self {
        self.invoking_user = user;
        self
    }

    /// Disable the reboot question entirely (`--no-reboot`).
    pub fn with_reboot_prompt(mut self, enabled: bool) -> Self {
        self.reboot_prompt = enabled;
        self
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Check prerequisites, run every stage, verify, then offer a reboot.
    pub async fn run(&self) -> Result<RunSummary> {
        log::info!("[Orchestrator] Checking host prerequisites");
        let prerequisites = RequirementChecker::new(self.probe)
            .check(&self.config.requirement_spec(), &self.config.workspace)?;
        let cpu_count = prerequisites.facts.cpu_count;

        // Nothing touches the host filesystem until the prerequisites hold
        if let Err(e) = log_collector::open_log_file() {
            log::warn!("[Log] {}", e);
        }

        let mut state = OrchestrationState::new(self.stages.iter().map(|s| s.name()));
        state
            .transition_pipeline(PipelineState::Running)
            .map_err(ProvisionError::State)?;

        let ctx = StageContext {
            config: self.config,
            paths: &self.paths,
            runner: self.runner,
            mutator: &self.mutator,
            cpu_count,
            invoking_user: self.invoking_user.clone(),
            cancel_rx: self.cancel_rx.clone(),
        };

        for (index, stage) in self.stages.iter().enumerate() {
            let name = stage.name();
            if self.is_cancelled() {
                state.record_error(format!("interrupted before '{}'", name));
                log::error!("[Orchestrator] Interrupted before stage '{}'", name);
                return Err(ProvisionError::Interrupted(name.to_string()));
            }

            state
                .transition_stage(index, StageState::Running)
                .map_err(ProvisionError::State)?;
            log::info!(
                "[Orchestrator] Stage {}/{} '{}' started: {}",
                index + 1,
                self.stages.len(),
                name,
                stage.description()
            );

            match stage.execute(&ctx).await {
                Ok(()) => {
                    state
                        .transition_stage(index, StageState::Succeeded)
                        .map_err(ProvisionError::State)?;
                    log::info!("[Orchestrator] Stage '{}' succeeded", name);
                }
                Err(err) => {
                    state
                        .transition_stage(index, StageState::Failed)
                        .map_err(ProvisionError::State)?;
                    state.record_error(err.to_string());
                    if matches!(err, StageError::Interrupted) {
                        log::error!("[Orchestrator] Stage '{}' interrupted", name);
                        return Err(ProvisionError::Interrupted(name.to_string()));
                    }
                    log::error!("[Orchestrator] Stage '{}' failed: {}", name, err);
                    return Err(ProvisionError::Stage {
                        stage: name,
                        source: err,
                    });
                }
            }
        }

        state
            .transition_pipeline(PipelineState::Completed)
            .map_err(ProvisionError::State)?;
        log::info!(
            "[Orchestrator] All {} stages completed in {}s",
            self.stages.len(),
            state.elapsed().as_secs()
        );

        let report = self.verify(cpu_count);
        println!("{}", report);
        let rebooting = self.offer_reboot().await?;

        Ok(RunSummary {
            state,
            prerequisites,
            report,
            rebooting,
        })
    }

    /// Run the default verification checks against the current host state.
    pub fn verify(&self, cpu_count: usize) -> Report {
        let engine = VerificationEngine::new(VerificationContext {
            config: self.config,
            paths: &self.paths,
            tools: self.tools,
            cpu_count,
        });
        engine.verify(&default_checks(self.config))
    }

    async fn offer_reboot(&self) -> Result<bool> {
        if !self.reboot_prompt {
            log::info!("[Reboot] Skipped; reboot manually to boot the real-time kernel");
            return Ok(false);
        }
        let mut cancel_rx = self.cancel_rx.clone();
        let confirmed = tokio::select! {
            answer = self.confirm.confirm("Reboot now to boot the real-time kernel?") => answer,
            () = cancelled(&mut cancel_rx) => {
                log::warn!("[Reboot] Interrupted at the prompt, not rebooting");
                return Err(ProvisionError::Interrupted("reboot".to_string()));
            }
        };
        if !confirmed {
            log::info!("[Reboot] Declined; reboot manually to boot the real-time kernel");
            return Ok(false);
        }
        if self.is_cancelled() {
            return Err(ProvisionError::Interrupted("reboot".to_string()));
        }
        self.runner
            .run(&CommandSpec::new("systemctl").arg("reboot"))
            .await
            .map_err(ProvisionError::Reboot)?;
        Ok(true)
    }
}

/// Resolves once cancellation is requested; never, if the sender is gone.
async fn cancelled(cancel_rx: &mut watch::Receiver<bool>) {
    loop {
        if *cancel_rx.borrow_and_update() {
            return;
        }
        if cancel_rx.changed().await.is_err() {
            future::pending::<()>().await;
        }
    }
}
