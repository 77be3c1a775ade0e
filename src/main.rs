use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use log::Level;
use tokio::sync::watch;

use rt_provision::cli::Cli;
use rt_provision::config::{loader, ProvisionConfig};
use rt_provision::hardware::LiveHostProbe;
use rt_provision::log_collector::{format_line, init_logging};
use rt_provision::orchestrator::{ConfirmPort, FixedConfirm, Orchestrator, StdinConfirm, TokioCommandRunner};
use rt_provision::system::{ProcessToolProbe, SystemPaths};
use rt_provision::ProvisionError;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // The log file location comes from the config, so the logger starts after it loads
    let loaded = if cli.verify_only {
        loader::load_for_verification(cli.config.as_deref(), cli.jobs)
    } else {
        loader::load(cli.config.as_deref(), cli.jobs)
    };
    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", format_line(Level::Error, &e.to_string()));
            return ExitCode::from(1);
        }
    };
    // Verification only reads the host, so it leaves no log file behind
    let log_file = config.log_file.as_deref().filter(|_| !cli.verify_only);
    init_logging(cli.verbose, log_file);
    log::info!("[Main] {}", loader::describe_source(cli.config.as_deref()));

    match run(&cli, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{}", err);
            let code = err
                .downcast_ref::<ProvisionError>()
                .map(ProvisionError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}

fn run(cli: &Cli, config: &ProvisionConfig) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;

    let result: anyhow::Result<()> = runtime.block_on(async {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("[Main] Interrupt received, stopping after terminating the running command");
                let _ = cancel_tx.send(true);
            }
        });

        let paths = SystemPaths::from_config(config);
        let runner = TokioCommandRunner::new(cancel_rx.clone());
        let probe = LiveHostProbe::new(paths);
        let tools = ProcessToolProbe;
        let confirm: Box<dyn ConfirmPort> = if cli.yes {
            Box::new(FixedConfirm(true))
        } else {
            Box::new(StdinConfirm)
        };

        let orchestrator = Orchestrator::new(config, &runner, &probe, &tools, confirm.as_ref(), cancel_rx)
            .with_invoking_user(std::env::var("SUDO_USER").ok())
            .with_reboot_prompt(!cli.no_reboot);

        if cli.verify_only {
            log::info!("[Main] Verification only, skipping all stages");
            let report = orchestrator.verify(num_cpus::get());
            println!("{}", report);
            return Ok(());
        }

        let summary = orchestrator.run().await?;
        if !summary.report.passed() {
            log::warn!(
                "[Main] {} fatal checks failed; they are expected to pass after rebooting into the new kernel",
                summary.report.count(rt_provision::CheckStatus::Fail)
            );
        }
        Ok(())
    });

    // A prompt abandoned on Ctrl-C still holds a blocking thread on stdin
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}
