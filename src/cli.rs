use clap::Parser;
use std::path::PathBuf;

/// rt-provision - turn a Debian host into an EVL real-time target
#[derive(Parser, Debug)]
#[command(name = "rt-provision")]
#[command(about = "Build and install an EVL real-time kernel, libevl and the application framework, then verify the host")]
#[command(version)]
pub struct Cli {
    /// TOML configuration file (defaults apply when omitted)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Parallel build jobs (overrides the config file)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Answer yes to the reboot prompt
    #[arg(short, long, conflicts_with = "no_reboot")]
    pub yes: bool,

    /// Never reboot, not even ask
    #[arg(long)]
    pub no_reboot: bool,

    /// Skip all stages and only verify the current host
    #[arg(long)]
    pub verify_only: bool,

    /// Debug logging, including command output
    #[arg(short, long)]
    pub verbose: bool,
}
