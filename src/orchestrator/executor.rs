//! External command execution.
//!
//! Every program the provisioner runs (apt-get, git, make, meson, ninja,
//! cmake, update-grub, ...) goes through a `CommandRunner`. The live
//! implementation spawns each command in its own process group, streams its
//! output into the log, and watches the cancellation channel: on Ctrl-C the
//! whole group gets SIGTERM, then SIGKILL once the grace period expires.

use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use futures::future::BoxFuture;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;

use crate::error::CommandError;

/// Number of stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Time a terminated process group gets before SIGKILL.
const DEFAULT_TERM_GRACE: Duration = Duration::from_secs(5);

/// A program invocation: argv, working directory and extra environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        CommandSpec {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// `program arg1 arg2 ...`, as logged and recorded by fakes.
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Result of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr_tail: String,
}

/// Runs external programs. Only a zero exit status is `Ok`.
pub trait CommandRunner: Send + Sync {
    fn run<'a>(&'a self, spec: &'a CommandSpec) -> BoxFuture<'a, Result<CommandOutput, CommandError>>;
}

/// Live runner backed by `tokio::process`.
#[derive(Debug, Clone)]
pub struct TokioCommandRunner {
    cancel_rx: watch::Receiver<bool>,
    grace: Duration,
}

impl TokioCommandRunner {
    /// Create a runner that aborts in-flight commands when `cancel_rx` turns true.
    pub fn new(cancel_rx: watch::Receiver<bool>) -> Self {
        TokioCommandRunner {
            cancel_rx,
            grace: DEFAULT_TERM_GRACE,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    async fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        let mut cancel_rx = self.cancel_rx.clone();
        if *cancel_rx.borrow() {
            return Err(CommandError::Interrupted {
                program: spec.program.clone(),
            });
        }

        log::info!("[Executor] $ {}", spec);

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            command.current_dir(dir);
        }
        for (key, value) in &spec.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|source| CommandError::Spawn {
            program: spec.program.clone(),
            source,
        })?;
        let pgid = child.id().map(|id| Pid::from_raw(id as i32));

        let stdout = child.stdout.take().ok_or_else(|| missing_pipe(spec, "stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe(spec, "stderr"))?;
        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();

        let mut captured = String::new();
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let mut stdout_closed = false;
        let mut stderr_closed = false;
        let mut cancel_open = true;
        let mut cancelled = false;

        while !(stdout_closed && stderr_closed) {
            tokio::select! {
                line = stdout_lines.next_line(), if !stdout_closed => match line {
                    Ok(Some(line)) => {
                        log::debug!("[{}] {}", spec.program, line);
                        captured.push_str(&line);
                        captured.push('\n');
                    }
                    Ok(None) => stdout_closed = true,
                    Err(e) => {
                        log::warn!("[Executor] stdout read error from '{}': {}", spec.program, e);
                        stdout_closed = true;
                    }
                },
                line = stderr_lines.next_line(), if !stderr_closed => match line {
                    Ok(Some(line)) => {
                        log::debug!("[{}] {}", spec.program, line);
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                    Ok(None) => stderr_closed = true,
                    Err(e) => {
                        log::warn!("[Executor] stderr read error from '{}': {}", spec.program, e);
                        stderr_closed = true;
                    }
                },
                changed = cancel_rx.changed(), if cancel_open => {
                    if changed.is_err() {
                        cancel_open = false;
                    } else if *cancel_rx.borrow() {
                        cancelled = true;
                        break;
                    }
                }
            }
        }

        if cancelled {
            self.terminate(&mut child, pgid, &spec.program).await;
            return Err(CommandError::Interrupted {
                program: spec.program.clone(),
            });
        }

        let status = loop {
            tokio::select! {
                status = child.wait() => {
                    break Some(status.map_err(|source| CommandError::Io {
                        program: spec.program.clone(),
                        source,
                    })?);
                }
                changed = cancel_rx.changed(), if cancel_open => {
                    if changed.is_err() {
                        cancel_open = false;
                    } else if *cancel_rx.borrow() {
                        break None;
                    }
                }
            }
        };

        let status = match status {
            Some(status) => status,
            None => {
                self.terminate(&mut child, pgid, &spec.program).await;
                return Err(CommandError::Interrupted {
                    program: spec.program.clone(),
                });
            }
        };

        let stderr_tail = tail.into_iter().collect::<Vec<_>>().join("\n");
        if !status.success() {
            return Err(CommandError::NonZeroExit {
                program: spec.program.clone(),
                args: spec.args.clone(),
                code: status.code(),
                stderr_tail,
            });
        }

        Ok(CommandOutput {
            code: status.code(),
            stdout: captured,
            stderr_tail,
        })
    }

    /// SIGTERM the process group, then SIGKILL if it outlives the grace period.
    async fn terminate(&self, child: &mut Child, pgid: Option<Pid>, program: &str) {
        log::warn!("[Executor] Interrupt received, terminating '{}'", program);
        if let Some(pgid) = pgid {
            if let Err(e) = killpg(pgid, Signal::SIGTERM) {
                log::debug!("[Executor] SIGTERM to group {} failed: {}", pgid, e);
            }
        }

        if tokio::time::timeout(self.grace, child.wait()).await.is_ok() {
            return;
        }

        log::warn!(
            "[Executor] '{}' still running after {:?}, sending SIGKILL",
            program,
            self.grace
        );
        if let Some(pgid) = pgid {
            if let Err(e) = killpg(pgid, Signal::SIGKILL) {
                log::debug!("[Executor] SIGKILL to group {} failed: {}", pgid, e);
            }
        }
        if let Err(e) = child.kill().await {
            log::debug!("[Executor] kill of '{}' failed: {}", program, e);
        }
    }
}

fn missing_pipe(spec: &CommandSpec, stream: &str) -> CommandError {
    CommandError::Io {
        program: spec.program.clone(),
        source: std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            format!("{} was not captured", stream),
        ),
    }
}

impl CommandRunner for TokioCommandRunner {
    fn run<'a>(&'a self, spec: &'a CommandSpec) -> BoxFuture<'a, Result<CommandOutput, CommandError>> {
        Box::pin(self.execute(spec))
    }
}
