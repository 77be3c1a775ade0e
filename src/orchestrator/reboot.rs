//! Reboot confirmation.

use std::io::{self, BufRead, Write};

use futures::future::{self, BoxFuture, FutureExt};

/// Asks whether the host should reboot now.
///
/// The answer is a future so the caller can race it against an interrupt.
pub trait ConfirmPort: Send + Sync {
    fn confirm<'a>(&'a self, question: &'a str) -> BoxFuture<'a, bool>;
}

/// Interactive prompt on stdin/stdout. Anything other than `y`/`yes` declines.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinConfirm;

impl ConfirmPort for StdinConfirm {
    fn confirm<'a>(&'a self, question: &'a str) -> BoxFuture<'a, bool> {
        let question = question.to_string();
        async move {
            // The read blocks a pool thread, leaving the runtime free to see Ctrl-C
            tokio::task::spawn_blocking(move || prompt(&question))
                .await
                .unwrap_or(false)
        }
        .boxed()
    }
}

fn prompt(question: &str) -> bool {
    print!("{} [y/N] ", question);
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(_) => is_yes(&answer),
        Err(_) => false,
    }
}

/// Fixed answer (`--yes` / `--no-reboot`, tests).
#[derive(Debug, Clone, Copy)]
pub struct FixedConfirm(pub bool);

impl ConfirmPort for FixedConfirm {
    fn confirm<'a>(&'a self, question: &'a str) -> BoxFuture<'a, bool> {
        log::info!("[Reboot] {} -> {}", question, if self.0 { "yes" } else { "no" });
        future::ready(self.0).boxed()
    }
}

pub fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
