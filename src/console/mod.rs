//! Operator console
//!
//! Lines from standard input drive the menu and the capture prompts. A
//! reader thread feeds them through a channel so a blocked read never
//! holds up shutdown.

mod menu;

use std::io::{BufRead, Write};
use std::thread;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::devices::{CaptureTrigger, TriggerDecision};
use crate::error::SessionError;

pub use menu::{run_guarded, run_interactive, run_menu};

/// Line-oriented operator input with prompts on stdout
pub struct Console {
    lines: Mutex<mpsc::Receiver<String>>,
}

impl Console {
    /// Read from the process's standard input
    pub fn stdin() -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel(16);
        thread::Builder::new()
            .name("stdin-reader".to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    match line {
                        Ok(line) => {
                            if tx.blocking_send(line).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to read stdin");
                            break;
                        }
                    }
                }
                debug!("stdin closed");
            })?;
        Ok(Self {
            lines: Mutex::new(rx),
        })
    }

    /// A console that replays fixed input, then reports end of input
    #[cfg(test)]
    pub(crate) fn scripted(lines: &[&str]) -> Self {
        let (tx, rx) = mpsc::channel(lines.len().max(1));
        for line in lines {
            let _ = tx.try_send(line.to_string());
        }
        Self {
            lines: Mutex::new(rx),
        }
    }

    /// Print `prompt` and wait for one line. `None` on end of input or cancel.
    pub async fn prompt(&self, prompt: &str, cancel: &CancellationToken) -> Option<String> {
        say_inline(prompt);
        let mut lines = self.lines.lock().await;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            line = lines.recv() => line,
        }
    }
}

#[async_trait]
impl CaptureTrigger for Console {
    async fn wait_for_trigger(&self, prompt: &str) -> Result<TriggerDecision, SessionError> {
        say_inline(&format!("{prompt} "));
        let line = self.lines.lock().await.recv().await;
        match line.as_deref().map(str::trim) {
            None | Some("q") | Some("Q") => Ok(TriggerDecision::Abort),
            Some(_) => Ok(TriggerDecision::Capture),
        }
    }
}

/// Write a full line for the operator
pub(crate) fn say(text: &str) {
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "{text}");
}

fn say_inline(text: &str) {
    let mut out = std::io::stdout().lock();
    let _ = write!(out, "{text}");
    let _ = out.flush();
}
