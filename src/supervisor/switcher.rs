//! Button-driven program switching
//!
//! At most one child runs at a time. A switch reaps the current child
//! before the next one starts; presses that arrive while a termination is
//! still pending are collapsed so only the latest target launches.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::bindings::{BindingTable, ProgramSpec};
use super::child::{ChildProcess, ProcessLauncher};
use super::lines::InputLine;
use super::listener::{ButtonEvent, ButtonListener};
use crate::error::SupervisorError;
use crate::events::{IgnoreReason, SupervisorEvent};

/// Debounce and grace timings
#[derive(Debug, Clone, Copy)]
pub struct SupervisorTimings {
    /// Wait before re-reading a line after an edge
    pub settle: Duration,
    /// Time between SIGTERM and SIGKILL
    pub termination_grace: Duration,
}

pub struct Supervisor {
    bindings: BindingTable,
    lines: HashMap<u32, Arc<dyn InputLine>>,
    launcher: Arc<dyn ProcessLauncher>,
    timings: SupervisorTimings,
    current: Option<ChildProcess>,
    event_tx: broadcast::Sender<SupervisorEvent>,
}

impl Supervisor {
    pub fn new(
        bindings: BindingTable,
        lines: Vec<Arc<dyn InputLine>>,
        launcher: Arc<dyn ProcessLauncher>,
        timings: SupervisorTimings,
        event_tx: broadcast::Sender<SupervisorEvent>,
    ) -> Self {
        let lines = lines.into_iter().map(|l| (l.number(), l)).collect();
        Self {
            bindings,
            lines,
            launcher,
            timings,
            current: None,
            event_tx,
        }
    }

    /// Name of the running program, if any
    #[cfg(test)]
    pub fn current_program(&self) -> Option<&ProgramSpec> {
        self.current.as_ref().map(|c| c.program())
    }

    /// Handle presses until shutdown is requested or the listener goes away.
    ///
    /// The current child is terminated and reaped before this returns.
    pub async fn run(
        &mut self,
        rx: &mut mpsc::Receiver<ButtonEvent>,
        shutdown: &CancellationToken,
    ) {
        info!(bindings = self.bindings.len(), "supervisor running");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("shutdown requested");
                    break;
                }
                event = rx.recv() => match event {
                    Some(ButtonEvent::Pressed { line }) => {
                        if let Some(target) = self.debounce_and_resolve(line).await {
                            self.switch_to(target, rx, shutdown).await;
                        }
                    }
                    None => {
                        warn!("button channel closed");
                        break;
                    }
                },
            }
        }

        self.stop_current().await;
    }

    /// Settle, re-read the line, and map it to a program
    async fn debounce_and_resolve(&self, line: u32) -> Option<ProgramSpec> {
        tokio::time::sleep(self.timings.settle).await;

        let Some(input) = self.lines.get(&line) else {
            self.ignore(line, IgnoreReason::Unmapped);
            return None;
        };
        match input.is_asserted() {
            Ok(true) => {}
            Ok(false) => {
                debug!(line, "released before settle, treating as bounce");
                self.ignore(line, IgnoreReason::Bounce);
                return None;
            }
            Err(e) => {
                warn!(line, error = %e, "failed to re-read line");
                self.ignore(line, IgnoreReason::ReadError);
                return None;
            }
        }

        let Some(program) = self.bindings.resolve(line) else {
            self.ignore(line, IgnoreReason::Unmapped);
            return None;
        };
        info!(line, program = %program, "button pressed");
        self.emit(SupervisorEvent::ButtonAccepted {
            line,
            program: program.name.clone(),
        });
        Some(program.clone())
    }

    /// Reap the current child, keep taking presses meanwhile, then launch
    /// whichever target is newest.
    async fn switch_to(
        &mut self,
        target: ProgramSpec,
        rx: &mut mpsc::Receiver<ButtonEvent>,
        shutdown: &CancellationToken,
    ) {
        let mut target = target;

        if let Some(mut current) = self.current.take() {
            info!(from = %current.program(), to = %target, "switching programs");
            let grace = self.timings.termination_grace;
            let mut stopping = false;

            let forced = {
                let termination = current.terminate(grace);
                tokio::pin!(termination);
                loop {
                    tokio::select! {
                        forced = &mut termination => break forced,
                        _ = shutdown.cancelled(), if !stopping => {
                            info!("shutdown requested during switch");
                            stopping = true;
                        }
                        event = rx.recv(), if !stopping => match event {
                            Some(ButtonEvent::Pressed { line }) => {
                                if let Some(next) = self.debounce_and_resolve(line).await {
                                    info!(superseded = %target, by = %next, "newer press wins");
                                    self.emit(SupervisorEvent::TargetSuperseded {
                                        program: target.name.clone(),
                                        by: next.name.clone(),
                                    });
                                    target = next;
                                }
                            }
                            None => stopping = true,
                        },
                    }
                }
            };

            self.emit(SupervisorEvent::ProgramTerminated {
                program: current.program().name.clone(),
                pid: current.pid(),
                forced,
            });
            if stopping {
                return;
            }
        }

        self.launch(target);
    }

    fn launch(&mut self, program: ProgramSpec) {
        info!(program = %program, argv = ?program.argv, "starting program");
        match self.launcher.launch(&program) {
            Ok(child) => {
                let child = ChildProcess::new(program, child);
                info!(program = %child.program(), pid = ?child.pid(), "program started");
                self.emit(SupervisorEvent::ProgramLaunched {
                    program: child.program().name.clone(),
                    pid: child.pid(),
                });
                self.current = Some(child);
            }
            Err(e) => {
                error!(error = %e, "failed to start program");
                self.emit(SupervisorEvent::LaunchFailed {
                    program: program.name,
                    error: e.to_string(),
                });
            }
        }
    }

    async fn stop_current(&mut self) {
        if let Some(mut current) = self.current.take() {
            let forced = current.terminate(self.timings.termination_grace).await;
            self.emit(SupervisorEvent::ProgramTerminated {
                program: current.program().name.clone(),
                pid: current.pid(),
                forced,
            });
        }
    }

    /// Hand every input line back to the system
    pub fn release_lines(&self) {
        let mut numbers: Vec<_> = self.lines.keys().copied().collect();
        numbers.sort_unstable();
        for number in numbers {
            let Some(line) = self.lines.get(&number) else {
                continue;
            };
            match line.release() {
                Ok(()) => self.emit(SupervisorEvent::LineReleased { line: number }),
                Err(e) => warn!(line = number, error = %e, "failed to release line"),
            }
        }
    }

    fn ignore(&self, line: u32, reason: IgnoreReason) {
        self.emit(SupervisorEvent::ButtonIgnored { line, reason });
    }

    fn emit(&self, event: SupervisorEvent) {
        debug!(%event, "emitting supervisor event");
        let _ = self.event_tx.send(event);
    }
}

/// Run the button-switching variant until shutdown.
///
/// Order on the way out: the current child is reaped, then the listener
/// thread stops, then the lines are released.
pub async fn supervise(
    mut supervisor: Supervisor,
    listener: ButtonListener,
    mut rx: mpsc::Receiver<ButtonEvent>,
    shutdown: CancellationToken,
) -> Result<(), SupervisorError> {
    listener.start()?;
    supervisor.run(&mut rx, &shutdown).await;
    rx.close();
    listener.stop();
    supervisor.release_lines();
    info!("supervisor stopped");
    Ok(())
}
