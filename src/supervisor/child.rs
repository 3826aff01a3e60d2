//! Supervised child processes
//!
//! Termination is cooperative first: SIGTERM, then wait up to a grace
//! period. A child still alive after that is killed with SIGKILL and
//! reaped, so a switch never leaves two programs holding the hardware.
//!
//! Each OS child leads its own process group and every signal goes to the
//! group, so recorders and players it started go down with it.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, error, info, warn};

use super::bindings::ProgramSpec;
use crate::error::SupervisorError;

/// Lifecycle of one child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    Running,
    Terminating,
    Terminated,
}

impl std::fmt::Display for ChildState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChildState::Running => write!(f, "running"),
            ChildState::Terminating => write!(f, "terminating"),
            ChildState::Terminated => write!(f, "terminated"),
        }
    }
}

/// OS-level operations on a spawned program
#[async_trait]
pub trait ManagedChild: Send + Sync {
    fn id(&self) -> Option<u32>;

    /// Ask the program to exit (SIGTERM)
    fn request_termination(&mut self) -> io::Result<()>;

    /// Wait for exit and reap
    async fn wait(&mut self) -> io::Result<()>;

    /// Kill without asking (SIGKILL)
    fn force_kill(&mut self) -> io::Result<()>;

    /// Kill whatever the child left behind once it has been reaped
    fn sweep(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Starts programs for the supervisor
pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, program: &ProgramSpec) -> Result<Box<dyn ManagedChild>, SupervisorError>;
}

/// Launches real processes with `tokio::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct OsLauncher;

impl ProcessLauncher for OsLauncher {
    fn launch(&self, program: &ProgramSpec) -> Result<Box<dyn ManagedChild>, SupervisorError> {
        let launch_error = |source| SupervisorError::ProcessLaunchError {
            program: program.name.clone(),
            source,
        };
        let (exe, args) = program.argv.split_first().ok_or_else(|| {
            launch_error(io::Error::new(io::ErrorKind::InvalidInput, "empty command"))
        })?;

        let child = tokio::process::Command::new(exe)
            .args(args)
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(launch_error)?;
        // the leader's pid names the group
        let group = child.id().and_then(|pid| i32::try_from(pid).ok()).map(Pid::from_raw);
        Ok(Box::new(OsChild { child, group }))
    }
}

pub struct OsChild {
    child: tokio::process::Child,
    group: Option<Pid>,
}

impl OsChild {
    fn signal_group(&self, sig: Signal) -> io::Result<()> {
        let Some(group) = self.group else {
            return Ok(());
        };
        match signal::killpg(group, sig) {
            Ok(()) => {
                debug!(pgid = group.as_raw(), ?sig, "signal sent to process group");
                Ok(())
            }
            Err(Errno::ESRCH) => {
                debug!(pgid = group.as_raw(), "process group already gone (ESRCH)");
                Ok(())
            }
            Err(e) => Err(io::Error::from(e)),
        }
    }
}

#[async_trait]
impl ManagedChild for OsChild {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn request_termination(&mut self) -> io::Result<()> {
        self.signal_group(Signal::SIGTERM)
    }

    async fn wait(&mut self) -> io::Result<()> {
        let status = self.child.wait().await?;
        debug!(?status, "child exited");
        Ok(())
    }

    fn force_kill(&mut self) -> io::Result<()> {
        self.signal_group(Signal::SIGKILL)?;
        // the leader may sit in a group of its own making; kill it directly too
        match self.child.start_kill() {
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            other => other,
        }
    }

    fn sweep(&mut self) -> io::Result<()> {
        self.signal_group(Signal::SIGKILL)
    }
}

/// The one program the supervisor currently owns
pub struct ChildProcess {
    program: ProgramSpec,
    pid: Option<u32>,
    child: Box<dyn ManagedChild>,
    state: ChildState,
}

impl ChildProcess {
    pub fn new(program: ProgramSpec, child: Box<dyn ManagedChild>) -> Self {
        let pid = child.id();
        Self {
            program,
            pid,
            child,
            state: ChildState::Running,
        }
    }

    pub fn program(&self) -> &ProgramSpec {
        &self.program
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    #[cfg(test)]
    pub fn state(&self) -> ChildState {
        self.state
    }

    /// Terminate and reap. Returns true if SIGKILL was needed.
    pub async fn terminate(&mut self, grace: Duration) -> bool {
        if self.state == ChildState::Terminated {
            return false;
        }
        self.state = ChildState::Terminating;
        info!(program = %self.program, pid = ?self.pid, "terminating program");

        if let Err(e) = self.child.request_termination() {
            warn!(program = %self.program, error = %e, "failed to send SIGTERM");
        }

        let forced = match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(())) => false,
            Ok(Err(e)) => {
                warn!(program = %self.program, error = %e, "wait failed after SIGTERM");
                false
            }
            Err(_) => {
                let timeout = SupervisorError::ProcessTerminationTimeout {
                    program: self.program.name.clone(),
                    pid: self.pid,
                    grace_ms: grace.as_millis() as u64,
                };
                warn!(error = %timeout, "escalating to SIGKILL");
                if let Err(e) = self.child.force_kill() {
                    error!(program = %self.program, error = %e, "SIGKILL failed");
                }
                if let Err(e) = self.child.wait().await {
                    error!(program = %self.program, error = %e, "failed to reap killed program");
                }
                true
            }
        };

        if let Err(e) = self.child.sweep() {
            warn!(program = %self.program, error = %e, "failed to kill leftover processes");
        }

        self.state = ChildState::Terminated;
        info!(program = %self.program, pid = ?self.pid, forced, "program reaped");
        forced
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Shared record of what the fakes did, in order
    #[derive(Default)]
    pub(crate) struct Journal {
        pub(crate) entries: Arc<Mutex<Vec<String>>>,
        running: AtomicUsize,
        max_running: AtomicUsize,
    }

    impl Journal {
        pub(crate) fn record(&self, entry: String) {
            self.entries.lock().unwrap().push(entry);
        }

        pub(crate) fn entries(&self) -> Vec<String> {
            self.entries.lock().unwrap().clone()
        }

        pub(crate) fn launches(&self) -> Vec<String> {
            self.entries()
                .into_iter()
                .filter_map(|e| e.strip_prefix("launch ").map(String::from))
                .collect()
        }

        pub(crate) fn running(&self) -> usize {
            self.running.load(Ordering::SeqCst)
        }

        pub(crate) fn max_running(&self) -> usize {
            self.max_running.load(Ordering::SeqCst)
        }
    }

    pub(crate) struct FakeLauncher {
        pub(crate) journal: Arc<Journal>,
        stubborn: HashSet<String>,
        broken: HashSet<String>,
        next_pid: AtomicUsize,
    }

    impl FakeLauncher {
        pub(crate) fn new() -> Self {
            Self {
                journal: Arc::new(Journal::default()),
                stubborn: HashSet::new(),
                broken: HashSet::new(),
                next_pid: AtomicUsize::new(100),
            }
        }

        /// Programs with this name ignore SIGTERM
        pub(crate) fn stubborn(mut self, name: &str) -> Self {
            self.stubborn.insert(name.to_string());
            self
        }

        /// Programs with this name fail to start
        pub(crate) fn broken(mut self, name: &str) -> Self {
            self.broken.insert(name.to_string());
            self
        }
    }

    impl ProcessLauncher for FakeLauncher {
        fn launch(
            &self,
            program: &ProgramSpec,
        ) -> Result<Box<dyn ManagedChild>, SupervisorError> {
            if self.broken.contains(&program.name) {
                return Err(SupervisorError::ProcessLaunchError {
                    program: program.name.clone(),
                    source: io::Error::new(io::ErrorKind::NotFound, "no such program"),
                });
            }
            let running = self.journal.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.journal.max_running.fetch_max(running, Ordering::SeqCst);
            self.journal.record(format!("launch {}", program.name));
            Ok(Box::new(FakeChild {
                name: program.name.clone(),
                pid: self.next_pid.fetch_add(1, Ordering::SeqCst) as u32,
                ignores_term: self.stubborn.contains(&program.name),
                exited: AtomicBool::new(false),
                reaped: false,
                journal: self.journal.clone(),
            }))
        }
    }

    pub(crate) struct FakeChild {
        name: String,
        pid: u32,
        ignores_term: bool,
        exited: AtomicBool,
        reaped: bool,
        journal: Arc<Journal>,
    }

    #[async_trait]
    impl ManagedChild for FakeChild {
        fn id(&self) -> Option<u32> {
            (!self.reaped).then_some(self.pid)
        }

        fn request_termination(&mut self) -> io::Result<()> {
            self.journal.record(format!("term {}", self.name));
            if !self.ignores_term {
                self.exited.store(true, Ordering::SeqCst);
            }
            Ok(())
        }

        async fn wait(&mut self) -> io::Result<()> {
            if !self.exited.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if !self.reaped {
                self.reaped = true;
                self.journal.running.fetch_sub(1, Ordering::SeqCst);
                self.journal.record(format!("reaped {}", self.name));
            }
            Ok(())
        }

        fn force_kill(&mut self) -> io::Result<()> {
            self.journal.record(format!("kill {}", self.name));
            self.exited.store(true, Ordering::SeqCst);
            Ok(())
        }
    }
}
