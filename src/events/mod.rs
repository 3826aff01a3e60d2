//! Events module for session and supervisor transitions
//!
//! Structured events published on a broadcast channel. The front-end logs
//! them; tests use them as instrumentation points.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactKind;
use crate::devices::DeviceKind;
use crate::mode::Mode;
use crate::session::SessionStatus;

/// Events emitted by the session machine during a cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A mode was selected and a session created
    CycleStarted { mode: Mode, sequence: u64 },

    /// The machine moved between states
    StatusChanged {
        from: SessionStatus,
        to: SessionStatus,
    },

    /// A capture device was acquired for this cycle
    DeviceAcquired { device: DeviceKind },

    /// A capture device produced an artifact
    ArtifactCaptured { kind: ArtifactKind, path: PathBuf },

    /// The remote service answered with an artifact to play
    ResponseReceived { path: PathBuf },

    /// Playback drained and the machine is idle again
    CycleCompleted {
        mode: Mode,
        sequence: u64,
        /// Duration in milliseconds from selection to idle
        duration_ms: u64,
    },

    /// A step failed; the machine reported it and went idle
    CycleFailed {
        mode: Mode,
        sequence: u64,
        failed_in: SessionStatus,
        error: String,
    },

    /// A quit or switch request ended the cycle early
    CycleCancelled {
        mode: Mode,
        sequence: u64,
        cancelled_in: SessionStatus,
    },
}

/// Events emitted by the button supervisor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupervisorEvent {
    /// A debounced press resolved to a program
    ButtonAccepted { line: u32, program: String },

    /// A press was dropped
    ButtonIgnored { line: u32, reason: IgnoreReason },

    /// A newer press replaced a target that was waiting on a termination
    TargetSuperseded { program: String, by: String },

    /// A child process was started
    ProgramLaunched { program: String, pid: Option<u32> },

    /// A child process could not be started
    LaunchFailed { program: String, error: String },

    /// A child process was reaped
    ProgramTerminated {
        program: String,
        pid: Option<u32>,
        /// True when SIGKILL was needed
        forced: bool,
    },

    /// An input line was handed back to the system
    LineReleased { line: u32 },
}

/// Why a press did not switch programs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// The line was no longer asserted after the settle delay
    Bounce,
    /// No binding for this line
    Unmapped,
    /// The line could not be read
    ReadError,
}

impl std::fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEvent::CycleStarted { mode, sequence } => {
                write!(f, "CYCLE_STARTED {mode} #{sequence}")
            }
            SessionEvent::StatusChanged { from, to } => write!(f, "STATUS {from} -> {to}"),
            SessionEvent::DeviceAcquired { device } => write!(f, "DEVICE_ACQUIRED {device}"),
            SessionEvent::ArtifactCaptured { kind, path } => {
                write!(f, "ARTIFACT_CAPTURED {kind} {}", path.display())
            }
            SessionEvent::ResponseReceived { path } => {
                write!(f, "RESPONSE_RECEIVED {}", path.display())
            }
            SessionEvent::CycleCompleted {
                mode,
                sequence,
                duration_ms,
            } => write!(f, "CYCLE_COMPLETED {mode} #{sequence} ({duration_ms}ms)"),
            SessionEvent::CycleFailed {
                mode,
                sequence,
                failed_in,
                error,
            } => write!(f, "CYCLE_FAILED {mode} #{sequence} in {failed_in}: {error}"),
            SessionEvent::CycleCancelled {
                mode,
                sequence,
                cancelled_in,
            } => write!(f, "CYCLE_CANCELLED {mode} #{sequence} in {cancelled_in}"),
        }
    }
}

impl std::fmt::Display for SupervisorEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorEvent::ButtonAccepted { line, program } => {
                write!(f, "BUTTON_ACCEPTED line {line} -> {program}")
            }
            SupervisorEvent::ButtonIgnored { line, reason } => {
                write!(f, "BUTTON_IGNORED line {line} ({reason:?})")
            }
            SupervisorEvent::TargetSuperseded { program, by } => {
                write!(f, "TARGET_SUPERSEDED {program} by {by}")
            }
            SupervisorEvent::ProgramLaunched { program, pid } => {
                write!(f, "PROGRAM_LAUNCHED {program} (pid {pid:?})")
            }
            SupervisorEvent::LaunchFailed { program, error } => {
                write!(f, "LAUNCH_FAILED {program}: {error}")
            }
            SupervisorEvent::ProgramTerminated {
                program,
                pid,
                forced,
            } => write!(f, "PROGRAM_TERMINATED {program} (pid {pid:?}, forced={forced})"),
            SupervisorEvent::LineReleased { line } => write!(f, "LINE_RELEASED {line}"),
        }
    }
}
