//! Error taxonomy for sessions and the process supervisor

use std::path::PathBuf;

use crate::artifact::ArtifactKind;
use crate::devices::DeviceKind;

/// Errors surfaced by devices and the remote dispatcher.
///
/// All of these are caught at the session machine boundary, reported, and
/// the machine returns to Idle.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("{device} is already in use")]
    DeviceBusy { device: DeviceKind },

    #[error("{device} is unavailable: {reason}")]
    DeviceUnavailable { device: DeviceKind, reason: String },

    #[error("{device} capture failed: {reason}")]
    Capture { device: DeviceKind, reason: String },

    #[error("playback failed: {0}")]
    Playback(String),

    #[error("{device} capture aborted by operator")]
    CaptureAborted { device: DeviceKind },

    #[error("artifact not found: {}", path.display())]
    ArtifactNotFound { path: PathBuf },

    #[error("no {kind} artifact was captured for this request")]
    MissingArtifact { kind: ArtifactKind },

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("service returned HTTP {status}")]
    ServiceError { status: u16 },

    #[error("request timed out")]
    Timeout,

    #[error("invalid service response: {0}")]
    InvalidResponse(String),

    #[error("cancelled")]
    Cancelled,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SessionError::Timeout
        } else if let Some(status) = err.status() {
            SessionError::ServiceError {
                status: status.as_u16(),
            }
        } else {
            SessionError::TransportError(err.to_string())
        }
    }
}

/// Errors raised by the button supervisor and its child processes
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("failed to launch {program}: {source}")]
    ProcessLaunchError {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} (pid {pid:?}) did not exit within {grace_ms}ms of SIGTERM")]
    ProcessTerminationTimeout {
        program: String,
        pid: Option<u32>,
        grace_ms: u64,
    },

    #[error("input line {line}: {source}")]
    InputLine {
        line: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("button listener is already running")]
    AlreadyRunning,

    #[error("failed to spawn listener thread: {0}")]
    ThreadSpawn(String),
}
