//! Core session state machine
//!
//! Drives one capture -> dispatch -> playback cycle per call and always
//! comes back to Idle, whether the cycle completed, failed or was cancelled.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::artifact::{Artifact, ArtifactSet};
use crate::devices::{
    CaptureDevice, CaptureRequest, DeviceKind, DeviceLease, PlaybackDevice, PlaybackEnd,
};
use crate::dispatch::{DispatchRequest, Dispatcher};
use crate::error::SessionError;
use crate::events::SessionEvent;
use crate::mode::Mode;

/// Session states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No session, waiting for a mode
    #[default]
    Idle,
    /// A mode was chosen, devices not yet touched
    SelectingMode,
    /// Acquiring devices and capturing artifacts
    Capturing,
    /// Waiting on the remote service
    Dispatching,
    /// Playing the response
    Playing,
    /// A step failed; reported, then back to Idle
    Failed,
    /// A cancel arrived; devices are being released
    Terminating,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Idle => write!(f, "Idle"),
            SessionStatus::SelectingMode => write!(f, "SelectingMode"),
            SessionStatus::Capturing => write!(f, "Capturing"),
            SessionStatus::Dispatching => write!(f, "Dispatching"),
            SessionStatus::Playing => write!(f, "Playing"),
            SessionStatus::Failed => write!(f, "Failed"),
            SessionStatus::Terminating => write!(f, "Terminating"),
        }
    }
}

/// The active execution context of one cycle
#[derive(Debug, Clone, Copy)]
pub struct Session {
    pub mode: Mode,
    pub sequence: u64,
    started_at: Instant,
}

/// How a cycle ended
#[derive(Debug)]
pub enum CycleOutcome {
    Completed { response: Artifact },
    Failed { error: SessionError },
    Cancelled,
}

/// Hardware and remote collaborators, injected by the caller
#[derive(Clone)]
pub struct SessionDevices {
    pub microphone: Arc<dyn CaptureDevice>,
    pub camera: Arc<dyn CaptureDevice>,
    pub speaker: Arc<dyn PlaybackDevice>,
}

impl SessionDevices {
    fn capture_device(&self, kind: DeviceKind) -> Result<Arc<dyn CaptureDevice>, SessionError> {
        match kind {
            DeviceKind::Microphone => Ok(self.microphone.clone()),
            DeviceKind::Camera => Ok(self.camera.clone()),
            DeviceKind::Speaker => Err(SessionError::DeviceUnavailable {
                device: kind,
                reason: "the speaker is not a capture device".to_string(),
            }),
        }
    }
}

/// The state machine that sequences interaction cycles.
///
/// `run_cycle` takes `&mut self`, so one machine never runs two cycles at
/// once. The application builds exactly one machine.
pub struct SessionMachine {
    status: SessionStatus,
    session: Option<Session>,
    /// Last sequence number handed out
    sequence: u64,
    devices: SessionDevices,
    dispatcher: Arc<dyn Dispatcher>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionMachine {
    pub fn new(
        devices: SessionDevices,
        dispatcher: Arc<dyn Dispatcher>,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            status: SessionStatus::Idle,
            session: None,
            sequence: 0,
            devices,
            dispatcher,
            event_tx,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Run one full cycle for `mode`.
    ///
    /// An operator abort at a capture prompt ends the cycle as `Cancelled`.
    ///
    /// Cancellation is observed between steps, while waiting for a capture
    /// trigger, during the dispatch (the request is dropped), and at every
    /// playback poll. It is never observed inside a fixed-window recording.
    pub async fn run_cycle(&mut self, mode: Mode, cancel: &CancellationToken) -> CycleOutcome {
        self.begin(mode);
        let result = self.drive(mode, cancel).await;
        self.finish(result)
    }

    fn begin(&mut self, mode: Mode) {
        self.sequence += 1;
        self.session = Some(Session {
            mode,
            sequence: self.sequence,
            started_at: Instant::now(),
        });
        info!(%mode, sequence = self.sequence, "session created");
        self.emit(SessionEvent::CycleStarted {
            mode,
            sequence: self.sequence,
        });
        self.transition_to(SessionStatus::SelectingMode);
    }

    async fn drive(
        &mut self,
        mode: Mode,
        cancel: &CancellationToken,
    ) -> Result<Artifact, SessionError> {
        let sequence = self.sequence;
        checkpoint(cancel)?;

        self.transition_to(SessionStatus::Capturing);
        let artifacts = self.capture(mode, sequence, cancel).await?;
        checkpoint(cancel)?;

        self.transition_to(SessionStatus::Dispatching);
        let request = DispatchRequest {
            mode,
            artifacts: &artifacts,
            sequence,
        };
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(%mode, sequence, "dispatch abandoned");
                return Err(SessionError::Cancelled);
            }
            response = self.dispatcher.dispatch(&request) => response?,
        };
        self.emit(SessionEvent::ResponseReceived {
            path: response.path().to_path_buf(),
        });
        checkpoint(cancel)?;

        self.transition_to(SessionStatus::Playing);
        match self.devices.speaker.play(&response, cancel).await? {
            PlaybackEnd::Drained => Ok(response),
            PlaybackEnd::Stopped => Err(SessionError::Cancelled),
        }
    }

    /// Acquire every device the mode needs, then capture in order.
    ///
    /// Leases live only inside this function; every return path drops them,
    /// which releases whatever was acquired so far.
    async fn capture(
        &self,
        mode: Mode,
        sequence: u64,
        cancel: &CancellationToken,
    ) -> Result<ArtifactSet, SessionError> {
        let required = mode.required_devices();
        let mut leases = Vec::with_capacity(required.len());
        for kind in required {
            checkpoint(cancel)?;
            let lease = DeviceLease::acquire(self.devices.capture_device(*kind)?)?;
            self.emit(SessionEvent::DeviceAcquired { device: *kind });
            leases.push(lease);
        }

        let request = CaptureRequest { sequence };
        let mut artifacts = ArtifactSet::new();
        for lease in &leases {
            checkpoint(cancel)?;
            let artifact = lease.capture(&request, cancel).await?;
            debug!(device = %lease.kind(), path = %artifact.path().display(), "captured");
            self.emit(SessionEvent::ArtifactCaptured {
                kind: artifact.kind(),
                path: artifact.path().to_path_buf(),
            });
            artifacts.push(artifact);
        }

        drop(leases);
        Ok(artifacts)
    }

    fn finish(&mut self, result: Result<Artifact, SessionError>) -> CycleOutcome {
        let Some(session) = self.session else {
            self.transition_to(SessionStatus::Idle);
            return CycleOutcome::Cancelled;
        };
        let at = self.status;

        let outcome = match result {
            Ok(response) => {
                let duration_ms = session.started_at.elapsed().as_millis() as u64;
                self.transition_to(SessionStatus::Idle);
                self.emit(SessionEvent::CycleCompleted {
                    mode: session.mode,
                    sequence: session.sequence,
                    duration_ms,
                });
                CycleOutcome::Completed { response }
            }
            Err(SessionError::Cancelled | SessionError::CaptureAborted { .. }) => {
                self.transition_to(SessionStatus::Terminating);
                self.transition_to(SessionStatus::Idle);
                warn!(
                    mode = %session.mode,
                    sequence = session.sequence,
                    at = %at,
                    "cycle cancelled"
                );
                self.emit(SessionEvent::CycleCancelled {
                    mode: session.mode,
                    sequence: session.sequence,
                    cancelled_in: at,
                });
                CycleOutcome::Cancelled
            }
            Err(error) => {
                self.transition_to(SessionStatus::Failed);
                error!(
                    mode = %session.mode,
                    sequence = session.sequence,
                    at = %at,
                    %error,
                    "cycle failed"
                );
                self.emit(SessionEvent::CycleFailed {
                    mode: session.mode,
                    sequence: session.sequence,
                    failed_in: at,
                    error: error.to_string(),
                });
                self.transition_to(SessionStatus::Idle);
                CycleOutcome::Failed { error }
            }
        };

        self.session = None;
        outcome
    }

    /// Perform a state transition
    fn transition_to(&mut self, new_status: SessionStatus) {
        let old_status = self.status;
        if old_status == new_status {
            return;
        }

        info!(from = %old_status, to = %new_status, "session transition");

        self.status = new_status;
        self.emit(SessionEvent::StatusChanged {
            from: old_status,
            to: new_status,
        });
    }

    fn emit(&self, event: SessionEvent) {
        debug!(%event, "emitting session event");
        let _ = self.event_tx.send(event);
    }
}

/// Step boundary: stop here if a cancel was requested
fn checkpoint(cancel: &CancellationToken) -> Result<(), SessionError> {
    if cancel.is_cancelled() {
        Err(SessionError::Cancelled)
    } else {
        Ok(())
    }
}
