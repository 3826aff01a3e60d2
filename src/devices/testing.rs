//! Scriptable devices for tests

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{
    CaptureDevice, CaptureRequest, DeviceHandle, DeviceKind, ExclusiveSlot, PlaybackDevice,
    PlaybackEnd,
};
use crate::artifact::{Artifact, ArtifactKind};
use crate::error::SessionError;

/// Capture device with counters and scripted failures
pub(crate) struct FakeCapture {
    kind: DeviceKind,
    slot: ExclusiveSlot,
    acquired: AtomicUsize,
    released: AtomicUsize,
    captured: AtomicUsize,
    fail_acquire: bool,
    fail_capture: bool,
    cancel_during_capture: bool,
    output: Option<(PathBuf, Vec<u8>)>,
}

impl FakeCapture {
    pub(crate) fn new(kind: DeviceKind) -> Self {
        Self {
            kind,
            slot: ExclusiveSlot::default(),
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            captured: AtomicUsize::new(0),
            fail_acquire: false,
            fail_capture: false,
            cancel_during_capture: false,
            output: None,
        }
    }

    pub(crate) fn failing_acquire(mut self) -> Self {
        self.fail_acquire = true;
        self
    }

    pub(crate) fn failing_capture(mut self) -> Self {
        self.fail_capture = true;
        self
    }

    /// Fire the cancellation token while "recording", like a quit key
    /// pressed mid-capture
    pub(crate) fn cancelling_capture(mut self) -> Self {
        self.cancel_during_capture = true;
        self
    }

    /// Write these bytes to `path` on every capture
    pub(crate) fn with_output(mut self, path: PathBuf, bytes: Vec<u8>) -> Self {
        self.output = Some((path, bytes));
        self
    }

    pub(crate) fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub(crate) fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub(crate) fn captured(&self) -> usize {
        self.captured.load(Ordering::SeqCst)
    }

    fn artifact_kind(&self) -> ArtifactKind {
        match self.kind {
            DeviceKind::Camera => ArtifactKind::Image,
            _ => ArtifactKind::Audio,
        }
    }
}

#[async_trait]
impl CaptureDevice for FakeCapture {
    fn kind(&self) -> DeviceKind {
        self.kind
    }

    fn acquire(&self) -> Result<DeviceHandle, SessionError> {
        if self.fail_acquire {
            return Err(SessionError::DeviceUnavailable {
                device: self.kind,
                reason: "scripted failure".to_string(),
            });
        }
        self.slot.try_claim(self.kind)?;
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(DeviceHandle::new(self.kind))
    }

    async fn capture(
        &self,
        _handle: &DeviceHandle,
        request: &CaptureRequest,
        cancel: &CancellationToken,
    ) -> Result<Artifact, SessionError> {
        if self.cancel_during_capture {
            cancel.cancel();
        }
        if self.fail_capture {
            return Err(SessionError::Capture {
                device: self.kind,
                reason: "scripted failure".to_string(),
            });
        }
        self.captured.fetch_add(1, Ordering::SeqCst);
        let path = match &self.output {
            Some((path, bytes)) => {
                tokio::fs::write(path, bytes).await?;
                path.clone()
            }
            None => PathBuf::from(format!("{}_{}", self.kind, request.sequence)),
        };
        Ok(Artifact::new(self.artifact_kind(), path))
    }

    fn release(&self, _handle: DeviceHandle) {
        self.released.fetch_add(1, Ordering::SeqCst);
        self.slot.free();
    }
}

/// Speaker that records the bytes of every artifact it is asked to play
#[derive(Default)]
pub(crate) struct RecordingSpeaker {
    played: Mutex<Vec<Vec<u8>>>,
}

impl RecordingSpeaker {
    pub(crate) fn played(&self) -> Vec<Vec<u8>> {
        self.played.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlaybackDevice for RecordingSpeaker {
    async fn play(
        &self,
        artifact: &Artifact,
        _cancel: &CancellationToken,
    ) -> Result<PlaybackEnd, SessionError> {
        let bytes = tokio::fs::read(artifact.path()).await.map_err(|_| {
            SessionError::ArtifactNotFound {
                path: artifact.path().to_path_buf(),
            }
        })?;
        self.played.lock().unwrap().push(bytes);
        Ok(PlaybackEnd::Drained)
    }
}
