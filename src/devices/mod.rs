//! Capture and playback devices
//!
//! The microphone and camera follow an acquire / capture / release
//! contract. Acquisition is exclusive per device, and a [`DeviceLease`]
//! guarantees the matching release on every exit path. The speaker is a
//! single playback resource that blocks until the player drains.

mod audio;
mod camera;
mod microphone;
mod speaker;

#[cfg(test)]
pub(crate) mod testing;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::artifact::Artifact;
use crate::error::SessionError;

pub use camera::Camera;
pub use microphone::Microphone;
pub use speaker::Speaker;

/// The singleton hardware resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Microphone,
    Camera,
    Speaker,
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceKind::Microphone => write!(f, "microphone"),
            DeviceKind::Camera => write!(f, "camera"),
            DeviceKind::Speaker => write!(f, "speaker"),
        }
    }
}

/// Proof of a successful acquire.
///
/// Not `Clone`: [`CaptureDevice::release`] consumes it, so a handle can
/// only be released once.
#[derive(Debug)]
pub struct DeviceHandle {
    kind: DeviceKind,
}

impl DeviceHandle {
    pub(crate) fn new(kind: DeviceKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }
}

/// Per-capture parameters supplied by the session
#[derive(Debug, Clone, Copy)]
pub struct CaptureRequest {
    /// Session sequence number, used in artifact names
    pub sequence: u64,
}

/// What the operator decided at a capture prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    Capture,
    Abort,
}

/// Source of the explicit "capture now" signal (a key press on the Pi)
#[async_trait]
pub trait CaptureTrigger: Send + Sync {
    async fn wait_for_trigger(&self, prompt: &str) -> Result<TriggerDecision, SessionError>;
}

/// Fires at once; for flows where a button press already started the cycle
#[derive(Debug, Default, Clone, Copy)]
pub struct Immediate;

#[async_trait]
impl CaptureTrigger for Immediate {
    async fn wait_for_trigger(&self, _prompt: &str) -> Result<TriggerDecision, SessionError> {
        Ok(TriggerDecision::Capture)
    }
}

/// A device that produces an artifact
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    fn kind(&self) -> DeviceKind;

    /// Open the device exclusively
    fn acquire(&self) -> Result<DeviceHandle, SessionError>;

    /// Produce one artifact. Blocks for the recording window or until triggered.
    async fn capture(
        &self,
        handle: &DeviceHandle,
        request: &CaptureRequest,
        cancel: &CancellationToken,
    ) -> Result<Artifact, SessionError>;

    /// Give the device back
    fn release(&self, handle: DeviceHandle);
}

/// How a play call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEnd {
    /// The player reported not-busy on its own
    Drained,
    /// Stopped early by cancellation
    Stopped,
}

/// A device that consumes an audio artifact until drained
#[async_trait]
pub trait PlaybackDevice: Send + Sync {
    async fn play(
        &self,
        artifact: &Artifact,
        cancel: &CancellationToken,
    ) -> Result<PlaybackEnd, SessionError>;
}

/// Scoped acquisition: releases the device when dropped
pub struct DeviceLease {
    device: Arc<dyn CaptureDevice>,
    handle: Option<DeviceHandle>,
}

impl DeviceLease {
    pub fn acquire(device: Arc<dyn CaptureDevice>) -> Result<Self, SessionError> {
        let handle = device.acquire()?;
        debug!(device = %handle.kind(), "device acquired");
        Ok(Self {
            device,
            handle: Some(handle),
        })
    }

    pub fn kind(&self) -> DeviceKind {
        self.device.kind()
    }

    pub async fn capture(
        &self,
        request: &CaptureRequest,
        cancel: &CancellationToken,
    ) -> Result<Artifact, SessionError> {
        match &self.handle {
            Some(handle) => self.device.capture(handle, request, cancel).await,
            None => Err(SessionError::DeviceUnavailable {
                device: self.kind(),
                reason: "lease already released".to_string(),
            }),
        }
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let kind = handle.kind();
            self.device.release(handle);
            debug!(device = %kind, "device released");
        }
    }
}

/// In-process exclusivity flag for one device
#[derive(Debug, Clone, Default)]
pub(crate) struct ExclusiveSlot(Arc<AtomicBool>);

impl ExclusiveSlot {
    pub(crate) fn try_claim(&self, device: DeviceKind) -> Result<(), SessionError> {
        if self.0.swap(true, Ordering::SeqCst) {
            return Err(SessionError::DeviceBusy { device });
        }
        Ok(())
    }

    pub(crate) fn free(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Resolve a program name against `PATH`, or check an explicit path
pub(crate) fn locate_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|p| p.is_file())
}

/// Build a command from configured argv, failing with `DeviceUnavailable`
/// when the program cannot be found.
pub(crate) fn device_command(
    device: DeviceKind,
    argv: &[String],
) -> Result<tokio::process::Command, SessionError> {
    let (program, args) = argv.split_first().ok_or_else(|| SessionError::DeviceUnavailable {
        device,
        reason: "no command configured".to_string(),
    })?;
    let resolved = locate_program(program).ok_or_else(|| SessionError::DeviceUnavailable {
        device,
        reason: format!("{program} not found"),
    })?;
    let mut command = tokio::process::Command::new(resolved);
    command.args(args).kill_on_drop(true);
    Ok(command)
}

/// Check that a capture command left a file behind
pub(crate) async fn expect_output(device: DeviceKind, path: &Path) -> Result<(), SessionError> {
    if tokio::fs::try_exists(path).await? {
        Ok(())
    } else {
        Err(SessionError::Capture {
            device,
            reason: format!("{} was not written", path.display()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeCapture;
    use super::*;

    #[test]
    fn test_second_acquire_is_busy() {
        let slot = ExclusiveSlot::default();
        slot.try_claim(DeviceKind::Camera).unwrap();
        assert!(matches!(
            slot.try_claim(DeviceKind::Camera),
            Err(SessionError::DeviceBusy {
                device: DeviceKind::Camera
            })
        ));
        slot.free();
        slot.try_claim(DeviceKind::Camera).unwrap();
    }

    #[test]
    fn test_lease_releases_on_drop() {
        let device = Arc::new(FakeCapture::new(DeviceKind::Microphone));
        {
            let _lease = DeviceLease::acquire(device.clone()).unwrap();
            assert_eq!(device.acquired(), 1);
            assert_eq!(device.released(), 0);
        }
        assert_eq!(device.released(), 1);
    }

    #[test]
    fn test_failed_acquire_has_nothing_to_release() {
        let device = Arc::new(FakeCapture::new(DeviceKind::Camera).failing_acquire());
        assert!(DeviceLease::acquire(device.clone()).is_err());
        assert_eq!(device.acquired(), 0);
        assert_eq!(device.released(), 0);
    }

    #[test]
    fn test_lease_makes_device_busy_until_dropped() {
        let device = Arc::new(FakeCapture::new(DeviceKind::Camera));
        let lease = DeviceLease::acquire(device.clone()).unwrap();
        assert!(matches!(
            DeviceLease::acquire(device.clone()),
            Err(SessionError::DeviceBusy { .. })
        ));
        drop(lease);
        assert!(DeviceLease::acquire(device.clone()).is_ok());
    }

    #[test]
    fn test_missing_program_is_unavailable() {
        let err = device_command(
            DeviceKind::Microphone,
            &["definitely-not-a-recorder-binary".to_string()],
        )
        .unwrap_err();
        assert!(matches!(err, SessionError::DeviceUnavailable { .. }));
    }

    #[test]
    fn test_locate_program_on_path() {
        assert!(locate_program("sh").is_some());
        assert!(locate_program("/bin/sh").is_some());
    }
}
