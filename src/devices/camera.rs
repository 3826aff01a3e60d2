//! Triggered still capture via `libcamera-still`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{
    device_command, expect_output, locate_program, CaptureDevice, CaptureRequest, CaptureTrigger,
    DeviceHandle, DeviceKind, ExclusiveSlot, TriggerDecision,
};
use crate::artifact::{timestamped_name, Artifact};
use crate::config::CameraConfig;
use crate::error::SessionError;

/// Takes one JPEG still once the trigger fires
pub struct Camera {
    settings: CameraConfig,
    output_dir: PathBuf,
    slot: ExclusiveSlot,
    trigger: Arc<dyn CaptureTrigger>,
}

impl Camera {
    pub fn new(
        settings: CameraConfig,
        output_dir: impl Into<PathBuf>,
        trigger: Arc<dyn CaptureTrigger>,
    ) -> Self {
        Self {
            settings,
            output_dir: output_dir.into(),
            slot: ExclusiveSlot::default(),
            trigger,
        }
    }

    fn still_command(&self, output: &Path) -> Result<Command, SessionError> {
        let mut command = device_command(DeviceKind::Camera, &self.settings.command)?;
        command
            .arg("-o")
            .arg(output)
            .arg("--width")
            .arg(self.settings.width.to_string())
            .arg("--height")
            .arg(self.settings.height.to_string())
            .arg("--immediate");
        Ok(command)
    }
}

#[async_trait]
impl CaptureDevice for Camera {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Camera
    }

    fn acquire(&self) -> Result<DeviceHandle, SessionError> {
        // fail before claiming so a missing program never holds the slot
        let program = self.settings.command.first().map(String::as_str).unwrap_or_default();
        if locate_program(program).is_none() {
            return Err(SessionError::DeviceUnavailable {
                device: DeviceKind::Camera,
                reason: format!("{program:?} not found"),
            });
        }
        self.slot.try_claim(DeviceKind::Camera)?;
        Ok(DeviceHandle::new(DeviceKind::Camera))
    }

    async fn capture(
        &self,
        _handle: &DeviceHandle,
        request: &CaptureRequest,
        cancel: &CancellationToken,
    ) -> Result<Artifact, SessionError> {
        let prompt = "Press Enter to capture an image ('q' to cancel)...";
        let decision = tokio::select! {
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            decision = self.trigger.wait_for_trigger(prompt) => decision?,
        };
        if decision == TriggerDecision::Abort {
            return Err(SessionError::CaptureAborted {
                device: DeviceKind::Camera,
            });
        }

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let path = self
            .output_dir
            .join(timestamped_name("capture", request.sequence, "jpg"));

        let output = self.still_command(&path)?.output().await?;
        if !output.status.success() {
            return Err(SessionError::Capture {
                device: DeviceKind::Camera,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        expect_output(DeviceKind::Camera, &path).await?;
        info!(path = %path.display(), "image captured");

        Ok(Artifact::image(path))
    }

    fn release(&self, _handle: DeviceHandle) {
        self.slot.free();
    }
}
