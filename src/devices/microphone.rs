//! Fixed-window microphone recording
//!
//! Samples come from the input device through cpal and are written as
//! 16-bit mono PCM WAV with hound.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{
    audio, expect_output, CaptureDevice, CaptureRequest, CaptureTrigger, DeviceHandle, DeviceKind,
    ExclusiveSlot, TriggerDecision,
};
use crate::artifact::{timestamped_name, Artifact};
use crate::config::MicrophoneConfig;
use crate::error::SessionError;

/// Records mono WAV for a configured number of seconds
pub struct Microphone {
    settings: MicrophoneConfig,
    output_dir: PathBuf,
    slot: ExclusiveSlot,
    trigger: Option<Arc<dyn CaptureTrigger>>,
}

impl Microphone {
    pub fn new(settings: MicrophoneConfig, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            settings,
            output_dir: output_dir.into(),
            slot: ExclusiveSlot::default(),
            trigger: None,
        }
    }

    /// Wait for the operator before each recording
    pub fn with_trigger(mut self, trigger: Arc<dyn CaptureTrigger>) -> Self {
        self.trigger = Some(trigger);
        self
    }
}

#[async_trait]
impl CaptureDevice for Microphone {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Microphone
    }

    fn acquire(&self) -> Result<DeviceHandle, SessionError> {
        // fail before claiming so a missing input never holds the slot
        audio::input_device(self.settings.device.as_deref())?;
        self.slot.try_claim(DeviceKind::Microphone)?;
        Ok(DeviceHandle::new(DeviceKind::Microphone))
    }

    async fn capture(
        &self,
        _handle: &DeviceHandle,
        request: &CaptureRequest,
        cancel: &CancellationToken,
    ) -> Result<Artifact, SessionError> {
        if let Some(trigger) = &self.trigger {
            let prompt = "Press Enter to start recording...";
            let decision = tokio::select! {
                _ = cancel.cancelled() => return Err(SessionError::Cancelled),
                decision = trigger.wait_for_trigger(prompt) => decision?,
            };
            if decision == TriggerDecision::Abort {
                return Err(SessionError::CaptureAborted {
                    device: DeviceKind::Microphone,
                });
            }
        }

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let path = self
            .output_dir
            .join(timestamped_name("query", request.sequence, "wav"));

        info!(
            path = %path.display(),
            secs = self.settings.record_secs,
            "recording"
        );
        // fixed window: runs to completion even if cancelled meanwhile
        let device = self.settings.device.clone();
        let window = self.settings.record_window();
        let rate = self.settings.sample_rate;
        let output = path.clone();
        tokio::task::spawn_blocking(move || record_wav(device.as_deref(), window, rate, &output))
            .await
            .map_err(|e| capture_error(format!("recorder thread failed: {e}")))??;

        expect_output(DeviceKind::Microphone, &path).await?;
        debug!(path = %path.display(), "recording done");

        Ok(Artifact::audio(path))
    }

    fn release(&self, _handle: DeviceHandle) {
        self.slot.free();
    }
}

/// Open the input, record for `window`, and write the result to `path`
fn record_wav(
    device: Option<&str>,
    window: Duration,
    target_rate: u32,
    path: &Path,
) -> Result<(), SessionError> {
    let device = audio::input_device(device)?;
    let supported = device.default_input_config().map_err(capture_error)?;
    let source_rate = supported.sample_rate().0;
    let channels = usize::from(supported.channels());
    let format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();

    let buffer = Arc::new(Mutex::new(Vec::<f32>::new()));
    let stream = match format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, buffer.clone())?,
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, buffer.clone())?,
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, buffer.clone())?,
        other => return Err(capture_error(format!("unsupported sample format {other:?}"))),
    };

    stream.play().map_err(capture_error)?;
    std::thread::sleep(window);
    drop(stream);

    let samples = std::mem::take(
        &mut *buffer
            .lock()
            .map_err(|_| capture_error("sample buffer poisoned"))?,
    );
    debug!(
        source_rate,
        channels,
        samples = samples.len(),
        "input stream closed"
    );

    let pcm = to_mono_pcm16(&samples, source_rate, channels, target_rate);
    write_wav(path, &pcm, target_rate)
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    buffer: Arc<Mutex<Vec<f32>>>,
) -> Result<cpal::Stream, SessionError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if let Ok(mut buffer) = buffer.lock() {
                    buffer.extend(data.iter().map(|&s| s.to_sample::<f32>()));
                }
            },
            |err| error!(error = %err, "input stream error"),
            None,
        )
        .map_err(capture_error)
}

/// Mix interleaved frames to mono and resample to `target_rate`
fn to_mono_pcm16(
    samples: &[f32],
    source_rate: u32,
    channels: usize,
    target_rate: u32,
) -> Vec<i16> {
    let mono: Vec<f32> = samples
        .chunks(channels.max(1))
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();
    if mono.is_empty() || source_rate == 0 {
        return Vec::new();
    }

    let out_len = (mono.len() as u64 * u64::from(target_rate) / u64::from(source_rate)) as usize;
    (0..out_len)
        .map(|i| {
            let src = (i as u64 * u64::from(source_rate) / u64::from(target_rate)) as usize;
            let sample = mono[src.min(mono.len() - 1)];
            (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
        })
        .collect()
}

fn write_wav(path: &Path, pcm: &[i16], sample_rate: u32) -> Result<(), SessionError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).map_err(capture_error)?;
    for &sample in pcm {
        writer.write_sample(sample).map_err(capture_error)?;
    }
    writer.finalize().map_err(capture_error)
}

fn capture_error(reason: impl std::fmt::Display) -> SessionError {
    SessionError::Capture {
        device: DeviceKind::Microphone,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(device: Option<&str>) -> MicrophoneConfig {
        MicrophoneConfig {
            device: device.map(String::from),
            record_secs: 1,
            ..MicrophoneConfig::default()
        }
    }

    #[test]
    fn test_unavailable_input_does_not_claim() {
        let mic = Microphone::new(settings(Some("no-such-input-device")), "temp_files");
        assert!(matches!(
            mic.acquire(),
            Err(SessionError::DeviceUnavailable { .. })
        ));
        assert!(matches!(
            mic.acquire(),
            Err(SessionError::DeviceUnavailable { .. })
        ));
    }

    #[test]
    fn test_stereo_48k_to_mono_16k() {
        // 6 stereo frames at 48 kHz -> 2 mono samples at 16 kHz
        let stereo = [0.5f32, 0.5, 0.1, 0.1, 0.1, 0.1, -0.5, -0.5, 0.1, 0.1, 0.1, 0.1];
        let pcm = to_mono_pcm16(&stereo, 48_000, 2, 16_000);
        assert_eq!(pcm, vec![(0.5 * 32767.0) as i16, (-0.5 * 32767.0) as i16]);
    }

    #[test]
    fn test_mixing_and_clamping() {
        let pcm = to_mono_pcm16(&[1.0, 0.0, 2.0, 2.0], 16_000, 2, 16_000);
        assert_eq!(pcm, vec![(0.5 * 32767.0) as i16, 32767]);
        assert!(to_mono_pcm16(&[], 16_000, 1, 16_000).is_empty());
    }

    #[test]
    fn test_written_wav_is_mono_16bit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("query.wav");
        write_wav(&path, &[0, 100, -100], 16_000).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 16_000);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
        let samples: Vec<i16> = reader.samples::<i16>().map(Result::unwrap).collect();
        assert_eq!(samples, [0, 100, -100]);
    }

    #[tokio::test]
    async fn test_record_window_writes_wav() {
        // Skip if no audio input is available (CI)
        if audio::input_device(None).is_err() {
            println!("No audio input available, skipping test");
            return;
        }

        let dir = tempfile::tempdir().unwrap();
        let mic = Microphone::new(settings(None), dir.path());
        let handle = mic.acquire().unwrap();
        let artifact = mic
            .capture(
                &handle,
                &CaptureRequest { sequence: 1 },
                &CancellationToken::new(),
            )
            .await;
        mic.release(handle);

        let artifact = artifact.unwrap();
        let reader = hound::WavReader::open(artifact.path()).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
    }
}
