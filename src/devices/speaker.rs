//! Audio playback through a rodio sink
//!
//! One play at a time: callers queue on an async mutex. Completion is
//! detected by polling the sink at a fixed interval.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{audio, DeviceKind, PlaybackDevice, PlaybackEnd};
use crate::artifact::Artifact;
use crate::config::SpeakerConfig;
use crate::error::SessionError;

pub struct Speaker {
    device: Option<String>,
    poll_interval: Duration,
    busy: Mutex<()>,
}

impl Speaker {
    pub fn new(settings: &SpeakerConfig) -> Self {
        Self {
            device: settings.device.clone(),
            poll_interval: settings.poll_interval(),
            busy: Mutex::new(()),
        }
    }
}

#[async_trait]
impl PlaybackDevice for Speaker {
    async fn play(
        &self,
        artifact: &Artifact,
        cancel: &CancellationToken,
    ) -> Result<PlaybackEnd, SessionError> {
        let path = artifact.path();
        if !tokio::fs::try_exists(path).await? {
            return Err(SessionError::ArtifactNotFound {
                path: path.to_path_buf(),
            });
        }

        let _playing = self.busy.lock().await;
        info!(path = %path.display(), "playback started");

        // the output stream is not Send; it lives and dies on the blocking thread
        let path: PathBuf = path.to_path_buf();
        let device = self.device.clone();
        let poll = self.poll_interval;
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || play_file(device.as_deref(), &path, poll, &cancel))
            .await
            .map_err(|e| SessionError::Playback(format!("player thread failed: {e}")))?
    }
}

fn play_file(
    device: Option<&str>,
    path: &Path,
    poll: Duration,
    cancel: &CancellationToken,
) -> Result<PlaybackEnd, SessionError> {
    let source = open_source(path)?;
    let (_stream, handle) = open_output(device)?;
    let sink = Sink::try_new(&handle).map_err(|e| SessionError::Playback(e.to_string()))?;
    sink.append(source);
    Ok(wait_drained(&sink, poll, cancel))
}

fn open_source(path: &Path) -> Result<Decoder<BufReader<File>>, SessionError> {
    let file = File::open(path)?;
    Decoder::new(BufReader::new(file))
        .map_err(|e| SessionError::Playback(format!("cannot decode {}: {e}", path.display())))
}

fn open_output(name: Option<&str>) -> Result<(OutputStream, OutputStreamHandle), SessionError> {
    let opened = match name {
        None => OutputStream::try_default(),
        Some(name) => OutputStream::try_from_device(&audio::output_device(name)?),
    };
    opened.map_err(|e| SessionError::DeviceUnavailable {
        device: DeviceKind::Speaker,
        reason: e.to_string(),
    })
}

/// The "still playing" view of a sink
trait Drain {
    fn is_drained(&self) -> bool;
    fn halt(&self);
}

impl Drain for Sink {
    fn is_drained(&self) -> bool {
        self.empty()
    }

    fn halt(&self) {
        self.stop();
    }
}

/// Poll until the sink drains or the play is cancelled
fn wait_drained(sink: &impl Drain, poll: Duration, cancel: &CancellationToken) -> PlaybackEnd {
    loop {
        if sink.is_drained() {
            debug!("playback drained");
            return PlaybackEnd::Drained;
        }
        if cancel.is_cancelled() {
            info!("stopping playback");
            sink.halt();
            return PlaybackEnd::Stopped;
        }
        std::thread::sleep(poll);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Instant;

    use super::*;

    /// Reports busy for a fixed number of polls
    struct CountdownSink {
        busy_polls: AtomicUsize,
        halted: AtomicBool,
    }

    impl CountdownSink {
        fn new(busy_polls: usize) -> Self {
            Self {
                busy_polls: AtomicUsize::new(busy_polls),
                halted: AtomicBool::new(false),
            }
        }
    }

    impl Drain for CountdownSink {
        fn is_drained(&self) -> bool {
            self.busy_polls
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_err()
        }

        fn halt(&self) {
            self.halted.store(true, Ordering::SeqCst);
        }
    }

    fn speaker() -> Speaker {
        Speaker::new(&SpeakerConfig {
            device: None,
            poll_interval_ms: 10,
        })
    }

    #[tokio::test]
    async fn test_missing_artifact() {
        let err = speaker()
            .play(
                &Artifact::audio("/nonexistent/response.wav"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::ArtifactNotFound { .. }));
    }

    #[tokio::test]
    async fn test_undecodable_file_is_a_playback_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("response.wav");
        std::fs::write(&path, b"RIFF").unwrap();

        let err = speaker()
            .play(&Artifact::audio(path), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Playback(_)));
    }

    #[test]
    fn test_wav_response_decodes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("response.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..1600 {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        assert!(open_source(&path).is_ok());
    }

    #[test]
    fn test_polls_until_drained() {
        let sink = CountdownSink::new(3);
        let started = Instant::now();
        let end = wait_drained(&sink, Duration::from_millis(20), &CancellationToken::new());
        assert_eq!(end, PlaybackEnd::Drained);
        assert!(started.elapsed() >= Duration::from_millis(60));
        assert!(!sink.halted.load(Ordering::SeqCst));
    }

    #[test]
    fn test_cancel_stops_sink() {
        let sink = CountdownSink::new(usize::MAX);
        let cancel = CancellationToken::new();
        let trip = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            trip.cancel();
        });
        let end = wait_drained(&sink, Duration::from_millis(10), &cancel);
        assert_eq!(end, PlaybackEnd::Stopped);
        assert!(sink.halted.load(Ordering::SeqCst));
    }
}
