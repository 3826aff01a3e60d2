//! Playback guard: one button steps a single-mode program
//!
//! A press starts the next cycle. Presses that land while a cycle is
//! running are dropped rather than queued.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::lines::InputLine;
use super::listener::{ButtonEvent, ButtonListener};
use crate::error::SupervisorError;

pub struct PlaybackGuard {
    line: Arc<dyn InputLine>,
    rx: mpsc::Receiver<ButtonEvent>,
    settle: Duration,
    listener: Option<ButtonListener>,
}

impl PlaybackGuard {
    /// Start sampling `line` on a listener thread
    pub fn start(
        line: Arc<dyn InputLine>,
        lockout: Duration,
        poll_interval: Duration,
        settle: Duration,
    ) -> Result<Self, SupervisorError> {
        let (tx, rx) = mpsc::channel(16);
        let listener = ButtonListener::new(tx, vec![line.clone()], lockout, poll_interval);
        listener.start()?;
        info!(line = line.number(), "playback guard armed");
        Ok(Self {
            line,
            rx,
            settle,
            listener: Some(listener),
        })
    }

    #[cfg(test)]
    fn from_channel(
        line: Arc<dyn InputLine>,
        rx: mpsc::Receiver<ButtonEvent>,
        settle: Duration,
    ) -> Self {
        Self {
            line,
            rx,
            settle,
            listener: None,
        }
    }

    /// Wait for a debounced press. False on cancel or when the listener is gone.
    pub async fn next_press(&mut self, cancel: &CancellationToken) -> bool {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                event = self.rx.recv() => event,
            };
            let Some(ButtonEvent::Pressed { line }) = event else {
                return false;
            };

            tokio::time::sleep(self.settle).await;
            match self.line.is_asserted() {
                Ok(true) => {
                    debug!(line, "press accepted");
                    return true;
                }
                Ok(false) => debug!(line, "bounce ignored"),
                Err(e) => warn!(line, error = %e, "failed to re-read line"),
            }
        }
    }

    /// Drop presses that arrived while a cycle was active
    pub fn discard_pending(&mut self) -> usize {
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "ignored presses during active cycle");
        }
        dropped
    }

    /// Stop the listener and release the line
    pub fn stop(mut self) {
        self.rx.close();
        if let Some(listener) = self.listener.take() {
            listener.stop();
        }
        if let Err(e) = self.line.release() {
            warn!(error = %e, "failed to release guard line");
        }
    }
}
