//! Button listener thread
//!
//! Samples every input line on a dedicated thread and forwards accepted
//! presses to the async side over an mpsc channel. The receiving loop is
//! the single consumer, so presses are handled one at a time. When the
//! queue is full a press is dropped, so the thread never blocks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

use super::lines::{EdgeDetector, InputLine};
use crate::error::SupervisorError;

/// Events sent from the listener to the supervisor loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    /// A falling edge passed the lockout on this line
    Pressed { line: u32 },
}

/// Polls input lines for presses
pub struct ButtonListener {
    event_tx: mpsc::Sender<ButtonEvent>,
    lines: Vec<Arc<dyn InputLine>>,
    lockout: Duration,
    poll_interval: Duration,
    running: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ButtonListener {
    pub fn new(
        event_tx: mpsc::Sender<ButtonEvent>,
        lines: Vec<Arc<dyn InputLine>>,
        lockout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            event_tx,
            lines,
            lockout,
            poll_interval,
            running: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
        }
    }

    /// Start the listener thread
    pub fn start(&self) -> Result<(), SupervisorError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SupervisorError::AlreadyRunning);
        }

        let event_tx = self.event_tx.clone();
        let running = Arc::clone(&self.running);
        let lines = self.lines.clone();
        let lockout = self.lockout;
        let poll_interval = self.poll_interval;

        let handle = thread::Builder::new()
            .name("button-listener".to_string())
            .spawn(move || {
                info!(lines = lines.len(), "button listener thread started");
                sample_loop(&event_tx, &lines, lockout, poll_interval, &running);
                running.store(false, Ordering::SeqCst);
                info!("button listener thread stopped");
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                SupervisorError::ThreadSpawn(e.to_string())
            })?;

        if let Ok(mut slot) = self.thread.lock() {
            *slot = Some(handle);
        }
        Ok(())
    }

    /// Stop sampling and wait for the thread to exit
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self.thread.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("button listener thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

fn sample_loop(
    event_tx: &mpsc::Sender<ButtonEvent>,
    lines: &[Arc<dyn InputLine>],
    lockout: Duration,
    poll_interval: Duration,
    running: &AtomicBool,
) {
    let mut detector = EdgeDetector::new(lockout);
    // Only warn once per line until it reads cleanly again
    let mut failing = vec![false; lines.len()];

    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        for (idx, line) in lines.iter().enumerate() {
            let number = line.number();
            let asserted = match line.is_asserted() {
                Ok(asserted) => {
                    failing[idx] = false;
                    asserted
                }
                Err(e) => {
                    if !failing[idx] {
                        warn!(line = number, error = %e, "failed to read input line");
                        failing[idx] = true;
                    }
                    continue;
                }
            };

            if detector.observe(number, asserted, now) {
                debug!(line = number, "press detected");
                // never park on a full queue: stop() must be able to join
                match event_tx.try_send(ButtonEvent::Pressed { line: number }) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(line = number, "button queue full, press dropped");
                    }
                    Err(TrySendError::Closed(_)) => {
                        warn!("failed to send button event - channel closed?");
                        return;
                    }
                }
            }
        }
        thread::sleep(poll_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::super::lines::testing::FakeLine;
    use super::*;

    #[test]
    fn test_listener_creation() {
        let (tx, _rx) = mpsc::channel(8);
        let listener = ButtonListener::new(
            tx,
            Vec::new(),
            Duration::from_millis(300),
            Duration::from_millis(1),
        );
        assert!(!listener.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_press_reaches_channel() {
        let (tx, mut rx) = mpsc::channel(8);
        let line = Arc::new(FakeLine::new(22));
        let listener = ButtonListener::new(
            tx,
            vec![line.clone() as Arc<dyn InputLine>],
            Duration::from_millis(300),
            Duration::from_millis(1),
        );
        listener.start().unwrap();
        assert!(listener.is_running());
        assert!(matches!(
            listener.start(),
            Err(SupervisorError::AlreadyRunning)
        ));

        line.set(true);
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(event, Some(ButtonEvent::Pressed { line: 22 }));

        listener.stop();
        assert!(!listener.is_running());
    }

    #[test]
    fn test_stop_returns_while_queue_is_full() {
        // nobody drains the receiver
        let (tx, _rx) = mpsc::channel(1);
        let line = Arc::new(FakeLine::new(17));
        let listener = ButtonListener::new(
            tx,
            vec![line.clone() as Arc<dyn InputLine>],
            Duration::ZERO,
            Duration::from_millis(1),
        );
        listener.start().unwrap();

        for _ in 0..6 {
            line.set(true);
            thread::sleep(Duration::from_millis(20));
            line.set(false);
            thread::sleep(Duration::from_millis(20));
        }

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        thread::spawn(move || {
            listener.stop();
            let _ = done_tx.send(listener.is_running());
        });
        let still_running = done_rx
            .recv_timeout(Duration::from_secs(3))
            .expect("stop() did not return");
        assert!(!still_running);
    }
}
