//! Button input lines and edge detection
//!
//! Buttons are wired active-low with pull-ups: the line reads `0` while
//! pressed. The supervisor only cares about the pressed transition
//! (falling edge) and suppresses re-triggers inside a per-line lockout.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::SupervisorError;

/// One digital input line
pub trait InputLine: Send + Sync {
    fn number(&self) -> u32;

    /// True while the button is held
    fn is_asserted(&self) -> Result<bool, SupervisorError>;

    /// Hand the line back to the system. Idempotent.
    fn release(&self) -> Result<(), SupervisorError>;
}

/// How often and how long to wait for udev to make a freshly exported
/// line writable
const EXPORT_SETTLE_ATTEMPTS: u32 = 10;
const EXPORT_SETTLE_DELAY: Duration = Duration::from_millis(50);

/// A line driven through the Linux sysfs GPIO interface.
///
/// Pull-ups are not configurable through sysfs; they come from the board's
/// device tree or external resistors.
#[derive(Debug)]
pub struct SysfsGpioLine {
    line: u32,
    root: PathBuf,
    /// Only unexport what this process exported
    exported_here: bool,
    released: AtomicBool,
}

impl SysfsGpioLine {
    /// Export `line` under `root` (normally `/sys/class/gpio`) as an input
    pub fn open(root: &Path, line: u32) -> Result<Self, SupervisorError> {
        let io_err = |source| SupervisorError::InputLine { line, source };
        let line_dir = root.join(format!("gpio{line}"));

        let exported_here = if line_dir.exists() {
            debug!(line, "gpio line already exported");
            false
        } else {
            fs::write(root.join("export"), line.to_string()).map_err(io_err)?;
            true
        };

        let direction = line_dir.join("direction");
        let mut attempt = 0;
        loop {
            match fs::write(&direction, "in") {
                Ok(()) => break,
                Err(e)
                    if attempt < EXPORT_SETTLE_ATTEMPTS
                        && matches!(
                            e.kind(),
                            io::ErrorKind::PermissionDenied | io::ErrorKind::NotFound
                        ) =>
                {
                    attempt += 1;
                    thread::sleep(EXPORT_SETTLE_DELAY);
                }
                Err(e) => return Err(io_err(e)),
            }
        }

        info!(line, "gpio line configured as input");
        Ok(Self {
            line,
            root: root.to_path_buf(),
            exported_here,
            released: AtomicBool::new(false),
        })
    }

    fn value_path(&self) -> PathBuf {
        self.root.join(format!("gpio{}", self.line)).join("value")
    }
}

impl InputLine for SysfsGpioLine {
    fn number(&self) -> u32 {
        self.line
    }

    fn is_asserted(&self) -> Result<bool, SupervisorError> {
        let raw = fs::read_to_string(self.value_path()).map_err(|source| {
            SupervisorError::InputLine {
                line: self.line,
                source,
            }
        })?;
        Ok(raw.trim() == "0")
    }

    fn release(&self) -> Result<(), SupervisorError> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if self.exported_here {
            fs::write(self.root.join("unexport"), self.line.to_string()).map_err(|source| {
                SupervisorError::InputLine {
                    line: self.line,
                    source,
                }
            })?;
        }
        info!(line = self.line, "gpio line released");
        Ok(())
    }
}

impl Drop for SysfsGpioLine {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(line = self.line, error = %e, "failed to release gpio line");
        }
    }
}

/// Falling-edge detector with a per-line lockout, sampled by the listener
#[derive(Debug)]
pub struct EdgeDetector {
    lockout: Duration,
    lines: HashMap<u32, LineTrack>,
}

#[derive(Debug, Default, Clone, Copy)]
struct LineTrack {
    asserted: bool,
    last_edge: Option<Instant>,
}

impl EdgeDetector {
    pub fn new(lockout: Duration) -> Self {
        Self {
            lockout,
            lines: HashMap::new(),
        }
    }

    /// Feed one sample. Returns true when this sample is an accepted press.
    pub fn observe(&mut self, line: u32, asserted: bool, now: Instant) -> bool {
        let track = self.lines.entry(line).or_default();
        let rising_to_pressed = asserted && !track.asserted;
        track.asserted = asserted;

        if !rising_to_pressed {
            return false;
        }
        if let Some(last) = track.last_edge {
            if now.duration_since(last) < self.lockout {
                debug!(line, "edge inside lockout, dropped");
                return false;
            }
        }
        track.last_edge = Some(now);
        true
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex};

    /// Line whose level is set by the test. Release order is recorded in a
    /// shared journal.
    pub(crate) struct FakeLine {
        line: u32,
        level: AtomicBool,
        pub(crate) releases: AtomicUsize,
        journal: Option<Arc<Mutex<Vec<String>>>>,
    }

    impl FakeLine {
        pub(crate) fn new(line: u32) -> Self {
            Self {
                line,
                level: AtomicBool::new(false),
                releases: AtomicUsize::new(0),
                journal: None,
            }
        }

        pub(crate) fn with_journal(mut self, journal: Arc<Mutex<Vec<String>>>) -> Self {
            self.journal = Some(journal);
            self
        }

        pub(crate) fn set(&self, pressed: bool) {
            self.level.store(pressed, Ordering::SeqCst);
        }
    }

    impl InputLine for FakeLine {
        fn number(&self) -> u32 {
            self.line
        }

        fn is_asserted(&self) -> Result<bool, SupervisorError> {
            Ok(self.level.load(Ordering::SeqCst))
        }

        fn release(&self) -> Result<(), SupervisorError> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            if let Some(journal) = &self.journal {
                journal.lock().unwrap().push(format!("release line {}", self.line));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCKOUT: Duration = Duration::from_millis(300);

    #[test]
    fn test_press_is_detected_once_while_held() {
        let mut detector = EdgeDetector::new(LOCKOUT);
        let t0 = Instant::now();
        assert!(!detector.observe(17, false, t0));
        assert!(detector.observe(17, true, t0 + Duration::from_millis(10)));
        assert!(!detector.observe(17, true, t0 + Duration::from_millis(20)));
        assert!(!detector.observe(17, true, t0 + Duration::from_secs(2)));
    }

    #[test]
    fn test_bounce_inside_lockout_is_dropped() {
        let mut detector = EdgeDetector::new(LOCKOUT);
        let t0 = Instant::now();
        assert!(detector.observe(27, true, t0));
        assert!(!detector.observe(27, false, t0 + Duration::from_millis(5)));
        assert!(!detector.observe(27, true, t0 + Duration::from_millis(10)));
        assert!(!detector.observe(27, false, t0 + Duration::from_millis(400)));
        assert!(detector.observe(27, true, t0 + Duration::from_millis(410)));
    }

    #[test]
    fn test_lockout_is_per_line() {
        let mut detector = EdgeDetector::new(LOCKOUT);
        let t0 = Instant::now();
        assert!(detector.observe(17, true, t0));
        assert!(detector.observe(22, true, t0 + Duration::from_millis(1)));
    }

    #[test]
    fn test_sysfs_line_lifecycle() {
        let root = tempfile::tempdir().unwrap();
        // sysfs creates the line directory on export; emulate that up front
        let line_dir = root.path().join("gpio17");
        std::fs::create_dir(&line_dir).unwrap();
        std::fs::write(line_dir.join("value"), "1\n").unwrap();

        let line = SysfsGpioLine::open(root.path(), 17).unwrap();
        assert_eq!(
            std::fs::read_to_string(line_dir.join("direction")).unwrap(),
            "in"
        );
        assert!(!line.is_asserted().unwrap());

        std::fs::write(line_dir.join("value"), "0\n").unwrap();
        assert!(line.is_asserted().unwrap());

        line.release().unwrap();
        // already exported by someone else, so it is left in place
        assert!(!root.path().join("unexport").exists());
    }

    #[test]
    fn test_sysfs_open_fails_without_gpio_tree() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("no-gpio");
        assert!(matches!(
            SysfsGpioLine::open(&missing, 4),
            Err(SupervisorError::InputLine { line: 4, .. })
        ));
    }
}
