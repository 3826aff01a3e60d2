//! Configuration loading and management
//!
//! Built-in defaults, then an optional TOML file, then environment overrides.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::mode::Mode;

/// Environment variable naming a configuration file
pub const CONFIG_ENV: &str = "PI_COMPANION_CONFIG";
/// Environment override for the remote service base URL
pub const SERVER_URL_ENV: &str = "PI_COMPANION_SERVER_URL";
/// Environment override for the audiobook id
pub const BOOK_ID_ENV: &str = "PI_COMPANION_BOOK_ID";

/// Errors raised while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Client configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Base URL of the remote service
    pub server_url: String,

    /// Book requested from `/next-sentence`
    pub book_id: String,

    /// Per-request timeout for the remote service
    pub request_timeout_secs: u64,

    pub paths: PathsConfig,
    pub microphone: MicrophoneConfig,
    pub camera: CameraConfig,
    pub speaker: SpeakerConfig,
    pub supervisor: SupervisorConfig,
}

/// Where artifacts are written
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub base_dir: PathBuf,
    /// Recorded queries and service responses
    pub audio_capture_dir: PathBuf,
    /// Camera captures
    pub image_capture_dir: PathBuf,
    /// Downloaded audiobook segments
    pub download_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MicrophoneConfig {
    /// Input device name; the host default when unset
    pub device: Option<String>,
    pub record_secs: u32,
    /// Rate of the written WAV, which is always mono 16-bit
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CameraConfig {
    /// Still-capture program and leading arguments
    pub command: Vec<String>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpeakerConfig {
    /// Output device name; the host default when unset
    pub device: Option<String>,
    /// Interval between "still playing" checks
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SupervisorConfig {
    /// Delay before re-reading a line after an edge
    pub settle_ms: u64,
    /// Per-line lockout after an accepted edge (button-switching variant)
    pub lockout_ms: u64,
    /// Per-line lockout for the playback-guard variant
    pub guard_lockout_ms: u64,
    /// Time a child gets to exit after SIGTERM before SIGKILL
    pub termination_grace_ms: u64,
    /// Line sampling interval of the listener thread
    pub edge_poll_ms: u64,
    /// Root of the sysfs GPIO tree
    pub gpio_root: PathBuf,
    pub bindings: Vec<BindingConfig>,
}

/// One button line and what it launches
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BindingConfig {
    pub line: u32,
    #[serde(default)]
    pub mode: Option<Mode>,
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "http://192.168.100.160:3100".to_string(),
            book_id: "1735953778384-Atomic habits ( PDFDrive ) shorter.pdf".to_string(),
            request_timeout_secs: 60,
            paths: PathsConfig::default(),
            microphone: MicrophoneConfig::default(),
            camera: CameraConfig::default(),
            speaker: SpeakerConfig::default(),
            supervisor: SupervisorConfig::default(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            audio_capture_dir: PathBuf::from("temp_files"),
            image_capture_dir: PathBuf::from("image/temp"),
            download_dir: PathBuf::from("audio"),
        }
    }
}

impl Default for MicrophoneConfig {
    fn default() -> Self {
        Self {
            device: None,
            record_secs: 5,
            sample_rate: 16_000,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            command: vec!["libcamera-still".to_string()],
            width: 1920,
            height: 1080,
        }
    }
}

impl Default for SpeakerConfig {
    fn default() -> Self {
        Self {
            device: None,
            poll_interval_ms: 100,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            settle_ms: 100,
            lockout_ms: 300,
            guard_lockout_ms: 100,
            termination_grace_ms: 5_000,
            edge_poll_ms: 10,
            gpio_root: PathBuf::from("/sys/class/gpio"),
            bindings: vec![
                BindingConfig::for_mode(17, Mode::OcrVoiceQuery),
                BindingConfig::for_mode(27, Mode::AudiobookPlayback),
                BindingConfig::for_mode(22, Mode::VoiceQuery),
            ],
        }
    }
}

impl BindingConfig {
    pub fn for_mode(line: u32, mode: Mode) -> Self {
        Self {
            line,
            mode: Some(mode),
            command: None,
        }
    }
}

impl Config {
    /// Load configuration from an optional file and the environment.
    ///
    /// `path` wins over `PI_COMPANION_CONFIG`; without either, defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        let mut config = match file {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        if let Ok(url) = std::env::var(SERVER_URL_ENV) {
            config.server_url = url;
        }
        if let Ok(book_id) = std::env::var(BOOK_ID_ENV) {
            config.book_id = book_id;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file, filling unspecified fields with defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_url.trim().is_empty() {
            return Err(ConfigError::Invalid("server_url is empty".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("request_timeout_secs must be > 0".into()));
        }
        if self.microphone.record_secs == 0 {
            return Err(ConfigError::Invalid("microphone.record_secs must be > 0".into()));
        }
        if self.microphone.sample_rate == 0 {
            return Err(ConfigError::Invalid("microphone.sample_rate must be > 0".into()));
        }
        if self.speaker.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("speaker.poll_interval_ms must be > 0".into()));
        }
        if self.supervisor.edge_poll_ms == 0 {
            return Err(ConfigError::Invalid("supervisor.edge_poll_ms must be > 0".into()));
        }
        if self.camera.command.is_empty() {
            return Err(ConfigError::Invalid("camera.command is empty".into()));
        }

        let mut seen = HashSet::new();
        for binding in &self.supervisor.bindings {
            if !seen.insert(binding.line) {
                return Err(ConfigError::Invalid(format!(
                    "line {} is bound more than once",
                    binding.line
                )));
            }
            match (&binding.mode, &binding.command) {
                (Some(_), None) => {}
                (None, Some(argv)) if !argv.is_empty() => {}
                _ => {
                    return Err(ConfigError::Invalid(format!(
                        "binding for line {} needs exactly one of mode or command",
                        binding.line
                    )))
                }
            }
        }
        Ok(())
    }

    /// Ensure artifact directories exist
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [
            self.audio_capture_dir(),
            self.image_capture_dir(),
            self.download_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn audio_capture_dir(&self) -> PathBuf {
        self.paths.base_dir.join(&self.paths.audio_capture_dir)
    }

    pub fn image_capture_dir(&self) -> PathBuf {
        self.paths.base_dir.join(&self.paths.image_capture_dir)
    }

    pub fn download_dir(&self) -> PathBuf {
        self.paths.base_dir.join(&self.paths.download_dir)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl SupervisorConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn lockout(&self) -> Duration {
        Duration::from_millis(self.lockout_ms)
    }

    pub fn guard_lockout(&self) -> Duration {
        Duration::from_millis(self.guard_lockout_ms)
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_millis(self.termination_grace_ms)
    }

    pub fn edge_poll(&self) -> Duration {
        Duration::from_millis(self.edge_poll_ms)
    }
}

impl MicrophoneConfig {
    pub fn record_window(&self) -> Duration {
        Duration::from_secs(u64::from(self.record_secs))
    }
}

impl SpeakerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.microphone.record_secs, 5);
        assert_eq!(config.supervisor.lockout_ms, 300);
        assert_eq!(config.supervisor.guard_lockout_ms, 100);
        assert_eq!(config.supervisor.bindings.len(), 3);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            server_url = "http://10.0.0.2:3100"

            [speaker]
            poll_interval_ms = 50

            [microphone]
            device = "hw:1,0"

            [[supervisor.bindings]]
            line = 5
            mode = "vision"

            [[supervisor.bindings]]
            line = 6
            command = ["python3", "RAG_helper.py"]
            "#,
        )
        .unwrap();

        assert_eq!(config.server_url, "http://10.0.0.2:3100");
        assert_eq!(config.microphone.device.as_deref(), Some("hw:1,0"));
        assert_eq!(config.speaker.poll_interval(), Duration::from_millis(50));
        assert_eq!(config.speaker.device, None);
        assert_eq!(config.microphone.record_window(), Duration::from_secs(5));
        assert_eq!(
            config.supervisor.bindings[0],
            BindingConfig::for_mode(5, Mode::VisionVoiceQuery)
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_duplicate_lines_rejected() {
        let mut config = Config::default();
        config
            .supervisor
            .bindings
            .push(BindingConfig::for_mode(17, Mode::VoiceQuery));
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_binding_needs_mode_or_command() {
        let mut config = Config::default();
        config.supervisor.bindings = vec![BindingConfig {
            line: 4,
            mode: None,
            command: None,
        }];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let mut config = Config::default();
        config.speaker.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ensure_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.paths.base_dir = dir.path().to_path_buf();
        config.ensure_dirs().unwrap();
        assert!(dir.path().join("temp_files").is_dir());
        assert!(dir.path().join("image/temp").is_dir());
        assert!(dir.path().join("audio").is_dir());
    }
}
