//! Interaction modes
//!
//! A mode is fixed once selected. It decides which capture devices a
//! cycle needs and which remote endpoint the cycle is dispatched to.

use serde::{Deserialize, Serialize};

use crate::devices::DeviceKind;

/// The mutually exclusive interaction flows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
pub enum Mode {
    /// Fetch and play the next audiobook sentence
    #[serde(rename = "audiobook")]
    #[value(name = "audiobook")]
    AudiobookPlayback,
    /// Record a spoken question and play the answer
    #[serde(rename = "voice")]
    #[value(name = "voice")]
    VoiceQuery,
    /// Photograph printed text, record a question, play the answer
    #[serde(rename = "ocr")]
    #[value(name = "ocr")]
    OcrVoiceQuery,
    /// Photograph a scene, record a question, play the answer
    #[serde(rename = "vision")]
    #[value(name = "vision")]
    VisionVoiceQuery,
}

impl Mode {
    pub const ALL: [Mode; 4] = [
        Mode::AudiobookPlayback,
        Mode::VoiceQuery,
        Mode::OcrVoiceQuery,
        Mode::VisionVoiceQuery,
    ];

    /// Capture devices required by this mode, in capture order
    pub fn required_devices(&self) -> &'static [DeviceKind] {
        match self {
            Mode::AudiobookPlayback => &[],
            Mode::VoiceQuery => &[DeviceKind::Microphone],
            Mode::OcrVoiceQuery | Mode::VisionVoiceQuery => {
                &[DeviceKind::Camera, DeviceKind::Microphone]
            }
        }
    }

    /// Name used on the command line and in configuration files
    pub fn cli_name(&self) -> &'static str {
        match self {
            Mode::AudiobookPlayback => "audiobook",
            Mode::VoiceQuery => "voice",
            Mode::OcrVoiceQuery => "ocr",
            Mode::VisionVoiceQuery => "vision",
        }
    }

    /// Human-readable title shown in the menu
    pub fn title(&self) -> &'static str {
        match self {
            Mode::AudiobookPlayback => "Audiobook Player",
            Mode::VoiceQuery => "Voice Query Assistant",
            Mode::OcrVoiceQuery => "OCR + Voice Query",
            Mode::VisionVoiceQuery => "Vision + Voice Query",
        }
    }

    /// Menu number (1-based)
    pub fn menu_number(&self) -> u8 {
        match self {
            Mode::AudiobookPlayback => 1,
            Mode::VoiceQuery => 2,
            Mode::OcrVoiceQuery => 3,
            Mode::VisionVoiceQuery => 4,
        }
    }

    /// Resolve a menu entry such as `"2"` to a mode
    pub fn from_menu_choice(choice: &str) -> Option<Mode> {
        let number: u8 = choice.trim().parse().ok()?;
        Mode::ALL.into_iter().find(|m| m.menu_number() == number)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.cli_name())
    }
}
