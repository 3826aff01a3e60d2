//! Captured and received payloads
//!
//! An artifact is a file on disk plus its kind. Artifacts move from the
//! stage that produced them to the next stage; nothing deletes them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Payload kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Audio,
    Image,
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::Audio => write!(f, "audio"),
            ArtifactKind::Image => write!(f, "image"),
        }
    }
}

/// A payload stored at a known location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    kind: ArtifactKind,
    path: PathBuf,
}

impl Artifact {
    pub fn new(kind: ArtifactKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    pub fn audio(path: impl Into<PathBuf>) -> Self {
        Self::new(ArtifactKind::Audio, path)
    }

    pub fn image(path: impl Into<PathBuf>) -> Self {
        Self::new(ArtifactKind::Image, path)
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The artifacts captured during one cycle, in capture order
#[derive(Debug, Clone, Default)]
pub struct ArtifactSet {
    artifacts: Vec<Artifact>,
}

impl ArtifactSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, artifact: Artifact) {
        self.artifacts.push(artifact);
    }

    /// First artifact of the given kind
    pub fn get(&self, kind: ArtifactKind) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.kind == kind)
    }
}

/// Build a file name like `query_20250104_093015_007.wav`.
///
/// The timestamp keeps names unique across runs, the sequence number keeps
/// them unique within a second.
pub fn timestamped_name(stem: &str, sequence: u64, extension: &str) -> String {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    format!("{stem}_{timestamp}_{sequence:03}.{extension}")
}
