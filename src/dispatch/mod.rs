//! Remote dispatcher
//!
//! Maps a mode and its captured artifacts to one HTTP call and returns the
//! audio artifact to play. No retries: failures surface to the session.

mod endpoint;
mod http;

use async_trait::async_trait;

use crate::artifact::{Artifact, ArtifactSet};
use crate::error::SessionError;
use crate::mode::Mode;

pub use http::HttpDispatcher;

/// One request to the remote service
#[derive(Debug, Clone, Copy)]
pub struct DispatchRequest<'a> {
    pub mode: Mode,
    pub artifacts: &'a ArtifactSet,
    /// Session sequence number, used to name the response artifact
    pub sequence: u64,
}

#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, request: &DispatchRequest<'_>) -> Result<Artifact, SessionError>;
}

/// Local file name for a downloaded URL: the last path segment with the
/// query string dropped, percent-decoded.
///
/// Returns `None` when nothing usable remains, including names that would
/// escape the download directory.
pub fn file_name_from_url(url: &str) -> Option<String> {
    let without_query = url.split(|c: char| c == '?' || c == '#').next()?;
    let segment = without_query.rsplit('/').next()?;
    let decoded = urlencoding::decode(segment).ok()?.into_owned();

    if decoded.is_empty()
        || decoded == "."
        || decoded == ".."
        || decoded.contains('/')
        || decoded.contains('\\')
    {
        return None;
    }
    Some(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_is_decoded_and_query_stripped() {
        assert_eq!(
            file_name_from_url("http://host:3100/audio/segment%201.mp3?x=1").as_deref(),
            Some("segment 1.mp3")
        );
    }

    #[test]
    fn test_file_name_keeps_unicode() {
        assert_eq!(
            file_name_from_url("http://host/a/%E7%AC%AC%E4%B8%80%E5%8F%A5.mp3").as_deref(),
            Some("第一句.mp3")
        );
    }

    #[test]
    fn test_file_name_rejects_unusable_segments() {
        assert_eq!(file_name_from_url("http://host/audio/"), None);
        assert_eq!(file_name_from_url("http://host/audio/%2E%2E"), None);
        assert_eq!(file_name_from_url("http://host/a/..%2Fetc%2Fpasswd"), None);
    }
}
