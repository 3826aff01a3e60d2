//! Fixed endpoint table: one path and one form layout per mode

use crate::artifact::ArtifactKind;
use crate::mode::Mode;

/// A multipart form field filled from a captured artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormField {
    pub name: &'static str,
    pub kind: ArtifactKind,
    pub file_name: &'static str,
    pub mime: &'static str,
}

/// What the service sends back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseBody {
    /// A JSON string holding an audio URL to fetch with GET
    AudioUrl,
    /// The audio itself; saved under `<stem>_...wav`
    AudioBytes { stem: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub path: &'static str,
    pub fields: &'static [FormField],
    pub response: ResponseBody,
}

const QUERY_AUDIO: FormField = FormField {
    name: "audio",
    kind: ArtifactKind::Audio,
    file_name: "query.wav",
    mime: "audio/wav",
};

const QUERY_IMAGE: FormField = FormField {
    name: "image",
    kind: ArtifactKind::Image,
    file_name: "image.jpg",
    mime: "image/jpeg",
};

const NEXT_SENTENCE: Endpoint = Endpoint {
    path: "/next-sentence",
    fields: &[],
    response: ResponseBody::AudioUrl,
};

const RAG_VOICE: Endpoint = Endpoint {
    path: "/rag-voice-assistant",
    fields: &[FormField {
        name: "file",
        ..QUERY_AUDIO
    }],
    response: ResponseBody::AudioBytes { stem: "response" },
};

const OCR_IMAGE_AND_AUDIO: Endpoint = Endpoint {
    path: "/process-ocr-image-and-audio",
    fields: &[QUERY_IMAGE, QUERY_AUDIO],
    response: ResponseBody::AudioBytes {
        stem: "ocr_response",
    },
};

const TEXT_AND_IMAGE: Endpoint = Endpoint {
    path: "/process-text-and-image",
    fields: &[QUERY_IMAGE, QUERY_AUDIO],
    response: ResponseBody::AudioBytes {
        stem: "vision_response",
    },
};

impl Endpoint {
    pub fn for_mode(mode: Mode) -> &'static Endpoint {
        match mode {
            Mode::AudiobookPlayback => &NEXT_SENTENCE,
            Mode::VoiceQuery => &RAG_VOICE,
            Mode::OcrVoiceQuery => &OCR_IMAGE_AND_AUDIO,
            Mode::VisionVoiceQuery => &TEXT_AND_IMAGE,
        }
    }

    /// Join this endpoint's path onto a base URL
    pub fn url(&self, base_url: &str) -> String {
        format!("{}{}", base_url.trim_end_matches('/'), self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_query_uses_file_field() {
        let endpoint = Endpoint::for_mode(Mode::VoiceQuery);
        assert_eq!(endpoint.path, "/rag-voice-assistant");
        assert_eq!(endpoint.fields.len(), 1);
        assert_eq!(endpoint.fields[0].name, "file");
        assert_eq!(endpoint.fields[0].mime, "audio/wav");
    }

    #[test]
    fn test_image_modes_send_image_and_audio() {
        for mode in [Mode::OcrVoiceQuery, Mode::VisionVoiceQuery] {
            let names: Vec<_> = Endpoint::for_mode(mode).fields.iter().map(|f| f.name).collect();
            assert_eq!(names, ["image", "audio"]);
        }
        assert_eq!(
            Endpoint::for_mode(Mode::VisionVoiceQuery).path,
            "/process-text-and-image"
        );
    }

    #[test]
    fn test_url_join() {
        let endpoint = Endpoint::for_mode(Mode::AudiobookPlayback);
        assert_eq!(
            endpoint.url("http://pi.local:3100/"),
            "http://pi.local:3100/next-sentence"
        );
    }
}
