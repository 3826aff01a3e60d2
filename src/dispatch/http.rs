//! HTTP dispatcher backed by `reqwest`

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::endpoint::{Endpoint, ResponseBody};
use super::{file_name_from_url, DispatchRequest, Dispatcher};
use crate::artifact::{timestamped_name, Artifact};
use crate::config::Config;
use crate::error::SessionError;
use crate::mode::Mode;

/// Client for the remote inference service
pub struct HttpDispatcher {
    client: Client,
    base_url: String,
    book_id: String,
    response_dir: PathBuf,
    download_dir: PathBuf,
}

impl HttpDispatcher {
    pub fn from_config(config: &Config) -> Result<Self, SessionError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: config.server_url.clone(),
            book_id: config.book_id.clone(),
            response_dir: config.audio_capture_dir(),
            download_dir: config.download_dir(),
        })
    }

    /// Ask the service which audio segment comes next
    pub async fn next_sentence(&self) -> Result<String, SessionError> {
        let url = Endpoint::for_mode(Mode::AudiobookPlayback).url(&self.base_url);
        debug!(%url, book_id = %self.book_id, "requesting next sentence");

        let response = self
            .client
            .post(&url)
            .query(&[("book_id", self.book_id.as_str())])
            .send()
            .await?;
        let body = check_status(response).await?.text().await?;

        serde_json::from_str::<String>(&body)
            .map_err(|e| SessionError::InvalidResponse(format!("expected a JSON string: {e}")))
    }

    /// Fetch an audio URL into the download directory
    pub async fn download(&self, audio_url: &str) -> Result<Artifact, SessionError> {
        let file_name = file_name_from_url(audio_url).ok_or_else(|| {
            SessionError::InvalidResponse(format!("no file name in {audio_url}"))
        })?;

        let response = check_status(self.client.get(audio_url).send().await?).await?;

        tokio::fs::create_dir_all(&self.download_dir).await?;
        let path = self.download_dir.join(&file_name);
        let mut file = tokio::fs::File::create(&path).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0usize;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len();
        }
        file.flush().await?;

        info!(path = %path.display(), bytes = written, "audio segment downloaded");
        Ok(Artifact::audio(path))
    }

    async fn post_artifacts(
        &self,
        endpoint: &Endpoint,
        request: &DispatchRequest<'_>,
        stem: &str,
    ) -> Result<Artifact, SessionError> {
        let mut form = Form::new();
        for field in endpoint.fields {
            let artifact = request
                .artifacts
                .get(field.kind)
                .ok_or(SessionError::MissingArtifact { kind: field.kind })?;
            let bytes = read_artifact(artifact.path()).await?;
            let part = Part::bytes(bytes)
                .file_name(field.file_name)
                .mime_str(field.mime)?;
            form = form.part(field.name, part);
        }

        let url = endpoint.url(&self.base_url);
        info!(%url, mode = %request.mode, "sending request to server");

        let response = self.client.post(&url).multipart(form).send().await?;
        let body = check_status(response).await?.bytes().await?;

        tokio::fs::create_dir_all(&self.response_dir).await?;
        let path = self
            .response_dir
            .join(timestamped_name(stem, request.sequence, "wav"));
        tokio::fs::write(&path, &body).await?;

        debug!(path = %path.display(), bytes = body.len(), "response saved");
        Ok(Artifact::audio(path))
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn dispatch(&self, request: &DispatchRequest<'_>) -> Result<Artifact, SessionError> {
        let endpoint = Endpoint::for_mode(request.mode);
        match endpoint.response {
            ResponseBody::AudioUrl => {
                let audio_url = self.next_sentence().await?;
                info!(%audio_url, "received audio URL");
                self.download(&audio_url).await
            }
            ResponseBody::AudioBytes { stem } => {
                self.post_artifacts(endpoint, request, stem).await
            }
        }
    }
}

async fn read_artifact(path: &Path) -> Result<Vec<u8>, SessionError> {
    tokio::fs::read(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            SessionError::ArtifactNotFound {
                path: path.to_path_buf(),
            }
        } else {
            SessionError::Io(e)
        }
    })
}

async fn check_status(response: Response) -> Result<Response, SessionError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    warn!(%status, url = %response.url(), "service returned an error");
    Err(SessionError::ServiceError {
        status: status.as_u16(),
    })
}
