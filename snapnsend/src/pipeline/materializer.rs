//! Turning image references into files on disk.
//!
//! Files for one request live in `<root>/<user_id>/<request_id>/` and are numbered by their
//! 1-based position:
//!
//! | reference             | file                      |
//! |-----------------------|---------------------------|
//! | placeholder           | `placeholder_img_NN.jpg`  |
//! | downloaded URL        | `img_NN.<ext>`            |
//! | failed download       | `error_img_NN.txt`        |
//!
//! A failed download never fails the batch. Local filesystem errors do.

use async_trait::async_trait;
use reqwest::{Client, Response, header::CONTENT_TYPE};
use std::{
    io::Cursor,
    path::{Path, PathBuf},
};
use tokio::{fs::File, io::AsyncWriteExt};
use tracing::{debug, instrument, warn};
use url::Url;

use super::{ImageReference, PipelineError, http_client};
use crate::{
    config::DownloadsConfig,
    types::{RequestId, UserId, abbrev_uuid},
};

/// Produces one local file per reference, in order.
#[async_trait]
pub trait Materialize: Send + Sync {
    async fn materialize(
        &self,
        references: &[ImageReference],
        user_id: UserId,
        request_id: RequestId,
    ) -> Result<Vec<PathBuf>, PipelineError>;
}

pub struct ImageMaterializer {
    client: Client,
    root: PathBuf,
    placeholder_size: u32,
}

/// Outcome of a single download attempt that did not hit a local I/O error.
enum Download {
    Saved(PathBuf),
    Failed(String),
}

impl ImageMaterializer {
    pub fn new(config: &DownloadsConfig) -> Result<Self, PipelineError> {
        Ok(Self {
            client: http_client(config.request_timeout)?,
            root: config.root.clone(),
            placeholder_size: config.placeholder_size,
        })
    }

    /// Directory that holds the files for one request.
    pub fn request_dir(&self, user_id: UserId, request_id: RequestId) -> PathBuf {
        self.root.join(user_id.to_string()).join(request_id.to_string())
    }

    /// Encode a black square JPEG of the configured size.
    fn placeholder_jpeg(&self) -> Result<Vec<u8>, PipelineError> {
        let image = image::RgbImage::new(self.placeholder_size, self.placeholder_size);
        let mut bytes = Vec::new();
        image.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Jpeg)?;
        Ok(bytes)
    }

    async fn download(&self, url: &Url, dir: &Path, position: usize) -> Result<Download, PipelineError> {
        let mut response = match self.client.get(url.clone()).send().await {
            Ok(response) => response,
            Err(e) => return Ok(Download::Failed(e.to_string())),
        };

        if !response.status().is_success() {
            return Ok(Download::Failed(format!("HTTP status {}", response.status())));
        }

        let ext = extension_for(response.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()));
        let path = dir.join(format!("img_{position:02}.{ext}"));
        let file = File::create(&path)
            .await
            .map_err(|e| PipelineError::io("create", &path, e))?;

        match save_body(&mut response, file, &path).await? {
            Some(error) => Ok(Download::Failed(error)),
            None => Ok(Download::Saved(path)),
        }
    }
}

/// Stream a response body into `file`.
///
/// Returns the transfer error when the body broke off. Partial bodies are not kept: `path` is
/// removed on a transfer error and on a local write error alike.
async fn save_body(response: &mut Response, mut file: File, path: &Path) -> Result<Option<String>, PipelineError> {
    let written = async {
        while let Some(chunk) = response.chunk().await.map_err(BodyError::Transfer)? {
            file.write_all(&chunk).await.map_err(BodyError::Write)?;
        }
        file.flush().await.map_err(BodyError::Write)
    }
    .await;

    let outcome = match written {
        Ok(()) => return Ok(None),
        Err(BodyError::Transfer(e)) => Ok(Some(e.to_string())),
        Err(BodyError::Write(e)) => Err(PipelineError::io("write", path, e)),
    };

    drop(file);
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "Failed to remove partial download");
    }
    outcome
}

enum BodyError {
    Transfer(reqwest::Error),
    Write(std::io::Error),
}

#[async_trait]
impl Materialize for ImageMaterializer {
    #[instrument(skip(self, references), fields(user_id = %abbrev_uuid(&user_id), request_id = %abbrev_uuid(&request_id), count = references.len()), err)]
    async fn materialize(
        &self,
        references: &[ImageReference],
        user_id: UserId,
        request_id: RequestId,
    ) -> Result<Vec<PathBuf>, PipelineError> {
        let dir = self.request_dir(user_id, request_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| PipelineError::io("create directory", &dir, e))?;

        // Encoded at most once per batch
        let mut placeholder: Option<Vec<u8>> = None;
        let mut paths = Vec::with_capacity(references.len());

        for (i, reference) in references.iter().enumerate() {
            let position = i + 1;
            match reference {
                ImageReference::Placeholder { .. } => {
                    if placeholder.is_none() {
                        placeholder = Some(self.placeholder_jpeg()?);
                    }
                    let bytes = placeholder.as_deref().unwrap_or_default();
                    let path = dir.join(format!("placeholder_img_{position:02}.jpg"));
                    tokio::fs::write(&path, bytes)
                        .await
                        .map_err(|e| PipelineError::io("write", &path, e))?;
                    paths.push(path);
                }
                ImageReference::Remote(url) => match self.download(url, &dir, position).await? {
                    Download::Saved(path) => {
                        debug!(position, path = %path.display(), "Downloaded image");
                        paths.push(path);
                    }
                    Download::Failed(error) => {
                        warn!(position, url = %url, error = %error, "Image download failed");
                        let path = dir.join(format!("error_img_{position:02}.txt"));
                        let contents = format!("Error downloading image from URL: {url}\nError: {error}\n");
                        tokio::fs::write(&path, contents)
                            .await
                            .map_err(|e| PipelineError::io("write", &path, e))?;
                        paths.push(path);
                    }
                },
            }
        }

        Ok(paths)
    }
}

/// File extension for a response content type; `jpg` when unknown.
fn extension_for(content_type: Option<&str>) -> &'static str {
    let essence = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase());

    match essence.as_deref() {
        Some("image/png") => "png",
        Some("image/gif") => "gif",
        Some("image/webp") => "webp",
        _ => "jpg",
    }
}
