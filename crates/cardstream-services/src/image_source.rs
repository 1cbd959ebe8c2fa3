//! Fetches a card face and decodes it to raw RGB.

use std::time::Duration;

use async_trait::async_trait;

use cardstream_core::wire::{FACE_HEIGHT, FACE_WIDTH};

/// Produces raw 24-bit RGB pixels for an image location.
///
/// Implementations must be safe to call concurrently from many streams.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch_rgb(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Fetches over HTTP(S). The underlying client pools connections and is
/// shared by every stream.
pub struct HttpImageSource {
    client: reqwest::Client,
}

impl HttpImageSource {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(FetchError::Http)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    async fn fetch_rgb(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(FetchError::Http)?;
        let body = response.bytes().await.map_err(FetchError::Http)?;
        tracing::trace!(url, bytes = body.len(), "image fetched");

        tokio::task::spawn_blocking(move || decode_rgb(&body))
            .await
            .map_err(|e| FetchError::Decode(format!("decoder task failed: {e}")))?
    }
}

/// Decode an encoded image to RGB, insisting on the fixed face size.
pub fn decode_rgb(encoded: &[u8]) -> Result<Vec<u8>, FetchError> {
    let image = image::load_from_memory(encoded)
        .map_err(|e| FetchError::Decode(e.to_string()))?
        .to_rgb8();
    let (width, height) = image.dimensions();
    if (width, height) != (FACE_WIDTH, FACE_HEIGHT) {
        return Err(FetchError::UnexpectedDimensions { width, height });
    }
    Ok(image.into_raw())
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(reqwest::Error),
    #[error("invalid image data: {0}")]
    Decode(String),
    #[error("image is {width}x{height}, expected {}x{}", FACE_WIDTH, FACE_HEIGHT)]
    UnexpectedDimensions { width: u32, height: u32 },
}
