//! Thumbnail derivation
//!
//! Images are decoded, scaled so the longer edge matches the target size and
//! re-encoded as JPEG. Videos go through an external ffmpeg to grab one
//! frame a little past the start, then take the same image path.
//! Every failure is absorbed and reported as `None`.

use crate::error::{CacheError, Result};
use crate::types::MediaKind;
use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

#[async_trait]
pub trait ThumbnailDeriver: Send + Sync {
    async fn derive_image_thumbnail(&self, original: Bytes, target_size: u32) -> Option<Bytes>;

    async fn derive_video_thumbnail(&self, original: Bytes, target_size: u32) -> Option<Bytes>;

    async fn derive(&self, kind: MediaKind, original: Bytes, target_size: u32) -> Option<Bytes> {
        match kind {
            MediaKind::Image => self.derive_image_thumbnail(original, target_size).await,
            MediaKind::Video => self.derive_video_thumbnail(original, target_size).await,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThumbnailSettings {
    /// JPEG quality, 1-100
    pub quality: u8,
    /// Offset of the frame grabbed from videos
    pub video_seek: Duration,
    /// Upper bound on one ffmpeg invocation
    pub video_timeout: Duration,
    pub ffmpeg_path: String,
}

impl Default for ThumbnailSettings {
    fn default() -> Self {
        Self {
            quality: 80,
            video_seek: Duration::from_millis(500),
            video_timeout: Duration::from_secs(10),
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

/// Default deriver using the `image` crate and ffmpeg
#[derive(Debug, Clone, Default)]
pub struct MediaThumbnailer {
    settings: ThumbnailSettings,
}

impl MediaThumbnailer {
    pub fn new(settings: ThumbnailSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ThumbnailSettings {
        &self.settings
    }

    async fn encode_off_thread(&self, original: Bytes, target_size: u32) -> Result<Vec<u8>> {
        let quality = self.settings.quality;
        tokio::task::spawn_blocking(move || resize_to_jpeg(&original, target_size, quality))
            .await
            .map_err(|e| CacheError::Decode(format!("thumbnail task failed: {}", e)))?
    }

    /// Grab a single PNG frame at `seek`
    async fn extract_frame(&self, original: &[u8], seek: Duration) -> Result<Vec<u8>> {
        let scratch = tempfile::Builder::new()
            .prefix("media-cache-")
            .suffix(".video")
            .tempfile()?;
        tokio::fs::write(scratch.path(), original).await?;

        let output = Command::new(&self.settings.ffmpeg_path)
            .args(["-hide_banner", "-loglevel", "error", "-ss"])
            .arg(format!("{:.3}", seek.as_secs_f64()))
            .arg("-i")
            .arg(scratch.path())
            .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.settings.video_timeout, output)
            .await
            .map_err(|_| {
                CacheError::Decode(format!(
                    "ffmpeg timed out after {:?}",
                    self.settings.video_timeout
                ))
            })??;

        if !output.status.success() || output.stdout.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CacheError::Decode(format!(
                "no frame at {:?}: {}",
                seek,
                stderr.trim()
            )));
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl ThumbnailDeriver for MediaThumbnailer {
    async fn derive_image_thumbnail(&self, original: Bytes, target_size: u32) -> Option<Bytes> {
        let size = original.len();
        match self.encode_off_thread(original, target_size).await {
            Ok(jpeg) => {
                debug!(original_size = size, thumbnail_size = jpeg.len(), target_size, "Derived image thumbnail");
                Some(Bytes::from(jpeg))
            }
            Err(e) => {
                debug!(error = %e, target_size, "Image thumbnail derivation failed");
                None
            }
        }
    }

    async fn derive_video_thumbnail(&self, original: Bytes, target_size: u32) -> Option<Bytes> {
        let seek = self.settings.video_seek;
        let frame = match self.extract_frame(&original, seek).await {
            Ok(frame) => frame,
            // Clips shorter than the seek offset have no frame there
            Err(e) if !seek.is_zero() => {
                debug!(error = %e, "Retrying frame grab from the first frame");
                match self.extract_frame(&original, Duration::ZERO).await {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!(error = %e, "Video thumbnail derivation failed");
                        return None;
                    }
                }
            }
            Err(e) => {
                debug!(error = %e, "Video thumbnail derivation failed");
                return None;
            }
        };

        let thumb = self.derive_image_thumbnail(Bytes::from(frame), target_size).await;
        if thumb.is_none() {
            warn!(target_size, "ffmpeg produced an undecodable frame");
        }
        thumb
    }
}

/// Decode, scale so the longer edge is `target_size`, and encode as JPEG
pub fn resize_to_jpeg(original: &[u8], target_size: u32, quality: u8) -> Result<Vec<u8>> {
    if target_size == 0 {
        return Err(CacheError::Decode("target size must be positive".to_string()));
    }

    let img = image::load_from_memory(original)?;
    let resized = img.resize(target_size, target_size, FilterType::Triangle);
    // JPEG has no alpha channel
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());

    let mut buf = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)))?;
    Ok(buf)
}
