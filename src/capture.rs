use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::imageops::{self, FilterType};
use image::{ImageOutputFormat, RgbaImage};
use log::{debug, info};
use std::io::Cursor;

use crate::error::CaptureError;
use crate::media::MediaSession;

pub const PNG_MIME: &str = "image/png";
pub const CAPTURE_FILE_NAME: &str = "capture.png";

/// Encoded still taken from the live stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    bytes: Vec<u8>,
    width: u32,
    height: u32,
    mirrored: bool,
}

impl CapturedFrame {
    pub fn from_png(bytes: Vec<u8>, width: u32, height: u32, mirrored: bool) -> Self {
        Self { bytes, width, height, mirrored }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &'static str {
        PNG_MIME
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_mirrored(&self) -> bool {
        self.mirrored
    }

    /// `data:` URL for showing the still next to its review.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", PNG_MIME, STANDARD.encode(&self.bytes))
    }

    pub fn decode(&self) -> Result<RgbaImage, CaptureError> {
        Ok(image::load_from_memory(&self.bytes)?.to_rgba8())
    }
}

/// Draws a grabbed frame onto a still of the live dimensions, flipping it
/// horizontally when `mirror` is set.
pub fn rasterize(frame: RgbaImage, width: u32, height: u32, mirror: bool) -> RgbaImage {
    let still = if frame.dimensions() == (width, height) {
        frame
    } else {
        debug!(
            "Scaling grabbed frame {}x{} to live size {}x{}",
            frame.width(),
            frame.height(),
            width,
            height
        );
        imageops::resize(&frame, width, height, FilterType::Triangle)
    };

    if mirror {
        imageops::flip_horizontal(&still)
    } else {
        still
    }
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, CaptureError> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageOutputFormat::Png)?;
    Ok(buffer.into_inner())
}

/// Turns the current frame of an active session into a [`CapturedFrame`].
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameEncoder;

impl FrameEncoder {
    pub fn new() -> Self {
        Self
    }

    /// Rejected when the session is inactive or another capture is running.
    pub async fn capture(&self, session: &MediaSession) -> Result<CapturedFrame, CaptureError> {
        if !session.is_active() {
            return Err(CaptureError::NotActive);
        }
        let Some((width, height)) = session.frame_size() else {
            return Err(CaptureError::NotActive);
        };
        let Some(_guard) = session.begin_capture() else {
            debug!("Capture rejected, another capture is in flight");
            return Err(CaptureError::InFlight);
        };

        let frame = session.grab_frame()?;
        let mirror = session.is_mirrored();

        let bytes = tokio::task::spawn_blocking(move || {
            let still = rasterize(frame, width, height, mirror);
            encode_png(&still)
        })
        .await
        .map_err(|e| CaptureError::Worker(e.to_string()))??;

        info!("Captured {}x{} frame ({} bytes, mirrored: {})", width, height, bytes.len(), mirror);
        Ok(CapturedFrame::from_png(bytes, width, height, mirror))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::still_camera::StillImageBackend;
    use image::Rgba;

    fn gradient(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| Rgba([(x * 20) as u8, (y * 30) as u8, 7, 255]))
    }

    #[test]
    fn test_rasterize_mirror_reflects_columns() {
        let source = gradient(6, 4);
        let plain = rasterize(source.clone(), 6, 4, false);
        let flipped = rasterize(source, 6, 4, true);

        for y in 0..4 {
            for x in 0..6 {
                assert_eq!(plain.get_pixel(x, y), flipped.get_pixel(5 - x, y));
            }
        }
    }

    #[test]
    fn test_rasterize_matches_live_size() {
        let still = rasterize(gradient(10, 10), 20, 5, false);
        assert_eq!(still.dimensions(), (20, 5));
    }

    #[test]
    fn test_png_encoding_and_data_url() {
        let bytes = encode_png(&gradient(4, 3)).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");

        let frame = CapturedFrame::from_png(bytes, 4, 3, false);
        assert!(frame.data_url().starts_with("data:image/png;base64,iVBORw0KGgo"));
        assert_eq!(frame.decode().unwrap().dimensions(), (4, 3));
    }

    #[tokio::test]
    async fn test_capture_requires_active_session() {
        let session = MediaSession::new(&Config::default().camera);
        let result = FrameEncoder::new().capture(&session).await;
        assert!(matches!(result, Err(CaptureError::NotActive)));
    }

    #[tokio::test]
    async fn test_capture_encodes_live_frame() {
        let backend = StillImageBackend::test_pattern(32, 24);
        let mut session = MediaSession::new(&Config::default().camera);
        session.start(&backend).await.unwrap();

        let frame = FrameEncoder::new().capture(&session).await.unwrap();
        assert_eq!(frame.dimensions(), (32, 24));
        assert_eq!(frame.mime_type(), "image/png");
        assert!(!session.is_capturing());
    }
}
