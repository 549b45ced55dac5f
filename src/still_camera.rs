use anyhow::{Context, Result};
use async_trait::async_trait;
use image::{ImageBuffer, Rgba, RgbaImage};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{DeviceError, PlaybackError};
use crate::media::{CameraBackend, FacingMode, TrackMetadata, VideoStream};

/// Camera backend that serves a fixed still image as its only frame.
///
/// Used by the driver binary when no capture hardware is wired in, and by
/// tests that need a deterministic frame.
pub struct StillImageBackend {
    frame: Arc<RgbaImage>,
    label: String,
    facing: Option<FacingMode>,
    live: Arc<AtomicBool>,
}

impl StillImageBackend {
    pub fn new(frame: RgbaImage, label: &str) -> Self {
        Self {
            frame: Arc::new(frame),
            label: label.to_string(),
            facing: None,
            live: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let img = image::open(path)
            .with_context(|| format!("Failed to load image from {}", path.display()))?;
        log::info!("Still camera loaded {} ({}x{})", path.display(), img.width(), img.height());
        Ok(Self::new(img.to_rgba8(), "Still Image (environment)"))
    }

    /// Gradient test pattern used when no image is supplied.
    pub fn test_pattern(width: u32, height: u32) -> Self {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            let r = (x * 255 / width.max(1)) as u8;
            let g = (y * 255 / height.max(1)) as u8;
            let b = ((x + y) * 255 / (width + height).max(1)) as u8;
            Rgba([r, g, b, 255])
        });
        Self::new(img, "Test Pattern")
    }

    pub fn with_facing(mut self, facing: FacingMode) -> Self {
        self.facing = Some(facing);
        self
    }

    /// Whether a stream handed out by this backend is still running.
    pub fn is_streaming(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CameraBackend for StillImageBackend {
    async fn open(&self, facing: Option<FacingMode>) -> Result<Box<dyn VideoStream>, DeviceError> {
        if let (Some(wanted), Some(have)) = (facing, self.facing) {
            if wanted != have {
                return Err(DeviceError::Overconstrained);
            }
        }

        self.live.store(true, Ordering::SeqCst);
        Ok(Box::new(StillImageStream {
            frame: Arc::clone(&self.frame),
            track: TrackMetadata {
                facing_mode: self.facing,
                label: self.label.clone(),
            },
            live: Arc::clone(&self.live),
        }))
    }
}

struct StillImageStream {
    frame: Arc<RgbaImage>,
    track: TrackMetadata,
    live: Arc<AtomicBool>,
}

#[async_trait]
impl VideoStream for StillImageStream {
    fn tracks(&self) -> Vec<TrackMetadata> {
        vec![self.track.clone()]
    }

    fn live_track_count(&self) -> usize {
        usize::from(self.live.load(Ordering::SeqCst))
    }

    fn stop_all(&mut self) {
        self.live.store(false, Ordering::SeqCst);
    }

    async fn play(&mut self) -> Result<(), PlaybackError> {
        Ok(())
    }

    async fn metadata_ready(&mut self) {}

    fn frame_size(&self) -> Option<(u32, u32)> {
        Some(self.frame.dimensions())
    }

    fn grab_frame(&self) -> Result<RgbaImage, DeviceError> {
        if !self.live.load(Ordering::SeqCst) {
            return Err(DeviceError::Other("stream stopped".to_string()));
        }
        Ok(self.frame.as_ref().clone())
    }
}
