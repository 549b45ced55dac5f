use async_trait::async_trait;
use image::RgbaImage;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::{timeout, Duration};

use crate::config::{CameraConfig, FacingPreference, MirrorMode};
use crate::error::{DeviceError, MediaError, PlaybackError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacingMode {
    User,
    Environment,
}

/// Settings a video track reports about the device behind it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrackMetadata {
    pub facing_mode: Option<FacingMode>,
    pub label: String,
}

/// Source of camera streams.
#[async_trait]
pub trait CameraBackend: Send + Sync {
    /// Opens a video stream. `None` accepts any camera.
    async fn open(&self, facing: Option<FacingMode>) -> Result<Box<dyn VideoStream>, DeviceError>;
}

/// A live camera stream attached to a display sink.
#[async_trait]
pub trait VideoStream: Send + Sync {
    fn tracks(&self) -> Vec<TrackMetadata>;

    /// Number of tracks that have not been stopped.
    fn live_track_count(&self) -> usize;

    fn stop_all(&mut self);

    async fn play(&mut self) -> Result<(), PlaybackError>;

    /// Resolves once frame dimensions are known. May never resolve.
    async fn metadata_ready(&mut self);

    fn frame_size(&self) -> Option<(u32, u32)>;

    fn grab_frame(&self) -> Result<RgbaImage, DeviceError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Inactive,
    Active,
    NeedsManualStart,
    Failed(MediaError),
}

/// Decides whether captured frames need a horizontal flip.
///
/// Facing mode wins when the track reports it. Otherwise the device label is
/// matched against common back/front camera names. Undetermined streams are
/// not mirrored.
pub fn resolve_mirror_preference(tracks: &[TrackMetadata]) -> bool {
    for track in tracks {
        match track.facing_mode {
            Some(FacingMode::User) => return true,
            Some(FacingMode::Environment) => return false,
            None => {}
        }
    }

    for track in tracks {
        let label = track.label.to_lowercase();
        if ["back", "rear", "environment"].iter().any(|k| label.contains(k)) {
            return false;
        }
        if ["front", "user", "facetime"].iter().any(|k| label.contains(k)) {
            return true;
        }
    }

    false
}

/// Owns the camera stream for the scan screen.
pub struct MediaSession {
    stream: Option<Box<dyn VideoStream>>,
    state: SessionState,
    mirrored: bool,
    frame_size: Option<(u32, u32)>,
    last_error: Option<MediaError>,
    capture_in_flight: AtomicBool,
    facing: FacingPreference,
    mirror_mode: MirrorMode,
    metadata_timeout: Duration,
}

impl MediaSession {
    pub fn new(config: &CameraConfig) -> Self {
        Self {
            stream: None,
            state: SessionState::Inactive,
            mirrored: false,
            frame_size: None,
            last_error: None,
            capture_in_flight: AtomicBool::new(false),
            facing: config.facing,
            mirror_mode: config.mirror,
            metadata_timeout: Duration::from_millis(config.metadata_timeout_ms),
        }
    }

    /// Acquires a camera and starts playback. Errors are recorded in the
    /// session state and returned; they never panic past this call.
    pub async fn start(&mut self, backend: &dyn CameraBackend) -> Result<(), MediaError> {
        if self.is_active() {
            debug!("Camera already active");
            return Ok(());
        }

        self.stop();
        self.last_error = None;

        let stream = match self.acquire(backend).await {
            Ok(stream) => stream,
            Err(err) => return Err(self.fail(err.into())),
        };

        self.mirrored = match self.mirror_mode {
            MirrorMode::Auto => resolve_mirror_preference(&stream.tracks()),
            MirrorMode::Always => true,
            MirrorMode::Never => false,
        };
        self.stream = Some(stream);
        info!("Camera stream attached (mirrored: {})", self.mirrored);

        self.begin_playback().await
    }

    /// Manual retry after autoplay was blocked.
    pub async fn resume(&mut self) -> Result<(), MediaError> {
        if self.state != SessionState::NeedsManualStart || self.stream.is_none() {
            debug!("Resume ignored in state {:?}", self.state);
            return Ok(());
        }
        self.last_error = None;
        self.begin_playback().await
    }

    /// Stops every track and detaches the stream. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop_all();
            info!("Camera stream stopped");
        }
        self.frame_size = None;
        if self.state != SessionState::Inactive && !matches!(self.state, SessionState::Failed(_)) {
            self.state = SessionState::Inactive;
        }
    }

    async fn acquire(&self, backend: &dyn CameraBackend) -> Result<Box<dyn VideoStream>, DeviceError> {
        let preferred = match self.facing {
            FacingPreference::Environment => Some(FacingMode::Environment),
            FacingPreference::User => Some(FacingMode::User),
            FacingPreference::Any => None,
        };

        match backend.open(preferred).await {
            Ok(stream) => Ok(stream),
            Err(DeviceError::NotFound) | Err(DeviceError::Overconstrained) if preferred.is_some() => {
                warn!("Preferred camera unavailable, falling back to any camera");
                backend.open(None).await
            }
            Err(err) => Err(err),
        }
    }

    async fn begin_playback(&mut self) -> Result<(), MediaError> {
        let metadata_timeout = self.metadata_timeout;
        let Some(stream) = self.stream.as_mut() else {
            return Err(self.fail(MediaError::Io("no stream attached".to_string())));
        };

        match stream.play().await {
            Ok(()) => {}
            Err(PlaybackError::AutoplayBlocked) => {
                warn!("Autoplay blocked, waiting for manual start");
                self.state = SessionState::NeedsManualStart;
                self.last_error = Some(MediaError::NeedsManualStart);
                return Err(MediaError::NeedsManualStart);
            }
            Err(PlaybackError::Aborted) => {
                // Interrupted playback is not an acquisition failure; the
                // metadata wait below decides whether frames are flowing.
                debug!("Playback start aborted");
            }
            Err(PlaybackError::Other(message)) => {
                self.stop();
                return Err(self.fail(MediaError::Io(message)));
            }
        }

        if timeout(metadata_timeout, stream.metadata_ready()).await.is_err() {
            warn!("Frame metadata did not arrive within {:?}", metadata_timeout);
        }

        match stream.frame_size() {
            Some((width, height)) if width > 0 && height > 0 => {
                self.frame_size = Some((width, height));
                self.state = SessionState::Active;
                info!("Camera active at {}x{}", width, height);
                Ok(())
            }
            _ => {
                self.stop();
                Err(self.fail(MediaError::Io("camera did not report frame dimensions".to_string())))
            }
        }
    }

    fn fail(&mut self, err: MediaError) -> MediaError {
        warn!("Camera unavailable: {}", err);
        self.state = SessionState::Failed(err.clone());
        self.last_error = Some(err.clone());
        err
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn is_mirrored(&self) -> bool {
        self.mirrored
    }

    pub fn frame_size(&self) -> Option<(u32, u32)> {
        self.frame_size
    }

    pub fn last_error(&self) -> Option<&MediaError> {
        self.last_error.as_ref()
    }

    pub fn live_track_count(&self) -> usize {
        self.stream.as_ref().map_or(0, |s| s.live_track_count())
    }

    pub fn is_capturing(&self) -> bool {
        self.capture_in_flight.load(Ordering::Acquire)
    }

    /// Marks a capture as running. Returns `None` if one already is.
    pub(crate) fn begin_capture(&self) -> Option<CaptureGuard<'_>> {
        self.capture_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CaptureGuard { flag: &self.capture_in_flight })
    }

    pub(crate) fn grab_frame(&self) -> Result<RgbaImage, DeviceError> {
        match self.stream.as_ref() {
            Some(stream) => stream.grab_frame(),
            None => Err(DeviceError::Other("no stream attached".to_string())),
        }
    }
}

impl Drop for MediaSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Clears the in-flight flag when the capture finishes, however it ends.
pub(crate) struct CaptureGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for CaptureGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct FakeStream {
        tracks: Vec<TrackMetadata>,
        live: Arc<AtomicUsize>,
        play_result: Result<(), PlaybackError>,
        size: Option<(u32, u32)>,
        hang_metadata: bool,
    }

    #[async_trait]
    impl VideoStream for FakeStream {
        fn tracks(&self) -> Vec<TrackMetadata> {
            self.tracks.clone()
        }

        fn live_track_count(&self) -> usize {
            self.live.load(Ordering::SeqCst)
        }

        fn stop_all(&mut self) {
            self.live.store(0, Ordering::SeqCst);
        }

        async fn play(&mut self) -> Result<(), PlaybackError> {
            let result = self.play_result.clone();
            self.play_result = Ok(());
            result
        }

        async fn metadata_ready(&mut self) {
            if self.hang_metadata {
                std::future::pending::<()>().await;
            }
        }

        fn frame_size(&self) -> Option<(u32, u32)> {
            self.size
        }

        fn grab_frame(&self) -> Result<RgbaImage, DeviceError> {
            let (w, h) = self.size.unwrap_or((1, 1));
            Ok(RgbaImage::new(w, h))
        }
    }

    struct FakeBackend {
        live: Arc<AtomicUsize>,
        env_error: Option<DeviceError>,
        any_error: Option<DeviceError>,
        play_result: Result<(), PlaybackError>,
        hang_metadata: bool,
        size: Option<(u32, u32)>,
        label: String,
    }

    impl FakeBackend {
        fn new() -> Self {
            Self {
                live: Arc::new(AtomicUsize::new(0)),
                env_error: None,
                any_error: None,
                play_result: Ok(()),
                hang_metadata: false,
                size: Some((640, 480)),
                label: "Back Camera".to_string(),
            }
        }
    }

    #[async_trait]
    impl CameraBackend for FakeBackend {
        async fn open(&self, facing: Option<FacingMode>) -> Result<Box<dyn VideoStream>, DeviceError> {
            let err = if facing.is_some() { &self.env_error } else { &self.any_error };
            if let Some(err) = err {
                return Err(err.clone());
            }
            self.live.store(1, Ordering::SeqCst);
            Ok(Box::new(FakeStream {
                tracks: vec![TrackMetadata { facing_mode: None, label: self.label.clone() }],
                live: Arc::clone(&self.live),
                play_result: self.play_result.clone(),
                size: self.size,
                hang_metadata: self.hang_metadata,
            }))
        }
    }

    fn session() -> MediaSession {
        MediaSession::new(&Config::default().camera)
    }

    #[test]
    fn test_mirror_preference_facing_mode_wins() {
        let tracks = [TrackMetadata {
            facing_mode: Some(FacingMode::User),
            label: "Back Camera".to_string(),
        }];
        assert!(resolve_mirror_preference(&tracks));

        let tracks = [TrackMetadata {
            facing_mode: Some(FacingMode::Environment),
            label: "FaceTime HD".to_string(),
        }];
        assert!(!resolve_mirror_preference(&tracks));
    }

    #[test]
    fn test_mirror_preference_label_fallback() {
        let rear = [TrackMetadata { facing_mode: None, label: "camera2 0, facing rear".to_string() }];
        assert!(!resolve_mirror_preference(&rear));

        let front = [TrackMetadata { facing_mode: None, label: "Front Camera".to_string() }];
        assert!(resolve_mirror_preference(&front));

        let unknown = [TrackMetadata { facing_mode: None, label: "USB Video Device".to_string() }];
        assert!(!resolve_mirror_preference(&unknown));
        assert!(!resolve_mirror_preference(&[]));
    }

    #[tokio::test]
    async fn test_start_then_stop_releases_tracks() {
        let backend = FakeBackend::new();
        let mut session = session();

        session.start(&backend).await.unwrap();
        assert!(session.is_active());
        assert_eq!(session.frame_size(), Some((640, 480)));
        assert_eq!(session.live_track_count(), 1);

        session.stop();
        assert!(!session.is_active());
        assert_eq!(backend.live.load(Ordering::SeqCst), 0);
        assert_eq!(session.live_track_count(), 0);
    }

    #[tokio::test]
    async fn test_drop_releases_tracks() {
        let backend = FakeBackend::new();
        {
            let mut session = session();
            session.start(&backend).await.unwrap();
            assert_eq!(backend.live.load(Ordering::SeqCst), 1);
        }
        assert_eq!(backend.live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_permission_denied_is_reported() {
        let mut backend = FakeBackend::new();
        backend.env_error = Some(DeviceError::PermissionDenied);
        let mut session = session();

        let err = session.start(&backend).await.unwrap_err();
        assert_eq!(err, MediaError::AccessDenied);
        assert_eq!(session.last_error(), Some(&MediaError::AccessDenied));
        assert_eq!(err.to_string(), "Camera access denied. Please allow permissions.");
    }

    #[tokio::test]
    async fn test_falls_back_to_any_camera() {
        let mut backend = FakeBackend::new();
        backend.env_error = Some(DeviceError::Overconstrained);
        let mut session = session();

        session.start(&backend).await.unwrap();
        assert!(session.is_active());
    }

    #[tokio::test]
    async fn test_no_device_found() {
        let mut backend = FakeBackend::new();
        backend.env_error = Some(DeviceError::NotFound);
        backend.any_error = Some(DeviceError::NotFound);
        let mut session = session();

        assert_eq!(session.start(&backend).await.unwrap_err(), MediaError::NoDevice);
        assert_eq!(session.state(), &SessionState::Failed(MediaError::NoDevice));
    }

    #[tokio::test]
    async fn test_autoplay_blocked_needs_manual_start() {
        let mut backend = FakeBackend::new();
        backend.play_result = Err(PlaybackError::AutoplayBlocked);
        let mut session = session();

        assert_eq!(session.start(&backend).await.unwrap_err(), MediaError::NeedsManualStart);
        assert_eq!(session.state(), &SessionState::NeedsManualStart);
        assert_eq!(session.live_track_count(), 1);

        session.resume().await.unwrap();
        assert!(session.is_active());
    }

    #[tokio::test]
    async fn test_metadata_timeout_does_not_hang() {
        let mut backend = FakeBackend::new();
        backend.hang_metadata = true;
        let mut config = Config::default().camera;
        config.metadata_timeout_ms = 20;
        let mut session = MediaSession::new(&config);

        // Dimensions are still readable after the fallback timer fires.
        session.start(&backend).await.unwrap();
        assert!(session.is_active());

        backend.size = None;
        let mut session = MediaSession::new(&config);
        assert!(matches!(session.start(&backend).await, Err(MediaError::Io(_))));
        assert_eq!(backend.live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_mirror_mode_override() {
        let backend = FakeBackend::new();
        let mut config = Config::default().camera;
        config.mirror = MirrorMode::Always;
        let mut session = MediaSession::new(&config);

        session.start(&backend).await.unwrap();
        assert!(session.is_mirrored());
    }

    #[test]
    fn test_capture_guard_is_exclusive() {
        let session = session();
        let guard = session.begin_capture();
        assert!(guard.is_some());
        assert!(session.begin_capture().is_none());
        drop(guard);
        assert!(session.begin_capture().is_some());
    }
}
