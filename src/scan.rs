use log::{error, info, warn};
use std::future::Future;
use std::sync::Arc;

use crate::capture::{CapturedFrame, FrameEncoder};
use crate::classify::Classifier;
use crate::config::CameraConfig;
use crate::error::{CaptureError, ClassifyError, ScanError, StoreError};
use crate::media::{CameraBackend, MediaSession, SessionState};
use crate::models::{ClassificationResult, Profile, UserRole};
use crate::persistence::{RecordStore, SavedRecord};
use crate::review::{CaptureTicket, PendingReview, ReviewFlow};

/// A finished classification on its way back to the screen.
#[derive(Debug)]
pub struct ClassifyOutcome {
    pub ticket: CaptureTicket,
    pub frame: CapturedFrame,
    pub result: Result<ClassificationResult, ClassifyError>,
}

/// Controller behind the scan screen: camera, capture, classification and
/// the review sheet, for one signed-in user.
pub struct ScanScreen {
    session: MediaSession,
    backend: Arc<dyn CameraBackend>,
    encoder: FrameEncoder,
    classifier: Arc<Classifier>,
    review: ReviewFlow,
    store: Arc<dyn RecordStore>,
    profile: Profile,
    pub status_message: String,
}

impl ScanScreen {
    pub fn new(
        camera: &CameraConfig,
        backend: Arc<dyn CameraBackend>,
        mut classifier: Classifier,
        store: Arc<dyn RecordStore>,
        profile: Profile,
    ) -> Self {
        classifier.set_location(profile.location.clone());

        Self {
            session: MediaSession::new(camera),
            backend,
            encoder: FrameEncoder::new(),
            classifier: Arc::new(classifier),
            review: ReviewFlow::new(),
            store,
            profile,
            status_message: "Waiting for stream...".to_string(),
        }
    }

    /// Mounts the screen and starts the camera.
    pub async fn mount(
        camera: &CameraConfig,
        backend: Arc<dyn CameraBackend>,
        classifier: Classifier,
        store: Arc<dyn RecordStore>,
        profile: Profile,
    ) -> Self {
        let mut screen = Self::new(camera, backend, classifier, store, profile);
        let _ = screen.open_camera().await;
        screen
    }

    pub async fn open_camera(&mut self) -> Result<(), ScanError> {
        let backend = Arc::clone(&self.backend);
        let result = self.session.start(backend.as_ref()).await;
        self.report_camera(result)
    }

    /// Manual start after the platform blocked autoplay.
    pub async fn resume_camera(&mut self) -> Result<(), ScanError> {
        let result = self.session.resume().await;
        self.report_camera(result)
    }

    fn report_camera(&mut self, result: Result<(), crate::error::MediaError>) -> Result<(), ScanError> {
        match result {
            Ok(()) => {
                self.status_message = "Ready to scan".to_string();
                Ok(())
            }
            Err(e) => {
                self.status_message = e.to_string();
                Err(e.into())
            }
        }
    }

    /// Takes a still and opens a new capture cycle.
    pub async fn capture(&mut self) -> Result<(CaptureTicket, CapturedFrame), ScanError> {
        if !self.session.is_active() {
            self.status_message = "No camera available".to_string();
            return Err(CaptureError::NotActive.into());
        }
        if self.session.is_capturing() {
            self.status_message = "Camera busy".to_string();
            return Err(CaptureError::InFlight.into());
        }

        match self.encoder.capture(&self.session).await {
            Ok(frame) => {
                let ticket = self.review.begin_capture();
                self.status_message = "Captured frame - classifying...".to_string();
                Ok((ticket, frame))
            }
            Err(e) => {
                self.status_message = format!("Capture failed: {}", e);
                Err(e.into())
            }
        }
    }

    /// Classification for a capture, detached from the screen so it can
    /// outlive an unmount.
    pub fn classify_job(
        &self,
        ticket: CaptureTicket,
        frame: CapturedFrame,
    ) -> impl Future<Output = ClassifyOutcome> + Send + 'static {
        let classifier = Arc::clone(&self.classifier);
        let role = self.profile.user_type;
        async move {
            let result = classifier.classify(Some(&frame), Some(role)).await;
            ClassifyOutcome { ticket, frame, result }
        }
    }

    /// Applies a finished classification. Returns whether a review opened.
    pub fn deliver(&mut self, outcome: ClassifyOutcome) -> Result<bool, ScanError> {
        match outcome.result {
            Ok(result) => {
                let name = result.name.clone();
                if self.review.present(outcome.ticket, outcome.frame, result) {
                    self.status_message = format!("Found {}", name);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Err(e) => {
                error!("Classification failed: {}", e);
                if self.review.is_mounted() {
                    self.status_message = "Something went wrong! Try another scan.".to_string();
                }
                Err(e.into())
            }
        }
    }

    /// Capture, classify and open the review in one step.
    pub async fn scan(&mut self) -> Result<bool, ScanError> {
        let (ticket, frame) = self.capture().await?;
        let outcome = self.classify_job(ticket, frame).await;
        self.deliver(outcome)
    }

    pub fn rename(&mut self, name: &str) {
        self.review.rename(name);
    }

    /// Commits the pending review for the current role.
    pub async fn save(&mut self) -> Result<Option<SavedRecord>, ScanError> {
        let role = self.profile.user_type;
        match self.review.save(role, self.store.as_ref(), &self.profile.user_id).await {
            Ok(Some(saved)) => {
                self.status_message = "Item saved".to_string();
                Ok(Some(saved))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!("Save failed: {}", e);
                self.status_message = format!("Save failed: {}", e);
                Err(e.into())
            }
        }
    }

    pub fn discard(&mut self) {
        if self.review.is_pending() {
            self.status_message = "Item discarded".to_string();
        }
        self.review.discard();
    }

    /// Switches between consumer and farmer once the backend accepts it.
    pub async fn switch_role(&mut self, role: UserRole) -> Result<(), StoreError> {
        if self.profile.user_type == role {
            return Ok(());
        }
        self.store.update_role(&self.profile.user_id, role).await?;
        self.profile.user_type = role;
        info!("Role switched to {}", role);
        Ok(())
    }

    /// Leaves the screen: the camera is released immediately and any
    /// classification still running is ignored when it lands.
    pub fn unmount(&mut self) {
        self.session.stop();
        self.review.unmount();
        info!("Scan screen unmounted");
    }

    pub fn camera_state(&self) -> &SessionState {
        self.session.state()
    }

    pub fn session(&self) -> &MediaSession {
        &self.session
    }

    pub fn pending(&self) -> Option<&PendingReview> {
        self.review.pending()
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }
}

impl Drop for ScanScreen {
    fn drop(&mut self) {
        self.session.stop();
    }
}
