use thiserror::Error;

/// Failures raised while acquiring or running the camera stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("Camera access denied. Please allow permissions.")]
    AccessDenied,

    #[error("No camera found.")]
    NoDevice,

    #[error("Playback needs a user gesture. Tap to start the camera.")]
    NeedsManualStart,

    #[error("Error: {0}")]
    Io(String),
}

/// Raw errors reported by a camera backend, before they are mapped
/// into user-facing [`MediaError`]s.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("permission denied")]
    PermissionDenied,

    #[error("requested device not found")]
    NotFound,

    #[error("constraints cannot be satisfied")]
    Overconstrained,

    #[error("{0}")]
    Other(String),
}

impl From<DeviceError> for MediaError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::PermissionDenied => MediaError::AccessDenied,
            DeviceError::NotFound => MediaError::NoDevice,
            DeviceError::Overconstrained => {
                MediaError::Io("no camera satisfies the requested constraints".to_string())
            }
            DeviceError::Other(message) => MediaError::Io(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error("autoplay blocked until user interaction")]
    AutoplayBlocked,

    #[error("playback aborted")]
    Aborted,

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera is not active")]
    NotActive,

    #[error("a capture is already in progress")]
    InFlight,

    #[error("failed to grab frame: {0}")]
    Grab(#[from] DeviceError),

    #[error("failed to encode frame: {0}")]
    Encode(#[from] image::ImageError),

    #[error("encoder task failed: {0}")]
    Worker(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifyError {
    #[error("missing required input: {0}")]
    MissingInput(&'static str),

    #[error("classification service returned {status}: {body}")]
    ExternalService { status: u16, body: String },

    #[error("could not reach classification service: {0}")]
    Transport(String),

    #[error("could not decode classification response: {0}")]
    Decode(String),

    #[error("invalid classifier configuration: {0}")]
    Config(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("user is not authenticated")]
    Unauthenticated,

    #[error("backend returned {status}: {body}")]
    Backend { status: u16, body: String },

    #[error("backend request failed: {0}")]
    Transport(String),

    #[error("could not decode backend response: {0}")]
    Decode(String),

    #[error("record not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("auth service returned {status}: {body}")]
    Service { status: u16, body: String },

    #[error("auth request failed: {0}")]
    Transport(String),

    #[error("could not decode auth response: {0}")]
    Decode(String),

    #[error("could not create profile: {0}")]
    Profile(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReviewError {
    #[error("display name cannot be empty")]
    EmptyName,

    #[error("failed to save record: {0}")]
    Store(#[from] StoreError),
}

/// Anything that can go wrong on the scan screen. None of it is fatal.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Classify(#[from] ClassifyError),

    #[error(transparent)]
    Review(#[from] ReviewError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
