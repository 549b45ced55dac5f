//! Scan pipeline for the Growcery produce and crop tracker.
//!
//! A [`media::MediaSession`] owns the camera, [`capture::FrameEncoder`]
//! turns the live frame into a PNG still, [`classify::Classifier`] sends it
//! to the classification service, and [`review::ReviewFlow`] holds the
//! result until it is saved through a [`persistence::RecordStore`].
//! [`scan::ScanScreen`] ties them together for one user.

pub mod auth;
pub mod capture;
pub mod classify;
pub mod config;
pub mod error;
pub mod lists;
pub mod media;
pub mod models;
pub mod persistence;
pub mod review;
pub mod scan;
pub mod still_camera;

pub use config::Config;
pub use error::ScanError;
pub use models::{ClassificationResult, PersistableRecord, UserRole};
pub use scan::ScanScreen;
