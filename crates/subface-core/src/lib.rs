//! subface-core — Face detection and recognition engine.
//!
//! Drives pluggable rectangle classifiers for detection and identifies
//! faces through subspace projection (Eigenface or Fisherface), with the
//! gallery persisted as JSON in a config directory.

pub mod cascade;
pub mod detector;
pub mod facade;
pub mod gallery;
pub mod recognizer;
pub mod types;

pub use cascade::{Cascade, CascadeSet, RectangleClassifier, ScanParams};
pub use detector::FaceDetector;
pub use facade::{FacadeError, Mode, SubFace};
pub use gallery::{GalleryError, GalleryState};
pub use recognizer::{Recognizer, RecognizerError, Strategy};
pub use types::{Face, Rect};
