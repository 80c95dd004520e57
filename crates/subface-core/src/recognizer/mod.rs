//! Face recognition strategies over a persisted gallery.
//!
//! Both strategies share the contract: faces are identified by `i32`
//! labels, classification returns `(label, distance)` with
//! `(-1, -1.0)` meaning no acceptable match, and the whole engine state
//! round-trips through the gallery file or string map.

pub mod eigen;
pub mod fisher;
pub mod subspace;

pub use eigen::Eigenfaces;
pub use fisher::Fisherfaces;

use crate::gallery::{GalleryError, EIGEN_GALLERY_FILE, FISHER_GALLERY_FILE};
use crate::types::Face;
use image::GrayImage;
use nalgebra::DVector;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("training set is empty")]
    EmptyTrainingSet,
    #[error("{observations} observations but {labels} labels")]
    LabelCountMismatch { observations: usize, labels: usize },
    #[error("expected a {}x{} image, got {}x{}", expected.0, expected.1, got.0, got.1)]
    SizeMismatch { expected: (u32, u32), got: (u32, u32) },
    #[error("face at index {index} carries no image")]
    MissingFaceImage { index: usize },
    #[error("need at least two classes, got {classes}")]
    TooFewClasses { classes: usize },
    #[error("{observations} observations cannot cover {classes} classes")]
    TooFewObservations { observations: usize, classes: usize },
    #[error("decomposition failed: {0}")]
    DecompositionFailed(String),
    #[error(transparent)]
    Gallery(#[from] GalleryError),
}

/// Which subspace method backs the recognizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Eigenface,
    Fisherface,
}

impl Strategy {
    /// File name of this strategy's gallery inside the config directory.
    pub fn gallery_file(self) -> &'static str {
        match self {
            Strategy::Eigenface => EIGEN_GALLERY_FILE,
            Strategy::Fisherface => FISHER_GALLERY_FILE,
        }
    }
}

/// A recognition engine of either strategy behind one surface.
pub enum Recognizer {
    Eigenface(Eigenfaces),
    Fisherface(Fisherfaces),
}

impl Recognizer {
    pub fn new(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Eigenface => Recognizer::Eigenface(Eigenfaces::new()),
            Strategy::Fisherface => Recognizer::Fisherface(Fisherfaces::new()),
        }
    }

    pub fn strategy(&self) -> Strategy {
        match self {
            Recognizer::Eigenface(_) => Strategy::Eigenface,
            Recognizer::Fisherface(_) => Strategy::Fisherface,
        }
    }

    pub fn is_trained(&self) -> bool {
        match self {
            Recognizer::Eigenface(e) => e.is_trained(),
            Recognizer::Fisherface(f) => f.is_trained(),
        }
    }

    pub fn count(&self) -> usize {
        match self {
            Recognizer::Eigenface(e) => e.count(),
            Recognizer::Fisherface(f) => f.count(),
        }
    }

    pub fn gallery(&self) -> &crate::gallery::GalleryState {
        match self {
            Recognizer::Eigenface(e) => e.gallery(),
            Recognizer::Fisherface(f) => f.gallery(),
        }
    }

    pub fn train(
        &mut self,
        images: &[GrayImage],
        labels: &[i32],
        num_components: usize,
    ) -> Result<(), RecognizerError> {
        match self {
            Recognizer::Eigenface(e) => e.train(images, labels, num_components),
            Recognizer::Fisherface(f) => f.train(images, labels, num_components),
        }
    }

    pub fn classify(&self, image: &GrayImage) -> Result<(i32, f64), RecognizerError> {
        match self {
            Recognizer::Eigenface(e) => e.classify(image),
            Recognizer::Fisherface(f) => f.classify(image),
        }
    }

    pub fn update(&mut self, faces: &mut [Face]) -> Result<(), RecognizerError> {
        match self {
            Recognizer::Eigenface(e) => e.update(faces),
            Recognizer::Fisherface(f) => f.update(faces),
        }
    }

    /// Rejection threshold; only the Eigenface strategy carries one.
    pub fn threshold(&self) -> Option<f64> {
        match self {
            Recognizer::Eigenface(e) => Some(e.threshold()),
            Recognizer::Fisherface(_) => None,
        }
    }

    pub fn set_threshold(&mut self, threshold: f64) {
        match self {
            Recognizer::Eigenface(e) => e.set_threshold(threshold),
            Recognizer::Fisherface(_) => {
                tracing::warn!("fisherface strategy has no rejection threshold");
            }
        }
    }

    pub fn save_config(&self, dir: &Path) -> Result<(), RecognizerError> {
        match self {
            Recognizer::Eigenface(e) => e.save_config(dir),
            Recognizer::Fisherface(f) => f.save_config(dir),
        }
    }

    pub fn load_config(&mut self, dir: &Path) -> Result<(), RecognizerError> {
        match self {
            Recognizer::Eigenface(e) => e.load_config(dir),
            Recognizer::Fisherface(f) => f.load_config(dir),
        }
    }

    pub fn config_map(&self) -> BTreeMap<String, String> {
        match self {
            Recognizer::Eigenface(e) => e.config_map(),
            Recognizer::Fisherface(f) => f.config_map(),
        }
    }

    pub fn load_config_map(
        &mut self,
        map: &BTreeMap<String, String>,
    ) -> Result<(), RecognizerError> {
        match self {
            Recognizer::Eigenface(e) => e.load_config_map(map),
            Recognizer::Fisherface(f) => f.load_config_map(map),
        }
    }
}

/// Flatten a grayscale image row-major into an f64 vector.
pub(crate) fn flatten_image(image: &GrayImage) -> DVector<f64> {
    DVector::from_iterator(
        (image.width() * image.height()) as usize,
        image.pixels().map(|p| f64::from(p.0[0])),
    )
}
