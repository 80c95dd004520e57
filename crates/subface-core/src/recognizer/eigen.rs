//! Eigenface recognition: PCA projection with nearest-neighbor matching
//! and a distance threshold for rejecting unfamiliar faces.

use super::{flatten_image, RecognizerError};
use crate::gallery::{GalleryState, EIGEN_GALLERY_FILE};
use crate::recognizer::subspace::{self, to_row_matrix};
use crate::types::Face;
use image::{GrayImage, Luma};
use nalgebra::DVector;
use std::collections::BTreeMap;
use std::path::Path;

/// Edge length of the diagonal streak painted into the synthetic
/// counterweight image used for single-face training.
const JUNK_STREAK: u32 = 15;

/// Eigenface engine. All state lives in the gallery, so a persisted
/// gallery restores the engine exactly.
#[derive(Default)]
pub struct Eigenfaces {
    gallery: GalleryState,
}

impl Eigenfaces {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_gallery(gallery: GalleryState) -> Self {
        Self { gallery }
    }

    pub fn gallery(&self) -> &GalleryState {
        &self.gallery
    }

    pub fn is_trained(&self) -> bool {
        self.gallery.is_trained()
    }

    /// Number of enrolled observations, synthetic counterweight included.
    pub fn count(&self) -> usize {
        self.gallery.count()
    }

    pub fn threshold(&self) -> f64 {
        self.gallery.threshold
    }

    pub fn set_threshold(&mut self, threshold: f64) {
        self.gallery.threshold = threshold;
    }

    /// Build the projection basis from scratch. Replaces any previous
    /// gallery contents.
    ///
    /// `num_components == 0` selects the default of N - 1 retained
    /// components. A training set with a single image gets a synthetic
    /// counterweight injected so PCA has a direction to work with; the
    /// counterweight carries the unknown label and never wins a match
    /// that the caller would act on.
    pub fn train(
        &mut self,
        images: &[GrayImage],
        labels: &[i32],
        num_components: usize,
    ) -> Result<(), RecognizerError> {
        if images.is_empty() {
            return Err(RecognizerError::EmptyTrainingSet);
        }
        if images.len() != labels.len() {
            return Err(RecognizerError::LabelCountMismatch {
                observations: images.len(),
                labels: labels.len(),
            });
        }

        let width = images[0].width();
        let height = images[0].height();
        for image in images.iter().skip(1) {
            if image.width() != width || image.height() != height {
                return Err(RecognizerError::SizeMismatch {
                    expected: (width, height),
                    got: (image.width(), image.height()),
                });
            }
        }

        let mut samples: Vec<DVector<f64>> = Vec::with_capacity(images.len() + 1);
        let mut sample_labels: Vec<i32> = Vec::with_capacity(labels.len() + 1);
        if images.len() == 1 {
            tracing::debug!("single training image, injecting counterweight");
            samples.push(flatten_image(&junk_image(width, height)));
            sample_labels.push(Face::UNKNOWN_ID);
        }
        for (image, &label) in images.iter().zip(labels) {
            samples.push(flatten_image(image));
            sample_labels.push(label);
        }

        let n = samples.len();
        let k = if num_components == 0 {
            n.saturating_sub(1).max(1)
        } else {
            num_components.min(n)
        };

        let pca = subspace::pca(&to_row_matrix(&samples), k);
        if pca.basis.ncols() == 0 {
            return Err(RecognizerError::DecompositionFailed(
                "no usable principal components".into(),
            ));
        }

        let projections = samples
            .iter()
            .map(|s| subspace::project(&pca.basis, &pca.mean, s))
            .collect();

        self.gallery.face_width = width;
        self.gallery.face_height = height;
        self.gallery.basis = pca.basis;
        self.gallery.mean = pca.mean;
        self.gallery.projections = projections;
        self.gallery.labels = sample_labels;

        tracing::info!(
            observations = self.gallery.count(),
            components = self.gallery.basis.ncols(),
            "eigenface training complete"
        );
        Ok(())
    }

    /// Identify a face crop against the gallery.
    ///
    /// Returns the winning label and its subspace distance, or
    /// `(-1, -1.0)` when the engine is untrained or the closest match is
    /// farther than the threshold.
    pub fn classify(&self, image: &GrayImage) -> Result<(i32, f64), RecognizerError> {
        if !self.gallery.is_trained() {
            tracing::warn!("classify called before training");
            return Ok((Face::UNKNOWN_ID, -1.0));
        }
        let sample = self.checked_flatten(image)?;
        let projection = subspace::project(&self.gallery.basis, &self.gallery.mean, &sample);

        let (index, distance) = nearest(&self.gallery.projections, &projection);
        if distance > self.gallery.threshold {
            tracing::debug!(distance, threshold = self.gallery.threshold, "match rejected");
            return Ok((Face::UNKNOWN_ID, -1.0));
        }
        Ok((self.gallery.labels[index], distance))
    }

    /// Enroll faces into the gallery, resolving identities in place.
    ///
    /// A face with the unknown id gets the next unused id and has it
    /// written back. A face with an id already in the gallery is blended
    /// into that identity's stored observation. A face with a fresh
    /// explicit id is appended as a new identity.
    pub fn update(&mut self, faces: &mut [Face]) -> Result<(), RecognizerError> {
        for (i, face) in faces.iter_mut().enumerate() {
            let image = face
                .face_image()
                .ok_or(RecognizerError::MissingFaceImage { index: i })?
                .clone();

            if !self.gallery.is_trained() {
                let id = if face.id() == Face::UNKNOWN_ID { 0 } else { face.id() };
                self.train(&[image], &[id], 0)?;
                face.set_id(id);
                continue;
            }

            let sample = self.checked_flatten(&image)?;
            let projection = subspace::project(&self.gallery.basis, &self.gallery.mean, &sample);

            if face.id() == Face::UNKNOWN_ID {
                let id = self.next_unused_id();
                self.gallery.projections.push(projection);
                self.gallery.labels.push(id);
                face.set_id(id);
                self.evict_counterweight();
                tracing::debug!(id, "enrolled new identity");
            } else if let Some(pos) = self
                .gallery
                .labels
                .iter()
                .position(|&l| l == face.id())
            {
                let blended = pairwise_blend(&self.gallery.projections[pos], &projection);
                self.gallery.projections[pos] = blended;
                tracing::debug!(id = face.id(), "blended into existing identity");
            } else {
                self.gallery.projections.push(projection);
                self.gallery.labels.push(face.id());
                self.evict_counterweight();
                tracing::debug!(id = face.id(), "enrolled explicit identity");
            }
        }
        Ok(())
    }

    pub fn save_config(&self, dir: &Path) -> Result<(), RecognizerError> {
        Ok(self.gallery.save(dir, EIGEN_GALLERY_FILE)?)
    }

    /// Load the persisted gallery from `dir`. On failure the current
    /// gallery is left untouched.
    pub fn load_config(&mut self, dir: &Path) -> Result<(), RecognizerError> {
        self.gallery = GalleryState::load(dir, EIGEN_GALLERY_FILE)?;
        Ok(())
    }

    pub fn config_map(&self) -> BTreeMap<String, String> {
        self.gallery.to_map()
    }

    pub fn load_config_map(
        &mut self,
        map: &BTreeMap<String, String>,
    ) -> Result<(), RecognizerError> {
        self.gallery = GalleryState::from_map(map)?;
        Ok(())
    }

    fn checked_flatten(&self, image: &GrayImage) -> Result<DVector<f64>, RecognizerError> {
        if image.width() != self.gallery.face_width || image.height() != self.gallery.face_height {
            return Err(RecognizerError::SizeMismatch {
                expected: (self.gallery.face_width, self.gallery.face_height),
                got: (image.width(), image.height()),
            });
        }
        Ok(flatten_image(image))
    }

    /// Drop the synthetic counterweight once a second real face exists;
    /// it is only needed while the gallery holds a single observation.
    fn evict_counterweight(&mut self) {
        if let Some(pos) = self
            .gallery
            .labels
            .iter()
            .position(|&l| l == Face::UNKNOWN_ID)
        {
            self.gallery.projections.remove(pos);
            self.gallery.labels.remove(pos);
            tracing::debug!("removed synthetic counterweight");
        }
    }

    /// Smallest non-negative id not yet present in the gallery, starting
    /// from the count of real (non-sentinel) observations.
    fn next_unused_id(&self) -> i32 {
        let known = self
            .gallery
            .labels
            .iter()
            .filter(|&&l| l != Face::UNKNOWN_ID)
            .count();
        let mut candidate = known as i32;
        while self.gallery.labels.contains(&candidate) {
            candidate += 1;
        }
        candidate
    }
}

/// Index and L2 distance of the stored projection closest to `probe`.
/// Ties keep the earlier entry (strict improvement only).
fn nearest(projections: &[DVector<f64>], probe: &DVector<f64>) -> (usize, f64) {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (i, stored) in projections.iter().enumerate() {
        let distance = (stored - probe).norm();
        if distance < best_distance {
            best = i;
            best_distance = distance;
        }
    }
    (best, best_distance)
}

/// Merge a stored observation with a new one for the same identity:
/// a two-sample, single-component PCA of the pair, with the new
/// observation re-projected onto that component.
fn pairwise_blend(existing: &DVector<f64>, incoming: &DVector<f64>) -> DVector<f64> {
    let mean = (existing + incoming) * 0.5;
    let mut direction = incoming - existing;
    let norm = direction.norm();
    if norm <= f64::EPSILON {
        return existing.clone();
    }
    direction /= norm;
    let coordinate = direction.dot(&(incoming - &mean));
    mean + direction * coordinate
}

/// Synthetic image paired with a lone training face: black with a short
/// white diagonal streak, far from any real face in pixel space.
fn junk_image(width: u32, height: u32) -> GrayImage {
    let mut image = GrayImage::new(width, height);
    let limit = JUNK_STREAK.min(width.saturating_sub(1)).min(height.saturating_sub(1));
    for i in 1..=limit {
        image.put_pixel(i, i, Luma([255]));
    }
    image
}
