//! Fisherface recognition: PCA to drop degenerate directions, then LDA
//! for class separation, with nearest-neighbor matching. Unlike the
//! Eigenface strategy there is no distance threshold; the closest
//! enrolled identity always wins.

use super::{flatten_image, RecognizerError};
use crate::gallery::{GalleryState, FISHER_GALLERY_FILE};
use crate::recognizer::subspace::{self, class_count, to_row_matrix};
use crate::types::Face;
use image::GrayImage;
use nalgebra::DVector;
use std::collections::BTreeMap;
use std::path::Path;

/// Fisherface engine. State is held entirely in the gallery.
#[derive(Default)]
pub struct Fisherfaces {
    gallery: GalleryState,
}

impl Fisherfaces {
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

    pub fn count(&self) -> usize {
        self.gallery.count()
    }

    /// Build the discriminant basis from scratch. Replaces any previous
    /// gallery contents.
    ///
    /// Requires at least two distinct labels and more observations than
    /// classes, otherwise the scatter matrices are degenerate. The PCA
    /// stage retains N - C components, the LDA stage C - 1;
    /// `num_components` caps the final count when non-zero.
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

        let n = images.len();
        let c = class_count(labels);
        if c < 2 {
            return Err(RecognizerError::TooFewClasses { classes: c });
        }
        if n <= c {
            return Err(RecognizerError::TooFewObservations {
                observations: n,
                classes: c,
            });
        }

        let samples: Vec<DVector<f64>> = images.iter().map(flatten_image).collect();

        // PCA to N - C keeps the within-class scatter invertible in the
        // reduced space.
        let pca = subspace::pca(&to_row_matrix(&samples), n - c);
        if pca.basis.ncols() == 0 {
            return Err(RecognizerError::DecompositionFailed(
                "no usable principal components".into(),
            ));
        }

        let reduced: Vec<DVector<f64>> = samples
            .iter()
            .map(|s| subspace::project(&pca.basis, &pca.mean, s))
            .collect();

        let lda_components = if num_components == 0 {
            c - 1
        } else {
            num_components.min(c - 1)
        };
        let lda = subspace::lda(&to_row_matrix(&reduced), labels, lda_components).ok_or_else(
            || RecognizerError::DecompositionFailed("within-class scatter is singular".into()),
        )?;

        let basis = &pca.basis * &lda.basis;
        let projections = samples
            .iter()
            .map(|s| subspace::project(&basis, &pca.mean, s))
            .collect();

        self.gallery.face_width = width;
        self.gallery.face_height = height;
        self.gallery.mean = pca.mean;
        self.gallery.basis = basis;
        self.gallery.projections = projections;
        self.gallery.labels = labels.to_vec();

        tracing::info!(
            observations = n,
            classes = c,
            components = self.gallery.basis.ncols(),
            "fisherface training complete"
        );
        Ok(())
    }

    /// Identify a face crop against the gallery. Returns the closest
    /// enrolled label and its subspace distance, or `(-1, -1.0)` when
    /// untrained. There is no rejection threshold.
    pub fn classify(&self, image: &GrayImage) -> Result<(i32, f64), RecognizerError> {
        if !self.gallery.is_trained() {
            tracing::warn!("classify called before training");
            return Ok((Face::UNKNOWN_ID, -1.0));
        }
        let sample = self.checked_flatten(image)?;
        let projection = subspace::project(&self.gallery.basis, &self.gallery.mean, &sample);

        let mut best = 0;
        let mut best_distance = f64::INFINITY;
        for (i, stored) in self.gallery.projections.iter().enumerate() {
            let distance = (stored - &projection).norm();
            if distance < best_distance {
                best = i;
                best_distance = distance;
            }
        }
        Ok((self.gallery.labels[best], best_distance))
    }

    /// Enroll faces, resolving unknown ids in place. A face whose id is
    /// already enrolled is left alone; folding repeat observations into
    /// a discriminant basis requires retraining, not blending.
    pub fn update(&mut self, faces: &mut [Face]) -> Result<(), RecognizerError> {
        for (i, face) in faces.iter_mut().enumerate() {
            let image = face
                .face_image()
                .ok_or(RecognizerError::MissingFaceImage { index: i })?
                .clone();

            if !self.gallery.is_trained() {
                tracing::warn!("update before training, discriminant basis needs two classes");
                return Err(RecognizerError::TooFewClasses { classes: 1 });
            }

            let sample = self.checked_flatten(&image)?;
            let projection = subspace::project(&self.gallery.basis, &self.gallery.mean, &sample);

            if face.id() == Face::UNKNOWN_ID {
                let id = self.next_unused_id();
                self.gallery.projections.push(projection);
                self.gallery.labels.push(id);
                face.set_id(id);
                tracing::debug!(id, "enrolled new identity");
            } else if self.gallery.labels.contains(&face.id()) {
                tracing::debug!(id = face.id(), "identity already enrolled, skipping");
            } else {
                self.gallery.projections.push(projection);
                self.gallery.labels.push(face.id());
                tracing::debug!(id = face.id(), "enrolled explicit identity");
            }
        }
        Ok(())
    }

    pub fn save_config(&self, dir: &Path) -> Result<(), RecognizerError> {
        Ok(self.gallery.save(dir, FISHER_GALLERY_FILE)?)
    }

    pub fn load_config(&mut self, dir: &Path) -> Result<(), RecognizerError> {
        self.gallery = GalleryState::load(dir, FISHER_GALLERY_FILE)?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// Image with a bright block in a corner, plus a per-sample wrinkle
    /// so classes have in-class variation.
    fn sample(corner: usize, wrinkle: u8) -> GrayImage {
        let mut image = GrayImage::new(16, 16);
        let (ox, oy) = [(0, 0), (8, 0), (0, 8), (8, 8)][corner];
        for y in 0..8 {
            for x in 0..8 {
                image.put_pixel(ox + x, oy + y, Luma([230]));
            }
        }
        image.put_pixel(4, 12, Luma([wrinkle]));
        image
    }

    fn trained_engine() -> Fisherfaces {
        let mut engine = Fisherfaces::new();
        let images = [
            sample(0, 10),
            sample(0, 60),
            sample(1, 20),
            sample(1, 70),
            sample(2, 30),
            sample(2, 80),
        ];
        engine.train(&images, &[0, 0, 1, 1, 2, 2], 0).unwrap();
        engine
    }

    #[test]
    fn test_train_requires_two_classes() {
        let mut engine = Fisherfaces::new();
        assert!(matches!(
            engine.train(&[sample(0, 1), sample(0, 2)], &[5, 5], 0),
            Err(RecognizerError::TooFewClasses { classes: 1 })
        ));
    }

    #[test]
    fn test_train_requires_more_observations_than_classes() {
        let mut engine = Fisherfaces::new();
        assert!(matches!(
            engine.train(&[sample(0, 1), sample(1, 2)], &[0, 1], 0),
            Err(RecognizerError::TooFewObservations {
                observations: 2,
                classes: 2,
            })
        ));
    }

    #[test]
    fn test_classify_recovers_classes() {
        let engine = trained_engine();
        for (corner, expected) in [(0usize, 0), (1, 1), (2, 2)] {
            let (id, _) = engine.classify(&sample(corner, 45)).unwrap();
            assert_eq!(id, expected, "corner {corner} misclassified");
        }
    }

    #[test]
    fn test_classify_untrained_is_unknown() {
        let engine = Fisherfaces::new();
        let (id, distance) = engine.classify(&sample(0, 0)).unwrap();
        assert_eq!(id, Face::UNKNOWN_ID);
        assert_eq!(distance, -1.0);
    }

    #[test]
    fn test_no_rejection_threshold() {
        let engine = trained_engine();
        // A probe unlike any class still resolves to some enrolled label.
        let (id, distance) = engine.classify(&sample(3, 128)).unwrap();
        assert!(id >= 0);
        assert!(distance >= 0.0);
    }

    #[test]
    fn test_update_enrolls_unknown_identity() {
        let mut engine = trained_engine();
        let before = engine.count();

        let mut face = Face::new(0, 0, 16, 16);
        face.set_face_image(sample(3, 40));
        engine.update(std::slice::from_mut(&mut face)).unwrap();

        assert_eq!(engine.count(), before + 1);
        assert_eq!(face.id(), before as i32);
    }

    #[test]
    fn test_update_existing_id_is_noop() {
        let mut engine = trained_engine();
        let before = engine.count();

        let mut face = Face::new(0, 0, 16, 16);
        face.set_id(1);
        face.set_face_image(sample(1, 90));
        engine.update(std::slice::from_mut(&mut face)).unwrap();

        assert_eq!(engine.count(), before);
        assert_eq!(face.id(), 1);
    }

    #[test]
    fn test_update_untrained_is_error() {
        let mut engine = Fisherfaces::new();
        let mut face = Face::new(0, 0, 16, 16);
        face.set_face_image(sample(0, 0));
        assert!(engine.update(std::slice::from_mut(&mut face)).is_err());
    }
}
