//! One-stop surface over detection and recognition.
//!
//! A [`SubFace`] instance is built in one of three modes; calling an
//! operation the mode does not support is a typed error rather than a
//! silent no-op. Galleries live in the configured directory and are
//! picked up automatically on construction.

use crate::cascade::CascadeSet;
use crate::detector::FaceDetector;
use crate::gallery::CANONICAL_FACE_SIZE;
use crate::recognizer::{Recognizer, RecognizerError, Strategy};
use crate::types::Face;
use image::imageops::{self, FilterType};
use image::GrayImage;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Which capabilities the facade carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Detection only.
    Detect,
    /// Recognition only; faces arrive pre-cropped.
    Recognize,
    /// Detection and recognition.
    Full,
}

#[derive(Error, Debug)]
pub enum FacadeError {
    #[error("{required} not available in {actual:?} mode")]
    ModeMismatch { required: &'static str, actual: Mode },
    #[error("raw buffer of {got} bytes cannot hold a {width}x{height} image")]
    InvalidBuffer { width: u32, height: u32, got: usize },
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Recognizer(#[from] RecognizerError),
}

/// Facade over the detector and a recognition engine.
pub struct SubFace {
    mode: Mode,
    config_dir: PathBuf,
    detector: Option<FaceDetector>,
    recognizer: Option<Recognizer>,
    last_path: Option<PathBuf>,
    last_image: Option<GrayImage>,
}

impl SubFace {
    /// Detection-only facade over the given cascades.
    pub fn detector(config_dir: impl Into<PathBuf>, cascades: CascadeSet) -> Self {
        Self::build(Mode::Detect, config_dir.into(), Some(cascades), None)
    }

    /// Recognition-only facade; loads an existing gallery from
    /// `config_dir` if one is present.
    pub fn recognizer(config_dir: impl Into<PathBuf>, strategy: Strategy) -> Self {
        Self::build(Mode::Recognize, config_dir.into(), None, Some(strategy))
    }

    /// Combined detection and recognition facade.
    pub fn full(
        config_dir: impl Into<PathBuf>,
        cascades: CascadeSet,
        strategy: Strategy,
    ) -> Self {
        Self::build(Mode::Full, config_dir.into(), Some(cascades), Some(strategy))
    }

    fn build(
        mode: Mode,
        config_dir: PathBuf,
        cascades: Option<CascadeSet>,
        strategy: Option<Strategy>,
    ) -> Self {
        let detector = cascades.map(FaceDetector::new);
        let recognizer = strategy.map(|strategy| {
            let mut engine = Recognizer::new(strategy);
            let file = config_dir.join(strategy.gallery_file());
            if file.exists() {
                if let Err(error) = engine.load_config(&config_dir) {
                    tracing::warn!(
                        path = %file.display(),
                        %error,
                        "could not load gallery, starting empty"
                    );
                }
            }
            engine
        });

        tracing::info!(?mode, config_dir = %config_dir.display(), "facade ready");
        Self {
            mode,
            config_dir,
            detector,
            recognizer,
            last_path: None,
            last_image: None,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    fn detector_ref(&self) -> Result<&FaceDetector, FacadeError> {
        self.detector.as_ref().ok_or(FacadeError::ModeMismatch {
            required: "detection",
            actual: self.mode,
        })
    }

    fn recognizer_ref(&self) -> Result<&Recognizer, FacadeError> {
        self.recognizer.as_ref().ok_or(FacadeError::ModeMismatch {
            required: "recognition",
            actual: self.mode,
        })
    }

    fn recognizer_mut(&mut self) -> Result<&mut Recognizer, FacadeError> {
        let mode = self.mode;
        self.recognizer.as_mut().ok_or(FacadeError::ModeMismatch {
            required: "recognition",
            actual: mode,
        })
    }

    /// Detect faces in an already-decoded grayscale image.
    pub fn detect_faces(&self, image: &GrayImage) -> Result<Vec<Face>, FacadeError> {
        Ok(self.detector_ref()?.detect_faces(image))
    }

    /// Detect faces in an image file. Consecutive calls with the same
    /// path reuse the decoded image instead of reading it again.
    pub fn detect_faces_path(&mut self, path: impl AsRef<Path>) -> Result<Vec<Face>, FacadeError> {
        let path = path.as_ref();
        self.detector_ref()?;

        let cached = self.last_path.as_deref() == Some(path) && self.last_image.is_some();
        if !cached {
            let image = image::open(path)?.into_luma8();
            self.last_path = Some(path.to_path_buf());
            self.last_image = Some(image);
        } else {
            tracing::debug!(path = %path.display(), "reusing cached image");
        }

        match self.last_image.as_ref() {
            Some(image) => Ok(self.detector_ref()?.detect_faces(image)),
            None => Ok(Vec::new()),
        }
    }

    /// Detect faces in a raw 8-bit grayscale buffer, row-major.
    pub fn detect_faces_raw(
        &self,
        data: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<Face>, FacadeError> {
        self.detector_ref()?;
        let image = GrayImage::from_raw(width, height, data.to_vec()).ok_or(
            FacadeError::InvalidBuffer {
                width,
                height,
                got: data.len(),
            },
        )?;
        self.detect_faces(&image)
    }

    /// Identify each face against the gallery, writing the resolved id
    /// into the record and returning index-aligned match distances.
    ///
    /// A face with no attached crop falls back to cropping its rectangle
    /// out of `source`; with neither, it stays unknown with distance
    /// `-1.0` so the output stays aligned with the input.
    pub fn recognise(
        &mut self,
        faces: &mut [Face],
        source: Option<&GrayImage>,
    ) -> Result<Vec<f64>, FacadeError> {
        let target = self.face_size();
        let engine = self.recognizer_ref()?;

        let mut distances = Vec::with_capacity(faces.len());
        for face in faces.iter_mut() {
            let crop = match (face.face_image(), source) {
                (Some(image), _) => Some(image.clone()),
                (None, Some(image)) => crop_rect(image, face),
                (None, None) => None,
            };
            let Some(crop) = crop else {
                tracing::warn!("face without pixels, leaving unknown");
                face.set_id(Face::UNKNOWN_ID);
                distances.push(-1.0);
                continue;
            };
            let (id, distance) = engine.classify(&resize_to(&crop, target))?;
            face.set_id(id);
            distances.push(distance);
        }
        Ok(distances)
    }

    /// Enroll faces into the gallery, resolving unknown ids in place.
    /// Crops are normalized to the gallery face size first; a face with
    /// no attached crop is cut out of `source` by its rectangle.
    pub fn update(
        &mut self,
        faces: &mut [Face],
        source: Option<&GrayImage>,
    ) -> Result<(), FacadeError> {
        // Mode check first so a mismatch leaves the face records untouched.
        self.recognizer_ref()?;
        let target = self.face_size();
        for face in faces.iter_mut() {
            if face.face_image().is_none() {
                if let Some(crop) = source.and_then(|image| crop_rect(image, face)) {
                    face.set_face_image(crop);
                }
            }
            if let Some(image) = face.face_image() {
                if image.dimensions() != target {
                    let resized = resize_to(image, target);
                    face.set_face_image(resized);
                }
            }
        }
        Ok(self.recognizer_mut()?.update(faces)?)
    }

    /// Train the recognizer from scratch on pre-cropped face images.
    /// Images are normalized to the canonical face size first.
    pub fn train(
        &mut self,
        images: &[GrayImage],
        labels: &[i32],
        num_components: usize,
    ) -> Result<(), FacadeError> {
        let normalized: Vec<GrayImage> = images
            .iter()
            .map(|i| resize_to(i, (CANONICAL_FACE_SIZE, CANONICAL_FACE_SIZE)))
            .collect();
        Ok(self
            .recognizer_mut()?
            .train(&normalized, labels, num_components)?)
    }

    pub fn count(&self) -> Result<usize, FacadeError> {
        Ok(self.recognizer_ref()?.count())
    }

    pub fn threshold(&self) -> Result<Option<f64>, FacadeError> {
        Ok(self.recognizer_ref()?.threshold())
    }

    pub fn set_threshold(&mut self, threshold: f64) -> Result<(), FacadeError> {
        self.recognizer_mut()?.set_threshold(threshold);
        Ok(())
    }

    pub fn detection_accuracy(&self) -> Result<u8, FacadeError> {
        Ok(self.detector_ref()?.accuracy())
    }

    pub fn set_detection_accuracy(&mut self, accuracy: u8) -> Result<(), FacadeError> {
        let mode = self.mode;
        let detector = self.detector.as_mut().ok_or(FacadeError::ModeMismatch {
            required: "detection",
            actual: mode,
        })?;
        detector.set_accuracy(accuracy);
        Ok(())
    }

    pub fn cascades_mut(&mut self) -> Result<&mut CascadeSet, FacadeError> {
        let mode = self.mode;
        let detector = self.detector.as_mut().ok_or(FacadeError::ModeMismatch {
            required: "detection",
            actual: mode,
        })?;
        Ok(detector.cascades_mut())
    }

    /// Write the gallery to the config directory.
    pub fn save_config(&self) -> Result<(), FacadeError> {
        Ok(self.recognizer_ref()?.save_config(&self.config_dir)?)
    }

    /// Reload the gallery from the config directory. On failure the
    /// in-memory gallery is untouched.
    pub fn load_config(&mut self) -> Result<(), FacadeError> {
        let dir = self.config_dir.clone();
        Ok(self.recognizer_mut()?.load_config(&dir)?)
    }

    pub fn config_map(&self) -> Result<BTreeMap<String, String>, FacadeError> {
        Ok(self.recognizer_ref()?.config_map())
    }

    pub fn load_config_map(
        &mut self,
        map: &BTreeMap<String, String>,
    ) -> Result<(), FacadeError> {
        Ok(self.recognizer_mut()?.load_config_map(map)?)
    }

    pub fn recommended_image_size_for_detection() -> u32 {
        FaceDetector::recommended_image_size_for_detection()
    }

    pub fn recommended_face_size_for_recognition() -> u32 {
        CANONICAL_FACE_SIZE
    }

    /// Face size the gallery expects; the canonical size until a trained
    /// or loaded gallery says otherwise.
    fn face_size(&self) -> (u32, u32) {
        match &self.recognizer {
            Some(engine) if engine.is_trained() => {
                let gallery = engine.gallery();
                (gallery.face_width, gallery.face_height)
            }
            _ => (CANONICAL_FACE_SIZE, CANONICAL_FACE_SIZE),
        }
    }
}

fn resize_to(image: &GrayImage, (width, height): (u32, u32)) -> GrayImage {
    if image.dimensions() == (width, height) {
        image.clone()
    } else {
        imageops::resize(image, width, height, FilterType::Triangle)
    }
}

/// Crop a face rectangle out of a source image, clamped to bounds.
fn crop_rect(image: &GrayImage, face: &Face) -> Option<GrayImage> {
    let (width, height) = image.dimensions();
    let x1 = face.x1().clamp(0, width as i32) as u32;
    let y1 = face.y1().clamp(0, height as i32) as u32;
    let x2 = face.x2().clamp(0, width as i32) as u32;
    let y2 = face.y2().clamp(0, height as i32) as u32;
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some(imageops::crop_imm(image, x1, y1, x2 - x1, y2 - y1).to_image())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn scratch_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("subface-facade-{tag}"))
    }

    fn cornered(corner: usize) -> GrayImage {
        let mut image = GrayImage::new(32, 32);
        let (ox, oy) = [(0, 0), (16, 0), (0, 16), (16, 16)][corner];
        for y in 0..16 {
            for x in 0..16 {
                image.put_pixel(ox + x, oy + y, Luma([240]));
            }
        }
        image
    }

    #[test]
    fn test_mode_mismatch_errors() {
        let mut detect_only = SubFace::detector(scratch_dir("detect"), CascadeSet::new());
        assert!(matches!(
            detect_only.train(&[cornered(0)], &[0], 0),
            Err(FacadeError::ModeMismatch { .. })
        ));
        assert!(matches!(
            detect_only.count(),
            Err(FacadeError::ModeMismatch { .. })
        ));

        let recognize_only = SubFace::recognizer(scratch_dir("recognize"), Strategy::Eigenface);
        assert!(matches!(
            recognize_only.detect_faces(&GrayImage::new(64, 64)),
            Err(FacadeError::ModeMismatch { .. })
        ));
    }

    #[test]
    fn test_mode_mismatched_update_leaves_faces_untouched() {
        let mut facade = SubFace::detector(scratch_dir("noupdate"), CascadeSet::new());

        let mut face = Face::new(0, 0, 32, 32);
        face.set_id(9);
        face.set_face_image(cornered(0));

        assert!(matches!(
            facade.update(std::slice::from_mut(&mut face), None),
            Err(FacadeError::ModeMismatch { .. })
        ));
        // No crop normalization or id rewrite happened on the way out.
        assert_eq!(face.id(), 9);
        assert_eq!(face.face_image().unwrap().dimensions(), (32, 32));
    }

    #[test]
    fn test_raw_buffer_validation() {
        let facade = SubFace::detector(scratch_dir("raw"), CascadeSet::new());
        assert!(matches!(
            facade.detect_faces_raw(&[0u8; 10], 64, 64),
            Err(FacadeError::InvalidBuffer { .. })
        ));
        assert!(facade.detect_faces_raw(&[0u8; 64 * 64], 64, 64).is_ok());
    }

    #[test]
    fn test_recognise_normalizes_crop_size() {
        let mut facade = SubFace::recognizer(scratch_dir("normalize"), Strategy::Eigenface);
        facade
            .train(&[cornered(0), cornered(1), cornered(2)], &[0, 1, 2], 0)
            .unwrap();

        // Crop at a different resolution than the gallery was trained at.
        let big = imageops::resize(&cornered(1), 96, 96, FilterType::Triangle);
        let mut face = Face::new(0, 0, 96, 96);
        face.set_face_image(big);

        let distances = facade
            .recognise(std::slice::from_mut(&mut face), None)
            .unwrap();
        assert_eq!(distances.len(), 1);
        assert_eq!(face.id(), 1);
    }

    #[test]
    fn test_recognise_without_pixels_stays_unknown() {
        let mut facade = SubFace::recognizer(scratch_dir("nopixels"), Strategy::Eigenface);
        facade
            .train(&[cornered(0), cornered(1)], &[0, 1], 0)
            .unwrap();

        let mut face = Face::new(0, 0, 10, 10);
        let distances = facade
            .recognise(std::slice::from_mut(&mut face), None)
            .unwrap();
        assert_eq!(face.id(), Face::UNKNOWN_ID);
        assert_eq!(distances, vec![-1.0]);
    }

    #[test]
    fn test_recognise_crops_from_source() {
        let mut facade = SubFace::recognizer(scratch_dir("fromsource"), Strategy::Eigenface);
        facade
            .train(&[cornered(0), cornered(1), cornered(2)], &[0, 1, 2], 0)
            .unwrap();

        // Paste pattern 2 into a larger scene and point a bare rectangle
        // at it.
        let mut scene = GrayImage::new(128, 128);
        imageops::replace(&mut scene, &cornered(2), 40, 60);
        let mut face = Face::new(40, 60, 72, 92);

        facade
            .recognise(std::slice::from_mut(&mut face), Some(&scene))
            .unwrap();
        assert_eq!(face.id(), 2);
    }

    #[test]
    fn test_update_enrolls_from_source_image() {
        let mut facade = SubFace::recognizer(scratch_dir("enroll"), Strategy::Eigenface);
        facade
            .train(&[cornered(0), cornered(1), cornered(2)], &[0, 1, 2], 0)
            .unwrap();

        let mut scene = GrayImage::new(128, 128);
        imageops::replace(&mut scene, &cornered(3), 80, 20);
        let mut face = Face::new(80, 20, 112, 52);

        facade
            .update(std::slice::from_mut(&mut face), Some(&scene))
            .unwrap();
        assert_eq!(face.id(), 3);
        assert_eq!(facade.count().unwrap(), 4);
    }

    #[test]
    fn test_gallery_persists_across_instances() {
        let dir = scratch_dir("persist");
        std::fs::remove_dir_all(&dir).ok();

        let mut first = SubFace::recognizer(&dir, Strategy::Eigenface);
        first
            .train(&[cornered(0), cornered(1)], &[5, 6], 0)
            .unwrap();
        first.save_config().unwrap();

        let mut second = SubFace::recognizer(&dir, Strategy::Eigenface);
        assert_eq!(second.count().unwrap(), 2);
        let mut face = Face::new(0, 0, 32, 32);
        face.set_face_image(cornered(1));
        second.recognise(std::slice::from_mut(&mut face), None).unwrap();
        assert_eq!(face.id(), 6);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_corrupt_gallery_starts_empty() {
        let dir = scratch_dir("corrupt");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(Strategy::Eigenface.gallery_file()),
            "definitely not json",
        )
        .unwrap();

        let facade = SubFace::recognizer(&dir, Strategy::Eigenface);
        assert_eq!(facade.count().unwrap(), 0);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_recommended_sizes() {
        assert_eq!(SubFace::recommended_image_size_for_detection(), 800);
        assert_eq!(SubFace::recommended_face_size_for_recognition(), 120);
    }
}
