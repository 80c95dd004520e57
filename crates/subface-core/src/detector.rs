//! Multi-scale face detection driver.
//!
//! Drives the configured [`CascadeSet`] over an (optionally downsampled)
//! image, merges overlapping candidates from all cascades, tightens the
//! resulting boxes and crops the faces from the original-resolution image.

use crate::cascade::{CascadeSet, ScanParams};
use crate::types::{Face, Rect};
use image::imageops::{self, FilterType};
use image::GrayImage;

/// Images below this edge length are rejected outright.
const MIN_IMAGE_EDGE: u32 = 50;

/// Working pixel area large inputs are downsampled to before scanning.
const WORKING_AREA: u32 = 786_432;

/// Fraction shaved off each side of a detected box to cut background.
const BOX_SHRINK: f64 = 0.1;

/// Default center-distance under which two candidates count as duplicates,
/// in original-image pixels.
const DEFAULT_MAX_DISTANCE: i32 = 20;

/// Per-level search tuning: one entry per accuracy level 1..=4.
#[derive(Debug, Clone, Copy)]
struct AccuracyProfile {
    search_increment: f64,
    min_sizes: [u32; 4],
    grouping: u32,
}

const PROFILES: [AccuracyProfile; 4] = [
    AccuracyProfile {
        search_increment: 1.269,
        min_sizes: [1, 20, 26, 35],
        grouping: 1,
    },
    AccuracyProfile {
        search_increment: 1.2,
        min_sizes: [1, 20, 30, 40],
        grouping: 3,
    },
    AccuracyProfile {
        search_increment: 1.21,
        min_sizes: [1, 20, 26, 35],
        grouping: 3,
    },
    AccuracyProfile {
        search_increment: 1.268,
        min_sizes: [1, 30, 40, 50],
        grouping: 2,
    },
];

fn profile_for(accuracy: u8) -> AccuracyProfile {
    // Levels above 4 reuse the coarsest profile.
    let idx = (accuracy.clamp(1, 4) - 1) as usize;
    PROFILES[idx]
}

/// Face detector over a set of rectangle classifiers.
///
/// Each [`detect_faces`](FaceDetector::detect_faces) call is independent;
/// the detector holds only configuration, no per-image state.
pub struct FaceDetector {
    cascades: CascadeSet,
    accuracy: u8,
    max_distance: i32,
}

impl FaceDetector {
    pub fn new(cascades: CascadeSet) -> Self {
        if cascades.is_empty() {
            tracing::warn!("no cascades configured, detection will find nothing");
        }
        Self {
            cascades,
            accuracy: 1,
            max_distance: DEFAULT_MAX_DISTANCE,
        }
    }

    pub fn accuracy(&self) -> u8 {
        self.accuracy
    }

    /// Set the baseline accuracy level (1..=10). Values outside the range
    /// are rejected with a warning and the previous level is kept.
    pub fn set_accuracy(&mut self, accuracy: u8) {
        if (1..=10).contains(&accuracy) {
            self.accuracy = accuracy;
        } else {
            tracing::warn!(accuracy, "bad accuracy value, keeping previous");
        }
    }

    pub fn max_distance(&self) -> i32 {
        self.max_distance
    }

    pub fn set_max_distance(&mut self, max_distance: i32) {
        self.max_distance = max_distance;
    }

    pub fn cascades(&self) -> &CascadeSet {
        &self.cascades
    }

    pub fn cascades_mut(&mut self) -> &mut CascadeSet {
        &mut self.cascades
    }

    /// Typical largest edge length worth feeding the detector; callers with
    /// bigger images may pre-scale without losing detections.
    pub fn recommended_image_size_for_detection() -> u32 {
        800
    }

    /// Detect faces in a grayscale image.
    ///
    /// Returns face records with the crop attached and the identity left
    /// at [`Face::UNKNOWN_ID`]. Undersized or empty images yield an empty
    /// list without invoking any classifier.
    pub fn detect_faces(&self, image: &GrayImage) -> Vec<Face> {
        let (width, height) = image.dimensions();
        if width < MIN_IMAGE_EDGE || height < MIN_IMAGE_EDGE {
            tracing::warn!(width, height, "image too small, not detecting faces");
            return Vec::new();
        }

        let area = u64::from(width) * u64::from(height);
        let (effective_accuracy, downsample) = self.auto_tune(area);
        let profile = profile_for(effective_accuracy);

        // scale_factor maps working-image coordinates back to the original.
        let (working, scale_factor) = if downsample {
            let (resized, factor) = resize_to_area(image, WORKING_AREA);
            tracing::debug!(
                area,
                working_area = WORKING_AREA,
                accuracy = effective_accuracy,
                "downsampled input before scanning"
            );
            (std::borrow::Cow::Owned(resized), factor)
        } else {
            (std::borrow::Cow::Borrowed(image), 1.0)
        };

        let params = ScanParams {
            min_size: profile.min_sizes[0],
            scale_step: profile.search_increment,
            min_neighbors: profile.grouping,
        };

        // Accumulate candidates from every cascade in insertion order,
        // each scanning at the same base minimum size.
        let mut candidates = Vec::new();
        for cascade in self.cascades.iter() {
            let rects = cascade.classifier().detect(&working, &params);
            tracing::debug!(cascade = cascade.name(), hits = rects.len(), "cascade pass");
            for rect in rects {
                candidates.push(rect_to_face(rect, scale_factor));
            }
        }

        // The merge runs with a zero duplicate floor: a lone clean hit from
        // a single cascade is still a face.
        let merged = merge_duplicates(candidates, self.max_distance, 0);

        let mut faces = Vec::with_capacity(merged.len());
        for mut face in merged {
            if let Some(crop) = crop_face(image, &face) {
                face.set_face_image(crop);
                faces.push(face);
            }
        }

        tracing::debug!(count = faces.len(), "detection finished");
        faces
    }

    /// Pick the effective accuracy level and whether to downsample, from
    /// the input pixel area.
    fn auto_tune(&self, area: u64) -> (u8, bool) {
        if area > 7_000_000 {
            (3, true)
        } else if area > 5_000_000 {
            (2, true)
        } else if area > 2_000_000 {
            (4, true)
        } else {
            (self.accuracy, false)
        }
    }
}

/// Scale a raw candidate back to original coordinates and tighten the box
/// by shaving [`BOX_SHRINK`] off each side.
fn rect_to_face(rect: Rect, scale_factor: f64) -> Face {
    let x1 = (rect.x as f64 * scale_factor) as i32;
    let y1 = (rect.y as f64 * scale_factor) as i32;
    let x2 = ((rect.x + rect.width as i32) as f64 * scale_factor) as i32;
    let y2 = ((rect.y + rect.height as i32) as f64 * scale_factor) as i32;

    let shrink_x = ((x2 - x1) as f64 * BOX_SHRINK) as i32;
    let shrink_y = ((y2 - y1) as f64 * BOX_SHRINK) as i32;

    Face::new(x1 + shrink_x, y1 + shrink_y, x2 - shrink_x, y2 - shrink_y)
}

/// Collapse spatially close candidates.
///
/// Left-to-right sweep: every face to the right whose center lies within
/// `max_distance` of the current face is removed and counted as a
/// duplicate of it; afterwards faces with fewer than `min_duplicates`
/// duplicates are dropped as noise. Quadratic in the candidate count,
/// which stays in the tens per image.
pub fn merge_duplicates(mut faces: Vec<Face>, max_distance: i32, min_duplicates: usize) -> Vec<Face> {
    let mut i = 0;
    while i < faces.len() {
        let mut duplicates = 0usize;
        let mut j = i + 1;
        while j < faces.len() {
            if center_distance(&faces[i], &faces[j]) < max_distance as f64 {
                faces.remove(j);
                duplicates += 1;
            } else {
                j += 1;
            }
        }
        if duplicates < min_duplicates {
            faces.remove(i);
        } else {
            i += 1;
        }
    }
    faces
}

fn center_distance(a: &Face, b: &Face) -> f64 {
    let (ax, ay) = a.center();
    let (bx, by) = b.center();
    ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
}

/// Downsample to approximately `target_area` pixels, preserving aspect
/// ratio. Returns the resized image and the factor mapping resized
/// coordinates back to the original.
fn resize_to_area(image: &GrayImage, target_area: u32) -> (GrayImage, f64) {
    let (width, height) = image.dimensions();
    let area = width as f64 * height as f64;
    let factor = (area / target_area as f64).sqrt();

    let new_width = ((width as f64 / factor).round() as u32).max(1);
    let new_height = ((height as f64 / factor).round() as u32).max(1);

    let resized = imageops::resize(image, new_width, new_height, FilterType::Triangle);
    (resized, factor)
}

/// Crop a face rectangle from the original-resolution image, clamped to
/// the image bounds. Returns `None` for a degenerate rectangle.
fn crop_face(image: &GrayImage, face: &Face) -> Option<GrayImage> {
    let (width, height) = image.dimensions();
    let x1 = face.x1().clamp(0, width as i32) as u32;
    let y1 = face.y1().clamp(0, height as i32) as u32;
    let x2 = face.x2().clamp(0, width as i32) as u32;
    let y2 = face.y2().clamp(0, height as i32) as u32;

    if x2 <= x1 || y2 <= y1 {
        tracing::warn!(?face, "degenerate face rectangle, skipping crop");
        return None;
    }

    Some(imageops::crop_imm(image, x1, y1, x2 - x1, y2 - y1).to_image())
}
