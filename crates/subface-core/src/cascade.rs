//! Rectangle-classifier collaborator seam.
//!
//! The cascade file format and the low-level sliding-window evaluation are
//! external capabilities; the library drives any implementor of
//! [`RectangleClassifier`] through a named, weighted [`CascadeSet`].

use crate::types::Rect;
use image::GrayImage;

/// Scan parameters handed to a classifier for one multi-scale pass.
#[derive(Debug, Clone, Copy)]
pub struct ScanParams {
    /// Smallest face edge length to search for, in pixels.
    pub min_size: u32,
    /// Multiplier applied to the search window between scale passes.
    pub scale_step: f64,
    /// Minimum number of neighboring raw hits required to keep a candidate.
    pub min_neighbors: u32,
}

/// A pre-trained boosted object classifier evaluated over an image at
/// multiple scales, returning candidate rectangles.
pub trait RectangleClassifier: Send {
    fn detect(&self, image: &GrayImage, params: &ScanParams) -> Vec<Rect>;
}

/// One named cascade with a relative weight.
pub struct Cascade {
    name: String,
    weight: i32,
    classifier: Box<dyn RectangleClassifier>,
}

impl Cascade {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn weight(&self) -> i32 {
        self.weight
    }

    pub fn classifier(&self) -> &dyn RectangleClassifier {
        self.classifier.as_ref()
    }
}

/// Ordered collection of cascades; detection iterates them in insertion
/// order, so results are deterministic for a given set.
#[derive(Default)]
pub struct CascadeSet {
    cascades: Vec<Cascade>,
}

impl CascadeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a cascade under a unique name. A duplicate name is ignored
    /// with a warning, keeping the existing cascade.
    pub fn add(&mut self, name: &str, weight: i32, classifier: Box<dyn RectangleClassifier>) {
        if self.has_cascade(name) {
            tracing::warn!(name, "cascade already present, not adding again");
            return;
        }
        self.cascades.push(Cascade {
            name: name.to_string(),
            weight,
            classifier,
        });
    }

    pub fn has_cascade(&self, name: &str) -> bool {
        self.cascades.iter().any(|c| c.name == name)
    }

    /// Remove a cascade by name. Returns whether anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.cascades.len();
        self.cascades.retain(|c| c.name != name);
        before != self.cascades.len()
    }

    pub fn remove_at(&mut self, index: usize) -> Option<Cascade> {
        if index < self.cascades.len() {
            Some(self.cascades.remove(index))
        } else {
            None
        }
    }

    pub fn set_weight(&mut self, name: &str, weight: i32) {
        if let Some(c) = self.cascades.iter_mut().find(|c| c.name == name) {
            c.weight = weight;
        } else {
            tracing::warn!(name, "cannot set weight, no such cascade");
        }
    }

    pub fn weight(&self, name: &str) -> Option<i32> {
        self.cascades.iter().find(|c| c.name == name).map(|c| c.weight)
    }

    pub fn get(&self, index: usize) -> Option<&Cascade> {
        self.cascades.get(index)
    }

    pub fn by_name(&self, name: &str) -> Option<&Cascade> {
        self.cascades.iter().find(|c| c.name == name)
    }

    pub fn len(&self) -> usize {
        self.cascades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cascades.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cascade> {
        self.cascades.iter()
    }
}
