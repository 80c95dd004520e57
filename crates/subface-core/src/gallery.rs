//! Persisted gallery record for a recognition strategy.
//!
//! One JSON file per strategy in the config directory, plus an equivalent
//! string-map form for callers that persist the gallery through their own
//! storage. Both forms round-trip bit-exactly: floats are written in
//! shortest round-trip decimal notation.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Gallery file name for the Eigenface strategy.
pub const EIGEN_GALLERY_FILE: &str = "eigen-gallery.json";
/// Gallery file name for the Fisherface strategy.
pub const FISHER_GALLERY_FILE: &str = "fisher-gallery.json";

/// Canonical face edge length fixed before recognition.
pub const CANONICAL_FACE_SIZE: u32 = 120;

/// Default nearest-neighbor rejection bound for the Eigenface strategy.
pub const DEFAULT_THRESHOLD: f64 = 1_000_000.0;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery io: {0}")]
    Io(#[from] std::io::Error),
    #[error("gallery parse: {0}")]
    Json(#[from] serde_json::Error),
    #[error("gallery map missing key: {0}")]
    MissingKey(String),
    #[error("malformed gallery: {0}")]
    Malformed(String),
}

/// In-memory gallery of a trained (or empty) recognition strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryState {
    pub face_width: u32,
    pub face_height: u32,
    pub threshold: f64,
    /// D x k projection basis, one component per column. 0 x 0 until the
    /// first successful training pass.
    pub basis: DMatrix<f64>,
    pub mean: DVector<f64>,
    /// One projected observation per enrolled training image, storage
    /// order append-only.
    pub projections: Vec<DVector<f64>>,
    /// Identity labels, index-aligned with `projections`.
    pub labels: Vec<i32>,
}

impl Default for GalleryState {
    fn default() -> Self {
        Self {
            face_width: CANONICAL_FACE_SIZE,
            face_height: CANONICAL_FACE_SIZE,
            threshold: DEFAULT_THRESHOLD,
            basis: DMatrix::zeros(0, 0),
            mean: DVector::zeros(0),
            projections: Vec::new(),
            labels: Vec::new(),
        }
    }
}

impl GalleryState {
    pub fn is_trained(&self) -> bool {
        self.basis.ncols() > 0 && !self.projections.is_empty()
    }

    pub fn count(&self) -> usize {
        self.projections.len()
    }

    /// Write the gallery to `dir/file_name`, creating the directory if
    /// needed.
    pub fn save(&self, dir: &Path, file_name: &str) -> Result<(), GalleryError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(file_name);
        let record = GalleryRecord::from_state(self);
        let body = serde_json::to_string_pretty(&record)?;
        std::fs::write(&path, body)?;
        tracing::info!(path = %path.display(), count = self.count(), "gallery saved");
        Ok(())
    }

    /// Load a gallery from `dir/file_name`. The returned state is fully
    /// validated; on any error the caller's current state is untouched.
    pub fn load(dir: &Path, file_name: &str) -> Result<Self, GalleryError> {
        let path = dir.join(file_name);
        let body = std::fs::read_to_string(&path)?;
        let record: GalleryRecord = serde_json::from_str(&body)?;
        let state = record.into_state()?;
        tracing::info!(path = %path.display(), count = state.count(), "gallery loaded");
        Ok(state)
    }

    /// Serialize to the string-map form.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("count".into(), self.projections.len().to_string());
        map.insert("face_width".into(), self.face_width.to_string());
        map.insert("face_height".into(), self.face_height.to_string());
        map.insert("threshold".into(), self.threshold.to_string());
        map.insert("basis".into(), encode_matrix(&self.basis));
        map.insert("mean".into(), encode_vector(&self.mean));
        for (i, projection) in self.projections.iter().enumerate() {
            map.insert(format!("projection_{i}"), encode_vector(projection));
        }
        for (i, label) in self.labels.iter().enumerate() {
            map.insert(format!("label_{i}"), label.to_string());
        }
        map
    }

    /// Deserialize from the string-map form; the inverse of
    /// [`to_map`](Self::to_map).
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self, GalleryError> {
        let count: usize = parse_key(map, "count")?;
        let face_width: u32 = parse_key(map, "face_width")?;
        let face_height: u32 = parse_key(map, "face_height")?;
        let threshold: f64 = parse_key(map, "threshold")?;
        let basis = decode_matrix(required(map, "basis")?)?;
        let mean = decode_vector(required(map, "mean")?)?;

        let mut projections = Vec::with_capacity(count);
        let mut labels = Vec::with_capacity(count);
        for i in 0..count {
            projections.push(decode_vector(required(map, &format!("projection_{i}"))?)?);
            labels.push(parse_key(map, &format!("label_{i}"))?);
        }

        let state = Self {
            face_width,
            face_height,
            threshold,
            basis,
            mean,
            projections,
            labels,
        };
        state.validate()?;
        Ok(state)
    }

    fn validate(&self) -> Result<(), GalleryError> {
        if self.projections.len() != self.labels.len() {
            return Err(GalleryError::Malformed(format!(
                "{} projections but {} labels",
                self.projections.len(),
                self.labels.len()
            )));
        }
        if self.is_trained() {
            let k = self.basis.ncols();
            if self.mean.len() != self.basis.nrows() {
                return Err(GalleryError::Malformed(format!(
                    "mean length {} does not match basis rows {}",
                    self.mean.len(),
                    self.basis.nrows()
                )));
            }
            for (i, p) in self.projections.iter().enumerate() {
                if p.len() != k {
                    return Err(GalleryError::Malformed(format!(
                        "projection {i} has length {}, basis has {k} columns",
                        p.len()
                    )));
                }
            }
        }
        Ok(())
    }
}

/// On-disk form of a [`GalleryState`].
#[derive(Serialize, Deserialize)]
struct GalleryRecord {
    count: usize,
    face_width: u32,
    face_height: u32,
    threshold: f64,
    basis: MatrixRecord,
    mean: Vec<f64>,
    projections: Vec<Vec<f64>>,
    labels: Vec<i32>,
}

#[derive(Serialize, Deserialize)]
struct MatrixRecord {
    rows: usize,
    cols: usize,
    /// Column-major entries, `rows * cols` long.
    data: Vec<f64>,
}

impl GalleryRecord {
    fn from_state(state: &GalleryState) -> Self {
        Self {
            count: state.projections.len(),
            face_width: state.face_width,
            face_height: state.face_height,
            threshold: state.threshold,
            basis: MatrixRecord {
                rows: state.basis.nrows(),
                cols: state.basis.ncols(),
                data: state.basis.as_slice().to_vec(),
            },
            mean: state.mean.as_slice().to_vec(),
            projections: state
                .projections
                .iter()
                .map(|p| p.as_slice().to_vec())
                .collect(),
            labels: state.labels.clone(),
        }
    }

    fn into_state(self) -> Result<GalleryState, GalleryError> {
        if self.basis.data.len() != self.basis.rows * self.basis.cols {
            return Err(GalleryError::Malformed(format!(
                "basis claims {}x{} but carries {} entries",
                self.basis.rows,
                self.basis.cols,
                self.basis.data.len()
            )));
        }
        if self.count != self.projections.len() {
            return Err(GalleryError::Malformed(format!(
                "count {} does not match {} stored projections",
                self.count,
                self.projections.len()
            )));
        }
        let state = GalleryState {
            face_width: self.face_width,
            face_height: self.face_height,
            threshold: self.threshold,
            basis: DMatrix::from_column_slice(self.basis.rows, self.basis.cols, &self.basis.data),
            mean: DVector::from_vec(self.mean),
            projections: self.projections.into_iter().map(DVector::from_vec).collect(),
            labels: self.labels,
        };
        state.validate()?;
        Ok(state)
    }
}

fn encode_vector(v: &DVector<f64>) -> String {
    let mut out = v.len().to_string();
    for value in v.iter() {
        out.push(' ');
        out.push_str(&value.to_string());
    }
    out
}

fn decode_vector(text: &str) -> Result<DVector<f64>, GalleryError> {
    let mut parts = text.split_ascii_whitespace();
    let len: usize = parts
        .next()
        .ok_or_else(|| GalleryError::Malformed("empty vector".into()))?
        .parse()
        .map_err(|_| GalleryError::Malformed("bad vector length".into()))?;
    let values: Vec<f64> = parts
        .map(|p| {
            p.parse()
                .map_err(|_| GalleryError::Malformed(format!("bad float: {p}")))
        })
        .collect::<Result<_, _>>()?;
    if values.len() != len {
        return Err(GalleryError::Malformed(format!(
            "vector claims {len} entries, has {}",
            values.len()
        )));
    }
    Ok(DVector::from_vec(values))
}

fn encode_matrix(m: &DMatrix<f64>) -> String {
    let mut out = format!("{} {}", m.nrows(), m.ncols());
    for value in m.as_slice() {
        out.push(' ');
        out.push_str(&value.to_string());
    }
    out
}

fn decode_matrix(text: &str) -> Result<DMatrix<f64>, GalleryError> {
    let mut parts = text.split_ascii_whitespace();
    let rows: usize = parts
        .next()
        .ok_or_else(|| GalleryError::Malformed("empty matrix".into()))?
        .parse()
        .map_err(|_| GalleryError::Malformed("bad matrix rows".into()))?;
    let cols: usize = parts
        .next()
        .ok_or_else(|| GalleryError::Malformed("matrix missing columns".into()))?
        .parse()
        .map_err(|_| GalleryError::Malformed("bad matrix cols".into()))?;
    let values: Vec<f64> = parts
        .map(|p| {
            p.parse()
                .map_err(|_| GalleryError::Malformed(format!("bad float: {p}")))
        })
        .collect::<Result<_, _>>()?;
    if values.len() != rows * cols {
        return Err(GalleryError::Malformed(format!(
            "matrix claims {rows}x{cols}, has {} entries",
            values.len()
        )));
    }
    Ok(DMatrix::from_column_slice(rows, cols, &values))
}

fn required<'a>(map: &'a BTreeMap<String, String>, key: &str) -> Result<&'a str, GalleryError> {
    map.get(key)
        .map(String::as_str)
        .ok_or_else(|| GalleryError::MissingKey(key.to_string()))
}

fn parse_key<T: std::str::FromStr>(
    map: &BTreeMap<String, String>,
    key: &str,
) -> Result<T, GalleryError> {
    required(map, key)?
        .parse()
        .map_err(|_| GalleryError::Malformed(format!("unparseable value for key {key}")))
}
