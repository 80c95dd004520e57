//! End-to-end gallery persistence: a saved gallery must restore an
//! engine that behaves bit-for-bit like the one that wrote it.

use image::{GrayImage, Luma};
use subface_core::recognizer::{Recognizer, Strategy};

fn scratch_dir(tag: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("subface-roundtrip-{tag}"));
    std::fs::remove_dir_all(&dir).ok();
    dir
}

fn training_image(seed: u32) -> GrayImage {
    GrayImage::from_fn(24, 24, |x, y| {
        Luma([((x * seed + y * (seed + 3) + seed * seed) % 251) as u8])
    })
}

fn training_set() -> (Vec<GrayImage>, Vec<i32>) {
    let images = (1..=6).map(training_image).collect();
    let labels = vec![0, 0, 1, 1, 2, 2];
    (images, labels)
}

fn classify_all(engine: &Recognizer, images: &[GrayImage]) -> Vec<(i32, f64)> {
    images
        .iter()
        .map(|i| engine.classify(i).expect("classify"))
        .collect()
}

#[test]
fn test_eigen_gallery_restores_exact_behavior() {
    let dir = scratch_dir("eigen");
    let (images, labels) = training_set();

    let mut original = Recognizer::new(Strategy::Eigenface);
    original.train(&images, &labels, 0).unwrap();
    original.save_config(&dir).unwrap();
    let expected = classify_all(&original, &images);

    let mut restored = Recognizer::new(Strategy::Eigenface);
    restored.load_config(&dir).unwrap();

    assert_eq!(restored.count(), original.count());
    assert_eq!(restored.threshold(), original.threshold());
    let actual = classify_all(&restored, &images);
    for ((id_a, d_a), (id_b, d_b)) in expected.iter().zip(&actual) {
        assert_eq!(id_a, id_b);
        assert_eq!(d_a.to_bits(), d_b.to_bits(), "distance drifted across reload");
    }

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_fisher_gallery_restores_exact_behavior() {
    let dir = scratch_dir("fisher");
    let (images, labels) = training_set();

    let mut original = Recognizer::new(Strategy::Fisherface);
    original.train(&images, &labels, 0).unwrap();
    original.save_config(&dir).unwrap();
    let expected = classify_all(&original, &images);

    let mut restored = Recognizer::new(Strategy::Fisherface);
    restored.load_config(&dir).unwrap();

    let actual = classify_all(&restored, &images);
    for ((id_a, d_a), (id_b, d_b)) in expected.iter().zip(&actual) {
        assert_eq!(id_a, id_b);
        assert_eq!(d_a.to_bits(), d_b.to_bits());
    }

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_double_load_is_idempotent() {
    let dir = scratch_dir("idempotent");
    let (images, labels) = training_set();

    let mut original = Recognizer::new(Strategy::Eigenface);
    original.train(&images, &labels, 0).unwrap();
    original.save_config(&dir).unwrap();

    let mut engine = Recognizer::new(Strategy::Eigenface);
    engine.load_config(&dir).unwrap();
    let first = classify_all(&engine, &images);
    engine.load_config(&dir).unwrap();
    let second = classify_all(&engine, &images);
    assert_eq!(first, second);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_failed_load_leaves_engine_untouched() {
    let dir = scratch_dir("failed-load");
    let (images, labels) = training_set();

    let mut engine = Recognizer::new(Strategy::Eigenface);
    engine.train(&images, &labels, 0).unwrap();
    let before = classify_all(&engine, &images);

    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join(Strategy::Eigenface.gallery_file()),
        "{\"count\": \"garbage\"}",
    )
    .unwrap();

    assert!(engine.load_config(&dir).is_err());
    assert_eq!(engine.count(), images.len());
    assert_eq!(classify_all(&engine, &images), before);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_config_map_matches_file_roundtrip() {
    let dir = scratch_dir("map");
    let (images, labels) = training_set();

    let mut original = Recognizer::new(Strategy::Eigenface);
    original.train(&images, &labels, 0).unwrap();
    original.save_config(&dir).unwrap();

    let mut from_file = Recognizer::new(Strategy::Eigenface);
    from_file.load_config(&dir).unwrap();

    let mut from_map = Recognizer::new(Strategy::Eigenface);
    from_map.load_config_map(&original.config_map()).unwrap();

    assert_eq!(
        classify_all(&from_file, &images),
        classify_all(&from_map, &images)
    );

    std::fs::remove_dir_all(&dir).ok();
}
