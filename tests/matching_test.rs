mod common;

use common::{blank, pasted, texture};
use image::DynamicImage;
use image::imageops::FilterType;
use refmatch::detected_points::{FeatureError, FeatureExtractor};
use refmatch::pipeline::{Analysis, MatcherConfig, analyze};
use refmatch::sift::SiftExtractor;

#[test]
fn test_reference_matches_itself() {
    let extractor = SiftExtractor::default();
    let img = DynamicImage::ImageLuma8(texture(11, 256, 256));
    let reference = extractor.detect_and_compute(&img).unwrap();
    let query = extractor.detect_and_compute(&img).unwrap();

    let analysis = analyze(&reference, &query, &MatcherConfig::default());
    let Analysis::Verified { result, .. } = analysis else {
        panic!("expected verification, got {:?}", analysis);
    };
    assert!(result.is_match);
    assert_eq!(result.total_candidate_count, reference.len());
    assert!(result.inlier_count <= result.good_match_count);
    assert!(result.good_match_count <= result.total_candidate_count);
    assert!(result.bounding_quad.is_some());
}

#[test]
fn test_translated_reference_is_located() {
    let extractor = SiftExtractor::default();
    let patch = texture(12, 256, 256);
    let reference = extractor
        .detect_and_compute(&DynamicImage::ImageLuma8(patch.clone()))
        .unwrap();
    let scene = DynamicImage::ImageLuma8(pasted(&patch, 512, 384, 128, 64));
    let query = extractor.detect_and_compute(&scene).unwrap();

    let Analysis::Verified { result, h_mat } = analyze(&reference, &query, &MatcherConfig::default()) else {
        panic!("expected verification");
    };
    assert!(result.is_match);
    let h_mat = h_mat.unwrap();
    let h_mat = h_mat / h_mat[(2, 2)];
    assert!((h_mat[(0, 2)] - 128.0).abs() < 2.0);
    assert!((h_mat[(1, 2)] - 64.0).abs() < 2.0);

    // a rotated box around points in the patch may poke out of it a little
    let quad = result.bounding_quad.unwrap();
    let cx = quad.iter().map(|c| c[0]).sum::<f32>() / 4.0;
    let cy = quad.iter().map(|c| c[1]).sum::<f32>() / 4.0;
    assert!(cx > 128.0 && cx < 128.0 + 256.0);
    assert!(cy > 64.0 && cy < 64.0 + 256.0);
    for corner in quad {
        assert!(corner[0] > 128.0 - 64.0 && corner[0] < 128.0 + 256.0 + 64.0);
        assert!(corner[1] > 64.0 - 64.0 && corner[1] < 64.0 + 256.0 + 64.0);
    }
}

#[test]
fn test_rotated_scaled_query_matches() {
    let extractor = SiftExtractor::default();
    let img = DynamicImage::ImageLuma8(texture(11, 256, 256));
    let reference = extractor.detect_and_compute(&img).unwrap();
    let scene = img.rotate90().resize_exact(384, 384, FilterType::Triangle);
    let query = extractor.detect_and_compute(&scene).unwrap();

    let Analysis::Verified { result, .. } = analyze(&reference, &query, &MatcherConfig::default()) else {
        panic!("expected verification");
    };
    assert!(result.is_match);
    assert!(result.inlier_count >= 10);
    assert!(result.inlier_count <= result.good_match_count);
    let quad = result.bounding_quad.unwrap();
    assert_eq!(quad.len(), 4);
    for corner in quad {
        assert!(corner[0] > -64.0 && corner[0] < 384.0 + 64.0);
        assert!(corner[1] > -64.0 && corner[1] < 384.0 + 64.0);
    }
}

#[test]
fn test_featureless_query() {
    let extractor = SiftExtractor::default();
    let result = extractor.detect_and_compute(&DynamicImage::ImageLuma8(blank(320, 240)));
    assert_eq!(result, Err(FeatureError::Empty));
}

#[test]
fn test_strict_config_rejects_match() {
    let extractor = SiftExtractor::default();
    let img = DynamicImage::ImageLuma8(texture(13, 256, 256));
    let features = extractor.detect_and_compute(&img).unwrap();
    let mut config = MatcherConfig::default();
    config.decision.min_good_matches = features.len() + 1;

    let analysis = analyze(&features, &features, &config);
    assert!(!analysis.is_match());
    assert!(matches!(analysis, Analysis::InsufficientMatches { .. }));
}
