use criterion::{Criterion, black_box, criterion_group, criterion_main};
use glam::Vec2;
use image::{DynamicImage, GrayImage, Luma};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use refmatch::detected_points::{Feature, FeatureExtractor, FeatureSet, Keypoint};
use refmatch::matcher::{RATIO_THRESHOLD, ratio_test_matches};
use refmatch::optimization::{RansacParams, find_homography_ransac};
use refmatch::sift::{DESCRIPTOR_LEN, SiftExtractor};

fn random_set(rng: &mut ChaCha8Rng, n: usize) -> FeatureSet {
    let features = (0..n)
        .map(|_| Feature {
            keypoint: Keypoint::new(rng.random_range(0.0..640.0), rng.random_range(0.0..480.0)),
            descriptor: (0..DESCRIPTOR_LEN).map(|_| rng.random_range(0.0..1.0)).collect(),
        })
        .collect();
    FeatureSet::new(features).unwrap()
}

fn bench_ratio_test(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let reference = random_set(&mut rng, 1000);
    let query = random_set(&mut rng, 1000);

    c.bench_function("ratio_test_1000x1000", |b| {
        b.iter(|| ratio_test_matches(black_box(&reference), black_box(&query), RATIO_THRESHOLD))
    });
}

fn bench_ransac(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let pairs: Vec<(Vec2, Vec2)> = (0..300)
        .map(|i| {
            let p = Vec2::new(rng.random_range(0.0..640.0), rng.random_range(0.0..480.0));
            let q = if i % 2 == 0 {
                Vec2::new(0.9 * p.x - 0.1 * p.y + 30.0, 0.1 * p.x + 0.9 * p.y + 10.0)
            } else {
                Vec2::new(rng.random_range(0.0..640.0), rng.random_range(0.0..480.0))
            };
            (p, q)
        })
        .collect();
    let params = RansacParams::default();

    c.bench_function("ransac_300_half_outliers", |b| {
        b.iter(|| find_homography_ransac(black_box(&pairs), &params))
    });
}

fn bench_sift(c: &mut Criterion) {
    let img = DynamicImage::ImageLuma8(GrayImage::from_fn(320, 240, |x, y| {
        let checker = ((x / 20) + (y / 20)) % 2 == 0;
        Luma([if checker { 40 } else { 200 }])
    }));
    let extractor = SiftExtractor::default();

    c.bench_function("sift_320x240", |b| {
        b.iter(|| extractor.detect_and_compute(black_box(&img)))
    });
}

criterion_group!(benches, bench_ratio_test, bench_ransac, bench_sift);
criterion_main!(benches);
