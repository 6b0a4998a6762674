use glam::Vec2;
use log::debug;
use nalgebra as na;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::decision::{DecisionPolicy, MatchResult};
use crate::detected_points::FeatureSet;
use crate::matcher::{RATIO_THRESHOLD, ratio_test_matches};
use crate::optimization::{RansacParams, find_homography_ransac};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub ratio_threshold: f32,
    pub ransac: RansacParams,
    pub decision: DecisionPolicy,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        MatcherConfig {
            ratio_threshold: RATIO_THRESHOLD,
            ransac: RansacParams::default(),
            decision: DecisionPolicy::default(),
        }
    }
}

/// Outcome of matching one query against the reference.
#[derive(Debug, Clone, PartialEq)]
pub enum Analysis {
    /// Too few ratio-test survivors to attempt geometric verification.
    InsufficientMatches {
        good_match_count: usize,
        total_candidate_count: usize,
    },
    Verified {
        result: MatchResult,
        h_mat: Option<na::Matrix3<f64>>,
    },
}

impl Analysis {
    pub fn is_match(&self) -> bool {
        matches!(self, Analysis::Verified { result, .. } if result.is_match)
    }

    /// Response body: the match result, or a non-match with its reason.
    pub fn to_json(&self) -> serde_json::Result<Value> {
        match self {
            Analysis::InsufficientMatches {
                good_match_count, ..
            } => Ok(json!({
                "match": false,
                "reason": "Not enough good matches",
                "good_matches": good_match_count,
            })),
            Analysis::Verified { result, .. } => serde_json::to_value(result),
        }
    }
}

/// Ratio-test matching, RANSAC verification and the match decision.
pub fn analyze(reference: &FeatureSet, query: &FeatureSet, config: &MatcherConfig) -> Analysis {
    let matches = ratio_test_matches(reference, query, config.ratio_threshold);
    let good_match_count = matches.good.len();
    if !config.decision.has_enough_good_matches(good_match_count) {
        debug!(
            "{} good matches of {} candidates, below floor {}",
            good_match_count, matches.total_candidates, config.decision.min_good_matches
        );
        return Analysis::InsufficientMatches {
            good_match_count,
            total_candidate_count: matches.total_candidates,
        };
    }

    let pairs: Vec<(Vec2, Vec2)> = matches
        .good
        .iter()
        .map(|c| (reference.point(c.reference_idx), query.point(c.query_idx)))
        .collect();
    let estimate = find_homography_ransac(&pairs, &config.ransac);
    let inlier_query_points: Vec<Vec2> = pairs
        .iter()
        .zip(&estimate.inlier_mask)
        .filter_map(|((_, q), inlier)| inlier.then_some(*q))
        .collect();

    let result = config.decision.decide(
        good_match_count,
        matches.total_candidates,
        estimate.inlier_count,
        &inlier_query_points,
    );
    debug!(
        "match={} good={} total={} inliers={}",
        result.is_match, result.good_match_count, result.total_candidate_count, result.inlier_count
    );
    Analysis::Verified {
        result,
        h_mat: estimate.h_mat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detected_points::{Feature, Keypoint};
    use crate::optimization::project;
    use rand::prelude::*;
    use rand_chacha::ChaCha8Rng;

    const DIM: usize = 32;

    fn random_descriptor(rng: &mut ChaCha8Rng) -> Vec<f32> {
        (0..DIM).map(|_| rng.random_range(0.0..1.0)).collect()
    }

    fn reference_set(rng: &mut ChaCha8Rng, n: usize) -> FeatureSet {
        FeatureSet::new(
            (0..n)
                .map(|_| Feature {
                    keypoint: Keypoint::new(rng.random_range(10.0..310.0), rng.random_range(10.0..230.0)),
                    descriptor: random_descriptor(rng),
                })
                .collect(),
        )
        .unwrap()
    }

    /// Query whose first `shared` features are the reference features moved by `h_mat`.
    fn warped_query(
        rng: &mut ChaCha8Rng,
        reference: &FeatureSet,
        h_mat: &na::Matrix3<f64>,
        shared: usize,
        clutter: usize,
    ) -> FeatureSet {
        let mut features: Vec<Feature> = reference
            .iter()
            .take(shared)
            .map(|f| Feature {
                keypoint: Keypoint {
                    p2d: project(h_mat, f.keypoint.p2d).unwrap(),
                    ..f.keypoint
                },
                descriptor: f.descriptor.iter().map(|v| *v + rng.random_range(-0.01f32..0.01)).collect(),
            })
            .collect();
        for _ in 0..clutter {
            features.push(Feature {
                keypoint: Keypoint::new(rng.random_range(0.0..640.0), rng.random_range(0.0..480.0)),
                descriptor: random_descriptor(rng),
            });
        }
        FeatureSet::new(features).unwrap()
    }

    fn similarity(angle: f64, scale: f64, tx: f64, ty: f64) -> na::Matrix3<f64> {
        let (s, c) = angle.sin_cos();
        na::Matrix3::new(scale * c, -scale * s, tx, scale * s, scale * c, ty, 0.0, 0.0, 1.0)
    }

    #[test]
    fn same_feature_set_matches_itself() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let reference = reference_set(&mut rng, 40);
        let analysis = analyze(&reference, &reference, &MatcherConfig::default());
        let Analysis::Verified { result, h_mat } = analysis else {
            panic!("expected verification");
        };
        assert!(result.is_match);
        assert_eq!(result.good_match_count, 40);
        assert_eq!(result.inlier_count, 40);
        assert_eq!(result.bounding_quad.map(|q| q.len()), Some(4));
        assert!((h_mat.unwrap() - na::Matrix3::identity()).norm() < 1e-3);
    }

    #[test]
    fn rotated_scaled_query_matches_and_box_encloses_region() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let reference = reference_set(&mut rng, 60);
        let h_mat = similarity(0.4, 1.3, 80.0, 20.0);
        let query = warped_query(&mut rng, &reference, &h_mat, 40, 30);

        let analysis = analyze(&reference, &query, &MatcherConfig::default());
        let Analysis::Verified { result, .. } = analysis else {
            panic!("expected verification");
        };
        assert!(result.is_match);
        assert!(result.inlier_count >= 40);
        assert!(result.inlier_count <= result.good_match_count);
        assert!(result.good_match_count <= result.total_candidate_count);
        assert_eq!(result.total_candidate_count, 60);

        let quad = result.bounding_quad.unwrap();
        let corners: Vec<Vec2> = quad.iter().map(|c| Vec2::new(c[0], c[1])).collect();
        let rect_min = corners.iter().fold(Vec2::splat(f32::MAX), |a, c| a.min(*c));
        let rect_max = corners.iter().fold(Vec2::splat(f32::MIN), |a, c| a.max(*c));
        for f in query.iter().take(40) {
            let p = f.keypoint.p2d;
            assert!(p.cmpge(rect_min - Vec2::splat(1e-2)).all());
            assert!(p.cmple(rect_max + Vec2::splat(1e-2)).all());
        }
    }

    #[test]
    fn nine_shared_features_stay_below_floor() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let reference = reference_set(&mut rng, 9);
        let query = warped_query(&mut rng, &reference, &similarity(0.0, 1.0, 5.0, 5.0), 9, 0);
        let analysis = analyze(&reference, &query, &MatcherConfig::default());
        assert_eq!(
            analysis,
            Analysis::InsufficientMatches {
                good_match_count: 9,
                total_candidate_count: 9
            }
        );
        assert!(!analysis.is_match());
        assert_eq!(
            analysis.to_json().unwrap(),
            json!({ "match": false, "reason": "Not enough good matches", "good_matches": 9 })
        );
    }

    #[test]
    fn unrelated_sets_do_not_match() {
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let reference = reference_set(&mut rng, 50);
        let query = reference_set(&mut rng, 50);
        let analysis = analyze(&reference, &query, &MatcherConfig::default());
        assert!(!analysis.is_match());
    }

    #[test]
    fn re_registration_is_idempotent() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let reference = reference_set(&mut rng, 50);
        let query = warped_query(&mut rng, &reference, &similarity(-0.2, 0.8, 10.0, 40.0), 30, 20);
        let config = MatcherConfig::default();
        let first = analyze(&reference.clone(), &query, &config);
        let second = analyze(&reference, &query, &config);
        assert_eq!(first, second);
    }
}
