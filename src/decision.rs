use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::util::min_area_rect;

pub const MIN_GOOD_MATCHES: usize = 10;
pub const MIN_INLIERS: usize = 10;
pub const MIN_INLIER_RATIO: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionPolicy {
    pub min_good_matches: usize,
    pub min_inliers: usize,
    pub min_inlier_ratio: f64,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        DecisionPolicy {
            min_good_matches: MIN_GOOD_MATCHES,
            min_inliers: MIN_INLIERS,
            min_inlier_ratio: MIN_INLIER_RATIO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    #[serde(rename = "match")]
    pub is_match: bool,
    #[serde(rename = "good_matches")]
    pub good_match_count: usize,
    #[serde(rename = "total_matches")]
    pub total_candidate_count: usize,
    #[serde(rename = "inliers")]
    pub inlier_count: usize,
    #[serde(rename = "box")]
    pub bounding_quad: Option<[[f32; 2]; 4]>,
}

impl DecisionPolicy {
    pub fn has_enough_good_matches(&self, good_match_count: usize) -> bool {
        good_match_count >= self.min_good_matches
    }

    /// `inliers / good >= min_inlier_ratio`, compared without division.
    fn passes_ratio(&self, inlier_count: usize, good_match_count: usize) -> bool {
        if good_match_count == 0 {
            return false;
        }
        // Exact for ratios with up to 6 decimals, e.g. 0.3 -> 300000 / 1000000.
        // Inliers never exceed good matches, so ratios outside [0, 1] are clamped.
        const SCALE: u128 = 1_000_000;
        let ratio = (self.min_inlier_ratio.clamp(0.0, 1.0) * SCALE as f64).round() as u128;
        inlier_count as u128 * SCALE >= ratio * good_match_count as u128
    }

    pub fn is_match(&self, good_match_count: usize, inlier_count: usize) -> bool {
        self.has_enough_good_matches(good_match_count)
            && inlier_count >= self.min_inliers
            && self.passes_ratio(inlier_count, good_match_count)
    }

    /// Match decision plus, on a match with at least 4 inlier query points,
    /// the corners of their minimum-area rotated bounding rectangle.
    pub fn decide(
        &self,
        good_match_count: usize,
        total_candidate_count: usize,
        inlier_count: usize,
        inlier_query_points: &[Vec2],
    ) -> MatchResult {
        let is_match = self.is_match(good_match_count, inlier_count);
        let bounding_quad = if is_match && inlier_query_points.len() >= 4 {
            min_area_rect(inlier_query_points).map(|rect| rect.corners().map(|c| [c.x, c.y]))
        } else {
            None
        };
        MatchResult {
            is_match,
            good_match_count,
            total_candidate_count,
            inlier_count,
            bounding_quad,
        }
    }
}
