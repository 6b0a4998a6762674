use rayon::prelude::*;

use crate::detected_points::FeatureSet;

pub const RATIO_THRESHOLD: f32 = 0.75;

/// A reference feature paired with its nearest query feature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub reference_idx: usize,
    pub query_idx: usize,
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RatioMatches {
    /// Sorted by `reference_idx`.
    pub good: Vec<Correspondence>,
    /// One candidate per reference descriptor.
    pub total_candidates: usize,
}

#[inline]
fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Nearest and second nearest query index with squared distances.
///
/// On equal distances the lower query index wins.
fn two_nearest(descriptor: &[f32], query: &FeatureSet) -> Option<((usize, f32), (usize, f32))> {
    let mut best: Option<(usize, f32)> = None;
    let mut second: Option<(usize, f32)> = None;
    for (j, f) in query.iter().enumerate() {
        let d = l2_squared(descriptor, &f.descriptor);
        match best {
            Some((_, bd)) if d >= bd => {
                if second.is_none_or(|(_, sd)| d < sd) {
                    second = Some((j, d));
                }
            }
            _ => {
                second = best;
                best = Some((j, d));
            }
        }
    }
    Some((best?, second?))
}

/// k=2 nearest neighbor search from every reference descriptor into the query
/// set, keeping only matches that pass the distance ratio test
/// `d1 < ratio * d2`.
pub fn ratio_test_matches(reference: &FeatureSet, query: &FeatureSet, ratio: f32) -> RatioMatches {
    let total_candidates = reference.len();
    if reference.len() < 2 || query.len() < 2 {
        log::debug!(
            "ratio test skipped: {} reference, {} query features",
            reference.len(),
            query.len()
        );
        return RatioMatches {
            good: Vec::new(),
            total_candidates,
        };
    }
    if reference.descriptor_len() != query.descriptor_len() {
        log::warn!(
            "descriptor length mismatch: reference {}, query {}",
            reference.descriptor_len(),
            query.descriptor_len()
        );
        return RatioMatches {
            good: Vec::new(),
            total_candidates,
        };
    }

    let good: Vec<Correspondence> = reference
        .features()
        .par_iter()
        .enumerate()
        .filter_map(|(i, f)| {
            let ((j, d1), (_, d2)) = two_nearest(&f.descriptor, query)?;
            let (d1, d2) = (d1.sqrt(), d2.sqrt());
            (d1 < ratio * d2).then_some(Correspondence {
                reference_idx: i,
                query_idx: j,
                distance: d1,
            })
        })
        .collect();

    RatioMatches {
        good,
        total_candidates,
    }
}
