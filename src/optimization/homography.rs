use glam::Vec2;
use log::debug;
use nalgebra as na;
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

const SAMPLE_SIZE: usize = 4;
const EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacParams {
    /// Max forward reprojection error in pixels for an inlier.
    pub reproj_threshold: f64,
    pub max_iterations: usize,
    pub confidence: f64,
    pub seed: u64,
}

impl Default for RansacParams {
    fn default() -> Self {
        RansacParams {
            reproj_threshold: 5.0,
            max_iterations: 2000,
            confidence: 0.995,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HomographyEstimate {
    /// Maps the first point of each pair onto the second.
    pub h_mat: Option<na::Matrix3<f64>>,
    pub inlier_mask: Vec<bool>,
    pub inlier_count: usize,
}

impl HomographyEstimate {
    fn failed(n: usize) -> HomographyEstimate {
        HomographyEstimate {
            h_mat: None,
            inlier_mask: vec![false; n],
            inlier_count: 0,
        }
    }
}

/// Hartley normalization: centroid to origin, mean distance sqrt(2).
fn normalize_points(pts: &[na::Vector2<f64>]) -> Option<(Vec<na::Vector2<f64>>, na::Matrix3<f64>)> {
    let n = pts.len() as f64;
    let centroid = pts.iter().fold(na::Vector2::zeros(), |acc, p| acc + p) / n;
    let mean_dist = pts.iter().map(|p| (p - centroid).norm()).sum::<f64>() / n;
    if mean_dist < EPS {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    let t = na::Matrix3::new(
        s,
        0.0,
        -s * centroid.x,
        0.0,
        s,
        -s * centroid.y,
        0.0,
        0.0,
        1.0,
    );
    let normalized = pts.iter().map(|p| (p - centroid) * s).collect();
    Some((normalized, t))
}

/// Normalized direct linear transform over 4 or more point pairs.
pub fn homography_dlt(pairs: &[(Vec2, Vec2)]) -> Option<na::Matrix3<f64>> {
    if pairs.len() < SAMPLE_SIZE {
        return None;
    }
    let (src, dst): (Vec<_>, Vec<_>) = pairs
        .iter()
        .map(|(p0, p1)| {
            (
                na::Vector2::new(p0.x as f64, p0.y as f64),
                na::Vector2::new(p1.x as f64, p1.y as f64),
            )
        })
        .unzip();
    let (src_n, t0) = normalize_points(&src)?;
    let (dst_n, t1) = normalize_points(&dst)?;

    // Accumulate A^T A directly; its smallest eigenvector is the null vector of A.
    let mut ata = na::SMatrix::<f64, 9, 9>::zeros();
    for (p, q) in src_n.iter().zip(&dst_n) {
        let (x, y, u, v) = (p.x, p.y, q.x, q.y);
        let r0 = na::SVector::<f64, 9>::from_column_slice(&[
            -x,
            -y,
            -1.0,
            0.0,
            0.0,
            0.0,
            u * x,
            u * y,
            u,
        ]);
        let r1 = na::SVector::<f64, 9>::from_column_slice(&[
            0.0,
            0.0,
            0.0,
            -x,
            -y,
            -1.0,
            v * x,
            v * y,
            v,
        ]);
        ata += r0 * r0.transpose() + r1 * r1.transpose();
    }
    let eigen = ata.symmetric_eigen();
    let (min_idx, _) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let h = eigen.eigenvectors.column(min_idx);
    let hn = na::Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let h_mat = t1.try_inverse()? * hn * t0;
    let scale = h_mat[(2, 2)];
    let h_mat = if scale.abs() > EPS {
        h_mat / scale
    } else {
        h_mat / h_mat.norm()
    };
    if h_mat.iter().all(|v| v.is_finite()) && h_mat.determinant().abs() > EPS {
        Some(h_mat)
    } else {
        debug!("degenerate homography");
        None
    }
}

/// Projects `p` with `h_mat`; `None` when the point maps to infinity.
pub fn project(h_mat: &na::Matrix3<f64>, p: Vec2) -> Option<Vec2> {
    let v = h_mat * na::Vector3::new(p.x as f64, p.y as f64, 1.0);
    if !v[2].is_finite() || v[2].abs() <= EPS {
        return None;
    }
    Some(Vec2::new((v[0] / v[2]) as f32, (v[1] / v[2]) as f32))
}

fn reprojection_error(h_mat: &na::Matrix3<f64>, pair: &(Vec2, Vec2)) -> f64 {
    match project(h_mat, pair.0) {
        Some(p) => (p - pair.1).length() as f64,
        None => f64::INFINITY,
    }
}

fn cross(a: Vec2, b: Vec2, c: Vec2) -> f32 {
    (b - a).perp_dot(c - a)
}

/// Rejects samples with three collinear points in either image or whose
/// triangle orientations disagree between the two images.
fn is_valid_sample(sample: &[(Vec2, Vec2)]) -> bool {
    const TRIPLES: [[usize; 3]; 4] = [[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]];
    TRIPLES.iter().all(|&[i, j, k]| {
        let c0 = cross(sample[i].0, sample[j].0, sample[k].0);
        let c1 = cross(sample[i].1, sample[j].1, sample[k].1);
        c0.abs() > 1e-3 && c1.abs() > 1e-3 && c0.signum() == c1.signum()
    })
}

fn score(h_mat: &na::Matrix3<f64>, pairs: &[(Vec2, Vec2)], threshold: f64) -> (Vec<bool>, usize) {
    let mask: Vec<bool> = pairs
        .iter()
        .map(|pair| reprojection_error(h_mat, pair) <= threshold)
        .collect();
    let count = mask.iter().filter(|m| **m).count();
    (mask, count)
}

fn required_iterations(inlier_ratio: f64, confidence: f64, max_iterations: usize) -> usize {
    let p_good = inlier_ratio.powi(SAMPLE_SIZE as i32);
    if p_good >= 1.0 - EPS {
        return 1;
    }
    if p_good <= EPS {
        return max_iterations;
    }
    let n = (1.0 - confidence).ln() / (1.0 - p_good).ln();
    if n.is_finite() {
        (n.ceil() as usize).clamp(1, max_iterations)
    } else {
        max_iterations
    }
}

/// Robust homography from point pairs with random sample consensus.
///
/// The winning model is refit on all of its inliers; the refit is kept only
/// if it does not lose inliers.
pub fn find_homography_ransac(pairs: &[(Vec2, Vec2)], params: &RansacParams) -> HomographyEstimate {
    let n = pairs.len();
    if n < SAMPLE_SIZE {
        return HomographyEstimate::failed(n);
    }
    let mut rng = ChaCha8Rng::seed_from_u64(params.seed);

    let mut best: Option<(na::Matrix3<f64>, Vec<bool>, usize)> = None;
    let mut iterations_needed = params.max_iterations;
    let mut nums: Vec<usize> = (0..n).collect();
    let mut sample = [(Vec2::ZERO, Vec2::ZERO); SAMPLE_SIZE];
    let mut iter = 0;
    while iter < iterations_needed {
        iter += 1;
        let (picked, _) = nums.partial_shuffle(&mut rng, SAMPLE_SIZE);
        for (s, &i) in sample.iter_mut().zip(picked.iter()) {
            *s = pairs[i];
        }
        if !is_valid_sample(&sample) {
            continue;
        }
        let Some(h_mat) = homography_dlt(&sample) else {
            continue;
        };
        let (mask, count) = score(&h_mat, pairs, params.reproj_threshold);
        if best.as_ref().is_none_or(|(_, _, c)| count > *c) {
            iterations_needed =
                required_iterations(count as f64 / n as f64, params.confidence, params.max_iterations);
            best = Some((h_mat, mask, count));
        }
    }

    let Some((mut h_mat, mut mask, mut count)) = best else {
        debug!("ransac found no valid model in {} iterations", iter);
        return HomographyEstimate::failed(n);
    };

    let inlier_pairs: Vec<_> = pairs
        .iter()
        .zip(&mask)
        .filter_map(|(p, m)| m.then_some(*p))
        .collect();
    if let Some(refit) = homography_dlt(&inlier_pairs) {
        let (refit_mask, refit_count) = score(&refit, pairs, params.reproj_threshold);
        if refit_count >= count {
            h_mat = refit;
            mask = refit_mask;
            count = refit_count;
        }
    }
    debug!("ransac: {}/{} inliers after {} iterations", count, n, iter);

    HomographyEstimate {
        h_mat: Some(h_mat),
        inlier_mask: mask,
        inlier_count: count,
    }
}
