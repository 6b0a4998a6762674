//! Difference-of-Gaussians keypoints with 128-dimensional gradient histogram
//! descriptors.
//!
//! Works on a single float luminance plane in `[0, 1]`. Images larger than
//! `max_image_side` are downscaled first; returned keypoints are always in the
//! coordinates of the input image.

use std::f32::consts::PI;

use glam::Vec2;
use image::DynamicImage;
use image::imageops::FilterType;
use log::debug;
use nalgebra as na;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::detected_points::{Feature, FeatureError, FeatureExtractor, FeatureSet, Keypoint};

const DESC_WIDTH: usize = 4;
const DESC_HIST_BINS: usize = 8;
pub const DESCRIPTOR_LEN: usize = DESC_WIDTH * DESC_WIDTH * DESC_HIST_BINS;
const DESC_SCALE_FACTOR: f32 = 3.0;
const DESC_MAG_THRESHOLD: f32 = 0.2;
const ORI_HIST_BINS: usize = 36;
const ORI_SIGMA_FACTOR: f32 = 1.5;
const ORI_RADIUS_FACTOR: f32 = 3.0 * ORI_SIGMA_FACTOR;
const ORI_PEAK_RATIO: f32 = 0.8;
const MAX_INTERP_STEPS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiftConfig {
    /// Upper bound; small images get fewer octaves.
    pub octaves: usize,
    pub scales_per_octave: usize,
    pub sigma: f32,
    /// Blur already present in the input image.
    pub assumed_blur: f32,
    pub contrast_threshold: f32,
    pub edge_threshold: f32,
    /// Strongest responses kept; 0 keeps all.
    pub max_features: usize,
    pub border: usize,
    pub max_image_side: u32,
}

impl Default for SiftConfig {
    fn default() -> Self {
        SiftConfig {
            octaves: 6,
            scales_per_octave: 3,
            sigma: 1.6,
            assumed_blur: 0.5,
            contrast_threshold: 0.04,
            edge_threshold: 10.0,
            max_features: 2000,
            border: 5,
            max_image_side: 1280,
        }
    }
}

/// Row-major single channel float image.
#[derive(Debug, Clone)]
struct Plane {
    w: usize,
    h: usize,
    data: Vec<f32>,
}

impl Plane {
    #[inline]
    fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.w + x]
    }

    #[inline]
    fn get_clamped(&self, x: isize, y: isize) -> f32 {
        let x = x.clamp(0, self.w as isize - 1) as usize;
        let y = y.clamp(0, self.h as isize - 1) as usize;
        self.get(x, y)
    }

    fn sub(&self, other: &Plane) -> Plane {
        Plane {
            w: self.w,
            h: self.h,
            data: self.data.iter().zip(&other.data).map(|(a, b)| a - b).collect(),
        }
    }

    fn downsample(&self) -> Plane {
        let (w, h) = (self.w / 2, self.h / 2);
        let mut data = Vec::with_capacity(w * h);
        for y in 0..h {
            for x in 0..w {
                data.push(self.get(x * 2, y * 2));
            }
        }
        Plane { w, h, data }
    }

    /// Separable gaussian blur with replicated borders.
    fn blur(&self, sigma: f32) -> Plane {
        if sigma <= 0.0 {
            return self.clone();
        }
        let radius = (3.0 * sigma).ceil() as isize;
        let mut kernel: Vec<f32> = (-radius..=radius)
            .map(|i| (-(i * i) as f32 / (2.0 * sigma * sigma)).exp())
            .collect();
        let sum: f32 = kernel.iter().sum();
        kernel.iter_mut().for_each(|k| *k /= sum);

        let convolve = |src: &Plane, horizontal: bool| -> Plane {
            let data = (0..src.h)
                .into_par_iter()
                .flat_map_iter(|y| {
                    let kernel = &kernel;
                    (0..src.w).map(move |x| {
                        kernel
                            .iter()
                            .enumerate()
                            .map(|(k, wk)| {
                                let o = k as isize - radius;
                                let v = if horizontal {
                                    src.get_clamped(x as isize + o, y as isize)
                                } else {
                                    src.get_clamped(x as isize, y as isize + o)
                                };
                                v * wk
                            })
                            .sum::<f32>()
                    })
                })
                .collect();
            Plane {
                w: src.w,
                h: src.h,
                data,
            }
        };
        convolve(&convolve(self, true), false)
    }

    /// Central difference gradient as (magnitude, angle), `None` on the border.
    #[inline]
    fn gradient(&self, x: isize, y: isize) -> Option<(f32, f32)> {
        if x < 1 || y < 1 || x >= self.w as isize - 1 || y >= self.h as isize - 1 {
            return None;
        }
        let (x, y) = (x as usize, y as usize);
        let dx = self.get(x + 1, y) - self.get(x - 1, y);
        let dy = self.get(x, y + 1) - self.get(x, y - 1);
        Some(((dx * dx + dy * dy).sqrt(), dy.atan2(dx)))
    }
}

struct Octave {
    gaussians: Vec<Plane>,
    dogs: Vec<Plane>,
}

/// A scale space extremum after sub-pixel refinement, in octave coordinates.
#[derive(Debug, Clone, Copy)]
struct Extremum {
    octave: usize,
    layer: usize,
    x: f32,
    y: f32,
    /// Blur of the layer relative to the octave's pixel grid.
    octave_scale: f32,
    response: f32,
}

#[derive(Debug, Clone, Default)]
pub struct SiftExtractor {
    pub config: SiftConfig,
}

impl SiftExtractor {
    pub fn new(config: SiftConfig) -> SiftExtractor {
        SiftExtractor { config }
    }

    fn build_octaves(&self, base: Plane) -> Vec<Octave> {
        let s = self.config.scales_per_octave;
        let min_side = base.w.min(base.h) as f32;
        let max_octaves = (min_side.log2().floor() as isize - 3).max(1) as usize;
        let n_octaves = self.config.octaves.clamp(1, max_octaves);

        let k = 2f32.powf(1.0 / s as f32);
        // incremental blur from layer i-1 to layer i
        let increments: Vec<f32> = (1..s + 3)
            .map(|i| {
                let prev = self.config.sigma * k.powi(i as i32 - 1);
                let total = prev * k;
                (total * total - prev * prev).sqrt()
            })
            .collect();

        let mut octaves: Vec<Octave> = Vec::with_capacity(n_octaves);
        let mut next_base = base;
        for _ in 0..n_octaves {
            let mut gaussians = Vec::with_capacity(s + 3);
            gaussians.push(next_base);
            for inc in &increments {
                let blurred = gaussians[gaussians.len() - 1].blur(*inc);
                gaussians.push(blurred);
            }
            let dogs = gaussians.windows(2).map(|g| g[1].sub(&g[0])).collect();
            next_base = gaussians[s].downsample();
            octaves.push(Octave { gaussians, dogs });
            if next_base.w.min(next_base.h) < 2 * self.config.border + 3 {
                break;
            }
        }
        octaves
    }

    fn is_local_extremum(dogs: &[Plane], layer: usize, x: usize, y: usize) -> bool {
        let v = dogs[layer].get(x, y);
        let mut is_max = true;
        let mut is_min = true;
        for l in layer - 1..=layer + 1 {
            for yy in y - 1..=y + 1 {
                for xx in x - 1..=x + 1 {
                    if l == layer && yy == y && xx == x {
                        continue;
                    }
                    let n = dogs[l].get(xx, yy);
                    is_max &= v > n;
                    is_min &= v < n;
                    if !is_max && !is_min {
                        return false;
                    }
                }
            }
        }
        is_max || is_min
    }

    /// Fits a quadratic to the DoG around a candidate and moves it to the
    /// interpolated extremum; rejects low contrast and edge-like responses.
    fn refine(&self, octave: usize, dogs: &[Plane], layer: usize, x: usize, y: usize) -> Option<Extremum> {
        let s = self.config.scales_per_octave;
        let border = self.config.border.max(1);
        let (w, h) = (dogs[0].w, dogs[0].h);
        let (mut l, mut xi, mut yi) = (layer, x, y);
        let mut offset = na::Vector3::zeros();
        let mut grad = na::Vector3::zeros();
        let mut converged = false;

        for _ in 0..MAX_INTERP_STEPS {
            let (prev, cur, next) = (&dogs[l - 1], &dogs[l], &dogs[l + 1]);
            let v = cur.get(xi, yi);
            let dx = (cur.get(xi + 1, yi) - cur.get(xi - 1, yi)) * 0.5;
            let dy = (cur.get(xi, yi + 1) - cur.get(xi, yi - 1)) * 0.5;
            let ds = (next.get(xi, yi) - prev.get(xi, yi)) * 0.5;
            let dxx = cur.get(xi + 1, yi) + cur.get(xi - 1, yi) - 2.0 * v;
            let dyy = cur.get(xi, yi + 1) + cur.get(xi, yi - 1) - 2.0 * v;
            let dss = next.get(xi, yi) + prev.get(xi, yi) - 2.0 * v;
            let dxy = (cur.get(xi + 1, yi + 1) - cur.get(xi - 1, yi + 1) - cur.get(xi + 1, yi - 1)
                + cur.get(xi - 1, yi - 1))
                * 0.25;
            let dxs = (next.get(xi + 1, yi) - next.get(xi - 1, yi) - prev.get(xi + 1, yi)
                + prev.get(xi - 1, yi))
                * 0.25;
            let dys = (next.get(xi, yi + 1) - next.get(xi, yi - 1) - prev.get(xi, yi + 1)
                + prev.get(xi, yi - 1))
                * 0.25;
            grad = na::Vector3::new(dx, dy, ds);
            let hessian = na::Matrix3::new(dxx, dxy, dxs, dxy, dyy, dys, dxs, dys, dss);
            offset = -hessian.lu().solve(&grad)?;

            if offset.iter().all(|o| o.abs() < 0.5) {
                converged = true;
                break;
            }
            if offset.iter().any(|o| !o.is_finite() || o.abs() > (w.max(h)) as f32) {
                return None;
            }
            let nx = xi as isize + offset.x.round() as isize;
            let ny = yi as isize + offset.y.round() as isize;
            let nl = l as isize + offset.z.round() as isize;
            if nl < 1
                || nl > s as isize
                || nx < border as isize
                || ny < border as isize
                || nx >= (w - border) as isize
                || ny >= (h - border) as isize
            {
                return None;
            }
            (xi, yi, l) = (nx as usize, ny as usize, nl as usize);
        }
        if !converged {
            return None;
        }

        let contrast = dogs[l].get(xi, yi) + 0.5 * grad.dot(&offset);
        if contrast.abs() * (s as f32) < self.config.contrast_threshold {
            return None;
        }

        // principal curvature ratio on the spatial hessian
        let cur = &dogs[l];
        let v = cur.get(xi, yi);
        let dxx = cur.get(xi + 1, yi) + cur.get(xi - 1, yi) - 2.0 * v;
        let dyy = cur.get(xi, yi + 1) + cur.get(xi, yi - 1) - 2.0 * v;
        let dxy = (cur.get(xi + 1, yi + 1) - cur.get(xi - 1, yi + 1) - cur.get(xi + 1, yi - 1)
            + cur.get(xi - 1, yi - 1))
            * 0.25;
        let tr = dxx + dyy;
        let det = dxx * dyy - dxy * dxy;
        let r = self.config.edge_threshold;
        if det <= 0.0 || tr * tr * r >= (r + 1.0) * (r + 1.0) * det {
            return None;
        }

        let scale_pos = l as f32 + offset.z;
        Some(Extremum {
            octave,
            layer: l,
            x: xi as f32 + offset.x,
            y: yi as f32 + offset.y,
            octave_scale: self.config.sigma * 2f32.powf(scale_pos / s as f32),
            response: contrast.abs(),
        })
    }

    fn find_extrema(&self, octaves: &[Octave]) -> Vec<Extremum> {
        let s = self.config.scales_per_octave;
        let border = self.config.border.max(1);
        let threshold = 0.5 * self.config.contrast_threshold / s as f32;
        octaves
            .par_iter()
            .enumerate()
            .flat_map_iter(|(o, octave)| {
                let dogs = &octave.dogs;
                let (w, h) = (dogs[0].w, dogs[0].h);
                let mut found = Vec::new();
                if w <= 2 * border || h <= 2 * border {
                    return found.into_iter();
                }
                for layer in 1..=s {
                    for y in border..h - border {
                        for x in border..w - border {
                            if dogs[layer].get(x, y).abs() <= threshold
                                || !Self::is_local_extremum(dogs, layer, x, y)
                            {
                                continue;
                            }
                            if let Some(e) = self.refine(o, dogs, layer, x, y) {
                                found.push(e);
                            }
                        }
                    }
                }
                found.into_iter()
            })
            .collect()
    }

    /// Dominant gradient orientations around an extremum, radians in `[0, 2pi)`.
    fn orientations(&self, img: &Plane, e: &Extremum) -> Vec<f32> {
        let sigma = ORI_SIGMA_FACTOR * e.octave_scale;
        let radius = (ORI_RADIUS_FACTOR * e.octave_scale).round() as isize;
        let (cx, cy) = (e.x.round() as isize, e.y.round() as isize);
        let mut hist = [0f32; ORI_HIST_BINS];
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let Some((mag, angle)) = img.gradient(cx + dx, cy + dy) else {
                    continue;
                };
                let weight = (-((dx * dx + dy * dy) as f32) / (2.0 * sigma * sigma)).exp();
                let bin = (angle.rem_euclid(2.0 * PI) * ORI_HIST_BINS as f32 / (2.0 * PI)).round() as usize;
                hist[bin % ORI_HIST_BINS] += weight * mag;
            }
        }

        // [1 4 6 4 1] / 16 circular smoothing
        let n = ORI_HIST_BINS;
        let smooth: Vec<f32> = (0..n)
            .map(|i| {
                (hist[(i + n - 2) % n] + hist[(i + 2) % n]) / 16.0
                    + (hist[(i + n - 1) % n] + hist[(i + 1) % n]) * 4.0 / 16.0
                    + hist[i] * 6.0 / 16.0
            })
            .collect();
        let max = smooth.iter().cloned().fold(0.0, f32::max);
        if max <= 0.0 {
            return Vec::new();
        }

        (0..n)
            .filter_map(|i| {
                let (l, c, r) = (smooth[(i + n - 1) % n], smooth[i], smooth[(i + 1) % n]);
                if c <= l || c <= r || c < ORI_PEAK_RATIO * max {
                    return None;
                }
                let interp = i as f32 + 0.5 * (l - r) / (l - 2.0 * c + r);
                Some(wrap_angle(interp * 2.0 * PI / n as f32))
            })
            .collect()
    }

    /// 4x4 spatial cells of 8 orientation bins, in the keypoint's rotated frame.
    fn descriptor(&self, img: &Plane, e: &Extremum, orientation: f32) -> Vec<f32> {
        let d = DESC_WIDTH as f32;
        let n = DESC_HIST_BINS;
        let hist_width = DESC_SCALE_FACTOR * e.octave_scale;
        let diag = ((img.w * img.w + img.h * img.h) as f32).sqrt();
        let radius = (hist_width * std::f32::consts::SQRT_2 * (d + 1.0) * 0.5)
            .round()
            .min(diag) as isize;
        let (cos_t, sin_t) = (orientation.cos(), orientation.sin());
        let (cx, cy) = (e.x.round() as isize, e.y.round() as isize);
        let weight_denom = 2.0 * (0.5 * d) * (0.5 * d);

        let mut hist = vec![0f32; DESCRIPTOR_LEN];
        for i in -radius..=radius {
            for j in -radius..=radius {
                let c_rot = (j as f32 * cos_t + i as f32 * sin_t) / hist_width;
                let r_rot = (-(j as f32) * sin_t + i as f32 * cos_t) / hist_width;
                let rbin = r_rot + d / 2.0 - 0.5;
                let cbin = c_rot + d / 2.0 - 0.5;
                if rbin <= -1.0 || rbin >= d || cbin <= -1.0 || cbin >= d {
                    continue;
                }
                let Some((mag, angle)) = img.gradient(cx + j, cy + i) else {
                    continue;
                };
                let rel = (angle - orientation).rem_euclid(2.0 * PI);
                let obin = rel * n as f32 / (2.0 * PI);
                let weight = (-(c_rot * c_rot + r_rot * r_rot) / weight_denom).exp();
                let value = mag * weight;

                let (r0, c0, o0) = (rbin.floor(), cbin.floor(), obin.floor());
                let (dr, dc, dobin) = (rbin - r0, cbin - c0, obin - o0);
                for (ri, wr) in [(r0 as isize, 1.0 - dr), (r0 as isize + 1, dr)] {
                    if ri < 0 || ri >= DESC_WIDTH as isize {
                        continue;
                    }
                    for (ci, wc) in [(c0 as isize, 1.0 - dc), (c0 as isize + 1, dc)] {
                        if ci < 0 || ci >= DESC_WIDTH as isize {
                            continue;
                        }
                        for (oi, wo) in [(o0 as usize % n, 1.0 - dobin), ((o0 as usize + 1) % n, dobin)] {
                            let idx = (ri as usize * DESC_WIDTH + ci as usize) * n + oi;
                            hist[idx] += value * wr * wc * wo;
                        }
                    }
                }
            }
        }

        normalize(&mut hist);
        hist.iter_mut().for_each(|v| *v = v.min(DESC_MAG_THRESHOLD));
        normalize(&mut hist);
        hist
    }

    /// Feature extraction on a luminance plane in `[0, 1]`.
    fn extract_plane(&self, gray: Plane, to_input_scale: f32) -> Vec<Feature> {
        let base_blur = (self.config.sigma.powi(2) - self.config.assumed_blur.powi(2))
            .max(0.01)
            .sqrt();
        let octaves = self.build_octaves(gray.blur(base_blur));
        let mut extrema = self.find_extrema(&octaves);
        extrema.sort_by(|a, b| {
            b.response
                .total_cmp(&a.response)
                .then(a.octave.cmp(&b.octave))
                .then(a.y.total_cmp(&b.y))
                .then(a.x.total_cmp(&b.x))
        });
        if self.config.max_features > 0 {
            extrema.truncate(self.config.max_features);
        }

        let features: Vec<Feature> = extrema
            .par_iter()
            .flat_map_iter(|e| {
                let img = &octaves[e.octave].gaussians[e.layer];
                let octave_factor = 2f32.powi(e.octave as i32) * to_input_scale;
                self.orientations(img, e).into_iter().map(move |orientation| Feature {
                    keypoint: Keypoint {
                        p2d: Vec2::new(e.x, e.y) * octave_factor,
                        scale: e.octave_scale * octave_factor,
                        orientation,
                        response: e.response,
                    },
                    descriptor: self.descriptor(img, e, orientation),
                })
            })
            .collect();
        debug!(
            "{} extrema, {} features over {} octaves",
            extrema.len(),
            features.len(),
            octaves.len()
        );
        features
    }
}

/// Angle in `[0, 2pi)`; `rem_euclid` alone can round up to `2pi`.
fn wrap_angle(a: f32) -> f32 {
    let w = a.rem_euclid(2.0 * PI);
    if w >= 2.0 * PI { 0.0 } else { w }
}

fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

impl FeatureExtractor for SiftExtractor {
    fn detect_and_compute(&self, img: &DynamicImage) -> Result<FeatureSet, FeatureError> {
        let (w, h) = (img.width(), img.height());
        let min_side = (2 * self.config.border + 3) as u32;
        if w < min_side || h < min_side {
            return Err(FeatureError::Image(format!("image {}x{} is too small", w, h)));
        }
        let longest = w.max(h);
        let (luma, to_input_scale) = if self.config.max_image_side > 0 && longest > self.config.max_image_side {
            let s = self.config.max_image_side as f32 / longest as f32;
            let (nw, nh) = (
                ((w as f32 * s).round() as u32).max(1),
                ((h as f32 * s).round() as u32).max(1),
            );
            (img.resize_exact(nw, nh, FilterType::Triangle).to_luma32f(), 1.0 / s)
        } else {
            (img.to_luma32f(), 1.0)
        };
        let gray = Plane {
            w: luma.width() as usize,
            h: luma.height() as usize,
            data: luma.into_raw(),
        };
        FeatureSet::new(self.extract_plane(gray, to_input_scale))
    }
}
