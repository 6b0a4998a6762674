#![allow(dead_code)]

use image::{DynamicImage, GrayImage, Luma};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use refmatch::io::encode_image_base64;
use serde_json::json;

pub const BACKGROUND: u8 = 128;

/// Random overlapping rectangles on a flat background.
pub fn texture(seed: u64, w: u32, h: u32) -> GrayImage {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut img = GrayImage::from_pixel(w, h, Luma([BACKGROUND]));
    for _ in 0..(w * h / 1600).max(10) {
        let (x0, y0) = (rng.random_range(0..w - 20), rng.random_range(0..h - 20));
        let (rw, rh) = (rng.random_range(6..40u32), rng.random_range(6..40u32));
        let level = rng.random_range(0..=255u8);
        for y in y0..(y0 + rh).min(h) {
            for x in x0..(x0 + rw).min(w) {
                img.put_pixel(x, y, Luma([level]));
            }
        }
    }
    img
}

/// `patch` pasted at (`x0`, `y0`) on a larger flat canvas.
pub fn pasted(patch: &GrayImage, w: u32, h: u32, x0: u32, y0: u32) -> GrayImage {
    let mut canvas = GrayImage::from_pixel(w, h, Luma([BACKGROUND]));
    for (x, y, p) in patch.enumerate_pixels() {
        if x + x0 < w && y + y0 < h {
            canvas.put_pixel(x + x0, y + y0, *p);
        }
    }
    canvas
}

pub fn blank(w: u32, h: u32) -> GrayImage {
    GrayImage::from_pixel(w, h, Luma([BACKGROUND]))
}

pub fn request_body(img: GrayImage) -> Vec<u8> {
    let encoded = encode_image_base64(&DynamicImage::ImageLuma8(img), image::ImageFormat::Png).unwrap();
    json!({ "image": encoded }).to_string().into_bytes()
}
