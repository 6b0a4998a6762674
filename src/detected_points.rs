use glam::Vec2;
use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeatureError {
    #[error("no features found")]
    Empty,

    #[error("descriptor {index} has length {found}, expected {expected}")]
    DescriptorLength {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("image error: {0}")]
    Image(String),
}

/// A detected keypoint. Scale and orientation are carried along from the
/// detector but are opaque to matching.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub p2d: Vec2,
    pub scale: f32,
    /// Radians.
    pub orientation: f32,
    pub response: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32) -> Keypoint {
        Keypoint {
            p2d: Vec2::new(x, y),
            scale: 1.0,
            orientation: 0.0,
            response: 0.0,
        }
    }
}

/// One keypoint together with its descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub keypoint: Keypoint,
    pub descriptor: Vec<f32>,
}

/// Non-empty list of features whose descriptors all share one length.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSet {
    features: Vec<Feature>,
}

impl FeatureSet {
    pub fn new(features: Vec<Feature>) -> Result<FeatureSet, FeatureError> {
        let expected = match features.first() {
            Some(f) => f.descriptor.len(),
            None => return Err(FeatureError::Empty),
        };
        if let Some((index, f)) = features
            .iter()
            .enumerate()
            .find(|(_, f)| f.descriptor.len() != expected)
        {
            return Err(FeatureError::DescriptorLength {
                index,
                expected,
                found: f.descriptor.len(),
            });
        }
        Ok(FeatureSet { features })
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn descriptor_len(&self) -> usize {
        self.features[0].descriptor.len()
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn get(&self, idx: usize) -> Option<&Feature> {
        self.features.get(idx)
    }

    pub fn point(&self, idx: usize) -> Vec2 {
        self.features[idx].keypoint.p2d
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Feature> {
        self.features.iter()
    }
}

/// Turns an image into keypoints + descriptors.
///
/// Returns `FeatureError::Empty` when the image has no usable features.
pub trait FeatureExtractor: Send + Sync {
    fn detect_and_compute(&self, img: &DynamicImage) -> Result<FeatureSet, FeatureError>;
}
