use std::path::Path;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use image::DynamicImage;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ConfigError, DecodeError};

/// Deserializes an object from a JSON file.
pub fn object_from_json<T: DeserializeOwned>(file_path: &Path) -> Result<T, ConfigError> {
    let path = file_path.display().to_string();
    let contents = std::fs::read_to_string(file_path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| ConfigError::Json { path, source })
}

/// The base64 image under `image`, else under `imageBase64`; empty strings are skipped.
pub fn image_payload(request: &Value) -> Option<&str> {
    ["image", "imageBase64"]
        .iter()
        .filter_map(|key| request.get(key).and_then(Value::as_str))
        .find(|s| !s.is_empty())
}

/// Decodes base64 encoded image file bytes (png, jpeg, ...). A leading
/// `data:<mime>;base64,` prefix is accepted.
pub fn decode_base64_image(payload: &str) -> Result<DynamicImage, DecodeError> {
    let payload = match payload.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => payload,
    };
    let bytes = BASE64.decode(payload.trim())?;
    Ok(image::load_from_memory(&bytes)?)
}

pub fn encode_image_base64(img: &DynamicImage, format: image::ImageFormat) -> Result<String, image::ImageError> {
    let mut bytes: Vec<u8> = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut bytes), format)?;
    Ok(BASE64.encode(bytes))
}
