use serde_json::{Value, json};
use thiserror::Error;

/// Response classes of the request boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    ClientInputError,
    NotFound,
    MethodNotAllowed,
    PayloadTooLarge,
    InternalFault,
}

impl Status {
    pub fn code(&self) -> u16 {
        match self {
            Status::Success => 200,
            Status::ClientInputError => 400,
            Status::NotFound => 404,
            Status::MethodNotAllowed => 405,
            Status::PayloadTooLarge => 413,
            Status::InternalFault => 500,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Status::Success => "OK",
            Status::ClientInputError => "Bad Request",
            Status::NotFound => "Not Found",
            Status::MethodNotAllowed => "Method Not Allowed",
            Status::PayloadTooLarge => "Payload Too Large",
            Status::InternalFault => "Internal Server Error",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    /// Body is not JSON. Carries the raw body and, when known, the headers.
    #[error("{message}")]
    MalformedRequest {
        message: &'static str,
        raw_key: &'static str,
        raw_body: String,
        headers: Option<Value>,
    },

    #[error("Missing image data")]
    MissingImage,

    #[error("No features found in reference image")]
    NoFeatures,

    #[error("No reference uploaded")]
    NoReference,

    /// Undecodable base64 or image bytes.
    #[error("{0}")]
    Decode(String),

    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    pub fn status(&self) -> Status {
        match self {
            ServiceError::MalformedRequest { .. }
            | ServiceError::MissingImage
            | ServiceError::NoFeatures
            | ServiceError::NoReference => Status::ClientInputError,
            ServiceError::Decode(_) | ServiceError::Internal(_) => Status::InternalFault,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ServiceError::MalformedRequest {
                message,
                raw_key,
                raw_body,
                headers,
            } => {
                let mut body = json!({ "error": message });
                body[*raw_key] = Value::String(raw_body.clone());
                if let Some(headers) = headers {
                    body["headers"] = headers.clone();
                }
                body
            }
            other => json!({ "error": other.to_string() }),
        }
    }
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Invalid base64 image data: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Could not decode image: {0}")]
    Image(#[from] image::ImageError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
}
