use image::GenericImageView;
use log::{debug, error, info, warn};
use serde_json::{Map, Value, json};

use crate::detected_points::{FeatureError, FeatureExtractor};
use crate::error::{ServiceError, Status};
use crate::io::{decode_base64_image, image_payload};
use crate::pipeline::{MatcherConfig, analyze};
use crate::reference::{Reference, ReferenceStore};

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: Status,
    pub body: Value,
}

impl Response {
    pub fn success(body: Value) -> Response {
        Response {
            status: Status::Success,
            body,
        }
    }

    pub fn from_error(err: &ServiceError) -> Response {
        match err.status() {
            Status::InternalFault => error!("{}", err),
            _ => warn!("{}", err),
        }
        Response {
            status: err.status(),
            body: err.to_json(),
        }
    }
}

/// Both request operations over one shared reference slot.
pub struct MatchService {
    store: ReferenceStore,
    extractor: Box<dyn FeatureExtractor>,
    config: MatcherConfig,
}

impl MatchService {
    pub fn new(extractor: Box<dyn FeatureExtractor>, config: MatcherConfig) -> MatchService {
        MatchService {
            store: ReferenceStore::new(),
            extractor,
            config,
        }
    }

    pub fn store(&self) -> &ReferenceStore {
        &self.store
    }

    /// Registers the image in `body` as the new reference.
    pub fn upload_reference(&self, body: &[u8], headers: &[(String, String)]) -> Response {
        match self.register(body, headers) {
            Ok(()) => Response::success(json!({ "status": "Reference descriptors stored" })),
            Err(err) => Response::from_error(&err),
        }
    }

    /// Matches the image in `body` against the current reference.
    pub fn analyze(&self, body: &[u8]) -> Response {
        match self.evaluate(body) {
            Ok(result) => Response::success(result),
            Err(err) => Response::from_error(&err),
        }
    }

    fn register(&self, body: &[u8], headers: &[(String, String)]) -> Result<(), ServiceError> {
        let request = parse_json(body).ok_or_else(|| ServiceError::MalformedRequest {
            message: "Invalid or missing JSON in upload_reference",
            raw_key: "raw_request",
            raw_body: String::from_utf8_lossy(body).into_owned(),
            headers: Some(headers_to_json(headers)),
        })?;
        let payload = image_payload(&request).ok_or(ServiceError::MissingImage)?;
        let img = decode_base64_image(payload).map_err(|e| ServiceError::Decode(e.to_string()))?;

        let features = match self.extractor.detect_and_compute(&img) {
            Ok(features) => features,
            Err(FeatureError::Empty | FeatureError::Image(_)) => return Err(ServiceError::NoFeatures),
            Err(e) => return Err(ServiceError::Internal(e.to_string())),
        };
        info!(
            "reference registered: {} features, {}x{} image",
            features.len(),
            img.width(),
            img.height()
        );
        self.store.replace(Reference {
            features,
            img_w_h: img.dimensions(),
        });
        Ok(())
    }

    fn evaluate(&self, body: &[u8]) -> Result<Value, ServiceError> {
        let reference = self.store.current().ok_or(ServiceError::NoReference)?;
        let request = parse_json(body).ok_or_else(|| ServiceError::MalformedRequest {
            message: "Invalid or missing JSON",
            raw_key: "raw_body",
            raw_body: String::from_utf8_lossy(body).into_owned(),
            headers: None,
        })?;
        let payload = image_payload(&request).ok_or(ServiceError::MissingImage)?;
        let img = decode_base64_image(payload).map_err(|e| ServiceError::Decode(e.to_string()))?;

        let query = match self.extractor.detect_and_compute(&img) {
            Ok(features) => features,
            Err(FeatureError::Empty | FeatureError::Image(_)) => {
                debug!("query image has no features");
                return Ok(json!({ "match": false, "reason": "No features in camera image" }));
            }
            Err(e) => return Err(ServiceError::Internal(e.to_string())),
        };
        analyze(&reference.features, &query, &self.config)
            .to_json()
            .map_err(|e| ServiceError::Internal(e.to_string()))
    }
}

/// `None` for unparsable bodies and for a literal `null`.
fn parse_json(body: &[u8]) -> Option<Value> {
    serde_json::from_slice::<Value>(body).ok().filter(|v| !v.is_null())
}

fn headers_to_json(headers: &[(String, String)]) -> Value {
    let map: Map<String, Value> = headers
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    Value::Object(map)
}
