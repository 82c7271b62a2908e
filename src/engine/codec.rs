//! Request encoding and response decoding

use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;

use crate::batch::types::ResponseBody;
use crate::engine::transport::PreparedRequest;
use crate::request::{RequestSpec, ResponseFormat};

/// Errors raised while encoding a request or decoding a response
#[derive(Error, Debug)]
pub enum CodecError {
    /// The format cannot be decoded
    #[error("Unsupported response format: {0}")]
    UnsupportedFormat(ResponseFormat),

    /// Body is not valid JSON
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Body is not valid UTF-8
    #[error("Invalid UTF-8 text: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

const CONTENT_TYPE: &str = "content-type";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Encode a request body.
///
/// Arrays, objects and booleans go out as JSON. Strings are sent verbatim,
/// numbers as their decimal text. `null` means no body.
pub fn encode_body(body: &Value) -> Result<Option<(Bytes, bool)>, CodecError> {
    let encoded = match body {
        Value::Null => None,
        Value::Array(_) | Value::Object(_) | Value::Bool(_) => {
            Some((Bytes::from(serde_json::to_vec(body)?), true))
        }
        Value::String(s) => Some((Bytes::from(s.clone()), false)),
        Value::Number(n) => Some((Bytes::from(n.to_string()), false)),
    };
    Ok(encoded)
}

/// Build the wire form of `spec`
pub fn prepare(spec: &RequestSpec) -> Result<PreparedRequest, CodecError> {
    let mut headers = spec.headers.clone();
    let body = match &spec.body {
        Some(value) => match encode_body(value)? {
            Some((bytes, is_json)) => {
                let has_content_type = headers
                    .iter()
                    .any(|(name, _)| name.eq_ignore_ascii_case(CONTENT_TYPE));
                if is_json && !has_content_type {
                    headers.push(("Content-Type".to_string(), JSON_CONTENT_TYPE.to_string()));
                }
                Some(bytes)
            }
            None => None,
        },
        None => None,
    };

    Ok(PreparedRequest {
        id: spec.id.clone(),
        method: spec.method.clone(),
        uri: spec.uri.clone().unwrap_or_default(),
        headers,
        query: spec.query.clone(),
        body,
    })
}

/// Decode a response body according to `format`
pub fn decode_body(format: ResponseFormat, body: &Bytes) -> Result<ResponseBody, CodecError> {
    match format {
        ResponseFormat::Binary => Err(CodecError::UnsupportedFormat(format)),
        _ if body.is_empty() => Ok(ResponseBody::Empty),
        ResponseFormat::Json => Ok(ResponseBody::Json(serde_json::from_slice(body)?)),
        ResponseFormat::Text => Ok(ResponseBody::Text(String::from_utf8(body.to_vec())?)),
    }
}
