use crate::error::{Error, TransportError};
use crate::json_ext::Object;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json_bytes::Value;
use std::pin::Pin;
use typed_builder::TypedBuilder;

/// A watch's result stream: the initial materialization followed by every
/// re-materialization triggered by a relevant store mutation.
pub type ResponseStream = Pin<Box<dyn futures::Stream<Item = Response> + Send>>;

/// A single operation result: a (possibly partial) data tree plus the
/// field-level errors accumulated while producing it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
#[builder(field_defaults(setter(into)))]
pub struct Response {
    /// The response data.
    #[serde(default)]
    #[builder(default = Value::Null)]
    pub data: Value,

    /// The field-level errors encountered.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    #[builder(default)]
    pub errors: Vec<Error>,

    /// The optional extensions.
    #[serde(skip_serializing_if = "Object::is_empty", default)]
    #[builder(default)]
    pub extensions: Object,
}

impl Response {
    /// Decode a raw wire payload into a response tree.
    pub fn from_bytes(b: Bytes) -> Result<Response, TransportError> {
        let value =
            Value::from_bytes(b).map_err(|error| TransportError::MalformedResponse {
                reason: error.to_string(),
            })?;

        let mut object = match value {
            Value::Object(o) => o,
            _ => {
                return Err(TransportError::MalformedResponse {
                    reason: "expected a JSON object".to_string(),
                })
            }
        };

        let data = object.remove("data").unwrap_or(Value::Null);

        let errors = match object.remove("errors") {
            Some(value @ Value::Array(_)) => serde_json_bytes::from_value(value).map_err(
                |error| TransportError::MalformedResponse {
                    reason: format!("invalid errors array: {}", error),
                },
            )?,
            _ => Vec::new(),
        };

        let extensions = match object.remove("extensions") {
            Some(Value::Object(o)) => o,
            _ => Object::new(),
        };

        Ok(Response {
            data,
            errors,
            extensions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json_ext::Path;
    use serde_json_bytes::json;

    #[test]
    fn decode_response_payload() {
        let payload = Bytes::from_static(
            br#"{
                "data": { "user": { "id": "1", "name": null } },
                "errors": [
                    { "message": "Name could not be fetched.", "path": ["user", "name"] }
                ],
                "extensions": { "traceId": "abc" }
            }"#,
        );

        let response = Response::from_bytes(payload).expect("payload decodes");
        assert_eq!(response.data, json!({ "user": { "id": "1", "name": null } }));
        assert_eq!(
            response.errors,
            vec![Error {
                message: "Name could not be fetched.".to_string(),
                path: Some(Path::from("user/name")),
                ..Default::default()
            }],
        );
        assert_eq!(
            response.extensions.get("traceId").and_then(|v| v.as_str()),
            Some("abc"),
        );
    }

    #[test]
    fn decode_rejects_non_object_payloads() {
        let err = Response::from_bytes(Bytes::from_static(b"[1, 2]"))
            .expect_err("arrays are not responses");
        assert!(matches!(err, TransportError::MalformedResponse { .. }));
    }
}
