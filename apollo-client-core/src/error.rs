use crate::json_ext::{Object, Path};
use crate::response::Response;
use displaydoc::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error types raised by the transport capability.
///
/// The pipeline classifies these into retryable and terminal failures;
/// retryable failures are re-attempted under the configured
/// [`RetryOptions`](crate::RetryOptions).
#[derive(Error, Display, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransportError {
    /// Request timed out after {elapsed_ms}ms.
    Timeout {
        /// Time spent waiting for the response.
        elapsed_ms: u64,
    },

    /// Service is unavailable: {reason}.
    Unavailable {
        /// The reason the service could not be reached.
        reason: String,
    },

    /// Server replied with status {status}.
    Status {
        /// The protocol-level status code.
        status: u16,
    },

    /// Authentication failed: {reason}.
    Unauthorized {
        /// The reason authentication was refused.
        reason: String,
    },

    /// Response payload was malformed: {reason}.
    MalformedResponse {
        /// The reason decoding failed.
        reason: String,
    },

    /// Stream was closed by the peer.
    StreamClosed,
}

impl TransportError {
    /// Whether the pipeline may re-attempt the fetch that produced this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Timeout { .. }
            | TransportError::Unavailable { .. }
            | TransportError::StreamClosed => true,
            TransportError::Status { status } => {
                *status == 429 || (500..=599).contains(status)
            }
            TransportError::Unauthorized { .. } | TransportError::MalformedResponse { .. } => {
                false
            }
        }
    }
}

/// A recoverable, per-field mismatch between a response tree and the
/// selection that produced it. Normalization records the error, stores an
/// error marker in the affected slot and keeps going.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NormalizationError {
    /// Response diverges from the selection at '{path}': {reason}.
    DivergentField {
        /// Where in the response tree the divergence was found.
        path: Path,
        /// What was expected there.
        reason: String,
    },

    /// Object at '{path}' has no '__typename' discriminator for a type condition.
    MissingTypename {
        /// Where in the response tree the object sits.
        path: Path,
    },
}

impl NormalizationError {
    pub fn path(&self) -> &Path {
        match self {
            NormalizationError::DivergentField { path, .. }
            | NormalizationError::MissingTypename { path } => path,
        }
    }

    /// Convert to a wire-style error attached to the final response.
    pub fn to_wire_error(&self) -> Error {
        Error {
            message: self.to_string(),
            path: Some(self.path().clone()),
            extensions: serde_json_bytes::to_value(self)
                .expect("variants serialize to an object; qed")
                .as_object()
                .cloned()
                .expect("variants serialize to an object; qed"),
        }
    }
}

/// A fatal inconsistency; the triggering operation fails, the store is left
/// untouched.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StructuralError {
    /// Selection recursion exceeded the maximum depth of {max_depth}.
    RecursionLimitExceeded {
        /// The configured depth limit.
        max_depth: usize,
    },

    /// Record read at '{path}' is inconsistent with the selection: {reason}.
    InconsistentRecord {
        /// Where in the materialized tree the record was reached.
        path: Path,
        /// What is wrong with the stored data.
        reason: String,
    },
}

/// Error types for the optional persistent backing store.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// Failed to load persisted records: {reason}.
    Load { reason: String },

    /// Failed to flush a write batch: {reason}.
    Flush { reason: String },
}

/// Terminal failure of one submitted operation.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Transport failure: {0}
    Transport(#[from] TransportError),

    /// Structural failure: {0}
    Structural(#[from] StructuralError),

    /// Operation was cancelled.
    Cancelled,

    /// Subscription operations must be started with 'watch', not 'execute'.
    SubscriptionRequiresWatch,
}

impl ClientError {
    /// Convert the error to a response deliverable on a watch stream.
    pub(crate) fn to_response(&self) -> Response {
        Response {
            data: serde_json_bytes::Value::Null,
            errors: vec![Error {
                message: self.to_string(),
                ..Default::default()
            }],
            extensions: Default::default(),
        }
    }
}

/// A field-level error carried alongside a (possibly partial) result.
#[derive(Error, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
#[error("{message}")]
#[serde(rename_all = "camelCase")]
pub struct Error {
    /// The error message.
    pub message: String,

    /// The path of the field the error applies to.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub path: Option<Path>,

    /// The optional machine-readable extensions.
    #[serde(skip_serializing_if = "Object::is_empty", default)]
    pub extensions: Object,
}

impl Error {
    /// A requested field that has never been fetched into the store.
    pub(crate) fn missing_field(path: &Path) -> Self {
        Error {
            message: format!("no cached value for field at '{}'", path),
            path: Some(path.clone()),
            extensions: Default::default(),
        }
    }

    /// A stored value whose type does not match the selection's declaration.
    pub(crate) fn field_mismatch(path: &Path, reason: impl Into<String>) -> Self {
        Error {
            message: reason.into(),
            path: Some(path.clone()),
            extensions: Default::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_classify_for_retry() {
        assert!(TransportError::Timeout { elapsed_ms: 30_000 }.is_retryable());
        assert!(TransportError::Unavailable {
            reason: "connection refused".to_string()
        }
        .is_retryable());
        assert!(TransportError::Status { status: 503 }.is_retryable());
        assert!(TransportError::Status { status: 429 }.is_retryable());

        assert!(!TransportError::Status { status: 400 }.is_retryable());
        assert!(!TransportError::Unauthorized {
            reason: "bad token".to_string()
        }
        .is_retryable());
        assert!(!TransportError::MalformedResponse {
            reason: "not json".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn normalization_error_converts_to_wire_error() {
        let err = NormalizationError::MissingTypename {
            path: Path::from("user/friends/0"),
        };
        let wire = err.to_wire_error();
        assert_eq!(wire.path, Some(Path::from("user/friends/0")));
        assert!(wire.message.contains("__typename"));
        assert_eq!(
            wire.extensions.get("type").and_then(|v| v.as_str()),
            Some("MissingTypename"),
        );
    }
}
