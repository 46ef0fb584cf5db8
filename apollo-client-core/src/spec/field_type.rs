use serde::{Deserialize, Serialize};
use serde_json_bytes::Value;

// Primitives are taken from scalars: https://spec.graphql.org/draft/#sec-Scalars
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Named(String),
    List(Box<FieldType>),
    NonNull(Box<FieldType>),
    String,
    Int,
    Float,
    Id,
    Boolean,
}

impl FieldType {
    /// return the name of the type on which selections happen
    ///
    /// Example if we get the field `list: [User!]!`, it will return "User"
    pub fn inner_type_name(&self) -> Option<&str> {
        match self {
            FieldType::Named(name) => Some(name.as_str()),
            FieldType::List(inner) | FieldType::NonNull(inner) => inner.inner_type_name(),
            FieldType::String
            | FieldType::Int
            | FieldType::Float
            | FieldType::Id
            | FieldType::Boolean => None,
        }
    }

    pub fn is_builtin_scalar(&self) -> bool {
        match self {
            FieldType::Named(_) | FieldType::List(_) | FieldType::NonNull(_) => false,
            FieldType::String
            | FieldType::Int
            | FieldType::Float
            | FieldType::Id
            | FieldType::Boolean => true,
        }
    }

    pub fn is_non_null(&self) -> bool {
        matches!(self, FieldType::NonNull(_))
    }

    /// Strict acceptance check for a stored scalar against this declared
    /// type. There is no coercion here: a stored string where an `Int` is
    /// declared is a mismatch, reported by the caller as a field error.
    pub(crate) fn accepts_scalar(&self, value: &Value) -> bool {
        match self {
            FieldType::NonNull(inner) | FieldType::List(inner) => inner.accepts_scalar(value),
            // enums and custom scalars: without a schema, any scalar shape is
            // accepted and passed through to the caller untouched
            FieldType::Named(_) => true,
            FieldType::String => value.is_string(),
            // Spec: https://spec.graphql.org/June2018/#sec-Int
            FieldType::Int => value
                .as_i64()
                .and_then(|x| i32::try_from(x).ok())
                .is_some(),
            FieldType::Float => value.as_f64().is_some(),
            // "The ID scalar type ... is serialized in the same way as a
            // String". In practice numeric ids appear too.
            FieldType::Id => value.is_string() || value.is_i64() || value.is_u64(),
            FieldType::Boolean => value.as_bool().is_some(),
        }
    }
}
