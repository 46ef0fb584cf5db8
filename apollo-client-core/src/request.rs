use crate::json_ext::Object;
use crate::spec::Operation;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use typed_builder::TypedBuilder;

/// Per-operation rule governing cache-only vs cache-and-network vs
/// network-only behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CachePolicy {
    /// Answer from the store when the selection is fully cached, fetch
    /// otherwise.
    #[default]
    CacheFirst,

    /// Never touch the network; a partial result with missing-field errors
    /// is acceptable.
    CacheOnly,

    /// Emit the cached value as an interim result while the fetch proceeds.
    CacheAndNetwork,

    /// Skip the cache check entirely.
    NetworkOnly,
}

/// One submitted operation: the typed document handle plus everything the
/// transport needs to put it on the wire.
#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Request {
    /// The operation, shared with the typed query definition that produced
    /// it. Identity of this handle is what in-flight deduplication keys on.
    pub operation: Arc<Operation>,

    /// Variables as sent on the wire.
    #[builder(default)]
    pub variables: Object,

    #[builder(default)]
    pub cache_policy: CachePolicy,

    #[builder(default)]
    pub extensions: Object,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{Field, FieldType, Selection};

    #[test]
    fn cache_policy_deserializes_from_kebab_case() {
        let policy: CachePolicy = serde_json::from_str(r#""cache-and-network""#).expect("parses");
        assert_eq!(policy, CachePolicy::CacheAndNetwork);
        assert_eq!(CachePolicy::default(), CachePolicy::CacheFirst);
    }

    #[test]
    fn requests_default_to_cache_first() {
        let operation = Arc::new(
            Operation::builder()
                .selection_set(vec![Selection::Field(
                    Field::builder()
                        .name("ping")
                        .field_type(FieldType::String)
                        .build(),
                )])
                .build(),
        );
        let request = Request::builder().operation(operation).build();
        assert_eq!(request.cache_policy, CachePolicy::CacheFirst);
        assert!(request.variables.is_empty());
    }
}
