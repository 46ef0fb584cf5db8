use crate::json_ext::Object;
use crate::spec::OperationKind;
use serde::{Deserialize, Serialize};
use serde_json_bytes::Value;
use std::collections::HashMap;
use std::fmt;

/// Stable identity of one entity inside the record store.
///
/// Keyed entities render as `Type:identifier` (`User:1`); objects without an
/// identifier get a path-scoped key chained off their parent
/// (`ROOT_QUERY.settings.theme`), which is deterministic for a given query
/// shape but never shared across different queries.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

const ROOT_QUERY: &str = "ROOT_QUERY";
const ROOT_MUTATION: &str = "ROOT_MUTATION";
const ROOT_SUBSCRIPTION: &str = "ROOT_SUBSCRIPTION";

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The synthetic root record for an operation kind.
    pub fn root_for(kind: OperationKind) -> Self {
        match kind {
            OperationKind::Query => Self(ROOT_QUERY.to_string()),
            OperationKind::Mutation => Self(ROOT_MUTATION.to_string()),
            OperationKind::Subscription => Self(ROOT_SUBSCRIPTION.to_string()),
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(
            self.0.as_str(),
            ROOT_QUERY | ROOT_MUTATION | ROOT_SUBSCRIPTION
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn entity(typename: &str, identifier: &str) -> Self {
        Self(format!("{}:{}", typename, identifier))
    }

    fn path_scoped(parent: &CacheKey, tail: &str) -> Self {
        Self(format!("{}.{}", parent.0, tail))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

/// Per-type identity configuration: which fields form an object's identifier.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TypePolicies {
    /// Ordered identifier fields per type name. All listed fields must be
    /// present for the key to resolve; otherwise the object falls back to a
    /// path-scoped key.
    pub keys: HashMap<String, Vec<String>>,

    /// Candidate identifier fields tried in order for types with no
    /// configured policy.
    pub default_key_fields: Vec<String>,
}

impl Default for TypePolicies {
    fn default() -> Self {
        Self {
            keys: HashMap::new(),
            default_key_fields: vec!["id".to_string(), "_id".to_string()],
        }
    }
}

impl TypePolicies {
    /// Resolve the identity of one object appearing in a response.
    ///
    /// Never fails: an object with no usable identifier is keyed by its
    /// position under the parent record, `tail` being the storage-key path
    /// from the parent record to this object (list indices included).
    pub fn resolve(
        &self,
        typename: Option<&str>,
        object: &Object,
        parent: &CacheKey,
        tail: &str,
    ) -> CacheKey {
        if let Some(typename) = typename {
            if let Some(fields) = self.keys.get(typename) {
                let mut parts = Vec::with_capacity(fields.len());
                for field in fields {
                    match object.get(field.as_str()).and_then(key_part) {
                        Some(part) => parts.push(part),
                        None => return CacheKey::path_scoped(parent, tail),
                    }
                }
                return CacheKey::entity(typename, &parts.join(":"));
            }

            for candidate in &self.default_key_fields {
                if let Some(part) = object.get(candidate.as_str()).and_then(key_part) {
                    return CacheKey::entity(typename, &part);
                }
            }
        }

        CacheKey::path_scoped(parent, tail)
    }
}

fn key_part(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.as_str().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json_bytes::json;

    fn object(value: serde_json_bytes::Value) -> Object {
        match value {
            serde_json_bytes::Value::Object(o) => o,
            _ => unreachable!("fixtures are objects"),
        }
    }

    #[test]
    fn identical_objects_resolve_to_the_same_key_anywhere() {
        let policies = TypePolicies::default();
        let root = CacheKey::root_for(OperationKind::Query);
        let elsewhere = CacheKey::from("Post:9");

        let user = object(json!({"__typename": "User", "id": "1", "name": "Ann"}));
        let a = policies.resolve(Some("User"), &user, &root, "user");
        let b = policies.resolve(Some("User"), &user, &elsewhere, "author");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "User:1");
    }

    #[test]
    fn numeric_identifiers_are_stringified() {
        let policies = TypePolicies::default();
        let root = CacheKey::root_for(OperationKind::Query);
        let user = object(json!({"id": 42}));
        let key = policies.resolve(Some("User"), &user, &root, "user");
        assert_eq!(key.as_str(), "User:42");
    }

    #[test]
    fn configured_composite_keys_join_in_declared_order() {
        let mut policies = TypePolicies::default();
        policies.keys.insert(
            "Edition".to_string(),
            vec!["isbn".to_string(), "printing".to_string()],
        );
        let root = CacheKey::root_for(OperationKind::Query);
        let edition = object(json!({"isbn": "9780", "printing": 3, "id": "ignored"}));
        let key = policies.resolve(Some("Edition"), &edition, &root, "edition");
        assert_eq!(key.as_str(), "Edition:9780:3");
    }

    #[test]
    fn missing_identifier_falls_back_to_a_path_scoped_key() {
        let policies = TypePolicies::default();
        let root = CacheKey::root_for(OperationKind::Query);

        let anonymous = object(json!({"__typename": "Settings", "theme": "dark"}));
        let key = policies.resolve(Some("Settings"), &anonymous, &root, "settings");
        assert_eq!(key.as_str(), "ROOT_QUERY.settings");
        assert!(!key.is_root());

        let untyped = object(json!({"theme": "dark"}));
        let key = policies.resolve(None, &untyped, &root, "settings.0");
        assert_eq!(key.as_str(), "ROOT_QUERY.settings.0");
    }

    #[test]
    fn policies_deserialize_from_config() {
        let policies: TypePolicies = serde_json::from_str(
            r#"{ "keys": { "Edition": ["isbn", "printing"] }, "default_key_fields": ["uuid"] }"#,
        )
        .expect("valid config");
        assert_eq!(
            policies.keys.get("Edition"),
            Some(&vec!["isbn".to_string(), "printing".to_string()]),
        );
        assert_eq!(policies.default_key_fields, vec!["uuid".to_string()]);

        let defaulted: TypePolicies = serde_json::from_str("{}").expect("empty config");
        assert_eq!(
            defaulted.default_key_fields,
            vec!["id".to_string(), "_id".to_string()],
        );
    }
}
