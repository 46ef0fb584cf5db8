use serde::{Deserialize, Serialize};
use serde_json_bytes::{ByteString, Value};
use std::fmt;

/// A JSON object as returned by the wire and held in variables/extensions.
pub type Object = serde_json_bytes::Map<ByteString, Value>;

/// The discriminator field every keyed object is expected to carry.
pub const TYPENAME: &str = "__typename";

/// One segment of a [`Path`].
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathElement {
    /// An index into a list value.
    Index(usize),

    /// A field key within an object value.
    Key(String),
}

/// A path into a response tree, used to locate per-field errors and
/// missing fields.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Path(pub Vec<PathElement>);

impl Path {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub(crate) fn push(&mut self, element: PathElement) {
        self.0.push(element);
    }

    pub(crate) fn pop(&mut self) -> Option<PathElement> {
        self.0.pop()
    }
}

impl From<&str> for Path {
    fn from(s: &str) -> Self {
        Self(
            s.split('/')
                .filter(|part| !part.is_empty())
                .map(|part| {
                    if let Ok(index) = part.parse::<usize>() {
                        PathElement::Index(index)
                    } else {
                        PathElement::Key(part.to_string())
                    }
                })
                .collect(),
        )
    }
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathElement::Index(index) => write!(f, "{}", index),
            PathElement::Key(key) => write!(f, "{}", key),
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, element) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{}", element)?;
        }
        Ok(())
    }
}

/// Serialize a value to JSON text with object keys in sorted order, so that
/// semantically identical argument sets always fingerprint identically.
pub(crate) fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => out.push_str(
            &serde_json::to_string(s.as_str()).expect("strings always serialize; qed"),
        ),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&ByteString, &Value)> = map.iter().collect();
            entries.sort_by_key(|(key, _)| key.as_str());
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(
                    &serde_json::to_string(key.as_str()).expect("strings always serialize; qed"),
                );
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json_bytes::json;

    #[test]
    fn path_parses_keys_and_indices() {
        let path = Path::from("user/friends/1/name");
        assert_eq!(
            path.0,
            vec![
                PathElement::Key("user".to_string()),
                PathElement::Key("friends".to_string()),
                PathElement::Index(1),
                PathElement::Key("name".to_string()),
            ],
        );
        assert_eq!(path.to_string(), "user/friends/1/name");
    }

    #[test]
    fn path_serializes_as_a_json_array() {
        let path = Path::from("user/0/id");
        let value = serde_json_bytes::to_value(&path).expect("path serializes");
        assert_eq!(value, json!(["user", 0, "id"]));

        let back: Path = serde_json_bytes::from_value(value).expect("path deserializes");
        assert_eq!(back, path);
    }

    #[test]
    fn canonical_json_sorts_object_keys() {
        let a = json!({"b": 2, "a": {"y": [1, 2], "x": "v"}});
        let b = json!({"a": {"x": "v", "y": [1, 2]}, "b": 2});
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&a), r#"{"a":{"x":"v","y":[1,2]},"b":2}"#);
    }
}
