use crate::cache::CacheKey;
use crate::json_ext::TYPENAME;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json_bytes::{ByteString, Value};

/// One value held in a record slot.
///
/// Nested objects never appear here: normalization replaces every entity
/// with a [`Ref`](StoreValue::Ref), which is what lets a single mutation be
/// visible to every query reading that entity. `Json` carries opaque custom
/// scalar payloads, `Error` marks a slot whose response value diverged from
/// the selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(ByteString),
    List(Vec<StoreValue>),
    Ref(CacheKey),
    Json(Value),
    Error,
}

impl StoreValue {
    /// Convert a scalar JSON value. Returns `None` for objects, which must go
    /// through normalization instead.
    pub(crate) fn from_scalar(value: Value) -> Option<StoreValue> {
        match value {
            Value::Null => Some(StoreValue::Null),
            Value::Bool(b) => Some(StoreValue::Bool(b)),
            Value::Number(n) => Some(StoreValue::Number(n)),
            Value::String(s) => Some(StoreValue::String(s)),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// The scalar JSON value stored here, if this is a scalar slot.
    pub(crate) fn as_scalar(&self) -> Option<Value> {
        match self {
            StoreValue::Null => Some(Value::Null),
            StoreValue::Bool(b) => Some(Value::Bool(*b)),
            StoreValue::Number(n) => Some(Value::Number(n.clone())),
            StoreValue::String(s) => Some(Value::String(s.clone())),
            StoreValue::List(_) | StoreValue::Ref(_) | StoreValue::Json(_) | StoreValue::Error => {
                None
            }
        }
    }

    pub fn as_ref_key(&self) -> Option<&CacheKey> {
        match self {
            StoreValue::Ref(key) => Some(key),
            _ => None,
        }
    }
}

/// The flat field-slot map for one entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: IndexMap<String, StoreValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, slot: &str) -> Option<&StoreValue> {
        self.fields.get(slot)
    }

    pub fn insert(&mut self, slot: impl Into<String>, value: StoreValue) -> Option<StoreValue> {
        self.fields.insert(slot.into(), value)
    }

    /// Field-level merge: slots present in `incoming` overwrite, slots absent
    /// from it are left untouched.
    pub fn merge(&mut self, incoming: Record) {
        for (slot, value) in incoming.fields {
            self.fields.insert(slot, value);
        }
    }

    /// The entity's stored discriminator, when one was normalized in.
    pub fn typename(&self) -> Option<&str> {
        match self.fields.get(TYPENAME) {
            Some(StoreValue::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &StoreValue)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, StoreValue)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, StoreValue)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// A batch of records produced by one normalization pass, merged into the
/// store as a single atomic write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordBatch {
    records: IndexMap<CacheKey, Record>,
}

impl RecordBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one field slot into the batch. Within a batch the last write to
    /// a slot wins.
    pub fn insert_field(&mut self, key: &CacheKey, slot: impl Into<String>, value: StoreValue) {
        self.records
            .entry(key.clone())
            .or_default()
            .insert(slot, value);
    }

    /// Merge a whole record into the batch, field by field.
    pub fn insert_record(&mut self, key: CacheKey, record: Record) {
        self.records.entry(key).or_default().merge(record);
    }

    pub fn get(&self, key: &CacheKey) -> Option<&Record> {
        self.records.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.records.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CacheKey, &Record)> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl IntoIterator for RecordBatch {
    type Item = (CacheKey, Record);
    type IntoIter = indexmap::map::IntoIter<CacheKey, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl FromIterator<(CacheKey, Record)> for RecordBatch {
    fn from_iter<I: IntoIterator<Item = (CacheKey, Record)>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json_bytes::json;

    fn record(entries: &[(&str, StoreValue)]) -> Record {
        entries
            .iter()
            .map(|(slot, value)| (slot.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn merge_overwrites_present_slots_and_keeps_absent_ones() {
        let mut base = record(&[
            ("x", StoreValue::String("old".into())),
            ("y", StoreValue::Number(1.into())),
        ]);
        base.merge(record(&[("x", StoreValue::String("new".into()))]));

        assert_eq!(base.get("x"), Some(&StoreValue::String("new".into())));
        assert_eq!(base.get("y"), Some(&StoreValue::Number(1.into())));
    }

    #[test]
    fn merge_is_idempotent() {
        let incoming = record(&[
            ("id", StoreValue::String("1".into())),
            ("name", StoreValue::String("Ann".into())),
        ]);

        let mut once = Record::new();
        once.merge(incoming.clone());
        let mut twice = once.clone();
        twice.merge(incoming);

        assert_eq!(once, twice);
    }

    #[test]
    fn stored_null_is_distinct_from_an_absent_slot() {
        let r = record(&[("name", StoreValue::Null)]);
        assert_eq!(r.get("name"), Some(&StoreValue::Null));
        assert_eq!(r.get("email"), None);
    }

    #[test]
    fn typename_reads_the_discriminator_slot() {
        let r = record(&[("__typename", StoreValue::String("User".into()))]);
        assert_eq!(r.typename(), Some("User"));
        assert_eq!(Record::new().typename(), None);
    }

    #[test]
    fn batch_last_write_wins_per_slot() {
        let key = CacheKey::from("User:1");
        let mut batch = RecordBatch::new();
        batch.insert_field(&key, "name", StoreValue::String("Ann".into()));
        batch.insert_field(&key, "name", StoreValue::String("Annie".into()));
        batch.insert_field(&key, "id", StoreValue::String("1".into()));

        let record = batch.get(&key).expect("record accumulated");
        assert_eq!(record.get("name"), Some(&StoreValue::String("Annie".into())));
        assert_eq!(record.len(), 2);
    }

    #[test]
    fn records_round_trip_through_serde() {
        let r = record(&[
            ("id", StoreValue::String("1".into())),
            ("friend", StoreValue::Ref(CacheKey::from("User:2"))),
            ("meta", StoreValue::Json(json!({"a": [1, 2]}))),
            ("broken", StoreValue::Error),
        ]);
        let text = serde_json::to_string(&r).expect("record serializes");
        let back: Record = serde_json::from_str(&text).expect("record deserializes");
        assert_eq!(back, r);
    }
}
