use crate::cache::{CacheKey, RecordBatch, StoreValue, TypePolicies};
use crate::error::NormalizationError;
use crate::json_ext::{Object, Path, PathElement, TYPENAME};
use crate::spec::{Field, Operation, Selection};
use serde_json_bytes::Value;

/// The output of one normalization pass: the root record key, the flat
/// record batch ready for the store, and every per-field divergence found
/// along the way.
#[derive(Debug)]
pub struct Normalized {
    pub root_key: CacheKey,
    pub batch: RecordBatch,
    pub errors: Vec<NormalizationError>,
}

/// Flatten a response tree into records, walking the tree in lock-step with
/// the selection that produced it.
///
/// Every object value is keyed, normalized into its own record and replaced
/// by a reference in its parent slot. A field whose value diverges from the
/// selection is stored as an error marker; the rest of the tree still
/// normalizes.
#[tracing::instrument(skip_all, level = "trace")]
pub fn normalize(operation: &Operation, policies: &TypePolicies, data: Value) -> Normalized {
    let root_key = CacheKey::root_for(operation.kind);
    let mut normalizer = Normalizer {
        policies,
        batch: RecordBatch::new(),
        errors: Vec::new(),
    };

    match data {
        Value::Object(mut input) => {
            let mut path = Path::empty();
            normalizer.batch.insert_field(
                &root_key,
                TYPENAME,
                StoreValue::String(operation.kind.root_type_name().into()),
            );
            normalizer.walk(
                &operation.selection_set,
                &mut input,
                &root_key,
                Some(operation.kind.root_type_name()),
                &mut path,
            );
        }
        Value::Null => {}
        _ => {
            failfast_debug!("response data is not an object, nothing to normalize");
            normalizer.errors.push(NormalizationError::DivergentField {
                path: Path::empty(),
                reason: "response data is not an object".to_string(),
            });
        }
    }

    Normalized {
        root_key,
        batch: normalizer.batch,
        errors: normalizer.errors,
    }
}

struct Normalizer<'a> {
    policies: &'a TypePolicies,
    batch: RecordBatch,
    errors: Vec<NormalizationError>,
}

impl Normalizer<'_> {
    fn walk(
        &mut self,
        selection_set: &[Selection],
        input: &mut Object,
        key: &CacheKey,
        typename: Option<&str>,
        path: &mut Path,
    ) {
        for selection in selection_set {
            match selection {
                Selection::Field(field) => {
                    let Some((_, value)) = input.remove_entry(field.response_key()) else {
                        // absent from the response: nothing is stored, a later
                        // read reports the slot as missing
                        continue;
                    };
                    path.push(PathElement::Key(field.response_key().to_string()));
                    let tail = field.storage_key();
                    let stored = self.normalize_value(field, value, key, path, &tail);
                    self.batch.insert_field(key, tail, stored);
                    path.pop();
                }
                Selection::InlineFragment(fragment) => match typename {
                    Some(t) if t == fragment.type_condition => {
                        self.walk(&fragment.selection_set, input, key, typename, path);
                    }
                    Some(_) => {}
                    None => {
                        self.errors
                            .push(NormalizationError::MissingTypename { path: path.clone() });
                    }
                },
            }
        }
    }

    fn normalize_value(
        &mut self,
        field: &Field,
        value: Value,
        parent_key: &CacheKey,
        path: &mut Path,
        tail: &str,
    ) -> StoreValue {
        match value {
            Value::Null => StoreValue::Null,
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (index, item) in items.into_iter().enumerate() {
                    path.push(PathElement::Index(index));
                    let element_tail = format!("{}.{}", tail, index);
                    out.push(self.normalize_value(field, item, parent_key, path, &element_tail));
                    path.pop();
                }
                StoreValue::List(out)
            }
            Value::Object(mut object) => {
                let Some(selection_set) = field.selection_set.as_deref() else {
                    // no sub-selection: an opaque custom scalar payload,
                    // stored verbatim
                    return StoreValue::Json(Value::Object(object));
                };

                let typename = object
                    .get(TYPENAME)
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                let key = self
                    .policies
                    .resolve(typename.as_deref(), &object, parent_key, tail);
                if let Some(t) = typename.as_deref() {
                    self.batch
                        .insert_field(&key, TYPENAME, StoreValue::String(t.into()));
                }
                self.walk(selection_set, &mut object, &key, typename.as_deref(), path);
                StoreValue::Ref(key)
            }
            scalar => {
                if field.selection_set.is_some() {
                    failfast_debug!(
                        "expected an object for composite field '{}' at {}",
                        field.name,
                        path
                    );
                    self.errors.push(NormalizationError::DivergentField {
                        path: path.clone(),
                        reason: format!(
                            "expected an object for composite field '{}'",
                            field.name
                        ),
                    });
                    return StoreValue::Error;
                }
                StoreValue::from_scalar(scalar)
                    .expect("non-composite JSON values are scalars; qed")
            }
        }
    }
}
