use crate::cache::{CacheKey, StoreReadGuard, StoreValue};
use crate::error::{Error, StructuralError};
use crate::json_ext::{Object, Path, PathElement};
use crate::response::Response;
use crate::spec::{Field, Operation, Selection};
use serde_json_bytes::{ByteString, Value};
use std::collections::HashSet;

/// The result of replaying a selection against a store snapshot.
///
/// Missing fields are reported, never defaulted; `touched` is every record
/// key visited, the basis of a watch's dependency set.
#[derive(Debug)]
pub struct ReadResult {
    pub data: Value,
    pub missing: Vec<Path>,
    pub errors: Vec<Error>,
    pub touched: HashSet<CacheKey>,
}

impl ReadResult {
    /// Whether the snapshot fully answered the selection.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Fold the result into a caller-facing response; missing fields become
    /// field-level errors.
    pub fn into_response(self) -> Response {
        let mut errors = self.errors;
        errors.extend(self.missing.iter().map(Error::missing_field));
        Response {
            data: self.data,
            errors,
            extensions: Default::default(),
        }
    }
}

/// Replay `operation`'s selection against the store, reconstructing the
/// result tree from flat records.
///
/// Mirrors normalization in reverse: references recurse into their target
/// record, lists recurse element-wise preserving order, scalars are checked
/// strictly against the declared type. Cyclic entity graphs are walked by
/// key, so the only guard needed is the recursion depth limit for
/// self-referential selections.
#[tracing::instrument(skip_all, level = "trace")]
pub fn read_operation(
    operation: &Operation,
    guard: &StoreReadGuard<'_>,
    root: &CacheKey,
    max_depth: usize,
) -> Result<ReadResult, StructuralError> {
    let mut reader = Reader {
        guard,
        max_depth,
        missing: Vec::new(),
        errors: Vec::new(),
        touched: HashSet::new(),
    };
    let mut path = Path::empty();
    let data = match reader.read_entity(&operation.selection_set, root, &mut path, 0)? {
        Some(object) => Value::Object(object),
        None => Value::Null,
    };

    Ok(ReadResult {
        data,
        missing: reader.missing,
        errors: reader.errors,
        touched: reader.touched,
    })
}

struct Reader<'a, 'g> {
    guard: &'a StoreReadGuard<'g>,
    max_depth: usize,
    missing: Vec<Path>,
    errors: Vec<Error>,
    touched: HashSet<CacheKey>,
}

impl Reader<'_, '_> {
    fn read_entity(
        &mut self,
        selection_set: &[Selection],
        key: &CacheKey,
        path: &mut Path,
        depth: usize,
    ) -> Result<Option<Object>, StructuralError> {
        if depth > self.max_depth {
            return Err(StructuralError::RecursionLimitExceeded {
                max_depth: self.max_depth,
            });
        }
        self.touched.insert(key.clone());

        let guard = self.guard;
        let Some(record) = guard.get(key) else {
            self.record_all_missing(selection_set, path);
            return Ok(None);
        };

        let mut output = Object::new();
        self.read_selection_set(selection_set, record, &mut output, path, depth)?;
        Ok(Some(output))
    }

    fn read_selection_set(
        &mut self,
        selection_set: &[Selection],
        record: &crate::cache::Record,
        output: &mut Object,
        path: &mut Path,
        depth: usize,
    ) -> Result<(), StructuralError> {
        for selection in selection_set {
            match selection {
                Selection::Field(field) => {
                    path.push(PathElement::Key(field.response_key().to_string()));
                    match record.get(&field.storage_key()) {
                        None => self.missing.push(path.clone()),
                        Some(stored) => {
                            if let Some(value) = self.read_value(field, stored, path, depth)? {
                                output.insert(ByteString::from(field.response_key()), value);
                            }
                        }
                    }
                    path.pop();
                }
                Selection::InlineFragment(fragment) => match record.typename() {
                    Some(t) if t == fragment.type_condition => {
                        self.read_selection_set(
                            &fragment.selection_set,
                            record,
                            output,
                            path,
                            depth,
                        )?;
                    }
                    Some(_) => {}
                    None => {
                        failfast_debug!(
                            "record has no discriminator for type condition '{}' at {}",
                            fragment.type_condition,
                            path
                        );
                        self.errors.push(Error::field_mismatch(
                            path,
                            format!(
                                "no '__typename' in the record to apply the type condition '{}'",
                                fragment.type_condition
                            ),
                        ));
                    }
                },
            }
        }
        Ok(())
    }

    fn read_value(
        &mut self,
        field: &Field,
        stored: &StoreValue,
        path: &mut Path,
        depth: usize,
    ) -> Result<Option<Value>, StructuralError> {
        match stored {
            StoreValue::Null => Ok(Some(Value::Null)),
            StoreValue::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    path.push(PathElement::Index(index));
                    let value = self.read_value(field, item, path, depth)?;
                    // a per-field failure inside a list degrades that
                    // element to null so positions stay aligned
                    out.push(value.unwrap_or(Value::Null));
                    path.pop();
                }
                Ok(Some(Value::Array(out)))
            }
            StoreValue::Ref(target) => {
                let Some(selection_set) = field.selection_set.as_deref() else {
                    return Err(StructuralError::InconsistentRecord {
                        path: path.clone(),
                        reason: "a reference is stored for a field without a sub-selection"
                            .to_string(),
                    });
                };
                Ok(self
                    .read_entity(selection_set, target, path, depth + 1)?
                    .map(Value::Object))
            }
            StoreValue::Json(value) => Ok(Some(value.clone())),
            StoreValue::Error => {
                self.errors.push(Error::field_mismatch(
                    path,
                    "value failed to normalize when it was fetched",
                ));
                Ok(None)
            }
            scalar => {
                let value = scalar
                    .as_scalar()
                    .expect("remaining variants are scalars; qed");
                if field.field_type.accepts_scalar(&value) {
                    Ok(Some(value))
                } else {
                    failfast_debug!(
                        "stored value does not match the declared type of '{}' at {}",
                        field.name,
                        path
                    );
                    self.errors.push(Error::field_mismatch(
                        path,
                        format!(
                            "stored value does not match the declared type of '{}'",
                            field.name
                        ),
                    ));
                    Ok(None)
                }
            }
        }
    }

    fn record_all_missing(&mut self, selection_set: &[Selection], path: &mut Path) {
        for selection in selection_set {
            match selection {
                Selection::Field(field) => {
                    path.push(PathElement::Key(field.response_key().to_string()));
                    self.missing.push(path.clone());
                    path.pop();
                }
                Selection::InlineFragment(fragment) => {
                    self.record_all_missing(&fragment.selection_set, path);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{normalize, RecordBatch, RecordStore, TypePolicies};
    use crate::spec::{FieldType, OperationKind};
    use crate::json_ext::TYPENAME;
    use serde_json_bytes::json;

    fn scalar(name: &str, field_type: FieldType) -> Selection {
        Selection::Field(Field::builder().name(name).field_type(field_type).build())
    }

    fn typename() -> Selection {
        scalar(TYPENAME, FieldType::String)
    }

    fn object(name: &str, type_name: &str, selection_set: Vec<Selection>) -> Selection {
        Selection::Field(
            Field::builder()
                .name(name)
                .field_type(FieldType::Named(type_name.to_string()))
                .selection_set(selection_set)
                .build(),
        )
    }

    fn user_query() -> Operation {
        Operation::builder()
            .kind(OperationKind::Query)
            .selection_set(vec![object(
                "user",
                "User",
                vec![
                    typename(),
                    scalar("id", FieldType::Id),
                    scalar("name", FieldType::String),
                ],
            )])
            .build()
    }

    async fn seeded_store(operation: &Operation, data: Value) -> RecordStore {
        let store = RecordStore::new();
        let normalized = normalize(operation, &TypePolicies::default(), data);
        assert!(normalized.errors.is_empty());
        store.write(normalized.batch).await;
        store
    }

    #[tokio::test]
    async fn round_trip_reproduces_the_original_response() {
        let operation = user_query();
        let data = json!({"user": {"__typename": "User", "id": "1", "name": "Ann"}});
        let store = seeded_store(&operation, data.clone()).await;

        let guard = store.read().await;
        let result = read_operation(
            &operation,
            &guard,
            &CacheKey::root_for(OperationKind::Query),
            32,
        )
        .expect("read succeeds");

        assert!(result.is_complete());
        assert!(result.errors.is_empty());
        assert_eq!(result.data, data);
        assert!(result.touched.contains(&CacheKey::from("ROOT_QUERY")));
        assert!(result.touched.contains(&CacheKey::from("User:1")));
    }

    #[tokio::test]
    async fn absent_root_reports_every_field_missing_without_failing() {
        let operation = user_query();
        let store = RecordStore::new();
        let guard = store.read().await;
        let result = read_operation(
            &operation,
            &guard,
            &CacheKey::root_for(OperationKind::Query),
            32,
        )
        .expect("read still succeeds");

        assert_eq!(result.data, Value::Null);
        assert_eq!(result.missing, vec![Path::from("user")]);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn partially_fetched_entities_report_only_the_absent_slots() {
        let operation = user_query();
        let data = json!({"user": {"__typename": "User", "id": "1"}});
        let store = seeded_store(&operation, data).await;

        let guard = store.read().await;
        let result = read_operation(
            &operation,
            &guard,
            &CacheKey::root_for(OperationKind::Query),
            32,
        )
        .expect("read succeeds");

        assert_eq!(result.missing, vec![Path::from("user/name")]);
        assert_eq!(
            result.data,
            json!({"user": {"__typename": "User", "id": "1"}}),
        );
    }

    #[tokio::test]
    async fn stored_null_reads_back_as_null_not_missing() {
        let operation = user_query();
        let data = json!({"user": {"__typename": "User", "id": "1", "name": null}});
        let store = seeded_store(&operation, data).await;

        let guard = store.read().await;
        let result = read_operation(
            &operation,
            &guard,
            &CacheKey::root_for(OperationKind::Query),
            32,
        )
        .expect("read succeeds");

        assert!(result.is_complete());
        assert_eq!(
            result.data,
            json!({"user": {"__typename": "User", "id": "1", "name": null}}),
        );
    }

    #[tokio::test]
    async fn scalar_type_mismatches_are_field_errors_not_casts() {
        let operation = Operation::builder()
            .selection_set(vec![object(
                "user",
                "User",
                vec![typename(), scalar("id", FieldType::Id), scalar("age", FieldType::Int)],
            )])
            .build();
        // the store was written by an older selection where age was a string
        let mut batch = RecordBatch::new();
        let root = CacheKey::root_for(OperationKind::Query);
        batch.insert_field(&root, "user", StoreValue::Ref(CacheKey::from("User:1")));
        let user = CacheKey::from("User:1");
        batch.insert_field(&user, TYPENAME, StoreValue::String("User".into()));
        batch.insert_field(&user, "id", StoreValue::String("1".into()));
        batch.insert_field(&user, "age", StoreValue::String("nine".into()));
        let store = RecordStore::new();
        store.write(batch).await;

        let guard = store.read().await;
        let result = read_operation(&operation, &guard, &root, 32).expect("read succeeds");

        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].path, Some(Path::from("user/age")));
        assert_eq!(
            result.data,
            json!({"user": {"__typename": "User", "id": "1"}}),
        );
    }

    #[tokio::test]
    async fn cyclic_entity_graphs_read_back_up_to_the_depth_limit() {
        // A references B, B references A; the data itself is cycle-free to
        // build, the cycle exists only between records
        let mut batch = RecordBatch::new();
        let root = CacheKey::root_for(OperationKind::Query);
        let a = CacheKey::from("User:a");
        let b = CacheKey::from("User:b");
        batch.insert_field(&root, "user", StoreValue::Ref(a.clone()));
        batch.insert_field(&a, TYPENAME, StoreValue::String("User".into()));
        batch.insert_field(&a, "id", StoreValue::String("a".into()));
        batch.insert_field(&a, "friend", StoreValue::Ref(b.clone()));
        batch.insert_field(&b, TYPENAME, StoreValue::String("User".into()));
        batch.insert_field(&b, "id", StoreValue::String("b".into()));
        batch.insert_field(&b, "friend", StoreValue::Ref(a.clone()));
        let store = RecordStore::new();
        store.write(batch).await;

        // a bounded selection terminates before the guard trips
        let bounded = Operation::builder()
            .selection_set(vec![object(
                "user",
                "User",
                vec![
                    scalar("id", FieldType::Id),
                    object("friend", "User", vec![scalar("id", FieldType::Id)]),
                ],
            )])
            .build();
        let guard = store.read().await;
        let result = read_operation(&bounded, &guard, &root, 32).expect("bounded read succeeds");
        assert_eq!(
            result.data,
            json!({"user": {"id": "a", "friend": {"id": "b"}}}),
        );

        // an unbounded self-referential selection aborts with a structural
        // error instead of looping forever
        fn self_referential(depth: usize) -> Vec<Selection> {
            let mut set = vec![scalar("id", FieldType::Id)];
            if depth > 0 {
                set.push(object("friend", "User", self_referential(depth - 1)));
            }
            set
        }
        let deep = Operation::builder()
            .selection_set(vec![object("user", "User", self_referential(64))])
            .build();
        let err = read_operation(&deep, &guard, &root, 16).expect_err("depth limit trips");
        assert!(matches!(
            err,
            StructuralError::RecursionLimitExceeded { max_depth: 16 },
        ));
    }

    #[tokio::test]
    async fn dangling_references_surface_as_missing_fields() {
        let operation = user_query();
        let data = json!({"user": {"__typename": "User", "id": "1", "name": "Ann"}});
        let store = seeded_store(&operation, data).await;
        store.evict(&CacheKey::from("User:1")).await;

        let guard = store.read().await;
        let result = read_operation(
            &operation,
            &guard,
            &CacheKey::root_for(OperationKind::Query),
            32,
        )
        .expect("read succeeds");

        assert!(!result.is_complete());
        assert_eq!(
            result.missing,
            vec![
                Path::from("user/__typename"),
                Path::from("user/id"),
                Path::from("user/name"),
            ],
        );
    }
}
