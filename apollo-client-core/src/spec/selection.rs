use crate::json_ext::{canonical_json, Object};
use crate::spec::FieldType;
use serde_json_bytes::Value;
use typed_builder::TypedBuilder;

/// One requested field or type-conditioned fragment inside a selection set.
///
/// Selections are supplied fully formed by generated/typed query definitions;
/// this crate never parses documents.
#[derive(Debug, Clone)]
pub enum Selection {
    Field(Field),
    InlineFragment(InlineFragment),
}

#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Field {
    /// The schema field name.
    pub name: String,

    /// The client-side output name, when renamed by the query.
    #[builder(default)]
    pub alias: Option<String>,

    /// Concrete argument values, already resolved from variables by the
    /// typed selection source.
    #[builder(default)]
    pub arguments: Object,

    pub field_type: FieldType,

    /// Sub-selection for composite fields, `None` for scalars.
    #[builder(default)]
    pub selection_set: Option<Vec<Selection>>,
}

#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct InlineFragment {
    /// The type name this fragment's selections apply to.
    pub type_condition: String,

    pub selection_set: Vec<Selection>,
}

impl Field {
    /// The key this field's value appears under in the output tree.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// The slot this field occupies in its entity's record. Two selections of
    /// one logical field with different arguments occupy different slots; the
    /// alias is client-side renaming and plays no part here.
    pub fn storage_key(&self) -> String {
        if self.arguments.is_empty() {
            self.name.clone()
        } else {
            format!(
                "{}({})",
                self.name,
                canonical_json(&Value::Object(self.arguments.clone()))
            )
        }
    }
}

impl From<Field> for Selection {
    fn from(field: Field) -> Self {
        Selection::Field(field)
    }
}

impl From<InlineFragment> for Selection {
    fn from(fragment: InlineFragment) -> Self {
        Selection::InlineFragment(fragment)
    }
}
