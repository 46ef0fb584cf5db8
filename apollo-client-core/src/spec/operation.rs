use crate::spec::Selection;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

// Spec: https://spec.graphql.org/draft/#sec-Language.Operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    /// The conventional name of the root object type for this kind, used to
    /// satisfy type conditions at the top of a selection.
    pub fn root_type_name(&self) -> &'static str {
        match self {
            OperationKind::Query => "Query",
            OperationKind::Mutation => "Mutation",
            OperationKind::Subscription => "Subscription",
        }
    }
}

/// One executable operation, as produced by a typed query definition.
#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Operation {
    #[builder(default = OperationKind::Query)]
    pub kind: OperationKind,

    #[builder(default)]
    pub name: Option<String>,

    pub selection_set: Vec<Selection>,
}
