use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::composer::ComposedSchema;
use crate::error::Result;
use crate::operation::{Field, OperationKind, Selection, VariableDefinition};
use crate::query_executor::delegate_to_schema;
use crate::schema::TypeRef;
use crate::transform::TransformedSchema;
use crate::{GraphQLError, PathSegment, Variables};

/// Request-scoped state shared by every resolver invocation.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub variables: Variables,
    pub variable_definitions: Vec<VariableDefinition>,
}

/// Where in the client operation a resolver was invoked.
pub struct ResolveInfo<'a> {
    pub field: &'a Field,
    /// The client's sub-selection, merged across repeated occurrences of the field.
    pub selection_set: &'a [Selection],
    pub parent_type: &'a str,
    pub return_type: &'a TypeRef,
    pub path: &'a [PathSegment],
    pub schema: &'a ComposedSchema,
}

/// A value fetched by a resolver, tagged with the subschema it came from so the
/// executor can keep completing beneath it.
pub struct Resolved {
    pub value: Value,
    pub source: Arc<TransformedSchema>,
    pub errors: Vec<GraphQLError>,
}

#[async_trait]
pub trait FieldResolver {
    async fn resolve(
        &self,
        parent: &Map<String, Value>,
        args: &Map<String, Value>,
        context: &RequestContext,
        info: &ResolveInfo<'_>,
    ) -> Result<Resolved>;
}

pub struct ResolverEntry {
    /// Parent fields the resolver needs, e.g. `{ id }`.
    pub selection_set: String,
    pub resolver: Arc<dyn FieldResolver + Send + Sync>,
}

/// Resolvers by type name, then field name.
pub type ResolverMap = HashMap<String, HashMap<String, ResolverEntry>>;

/// Builds the lookup argument from the parent: `argument: "where.id"` with
/// `parent_field: id` produces `{ where: { id: parent.id } }`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct KeyMapping {
    pub argument: String,
    pub parent_field: String,
}

/// Joins a parent object to a single entity fetched from another subschema by
/// identifier.
pub struct DelegatingResolver {
    target: Arc<TransformedSchema>,
    field_name: String,
    key: KeyMapping,
    forward_arguments: Vec<String>,
}

impl DelegatingResolver {
    pub fn new(
        target: Arc<TransformedSchema>,
        field_name: &str,
        key: KeyMapping,
        forward_arguments: Vec<String>,
    ) -> Self {
        DelegatingResolver {
            target,
            field_name: field_name.to_string(),
            key,
            forward_arguments,
        }
    }

    pub fn target(&self) -> &Arc<TransformedSchema> {
        &self.target
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// Arguments for the delegated field. Optional client arguments are only
    /// forwarded when they carry a value.
    pub fn delegated_arguments(
        &self,
        parent: &Map<String, Value>,
        args: &Map<String, Value>,
    ) -> Option<Map<String, Value>> {
        let key = parent.get(&self.key.parent_field).filter(|key| !key.is_null())?;

        let mut delegated = Map::new();
        insert_path(&mut delegated, &self.key.argument, key.clone());
        for name in &self.forward_arguments {
            if let Some(value) = args.get(name).filter(|value| !value.is_null()) {
                delegated.insert(name.clone(), value.clone());
            }
        }
        Some(delegated)
    }
}

#[async_trait]
impl FieldResolver for DelegatingResolver {
    async fn resolve(
        &self,
        parent: &Map<String, Value>,
        args: &Map<String, Value>,
        context: &RequestContext,
        info: &ResolveInfo<'_>,
    ) -> Result<Resolved> {
        let Some(arguments) = self.delegated_arguments(parent, args) else {
            return Ok(Resolved {
                value: Value::Null,
                source: self.target.clone(),
                errors: Vec::new(),
            });
        };

        delegate_to_schema(
            &self.target,
            OperationKind::Query,
            &self.field_name,
            arguments,
            context,
            info,
        )
        .await
    }
}

fn insert_path(target: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            target.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = target
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(child) = child {
                insert_path(child, rest, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{cms_schema, recording};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn resolver() -> DelegatingResolver {
        let cms = cms_schema(recording());
        DelegatingResolver::new(
            cms,
            "CMS_product",
            KeyMapping {
                argument: "where.id".to_string(),
                parent_field: "id".to_string(),
            },
            vec!["stage".to_string()],
        )
    }

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn maps_parent_identifier_into_nested_argument() {
        let arguments = resolver()
            .delegated_arguments(&object(json!({ "id": "item-1" })), &Map::new())
            .unwrap();

        assert_eq!(json!(arguments), json!({ "where": { "id": "item-1" } }));
    }

    #[test]
    fn forwards_optional_arguments_only_when_present() {
        let resolver = resolver();
        let parent = object(json!({ "id": "item-1" }));

        let with_stage = resolver
            .delegated_arguments(&parent, &object(json!({ "stage": "DRAFT" })))
            .unwrap();
        assert_eq!(
            json!(with_stage),
            json!({ "where": { "id": "item-1" }, "stage": "DRAFT" })
        );

        let null_stage = resolver
            .delegated_arguments(&parent, &object(json!({ "stage": null })))
            .unwrap();
        assert!(!null_stage.contains_key("stage"));
    }

    #[test]
    fn skips_delegation_without_parent_key() {
        assert!(resolver()
            .delegated_arguments(&object(json!({ "id": null })), &Map::new())
            .is_none());
    }
}
