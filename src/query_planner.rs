use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::composer::{ComposedSchema, RESERVED_PREFIX};
use crate::error::{GatewayError, Result};
use crate::operation::{
    Field, InlineFragment, InputValue, Operation, OperationKind, Selection, VariableDefinition,
    collect_selection_variables, print_operation, should_include,
};
use crate::remote_schema::UpstreamRequest;
use crate::resolver::RequestContext;
use crate::schema::SchemaDescription;
use crate::transform::TransformedSchema;
use crate::Variables;

/// Alias under which delegated selections report the concrete type name.
pub const TYPENAME_ALIAS: &str = "_stitch_typename";
/// Alias of the single root field in a resolver's delegated operation.
pub const RESULT_ALIAS: &str = "_stitch_result";
const ARGUMENT_PREFIX: &str = "_stitch_arg_";

/// Alias of a parent field fetched on behalf of an extension resolver.
pub fn required_alias(field_name: &str) -> String {
    format!("{}parent_{}", RESERVED_PREFIX, field_name)
}

#[derive(Clone, Debug, PartialEq)]
pub enum RootTarget {
    Typename,
    Introspection,
    /// Index into [`QueryPlan::fetches`].
    Fetch(usize),
}

/// A root field of the client operation after `@skip`/`@include` and merging.
#[derive(Clone, Debug)]
pub struct RootField {
    pub field: Field,
    pub target: RootTarget,
}

/// One upstream request covering every root field a subschema owns.
pub struct Fetch {
    pub subschema: Arc<TransformedSchema>,
    pub request: UpstreamRequest,
}

pub struct QueryPlan {
    pub kind: OperationKind,
    pub root_fields: Vec<RootField>,
    pub fetches: Vec<Fetch>,
}

pub trait QueryPlanner {
    fn plan_query(
        &self,
        operation: &Operation,
        schema: &ComposedSchema,
        variables: &Variables,
    ) -> Result<QueryPlan>;
}

/// Groups root fields by owning subschema and translates each group back into
/// the owner's namespace.
pub struct StitchingQueryPlanner;

impl StitchingQueryPlanner {
    pub fn new() -> Self {
        StitchingQueryPlanner
    }
}

impl Default for StitchingQueryPlanner {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryPlanner for StitchingQueryPlanner {
    fn plan_query(
        &self,
        operation: &Operation,
        schema: &ComposedSchema,
        variables: &Variables,
    ) -> Result<QueryPlan> {
        let kind = operation.kind;
        let root_type = schema.description.root_type_name(kind).ok_or_else(|| {
            GatewayError::Validation(format!("Schema is not configured for {}s.", kind.as_str()))
        })?;

        let mut merged = Vec::new();
        collect_root_fields(
            &schema.description,
            root_type,
            &operation.selection_set,
            variables,
            &mut merged,
        );

        let mut groups: Vec<(Arc<TransformedSchema>, Vec<Field>)> = Vec::new();
        let mut root_fields = Vec::with_capacity(merged.len());
        for field in merged {
            let target = match field.name.as_str() {
                "__typename" => RootTarget::Typename,
                "__schema" | "__type" if kind == OperationKind::Query => RootTarget::Introspection,
                name => {
                    let owner = schema.root_owner(kind, name).ok_or_else(|| {
                        GatewayError::Validation(format!(
                            "Cannot query field \"{}\" on type \"{}\".",
                            name, root_type
                        ))
                    })?;
                    let index = match groups.iter().position(|(subschema, _)| Arc::ptr_eq(subschema, owner)) {
                        Some(index) => index,
                        None => {
                            groups.push((owner.clone(), Vec::new()));
                            groups.len() - 1
                        }
                    };
                    groups[index].1.push(field.clone());
                    RootTarget::Fetch(index)
                }
            };
            root_fields.push(RootField { field, target });
        }

        let fetches = groups
            .into_iter()
            .map(|(subschema, fields)| {
                let request = root_request(schema, &subschema, operation, root_type, &fields, variables)?;
                debug!(subschema = subschema.name(), query = %request.query, "Planned upstream fetch");
                Ok(Fetch { subschema, request })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(QueryPlan {
            kind,
            root_fields,
            fetches,
        })
    }
}

fn collect_root_fields(
    description: &SchemaDescription,
    root_type: &str,
    selections: &[Selection],
    variables: &Variables,
    out: &mut Vec<Field>,
) {
    for selection in selections {
        if !should_include(selection.directives(), variables) {
            continue;
        }
        match selection {
            Selection::Field(field) => {
                match out
                    .iter_mut()
                    .find(|seen| seen.response_key() == field.response_key())
                {
                    Some(seen) => seen.selection_set.extend(field.selection_set.iter().cloned()),
                    None => out.push(Field {
                        directives: Vec::new(),
                        ..field.clone()
                    }),
                }
            }
            Selection::InlineFragment(fragment) => {
                let applies = fragment
                    .type_condition
                    .as_deref()
                    .is_none_or(|condition| description.is_possible_type(condition, root_type));
                if applies {
                    collect_root_fields(description, root_type, &fragment.selection_set, variables, out);
                }
            }
        }
    }
}

fn root_request(
    schema: &ComposedSchema,
    subschema: &TransformedSchema,
    operation: &Operation,
    root_type: &str,
    fields: &[Field],
    variables: &Variables,
) -> Result<UpstreamRequest> {
    let mut selections = Vec::with_capacity(fields.len());
    for field in fields {
        let definition = schema.description.field(root_type, &field.name).ok_or_else(|| {
            GatewayError::Validation(format!(
                "Cannot query field \"{}\" on type \"{}\".",
                field.name, root_type
            ))
        })?;
        let original = subschema
            .original_root_field(operation.kind, &field.name)
            .unwrap_or(&field.name);
        selections.push(Selection::Field(Field {
            alias: Some(field.response_key().to_string()),
            name: original.to_string(),
            arguments: field.arguments.clone(),
            directives: Vec::new(),
            selection_set: prepare_selection_set(
                schema,
                subschema,
                definition.ty.named_type(),
                &field.selection_set,
            ),
        }));
    }

    let (definitions, values) =
        forwarded_variables(subschema, &selections, &operation.variable_definitions, variables);
    Ok(UpstreamRequest {
        query: print_operation(operation.kind, &definitions, &selections),
        variables: values,
    })
}

/// Builds a resolver's delegated operation: `field_name` on `target` aliased as
/// [`RESULT_ALIAS`], every argument passed as a variable, and the client's
/// sub-selection rewritten for the target.
pub fn plan_delegation(
    schema: &ComposedSchema,
    target: &TransformedSchema,
    kind: OperationKind,
    field_name: &str,
    arguments: Map<String, Value>,
    selection_set: &[Selection],
    context: &RequestContext,
) -> Result<UpstreamRequest> {
    let definition = target
        .description
        .root_type(kind)
        .and_then(|root| root.field(field_name))
        .ok_or_else(|| {
            GatewayError::InvalidExtension(format!(
                "{} has no {} field {}",
                target.name(),
                kind.as_str(),
                field_name
            ))
        })?;
    let original = target.original_root_field(kind, field_name).unwrap_or(field_name);

    let mut definitions = Vec::with_capacity(arguments.len());
    let mut values = Variables::new();
    let mut field_arguments = Vec::with_capacity(arguments.len());
    for (name, value) in arguments {
        let argument = definition.argument(&name).ok_or_else(|| {
            GatewayError::InvalidExtension(format!(
                "{} field {} has no argument {}",
                target.name(),
                field_name,
                name
            ))
        })?;
        let variable = format!("{}{}", ARGUMENT_PREFIX, name);
        definitions.push(VariableDefinition {
            name: variable.clone(),
            ty: target.original_type_ref(&argument.ty),
            default_value: None,
        });
        values.insert(variable.clone(), value);
        field_arguments.push((name, InputValue::Variable(variable)));
    }

    let selections = vec![Selection::Field(Field {
        alias: Some(RESULT_ALIAS.to_string()),
        name: original.to_string(),
        arguments: field_arguments,
        directives: Vec::new(),
        selection_set: prepare_selection_set(
            schema,
            target,
            definition.ty.named_type(),
            selection_set,
        ),
    })];

    let (client_definitions, client_values) = forwarded_variables(
        target,
        &selections,
        &context.variable_definitions,
        &context.variables,
    );
    definitions.extend(client_definitions);
    values.extend(client_values);

    Ok(UpstreamRequest {
        query: print_operation(kind, &definitions, &selections),
        variables: values,
    })
}

/// Rewrites a client selection on `parent_type` for delegation to `subschema`.
///
/// Extension fields are replaced by their resolver's required parent fields,
/// type conditions are renamed back, and `__typename` is requested wherever the
/// concrete type is needed to complete the value.
fn prepare_selection_set(
    schema: &ComposedSchema,
    subschema: &TransformedSchema,
    parent_type: &str,
    selections: &[Selection],
) -> Vec<Selection> {
    if selections.is_empty() {
        return Vec::new();
    }

    let mut needs_typename = schema
        .description
        .get_type(parent_type)
        .is_some_and(|typedef| typedef.kind.is_abstract());
    let mut out = Vec::with_capacity(selections.len());

    for selection in selections {
        match selection {
            Selection::Field(field) if field.name == "__typename" => {
                out.push(Selection::Field(field.clone()));
            }
            Selection::Field(field) => {
                if let Some(binding) = schema.extension(parent_type, &field.name) {
                    for required in &binding.required_selection {
                        let alias = required_alias(&required.name);
                        let present = out.iter().any(|selection| {
                            matches!(selection, Selection::Field(seen) if seen.alias.as_deref() == Some(alias.as_str()))
                        });
                        if !present {
                            out.push(Selection::Field(Field {
                                alias: Some(alias),
                                ..required.clone()
                            }));
                        }
                    }
                    continue;
                }
                let Some(definition) = schema.description.field(parent_type, &field.name) else {
                    continue;
                };
                out.push(Selection::Field(Field {
                    selection_set: prepare_selection_set(
                        schema,
                        subschema,
                        definition.ty.named_type(),
                        &field.selection_set,
                    ),
                    ..field.clone()
                }));
            }
            Selection::InlineFragment(fragment) => {
                needs_typename = true;
                let condition = fragment.type_condition.as_deref().unwrap_or(parent_type);
                out.push(Selection::InlineFragment(InlineFragment {
                    type_condition: fragment
                        .type_condition
                        .as_deref()
                        .map(|name| subschema.original_type_name(name).to_string()),
                    directives: fragment.directives.clone(),
                    selection_set: prepare_selection_set(
                        schema,
                        subschema,
                        condition,
                        &fragment.selection_set,
                    ),
                }));
            }
        }
    }

    if needs_typename || out.is_empty() {
        out.push(Selection::Field(Field {
            alias: Some(TYPENAME_ALIAS.to_string()),
            ..Field::new("__typename")
        }));
    }
    out
}

/// Declarations and values for the client variables `selections` reference,
/// typed in the subschema's own namespace.
fn forwarded_variables(
    subschema: &TransformedSchema,
    selections: &[Selection],
    definitions: &[VariableDefinition],
    variables: &Variables,
) -> (Vec<VariableDefinition>, Variables) {
    let mut used = BTreeSet::new();
    collect_selection_variables(selections, &mut used);

    let mut forwarded = Vec::new();
    let mut values = Variables::new();
    for definition in definitions.iter().filter(|d| used.contains(&d.name)) {
        forwarded.push(VariableDefinition {
            name: definition.name.clone(),
            ty: subschema.original_type_ref(&definition.ty),
            default_value: None,
        });
        if let Some(value) = variables.get(&definition.name) {
            values.insert(definition.name.clone(), value.clone());
        }
    }
    (forwarded, values)
}
