use serde_json::{Map, Value};

use crate::error::{GatewayError, Result};
use crate::operation::{Field, Selection, should_include};
use crate::schema::{
    EnumValueDef, FieldDef, InputValueDef, SchemaDescription, TypeDef, TypeKind, TypeRef,
};
use crate::Variables;

struct DirectiveDef {
    name: &'static str,
    description: &'static str,
    locations: &'static [&'static str],
    args: Vec<InputValueDef>,
}

fn builtin_directives() -> Vec<DirectiveDef> {
    let condition = |description: &str| InputValueDef {
        name: "if".to_string(),
        description: Some(description.to_string()),
        ty: TypeRef::NonNull(Box::new(TypeRef::named("Boolean"))),
        default_value: None,
    };
    vec![
        DirectiveDef {
            name: "skip",
            description: "Directs the executor to skip this field or fragment when the `if` argument is true.",
            locations: &["FIELD", "FRAGMENT_SPREAD", "INLINE_FRAGMENT"],
            args: vec![condition("Skipped when true.")],
        },
        DirectiveDef {
            name: "include",
            description: "Directs the executor to include this field or fragment only when the `if` argument is true.",
            locations: &["FIELD", "FRAGMENT_SPREAD", "INLINE_FRAGMENT"],
            args: vec![condition("Included when true.")],
        },
        DirectiveDef {
            name: "deprecated",
            description: "Marks an element of a GraphQL schema as no longer supported.",
            locations: &["FIELD_DEFINITION", "ENUM_VALUE"],
            args: vec![InputValueDef {
                name: "reason".to_string(),
                description: None,
                ty: TypeRef::named("String"),
                default_value: Some(crate::operation::InputValue::String(
                    "No longer supported".to_string(),
                )),
            }],
        },
    ]
}

#[derive(Clone, Copy)]
enum TypeNode<'a> {
    Named(&'a TypeDef),
    List(&'a TypeRef),
    NonNull(&'a TypeRef),
}

#[derive(Clone, Copy)]
enum Node<'a> {
    Schema,
    Type(TypeNode<'a>),
    Field(&'a FieldDef),
    InputValue(&'a InputValueDef),
    EnumValue(&'a EnumValueDef),
    Directive(&'a DirectiveDef),
}

impl Node<'_> {
    fn typename(&self) -> &'static str {
        match self {
            Node::Schema => "__Schema",
            Node::Type(_) => "__Type",
            Node::Field(_) => "__Field",
            Node::InputValue(_) => "__InputValue",
            Node::EnumValue(_) => "__EnumValue",
            Node::Directive(_) => "__Directive",
        }
    }
}

struct Introspector<'a> {
    description: &'a SchemaDescription,
    directives: Vec<DirectiveDef>,
    variables: &'a Variables,
}

/// Answers a root `__schema` or `__type(name:)` field from the schema description.
pub fn resolve_root_field(
    description: &SchemaDescription,
    field: &Field,
    variables: &Variables,
) -> Result<Value> {
    let introspector = Introspector {
        description,
        directives: builtin_directives(),
        variables,
    };

    match field.name.as_str() {
        "__schema" => introspector.resolve(Node::Schema, &field.selection_set),
        "__type" => {
            let args = field.argument_values(variables);
            let name = args.get("name").and_then(Value::as_str).ok_or_else(|| {
                GatewayError::Validation(
                    "Field \"__type\" argument \"name\" of type \"String!\" is required.".to_string(),
                )
            })?;
            match description.get_type(name) {
                Some(typedef) => introspector
                    .resolve(Node::Type(TypeNode::Named(typedef)), &field.selection_set),
                None => Ok(Value::Null),
            }
        }
        other => Err(GatewayError::Validation(format!(
            "Cannot query field \"{}\" on type \"{}\".",
            other, description.query_type
        ))),
    }
}

impl<'a> Introspector<'a> {
    fn resolve<'s>(&'s self, node: Node<'s>, selections: &[Selection]) -> Result<Value> {
        let mut grouped: Vec<(String, Vec<&Field>)> = Vec::new();
        self.collect(node.typename(), selections, &mut grouped);

        let mut object = Map::new();
        for (key, fields) in grouped {
            let field = fields[0];
            let subselection: Vec<Selection> = fields
                .iter()
                .flat_map(|field| field.selection_set.iter().cloned())
                .collect();
            let value = if field.name == "__typename" {
                Value::String(node.typename().to_string())
            } else {
                self.field_value(node, field, &subselection)?
            };
            object.insert(key, value);
        }
        Ok(Value::Object(object))
    }

    fn collect<'f>(
        &self,
        typename: &str,
        selections: &'f [Selection],
        out: &mut Vec<(String, Vec<&'f Field>)>,
    ) {
        for selection in selections {
            if !should_include(selection.directives(), self.variables) {
                continue;
            }
            match selection {
                Selection::Field(field) => {
                    let key = field.response_key();
                    match out.iter_mut().find(|(seen, _)| seen == key) {
                        Some((_, fields)) => fields.push(field),
                        None => out.push((key.to_string(), vec![field])),
                    }
                }
                Selection::InlineFragment(fragment) => {
                    if fragment
                        .type_condition
                        .as_deref()
                        .is_none_or(|condition| condition == typename)
                    {
                        self.collect(typename, &fragment.selection_set, out);
                    }
                }
            }
        }
    }

    fn list<'s>(
        &'s self,
        nodes: impl IntoIterator<Item = Node<'s>>,
        selections: &[Selection],
    ) -> Result<Value> {
        nodes
            .into_iter()
            .map(|node| self.resolve(node, selections))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array)
    }

    fn named<'s>(&'s self, name: &str, selections: &[Selection]) -> Result<Value> {
        match self.description.get_type(name) {
            Some(typedef) => self.resolve(Node::Type(TypeNode::Named(typedef)), selections),
            None => Ok(Value::Null),
        }
    }

    fn type_ref<'s>(&'s self, ty: &'s TypeRef, selections: &[Selection]) -> Result<Value> {
        let node = match ty {
            TypeRef::Named(name) => return self.named(name, selections),
            TypeRef::List(inner) => TypeNode::List(inner),
            TypeRef::NonNull(inner) => TypeNode::NonNull(inner),
        };
        self.resolve(Node::Type(node), selections)
    }

    fn field_value<'s>(
        &'s self,
        node: Node<'s>,
        field: &Field,
        selections: &[Selection],
    ) -> Result<Value> {
        let args = field.argument_values(self.variables);
        let include_deprecated = args
            .get("includeDeprecated")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let string = |value: &str| Value::String(value.to_string());
        let optional = |value: &Option<String>| value.as_deref().map_or(Value::Null, string);

        let value = match (node, field.name.as_str()) {
            (Node::Schema, "description") => Value::Null,
            (Node::Schema, "types") => self.list(
                self.description
                    .types
                    .values()
                    .map(|typedef| Node::Type(TypeNode::Named(typedef))),
                selections,
            )?,
            (Node::Schema, "queryType") => self.named(&self.description.query_type, selections)?,
            (Node::Schema, "mutationType") => match &self.description.mutation_type {
                Some(name) => self.named(name, selections)?,
                None => Value::Null,
            },
            (Node::Schema, "subscriptionType") => match &self.description.subscription_type {
                Some(name) => self.named(name, selections)?,
                None => Value::Null,
            },
            (Node::Schema, "directives") => {
                self.list(self.directives.iter().map(Node::Directive), selections)?
            }

            (Node::Type(ty), name) => self.type_field(ty, name, include_deprecated, selections)?,

            (Node::Field(def), "name") => string(&def.name),
            (Node::Field(def), "description") => optional(&def.description),
            (Node::Field(def), "args") => {
                self.list(def.arguments.iter().map(Node::InputValue), selections)?
            }
            (Node::Field(def), "type") => self.type_ref(&def.ty, selections)?,
            (Node::Field(def), "isDeprecated") => Value::Bool(def.deprecation_reason.is_some()),
            (Node::Field(def), "deprecationReason") => optional(&def.deprecation_reason),

            (Node::InputValue(def), "name") => string(&def.name),
            (Node::InputValue(def), "description") => optional(&def.description),
            (Node::InputValue(def), "type") => self.type_ref(&def.ty, selections)?,
            (Node::InputValue(def), "defaultValue") => def
                .default_value
                .as_ref()
                .map_or(Value::Null, |value| Value::String(value.to_string())),
            (Node::InputValue(_), "isDeprecated") => Value::Bool(false),
            (Node::InputValue(_), "deprecationReason") => Value::Null,

            (Node::EnumValue(def), "name") => string(&def.name),
            (Node::EnumValue(def), "description") => optional(&def.description),
            (Node::EnumValue(def), "isDeprecated") => Value::Bool(def.deprecation_reason.is_some()),
            (Node::EnumValue(def), "deprecationReason") => optional(&def.deprecation_reason),

            (Node::Directive(def), "name") => string(def.name),
            (Node::Directive(def), "description") => string(def.description),
            (Node::Directive(def), "locations") => {
                Value::Array(def.locations.iter().map(|location| string(*location)).collect())
            }
            (Node::Directive(def), "args") => {
                self.list(def.args.iter().map(Node::InputValue), selections)?
            }
            (Node::Directive(_), "isRepeatable") => Value::Bool(false),

            (node, name) => {
                return Err(GatewayError::Validation(format!(
                    "Cannot query field \"{}\" on type \"{}\".",
                    name,
                    node.typename()
                )));
            }
        };
        Ok(value)
    }

    fn type_field<'s>(
        &'s self,
        ty: TypeNode<'s>,
        name: &str,
        include_deprecated: bool,
        selections: &[Selection],
    ) -> Result<Value> {
        let typedef = match ty {
            TypeNode::Named(typedef) => typedef,
            TypeNode::List(inner) | TypeNode::NonNull(inner) => {
                return match name {
                    "kind" => Ok(Value::String(
                        if matches!(ty, TypeNode::List(_)) { "LIST" } else { "NON_NULL" }.to_string(),
                    )),
                    "ofType" => self.type_ref(inner, selections),
                    "name" | "description" | "fields" | "interfaces" | "possibleTypes"
                    | "enumValues" | "inputFields" | "specifiedByURL" => Ok(Value::Null),
                    other => Err(unknown_type_field(other)),
                };
            }
        };

        let has_fields = matches!(typedef.kind, TypeKind::Object | TypeKind::Interface);
        let value = match name {
            "kind" => Value::String(typedef.kind.as_str().to_string()),
            "name" => Value::String(typedef.name.clone()),
            "description" => typedef
                .description
                .as_deref()
                .map_or(Value::Null, |text| Value::String(text.to_string())),
            "fields" if has_fields => self.list(
                typedef
                    .fields
                    .iter()
                    .filter(|field| include_deprecated || field.deprecation_reason.is_none())
                    .map(Node::Field),
                selections,
            )?,
            "interfaces" if has_fields => {
                let interfaces = typedef
                    .interfaces
                    .iter()
                    .filter_map(|name| self.description.get_type(name))
                    .map(|interface| Node::Type(TypeNode::Named(interface)));
                self.list(interfaces, selections)?
            }
            "possibleTypes" if typedef.kind == TypeKind::Union => {
                let members = typedef
                    .possible_types
                    .iter()
                    .filter_map(|name| self.description.get_type(name))
                    .map(|member| Node::Type(TypeNode::Named(member)));
                self.list(members, selections)?
            }
            "possibleTypes" if typedef.kind == TypeKind::Interface => {
                let implementations = self
                    .description
                    .types
                    .values()
                    .filter(|candidate| candidate.interfaces.contains(&typedef.name))
                    .map(|candidate| Node::Type(TypeNode::Named(candidate)));
                self.list(implementations, selections)?
            }
            "enumValues" if typedef.kind == TypeKind::Enum => self.list(
                typedef
                    .enum_values
                    .iter()
                    .filter(|value| include_deprecated || value.deprecation_reason.is_none())
                    .map(Node::EnumValue),
                selections,
            )?,
            "inputFields" if typedef.kind == TypeKind::InputObject => {
                self.list(typedef.input_fields.iter().map(Node::InputValue), selections)?
            }
            "fields" | "interfaces" | "possibleTypes" | "enumValues" | "inputFields"
            | "ofType" | "specifiedByURL" => Value::Null,
            other => return Err(unknown_type_field(other)),
        };
        Ok(value)
    }
}

fn unknown_type_field(name: &str) -> GatewayError {
    GatewayError::Validation(format!("Cannot query field \"{}\" on type \"__Type\".", name))
}
