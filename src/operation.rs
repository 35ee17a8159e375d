use std::collections::{BTreeSet, HashMap};
use std::fmt::{self, Write as _};

use graphql_parser::query::{
    Definition, Directive as AstDirective, FragmentDefinition, OperationDefinition,
    Selection as AstSelection, SelectionSet, TypeCondition, Value as AstValue, parse_query,
};
use serde_json::{Map, Number, Value};

use crate::Variables;
use crate::error::{GatewayError, Result};
use crate::schema::TypeRef;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
            OperationKind::Subscription => "subscription",
        }
    }
}

/// A GraphQL input literal, possibly containing variable references.
#[derive(Clone, Debug, PartialEq)]
pub enum InputValue {
    Variable(String),
    Int(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Null,
    Enum(String),
    List(Vec<InputValue>),
    Object(Vec<(String, InputValue)>),
}

impl InputValue {
    pub(crate) fn from_ast<'a>(value: &AstValue<'a, String>) -> InputValue {
        match value {
            AstValue::Variable(name) => InputValue::Variable(name.clone()),
            AstValue::Int(number) => number
                .as_i64()
                .map(InputValue::Int)
                .unwrap_or(InputValue::Null),
            AstValue::Float(float) => InputValue::Float(*float),
            AstValue::String(string) => InputValue::String(string.clone()),
            AstValue::Boolean(boolean) => InputValue::Boolean(*boolean),
            AstValue::Null => InputValue::Null,
            AstValue::Enum(name) => InputValue::Enum(name.clone()),
            AstValue::List(items) => InputValue::List(items.iter().map(Self::from_ast).collect()),
            AstValue::Object(fields) => InputValue::Object(
                fields
                    .iter()
                    .map(|(name, value)| (name.clone(), Self::from_ast(value)))
                    .collect(),
            ),
        }
    }

    /// Parses a standalone literal such as an introspection `defaultValue`.
    pub fn parse_literal(literal: &str) -> Result<InputValue> {
        let source = format!("{{ f(v: {}) }}", literal);
        let document = parse_query::<String>(&source)
            .map_err(|e| GatewayError::Parse(e.to_string()))?;
        let value = document.definitions.iter().find_map(|definition| match definition {
            Definition::Operation(OperationDefinition::SelectionSet(set)) => {
                set.items.iter().find_map(|item| match item {
                    AstSelection::Field(field) => field
                        .arguments
                        .first()
                        .map(|(_, value)| InputValue::from_ast(value)),
                    _ => None,
                })
            }
            _ => None,
        });
        value.ok_or_else(|| GatewayError::Parse(format!("invalid literal {}", literal)))
    }

    /// Resolves variables and converts the literal to JSON.
    ///
    /// Unset variables become `null`.
    pub fn to_json(&self, variables: &Variables) -> Value {
        match self {
            InputValue::Variable(name) => variables.get(name).cloned().unwrap_or(Value::Null),
            InputValue::Int(int) => Value::Number((*int).into()),
            InputValue::Float(float) => Number::from_f64(*float)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            InputValue::String(string) => Value::String(string.clone()),
            InputValue::Boolean(boolean) => Value::Bool(*boolean),
            InputValue::Null => Value::Null,
            InputValue::Enum(name) => Value::String(name.clone()),
            InputValue::List(items) => {
                Value::Array(items.iter().map(|item| item.to_json(variables)).collect())
            }
            InputValue::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(name, value)| (name.clone(), value.to_json(variables)))
                    .collect(),
            ),
        }
    }

    pub fn collect_variables(&self, out: &mut BTreeSet<String>) {
        match self {
            InputValue::Variable(name) => {
                out.insert(name.clone());
            }
            InputValue::List(items) => items.iter().for_each(|item| item.collect_variables(out)),
            InputValue::Object(fields) => fields
                .iter()
                .for_each(|(_, value)| value.collect_variables(out)),
            _ => {}
        }
    }
}

impl fmt::Display for InputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputValue::Variable(name) => write!(f, "${}", name),
            InputValue::Int(int) => write!(f, "{}", int),
            InputValue::Float(float) => {
                if float.fract() == 0.0 && float.is_finite() {
                    write!(f, "{:.1}", float)
                } else {
                    write!(f, "{}", float)
                }
            }
            InputValue::String(string) => {
                // JSON string escapes are a subset of GraphQL's.
                let quoted = serde_json::to_string(string).map_err(|_| fmt::Error)?;
                f.write_str(&quoted)
            }
            InputValue::Boolean(boolean) => write!(f, "{}", boolean),
            InputValue::Null => f.write_str("null"),
            InputValue::Enum(name) => f.write_str(name),
            InputValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            InputValue::Object(fields) => {
                f.write_str("{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", name, value)?;
                }
                f.write_str("}")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Directive {
    pub name: String,
    pub arguments: Vec<(String, InputValue)>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub alias: Option<String>,
    pub name: String,
    pub arguments: Vec<(String, InputValue)>,
    pub directives: Vec<Directive>,
    pub selection_set: Vec<Selection>,
}

impl Field {
    pub fn new(name: impl Into<String>) -> Self {
        Field {
            alias: None,
            name: name.into(),
            arguments: Vec::new(),
            directives: Vec::new(),
            selection_set: Vec::new(),
        }
    }

    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn argument(&self, name: &str) -> Option<&InputValue> {
        self.arguments
            .iter()
            .find(|(arg, _)| arg == name)
            .map(|(_, value)| value)
    }

    /// Argument values as JSON, with variables substituted. Arguments the client
    /// did not write are absent from the map.
    pub fn argument_values(&self, variables: &Variables) -> Map<String, Value> {
        self.arguments
            .iter()
            .filter(|(_, value)| match value {
                InputValue::Variable(name) => variables.contains_key(name),
                _ => true,
            })
            .map(|(name, value)| (name.clone(), value.to_json(variables)))
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct InlineFragment {
    pub type_condition: Option<String>,
    pub directives: Vec<Directive>,
    pub selection_set: Vec<Selection>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Selection {
    Field(Field),
    InlineFragment(InlineFragment),
}

impl Selection {
    pub fn directives(&self) -> &[Directive] {
        match self {
            Selection::Field(field) => &field.directives,
            Selection::InlineFragment(fragment) => &fragment.directives,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct VariableDefinition {
    pub name: String,
    pub ty: TypeRef,
    pub default_value: Option<InputValue>,
}

/// A single executable operation with every fragment spread inlined.
#[derive(Clone, Debug, PartialEq)]
pub struct Operation {
    pub kind: OperationKind,
    pub name: Option<String>,
    pub variable_definitions: Vec<VariableDefinition>,
    pub selection_set: Vec<Selection>,
}

impl Operation {
    /// Applies variable defaults and rejects missing non-null variables.
    pub fn coerce_variables(&self, provided: &Variables) -> Result<Variables> {
        let mut coerced = Variables::new();
        for definition in &self.variable_definitions {
            match provided.get(&definition.name) {
                Some(value) if !(value.is_null() && definition.ty.is_non_null()) => {
                    coerced.insert(definition.name.clone(), value.clone());
                }
                Some(_) => {
                    return Err(GatewayError::Validation(format!(
                        "Variable \"${}\" of non-null type \"{}\" must not be null.",
                        definition.name, definition.ty
                    )));
                }
                None => {
                    if let Some(default) = &definition.default_value {
                        coerced.insert(definition.name.clone(), default.to_json(&Variables::new()));
                    } else if definition.ty.is_non_null() {
                        return Err(GatewayError::Validation(format!(
                            "Variable \"${}\" of required type \"{}\" was not provided.",
                            definition.name, definition.ty
                        )));
                    }
                }
            }
        }
        Ok(coerced)
    }
}

type Fragments<'d, 'a> = HashMap<&'d str, &'d FragmentDefinition<'a, String>>;

/// Parses a client document and selects the operation to run.
pub fn parse_operation(query: &str, operation_name: Option<&str>) -> Result<Operation> {
    let document = parse_query::<String>(query).map_err(|e| GatewayError::Parse(e.to_string()))?;

    let mut fragments: Fragments = HashMap::new();
    let mut operations = Vec::new();
    for definition in &document.definitions {
        match definition {
            Definition::Fragment(fragment) => {
                if fragments.insert(fragment.name.as_str(), fragment).is_some() {
                    return Err(GatewayError::Validation(format!(
                        "There can be only one fragment named \"{}\".",
                        fragment.name
                    )));
                }
            }
            Definition::Operation(operation) => operations.push(operation),
        }
    }

    let operation = match operation_name {
        Some(wanted) => operations
            .iter()
            .find(|operation| operation_header(operation).1 == Some(wanted))
            .ok_or_else(|| {
                GatewayError::Validation(format!("Unknown operation named \"{}\".", wanted))
            })?,
        None => match operations.as_slice() {
            [single] => single,
            [] => return Err(GatewayError::Validation("No operation found in document.".into())),
            _ => {
                return Err(GatewayError::Validation(
                    "Must provide operation name if query contains multiple operations.".into(),
                ));
            }
        },
    };

    let (kind, name, variable_definitions, selection_set) = operation_header(operation);
    let mut visiting = Vec::new();
    Ok(Operation {
        kind,
        name: name.map(str::to_string),
        variable_definitions,
        selection_set: lower_selection_set(selection_set, &fragments, &mut visiting)?,
    })
}

type OperationHeader<'d, 'a> = (
    OperationKind,
    Option<&'d str>,
    Vec<VariableDefinition>,
    &'d SelectionSet<'a, String>,
);

fn operation_header<'d, 'a>(
    operation: &'d OperationDefinition<'a, String>,
) -> OperationHeader<'d, 'a> {
    let (kind, name, definitions, selection_set) = match operation {
        OperationDefinition::SelectionSet(set) => {
            return (OperationKind::Query, None, Vec::new(), set);
        }
        OperationDefinition::Query(query) => (
            OperationKind::Query,
            query.name.as_deref(),
            &query.variable_definitions,
            &query.selection_set,
        ),
        OperationDefinition::Mutation(mutation) => (
            OperationKind::Mutation,
            mutation.name.as_deref(),
            &mutation.variable_definitions,
            &mutation.selection_set,
        ),
        OperationDefinition::Subscription(subscription) => (
            OperationKind::Subscription,
            subscription.name.as_deref(),
            &subscription.variable_definitions,
            &subscription.selection_set,
        ),
    };
    let definitions = definitions
        .iter()
        .map(|definition| VariableDefinition {
            name: definition.name.clone(),
            ty: TypeRef::from_ast(&definition.var_type),
            default_value: definition.default_value.as_ref().map(InputValue::from_ast),
        })
        .collect();
    (kind, name, definitions, selection_set)
}

fn lower_directives<'a>(directives: &[AstDirective<'a, String>]) -> Vec<Directive> {
    directives
        .iter()
        .map(|directive| Directive {
            name: directive.name.clone(),
            arguments: directive
                .arguments
                .iter()
                .map(|(name, value)| (name.clone(), InputValue::from_ast(value)))
                .collect(),
        })
        .collect()
}

fn lower_selection_set<'d, 'a>(
    set: &'d SelectionSet<'a, String>,
    fragments: &Fragments<'d, 'a>,
    visiting: &mut Vec<String>,
) -> Result<Vec<Selection>> {
    let mut selections = Vec::with_capacity(set.items.len());
    for item in &set.items {
        let selection = match item {
            AstSelection::Field(field) => Selection::Field(Field {
                alias: field.alias.clone(),
                name: field.name.clone(),
                arguments: field
                    .arguments
                    .iter()
                    .map(|(name, value)| (name.clone(), InputValue::from_ast(value)))
                    .collect(),
                directives: lower_directives(&field.directives),
                selection_set: lower_selection_set(&field.selection_set, fragments, visiting)?,
            }),
            AstSelection::InlineFragment(fragment) => Selection::InlineFragment(InlineFragment {
                type_condition: fragment
                    .type_condition
                    .as_ref()
                    .map(|TypeCondition::On(name)| name.clone()),
                directives: lower_directives(&fragment.directives),
                selection_set: lower_selection_set(&fragment.selection_set, fragments, visiting)?,
            }),
            AstSelection::FragmentSpread(spread) => {
                let name = spread.fragment_name.as_str();
                let fragment: &'d FragmentDefinition<'a, String> =
                    *fragments.get(name).ok_or_else(|| {
                        GatewayError::Validation(format!("Unknown fragment \"{}\".", name))
                    })?;
                if visiting.iter().any(|seen| seen == name) {
                    return Err(GatewayError::Validation(format!(
                        "Cannot spread fragment \"{}\" within itself.",
                        name
                    )));
                }
                visiting.push(name.to_string());
                let selection_set =
                    lower_selection_set(&fragment.selection_set, fragments, visiting)?;
                visiting.pop();
                let TypeCondition::On(type_condition) = &fragment.type_condition;
                Selection::InlineFragment(InlineFragment {
                    type_condition: Some(type_condition.clone()),
                    directives: lower_directives(&spread.directives),
                    selection_set,
                })
            }
        };
        selections.push(selection);
    }
    Ok(selections)
}

/// Evaluates `@skip` and `@include` against the request variables.
pub fn should_include(directives: &[Directive], variables: &Variables) -> bool {
    directives.iter().all(|directive| {
        let condition = directive
            .arguments
            .iter()
            .find(|(name, _)| name == "if")
            .map(|(_, value)| value.to_json(variables).as_bool().unwrap_or(false));
        match (directive.name.as_str(), condition) {
            ("skip", Some(condition)) => !condition,
            ("include", Some(condition)) => condition,
            _ => true,
        }
    })
}

pub fn collect_selection_variables(selections: &[Selection], out: &mut BTreeSet<String>) {
    for selection in selections {
        for directive in selection.directives() {
            for (_, value) in &directive.arguments {
                value.collect_variables(out);
            }
        }
        match selection {
            Selection::Field(field) => {
                for (_, value) in &field.arguments {
                    value.collect_variables(out);
                }
                collect_selection_variables(&field.selection_set, out);
            }
            Selection::InlineFragment(fragment) => {
                collect_selection_variables(&fragment.selection_set, out)
            }
        }
    }
}

/// Prints an operation as a compact, single-line GraphQL document.
pub fn print_operation(
    kind: OperationKind,
    variable_definitions: &[VariableDefinition],
    selections: &[Selection],
) -> String {
    let mut out = String::from(kind.as_str());
    if !variable_definitions.is_empty() {
        out.push('(');
        for (i, definition) in variable_definitions.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "${}: {}", definition.name, definition.ty);
            if let Some(default) = &definition.default_value {
                let _ = write!(out, " = {}", default);
            }
        }
        out.push(')');
    }
    out.push(' ');
    write_selection_set(&mut out, selections);
    out
}

fn write_directives(out: &mut String, directives: &[Directive]) {
    for directive in directives {
        let _ = write!(out, " @{}", directive.name);
        write_arguments(out, &directive.arguments);
    }
}

fn write_arguments(out: &mut String, arguments: &[(String, InputValue)]) {
    if arguments.is_empty() {
        return;
    }
    out.push('(');
    for (i, (name, value)) in arguments.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{}: {}", name, value);
    }
    out.push(')');
}

fn write_selection_set(out: &mut String, selections: &[Selection]) {
    out.push('{');
    for selection in selections {
        out.push(' ');
        match selection {
            Selection::Field(field) => {
                if let Some(alias) = &field.alias {
                    let _ = write!(out, "{}: ", alias);
                }
                out.push_str(&field.name);
                write_arguments(out, &field.arguments);
                write_directives(out, &field.directives);
                if !field.selection_set.is_empty() {
                    out.push(' ');
                    write_selection_set(out, &field.selection_set);
                }
            }
            Selection::InlineFragment(fragment) => {
                out.push_str("...");
                if let Some(type_condition) = &fragment.type_condition {
                    let _ = write!(out, " on {}", type_condition);
                }
                write_directives(out, &fragment.directives);
                out.push(' ');
                write_selection_set(out, &fragment.selection_set);
            }
        }
    }
    out.push_str(" }");
}
