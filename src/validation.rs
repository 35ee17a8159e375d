use std::collections::BTreeSet;

use serde_json::Value;

use crate::composer::RESERVED_PREFIX;
use crate::operation::{
    Directive, Field, InputValue, Operation, OperationKind, Selection, VariableDefinition,
    collect_selection_variables,
};
use crate::schema::{SchemaDescription, TypeKind, TypeRef};
use crate::GraphQLError;

const VALIDATION_FAILED: &str = "GRAPHQL_VALIDATION_FAILED";

/// Validates a client operation against the composed schema before anything is
/// delegated. An empty result means the operation may be planned.
pub fn validate(schema: &SchemaDescription, operation: &Operation) -> Vec<GraphQLError> {
    let mut validator = Validator {
        schema,
        variables: &operation.variable_definitions,
        problems: Vec::new(),
    };
    validator.operation(operation);
    validator
        .problems
        .into_iter()
        .map(|message| {
            GraphQLError::new(message)
                .with_extension("code", Value::String(VALIDATION_FAILED.to_string()))
        })
        .collect()
}

struct Validator<'a> {
    schema: &'a SchemaDescription,
    variables: &'a [VariableDefinition],
    problems: Vec<String>,
}

// Fields of one selection set, grouped by response key, each with the type it
// was selected on.
type KeyedFields<'s> = Vec<(&'s str, Vec<(&'s str, &'s Field)>)>;

impl Validator<'_> {
    fn operation(&mut self, operation: &Operation) {
        if operation.kind == OperationKind::Subscription {
            self.problems
                .push("Subscriptions are not supported by this gateway.".to_string());
            return;
        }
        let Some(root) = self.schema.root_type_name(operation.kind) else {
            self.problems.push(format!(
                "Schema is not configured for {}s.",
                operation.kind.as_str()
            ));
            return;
        };

        let mut declared = BTreeSet::new();
        for definition in &operation.variable_definitions {
            if !declared.insert(definition.name.clone()) {
                self.problems.push(format!(
                    "There can be only one variable named \"${}\".",
                    definition.name
                ));
            }
            let type_name = definition.ty.named_type();
            match self.schema.get_type(type_name) {
                Some(typedef) if typedef.kind.is_input() => {}
                Some(_) => self.problems.push(format!(
                    "Variable \"${}\" cannot be non-input type \"{}\".",
                    definition.name, definition.ty
                )),
                None => self.problems.push(format!("Unknown type \"{}\".", type_name)),
            }
        }

        let mut used = BTreeSet::new();
        collect_selection_variables(&operation.selection_set, &mut used);
        for name in used.difference(&declared) {
            self.problems
                .push(format!("Variable \"${}\" is not defined.", name));
        }

        self.selection_set(root, &operation.selection_set, true);
        self.mergeable(root, &operation.selection_set);
    }

    fn selection_set(&mut self, parent_type: &str, selections: &[Selection], is_root: bool) {
        for selection in selections {
            self.directives(selection.directives());
            match selection {
                Selection::Field(field) => {
                    let reserved = [field.alias.as_deref(), Some(field.name.as_str())]
                        .into_iter()
                        .flatten()
                        .find(|name| name.starts_with(RESERVED_PREFIX));
                    if let Some(name) = reserved {
                        self.problems.push(format!(
                            "Field \"{}\" uses the reserved prefix \"{}\".",
                            name, RESERVED_PREFIX
                        ));
                        continue;
                    }
                    if field.name == "__typename" {
                        continue;
                    }
                    if is_root
                        && parent_type == self.schema.query_type
                        && matches!(field.name.as_str(), "__schema" | "__type")
                    {
                        continue;
                    }

                    let Some(definition) = self.schema.field(parent_type, &field.name) else {
                        self.problems.push(format!(
                            "Cannot query field \"{}\" on type \"{}\".",
                            field.name, parent_type
                        ));
                        continue;
                    };

                    for (name, value) in &field.arguments {
                        match definition.argument(name) {
                            Some(argument) => self.value(
                                value,
                                &argument.ty,
                                argument.default_value.is_some(),
                            ),
                            None => self.problems.push(format!(
                                "Unknown argument \"{}\" on field \"{}.{}\".",
                                name, parent_type, field.name
                            )),
                        }
                    }
                    for argument in &definition.arguments {
                        let required = argument.ty.is_non_null() && argument.default_value.is_none();
                        if required && field.argument(&argument.name).is_none() {
                            self.problems.push(format!(
                                "Field \"{}\" argument \"{}\" of type \"{}\" is required, but it was not provided.",
                                field.name, argument.name, argument.ty
                            ));
                        }
                    }

                    let field_type = definition.ty.named_type();
                    let is_leaf = self
                        .schema
                        .get_type(field_type)
                        .is_none_or(|typedef| typedef.kind.is_leaf());
                    match (is_leaf, field.selection_set.is_empty()) {
                        (true, false) => self.problems.push(format!(
                            "Field \"{}\" must not have a selection since type \"{}\" has no subfields.",
                            field.name, definition.ty
                        )),
                        (false, true) => self.problems.push(format!(
                            "Field \"{}\" of type \"{}\" must have a selection of subfields.",
                            field.name, definition.ty
                        )),
                        (false, false) => self.selection_set(field_type, &field.selection_set, false),
                        (true, true) => {}
                    }
                }
                Selection::InlineFragment(fragment) => {
                    let condition = fragment.type_condition.as_deref().unwrap_or(parent_type);
                    match self.schema.get_type(condition) {
                        None => {
                            self.problems.push(format!("Unknown type \"{}\".", condition));
                        }
                        Some(typedef) if !typedef.kind.is_composite() => {
                            self.problems.push(format!(
                                "Fragment cannot condition on non composite type \"{}\".",
                                condition
                            ));
                        }
                        Some(_) if !self.overlaps(parent_type, condition) => {
                            self.problems.push(format!(
                                "Fragment cannot be spread here as objects of type \"{}\" can never be of type \"{}\".",
                                parent_type, condition
                            ));
                        }
                        Some(_) => self.selection_set(condition, &fragment.selection_set, is_root),
                    }
                }
            }
        }
    }

    fn directives(&mut self, directives: &[Directive]) {
        for directive in directives {
            match directive.name.as_str() {
                "skip" | "include" => match directive.arguments.iter().find(|(name, _)| name == "if") {
                    Some((_, value)) => {
                        let boolean = TypeRef::NonNull(Box::new(TypeRef::named("Boolean")));
                        self.value(value, &boolean, false);
                    }
                    None => self.problems.push(format!(
                        "Directive \"@{}\" argument \"if\" of type \"Boolean!\" is required, but it was not provided.",
                        directive.name
                    )),
                },
                other => self.problems.push(format!("Unknown directive \"@{}\".", other)),
            }
        }
    }

    /// Checks an argument value against the type of its position. Variables are
    /// checked by their declared type, literals by their shape.
    fn value(&mut self, value: &InputValue, ty: &TypeRef, position_has_default: bool) {
        if let InputValue::Variable(name) = value {
            // Undefined variables are reported once for the whole operation.
            let variables = self.variables;
            if let Some(variable) = variables.iter().find(|variable| &variable.name == name) {
                if !variable_allowed(variable, ty, position_has_default) {
                    self.problems.push(format!(
                        "Variable \"${}\" of type \"{}\" used in position expecting type \"{}\".",
                        variable.name, variable.ty, ty
                    ));
                }
            }
            return;
        }

        match ty {
            TypeRef::NonNull(inner) => {
                if *value == InputValue::Null {
                    self.problems
                        .push(format!("Expected value of type \"{}\", found null.", ty));
                } else {
                    self.value(value, inner, false);
                }
            }
            TypeRef::List(item) => match value {
                InputValue::Null => {}
                InputValue::List(items) => {
                    for value in items {
                        self.value(value, item, false);
                    }
                }
                // A single value is coerced to a list of one.
                value => self.value(value, item, false),
            },
            TypeRef::Named(name) => {
                if *value == InputValue::Null {
                    return;
                }
                let schema = self.schema;
                let Some(typedef) = schema.get_type(name) else {
                    return;
                };
                let accepted = match typedef.kind {
                    TypeKind::Enum => matches!(
                        value,
                        InputValue::Enum(member)
                            if typedef.enum_values.iter().any(|known| &known.name == member)
                    ),
                    TypeKind::Scalar => scalar_accepts(name, value),
                    TypeKind::InputObject => {
                        if let InputValue::Object(fields) = value {
                            for (field_name, field_value) in fields {
                                match typedef.input_fields.iter().find(|f| &f.name == field_name) {
                                    Some(field) => self.value(
                                        field_value,
                                        &field.ty,
                                        field.default_value.is_some(),
                                    ),
                                    None => self.problems.push(format!(
                                        "Field \"{}\" is not defined by type \"{}\".",
                                        field_name, name
                                    )),
                                }
                            }
                            for field in &typedef.input_fields {
                                let required = field.ty.is_non_null() && field.default_value.is_none();
                                if required && !fields.iter().any(|(given, _)| given == &field.name) {
                                    self.problems.push(format!(
                                        "Field \"{}.{}\" of required type \"{}\" was not provided.",
                                        name, field.name, field.ty
                                    ));
                                }
                            }
                            true
                        } else {
                            false
                        }
                    }
                    _ => true,
                };
                if !accepted {
                    self.problems.push(format!(
                        "Expected value of type \"{}\", found {}.",
                        name, value
                    ));
                }
            }
        }
    }

    /// Fields sharing a response key must select the same field with the same
    /// arguments, and their sub-selections must merge the same way.
    fn mergeable(&mut self, parent_type: &str, selections: &[Selection]) {
        let mut groups = KeyedFields::new();
        group_by_response_key(parent_type, selections, &mut groups);

        for (key, fields) in &groups {
            let Some(((first_parent, first), rest)) = fields.split_first() else {
                continue;
            };
            let conflict = rest
                .iter()
                .find_map(|(parent, field)| self.conflict(first_parent, first, parent, field));
            if let Some(reason) = conflict {
                self.problems.push(format!(
                    "Fields \"{}\" conflict because {}. Use different aliases on the fields to fetch both if this was intentional.",
                    key, reason
                ));
                continue;
            }

            let schema = self.schema;
            let Some(definition) = schema.field(first_parent, &first.name) else {
                continue;
            };
            let merged: Vec<Selection> = fields
                .iter()
                .flat_map(|(_, field)| field.selection_set.iter().cloned())
                .collect();
            if !merged.is_empty() {
                self.mergeable(definition.ty.named_type(), &merged);
            }
        }
    }

    fn conflict(&self, parent_a: &str, a: &Field, parent_b: &str, b: &Field) -> Option<String> {
        // Objects of two different types never both answer one selection.
        let exclusive = parent_a != parent_b && self.is_object(parent_a) && self.is_object(parent_b);
        if !exclusive {
            if a.name != b.name {
                return Some(format!(
                    "\"{}\" and \"{}\" are different fields",
                    a.name, b.name
                ));
            }
            if !same_arguments(&a.arguments, &b.arguments) {
                return Some("they have differing arguments".to_string());
            }
        }

        let type_a = self.schema.field(parent_a, &a.name).map(|field| &field.ty);
        let type_b = self.schema.field(parent_b, &b.name).map(|field| &field.ty);
        match (type_a, type_b) {
            (Some(type_a), Some(type_b)) if self.shapes_conflict(type_a, type_b) => Some(format!(
                "they return conflicting types \"{}\" and \"{}\"",
                type_a, type_b
            )),
            _ => None,
        }
    }

    fn shapes_conflict(&self, a: &TypeRef, b: &TypeRef) -> bool {
        match (a, b) {
            (TypeRef::NonNull(a), TypeRef::NonNull(b)) | (TypeRef::List(a), TypeRef::List(b)) => {
                self.shapes_conflict(a, b)
            }
            (TypeRef::Named(a), TypeRef::Named(b)) => {
                a != b && (self.is_leaf(a) || self.is_leaf(b))
            }
            _ => true,
        }
    }

    fn is_object(&self, name: &str) -> bool {
        self.schema
            .get_type(name)
            .is_some_and(|typedef| typedef.kind == TypeKind::Object)
    }

    fn is_leaf(&self, name: &str) -> bool {
        self.schema
            .get_type(name)
            .is_none_or(|typedef| typedef.kind.is_leaf())
    }

    /// Whether some object type can satisfy both `a` and `b`.
    fn overlaps(&self, a: &str, b: &str) -> bool {
        if a == b {
            return true;
        }
        self.schema
            .types
            .values()
            .filter(|typedef| typedef.kind == TypeKind::Object)
            .any(|object| {
                self.schema.is_possible_type(a, &object.name)
                    && self.schema.is_possible_type(b, &object.name)
            })
    }
}

fn group_by_response_key<'s>(
    parent_type: &'s str,
    selections: &'s [Selection],
    groups: &mut KeyedFields<'s>,
) {
    for selection in selections {
        match selection {
            Selection::Field(field) => {
                let key = field.response_key();
                match groups.iter_mut().find(|(known, _)| *known == key) {
                    Some((_, fields)) => fields.push((parent_type, field)),
                    None => groups.push((key, vec![(parent_type, field)])),
                }
            }
            Selection::InlineFragment(fragment) => {
                let condition = fragment.type_condition.as_deref().unwrap_or(parent_type);
                group_by_response_key(condition, &fragment.selection_set, groups);
            }
        }
    }
}

fn same_arguments(a: &[(String, InputValue)], b: &[(String, InputValue)]) -> bool {
    a.len() == b.len()
        && a.iter()
            .all(|(name, value)| b.iter().any(|(other, given)| other == name && given == value))
}

fn scalar_accepts(name: &str, value: &InputValue) -> bool {
    match name {
        "Int" => matches!(value, InputValue::Int(int) if i32::try_from(*int).is_ok()),
        "Float" => matches!(value, InputValue::Int(_) | InputValue::Float(_)),
        "String" => matches!(value, InputValue::String(_)),
        "Boolean" => matches!(value, InputValue::Boolean(_)),
        "ID" => matches!(value, InputValue::String(_) | InputValue::Int(_)),
        // Custom scalars are coerced by the service that owns them.
        _ => true,
    }
}

/// A nullable variable may fill a non-null position only when a default
/// stands in for a missing value.
fn variable_allowed(variable: &VariableDefinition, position: &TypeRef, position_has_default: bool) -> bool {
    match position {
        TypeRef::NonNull(inner) if !variable.ty.is_non_null() => {
            let defaulted = position_has_default
                || variable
                    .default_value
                    .as_ref()
                    .is_some_and(|value| *value != InputValue::Null);
            defaulted && is_subtype(&variable.ty, inner)
        }
        _ => is_subtype(&variable.ty, position),
    }
}

fn is_subtype(variable: &TypeRef, position: &TypeRef) -> bool {
    match (variable, position) {
        (TypeRef::NonNull(variable), TypeRef::NonNull(position)) => is_subtype(variable, position),
        (TypeRef::NonNull(variable), position) => is_subtype(variable, position),
        (_, TypeRef::NonNull(_)) => false,
        (TypeRef::List(variable), TypeRef::List(position)) => is_subtype(variable, position),
        (TypeRef::Named(variable), TypeRef::Named(position)) => variable == position,
        _ => false,
    }
}
