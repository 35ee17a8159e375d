use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

use graphql_parser::parse_schema;
use graphql_parser::query::{Directive, Type, Value};
use graphql_parser::schema::{Definition, TypeDefinition, TypeExtension};

use crate::error::{GatewayError, Result};
use crate::operation::{InputValue, OperationKind};

pub const BUILTIN_SCALARS: [&str; 5] = ["String", "Int", "Float", "Boolean", "ID"];

const DEFAULT_DEPRECATION_REASON: &str = "No longer supported";

/// Built-in scalars and introspection types keep their names across namespaces.
pub fn is_builtin_type(name: &str) -> bool {
    BUILTIN_SCALARS.contains(&name) || name.starts_with("__")
}

/// A reference to a type as written in a field or argument position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeRef {
    Named(String),
    List(Box<TypeRef>),
    NonNull(Box<TypeRef>),
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        TypeRef::Named(name.into())
    }

    pub fn named_type(&self) -> &str {
        match self {
            TypeRef::Named(name) => name,
            TypeRef::List(inner) | TypeRef::NonNull(inner) => inner.named_type(),
        }
    }

    pub fn is_non_null(&self) -> bool {
        matches!(self, TypeRef::NonNull(_))
    }

    /// Rebuilds the reference with its innermost name passed through `rename`.
    pub fn map_named(&self, rename: &dyn Fn(&str) -> String) -> TypeRef {
        match self {
            TypeRef::Named(name) => TypeRef::Named(rename(name)),
            TypeRef::List(inner) => TypeRef::List(Box::new(inner.map_named(rename))),
            TypeRef::NonNull(inner) => TypeRef::NonNull(Box::new(inner.map_named(rename))),
        }
    }

    pub(crate) fn from_ast<'a>(ty: &Type<'a, String>) -> TypeRef {
        match ty {
            Type::NamedType(name) => TypeRef::Named(name.clone()),
            Type::ListType(inner) => TypeRef::List(Box::new(TypeRef::from_ast(inner))),
            Type::NonNullType(inner) => TypeRef::NonNull(Box::new(TypeRef::from_ast(inner))),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Named(name) => f.write_str(name),
            TypeRef::List(inner) => write!(f, "[{}]", inner),
            TypeRef::NonNull(inner) => write!(f, "{}!", inner),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeKind {
    Scalar,
    Object,
    Interface,
    Union,
    Enum,
    InputObject,
}

impl TypeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeKind::Scalar => "SCALAR",
            TypeKind::Object => "OBJECT",
            TypeKind::Interface => "INTERFACE",
            TypeKind::Union => "UNION",
            TypeKind::Enum => "ENUM",
            TypeKind::InputObject => "INPUT_OBJECT",
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, TypeKind::Object | TypeKind::Interface | TypeKind::Union)
    }

    pub fn is_abstract(&self) -> bool {
        matches!(self, TypeKind::Interface | TypeKind::Union)
    }

    pub fn is_input(&self) -> bool {
        matches!(self, TypeKind::Scalar | TypeKind::Enum | TypeKind::InputObject)
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, TypeKind::Scalar | TypeKind::Enum)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct InputValueDef {
    pub name: String,
    pub description: Option<String>,
    pub ty: TypeRef,
    pub default_value: Option<InputValue>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub description: Option<String>,
    pub arguments: Vec<InputValueDef>,
    pub ty: TypeRef,
    pub deprecation_reason: Option<String>,
}

impl FieldDef {
    pub fn argument(&self, name: &str) -> Option<&InputValueDef> {
        self.arguments.iter().find(|arg| arg.name == name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnumValueDef {
    pub name: String,
    pub description: Option<String>,
    pub deprecation_reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TypeDef {
    pub name: String,
    pub kind: TypeKind,
    pub description: Option<String>,
    pub fields: Vec<FieldDef>,
    pub interfaces: Vec<String>,
    pub possible_types: Vec<String>,
    pub enum_values: Vec<EnumValueDef>,
    pub input_fields: Vec<InputValueDef>,
}

impl TypeDef {
    pub fn new(name: impl Into<String>, kind: TypeKind) -> Self {
        TypeDef {
            name: name.into(),
            kind,
            description: None,
            fields: Vec::new(),
            interfaces: Vec::new(),
            possible_types: Vec::new(),
            enum_values: Vec::new(),
            input_fields: Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|field| field.name == name)
    }
}

/// Static type/field/operation definition of one GraphQL service.
#[derive(Clone, Debug, PartialEq)]
pub struct SchemaDescription {
    pub query_type: String,
    pub mutation_type: Option<String>,
    pub subscription_type: Option<String>,
    pub types: BTreeMap<String, TypeDef>,
}

impl SchemaDescription {
    /// Parses an SDL document. The result is not validated; call [`Self::validate`].
    pub fn from_sdl(source_name: &str, sdl: &str) -> Result<Self> {
        let document = parse_schema::<String>(sdl).map_err(|e| GatewayError::InvalidSnapshot {
            source_name: source_name.to_string(),
            reason: e.to_string(),
        })?;

        let mut roots: Option<(Option<String>, Option<String>, Option<String>)> = None;
        let mut types = BTreeMap::new();
        let mut extensions = Vec::new();

        for definition in document.definitions {
            match definition {
                Definition::SchemaDefinition(schema) => {
                    roots = Some((schema.query, schema.mutation, schema.subscription));
                }
                Definition::TypeDefinition(typedef) => {
                    let typedef = lower_type_definition(&typedef);
                    types.insert(typedef.name.clone(), typedef);
                }
                Definition::TypeExtension(extension) => extensions.push(extension),
                Definition::DirectiveDefinition(_) => {}
            }
        }

        for extension in &extensions {
            apply_type_extension(&mut types, extension).map_err(|reason| {
                GatewayError::InvalidSnapshot {
                    source_name: source_name.to_string(),
                    reason,
                }
            })?;
        }

        for scalar in BUILTIN_SCALARS {
            types
                .entry(scalar.to_string())
                .or_insert_with(|| TypeDef::new(scalar, TypeKind::Scalar));
        }

        let default_root = |name: &str| types.contains_key(name).then(|| name.to_string());
        let (query_type, mutation_type, subscription_type) = roots.unwrap_or_else(|| {
            (
                default_root("Query"),
                default_root("Mutation"),
                default_root("Subscription"),
            )
        });
        let query_type = query_type.ok_or_else(|| GatewayError::InvalidSnapshot {
                source_name: source_name.to_string(),
                reason: "schema has no query root type".to_string(),
            })?;

        Ok(SchemaDescription {
            query_type,
            mutation_type,
            subscription_type,
            types,
        })
    }

    pub fn get_type(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    pub fn root_type_name(&self, kind: OperationKind) -> Option<&str> {
        match kind {
            OperationKind::Query => Some(self.query_type.as_str()),
            OperationKind::Mutation => self.mutation_type.as_deref(),
            OperationKind::Subscription => self.subscription_type.as_deref(),
        }
    }

    pub fn root_type(&self, kind: OperationKind) -> Option<&TypeDef> {
        self.root_type_name(kind).and_then(|name| self.types.get(name))
    }

    pub fn is_root_type(&self, name: &str) -> bool {
        [
            Some(self.query_type.as_str()),
            self.mutation_type.as_deref(),
            self.subscription_type.as_deref(),
        ]
        .contains(&Some(name))
    }

    pub fn field(&self, type_name: &str, field_name: &str) -> Option<&FieldDef> {
        self.types.get(type_name)?.field(field_name)
    }

    /// Whether an object of type `concrete` satisfies a type condition on `condition`.
    pub fn is_possible_type(&self, condition: &str, concrete: &str) -> bool {
        if condition == concrete {
            return true;
        }
        match self.types.get(condition) {
            Some(typedef) if typedef.kind == TypeKind::Union => {
                typedef.possible_types.iter().any(|name| name == concrete)
            }
            Some(typedef) if typedef.kind == TypeKind::Interface => self
                .types
                .get(concrete)
                .is_some_and(|object| object.interfaces.iter().any(|name| name == condition)),
            _ => false,
        }
    }

    /// Checks that every type reference resolves and that roots are object types.
    pub fn validate(&self, source_name: &str) -> Result<()> {
        let mut problems = Vec::new();

        for kind in [
            OperationKind::Query,
            OperationKind::Mutation,
            OperationKind::Subscription,
        ] {
            if let Some(root) = self.root_type_name(kind) {
                match self.types.get(root) {
                    Some(typedef) if typedef.kind == TypeKind::Object => {}
                    Some(_) => problems.push(format!("root type {} is not an object type", root)),
                    None => problems.push(format!("root type {} is not defined", root)),
                }
            }
        }

        for typedef in self.types.values() {
            for field in &typedef.fields {
                self.check_reference(&mut problems, &typedef.name, &field.name, &field.ty, false);
                for arg in &field.arguments {
                    let location = format!("{}({}:)", field.name, arg.name);
                    self.check_reference(&mut problems, &typedef.name, &location, &arg.ty, true);
                }
            }
            for input in &typedef.input_fields {
                self.check_reference(&mut problems, &typedef.name, &input.name, &input.ty, true);
            }
            for interface in &typedef.interfaces {
                if self.types.get(interface).map(|t| t.kind) != Some(TypeKind::Interface) {
                    problems.push(format!(
                        "{} implements {} which is not an interface",
                        typedef.name, interface
                    ));
                }
            }
            for member in &typedef.possible_types {
                if typedef.kind == TypeKind::Union
                    && self.types.get(member).map(|t| t.kind) != Some(TypeKind::Object)
                {
                    problems.push(format!(
                        "union {} includes {} which is not an object type",
                        typedef.name, member
                    ));
                }
            }
            if matches!(typedef.kind, TypeKind::Object | TypeKind::Interface)
                && typedef.fields.is_empty()
            {
                problems.push(format!("{} declares no fields", typedef.name));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::InvalidSnapshot {
                source_name: source_name.to_string(),
                reason: problems.join("; "),
            })
        }
    }

    fn check_reference(
        &self,
        problems: &mut Vec<String>,
        owner: &str,
        location: &str,
        ty: &TypeRef,
        input: bool,
    ) {
        let name = ty.named_type();
        match self.types.get(name) {
            None => problems.push(format!("{}.{} references unknown type {}", owner, location, name)),
            Some(target) if input && !target.kind.is_input() => problems.push(format!(
                "{}.{} uses output type {} in input position",
                owner, location, name
            )),
            Some(target) if !input && target.kind == TypeKind::InputObject => problems.push(
                format!("{}.{} uses input type {} in output position", owner, location, name),
            ),
            _ => {}
        }
    }

    /// Prints the schema as SDL, omitting built-in scalars.
    pub fn to_sdl(&self) -> String {
        let mut out = String::new();

        let standard = self.query_type == "Query"
            && self.mutation_type.as_deref().is_none_or(|name| name == "Mutation")
            && self
                .subscription_type
                .as_deref()
                .is_none_or(|name| name == "Subscription");
        if !standard {
            out.push_str("schema {\n");
            let _ = writeln!(out, "  query: {}", self.query_type);
            if let Some(mutation) = &self.mutation_type {
                let _ = writeln!(out, "  mutation: {}", mutation);
            }
            if let Some(subscription) = &self.subscription_type {
                let _ = writeln!(out, "  subscription: {}", subscription);
            }
            out.push_str("}\n\n");
        }

        for typedef in self.types.values().filter(|t| !is_builtin_type(&t.name)) {
            write_description(&mut out, typedef.description.as_deref(), "");
            match typedef.kind {
                TypeKind::Scalar => {
                    let _ = writeln!(out, "scalar {}", typedef.name);
                }
                TypeKind::Object | TypeKind::Interface => {
                    let keyword = if typedef.kind == TypeKind::Object {
                        "type"
                    } else {
                        "interface"
                    };
                    let _ = write!(out, "{} {}", keyword, typedef.name);
                    if !typedef.interfaces.is_empty() {
                        let _ = write!(out, " implements {}", typedef.interfaces.join(" & "));
                    }
                    out.push_str(" {\n");
                    for field in &typedef.fields {
                        write_description(&mut out, field.description.as_deref(), "  ");
                        let _ = write!(out, "  {}", field.name);
                        write_arguments(&mut out, &field.arguments);
                        let _ = write!(out, ": {}", field.ty);
                        write_deprecation(&mut out, field.deprecation_reason.as_deref());
                        out.push('\n');
                    }
                    out.push_str("}\n");
                }
                TypeKind::Union => {
                    let _ = writeln!(
                        out,
                        "union {} = {}",
                        typedef.name,
                        typedef.possible_types.join(" | ")
                    );
                }
                TypeKind::Enum => {
                    let _ = writeln!(out, "enum {} {{", typedef.name);
                    for value in &typedef.enum_values {
                        write_description(&mut out, value.description.as_deref(), "  ");
                        let _ = write!(out, "  {}", value.name);
                        write_deprecation(&mut out, value.deprecation_reason.as_deref());
                        out.push('\n');
                    }
                    out.push_str("}\n");
                }
                TypeKind::InputObject => {
                    let _ = writeln!(out, "input {} {{", typedef.name);
                    for input in &typedef.input_fields {
                        write_description(&mut out, input.description.as_deref(), "  ");
                        let _ = write!(out, "  {}: {}", input.name, input.ty);
                        if let Some(default) = &input.default_value {
                            let _ = write!(out, " = {}", default);
                        }
                        out.push('\n');
                    }
                    out.push_str("}\n");
                }
            }
            out.push('\n');
        }

        out.truncate(out.trim_end().len());
        out.push('\n');
        out
    }
}

fn write_description(out: &mut String, description: Option<&str>, indent: &str) {
    if let Some(description) = description.filter(|d| !d.is_empty()) {
        let _ = writeln!(
            out,
            "{indent}\"\"\"{}\"\"\"",
            description.replace("\"\"\"", "\\\"\"\"")
        );
    }
}

fn write_arguments(out: &mut String, arguments: &[InputValueDef]) {
    if arguments.is_empty() {
        return;
    }
    let rendered: Vec<String> = arguments
        .iter()
        .map(|arg| match &arg.default_value {
            Some(default) => format!("{}: {} = {}", arg.name, arg.ty, default),
            None => format!("{}: {}", arg.name, arg.ty),
        })
        .collect();
    let _ = write!(out, "({})", rendered.join(", "));
}

fn write_deprecation(out: &mut String, reason: Option<&str>) {
    match reason {
        Some(DEFAULT_DEPRECATION_REASON) => out.push_str(" @deprecated"),
        Some(reason) => {
            let _ = write!(out, " @deprecated(reason: {})", InputValue::String(reason.into()));
        }
        None => {}
    }
}

fn deprecation_reason<'a>(directives: &[Directive<'a, String>]) -> Option<String> {
    let directive = directives.iter().find(|d| d.name == "deprecated")?;
    let reason = directive
        .arguments
        .iter()
        .find(|(name, _)| name == "reason")
        .and_then(|(_, value)| match value {
            Value::String(reason) => Some(reason.clone()),
            _ => None,
        });
    Some(reason.unwrap_or_else(|| DEFAULT_DEPRECATION_REASON.to_string()))
}

pub(crate) fn lower_field<'a>(field: &graphql_parser::schema::Field<'a, String>) -> FieldDef {
    FieldDef {
        name: field.name.clone(),
        description: field.description.clone(),
        arguments: field.arguments.iter().map(lower_input_value).collect(),
        ty: TypeRef::from_ast(&field.field_type),
        deprecation_reason: deprecation_reason(&field.directives),
    }
}

fn lower_input_value<'a>(input: &graphql_parser::schema::InputValue<'a, String>) -> InputValueDef {
    InputValueDef {
        name: input.name.clone(),
        description: input.description.clone(),
        ty: TypeRef::from_ast(&input.value_type),
        default_value: input.default_value.as_ref().map(InputValue::from_ast),
    }
}

fn lower_enum_value<'a>(value: &graphql_parser::schema::EnumValue<'a, String>) -> EnumValueDef {
    EnumValueDef {
        name: value.name.clone(),
        description: value.description.clone(),
        deprecation_reason: deprecation_reason(&value.directives),
    }
}

fn lower_type_definition<'a>(typedef: &TypeDefinition<'a, String>) -> TypeDef {
    match typedef {
        TypeDefinition::Scalar(scalar) => TypeDef {
            description: scalar.description.clone(),
            ..TypeDef::new(scalar.name.clone(), TypeKind::Scalar)
        },
        TypeDefinition::Object(object) => TypeDef {
            description: object.description.clone(),
            fields: object.fields.iter().map(lower_field).collect(),
            interfaces: object.implements_interfaces.clone(),
            ..TypeDef::new(object.name.clone(), TypeKind::Object)
        },
        TypeDefinition::Interface(interface) => TypeDef {
            description: interface.description.clone(),
            fields: interface.fields.iter().map(lower_field).collect(),
            ..TypeDef::new(interface.name.clone(), TypeKind::Interface)
        },
        TypeDefinition::Union(union_type) => TypeDef {
            description: union_type.description.clone(),
            possible_types: union_type.types.clone(),
            ..TypeDef::new(union_type.name.clone(), TypeKind::Union)
        },
        TypeDefinition::Enum(enum_type) => TypeDef {
            description: enum_type.description.clone(),
            enum_values: enum_type.values.iter().map(lower_enum_value).collect(),
            ..TypeDef::new(enum_type.name.clone(), TypeKind::Enum)
        },
        TypeDefinition::InputObject(input) => TypeDef {
            description: input.description.clone(),
            input_fields: input.fields.iter().map(lower_input_value).collect(),
            ..TypeDef::new(input.name.clone(), TypeKind::InputObject)
        },
    }
}

fn apply_type_extension<'a>(
    types: &mut BTreeMap<String, TypeDef>,
    extension: &TypeExtension<'a, String>,
) -> std::result::Result<(), String> {
    let (name, kind) = match extension {
        TypeExtension::Scalar(ext) => (&ext.name, TypeKind::Scalar),
        TypeExtension::Object(ext) => (&ext.name, TypeKind::Object),
        TypeExtension::Interface(ext) => (&ext.name, TypeKind::Interface),
        TypeExtension::Union(ext) => (&ext.name, TypeKind::Union),
        TypeExtension::Enum(ext) => (&ext.name, TypeKind::Enum),
        TypeExtension::InputObject(ext) => (&ext.name, TypeKind::InputObject),
    };
    let target = types
        .get_mut(name)
        .filter(|typedef| typedef.kind == kind)
        .ok_or_else(|| format!("extension of undefined {} {}", kind.as_str(), name))?;

    match extension {
        TypeExtension::Object(ext) => {
            target.fields.extend(ext.fields.iter().map(lower_field));
            target.interfaces.extend(ext.implements_interfaces.iter().cloned());
        }
        TypeExtension::Interface(ext) => {
            target.fields.extend(ext.fields.iter().map(lower_field));
        }
        TypeExtension::Union(ext) => target.possible_types.extend(ext.types.iter().cloned()),
        TypeExtension::Enum(ext) => target
            .enum_values
            .extend(ext.values.iter().map(lower_enum_value)),
        TypeExtension::InputObject(ext) => target
            .input_fields
            .extend(ext.fields.iter().map(lower_input_value)),
        TypeExtension::Scalar(_) => {}
    }
    Ok(())
}
