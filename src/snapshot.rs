use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{GatewayError, Result};
use crate::operation::InputValue;
use crate::schema::{
    EnumValueDef, FieldDef, InputValueDef, SchemaDescription, TypeDef, TypeKind, TypeRef,
};

/// Highest snapshot format version this gateway understands.
pub const SNAPSHOT_VERSION: u64 = 1;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectionSchema {
    query_type: NamedRef,
    mutation_type: Option<NamedRef>,
    subscription_type: Option<NamedRef>,
    types: Vec<FullType>,
}

#[derive(Debug, Deserialize)]
struct NamedRef {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FullType {
    kind: String,
    name: String,
    description: Option<String>,
    fields: Option<Vec<IntrospectionField>>,
    input_fields: Option<Vec<IntrospectionInputValue>>,
    interfaces: Option<Vec<NamedRef>>,
    enum_values: Option<Vec<IntrospectionEnumValue>>,
    possible_types: Option<Vec<NamedRef>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectionField {
    name: String,
    description: Option<String>,
    #[serde(default)]
    args: Vec<IntrospectionInputValue>,
    #[serde(rename = "type")]
    ty: IntrospectionTypeRef,
    #[serde(default)]
    is_deprecated: bool,
    deprecation_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectionInputValue {
    name: String,
    description: Option<String>,
    #[serde(rename = "type")]
    ty: IntrospectionTypeRef,
    default_value: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectionEnumValue {
    name: String,
    description: Option<String>,
    #[serde(default)]
    is_deprecated: bool,
    deprecation_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectionTypeRef {
    kind: String,
    name: Option<String>,
    of_type: Option<Box<IntrospectionTypeRef>>,
}

impl IntrospectionTypeRef {
    fn lower(&self) -> std::result::Result<TypeRef, String> {
        let inner = || {
            self.of_type
                .as_deref()
                .ok_or_else(|| format!("{} type reference without ofType", self.kind))
                .and_then(IntrospectionTypeRef::lower)
        };
        match self.kind.as_str() {
            "NON_NULL" => Ok(TypeRef::NonNull(Box::new(inner()?))),
            "LIST" => Ok(TypeRef::List(Box::new(inner()?))),
            _ => self
                .name
                .clone()
                .map(TypeRef::Named)
                .ok_or_else(|| format!("{} type reference without name", self.kind)),
        }
    }
}

fn parse_kind(kind: &str) -> std::result::Result<TypeKind, String> {
    match kind {
        "SCALAR" => Ok(TypeKind::Scalar),
        "OBJECT" => Ok(TypeKind::Object),
        "INTERFACE" => Ok(TypeKind::Interface),
        "UNION" => Ok(TypeKind::Union),
        "ENUM" => Ok(TypeKind::Enum),
        "INPUT_OBJECT" => Ok(TypeKind::InputObject),
        other => Err(format!("unknown type kind {}", other)),
    }
}

fn deprecation(is_deprecated: bool, reason: Option<String>) -> Option<String> {
    is_deprecated.then(|| reason.unwrap_or_else(|| "No longer supported".to_string()))
}

fn lower_input_value(
    input: IntrospectionInputValue,
) -> std::result::Result<InputValueDef, String> {
    let default_value = input
        .default_value
        .as_deref()
        .map(InputValue::parse_literal)
        .transpose()
        .map_err(|e| format!("default value of {}: {}", input.name, e))?;
    Ok(InputValueDef {
        ty: input.ty.lower()?,
        name: input.name,
        description: input.description,
        default_value,
    })
}

fn lower_type(full: FullType) -> std::result::Result<TypeDef, String> {
    let kind = parse_kind(&full.kind)?;
    let fields = full
        .fields
        .unwrap_or_default()
        .into_iter()
        .map(|field| {
            Ok(FieldDef {
                ty: field.ty.lower()?,
                arguments: field
                    .args
                    .into_iter()
                    .map(lower_input_value)
                    .collect::<std::result::Result<_, String>>()?,
                deprecation_reason: deprecation(field.is_deprecated, field.deprecation_reason),
                name: field.name,
                description: field.description,
            })
        })
        .collect::<std::result::Result<Vec<_>, String>>()?;
    let input_fields = full
        .input_fields
        .unwrap_or_default()
        .into_iter()
        .map(lower_input_value)
        .collect::<std::result::Result<Vec<_>, String>>()?;
    let names = |refs: Option<Vec<NamedRef>>| {
        refs.unwrap_or_default()
            .into_iter()
            .map(|named| named.name)
            .collect::<Vec<_>>()
    };

    Ok(TypeDef {
        kind,
        description: full.description,
        fields,
        interfaces: names(full.interfaces),
        possible_types: names(full.possible_types),
        enum_values: full
            .enum_values
            .unwrap_or_default()
            .into_iter()
            .map(|value| EnumValueDef {
                deprecation_reason: deprecation(value.is_deprecated, value.deprecation_reason),
                name: value.name,
                description: value.description,
            })
            .collect(),
        input_fields,
        name: full.name,
    })
}

/// Builds a schema description from an introspection result.
///
/// Accepts `{"__schema": ..}`, `{"data": {"__schema": ..}}` and either of those with a
/// top-level `"version"` marker.
pub fn from_introspection(source_name: &str, json: &str) -> Result<SchemaDescription> {
    let invalid = |reason: String| GatewayError::InvalidSnapshot {
        source_name: source_name.to_string(),
        reason,
    };

    let mut root: Value = serde_json::from_str(json).map_err(|e| invalid(e.to_string()))?;
    if let Some(version) = root.get("version") {
        match version.as_u64() {
            Some(version) if version <= SNAPSHOT_VERSION => {}
            _ => return Err(invalid(format!("unsupported snapshot version {}", version))),
        }
    }
    if let Some(data) = root.get_mut("data").map(Value::take) {
        root = data;
    }
    let schema = root
        .get_mut("__schema")
        .map(Value::take)
        .ok_or_else(|| invalid("missing __schema".to_string()))?;
    let schema: IntrospectionSchema =
        serde_json::from_value(schema).map_err(|e| invalid(e.to_string()))?;

    let mut types = BTreeMap::new();
    for full in schema.types {
        if full.name.starts_with("__") {
            continue;
        }
        let typedef = lower_type(full).map_err(&invalid)?;
        types.insert(typedef.name.clone(), typedef);
    }

    Ok(SchemaDescription {
        query_type: schema.query_type.name,
        mutation_type: schema.mutation_type.map(|named| named.name),
        subscription_type: schema.subscription_type.map(|named| named.name),
        types,
    })
}

/// Loads and validates a snapshot file. `.json` files are read as introspection
/// results, everything else as SDL.
pub fn load_snapshot(path: &Path) -> Result<SchemaDescription> {
    let source_name = path.display().to_string();
    debug!("Reading schema snapshot: {}", source_name);

    let contents = fs::read_to_string(path).map_err(|source| GatewayError::Io {
        path: source_name.clone(),
        source,
    })?;
    let is_json = path
        .extension()
        .is_some_and(|extension| extension.eq_ignore_ascii_case("json"));
    let description = if is_json {
        from_introspection(&source_name, &contents)?
    } else {
        SchemaDescription::from_sdl(&source_name, &contents)?
    };
    description.validate(&source_name)?;
    Ok(description)
}
