use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Deserialize;

use crate::operation::OperationKind;
use crate::remote_schema::RemoteSchema;
use crate::schema::{SchemaDescription, TypeDef, TypeRef, is_builtin_type};

/// Renaming rules for one remote schema. Both functions must be pure.
pub trait Renamer {
    fn rename_root_field(&self, field_name: &str) -> String;
    fn rename_type(&self, type_name: &str) -> String;
}

/// Prefixes every root field and named type with `<service_prefix>_`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct NamespaceRule {
    pub service_prefix: String,
}

impl NamespaceRule {
    pub fn new(service_prefix: impl Into<String>) -> Self {
        NamespaceRule {
            service_prefix: service_prefix.into(),
        }
    }

    fn namespaced(&self, name: &str) -> String {
        format!("{}_{}", self.service_prefix, name)
    }

    /// Two rules are injective together when neither namespace is a prefix of
    /// the other; `A` and `A_B` could both produce `A_B_X`.
    pub fn is_disjoint_from(&self, other: &NamespaceRule) -> bool {
        let mine = self.namespaced("");
        let theirs = other.namespaced("");
        !mine.starts_with(&theirs) && !theirs.starts_with(&mine)
    }
}

impl Renamer for NamespaceRule {
    fn rename_root_field(&self, field_name: &str) -> String {
        self.namespaced(field_name)
    }

    fn rename_type(&self, type_name: &str) -> String {
        self.namespaced(type_name)
    }
}

/// A remote schema seen through its renamed namespace, with the reverse mappings
/// needed to translate delegated operations back.
pub struct TransformedSchema {
    pub remote: RemoteSchema,
    pub description: SchemaDescription,
    original_types: HashMap<String, String>,
    renamed_types: HashMap<String, String>,
    original_root_fields: HashMap<(OperationKind, String), String>,
}

impl TransformedSchema {
    pub fn name(&self) -> &str {
        &self.remote.name
    }

    /// Original name of a renamed type; built-ins map to themselves.
    pub fn original_type_name<'a>(&'a self, renamed: &'a str) -> &'a str {
        self.original_types
            .get(renamed)
            .map(String::as_str)
            .unwrap_or(renamed)
    }

    /// Gateway-side name of a type as the upstream reports it, e.g. in `__typename`.
    pub fn renamed_type_name<'a>(&'a self, original: &'a str) -> &'a str {
        self.renamed_types
            .get(original)
            .map(String::as_str)
            .unwrap_or(original)
    }

    pub fn original_root_field(&self, kind: OperationKind, renamed: &str) -> Option<&str> {
        self.original_root_fields
            .get(&(kind, renamed.to_string()))
            .map(String::as_str)
    }

    pub fn owns_type(&self, renamed: &str) -> bool {
        self.original_types.contains_key(renamed)
    }

    /// Translates a gateway-side type reference into the upstream's names.
    pub fn original_type_ref(&self, ty: &TypeRef) -> TypeRef {
        ty.map_named(&|name| self.original_type_name(name).to_string())
    }
}

/// Applies `renamer` to every root field and every non-root named type.
///
/// Root object types keep their names here; the composer folds them into the
/// gateway's own `Query` and `Mutation`.
pub fn transform(remote: RemoteSchema, renamer: &dyn Renamer) -> Arc<TransformedSchema> {
    let source = remote.description.as_ref();

    let mut renamed_types = HashMap::new();
    for name in source.types.keys() {
        if !is_builtin_type(name) && !source.is_root_type(name) {
            renamed_types.insert(name.clone(), renamer.rename_type(name));
        }
    }
    let rename = |name: &str| {
        renamed_types
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    };

    let mut original_root_fields = HashMap::new();
    let mut types = BTreeMap::new();
    for typedef in source.types.values() {
        let root_kind = [
            OperationKind::Query,
            OperationKind::Mutation,
            OperationKind::Subscription,
        ]
        .into_iter()
        .find(|kind| source.root_type_name(*kind) == Some(typedef.name.as_str()));

        let mut renamed = TypeDef {
            name: rename(&typedef.name),
            interfaces: typedef.interfaces.iter().map(|name| rename(name)).collect(),
            possible_types: typedef.possible_types.iter().map(|name| rename(name)).collect(),
            ..typedef.clone()
        };
        for field in &mut renamed.fields {
            field.ty = field.ty.map_named(&rename);
            for arg in &mut field.arguments {
                arg.ty = arg.ty.map_named(&rename);
            }
            if let Some(kind) = root_kind {
                let new_name = renamer.rename_root_field(&field.name);
                original_root_fields.insert((kind, new_name.clone()), field.name.clone());
                field.name = new_name;
            }
        }
        for input in &mut renamed.input_fields {
            input.ty = input.ty.map_named(&rename);
        }
        types.insert(renamed.name.clone(), renamed);
    }

    let description = SchemaDescription {
        query_type: source.query_type.clone(),
        mutation_type: source.mutation_type.clone(),
        subscription_type: source.subscription_type.clone(),
        types,
    };
    let original_types = renamed_types
        .iter()
        .map(|(original, renamed)| (renamed.clone(), original.clone()))
        .collect();

    Arc::new(TransformedSchema {
        remote,
        description,
        original_types,
        renamed_types,
        original_root_fields,
    })
}
