use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use graphql_parser::parse_schema;
use graphql_parser::schema::{Definition, TypeExtension};
use tracing::{debug, info};

use crate::error::{GatewayError, Result};
use crate::operation::{Field, OperationKind, Selection, parse_operation};
use crate::resolver::{FieldResolver, ResolverMap};
use crate::schema::{FieldDef, SchemaDescription, TypeDef, TypeKind, is_builtin_type, lower_field};
use crate::transform::TransformedSchema;

/// Prefix of aliases the gateway adds to delegated selections.
pub const RESERVED_PREFIX: &str = "_stitch_";

const ROOT_TYPE_NAMES: [&str; 3] = ["Query", "Mutation", "Subscription"];

/// The resolver bound to an extension field and the parent fields it needs.
pub struct ExtensionBinding {
    pub resolver: Arc<dyn FieldResolver + Send + Sync>,
    pub required_selection: Vec<Field>,
}

/// The served schema: every subschema's renamed types and root fields in one
/// namespace, plus extension fields and their resolvers.
pub struct ComposedSchema {
    pub description: SchemaDescription,
    subschemas: Vec<Arc<TransformedSchema>>,
    root_owners: HashMap<(OperationKind, String), usize>,
    type_owners: HashMap<String, usize>,
    extensions: HashMap<(String, String), ExtensionBinding>,
}

impl ComposedSchema {
    pub fn subschemas(&self) -> &[Arc<TransformedSchema>] {
        &self.subschemas
    }

    /// Subschema that serves a root field of the composed schema.
    pub fn root_owner(&self, kind: OperationKind, field_name: &str) -> Option<&Arc<TransformedSchema>> {
        self.root_owners
            .get(&(kind, field_name.to_string()))
            .map(|index| &self.subschemas[*index])
    }

    pub fn type_owner(&self, type_name: &str) -> Option<&Arc<TransformedSchema>> {
        self.type_owners
            .get(type_name)
            .map(|index| &self.subschemas[*index])
    }

    pub fn extension(&self, type_name: &str, field_name: &str) -> Option<&ExtensionBinding> {
        self.extensions
            .get(&(type_name.to_string(), field_name.to_string()))
    }

    pub fn is_extension_field(&self, type_name: &str, field_name: &str) -> bool {
        self.extension(type_name, field_name).is_some()
    }
}

/// Merges `subschemas` into one namespace, applies the `extend type` blocks in
/// `type_defs` and binds `resolvers` to the fields they add.
///
/// Every extension field needs exactly one resolver and every resolver must bind
/// an extension field. Nothing is served from a schema that fails here.
pub fn compose(
    subschemas: Vec<Arc<TransformedSchema>>,
    type_defs: &str,
    resolvers: ResolverMap,
) -> Result<ComposedSchema> {
    let mut types: BTreeMap<String, TypeDef> = BTreeMap::new();
    let mut query = TypeDef::new("Query", TypeKind::Object);
    let mut mutation = TypeDef::new("Mutation", TypeKind::Object);
    let mut root_owners = HashMap::new();
    let mut type_owners: HashMap<String, usize> = HashMap::new();

    for (index, subschema) in subschemas.iter().enumerate() {
        let source = &subschema.description;

        for typedef in source.types.values() {
            if source.is_root_type(&typedef.name) {
                continue;
            }
            if is_builtin_type(&typedef.name) {
                types
                    .entry(typedef.name.clone())
                    .or_insert_with(|| typedef.clone());
                continue;
            }
            if ROOT_TYPE_NAMES.contains(&typedef.name.as_str()) {
                return Err(GatewayError::SchemaCompositionConflict(format!(
                    "type {} from {} collides with a gateway root type",
                    typedef.name,
                    subschema.name()
                )));
            }
            if let Some(previous) = type_owners.insert(typedef.name.clone(), index) {
                return Err(GatewayError::SchemaCompositionConflict(format!(
                    "type {} is declared by both {} and {}",
                    typedef.name,
                    subschemas[previous].name(),
                    subschema.name()
                )));
            }
            types.insert(typedef.name.clone(), typedef.clone());
        }

        for (kind, root) in [
            (OperationKind::Query, &mut query),
            (OperationKind::Mutation, &mut mutation),
        ] {
            let Some(source_root) = source.root_type(kind) else {
                continue;
            };
            for field in &source_root.fields {
                if let Some(previous) = root_owners.insert((kind, field.name.clone()), index) {
                    return Err(GatewayError::SchemaCompositionConflict(format!(
                        "{} field {} is declared by both {} and {}",
                        kind.as_str(),
                        field.name,
                        subschemas[previous].name(),
                        subschema.name()
                    )));
                }
                root.fields.push(field.clone());
            }
        }

        if source.subscription_type.is_some() {
            debug!(subschema = subschema.name(), "Subscription root is not exposed");
        }
    }

    let has_mutation = !mutation.fields.is_empty();
    types.insert(query.name.clone(), query);
    if has_mutation {
        types.insert(mutation.name.clone(), mutation);
    }

    let extension_fields = apply_extensions(&mut types, &type_owners, type_defs)?;

    let mut extensions = HashMap::new();
    for (type_name, fields) in resolvers {
        for (field_name, entry) in fields {
            let key = (type_name.clone(), field_name.clone());
            if !extension_fields.contains(&key) {
                return Err(GatewayError::InvalidExtension(format!(
                    "resolver bound to {}.{} which is not an extension field",
                    type_name, field_name
                )));
            }
            let required_selection =
                required_selection(&types, &extension_fields, &type_name, &entry.selection_set)?;
            extensions.insert(
                key,
                ExtensionBinding {
                    resolver: entry.resolver,
                    required_selection,
                },
            );
        }
    }
    if let Some((type_name, field_name)) = extension_fields
        .iter()
        .find(|key| !extensions.contains_key(*key))
    {
        return Err(GatewayError::InvalidExtension(format!(
            "extension field {}.{} has no resolver",
            type_name, field_name
        )));
    }

    let description = SchemaDescription {
        query_type: "Query".to_string(),
        mutation_type: has_mutation.then(|| "Mutation".to_string()),
        subscription_type: None,
        types,
    };
    description
        .validate("composed schema")
        .map_err(|e| GatewayError::SchemaCompositionConflict(e.to_string()))?;

    info!(
        subschemas = subschemas.len(),
        types = description.types.len(),
        extensions = extensions.len(),
        "Composed gateway schema"
    );

    Ok(ComposedSchema {
        description,
        subschemas,
        root_owners,
        type_owners,
        extensions,
    })
}

fn apply_extensions(
    types: &mut BTreeMap<String, TypeDef>,
    type_owners: &HashMap<String, usize>,
    type_defs: &str,
) -> Result<Vec<(String, String)>> {
    let mut added = Vec::new();
    if type_defs.trim().is_empty() {
        return Ok(added);
    }

    let document =
        parse_schema::<String>(type_defs).map_err(|e| GatewayError::InvalidExtension(e.to_string()))?;
    for definition in &document.definitions {
        let Definition::TypeExtension(TypeExtension::Object(extension)) = definition else {
            return Err(GatewayError::InvalidExtension(
                "only `extend type` blocks are supported".to_string(),
            ));
        };

        // Extensions attach to subschema-owned object types so the parent value
        // always comes from a delegated selection.
        let is_object = types
            .get(&extension.name)
            .is_some_and(|target| target.kind == TypeKind::Object);
        if !is_object || !type_owners.contains_key(&extension.name) {
            return Err(GatewayError::UnknownExtensionTarget(extension.name.clone()));
        }

        for field in &extension.fields {
            let field = lower_field(field);
            check_extension_field(types, &extension.name, &field)?;
            added.push((extension.name.clone(), field.name.clone()));
            if let Some(target) = types.get_mut(&extension.name) {
                target.fields.push(field);
            }
        }
    }
    Ok(added)
}

fn check_extension_field(
    types: &BTreeMap<String, TypeDef>,
    type_name: &str,
    field: &FieldDef,
) -> Result<()> {
    let invalid = |reason: String| {
        Err(GatewayError::InvalidExtension(format!(
            "{}.{}: {}",
            type_name, field.name, reason
        )))
    };

    if field.name.starts_with("__") || field.name.starts_with(RESERVED_PREFIX) {
        return invalid("field name is reserved".to_string());
    }
    if types
        .get(type_name)
        .is_some_and(|target| target.field(&field.name).is_some())
    {
        return Err(GatewayError::SchemaCompositionConflict(format!(
            "extension field {}.{} is already declared by the subschema",
            type_name, field.name
        )));
    }
    match types.get(field.ty.named_type()) {
        None => return invalid(format!("unknown type {}", field.ty.named_type())),
        Some(target) if target.kind == TypeKind::InputObject => {
            return invalid(format!("input type {} used as a field type", target.name));
        }
        Some(_) => {}
    }
    for arg in &field.arguments {
        match types.get(arg.ty.named_type()) {
            Some(target) if target.kind.is_input() => {}
            Some(_) => {
                return invalid(format!(
                    "argument {} uses output type {}",
                    arg.name,
                    arg.ty.named_type()
                ));
            }
            None => {
                return invalid(format!(
                    "argument {} has unknown type {}",
                    arg.name,
                    arg.ty.named_type()
                ));
            }
        }
    }
    Ok(())
}

/// Parses a resolver's required selection set, e.g. `{ id }`, against its parent type.
fn required_selection(
    types: &BTreeMap<String, TypeDef>,
    extension_fields: &[(String, String)],
    type_name: &str,
    selection_set: &str,
) -> Result<Vec<Field>> {
    if selection_set.trim().is_empty() {
        return Ok(Vec::new());
    }
    let invalid = |reason: String| {
        GatewayError::InvalidExtension(format!(
            "required selection {} on {}: {}",
            selection_set, type_name, reason
        ))
    };

    let operation = parse_operation(selection_set, None).map_err(|e| invalid(e.to_string()))?;
    let mut fields = Vec::with_capacity(operation.selection_set.len());
    for selection in operation.selection_set {
        let Selection::Field(field) = selection else {
            return Err(invalid("fragments are not supported".to_string()));
        };
        if field.alias.is_some() || !field.directives.is_empty() {
            return Err(invalid("aliases and directives are not supported".to_string()));
        }
        if extension_fields
            .iter()
            .any(|(owner, name)| owner == type_name && *name == field.name)
        {
            return Err(invalid(format!("{} is itself an extension field", field.name)));
        }
        let definition = types
            .get(type_name)
            .and_then(|parent| parent.field(&field.name))
            .ok_or_else(|| invalid(format!("unknown field {}", field.name)))?;
        let is_leaf = types
            .get(definition.ty.named_type())
            .is_some_and(|target| target.kind.is_leaf());
        if is_leaf != field.selection_set.is_empty() {
            return Err(invalid(format!(
                "field {} of type {} needs {}",
                field.name,
                definition.ty,
                if is_leaf { "no sub-selection" } else { "a sub-selection" }
            )));
        }
        fields.push(field);
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        CART_SDL, STITCHING_TYPE_DEFS, cart_schema, cms_schema, composed, product_resolvers,
        recording, remote,
    };
    use crate::transform::{NamespaceRule, transform};
    use pretty_assertions::assert_eq;

    fn field_names(typedef: &TypeDef) -> Vec<&str> {
        typedef.fields.iter().map(|field| field.name.as_str()).collect()
    }

    #[test]
    fn merges_renamed_namespaces_and_extensions() {
        let schema = composed(recording(), recording());
        let description = &schema.description;

        assert_eq!(
            field_names(description.get_type("Query").unwrap()),
            vec!["CartQL_cart", "CMS_product", "CMS_node"]
        );
        assert_eq!(
            field_names(description.get_type("Mutation").unwrap()),
            vec!["CartQL_addItem", "CartQL_removeItem"]
        );
        assert_eq!(
            description
                .field("CartQL_CartItem", "product")
                .unwrap()
                .ty
                .to_string(),
            "CMS_Product"
        );
        assert_eq!(
            schema
                .root_owner(OperationKind::Query, "CMS_product")
                .unwrap()
                .name(),
            "cms"
        );
        assert_eq!(schema.type_owner("CartQL_Money").unwrap().name(), "cart");

        let binding = schema.extension("CartQL_CartItem", "product").unwrap();
        assert_eq!(binding.required_selection, vec![Field::new("id")]);
        assert!(!schema.is_extension_field("CartQL_CartItem", "name"));
    }

    #[test]
    fn colliding_namespaces_fail_composition() {
        let first = transform(remote("cart", CART_SDL), &NamespaceRule::new("CartQL"));
        let second = transform(remote("cart-eu", CART_SDL), &NamespaceRule::new("CartQL"));

        let err = compose(vec![first, second], "", ResolverMap::new()).err().unwrap();

        assert!(matches!(err, GatewayError::SchemaCompositionConflict(_)));
        assert!(err.to_string().contains("cart-eu"));
    }

    #[test]
    fn extension_fields_cannot_shadow_subschema_fields() {
        let cms = cms_schema(recording());
        let err = compose(
            vec![cart_schema(recording()), cms],
            "extend type CartQL_CartItem { name: CMS_Product }",
            ResolverMap::new(),
        )
        .err()
        .unwrap();

        assert!(matches!(err, GatewayError::SchemaCompositionConflict(_)));
        assert!(err.to_string().contains("CartQL_CartItem.name"));
    }

    #[test]
    fn extension_target_must_exist() {
        let cms = cms_schema(recording());
        let err = compose(
            vec![cart_schema(recording()), cms],
            "extend type CartQL_Wishlist { product: CMS_Product }",
            ResolverMap::new(),
        )
        .err()
        .unwrap();

        assert!(matches!(err, GatewayError::UnknownExtensionTarget(name) if name == "CartQL_Wishlist"));
    }

    #[test]
    fn extension_fields_and_resolvers_must_match() {
        let cms = cms_schema(recording());
        let err = compose(
            vec![cart_schema(recording()), cms.clone()],
            STITCHING_TYPE_DEFS,
            ResolverMap::new(),
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("has no resolver"));

        let err = compose(
            vec![cart_schema(recording()), cms.clone()],
            "",
            product_resolvers(&cms),
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("not an extension field"));
    }

    #[test]
    fn extension_types_must_resolve() {
        let cms = cms_schema(recording());
        let err = compose(
            vec![cart_schema(recording()), cms.clone()],
            "extend type CartQL_CartItem { product(stage: Stage): CMS_Product }",
            product_resolvers(&cms),
        )
        .err()
        .unwrap();

        assert!(matches!(err, GatewayError::InvalidExtension(_)));
        assert!(err.to_string().contains("unknown type Stage"));
    }

    #[test]
    fn required_selection_must_name_parent_fields() {
        let cms = cms_schema(recording());
        let mut resolvers = product_resolvers(&cms);
        if let Some(entry) = resolvers
            .get_mut("CartQL_CartItem")
            .and_then(|fields| fields.get_mut("product"))
        {
            entry.selection_set = "{ sku }".to_string();
        }

        let err = compose(
            vec![cart_schema(recording()), cms],
            STITCHING_TYPE_DEFS,
            resolvers,
        )
        .err()
        .unwrap();

        assert!(err.to_string().contains("unknown field sku"));
    }
}
