use std::borrow::Cow;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, join_all, ready};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::composer::{ComposedSchema, ExtensionBinding};
use crate::error::{GatewayError, Result};
use crate::introspection;
use crate::operation::{Field, OperationKind, Selection, should_include};
use crate::query_planner::{
    Fetch, QueryPlan, RESULT_ALIAS, RootTarget, TYPENAME_ALIAS, plan_delegation, required_alias,
};
use crate::resolver::{RequestContext, ResolveInfo, Resolved};
use crate::schema::{SchemaDescription, TypeRef};
use crate::transform::TransformedSchema;
use crate::{GraphQLError, GraphQLResponse, PathSegment, Variables};

/// A completed value and the errors raised below it. `None` is a null that
/// reached a non-null position; the nearest nullable ancestor absorbs it.
type Completed = (Option<Value>, Vec<GraphQLError>);

#[async_trait]
pub trait QueryExecutor {
    async fn execute_plan(
        &self,
        plan: QueryPlan,
        schema: &ComposedSchema,
        context: &RequestContext,
    ) -> GraphQLResponse;
}

/// Runs the planned upstream fetches, then completes the client's selection
/// over their results, resolving extension fields on the way.
pub struct StitchingQueryExecutor;

impl StitchingQueryExecutor {
    pub fn new() -> Self {
        StitchingQueryExecutor
    }
}

impl Default for StitchingQueryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

struct ExecutionContext<'a> {
    schema: &'a ComposedSchema,
    context: &'a RequestContext,
}

#[async_trait]
impl QueryExecutor for StitchingQueryExecutor {
    async fn execute_plan(
        &self,
        plan: QueryPlan,
        schema: &ComposedSchema,
        context: &RequestContext,
    ) -> GraphQLResponse {
        let results = run_fetches(plan.kind, &plan.fetches).await;

        let mut errors = Vec::new();
        let mut fetched = Vec::with_capacity(results.len());
        for (fetch, result) in plan.fetches.iter().zip(results) {
            let service = fetch.subschema.name();
            match result.and_then(|response| require_data(response, service)) {
                Ok(response) => {
                    errors.extend(
                        response
                            .errors
                            .into_iter()
                            .map(|error| tag_service(error, service)),
                    );
                    let data = match response.data {
                        Some(Value::Object(data)) => data,
                        _ => Map::new(),
                    };
                    fetched.push(Ok(data));
                }
                Err(GatewayError::UpstreamGraphQLError { errors: reported, .. }) => {
                    warn!(subschema = service, "Upstream reported errors without data");
                    errors.extend(reported);
                    fetched.push(Err(Vec::new()));
                }
                Err(error) => {
                    warn!(subschema = service, error = %error, "Upstream fetch failed");
                    fetched.push(Err(error.into_graphql_errors(None)));
                }
            }
        }

        let root_type = schema
            .description
            .root_type_name(plan.kind)
            .unwrap_or("Query");
        let ctx = ExecutionContext { schema, context };

        let mut keys = Vec::with_capacity(plan.root_fields.len());
        let mut futures: Vec<BoxFuture<'_, Completed>> = Vec::with_capacity(plan.root_fields.len());
        for root in &plan.root_fields {
            let key = root.field.response_key().to_string();
            let path = vec![PathSegment::Key(key.clone())];
            keys.push(key.clone());

            let definition = schema.description.field(root_type, &root.field.name);
            let future = match &root.target {
                RootTarget::Typename => {
                    ready((Some(Value::String(root_type.to_string())), Vec::new())).boxed()
                }
                RootTarget::Introspection => {
                    let completed = match introspection::resolve_root_field(
                        &schema.description,
                        &root.field,
                        &context.variables,
                    ) {
                        Ok(value) => (Some(value), Vec::new()),
                        Err(error) => (Some(Value::Null), error.into_graphql_errors(Some(path))),
                    };
                    ready(completed).boxed()
                }
                RootTarget::Fetch(index) => match &mut fetched[*index] {
                    Err(failures) => {
                        let scoped: Vec<GraphQLError> = failures
                            .iter()
                            .cloned()
                            .map(|error| error.with_path(path.clone()))
                            .collect();
                        let value = match definition {
                            Some(definition) if definition.ty.is_non_null() => None,
                            _ => Some(Value::Null),
                        };
                        ready((value, scoped)).boxed()
                    }
                    Ok(data) => {
                        let value = data.remove(&key).unwrap_or(Value::Null);
                        match definition {
                            Some(definition) => complete_value(
                                &ctx,
                                &definition.ty,
                                &root.field.selection_set,
                                value,
                                plan.fetches[*index].subschema.clone(),
                                path,
                            ),
                            None => ready((Some(value), Vec::new())).boxed(),
                        }
                    }
                },
            };
            futures.push(future);
        }

        let mut data = Some(Map::new());
        for (key, (value, mut field_errors)) in keys.into_iter().zip(join_all(futures).await) {
            match (value, data.as_mut()) {
                (Some(value), Some(data)) => {
                    data.insert(key, value);
                }
                _ => data = None,
            }
            errors.append(&mut field_errors);
        }

        GraphQLResponse {
            data: Some(data.map_or(Value::Null, Value::Object)),
            errors,
        }
    }
}

/// Query groups run concurrently; mutation groups run one after another in
/// document order.
async fn run_fetches(kind: OperationKind, fetches: &[Fetch]) -> Vec<Result<GraphQLResponse>> {
    match kind {
        OperationKind::Mutation => {
            let mut results = Vec::with_capacity(fetches.len());
            for fetch in fetches {
                results.push(fetch.subschema.remote.execute(fetch.request.clone()).await);
            }
            results
        }
        _ => {
            join_all(
                fetches
                    .iter()
                    .map(|fetch| fetch.subschema.remote.execute(fetch.request.clone())),
            )
            .await
        }
    }
}

/// A response with errors and no data is a failed fetch.
fn require_data(response: GraphQLResponse, service: &str) -> Result<GraphQLResponse> {
    let has_data = response.data.as_ref().is_some_and(|data| !data.is_null());
    if has_data || response.errors.is_empty() {
        return Ok(response);
    }
    Err(GatewayError::UpstreamGraphQLError {
        service: service.to_string(),
        errors: response
            .errors
            .into_iter()
            .map(|error| tag_service(error, service))
            .collect(),
    })
}

/// Sends a resolver's delegated operation to `target` and returns the value found
/// under [`RESULT_ALIAS`], with upstream error paths moved under the resolver's
/// own path.
pub async fn delegate_to_schema(
    target: &Arc<TransformedSchema>,
    kind: OperationKind,
    field_name: &str,
    arguments: Map<String, Value>,
    context: &RequestContext,
    info: &ResolveInfo<'_>,
) -> Result<Resolved> {
    let request = plan_delegation(
        info.schema,
        target,
        kind,
        field_name,
        arguments,
        info.selection_set,
        context,
    )?;
    debug!(subschema = target.name(), query = %request.query, "Delegating extension field");

    let response = target.remote.execute(request).await?;
    let errors: Vec<GraphQLError> = response
        .errors
        .into_iter()
        .map(|error| tag_service(remap_path(error, info.path), target.name()))
        .collect();
    let value = match response.data {
        Some(Value::Object(mut data)) => data.remove(RESULT_ALIAS).unwrap_or(Value::Null),
        _ if !errors.is_empty() => {
            return Err(GatewayError::UpstreamGraphQLError {
                service: target.name().to_string(),
                errors,
            });
        }
        _ => Value::Null,
    };

    Ok(Resolved {
        value,
        source: target.clone(),
        errors,
    })
}

fn remap_path(mut error: GraphQLError, base: &[PathSegment]) -> GraphQLError {
    let remapped = match error.path.take() {
        Some(path) if path.first() == Some(&PathSegment::Key(RESULT_ALIAS.to_string())) => {
            base.iter().cloned().chain(path.into_iter().skip(1)).collect()
        }
        _ => base.to_vec(),
    };
    error.path = Some(remapped);
    error
}

fn tag_service(error: GraphQLError, service: &str) -> GraphQLError {
    error.with_extension("service", Value::String(service.to_string()))
}

fn complete_value<'a>(
    ctx: &'a ExecutionContext<'a>,
    ty: &'a TypeRef,
    selections: &'a [Selection],
    value: Value,
    source: Arc<TransformedSchema>,
    path: Vec<PathSegment>,
) -> BoxFuture<'a, Completed> {
    async move {
        let TypeRef::NonNull(inner) = ty else {
            let (value, errors) = complete_nullable(ctx, ty, selections, value, source, path).await;
            return (Some(value.unwrap_or(Value::Null)), errors);
        };

        let (value, mut errors) =
            complete_nullable(ctx, inner.as_ref(), selections, value, source, path.clone()).await;
        match value {
            Some(Value::Null) => {
                if !errors.iter().any(|error| error.path.as_deref() == Some(path.as_slice())) {
                    errors.push(non_null_violation(path));
                }
                (None, errors)
            }
            value => (value, errors),
        }
    }
    .boxed()
}

// `None` here means a descendant nulled this value out and already reported why.
async fn complete_nullable<'a>(
    ctx: &'a ExecutionContext<'a>,
    ty: &'a TypeRef,
    selections: &'a [Selection],
    value: Value,
    source: Arc<TransformedSchema>,
    path: Vec<PathSegment>,
) -> Completed {
    match (ty, value) {
        (TypeRef::NonNull(_), value) => {
            complete_value(ctx, ty, selections, value, source, path).await
        }
        (_, Value::Null) => (Some(Value::Null), Vec::new()),
        (TypeRef::List(inner), Value::Array(items)) => {
            let items = items.into_iter().enumerate().map(|(index, item)| {
                let mut item_path = path.clone();
                item_path.push(PathSegment::Index(index));
                complete_value(ctx, inner.as_ref(), selections, item, source.clone(), item_path)
            });
            let mut errors = Vec::new();
            let mut values = Some(Vec::new());
            for (value, mut item_errors) in join_all(items).await {
                match (value, values.as_mut()) {
                    (Some(value), Some(values)) => values.push(value),
                    _ => values = None,
                }
                errors.append(&mut item_errors);
            }
            (values.map(Value::Array), errors)
        }
        (TypeRef::Named(name), Value::Object(object)) if !selections.is_empty() => {
            complete_object(ctx, name, selections, object, source, path).await
        }
        (_, value) => (Some(value), Vec::new()),
    }
}

fn non_null_violation(path: Vec<PathSegment>) -> GraphQLError {
    let field = path
        .iter()
        .rev()
        .find_map(|segment| match segment {
            PathSegment::Key(key) => Some(key.as_str()),
            PathSegment::Index(_) => None,
        })
        .unwrap_or_default();
    GraphQLError::new(format!("Cannot return null for non-nullable field {}.", field))
        .with_path(path)
}

async fn complete_object<'a>(
    ctx: &'a ExecutionContext<'a>,
    parent_type: &'a str,
    selections: &'a [Selection],
    mut object: Map<String, Value>,
    source: Arc<TransformedSchema>,
    path: Vec<PathSegment>,
) -> Completed {
    let concrete = match object.remove(TYPENAME_ALIAS) {
        Some(Value::String(name)) => source.renamed_type_name(&name).to_string(),
        _ => parent_type.to_string(),
    };

    let mut grouped = Vec::new();
    collect_fields(
        &ctx.schema.description,
        &concrete,
        selections,
        &ctx.context.variables,
        &mut grouped,
    );
    let grouped: Vec<(String, &Field, Cow<'_, [Selection]>)> = grouped
        .into_iter()
        .map(|(key, fields)| {
            let first = fields[0];
            let subselection = if fields.len() == 1 {
                Cow::Borrowed(first.selection_set.as_slice())
            } else {
                Cow::Owned(
                    fields
                        .iter()
                        .flat_map(|field| field.selection_set.iter().cloned())
                        .collect(),
                )
            };
            (key, first, subselection)
        })
        .collect();

    let mut futures: Vec<BoxFuture<'_, Completed>> = Vec::with_capacity(grouped.len());
    for (key, field, subselection) in &grouped {
        let mut field_path = path.clone();
        field_path.push(PathSegment::Key(key.clone()));

        if field.name == "__typename" {
            futures.push(ready((Some(Value::String(concrete.clone())), Vec::new())).boxed());
            continue;
        }
        let Some(definition) = ctx.schema.description.field(&concrete, &field.name) else {
            let value = object.remove(key.as_str()).unwrap_or(Value::Null);
            futures.push(ready((Some(value), Vec::new())).boxed());
            continue;
        };

        match ctx.schema.extension(&concrete, &field.name) {
            Some(binding) => {
                let parent = binding
                    .required_selection
                    .iter()
                    .map(|required| {
                        let value = object
                            .get(&required_alias(&required.name))
                            .cloned()
                            .unwrap_or(Value::Null);
                        (required.name.clone(), value)
                    })
                    .collect();
                futures.push(
                    resolve_extension(
                        ctx,
                        binding,
                        &concrete,
                        field,
                        &definition.ty,
                        subselection,
                        parent,
                        field_path,
                    )
                    .boxed(),
                );
            }
            None => {
                let value = object.remove(key.as_str()).unwrap_or(Value::Null);
                futures.push(complete_value(
                    ctx,
                    &definition.ty,
                    subselection,
                    value,
                    source.clone(),
                    field_path,
                ));
            }
        }
    }

    let mut completed = Some(Map::new());
    let mut errors = Vec::new();
    for ((key, _, _), (value, mut field_errors)) in grouped.iter().zip(join_all(futures).await) {
        match (value, completed.as_mut()) {
            (Some(value), Some(completed)) => {
                completed.insert(key.clone(), value);
            }
            _ => completed = None,
        }
        errors.append(&mut field_errors);
    }
    (completed.map(Value::Object), errors)
}

#[allow(clippy::too_many_arguments)]
async fn resolve_extension<'a>(
    ctx: &'a ExecutionContext<'a>,
    binding: &'a ExtensionBinding,
    parent_type: &'a str,
    field: &'a Field,
    return_type: &'a TypeRef,
    selections: &'a [Selection],
    parent: Map<String, Value>,
    path: Vec<PathSegment>,
) -> Completed {
    let args = field.argument_values(&ctx.context.variables);
    let info = ResolveInfo {
        field,
        selection_set: selections,
        parent_type,
        return_type,
        path: &path,
        schema: ctx.schema,
    };

    match binding.resolver.resolve(&parent, &args, ctx.context, &info).await {
        Ok(resolved) => {
            let (value, errors) = complete_value(
                ctx,
                return_type,
                selections,
                resolved.value,
                resolved.source,
                path.clone(),
            )
            .await;
            let mut all = resolved.errors;
            all.extend(errors);
            (value, all)
        }
        Err(error) => {
            warn!(
                field = %format!("{}.{}", parent_type, field.name),
                error = %error,
                "Extension field resolution failed"
            );
            let value = (!return_type.is_non_null()).then_some(Value::Null);
            (value, error.into_graphql_errors(Some(path)))
        }
    }
}

/// Groups the fields that apply to `concrete` by response key, honouring
/// `@skip`/`@include` and type conditions.
fn collect_fields<'s>(
    description: &SchemaDescription,
    concrete: &str,
    selections: &'s [Selection],
    variables: &Variables,
    out: &mut Vec<(String, Vec<&'s Field>)>,
) {
    for selection in selections {
        if !should_include(selection.directives(), variables) {
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
                let applies = fragment
                    .type_condition
                    .as_deref()
                    .is_none_or(|condition| description.is_possible_type(condition, concrete));
                if applies {
                    collect_fields(description, concrete, &fragment.selection_set, variables, out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::operation::parse_operation;
    use crate::query_planner::{QueryPlanner, StitchingQueryPlanner};
    use crate::test_support::{RecordingExecutor, composed, recording};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn execute(
        query: &str,
        variables: Value,
        cart: &Arc<RecordingExecutor>,
        cms: &Arc<RecordingExecutor>,
    ) -> Value {
        let schema = composed(cart.clone(), cms.clone());
        let operation = parse_operation(query, None).unwrap();
        let variables = operation
            .coerce_variables(variables.as_object().unwrap())
            .unwrap();
        let plan = StitchingQueryPlanner::new()
            .plan_query(&operation, &schema, &variables)
            .unwrap();
        let context = RequestContext {
            variables,
            variable_definitions: operation.variable_definitions.clone(),
        };
        let response = StitchingQueryExecutor::new()
            .execute_plan(plan, &schema, &context)
            .await;
        serde_json::to_value(response).unwrap()
    }

    fn cart_with_items(ids: &[&str]) -> Value {
        let items: Vec<Value> = ids
            .iter()
            .map(|id| json!({ "_stitch_parent_id": id }))
            .collect();
        json!({ "data": { "CartQL_cart": { "items": items } } })
    }

    #[tokio::test]
    async fn joins_cart_items_to_products() {
        let (cart, cms) = (recording(), recording());
        cart.respond(cart_with_items(&["ckitem1", "ckitem2"]));
        cms.respond(json!({ "data": { "_stitch_result": { "id": "ckitem1" } } }))
            .respond(json!({ "data": { "_stitch_result": { "id": "ckitem2" } } }));

        let response = execute(
            r#"{ CartQL_cart(id: "X") { items { product { id } } } }"#,
            json!({}),
            &cart,
            &cms,
        )
        .await;

        assert_eq!(
            response,
            json!({
                "data": {
                    "CartQL_cart": {
                        "items": [
                            { "product": { "id": "ckitem1" } },
                            { "product": { "id": "ckitem2" } }
                        ]
                    }
                }
            })
        );
        assert_eq!(
            cart.queries(),
            vec![r#"query { CartQL_cart: cart(id: "X") { items { _stitch_parent_id: id } } }"#]
        );

        let delegated = cms.requests();
        assert_eq!(delegated.len(), 2);
        assert_eq!(
            delegated[0].query,
            "query($_stitch_arg_where: ProductWhereUniqueInput!) { _stitch_result: product(where: $_stitch_arg_where) { id } }"
        );
        assert_eq!(
            json!(delegated[1].variables),
            json!({ "_stitch_arg_where": { "id": "ckitem2" } })
        );
    }

    #[tokio::test]
    async fn forwards_stage_only_when_given() {
        let (cart, cms) = (recording(), recording());
        cart.respond(cart_with_items(&["a"]))
            .respond(cart_with_items(&["a"]));

        execute(
            r#"query($stage: CMS_Stage) { CartQL_cart(id: "X") { items { product(stage: $stage) { name } } } }"#,
            json!({}),
            &cart,
            &cms,
        )
        .await;
        execute(
            r#"{ CartQL_cart(id: "X") { items { product(stage: DRAFT) { name } } } }"#,
            json!({}),
            &cart,
            &cms,
        )
        .await;

        let delegated = cms.requests();
        assert!(!delegated[0].query.contains("stage"));
        assert_eq!(
            json!(delegated[0].variables),
            json!({ "_stitch_arg_where": { "id": "a" } })
        );
        assert_eq!(
            delegated[1].query,
            "query($_stitch_arg_where: ProductWhereUniqueInput!, $_stitch_arg_stage: Stage!) { _stitch_result: product(where: $_stitch_arg_where, stage: $_stitch_arg_stage) { name } }"
        );
        assert_eq!(delegated[1].variables["_stitch_arg_stage"], json!("DRAFT"));
    }

    #[tokio::test]
    async fn unreachable_join_target_yields_partial_response() {
        let (cart, cms) = (recording(), recording());
        cart.respond(json!({
            "data": { "CartQL_cart": { "id": "X", "items": [{ "name": "Shoe", "_stitch_parent_id": "a" }] } }
        }));
        cms.fail(GatewayError::UpstreamUnreachable {
            service: "cms".to_string(),
            reason: "connection refused".to_string(),
        });

        let response = execute(
            r#"{ CartQL_cart(id: "X") { id items { name product { name } } } }"#,
            json!({}),
            &cart,
            &cms,
        )
        .await;

        assert_eq!(
            response["data"],
            json!({ "CartQL_cart": { "id": "X", "items": [{ "name": "Shoe", "product": null }] } })
        );
        assert_eq!(
            response["errors"][0]["path"],
            json!(["CartQL_cart", "items", 0, "product"])
        );
        assert_eq!(
            response["errors"][0]["extensions"]["code"],
            json!("UPSTREAM_UNREACHABLE")
        );
    }

    #[tokio::test]
    async fn failed_root_fetch_only_nulls_its_own_fields() {
        let (cart, cms) = (recording(), recording());
        cart.fail(GatewayError::UpstreamUnreachable {
            service: "cart".to_string(),
            reason: "connection refused".to_string(),
        });
        cms.respond(json!({ "data": { "CMS_product": { "name": "Shoe" } } }));

        let response = execute(
            r#"{ CartQL_cart(id: "X") { id } CMS_product(where: { id: "p" }) { name } }"#,
            json!({}),
            &cart,
            &cms,
        )
        .await;

        assert_eq!(
            response["data"],
            json!({ "CartQL_cart": null, "CMS_product": { "name": "Shoe" } })
        );
        assert_eq!(response["errors"][0]["path"], json!(["CartQL_cart"]));
    }

    #[tokio::test]
    async fn failed_non_null_root_nulls_the_whole_response() {
        let (cart, cms) = (recording(), recording());
        cart.fail(GatewayError::UpstreamUnreachable {
            service: "cart".to_string(),
            reason: "connection refused".to_string(),
        });

        let response = execute(
            r#"mutation { CartQL_addItem(input: { cartId: "X", id: "a", price: 100 }) { totalItems } }"#,
            json!({}),
            &cart,
            &cms,
        )
        .await;

        assert_eq!(response["data"], Value::Null);
        assert_eq!(response["errors"].as_array().unwrap().len(), 1);
        assert_eq!(response["errors"][0]["path"], json!(["CartQL_addItem"]));
    }

    #[tokio::test]
    async fn upstream_null_in_non_null_field_nulls_the_nearest_nullable_parent() {
        let (cart, cms) = (recording(), recording());
        cart.respond(json!({ "data": { "CartQL_cart": { "id": "X", "totalItems": null } } }));

        let response = execute(
            r#"{ CartQL_cart(id: "X") { id totalItems } }"#,
            json!({}),
            &cart,
            &cms,
        )
        .await;

        assert_eq!(
            response,
            json!({
                "data": { "CartQL_cart": null },
                "errors": [{
                    "message": "Cannot return null for non-nullable field totalItems.",
                    "path": ["CartQL_cart", "totalItems"]
                }]
            })
        );
    }

    #[tokio::test]
    async fn upstream_errors_without_data_are_reported_once() {
        let (cart, cms) = (recording(), recording());
        cart.respond(json!({ "data": null, "errors": [{ "message": "Cart service is down" }] }));

        let response = execute(
            r#"{ CartQL_cart(id: "X") { id } again: CartQL_cart(id: "Y") { id } }"#,
            json!({}),
            &cart,
            &cms,
        )
        .await;

        assert_eq!(
            response,
            json!({
                "data": { "CartQL_cart": null, "again": null },
                "errors": [{
                    "message": "Cart service is down",
                    "extensions": { "service": "cart" }
                }]
            })
        );
    }

    #[tokio::test]
    async fn delegated_errors_without_data_fail_the_extension_field() {
        let (cart, cms) = (recording(), recording());
        cart.respond(cart_with_items(&["a"]));
        cms.respond(json!({ "errors": [{ "message": "Not authorized" }] }));

        let response = execute(
            r#"{ CartQL_cart(id: "X") { items { product { id } } } }"#,
            json!({}),
            &cart,
            &cms,
        )
        .await;

        assert_eq!(
            response,
            json!({
                "data": { "CartQL_cart": { "items": [{ "product": null }] } },
                "errors": [{
                    "message": "Not authorized",
                    "path": ["CartQL_cart", "items", 0, "product"],
                    "extensions": { "service": "cms" }
                }]
            })
        );
    }

    #[tokio::test]
    async fn upstream_errors_keep_message_and_remap_paths() {
        let (cart, cms) = (recording(), recording());
        cart.respond(cart_with_items(&["a"]));
        cms.respond(json!({
            "data": { "_stitch_result": null },
            "errors": [{ "message": "Product is archived", "path": ["_stitch_result"] }]
        }));

        let response = execute(
            r#"{ CartQL_cart(id: "X") { items { product { id } } } }"#,
            json!({}),
            &cart,
            &cms,
        )
        .await;

        assert_eq!(
            response["errors"],
            json!([{
                "message": "Product is archived",
                "path": ["CartQL_cart", "items", 0, "product"],
                "extensions": { "service": "cms" }
            }])
        );
    }

    #[tokio::test]
    async fn renames_typename_and_applies_type_conditions() {
        let (cart, cms) = (recording(), recording());
        cms.respond(json!({
            "data": { "CMS_node": { "id": "1", "name": "Shoe", "_stitch_typename": "Product" } }
        }));

        let response = execute(
            r#"{
                 __typename
                 CMS_node(id: "1") {
                   __typename
                   id
                   ... on CMS_Product { name }
                   ... on CMS_Asset { url }
                 }
               }"#,
            json!({}),
            &cart,
            &cms,
        )
        .await;

        assert_eq!(
            response,
            json!({
                "data": {
                    "__typename": "Query",
                    "CMS_node": { "__typename": "CMS_Product", "id": "1", "name": "Shoe" }
                }
            })
        );
    }

    #[tokio::test]
    async fn mutations_are_delegated_in_order() {
        let (cart, cms) = (recording(), recording());
        cart.respond(json!({
            "data": { "CartQL_addItem": { "totalItems": 1 }, "removed": { "totalItems": 0 } }
        }));

        let response = execute(
            r#"mutation($cart: ID!) {
                 CartQL_addItem(input: { cartId: $cart, id: "a", price: 100 }) { totalItems }
                 removed: CartQL_removeItem(input: { cartId: $cart, id: "a" }) { totalItems }
               }"#,
            json!({ "cart": "X" }),
            &cart,
            &cms,
        )
        .await;

        assert_eq!(
            cart.queries(),
            vec![
                r#"mutation($cart: ID!) { CartQL_addItem: addItem(input: {cartId: $cart, id: "a", price: 100}) { totalItems } removed: removeItem(input: {cartId: $cart, id: "a"}) { totalItems } }"#
            ]
        );
        assert_eq!(
            response["data"],
            json!({ "CartQL_addItem": { "totalItems": 1 }, "removed": { "totalItems": 0 } })
        );
        assert!(cms.requests().is_empty());
    }
}
