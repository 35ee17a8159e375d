use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::composer::{ComposedSchema, compose};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::operation::{OperationKind, parse_operation};
use crate::query_executor::{QueryExecutor, StitchingQueryExecutor};
use crate::query_planner::{QueryPlanner, StitchingQueryPlanner};
use crate::remote_schema;
use crate::resolver::{DelegatingResolver, RequestContext, ResolverEntry, ResolverMap};
use crate::snapshot::load_snapshot;
use crate::transform::{TransformedSchema, transform};
use crate::validation;
use crate::{GraphQLRequest, GraphQLResponse, Variables};

struct ServingState {
    schema: Arc<ComposedSchema>,
    request_timeout: Duration,
}

/// Holds the composed schema for the life of the process and serves client
/// operations against it. The schema only changes through [`Gateway::reload`].
pub struct Gateway {
    state: RwLock<Arc<ServingState>>,
    config_path: Option<PathBuf>,
    client: reqwest::Client,
    query_planner: Box<dyn QueryPlanner + Send + Sync>,
    query_executor: Box<dyn QueryExecutor + Send + Sync>,
}

impl Gateway {
    pub fn new(schema: ComposedSchema, request_timeout: Duration) -> Self {
        Gateway {
            state: RwLock::new(Arc::new(ServingState {
                schema: Arc::new(schema),
                request_timeout,
            })),
            config_path: None,
            client: reqwest::Client::new(),
            query_planner: Box::new(StitchingQueryPlanner::new()),
            query_executor: Box::new(StitchingQueryExecutor::new()),
        }
    }

    /// Loads the configuration, every snapshot and the composition. Any failure
    /// aborts: a half-composed schema is never served.
    pub fn from_config(path: &Path) -> Result<Self> {
        let config = GatewayConfig::load(path)?;
        Self::with_config(path, &config)
    }

    /// Like [`Gateway::from_config`] for a configuration the caller already
    /// loaded from `path`. Reloads read `path` again.
    pub fn with_config(path: &Path, config: &GatewayConfig) -> Result<Self> {
        let client = reqwest::Client::new();
        let schema = build_schema(config, &client)?;

        Ok(Gateway {
            state: RwLock::new(Arc::new(ServingState {
                schema: Arc::new(schema),
                request_timeout: config.request_timeout(),
            })),
            config_path: Some(path.to_path_buf()),
            client,
            query_planner: Box::new(StitchingQueryPlanner::new()),
            query_executor: Box::new(StitchingQueryExecutor::new()),
        })
    }

    pub async fn schema(&self) -> Arc<ComposedSchema> {
        self.state.read().await.schema.clone()
    }

    /// Rebuilds the schema from the configuration file. On failure the current
    /// schema stays in place.
    pub async fn reload(&self) -> Result<()> {
        let path = self.config_path.as_deref().ok_or_else(|| {
            GatewayError::InvalidConfig("gateway was not built from a configuration file".to_string())
        })?;
        let config = GatewayConfig::load(path)?;
        let schema = build_schema(&config, &self.client)?;

        *self.state.write().await = Arc::new(ServingState {
            schema: Arc::new(schema),
            request_timeout: config.request_timeout(),
        });
        info!("Reloaded gateway schema from {:?}", path);
        Ok(())
    }

    pub async fn process_request(&self, request: GraphQLRequest) -> GraphQLResponse {
        debug!(operation_name = ?request.operation_name, "Processing request");
        let state = self.state.read().await.clone();

        match tokio::time::timeout(state.request_timeout, self.execute(&state.schema, request)).await {
            Ok(response) => response,
            Err(_) => {
                warn!(timeout = ?state.request_timeout, "Request exceeded the gateway timeout");
                GraphQLResponse {
                    data: Some(Value::Null),
                    errors: GatewayError::GatewayTimeout(state.request_timeout).into_graphql_errors(None),
                }
            }
        }
    }

    async fn execute(&self, schema: &ComposedSchema, request: GraphQLRequest) -> GraphQLResponse {
        let operation = match parse_operation(&request.query, request.operation_name.as_deref()) {
            Ok(operation) => operation,
            Err(e) => return GraphQLResponse::from_errors(e.into_graphql_errors(None)),
        };

        let problems = validation::validate(&schema.description, &operation);
        if !problems.is_empty() {
            return GraphQLResponse::from_errors(problems);
        }

        let provided = match request.variables {
            None | Some(Value::Null) => Variables::new(),
            Some(Value::Object(variables)) => variables,
            Some(_) => {
                let error = GatewayError::Validation("Variables must be a JSON object.".to_string());
                return GraphQLResponse::from_errors(error.into_graphql_errors(None));
            }
        };
        let planned = operation.coerce_variables(&provided).and_then(|variables| {
            let plan = self
                .query_planner
                .plan_query(&operation, schema, &variables)?;
            Ok((plan, variables))
        });
        let (plan, variables) = match planned {
            Ok(planned) => planned,
            Err(e) => return GraphQLResponse::from_errors(e.into_graphql_errors(None)),
        };

        let context = RequestContext {
            variables,
            variable_definitions: operation.variable_definitions,
        };
        self.query_executor.execute_plan(plan, schema, &context).await
    }
}

/// Whether the selected operation in `query` is a mutation. Unparseable documents
/// report `false` and fail later with a proper GraphQL error.
pub fn is_mutation(query: &str, operation_name: Option<&str>) -> bool {
    parse_operation(query, operation_name)
        .map(|operation| operation.kind == OperationKind::Mutation)
        .unwrap_or(false)
}

/// Binds every configured subgraph to its snapshot and endpoint, applies its
/// namespace and composes the result with the configured extensions.
pub fn build_schema(config: &GatewayConfig, client: &reqwest::Client) -> Result<ComposedSchema> {
    let mut subschemas: Vec<(String, Arc<TransformedSchema>)> = Vec::new();
    for (name, subgraph) in &config.subgraphs {
        let description = load_snapshot(&config.schema_path(subgraph))?;
        let remote = remote_schema::load(
            name,
            Arc::new(description),
            &subgraph.routing_url,
            client.clone(),
            Some(config.upstream_timeout()),
        )?;
        info!(
            subgraph = %name,
            url = %subgraph.routing_url,
            prefix = %subgraph.namespace.service_prefix,
            "Loaded remote schema"
        );
        subschemas.push((name.clone(), transform(remote, &subgraph.namespace)));
    }

    let mut resolvers: ResolverMap = HashMap::new();
    for resolver in &config.stitching.resolvers {
        let delegate = &resolver.delegate;
        let target = subschemas
            .iter()
            .find(|(name, _)| *name == delegate.subgraph)
            .map(|(_, subschema)| subschema.clone())
            .ok_or_else(|| {
                GatewayError::InvalidConfig(format!("unknown subgraph {}", delegate.subgraph))
            })?;

        let target_field = target
            .description
            .root_type(OperationKind::Query)
            .and_then(|root| root.field(&delegate.field_name))
            .ok_or_else(|| {
                GatewayError::InvalidConfig(format!(
                    "subgraph {} has no query field {}",
                    delegate.subgraph, delegate.field_name
                ))
            })?;
        let key_argument = delegate.key.argument.split('.').next().unwrap_or_default();
        if target_field.argument(key_argument).is_none() {
            return Err(GatewayError::InvalidConfig(format!(
                "{} has no argument {}",
                delegate.field_name, key_argument
            )));
        }

        let entry = ResolverEntry {
            selection_set: resolver.selection_set.clone(),
            resolver: Arc::new(DelegatingResolver::new(
                target,
                &delegate.field_name,
                delegate.key.clone(),
                delegate.forward_arguments.clone(),
            )),
        };
        let previous = resolvers
            .entry(resolver.type_name.clone())
            .or_default()
            .insert(resolver.field_name.clone(), entry);
        if previous.is_some() {
            return Err(GatewayError::InvalidConfig(format!(
                "more than one resolver for {}.{}",
                resolver.type_name, resolver.field_name
            )));
        }
    }

    compose(
        subschemas.into_iter().map(|(_, subschema)| subschema).collect(),
        &config.stitching.type_defs,
        resolvers,
    )
}
