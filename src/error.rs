use std::time::Duration;

use serde_json::Value;

use crate::{GraphQLError, PathSegment};

#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("Failed to reach upstream service {service}: {reason}")]
    UpstreamUnreachable { service: String, reason: String },

    #[error("Upstream service {service} did not answer within {timeout:?}")]
    UpstreamTimeout { service: String, timeout: Duration },

    #[error("Upstream service {service} returned an invalid response: {reason}")]
    UpstreamInvalidResponse { service: String, reason: String },

    /// The upstream answered with GraphQL errors and no usable data.
    #[error("Upstream service {service} reported: {}", join_messages(.errors))]
    UpstreamGraphQLError {
        service: String,
        errors: Vec<GraphQLError>,
    },

    #[error("Schema composition conflict: {0}")]
    SchemaCompositionConflict(String),

    #[error("Cannot extend unknown type \"{0}\"")]
    UnknownExtensionTarget(String),

    #[error("Invalid schema extension: {0}")]
    InvalidExtension(String),

    #[error("Invalid schema snapshot {source_name}: {reason}")]
    InvalidSnapshot { source_name: String, reason: String },

    #[error("Invalid gateway configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Syntax error: {0}")]
    Parse(String),

    #[error("{0}")]
    Validation(String),

    #[error("Request exceeded the gateway timeout of {0:?}")]
    GatewayTimeout(Duration),
}

impl GatewayError {
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::UpstreamUnreachable { .. } => "UPSTREAM_UNREACHABLE",
            GatewayError::UpstreamTimeout { .. } => "UPSTREAM_TIMEOUT",
            GatewayError::UpstreamInvalidResponse { .. } => "UPSTREAM_INVALID_RESPONSE",
            GatewayError::UpstreamGraphQLError { .. } => "UPSTREAM_GRAPHQL_ERROR",
            GatewayError::SchemaCompositionConflict(_) => "SCHEMA_COMPOSITION_CONFLICT",
            GatewayError::UnknownExtensionTarget(_) => "UNKNOWN_EXTENSION_TARGET",
            GatewayError::InvalidExtension(_) => "INVALID_EXTENSION",
            GatewayError::InvalidSnapshot { .. } => "INVALID_SNAPSHOT",
            GatewayError::InvalidConfig(_) => "INVALID_CONFIG",
            GatewayError::Io { .. } => "IO_ERROR",
            GatewayError::Parse(_) => "GRAPHQL_PARSE_FAILED",
            GatewayError::Validation(_) => "GRAPHQL_VALIDATION_FAILED",
            GatewayError::GatewayTimeout(_) => "GATEWAY_TIMEOUT",
        }
    }

    /// Converts the error into response error entries scoped to `path`.
    ///
    /// Upstream GraphQL errors keep their message and extensions; their paths are
    /// remapped beneath `path` by the caller before this is reached, so here they only
    /// receive a path when they carry none.
    pub fn into_graphql_errors(self, path: Option<Vec<PathSegment>>) -> Vec<GraphQLError> {
        match self {
            GatewayError::UpstreamGraphQLError { errors, .. } => errors
                .into_iter()
                .map(|mut error| {
                    if error.path.is_none() {
                        error.path = path.clone();
                    }
                    error
                })
                .collect(),
            other => {
                let code = other.code();
                let mut error = GraphQLError::new(other.to_string())
                    .with_extension("code", Value::String(code.to_string()));
                error.path = path;
                vec![error]
            }
        }
    }
}

fn join_messages(errors: &[GraphQLError]) -> String {
    errors
        .iter()
        .map(|error| error.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T, E = GatewayError> = std::result::Result<T, E>;
