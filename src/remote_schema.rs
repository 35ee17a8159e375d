use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use crate::error::{GatewayError, Result};
use crate::schema::SchemaDescription;
use crate::{GraphQLResponse, Variables};

/// An outgoing operation: printed query text plus the variables it declares.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UpstreamRequest {
    pub query: String,
    pub variables: Variables,
}

/// Sends an operation to a remote GraphQL service.
///
/// A GraphQL error payload is not an `Err`: it comes back inside the
/// [`GraphQLResponse`] so callers can keep partial data.
#[async_trait]
pub trait RemoteExecutor {
    async fn execute(&self, request: UpstreamRequest) -> Result<GraphQLResponse>;
}

pub struct HttpExecutor {
    client: reqwest::Client,
    service: String,
    url: Url,
    timeout: Option<Duration>,
}

impl HttpExecutor {
    pub fn new(client: reqwest::Client, service: &str, url: Url) -> Self {
        HttpExecutor {
            client,
            service: service.to_string(),
            url,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn map_send_error(&self, error: reqwest::Error) -> GatewayError {
        if error.is_timeout() {
            if let Some(timeout) = self.timeout {
                return GatewayError::UpstreamTimeout {
                    service: self.service.clone(),
                    timeout,
                };
            }
        }
        GatewayError::UpstreamUnreachable {
            service: self.service.clone(),
            reason: error.to_string(),
        }
    }
}

#[async_trait]
impl RemoteExecutor for HttpExecutor {
    async fn execute(&self, request: UpstreamRequest) -> Result<GraphQLResponse> {
        debug!(service = %self.service, query = %request.query, "Delegating to upstream");

        let mut builder = self
            .client
            .post(self.url.clone())
            .header("Content-Type", "application/json")
            .json(&request);
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|e| {
            warn!(service = %self.service, error = %e, "Upstream request failed");
            self.map_send_error(e)
        })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| self.map_send_error(e))?;

        // Error statuses still count as GraphQL responses when the body is one.
        serde_json::from_slice::<GraphQLResponse>(&body).map_err(|e| {
            warn!(service = %self.service, %status, "Upstream returned a non-GraphQL body");
            GatewayError::UpstreamInvalidResponse {
                service: self.service.clone(),
                reason: if status.is_success() {
                    e.to_string()
                } else {
                    format!("HTTP status {}", status)
                },
            }
        })
    }
}

/// A schema description bound to the executor that satisfies it.
#[derive(Clone)]
pub struct RemoteSchema {
    pub name: String,
    pub description: Arc<SchemaDescription>,
    pub executor: Arc<dyn RemoteExecutor + Send + Sync>,
}

impl RemoteSchema {
    pub fn new(
        name: &str,
        description: Arc<SchemaDescription>,
        executor: Arc<dyn RemoteExecutor + Send + Sync>,
    ) -> Self {
        RemoteSchema {
            name: name.to_string(),
            description,
            executor,
        }
    }

    pub async fn execute(&self, request: UpstreamRequest) -> Result<GraphQLResponse> {
        self.executor.execute(request).await
    }
}

/// Binds `description` to an HTTP executor for `endpoint`. Nothing is sent until the
/// first delegated operation.
pub fn load(
    name: &str,
    description: Arc<SchemaDescription>,
    endpoint: &str,
    client: reqwest::Client,
    timeout: Option<Duration>,
) -> Result<RemoteSchema> {
    let url = parse_endpoint(endpoint)
        .map_err(|reason| GatewayError::InvalidConfig(format!("subgraph {}: {}", name, reason)))?;

    let mut executor = HttpExecutor::new(client, name, url);
    if let Some(timeout) = timeout {
        executor = executor.with_timeout(timeout);
    }
    Ok(RemoteSchema::new(name, description, Arc::new(executor)))
}

pub(crate) fn parse_endpoint(endpoint: &str) -> std::result::Result<Url, String> {
    if endpoint.trim().is_empty() {
        return Err("endpoint URL is empty".to_string());
    }
    let url = Url::parse(endpoint).map_err(|e| format!("invalid endpoint URL {}: {}", endpoint, e))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(format!("unsupported endpoint scheme {}", scheme)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn rejects_unusable_endpoints() {
        assert!(parse_endpoint("").is_err());
        assert!(parse_endpoint("not a url").is_err());
        assert!(parse_endpoint("ftp://example.com/graphql").is_err());
        assert_eq!(
            parse_endpoint("https://api.cartql.com/").unwrap().as_str(),
            "https://api.cartql.com/"
        );
    }

    #[test]
    fn upstream_request_serializes_query_and_variables() {
        let request = UpstreamRequest {
            query: "query { cart(id: \"1\") { id } }".to_string(),
            variables: json!({ "a": 1 }).as_object().cloned().unwrap(),
        };

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({ "query": "query { cart(id: \"1\") { id } }", "variables": { "a": 1 } })
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_reported() {
        let description = Arc::new(
            SchemaDescription::from_sdl("cart", "type Query { ping: String }").unwrap(),
        );
        let remote = load(
            "cart",
            description,
            "http://127.0.0.1:9/graphql",
            reqwest::Client::new(),
            Some(Duration::from_secs(2)),
        )
        .unwrap();

        let err = remote
            .execute(UpstreamRequest {
                query: "query { ping }".to_string(),
                variables: Variables::new(),
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            GatewayError::UpstreamUnreachable { .. } | GatewayError::UpstreamTimeout { .. }
        ));
    }
}
