use std::convert::Infallible;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, ALLOW,
    CONTENT_TYPE, LOCATION,
};
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use stitch_gateway::config::{DEFAULT_CONFIG_PATH, DEFAULT_PORT};
use stitch_gateway::gateway::is_mutation;
use stitch_gateway::{Gateway, GatewayConfig, GraphQLError, GraphQLRequest, GraphQLResponse};

type Body = BoxBody<Bytes, hyper::Error>;

/// A GraphQL gateway stitching several remote schemas into one endpoint.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Gateway configuration file
    #[arg(long, env = "GATEWAY_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Listening port, overrides `server.port` from the configuration
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print the composed schema as SDL and exit
    #[arg(long)]
    print_schema: bool,
}

fn full<T: Into<Bytes>>(value: T) -> Body {
    Full::new(value.into())
        .map_err(|never| match never {})
        .boxed()
}

const GRAPHIQL_HTML: &str = r#"
<!DOCTYPE html>
<html>
<head>
  <title>GraphiQL - Stitch Gateway</title>
  <link href="https://unpkg.com/graphiql@1.5.0/graphiql.min.css" rel="stylesheet" />
  <style>
    body { margin: 0; padding: 0; height: 100vh; }
    #graphiql { height: 100vh; }
  </style>
</head>
<body>
  <div id="graphiql"></div>

  <script src="https://unpkg.com/react@17.0.2/umd/react.production.min.js"></script>
  <script src="https://unpkg.com/react-dom@17.0.2/umd/react-dom.production.min.js"></script>
  <script src="https://unpkg.com/graphiql@1.5.0/graphiql.min.js"></script>
  <script>
    function graphQLFetcher(graphQLParams) {
      return fetch('/graphql', {
        method: 'post',
        headers: { 'Content-Type': 'application/json' },
        body: JSON.stringify(graphQLParams),
      }).then(response => response.json());
    }

    ReactDOM.render(
      React.createElement(GraphiQL, { fetcher: graphQLFetcher }),
      document.getElementById('graphiql')
    );
  </script>
</body>
</html>
"#;

async fn handle_request(
    req: Request<Incoming>,
    gateway: Arc<Gateway>,
) -> Result<Response<Body>, Infallible> {
    debug!(method = %req.method(), path = %req.uri().path(), "Incoming request");

    let response = match (req.method(), req.uri().path()) {
        (&Method::POST, "/graphql") => {
            let body_bytes = match req.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => return Ok(bad_request(format!("Failed to read request body: {}", e))),
            };

            match serde_json::from_slice::<GraphQLRequest>(&body_bytes) {
                Ok(graphql_req) => graphql_response(&gateway.process_request(graphql_req).await),
                Err(e) => bad_request(format!("Invalid JSON request: {}", e)),
            }
        }

        (&Method::GET, "/graphql") => match request_from_query(req.uri().query().unwrap_or("")) {
            Ok(None) => respond(StatusCode::OK, "text/html", GRAPHIQL_HTML),
            Ok(Some(graphql_req))
                if is_mutation(&graphql_req.query, graphql_req.operation_name.as_deref()) =>
            {
                let mut response = error_response(
                    StatusCode::METHOD_NOT_ALLOWED,
                    "Can only perform a mutation operation from a POST request.",
                );
                response
                    .headers_mut()
                    .insert(ALLOW, http::HeaderValue::from_static("POST"));
                response
            }
            Ok(Some(graphql_req)) => graphql_response(&gateway.process_request(graphql_req).await),
            Err(message) => bad_request(message),
        },

        (&Method::GET, "/") => Response::builder()
            .status(StatusCode::FOUND)
            .header(LOCATION, "/graphql")
            .header(ACCESS_CONTROL_ALLOW_ORIGIN, "*")
            .body(full(""))
            .unwrap_or_else(|_| internal_server_error()),

        (&Method::OPTIONS, _) => Response::builder()
            .status(StatusCode::NO_CONTENT)
            .header(ACCESS_CONTROL_ALLOW_ORIGIN, "*")
            .header(ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, OPTIONS")
            .header(ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type")
            .body(full(""))
            .unwrap_or_else(|_| internal_server_error()),

        _ => respond(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
    };

    Ok(response)
}

/// Reads `query`, `variables` and `operationName` from a GET query string.
/// `Ok(None)` means no query was sent.
fn request_from_query(query_string: &str) -> Result<Option<GraphQLRequest>, String> {
    let mut request = GraphQLRequest::default();
    let mut has_query = false;

    for (key, value) in url::form_urlencoded::parse(query_string.as_bytes()) {
        match key.as_ref() {
            "query" => {
                request.query = value.into_owned();
                has_query = true;
            }
            "variables" if !value.is_empty() => {
                let variables: Value = serde_json::from_str(&value)
                    .map_err(|e| format!("Variables are invalid JSON: {}", e))?;
                request.variables = Some(variables);
            }
            "operationName" if !value.is_empty() => {
                request.operation_name = Some(value.into_owned());
            }
            _ => {}
        }
    }

    Ok(has_query.then_some(request))
}

// Responses without data failed before execution started.
fn graphql_response(response: &GraphQLResponse) -> Response<Body> {
    let status = if response.data.is_none() && !response.errors.is_empty() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::OK
    };
    match serde_json::to_string(response) {
        Ok(json) => respond(status, "application/json", json),
        Err(e) => {
            error!("Failed to serialize response: {}", e);
            internal_server_error()
        }
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response<Body> {
    let error = GraphQLError::new(message).with_extension("code", Value::from("BAD_REQUEST"));
    let body = GraphQLResponse::from_errors(vec![error]);
    match serde_json::to_string(&body) {
        Ok(json) => respond(status, "application/json", json),
        Err(_) => internal_server_error(),
    }
}

fn bad_request(message: impl Into<String>) -> Response<Body> {
    error_response(StatusCode::BAD_REQUEST, message)
}

fn respond<T: Into<Bytes>>(status: StatusCode, content_type: &str, body: T) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, content_type)
        .header(ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .body(full(body))
        .unwrap_or_else(|_| internal_server_error())
}

fn internal_server_error() -> Response<Body> {
    let mut response = Response::new(full("Internal Server Error"));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

#[cfg(unix)]
fn reload_on_hangup(gateway: Arc<Gateway>) -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangups = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;
    tokio::task::spawn(async move {
        while hangups.recv().await.is_some() {
            info!("SIGHUP received, reloading configuration");
            if let Err(e) = gateway.reload().await {
                warn!("Reload failed, keeping the current schema: {}", e);
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn reload_on_hangup(_gateway: Arc<Gateway>) -> anyhow::Result<()> {
    Ok(())
}

#[derive(Clone)]
// An Executor that uses the tokio runtime.
pub struct TokioExecutor;

impl<F> hyper::rt::Executor<F> for TokioExecutor
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    fn execute(&self, fut: F) {
        tokio::task::spawn(fut);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let built = GatewayConfig::load(&args.config).and_then(|config| {
        let gateway = Gateway::with_config(&args.config, &config)?;
        Ok((gateway, config))
    });
    let (gateway, config) = match built {
        Ok(built) => built,
        Err(e) => {
            error!("Failed to build the gateway from {:?}: {}", args.config, e);
            return Err(e).with_context(|| format!("loading {}", args.config.display()));
        }
    };
    let port = args.port.or(config.server.port).unwrap_or(DEFAULT_PORT);
    let gateway = Arc::new(gateway);

    if args.print_schema {
        print!("{}", gateway.schema().await.description.to_sdl());
        return Ok(());
    }

    reload_on_hangup(gateway.clone())?;

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Stitch gateway listening on http://{}/graphql", addr);

    loop {
        let (stream, peer) = listener.accept().await?;
        let io = TokioIo::new(stream);

        let gateway_clone = Arc::clone(&gateway);

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let gateway = gateway_clone.clone();
                handle_request(req, gateway)
            });

            if let Err(e) = hyper_util::server::conn::auto::Builder::new(TokioExecutor)
                .serve_connection(io, service)
                .await
            {
                debug!(%peer, "Error processing connection: {}", e);
            }
        });
    }
}
