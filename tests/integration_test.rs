use httpmock::{Method::POST, Mock, MockServer};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stitch_gateway::{Gateway, GatewayError, GraphQLRequest};
use tempfile::TempDir;

const CART_SDL: &str = include_str!("../schemas/cartql.graphql");
const CMS_SDL: &str = include_str!("../schemas/graphcms.graphql");

// Test fixture owning a scratch directory with the gateway configuration and snapshots
struct TestFixture {
    dir: TempDir,
}

impl TestFixture {
    fn new(cart_url: &str, cms_url: &str) -> Self {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("cartql.graphql"), CART_SDL).unwrap();
        fs::write(dir.path().join("graphcms.graphql"), CMS_SDL).unwrap();

        let fixture = TestFixture { dir };
        fixture.write_config(&Self::config(cart_url, "CartQL", cms_url, "CMS"));
        fixture
    }

    fn config(cart_url: &str, cart_prefix: &str, cms_url: &str, cms_prefix: &str) -> String {
        format!(
            r#"
upstream_timeout_ms: 2000
request_timeout_ms: 10000
subgraphs:
  cart:
    routing_url: {cart_url}
    service_prefix: {cart_prefix}
    schema:
      file: cartql.graphql
  cms:
    routing_url: {cms_url}
    service_prefix: {cms_prefix}
    schema:
      file: graphcms.graphql
stitching:
  type_defs: |
    extend type CartQL_CartItem {{
      product(stage: CMS_Stage): CMS_Product
    }}
  resolvers:
    - type_name: CartQL_CartItem
      field_name: product
      selection_set: "{{ id }}"
      delegate:
        subgraph: cms
        field_name: CMS_product
        key: {{ argument: where.id, parent_field: id }}
        forward_arguments: [stage]
"#
        )
    }

    fn config_path(&self) -> PathBuf {
        self.dir.path().join("gateway.yaml")
    }

    fn write_config(&self, contents: &str) {
        fs::write(self.config_path(), contents).unwrap();
    }

    fn gateway(&self) -> Gateway {
        Gateway::from_config(&self.config_path()).unwrap()
    }
}

fn url(server: &MockServer) -> String {
    format!("{}/", server.base_url())
}

fn cart_with_items<'a>(server: &'a MockServer, ids: &[&str]) -> Mock<'a> {
    let items: Vec<Value> = ids
        .iter()
        .map(|id| json!({ "_stitch_parent_id": id }))
        .collect();
    server.mock(|when, then| {
        when.method(POST).path("/");
        then.status(200)
            .header("Content-Type", "application/json")
            .json_body(json!({ "data": { "CartQL_cart": { "id": "cart-1", "items": items } } }));
    })
}

fn product<'a>(server: &'a MockServer, partial: Value, result: Value) -> Mock<'a> {
    server.mock(|when, then| {
        when.method(POST)
            .path("/")
            .json_body_partial(partial.to_string());
        then.status(200)
            .header("Content-Type", "application/json")
            .json_body(json!({ "data": { "_stitch_result": result } }));
    })
}

fn query(query: &str) -> GraphQLRequest {
    GraphQLRequest {
        query: query.to_string(),
        ..GraphQLRequest::default()
    }
}

#[tokio::test]
async fn test_cart_items_are_joined_with_products() {
    let cart = MockServer::start_async().await;
    let cms = MockServer::start_async().await;
    let fixture = TestFixture::new(&url(&cart), &url(&cms));

    let cart_mock = cart_with_items(&cart, &["p1", "p2"]);
    let shoe = product(
        &cms,
        json!({ "variables": { "_stitch_arg_where": { "id": "p1" } } }),
        json!({ "id": "p1", "name": "Shoe" }),
    );
    let sock = product(
        &cms,
        json!({ "variables": { "_stitch_arg_where": { "id": "p2" } } }),
        json!({ "id": "p2", "name": "Sock" }),
    );

    let response = fixture
        .gateway()
        .process_request(query(
            r#"{ CartQL_cart(id: "cart-1") { id items { product { id name } } } }"#,
        ))
        .await;

    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        json!({
            "data": {
                "CartQL_cart": {
                    "id": "cart-1",
                    "items": [
                        { "product": { "id": "p1", "name": "Shoe" } },
                        { "product": { "id": "p2", "name": "Sock" } }
                    ]
                }
            }
        })
    );
    cart_mock.assert_hits(1);
    shoe.assert_hits(1);
    sock.assert_hits(1);
}

#[tokio::test]
async fn test_stage_is_forwarded_only_when_given() {
    let cart = MockServer::start_async().await;
    let cms = MockServer::start_async().await;
    let fixture = TestFixture::new(&url(&cart), &url(&cms));
    let gateway = fixture.gateway();

    let cart_mock = cart_with_items(&cart, &["p1"]);
    let draft = product(
        &cms,
        json!({ "variables": { "_stitch_arg_stage": "DRAFT" } }),
        json!({ "name": "Shoe (draft)" }),
    );

    let response = gateway
        .process_request(query(
            r#"{ CartQL_cart(id: "cart-1") { items { product(stage: DRAFT) { name } } } }"#,
        ))
        .await;
    assert_eq!(
        response.data,
        Some(json!({ "CartQL_cart": { "items": [{ "product": { "name": "Shoe (draft)" } }] } }))
    );
    draft.assert_hits(1);

    let published = product(
        &cms,
        json!({ "variables": { "_stitch_arg_where": { "id": "p1" } } }),
        json!({ "name": "Shoe" }),
    );
    let response = gateway
        .process_request(query(
            r#"{ CartQL_cart(id: "cart-1") { items { product { name } } } }"#,
        ))
        .await;
    assert_eq!(
        response.data,
        Some(json!({ "CartQL_cart": { "items": [{ "product": { "name": "Shoe" } }] } }))
    );
    published.assert_hits(1);
    cart_mock.assert_hits(2);
}

#[tokio::test]
async fn test_unreachable_cms_yields_partial_data() {
    let cart = MockServer::start_async().await;
    let fixture = TestFixture::new(&url(&cart), "http://127.0.0.1:1/");
    let _cart_mock = cart_with_items(&cart, &["p1"]);

    let response = fixture
        .gateway()
        .process_request(query(
            r#"{ CartQL_cart(id: "cart-1") { id items { product { name } } } }"#,
        ))
        .await;

    assert_eq!(
        response.data,
        Some(json!({ "CartQL_cart": { "id": "cart-1", "items": [{ "product": null }] } }))
    );
    assert_eq!(response.errors.len(), 1);
    let error = serde_json::to_value(&response.errors[0]).unwrap();
    assert_eq!(error["path"], json!(["CartQL_cart", "items", 0, "product"]));
    assert_eq!(error["extensions"]["code"], json!("UPSTREAM_UNREACHABLE"));
}

#[tokio::test]
async fn test_upstream_errors_are_reported_under_the_client_path() {
    let cart = MockServer::start_async().await;
    let cms = MockServer::start_async().await;
    let fixture = TestFixture::new(&url(&cart), &url(&cms));

    cart.mock(|when, then| {
        when.method(POST).path("/");
        then.status(200).json_body(json!({
            "data": { "CartQL_cart": null },
            "errors": [{ "message": "Cart not found", "path": ["CartQL_cart"] }]
        }));
    });

    let response = fixture
        .gateway()
        .process_request(query(r#"{ CartQL_cart(id: "missing") { id } }"#))
        .await;

    assert_eq!(response.data, Some(json!({ "CartQL_cart": null })));
    assert_eq!(response.errors[0].message, "Cart not found");
    assert_eq!(
        serde_json::to_value(&response.errors[0]).unwrap()["path"],
        json!(["CartQL_cart"])
    );
}

#[tokio::test]
async fn test_mutations_are_delegated_with_renamed_input_types() {
    let cart = MockServer::start_async().await;
    let cms = MockServer::start_async().await;
    let fixture = TestFixture::new(&url(&cart), &url(&cms));

    let add_item = cart.mock(|when, then| {
        when.method(POST).path("/").json_body_partial(
            json!({
                "query": "mutation($input: AddToCartInput!) { CartQL_addItem: addItem(input: $input) { totalItems } }",
                "variables": { "input": { "cartId": "cart-1", "id": "p1", "price": 1000 } }
            })
            .to_string(),
        );
        then.status(200)
            .json_body(json!({ "data": { "CartQL_addItem": { "totalItems": 1 } } }));
    });

    let response = fixture
        .gateway()
        .process_request(GraphQLRequest {
            query: "mutation($input: CartQL_AddToCartInput!) { CartQL_addItem(input: $input) { totalItems } }"
                .to_string(),
            variables: Some(json!({ "input": { "cartId": "cart-1", "id": "p1", "price": 1000 } })),
            operation_name: None,
        })
        .await;

    assert_eq!(
        response.data,
        Some(json!({ "CartQL_addItem": { "totalItems": 1 } }))
    );
    add_item.assert_hits(1);
}

#[tokio::test]
async fn test_introspection_is_answered_locally() {
    let cart = MockServer::start_async().await;
    let cms = MockServer::start_async().await;
    let fixture = TestFixture::new(&url(&cart), &url(&cms));
    let cart_mock = cart.mock(|when, then| {
        when.method(POST);
        then.status(500);
    });
    let cms_mock = cms.mock(|when, then| {
        when.method(POST);
        then.status(500);
    });

    let response = fixture
        .gateway()
        .process_request(query(
            r#"{ __type(name: "CartQL_CartItem") { fields { name } } }"#,
        ))
        .await;

    let names: Vec<Value> = response.data.unwrap()["__type"]["fields"]
        .as_array()
        .unwrap()
        .iter()
        .map(|field| field["name"].clone())
        .collect();
    assert!(names.contains(&json!("product")));
    assert!(names.contains(&json!("unitTotal")));
    cart_mock.assert_hits(0);
    cms_mock.assert_hits(0);
}

#[test]
fn test_colliding_prefixes_fail_startup() {
    let fixture = TestFixture::new("http://localhost:4001/", "http://localhost:4002/");
    fixture.write_config(&TestFixture::config(
        "http://localhost:4001/",
        "Shop",
        "http://localhost:4002/",
        "Shop",
    ));

    let err = Gateway::from_config(&fixture.config_path()).err().unwrap();
    assert!(matches!(err, GatewayError::InvalidConfig(_)));
}

#[test]
fn test_extension_colliding_with_a_subschema_field_fails_composition() {
    let fixture = TestFixture::new("http://localhost:4001/", "http://localhost:4002/");
    let config = TestFixture::config(
        "http://localhost:4001/",
        "CartQL",
        "http://localhost:4002/",
        "CMS",
    )
    .replace("product(stage: CMS_Stage): CMS_Product", "name: CMS_Product")
    .replace("field_name: product", "field_name: name")
    .replace("forward_arguments: [stage]", "forward_arguments: []");
    fixture.write_config(&config);

    let err = Gateway::from_config(&fixture.config_path()).err().unwrap();
    assert!(matches!(err, GatewayError::SchemaCompositionConflict(_)));
}

#[test]
fn test_missing_snapshot_fails_startup() {
    let fixture = TestFixture::new("http://localhost:4001/", "http://localhost:4002/");
    fs::remove_file(fixture.dir.path().join("graphcms.graphql")).unwrap();

    let err = Gateway::from_config(&fixture.config_path()).err().unwrap();
    assert!(matches!(err, GatewayError::Io { .. }));
}

#[tokio::test]
async fn test_failed_reload_keeps_the_current_schema() {
    let fixture = TestFixture::new("http://localhost:4001/", "http://localhost:4002/");
    let gateway = fixture.gateway();
    let original = gateway.schema().await;

    fixture.write_config("subgraphs: {}");
    assert!(gateway.reload().await.is_err());
    assert!(Arc::ptr_eq(&original, &gateway.schema().await));

    fixture.write_config(&TestFixture::config(
        "http://localhost:4001/",
        "CartQL",
        "http://localhost:4002/",
        "CMS",
    ));
    gateway.reload().await.unwrap();
    let reloaded = gateway.schema().await;
    assert!(!Arc::ptr_eq(&original, &reloaded));
    assert_eq!(reloaded.description.to_sdl(), original.description.to_sdl());
}

#[tokio::test]
async fn test_shipped_configuration_composes() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("schemas/gateway.yaml");
    let gateway = Gateway::from_config(&path).unwrap();

    let schema = gateway.schema().await;
    let sdl = schema.description.to_sdl();
    assert!(sdl.contains("CartQL_cart("));
    assert!(sdl.contains("CMS_product("));
    assert!(sdl.contains("product(stage: CMS_Stage): CMS_Product"));
}
