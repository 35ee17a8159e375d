use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::composer::{ComposedSchema, compose};
use crate::error::{GatewayError, Result};
use crate::remote_schema::{RemoteExecutor, RemoteSchema, UpstreamRequest};
use crate::resolver::{DelegatingResolver, KeyMapping, ResolverEntry, ResolverMap};
use crate::schema::SchemaDescription;
use crate::transform::{NamespaceRule, TransformedSchema, transform};
use crate::GraphQLResponse;

pub const CART_SDL: &str = r#"
    type Query { cart(id: ID!): Cart }
    type Mutation {
      addItem(input: AddToCartInput!): Cart!
      removeItem(input: RemoveFromCartInput!): Cart
    }
    type Cart { id: ID! totalItems: Int! items: [CartItem!]! subTotal: Money! }
    type CartItem { id: ID! name: String quantity: Int! unitTotal: Money! }
    type Money { amount: Int! formatted: String! }
    input AddToCartInput { cartId: ID! id: ID! name: String price: Int quantity: Int = 1 }
    input RemoveFromCartInput { cartId: ID! id: ID! }
"#;

pub const CMS_SDL: &str = r#"
    type Query {
      product(where: ProductWhereUniqueInput!, stage: Stage! = PUBLISHED): Product
      node(id: ID!): Node
    }
    interface Node { id: ID! }
    type Product implements Node {
      id: ID!
      name: String!
      slug: String!
      description: String
      price: Int!
      updatedAt: DateTime
    }
    type Asset implements Node { id: ID! url: String! }
    input ProductWhereUniqueInput { id: ID slug: String }
    enum Stage { DRAFT PUBLISHED }
    scalar DateTime
"#;

pub const STITCHING_TYPE_DEFS: &str =
    "extend type CartQL_CartItem { product(stage: CMS_Stage): CMS_Product }";

/// Records every delegated request and answers from a queue of canned responses.
#[derive(Default)]
pub struct RecordingExecutor {
    requests: Mutex<Vec<UpstreamRequest>>,
    responses: Mutex<VecDeque<Result<GraphQLResponse>>>,
}

impl RecordingExecutor {
    pub fn respond(&self, body: Value) -> &Self {
        let response = serde_json::from_value(body).unwrap();
        self.responses.lock().unwrap().push_back(Ok(response));
        self
    }

    pub fn fail(&self, error: GatewayError) -> &Self {
        self.responses.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn requests(&self) -> Vec<UpstreamRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn queries(&self) -> Vec<String> {
        self.requests().into_iter().map(|request| request.query).collect()
    }
}

#[async_trait]
impl RemoteExecutor for RecordingExecutor {
    async fn execute(&self, request: UpstreamRequest) -> Result<GraphQLResponse> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(GraphQLResponse::default()))
    }
}

pub fn recording() -> Arc<RecordingExecutor> {
    Arc::new(RecordingExecutor::default())
}

pub fn remote(name: &str, sdl: &str) -> RemoteSchema {
    remote_with(name, sdl, recording())
}

pub fn remote_with(name: &str, sdl: &str, executor: Arc<RecordingExecutor>) -> RemoteSchema {
    let description = SchemaDescription::from_sdl(name, sdl).unwrap();
    description.validate(name).unwrap();
    RemoteSchema::new(name, Arc::new(description), executor)
}

pub fn cart_schema(executor: Arc<RecordingExecutor>) -> Arc<TransformedSchema> {
    transform(remote_with("cart", CART_SDL, executor), &NamespaceRule::new("CartQL"))
}

pub fn cms_schema(executor: Arc<RecordingExecutor>) -> Arc<TransformedSchema> {
    transform(remote_with("cms", CMS_SDL, executor), &NamespaceRule::new("CMS"))
}

pub fn product_resolvers(cms: &Arc<TransformedSchema>) -> ResolverMap {
    let resolver = DelegatingResolver::new(
        cms.clone(),
        "CMS_product",
        KeyMapping {
            argument: "where.id".to_string(),
            parent_field: "id".to_string(),
        },
        vec!["stage".to_string()],
    );
    let mut fields = HashMap::new();
    fields.insert(
        "product".to_string(),
        ResolverEntry {
            selection_set: "{ id }".to_string(),
            resolver: Arc::new(resolver),
        },
    );
    let mut resolvers = HashMap::new();
    resolvers.insert("CartQL_CartItem".to_string(), fields);
    resolvers
}

/// The CartQL + CMS composition with the `CartQL_CartItem.product` join.
pub fn composed(cart: Arc<RecordingExecutor>, cms: Arc<RecordingExecutor>) -> ComposedSchema {
    let cart = cart_schema(cart);
    let cms = cms_schema(cms);
    let resolvers = product_resolvers(&cms);
    compose(vec![cart, cms], STITCHING_TYPE_DEFS, resolvers).unwrap()
}
