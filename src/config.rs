use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{GatewayError, Result};
use crate::remote_schema::parse_endpoint;
use crate::resolver::KeyMapping;
use crate::transform::NamespaceRule;

pub const DEFAULT_CONFIG_PATH: &str = "schemas/gateway.yaml";
pub const DEFAULT_PORT: u16 = 4000;

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default = "default_upstream_timeout_ms")]
    pub upstream_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    pub subgraphs: BTreeMap<String, SubgraphConfig>,
    #[serde(default)]
    pub stitching: StitchingConfig,
    /// Directory relative schema paths resolve against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubgraphConfig {
    pub routing_url: String,
    #[serde(flatten)]
    pub namespace: NamespaceRule,
    pub schema: SchemaConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchemaConfig {
    pub file: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StitchingConfig {
    #[serde(default)]
    pub type_defs: String,
    #[serde(default)]
    pub resolvers: Vec<ResolverConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    pub type_name: String,
    pub field_name: String,
    #[serde(default)]
    pub selection_set: String,
    pub delegate: DelegateConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DelegateConfig {
    pub subgraph: String,
    pub field_name: String,
    pub key: KeyMapping,
    #[serde(default)]
    pub forward_arguments: Vec<String>,
}

fn default_upstream_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl GatewayConfig {
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Reading gateway configuration: {:?}", path);
        let contents = fs::read_to_string(path).map_err(|source| GatewayError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
        Self::from_yaml(&contents, base_dir)
    }

    pub fn from_yaml(yaml: &str, base_dir: &Path) -> Result<Self> {
        let mut config: GatewayConfig = serde_yaml::from_str(yaml)
            .map_err(|e| GatewayError::InvalidConfig(e.to_string()))?;
        config.base_dir = base_dir.to_path_buf();
        config.check()?;
        Ok(config)
    }

    pub fn schema_path(&self, subgraph: &SubgraphConfig) -> PathBuf {
        self.base_dir.join(&subgraph.schema.file)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    fn check(&self) -> Result<()> {
        let invalid = |reason: String| Err(GatewayError::InvalidConfig(reason));

        if self.subgraphs.is_empty() {
            return invalid("at least one subgraph must be configured".to_string());
        }
        if self.upstream_timeout_ms == 0 || self.request_timeout_ms == 0 {
            return invalid("timeouts must be greater than zero".to_string());
        }

        for (name, subgraph) in &self.subgraphs {
            if let Err(reason) = parse_endpoint(&subgraph.routing_url) {
                return invalid(format!("subgraph {}: {}", name, reason));
            }
            if !is_name(&subgraph.namespace.service_prefix) {
                return invalid(format!(
                    "subgraph {}: service_prefix {:?} is not a valid GraphQL name",
                    name, subgraph.namespace.service_prefix
                ));
            }
        }

        let subgraphs: Vec<_> = self.subgraphs.iter().collect();
        for (i, (name, subgraph)) in subgraphs.iter().enumerate() {
            for (other_name, other) in &subgraphs[i + 1..] {
                if !subgraph.namespace.is_disjoint_from(&other.namespace) {
                    return invalid(format!(
                        "service prefixes of {} ({}) and {} ({}) overlap",
                        name,
                        subgraph.namespace.service_prefix,
                        other_name,
                        other.namespace.service_prefix
                    ));
                }
            }
        }

        for resolver in &self.stitching.resolvers {
            if !self.subgraphs.contains_key(&resolver.delegate.subgraph) {
                return invalid(format!(
                    "resolver {}.{} delegates to unknown subgraph {}",
                    resolver.type_name, resolver.field_name, resolver.delegate.subgraph
                ));
            }
        }
        Ok(())
    }
}

fn is_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first == '_' || first.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CONFIG: &str = r#"
server:
  port: 4100
upstream_timeout_ms: 2000
subgraphs:
  cart:
    routing_url: https://api.cartql.com/
    service_prefix: CartQL
    schema:
      file: cartql.graphql
  cms:
    routing_url: https://api-eu-central-1.graphcms.com/v2/ckrvra12f06pb01z82dn2ebd4/master
    service_prefix: CMS
    schema:
      file: snapshots/graphcms.json
stitching:
  type_defs: |
    extend type CartQL_CartItem { product(stage: CMS_Stage): CMS_Product }
  resolvers:
    - type_name: CartQL_CartItem
      field_name: product
      selection_set: "{ id }"
      delegate:
        subgraph: cms
        field_name: CMS_product
        key: { argument: where.id, parent_field: id }
        forward_arguments: [stage]
"#;

    #[test]
    fn parses_configuration() {
        let config = GatewayConfig::from_yaml(CONFIG, Path::new("schemas")).unwrap();

        assert_eq!(config.server.port, Some(4100));
        assert_eq!(config.upstream_timeout(), Duration::from_secs(2));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(
            config.subgraphs.keys().collect::<Vec<_>>(),
            vec!["cart", "cms"]
        );
        assert_eq!(
            config.schema_path(&config.subgraphs["cms"]),
            Path::new("schemas").join("snapshots/graphcms.json")
        );

        let resolver = &config.stitching.resolvers[0];
        assert_eq!(resolver.delegate.key.argument, "where.id");
        assert_eq!(resolver.delegate.forward_arguments, vec!["stage"]);
        assert!(config.stitching.type_defs.contains("extend type CartQL_CartItem"));
    }

    #[test]
    fn rejects_overlapping_prefixes() {
        let yaml = CONFIG.replace("service_prefix: CMS", "service_prefix: CartQL");
        let err = GatewayConfig::from_yaml(&yaml, Path::new(".")).unwrap_err();

        assert!(matches!(err, GatewayError::InvalidConfig(_)));
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn rejects_unusable_subgraphs() {
        let yaml = CONFIG.replace("https://api.cartql.com/", "ftp://api.cartql.com/");
        let err = GatewayConfig::from_yaml(&yaml, Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("subgraph cart"));

        let yaml = CONFIG.replace("service_prefix: CMS", "service_prefix: 9CMS");
        let err = GatewayConfig::from_yaml(&yaml, Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("not a valid GraphQL name"));

        let err = GatewayConfig::from_yaml("subgraphs: {}", Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("at least one subgraph"));
    }

    #[test]
    fn rejects_resolvers_for_unknown_subgraphs() {
        let yaml = CONFIG.replace("subgraph: cms", "subgraph: catalog");
        let err = GatewayConfig::from_yaml(&yaml, Path::new(".")).unwrap_err();

        assert!(err.to_string().contains("unknown subgraph catalog"));
    }
}
