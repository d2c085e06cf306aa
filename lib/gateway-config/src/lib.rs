mod env_overrides;
pub mod log;
pub mod metrics;
pub mod subschema;

use config::{Config, File, FileFormat, FileSourceFile};
use envconfig::Envconfig;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::path::PathBuf;

use crate::{
    env_overrides::{EnvVarOverrides, EnvVarOverridesError},
    log::LoggingConfig,
    metrics::MetricsConfig,
    subschema::SubschemaConfigEntry,
};

#[derive(Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct HiveGatewayConfig {
    #[serde(skip)]
    root_directory: PathBuf,

    /// The gateway logger configuration.
    ///
    /// The gateway is configured to be mostly silent (`info`) level, and will print only important messages, warnings, and errors.
    #[serde(default)]
    pub log: LoggingConfig,

    /// The upstream subschemas the gateway delegates to.
    ///
    /// Subschemas are consulted in declaration order when a root field is owned by more than one of them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subschemas: Vec<SubschemaConfigEntry>,

    /// Configuration for the Prometheus metrics collected around subschema executions.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl HiveGatewayConfig {
    pub fn root_directory(&self) -> &PathBuf {
        &self.root_directory
    }

    pub fn subschema(&self, name: &str) -> Option<&SubschemaConfigEntry> {
        self.subschemas.iter().find(|entry| entry.name == name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayConfigError {
    #[error("Failed to load configuration: {0}")]
    ConfigLoadError(#[from] config::ConfigError),
    #[error("Failed to apply configuration overrides: {0}")]
    EnvVarOverridesError(#[from] EnvVarOverridesError),
    #[error("Failed to load the environment variables: {0}")]
    EnvVarLoadError(#[from] envconfig::Error),
    #[error("Failed to get the current directory: {0}")]
    CurrentDirError(std::io::Error),
    #[error("Failed to parse the configuration file path: {0}")]
    ConfigPathParseError(Infallible),
    #[error("Subschema \"{0}\" is declared more than once")]
    DuplicateSubschema(String),
}

static DEFAULT_FILE_NAMES: &[&str] = &[
    "gateway.config.yaml",
    "gateway.config.yml",
    "gateway.config.json",
    "gateway.config.json5",
];

fn get_current_dir() -> Result<PathBuf, GatewayConfigError> {
    std::env::current_dir().map_err(GatewayConfigError::CurrentDirError)
}

fn ensure_unique_subschemas(config: &HiveGatewayConfig) -> Result<(), GatewayConfigError> {
    for (index, entry) in config.subschemas.iter().enumerate() {
        if config.subschemas[..index]
            .iter()
            .any(|previous| previous.name == entry.name)
        {
            return Err(GatewayConfigError::DuplicateSubschema(entry.name.clone()));
        }
    }

    Ok(())
}

pub fn load_config(
    override_config_path: Option<String>,
) -> Result<HiveGatewayConfig, GatewayConfigError> {
    let env_overrides = EnvVarOverrides::init_from_env()?;
    let mut config = Config::builder();
    let mut config_root_path = get_current_dir()?;

    if let Some(path_str) = override_config_path {
        let path_buf = path_str
            .parse::<std::path::PathBuf>()
            .map_err(GatewayConfigError::ConfigPathParseError)?;
        if let Some(parent_dir) = path_buf.parent() {
            config_root_path = config_root_path.join(parent_dir);
        }
        let as_file: File<FileSourceFile, _> = path_buf.into();

        config = config.add_source(as_file.required(true));
    } else {
        for name in DEFAULT_FILE_NAMES {
            config = config.add_source(File::with_name(name).required(false));
        }
    }

    config = env_overrides.apply_overrides(config)?;

    let mut base_cfg = config.build()?.try_deserialize::<HiveGatewayConfig>()?;
    ensure_unique_subschemas(&base_cfg)?;
    base_cfg.root_directory = config_root_path;

    Ok(base_cfg)
}

pub fn parse_yaml_config(config_raw: String) -> Result<HiveGatewayConfig, GatewayConfigError> {
    let config_root_path = get_current_dir()?;

    let mut base_cfg = Config::builder()
        .add_source(File::from_str(&config_raw, FileFormat::Yaml))
        .build()?
        .try_deserialize::<HiveGatewayConfig>()?;
    ensure_unique_subschemas(&base_cfg)?;
    base_cfg.root_directory = config_root_path;

    Ok(base_cfg)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::{
        log::LogLevel,
        parse_yaml_config,
        subschema::{FlushScheduleConfig, TransformConfig},
        GatewayConfigError,
    };

    #[test]
    fn parses_subschemas_with_batching_transforms_and_merge() {
        let raw = r#"
log:
  level: warn
subschemas:
  - name: products
    batch: true
    batching:
      max_batch_size: 10
      share: false
      flush:
        delay: 5ms
    transforms:
      - kind: rename_types
        renames:
          - from: Product
            to: StoreProduct
      - kind: filter_fields
        type_name: Query
        hidden: [internalProducts]
    merge:
      - type_name: StoreProduct
        selection_set: "{ upc }"
        field_name: product
        args:
          - name: upc
            key: upc
  - name: accounts
"#;
        let config = parse_yaml_config(raw.to_string()).expect("config should parse");

        assert!(matches!(config.log.level, LogLevel::Warn));
        assert_eq!(config.subschemas.len(), 2);

        let products = config.subschema("products").expect("products is declared");
        assert!(products.batch);
        assert_eq!(products.batching.max_batch_size, Some(10));
        assert_eq!(
            products.batching.flush,
            FlushScheduleConfig::Delay(Duration::from_millis(5))
        );
        assert!(!products.batching.share);
        assert_eq!(products.transforms.len(), 2);
        assert!(matches!(
            &products.transforms[0],
            TransformConfig::RenameTypes { renames } if renames[0].from == "Product" && renames[0].to == "StoreProduct"
        ));
        assert!(matches!(
            &products.transforms[1],
            TransformConfig::FilterFields { type_name, hidden } if type_name == "Query" && hidden == &vec!["internalProducts".to_string()]
        ));
        let merge = &products.merge[0];
        assert_eq!(merge.type_name, "StoreProduct");
        assert_eq!(merge.field_name, "product");
        assert_eq!(merge.args[0].name, "upc");
        assert_eq!(merge.args[0].key, "upc");

        let accounts = config.subschema("accounts").expect("accounts is declared");
        assert!(!accounts.batch);
        assert_eq!(accounts.batching.flush, FlushScheduleConfig::NextTick);
        assert!(accounts.batching.share);
    }

    #[test]
    fn rejects_duplicated_subschema_names() {
        let raw = r#"
subschemas:
  - name: products
  - name: products
"#;
        let err = parse_yaml_config(raw.to_string()).expect_err("duplicates are invalid");
        assert!(matches!(err, GatewayConfigError::DuplicateSubschema(name) if name == "products"));
    }

    #[test]
    fn rejects_unknown_fields() {
        let raw = r#"
subschemas:
  - name: products
    batched: true
"#;
        assert!(parse_yaml_config(raw.to_string()).is_err());
    }
}
