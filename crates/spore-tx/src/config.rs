//! Assembly configuration: endpoints, fee policy, size ceiling and script registry.
//!
//! Configuration is layered with the `config` crate: an optional TOML file first,
//! then `SPORE__*` environment variables (`SPORE__NODE_URL`,
//! `SPORE__MAX_TRANSACTION_SIZE`, `SPORE__FEE_RATE`, ...).

use std::fmt;
use std::path::Path;
use std::sync::{OnceLock, PoisonError, RwLock};

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::SporeError;
use crate::types::{Byte32, CellDep, HashType, Script, hex_byte32};

/// Transaction size ceiling applied when none is configured, in bytes.
pub const DEFAULT_MAX_TRANSACTION_SIZE: u64 = 512_000;

const DEFAULT_NODE_URL: &str = "http://127.0.0.1:8114";

/// How the fee rate is chosen when the caller does not pass one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FeeRatePolicy {
    /// Fixed rate in shannons per 1000 bytes.
    Fixed(u64),
    /// Ask the fee collaborator for the pool's minimum rate.
    #[default]
    FetchMinimum,
}

const FETCH_MINIMUM: &str = "fetch-minimum";

impl Serialize for FeeRatePolicy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Fixed(rate) => serializer.serialize_u64(*rate),
            Self::FetchMinimum => serializer.serialize_str(FETCH_MINIMUM),
        }
    }
}

impl<'de> Deserialize<'de> for FeeRatePolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Rate(u64),
            Named(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Rate(rate) => Ok(Self::Fixed(rate)),
            Raw::Named(name) if name == FETCH_MINIMUM => Ok(Self::FetchMinimum),
            Raw::Named(name) => name.parse().map(Self::Fixed).map_err(|_| {
                serde::de::Error::custom(format!(
                    "fee rate must be an integer or '{FETCH_MINIMUM}', got '{name}'"
                ))
            }),
        }
    }
}

/// Size ceiling: an integer, or `false`/`null`/`"disabled"` to turn the check off.
mod size_limit {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(limit: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        match limit {
            Some(limit) => serializer.serialize_u64(*limit),
            None => serializer.serialize_bool(false),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Limit(u64),
            Flag(bool),
            Text(String),
            Disabled,
        }

        match Raw::deserialize(deserializer)? {
            Raw::Limit(limit) => Ok(Some(limit)),
            Raw::Flag(false) | Raw::Disabled => Ok(None),
            Raw::Flag(true) => Err(serde::de::Error::custom(
                "max_transaction_size must be an integer or false",
            )),
            Raw::Text(text) => match text.as_str() {
                "false" | "disabled" => Ok(None),
                other => other.parse().map(Some).map_err(|_| {
                    serde::de::Error::custom(format!(
                        "max_transaction_size must be an integer or false, got '{other}'"
                    ))
                }),
            },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScriptKind {
    Spore,
    Cluster,
    ClusterAgent,
    /// Spore extension scripts named by a content type's `mutant[]` parameter.
    Mutant,
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Spore => "Spore",
            Self::Cluster => "Cluster",
            Self::ClusterAgent => "ClusterAgent",
            Self::Mutant => "Mutant",
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptBehaviors {
    /// Mutations of cells under this script carry an action proof witness.
    #[serde(default)]
    pub cobuild: bool,
}

/// One deployed version of a protocol script.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptInfo {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(with = "hex_byte32")]
    pub code_hash: Byte32,
    pub hash_type: HashType,
    pub cell_dep: CellDep,
    #[serde(default)]
    pub behaviors: ScriptBehaviors,
    #[serde(default, with = "hex_byte32")]
    pub script_info_hash: Byte32,
}

impl ScriptInfo {
    #[must_use]
    pub fn script(&self, args: Vec<u8>) -> Script {
        Script::new(self.code_hash, self.hash_type, args)
    }

    #[must_use]
    pub fn matches(&self, script: &Script) -> bool {
        self.code_hash == script.code_hash && self.hash_type == script.hash_type
    }
}

/// Known script versions per kind, latest first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptRegistry {
    #[serde(default)]
    pub spore: Vec<ScriptInfo>,
    #[serde(default)]
    pub cluster: Vec<ScriptInfo>,
    #[serde(default)]
    pub cluster_agent: Vec<ScriptInfo>,
    #[serde(default)]
    pub mutant: Vec<ScriptInfo>,
}

impl ScriptRegistry {
    #[must_use]
    pub fn versions(&self, kind: ScriptKind) -> &[ScriptInfo] {
        match kind {
            ScriptKind::Spore => &self.spore,
            ScriptKind::Cluster => &self.cluster,
            ScriptKind::ClusterAgent => &self.cluster_agent,
            ScriptKind::Mutant => &self.mutant,
        }
    }

    /// Version used when creating new cells of `kind`.
    pub fn latest(&self, kind: ScriptKind) -> Result<&ScriptInfo, SporeError> {
        self.versions(kind).first().ok_or_else(|| {
            SporeError::InvalidRequest(format!("no {kind} script is configured"))
        })
    }

    /// Version matching an existing cell's type script.
    pub fn find(&self, kind: ScriptKind, script: &Script) -> Result<&ScriptInfo, SporeError> {
        self.versions(kind)
            .iter()
            .find(|info| info.matches(script))
            .ok_or_else(|| {
                SporeError::InvalidRequest(format!(
                    "type script 0x{} is not a known {kind} script",
                    hex::encode(script.code_hash)
                ))
            })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SporeConfig {
    pub node_url: String,
    pub indexer_url: String,
    #[serde(with = "size_limit")]
    pub max_transaction_size: Option<u64>,
    pub fee_rate: FeeRatePolicy,
    pub scripts: ScriptRegistry,
}

impl Default for SporeConfig {
    fn default() -> Self {
        Self {
            node_url: DEFAULT_NODE_URL.to_string(),
            indexer_url: DEFAULT_NODE_URL.to_string(),
            max_transaction_size: Some(DEFAULT_MAX_TRANSACTION_SIZE),
            fee_rate: FeeRatePolicy::default(),
            scripts: ScriptRegistry::default(),
        }
    }
}

impl SporeConfig {
    /// Load from an optional TOML file overlaid with `SPORE__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, SporeError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("SPORE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        tracing::debug!(?path, "loaded spore config");
        Ok(config)
    }

    /// Parse a TOML document without consulting the environment.
    pub fn from_toml(raw: &str) -> Result<Self, SporeError> {
        Ok(Config::builder()
            .add_source(File::from_str(raw, FileFormat::Toml))
            .build()?
            .try_deserialize()?)
    }
}

static SPORE_CONFIG: OnceLock<RwLock<SporeConfig>> = OnceLock::new();

fn config_cell() -> &'static RwLock<SporeConfig> {
    SPORE_CONFIG.get_or_init(|| RwLock::new(SporeConfig::default()))
}

/// Process-wide default configuration.
#[must_use]
pub fn get_spore_config() -> SporeConfig {
    config_cell()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

pub fn set_spore_config(config: SporeConfig) {
    *config_cell().write().unwrap_or_else(PoisonError::into_inner) = config;
}
