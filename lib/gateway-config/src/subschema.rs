use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SubschemaConfigEntry {
    /// The name of the subschema. Used to pair the entry with its schema and executor,
    /// and as the `subgraphName` label of the collected metrics.
    pub name: String,

    /// Enables batching of the requests sent to this subschema.
    ///
    /// When enabled, requests issued within the same scheduling tick are coalesced into a single
    /// call of the underlying executor, and identical requests are sent only once.
    #[serde(default)]
    pub batch: bool,

    /// Fine-tuning of the batching behavior. Ignored when `batch` is disabled.
    #[serde(default)]
    pub batching: BatchingConfig,

    /// Transforms applied to the subschema, listed from the gateway side inward.
    ///
    /// Outgoing requests go through them in declaration order, results in reverse order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transforms: Vec<TransformConfig>,

    /// Describes how instances of a type are fetched from this subschema by their key.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merge: Vec<MergedTypeConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct BatchingConfig {
    /// The maximum amount of distinct requests in a single batch.
    /// A batch reaching this size is sent right away and a new one is started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_batch_size: Option<usize>,

    /// When the collected requests are sent.
    #[serde(default)]
    pub flush: FlushScheduleConfig,

    /// Lets other batched subschemas over the same executor, with the same batching
    /// settings, send their requests in the batches of this one.
    #[serde(default = "default_share")]
    pub share: bool,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        BatchingConfig {
            max_batch_size: None,
            flush: FlushScheduleConfig::default(),
            share: default_share(),
        }
    }
}

fn default_share() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FlushScheduleConfig {
    /// Sends the batch once every request issued in the current scheduling tick is collected.
    #[default]
    NextTick,
    /// Waits for the given amount of scheduler ticks before sending the batch.
    Ticks(usize),
    /// Waits for the given duration before sending the batch (e.g. `5ms`).
    Delay(
        #[serde(with = "humantime_serde")]
        #[schemars(with = "String")]
        Duration,
    ),
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RenameConfig {
    /// The name as the subschema knows it.
    pub from: String,
    /// The name exposed towards the gateway.
    pub to: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum TransformConfig {
    /// Renames types of the subschema.
    RenameTypes { renames: Vec<RenameConfig> },
    /// Renames fields of a single type of the subschema.
    RenameFields {
        type_name: String,
        renames: Vec<RenameConfig>,
    },
    /// Hides fields of a single type of the subschema from the gateway.
    FilterFields {
        type_name: String,
        hidden: Vec<String>,
    },
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct MergedTypeConfig {
    /// The type, as exposed by this subschema to the gateway.
    pub type_name: String,

    /// The key fields other subschemas have to provide, e.g. `{ upc }`.
    pub selection_set: String,

    /// The root query field of this subschema used to fetch an instance by its key.
    pub field_name: String,

    /// Maps the arguments of `field_name` to key fields of the instance.
    pub args: Vec<MergeArgConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct MergeArgConfig {
    /// Argument of the merge field.
    pub name: String,
    /// Key field read from the instance.
    pub key: String,
}
