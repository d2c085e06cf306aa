use std::sync::Arc;

use graphql_parser::query::{Definition, OperationDefinition, Selection as ParserSelection};
use hive_gateway_config::subschema::{MergedTypeConfig, SubschemaConfigEntry};
use indexmap::IndexMap;
use tracing::debug;

use crate::{
    delegation::error::SubschemaError,
    execution_request::OperationKind,
    executors::{
        batch::{BatchingExecutor, BatchingOptions},
        common::ExecutorArc,
    },
    schema::{
        metadata::SchemaMetadata,
        transforms::{transform_from_config, transformed_schema, SubschemaTransformArc},
        type_ref::TypeRef,
    },
};

/// How calls reach the executor of a subschema.
#[derive(Clone)]
pub enum SubschemaDispatch {
    Direct,
    /// Owns a batch window over the executor. Unless `isolated`, subschemas with the same
    /// executor and equal options end up sharing one window once the gateway is built.
    Batched {
        options: BatchingOptions,
        coalescer: Arc<BatchingExecutor>,
        isolated: bool,
    },
    Shared(Arc<BatchingExecutor>),
}

impl SubschemaDispatch {
    pub fn is_batched(&self) -> bool {
        !matches!(self, SubschemaDispatch::Direct)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MergeArgument {
    pub name: String,
    /// Key field of the instance providing the value.
    pub key: String,
    /// Type of the argument in the subschema.
    pub arg_type: TypeRef,
}

/// How instances of a type are fetched from a subschema by their key.
#[derive(Clone, Debug, PartialEq)]
pub struct MergeDescriptor {
    /// Type name in the gateway schema.
    pub type_name: String,
    pub key_fields: Vec<String>,
    /// Root query field of the subschema itself, not renamed by transforms.
    pub field_name: String,
    pub args: Vec<MergeArgument>,
}

/// One upstream of the gateway.
///
/// Built once at startup and shared by every request afterwards.
pub struct Subschema {
    name: String,
    inner: SchemaMetadata,
    view: SchemaMetadata,
    transforms: Vec<SubschemaTransformArc>,
    merge: IndexMap<String, MergeDescriptor>,
    executor: ExecutorArc,
    dispatch: SubschemaDispatch,
}

impl Subschema {
    pub fn new(
        name: impl Into<String>,
        sdl: &str,
        executor: ExecutorArc,
    ) -> Result<Self, SubschemaError> {
        let name = name.into();
        let inner = SchemaMetadata::from_sdl(sdl).map_err(|source| SubschemaError::Schema {
            subschema: name.clone(),
            source,
        })?;

        Ok(Subschema {
            name,
            view: inner.clone(),
            inner,
            transforms: Vec::new(),
            merge: IndexMap::new(),
            executor,
            dispatch: SubschemaDispatch::Direct,
        })
    }

    /// Builds a subschema from its configuration entry. Transforms are applied before the
    /// merge descriptors are resolved, so those use the names exposed to the gateway.
    pub fn from_config(
        entry: &SubschemaConfigEntry,
        sdl: &str,
        executor: ExecutorArc,
    ) -> Result<Self, SubschemaError> {
        let mut subschema = Subschema::new(&entry.name, sdl, executor)?;
        for transform in entry.transforms.iter().rev() {
            subschema = subschema.transform(transform_from_config(transform));
        }
        if entry.batch {
            let options = BatchingOptions::from(&entry.batching);
            subschema = if entry.batching.share {
                subschema.batched(options)
            } else {
                subschema.batched_isolated(options)
            };
        }
        for merged_type in &entry.merge {
            subschema = subschema.merge(merged_type)?;
        }
        Ok(subschema)
    }

    pub fn batched(self, options: BatchingOptions) -> Self {
        self.with_batch_window(options, false)
    }

    /// Batches calls in a window of its own, never shared with other subschemas.
    pub fn batched_isolated(self, options: BatchingOptions) -> Self {
        self.with_batch_window(options, true)
    }

    fn with_batch_window(mut self, options: BatchingOptions, isolated: bool) -> Self {
        self.dispatch = SubschemaDispatch::Batched {
            coalescer: Arc::new(BatchingExecutor::merging(
                self.executor.clone(),
                options.clone(),
            )),
            options,
            isolated,
        };
        self
    }

    /// Routes calls through an existing coalescer, joining its batch window.
    pub fn with_shared_batching(mut self, coalescer: Arc<BatchingExecutor>) -> Self {
        self.dispatch = SubschemaDispatch::Shared(coalescer);
        self
    }

    /// Adds a transform on the gateway side of the ones already registered.
    pub fn transform(mut self, transform: SubschemaTransformArc) -> Self {
        self.transforms.insert(0, transform);
        self.view = transformed_schema(&self.inner, &self.transforms);
        self
    }

    pub fn merge(mut self, config: &MergedTypeConfig) -> Result<Self, SubschemaError> {
        let invalid = |reason: String| SubschemaError::InvalidMerge {
            subschema: self.name.clone(),
            type_name: config.type_name.clone(),
            reason,
        };

        if self.view.type_metadata(&config.type_name).is_none() {
            return Err(invalid("the type is not part of the subschema".to_string()));
        }
        let field = self
            .inner
            .field(OperationKind::Query.root_type_name(), &config.field_name)
            .ok_or_else(|| invalid(format!("unknown root field \"{}\"", config.field_name)))?;
        let key_fields = parse_key_fields(&config.selection_set).map_err(&invalid)?;

        let mut args = Vec::with_capacity(config.args.len());
        for arg in &config.args {
            let arg_type = field.arguments.get(&arg.name).ok_or_else(|| {
                invalid(format!(
                    "\"{}\" has no argument \"{}\"",
                    config.field_name, arg.name
                ))
            })?;
            if !key_fields.contains(&arg.key) {
                return Err(invalid(format!(
                    "argument \"{}\" reads \"{}\", which is not a key field",
                    arg.name, arg.key
                )));
            }
            args.push(MergeArgument {
                name: arg.name.clone(),
                key: arg.key.clone(),
                arg_type: arg_type.clone(),
            });
        }
        if args.is_empty() {
            return Err(invalid("at least one argument is required".to_string()));
        }

        debug!(
            subschema = self.name.as_str(),
            type_name = config.type_name.as_str(),
            field_name = config.field_name.as_str(),
            "registered merged type"
        );
        self.merge.insert(
            config.type_name.clone(),
            MergeDescriptor {
                type_name: config.type_name.clone(),
                key_fields,
                field_name: config.field_name.clone(),
                args,
            },
        );
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The schema as the subschema itself declares it.
    pub fn inner_schema(&self) -> &SchemaMetadata {
        &self.inner
    }

    /// The schema as the gateway sees it, after transforms.
    pub fn schema(&self) -> &SchemaMetadata {
        &self.view
    }

    pub fn transforms(&self) -> &[SubschemaTransformArc] {
        &self.transforms
    }

    pub fn merge_descriptor(&self, type_name: &str) -> Option<&MergeDescriptor> {
        self.merge.get(type_name)
    }

    pub fn dispatch(&self) -> &SubschemaDispatch {
        &self.dispatch
    }

    /// The executor calls to this subschema go through, batched or not.
    pub fn executor(&self) -> ExecutorArc {
        match &self.dispatch {
            SubschemaDispatch::Direct => self.executor.clone(),
            SubschemaDispatch::Batched { coalescer, .. } | SubschemaDispatch::Shared(coalescer) => {
                coalescer.clone()
            }
        }
    }
}

fn same_executor(left: &ExecutorArc, right: &ExecutorArc) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(left), Arc::as_ptr(right))
}

/// Makes batched subschemas over the same executor instance share one batch window.
/// Isolated windows neither join nor get joined.
pub(crate) fn share_batch_windows(subschemas: &mut [Subschema]) {
    for index in 1..subschemas.len() {
        let (earlier, rest) = subschemas.split_at_mut(index);
        let current = &mut rest[0];
        let SubschemaDispatch::Batched {
            options,
            isolated: false,
            ..
        } = &current.dispatch
        else {
            continue;
        };

        let shared = earlier.iter().find_map(|candidate| match &candidate.dispatch {
            SubschemaDispatch::Batched {
                options: candidate_options,
                coalescer,
                isolated: false,
            } if same_executor(&current.executor, &candidate.executor)
                && options == candidate_options =>
            {
                Some(coalescer.clone())
            }
            _ => None,
        });

        if let Some(coalescer) = shared {
            debug!(
                subschema = current.name.as_str(),
                "sharing the batch window of another subschema"
            );
            current.dispatch = SubschemaDispatch::Shared(coalescer);
        }
    }
}

fn parse_key_fields(selection_set: &str) -> Result<Vec<String>, String> {
    let document = graphql_parser::parse_query::<String>(selection_set)
        .map_err(|err| format!("invalid key selection set: {err}"))?;
    let Some(Definition::Operation(OperationDefinition::SelectionSet(selection_set))) =
        document.definitions.first()
    else {
        return Err("the key must be a bare selection set, e.g. \"{ id }\"".to_string());
    };

    let mut key_fields = Vec::with_capacity(selection_set.items.len());
    for item in &selection_set.items {
        match item {
            ParserSelection::Field(field)
                if field.alias.is_none()
                    && field.arguments.is_empty()
                    && field.selection_set.items.is_empty() =>
            {
                key_fields.push(field.name.clone());
            }
            _ => return Err("only plain scalar fields are supported as keys".to_string()),
        }
    }
    if key_fields.is_empty() {
        return Err("the key selection set is empty".to_string());
    }
    Ok(key_fields)
}
