use graphql_parser::schema::{
    Definition, Field, InputValue, SchemaDefinition, TypeDefinition, TypeExtension,
};
use indexmap::IndexMap;

use crate::{execution_request::OperationKind, schema::type_ref::TypeRef};

#[derive(Debug, Clone, thiserror::Error)]
pub enum SchemaMetadataError {
    #[error("Failed to parse schema: {0}")]
    ParseFailure(String),
    #[error("Schema declares no \"{0}\" root type")]
    MissingQueryRoot(&'static str),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::IntoStaticStr)]
pub enum TypeKind {
    Object,
    Interface,
    Union,
    Enum,
    Scalar,
    InputObject,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldMetadata {
    pub name: String,
    pub field_type: TypeRef,
    pub arguments: IndexMap<String, TypeRef>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TypeMetadata {
    pub name: String,
    pub kind: TypeKind,
    pub fields: IndexMap<String, FieldMetadata>,
    /// Interfaces implemented by an object or interface type.
    pub interfaces: Vec<String>,
    /// Members of a union type.
    pub members: Vec<String>,
}

impl TypeMetadata {
    fn new(name: &str, kind: TypeKind) -> Self {
        TypeMetadata {
            name: name.to_string(),
            kind,
            fields: IndexMap::new(),
            interfaces: Vec::new(),
            members: Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldMetadata> {
        self.fields.get(name)
    }

    pub fn is_composite(&self) -> bool {
        matches!(
            self.kind,
            TypeKind::Object | TypeKind::Interface | TypeKind::Union
        )
    }

    pub fn is_abstract(&self) -> bool {
        matches!(self.kind, TypeKind::Interface | TypeKind::Union)
    }
}

static BUILT_IN_SCALARS: &[&str] = &["Int", "Float", "String", "Boolean", "ID"];

/// Type information of one schema, as needed to plan and split operations.
///
/// Root operation types are always named `Query`, `Mutation` and `Subscription`,
/// whatever names the schema definition gives them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SchemaMetadata {
    types: IndexMap<String, TypeMetadata>,
}

impl SchemaMetadata {
    pub fn from_sdl(sdl: &str) -> Result<Self, SchemaMetadataError> {
        let document = graphql_parser::parse_schema::<String>(sdl)
            .map_err(|err| SchemaMetadataError::ParseFailure(err.to_string()))?;

        let mut metadata = SchemaMetadata::default();
        let mut schema_definition: Option<&SchemaDefinition<'_, String>> = None;

        for definition in &document.definitions {
            match definition {
                Definition::SchemaDefinition(definition) => schema_definition = Some(definition),
                Definition::TypeDefinition(type_definition) => {
                    metadata.add_type_definition(type_definition)
                }
                _ => {}
            }
        }

        for definition in &document.definitions {
            if let Definition::TypeExtension(extension) = definition {
                metadata.add_type_extension(extension);
            }
        }

        for scalar in BUILT_IN_SCALARS {
            metadata
                .types
                .entry(scalar.to_string())
                .or_insert_with(|| TypeMetadata::new(scalar, TypeKind::Scalar));
        }

        if let Some(schema_definition) = schema_definition {
            let roots = [
                (&schema_definition.query, OperationKind::Query),
                (&schema_definition.mutation, OperationKind::Mutation),
                (&schema_definition.subscription, OperationKind::Subscription),
            ];
            for (declared, kind) in roots {
                if let Some(declared) = declared {
                    if declared != kind.root_type_name() {
                        metadata.rename_type(declared, kind.root_type_name());
                    }
                }
            }
        }

        if metadata.root_type(OperationKind::Query).is_none() {
            return Err(SchemaMetadataError::MissingQueryRoot(
                OperationKind::Query.root_type_name(),
            ));
        }

        Ok(metadata)
    }

    fn add_type_definition(&mut self, definition: &TypeDefinition<'_, String>) {
        let type_metadata = match definition {
            TypeDefinition::Scalar(scalar) => TypeMetadata::new(&scalar.name, TypeKind::Scalar),
            TypeDefinition::Enum(enum_type) => TypeMetadata::new(&enum_type.name, TypeKind::Enum),
            TypeDefinition::Object(object) => {
                let mut type_metadata = TypeMetadata::new(&object.name, TypeKind::Object);
                type_metadata.interfaces = object.implements_interfaces.clone();
                type_metadata.fields = collect_fields(&object.fields);
                type_metadata
            }
            TypeDefinition::Interface(interface) => {
                let mut type_metadata = TypeMetadata::new(&interface.name, TypeKind::Interface);
                type_metadata.interfaces = interface.implements_interfaces.clone();
                type_metadata.fields = collect_fields(&interface.fields);
                type_metadata
            }
            TypeDefinition::Union(union) => {
                let mut type_metadata = TypeMetadata::new(&union.name, TypeKind::Union);
                type_metadata.members = union.types.clone();
                type_metadata
            }
            TypeDefinition::InputObject(input) => {
                let mut type_metadata = TypeMetadata::new(&input.name, TypeKind::InputObject);
                type_metadata.fields = collect_input_fields(&input.fields);
                type_metadata
            }
        };
        self.types
            .insert(type_metadata.name.clone(), type_metadata);
    }

    fn add_type_extension(&mut self, extension: &TypeExtension<'_, String>) {
        match extension {
            TypeExtension::Object(object) => {
                let type_metadata = self
                    .types
                    .entry(object.name.clone())
                    .or_insert_with(|| TypeMetadata::new(&object.name, TypeKind::Object));
                type_metadata
                    .interfaces
                    .extend(object.implements_interfaces.iter().cloned());
                type_metadata.fields.extend(collect_fields(&object.fields));
            }
            TypeExtension::Interface(interface) => {
                let type_metadata = self
                    .types
                    .entry(interface.name.clone())
                    .or_insert_with(|| TypeMetadata::new(&interface.name, TypeKind::Interface));
                type_metadata.fields.extend(collect_fields(&interface.fields));
            }
            TypeExtension::Union(union) => {
                let type_metadata = self
                    .types
                    .entry(union.name.clone())
                    .or_insert_with(|| TypeMetadata::new(&union.name, TypeKind::Union));
                type_metadata.members.extend(union.types.iter().cloned());
            }
            TypeExtension::InputObject(input) => {
                let type_metadata = self
                    .types
                    .entry(input.name.clone())
                    .or_insert_with(|| TypeMetadata::new(&input.name, TypeKind::InputObject));
                type_metadata
                    .fields
                    .extend(collect_input_fields(&input.fields));
            }
            _ => {}
        }
    }

    /// Merges several schemas into one. The first schema declaring a field wins.
    pub fn merged<'a>(schemas: impl IntoIterator<Item = &'a SchemaMetadata>) -> SchemaMetadata {
        let mut merged = SchemaMetadata::default();
        for schema in schemas {
            for type_metadata in schema.types.values() {
                match merged.types.get_mut(&type_metadata.name) {
                    None => {
                        merged
                            .types
                            .insert(type_metadata.name.clone(), type_metadata.clone());
                    }
                    Some(existing) => {
                        for (name, field) in &type_metadata.fields {
                            if !existing.fields.contains_key(name) {
                                existing.fields.insert(name.clone(), field.clone());
                            }
                        }
                        for interface in &type_metadata.interfaces {
                            if !existing.interfaces.contains(interface) {
                                existing.interfaces.push(interface.clone());
                            }
                        }
                        for member in &type_metadata.members {
                            if !existing.members.contains(member) {
                                existing.members.push(member.clone());
                            }
                        }
                    }
                }
            }
        }
        merged
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeMetadata> {
        self.types.values()
    }

    pub fn type_metadata(&self, name: &str) -> Option<&TypeMetadata> {
        self.types.get(name)
    }

    pub(crate) fn type_metadata_mut(&mut self, name: &str) -> Option<&mut TypeMetadata> {
        self.types.get_mut(name)
    }

    pub fn field(&self, type_name: &str, field_name: &str) -> Option<&FieldMetadata> {
        self.types.get(type_name)?.fields.get(field_name)
    }

    pub fn root_type(&self, kind: OperationKind) -> Option<&TypeMetadata> {
        self.types.get(kind.root_type_name())
    }

    pub fn is_abstract(&self, type_name: &str) -> bool {
        self.types
            .get(type_name)
            .is_some_and(TypeMetadata::is_abstract)
    }

    pub fn is_composite(&self, type_name: &str) -> bool {
        self.types
            .get(type_name)
            .is_some_and(TypeMetadata::is_composite)
    }

    /// Object types an instance of `type_name` can be.
    pub fn possible_types(&self, type_name: &str) -> Vec<&str> {
        match self.types.get(type_name) {
            None => Vec::new(),
            Some(type_metadata) => match type_metadata.kind {
                TypeKind::Object => vec![type_metadata.name.as_str()],
                TypeKind::Union => type_metadata.members.iter().map(String::as_str).collect(),
                TypeKind::Interface => self
                    .types
                    .values()
                    .filter(|candidate| {
                        candidate.kind == TypeKind::Object
                            && candidate.interfaces.iter().any(|name| name == type_name)
                    })
                    .map(|candidate| candidate.name.as_str())
                    .collect(),
                _ => Vec::new(),
            },
        }
    }

    pub fn satisfies_type_condition(&self, type_name: &str, type_condition: &str) -> bool {
        type_name == type_condition || self.possible_types(type_condition).contains(&type_name)
    }

    /// Renames a type and every reference to it.
    pub(crate) fn rename_type(&mut self, from: &str, to: &str) {
        let renamed: IndexMap<String, TypeMetadata> = std::mem::take(&mut self.types)
            .into_iter()
            .map(|(name, mut type_metadata)| {
                let rename = |candidate: &str| (candidate == from).then(|| to.to_string());
                for field in type_metadata.fields.values_mut() {
                    field.field_type.rename(rename);
                    for argument in field.arguments.values_mut() {
                        argument.rename(rename);
                    }
                }
                for reference in type_metadata
                    .interfaces
                    .iter_mut()
                    .chain(type_metadata.members.iter_mut())
                {
                    if reference == from {
                        *reference = to.to_string();
                    }
                }
                if name == from {
                    type_metadata.name = to.to_string();
                    (to.to_string(), type_metadata)
                } else {
                    (name, type_metadata)
                }
            })
            .collect();
        self.types = renamed;
    }

    pub(crate) fn remove_field(&mut self, type_name: &str, field_name: &str) {
        if let Some(type_metadata) = self.types.get_mut(type_name) {
            type_metadata.fields.shift_remove(field_name);
        }
    }
}

fn collect_fields(fields: &[Field<'_, String>]) -> IndexMap<String, FieldMetadata> {
    fields
        .iter()
        .map(|field| {
            let arguments = field
                .arguments
                .iter()
                .map(|argument| (argument.name.clone(), TypeRef::from_ast(&argument.value_type)))
                .collect();
            (
                field.name.clone(),
                FieldMetadata {
                    name: field.name.clone(),
                    field_type: TypeRef::from_ast(&field.field_type),
                    arguments,
                },
            )
        })
        .collect()
}

fn collect_input_fields(fields: &[InputValue<'_, String>]) -> IndexMap<String, FieldMetadata> {
    fields
        .iter()
        .map(|field| {
            (
                field.name.clone(),
                FieldMetadata {
                    name: field.name.clone(),
                    field_type: TypeRef::from_ast(&field.value_type),
                    arguments: IndexMap::new(),
                },
            )
        })
        .collect()
}
