use std::fmt::{self, Display, Write};

use graphql_parser::query::Value as ParserValue;
use serde_json::{Map, Number, Value};

use crate::{
    execution_request::OperationKind,
    schema::type_ref::TypeRef,
    utils::{
        consts::TYPENAME_FIELD_NAME,
        pretty_display::{get_indent, PrettyDisplay},
    },
};

/// An argument value, as written in an operation.
#[derive(Clone, Debug, PartialEq)]
pub enum InputValue {
    Variable(String),
    Int(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Null,
    Enum(String),
    List(Vec<InputValue>),
    Object(Vec<(String, InputValue)>),
}

impl From<&ParserValue<'_, String>> for InputValue {
    fn from(value: &ParserValue<'_, String>) -> Self {
        match value {
            ParserValue::Variable(name) => InputValue::Variable(name.clone()),
            ParserValue::Int(number) => InputValue::Int(number.as_i64().unwrap_or_default()),
            ParserValue::Float(float) => InputValue::Float(*float),
            ParserValue::String(string) => InputValue::String(string.clone()),
            ParserValue::Boolean(boolean) => InputValue::Boolean(*boolean),
            ParserValue::Null => InputValue::Null,
            ParserValue::Enum(name) => InputValue::Enum(name.clone()),
            ParserValue::List(items) => InputValue::List(items.iter().map(Into::into).collect()),
            ParserValue::Object(fields) => InputValue::Object(
                fields
                    .iter()
                    .map(|(name, value)| (name.clone(), value.into()))
                    .collect(),
            ),
        }
    }
}

impl InputValue {
    /// Resolves the value against the operation variables. Unknown variables are `null`.
    pub fn to_json(&self, variables: &Map<String, Value>) -> Value {
        match self {
            InputValue::Variable(name) => variables.get(name).cloned().unwrap_or(Value::Null),
            InputValue::Int(int) => Value::Number((*int).into()),
            InputValue::Float(float) => Number::from_f64(*float)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            InputValue::String(string) | InputValue::Enum(string) => Value::String(string.clone()),
            InputValue::Boolean(boolean) => Value::Bool(*boolean),
            InputValue::Null => Value::Null,
            InputValue::List(items) => {
                Value::Array(items.iter().map(|item| item.to_json(variables)).collect())
            }
            InputValue::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(name, value)| (name.clone(), value.to_json(variables)))
                    .collect(),
            ),
        }
    }

    pub fn collect_variables<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            InputValue::Variable(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            InputValue::List(items) => items.iter().for_each(|item| item.collect_variables(out)),
            InputValue::Object(fields) => fields
                .iter()
                .for_each(|(_, value)| value.collect_variables(out)),
            _ => {}
        }
    }
}

impl Display for InputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputValue::Variable(name) => write!(f, "${name}"),
            InputValue::Int(int) => write!(f, "{int}"),
            InputValue::Float(float) => {
                if float.fract() == 0.0 && float.is_finite() {
                    write!(f, "{float:.1}")
                } else {
                    write!(f, "{float}")
                }
            }
            // JSON string escapes are valid GraphQL string escapes
            InputValue::String(string) => write!(f, "{}", Value::String(string.clone())),
            InputValue::Boolean(boolean) => write!(f, "{boolean}"),
            InputValue::Null => f.write_str("null"),
            InputValue::Enum(name) => f.write_str(name),
            InputValue::List(items) => {
                f.write_char('[')?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_char(',')?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_char(']')
            }
            InputValue::Object(fields) => {
                f.write_char('{')?;
                for (index, (name, value)) in fields.iter().enumerate() {
                    if index > 0 {
                        f.write_char(',')?;
                    }
                    write!(f, "{name}:{value}")?;
                }
                f.write_char('}')
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldSelection {
    /// The type declaring the field, named as the schema the document currently targets.
    pub parent_type: String,
    /// Native fields are already expressed in terms of the inner schema and are left
    /// untouched by transforms.
    pub native: bool,
    pub alias: Option<String>,
    pub name: String,
    pub arguments: Vec<(String, InputValue)>,
    pub selections: Vec<Selection>,
}

impl FieldSelection {
    pub fn new(parent_type: impl Into<String>, name: impl Into<String>) -> Self {
        FieldSelection {
            parent_type: parent_type.into(),
            native: false,
            alias: None,
            name: name.into(),
            arguments: Vec::new(),
            selections: Vec::new(),
        }
    }

    pub fn typename(parent_type: impl Into<String>) -> Self {
        Self::new(parent_type, TYPENAME_FIELD_NAME)
    }

    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn is_typename(&self) -> bool {
        self.name == TYPENAME_FIELD_NAME
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct InlineFragmentSelection {
    pub type_condition: Option<String>,
    pub selections: Vec<Selection>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Selection {
    Field(FieldSelection),
    InlineFragment(InlineFragmentSelection),
}

#[derive(Clone, Debug, PartialEq)]
pub struct VariableDefinition {
    pub name: String,
    pub var_type: TypeRef,
    pub default_value: Option<InputValue>,
    pub native: bool,
}

/// An operation sent to a subschema.
///
/// Built in terms of the gateway schema, then rewritten by the subschema transforms
/// before it is printed.
#[derive(Clone, Debug, PartialEq)]
pub struct DelegationDocument {
    pub operation_kind: OperationKind,
    pub operation_name: Option<String>,
    pub variable_definitions: Vec<VariableDefinition>,
    pub selections: Vec<Selection>,
}

impl DelegationDocument {
    /// Names of the variables referenced by the selections, in order of appearance.
    pub fn used_variables(&self) -> Vec<&str> {
        let mut used = Vec::new();
        collect_selection_variables(&self.selections, &mut used);
        used
    }

    pub fn for_each_selection_mut(&mut self, callback: &mut impl FnMut(&mut Selection)) {
        visit_selections_mut(&mut self.selections, callback);
    }
}

fn collect_selection_variables<'a>(selections: &'a [Selection], out: &mut Vec<&'a str>) {
    for selection in selections {
        match selection {
            Selection::Field(field) => {
                for (_, value) in &field.arguments {
                    value.collect_variables(out);
                }
                collect_selection_variables(&field.selections, out);
            }
            Selection::InlineFragment(fragment) => {
                collect_selection_variables(&fragment.selections, out)
            }
        }
    }
}

/// Visits every selection, parents before their children.
pub fn visit_selections_mut(
    selections: &mut [Selection],
    callback: &mut impl FnMut(&mut Selection),
) {
    for selection in selections {
        callback(selection);
        match selection {
            Selection::Field(field) => visit_selections_mut(&mut field.selections, callback),
            Selection::InlineFragment(fragment) => {
                visit_selections_mut(&mut fragment.selections, callback)
            }
        }
    }
}

fn write_arguments(f: &mut fmt::Formatter<'_>, arguments: &[(String, InputValue)]) -> fmt::Result {
    if arguments.is_empty() {
        return Ok(());
    }
    f.write_char('(')?;
    for (index, (name, value)) in arguments.iter().enumerate() {
        if index > 0 {
            f.write_char(',')?;
        }
        write!(f, "{name}:{value}")?;
    }
    f.write_char(')')
}

fn write_selection_set(f: &mut fmt::Formatter<'_>, selections: &[Selection]) -> fmt::Result {
    if selections.is_empty() {
        return Ok(());
    }
    f.write_char('{')?;
    for (index, selection) in selections.iter().enumerate() {
        if index > 0 {
            f.write_char(' ')?;
        }
        write!(f, "{selection}")?;
    }
    f.write_char('}')
}

impl Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::Field(field) => {
                if let Some(alias) = &field.alias {
                    write!(f, "{alias}:")?;
                }
                f.write_str(&field.name)?;
                write_arguments(f, &field.arguments)?;
                write_selection_set(f, &field.selections)
            }
            Selection::InlineFragment(fragment) => {
                f.write_str("...")?;
                if let Some(type_condition) = &fragment.type_condition {
                    write!(f, "on {type_condition}")?;
                }
                write_selection_set(f, &fragment.selections)
            }
        }
    }
}

impl Display for VariableDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}:{}", self.name, self.var_type)?;
        if let Some(default_value) = &self.default_value {
            write!(f, "={default_value}")?;
        }
        Ok(())
    }
}

impl Display for DelegationDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.operation_kind.as_str())?;
        if let Some(operation_name) = &self.operation_name {
            write!(f, " {operation_name}")?;
        }
        if !self.variable_definitions.is_empty() {
            f.write_char('(')?;
            for (index, definition) in self.variable_definitions.iter().enumerate() {
                if index > 0 {
                    f.write_char(',')?;
                }
                write!(f, "{definition}")?;
            }
            f.write_char(')')?;
        }
        write_selection_set(f, &self.selections)
    }
}

impl PrettyDisplay for Selection {
    fn pretty_fmt(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let indent = get_indent(depth);
        let (head, selections) = match self {
            Selection::Field(field) => {
                let mut head = String::new();
                if let Some(alias) = &field.alias {
                    head.push_str(alias);
                    head.push_str(": ");
                }
                head.push_str(&field.name);
                if !field.arguments.is_empty() {
                    let arguments: Vec<String> = field
                        .arguments
                        .iter()
                        .map(|(name, value)| format!("{name}: {value}"))
                        .collect();
                    head.push_str(&format!("({})", arguments.join(", ")));
                }
                (head, &field.selections)
            }
            Selection::InlineFragment(fragment) => (
                match &fragment.type_condition {
                    Some(type_condition) => format!("... on {type_condition}"),
                    None => "...".to_string(),
                },
                &fragment.selections,
            ),
        };

        if selections.is_empty() {
            return writeln!(f, "{indent}{head}");
        }
        writeln!(f, "{indent}{head} {{")?;
        for selection in selections {
            selection.pretty_fmt(f, depth + 1)?;
        }
        writeln!(f, "{indent}}}")
    }
}

impl PrettyDisplay for DelegationDocument {
    fn pretty_fmt(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let indent = get_indent(depth);
        write!(f, "{indent}{}", self.operation_kind.as_str())?;
        if let Some(operation_name) = &self.operation_name {
            write!(f, " {operation_name}")?;
        }
        if !self.variable_definitions.is_empty() {
            let definitions: Vec<String> = self
                .variable_definitions
                .iter()
                .map(|definition| match &definition.default_value {
                    Some(default_value) => format!(
                        "${}: {} = {}",
                        definition.name, definition.var_type, default_value
                    ),
                    None => format!("${}: {}", definition.name, definition.var_type),
                })
                .collect();
            write!(f, "({})", definitions.join(", "))?;
        }
        writeln!(f, " {{")?;
        for selection in &self.selections {
            selection.pretty_fmt(f, depth + 1)?;
        }
        writeln!(f, "{indent}}}")
    }
}
