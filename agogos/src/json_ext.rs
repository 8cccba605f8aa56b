//! JSON helpers shared by the executor and the directives.

use std::fmt;

use apollo_compiler::ast;
use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map;
pub use serde_json_bytes::Value;

/// A JSON object.
pub type Object = Map<ByteString, Value>;

/// A GraphQL path element that is composed of strings or numbers.
/// e.g `/book/3/name`
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathElement {
    /// An index path element.
    Index(usize),

    /// A key path element.
    Key(String),
}

/// A path into the result document, as reported in GraphQL errors.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(pub Vec<PathElement>);

impl Path {
    pub fn empty() -> Path {
        Path(Vec::new())
    }

    pub fn join_key(&self, key: impl Into<String>) -> Path {
        let mut elements = self.0.clone();
        elements.push(PathElement::Key(key.into()));
        Path(elements)
    }

    pub fn join_index(&self, index: usize) -> Path {
        let mut elements = self.0.clone();
        elements.push(PathElement::Index(index));
        Path(elements)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for element in &self.0 {
            write!(f, "/")?;
            match element {
                PathElement::Index(index) => write!(f, "{index}")?,
                PathElement::Key(key) => write!(f, "{key}")?,
            }
        }
        Ok(())
    }
}

pub(crate) trait ValueExt {
    /// String form used when a value is spliced into text: strings are unquoted, everything
    /// else is serialized as JSON and null becomes the empty string.
    fn to_template_string(&self) -> String;
}

impl ValueExt for Value {
    fn to_template_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::String(s) => s.as_str().to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            other => serde_json::to_string(other).unwrap_or_default(),
        }
    }
}

/// Converts a GraphQL literal to JSON.
///
/// Variables are read from `variables`, a missing one is null. Without variables the literal
/// is in a constant position, such as a directive argument or a default value, and a variable
/// is an error.
pub(crate) fn value_from_ast(
    value: &ast::Value,
    variables: Option<&Object>,
) -> Result<Value, String> {
    Ok(match value {
        ast::Value::Null => Value::Null,
        ast::Value::Enum(name) => Value::String(name.as_str().into()),
        ast::Value::Variable(name) => match variables {
            Some(variables) => variables.get(name.as_str()).cloned().unwrap_or(Value::Null),
            None => return Err(format!("variable ${name} is not allowed here")),
        },
        ast::Value::String(s) => Value::String(s.as_str().into()),
        ast::Value::Boolean(b) => Value::Bool(*b),
        ast::Value::Int(i) => match i.as_str().parse::<i64>() {
            Ok(i) => Value::from(i),
            Err(_) => float(i.as_str())?,
        },
        ast::Value::Float(f) => float(f.as_str())?,
        ast::Value::List(elements) => Value::Array(
            elements
                .iter()
                .map(|element| value_from_ast(element, variables))
                .collect::<Result<_, _>>()?,
        ),
        ast::Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(name, value)| {
                    Ok((ByteString::from(name.as_str()), value_from_ast(value, variables)?))
                })
                .collect::<Result<_, String>>()?,
        ),
    })
}

fn float(text: &str) -> Result<Value, String> {
    text.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| format!("invalid number {text}"))
}
