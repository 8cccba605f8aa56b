//! Values flowing through field resolvers, and the identity field accessor.
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::directives::exports::ParentConnector;
use crate::error::AccessError;
use crate::json_ext::Value;

/// A value that knows how to expose its own fields.
///
/// Implement this for host types handed to the gateway as a root value, or returned by
/// custom directives, when converting them to JSON up front is not wanted.
pub trait FieldAccess: Send + Sync {
    /// Returns the field named `name`, `None` when there is no such field.
    fn field(&self, name: &str) -> Result<Option<FieldValue>, AccessError>;

    /// A JSON rendition of the whole value, used when it is returned as a `JSON` scalar.
    fn to_value(&self) -> Value;
}

/// The value produced by a field resolver.
#[derive(Clone)]
pub enum FieldValue {
    /// Plain JSON, as produced by most upstreams.
    Json(Value),

    /// A host value exposing its own accessor.
    Object(Arc<dyn FieldAccess>),

    /// A value linked to the ancestor that produced it.
    Connected(Arc<ParentConnector>),

    /// A list of resolved values.
    List(Vec<FieldValue>),
}

impl FieldValue {
    pub fn null() -> Self {
        FieldValue::Json(Value::Null)
    }

    /// Converts any serializable value into a record whose fields are its attributes.
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json_bytes::to_value(value).map(FieldValue::Json)
    }

    pub fn is_null(&self) -> bool {
        match self {
            FieldValue::Json(value) => value.is_null(),
            FieldValue::Connected(connector) => connector.value.is_null(),
            FieldValue::Object(_) | FieldValue::List(_) => false,
        }
    }

    /// Returns the elements of a list, whether it is a resolved list or a JSON array, or the
    /// value itself when it is not a list.
    pub fn try_into_list(self) -> Result<Vec<FieldValue>, FieldValue> {
        match self {
            FieldValue::List(elements) => Ok(elements),
            FieldValue::Json(Value::Array(elements)) => {
                Ok(elements.into_iter().map(FieldValue::Json).collect())
            }
            FieldValue::Connected(connector) => connector
                .value
                .clone()
                .try_into_list()
                .map_err(|_| FieldValue::Connected(connector)),
            other => Err(other),
        }
    }

    /// Collapses the value into plain JSON, dropping any ancestor links.
    pub fn to_value(&self) -> Value {
        match self {
            FieldValue::Json(value) => value.clone(),
            FieldValue::Object(object) => object.to_value(),
            FieldValue::Connected(connector) => connector.value.to_value(),
            FieldValue::List(elements) => {
                Value::Array(elements.iter().map(FieldValue::to_value).collect())
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            FieldValue::Json(Value::Null) => "null",
            FieldValue::Json(Value::Bool(_)) => "boolean",
            FieldValue::Json(Value::Number(_)) => "number",
            FieldValue::Json(Value::String(_)) => "string",
            FieldValue::Json(Value::Array(_)) | FieldValue::List(_) => "list",
            FieldValue::Json(Value::Object(_)) => "record",
            FieldValue::Object(_) => "object",
            FieldValue::Connected(_) => "connected",
        }
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        FieldValue::Json(value)
    }
}

impl fmt::Debug for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Json(value) => f.debug_tuple("Json").field(value).finish(),
            FieldValue::Object(object) => f.debug_tuple("Object").field(&object.to_value()).finish(),
            FieldValue::Connected(connector) => f
                .debug_struct("Connected")
                .field("type_name", &connector.type_name)
                .field("value", &connector.value)
                .finish(),
            FieldValue::List(elements) => f.debug_tuple("List").field(elements).finish(),
        }
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        self.to_value() == other.to_value()
    }
}

/// Reads the field `name` of `source`.
///
/// A missing key is not an error and resolves to null. Reading a field of a scalar or a list
/// is an [`AccessError`].
pub fn identity(name: &str, source: &FieldValue) -> Result<FieldValue, AccessError> {
    Ok(lookup(name, source)?.unwrap_or_else(FieldValue::null))
}

/// Like [`identity`], but tells a missing key apart from a null one.
pub(crate) fn lookup(name: &str, source: &FieldValue) -> Result<Option<FieldValue>, AccessError> {
    match source {
        FieldValue::Json(Value::Object(record)) => {
            Ok(record.get(name).cloned().map(FieldValue::Json))
        }
        FieldValue::Json(Value::Null) => Ok(None),
        FieldValue::Object(object) => object.field(name),
        FieldValue::Connected(connector) => lookup(name, &connector.value),
        other => Err(AccessError {
            field: name.to_string(),
            kind: other.kind(),
        }),
    }
}
