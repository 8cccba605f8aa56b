//! Values exported by ancestors, and the chain that carries them down the resolution tree.
//!
//! Every object value returned by a field is boxed in a [`ParentConnector`] that remembers
//! the declared type of the field and the connector of the value it was read from. A nested
//! field can then look up a value captured by any of its ancestors with `{exports.key}`,
//! without any request-global state.
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;

use crate::directives::DirectiveContext;
use crate::directives::DirectiveFactory;
use crate::error::AccessError;
use crate::error::DirectiveError;
use crate::json_ext::Value;
use crate::middleware::Identity;
use crate::middleware::Middleware;
use crate::middleware::ResolveParams;
use crate::middleware::Resolver;
use crate::schema::TypeRef;
use crate::value::FieldAccess;
use crate::value::FieldValue;
use crate::value::identity;

/// A resolved value linked to the value it was resolved from.
#[derive(Debug)]
pub struct ParentConnector {
    pub value: FieldValue,
    /// Declared type of the field that produced the value.
    pub type_name: String,
    pub parent: Option<Arc<ParentConnector>>,
}

impl ParentConnector {
    pub fn new(
        value: FieldValue,
        type_name: impl Into<String>,
        parent: Option<Arc<ParentConnector>>,
    ) -> Self {
        Self {
            value,
            type_name: type_name.into(),
            parent,
        }
    }

    /// The connector itself followed by its ancestors, nearest first.
    pub fn ancestors(self: &Arc<Self>) -> impl Iterator<Item = &Arc<ParentConnector>> {
        std::iter::successors(Some(self), |node| {
            let node: &Arc<ParentConnector> = node;
            node.parent.as_ref()
        })
    }
}

impl FieldAccess for ParentConnector {
    fn field(&self, name: &str) -> Result<Option<FieldValue>, AccessError> {
        identity(name, &self.value).map(Some)
    }

    fn to_value(&self) -> Value {
        self.value.to_value()
    }
}

/// Export keys registered with `@exportAs`, frozen once the schema is compiled.
#[derive(Debug, Default)]
pub struct ExportRegistry {
    keys: HashMap<String, HashMap<String, Vec<String>>>,
    roots: Vec<String>,
}

impl ExportRegistry {
    /// Fields of `type_name` exported under `key`, in registration order.
    pub fn fields(&self, key: &str, type_name: &str) -> &[String] {
        self.keys
            .get(key)
            .and_then(|types| types.get(type_name))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn is_root(&self, type_name: &str) -> bool {
        self.roots.iter().any(|root| root == type_name)
    }
}

/// Collects export keys while a schema compiles.
#[derive(Debug, Default)]
pub(crate) struct ExportRegistryBuilder {
    keys: Mutex<HashMap<String, HashMap<String, Vec<String>>>>,
}

impl ExportRegistryBuilder {
    pub(crate) fn register(&self, key: &str, type_name: &str, field: &str) {
        let mut keys = self.keys.lock();
        let fields = keys
            .entry(key.to_string())
            .or_default()
            .entry(type_name.to_string())
            .or_default();
        if !fields.iter().any(|existing| existing == field) {
            fields.push(field.to_string());
        }
    }

    /// Moves the collected keys into a read-only registry.
    pub(crate) fn freeze(&self, roots: Vec<String>) -> ExportRegistry {
        ExportRegistry {
            keys: std::mem::take(&mut *self.keys.lock()),
            roots,
        }
    }
}

/// Looks `key` up from `start` toward the root of the chain.
///
/// Root operation types are skipped. At each other node every field exported under `key` for
/// the node's type is read, and the first non-null value wins. Null when nothing matches.
pub fn resolve_export(
    start: Option<&Arc<ParentConnector>>,
    key: &str,
    registry: &ExportRegistry,
) -> Value {
    let Some(start) = start else {
        return Value::Null;
    };
    for node in start.ancestors() {
        if registry.is_root(&node.type_name) {
            continue;
        }
        for field in registry.fields(key, &node.type_name) {
            match identity(field, &node.value) {
                Ok(value) if !value.is_null() => return value.to_value(),
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(key, field = %field, error = %err, "skipping export candidate")
                }
            }
        }
    }
    Value::Null
}

/// The connector a field's parameters were resolved from, if any.
pub(crate) fn source_connector(params: &ResolveParams) -> Option<&Arc<ParentConnector>> {
    match &params.source {
        FieldValue::Connected(connector) => Some(connector),
        _ => None,
    }
}

/// Wraps a finished field pipeline so that its object values join the ancestor chain.
pub(crate) fn connect(next: Resolver, declared: TypeRef) -> Resolver {
    let declared = Arc::new(declared);
    Arc::new(move |params: ResolveParams| {
        let parent = source_connector(&params).cloned();
        let declared = declared.clone();
        next(params).map(move |value| link(value, &declared, parent))
    })
}

fn link(value: FieldValue, ty: &TypeRef, parent: Option<Arc<ParentConnector>>) -> FieldValue {
    if value.is_null() || ty.is_leaf() {
        return value;
    }
    match ty.nullable() {
        TypeRef::List(inner) => match value.try_into_list() {
            Ok(elements) => FieldValue::List(
                elements
                    .into_iter()
                    .map(|element| link(element, inner, parent.clone()))
                    .collect(),
            ),
            Err(value) => value,
        },
        _ => FieldValue::Connected(Arc::new(ParentConnector::new(value, ty.name(), parent))),
    }
}

#[derive(Deserialize)]
struct ExportAsArgs {
    key: String,
}

/// `@exportAs(key: String!)`: makes the field's value available to descendants.
pub(crate) struct ExportAs;

impl DirectiveFactory for ExportAs {
    fn build(&self, context: &DirectiveContext<'_>) -> Result<Box<dyn Middleware>, DirectiveError> {
        let args: ExportAsArgs = context.arguments()?;
        context.export(&args.key);
        Ok(Box::new(Identity))
    }
}
