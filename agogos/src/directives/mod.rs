//! Schema directives and the registry of factories that turn them into middleware.
//!
//! A directive is interpreted once, while the schema compiles: its factory reads the literal
//! arguments from the SDL and returns the [`Middleware`] for the field it annotates.
//! Directives that have no factory, such as `@deprecated`, are ignored.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;

use apollo_compiler::ast;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::DirectiveError;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::json_ext::value_from_ast;
use crate::middleware::Middleware;
use crate::upstreams::Upstreams;

pub mod exports;
mod fields;
mod gql;
mod log;
mod rest;

use self::exports::ExportRegistryBuilder;

/// Builds the middleware of one directive occurrence.
pub trait DirectiveFactory: Send + Sync + 'static {
    fn build(&self, context: &DirectiveContext<'_>) -> Result<Box<dyn Middleware>, DirectiveError>;
}

/// What a factory knows about the directive occurrence it builds.
pub struct DirectiveContext<'a> {
    pub(crate) type_name: &'a str,
    pub(crate) field: &'a ast::FieldDefinition,
    pub(crate) directive: &'a ast::Directive,
    pub(crate) upstreams: &'a Arc<Upstreams>,
    pub(crate) exports: &'a ExportRegistryBuilder,
}

impl<'a> DirectiveContext<'a> {
    /// Name of the type declaring the field.
    pub fn type_name(&self) -> &str {
        self.type_name
    }

    pub fn field_name(&self) -> &str {
        self.field.name.as_str()
    }

    pub fn field(&self) -> &ast::FieldDefinition {
        self.field
    }

    pub fn directive(&self) -> &ast::Directive {
        self.directive
    }

    pub fn upstreams(&self) -> &Arc<Upstreams> {
        self.upstreams
    }

    /// The directive arguments as JSON.
    pub fn raw_arguments(&self) -> Result<Object, DirectiveError> {
        self.directive
            .arguments
            .iter()
            .map(|argument| {
                value_from_ast(&argument.value, None)
                    .map(|value| (argument.name.as_str().into(), value))
                    .map_err(|reason| {
                        DirectiveError::InvalidArgument(format!("{}: {reason}", argument.name))
                    })
            })
            .collect()
    }

    /// Deserializes the directive arguments.
    pub fn arguments<T: DeserializeOwned>(&self) -> Result<T, DirectiveError> {
        let arguments = serde_json::to_value(Value::Object(self.raw_arguments()?))
            .map_err(|err| DirectiveError::InvalidArgument(err.to_string()))?;
        serde_json::from_value(arguments).map_err(|err| {
            let message = err.to_string();
            match message
                .strip_prefix("missing field `")
                .and_then(|rest| rest.split('`').next())
            {
                Some(field) => DirectiveError::MissingArgument(field.to_string()),
                None => DirectiveError::InvalidArgument(message),
            }
        })
    }

    /// Registers the annotated field under the export `key`.
    pub(crate) fn export(&self, key: &str) {
        self.exports.register(key, self.type_name, self.field_name());
    }
}

/// A `{name, value}` pair, as used by `@rest` query parameters and headers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct NameValue {
    pub(crate) name: String,
    pub(crate) value: String,
}

static DIRECTIVE_REGISTRY: Lazy<Mutex<HashMap<String, Arc<dyn DirectiveFactory>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Registers a factory for every [`DirectiveRegistry`] created afterwards.
pub fn register_directive(name: impl Into<String>, factory: impl DirectiveFactory) {
    if let Ok(mut registry) = DIRECTIVE_REGISTRY.lock() {
        registry.insert(name.into(), Arc::new(factory));
    }
}

fn registered_directives() -> HashMap<String, Arc<dyn DirectiveFactory>> {
    DIRECTIVE_REGISTRY
        .lock()
        .map(|registry| registry.clone())
        .unwrap_or_default()
}

/// Registers a directive factory process-wide.
///
/// ```ignore
/// agogos::register_directive!("upper", UpperFactory);
/// ```
#[macro_export]
macro_rules! register_directive {
    ($name: literal, $factory: expr) => {
        $crate::directives::register_directive($name, $factory)
    };
}

/// Directive factories by directive name.
#[derive(Clone)]
pub struct DirectiveRegistry {
    factories: HashMap<String, Arc<dyn DirectiveFactory>>,
}

impl DirectiveRegistry {
    /// The built-in directives, plus those registered with [`register_directive`].
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry
            .register("rest", rest::Rest)
            .register("gql", gql::Gql)
            .register("select", fields::Select)
            .register("from", fields::FromField)
            .register("alias", fields::Alias)
            .register("stub", fields::Stub)
            .register("log", log::Log)
            .register("exportAs", exports::ExportAs);
        registry.factories.extend(registered_directives());
        registry
    }

    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Adds or replaces the factory of the directive `name`.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl DirectiveFactory,
    ) -> &mut Self {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn DirectiveFactory>> {
        self.factories.get(name)
    }
}

impl Default for DirectiveRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DirectiveRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("DirectiveRegistry")
            .field("directives", &names)
            .finish()
    }
}
