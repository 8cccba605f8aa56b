//! A GraphQL gateway whose schema is compiled at runtime from directive-annotated SDL.
//!
//! Each configuration snapshot carries a schema where fields declare how they resolve:
//! `@rest` and `@gql` call upstreams, `@select`, `@from`, `@alias` and `@stub` reshape
//! values, `@exportAs` makes a value visible to nested fields and `@log` traces resolution.
//! A snapshot compiles into a [`CompiledSchema`] that executes requests until the next
//! snapshot replaces it.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]

pub mod configuration;
pub mod context;
pub mod directives;
pub mod error;
mod executable;
mod execution;
mod files;
pub mod graphql;
pub mod json_ext;
pub mod middleware;
pub mod process;
mod query_builder;
mod registry;
pub mod schema;
pub mod server;
mod templating;
pub mod upstreams;
pub mod value;

pub use configuration::ConfigurationSnapshot;
pub use configuration::ConfigurationSource;
pub use context::Context;
pub use directives::DirectiveFactory;
pub use directives::DirectiveRegistry;
pub use executable::main;
pub use process::SchemaHandle;
pub use process::SchemaResult;
pub use process::process;
pub use process::serve_schemas;
pub use registry::subscription_errors;
pub use schema::CompiledSchema;
pub use value::FieldAccess;
pub use value::FieldValue;
