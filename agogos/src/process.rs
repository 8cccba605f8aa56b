//! Compilation of configuration snapshots, and the slot holding the active schema.
use std::pin::pin;
use std::sync::Arc;

use futures::Stream;
use futures::StreamExt;
use parking_lot::RwLock;

use crate::configuration::ConfigurationSnapshot;
use crate::directives::DirectiveRegistry;
use crate::error::CompileError;
use crate::schema::CompiledSchema;
use crate::upstreams::Upstreams;
use crate::upstreams::authentication::ClientCredentialsTokenSource;
use crate::upstreams::authentication::TokenSource;

/// The outcome of compiling one snapshot. Exactly one of the fields is set.
#[derive(Debug, Clone)]
pub struct SchemaResult {
    pub schema: Option<Arc<CompiledSchema>>,
    pub error: Option<CompileError>,
}

impl SchemaResult {
    fn compiled(schema: CompiledSchema) -> Self {
        Self {
            schema: Some(Arc::new(schema)),
            error: None,
        }
    }

    fn failed(error: CompileError) -> Self {
        Self {
            schema: None,
            error: Some(error),
        }
    }
}

/// Compiles every snapshot of `snapshots` with the built-in and registered directives.
///
/// Tokens fetched for upstreams are cached across snapshots.
pub fn process<S>(snapshots: S) -> impl Stream<Item = SchemaResult> + Send
where
    S: Stream<Item = ConfigurationSnapshot> + Send,
{
    process_with(
        snapshots,
        DirectiveRegistry::new(),
        Arc::new(ClientCredentialsTokenSource::new()),
    )
}

pub(crate) fn process_with<S>(
    snapshots: S,
    registry: DirectiveRegistry,
    tokens: Arc<dyn TokenSource>,
) -> impl Stream<Item = SchemaResult> + Send
where
    S: Stream<Item = ConfigurationSnapshot> + Send,
{
    snapshots.map(move |snapshot| compile_snapshot(&snapshot, &registry, tokens.clone()))
}

fn compile_snapshot(
    snapshot: &ConfigurationSnapshot,
    registry: &DirectiveRegistry,
    tokens: Arc<dyn TokenSource>,
) -> SchemaResult {
    let upstreams = Upstreams::from_config(
        &snapshot.upstreams,
        &snapshot.upstream_auth_credentials,
        tokens,
    );
    match CompiledSchema::parse(&snapshot.schema.definition, registry, Arc::new(upstreams)) {
        Ok(schema) => SchemaResult::compiled(schema),
        Err(error) => SchemaResult::failed(error),
    }
}

/// The schema requests are executed against.
///
/// Cloning the handle shares the slot. A request takes the `Arc` once, so replacing the
/// schema never affects requests already running.
#[derive(Debug, Clone, Default)]
pub struct SchemaHandle {
    active: Arc<RwLock<Option<Arc<CompiledSchema>>>>,
}

impl SchemaHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<CompiledSchema>> {
        self.active.read().clone()
    }

    /// Makes `schema` the active schema and returns the one it replaces.
    pub fn set(&self, schema: Arc<CompiledSchema>) -> Option<Arc<CompiledSchema>> {
        self.active.write().replace(schema)
    }
}

/// Applies every successful result to `handle` until `results` ends.
///
/// A failed compilation is logged and the previous schema stays active.
pub async fn serve_schemas<S>(results: S, handle: SchemaHandle)
where
    S: Stream<Item = SchemaResult>,
{
    let mut results = pin!(results);
    while let Some(result) = results.next().await {
        match result {
            SchemaResult {
                schema: Some(schema),
                ..
            } => {
                let types = schema.type_names().count();
                let replaced = handle.set(schema).is_some();
                tracing::info!(types, replaced, "new schema applied");
            }
            SchemaResult {
                error: Some(error), ..
            } => {
                tracing::error!(%error, "could not compile schema, keeping the previous one");
            }
            SchemaResult { .. } => {}
        }
    }
}
