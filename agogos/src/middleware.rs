//! Field resolvers and the middleware that compose them.
//!
//! Every field of a compiled schema is resolved by a single [`Resolver`], built by folding the
//! field's directives over a base accessor: for directives `[d1..dn]` the resolver is
//! `dn.wrap(...d2.wrap(d1.wrap(base)))`, so the last directive sees the request first and the
//! result last.
//!
//! A resolver returns an [`Outcome`]. Leaves that talk to other services return
//! [`Outcome::Deferred`] so that the executor can launch every sibling field before awaiting
//! any of them.
use std::sync::Arc;

use apollo_compiler::Node;
use apollo_compiler::ast;
use futures::FutureExt;
use futures::future::BoxFuture;
use indexmap::IndexMap;

use crate::context::Context;
use crate::directives::exports::ExportRegistry;
use crate::error::ResolveError;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::schema::TypeRef;
use crate::value::FieldValue;
use crate::value::identity;
use crate::value::lookup;

/// Fragment definitions of the request document, by name.
pub type Fragments = IndexMap<String, Node<ast::FragmentDefinition>>;

pub type ResolveResult = Result<FieldValue, ResolveError>;

pub type ResolveFuture = BoxFuture<'static, ResolveResult>;

/// A field resolver.
pub type Resolver = Arc<dyn Fn(ResolveParams) -> Outcome + Send + Sync>;

/// The result of invoking a resolver.
pub enum Outcome {
    /// The value is available now.
    Immediate(ResolveResult),

    /// The value is being computed and will be available once the future completes.
    Deferred(ResolveFuture),
}

impl Outcome {
    pub fn value(value: impl Into<FieldValue>) -> Self {
        Outcome::Immediate(Ok(value.into()))
    }

    pub fn error(error: ResolveError) -> Self {
        Outcome::Immediate(Err(error))
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Outcome::Deferred(_))
    }

    /// Waits for the value, whether it is immediate or deferred.
    pub async fn resolve(self) -> ResolveResult {
        match self {
            Outcome::Immediate(result) => result,
            Outcome::Deferred(future) => future.await,
        }
    }

    /// Applies `f` to the successful value. On a deferred outcome `f` runs when the returned
    /// future is awaited, never before.
    pub fn map<F>(self, f: F) -> Outcome
    where
        F: FnOnce(FieldValue) -> FieldValue + Send + 'static,
    {
        match self {
            Outcome::Immediate(result) => Outcome::Immediate(result.map(f)),
            Outcome::Deferred(future) => Outcome::Deferred(future.map(|r| r.map(f)).boxed()),
        }
    }
}

/// Request-time information about the field being resolved.
#[derive(Debug)]
pub struct ResolveInfo {
    pub field_name: String,
    pub return_type: TypeRef,
    pub parent_type: String,
    /// The request nodes selecting this field, more than one when merged from fragments.
    pub field_nodes: Vec<Node<ast::Field>>,
    pub fragments: Arc<Fragments>,
    pub variables: Arc<Object>,
    pub path: Path,
    pub exports: Arc<ExportRegistry>,
}

#[buildstructor::buildstructor]
impl ResolveInfo {
    #[builder(visibility = "pub")]
    #[allow(clippy::too_many_arguments)]
    fn new(
        field_name: String,
        return_type: Option<TypeRef>,
        parent_type: Option<String>,
        field_nodes: Vec<Node<ast::Field>>,
        fragments: Option<Arc<Fragments>>,
        variables: Option<Arc<Object>>,
        path: Option<Path>,
        exports: Option<Arc<ExportRegistry>>,
    ) -> Self {
        Self {
            path: path.unwrap_or_else(|| Path::empty().join_key(field_name.clone())),
            field_name,
            return_type: return_type.unwrap_or_else(TypeRef::json),
            parent_type: parent_type.unwrap_or_else(|| "Query".to_string()),
            field_nodes,
            fragments: fragments.unwrap_or_default(),
            variables: variables.unwrap_or_default(),
            exports: exports.unwrap_or_default(),
        }
    }

    /// The response key of the field, its alias when it has one.
    pub fn response_key(&self) -> &str {
        self.field_nodes
            .first()
            .map(|field| field.alias.as_ref().unwrap_or(&field.name).as_str())
            .unwrap_or(&self.field_name)
    }
}

/// Everything a resolver gets to produce the value of one field.
#[derive(Clone)]
pub struct ResolveParams {
    /// The value of the parent object.
    pub source: FieldValue,
    /// Coerced field arguments.
    pub args: Object,
    pub context: Context,
    pub info: Arc<ResolveInfo>,
}

/// A resolution layer built from a directive.
pub trait Middleware: Send + Sync {
    fn wrap(&self, next: Resolver) -> Resolver;
}

/// Folds `middlewares` over `base`, the first middleware ending up innermost.
pub fn pipeline(base: Resolver, middlewares: &[Box<dyn Middleware>]) -> Resolver {
    middlewares
        .iter()
        .fold(base, |resolver, middleware| middleware.wrap(resolver))
}

/// The base accessor of a field: reads the same-named field of the source.
///
/// Fields forwarded to upstream GraphQL services come back under their response key, so an
/// aliased field reads its alias first and only falls back to the field name when the alias
/// is absent from the source.
pub fn identity_resolver() -> Resolver {
    Arc::new(|params: ResolveParams| {
        let name = &params.info.field_name;
        let key = params.info.response_key();
        let result = if key != name.as_str() {
            lookup(key, &params.source).and_then(|value| match value {
                Some(value) => Ok(value),
                None => identity(name, &params.source),
            })
        } else {
            identity(name, &params.source)
        };
        Outcome::Immediate(result.map_err(Into::into))
    })
}

/// Passes the inner resolver through unchanged.
pub struct Identity;

impl Middleware for Identity {
    fn wrap(&self, next: Resolver) -> Resolver {
        next
    }
}

type RequestTransformFn = dyn Fn(ResolveParams) -> ResolveParams + Send + Sync;

/// Rewrites the parameters, then delegates to the inner resolver.
pub struct RequestTransform {
    transform: Arc<RequestTransformFn>,
}

impl RequestTransform {
    pub fn new<F>(transform: F) -> Self
    where
        F: Fn(ResolveParams) -> ResolveParams + Send + Sync + 'static,
    {
        Self {
            transform: Arc::new(transform),
        }
    }
}

impl Middleware for RequestTransform {
    fn wrap(&self, next: Resolver) -> Resolver {
        let transform = self.transform.clone();
        Arc::new(move |params| next(transform(params)))
    }
}

type LeafFn = dyn Fn(ResolveParams) -> ResolveResult + Send + Sync;

/// Produces the value itself, ignoring the inner resolver.
pub struct Leaf {
    resolve: Arc<LeafFn>,
}

impl Leaf {
    pub fn new<F>(resolve: F) -> Self
    where
        F: Fn(ResolveParams) -> ResolveResult + Send + Sync + 'static,
    {
        Self {
            resolve: Arc::new(resolve),
        }
    }
}

impl Middleware for Leaf {
    fn wrap(&self, _next: Resolver) -> Resolver {
        let resolve = self.resolve.clone();
        Arc::new(move |params| Outcome::Immediate(resolve(params)))
    }
}

type ConcurrentLeafFn = dyn Fn(ResolveParams) -> ResolveFuture + Send + Sync;

/// Produces the value on a background task, ignoring the inner resolver.
///
/// The resolver returns [`Outcome::Deferred`] immediately.
pub struct ConcurrentLeaf {
    resolve: Arc<ConcurrentLeafFn>,
}

impl ConcurrentLeaf {
    pub fn new<F>(resolve: F) -> Self
    where
        F: Fn(ResolveParams) -> ResolveFuture + Send + Sync + 'static,
    {
        Self {
            resolve: Arc::new(resolve),
        }
    }
}

impl Middleware for ConcurrentLeaf {
    fn wrap(&self, _next: Resolver) -> Resolver {
        let resolve = self.resolve.clone();
        Arc::new(move |params| {
            let future = resolve(params);
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let task = handle.spawn(future);
                    Outcome::Deferred(
                        async move {
                            task.await
                                .map_err(|err| ResolveError::Join(err.to_string()))?
                        }
                        .boxed(),
                    )
                }
                // Outside of a runtime the work starts when the outcome is awaited.
                Err(_) => Outcome::Deferred(future),
            }
        })
    }
}

type ResultTransformFn = dyn Fn(&ResolveParams, FieldValue) -> FieldValue + Send + Sync;

/// Delegates to the inner resolver, then rewrites a successful result.
///
/// Errors pass through untouched. A deferred inner result stays deferred: the transform runs
/// once the returned future is awaited.
pub struct ResultTransform {
    transform: Arc<ResultTransformFn>,
}

impl ResultTransform {
    pub fn new<F>(transform: F) -> Self
    where
        F: Fn(&ResolveParams, FieldValue) -> FieldValue + Send + Sync + 'static,
    {
        Self {
            transform: Arc::new(transform),
        }
    }
}

impl Middleware for ResultTransform {
    fn wrap(&self, next: Resolver) -> Resolver {
        let transform = self.transform.clone();
        Arc::new(move |params: ResolveParams| {
            let outcome = next(params.clone());
            let transform = transform.clone();
            outcome.map(move |value| transform(&params, value))
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use parking_lot::Mutex;
    use serde_json_bytes::Value;
    use serde_json_bytes::json;

    use super::*;

    pub(crate) fn params(source: FieldValue) -> ResolveParams {
        ResolveParams {
            source,
            args: Object::new(),
            context: Context::new(),
            info: Arc::new(ResolveInfo::builder().field_name("field").build()),
        }
    }

    fn simple_resolver() -> Resolver {
        Arc::new(|_| Outcome::value(json!(1)))
    }

    fn failing_resolver() -> Resolver {
        Arc::new(|_| Outcome::error(ResolveError::Message("oh no".to_string())))
    }

    fn thunk_resolver() -> Resolver {
        Arc::new(|_| Outcome::Deferred(async { Ok(FieldValue::Json(json!(1))) }.boxed()))
    }

    fn double_result() -> ResultTransform {
        ResultTransform::new(|_, value| {
            let number = value.to_value().as_i64().expect("an integer result");
            FieldValue::Json(json!(number * 2))
        })
    }

    #[tokio::test]
    async fn simple_resolver_is_transformed() {
        let resolver = double_result().wrap(simple_resolver());
        let outcome = resolver(params(FieldValue::null()));
        assert!(!outcome.is_deferred());
        assert_eq!(outcome.resolve().await.unwrap(), FieldValue::Json(json!(2)));
    }

    #[tokio::test]
    async fn failing_resolver_error_passes_through() {
        let resolver = double_result().wrap(failing_resolver());
        let error = resolver(params(FieldValue::null())).resolve().await.unwrap_err();
        assert_eq!(error, ResolveError::Message("oh no".to_string()));
    }

    #[tokio::test]
    async fn thunk_resolver_stays_deferred() {
        let resolver = double_result().wrap(thunk_resolver());
        let outcome = resolver(params(FieldValue::null()));
        assert!(outcome.is_deferred());
        assert_eq!(outcome.resolve().await.unwrap(), FieldValue::Json(json!(2)));
    }

    #[tokio::test]
    async fn stacked_transforms_over_a_concurrent_leaf_run_on_await_in_order() {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let leaf_calls = Arc::new(AtomicUsize::new(0));

        let calls = leaf_calls.clone();
        let mut middlewares: Vec<Box<dyn Middleware>> =
            vec![Box::new(ConcurrentLeaf::new(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(FieldValue::Json(json!(""))) }.boxed()
            }))];
        for layer in 1..=4 {
            let applied = applied.clone();
            middlewares.push(Box::new(ResultTransform::new(move |_, value| {
                applied.lock().push(layer);
                let text = value.to_value().as_str().unwrap_or_default().to_string();
                FieldValue::Json(json!(format!("{text}{layer}")))
            })));
        }

        let resolver = pipeline(identity_resolver(), &middlewares);
        let outcome = resolver(params(FieldValue::null()));

        assert!(outcome.is_deferred());
        assert!(applied.lock().is_empty());
        assert_eq!(leaf_calls.load(Ordering::SeqCst), 1);

        let value = outcome.resolve().await.unwrap();
        assert_eq!(value, FieldValue::Json(json!("1234")));
        assert_eq!(*applied.lock(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn request_transform_only_affects_inner_layers() {
        let seen = Arc::new(Mutex::new(None));
        let inner_seen = seen.clone();
        let leaf = Leaf::new(move |params: ResolveParams| {
            *inner_seen.lock() = params.context.get("tag").cloned();
            Ok(FieldValue::Json(json!("b")))
        });
        let tag = RequestTransform::new(|mut params: ResolveParams| {
            params.context = params.context.with_entry("tag", "set");
            params
        });
        let middlewares: Vec<Box<dyn Middleware>> = vec![Box::new(tag), Box::new(leaf)];
        let resolver = pipeline(identity_resolver(), &middlewares);

        let outer = params(FieldValue::null());
        let value = resolver(outer.clone()).resolve().await.unwrap();

        assert_eq!(value, FieldValue::Json(json!("b")));
        // The leaf is outermost here, so it never sees the tag.
        assert_eq!(*seen.lock(), None);
        assert!(outer.context.get("tag").is_none());

        let middlewares: Vec<Box<dyn Middleware>> = vec![
            Box::new(Leaf::new({
                let seen = seen.clone();
                move |params: ResolveParams| {
                    *seen.lock() = params.context.get("tag").cloned();
                    Ok(FieldValue::Json(json!("b")))
                }
            })),
            Box::new(RequestTransform::new(|mut params: ResolveParams| {
                params.context = params.context.with_entry("tag", "set");
                params
            })),
        ];
        let resolver = pipeline(identity_resolver(), &middlewares);
        resolver(outer.clone()).resolve().await.unwrap();
        assert_eq!(*seen.lock(), Some(json!("set")));
        assert!(outer.context.get("tag").is_none());
    }

    fn aliased(source: Value) -> ResolveParams {
        let document = ast::Document::parse("{ renamed: name }", "query.graphql").unwrap();
        let Some(ast::Definition::OperationDefinition(operation)) = document.definitions.first()
        else {
            panic!("expected an operation");
        };
        let ast::Selection::Field(field) = &operation.selection_set[0] else {
            panic!("expected a field");
        };
        let mut params = params(FieldValue::Json(source));
        params.info = Arc::new(
            ResolveInfo::builder()
                .field_name("name")
                .field_node(field.clone())
                .build(),
        );
        params
    }

    #[tokio::test]
    async fn identity_resolver_reads_the_alias_first() {
        let value = identity_resolver()(aliased(json!({"name": "joe", "renamed": "JOE"})))
            .resolve()
            .await
            .unwrap();
        assert_eq!(value, FieldValue::Json(json!("JOE")));

        let value = identity_resolver()(aliased(json!({"name": "joe", "renamed": null})))
            .resolve()
            .await
            .unwrap();
        assert!(value.is_null());
    }

    #[tokio::test]
    async fn identity_resolver_falls_back_to_the_field_name() {
        let value = identity_resolver()(aliased(json!({"name": "joe"})))
            .resolve()
            .await
            .unwrap();
        assert_eq!(value, FieldValue::Json(json!("joe")));
    }
}
