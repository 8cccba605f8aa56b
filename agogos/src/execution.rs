//! Execution of GraphQL requests against a compiled schema.
//!
//! Sibling fields are resolved concurrently: every resolver of a selection set is invoked
//! before any deferred result is awaited. Mutation root fields run one after the other.
use std::collections::HashSet;
use std::sync::Arc;

use apollo_compiler::Node;
use apollo_compiler::ast;
use apollo_compiler::parser::SourceMap;
use futures::FutureExt;
use futures::future;
use futures::future::BoxFuture;
use futures::future::join_all;
use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::context::Context;
use crate::directives::exports::ParentConnector;
use crate::error::RequestError;
use crate::error::ResolveError;
use crate::graphql;
use crate::graphql::Location;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::json_ext::value_from_ast;
use crate::middleware::Fragments;
use crate::middleware::ResolveInfo;
use crate::middleware::ResolveParams;
use crate::schema::CompiledField;
use crate::schema::CompiledSchema;
use crate::schema::CompiledType;
use crate::schema::TypeKind;
use crate::schema::TypeRef;
use crate::schema::scalars;
use crate::value::FieldValue;
use crate::value::identity;

/// The value of a non-null field could not be completed, its parent becomes null.
#[derive(Debug, Clone, Copy)]
struct PropagateNull;

/// Nulls a failed nullable value, or propagates the failure to the parent.
fn try_nullify(ty: &TypeRef, result: Result<Value, PropagateNull>) -> Result<Value, PropagateNull> {
    match result {
        Err(PropagateNull) if !ty.is_non_null() => Ok(Value::Null),
        other => other,
    }
}

/// Whether `@skip` and `@include` keep the selection carrying `directives`.
pub(crate) fn is_included(directives: &ast::DirectiveList, variables: &Object) -> bool {
    let condition = |name: &str| {
        directives
            .get(name)
            .and_then(|directive| directive.specified_argument_by_name("if"))
            .map(|value| match &**value {
                ast::Value::Boolean(value) => *value,
                ast::Value::Variable(variable) => variables
                    .get(variable.as_str())
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                _ => false,
            })
    };
    !condition("skip").unwrap_or(false) && condition("include").unwrap_or(true)
}

impl CompiledSchema {
    /// Executes `request` with `root` as the value of the root operation type.
    ///
    /// Field errors are rendered beside the partial data. Errors preventing execution, such as
    /// a syntax error or a missing variable, yield a response without data.
    pub async fn execute(
        &self,
        request: graphql::Request,
        root: FieldValue,
        context: Context,
    ) -> graphql::Response {
        let document = match ast::Document::parse(&request.query, "request.graphql") {
            Ok(document) => document,
            Err(invalid) => {
                return graphql::Response::from_errors(vec![
                    RequestError::Parse(invalid.errors.to_string()).to_graphql_error(),
                ]);
            }
        };
        let prepared = select_operation(&document, request.operation_name.as_deref())
            .and_then(|operation| {
                let root_type = match operation.operation_type {
                    ast::OperationType::Query => self.query_type(),
                    ast::OperationType::Mutation => self
                        .mutation_type()
                        .ok_or(RequestError::UnsupportedOperation("mutation"))?,
                    ast::OperationType::Subscription => {
                        return Err(RequestError::UnsupportedOperation("subscription"));
                    }
                };
                let variables = coerce_variables(operation, &request.variables)?;
                Ok((operation, root_type, variables))
            });
        let (operation, root_type, variables) = match prepared {
            Ok(prepared) => prepared,
            Err(error) => {
                tracing::debug!(%error, "request rejected");
                return graphql::Response::from_errors(vec![error.to_graphql_error()]);
            }
        };

        let fragments: Arc<Fragments> = Arc::new(
            document
                .definitions
                .iter()
                .filter_map(|definition| match definition {
                    ast::Definition::FragmentDefinition(fragment) => {
                        Some((fragment.name.to_string(), fragment.clone()))
                    }
                    _ => None,
                })
                .collect(),
        );
        let execution = Execution {
            schema: self,
            sources: &document.sources,
            fragments: &fragments,
            variables: Arc::new(variables),
            context,
            errors: Mutex::new(Vec::new()),
        };
        let root = FieldValue::Connected(Arc::new(ParentConnector::new(root, root_type, None)));
        let serial = operation.operation_type == ast::OperationType::Mutation;
        let data = execution
            .execute_selection_set(
                root_type,
                root,
                operation.selection_set.iter().collect(),
                Path::empty(),
                serial,
            )
            .await;

        graphql::Response {
            data: Some(data.map(Value::Object).unwrap_or(Value::Null)),
            errors: execution.errors.into_inner(),
        }
    }
}

fn select_operation<'d>(
    document: &'d ast::Document,
    name: Option<&str>,
) -> Result<&'d Node<ast::OperationDefinition>, RequestError> {
    let mut operations = document
        .definitions
        .iter()
        .filter_map(|definition| match definition {
            ast::Definition::OperationDefinition(operation) => Some(operation),
            _ => None,
        });
    match name.filter(|name| !name.is_empty()) {
        Some(name) => operations
            .find(|operation| {
                operation
                    .name
                    .as_ref()
                    .is_some_and(|operation_name| operation_name.as_str() == name)
            })
            .ok_or_else(|| RequestError::UnknownOperation(name.to_string())),
        None => {
            let operation = operations.next().ok_or(RequestError::NoOperation)?;
            if operations.next().is_some() {
                return Err(RequestError::AmbiguousOperation);
            }
            Ok(operation)
        }
    }
}

/// Provided variable values, completed with the defaults of the operation.
fn coerce_variables(
    operation: &ast::OperationDefinition,
    provided: &Object,
) -> Result<Object, RequestError> {
    let mut variables = Object::new();
    for definition in &operation.variables {
        let name = definition.name.as_str();
        let invalid = |reason: String| RequestError::InvalidVariable {
            name: name.to_string(),
            reason,
        };
        let value = match (provided.get(name), &definition.default_value) {
            (Some(value), _) => value.clone(),
            (None, Some(default)) => value_from_ast(default, None).map_err(invalid)?,
            (None, None) if definition.ty.is_non_null() => {
                return Err(invalid(format!("missing a value of type {}", definition.ty)));
            }
            (None, None) => continue,
        };
        if value.is_null() && definition.ty.is_non_null() {
            return Err(invalid(format!("null is not a valid {}", definition.ty)));
        }
        variables.insert(name, value);
    }
    Ok(variables)
}

/// Adds the missing fields of input objects nested in `value` from their defaults.
fn apply_input_defaults(schema: &CompiledSchema, ty: &TypeRef, value: &mut Value) {
    match (ty.nullable(), value) {
        (TypeRef::List(inner), Value::Array(elements)) => {
            for element in elements {
                apply_input_defaults(schema, inner, element);
            }
        }
        (
            TypeRef::Named {
                name,
                kind: TypeKind::InputObject,
            },
            Value::Object(object),
        ) => {
            let Some(CompiledType::InputObject(input)) = schema.get_type(name) else {
                return;
            };
            for field in input.fields.get().into_iter().flatten() {
                if let Some(value) = object.get_mut(field.name.as_str()) {
                    apply_input_defaults(schema, &field.ty, value);
                } else if let Some(default) = &field.default_value {
                    object.insert(field.name.as_str(), default.clone());
                }
            }
        }
        _ => {}
    }
}

type FieldGroups<'a> = IndexMap<String, Vec<&'a Node<ast::Field>>>;

struct Execution<'a> {
    schema: &'a CompiledSchema,
    sources: &'a SourceMap,
    fragments: &'a Arc<Fragments>,
    variables: Arc<Object>,
    context: Context,
    errors: Mutex<Vec<graphql::Error>>,
}

impl<'a> Execution<'a> {
    fn field_error(&self, error: ResolveError, path: Path, fields: &[&Node<ast::Field>]) {
        let locations = fields
            .first()
            .and_then(|field| field.line_column_range(self.sources))
            .map(|range| Location {
                line: range.start.line,
                column: range.start.column,
            })
            .into_iter()
            .collect();
        tracing::debug!(%path, %error, "field error");
        self.errors.lock().push(error.to_graphql_error(path, locations));
    }

    /// Whether a fragment with `condition` applies to an object of type `object_type`.
    fn applies(&self, condition: &str, object_type: &str) -> bool {
        condition == object_type
            || self
                .schema
                .get_type(condition)
                .is_some_and(|ty| ty.possible_types().contains(&object_type))
    }

    /// Groups the fields selected on `object_type` by response key, following fragments.
    fn collect_fields(
        &self,
        object_type: &str,
        selections: impl IntoIterator<Item = &'a ast::Selection>,
        groups: &mut FieldGroups<'a>,
        visited: &mut HashSet<&'a str>,
    ) {
        for selection in selections {
            match selection {
                ast::Selection::Field(field) => {
                    if is_included(&field.directives, &self.variables) {
                        groups
                            .entry(field.alias.as_ref().unwrap_or(&field.name).to_string())
                            .or_default()
                            .push(field);
                    }
                }
                ast::Selection::FragmentSpread(spread) => {
                    let name = spread.fragment_name.as_str();
                    if !is_included(&spread.directives, &self.variables) || !visited.insert(name) {
                        continue;
                    }
                    let Some(fragment) = self.fragments.get(name) else {
                        continue;
                    };
                    if self.applies(&fragment.type_condition, object_type) {
                        self.collect_fields(object_type, &fragment.selection_set, groups, visited);
                    }
                }
                ast::Selection::InlineFragment(inline) => {
                    if !is_included(&inline.directives, &self.variables) {
                        continue;
                    }
                    let applies = inline
                        .type_condition
                        .as_ref()
                        .is_none_or(|condition| self.applies(condition, object_type));
                    if applies {
                        self.collect_fields(object_type, &inline.selection_set, groups, visited);
                    }
                }
            }
        }
    }

    fn execute_selection_set<'b>(
        &'b self,
        object_type: &'a str,
        source: FieldValue,
        selections: Vec<&'a ast::Selection>,
        path: Path,
        serial: bool,
    ) -> BoxFuture<'b, Result<Object, PropagateNull>> {
        async move {
            let Some(object) = self.schema.get_type(object_type) else {
                return Err(PropagateNull);
            };
            let mut groups = FieldGroups::new();
            self.collect_fields(object_type, selections, &mut groups, &mut HashSet::new());

            let mut data = Object::new();
            if serial {
                for (key, fields) in groups {
                    let field_path = path.join_key(key.as_str());
                    let value = self.invoke(object, &source, fields, field_path).await?;
                    data.insert(key, value);
                }
            } else {
                let (keys, pending): (Vec<_>, Vec<_>) = groups
                    .into_iter()
                    .map(|(key, fields)| {
                        let field_path = path.join_key(key.as_str());
                        let pending = self.invoke(object, &source, fields, field_path);
                        (key, pending)
                    })
                    .unzip();
                for (key, value) in keys.into_iter().zip(join_all(pending).await) {
                    data.insert(key, value?);
                }
            }
            Ok(data)
        }
        .boxed()
    }

    /// Calls the resolver of a field and returns the future completing its value.
    fn invoke<'b>(
        &'b self,
        object: &'a CompiledType,
        source: &FieldValue,
        fields: Vec<&'a Node<ast::Field>>,
        path: Path,
    ) -> BoxFuture<'b, Result<Value, PropagateNull>> {
        let Some(field) = fields.first().copied() else {
            return future::ready(Ok(Value::Null)).boxed();
        };
        if field.name.as_str() == "__typename" {
            return future::ready(Ok(Value::String(object.name().into()))).boxed();
        }
        let Some(definition) = object.field(field.name.as_str()) else {
            self.field_error(
                ResolveError::UnknownField {
                    type_name: object.name().to_string(),
                    field: field.name.to_string(),
                },
                path,
                &fields,
            );
            return future::ready(Ok(Value::Null)).boxed();
        };
        let args = match self.coerce_arguments(definition, field) {
            Ok(args) => args,
            Err(reason) => {
                self.field_error(ResolveError::InvalidArgument(reason), path, &fields);
                return future::ready(try_nullify(&definition.ty, Err(PropagateNull))).boxed();
            }
        };

        let info = ResolveInfo::builder()
            .field_name(definition.name.clone())
            .return_type(definition.ty.clone())
            .parent_type(object.name())
            .field_nodes(fields.iter().map(|field| (*field).clone()).collect::<Vec<_>>())
            .fragments(self.fragments.clone())
            .variables(self.variables.clone())
            .path(path.clone())
            .exports(self.schema.exports().clone())
            .build();
        let outcome = (definition.resolver)(ResolveParams {
            source: source.clone(),
            args,
            context: self.context.clone(),
            info: Arc::new(info),
        });

        async move {
            let completed = match outcome.resolve().await {
                Ok(value) => self.complete_value(&definition.ty, &fields, path, value).await,
                Err(error) => {
                    self.field_error(error, path, &fields);
                    Err(PropagateNull)
                }
            };
            try_nullify(&definition.ty, completed)
        }
        .boxed()
    }

    fn coerce_arguments(
        &self,
        definition: &CompiledField,
        field: &ast::Field,
    ) -> Result<Object, String> {
        let mut args = Object::new();
        for argument in &field.arguments {
            let name = argument.name.as_str();
            let Some(expected) = definition.arguments.iter().find(|arg| arg.name == name) else {
                return Err(format!("unknown argument '{name}' on field '{}'", definition.name));
            };
            if let ast::Value::Variable(variable) = &*argument.value {
                if !self.variables.contains_key(variable.as_str()) {
                    continue;
                }
            }
            let mut value = value_from_ast(&argument.value, Some(&self.variables))?;
            if value.is_null() && expected.ty.is_non_null() {
                return Err(format!("argument '{name}' of type {} cannot be null", expected.ty));
            }
            apply_input_defaults(self.schema, &expected.ty, &mut value);
            args.insert(name, value);
        }
        for expected in &definition.arguments {
            if args.contains_key(expected.name.as_str()) {
                continue;
            }
            match &expected.default_value {
                Some(default) => {
                    let mut value = default.clone();
                    apply_input_defaults(self.schema, &expected.ty, &mut value);
                    args.insert(expected.name.as_str(), value);
                }
                None if expected.ty.is_non_null() => {
                    return Err(format!(
                        "missing required argument '{}' of type {}",
                        expected.name, expected.ty
                    ));
                }
                None => {}
            }
        }
        Ok(args)
    }

    fn complete_value<'b>(
        &'b self,
        ty: &'a TypeRef,
        fields: &'b [&'a Node<ast::Field>],
        path: Path,
        value: FieldValue,
    ) -> BoxFuture<'b, Result<Value, PropagateNull>> {
        async move {
            if value.is_null() {
                if ty.is_non_null() {
                    let error = format!("cannot return null for non-null type {ty}");
                    self.field_error(ResolveError::Completion(error), path, fields);
                    return Err(PropagateNull);
                }
                return Ok(Value::Null);
            }
            match ty.nullable() {
                TypeRef::List(inner) => {
                    let elements = match value.try_into_list() {
                        Ok(elements) => elements,
                        Err(value) => {
                            let error = format!("expected a list for {ty}, got {}", value.to_value());
                            self.field_error(ResolveError::Completion(error), path, fields);
                            return Err(PropagateNull);
                        }
                    };
                    let completed = join_all(elements.into_iter().enumerate().map(
                        |(index, element)| {
                            let path = path.join_index(index);
                            async move {
                                try_nullify(inner, self.complete_value(inner, fields, path, element).await)
                            }
                        },
                    ))
                    .await;
                    completed
                        .into_iter()
                        .collect::<Result<Vec<_>, _>>()
                        .map(Value::Array)
                }
                TypeRef::NonNull(inner) => self.complete_value(inner, fields, path, value).await,
                TypeRef::Named { name, kind } => {
                    self.complete_named(name, *kind, fields, path, value).await
                }
            }
        }
        .boxed()
    }

    async fn complete_named(
        &self,
        name: &'a str,
        kind: TypeKind,
        fields: &[&'a Node<ast::Field>],
        path: Path,
        value: FieldValue,
    ) -> Result<Value, PropagateNull> {
        let fail = |error: String, path: Path| {
            self.field_error(ResolveError::Completion(error), path, fields);
            Err(PropagateNull)
        };
        match kind {
            TypeKind::Scalar => match scalars::coerce_output(name, value.to_value()) {
                Ok(value) => Ok(value),
                Err(error) => fail(error, path),
            },
            TypeKind::Enum => {
                let value = value.to_value();
                let valid = match (self.schema.get_type(name), value.as_str()) {
                    (Some(CompiledType::Enum(ty)), Some(variant)) => {
                        ty.values.iter().any(|known| known == variant)
                    }
                    _ => false,
                };
                if valid {
                    Ok(value)
                } else {
                    fail(format!("enum {name} cannot represent value: {value}"), path)
                }
            }
            TypeKind::Object => {
                let selections = sub_selections(fields);
                self.execute_selection_set(name, value, selections, path, false)
                    .await
                    .map(Value::Object)
            }
            TypeKind::Interface | TypeKind::Union => {
                let concrete = match self.concrete_type(name, &value) {
                    Ok(concrete) => concrete,
                    Err(error) => return fail(error, path),
                };
                let selections = sub_selections(fields);
                self.execute_selection_set(concrete, value, selections, path, false)
                    .await
                    .map(Value::Object)
            }
            TypeKind::InputObject => fail(format!("input type {name} cannot be an output"), path),
        }
    }

    /// The object type of a value declared with the abstract type `name`.
    ///
    /// Read from the `__typename` field of the value, or the only possible type.
    fn concrete_type(&self, name: &str, value: &FieldValue) -> Result<&'a str, String> {
        let schema: &'a CompiledSchema = self.schema;
        let possible = schema
            .get_type(name)
            .map(CompiledType::possible_types)
            .unwrap_or_default();
        let typename = identity("__typename", value)
            .ok()
            .and_then(|typename| typename.to_value().as_str().map(str::to_string));
        match typename {
            Some(typename) => possible
                .into_iter()
                .find(|candidate| *candidate == typename)
                .ok_or_else(|| format!("'{typename}' is not a possible type of {name}")),
            None if possible.len() == 1 => Ok(possible[0]),
            None => Err(format!(
                "cannot determine the type of a {name} value without __typename"
            )),
        }
    }
}

fn sub_selections<'a>(fields: &[&'a Node<ast::Field>]) -> Vec<&'a ast::Selection> {
    fields
        .iter()
        .copied()
        .flat_map(|field| field.selection_set.iter())
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use serde_json_bytes::json;
    use test_log::test;
    use tokio::sync::Barrier;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;
    use wiremock::matchers::body_string_contains;
    use wiremock::matchers::method;
    use wiremock::matchers::path;

    use super::*;
    use crate::directives::DirectiveContext;
    use crate::directives::DirectiveFactory;
    use crate::directives::DirectiveRegistry;
    use crate::error::DirectiveError;
    use crate::middleware::ConcurrentLeaf;
    use crate::middleware::Leaf;
    use crate::middleware::Middleware;
    use crate::upstreams::Upstreams;

    /// `@echo`: resolves to the coerced arguments of the field.
    struct Echo;

    impl DirectiveFactory for Echo {
        fn build(&self, _: &DirectiveContext<'_>) -> Result<Box<dyn Middleware>, DirectiveError> {
            Ok(Box::new(Leaf::new(|params| {
                Ok(FieldValue::Json(Value::Object(params.args)))
            })))
        }
    }

    /// `@meet`: resolves only once every field using it has been invoked.
    struct Meet(Arc<Barrier>);

    impl DirectiveFactory for Meet {
        fn build(&self, context: &DirectiveContext<'_>) -> Result<Box<dyn Middleware>, DirectiveError> {
            let barrier = self.0.clone();
            let field = context.field_name().to_string();
            Ok(Box::new(ConcurrentLeaf::new(move |_| {
                let barrier = barrier.clone();
                let field = field.clone();
                async move {
                    barrier.wait().await;
                    Ok(FieldValue::Json(Value::from(field)))
                }
                .boxed()
            })))
        }
    }

    /// `@record(delayMs: Int)`: appends the field name to a shared list once resolved.
    struct Record(Arc<Mutex<Vec<String>>>);

    impl DirectiveFactory for Record {
        fn build(&self, context: &DirectiveContext<'_>) -> Result<Box<dyn Middleware>, DirectiveError> {
            let delay = context
                .raw_arguments()?
                .get("delayMs")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            let seen = self.0.clone();
            let field = context.field_name().to_string();
            Ok(Box::new(ConcurrentLeaf::new(move |_| {
                let seen = seen.clone();
                let field = field.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    seen.lock().push(field.clone());
                    Ok(FieldValue::Json(Value::from(field)))
                }
                .boxed()
            })))
        }
    }

    fn compile(sdl: &str, registry: &DirectiveRegistry) -> CompiledSchema {
        CompiledSchema::parse(sdl, registry, Arc::new(Upstreams::default())).unwrap()
    }

    async fn execute(sdl: &str, request: graphql::Request) -> graphql::Response {
        let mut registry = DirectiveRegistry::new();
        registry.register("echo", Echo);
        compile(sdl, &registry)
            .execute(request, FieldValue::Json(json!({})), Context::new())
            .await
    }

    async fn query(sdl: &str, query: &str) -> graphql::Response {
        execute(sdl, graphql::Request::builder().query(query).build()).await
    }

    const USERS: &str = r#"
        type Query {
            greeting: String @stub(value: "hello")
            user: User @stub(value: {id: "1", name: "joe", friends: [{id: "2", name: "ann"}]})
        }
        type User {
            id: ID!
            name: String
            friends: [User]
        }
    "#;

    #[test(tokio::test)]
    async fn selections_fragments_and_aliases() {
        let response = query(
            USERS,
            r#"
            query Users {
                hello: greeting
                user {
                    __typename
                    ...Names
                    friends { ... on User { id } }
                }
            }
            fragment Names on User { id name }
            "#,
        )
        .await;
        assert_eq!(response.errors, Vec::new());
        assert_eq!(
            response.data,
            Some(json!({
                "hello": "hello",
                "user": {
                    "__typename": "User",
                    "id": "1",
                    "name": "joe",
                    "friends": [{"id": "2"}]
                }
            }))
        );
    }

    #[test(tokio::test)]
    async fn root_value_fields_resolve_by_name() {
        let schema = compile("type Query { name: String count: Int }", &DirectiveRegistry::new());
        let response = schema
            .execute(
                graphql::Request::builder().query("{ name count }").build(),
                FieldValue::Json(json!({"name": "root", "count": "3"})),
                Context::new(),
            )
            .await;
        assert_eq!(response.data, Some(json!({"name": "root", "count": 3})));
    }

    #[test(tokio::test)]
    async fn outer_directive_wins() {
        let response = query(
            r#"type Query { field: String @log @stub(value: "b") }"#,
            "{ field }",
        )
        .await;
        assert_eq!(response.data, Some(json!({"field": "b"})));
    }

    #[test(tokio::test)]
    async fn null_bubbles_to_the_nearest_nullable_parent() {
        let response = query(
            r#"
            type Query {
                user: User @stub(value: {name: "joe"})
                other: String @stub(value: "x")
            }
            type User { id: ID! name: String }
            "#,
            "{ user { id name } other }",
        )
        .await;
        insta::assert_json_snapshot!(response, @r#"
        {
          "data": {
            "user": null,
            "other": "x"
          },
          "errors": [
            {
              "message": "cannot return null for non-null type ID!",
              "locations": [
                {
                  "line": 1,
                  "column": 10
                }
              ],
              "path": [
                "user",
                "id"
              ],
              "extensions": {
                "code": "INVALID_FIELD_VALUE"
              }
            }
          ]
        }
        "#);
    }

    #[test(tokio::test)]
    async fn null_root_field_nulls_the_data() {
        let response = query("type Query { required: String! }", "{ required }").await;
        assert_eq!(response.data, Some(Value::Null));
        assert_eq!(response.errors.len(), 1);
    }

    #[test(tokio::test)]
    async fn list_elements_are_nulled_individually() {
        let response = query(
            r#"type Query { counts: [Int] @stub(value: [1, "two", 3]) }"#,
            "{ counts }",
        )
        .await;
        assert_eq!(response.data, Some(json!({"counts": [1, null, 3]})));
        assert_eq!(
            response.errors[0].path,
            Some(Path::empty().join_key("counts").join_index(1))
        );
    }

    #[test(tokio::test)]
    async fn errors_are_reported_beside_partial_data() {
        let response = query(
            r#"
            type Query {
                count: Int @stub(value: "abc")
                color: Color @stub(value: "PURPLE")
                name: String @stub(value: "joe")
            }
            enum Color { RED GREEN }
            "#,
            "{ count color name missing }",
        )
        .await;
        assert_eq!(
            response.data,
            Some(json!({"count": null, "color": null, "name": "joe", "missing": null}))
        );
        let mut codes: Vec<_> = response
            .errors
            .iter()
            .filter_map(graphql::Error::extension_code)
            .collect();
        codes.sort();
        assert_eq!(
            codes,
            vec!["GRAPHQL_VALIDATION_FAILED", "INVALID_FIELD_VALUE", "INVALID_FIELD_VALUE"]
        );
    }

    #[test(tokio::test)]
    async fn skip_and_include() {
        let response = execute(
            USERS,
            graphql::Request::builder()
                .query(
                    r#"query ($withUser: Boolean!) {
                        greeting @skip(if: true)
                        user @include(if: $withUser) { name }
                    }"#,
                )
                .variables(json!({"withUser": true}).as_object().cloned().unwrap())
                .build(),
        )
        .await;
        assert_eq!(response.data, Some(json!({"user": {"name": "joe"}})));

        let response = query(USERS, "{ greeting user @include(if: false) { name } }").await;
        assert_eq!(response.data, Some(json!({"greeting": "hello"})));
    }

    #[test(tokio::test)]
    async fn abstract_types() {
        let response = query(
            r#"
            type Query {
                nodes: [Node] @stub(value: [
                    {__typename: "User", id: "1", name: "joe"},
                    {__typename: "Team", id: "2", size: 3}
                ])
                only: Only @stub(value: {id: "3"})
                unknown: Node @stub(value: {__typename: "Robot", id: "4"})
            }
            interface Node { id: ID! }
            type User implements Node { id: ID! name: String }
            type Team implements Node { id: ID! size: Int }
            union Only = Team
            "#,
            r#"{
                nodes { id __typename ... on User { name } ... on Team { size } }
                only { ... on Team { id } }
                unknown { id }
            }"#,
        )
        .await;
        assert_eq!(
            response.data,
            Some(json!({
                "nodes": [
                    {"id": "1", "__typename": "User", "name": "joe"},
                    {"id": "2", "__typename": "Team", "size": 3}
                ],
                "only": {"id": "3"},
                "unknown": null
            }))
        );
        assert_eq!(response.errors.len(), 1);
        assert_eq!(
            response.errors[0].message,
            "'Robot' is not a possible type of Node"
        );
    }

    #[test(tokio::test)]
    async fn arguments_defaults_and_variables() {
        let sdl = r#"
            type Query { echo(limit: Int = 10, filter: Filter, id: ID!): JSON @echo }
            input Filter { name: String active: Boolean = true }
        "#;
        let response = execute(
            sdl,
            graphql::Request::builder()
                .query(r#"query ($f: Filter, $unset: Int) { echo(id: "1", filter: $f, limit: $unset) }"#)
                .variables(json!({"f": {"name": "joe"}}).as_object().cloned().unwrap())
                .build(),
        )
        .await;
        assert_eq!(
            response.data,
            Some(json!({
                "echo": {"id": "1", "filter": {"name": "joe", "active": true}, "limit": 10}
            }))
        );

        let response = query(sdl, r#"{ echo(id: "1", unknown: 1) }"#).await;
        assert_eq!(response.data, Some(json!({"echo": null})));
        assert_eq!(
            response.errors[0].extension_code().as_deref(),
            Some("INVALID_ARGUMENT")
        );

        let response = query(sdl, "{ echo }").await;
        assert_eq!(
            response.errors[0].message,
            "invalid argument: missing required argument 'id' of type ID!"
        );
    }

    #[test(tokio::test)]
    async fn request_errors_have_no_data() {
        let cases = [
            ("{ greeting", None, "GRAPHQL_PARSE_FAILED"),
            ("query A { greeting } query B { greeting }", None, "GRAPHQL_VALIDATION_FAILED"),
            ("query A { greeting }", Some("C"), "GRAPHQL_VALIDATION_FAILED"),
            ("subscription { greeting }", None, "GRAPHQL_VALIDATION_FAILED"),
            ("mutation { greeting }", None, "GRAPHQL_VALIDATION_FAILED"),
            ("query ($id: ID!) { greeting }", None, "BAD_USER_INPUT"),
            ("fragment F on Query { greeting }", None, "GRAPHQL_VALIDATION_FAILED"),
        ];
        for (document, operation_name, code) in cases {
            let response = execute(
                USERS,
                graphql::Request::builder()
                    .query(document)
                    .and_operation_name(operation_name.map(str::to_string))
                    .build(),
            )
            .await;
            assert_eq!(response.data, None, "{document}");
            assert_eq!(response.errors.len(), 1, "{document}");
            assert_eq!(response.errors[0].extension_code().as_deref(), Some(code), "{document}");
        }
    }

    #[test(tokio::test)]
    async fn operation_is_selected_by_name() {
        let response = execute(
            USERS,
            graphql::Request::builder()
                .query("query A { greeting } query B { user { id } }")
                .operation_name("B")
                .build(),
        )
        .await;
        assert_eq!(response.data, Some(json!({"user": {"id": "1"}})));
    }

    #[test(tokio::test)]
    async fn sibling_fields_resolve_concurrently() {
        let mut registry = DirectiveRegistry::new();
        registry.register("meet", Meet(Arc::new(Barrier::new(3))));
        let schema = compile("type Query { a: String @meet b: String @meet c: String @meet }", &registry);
        let response = tokio::time::timeout(
            Duration::from_secs(5),
            schema.execute(
                graphql::Request::builder().query("{ a b c }").build(),
                FieldValue::null(),
                Context::new(),
            ),
        )
        .await
        .expect("siblings should not wait for each other");
        assert_eq!(response.data, Some(json!({"a": "a", "b": "b", "c": "c"})));
    }

    #[test(tokio::test)]
    async fn mutation_fields_run_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = DirectiveRegistry::new();
        registry.register("record", Record(seen.clone()));
        let schema = compile(
            r#"
            type Query { noop: String }
            type Mutation {
                first: String @record(delayMs: 50)
                second: String @record
            }
            "#,
            &registry,
        );
        let response = schema
            .execute(
                graphql::Request::builder().query("mutation { first second }").build(),
                FieldValue::null(),
                Context::new(),
            )
            .await;
        assert_eq!(response.data, Some(json!({"first": "first", "second": "second"})));
        assert_eq!(*seen.lock(), vec!["first".to_string(), "second".to_string()]);
    }

    #[test(tokio::test)]
    async fn exports_reach_nested_rest_calls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/u1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "u1", "name": "joe"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/u1/posts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": "p1", "title": "first"},
                {"id": "p2", "title": "second"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/u1/posts/p1/comments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{"text": "nice"}])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/u1/posts/p2/comments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let sdl = r#"
            type Query { user(id: ID!): User @rest(url: "$URL/users/{args.id}") }
            type User {
                id: ID! @exportAs(key: "userId")
                name: String
                posts: [Post] @rest(url: "$URL/users/{source.id}/posts")
            }
            type Post {
                id: ID!
                title: String
                comments: [Comment] @rest(url: "$URL/users/{exports.userId}/posts/{source.id}/comments")
            }
            type Comment { text: String }
        "#
        .replace("$URL", &server.uri());
        let response = query(
            &sdl,
            r#"{ user(id: "u1") { name posts { title comments { text } } } }"#,
        )
        .await;
        assert_eq!(response.errors, Vec::new());
        assert_eq!(
            response.data,
            Some(json!({
                "user": {
                    "name": "joe",
                    "posts": [
                        {"title": "first", "comments": [{"text": "nice"}]},
                        {"title": "second", "comments": []}
                    ]
                }
            }))
        );
    }

    #[test(tokio::test)]
    async fn aliased_fields_read_the_upstream_response_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_string_contains("upper: name(upper: true)"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"user": {"name": "joe", "upper": "JOE"}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let sdl = r#"
            type Query { user: User @gql(url: "$URL/graphql") }
            type User { name(upper: Boolean): String }
        "#
        .replace("$URL", &server.uri());
        let response = query(&sdl, "{ user { name upper: name(upper: true) } }").await;
        assert_eq!(response.errors, Vec::new());
        assert_eq!(
            response.data,
            Some(json!({"user": {"name": "joe", "upper": "JOE"}}))
        );
    }

    #[test]
    fn skip_and_include_conditions() {
        let document = ast::Document::parse(
            "{ a @skip(if: $s) b @include(if: $i) c @skip(if: false) @include(if: true) d }",
            "request.graphql",
        )
        .unwrap();
        let Some(ast::Definition::OperationDefinition(operation)) = document.definitions.first()
        else {
            panic!("expected an operation");
        };
        let variables = json!({"s": true, "i": false}).as_object().cloned().unwrap();
        let included: Vec<_> = operation
            .selection_set
            .iter()
            .filter_map(|selection| match selection {
                ast::Selection::Field(field) if is_included(&field.directives, &variables) => {
                    Some(field.name.as_str())
                }
                _ => None,
            })
            .collect();
        assert_eq!(included, vec!["c", "d"]);
    }
}
