//! Rebuilds the query sent to an upstream GraphQL service from the selection of a field.
//!
//! The sub-selection of the field being resolved is mirrored under the upstream's
//! `query_name`. Selections are sorted so that equivalent requests produce the same text.
use std::collections::BTreeMap;
use std::fmt::Write as _;

use apollo_compiler::ast;
use indexmap::IndexSet;
use serde::Serialize;

use crate::execution::is_included;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::middleware::ResolveParams;
use crate::templating;

/// A query ready to be posted to an upstream GraphQL service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForwardQuery {
    pub query: String,
    #[serde(skip_serializing_if = "Object::is_empty")]
    pub variables: Object,
}

/// Builds the query forwarding the current field to an upstream as `query_name`.
///
/// When `custom_args` is set it is substituted with the request values and replaces the
/// arguments of the forwarded field.
pub(crate) fn build_forward_query(
    query_name: &str,
    params: &ResolveParams,
    custom_args: Option<&str>,
) -> ForwardQuery {
    let mut builder = QueryBuilder {
        params,
        out: String::new(),
        variables: BTreeMap::new(),
        fragments: IndexSet::new(),
    };

    builder.out.push_str("{\n");
    builder.out.push_str(query_name);
    builder.write_root_field(custom_args);
    builder.out.push_str("}\n");
    builder.write_fragments();

    let header = if builder.variables.is_empty() {
        String::new()
    } else {
        let declarations: Vec<String> = builder
            .variables
            .iter()
            .map(|(name, (ty, _))| format!("${name}: {ty}"))
            .collect();
        format!("({})", declarations.join(", "))
    };

    ForwardQuery {
        query: format!("query{header} {}", builder.out),
        variables: builder
            .variables
            .into_iter()
            .map(|(name, (_, value))| (name.into(), value))
            .collect(),
    }
}

struct QueryBuilder<'a> {
    params: &'a ResolveParams,
    out: String,
    /// Variables used by the forwarded arguments, with their inferred type and value.
    variables: BTreeMap<String, (&'static str, Value)>,
    fragments: IndexSet<String>,
}

impl QueryBuilder<'_> {
    fn write_root_field(&mut self, custom_args: Option<&str>) {
        let params = self.params;
        let nodes = &params.info.field_nodes;
        let custom_args = custom_args
            .map(|template| templating::substitute(template, params))
            .filter(|args| !args.trim().is_empty());

        match custom_args {
            Some(args) => {
                let _ = write!(self.out, "({args})");
            }
            None => {
                if let Some(first) = nodes.first() {
                    self.write_arguments(&first.arguments);
                }
            }
        }

        // Merged field nodes share one response key, so their selections are forwarded together.
        let selections: Vec<&ast::Selection> = nodes
            .iter()
            .flat_map(|node| node.selection_set.iter())
            .collect();
        self.write_selection_set(selections);
    }

    fn write_selection_set(&mut self, mut selections: Vec<&ast::Selection>) {
        if selections.is_empty() {
            self.out.push('\n');
            return;
        }
        selections.sort_by_cached_key(|selection| sort_key(selection));

        self.out.push_str(" {\n");
        for selection in selections {
            if !is_included(directives(selection), &self.params.info.variables) {
                continue;
            }
            match selection {
                ast::Selection::Field(field) => {
                    if let Some(alias) = &field.alias {
                        let _ = write!(self.out, "{alias}: ");
                    }
                    self.out.push_str(field.name.as_str());
                    self.write_arguments(&field.arguments);
                    self.write_selection_set(field.selection_set.iter().collect());
                }
                ast::Selection::FragmentSpread(spread) => {
                    let _ = writeln!(self.out, "...{}", spread.fragment_name);
                    self.fragments.insert(spread.fragment_name.to_string());
                }
                ast::Selection::InlineFragment(inline) => {
                    match &inline.type_condition {
                        Some(type_condition) => {
                            let _ = write!(self.out, "... on {type_condition}");
                        }
                        None => self.out.push_str("..."),
                    }
                    self.write_selection_set(inline.selection_set.iter().collect());
                }
            }
        }
        self.out.push_str("}\n");
    }

    fn write_fragments(&mut self) {
        let mut index = 0;
        // Fragments can spread further fragments, which are queued while writing.
        while let Some(name) = self.fragments.get_index(index).cloned() {
            index += 1;
            let params = self.params;
            let Some(fragment) = params.info.fragments.get(&name) else {
                tracing::warn!(fragment = %name, "unknown fragment in forwarded selection");
                continue;
            };
            let _ = write!(
                self.out,
                "fragment {name} on {}",
                fragment.type_condition
            );
            self.write_selection_set(fragment.selection_set.iter().collect());
        }
    }

    fn write_arguments(&mut self, arguments: &[apollo_compiler::Node<ast::Argument>]) {
        if arguments.is_empty() {
            return;
        }
        self.out.push('(');
        for (index, argument) in arguments.iter().enumerate() {
            if index > 0 {
                self.out.push_str(", ");
            }
            let _ = write!(self.out, "{}: ", argument.name);
            self.write_value(&argument.value);
        }
        self.out.push(')');
    }

    fn write_value(&mut self, value: &ast::Value) {
        match value {
            ast::Value::Null => self.out.push_str("null"),
            ast::Value::Enum(name) => self.out.push_str(name.as_str()),
            ast::Value::Variable(name) => {
                let params = self.params;
                match params.info.variables.get(name.as_str()) {
                    Some(value) if !value.is_null() => {
                        self.variables
                            .entry(name.to_string())
                            .or_insert_with(|| (infer_type(value), value.clone()));
                        let _ = write!(self.out, "${name}");
                    }
                    _ => self.out.push_str("null"),
                }
            }
            ast::Value::String(s) => {
                let _ = write!(self.out, "{}", quote(s.as_str()));
            }
            ast::Value::Boolean(b) => {
                let _ = write!(self.out, "{b}");
            }
            ast::Value::Int(i) => self.out.push_str(i.as_str()),
            ast::Value::Float(f) => self.out.push_str(f.as_str()),
            ast::Value::List(elements) => {
                self.out.push('[');
                for (index, element) in elements.iter().enumerate() {
                    if index > 0 {
                        self.out.push_str(", ");
                    }
                    self.write_value(element);
                }
                self.out.push(']');
            }
            ast::Value::Object(fields) => {
                self.out.push('{');
                for (index, (name, value)) in fields.iter().enumerate() {
                    if index > 0 {
                        self.out.push_str(", ");
                    }
                    let _ = write!(self.out, "{name}: ");
                    self.write_value(value);
                }
                self.out.push('}');
            }
        }
    }
}

fn directives(selection: &ast::Selection) -> &ast::DirectiveList {
    match selection {
        ast::Selection::Field(field) => &field.directives,
        ast::Selection::FragmentSpread(spread) => &spread.directives,
        ast::Selection::InlineFragment(inline) => &inline.directives,
    }
}

fn sort_key(selection: &ast::Selection) -> String {
    match selection {
        ast::Selection::Field(field) => field.name.to_string(),
        ast::Selection::FragmentSpread(spread) => format!("...{}", spread.fragment_name),
        ast::Selection::InlineFragment(inline) => match &inline.type_condition {
            Some(type_condition) => format!("... on {type_condition}"),
            None => "...".to_string(),
        },
    }
}

fn infer_type(value: &Value) -> &'static str {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        Value::Number(_) => "Float",
        Value::String(_) => "String",
        Value::Bool(_) => "Boolean",
        _ => "JSON",
    }
}

/// A GraphQL string literal. JSON escaping is valid GraphQL escaping.
fn quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{s}\""))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use apollo_compiler::Node;
    use pretty_assertions::assert_eq;
    use serde_json_bytes::json;

    use super::*;
    use crate::middleware::Fragments;
    use crate::middleware::ResolveInfo;
    use crate::middleware::tests::params;
    use crate::value::FieldValue;

    /// Parameters for the first root field of `query`, as the executor would build them.
    fn params_for(query: &str, variables: Value) -> ResolveParams {
        let document = ast::Document::parse(query, "query.graphql").unwrap();
        let mut fragments = Fragments::new();
        let mut field = None;
        for definition in &document.definitions {
            match definition {
                ast::Definition::OperationDefinition(operation) => {
                    if let Some(ast::Selection::Field(first)) = operation.selection_set.first() {
                        field = Some(first.clone());
                    }
                }
                ast::Definition::FragmentDefinition(fragment) => {
                    fragments.insert(fragment.name.to_string(), fragment.clone());
                }
                _ => {}
            }
        }
        let field: Node<ast::Field> = field.unwrap();

        let mut params = params(FieldValue::null());
        params.info = Arc::new(
            ResolveInfo::builder()
                .field_name(field.name.to_string())
                .field_node(field)
                .fragments(Arc::new(fragments))
                .variables(Arc::new(variables.as_object().cloned().unwrap_or_default()))
                .build(),
        );
        params
    }

    #[test]
    fn simple_query() {
        let params = params_for("{ books { title author } }", json!({}));
        let forward = build_forward_query("books", &params, None);
        assert_eq!(forward.query, "query {\nbooks {\nauthor\ntitle\n}\n}\n");
        assert!(forward.variables.is_empty());
    }

    #[test]
    fn nested_query() {
        let params = params_for(
            "{ books { title author { lastName firstName } } }",
            json!({}),
        );
        let forward = build_forward_query("books", &params, None);
        assert_eq!(
            forward.query,
            "query {\nbooks {\nauthor {\nfirstName\nlastName\n}\ntitle\n}\n}\n"
        );
    }

    #[test]
    fn nested_query_with_fragment() {
        let params = params_for(
            r#"
            {
              books {
                title
                reviews { ...reviewFragment }
                author { firstName lastName }
                related { reviews { ...reviewFragment } }
              }
            }
            fragment reviewFragment on Review { reviewer text stars }
            "#,
            json!({}),
        );
        let forward = build_forward_query("books", &params, None);
        assert_eq!(
            forward.query,
            "query {\nbooks {\nauthor {\nfirstName\nlastName\n}\nrelated {\nreviews {\n...reviewFragment\n}\n}\nreviews {\n...reviewFragment\n}\ntitle\n}\n}\nfragment reviewFragment on Review {\nreviewer\nstars\ntext\n}\n"
        );
    }

    #[test]
    fn fragments_spreading_fragments_are_all_written_once() {
        let params = params_for(
            r#"
            { books { ...a ...b } }
            fragment a on Book { title ...b }
            fragment b on Book { isbn }
            "#,
            json!({}),
        );
        let forward = build_forward_query("books", &params, None);
        assert_eq!(
            forward.query,
            "query {\nbooks {\n...a\n...b\n}\n}\nfragment a on Book {\n...b\ntitle\n}\nfragment b on Book {\nisbn\n}\n"
        );
    }

    #[test]
    fn arguments_aliases_and_variables() {
        let params = params_for(
            r#"query ($id: ID, $limit: Int, $missing: String) {
                book(id: $id, filter: {tags: ["a\"b"], kind: NOVEL}) {
                    short: title(maxLength: $limit)
                    reviews(first: 2, lang: $missing) { text }
                }
            }"#,
            json!({"id": "b1", "limit": 10}),
        );
        let forward = build_forward_query("bookById", &params, None);
        assert_eq!(
            forward.query,
            "query($id: String, $limit: Int) {\nbookById(id: $id, filter: {tags: [\"a\\\"b\"], kind: NOVEL}) {\nreviews(first: 2, lang: null) {\ntext\n}\nshort: title(maxLength: $limit)\n}\n}\n"
        );
        assert_eq!(
            Value::Object(forward.variables),
            json!({"id": "b1", "limit": 10})
        );
    }

    #[test]
    fn custom_arguments_replace_incoming_ones() {
        let mut params = params_for(r#"{ user(id: "ignored") { name } }"#, json!({}));
        params.args = json!({"id": 7}).as_object().cloned().unwrap_or_default();
        let forward = build_forward_query("userById", &params, Some("userId: {args.id}"));
        assert_eq!(forward.query, "query {\nuserById(userId: 7) {\nname\n}\n}\n");
    }

    #[test]
    fn inline_fragments_keep_their_type_condition() {
        let params = params_for(
            "{ search { ... on Book { title } ... on Author { name } __typename } }",
            json!({}),
        );
        let forward = build_forward_query("search", &params, None);
        assert_eq!(
            forward.query,
            "query {\nsearch {\n... on Author {\nname\n}\n... on Book {\ntitle\n}\n__typename\n}\n}\n"
        );
    }

    #[test]
    fn skipped_selections_are_not_forwarded() {
        let params = params_for(
            "query ($full: Boolean) { books { title isbn @include(if: $full) } }",
            json!({"full": false}),
        );
        let forward = build_forward_query("books", &params, None);
        assert_eq!(forward.query, "query {\nbooks {\ntitle\n}\n}\n");
    }

    #[test]
    fn forward_query_serializes_as_a_graphql_request() {
        let forward = ForwardQuery {
            query: "query {\na\n}\n".to_string(),
            variables: Object::new(),
        };
        insta::assert_json_snapshot!(forward, @r#"
        {
          "query": "query {\na\n}\n"
        }
        "#);
    }
}
