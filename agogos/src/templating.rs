//! `{source.key}` placeholders in directive arguments.
//!
//! Three sources are available:
//! * `args`: an argument of the field being resolved,
//! * `source`: a field of the parent value,
//! * `exports`: a value exported by an ancestor with `@exportAs`.
use once_cell::sync::Lazy;
use regex::Captures;
use regex::Regex;

use crate::directives::exports::resolve_export;
use crate::directives::exports::source_connector;
use crate::error::DirectiveError;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;
use crate::middleware::ResolveParams;
use crate::value::identity;

static TEMPLATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{(\w+)\.(\w+)\}").expect("this regex to check templates is valid; qed")
});

const SOURCES: [&str; 3] = ["args", "source", "exports"];

/// Checks that every placeholder of `template` names a known source.
pub(crate) fn validate(template: &str) -> Result<(), DirectiveError> {
    for captures in TEMPLATE.captures_iter(template) {
        let source = &captures[1];
        if !SOURCES.contains(&source) {
            return Err(DirectiveError::InvalidTemplate {
                template: template.to_string(),
                reason: format!("unknown source '{source}', expected one of {SOURCES:?}"),
            });
        }
    }
    Ok(())
}

/// Looks up the value a placeholder refers to. Null when there is none.
fn lookup(params: &ResolveParams, source: &str, key: &str) -> Value {
    match source {
        "args" => params.args.get(key).cloned().unwrap_or(Value::Null),
        "source" => identity(key, &params.source)
            .map(|value| value.to_value())
            .unwrap_or(Value::Null),
        "exports" => resolve_export(source_connector(params), key, &params.info.exports),
        _ => Value::Null,
    }
}

/// Replaces every placeholder of `template` with the string form of its value.
///
/// Strings are inserted without quotes, other values as JSON and missing values as nothing.
pub(crate) fn substitute(template: &str, params: &ResolveParams) -> String {
    TEMPLATE
        .replace_all(template, |captures: &Captures| {
            lookup(params, &captures[1], &captures[2]).to_template_string()
        })
        .into_owned()
}

/// Substitutes the placeholders of every string, and every key, nested in `value`.
pub(crate) fn substitute_value(value: &Value, params: &ResolveParams) -> Value {
    match value {
        Value::String(template) => Value::String(substitute(template.as_str(), params).into()),
        Value::Array(elements) => Value::Array(
            elements
                .iter()
                .map(|element| substitute_value(element, params))
                .collect(),
        ),
        Value::Object(object) => Value::Object(
            object
                .iter()
                .map(|(key, value)| {
                    (
                        substitute(key.as_str(), params).into(),
                        substitute_value(value, params),
                    )
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

/// When `template` is exactly one placeholder whose value is a list, returns that list.
pub(crate) fn resolve_single_array_template(
    params: &ResolveParams,
    template: &str,
) -> Option<Vec<Value>> {
    let captures = TEMPLATE.captures(template)?;
    if captures.get(0)?.as_str() != template {
        return None;
    }
    match lookup(params, &captures[1], &captures[2]) {
        Value::Array(elements) => Some(elements),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json_bytes::json;

    use super::*;
    use crate::directives::exports::ExportRegistryBuilder;
    use crate::directives::exports::ParentConnector;
    use crate::middleware::ResolveInfo;
    use crate::middleware::tests::params;
    use crate::value::FieldValue;

    fn params_with(args: Value, source: Value) -> ResolveParams {
        let mut params = params(FieldValue::Json(source));
        params.args = args.as_object().cloned().unwrap_or_default();
        params
    }

    #[test]
    fn args_and_source() {
        let params = params_with(json!({"arg1": "arg"}), json!({"source1": "source"}));
        assert_eq!(
            substitute("{args.arg1} - {source.source1}", &params),
            "arg - source"
        );

        let params = params_with(json!({"id": 7}), json!({"name": "joe"}));
        assert_eq!(substitute("{args.id}-{source.name}", &params), "7-joe");
    }

    #[test]
    fn missing_value_is_empty() {
        let params = params_with(json!({}), json!({}));
        assert_eq!(substitute(">a{args.not_there}b<", &params), ">ab<");
        assert_eq!(substitute("{unknown.thing}", &params), "");
    }

    #[test]
    fn non_string_values_are_json() {
        let params = params_with(json!({"filter": {"a": [1, true]}}), json!({}));
        assert_eq!(
            substitute("?q={args.filter}", &params),
            r#"?q={"a":[1,true]}"#
        );
    }

    #[test]
    fn exports_are_read_from_ancestors() {
        let builder = ExportRegistryBuilder::default();
        builder.register("userId", "User", "id");
        let registry = Arc::new(builder.freeze(vec!["Query".to_string()]));
        let root = Arc::new(ParentConnector::new(FieldValue::null(), "Query", None));
        let user = Arc::new(ParentConnector::new(
            FieldValue::Json(json!({"id": "u1"})),
            "User",
            Some(root),
        ));

        let mut params = params(FieldValue::Connected(user));
        params.info = Arc::new(
            ResolveInfo::builder()
                .field_name("posts")
                .exports(registry)
                .build(),
        );
        assert_eq!(substitute("/users/{exports.userId}/posts", &params), "/users/u1/posts");
    }

    #[test]
    fn values_are_substituted_inside_strings() {
        let params = params_with(json!({"id": 7}), json!({"name": "jo\"e"}));
        let value = json!({"user": {"name": "{source.name}", "ids": ["{args.id}", 1]}, "{args.id}": true});
        assert_eq!(
            substitute_value(&value, &params),
            json!({"user": {"name": "jo\"e", "ids": ["7", 1]}, "7": true})
        );
    }

    #[test]
    fn single_array_template() {
        let params = params_with(json!({"ids": [1, 2]}), json!({"tags": ["a", "b"]}));
        assert_eq!(
            resolve_single_array_template(&params, "{args.ids}"),
            Some(vec![json!(1), json!(2)])
        );
        assert_eq!(
            resolve_single_array_template(&params, "{source.tags}"),
            Some(vec![json!("a"), json!("b")])
        );
        assert_eq!(
            resolve_single_array_template(&params, "{args.ids}{source.tags}"),
            None
        );
        assert_eq!(resolve_single_array_template(&params, "{args.nope}"), None);
        assert_eq!(resolve_single_array_template(&params, "x{args.ids}"), None);
    }

    #[test]
    fn unknown_sources_are_rejected() {
        assert!(validate("{args.a}/{source.b}/{exports.c}").is_ok());
        assert!(matches!(
            validate("{context.user}"),
            Err(DirectiveError::InvalidTemplate { .. })
        ));
    }
}
