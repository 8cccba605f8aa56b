//! Directives that shape a field's value from values already at hand.
use serde::Deserialize;

use crate::directives::DirectiveContext;
use crate::directives::DirectiveFactory;
use crate::error::DirectiveError;
use crate::json_ext::Value;
use crate::middleware::Leaf;
use crate::middleware::Middleware;
use crate::middleware::ResultTransform;
use crate::value::FieldValue;
use crate::value::identity;

#[derive(Deserialize)]
struct SelectArgs {
    path: Vec<String>,
}

/// `@select(path: [String!]!)`: descends into the result of the inner layers.
pub(crate) struct Select;

impl DirectiveFactory for Select {
    fn build(&self, context: &DirectiveContext<'_>) -> Result<Box<dyn Middleware>, DirectiveError> {
        let SelectArgs { path } = context.arguments()?;
        let field = format!("{}.{}", context.type_name(), context.field_name());
        Ok(Box::new(ResultTransform::new(move |_, value| {
            path.iter()
                .try_fold(value, |value, step| identity(step, &value))
                .unwrap_or_else(|err| {
                    tracing::warn!(field = %field, path = ?path, "could not select value: {}", err);
                    FieldValue::null()
                })
        })))
    }
}

#[derive(Deserialize)]
struct FromArgs {
    field: String,
}

/// `@from(field: String!)`: reads another field of the parent value.
pub(crate) struct FromField;

impl DirectiveFactory for FromField {
    fn build(&self, context: &DirectiveContext<'_>) -> Result<Box<dyn Middleware>, DirectiveError> {
        let FromArgs { field } = context.arguments()?;
        Ok(read(field))
    }
}

#[derive(Deserialize)]
struct AliasArgs {
    from: String,
}

/// `@alias(from: String!)`
pub(crate) struct Alias;

impl DirectiveFactory for Alias {
    fn build(&self, context: &DirectiveContext<'_>) -> Result<Box<dyn Middleware>, DirectiveError> {
        let AliasArgs { from } = context.arguments()?;
        Ok(read(from))
    }
}

fn read(field: String) -> Box<dyn Middleware> {
    Box::new(Leaf::new(move |params| {
        identity(&field, &params.source).map_err(Into::into)
    }))
}

/// `@stub(value: ...)`: always resolves to the literal.
pub(crate) struct Stub;

impl DirectiveFactory for Stub {
    fn build(&self, context: &DirectiveContext<'_>) -> Result<Box<dyn Middleware>, DirectiveError> {
        let value: Value = context
            .raw_arguments()?
            .remove("value")
            .ok_or_else(|| DirectiveError::MissingArgument("value".to_string()))?;
        Ok(Box::new(Leaf::new(move |_| Ok(FieldValue::Json(value.clone())))))
    }
}
