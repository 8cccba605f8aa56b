use serde::Deserialize;

use crate::directives::DirectiveContext;
use crate::directives::DirectiveFactory;
use crate::error::DirectiveError;
use crate::json_ext::Value;
use crate::middleware::Middleware;
use crate::middleware::RequestTransform;

/// Context entry holding the id shared by every log line of a request.
pub(crate) const TRACE_ID: &str = "log.trace_id";

#[derive(Deserialize, Default)]
#[serde(default)]
struct LogArgs {
    message: Option<String>,
}

/// `@log(message: String)`: logs every resolution of the field.
pub(crate) struct Log;

impl DirectiveFactory for Log {
    fn build(&self, context: &DirectiveContext<'_>) -> Result<Box<dyn Middleware>, DirectiveError> {
        let LogArgs { message } = context.arguments()?;
        let message = message.unwrap_or_else(|| "resolving field".to_string());
        let field = format!("{}.{}", context.type_name(), context.field_name());
        Ok(Box::new(RequestTransform::new(move |mut params| {
            if params.context.get(TRACE_ID).is_none() {
                params.context = params
                    .context
                    .with_entry(TRACE_ID, uuid::Uuid::new_v4().to_string());
            }
            let trace_id = params
                .context
                .get(TRACE_ID)
                .and_then(Value::as_str)
                .unwrap_or_default();
            tracing::info!(
                field = %field,
                path = %params.info.path,
                args = ?params.args,
                trace_id = %trace_id,
                "{}",
                message
            );
            params
        })))
    }
}
