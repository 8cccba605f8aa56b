//! `@gql`: forwards the selection of a field to an upstream GraphQL service.
use std::sync::Arc;

use futures::FutureExt;
use http::HeaderMap;
use serde::Deserialize;
use url::Url;

use crate::directives::DirectiveContext;
use crate::directives::DirectiveFactory;
use crate::directives::rest::default_timeout_ms;
use crate::directives::rest::http_client;
use crate::error::DirectiveError;
use crate::error::ResolveError;
use crate::graphql;
use crate::json_ext::Value;
use crate::middleware::ConcurrentLeaf;
use crate::middleware::Middleware;
use crate::middleware::ResolveParams;
use crate::middleware::ResolveResult;
use crate::query_builder::build_forward_query;
use crate::templating;
use crate::upstreams::Upstreams;
use crate::value::FieldValue;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GqlArgs {
    url: String,
    query_name: Option<String>,
    arguments: Option<String>,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
}

pub(crate) struct Gql;

impl DirectiveFactory for Gql {
    fn build(&self, context: &DirectiveContext<'_>) -> Result<Box<dyn Middleware>, DirectiveError> {
        let args: GqlArgs = context.arguments()?;
        templating::validate(&args.url)?;
        if let Some(arguments) = &args.arguments {
            templating::validate(arguments)?;
        }

        let call = Arc::new(GqlCall {
            client: http_client(args.timeout_ms)?,
            url: args.url,
            query_name: args
                .query_name
                .unwrap_or_else(|| context.field_name().to_string()),
            arguments: args.arguments,
            upstreams: context.upstreams().clone(),
        });
        Ok(Box::new(ConcurrentLeaf::new(move |params| {
            let call = call.clone();
            async move { call.call(params).await }.boxed()
        })))
    }
}

struct GqlCall {
    client: reqwest::Client,
    url: String,
    query_name: String,
    arguments: Option<String>,
    upstreams: Arc<Upstreams>,
}

impl GqlCall {
    async fn call(&self, params: ResolveParams) -> ResolveResult {
        let raw = templating::substitute(&self.url, &params);
        let url = Url::parse(&raw).map_err(|err| ResolveError::Http {
            url: raw.clone(),
            reason: err.to_string(),
        })?;
        let host = url.host_str().unwrap_or_default().to_string();

        let query = build_forward_query(&self.query_name, &params, self.arguments.as_deref());
        let mut headers = HeaderMap::new();
        self.upstreams
            .apply(&url, &params.context, &mut headers)
            .await;
        tracing::debug!(url = %url, query = %query.query, "calling graphql upstream");

        let http_error = |err: reqwest::Error| ResolveError::Http {
            url: url.to_string(),
            reason: err.to_string(),
        };
        let response = self
            .client
            .post(url.clone())
            .headers(headers)
            .json(&query)
            .send()
            .await
            .map_err(http_error)?;
        let status = response.status();
        let text = response.text().await.map_err(http_error)?;
        if status.as_u16() >= 400 {
            return Err(ResolveError::Status {
                status: status.as_u16(),
                host,
                body: text,
            });
        }

        let mut response: graphql::Response =
            serde_json::from_str(&text).map_err(|err| ResolveError::MalformedResponse {
                service: host.clone(),
                reason: err.to_string(),
            })?;
        if !response.errors.is_empty() {
            let messages: Vec<&str> = response
                .errors
                .iter()
                .map(|error| error.message.as_str())
                .collect();
            return Err(ResolveError::Upstream {
                service: host,
                messages: messages.join("; "),
            });
        }

        let value = match response.data.as_mut() {
            Some(Value::Object(data)) => data.remove(self.query_name.as_str()).unwrap_or(Value::Null),
            _ => Value::Null,
        };
        Ok(FieldValue::Json(value))
    }
}
