//! `@rest`: resolves a field with a call to a REST endpoint.
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use http::HeaderMap;
use http::HeaderName;
use http::HeaderValue;
use http::Method;
use http::StatusCode;
use http::header::CONTENT_TYPE;
use serde::Deserialize;
use url::Url;

use crate::directives::DirectiveContext;
use crate::directives::DirectiveFactory;
use crate::directives::NameValue;
use crate::error::DirectiveError;
use crate::error::ResolveError;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;
use crate::middleware::ConcurrentLeaf;
use crate::middleware::Middleware;
use crate::middleware::ResolveParams;
use crate::middleware::ResolveResult;
use crate::templating;
use crate::upstreams::Upstreams;
use crate::value::FieldValue;

pub(crate) const DEFAULT_TIMEOUT_MS: u64 = 10_000;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestArgs {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default = "default_content_type")]
    content_type: String,
    #[serde(default = "default_body_arg")]
    body_arg: String,
    #[serde(default)]
    query: Vec<NameValue>,
    #[serde(default)]
    headers: Vec<NameValue>,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_content_type() -> String {
    "json".to_string()
}

fn default_body_arg() -> String {
    "input".to_string()
}

pub(crate) fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

pub(crate) fn http_client(timeout_ms: u64) -> Result<reqwest::Client, DirectiveError> {
    reqwest::Client::builder()
        .timeout(Duration::from_millis(timeout_ms))
        .build()
        .map_err(|err| DirectiveError::InvalidArgument(err.to_string()))
}

pub(crate) struct Rest;

impl DirectiveFactory for Rest {
    fn build(&self, context: &DirectiveContext<'_>) -> Result<Box<dyn Middleware>, DirectiveError> {
        let args: RestArgs = context.arguments()?;

        templating::validate(&args.url)?;
        for NameValue { value, .. } in args.query.iter().chain(&args.headers) {
            templating::validate(value)?;
        }
        let method = Method::from_bytes(args.method.to_uppercase().as_bytes())
            .map_err(|_| DirectiveError::InvalidArgument(format!("method: {}", args.method)))?;
        if args.content_type != "json" {
            tracing::warn!(
                field = %context.field_name(),
                content_type = %args.content_type,
                "unsupported content type, falling back to json"
            );
        }

        let call = Arc::new(RestCall {
            client: http_client(args.timeout_ms)?,
            url: args.url,
            method,
            body_arg: args.body_arg,
            query: args.query,
            headers: args.headers,
            upstreams: context.upstreams().clone(),
        });
        Ok(Box::new(ConcurrentLeaf::new(move |params| {
            let call = call.clone();
            async move { call.call(params).await }.boxed()
        })))
    }
}

struct RestCall {
    client: reqwest::Client,
    url: String,
    method: Method,
    body_arg: String,
    query: Vec<NameValue>,
    headers: Vec<NameValue>,
    upstreams: Arc<Upstreams>,
}

impl RestCall {
    fn url(&self, params: &ResolveParams) -> Result<Url, ResolveError> {
        let raw = templating::substitute(&self.url, params);
        let mut url = Url::parse(&raw).map_err(|err| ResolveError::Http {
            url: raw.clone(),
            reason: err.to_string(),
        })?;
        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for NameValue { name, value } in &self.query {
                match templating::resolve_single_array_template(params, value) {
                    Some(elements) => {
                        for element in elements {
                            pairs.append_pair(name, &element.to_template_string());
                        }
                    }
                    None => {
                        pairs.append_pair(name, &templating::substitute(value, params));
                    }
                }
            }
        }
        Ok(url)
    }

    fn headers(&self, params: &ResolveParams) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for NameValue { name, value } in &self.headers {
            let value = templating::substitute(value, params);
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => tracing::warn!(header = %name, "skipping invalid header"),
            }
        }
        headers
    }

    fn body(&self, params: &ResolveParams) -> String {
        let input = match params.args.get(self.body_arg.as_str()) {
            Some(input @ Value::Object(_)) => input.clone(),
            _ => Value::Object(Default::default()),
        };
        serde_json::to_string(&templating::substitute_value(&input, params)).unwrap_or_default()
    }

    async fn call(&self, params: ResolveParams) -> ResolveResult {
        let url = self.url(&params)?;
        let mut headers = self.headers(&params);
        self.upstreams
            .apply(&url, &params.context, &mut headers)
            .await;

        let mut request = self.client.request(self.method.clone(), url.clone());
        if self.method != Method::GET {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            request = request.body(self.body(&params));
        }
        tracing::debug!(method = %self.method, url = %url, field = %params.info.field_name, "calling rest upstream");

        let http_error = |err: reqwest::Error| ResolveError::Http {
            url: url.to_string(),
            reason: err.to_string(),
        };
        let response = request.headers(headers).send().await.map_err(http_error)?;
        let status = response.status();
        let text = response.text().await.map_err(http_error)?;
        let host = url.host_str().unwrap_or_default().to_string();

        if status == StatusCode::NOT_FOUND {
            return Ok(FieldValue::null());
        }
        if status.as_u16() >= 400 {
            return Err(ResolveError::Status {
                status: status.as_u16(),
                host,
                body: text,
            });
        }
        if text.trim().is_empty() {
            return Ok(FieldValue::null());
        }
        serde_json::from_str::<Value>(&text)
            .map(FieldValue::Json)
            .map_err(|err| ResolveError::MalformedResponse {
                service: host,
                reason: err.to_string(),
            })
    }
}
