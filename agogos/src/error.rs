//! Gateway errors.
use displaydoc::Display;
use serde_json_bytes::Value;
use thiserror::Error;

use crate::graphql;
use crate::graphql::Location;
use crate::json_ext::Path;

/// Errors raised while turning a configuration snapshot into an executable schema.
///
/// None of these stop the gateway: the schema that was active before the snapshot keeps
/// serving requests.
#[derive(Error, Display, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum CompileError {
    /// could not parse schema: {0}
    Parse(String),

    /// unknown type '{0}'
    UnknownType(String),

    /// custom scalar '{0}' is not supported
    UnsupportedScalar(String),

    /// type '{name}' cannot be used as {usage}
    InvalidTypeUsage { name: String, usage: &'static str },

    /// schema has no query root type
    MissingRootType,

    /// invalid default value for argument '{argument}' of '{type_name}.{field}': {reason}
    InvalidDefaultValue {
        type_name: String,
        field: String,
        argument: String,
        reason: String,
    },

    /// directive '@{directive}' on '{type_name}.{field}' is invalid: {source}
    Directive {
        type_name: String,
        field: String,
        directive: String,
        source: DirectiveError,
    },

    /// schema compilation panicked: {0}
    Panic(String),
}

/// Errors raised while building a directive middleware from its arguments.
#[derive(Error, Display, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum DirectiveError {
    /// missing required argument '{0}'
    MissingArgument(String),

    /// invalid arguments: {0}
    InvalidArgument(String),

    /// invalid template '{template}': {reason}
    InvalidTemplate { template: String, reason: String },
}

/// cannot read field '{field}' from a {kind} value
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
pub struct AccessError {
    pub field: String,
    pub kind: &'static str,
}

/// Errors returned by a field resolver at request time.
///
/// They are rendered beside the partial data of the response and never abort the resolution
/// of sibling fields.
#[derive(Error, Display, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ResolveError {
    /// HTTP request to '{url}' failed: {reason}
    Http { url: String, reason: String },

    /// HTTP Error. StatusCode={status}, Host={host}, ResponseBody={body}
    Status {
        status: u16,
        host: String,
        body: String,
    },

    /// response from '{service}' was malformed: {reason}
    MalformedResponse { service: String, reason: String },

    /// upstream '{service}' returned errors: {messages}
    Upstream { service: String, messages: String },

    /// {0}
    Access(#[from] AccessError),

    /// background resolution failed: {0}
    Join(String),

    /// invalid argument: {0}
    InvalidArgument(String),

    /// cannot query field '{field}' on type '{type_name}'
    UnknownField { type_name: String, field: String },

    /// {0}
    Completion(String),

    /// {0}
    Message(String),
}

impl ResolveError {
    pub(crate) fn extension_code(&self) -> &'static str {
        match self {
            ResolveError::Http { .. } => "HTTP_ERROR",
            ResolveError::Status { .. } => "HTTP_STATUS_ERROR",
            ResolveError::MalformedResponse { .. } => "MALFORMED_RESPONSE",
            ResolveError::Upstream { .. } => "UPSTREAM_ERROR",
            ResolveError::Access(_) => "FIELD_ACCESS_ERROR",
            ResolveError::Join(_) => "INTERNAL_SERVER_ERROR",
            ResolveError::InvalidArgument(_) => "INVALID_ARGUMENT",
            ResolveError::UnknownField { .. } => "GRAPHQL_VALIDATION_FAILED",
            ResolveError::Completion(_) => "INVALID_FIELD_VALUE",
            ResolveError::Message(_) => "RESOLVER_ERROR",
        }
    }

    /// Convert the resolve error to a GraphQL error.
    pub(crate) fn to_graphql_error(&self, path: Path, locations: Vec<Location>) -> graphql::Error {
        let mut error = graphql::Error::builder()
            .message(self.to_string())
            .locations(locations)
            .path(path)
            .extension_code(self.extension_code())
            .build();
        if let ResolveError::Status { status, .. } = self {
            error
                .extensions
                .insert("status", Value::Number((*status).into()));
        }
        error
    }
}

/// Errors that prevent a request from being executed at all.
#[derive(Error, Display, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum RequestError {
    /// could not parse query: {0}
    Parse(String),

    /// the request contains no operation
    NoOperation,

    /// unknown operation named '{0}'
    UnknownOperation(String),

    /// an operation name is required when the request contains several operations
    AmbiguousOperation,

    /// {0} operations are not supported
    UnsupportedOperation(&'static str),

    /// invalid variable '{name}': {reason}
    InvalidVariable { name: String, reason: String },
}

impl RequestError {
    pub(crate) fn extension_code(&self) -> &'static str {
        match self {
            RequestError::Parse(_) => "GRAPHQL_PARSE_FAILED",
            RequestError::InvalidVariable { .. } => "BAD_USER_INPUT",
            _ => "GRAPHQL_VALIDATION_FAILED",
        }
    }

    pub(crate) fn to_graphql_error(&self) -> graphql::Error {
        graphql::Error::builder()
            .message(self.to_string())
            .extension_code(self.extension_code())
            .build()
    }
}

/// Errors raised while fetching an access token for an upstream.
#[derive(Error, Display, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum TokenError {
    /// unsupported auth type '{0}'
    UnsupportedAuthType(String),

    /// token request to '{authority}' failed: {reason}
    Request { authority: String, reason: String },

    /// token endpoint '{authority}' answered {status}: {body}
    Status {
        authority: String,
        status: u16,
        body: String,
    },

    /// malformed token response from '{authority}': {reason}
    Malformed { authority: String, reason: String },
}

/// Errors raised while loading a configuration snapshot.
#[derive(Error, Display, Debug)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// could not read configuration '{path}': {error}
    CannotRead { path: String, error: String },

    /// could not parse configuration: {0}
    InvalidConfiguration(String),
}
