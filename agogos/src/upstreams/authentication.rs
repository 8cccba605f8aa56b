//! Credentials added to requests sent to upstreams.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use derivative::Derivative;
use http::HeaderMap;
use http::HeaderValue;
use http::header::AUTHORIZATION;
use parking_lot::Mutex;
use serde::Deserialize;

use crate::configuration::FORWARD_HEADER_AUTH;
use crate::configuration::UpstreamAuthCredentials;
use crate::context::Context;
use crate::error::TokenError;

pub const OAUTH2_CLIENT_CREDENTIALS: &str = "oauth2/client_credentials";
pub const ACTIVE_DIRECTORY_CLIENT_CREDENTIALS: &str = "activedirectory/client_credentials";

/// Tokens are refreshed this long before they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(30);

/// Adds credentials to the headers of an upstream request.
#[async_trait]
pub trait UpstreamAuthentication: Send + Sync + 'static {
    /// Failures are logged and leave `headers` untouched: the request is sent without
    /// credentials and the upstream decides what to do with it.
    async fn authenticate(&self, context: &Context, scope: &str, headers: &mut HeaderMap);
}

/// A client credentials token request.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct TokenRequest {
    pub auth_type: String,
    pub authority: String,
    pub client_id: String,
    #[derivative(Debug = "ignore")]
    pub client_secret: String,
    pub scope: String,
}

/// Where access tokens come from.
#[async_trait]
pub trait TokenSource: Send + Sync + 'static {
    async fn token(&self, request: &TokenRequest) -> Result<String, TokenError>;
}

/// Copies the `Authorization` header of the inbound request.
#[derive(Debug, Default)]
pub struct ForwardHeader;

#[async_trait]
impl UpstreamAuthentication for ForwardHeader {
    async fn authenticate(&self, context: &Context, _scope: &str, headers: &mut HeaderMap) {
        match context.headers().get(AUTHORIZATION) {
            Some(value) => {
                headers.insert(AUTHORIZATION, value.clone());
            }
            None => tracing::warn!("no authorization header to forward"),
        }
    }
}

/// Authenticates with a bearer token obtained with the client credentials grant.
pub struct ClientCredentials {
    credentials: UpstreamAuthCredentials,
    tokens: Arc<dyn TokenSource>,
}

impl ClientCredentials {
    pub fn new(credentials: UpstreamAuthCredentials, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            credentials,
            tokens,
        }
    }
}

#[async_trait]
impl UpstreamAuthentication for ClientCredentials {
    async fn authenticate(&self, _context: &Context, scope: &str, headers: &mut HeaderMap) {
        let request = TokenRequest {
            auth_type: self.credentials.auth_type.clone(),
            authority: self.credentials.authority.clone(),
            client_id: self.credentials.client_id.clone(),
            client_secret: self.credentials.client_secret.clone(),
            scope: scope.to_string(),
        };
        let token = match self.tokens.token(&request).await {
            Ok(token) => token,
            Err(err) => {
                tracing::error!(authority = %request.authority, "could not get access token: {}", err);
                return;
            }
        };
        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(value) => {
                headers.insert(AUTHORIZATION, value);
            }
            Err(err) => {
                tracing::error!(authority = %request.authority, "access token is not a valid header: {}", err);
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct CacheKey {
    auth_type: String,
    authority: String,
    client_id: String,
    scope: String,
}

impl From<&TokenRequest> for CacheKey {
    fn from(request: &TokenRequest) -> Self {
        Self {
            auth_type: request.auth_type.clone(),
            authority: request.authority.clone(),
            client_id: request.client_id.clone(),
            scope: request.scope.clone(),
        }
    }
}

#[derive(Debug)]
struct CachedToken {
    token: String,
    refresh_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Seconds, a number for OAuth2 servers and a string for Active Directory.
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

impl TokenResponse {
    fn expires_in(&self) -> Option<Duration> {
        let seconds = match self.expires_in.as_ref()? {
            serde_json::Value::Number(number) => number.as_u64()?,
            serde_json::Value::String(text) => text.parse().ok()?,
            _ => return None,
        };
        Some(Duration::from_secs(seconds))
    }
}

/// Fetches tokens from the authority's token endpoint and caches them until shortly before
/// they expire.
#[derive(Default)]
pub struct ClientCredentialsTokenSource {
    client: reqwest::Client,
    cache: Mutex<HashMap<CacheKey, CachedToken>>,
}

impl ClientCredentialsTokenSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn cached(&self, key: &CacheKey) -> Option<String> {
        let cache = self.cache.lock();
        cache
            .get(key)
            .filter(|cached| cached.refresh_at > Instant::now())
            .map(|cached| cached.token.clone())
    }

    async fn fetch(&self, request: &TokenRequest) -> Result<TokenResponse, TokenError> {
        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", request.client_id.as_str()),
            ("client_secret", request.client_secret.as_str()),
        ];
        match request.auth_type.as_str() {
            OAUTH2_CLIENT_CREDENTIALS => {
                if !request.scope.is_empty() {
                    form.push(("scope", request.scope.as_str()));
                }
            }
            ACTIVE_DIRECTORY_CLIENT_CREDENTIALS => form.push(("resource", request.scope.as_str())),
            other => return Err(TokenError::UnsupportedAuthType(other.to_string())),
        }

        let response = self
            .client
            .post(&request.authority)
            .form(&form)
            .send()
            .await
            .map_err(|err| TokenError::Request {
                authority: request.authority.clone(),
                reason: err.to_string(),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(TokenError::Status {
                authority: request.authority.clone(),
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        response
            .json::<TokenResponse>()
            .await
            .map_err(|err| TokenError::Malformed {
                authority: request.authority.clone(),
                reason: err.to_string(),
            })
    }
}

#[async_trait]
impl TokenSource for ClientCredentialsTokenSource {
    async fn token(&self, request: &TokenRequest) -> Result<String, TokenError> {
        let key = CacheKey::from(request);
        if let Some(token) = self.cached(&key) {
            return Ok(token);
        }

        let response = self.fetch(request).await?;
        tracing::debug!(authority = %request.authority, client_id = %request.client_id, "fetched access token");
        if let Some(expires_in) = response.expires_in() {
            self.cache.lock().insert(
                key,
                CachedToken {
                    token: response.access_token.clone(),
                    refresh_at: Instant::now() + expires_in.saturating_sub(EXPIRY_MARGIN),
                },
            );
        }
        Ok(response.access_token)
    }
}

/// Authentications by auth type then authority.
pub struct AuthMap {
    by_type: HashMap<String, HashMap<String, Arc<dyn UpstreamAuthentication>>>,
    forward: Arc<dyn UpstreamAuthentication>,
}

impl AuthMap {
    pub fn new(credentials: &[UpstreamAuthCredentials], tokens: Arc<dyn TokenSource>) -> Self {
        let mut by_type: HashMap<String, HashMap<String, Arc<dyn UpstreamAuthentication>>> =
            HashMap::new();
        for credential in credentials {
            if !matches!(
                credential.auth_type.as_str(),
                OAUTH2_CLIENT_CREDENTIALS | ACTIVE_DIRECTORY_CLIENT_CREDENTIALS
            ) {
                tracing::warn!(
                    auth_type = %credential.auth_type,
                    authority = %credential.authority,
                    "ignoring credentials of unsupported auth type"
                );
                continue;
            }
            by_type
                .entry(credential.auth_type.clone())
                .or_default()
                .insert(
                    credential.authority.clone(),
                    Arc::new(ClientCredentials::new(credential.clone(), tokens.clone())),
                );
        }
        Self {
            by_type,
            forward: Arc::new(ForwardHeader),
        }
    }

    /// The authentication for `authority`. Forwarding the inbound header needs no credentials.
    pub fn get(&self, auth_type: &str, authority: &str) -> Option<Arc<dyn UpstreamAuthentication>> {
        if auth_type == FORWARD_HEADER_AUTH {
            return Some(self.forward.clone());
        }
        self.by_type.get(auth_type)?.get(authority).cloned()
    }
}
