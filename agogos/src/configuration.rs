//! Configuration snapshots and the sources they come from.
//!
//! A snapshot carries everything a schema is compiled from: the annotated SDL, the upstream
//! services and the credentials used to authenticate against them. Each snapshot replaces the
//! previous one entirely.
use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use derivative::Derivative;
use derive_more::Display;
use futures::prelude::*;
use schemars::JsonSchema;
use schemars::schema::RootSchema;
use serde::Deserialize;
use serde::Serialize;
use url::Url;

use crate::error::ConfigurationError;

/// Auth type that forwards the inbound `Authorization` header instead of fetching a token.
pub const FORWARD_HEADER_AUTH: &str = "forward-header";

/// Everything a schema is compiled from.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationSnapshot {
    /// The annotated schema.
    pub schema: SchemaDefinition,

    /// Services reached by `@rest` and `@gql`, matched by host.
    #[serde(default)]
    pub upstreams: Vec<UpstreamConfig>,

    /// Client credentials for the authorities referenced by upstreams.
    #[serde(default)]
    pub upstream_auth_credentials: Vec<UpstreamAuthCredentials>,
}

#[buildstructor::buildstructor]
impl ConfigurationSnapshot {
    #[builder(visibility = "pub")]
    fn new(
        definition: String,
        upstreams: Vec<UpstreamConfig>,
        upstream_auth_credentials: Vec<UpstreamAuthCredentials>,
    ) -> Self {
        Self {
            schema: SchemaDefinition { definition },
            upstreams,
            upstream_auth_credentials,
        }
    }

    /// The JSON schema of a snapshot.
    pub fn json_schema() -> RootSchema {
        schemars::schema_for!(ConfigurationSnapshot)
    }
}

impl FromStr for ConfigurationSnapshot {
    type Err = ConfigurationError;

    /// Parses a YAML or JSON snapshot.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_yaml::from_str(s).map_err(|err| ConfigurationError::InvalidConfiguration(err.to_string()))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct SchemaDefinition {
    /// SDL text annotated with directives.
    pub definition: String,
}

/// An upstream service.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamConfig {
    /// Host, with the port when it is not the default one, as found in directive URLs.
    pub host: String,

    /// Headers added to every request sent to the upstream.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub auth: Option<UpstreamAuth>,
}

/// How requests to an upstream are authenticated.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamAuth {
    /// `oauth2/client_credentials`, `activedirectory/client_credentials` or `forward-header`.
    pub auth_type: String,

    /// Token endpoint, matched against [`UpstreamAuthCredentials::authority`].
    #[serde(default)]
    pub authority: String,

    /// Scope, or resource for Active Directory, requested with the token.
    #[serde(default)]
    pub scope: String,
}

#[derive(Clone, Derivative, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[derivative(Debug)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamAuthCredentials {
    pub auth_type: String,
    pub authority: String,
    pub client_id: String,
    #[derivative(Debug = "ignore")]
    pub client_secret: String,
}

type ConfigurationStream = Pin<Box<dyn Stream<Item = ConfigurationSnapshot> + Send>>;

/// Where configuration snapshots come from.
#[derive(Display, Derivative)]
#[derivative(Debug)]
#[non_exhaustive]
pub enum ConfigurationSource {
    /// A single snapshot.
    #[display("Static")]
    Static(Box<ConfigurationSnapshot>),

    /// A stream of snapshots, each applied as it arrives.
    #[display("Stream")]
    Stream(#[derivative(Debug = "ignore")] ConfigurationStream),

    /// A YAML or JSON file that may be watched for changes.
    #[display("File")]
    File {
        /// The path of the configuration file.
        path: PathBuf,

        /// `true` to watch the file for changes and hot apply them.
        watch: bool,
    },

    /// A registry pushing newline-delimited JSON snapshots over a long-lived HTTP response.
    #[display("Registry")]
    Registry {
        url: Url,

        /// Delay before reconnecting once the subscription ends.
        reconnect_delay: Duration,
    },
}

impl From<ConfigurationSnapshot> for ConfigurationSource {
    fn from(snapshot: ConfigurationSnapshot) -> Self {
        ConfigurationSource::Static(Box::new(snapshot))
    }
}

impl ConfigurationSource {
    /// Converts the source into a stream of snapshots, whether it is static or not.
    pub fn into_stream(self) -> impl Stream<Item = ConfigurationSnapshot> + Send {
        match self {
            ConfigurationSource::Static(snapshot) => stream::once(future::ready(*snapshot)).boxed(),
            ConfigurationSource::Stream(stream) => stream,
            ConfigurationSource::File { path, watch } => {
                if !path.exists() {
                    tracing::error!(
                        "configuration file at path '{}' does not exist.",
                        path.to_string_lossy()
                    );
                    stream::empty().boxed()
                } else if watch {
                    crate::files::watch(&path)
                        .filter_map(move |_| {
                            let path = path.clone();
                            async move {
                                match ConfigurationSource::read_config(&path).await {
                                    Ok(snapshot) => Some(snapshot),
                                    Err(err) => {
                                        tracing::error!("{}", err);
                                        None
                                    }
                                }
                            }
                        })
                        .boxed()
                } else {
                    stream::once(async move { ConfigurationSource::read_config(&path).await })
                        .filter_map(|result| {
                            future::ready(match result {
                                Ok(snapshot) => Some(snapshot),
                                Err(err) => {
                                    tracing::error!("failed to read configuration: {}", err);
                                    None
                                }
                            })
                        })
                        .boxed()
                }
            }
            ConfigurationSource::Registry {
                url,
                reconnect_delay,
            } => crate::registry::subscribe(url, reconnect_delay).boxed(),
        }
    }

    async fn read_config(path: &Path) -> Result<ConfigurationSnapshot, ConfigurationError> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|err| {
            ConfigurationError::CannotRead {
                path: path.to_string_lossy().to_string(),
                error: err.to_string(),
            }
        })?;
        contents.parse()
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;
    use pretty_assertions::assert_eq;
    use test_log::test;

    use super::*;
    use crate::files::tests::write_and_flush;

    const SNAPSHOT: &str = r#"
schema:
  definition: "type Query { hello: String @stub(value: \"world\") }"
upstreams:
  - host: api.example.com
    headers:
      x-api-key: secret
    auth:
      authType: oauth2/client_credentials
      authority: https://login.example.com/token
      scope: api
upstreamAuthCredentials:
  - authType: oauth2/client_credentials
    authority: https://login.example.com/token
    clientId: gateway
    clientSecret: shhh
"#;

    #[test]
    fn snapshot_from_yaml() {
        let snapshot: ConfigurationSnapshot = SNAPSHOT.parse().unwrap();
        assert_eq!(
            snapshot.schema.definition,
            r#"type Query { hello: String @stub(value: "world") }"#
        );
        assert_eq!(snapshot.upstreams[0].host, "api.example.com");
        assert_eq!(
            snapshot.upstreams[0].auth.as_ref().map(|auth| auth.scope.as_str()),
            Some("api")
        );
        assert_eq!(snapshot.upstream_auth_credentials[0].client_id, "gateway");
        assert!(!format!("{:?}", snapshot).contains("shhh"));
    }

    #[test]
    fn snapshot_from_json() {
        let snapshot: ConfigurationSnapshot =
            r#"{"schema": {"definition": "type Query { a: Int }"}}"#.parse().unwrap();
        assert_eq!(
            snapshot,
            ConfigurationSnapshot::builder()
                .definition("type Query { a: Int }")
                .build()
        );
    }

    #[test]
    fn invalid_snapshot() {
        assert!(matches!(
            "schema: [".parse::<ConfigurationSnapshot>(),
            Err(ConfigurationError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn json_schema_names_snapshot_fields() {
        let schema = serde_json::to_value(ConfigurationSnapshot::json_schema()).unwrap();
        let properties = schema["properties"].as_object().unwrap();
        assert!(properties.contains_key("schema"));
        assert!(properties.contains_key("upstreamAuthCredentials"));
    }

    #[test(tokio::test)]
    async fn static_source_yields_once() {
        let snapshot = ConfigurationSnapshot::builder()
            .definition("type Query { a: Int }")
            .build();
        let snapshots: Vec<_> = ConfigurationSource::from(snapshot.clone())
            .into_stream()
            .collect()
            .await;
        assert_eq!(snapshots, vec![snapshot]);
    }

    #[test(tokio::test)]
    async fn missing_file_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots: Vec<_> = ConfigurationSource::File {
            path: dir.path().join("missing.yaml"),
            watch: false,
        }
        .into_stream()
        .collect()
        .await;
        assert!(snapshots.is_empty());
    }

    #[test(tokio::test(flavor = "multi_thread"))]
    async fn config_by_file_watching() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut handle = file.reopen().unwrap();
        write_and_flush(&mut handle, SNAPSHOT).await;
        let mut stream = ConfigurationSource::File {
            path: file.path().to_path_buf(),
            watch: true,
        }
        .into_stream()
        .boxed();

        // The first read is guaranteed.
        assert_eq!(stream.next().await.unwrap().upstreams.len(), 1);

        write_and_flush(
            &mut handle,
            r#"{"schema": {"definition": "type Query { b: Int }"}}"#,
        )
        .await;
        assert!(stream.next().await.unwrap().upstreams.is_empty());

        // Garbage is logged and skipped.
        write_and_flush(&mut handle, "schema: [").await;
        assert!(stream.next().now_or_never().is_none());
    }
}
