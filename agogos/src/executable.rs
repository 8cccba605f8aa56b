//! Main entry point for CLI command to start the gateway.
use std::io::IsTerminal;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use anyhow::anyhow;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::configuration::ConfigurationSnapshot;
use crate::configuration::ConfigurationSource;
use crate::process::SchemaHandle;
use crate::process::process;
use crate::process::serve_schemas;
use crate::registry::DEFAULT_RECONNECT_DELAY;
use crate::server;
use crate::value::FieldValue;

/// Options for the gateway
#[derive(Parser, Debug)]
#[clap(name = "agogos", about = "Dynamic GraphQL gateway", version)]
pub(crate) struct Opt {
    /// Log level (off|error|warn|info|debug|trace).
    #[clap(
        long = "log",
        default_value = "info",
        alias = "log-level",
        env = "AGOGOS_LOG"
    )]
    log_level: String,

    /// Reload the configuration file automatically.
    #[clap(alias = "hr", long = "hot-reload", env = "AGOGOS_HOT_RELOAD")]
    hot_reload: bool,

    /// Configuration file location relative to the current directory.
    #[clap(short, long = "config", env = "AGOGOS_CONFIG_PATH")]
    config_path: Option<PathBuf>,

    /// Registry pushing configuration snapshots, used when no configuration file is given.
    #[clap(long, env = "REGISTRY_URL")]
    registry_url: Option<Url>,

    /// Delay before reconnecting to the registry [default: 10s].
    #[clap(long, value_parser = humantime::parse_duration, env = "REGISTRY_RECONNECT_DELAY")]
    registry_reconnect_delay: Option<Duration>,

    /// Address the GraphQL endpoint listens on.
    #[clap(long, default_value = "0.0.0.0:8011", env = "AGOGOS_LISTEN")]
    listen: SocketAddr,

    /// Prints the JSON schema of configuration snapshots.
    #[clap(long)]
    schema: bool,
}

impl Opt {
    fn configuration_source(&self) -> Result<ConfigurationSource> {
        if let Some(path) = &self.config_path {
            let path = if path.is_relative() {
                std::env::current_dir()?.join(path)
            } else {
                path.clone()
            };
            return Ok(ConfigurationSource::File {
                path,
                watch: self.hot_reload,
            });
        }
        match &self.registry_url {
            Some(url) => Ok(ConfigurationSource::Registry {
                url: url.clone(),
                reconnect_delay: self
                    .registry_reconnect_delay
                    .unwrap_or(DEFAULT_RECONNECT_DELAY),
            }),
            None => Err(anyhow!(
                "a configuration is required: pass '--config <file>' or set REGISTRY_URL"
            )),
        }
    }
}

/// This is the main gateway entrypoint.
pub fn main() -> Result<()> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(nb) = std::env::var("AGOGOS_NUM_CORES")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
    {
        builder.worker_threads(nb);
    }
    let runtime = builder.build()?;
    runtime.block_on(start())
}

async fn start() -> Result<()> {
    let opt = Opt::parse();

    if opt.schema {
        let schema = ConfigurationSnapshot::json_schema();
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    // LOG_LEVEL is kept for deployments predating AGOGOS_LOG.
    let log_level = match std::env::var("LOG_LEVEL") {
        Ok(level) if std::env::var_os("AGOGOS_LOG").is_none() => level,
        _ => opt.log_level.clone(),
    };
    let builder = tracing_subscriber::fmt::fmt().with_env_filter(
        EnvFilter::try_new(&log_level).context("could not parse log configuration")?,
    );
    let production = std::env::var("ENVIRONMENT").is_ok_and(|env| env == "production");
    if std::io::stdout().is_terminal() && !production {
        builder.init();
    } else {
        builder.json().init();
    }

    let source = opt.configuration_source()?;
    tracing::info!(source = %source, version = env!("CARGO_PKG_VERSION"), "starting agogos");

    let schemas = SchemaHandle::new();
    tokio::spawn(serve_schemas(process(source.into_stream()), schemas.clone()));
    server::serve(opt.listen, schemas, FieldValue::null())
        .await
        .context("GraphQL endpoint failed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_file_wins_over_registry() {
        let opt = Opt::parse_from([
            "agogos",
            "--config",
            "/etc/agogos.yaml",
            "--registry-url",
            "http://registry/subscribe",
            "--hot-reload",
        ]);
        match opt.configuration_source().unwrap() {
            ConfigurationSource::File { path, watch } => {
                assert_eq!(path, PathBuf::from("/etc/agogos.yaml"));
                assert!(watch);
            }
            other => panic!("unexpected source {other}"),
        }
    }

    #[test]
    fn registry_source_uses_the_reconnect_delay() {
        let opt = Opt::parse_from([
            "agogos",
            "--registry-url",
            "http://registry/subscribe",
            "--registry-reconnect-delay",
            "2s",
        ]);
        match opt.configuration_source().unwrap() {
            ConfigurationSource::Registry {
                url,
                reconnect_delay,
            } => {
                assert_eq!(url.as_str(), "http://registry/subscribe");
                assert_eq!(reconnect_delay, Duration::from_secs(2));
            }
            other => panic!("unexpected source {other}"),
        }
        assert_eq!(opt.listen, "0.0.0.0:8011".parse().unwrap());
    }

    #[test]
    fn registry_reconnect_delay_defaults_to_ten_seconds() {
        let opt = Opt::parse_from(["agogos", "--registry-url", "http://registry/subscribe"]);
        assert!(matches!(
            opt.configuration_source().unwrap(),
            ConfigurationSource::Registry { reconnect_delay, .. } if reconnect_delay == Duration::from_secs(10)
        ));
    }
}
