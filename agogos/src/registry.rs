//! Client of the configuration registry.
//!
//! The registry answers a `GET` with a response that never ends, writing one JSON
//! [`ConfigurationSnapshot`] per line whenever the configuration changes. When the response
//! ends or fails the client waits and subscribes again, forever.
use std::io;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use futures::prelude::*;
use futures::stream::BoxStream;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tokio_util::codec::LinesCodec;
use tokio_util::io::StreamReader;
use url::Url;

use crate::configuration::ConfigurationSnapshot;

pub(crate) const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(10);
const MAX_MESSAGE_LENGTH: usize = 16 * 1024 * 1024;

static SUBSCRIPTION_ERRORS: AtomicU64 = AtomicU64::new(0);

/// Number of registry subscriptions that ended or failed since the process started.
pub fn subscription_errors() -> u64 {
    SUBSCRIPTION_ERRORS.load(Ordering::Relaxed)
}

fn subscription_failed(url: &Url, reason: &str) {
    let errors = SUBSCRIPTION_ERRORS.fetch_add(1, Ordering::Relaxed) + 1;
    tracing::warn!(registry = %url, errors, "registry subscription ended: {}", reason);
}

pub(crate) fn subscribe(
    url: Url,
    reconnect_delay: Duration,
) -> impl Stream<Item = ConfigurationSnapshot> + Send {
    let client = reqwest::Client::new();
    stream::iter(0u64..)
        .then(move |attempt| {
            let client = client.clone();
            let url = url.clone();
            async move {
                if attempt > 0 {
                    tokio::time::sleep(reconnect_delay).await;
                }
                connect(client, url).await
            }
        })
        .flatten()
}

async fn connect(client: reqwest::Client, url: Url) -> BoxStream<'static, ConfigurationSnapshot> {
    tracing::info!(registry = %url, "connecting to registry");
    let response = match client.get(url.clone()).send().await {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            subscription_failed(&url, &format!("status {}", response.status()));
            return stream::empty().boxed();
        }
        Err(err) => {
            subscription_failed(&url, &err.to_string());
            return stream::empty().boxed();
        }
    };
    tracing::info!(registry = %url, "subscribed to registry");

    let reader = StreamReader::new(response.bytes_stream().map_err(io::Error::other));
    let end_url = url.clone();
    snapshots(url, reader, MAX_MESSAGE_LENGTH)
        .chain(
            stream::once(async move {
                subscription_failed(&end_url, "connection closed");
            })
            .filter_map(|_| future::ready(None)),
        )
        .boxed()
}

/// Reads one snapshot per line of `reader` until it ends or a line cannot be read.
///
/// Lines longer than `max_length` end the subscription. Blank lines and lines that are not
/// a snapshot are skipped.
fn snapshots<R>(
    url: Url,
    reader: R,
    max_length: usize,
) -> impl Stream<Item = ConfigurationSnapshot> + Send
where
    R: AsyncRead + Send,
{
    let error_url = url.clone();
    FramedRead::new(reader, LinesCodec::new_with_max_length(max_length))
        .take_while(move |line| {
            if let Err(err) = line {
                tracing::error!(registry = %error_url, "could not read registry message: {}", err);
            }
            future::ready(line.is_ok())
        })
        .filter_map(move |line| {
            future::ready(match line.as_deref().map(str::trim) {
                Ok("") | Err(_) => None,
                Ok(line) => match serde_json::from_str::<ConfigurationSnapshot>(line) {
                    Ok(snapshot) => Some(snapshot),
                    Err(err) => {
                        tracing::error!(registry = %url, "invalid configuration message: {}", err);
                        None
                    }
                },
            })
        })
}
