use std::path::Path;
use std::time::Duration;

use futures::channel::mpsc;
use futures::prelude::*;
use notify::RecursiveMode;
use notify::Watcher;

/// Creates a stream of events whenever the file at the path changes. The first event is sent
/// right away so that consumers read the file once. The stream never terminates and must be
/// dropped to finish watching.
///
/// When the file cannot be watched the error is logged and only the first event is sent.
pub(crate) fn watch(path: &Path) -> impl Stream<Item = ()> + use<> {
    let (mut watch_sender, watch_receiver) = mpsc::channel(1);
    let watcher =
        notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| match res {
            Ok(event) => {
                // Only modifications matter. A slow consumer must not make us lose one, so a
                // full channel is retried after a short wait.
                if let notify::event::EventKind::Modify(_) = event.kind {
                    loop {
                        match watch_sender.try_send(()) {
                            Ok(_) => break,
                            Err(err) if err.is_full() => {
                                tracing::warn!(
                                    "could not process file watch notification. {}",
                                    err.to_string()
                                );
                                std::thread::sleep(Duration::from_millis(50));
                            }
                            Err(err) => {
                                tracing::error!("file watch channel closed: {}", err);
                                break;
                            }
                        }
                    }
                }
            }
            Err(err) => tracing::error!("file watch error: {}", err),
        });

    let watcher = match watcher {
        Ok(mut watcher) => match watcher.watch(path, RecursiveMode::NonRecursive) {
            Ok(()) => Some(watcher),
            Err(err) => {
                tracing::error!(path = %path.display(), "could not watch file: {}", err);
                None
            }
        },
        Err(err) => {
            tracing::error!(path = %path.display(), "could not create file watcher: {}", err);
            None
        }
    };

    match watcher {
        Some(watcher) => stream::once(future::ready(()))
            .chain(watch_receiver)
            .chain(stream::once(async move {
                // Owning the watcher here keeps it alive for as long as the stream is.
                drop(watcher);
            }))
            .boxed(),
        None => stream::once(future::ready(())).boxed(),
    }
}
