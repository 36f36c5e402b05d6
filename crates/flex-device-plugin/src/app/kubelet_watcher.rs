use std::path::Path;
use std::path::PathBuf;

use error_stack::Report;
use error_stack::ResultExt;
use notify::Config;
use notify::Event;
use notify::EventKind;
use notify::RecommendedWatcher;
use notify::RecursiveMode;
use notify::Watcher;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::error;
use tracing::info;

use crate::plugin::PluginError;

/// Watch the plugin directory and send a notification whenever the kubelet
/// (re)creates its registration socket.
///
/// A restarted kubelet wipes the plugin directory, so every plugin has to serve
/// and register again. The returned watcher must be kept alive.
pub fn watch_kubelet_socket(
    kubelet_socket: &Path,
    restarts: mpsc::Sender<()>,
) -> Result<RecommendedWatcher, Report<PluginError>> {
    let watch_error = || PluginError::Watch {
        path: kubelet_socket.display().to_string(),
    };
    let dir = kubelet_socket
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let socket = kubelet_socket.to_path_buf();

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                debug!("Filesystem event: {:?}", event);
                if matches!(event.kind, EventKind::Create(_)) && event.paths.contains(&socket) {
                    info!("kubelet socket {} created", socket.display());
                    // a pending notification already covers this one
                    let _ = restarts.try_send(());
                }
            }
            Err(e) => {
                error!("Filesystem watch error: {:?}", e);
            }
        },
        Config::default(),
    )
    .change_context_lazy(watch_error)?;

    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .change_context_lazy(watch_error)
        .attach_printable_lazy(|| format!("watching {}", dir.display()))?;
    info!("watching {} for kubelet restarts", dir.display());

    Ok(watcher)
}
