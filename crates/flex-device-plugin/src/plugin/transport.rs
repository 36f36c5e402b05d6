use std::io;
use std::path::Path;
use std::time::Duration;

use error_stack::Report;
use error_stack::ResultExt;
use hyper_util::rt::TokioIo;
use tokio::net::UnixListener;
use tokio::net::UnixStream;
use tonic::transport::Channel;
use tonic::transport::Endpoint;
use tonic::transport::Uri;
use tower::service_fn;
use tracing::debug;
use tracing::warn;

use super::PluginError;

/// Create a gRPC channel over a unix domain socket, bounded by `timeout`.
pub async fn connect_uds(
    socket_path: &Path,
    timeout: Duration,
) -> Result<Channel, Report<PluginError>> {
    let dial_error = || PluginError::Dial {
        path: socket_path.display().to_string(),
    };
    let path = socket_path.to_path_buf();

    // The URI is a placeholder, the connector always dials the socket
    let endpoint = Endpoint::from_static("http://[::]:50051")
        .connect_timeout(timeout)
        .timeout(timeout);
    let connect = endpoint.connect_with_connector(service_fn(move |_: Uri| {
        let path = path.clone();
        async move {
            let stream = UnixStream::connect(path).await?;
            Ok::<_, io::Error>(TokioIo::new(stream))
        }
    }));

    tokio::time::timeout(timeout, connect)
        .await
        .change_context_lazy(dial_error)
        .attach_printable_lazy(|| format!("timed out after {timeout:?}"))?
        .change_context_lazy(dial_error)
}

/// Bind a listener at `socket_path`, replacing any stale socket file.
pub(crate) fn bind_listener(socket_path: &Path) -> Result<UnixListener, Report<PluginError>> {
    match std::fs::remove_file(socket_path) {
        Ok(()) => debug!("removed stale socket {}", socket_path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("failed to remove stale socket {}: {e}", socket_path.display()),
    }

    UnixListener::bind(socket_path).change_context_lazy(|| PluginError::Bind {
        path: socket_path.display().to_string(),
    })
}

/// Remove a socket file. A missing file is not an error.
pub(crate) fn remove_socket(socket_path: &Path) -> Result<(), Report<PluginError>> {
    match std::fs::remove_file(socket_path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Report::new(e).change_context(PluginError::Cleanup {
            path: socket_path.display().to_string(),
        })),
    }
}
