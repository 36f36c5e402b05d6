use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use error_stack::Report;
use error_stack::ResultExt;
use tokio::net::UnixListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnixListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::registration::register_with_kubelet;
use super::restart::RestartDecision;
use super::restart::RestartPolicy;
use super::service::DevicePluginService;
use super::transport::bind_listener;
use super::transport::connect_uds;
use super::transport::remove_socket;
use super::PluginConfig;
use super::PluginError;
use crate::api::device_plugin_server::DevicePluginServer;
use crate::device::Device;

/// How long `stop` waits for the serving loop before aborting it.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    Uninitialized,
    Initializing,
    Serving,
    Registered,
    Stopped,
}

/// A device plugin for one resource kind.
///
/// At most one serving loop runs per instance. `start` tears down whatever a
/// previous start left behind before creating a fresh loop and stop signal.
#[derive(Debug)]
pub struct DevicePluginInstance {
    config: PluginConfig,
    catalog: Arc<[Device]>,
    state: PluginState,
    server: Option<JoinHandle<()>>,
    stop_signal: Option<CancellationToken>,
}

impl DevicePluginInstance {
    pub fn new(config: PluginConfig, catalog: Vec<Device>) -> Self {
        Self {
            config,
            catalog: catalog.into(),
            state: PluginState::Uninitialized,
            server: None,
            stop_signal: None,
        }
    }

    pub fn state(&self) -> PluginState {
        self.state
    }

    pub fn resource_name(&self) -> &str {
        &self.config.resource_name
    }

    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    pub fn catalog(&self) -> &[Device] {
        &self.catalog
    }

    /// Serve the gRPC service and register with the kubelet.
    ///
    /// Failures are returned as-is, with the instance torn down. Retrying is up
    /// to the caller.
    pub async fn start(&mut self) -> Result<(), Report<PluginError>> {
        if self.server.is_some() {
            self.stop().await?;
        }
        self.initialize();

        if let Err(e) = self.serve().await {
            error!(
                "Could not start device plugin for '{}': {e:?}",
                self.config.resource_name
            );
            self.cleanup();
            return Err(e);
        }
        info!(
            "Starting to serve '{}' on {}",
            self.config.resource_name,
            self.config.socket_path.display()
        );

        if let Err(e) = self.register().await {
            error!("Could not register device plugin: {e:?}");
            if let Err(stop_err) = self.stop().await {
                warn!("Failed to stop unregistered device plugin: {stop_err:?}");
            }
            return Err(e);
        }
        info!(
            "Registered device plugin for '{}' with Kubelet",
            self.config.resource_name
        );
        self.state = PluginState::Registered;

        Ok(())
    }

    /// Bind the socket, launch the serving loop and wait until the socket accepts connections.
    ///
    /// A serving loop left by an earlier call is stopped first.
    pub async fn serve(&mut self) -> Result<(), Report<PluginError>> {
        if self.server.is_some() {
            self.stop().await?;
        }
        let stop = self
            .stop_signal
            .get_or_insert_with(CancellationToken::new)
            .clone();
        let listener = bind_listener(&self.config.socket_path)?;

        let serving_loop = ServingLoop {
            resource_name: self.config.resource_name.clone(),
            socket_path: self.config.socket_path.clone(),
            service: DevicePluginService::new(
                &self.config.resource_name,
                self.catalog.clone(),
                stop.clone(),
            ),
            stop,
        };
        self.server = Some(tokio::spawn(serving_loop.run(listener)));
        self.state = PluginState::Serving;

        // Wait for the server to come up with a blocking connection
        let channel = connect_uds(&self.config.socket_path, self.config.dial_timeout)
            .await
            .change_context_lazy(|| PluginError::NotReady {
                path: self.config.socket_path.display().to_string(),
            })?;
        drop(channel);

        Ok(())
    }

    /// Announce this plugin to the kubelet.
    pub async fn register(&self) -> Result<(), Report<PluginError>> {
        register_with_kubelet(&self.config).await
    }

    /// Stop serving and remove the socket. A no-op when nothing is running.
    pub async fn stop(&mut self) -> Result<(), Report<PluginError>> {
        let Some(mut server) = self.server.take() else {
            self.stop_signal = None;
            return Ok(());
        };
        info!(
            "Stopping to serve '{}' on {}",
            self.config.resource_name,
            self.config.socket_path.display()
        );

        if let Some(stop) = self.stop_signal.take() {
            stop.cancel();
        }
        if tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, &mut server)
            .await
            .is_err()
        {
            warn!(
                "gRPC server for '{}' did not shut down in {:?}, aborting",
                self.config.resource_name, SHUTDOWN_GRACE_PERIOD
            );
            server.abort();
        }
        self.state = PluginState::Stopped;

        remove_socket(&self.config.socket_path)
    }

    fn initialize(&mut self) {
        self.stop_signal = Some(CancellationToken::new());
        self.state = PluginState::Initializing;
    }

    fn cleanup(&mut self) {
        if let Some(stop) = self.stop_signal.take() {
            stop.cancel();
        }
        if let Some(server) = self.server.take() {
            server.abort();
        }
        self.state = PluginState::Stopped;

        if let Err(e) = remove_socket(&self.config.socket_path) {
            warn!("Failed to clean up after failed start: {e:?}");
        }
    }
}

/// The concurrent part of a plugin: runs the gRPC server until the stop signal,
/// restarting it after crashes.
struct ServingLoop {
    resource_name: String,
    socket_path: PathBuf,
    service: DevicePluginService,
    stop: CancellationToken,
}

impl ServingLoop {
    async fn run(self, listener: UnixListener) {
        let mut restarts = RestartPolicy::new(Instant::now());
        let mut listener = Some(listener);

        loop {
            let incoming = match listener.take() {
                Some(listener) => listener,
                None => match bind_listener(&self.socket_path) {
                    Ok(listener) => listener,
                    Err(e) => {
                        error!("Failed to rebind socket for '{}': {e:?}", self.resource_name);
                        self.on_crash(&mut restarts);
                        continue;
                    }
                },
            };

            info!("Starting gRPC server for '{}'", self.resource_name);
            let stop = self.stop.clone();
            let resource_name = self.resource_name.clone();
            let result = Server::builder()
                .add_service(DevicePluginServer::new(self.service.clone()))
                .serve_with_incoming_shutdown(UnixListenerStream::new(incoming), async move {
                    stop.cancelled().await;
                    info!("shutting down gRPC server for '{}'", resource_name);
                })
                .await;

            match result {
                Ok(()) => break,
                Err(e) if self.stop.is_cancelled() => {
                    warn!(
                        "gRPC server for '{}' exited with error during shutdown: {e}",
                        self.resource_name
                    );
                    break;
                }
                Err(e) => {
                    error!(
                        "gRPC server for '{}' crashed with error: {e}",
                        self.resource_name
                    );
                    self.on_crash(&mut restarts);
                }
            }
        }

        info!("gRPC server for '{}' stopped", self.resource_name);
    }

    /// Terminates the process when the restart budget is exhausted.
    fn on_crash(&self, restarts: &mut RestartPolicy) {
        match restarts.record_crash(Instant::now()) {
            RestartDecision::Restart { count } => {
                warn!(
                    restart_count = count,
                    "restarting gRPC server for '{}'", self.resource_name
                );
            }
            RestartDecision::GiveUp { count } => {
                error!(
                    restart_count = count,
                    "gRPC server for '{}' has repeatedly crashed recently. Quitting",
                    self.resource_name
                );
                std::process::exit(1);
            }
        }
    }
}
