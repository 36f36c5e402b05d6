//! Daemon wiring: inventory, enumeration, one plugin instance per resource kind,
//! kubelet restart handling and graceful shutdown.

use std::time::Duration;

use anyhow::Result;
use error_stack::Report;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::config::DaemonArgs;
use crate::config::InventoryArgs;
use crate::device::DeviceCatalogs;
use crate::device::InventoryError;
use crate::plugin::DevicePluginInstance;
use crate::plugin::PluginError;
use crate::plugin::PluginState;

/// How often plugins that failed to start or register are retried.
pub const START_RETRY_INTERVAL: Duration = Duration::from_secs(10);

pub mod kubelet_watcher;

pub use kubelet_watcher::watch_kubelet_socket;

/// Read the inventory once and derive both device catalogs.
pub fn load_catalogs(args: &InventoryArgs) -> Result<DeviceCatalogs, Report<InventoryError>> {
    let enumerator = args.enumerator()?;
    let units = args.inventory()?.accelerators()?;
    Ok(enumerator.enumerate(&units))
}

pub struct Application {
    daemon_args: DaemonArgs,
    plugins: Vec<DevicePluginInstance>,
}

impl Application {
    pub fn new(daemon_args: DaemonArgs, catalogs: &DeviceCatalogs) -> Self {
        let plugins = daemon_args
            .resource_kinds()
            .into_iter()
            .map(|kind| {
                DevicePluginInstance::new(
                    daemon_args.plugin_config(kind),
                    kind.catalog(catalogs).to_vec(),
                )
            })
            .collect();

        Self {
            daemon_args,
            plugins,
        }
    }

    pub fn plugins(&self) -> &[DevicePluginInstance] {
        &self.plugins
    }

    /// Start every plugin. A failing plugin does not keep the others from
    /// starting; all failures are returned together.
    pub async fn start_all(&mut self) -> Result<(), Report<PluginError>> {
        start_each(self.plugins.iter_mut()).await
    }

    /// Start the plugins that are not registered with the kubelet.
    pub async fn start_pending(&mut self) -> Result<(), Report<PluginError>> {
        start_each(
            self.plugins
                .iter_mut()
                .filter(|plugin| plugin.state() != PluginState::Registered),
        )
        .await
    }

    pub fn all_registered(&self) -> bool {
        self.plugins
            .iter()
            .all(|plugin| plugin.state() == PluginState::Registered)
    }

    pub async fn stop_all(&mut self) {
        for plugin in &mut self.plugins {
            if let Err(e) = plugin.stop().await {
                error!(
                    "Failed to stop device plugin '{}': {e:?}",
                    plugin.resource_name()
                );
            }
        }
    }

    /// Run until SIGTERM/SIGINT, restarting the plugins whenever the kubelet restarts.
    pub async fn run(&mut self) -> Result<()> {
        let (restart_tx, mut restart_rx) = mpsc::channel(1);
        let _watcher = if self.daemon_args.watch_kubelet {
            Some(
                watch_kubelet_socket(&self.daemon_args.kubelet_socket(), restart_tx)
                    .map_err(|e| anyhow::anyhow!("{e:?}"))?,
            )
        } else {
            None
        };

        if let Err(e) = self.start_all().await {
            if !self.daemon_args.watch_kubelet {
                self.stop_all().await;
                return Err(anyhow::anyhow!("{e:?}"));
            }
            warn!("Failed to start device plugins, waiting for kubelet: {e:?}");
        }

        let shutdown = shutdown_signal()?;
        tokio::pin!(shutdown);

        let mut retry = tokio::time::interval(START_RETRY_INTERVAL);
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);
        retry.reset();

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = retry.tick(), if !self.all_registered() => {
                    debug!("retrying device plugins that are not registered");
                    if let Err(e) = self.start_pending().await {
                        warn!("Device plugins still not registered: {e:?}");
                    }
                }
                Some(()) = restart_rx.recv() => {
                    info!("kubelet restarted, restarting device plugins");
                    if let Err(e) = self.start_all().await {
                        error!("Failed to restart device plugins: {e:?}");
                    }
                }
            }
        }

        info!("Shutting down device plugins");
        self.stop_all().await;
        Ok(())
    }
}

async fn start_each<'a>(
    plugins: impl Iterator<Item = &'a mut DevicePluginInstance>,
) -> Result<(), Report<PluginError>> {
    let mut failures: Option<Report<PluginError>> = None;
    for plugin in plugins {
        if let Err(e) = plugin.start().await {
            warn!("Device plugin '{}' failed to start", plugin.resource_name());
            match failures.as_mut() {
                Some(report) => report.extend_one(e),
                None => failures = Some(e),
            }
        }
    }
    failures.map_or(Ok(()), Err)
}

fn shutdown_signal() -> Result<impl std::future::Future<Output = ()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    Ok(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, initiating graceful shutdown");
            }
        }
    })
}
