//! Kubelet device plugin server.
//!
//! One [`DevicePluginInstance`] is run per advertised resource kind. Each instance
//! owns a unix socket under the kubelet plugin directory, serves the
//! `v1beta1.DevicePlugin` gRPC service on it and registers itself with the kubelet.
//!
//! The main components are:
//! - [`DevicePluginInstance`]: lifecycle (start, serve, register, stop)
//! - [`DevicePluginService`]: the gRPC handlers
//! - [`RestartPolicy`]: crash-loop containment of the serving loop

use core::error::Error;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use crate::device::Device;
use crate::device::DeviceCatalogs;

pub mod registration;
pub mod restart;
pub mod server;
pub mod service;
pub mod transport;

pub use registration::register_with_kubelet;
pub use registration::API_VERSION;
pub use restart::RestartDecision;
pub use restart::RestartPolicy;
pub use server::DevicePluginInstance;
pub use server::PluginState;
pub use service::DevicePluginService;

/// Default kubelet device plugin directory.
pub const DEVICE_PLUGIN_PATH: &str = "/var/lib/kubelet/device-plugins";
/// Name of the kubelet registration socket inside [`DEVICE_PLUGIN_PATH`].
pub const KUBELET_SOCKET_NAME: &str = "kubelet.sock";
/// Bound for every socket dial (readiness probe and registration).
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

pub const GPU_RESOURCE_NAME: &str = "nvidia.com/gpu";
pub const GPU_SOCKET_NAME: &str = "nvidia-gpu-monopoly.sock";
pub const MEMORY_RESOURCE_NAME: &str = "nvidia.flex.com/memory";
pub const MEMORY_SOCKET_NAME: &str = "flex-nvidia-gpu-memory.sock";

/// Errors that can occur while running a device plugin.
#[derive(Debug, derive_more::Display)]
pub enum PluginError {
    #[display("Failed to bind device plugin socket {path}")]
    Bind { path: String },
    #[display("Device plugin socket {path} did not become ready")]
    NotReady { path: String },
    #[display("Failed to connect to {path}")]
    Dial { path: String },
    #[display("Failed to register {resource_name} with kubelet")]
    Registration { resource_name: String },
    #[display("Failed to remove device plugin socket {path}")]
    Cleanup { path: String },
    #[display("Failed to watch {path}")]
    Watch { path: String },
}

impl Error for PluginError {}

/// Which device catalog a plugin instance advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Whole accelerators
    Accelerator,
    /// Fixed-size slices of accelerator memory
    MemorySlice,
}

impl ResourceKind {
    pub fn catalog<'a>(&self, catalogs: &'a DeviceCatalogs) -> &'a [Device] {
        match self {
            ResourceKind::Accelerator => &catalogs.accelerators,
            ResourceKind::MemorySlice => &catalogs.memory_slices,
        }
    }
}

/// Static configuration of one plugin instance.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    /// Resource name advertised to the kubelet (e.g. "nvidia.com/gpu")
    pub resource_name: String,
    /// Socket this plugin serves on
    pub socket_path: PathBuf,
    /// Kubelet registration socket
    pub kubelet_socket: PathBuf,
    pub dial_timeout: Duration,
}

impl PluginConfig {
    pub fn new(
        resource_name: impl Into<String>,
        plugin_dir: &Path,
        socket_name: &str,
        kubelet_socket: impl Into<PathBuf>,
    ) -> Self {
        Self {
            resource_name: resource_name.into(),
            socket_path: plugin_dir.join(socket_name),
            kubelet_socket: kubelet_socket.into(),
            dial_timeout: DIAL_TIMEOUT,
        }
    }

    /// Socket basename, the endpoint the kubelet dials relative to its plugin directory.
    pub fn endpoint(&self) -> String {
        self.socket_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}
