use std::path::PathBuf;

use clap::Args;
use clap::Parser;
use error_stack::Report;

use crate::device::DeviceEnumerator;
use crate::device::InventoryError;
use crate::device::InventoryProvider;
use crate::device::NvmlInventory;
use crate::device::StaticInventory;
use crate::device::DEFAULT_UNIT_PREFIX;
use crate::plugin::PluginConfig;
use crate::plugin::ResourceKind;
use crate::plugin::DEVICE_PLUGIN_PATH;
use crate::plugin::GPU_RESOURCE_NAME;
use crate::plugin::GPU_SOCKET_NAME;
use crate::plugin::KUBELET_SOCKET_NAME;
use crate::plugin::MEMORY_RESOURCE_NAME;
use crate::plugin::MEMORY_SOCKET_NAME;

const MIB: u64 = 1 << 20;

/// Where the accelerator inventory comes from and how it is sliced.
#[derive(Args, Clone, Debug)]
pub struct InventoryArgs {
    #[arg(
        long,
        env = "FLEX_MOCK_DEVICES",
        help = "Comma separated GPU memory sizes in MiB used instead of NVML, e.g. 16384,16384"
    )]
    pub mock_devices: Option<String>,

    #[arg(
        long,
        env = "FLEX_SLICE_SIZE_MIB",
        default_value_t = 1024,
        help = "Size of one memory slice in MiB"
    )]
    pub slice_size_mib: u64,
}

impl InventoryArgs {
    pub fn inventory(&self) -> Result<Box<dyn InventoryProvider>, Report<InventoryError>> {
        match &self.mock_devices {
            Some(list) => Ok(Box::new(StaticInventory::from_mib_list(list)?)),
            None => Ok(Box::new(NvmlInventory::init()?)),
        }
    }

    pub fn enumerator(&self) -> Result<DeviceEnumerator, Report<InventoryError>> {
        let slice_size = self
            .slice_size_mib
            .checked_mul(MIB)
            .ok_or_else(|| Report::new(InventoryError::InvalidSliceSize))?;
        DeviceEnumerator::new(DEFAULT_UNIT_PREFIX, slice_size)
    }
}

#[derive(Parser, Clone, Debug)]
pub struct DaemonArgs {
    #[command(flatten)]
    pub inventory: InventoryArgs,

    #[arg(
        long,
        env = "DEVICE_PLUGIN_DIR",
        value_hint = clap::ValueHint::DirPath,
        default_value = DEVICE_PLUGIN_PATH,
        help = "Kubelet device plugin directory"
    )]
    pub device_plugin_dir: PathBuf,

    #[arg(
        long,
        env = "KUBELET_SOCKET",
        value_hint = clap::ValueHint::FilePath,
        help = "Kubelet registration socket (defaults to <device-plugin-dir>/kubelet.sock)"
    )]
    pub kubelet_socket: Option<PathBuf>,

    #[arg(long, default_value = GPU_RESOURCE_NAME, help = "Resource name for whole GPUs")]
    pub gpu_resource_name: String,

    #[arg(long, default_value = GPU_SOCKET_NAME)]
    pub gpu_socket_name: String,

    #[arg(
        long,
        default_value = MEMORY_RESOURCE_NAME,
        help = "Resource name for GPU memory slices"
    )]
    pub memory_resource_name: String,

    #[arg(long, default_value = MEMORY_SOCKET_NAME)]
    pub memory_socket_name: String,

    #[arg(long, help = "Only advertise whole GPUs")]
    pub disable_memory_plugin: bool,

    #[arg(
        long,
        help = "Restart the plugins when the kubelet recreates its registration socket",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub watch_kubelet: bool,
}

impl DaemonArgs {
    pub fn kubelet_socket(&self) -> PathBuf {
        self.kubelet_socket
            .clone()
            .unwrap_or_else(|| self.device_plugin_dir.join(KUBELET_SOCKET_NAME))
    }

    pub fn resource_kinds(&self) -> Vec<ResourceKind> {
        let mut kinds = vec![ResourceKind::Accelerator];
        if !self.disable_memory_plugin {
            kinds.push(ResourceKind::MemorySlice);
        }
        kinds
    }

    pub fn plugin_config(&self, kind: ResourceKind) -> PluginConfig {
        let (resource_name, socket_name) = match kind {
            ResourceKind::Accelerator => (&self.gpu_resource_name, &self.gpu_socket_name),
            ResourceKind::MemorySlice => (&self.memory_resource_name, &self.memory_socket_name),
        };
        PluginConfig::new(
            resource_name.as_str(),
            &self.device_plugin_dir,
            socket_name,
            self.kubelet_socket(),
        )
    }
}

#[derive(Parser, Clone, Debug)]
pub struct ListDevicesArgs {
    #[command(flatten)]
    pub inventory: InventoryArgs,
}
