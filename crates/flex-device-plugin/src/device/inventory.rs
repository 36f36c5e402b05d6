use std::ffi::OsStr;

use error_stack::Report;
use error_stack::ResultExt;
use nvml_wrapper::Nvml;
use tracing::info;
use tracing::warn;

use super::AcceleratorUnit;
use super::InventoryError;

const MIB: u64 = 1 << 20;

/// Source of the accelerator units present on the node.
///
/// Implementations return units ordered by index. The snapshot is read once per
/// process; device count and capacity only change across restarts.
pub trait InventoryProvider: Send + Sync {
    fn accelerators(&self) -> Result<Vec<AcceleratorUnit>, Report<InventoryError>>;
}

/// Inventory backed by the NVIDIA Management Library.
pub struct NvmlInventory {
    nvml: Nvml,
}

impl NvmlInventory {
    pub fn init() -> Result<Self, Report<InventoryError>> {
        let nvml = match Nvml::init() {
            Ok(nvml) => {
                info!("NVML initialized successfully");
                nvml
            }
            Err(e) => {
                warn!("Standard NVML init failed ({e}), trying with explicit library path");
                let nvml = Nvml::builder()
                    .lib_path(OsStr::new("libnvidia-ml.so.1"))
                    .init()
                    .change_context(InventoryError::NvmlInit)?;
                info!("NVML initialized with explicit library path");
                nvml
            }
        };
        Ok(Self { nvml })
    }
}

impl InventoryProvider for NvmlInventory {
    fn accelerators(&self) -> Result<Vec<AcceleratorUnit>, Report<InventoryError>> {
        let device_count = self
            .nvml
            .device_count()
            .change_context(InventoryError::Query {
                message: "device count".to_string(),
            })?;
        info!("Discovered {} GPU device(s)", device_count);

        (0..device_count)
            .map(|index| {
                let device = self
                    .nvml
                    .device_by_index(index)
                    .change_context(InventoryError::Query {
                        message: format!("device {index}"),
                    })?;
                let memory = device
                    .memory_info()
                    .change_context(InventoryError::Query {
                        message: format!("memory info of device {index}"),
                    })?;
                info!(index, total_memory = memory.total, "found GPU");
                Ok(AcceleratorUnit {
                    index,
                    capacity: memory.total,
                })
            })
            .collect()
    }
}

/// Fixed inventory, for nodes without NVML and for testing.
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    units: Vec<AcceleratorUnit>,
}

impl StaticInventory {
    pub fn new(units: Vec<AcceleratorUnit>) -> Self {
        Self { units }
    }

    /// Parse a comma separated list of capacities in MiB, e.g. `"16384,8192"`.
    /// The unit index is the position in the list.
    pub fn from_mib_list(list: &str) -> Result<Self, Report<InventoryError>> {
        let units = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .enumerate()
            .map(|(index, value)| {
                let mib = value.parse::<u64>().change_context_lazy(|| {
                    InventoryError::InvalidCapacity {
                        value: value.to_string(),
                    }
                })?;
                let capacity = mib.checked_mul(MIB).ok_or_else(|| {
                    Report::new(InventoryError::InvalidCapacity {
                        value: value.to_string(),
                    })
                })?;
                let index = u32::try_from(index).change_context(InventoryError::Query {
                    message: "too many mock devices".to_string(),
                })?;
                Ok(AcceleratorUnit { index, capacity })
            })
            .collect::<Result<Vec<_>, Report<InventoryError>>>()?;

        info!(devices = units.len(), "using static accelerator inventory");
        Ok(Self { units })
    }
}

impl InventoryProvider for StaticInventory {
    fn accelerators(&self) -> Result<Vec<AcceleratorUnit>, Report<InventoryError>> {
        Ok(self.units.clone())
    }
}
