//! Accelerator inventory and device catalogs.
//!
//! - [`InventoryProvider`]: source of [`AcceleratorUnit`]s (NVML or a static list)
//! - [`DeviceEnumerator`]: maps units to the whole-unit and memory-slice catalogs

use core::error::Error;
use std::fmt;

use serde::Serialize;

use crate::api;

pub mod enumerator;
pub mod inventory;

pub use enumerator::DeviceCatalogs;
pub use enumerator::DeviceEnumerator;
pub use enumerator::DEFAULT_SLICE_SIZE;
pub use enumerator::DEFAULT_UNIT_PREFIX;
pub use inventory::InventoryProvider;
pub use inventory::NvmlInventory;
pub use inventory::StaticInventory;

/// A physical accelerator as reported by the inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceleratorUnit {
    /// Position of the unit on the node
    pub index: u32,
    /// Memory capacity in bytes
    pub capacity: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceHealth {
    Healthy,
    Unhealthy,
}

impl DeviceHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceHealth::Healthy => "Healthy",
            DeviceHealth::Unhealthy => "Unhealthy",
        }
    }
}

impl fmt::Display for DeviceHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A device as advertised to the kubelet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    pub id: String,
    pub health: DeviceHealth,
}

impl Device {
    pub fn healthy(id: String) -> Self {
        Self {
            id,
            health: DeviceHealth::Healthy,
        }
    }
}

impl From<&Device> for api::Device {
    fn from(device: &Device) -> Self {
        api::Device {
            id: device.id.clone(),
            health: device.health.as_str().to_string(),
            topology: None,
        }
    }
}

/// Errors raised while reading the accelerator inventory.
#[derive(Debug, derive_more::Display)]
pub enum InventoryError {
    #[display("Failed to initialize NVML")]
    NvmlInit,
    #[display("Failed to query accelerator inventory: {message}")]
    Query { message: String },
    #[display("Invalid accelerator capacity: {value:?}")]
    InvalidCapacity { value: String },
    #[display("Slice size must be greater than zero")]
    InvalidSliceSize,
}

impl Error for InventoryError {}
