use std::num::NonZeroU64;

use error_stack::Report;
use serde::Serialize;
use tracing::debug;
use tracing::info;

use super::AcceleratorUnit;
use super::Device;
use super::InventoryError;

/// One GiB, the granularity of a memory slice.
pub const DEFAULT_SLICE_SIZE: u64 = 1 << 30;
/// Prefix of whole-unit identifiers, e.g. `GPU-0`.
pub const DEFAULT_UNIT_PREFIX: &str = "GPU";

const MEMORY_SLICE_PREFIX: &str = "MEM";

const NON_ZERO_DEFAULT_SLICE_SIZE: NonZeroU64 = match NonZeroU64::new(DEFAULT_SLICE_SIZE) {
    Some(size) => size,
    None => panic!("default slice size must be non-zero"),
};

/// The two device catalogs derived from one inventory snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceCatalogs {
    /// One device per accelerator unit
    pub accelerators: Vec<Device>,
    /// `capacity / slice_size` devices per accelerator unit
    pub memory_slices: Vec<Device>,
}

/// Maps accelerator units to device catalogs.
///
/// Output order is unit index ascending, then slice index ascending, so the
/// same snapshot always yields the same identifiers in the same order.
#[derive(Debug, Clone)]
pub struct DeviceEnumerator {
    unit_prefix: String,
    slice_size: NonZeroU64,
}

impl Default for DeviceEnumerator {
    fn default() -> Self {
        Self {
            unit_prefix: DEFAULT_UNIT_PREFIX.to_string(),
            slice_size: NON_ZERO_DEFAULT_SLICE_SIZE,
        }
    }
}

impl DeviceEnumerator {
    pub fn new(
        unit_prefix: impl Into<String>,
        slice_size: u64,
    ) -> Result<Self, Report<InventoryError>> {
        let slice_size =
            NonZeroU64::new(slice_size).ok_or_else(|| Report::new(InventoryError::InvalidSliceSize))?;
        Ok(Self {
            unit_prefix: unit_prefix.into(),
            slice_size,
        })
    }

    pub fn slice_size(&self) -> u64 {
        self.slice_size.get()
    }

    /// Number of memory slices a unit contributes. Partial slices are dropped.
    pub fn slice_count(&self, unit: &AcceleratorUnit) -> u64 {
        unit.capacity / self.slice_size.get()
    }

    pub fn enumerate(&self, units: &[AcceleratorUnit]) -> DeviceCatalogs {
        let mut ordered: Vec<&AcceleratorUnit> = units.iter().collect();
        ordered.sort_by_key(|unit| unit.index);

        let mut catalogs = DeviceCatalogs::default();
        for unit in ordered {
            catalogs.accelerators.push(Device::healthy(format!(
                "{}-{}",
                self.unit_prefix, unit.index
            )));

            let slices = self.slice_count(unit);
            debug!(
                index = unit.index,
                capacity = unit.capacity,
                slices,
                "enumerated accelerator memory"
            );
            catalogs.memory_slices.extend((0..slices).map(|slice| {
                Device::healthy(format!("{MEMORY_SLICE_PREFIX}-{}-{slice}", unit.index))
            }));
        }

        info!(
            accelerators = catalogs.accelerators.len(),
            memory_slices = catalogs.memory_slices.len(),
            "device catalogs ready"
        );
        catalogs
    }
}
