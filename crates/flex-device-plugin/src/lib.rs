#![allow(clippy::doc_markdown)]
pub mod api {
    #![allow(clippy::doc_overindented_list_items)]
    tonic::include_proto!("v1beta1");
}

pub mod app;
pub mod config;
pub mod device;
pub mod plugin;

pub use device::DeviceCatalogs;
pub use device::DeviceEnumerator;
pub use plugin::DevicePluginInstance;
pub use plugin::PluginConfig;
