use error_stack::Report;
use error_stack::ResultExt;
use tonic::Request;
use tracing::info;

use super::service::PLUGIN_OPTIONS;
use super::transport::connect_uds;
use super::PluginConfig;
use super::PluginError;
use crate::api::registration_client::RegistrationClient;
use crate::api::RegisterRequest;

/// Device plugin API version this plugin speaks.
pub const API_VERSION: &str = "v1beta1";

pub fn registration_request(config: &PluginConfig) -> RegisterRequest {
    RegisterRequest {
        version: API_VERSION.to_string(),
        endpoint: config.endpoint(),
        resource_name: config.resource_name.clone(),
        options: Some(PLUGIN_OPTIONS),
    }
}

/// Register the plugin described by `config` with the kubelet.
///
/// Never retried here: a failed registration aborts the current start.
pub async fn register_with_kubelet(config: &PluginConfig) -> Result<(), Report<PluginError>> {
    info!(
        "registering device plugin with kubelet: {}",
        config.kubelet_socket.display()
    );
    let registration_error = || PluginError::Registration {
        resource_name: config.resource_name.clone(),
    };

    let channel = connect_uds(&config.kubelet_socket, config.dial_timeout)
        .await
        .change_context_lazy(registration_error)?;
    let mut client = RegistrationClient::new(channel);

    client
        .register(Request::new(registration_request(config)))
        .await
        .change_context_lazy(registration_error)?;

    info!(
        "successfully registered '{}' with kubelet",
        config.resource_name
    );
    Ok(())
}
