use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tonic::Request;
use tonic::Response;
use tonic::Result as TonicResult;
use tonic::Status;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::api;
use crate::api::device_plugin_server::DevicePlugin;
use crate::api::AllocateRequest;
use crate::api::AllocateResponse;
use crate::api::ContainerAllocateResponse;
use crate::api::DevicePluginOptions;
use crate::api::Empty;
use crate::api::ListAndWatchResponse;
use crate::api::PreStartContainerRequest;
use crate::api::PreStartContainerResponse;
use crate::api::PreferredAllocationRequest;
use crate::api::PreferredAllocationResponse;
use crate::device::Device;

/// Options advertised at registration and from `GetDevicePluginOptions`.
pub const PLUGIN_OPTIONS: DevicePluginOptions = DevicePluginOptions {
    pre_start_required: false,
    get_preferred_allocation_available: false,
};

/// DevicePlugin service implementation
///
/// Advertises a fixed catalog and grants every allocation without contention
/// checks; admission is left to the scheduler.
#[derive(Debug, Clone)]
pub struct DevicePluginService {
    resource_name: Arc<str>,
    catalog: Arc<[Device]>,
    /// cancelled when the owning plugin stops, ends every open watch stream
    stop: CancellationToken,
    /// one task per open watch stream
    watches: TaskTracker,
}

impl DevicePluginService {
    pub fn new(resource_name: &str, catalog: Arc<[Device]>, stop: CancellationToken) -> Self {
        Self {
            resource_name: Arc::from(resource_name),
            catalog,
            stop,
            watches: TaskTracker::new(),
        }
    }

    /// Number of watch streams whose sender task is still running.
    pub fn open_watches(&self) -> usize {
        self.watches.len()
    }
}

#[tonic::async_trait]
impl DevicePlugin for DevicePluginService {
    async fn get_device_plugin_options(
        &self,
        _request: Request<Empty>,
    ) -> TonicResult<Response<DevicePluginOptions>> {
        debug!("getting device plugin options");
        Ok(Response::new(PLUGIN_OPTIONS))
    }

    type ListAndWatchStream =
        Pin<Box<dyn Stream<Item = Result<ListAndWatchResponse, Status>> + Send>>;

    /// Send the full catalog once, then hold the stream open until the
    /// subscriber goes away or the plugin stops.
    async fn list_and_watch(
        &self,
        _request: Request<Empty>,
    ) -> TonicResult<Response<Self::ListAndWatchStream>> {
        info!(
            resource = %self.resource_name,
            devices = self.catalog.len(),
            open_watches = self.open_watches(),
            "starting to watch device list"
        );

        let (tx, rx) = mpsc::channel::<Result<ListAndWatchResponse, Status>>(1);
        let devices: Vec<api::Device> = self.catalog.iter().map(api::Device::from).collect();
        let resource_name = self.resource_name.clone();
        let stop = self.stop.clone();

        self.watches.spawn(async move {
            if let Err(e) = tx.send(Ok(ListAndWatchResponse { devices })).await {
                warn!(resource = %resource_name, "failed to send device list: {e}");
                return;
            }

            tokio::select! {
                _ = tx.closed() => {
                    info!(resource = %resource_name, "device list subscriber disconnected");
                }
                _ = stop.cancelled() => {
                    info!(resource = %resource_name, "device watch stopped");
                }
            }
        });

        let stream = ReceiverStream::new(rx);
        Ok(Response::new(Box::pin(stream)))
    }

    async fn get_preferred_allocation(
        &self,
        request: Request<PreferredAllocationRequest>,
    ) -> TonicResult<Response<PreferredAllocationResponse>> {
        debug!("getting preferred device allocation: {:?}", request.get_ref());
        Ok(Response::new(PreferredAllocationResponse::default()))
    }

    async fn allocate(
        &self,
        request: Request<AllocateRequest>,
    ) -> TonicResult<Response<AllocateResponse>> {
        let req = request.into_inner();

        for container_req in &req.container_requests {
            info!(
                resource = %self.resource_name,
                "allocating devices to container, device IDs: {:?}",
                container_req.devices_ids
            );
        }

        // kubelet rejects a response without container responses
        let groups = req.container_requests.len().max(1);
        let response = AllocateResponse {
            container_responses: vec![ContainerAllocateResponse::default(); groups],
        };
        Ok(Response::new(response))
    }

    async fn pre_start_container(
        &self,
        request: Request<PreStartContainerRequest>,
    ) -> TonicResult<Response<PreStartContainerResponse>> {
        debug!("pre-start container: {:?}", request.get_ref());
        Ok(Response::new(PreStartContainerResponse {}))
    }
}
