//! Device plugin lifecycle against a fake kubelet.

mod common;

use std::path::Path;
use std::time::Duration;

use common::FakeKubelet;
use flex_device_plugin::api::device_plugin_client::DevicePluginClient;
use flex_device_plugin::api::AllocateRequest;
use flex_device_plugin::api::ContainerAllocateRequest;
use flex_device_plugin::api::Empty;
use flex_device_plugin::api::PreStartContainerRequest;
use flex_device_plugin::api::PreferredAllocationRequest;
use flex_device_plugin::device::AcceleratorUnit;
use flex_device_plugin::device::DeviceEnumerator;
use flex_device_plugin::plugin::transport::connect_uds;
use flex_device_plugin::plugin::DevicePluginInstance;
use flex_device_plugin::plugin::PluginConfig;
use flex_device_plugin::plugin::PluginError;
use flex_device_plugin::plugin::PluginState;
use similar_asserts::assert_eq;
use test_log::test;
use tokio::time::timeout;
use tonic::transport::Channel;

const SLICE: u64 = 1 << 30;
const TEST_TIMEOUT: Duration = Duration::from_secs(5);
const QUIET_PERIOD: Duration = Duration::from_millis(300);

fn memory_plugin(dir: &Path) -> DevicePluginInstance {
    let catalogs = DeviceEnumerator::default().enumerate(&[
        AcceleratorUnit {
            index: 0,
            capacity: 2 * SLICE,
        },
        AcceleratorUnit {
            index: 1,
            capacity: SLICE,
        },
    ]);
    let config = PluginConfig::new(
        "nvidia.flex.com/memory",
        dir,
        "flex-nvidia-gpu-memory.sock",
        dir.join("kubelet.sock"),
    );
    DevicePluginInstance::new(config, catalogs.memory_slices)
}

async fn client(plugin: &DevicePluginInstance) -> DevicePluginClient<Channel> {
    let channel = connect_uds(plugin.socket_path(), TEST_TIMEOUT)
        .await
        .unwrap();
    DevicePluginClient::new(channel)
}

#[test(tokio::test)]
async fn start_registers_with_kubelet() {
    let dir = tempfile::tempdir().unwrap();
    let kubelet = FakeKubelet::spawn(dir.path());
    let mut plugin = memory_plugin(dir.path());

    plugin.start().await.unwrap();
    assert_eq!(plugin.state(), PluginState::Registered);
    assert!(plugin.socket_path().exists());

    let requests = kubelet.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].version, "v1beta1");
    assert_eq!(requests[0].endpoint, "flex-nvidia-gpu-memory.sock");
    assert_eq!(requests[0].resource_name, "nvidia.flex.com/memory");
    let options = requests[0].options.as_ref().unwrap();
    assert!(!options.pre_start_required);
    assert!(!options.get_preferred_allocation_available);

    plugin.stop().await.unwrap();
    assert_eq!(plugin.state(), PluginState::Stopped);
    assert!(!plugin.socket_path().exists());
    kubelet.shutdown().await;
}

#[test(tokio::test)]
async fn watch_sends_catalog_once_while_other_calls_proceed() {
    let dir = tempfile::tempdir().unwrap();
    let kubelet = FakeKubelet::spawn(dir.path());
    let mut plugin = memory_plugin(dir.path());
    plugin.start().await.unwrap();

    let mut watcher = client(&plugin).await;
    let mut stream = watcher.list_and_watch(Empty {}).await.unwrap().into_inner();

    let update = timeout(TEST_TIMEOUT, stream.message())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let ids: Vec<_> = update.devices.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["MEM-0-0", "MEM-0-1", "MEM-1-0"]);
    assert!(update.devices.iter().all(|d| d.health == "Healthy"));

    // a second subscriber and unary calls are served while the first stream is open
    let mut other = client(&plugin).await;
    let mut second = other.list_and_watch(Empty {}).await.unwrap().into_inner();
    let second_update = timeout(TEST_TIMEOUT, second.message())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(second_update.devices.len(), 3);
    drop(second);

    let options = timeout(TEST_TIMEOUT, other.get_device_plugin_options(Empty {}))
        .await
        .unwrap()
        .unwrap()
        .into_inner();
    assert!(!options.pre_start_required);

    assert!(
        timeout(QUIET_PERIOD, stream.message()).await.is_err(),
        "no further update expected"
    );

    plugin.stop().await.unwrap();
    let end = timeout(TEST_TIMEOUT, stream.message()).await;
    assert!(end.is_ok(), "stream should end when the plugin stops");
    kubelet.shutdown().await;
}

#[test(tokio::test)]
async fn allocate_grants_every_container_request() {
    let dir = tempfile::tempdir().unwrap();
    let kubelet = FakeKubelet::spawn(dir.path());
    let mut plugin = memory_plugin(dir.path());
    plugin.start().await.unwrap();
    let mut client = client(&plugin).await;

    let request = AllocateRequest {
        container_requests: vec![
            ContainerAllocateRequest {
                devices_ids: vec!["MEM-0-0".to_string(), "MEM-0-1".to_string()],
            },
            ContainerAllocateRequest {
                // ids are granted without checking the catalog
                devices_ids: vec!["MEM-9-9".to_string()],
            },
        ],
    };
    let response = client.allocate(request).await.unwrap().into_inner();
    assert_eq!(response.container_responses.len(), 2);
    assert!(response
        .container_responses
        .iter()
        .all(|c| c.envs.is_empty() && c.mounts.is_empty() && c.devices.is_empty()));

    let preferred = client
        .get_preferred_allocation(PreferredAllocationRequest::default())
        .await
        .unwrap()
        .into_inner();
    assert!(preferred.container_responses.is_empty());

    client
        .pre_start_container(PreStartContainerRequest {
            devices_ids: vec!["MEM-0-0".to_string()],
        })
        .await
        .unwrap();

    plugin.stop().await.unwrap();
    kubelet.shutdown().await;
}

#[test(tokio::test)]
async fn start_stop_start_reuses_socket() {
    let dir = tempfile::tempdir().unwrap();
    let kubelet = FakeKubelet::spawn(dir.path());
    let mut plugin = memory_plugin(dir.path());

    plugin.start().await.unwrap();
    plugin.stop().await.unwrap();
    assert!(!plugin.socket_path().exists());

    plugin.start().await.unwrap();
    assert_eq!(plugin.state(), PluginState::Registered);
    assert!(plugin.socket_path().exists());
    assert_eq!(kubelet.requests().len(), 2);

    let mut client = client(&plugin).await;
    client.get_device_plugin_options(Empty {}).await.unwrap();

    plugin.stop().await.unwrap();
    kubelet.shutdown().await;
}

#[test(tokio::test)]
async fn start_while_running_replaces_server() {
    let dir = tempfile::tempdir().unwrap();
    let kubelet = FakeKubelet::spawn(dir.path());
    let mut plugin = memory_plugin(dir.path());

    plugin.start().await.unwrap();
    plugin.start().await.unwrap();
    assert_eq!(kubelet.requests().len(), 2);

    let mut client = client(&plugin).await;
    client.get_device_plugin_options(Empty {}).await.unwrap();

    plugin.stop().await.unwrap();
    assert!(!plugin.socket_path().exists());
    kubelet.shutdown().await;
}

#[test(tokio::test)]
async fn start_replaces_stale_socket_file() {
    let dir = tempfile::tempdir().unwrap();
    let kubelet = FakeKubelet::spawn(dir.path());
    let mut plugin = memory_plugin(dir.path());
    std::fs::write(plugin.socket_path(), b"left over").unwrap();

    plugin.start().await.unwrap();
    client(&plugin)
        .await
        .get_device_plugin_options(Empty {})
        .await
        .unwrap();

    plugin.stop().await.unwrap();
    kubelet.shutdown().await;
}

#[test(tokio::test)]
async fn rejected_registration_tears_down() {
    let dir = tempfile::tempdir().unwrap();
    let kubelet = FakeKubelet::spawn_rejecting(dir.path());
    let mut plugin = memory_plugin(dir.path());

    let err = plugin.start().await.unwrap_err();
    assert!(matches!(
        err.current_context(),
        PluginError::Registration { .. }
    ));
    assert_eq!(plugin.state(), PluginState::Stopped);
    assert!(!plugin.socket_path().exists());

    // tearing down again is harmless
    plugin.stop().await.unwrap();
    kubelet.shutdown().await;
}

#[test(tokio::test)]
async fn stop_before_start_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let mut plugin = memory_plugin(dir.path());

    plugin.stop().await.unwrap();
    assert_eq!(plugin.state(), PluginState::Uninitialized);
}
