//! A fake kubelet serving the `v1beta1.Registration` service on a unix socket.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use flex_device_plugin::api::registration_server::Registration;
use flex_device_plugin::api::registration_server::RegistrationServer;
use flex_device_plugin::api::Empty;
use flex_device_plugin::api::RegisterRequest;
use tokio::net::UnixListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnixListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic::Request;
use tonic::Response;
use tonic::Status;

#[derive(Clone, Default)]
struct Registrar {
    requests: Arc<Mutex<Vec<RegisterRequest>>>,
    reject: bool,
}

#[tonic::async_trait]
impl Registration for Registrar {
    async fn register(
        &self,
        request: Request<RegisterRequest>,
    ) -> Result<Response<Empty>, Status> {
        let request = request.into_inner();
        if self.reject {
            return Err(Status::invalid_argument(format!(
                "resource {} is not allowed",
                request.resource_name
            )));
        }
        self.requests.lock().unwrap().push(request);
        Ok(Response::new(Empty {}))
    }
}

pub struct FakeKubelet {
    pub socket: PathBuf,
    requests: Arc<Mutex<Vec<RegisterRequest>>>,
    shutdown: CancellationToken,
    server: JoinHandle<()>,
}

impl FakeKubelet {
    pub fn spawn(dir: &Path) -> Self {
        Self::spawn_with(dir, false)
    }

    pub fn spawn_rejecting(dir: &Path) -> Self {
        Self::spawn_with(dir, true)
    }

    fn spawn_with(dir: &Path, reject: bool) -> Self {
        let socket = dir.join("kubelet.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let registrar = Registrar {
            reject,
            ..Default::default()
        };
        let requests = registrar.requests.clone();
        let shutdown = CancellationToken::new();

        let token = shutdown.clone();
        let server = tokio::spawn(async move {
            Server::builder()
                .add_service(RegistrationServer::new(registrar))
                .serve_with_incoming_shutdown(UnixListenerStream::new(listener), async move {
                    token.cancelled().await
                })
                .await
                .unwrap();
        });

        Self {
            socket,
            requests,
            shutdown,
            server,
        }
    }

    pub fn requests(&self) -> Vec<RegisterRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.server.await.unwrap();
    }
}
