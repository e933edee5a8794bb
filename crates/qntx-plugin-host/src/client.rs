//! A thin gRPC client for a single plugin process, connecting to its loopback port (§4.7).

use std::collections::HashMap;
use std::time::Duration;

use qntx_core::{Error, Result};
use tonic::transport::Channel;

use crate::proto::plugin_service_client::PluginServiceClient;
use crate::proto::{
    ConfigSchemaRequest, ConfigSchemaResponse, HealthRequest, HealthResponse, HttpRequest,
    HttpResponse, InitializeRequest, InitializeResponse, MetadataRequest, MetadataResponse,
    PauseRequest, ResumeRequest, ShutdownRequest,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Connected client for one plugin instance.
pub struct PluginClient {
    inner: PluginServiceClient<Channel>,
}

impl PluginClient {
    pub async fn connect(port: u16) -> Result<Self> {
        let endpoint = Channel::from_shared(format!("http://127.0.0.1:{port}"))
            .map_err(|e| Error::invalid_input(e.to_string()).with_detail("invalid plugin endpoint"))?
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(RPC_TIMEOUT);
        let channel = endpoint
            .connect()
            .await
            .map_err(|e| Error::upstream(format!("plugin connect failed: {e}")))?;
        Ok(Self { inner: PluginServiceClient::new(channel) })
    }

    pub async fn metadata(&mut self) -> Result<MetadataResponse> {
        self.inner
            .metadata(MetadataRequest {})
            .await
            .map(|r| r.into_inner())
            .map_err(status_to_error)
    }

    pub async fn initialize(&mut self, config: HashMap<String, String>) -> Result<InitializeResponse> {
        self.inner
            .initialize(InitializeRequest { config })
            .await
            .map(|r| r.into_inner())
            .map_err(status_to_error)
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner
            .shutdown(ShutdownRequest {})
            .await
            .map(|_| ())
            .map_err(status_to_error)
    }

    pub async fn health(&mut self) -> Result<HealthResponse> {
        self.inner
            .health(HealthRequest {})
            .await
            .map(|r| r.into_inner())
            .map_err(status_to_error)
    }

    pub async fn pause(&mut self) -> Result<()> {
        self.inner.pause(PauseRequest {}).await.map(|_| ()).map_err(status_to_error)
    }

    pub async fn resume(&mut self) -> Result<()> {
        self.inner.resume(ResumeRequest {}).await.map(|_| ()).map_err(status_to_error)
    }

    pub async fn config_schema(&mut self) -> Result<ConfigSchemaResponse> {
        self.inner
            .config_schema(ConfigSchemaRequest {})
            .await
            .map(|r| r.into_inner())
            .map_err(status_to_error)
    }

    pub async fn handle_http(&mut self, request: HttpRequest) -> Result<HttpResponse> {
        self.inner.handle_http(request).await.map(|r| r.into_inner()).map_err(status_to_error)
    }
}

fn status_to_error(status: tonic::Status) -> Error {
    use tonic::Code;
    match status.code() {
        Code::NotFound => Error::not_found(status.message()),
        Code::InvalidArgument => Error::invalid_input(status.message()),
        Code::Unimplemented => Error::not_found(format!("capability not implemented: {}", status.message())),
        Code::Cancelled | Code::DeadlineExceeded => Error::Cancelled,
        _ => Error::upstream(status.message()),
    }
}
