use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rmcp::model::{
    CallToolRequestParam, ClientCapabilities, ClientInfo, Implementation, ProtocolVersion,
};
use rmcp::service::RunningService;
use rmcp::transport::sse_client::SseClientConfig;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::{
    ConfigureCommandExt, SseClientTransport, StreamableHttpClientTransport, TokioChildProcess,
};
use rmcp::{Peer, RoleClient, ServiceExt};
use serde_json::{Map, Value};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::mcp::client::{RemoteTool, ToolClient, ToolOutput};
use crate::mcp::config::{ServerConfig, TransportType};

/// Identity sent in the `initialize` handshake.
pub const CLIENT_NAME: &str = "mcp-broker";

const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HTTP_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const HTTP_MAX_IDLE_PER_HOST: usize = 100;

/// Builds a connected, handshaked client for one server config.
///
/// Implementations must never return a client whose handshake did not
/// succeed, and must report a cancelled token as [`Error::Cancelled`].
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        cancel: &CancellationToken,
        transport: TransportType,
        cfg: &ServerConfig,
    ) -> Result<Arc<dyn ToolClient>>;
}

/// The production connector: stdio subprocesses, streamable HTTP and SSE,
/// all speaking MCP through `rmcp`.
#[derive(Debug, Clone, Default)]
pub struct RmcpConnector;

#[async_trait]
impl Connector for RmcpConnector {
    async fn connect(
        &self,
        cancel: &CancellationToken,
        transport: TransportType,
        cfg: &ServerConfig,
    ) -> Result<Arc<dyn ToolClient>> {
        let client = match transport {
            TransportType::Stdio => with_cancel(cancel, connect_stdio(cfg)).await?,
            TransportType::Http => with_cancel(cancel, connect_http(cfg)).await?,
            TransportType::Sse => with_cancel(cancel, connect_sse(cfg)).await?,
        };
        Ok(Arc::new(client))
    }
}

// Dropping the in-flight future tears down whatever was half-opened
// (the child process is killed when its transport is dropped).
async fn with_cancel<F, T>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        res = fut => res,
    }
}

pub fn client_info() -> ClientInfo {
    let mut implementation = Implementation::from_build_env();
    implementation.name = CLIENT_NAME.to_string();
    implementation.version = crate::VERSION.to_string();

    let mut info = ClientInfo::default();
    info.protocol_version = ProtocolVersion::LATEST;
    info.capabilities = ClientCapabilities::default();
    info.client_info = implementation;
    info
}

async fn connect_stdio(cfg: &ServerConfig) -> Result<RmcpClient> {
    tracing::debug!(
        command = %cfg.command,
        args = ?cfg.args,
        env = cfg.env.len(),
        "spawning stdio mcp server"
    );
    // The child inherits our environment; declared vars are layered on top.
    let transport = TokioChildProcess::new(Command::new(&cfg.command).configure(|cmd| {
        cmd.args(&cfg.args)
            .envs(cfg.env.iter())
            .stderr(std::process::Stdio::inherit());
    }))
    .map_err(|e| Error::transport(format!("failed to spawn '{}': {e}", cfg.command)))?;

    let service = client_info()
        .serve(transport)
        .await
        .map_err(|e| Error::transport(format!("failed to initialize client: {e}")))?;
    Ok(RmcpClient::new(service))
}

async fn connect_http(cfg: &ServerConfig) -> Result<RmcpClient> {
    let http = http_client(cfg)?;
    let transport = StreamableHttpClientTransport::with_client(
        http,
        StreamableHttpClientTransportConfig::with_uri(cfg.url.as_str()),
    );

    let service = client_info()
        .serve(transport)
        .await
        .map_err(|e| Error::transport(format!("failed to initialize client: {e}")))?;
    Ok(RmcpClient::new(service))
}

async fn connect_sse(cfg: &ServerConfig) -> Result<RmcpClient> {
    let http = http_client(cfg)?;
    let sse_config = SseClientConfig {
        sse_endpoint: cfg.url.clone().into(),
        ..Default::default()
    };
    let transport = SseClientTransport::start_with_client(http, sse_config)
        .await
        .map_err(|e| Error::transport(format!("failed to start SSE transport: {e}")))?;

    let service = client_info()
        .serve(transport)
        .await
        .map_err(|e| Error::transport(format!("failed to initialize client: {e}")))?;
    Ok(RmcpClient::new(service))
}

/// A dedicated HTTP client per server so connection state is never shared
/// between servers.
fn http_client(cfg: &ServerConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(HTTP_CONNECT_TIMEOUT)
        .pool_idle_timeout(HTTP_IDLE_TIMEOUT)
        .pool_max_idle_per_host(HTTP_MAX_IDLE_PER_HOST)
        .default_headers(header_map(cfg)?)
        .build()
        .map_err(|e| Error::transport(format!("failed to build HTTP client: {e}")))
}

fn header_map(cfg: &ServerConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::with_capacity(cfg.headers.len());
    for (k, v) in &cfg.headers {
        let name = HeaderName::from_bytes(k.as_bytes())
            .map_err(|e| Error::config(format!("invalid header name '{k}': {e}")))?;
        let value = HeaderValue::from_str(v)
            .map_err(|e| Error::config(format!("invalid value for header '{k}': {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

type RunningClient = RunningService<RoleClient, ClientInfo>;

/// [`ToolClient`] over a running rmcp session.
pub struct RmcpClient {
    peer: Peer<RoleClient>,
    service: Mutex<Option<RunningClient>>,
}

impl RmcpClient {
    fn new(service: RunningClient) -> Self {
        Self {
            peer: service.peer().clone(),
            service: Mutex::new(Some(service)),
        }
    }
}

#[async_trait]
impl ToolClient for RmcpClient {
    async fn list_tools(&self) -> Result<Vec<RemoteTool>> {
        let tools = self
            .peer
            .list_all_tools()
            .await
            .map_err(|e| Error::transport(format!("list_tools failed: {e}")))?;

        Ok(tools
            .into_iter()
            .map(|t| RemoteTool {
                name: t.name.to_string(),
                description: t.description.as_deref().unwrap_or_default().to_string(),
                input_schema: Value::Object(t.input_schema.as_ref().clone()),
            })
            .collect())
    }

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<ToolOutput> {
        let result = self
            .peer
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments: Some(arguments),
            })
            .await
            .map_err(|e| Error::execution(format!("call_tool '{name}' failed: {e}")))?;

        Ok(ToolOutput {
            texts: result
                .content
                .iter()
                .filter_map(|c| c.as_text().map(|t| t.text.clone()))
                .collect(),
            is_error: result.is_error.unwrap_or(false),
        })
    }

    async fn close(&self) -> Result<()> {
        let service = self.service.lock().take();
        if let Some(service) = service {
            service
                .cancel()
                .await
                .map_err(|e| Error::transport(format!("failed to stop client: {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_identifies_the_broker() {
        let info = client_info();
        assert_eq!(info.client_info.name, CLIENT_NAME);
        assert_eq!(info.client_info.version, crate::VERSION);
        assert_eq!(info.protocol_version, ProtocolVersion::LATEST);
    }

    #[test]
    fn headers_are_validated() {
        let mut cfg = ServerConfig::remote("http://localhost/mcp", TransportType::Http);
        cfg.headers.insert("Authorization".into(), "Bearer t".into());
        let headers = header_map(&cfg).unwrap();
        assert_eq!(headers["authorization"], "Bearer t");

        cfg.headers.insert("bad header".into(), "x".into());
        assert!(matches!(header_map(&cfg), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn cancelled_token_surfaces_as_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let cfg = ServerConfig::stdio("definitely-not-a-real-binary", vec![]);
        let err = RmcpConnector
            .connect(&cancel, TransportType::Stdio, &cfg)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn missing_binary_is_transport_error() {
        let cfg = ServerConfig::stdio("definitely-not-a-real-binary-7f3a", vec![]);
        let err = RmcpConnector
            .connect(&CancellationToken::new(), TransportType::Stdio, &cfg)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Transport(_)), "{err}");
    }
}
