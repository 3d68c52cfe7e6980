//! Tool Server Transport Layer
//!
//! Handles communication with remote tool servers over HTTP.

use super::protocol::{McpError, McpRequest, McpResponse, McpResult, MCP_PATH};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Default connect timeout for the shared HTTP client
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Transport used to reach a tool server.
///
/// The orchestrator only depends on this trait, so tests and alternative
/// transports can stand in for HTTP.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    /// Execute `tool` on the server at `endpoint` and return its text output
    async fn execute_tool(
        &self,
        endpoint: &str,
        tool: &str,
        parameters: serde_json::Value,
    ) -> McpResult<String>;

    /// Lightweight capability listing used as a health check
    async fn list_tools(&self, endpoint: &str) -> McpResult<()>;
}

/// HTTP transport backed by a shared `reqwest` client
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with default client settings
    pub fn new() -> McpResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| McpError::Network(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Create a transport around an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn url(endpoint: &str) -> String {
        format!("{}{}", endpoint.trim_end_matches('/'), MCP_PATH)
    }

    async fn post(&self, endpoint: &str, body: &McpRequest) -> McpResult<reqwest::Response> {
        let url = Self::url(endpoint);
        debug!(url = %url, method = %body.method, "Sending tool server request");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| McpError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(McpError::Http {
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ToolTransport for HttpTransport {
    async fn execute_tool(
        &self,
        endpoint: &str,
        tool: &str,
        parameters: serde_json::Value,
    ) -> McpResult<String> {
        let request = McpRequest::execute(tool, parameters);
        let response = self.post(endpoint, &request).await?;

        let body: McpResponse = response
            .json()
            .await
            .map_err(|e| McpError::Protocol(format!("invalid response body: {}", e)))?;
        body.into_text()
    }

    async fn list_tools(&self, endpoint: &str) -> McpResult<()> {
        self.post(endpoint, &McpRequest::list()).await.map(|_| ())
    }
}
