//! HTTP transport for ubus JSON-RPC.

use std::time::Duration;

use reqwest::Client;
use tracing::trace;

use super::wire::{RpcRequest, RpcResponse};
use super::{RpcError, RpcTransport};

/// Posts JSON-RPC envelopes to the device's `/ubus` endpoint.
pub struct HttpTransport {
    client: Client,
    url: String,
}

impl HttpTransport {
    /// Build a transport for `url`. Without a `timeout` a hung endpoint blocks
    /// the caller for as long as the underlying connection stays open.
    pub fn new(url: &str, timeout: Option<Duration>) -> Result<Self, RpcError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| RpcError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl RpcTransport for HttpTransport {
    async fn exchange(&self, request: &RpcRequest) -> Result<RpcResponse, RpcError> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| RpcError::Transport(format!("POST {} failed: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::Transport(format!(
                "POST {} returned HTTP {}",
                self.url, status
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| RpcError::Transport(format!("failed to read response body: {}", e)))?;
        trace!(id = request.id, %body, "ubus response");

        serde_json::from_str(&body)
            .map_err(|e| RpcError::Malformed(format!("invalid JSON-RPC response: {}", e)))
    }
}
