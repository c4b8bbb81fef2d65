//! ubus JSON-RPC session client.
//!
//! Authenticates once against the device's management API and issues every
//! later call with the returned session token. Calls whose answer must
//! satisfy an operation-specific check go through [`UbusClient::call_with_retry`].

pub mod auth;
pub mod transport;
pub mod wire;

use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

pub use auth::{AuthState, Credential, CredentialChain, LoginOutcome};
pub use transport::HttpTransport;
pub use wire::{RpcReply, RpcRequest, RpcResponse, ANONYMOUS_SESSION};

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed ubus response: {0}")]
    Malformed(String),

    #[error("no credentials configured")]
    NoCredentials,

    #[error("authentication failed: all {attempted} credential(s) rejected")]
    AuthenticationFailed { attempted: usize },

    #[error("{object}.{method} gave no valid answer after {attempts} attempt(s) (last status {last_code:?})")]
    RetriesExhausted {
        object: String,
        method: String,
        attempts: u32,
        last_code: Option<i64>,
    },
}

/// Opaque ubus session token. Never refreshed within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session(String);

impl Session {
    pub fn new(token: &str) -> Self {
        Self(token.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Moves one request/response pair. Implemented over HTTP in production.
#[async_trait::async_trait]
pub trait RpcTransport: Send + Sync {
    async fn exchange(&self, request: &RpcRequest) -> Result<RpcResponse, RpcError>;
}

/// ubus client owning the request-id sequence for one run.
pub struct UbusClient<T = HttpTransport> {
    transport: T,
    request_counter: u64,
}

impl<T: RpcTransport> UbusClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            request_counter: 0,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn next_id(&mut self) -> u64 {
        let id = self.request_counter;
        self.request_counter += 1;
        id
    }

    /// Issue a single call and decode the status/payload pair.
    pub async fn call(
        &mut self,
        session: &str,
        object: &str,
        method: &str,
        args: Value,
    ) -> Result<RpcReply, RpcError> {
        let id = self.next_id();
        let request = RpcRequest::call(id, session, object, method, args);
        debug!(id, object, method, "ubus call");
        self.transport.exchange(&request).await?.into_reply()
    }

    /// Log in with the first credential pair the device accepts.
    ///
    /// Any transport failure or malformed answer aborts immediately without
    /// trying the remaining credentials.
    pub async fn authenticate(&mut self, credentials: &[Credential]) -> Result<Session, RpcError> {
        let mut chain = CredentialChain::new(credentials);

        while let Some(credential) = chain.next_attempt() {
            let reply = self
                .call(
                    ANONYMOUS_SESSION,
                    "session",
                    "login",
                    json!({
                        "username": credential.username,
                        "password": credential.password,
                    }),
                )
                .await?;

            let outcome = LoginOutcome::from_reply(reply)?;
            if let LoginOutcome::Rejected { code } = &outcome {
                debug!(username = %credential.username, code, "login rejected");
            }
            chain.record(outcome);
        }

        let session = chain.finish()?;
        info!("authenticated against ubus");
        Ok(session)
    }

    /// Call until the status is success and `is_valid` accepts the payload,
    /// at most `retry_limit` times.
    ///
    /// Returns the payload of the first satisfying attempt. A reply with a
    /// success status and no payload is checked as `null`.
    pub async fn call_with_retry<P>(
        &mut self,
        session: &Session,
        object: &str,
        method: &str,
        args: Value,
        retry_limit: u32,
        is_valid: P,
    ) -> Result<Value, RpcError>
    where
        P: Fn(&Value) -> bool + Send,
    {
        let attempts = retry_limit.max(1);
        let mut last_code = None;

        for attempt in 1..=attempts {
            let reply = self
                .call(session.as_str(), object, method, args.clone())
                .await?;
            last_code = Some(reply.code);

            if reply.is_success() {
                let data = reply.data.unwrap_or(Value::Null);
                if is_valid(&data) {
                    return Ok(data);
                }
                debug!(object, method, attempt, "ubus answer failed validity check");
            } else {
                debug!(object, method, attempt, code = reply.code, "ubus call returned error status");
            }
        }

        warn!(object, method, attempts, "ubus retry limit exhausted");
        Err(RpcError::RetriesExhausted {
            object: object.to_string(),
            method: method.to_string(),
            attempts,
            last_code,
        })
    }
}
