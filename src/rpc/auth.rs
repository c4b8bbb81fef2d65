//! Credential failover for `session.login`.
//!
//! Credentials are tried strictly in order; the first accepted login ends the
//! chain. The chain itself performs no I/O so the transitions can be tested
//! on their own.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::wire::RpcReply;
use super::{RpcError, Session};

/// Shown in place of a password.
pub const REDACTED: &str = "<redacted>";

/// One username/password pair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &REDACTED)
            .finish()
    }
}

/// Result of a single login attempt that reached the device.
#[derive(Debug, Clone, PartialEq)]
pub enum LoginOutcome {
    Accepted(Session),
    Rejected { code: i64 },
}

impl LoginOutcome {
    /// Interpret a `session.login` reply. A success code without a session id
    /// is a malformed answer, not a rejection.
    pub fn from_reply(reply: RpcReply) -> Result<Self, RpcError> {
        if !reply.is_success() {
            return Ok(LoginOutcome::Rejected { code: reply.code });
        }

        let token = reply
            .data
            .as_ref()
            .and_then(|d| d.get("ubus_rpc_session"))
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::Malformed("login succeeded without ubus_rpc_session".into()))?;

        Ok(LoginOutcome::Accepted(Session::new(token)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthState {
    /// Nothing tried yet.
    Pending,
    /// Waiting for the outcome of credential `n`.
    Trying(usize),
    Authenticated(Session),
    Exhausted,
}

pub struct CredentialChain<'a> {
    credentials: &'a [Credential],
    state: AuthState,
}

impl<'a> CredentialChain<'a> {
    pub fn new(credentials: &'a [Credential]) -> Self {
        Self {
            credentials,
            state: AuthState::Pending,
        }
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    /// Credential to try next, or `None` once the chain has resolved.
    pub fn next_attempt(&mut self) -> Option<&'a Credential> {
        let next = match self.state {
            AuthState::Pending => 0,
            AuthState::Trying(n) => n + 1,
            AuthState::Authenticated(_) | AuthState::Exhausted => return None,
        };

        match self.credentials.get(next) {
            Some(credential) => {
                self.state = AuthState::Trying(next);
                Some(credential)
            }
            None => {
                self.state = AuthState::Exhausted;
                None
            }
        }
    }

    pub fn record(&mut self, outcome: LoginOutcome) {
        if let LoginOutcome::Accepted(session) = outcome {
            if matches!(self.state, AuthState::Trying(_)) {
                self.state = AuthState::Authenticated(session);
            }
        }
    }

    pub fn finish(self) -> Result<Session, RpcError> {
        match self.state {
            AuthState::Authenticated(session) => Ok(session),
            _ if self.credentials.is_empty() => Err(RpcError::NoCredentials),
            _ => Err(RpcError::AuthenticationFailed {
                attempted: self.credentials.len(),
            }),
        }
    }
}
