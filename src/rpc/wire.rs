//! ubus JSON-RPC envelope types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::RpcError;

/// Session id used for calls made before login (`session.login` itself).
pub const ANONYMOUS_SESSION: &str = "00000000000000000000000000000000";

/// ubus result code for success.
pub const UBUS_STATUS_OK: i64 = 0;

/// `{"jsonrpc":"2.0","id":N,"method":"call","params":[session, object, method, args]}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: (String, String, String, Value),
}

impl RpcRequest {
    pub fn call(id: u64, session: &str, object: &str, method: &str, args: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: "call".to_string(),
            params: (
                session.to_string(),
                object.to_string(),
                method.to_string(),
                args,
            ),
        }
    }

    pub fn object(&self) -> &str {
        &self.params.1
    }

    pub fn ubus_method(&self) -> &str {
        &self.params.2
    }

    pub fn args(&self) -> &Value {
        &self.params.3
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Vec<Value>>,
    #[serde(default)]
    pub error: Option<RpcFault>,
}

/// JSON-RPC level error object (e.g. `-32002 Access denied` for a bad session).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcFault {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// A decoded ubus answer: status code plus optional payload.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcReply {
    pub code: i64,
    pub data: Option<Value>,
}

impl RpcReply {
    pub fn is_success(&self) -> bool {
        self.code == UBUS_STATUS_OK
    }
}

impl RpcResponse {
    /// Build a success response carrying `data`. Handy for fakes and tests.
    pub fn ok(id: u64, data: Value) -> Self {
        Self {
            jsonrpc: Some("2.0".to_string()),
            id: Some(Value::from(id)),
            result: Some(vec![Value::from(UBUS_STATUS_OK), data]),
            error: None,
        }
    }

    /// Build a response with a non-zero ubus status and no payload.
    pub fn status(id: u64, code: i64) -> Self {
        Self {
            jsonrpc: Some("2.0".to_string()),
            id: Some(Value::from(id)),
            result: Some(vec![Value::from(code)]),
            error: None,
        }
    }

    pub fn into_reply(self) -> Result<RpcReply, RpcError> {
        if let Some(fault) = self.error {
            return Ok(RpcReply {
                code: fault.code,
                data: None,
            });
        }

        let mut result = self
            .result
            .ok_or_else(|| RpcError::Malformed("response has neither result nor error".into()))?;
        if result.is_empty() {
            return Err(RpcError::Malformed("empty result array".into()));
        }

        let code = result[0]
            .as_i64()
            .ok_or_else(|| RpcError::Malformed(format!("non-integer status code: {}", result[0])))?;
        let data = if result.len() > 1 {
            Some(result.swap_remove(1))
        } else {
            None
        };

        Ok(RpcReply { code, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_shape() {
        let req = RpcRequest::call(7, ANONYMOUS_SESSION, "session", "login", json!({"username": "root"}));
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            json!({
                "jsonrpc": "2.0",
                "id": 7,
                "method": "call",
                "params": [ANONYMOUS_SESSION, "session", "login", {"username": "root"}]
            })
        );
    }

    #[test]
    fn test_reply_success_with_payload() {
        let resp: RpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0", "id": 1, "result": [0, {"board_name": "heltec,ht-hd01"}]
        }))
        .unwrap();
        let reply = resp.into_reply().unwrap();
        assert!(reply.is_success());
        assert_eq!(reply.data.unwrap()["board_name"], "heltec,ht-hd01");
    }

    #[test]
    fn test_reply_status_only() {
        let resp: RpcResponse =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": [6]})).unwrap();
        let reply = resp.into_reply().unwrap();
        assert_eq!(reply.code, 6);
        assert!(reply.data.is_none());
    }

    #[test]
    fn test_reply_fault_maps_to_code() {
        let resp: RpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0", "id": 1, "error": {"code": -32002, "message": "Access denied"}
        }))
        .unwrap();
        let reply = resp.into_reply().unwrap();
        assert_eq!(reply.code, -32002);
        assert!(!reply.is_success());
    }

    #[test]
    fn test_reply_malformed() {
        let resp: RpcResponse = serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1})).unwrap();
        assert!(matches!(resp.into_reply(), Err(RpcError::Malformed(_))));

        let resp: RpcResponse =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": ["zero"]})).unwrap();
        assert!(matches!(resp.into_reply(), Err(RpcError::Malformed(_))));
    }
}
