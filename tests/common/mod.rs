//! A fake OpenWrt ubus endpoint served over loopback HTTP.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;

use halowbench::rpc::{RpcRequest, RpcResponse};

const TOKEN: &str = "c0ffee00c0ffee00c0ffee00c0ffee00";
const UBUS_STATUS_PERMISSION_DENIED: i64 = 6;

pub struct FakeDevice {
    pub username: String,
    pub password: String,
    pub board: String,
    pub channel: u64,
    /// `iwinfo.assoclist` calls that report a noise floor of 0 before it
    /// settles.
    pub warmup_calls: usize,
    pub logins: AtomicUsize,
    pub assoclist_calls: AtomicUsize,
    pub requests: Mutex<Vec<RpcRequest>>,
}

impl FakeDevice {
    pub fn heltec() -> Self {
        Self {
            username: "admin".into(),
            password: "admin".into(),
            board: "heltec,ht-hd01".into(),
            channel: 100,
            warmup_calls: 2,
            logins: AtomicUsize::new(0),
            assoclist_calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn answer(&self, req: &RpcRequest) -> RpcResponse {
        let authorized = req.params.0 == TOKEN;
        let data = match (req.object(), req.ubus_method()) {
            ("session", "login") => {
                self.logins.fetch_add(1, Ordering::SeqCst);
                let args = req.args();
                if args["username"] == self.username.as_str() && args["password"] == self.password.as_str() {
                    json!({"ubus_rpc_session": TOKEN, "timeout": 300})
                } else {
                    return RpcResponse::status(req.id, UBUS_STATUS_PERMISSION_DENIED);
                }
            }
            _ if !authorized => return RpcResponse::status(req.id, UBUS_STATUS_PERMISSION_DENIED),
            ("session", "access") => json!({"access": true}),
            ("system", "board") => json!({"board_name": self.board, "model": "Heltec HT-HD01"}),
            ("iwinfo", "info") => json!({"channel": self.channel, "txpower": 21, "mode": "Client"}),
            ("iwinfo", "assoclist") => {
                let n = self.assoclist_calls.fetch_add(1, Ordering::SeqCst);
                let noise = if n < self.warmup_calls { 0 } else { -95 };
                json!({"results": [{
                    "mac": "00:11:22:33:44:55",
                    "signal": -62,
                    "signal_avg": -61,
                    "noise": noise,
                    "rx": {"mcs": 2, "short_gi": false, "mhz": 1},
                    "tx": {"mcs": 3, "short_gi": true, "mhz": 1}
                }]})
            }
            _ => return RpcResponse::status(req.id, 3),
        };
        RpcResponse::ok(req.id, data)
    }
}

async fn ubus(State(device): State<Arc<FakeDevice>>, Json(req): Json<RpcRequest>) -> Json<RpcResponse> {
    let response = device.answer(&req);
    device.requests.lock().unwrap().push(req);
    Json(response)
}

async fn broken() -> StatusCode {
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Serve `device` and return its `/ubus` URL.
pub async fn spawn_device(device: Arc<FakeDevice>) -> String {
    let app = Router::new().route("/ubus", post(ubus)).with_state(device);
    format!("http://{}/ubus", serve(app).await)
}

/// An endpoint that answers every request with HTTP 500.
pub async fn spawn_broken() -> String {
    let app = Router::new().route("/ubus", post(broken));
    format!("http://{}/ubus", serve(app).await)
}
