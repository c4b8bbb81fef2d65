use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing::info;

use super::{CapabilityTables, DeviceDescriptor};
use crate::rpc::{RpcTransport, Session, UbusClient};

/// Query the device over ubus and resolve its descriptor.
///
/// Checks the session may read the association list, then reads the board
/// name and the radio's channel and transmit power.
pub async fn resolve_device<T: RpcTransport>(
    client: &mut UbusClient<T>,
    session: &Session,
    tables: &CapabilityTables,
    retry_limit: u32,
) -> Result<DeviceDescriptor> {
    client
        .call_with_retry(
            session,
            "session",
            "access",
            json!({"scope": "ubus", "object": "iwinfo", "function": "assoclist"}),
            retry_limit,
            |v| v.get("access").and_then(Value::as_bool) == Some(true),
        )
        .await
        .context("session is not allowed to read iwinfo.assoclist")?;

    let board = client
        .call_with_retry(session, "system", "board", json!({}), retry_limit, |v| {
            v.get("board_name").and_then(Value::as_str).is_some()
        })
        .await
        .context("failed to query board identity")?;
    let board_name = board["board_name"].as_str().unwrap_or_default().to_string();

    let profile = tables.board(&board_name)?;

    let radio = client
        .call_with_retry(
            session,
            "iwinfo",
            "info",
            json!({"device": profile.interface}),
            retry_limit,
            |v| v.get("channel").and_then(Value::as_u64).is_some(),
        )
        .await
        .with_context(|| format!("failed to query channel of {}", profile.interface))?;

    let raw_channel = radio["channel"].as_u64().unwrap_or_default() as u32;
    let txpower_dbm = radio
        .get("txpower")
        .and_then(Value::as_i64)
        .unwrap_or_default() as i32;

    let descriptor = DeviceDescriptor::from_readings(tables, &board_name, raw_channel, txpower_dbm)?;
    info!(
        board = %descriptor.board,
        interface = %descriptor.interface,
        raw_channel,
        channel = descriptor.channel,
        bandwidth_mhz = descriptor.bandwidth.mhz(),
        txpower_dbm,
        "resolved device"
    );

    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::BandwidthClass;
    use crate::rpc::testing::ScriptedTransport;
    use crate::rpc::RpcResponse;

    fn device_api(board: &'static str, channel: u64) -> ScriptedTransport {
        ScriptedTransport::new(move |req| {
            let data = match (req.object(), req.ubus_method()) {
                ("session", "access") => json!({"access": true}),
                ("system", "board") => json!({"board_name": board, "model": "HaLow gateway"}),
                ("iwinfo", "info") => json!({"channel": channel, "txpower": 21, "mode": "Client"}),
                _ => return Ok(RpcResponse::status(req.id, 3)),
            };
            Ok(RpcResponse::ok(req.id, data))
        })
    }

    #[tokio::test]
    async fn test_resolve_translated_channel() {
        let mut client = UbusClient::new(device_api("heltec,ht-hd01", 100));
        let tables = CapabilityTables::default();

        let d = resolve_device(&mut client, &Session::new("s"), &tables, 3)
            .await
            .unwrap();
        assert_eq!(d.channel, 47);
        assert_eq!(d.bandwidth, BandwidthClass::Mhz1);
        assert_eq!(d.txpower_dbm, 21);

        let requests = client.transport().requests.lock().unwrap();
        let info = requests
            .iter()
            .find(|r| r.object() == "iwinfo")
            .unwrap();
        assert_eq!(info.args()["device"], "wlan0");
    }

    #[tokio::test]
    async fn test_resolve_unknown_channel_fails() {
        let mut client = UbusClient::new(device_api("heltec,ht-hd01", 99));
        let tables = CapabilityTables::default();

        let err = resolve_device(&mut client, &Session::new("s"), &tables, 3)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("channel 99"));
    }

    #[tokio::test]
    async fn test_resolve_denied_session_fails() {
        let transport = ScriptedTransport::new(|req| {
            Ok(RpcResponse::ok(req.id, json!({"access": false})))
        });
        let mut client = UbusClient::new(transport);

        let result = resolve_device(&mut client, &Session::new("s"), &CapabilityTables::default(), 2).await;
        assert!(result.is_err());
        assert_eq!(client.transport().calls_to("session", "access"), 2);
    }
}
