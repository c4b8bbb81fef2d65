//! Point-in-time radio telemetry from `iwinfo.assoclist`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::device::{DeviceDescriptor, TelemetryCapabilities};
use crate::rpc::{HttpTransport, RpcTransport, Session, UbusClient};

/// One radio snapshot. A `None` field is one the board does not report;
/// it is never stood in for by a sentinel reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Controller wall clock at arrival, nanoseconds since the Unix epoch.
    pub timestamp_ns: i64,
    pub rssi: Option<i32>,
    pub rssi_avg: Option<i32>,
    pub noise_floor: Option<i32>,
    pub rx_mcs: Option<u8>,
    pub rx_short_gi: Option<bool>,
    pub tx_mcs: Option<u8>,
    pub tx_short_gi: Option<bool>,
}

impl TelemetrySample {
    pub fn snr_db(&self) -> Option<i32> {
        Some(self.rssi? - self.noise_floor?)
    }

    /// Build a sample from one association record, dropping fields the board
    /// does not support.
    pub fn from_peer(peer: &AssocPeer, caps: &TelemetryCapabilities, timestamp_ns: i64) -> Self {
        fn keep<V>(supported: bool, value: Option<V>) -> Option<V> {
            if supported {
                value
            } else {
                None
            }
        }

        Self {
            timestamp_ns,
            rssi: keep(caps.signal, peer.signal),
            rssi_avg: keep(caps.signal_avg, peer.signal_avg),
            noise_floor: keep(caps.noise, peer.noise),
            rx_mcs: keep(caps.rx_mcs, peer.rx.mcs),
            rx_short_gi: keep(caps.rx_short_gi, peer.rx.short_gi),
            tx_mcs: keep(caps.tx_mcs, peer.tx.mcs),
            tx_short_gi: keep(caps.tx_short_gi, peer.tx.short_gi),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssocList {
    pub results: Vec<AssocPeer>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssocPeer {
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub signal: Option<i32>,
    #[serde(default)]
    pub signal_avg: Option<i32>,
    #[serde(default)]
    pub noise: Option<i32>,
    #[serde(default)]
    pub rx: RateInfo,
    #[serde(default)]
    pub tx: RateInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RateInfo {
    #[serde(default)]
    pub mcs: Option<u8>,
    #[serde(default)]
    pub short_gi: Option<bool>,
    #[serde(default)]
    pub mhz: Option<u32>,
}

/// Anything that can produce telemetry samples on demand.
#[async_trait::async_trait]
pub trait TelemetrySource: Send {
    async fn sample(&mut self) -> Result<TelemetrySample>;
}

/// The assoclist answer is usable: at least one peer and, on boards whose
/// noise sensor reads 0 while warming up, a non-zero noise floor.
pub fn assoclist_is_valid(payload: &Value, noise_warmup_zero: bool) -> bool {
    let Some(first) = payload
        .get("results")
        .and_then(Value::as_array)
        .and_then(|peers| peers.first())
    else {
        return false;
    };

    !noise_warmup_zero || first.get("noise").and_then(Value::as_i64) != Some(0)
}

/// Samples the single associated peer of the device under test.
pub struct TelemetrySampler<T = HttpTransport> {
    client: UbusClient<T>,
    session: Session,
    device: DeviceDescriptor,
    retry_limit: u32,
}

impl<T: RpcTransport> TelemetrySampler<T> {
    pub fn new(client: UbusClient<T>, session: Session, device: DeviceDescriptor, retry_limit: u32) -> Self {
        Self {
            client,
            session,
            device,
            retry_limit,
        }
    }

    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    pub fn into_client(self) -> UbusClient<T> {
        self.client
    }
}

#[async_trait::async_trait]
impl<T: RpcTransport> TelemetrySource for TelemetrySampler<T> {
    async fn sample(&mut self) -> Result<TelemetrySample> {
        let warmup = self.device.noise_warmup_zero;
        let payload = self
            .client
            .call_with_retry(
                &self.session,
                "iwinfo",
                "assoclist",
                json!({"device": self.device.interface}),
                self.retry_limit,
                move |v| assoclist_is_valid(v, warmup),
            )
            .await
            .context("failed to sample link telemetry")?;
        let timestamp_ns = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();

        let list: AssocList =
            serde_json::from_value(payload).context("unexpected iwinfo.assoclist payload")?;
        let peer = list
            .results
            .first()
            .context("iwinfo.assoclist returned no peers")?;

        Ok(TelemetrySample::from_peer(peer, &self.device.telemetry, timestamp_ns))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::device::CapabilityTables;
    use crate::rpc::testing::ScriptedTransport;
    use crate::rpc::RpcResponse;

    fn peer_json(noise: i64) -> Value {
        json!({
            "results": [{
                "mac": "00:11:22:33:44:55",
                "signal": -62,
                "signal_avg": -61,
                "noise": noise,
                "rx": {"mcs": 3, "short_gi": false, "mhz": 1},
                "tx": {"mcs": 4, "short_gi": true, "mhz": 1}
            }]
        })
    }

    fn device(board: &str, raw_channel: u32) -> DeviceDescriptor {
        DeviceDescriptor::from_readings(&CapabilityTables::default(), board, raw_channel, 21).unwrap()
    }

    #[test]
    fn test_snr() {
        let peer: AssocPeer = serde_json::from_value(peer_json(-95)["results"][0].clone()).unwrap();
        let s = TelemetrySample::from_peer(&peer, &TelemetryCapabilities::default(), 1);
        assert_eq!(s.snr_db(), Some(33));
        assert_eq!(s.tx_short_gi, Some(true));
        assert_eq!(s.rx_mcs, Some(3));
    }

    #[test]
    fn test_unsupported_fields_are_absent() {
        let peer: AssocPeer = serde_json::from_value(peer_json(-95)["results"][0].clone()).unwrap();
        let caps = TelemetryCapabilities {
            noise: false,
            rx_short_gi: false,
            ..TelemetryCapabilities::default()
        };
        let s = TelemetrySample::from_peer(&peer, &caps, 1);
        assert_eq!(s.noise_floor, None);
        assert_eq!(s.rx_short_gi, None);
        assert_eq!(s.snr_db(), None);
        assert_eq!(s.rssi, Some(-62));
    }

    #[test]
    fn test_validity_predicate() {
        assert!(!assoclist_is_valid(&json!({"results": []}), false));
        assert!(!assoclist_is_valid(&json!({}), false));
        assert!(assoclist_is_valid(&peer_json(0), false));
        assert!(!assoclist_is_valid(&peer_json(0), true));
        assert!(assoclist_is_valid(&peer_json(-95), true));
    }

    #[tokio::test]
    async fn test_sampler_waits_out_noise_warmup() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let transport = ScriptedTransport::new(move |req| {
            let n = seen.fetch_add(1, Ordering::SeqCst);
            let noise = if n < 2 { 0 } else { -95 };
            Ok(RpcResponse::ok(req.id, peer_json(noise)))
        });

        let mut sampler = TelemetrySampler::new(
            UbusClient::new(transport),
            Session::new("s"),
            device("heltec,ht-hd01", 8),
            5,
        );
        let before = chrono::Utc::now().timestamp_nanos_opt().unwrap();
        let sample = sampler.sample().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(sample.noise_floor, Some(-95));
        assert!(sample.timestamp_ns >= before);
    }

    #[tokio::test]
    async fn test_sampler_masks_board_capabilities() {
        let transport = ScriptedTransport::new(|req| Ok(RpcResponse::ok(req.id, peer_json(-90))));
        let mut sampler = TelemetrySampler::new(
            UbusClient::new(transport),
            Session::new("s"),
            device("morse,ekh01", 8),
            5,
        );

        let sample = sampler.sample().await.unwrap();
        assert_eq!(sample.rx_short_gi, None);
        assert_eq!(sample.tx_short_gi, Some(true));
    }

    #[tokio::test]
    async fn test_sampler_exhaustion_is_error() {
        let transport = ScriptedTransport::new(|req| Ok(RpcResponse::ok(req.id, json!({"results": []}))));
        let mut sampler = TelemetrySampler::new(
            UbusClient::new(transport),
            Session::new("s"),
            device("morse,ekh01", 8),
            3,
        );

        assert!(sampler.sample().await.is_err());
    }
}
