//! Device capability resolution: board -> interface, raw -> canonical channel,
//! channel -> bandwidth class -> load parameters.

pub mod resolve;
pub mod tables;

use serde::Serialize;
use thiserror::Error;

pub use resolve::resolve_device;
pub use tables::{
    BandwidthClass, BoardProfile, CapabilityTables, LoadParams, TelemetryCapabilities,
};

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("unknown board '{board}' (add it to [capabilities.boards])")]
    UnknownBoard { board: String },

    #[error("channel {channel} is not in the channel plan")]
    UnknownChannel { channel: u32 },

    #[error("board '{board}' has no load parameters for {mhz} MHz")]
    NoLoadParams { board: String, mhz: u32 },

    #[error("{mhz} MHz is not a valid bandwidth class")]
    InvalidBandwidth { mhz: u32 },

    #[error("channel {channel} appears under more than one bandwidth class")]
    AmbiguousChannel { channel: u32 },
}

/// The device under test, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceDescriptor {
    pub board: String,
    pub interface: String,
    pub raw_channel: u32,
    pub channel: u32,
    pub txpower_dbm: i32,
    pub bandwidth: BandwidthClass,
    pub load: LoadParams,
    pub telemetry: TelemetryCapabilities,
    pub noise_warmup_zero: bool,
}

impl DeviceDescriptor {
    /// Pure part of resolution, once the board and radio readings are known.
    pub fn from_readings(
        tables: &CapabilityTables,
        board_name: &str,
        raw_channel: u32,
        txpower_dbm: i32,
    ) -> Result<Self, CapabilityError> {
        let profile = tables.board(board_name)?;
        let channel = profile.canonical_channel(raw_channel);
        let bandwidth = tables.bandwidth_for(channel)?;
        let load = profile.load_params(bandwidth)?;

        Ok(Self {
            board: profile.board_name.clone(),
            interface: profile.interface.clone(),
            raw_channel,
            channel,
            txpower_dbm,
            bandwidth,
            load,
            telemetry: profile.telemetry,
            noise_warmup_zero: profile.noise_warmup_zero,
        })
    }

    /// `-b` argument for a UDP load generator, e.g. `2.28M`.
    pub fn udp_target_arg(&self) -> String {
        format!("{}M", self.load.udp_target_mbps)
    }

    /// `-w` argument for a TCP load generator, e.g. `75K`.
    pub fn tcp_window_arg(&self) -> String {
        format!("{}K", self.load.tcp_window_kb)
    }
}
