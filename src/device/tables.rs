//! Static capability tables: boards, channel plans, and per-bandwidth load
//! parameters.
//!
//! The compiled-in defaults can be replaced wholesale from the `[capabilities]`
//! section of the config file. Once loaded the tables are never mutated.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::CapabilityError;

/// Channel width of an S1G channel, in MHz-equivalent units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum BandwidthClass {
    Mhz1,
    Mhz2,
    Mhz4,
    Mhz8,
    Mhz16,
}

impl BandwidthClass {
    pub const ALL: [BandwidthClass; 5] = [
        BandwidthClass::Mhz1,
        BandwidthClass::Mhz2,
        BandwidthClass::Mhz4,
        BandwidthClass::Mhz8,
        BandwidthClass::Mhz16,
    ];

    pub fn mhz(self) -> u32 {
        match self {
            BandwidthClass::Mhz1 => 1,
            BandwidthClass::Mhz2 => 2,
            BandwidthClass::Mhz4 => 4,
            BandwidthClass::Mhz8 => 8,
            BandwidthClass::Mhz16 => 16,
        }
    }
}

impl TryFrom<u32> for BandwidthClass {
    type Error = CapabilityError;

    fn try_from(mhz: u32) -> Result<Self, Self::Error> {
        match mhz {
            1 => Ok(BandwidthClass::Mhz1),
            2 => Ok(BandwidthClass::Mhz2),
            4 => Ok(BandwidthClass::Mhz4),
            8 => Ok(BandwidthClass::Mhz8),
            16 => Ok(BandwidthClass::Mhz16),
            other => Err(CapabilityError::InvalidBandwidth { mhz: other }),
        }
    }
}

impl From<BandwidthClass> for u32 {
    fn from(class: BandwidthClass) -> u32 {
        class.mhz()
    }
}

impl fmt::Display for BandwidthClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mhz())
    }
}

/// Which radio fields a board reports meaningfully in `iwinfo.assoclist`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryCapabilities {
    pub signal: bool,
    pub signal_avg: bool,
    pub noise: bool,
    pub rx_mcs: bool,
    pub rx_short_gi: bool,
    pub tx_mcs: bool,
    pub tx_short_gi: bool,
}

impl Default for TelemetryCapabilities {
    fn default() -> Self {
        Self {
            signal: true,
            signal_avg: true,
            noise: true,
            rx_mcs: true,
            rx_short_gi: true,
            tx_mcs: true,
            tx_short_gi: true,
        }
    }
}

/// Load-generator parameters for one bandwidth class on one board.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadParams {
    pub bandwidth_mhz: BandwidthClass,
    /// UDP target bitrate handed to `iperf3 -b`, in Mbit/s.
    pub udp_target_mbps: f64,
    /// TCP window handed to `iperf3 -w`, in KiB.
    pub tcp_window_kb: u32,
}

/// Everything board-specific the resolver and sampler need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardProfile {
    /// Value of `system.board` -> `board_name`.
    pub board_name: String,
    /// Radio interface queried through `iwinfo`.
    pub interface: String,
    /// Driver-internal channel index -> canonical channel. Channels missing
    /// from the map are already canonical.
    #[serde(default)]
    pub channel_map: Vec<ChannelTranslation>,
    /// The noise sensor reads 0 until it has settled.
    #[serde(default)]
    pub noise_warmup_zero: bool,
    #[serde(default)]
    pub telemetry: TelemetryCapabilities,
    pub load: Vec<LoadParams>,
}

impl BoardProfile {
    pub fn canonical_channel(&self, raw: u32) -> u32 {
        self.channel_map
            .iter()
            .find(|t| t.raw == raw)
            .map(|t| t.canonical)
            .unwrap_or(raw)
    }

    pub fn load_params(&self, class: BandwidthClass) -> Result<LoadParams, CapabilityError> {
        self.load
            .iter()
            .find(|p| p.bandwidth_mhz == class)
            .copied()
            .ok_or_else(|| CapabilityError::NoLoadParams {
                board: self.board_name.clone(),
                mhz: class.mhz(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelTranslation {
    pub raw: u32,
    pub canonical: u32,
}

/// A set of canonical channels sharing one bandwidth class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPlanEntry {
    pub bandwidth_mhz: BandwidthClass,
    pub channels: Vec<u32>,
}

/// The immutable capability asset loaded once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityTables {
    pub boards: Vec<BoardProfile>,
    pub channel_plan: Vec<ChannelPlanEntry>,
}

impl Default for CapabilityTables {
    fn default() -> Self {
        Self {
            boards: default_boards(),
            channel_plan: us_channel_plan(),
        }
    }
}

impl CapabilityTables {
    pub fn board(&self, board_name: &str) -> Result<&BoardProfile, CapabilityError> {
        self.boards
            .iter()
            .find(|b| b.board_name == board_name)
            .ok_or_else(|| CapabilityError::UnknownBoard {
                board: board_name.to_string(),
            })
    }

    pub fn bandwidth_for(&self, canonical_channel: u32) -> Result<BandwidthClass, CapabilityError> {
        self.channel_plan
            .iter()
            .find(|entry| entry.channels.contains(&canonical_channel))
            .map(|entry| entry.bandwidth_mhz)
            .ok_or(CapabilityError::UnknownChannel {
                channel: canonical_channel,
            })
    }

    /// Reject tables where one channel maps to two bandwidth classes.
    pub fn validate(&self) -> Result<(), CapabilityError> {
        let mut seen: BTreeMap<u32, BandwidthClass> = BTreeMap::new();
        for entry in &self.channel_plan {
            for &channel in &entry.channels {
                if let Some(previous) = seen.insert(channel, entry.bandwidth_mhz) {
                    if previous != entry.bandwidth_mhz {
                        return Err(CapabilityError::AmbiguousChannel { channel });
                    }
                }
            }
        }
        Ok(())
    }
}

// 802.11ah US channelization: channel n is centred on 902 + n/2 MHz.
fn us_channel_plan() -> Vec<ChannelPlanEntry> {
    vec![
        ChannelPlanEntry {
            bandwidth_mhz: BandwidthClass::Mhz1,
            channels: (1..=51).step_by(2).collect(),
        },
        ChannelPlanEntry {
            bandwidth_mhz: BandwidthClass::Mhz2,
            channels: (2..=50).step_by(4).collect(),
        },
        ChannelPlanEntry {
            bandwidth_mhz: BandwidthClass::Mhz4,
            channels: (8..=48).step_by(8).collect(),
        },
        ChannelPlanEntry {
            bandwidth_mhz: BandwidthClass::Mhz8,
            channels: vec![12, 28, 44],
        },
        ChannelPlanEntry {
            bandwidth_mhz: BandwidthClass::Mhz16,
            channels: vec![20],
        },
    ]
}

fn load_table(udp_mbps: [f64; 5], tcp_kb: [u32; 5]) -> Vec<LoadParams> {
    BandwidthClass::ALL
        .iter()
        .zip(udp_mbps.iter().zip(tcp_kb.iter()))
        .map(|(&bandwidth_mhz, (&udp_target_mbps, &tcp_window_kb))| LoadParams {
            bandwidth_mhz,
            udp_target_mbps,
            tcp_window_kb,
        })
        .collect()
}

fn default_boards() -> Vec<BoardProfile> {
    vec![
        BoardProfile {
            board_name: "heltec,ht-hd01".to_string(),
            interface: "wlan0".to_string(),
            channel_map: vec![ChannelTranslation {
                raw: 100,
                canonical: 47,
            }],
            noise_warmup_zero: true,
            telemetry: TelemetryCapabilities::default(),
            load: load_table([2.28, 5.3, 11.4, 14.8, 20.0], [75, 75, 100, 100, 150]),
        },
        BoardProfile {
            board_name: "morse,ekh01".to_string(),
            interface: "wlan0".to_string(),
            channel_map: Vec::new(),
            noise_warmup_zero: false,
            telemetry: TelemetryCapabilities {
                rx_short_gi: false,
                ..TelemetryCapabilities::default()
            },
            load: load_table([3.0, 6.5, 13.0, 18.0, 24.0], [64, 96, 128, 160, 192]),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_plan_is_unambiguous() {
        CapabilityTables::default().validate().unwrap();
    }

    #[test]
    fn test_bandwidth_lookup() {
        let tables = CapabilityTables::default();
        assert_eq!(tables.bandwidth_for(47).unwrap(), BandwidthClass::Mhz1);
        assert_eq!(tables.bandwidth_for(8).unwrap(), BandwidthClass::Mhz4);
        assert_eq!(tables.bandwidth_for(12).unwrap(), BandwidthClass::Mhz8);
        assert_eq!(tables.bandwidth_for(6).unwrap(), BandwidthClass::Mhz2);
        assert!(matches!(
            tables.bandwidth_for(99),
            Err(CapabilityError::UnknownChannel { channel: 99 })
        ));
    }

    #[test]
    fn test_load_params_vary_by_board() {
        let tables = CapabilityTables::default();
        let heltec = tables.board("heltec,ht-hd01").unwrap();
        let morse = tables.board("morse,ekh01").unwrap();

        let a = heltec.load_params(BandwidthClass::Mhz8).unwrap();
        assert_eq!(a.udp_target_mbps, 14.8);
        assert_eq!(a.tcp_window_kb, 100);

        let b = morse.load_params(BandwidthClass::Mhz8).unwrap();
        assert_ne!(a.udp_target_mbps, b.udp_target_mbps);
    }

    #[test]
    fn test_unknown_board() {
        let tables = CapabilityTables::default();
        assert!(matches!(
            tables.board("acme,router"),
            Err(CapabilityError::UnknownBoard { .. })
        ));
    }

    #[test]
    fn test_ambiguous_plan_rejected() {
        let mut tables = CapabilityTables::default();
        tables.channel_plan.push(ChannelPlanEntry {
            bandwidth_mhz: BandwidthClass::Mhz16,
            channels: vec![47],
        });
        assert!(matches!(
            tables.validate(),
            Err(CapabilityError::AmbiguousChannel { channel: 47 })
        ));
    }

    #[test]
    fn test_tables_from_toml() {
        let toml_str = r#"
[[boards]]
board_name = "acme,halow"
interface = "wlan1"
noise_warmup_zero = false
channel_map = [{ raw = 7, canonical = 3 }]
telemetry = { signal_avg = false }
load = [
    { bandwidth_mhz = 1, udp_target_mbps = 1.5, tcp_window_kb = 50 },
    { bandwidth_mhz = 2, udp_target_mbps = 3.0, tcp_window_kb = 60 },
]

[[channel_plan]]
bandwidth_mhz = 1
channels = [1, 3]
"#;
        let tables: CapabilityTables = toml::from_str(toml_str).unwrap();
        let board = tables.board("acme,halow").unwrap();
        assert_eq!(board.interface, "wlan1");
        assert_eq!(board.canonical_channel(7), 3);
        assert!(!board.telemetry.signal_avg);
        assert!(board.telemetry.tx_mcs);
        assert_eq!(tables.bandwidth_for(3).unwrap(), BandwidthClass::Mhz1);
        assert!(board.load_params(BandwidthClass::Mhz4).is_err());
    }

    #[test]
    fn test_bandwidth_rejects_unknown_width() {
        assert!(BandwidthClass::try_from(3).is_err());
        assert_eq!(BandwidthClass::try_from(16).unwrap(), BandwidthClass::Mhz16);
    }
}
