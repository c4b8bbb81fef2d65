//! halowbench -- HaLow link characterization.
//!
//! Drives iperf3 throughput and ping latency campaigns against a device under
//! test while sampling its radio telemetry over ubus, and stores each
//! accepted trial's report next to the telemetry recorded during it.

pub mod config;
pub mod context;
pub mod device;
pub mod orchestrator;
pub mod rpc;
pub mod runner;
pub mod storage;
pub mod telemetry;
pub mod workload;

pub use config::HalowBenchConfig;
pub use runner::{connect, run, take_samples, RunSummary};
