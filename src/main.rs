use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use halowbench::config::HalowBenchConfig;
use halowbench::orchestrator::ping_batch::parse_batch;
use halowbench::storage::artifacts::{ping_csv, telemetry_csv};

#[derive(Parser)]
#[command(
    name = "halowbench",
    about = "HaLow link characterization: iperf3 and ping campaigns with ubus radio telemetry",
    version,
    long_about = None
)]
struct Cli {
    /// Configuration file (defaults to $HALOWBENCH_CONFIG, then /etc/halowbench/halowbench.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every configured throughput campaign, then the latency campaign
    Run {
        /// Override the output root directory
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Authenticate, resolve the device under test and print its descriptor
    Device {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Take telemetry samples and print them as CSV
    Sample {
        /// Number of samples
        #[arg(long, default_value = "10")]
        count: usize,
    },

    /// Print the effective configuration as TOML, passwords masked
    Config,

    /// Validate a saved ping transcript as one batch and print its records
    ParsePing {
        /// File holding `ping -D` output
        file: PathBuf,

        /// Expected replies (defaults to ping.batch_size)
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

fn init_tracing(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => HalowBenchConfig::load(path)?,
        None => HalowBenchConfig::load_or_default(),
    };
    init_tracing(&config.logging.level, cli.json_logs);

    match cli.command {
        Commands::Run { output } => {
            if let Some(root) = output {
                config.output.root = root;
            }
            tracing::info!(rpc_url = %config.device.rpc_url, "Starting characterization run");
            let summary = halowbench::run(&config).await?;

            println!("\nResults written to {}", summary.directory.display());
            if summary.diagnostics.total() > 0 {
                println!("Discarded attempts:");
                for (campaign, count) in &summary.diagnostics.discards {
                    println!("  {:<15} : {}", campaign, count);
                }
            }
        }
        Commands::Device { json } => {
            let (_, _, device) = halowbench::connect(&config).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&device)?);
            } else {
                println!("{:<12} : {}", "Board", device.board);
                println!("{:<12} : {}", "Interface", device.interface);
                println!("{:<12} : {} (raw {})", "Channel", device.channel, device.raw_channel);
                println!("{:<12} : {} MHz", "Bandwidth", device.bandwidth);
                println!("{:<12} : {} dBm", "TX power", device.txpower_dbm);
                println!("{:<12} : {}", "UDP target", device.udp_target_arg());
                println!("{:<12} : {}", "TCP window", device.tcp_window_arg());
            }
        }
        Commands::Sample { count } => {
            let (_, samples) = halowbench::take_samples(&config, count).await?;
            print!("{}", telemetry_csv(&samples));
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config.redacted())?);
        }
        Commands::ParsePing { file, batch_size } => {
            let transcript = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let expected = batch_size.unwrap_or(config.ping.batch_size);
            let records = parse_batch(&transcript, expected)
                .map_err(|reason| anyhow::anyhow!("batch rejected: {reason}"))?;
            print!("{}", ping_csv(&records));
        }
    }

    Ok(())
}
