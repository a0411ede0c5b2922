use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use vibemon_core::{
    BtleTransport, ConnectionManager, ManagerConfig, PeripheralFilter, SensorEvent,
};
use vibemon_types::{AxisMask, ControlFrame, ProtocolRevision};

mod csv_sink;

use csv_sink::CsvSink;

#[derive(Parser)]
#[command(name = "vibemon")]
#[command(author, version, about = "Monitor for BLE vibration sensors", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a sensor and stream its frames until Ctrl-C
    Monitor {
        /// Match the sensor by advertised name
        #[arg(short, long)]
        name: Option<String>,

        /// Match the sensor by address
        #[arg(short, long)]
        address: Option<String>,

        /// Protocol revision the sensor speaks (v1, v2)
        #[arg(short, long, default_value = "v2")]
        revision: Revision,

        /// Scan window in seconds
        #[arg(long, default_value = "10")]
        scan_window: u64,

        /// Print events as JSON lines instead of text
        #[arg(long)]
        json: bool,

        /// Append data frames to a CSV file
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Push this filter coefficient once the connection is active
        #[arg(long)]
        set_filter: Option<f32>,

        /// Push this axis mask once the connection is active (e.g. "xz")
        #[arg(long)]
        set_axes: Option<Axes>,
    },
}

#[derive(Clone, Copy)]
struct Revision(ProtocolRevision);

impl FromStr for Revision {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "v1" | "1" => Ok(Revision(ProtocolRevision::V1)),
            "v2" | "2" => Ok(Revision(ProtocolRevision::V2)),
            other => bail!("unknown revision '{}', expected v1 or v2", other),
        }
    }
}

#[derive(Clone, Copy)]
struct Axes(AxisMask);

impl FromStr for Axes {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut mask = AxisMask::OFF;
        for c in s.chars() {
            match c.to_ascii_lowercase() {
                'x' => mask |= AxisMask::X,
                'y' => mask |= AxisMask::Y,
                'z' => mask |= AxisMask::Z,
                other => bail!("unknown axis '{}', expected a subset of xyz", other),
            }
        }
        Ok(Axes(mask))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Monitor {
            name,
            address,
            revision,
            scan_window,
            json,
            csv,
            set_filter,
            set_axes,
        } => {
            let peripheral_filter = match (name, address) {
                (Some(name), _) => PeripheralFilter::by_name(name),
                (None, Some(address)) => PeripheralFilter::by_address(address),
                (None, None) => PeripheralFilter::any(),
            };
            let config = ManagerConfig::new()
                .revision(revision.0)
                .filter(peripheral_filter)
                .scan_window(Duration::from_secs(scan_window));

            let transport = Arc::new(
                BtleTransport::new()
                    .await
                    .context("opening Bluetooth adapter")?,
            );
            let manager = ConnectionManager::new(transport, config)?;

            if let Some(path) = csv {
                let sink = CsvSink::create(&path)
                    .with_context(|| format!("opening {}", path.display()))?;
                manager.add_sink(Box::new(sink)).await?;
            }

            let mut events = manager.events();
            manager.start().await?;

            let mut control = match (set_filter, set_axes) {
                (None, None) => None,
                (Some(filter), Some(axes)) => Some(ControlFrame::new(filter, axes.0)),
                _ => bail!("--set-filter and --set-axes must be used together"),
            };

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("stopping");
                        break;
                    }
                    event = events.recv() => {
                        let Ok(event) = event else { break };
                        if json {
                            println!("{}", serde_json::to_string(&event)?);
                        } else {
                            print_event(&event);
                        }
                        // One-shot configuration push on the first Active.
                        if matches!(
                            &event,
                            SensorEvent::ConnectionStateChanged {
                                state: vibemon_core::ConnectionState::Active
                            }
                        ) {
                            if let Some(frame) = control.take() {
                                if let Err(e) = manager.set_control(frame).await {
                                    tracing::warn!(error = %e, "control push failed");
                                }
                            }
                        }
                    }
                }
            }

            manager.stop().await.ok();
            manager.shutdown().await?;
        }
    }

    Ok(())
}

fn print_event(event: &SensorEvent) {
    match event {
        SensorEvent::ConnectionStateChanged { state } => {
            println!("state: {}", state);
        }
        SensorEvent::StatusUpdate { status } => {
            println!(
                "status: filter={:.2} axes={} rates={:?} rpm",
                status.filter, status.axes, status.channel_rates
            );
        }
        SensorEvent::DataUpdate { data } => {
            let bins = data
                .spectrum
                .as_ref()
                .map(|s| s.magnitudes.len())
                .unwrap_or(0);
            println!(
                "data: rate={:.2} battery={}% channels={:?} spectrum_bins={}",
                data.primary_rate, data.battery_percent, data.channel_magnitudes, bins
            );
        }
        SensorEvent::SignalStrength { rssi } => {
            println!("rssi: {} dBm", rssi);
        }
        SensorEvent::LogMessage { message } => {
            println!("log: {}", message);
        }
        _ => {}
    }
}
