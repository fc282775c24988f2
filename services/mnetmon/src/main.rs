//! mnetmon - one-shot and polling access to an M-net turbine controller.
//!
//! Thin driver over the `mnet-protocol` client: every subcommand is a short
//! session against one controller, reachable through a transparent TCP
//! serial tunnel or (with the `serial` feature) a directly attached port.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{info, warn};

use mnet_protocol::types::{descriptor_by_name, known_points, points};
use mnet_protocol::{
    Averaging, ByteChannel, ClientConfig, Command as TurbineCommand, MnetClient, TcpChannel, Value,
};

/// Interval between controller clock syncs while monitoring
const TIME_SYNC_INTERVAL: Duration = Duration::from_secs(4 * 60 * 60);

#[derive(Parser)]
#[command(
    name = "mnetmon",
    version,
    about = "M-net client for WP3000/IC1000 wind turbine controllers"
)]
struct Cli {
    /// TCP serial-tunnel endpoint, e.g. 10.0.0.7:4001
    #[arg(long, global = true, env = "MNET_TCP")]
    tcp: Option<String>,

    /// Serial device, e.g. /dev/ttyUSB0
    #[cfg(feature = "serial")]
    #[arg(long, global = true, env = "MNET_SERIAL", conflicts_with = "tcp")]
    serial: Option<String>,

    /// Turbine node address
    #[arg(long, global = true, default_value = "1")]
    turbine: u8,

    /// Per-request timeout in milliseconds
    #[arg(long, global = true, default_value = "2000")]
    timeout_ms: u64,

    /// Retry budget for ordinary requests
    #[arg(long, global = true, default_value = "3")]
    retries: u32,

    /// Emit JSON instead of plain text
    #[arg(long, global = true)]
    json: bool,

    /// Verbose protocol logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read the turbine serial number
    Serial,

    /// List the known data points
    Points,

    /// Read a single data point
    Read {
        /// Point name (see `points`)
        point: String,

        /// Averaging window
        #[arg(long, default_value = "current")]
        avg: Averaging,
    },

    /// Read the standard monitoring set in one batch
    ReadAll,

    /// Send an operational command (logs in first)
    Command {
        /// start | stop | reset | manual-start
        command: TurbineCommand,
    },

    /// Read the controller clock
    TimeGet,

    /// Set the controller clock (logs in first)
    TimeSet {
        /// RFC 3339 instant; defaults to the host clock
        #[arg(long)]
        to: Option<DateTime<Utc>>,
    },

    /// Show the remote display contents
    Display,

    /// Read the event stack, newest first
    Events {
        #[arg(long, default_value = "10")]
        limit: u8,
    },

    /// Read the alarm history
    Alarms {
        /// Only alarms that have actually occurred
        #[arg(long)]
        only_occurred: bool,
    },

    /// Acknowledge an alarm (logs in first)
    Ack { sub_id: u16 },

    /// Poll the monitoring set continuously
    Monitor {
        /// Poll interval in seconds
        #[arg(long, default_value = "10")]
        interval: u64,

        /// Keep the controller clock synced while monitoring (logs in)
        #[arg(long)]
        sync_time: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "mnetmon=debug,mnet_protocol=trace"
    } else {
        "mnetmon=info,mnet_protocol=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();

    let channel = open_channel(&cli).await?;
    let config = ClientConfig {
        timeout: Duration::from_millis(cli.timeout_ms),
        max_retries: cli.retries,
        ..ClientConfig::default()
    };
    let client = MnetClient::new(channel, config);
    let dst = cli.turbine;

    match &cli.command {
        Commands::Serial => {
            let serial = client.get_serial_number(dst).await?;
            if cli.json {
                println!("{}", json!({ "serial": serial.as_u32() }));
            } else {
                println!("{serial}");
            }
        },

        Commands::Points => {
            for point in known_points() {
                if cli.json {
                    let windows: Vec<String> =
                        point.averagings.iter().map(|a| a.to_string()).collect();
                    println!(
                        "{}",
                        json!({ "name": point.name, "id": point.id.0, "averagings": windows })
                    );
                } else {
                    println!("{:20} {}", point.name, point.id);
                }
            }
        },

        Commands::Read { point, avg } => {
            let descriptor = descriptor_by_name(point)
                .with_context(|| format!("unknown point '{point}', try `mnetmon points`"))?;
            let value = client.request_data(dst, descriptor.id, *avg).await?;
            if cli.json {
                println!("{}", json!({ "point": point, "avg": avg.to_string(), "value": value }));
            } else {
                println!("{value}");
            }
        },

        Commands::ReadAll => {
            let snapshot = poll_snapshot(&client, dst).await?;
            print_snapshot(&snapshot, cli.json);
        },

        Commands::Command { command } => {
            client.login(dst).await?;
            client.send_command(dst, *command).await?;
            info!("command {} acknowledged", command);
        },

        Commands::TimeGet => {
            let t = client.get_controller_time(dst).await?;
            if cli.json {
                println!("{}", json!({ "controller_time": t.to_rfc3339() }));
            } else {
                println!("{}", t.format("%Y-%m-%d %H:%M:%S UTC"));
            }
        },

        Commands::TimeSet { to } => {
            let target = to.unwrap_or_else(Utc::now);
            client.login(dst).await?;
            client.set_controller_time(dst, target).await?;
            info!("controller clock set to {}", target.to_rfc3339());
        },

        Commands::Display => {
            for line in client.get_remote_display_text(dst).await? {
                println!("{line}");
            }
        },

        Commands::Events { limit } => {
            for event in client.get_events_batch(dst, *limit).await? {
                if cli.json {
                    println!("{}", serde_json::to_string(&event)?);
                } else {
                    println!("{event}");
                }
            }
        },

        Commands::Alarms { only_occurred } => {
            for alarm in client.get_alarm_history_batch(dst, *only_occurred).await? {
                if cli.json {
                    println!("{}", serde_json::to_string(&alarm)?);
                } else {
                    println!("{alarm}");
                }
            }
        },

        Commands::Ack { sub_id } => {
            client.login(dst).await?;
            client.acknowledge_alarm(dst, *sub_id).await?;
            info!("alarm {} acknowledged", sub_id);
        },

        Commands::Monitor {
            interval,
            sync_time,
        } => {
            run_monitor(&client, dst, Duration::from_secs(*interval), *sync_time, cli.json)
                .await?;
        },
    }

    Ok(())
}

async fn open_channel(cli: &Cli) -> Result<Box<dyn ByteChannel>> {
    if let Some(endpoint) = &cli.tcp {
        let (host, port) = endpoint
            .rsplit_once(':')
            .context("TCP endpoint must be host:port")?;
        let port: u16 = port.parse().context("invalid TCP port")?;
        let channel = TcpChannel::connect(host, port, Duration::from_secs(5)).await?;
        return Ok(Box::new(channel));
    }

    #[cfg(feature = "serial")]
    if let Some(path) = &cli.serial {
        let channel = mnet_protocol::SerialChannel::open(path)?;
        return Ok(Box::new(channel));
    }

    bail!("no transport given: pass --tcp host:port or --serial /dev/ttyUSB0");
}

/// The standard monitoring set: instantaneous electricals plus their
/// 1-minute averages and the active status pair.
const POLL_SET: &[(&str, mnet_protocol::DataId, Averaging)] = &[
    ("wind_speed_mps", points::WIND_SPEED, Averaging::Current),
    ("rotor_rpm", points::ROTOR_RPM, Averaging::Current),
    ("generator_rpm", points::GENERATOR_RPM, Averaging::Current),
    ("power_w", points::GRID_POWER, Averaging::Current),
    ("l1v", points::L1_VOLTAGE, Averaging::Current),
    ("l2v", points::L2_VOLTAGE, Averaging::Current),
    ("l3v", points::L3_VOLTAGE, Averaging::Current),
    ("power_w_1min", points::GRID_POWER, Averaging::Avg1Min),
    ("l1v_1min", points::L1_VOLTAGE, Averaging::Avg1Min),
    ("l2v_1min", points::L2_VOLTAGE, Averaging::Avg1Min),
    ("l3v_1min", points::L3_VOLTAGE, Averaging::Avg1Min),
    ("status", points::CURRENT_STATUS, Averaging::Current),
];

async fn poll_snapshot(client: &MnetClient, dst: u8) -> Result<Vec<(&'static str, Value)>> {
    let items: Vec<_> = POLL_SET.iter().map(|(_, id, avg)| (*id, *avg)).collect();
    let values = client.request_multiple_data(dst, &items).await?;
    Ok(POLL_SET
        .iter()
        .map(|(name, _, _)| *name)
        .zip(values)
        .collect())
}

fn print_snapshot(snapshot: &[(&'static str, Value)], as_json: bool) {
    if as_json {
        let mut object = serde_json::Map::new();
        object.insert("ts".into(), json!(Utc::now().to_rfc3339()));
        for (name, value) in snapshot {
            object.insert((*name).into(), json!(value));
        }
        println!("{}", serde_json::Value::Object(object));
    } else {
        for (name, value) in snapshot {
            println!("{name:16} {value}");
        }
    }
}

/// Polling loop: one task owns the client and alternates between the poll
/// tick and shutdown, syncing the controller clock on a slow cadence.
async fn run_monitor(
    client: &MnetClient,
    dst: u8,
    interval: Duration,
    sync_time: bool,
    as_json: bool,
) -> Result<()> {
    if sync_time {
        client.login(dst).await?;
        client.set_controller_time(dst, Utc::now()).await?;
        info!("controller clock synced");
    }

    let serial = client.get_serial_number(dst).await?;
    info!("monitoring turbine {} every {:?}", serial, interval);

    let mut poll_tick = tokio::time::interval(interval);
    let mut sync_tick = tokio::time::interval(TIME_SYNC_INTERVAL);
    sync_tick.reset(); // the initial sync already happened above

    loop {
        tokio::select! {
            _ = poll_tick.tick() => {
                match poll_snapshot(client, dst).await {
                    Ok(snapshot) => print_snapshot(&snapshot, as_json),
                    Err(e) => warn!("poll failed: {}", e),
                }
            },
            _ = sync_tick.tick(), if sync_time => {
                if let Err(e) = client.set_controller_time(dst, Utc::now()).await {
                    warn!("time sync failed: {}", e);
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            },
        }
    }
    Ok(())
}
