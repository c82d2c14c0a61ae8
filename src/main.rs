use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;

use pos_scale::serial::mock::{MockBehavior, MockConnector};
use pos_scale::serial::{PortConnector, SystemPorts};
use pos_scale::{ScaleConfig, ScaleDetector, ScaleRegistry, ScaleSession, Weight};

/// Port name used by `--simulate`.
const SIMULATED_PORT: &str = "SIM0";

#[derive(Parser)]
#[command(name = "pos-scale", version, about = "Read and detect serial POS scales")]
struct Cli {
    /// JSON config file with the scale port
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Use an in-memory scale instead of real serial ports
    #[arg(long, global = true)]
    simulate: bool,

    /// Increase log output (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List candidate ports in probing order
    Ports,
    /// Read the weight from the configured (or given) port
    Read {
        #[arg(short, long)]
        port: Option<String>,
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
    },
    /// Probe every port for a scale
    Detect {
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_millis()
        .init();

    let mut config = match &cli.config {
        Some(path) => ScaleConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ScaleConfig::default(),
    }
    .with_env_overrides();

    let connector: Arc<dyn PortConnector> = if cli.simulate {
        if config.port.is_none() {
            config.port = Some(SIMULATED_PORT.to_string());
        }
        Arc::new(MockConnector::new().with_port(
            SIMULATED_PORT,
            MockBehavior::Scale(Weight::from_hundredths(1_250)),
        ))
    } else {
        Arc::new(SystemPorts)
    };

    match cli.command {
        Command::Ports => {
            for port in ScaleDetector::new(connector).candidate_ports()? {
                println!("{}", port);
            }
        }
        Command::Read { port, count } => {
            let session = match port {
                Some(port) => Arc::new(
                    ScaleSession::open(&port, connector)
                        .with_context(|| format!("opening {}", port))?,
                ),
                None => {
                    let registry = ScaleRegistry::new(Arc::new(config), connector);
                    match registry.current().await? {
                        Some(session) => session,
                        None => bail!("no scale port configured; pass --port, --config or run `detect`"),
                    }
                }
            };
            for _ in 0..count {
                let weight = session.read_value().await;
                match session.last_error().await {
                    Some(error) => println!("{}: {} ({})", session.port_name(), weight, error),
                    None => println!("{}: {}", session.port_name(), weight),
                }
            }
            session.close().await;
        }
        Command::Detect { json } => {
            let registry = ScaleRegistry::new(Arc::new(config), connector);
            let report = registry.detect_report().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                match &report.port_name {
                    Some(port) => println!("Scale found on {}", port),
                    None => println!("No scale found ({} port(s) probed)", report.probes.len()),
                }
            }
            if let Some(session) = registry.take().await {
                session.close().await;
            }
        }
    }

    Ok(())
}
