use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::select;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storydial::device::{parse_script, run_script, InputConfig};
use storydial::generation::ProviderRegistry;
use storydial::integration::{BridgeConfig, SelectorBridge};
use storydial::serial::SystemPorts;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "storydial", version, about = "Rotary character selector to bedtime story bridge")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "STORYDIAL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial ports, likely selectors first
    Ports,

    /// Connect to the selector and print a report for every commit
    Monitor {
        /// Serial port; auto-detect when omitted
        #[arg(short, long)]
        port: Option<String>,
    },

    /// Generate one story without a selector
    Generate {
        /// Character name from the roster
        character: String,
    },

    /// Run the selector firmware against a scripted input timeline
    Simulate {
        /// Script file: one `<ms> rotate <steps>|press|release` per line
        script: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storydial=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => BridgeConfig::load(path)?,
        None => BridgeConfig::default(),
    }
    .apply_env();

    match cli.command {
        Command::Ports => list_ports(config),
        Command::Monitor { port } => monitor(config, port),
        Command::Generate { character } => generate(config, &character),
        Command::Simulate { script } => simulate(config, &script),
    }
}

fn bridge(config: BridgeConfig) -> Result<SelectorBridge> {
    let bridge = SelectorBridge::new(config, Arc::new(SystemPorts), &ProviderRegistry::with_builtins())
        .map_err(|e| anyhow::anyhow!("{} ({})", e.user_message(), e))?;
    Ok(bridge)
}

fn list_ports(config: BridgeConfig) -> Result<()> {
    let bridge = bridge(config)?;
    let ports = storydial::serial::manager::detection_order(bridge.list_ports());
    for port in &ports {
        println!("{}", serde_json::to_string(port)?);
    }
    if ports.is_empty() {
        info!("No serial ports found");
    }
    Ok(())
}

fn monitor(config: BridgeConfig, port: Option<String>) -> Result<()> {
    let mut bridge = bridge(config)?;
    let info = bridge
        .connect(port.as_deref())
        .map_err(|e| anyhow::anyhow!("{} ({})", e.user_message(), e))?;
    info!("Selector found on {} ({})", info.name, info.description);
    bridge.start_monitoring()?;

    let reports = bridge.reports();
    let link_errors = bridge.link_errors();
    loop {
        select! {
            recv(reports) -> report => match report {
                Ok(report) => println!("{}", serde_json::to_string(&report)?),
                Err(_) => break,
            },
            recv(link_errors) -> error => {
                if let Ok(error) = error {
                    warn!("Giving up on selector: {}", error);
                }
                break;
            },
        }
    }

    bridge.shutdown();
    Ok(())
}

fn generate(config: BridgeConfig, character: &str) -> Result<()> {
    let bridge = bridge(config)?;
    let outcome = bridge.generate_for(character)?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

fn simulate(config: BridgeConfig, script: &Path) -> Result<()> {
    let text = std::fs::read_to_string(script)
        .with_context(|| format!("Cannot read script {}", script.display()))?;
    let steps = parse_script(&text)?;
    let input = InputConfig::default().with_character_count(config.characters.len());
    let report = run_script(&steps, config.characters, input);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
