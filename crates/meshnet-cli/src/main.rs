//! MeshNet Command-Line Interface
//!
//! This CLI provides tools for:
//! - Simulating beacon waves over virtual mesh topologies
//! - Decoding captured L3 frames
//!
//! Real deployments wire `meshnet-core` to actual L2 drivers; this binary
//! exists to watch the protocol work without hardware.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use meshnet_core::simulation::{EntityId, MeshSimulator, SimConfig};
use meshnet_core::wire::Frame;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "meshnet")]
#[command(author, version, about = "MeshNet protocol simulator and frame tools", long_about = None)]
struct Cli {
    /// Enable verbose output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Topology {
    /// base - d0 - d1 - ... a single line of relays
    Chain,
    /// every device attached directly to the base
    Star,
}

#[derive(Subcommand)]
enum Commands {
    /// Run beacon waves over a virtual topology and print the result
    Simulate {
        /// Number of devices
        #[arg(short, long, default_value = "3")]
        devices: usize,

        /// How the devices are wired
        #[arg(short, long, value_enum, default_value = "chain")]
        topology: Topology,

        /// Number of beacon waves to run
        #[arg(short, long, default_value = "1")]
        waves: u32,

        /// Seed for the deterministic generators
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Decode a hex-encoded L3 frame
    Decode {
        /// Frame bytes as hex, e.g. 0275272211111111
        hex: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Simulate {
            devices,
            topology,
            waves,
            seed,
        } => simulate(devices, topology, waves, seed),
        Commands::Decode { hex } => decode(&hex),
    }
}

fn simulate(devices: usize, topology: Topology, waves: u32, seed: u64) -> Result<()> {
    if devices == 0 {
        bail!("need at least one device");
    }
    if devices > 200 {
        bail!("the 8-bit address space will not fit {} devices", devices);
    }

    let mut sim = MeshSimulator::new(SimConfig::default().with_seed(seed));
    match topology {
        Topology::Chain => {
            for index in 0..devices {
                sim.add_device(2);
                if index == 0 {
                    sim.connect((EntityId::Base, 0), (EntityId::Device(0), 0));
                } else {
                    sim.connect((EntityId::Device(index - 1), 1), (EntityId::Device(index), 0));
                }
            }
        }
        Topology::Star => {
            for index in 0..devices {
                sim.add_device(1);
                sim.connect(
                    (EntityId::Base, index as u8),
                    (EntityId::Device(index), 0),
                );
            }
        }
    }

    for wave in 0..waves {
        let nonce = sim.run_wave();
        info!(wave, nonce, "wave complete");
    }

    println!("{:<8} {:<8} {:<10} {:<8} {:<8}", "device", "joined", "address", "range", "routes");
    for index in 0..devices {
        let summary = sim.device(index).summary();
        let range = sim
            .assigned_range(index)
            .map(|(lo, hi)| format!("{}-{}", lo, hi))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<8} {:<8} {:<10} {:<8} {:<8}",
            index,
            summary.joined,
            summary
                .address
                .map(|a| a.to_string())
                .unwrap_or_else(|| "-".to_string()),
            range,
            summary.routes,
        );
    }

    let reports = sim.base().inbox.len();
    println!("\nbase received {} upstream frame(s)", reports);

    // Prove the data path with a ping to the deepest assigned device.
    if let Some(address) = (0..devices).rev().find_map(|i| sim.device(i).my_address()) {
        let delivered = sim.send_command_to(address, 1, b"ping");
        info!(address, delivered, "data-path check");
    }

    Ok(())
}

fn decode(hex: &str) -> Result<()> {
    let bytes = parse_hex(hex).context("invalid hex input")?;
    match Frame::parse(&bytes) {
        Ok(frame) => println!("{:#?}", frame),
        Err(err) => println!("undecodable frame ({} bytes): {}", bytes.len(), err),
    }
    Ok(())
}

fn parse_hex(input: &str) -> Result<Vec<u8>> {
    let cleaned: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    if cleaned.len() % 2 != 0 {
        bail!("odd number of hex digits");
    }
    (0..cleaned.len())
        .step_by(2)
        .map(|at| {
            u8::from_str_radix(&cleaned[at..at + 2], 16)
                .with_context(|| format!("bad hex byte at offset {}", at))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("0275 27:22").unwrap(), vec![0x02, 0x75, 0x27, 0x22]);
        assert!(parse_hex("abc").is_err());
        assert!(parse_hex("zz").is_err());
    }
}
