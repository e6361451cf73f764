//! Vehicle status management
//!
//! Adds vehicles, changes their access status and lists the store the gate
//! reads from.

use anpr_gate::domain::{VehicleStatus, VehicleStatusRecord};
use anpr_gate::io::{FileStatusStore, VehicleStatusStore};
use anyhow::bail;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "vehicles", version, about = "Manage the vehicle status store")]
struct Args {
    /// Path to the JSON status store
    #[arg(long, default_value = "vehicles.json")]
    store: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add or replace a vehicle
    Add {
        plate: String,
        #[arg(long, value_parser = parse_status)]
        status: VehicleStatus,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        remarks: Option<String>,
    },
    /// Change the status of an existing vehicle
    UpdateStatus {
        plate: String,
        #[arg(value_parser = parse_status)]
        status: VehicleStatus,
    },
    /// Print every vehicle, sorted by plate
    List,
}

fn parse_status(s: &str) -> Result<VehicleStatus, String> {
    s.parse()
}

/// Plates are stored exactly as the gate emits them: uppercase, no separators
fn plate_key(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let args = Args::parse();
    let store = FileStatusStore::open(&args.store)?;

    match args.command {
        Command::Add { plate, status, owner, remarks } => {
            let plate = plate_key(&plate);
            if plate.is_empty() {
                bail!("plate must contain letters or digits");
            }
            let mut record = VehicleStatusRecord::new(&plate, status);
            if let Some(owner) = owner.as_deref() {
                record = record.with_owner(owner);
            }
            if let Some(remarks) = remarks.as_deref() {
                record = record.with_remarks(remarks);
            }
            store.upsert(record)?;
            info!(plate = %plate, status = %status, "vehicle_added");
            println!("{plate} {status}");
        }
        Command::UpdateStatus { plate, status } => {
            let plate = plate_key(&plate);
            if !store.set_status(&plate, status)? {
                bail!("no vehicle with plate {plate} in {}", store.path().display());
            }
            info!(plate = %plate, status = %status, "vehicle_status_updated");
            println!("{plate} {status}");
        }
        Command::List => {
            for record in store.list()? {
                println!(
                    "{:<12} {:<12} {:<20} {}",
                    record.plate,
                    record.status,
                    record.owner_name.as_deref().unwrap_or("-"),
                    record.remarks.as_deref().unwrap_or("")
                );
            }
        }
    }

    Ok(())
}
