//! Parley storage inspector.
//!
//! # Usage
//!
//! ```bash
//! # Live instances with decoded states
//! parley-inspect --db parley.redb instances
//!
//! # Parked waiting records
//! parley-inspect --db parley.redb waiting
//!
//! # Counts per protocol and state
//! parley-inspect --db parley.redb summary
//! ```

use std::collections::BTreeMap;

use clap::{Parser, Subcommand};
use parley_core::{
    ProtocolRegistry,
    one_to_one::{self, InvitationConfig},
};
use parley_engine::{RedbStorage, Storage};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Inspect a parley engine database
#[derive(Parser, Debug)]
#[command(name = "parley-inspect")]
#[command(about = "Inspect protocol instances and waiting records")]
#[command(version)]
struct Args {
    /// Path to the Redb database
    #[arg(long, default_value = "parley.redb")]
    db: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List live instances
    Instances,
    /// List waiting records
    Waiting,
    /// Count instances per protocol and state
    Summary,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let storage = RedbStorage::open(&args.db)?;
    let registry = one_to_one::registry(InvitationConfig::default())?;

    match args.command {
        Command::Instances => instances(&storage, &registry)?,
        Command::Waiting => waiting(&storage)?,
        Command::Summary => summary(&storage, &registry)?,
    }

    Ok(())
}

fn instances(
    storage: &RedbStorage,
    registry: &ProtocolRegistry,
) -> Result<(), Box<dyn std::error::Error>> {
    let rows = storage.list_instances()?;
    info!(count = rows.len(), "live instances");

    for (key, stored) in rows {
        let state = match registry.get(key.protocol) {
            Ok(hosted) => hosted
                .describe_state(&stored.state)
                .unwrap_or_else(|e| format!("<undecodable: {e}>")),
            Err(e) => format!("<{e}>"),
        };
        info!(%key, revision = stored.revision, updated_at = stored.updated_at_secs, %state);
    }

    Ok(())
}

fn waiting(storage: &RedbStorage) -> Result<(), Box<dyn std::error::Error>> {
    let records = storage.list_waiting()?;
    info!(count = records.len(), "waiting records");

    for record in records {
        info!(
            owned = %record.owned,
            remote = %record.remote,
            instance = %record.instance_key(),
            pending = %record.pending
        );
    }

    Ok(())
}

fn summary(
    storage: &RedbStorage,
    registry: &ProtocolRegistry,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut counts = BTreeMap::new();
    for (key, stored) in storage.list_instances()? {
        *counts.entry((key.protocol, stored.state.kind)).or_insert(0usize) += 1;
    }

    for ((protocol, state), count) in counts {
        let name = registry.get(protocol).map_or("unknown", |hosted| hosted.name());
        match registry.get(protocol).ok().and_then(|hosted| hosted.is_terminal(state)) {
            Some(true) => warn!(%protocol, name, %state, count, "terminal state persisted"),
            Some(false) => info!(%protocol, name, %state, count),
            None => warn!(%protocol, name, %state, count, "unknown state"),
        }
    }

    info!(waiting = storage.list_waiting()?.len(), "waiting records");

    Ok(())
}
