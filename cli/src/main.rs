// haven — operator CLI for the mesh relay engine
//
// `simulate` drives the scripted engine for demos without a reachable
// signaling service; `inspect` dumps a ledger from disk.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use haven_core::engine::{MeshDelegate, MeshService};
use haven_core::message::MeshMessage;
use haven_core::sim::{ScriptedEngine, SimScript};
use haven_core::store::MessageLedger;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "haven")]
#[command(about = "Haven — offline emergency mesh relay", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scripted simulation engine and print its notifications
    Simulate {
        /// How long to run, in seconds
        #[arg(short, long, default_value = "10")]
        seconds: u64,
        /// Send a local SOS this many seconds in
        #[arg(long)]
        sos_after: Option<u64>,
    },
    /// Print the records held in a message ledger
    Inspect {
        /// Path of the ledger directory
        path: String,
    },
}

struct Printer;

impl MeshDelegate for Printer {
    fn on_peer_change(&self, count: usize) {
        println!("peers: {count} active");
    }
    fn on_message(&self, message: &MeshMessage) {
        println!(
            "message {} ({:?}, priority {}, ttl {}, floor {}) from {}",
            message.msg_id, message.kind, message.priority, message.ttl, message.floor,
            message.sender_id
        );
    }
    fn on_sos(&self, message: &MeshMessage) {
        match message.sos_position() {
            Some(position) => println!(
                "SOS! {} at ({}, {}) floor {}",
                message.sender_id, position.lat, position.lng, message.floor
            ),
            None => println!("SOS! {} (no position)", message.sender_id),
        }
    }
    fn on_ack(&self, msg_id: &str) {
        println!("ack: {msg_id} delivered");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Simulate { seconds, sos_after } => cmd_simulate(seconds, sos_after).await,
        Commands::Inspect { path } => cmd_inspect(&path),
    }
}

async fn cmd_simulate(seconds: u64, sos_after: Option<u64>) -> Result<()> {
    let engine = ScriptedEngine::new(SimScript::default());
    engine.add_delegate(Arc::new(Printer));

    engine
        .start()
        .await
        .context("failed to start simulation")?;
    println!(
        "simulating as {} for {seconds}s (ctrl-c to quit early)",
        engine.local_sender_id()
    );

    if let Some(after) = sos_after {
        let engine = engine.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(after)).await;
            match engine.send_sos(37.7793, -122.4193, 2) {
                Ok(msg_id) => println!("sent local SOS {msg_id}"),
                Err(e) => eprintln!("SOS failed: {e}"),
            }
        });
    }

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
        _ = tokio::signal::ctrl_c() => println!("interrupted"),
    }

    engine.stop().await;
    Ok(())
}

fn cmd_inspect(path: &str) -> Result<()> {
    let ledger = MessageLedger::open(path).context("failed to open ledger")?;
    let mut records = ledger.records().context("failed to scan ledger")?;
    records.sort_by_key(|r| r.received_at);

    println!("{} record(s)", records.len());
    for record in records {
        println!(
            "{}  {:?}  priority {}  forwarded {}  {}  received_at {}",
            record.message.msg_id,
            record.kind,
            record.priority,
            record.forwarded_count,
            if record.delivered { "delivered" } else { "pending" },
            record.received_at,
        );
    }
    ledger.close();
    Ok(())
}
