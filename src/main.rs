//! Bridge Transfer - stored transfer inspector
//!
//! Loads the configured transfer store and prints one line per transfer:
//!
//! ```text
//! <id>  <kind>  <status>  <completed steps>/<steps>  [withdrawable]  [failed step message]
//! ```
//!
//! Usage: `bridge_transfer [--env <name>]` (reads `config/<name>.yaml`, default `dev`).

use anyhow::{Context, Result};
use tracing::info;

use bridge_transfer::config::AppConfig;
use bridge_transfer::logging::init_logging;
use bridge_transfer::transfer::{JsonFileStore, Transfer, TransferSupervisor};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

fn summary(transfer: &Transfer) -> String {
    let steps = transfer.action().steps();
    let completed = steps.iter().filter(|s| s.is_completed()).count();
    let mut line = format!(
        "{}  {}  {:?}  {}/{}",
        transfer.id(),
        transfer.kind().as_str(),
        transfer.status(),
        completed,
        steps.len()
    );
    if transfer.withdrawable() && !transfer.is_withdrawn() {
        line.push_str("  withdrawable");
    }
    if let Some(message) = transfer.action().error_message() {
        line.push_str("  ");
        line.push_str(message);
    }
    line
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env).with_context(|| format!("loading config for {env}"))?;
    let _guard = init_logging(&config);

    let store = JsonFileStore::new(&config.store.path);
    let mut supervisor = TransferSupervisor::new();
    let loaded = supervisor
        .load(&store)
        .await
        .with_context(|| format!("reading {}", config.store.path))?;
    info!(env = %env, loaded, "Transfer store inspected");

    for transfer in supervisor.transfers() {
        println!("{}", summary(transfer));
    }
    Ok(())
}
