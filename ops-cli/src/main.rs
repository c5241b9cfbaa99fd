//! reliefwatch: operator tooling for a field device's offline store
//!
//! Every command opens the local database with the named user's data key.
//! Only `sync` talks to the server and needs a session token.

mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use reliefwatch_sync::{
    HttpRemoteApi, KeyVault, LocalDatabase, SyncEngine, SyncSettings, SystemClock,
};
use tracing::info;

use commands::Command;

#[derive(Debug, Parser)]
#[command(name = "reliefwatch")]
#[command(about = "Inspect and operate the ReliefWatch offline sync store")]
#[command(version)]
struct Cli {
    /// Path to a YAML or TOML settings file
    #[arg(short, long, env = "RELIEFWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// User whose data key unlocks the store
    #[arg(short, long, env = "RELIEFWATCH_USER")]
    user: String,

    /// Bearer token for the sync server
    #[arg(long, env = "RELIEFWATCH_SESSION_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = SyncSettings::load(cli.config.as_deref()).context("failed to load settings")?;
    logger_redacted::init_tracing(&settings.logging).context("failed to initialise logging")?;

    let clock = Arc::new(SystemClock);
    let db = LocalDatabase::open(
        settings.database.clone(),
        settings.sensitivity.clone(),
        clock.clone(),
    )
    .await
    .with_context(|| format!("failed to open {}", settings.database.db_path.display()))?;

    let fingerprint = KeyVault::for_database(&db)
        .open_session(&db, &cli.user)
        .await
        .context("failed to unlock the data key")?;
    info!(user_id = %cli.user, key_fingerprint = %fingerprint, "Store unlocked");

    let remote = HttpRemoteApi::new(&settings.remote).context("failed to build the HTTP client")?;
    let engine = SyncEngine::new(Arc::new(db), Arc::new(remote), clock, settings);

    let output = commands::execute(&engine, &cli.user, cli.token, cli.command).await?;
    println!("{output}");
    Ok(())
}
