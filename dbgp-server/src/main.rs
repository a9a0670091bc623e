// DBGP Server - run a script under an IDE debugger
//
// Connects to a listening IDE, announces the script and walks it statement
// by statement through the debug engine until it ends or the IDE stops it.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dbgp_engine::protocol::to_file_uri;
use dbgp_engine::{DbgpConnection, DbgpError};
use tracing::{info, warn};

mod config;
mod script;

use config::Cli;
use script::{Script, WalkerHost};

#[tokio::main]
async fn main() -> Result<()> {
    // Tracing to stderr only - stdout belongs to the debuggee
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dbgp_server=info,dbgp_engine=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.session_config()?;
    let script = Script::load(&cli.script)?;
    let host = Arc::new(WalkerHost::new(&script));

    info!("Starting debug session for {}", script.path);

    let connection = DbgpConnection::connect(
        &cli.host,
        cli.port,
        config,
        host.clone(),
        &to_file_uri(&script.path),
    )
    .await
    .with_context(|| format!("Failed to connect to IDE at {}:{}", cli.host, cli.port))?;

    let session = connection.session();
    let walker = tokio::task::spawn_blocking(move || script::execute(&session, &script, &host));

    match walker.await.context("Script thread panicked")? {
        Ok(()) => info!("Script finished"),
        Err(DbgpError::Terminated) => info!("Session terminated by IDE"),
        Err(e) => warn!("Script stopped: {}", e),
    }

    connection.closed().await;
    info!("DBGP server shutting down");
    Ok(())
}
