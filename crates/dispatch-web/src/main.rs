use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use dispatch_web::{run_web_server, WebError, WebState};
use dispatchd::{init_tracing, load_config, BootstrapError, DispatchError, DispatchService};

#[derive(Parser, Debug)]
#[command(name = "dispatch-web")]
#[command(version)]
#[command(about = "HTTP and live-update server for pickup dispatch")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config/dispatch.toml")]
    config: PathBuf,

    /// Listen address (overrides config and PORT)
    #[arg(long)]
    bind: Option<String>,

    /// SQLite database path (overrides config and DB_PATH)
    #[arg(long)]
    db: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
enum MainError {
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Web(#[from] WebError),
}

#[tokio::main]
async fn main() {
    init_tracing("info");
    if let Err(err) = run(Cli::parse()).await {
        tracing::error!(error = %err, "dispatch-web failed");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), MainError> {
    let mut config = load_config(&cli.config)?;
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(db) = cli.db {
        config.storage.sqlite_path = db;
    }

    let service = DispatchService::from_config(&config)?;
    tracing::info!(db = %config.storage.sqlite_path.display(), "dispatch service ready");
    let state = WebState::new(Arc::new(service));
    run_web_server(&config.server.bind, state).await?;
    Ok(())
}
