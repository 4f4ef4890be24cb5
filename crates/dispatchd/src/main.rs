use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use dispatch_core::types::{DriverId, JobId, NewDriver, NewJob};
use dispatchd::{init_tracing, load_config, open_store, BootstrapError, DispatchError, DispatchService};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(name = "dispatchd")]
#[command(version)]
#[command(about = "Surplus-food pickup dispatch from the command line")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true, default_value = "config/dispatch.toml")]
    config: PathBuf,

    /// SQLite database path (overrides config and DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database and tables
    Init,
    /// Load and validate the configuration, then print it
    CheckConfig,
    /// Job commands
    Jobs {
        #[command(subcommand)]
        command: JobCommand,
    },
    /// Driver roster commands
    Drivers {
        #[command(subcommand)]
        command: DriverCommand,
    },
}

#[derive(Subcommand, Debug)]
enum JobCommand {
    /// Post a new pickup job
    Create(CreateJobArgs),
    /// List jobs, newest first
    List {
        #[arg(long)]
        status: Option<String>,
    },
    /// Claim an open job for a driver
    Claim {
        job_id: JobId,
        #[arg(long)]
        driver: String,
    },
    /// Set a job's status
    Status { job_id: JobId, status: String },
    /// Attach a proof-of-pickup photo reference
    Photo { job_id: JobId, photo_path: String },
}

#[derive(Args, Debug)]
struct CreateJobArgs {
    #[arg(long)]
    title: String,
    #[arg(long)]
    location: String,
    #[arg(long)]
    food_type: Option<String>,
    #[arg(long)]
    expires_at: Option<String>,
    #[arg(long)]
    contact_name: Option<String>,
    #[arg(long)]
    contact_phone: Option<String>,
}

impl From<CreateJobArgs> for NewJob {
    fn from(args: CreateJobArgs) -> Self {
        NewJob {
            title: args.title,
            location: args.location,
            food_type: args.food_type,
            expires_at: args.expires_at,
            contact_name: args.contact_name,
            contact_phone: args.contact_phone,
        }
    }
}

#[derive(Subcommand, Debug)]
enum DriverCommand {
    /// Register a driver (idempotent by phone)
    Add {
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long)]
        phone: String,
    },
    /// List drivers, newest first
    List,
    /// Flip a driver's active flag
    Toggle { driver_id: DriverId },
}

#[derive(Debug, thiserror::Error)]
enum MainError {
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("failed to serialize output as json: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
}

fn main() {
    init_tracing("info");
    if let Err(err) = run(Cli::parse()) {
        tracing::error!(error = %err, "dispatchd failed");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), MainError> {
    let mut config = load_config(&cli.config)?;
    if let Some(db) = cli.db {
        config.storage.sqlite_path = db;
    }

    match cli.command {
        Command::Init => {
            open_store(&config.storage.sqlite_path)?;
            tracing::info!(path = %config.storage.sqlite_path.display(), "database initialized");
            Ok(())
        }
        Command::CheckConfig => print_json(&config),
        Command::Jobs { command } => {
            let service = DispatchService::from_config(&config)?;
            run_job_command(&service, command)
        }
        Command::Drivers { command } => {
            let service = DispatchService::from_config(&config)?;
            run_driver_command(&service, command)
        }
    }
}

fn run_job_command(service: &DispatchService, command: JobCommand) -> Result<(), MainError> {
    match command {
        JobCommand::Create(args) => print_json(&service.create_job(&args.into())?),
        JobCommand::List { status } => print_json(&service.list_jobs(status.as_deref())?),
        JobCommand::Claim { job_id, driver } => print_json(&service.claim(job_id, &driver)?),
        JobCommand::Status { job_id, status } => {
            print_json(&service.set_status(job_id, &status)?)
        }
        JobCommand::Photo { job_id, photo_path } => {
            print_json(&service.attach_photo(job_id, &photo_path)?)
        }
    }
}

fn run_driver_command(service: &DispatchService, command: DriverCommand) -> Result<(), MainError> {
    match command {
        DriverCommand::Add { name, phone } => {
            print_json(&service.register_driver(&NewDriver::new(name, phone))?)
        }
        DriverCommand::List => print_json(&service.list_drivers()?),
        DriverCommand::Toggle { driver_id } => print_json(&service.toggle_driver(driver_id)?),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), MainError> {
    let body =
        serde_json::to_string_pretty(value).map_err(|source| MainError::Serialize { source })?;
    println!("{body}");
    Ok(())
}
