use clap::Parser;
use reqwest::blocking::Client;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;
mod credentials;
mod error;
mod integrations;
mod models;
mod sync;
mod time_window;

use crate::config::{Config, Settings, config_path};
use crate::credentials::{CredentialStore, LoopbackAuthorizer, ensure_credential};
use crate::error::SyncError;

/// Mirror today's Google Calendar events into Taiga tasks.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Config file (defaults to $CALSYNC_CONFIG or the platform config dir)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log the tasks that would be created without contacting Taiga
    #[arg(long)]
    dry_run: bool,

    /// Print every known IANA timezone name and exit
    #[arg(long)]
    list_timezones: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    if cli.list_timezones {
        for tz in chrono_tz::TZ_VARIANTS {
            println!("{}", tz.name());
        }
        return ExitCode::SUCCESS;
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), SyncError> {
    let explicit = cli.config.is_some() || std::env::var_os("CALSYNC_CONFIG").is_some();
    let path = cli.config.unwrap_or_else(config_path);
    let mut config = Config::load(&path, explicit)?;
    config.apply_env(|key| std::env::var(key).ok());
    let settings = config.resolve()?;

    let client = build_client(&settings)?;
    let store = CredentialStore::new(&settings.google.token_path);
    let credential = ensure_credential(
        &client,
        &store,
        &settings.google.credentials_path,
        &LoopbackAuthorizer::default(),
    )?;

    let report = sync::run(&client, &settings, &credential.access_token, cli.dry_run);
    info!("{}", report.summary());
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn build_client(settings: &Settings) -> Result<Client, SyncError> {
    let mut builder = Client::builder();
    if let Some(seconds) = settings.http.timeout_seconds {
        builder = builder.timeout(Duration::from_secs(seconds));
    }
    builder.build().map_err(SyncError::request)
}
