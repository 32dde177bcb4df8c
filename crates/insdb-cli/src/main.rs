//! insdb
//!
//! Interactive browser for InstrumentDB catalogs. The database is either a
//! local snapshot (a directory holding `schema.json`, or the file itself) or
//! the URL of a remote server.

use anyhow::{anyhow, Result};
use clap::Parser;
use insdb_core::config::is_remote_location;
use insdb_core::{Backend, ConnectionConfig, LocalBackend};
use insdb_remote::RemoteBackend;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod complete;
mod render;
mod repl;
mod viewer;

use repl::{cmd_repl, cmd_repl_script, Shell};
use viewer::SystemViewer;

#[derive(Parser)]
#[command(name = "insdb")]
#[command(author, version, about = "Navigate an InstrumentDB catalog, local or remote")]
struct Cli {
    /// Snapshot directory, path to its `schema.json`, or server URL
    database: String,

    /// Entity to start in (path or UUID)
    entity: Option<String>,

    /// Run one command and exit
    #[arg(short = 'c', long = "command", value_name = "COMMAND")]
    command: Option<String>,

    /// Disable colored output
    #[arg(long)]
    no_colors: bool,

    /// Server user name (default: $INSDB_USERNAME)
    #[arg(short, long)]
    username: Option<String>,

    /// Server password (default: $INSDB_PASSWORD)
    #[arg(short, long)]
    password: Option<String>,

    /// Refuse every modification of a remote database
    #[arg(long)]
    read_only: bool,

    /// Where `download` stores data files
    #[arg(long, value_name = "DIR")]
    download_dir: Option<PathBuf>,

    /// Network timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn log_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    }
}

fn init_tracing(verbose: u8) {
    let level = log_level(verbose);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("insdb={level},insdb_core={level},insdb_remote={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn open_backend(cli: &Cli) -> Result<Arc<dyn Backend>> {
    if is_remote_location(&cli.database) {
        let mut config = ConnectionConfig::new(&cli.database);
        config.username = cli.username.clone();
        config.password = cli.password.clone();
        config.read_only = cli.read_only;
        config.download_dir = cli.download_dir.clone();
        config.timeout = Duration::from_secs(cli.timeout_secs);
        let backend = RemoteBackend::connect(&config.with_env_fallback())
            .map_err(|e| anyhow!("cannot connect to {}: {e}", cli.database))?;
        Ok(Arc::new(backend))
    } else {
        let backend = LocalBackend::open(&cli.database)
            .map_err(|e| anyhow!("cannot open {}: {e}", cli.database))?;
        Ok(Arc::new(backend))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.no_colors || !io::stdout().is_terminal() {
        colored::control::set_override(false);
    }

    let backend = open_backend(&cli)?;
    let mut shell = Shell::new(backend, Box::new(SystemViewer), io::stdout());
    if let Some(entity) = &cli.entity {
        shell.enter(entity)?;
    }

    match &cli.command {
        Some(command) => cmd_repl_script(&mut shell, std::slice::from_ref(command)),
        None => cmd_repl(shell),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_verbose_flag_enables_debug_logs() {
        assert_eq!(log_level(0), "warn");
        assert_eq!(log_level(1), "debug");
        assert_eq!(log_level(2), "trace");
        assert_eq!(log_level(7), "trace");
    }

    #[test]
    fn verbose_flags_are_counted() {
        let cli = Cli::try_parse_from(["insdb", "snapshot", "-vv"]).expect("valid arguments");
        assert_eq!(cli.verbose, 2);
    }
}
