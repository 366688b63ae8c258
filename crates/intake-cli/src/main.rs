//! intake - SFTP polling file intake
//!
//! Polls a remote directory, fetches new or modified files into a local
//! staging directory, processes each one and removes the local copy.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};

use intake_core::{init_logging, ProgressContext, Verbosity};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "intake")]
#[command(about = "Poll an SFTP directory and process new files")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "debug")]
    quiet: bool,

    /// Config file path (default: ./intake.toml or ~/.config/intake/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline until SIGINT/SIGTERM
    Run(cmd::run::RunArgs),
    /// List files recorded as seen
    Seen(cmd::seen::SeenArgs),
    /// Show effective configuration
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let progress = Arc::new(ProgressContext::new());
    let multi = if progress.is_tty() {
        Some(progress.multi())
    } else {
        None
    };
    init_logging(Verbosity::from_flags(cli.quiet, cli.debug), multi);

    let config = match load_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            log::error!("Configuration error: {e:#}");
            return ExitCode::from(2);
        }
    };

    let result = match cli.command {
        Command::Run(args) => cmd::run::run(args, &config, &progress),
        Command::Seen(args) => cmd::seen::run(args, &config),
        Command::Config => {
            show_config(&config);
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::from(2)
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path),
        None => Config::load(),
    }
}

fn secret(value: Option<&String>) -> &'static str {
    if value.is_some() {
        "configured"
    } else {
        "not set"
    }
}

fn show_config(config: &Config) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    let sftp = &config.sftp;
    let intake = &config.intake;
    table.add_row(vec![
        "Remote",
        &format!("{}@{}:{}", sftp.user, sftp.host, sftp.port),
    ]);
    table.add_row(vec!["Password", secret(sftp.password.as_ref())]);
    table.add_row(vec![
        "Private key",
        &sftp
            .private_key
            .as_ref()
            .map_or_else(|| "not set".to_string(), |p| p.display().to_string()),
    ]);
    table.add_row(vec!["Passphrase", secret(sftp.passphrase.as_ref())]);
    table.add_row(vec!["Host key policy", &format!("{:?}", sftp.host_key_policy)]);
    table.add_row(vec![
        "Known hosts",
        &sftp
            .known_hosts
            .as_ref()
            .map_or_else(|| "none".to_string(), |p| p.display().to_string()),
    ]);
    table.add_row(vec![
        "Connect timeout",
        &format!("{}s", sftp.connect_timeout_secs),
    ]);
    table.add_row(vec!["Remote directory", &intake.remote_directory]);
    table.add_row(vec![
        "Local directory",
        &intake.local_directory.display().to_string(),
    ]);
    table.add_row(vec!["File pattern", &intake.file_pattern]);
    table.add_row(vec!["Poll period", &format!("{}ms", intake.poll_period_ms)]);
    table.add_row(vec!["Max fetch", &intake.max_fetch_amount.to_string()]);
    table.add_row(vec![
        "Delete remote",
        if intake.delete_remote_files { "yes" } else { "no" },
    ]);
    table.add_row(vec!["Namespace", &intake.namespace]);
    table.add_row(vec![
        "Queue",
        &format!(
            "capacity {}, {} workers",
            config.queue.capacity, config.queue.workers
        ),
    ]);
    table.add_row(vec![
        "Metadata store",
        &config.store.path.display().to_string(),
    ]);

    eprintln!("\n{table}");
    if let Err(e) = config.validate() {
        eprintln!("Invalid: {e:#}");
    }
}
