//! `intake run` - poll the remote directory until interrupted

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use intake_core::{LoggingProcessor, SharedProgress, Shutdown};
use intake_sftp::{Pipeline, SftpConnector};
use intake_store::{DuckDbStore, MemoryStore, MetadataStore};

use crate::config::Config;

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Remote directory to poll
    #[arg(long)]
    pub remote_dir: Option<String>,

    /// Local staging directory
    #[arg(long)]
    pub local_dir: Option<PathBuf>,

    /// Filename glob, e.g. "*.csv"
    #[arg(short, long)]
    pub pattern: Option<String>,

    /// Poll period in milliseconds
    #[arg(long)]
    pub poll_ms: Option<u64>,

    /// Maximum files fetched per poll cycle
    #[arg(long)]
    pub max_fetch: Option<usize>,

    /// Number of processing workers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Delete remote files after a successful download
    #[arg(long)]
    pub delete_remote: bool,

    /// Keep seen-file records in memory only (nothing survives a restart)
    #[arg(long)]
    pub no_persist: bool,
}

impl RunArgs {
    /// Overlay command-line overrides on the loaded configuration.
    fn apply(&self, config: &mut Config) {
        if let Some(dir) = &self.remote_dir {
            config.intake.remote_directory = dir.clone();
        }
        if let Some(dir) = &self.local_dir {
            config.intake.local_directory = dir.clone();
        }
        if let Some(pattern) = &self.pattern {
            config.intake.file_pattern = pattern.clone();
        }
        if let Some(ms) = self.poll_ms {
            config.intake.poll_period_ms = ms;
        }
        if let Some(n) = self.max_fetch {
            config.intake.max_fetch_amount = n;
        }
        if let Some(n) = self.workers {
            config.queue.workers = n;
        }
        if self.delete_remote {
            config.intake.delete_remote_files = true;
        }
    }
}

pub fn run(args: RunArgs, config: &Config, progress: &SharedProgress) -> Result<()> {
    let mut config = config.clone();
    args.apply(&mut config);
    config.validate()?;

    let shutdown = Shutdown::new();
    shutdown
        .install_signal_handlers()
        .context("failed to install signal handlers")?;

    let store: Arc<dyn MetadataStore> = if args.no_persist {
        log::warn!("Seen-file records are kept in memory; a restart will refetch everything");
        Arc::new(MemoryStore::new())
    } else {
        let store = DuckDbStore::open(&config.store.path).with_context(|| {
            format!("failed to open metadata store {}", config.store.path.display())
        })?;
        Arc::new(store)
    };

    let connector = SftpConnector::new(config.sftp_settings()?);
    let pipeline = Pipeline::new(
        connector,
        store,
        config.pipeline_settings(),
        progress.clone(),
        shutdown,
    )?;

    let summary = pipeline.run(&LoggingProcessor)?;
    summary.log();
    Ok(())
}
