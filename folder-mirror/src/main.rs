use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Local;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use codex_folder_mirror::{
    CopyTransformer, EventLogger, FileLogger, MirrorConfig, NoopLogger, WatchSession,
};

/// Mirror a directory tree, processing every new file into a second tree.
#[derive(Debug, Parser)]
#[command(name = "codex-folder-mirror", version)]
struct Cli {
    /// TOML config file.
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Directory to watch.
    #[arg(long)]
    source: Option<PathBuf>,

    /// Directory receiving processed files.
    #[arg(long)]
    dest: Option<PathBuf>,

    /// Directory for the audit log file.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Number of workers.
    #[arg(long)]
    workers: Option<usize>,

    /// Disable the audit log.
    #[arg(long)]
    no_log: bool,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<MirrorConfig> {
        let mut config = match &self.config {
            Some(path) => MirrorConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => MirrorConfig::default(),
        };
        if let Some(source) = self.source {
            config.source_root = source;
        }
        if let Some(dest) = self.dest {
            config.dest_root = dest;
        }
        if let Some(log_dir) = self.log_dir {
            config.log_dir = log_dir;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if self.no_log {
            config.enable_logging = false;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Cli::parse().into_config()?;

    let logger: Arc<dyn EventLogger> = if config.enable_logging {
        let file = FileLogger::create_for_start(&config.log_dir, Local::now())
            .with_context(|| format!("creating log file in {}", config.log_dir.display()))?;
        info!("Writing audit log to {}", file.path().display());
        Arc::new(file)
    } else {
        Arc::new(NoopLogger)
    };

    let mut handle = WatchSession::from_config(&config, Arc::new(CopyTransformer), logger)?
        .start()
        .await?;

    let interrupted = tokio::select! {
        result = handle.stopped() => {
            if let Err(e) = result {
                error!("{e}");
                return Err(e.into());
            }
            false
        }
        _ = tokio::signal::ctrl_c() => true,
    };

    if interrupted {
        let summary = handle.stop().await?;
        info!(
            "Shut down: {} processed, {} deleted, {} failed",
            summary.materialized, summary.retired, summary.failed
        );
    }
    Ok(())
}
