use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::error;

use cdc_batch_loader::config::Settings;
use cdc_batch_loader::error::{is_fatal, FatalError};
use cdc_batch_loader::loader::Loader;
use cdc_batch_loader::sql::CommandLineExecutor;
use cdc_batch_loader::store::{DiskLocalStore, DiskStagingStore};

#[derive(Parser, Clone)]
#[command(about = "Loads change-data-capture extract batches into an analytical store")]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Run a single poll cycle instead of polling forever
    #[arg(long)]
    once: bool,

    /// Quiet mode, warnings and errors only
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    let filter = if args.quiet {
        EnvFilter::new("cdc_batch_loader=warn")
    } else {
        EnvFilter::new("cdc_batch_loader=info")
    };
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let settings = load_settings(&args.config).await?;
    if settings.sql_command.is_empty() {
        return Err(FatalError::config(
            "sql_command must be configured with the engine client command",
        ));
    }

    // Any error not classified as fatal triggers a backoff and a full
    // restart of the cycle; the control files on disk make the retry resume
    // at the correct step.
    loop {
        let loader = Loader::new(
            settings.clone(),
            Arc::new(DiskLocalStore),
            Arc::new(DiskStagingStore),
            Arc::new(CommandLineExecutor::from_command(&settings.sql_command)?),
        )
        .await?;

        if args.once {
            loader.prepare().await?;
            loader.run_once().await?;
            return Ok(());
        }

        match loader.run().await {
            Ok(()) => return Ok(()),
            Err(e) if is_fatal(&e) => return Err(e),
            Err(e) => {
                error!("cycle failed, retrying after backoff: {e:#}");
                tokio::time::sleep(settings.failure_backoff()).await;
            }
        }
    }
}

async fn load_settings(path: &PathBuf) -> anyhow::Result<Settings> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(anyhow::Error::new(FatalError::MissingFile(path.clone())));
        }
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&content).map_err(|e| {
        FatalError::config(format!(
            "configuration file {} could not be parsed: {e}",
            path.display()
        ))
    })
}
