use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;
mod controller;
mod engine;
mod library;
mod models;
mod session;
mod storage;
mod upload;

#[cfg(test)]
mod testing;

use config::Config;
use controller::{Controller, UploadOutcome};
use engine::EngineHandle;
use storage::Storage;

#[derive(Parser)]
#[command(name = "facematch", about = "Match faces from a camera against a labeled photo library")]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/facematch/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load models and the library, then read commands from stdin (default)
    Run,
    /// Build the reference library and print a summary
    Library,
    /// Add a photo to the library and rebuild it
    Upload {
        /// Label folder to save into
        #[arg(short, long)]
        folder: Option<String>,
        /// Photo to upload
        #[arg(short, long)]
        image: Option<PathBuf>,
        /// Root directory holding `library/` (prompted if omitted)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
    /// List V4L2 capture devices
    Devices,
}

/// Load every model, start the engine thread and wrap it in a controller.
async fn boot(config: &Config) -> Result<Controller<EngineHandle>> {
    let storage = Storage::new(config.fetch_timeout, config.fs_timeout)?;
    let models = models::fetch_models(&config.model_source, &config.model_cache_dir, &storage)
        .await
        .context("failed to load models")?;
    let engine = engine::spawn_engine(&models).context("failed to start inference engine")?;
    Ok(Controller::new(engine, storage, config))
}

/// Reject an incomplete upload form before any model or photo is loaded.
fn check_upload_form(folder: Option<&str>, image: Option<&Path>) -> Result<upload::ValidUpload> {
    upload::validate(folder.unwrap_or(""), image).map_err(|e| {
        println!("{}", upload::MSG_MISSING_INPUT);
        anyhow::Error::new(e).context("upload rejected")
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            tracing::info!("facematch starting");
            let mut controller = boot(&config).await?;
            if let Err(e) = controller.rebuild_library().await {
                tracing::error!(error = %e, "failed to build reference library; detection unavailable until an upload succeeds");
            }
            session::run(&mut controller).await?;
        }
        Commands::Library => {
            let mut controller = boot(&config).await?;
            let summary = controller
                .rebuild_library()
                .await
                .context("failed to build reference library")?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Upload { folder, image, dir } => {
            let form = check_upload_form(folder.as_deref(), image.as_deref())?;
            let mut controller = boot(&config).await?;
            if let Err(e) = controller.rebuild_library().await {
                tracing::warn!(error = %e, "existing library did not build");
            }

            let mut input = tokio::io::AsyncBufReadExt::lines(tokio::io::BufReader::new(
                tokio::io::stdin(),
            ));
            let mut root = dir;
            let mut picker = session::PromptPicker::new(&mut input, &mut root);
            let outcome = controller
                .upload(&form.folder, Some(&form.image), &mut picker)
                .await;
            if !matches!(outcome, UploadOutcome::Saved { .. }) {
                anyhow::bail!("upload failed");
            }
        }
        Commands::Devices => {
            let devices = facematch_hw::Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
    }

    Ok(())
}
