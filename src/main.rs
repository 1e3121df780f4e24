mod config;
mod convert;
mod error;
mod immich;
mod names;
mod paths;
mod progress;
mod sync;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use convert::SipsConverter;
use immich::{AlbumProvider, ImmichClient};
use progress::ProgressTracker;
use std::path::PathBuf;
use std::sync::Arc;
use sync::Syncer;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "A tool to mirror Immich albums into a Jellyfin folder tree"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize with a default config file
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,

        /// Path to config file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Sync albums from Immich into the local folder tree
    Sync {
        /// Path to config file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Show configuration, connectivity, and album inventory
    Status {
        /// Path to config file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Init { force, config } => {
            init_config(config, *force)?;
            Ok(())
        }
        Commands::Sync { config } => run_sync(config).await,
        Commands::Status { config } => show_status(config).await,
    }
}

async fn run_sync(config_path_opt: &Option<PathBuf>) -> Result<()> {
    let config_data = load_config(config_path_opt)?;
    check_config(&config_data)?;

    println!("Syncing albums...");
    println!("Immich server: {}", config_data.api_url);
    println!("Sync directory: {}", config_data.sync_dir);

    let client = ImmichClient::new(&config_data.api_url, &config_data.api_key)?;
    let syncer = Syncer::new(
        PathBuf::from(&config_data.sync_dir),
        config_data.path_mappings.clone(),
        Arc::new(SipsConverter::new()),
    );

    // Ctrl-C cancels the run; an active conversion subprocess is killed.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling sync...");
            signal_cancel.cancel();
        }
    });

    let mut progress = ProgressTracker::new();
    let summary = syncer
        .run(&client, config_data.include_shared, &cancel, &mut progress)
        .await
        .context("Sync failed")?;

    println!("Sync completed successfully");
    println!("  Albums: {}", summary.albums);
    println!("  Symlinks created: {}", summary.links_created);
    println!(
        "  Converted: {} ({} rotated)",
        summary.converted, summary.rotated
    );
    println!("  Unchanged: {}", summary.unchanged);
    println!("  Errors: {}", summary.errors);

    Ok(())
}

async fn show_status(config_path_opt: &Option<PathBuf>) -> Result<()> {
    let config_data = load_config(config_path_opt)?;

    println!("immichAlbum2jellyfin Status");
    println!("\nConfiguration:");
    println!("  Immich server: {}", config_data.api_url);
    println!("  Sync directory: {}", config_data.sync_dir);
    println!("  Include shared albums: {}", config_data.include_shared);
    println!("  Path mappings:");
    for mapping in &config_data.path_mappings {
        println!("    {} -> {}", mapping.container, mapping.host);
    }

    let local_dirs = count_local_album_dirs(&config_data.sync_dir);
    println!("\nLocal album directories: {local_dirs}");

    if config_data.api_key.is_empty() {
        println!("\nAPI key not configured; skipping connection check");
        return Ok(());
    }

    let client = ImmichClient::new(&config_data.api_url, &config_data.api_key)?;
    if !client.test_connection().await {
        println!("\nCannot reach Immich at {}", config_data.api_url);
        return Ok(());
    }
    println!("\nConnected to Immich at {}", config_data.api_url);

    let albums = client
        .list_albums(config_data.include_shared)
        .await
        .context("Failed to list albums")?;
    println!("Remote albums: {}", albums.len());
    for album in &albums {
        println!("  {} ({} assets)", album.album_name, album.asset_count);
    }

    Ok(())
}

fn count_local_album_dirs(sync_dir: &str) -> usize {
    std::fs::read_dir(sync_dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
                .count()
        })
        .unwrap_or(0)
}

fn check_config(config: &Config) -> Result<()> {
    if config.api_key.is_empty() {
        anyhow::bail!("Immich API key is not configured. Edit the config file first.");
    }
    if config.sync_dir.is_empty() {
        anyhow::bail!("Sync directory is not configured. Edit the config file first.");
    }
    if config.path_mappings.is_empty() {
        anyhow::bail!("No path mappings configured. Edit the config file first.");
    }
    Ok(())
}

fn init_config(config_path_opt: &Option<PathBuf>, force: bool) -> Result<()> {
    let config_path = Config::get_config_path(config_path_opt);

    if config_path.exists() && !force {
        println!("Config file already exists at {}", config_path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    let config = Config::default();
    config
        .save_to_file(&config_path)
        .with_context(|| format!("Failed to write config to {}", config_path.display()))?;

    println!("Created config file at {}", config_path.display());
    Ok(())
}

fn load_config(config_path_opt: &Option<PathBuf>) -> Result<Config> {
    let config_path = Config::get_config_path(config_path_opt);

    if !config_path.exists() {
        anyhow::bail!(
            "Config file not found at {}. Run 'immichAlbum2jellyfin init' to create one.",
            config_path.display()
        );
    }

    Config::load_from_file(&config_path)
}
