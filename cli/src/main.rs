mod settings;

use anyhow::{Context, Result};
use asset_storage::{open_backend, MigrationCoordinator};
use clap::{Parser, Subcommand};
use collection_fetch::{Downloader, HttpFetcher, UnsplashProvider};
use gallery::{CollectionChoice, Gallery};
use serde::Serialize;
use settings::AppConfig;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "imagehoard")]
#[command(about = "Download image collections, generate thumbnails and serve resized derivatives")]
#[command(version)]
struct Cli {
    /// Configuration file layered over the defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search, download and thumbnail one collection per term
    Fetch {
        #[arg(required = true)]
        terms: Vec<String>,

        /// Also write `<term>.zip`
        #[arg(long)]
        zip: bool,
    },

    /// Generate missing thumbnails
    Thumbnails {
        /// Only this collection (default: all)
        #[arg(short, long)]
        collection: Option<String>,
    },

    /// Crop-to-fill derivative of one asset
    Resize {
        asset_key: String,
        width: u32,
        height: u32,
    },

    /// Pick a random asset, optionally resized
    Random {
        #[arg(short, long)]
        collection: Option<String>,

        #[arg(long, requires = "height")]
        width: Option<u32>,

        #[arg(long, requires = "width")]
        height: Option<u32>,
    },

    /// Print asset listings as JSON
    List {
        #[arg(short, long)]
        collection: Option<String>,
    },

    /// Copy every object to the backend described by another config file
    Migrate {
        #[arg(long)]
        to: PathBuf,
    },

    /// Zip a collection's assets
    Archive { collection: String },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = AppConfig::load(cli.config.as_deref())?;
    let storage = open_backend(&config.storage)
        .with_context(|| format!("Failed to open {} storage", config.storage.kind()))?;
    tracing::info!(backend = storage.name(), "Storage ready");

    let gallery = Gallery::new(
        storage.clone(),
        config.thumbnails.clone(),
        config.derivatives.clone(),
        config.selection.clone(),
    );

    match cli.command {
        Commands::Fetch { terms, zip } => fetch(gallery, &config, terms, zip).await,
        Commands::Thumbnails { collection } => {
            let reports = match collection {
                Some(collection) => vec![gallery.pipeline().run(&collection).await?],
                None => gallery.warm_thumbnails().await?,
            };
            print_json(&reports)
        }
        Commands::Resize {
            asset_key,
            width,
            height,
        } => {
            let key = gallery
                .resize(&asset_key, width, height)
                .await
                .with_context(|| format!("Failed to resize {}", asset_key))?;
            println!("{}", key);
            Ok(())
        }
        Commands::Random {
            collection,
            width,
            height,
        } => {
            let choice = CollectionChoice::from(collection);
            let asset = gallery
                .selector()
                .pick(&choice, config.selection.max_retries)
                .await?;
            let key = match (width, height) {
                (Some(width), Some(height)) => gallery.resize(&asset, width, height).await?,
                _ => asset,
            };
            println!("{}", key);
            Ok(())
        }
        Commands::List { collection } => match collection {
            Some(collection) => print_json(&gallery.listing(&collection).await?),
            None => print_json(&gallery.listings().await?),
        },
        Commands::Migrate { to } => {
            let target = AppConfig::from_file(&to)?;
            let destination = open_backend(&target.storage)
                .with_context(|| format!("Failed to open {} storage", target.storage.kind()))?;
            migrate(storage.as_ref(), destination.as_ref()).await
        }
        Commands::Archive { collection } => {
            let key = gallery
                .build_archive(&collection)
                .await
                .with_context(|| format!("Failed to archive {}", collection))?;
            println!("{}", key);
            Ok(())
        }
    }
}

async fn fetch(gallery: Gallery, config: &AppConfig, terms: Vec<String>, zip: bool) -> Result<()> {
    let provider = UnsplashProvider::new(&config.fetch)
        .context("Set fetch.unsplash_access_key or UNSPLASH_ACCESS_KEY")?;
    let downloader = Downloader::new(
        gallery.storage().clone(),
        Arc::new(provider),
        Arc::new(HttpFetcher::new()),
        config.fetch.concurrency,
    );
    let gallery = gallery.with_downloader(downloader);

    for term in terms {
        let report = gallery
            .spawn_refresh(&term)
            .await?
            .with_context(|| format!("Failed to fetch {}", term))?;
        print_json(&report)?;

        if zip {
            let key = gallery.build_archive(&term).await?;
            tracing::info!(key = %key, "Created zip file");
        }
    }
    Ok(())
}

async fn migrate(
    source: &dyn asset_storage::StorageBackend,
    destination: &dyn asset_storage::StorageBackend,
) -> Result<()> {
    let coordinator = MigrationCoordinator::new();
    let cancel = coordinator.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing current object");
            cancel.store(true, std::sync::atomic::Ordering::Relaxed);
        }
    });

    let report = coordinator.copy_all(source, destination).await;
    print_json(&report)?;
    report
        .ensure_complete()
        .context("Migration did not complete")?;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
