#![forbid(unsafe_code)]

//! One-shot playlist import. Meant to be run from a cron job or systemd timer
//! so the database keeps up with the upstream playlist without the API server
//! having to schedule anything.

use std::{env, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use yogatube::{
    config::{DEFAULT_ENV_PATH, load_runtime_config_from},
    ingest::{Ingestor, YouTubePlaylist},
    store::VideoStore,
};

const DEFAULT_LOG_FILTER: &str = "yogatube=info,ingest=info";

#[derive(Parser, Debug)]
#[command(author, version, about = "Import the configured playlist into the video database.")]
struct Cli {
    #[arg(
        long = "db",
        value_name = "PATH",
        help = "SQLite database to write to (overrides BLUEPRINT_DB_URL)"
    )]
    db: Option<PathBuf>,
    #[arg(
        long = "playlist-id",
        value_name = "ID",
        help = "Playlist to import (overrides PLAYLIST_ID)"
    )]
    playlist_id: Option<String>,
    #[arg(
        long = "env-file",
        value_name = "PATH",
        default_value = DEFAULT_ENV_PATH,
        help = "Fallback KEY=VALUE file for settings missing from the environment"
    )]
    env_file: PathBuf,
    #[arg(long = "json", help = "Print the upstream items as JSON on stdout")]
    json: bool,
}

impl Cli {
    /// Process environment with the command-line overrides appended, so they
    /// take precedence over both the environment and the env file.
    fn vars(&self) -> Vec<(String, String)> {
        let mut vars: Vec<(String, String)> = env::vars().collect();
        if let Some(db) = &self.db {
            vars.push(("BLUEPRINT_DB_URL".into(), db.display().to_string()));
        }
        if let Some(playlist_id) = &self.playlist_id {
            vars.push(("PLAYLIST_ID".into(), playlist_id.clone()));
        }
        vars
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config =
        load_runtime_config_from(&cli.env_file, cli.vars()).context("loading configuration")?;

    info!(
        db = %config.db_path.display(),
        playlist = %config.upstream.playlist_id,
        "importing playlist"
    );

    let store = VideoStore::open(&config.db_path)
        .with_context(|| format!("opening database {}", config.db_path.display()))?;
    let ingestor = Ingestor::new(YouTubePlaylist::new(config.upstream.clone()));
    let outcome = ingestor
        .fetch_and_store(&store)
        .context("fetching playlist items")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&outcome.items)
            .context("serializing playlist items")?;
        println!("{json}");
    } else {
        println!(
            "Imported {} item(s): {} new, {} already stored, {} failed. {} video(s) in total.",
            outcome.items.len(),
            outcome.report.inserted,
            outcome.report.duplicates,
            outcome.report.failed,
            store.count().context("counting stored videos")?
        );
    }

    Ok(())
}
