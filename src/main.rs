use anyhow::Result;
use clap::{Parser, Subcommand};
use log::error;

mod client;
mod config;
mod curator;
mod models;
mod musicbrainz;
mod service;
mod store;


use crate::client::SubsonicClient;
use crate::config::load_config;
use crate::curator::{CuratorSettings, Orchestrator};
use crate::musicbrainz::MusicBrainzFilter;
use crate::service::{ArtistFilter, LogNotifier, PassThroughFilter};
use crate::store::{CuratorStore, SqliteCuratorStore};

const RECENT_LOG_LIMIT: usize = 10;

#[derive(Parser)]
#[command(name = "playlist-curator")]
#[command(about = "Self-tuning playlist curator for OpenSubsonic servers")]
#[command(version)]
struct Args {
    /// Path to the curator settings JSON file
    #[arg(short = 'c', long = "config", default_value = "curator.json", global = true)]
    config_file: String,

    /// Verbose mode - log debug details
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    /// Quiet mode - only log warnings and errors
    #[arg(short = 'q', long = "quiet", global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Learn from listening history, rebuild the playlist and publish it
    Refresh {
        /// Print the built playlist instead of publishing it
        #[arg(long = "dry-run")]
        dry_run: bool,
    },
    /// Show settings, database statistics and recent runs
    Status,
    /// Add a seed artist to the settings file
    AddSeed { name: String },
    /// Remove a seed artist from the settings file
    RemoveSeed { name: String },
    /// Delete the run history
    ClearLogs,
}

fn init_logging(args: &Args) {
    let level = if args.verbose {
        "debug"
    } else if args.quiet {
        "warn"
    } else {
        "info"
    };
    // RUST_LOG still wins when set
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let mut settings = CuratorSettings::load_from_file(&args.config_file)?;
    if let Err(e) = settings.validate() {
        error!("Invalid settings in {}: {e}", args.config_file);
        return Err(e.into());
    }

    match args.command {
        Command::Refresh { dry_run } => refresh(&settings, dry_run),
        Command::Status => status(&settings),
        Command::AddSeed { name } => {
            if settings.add_seed(&name) {
                settings.save_to_file(&args.config_file)?;
                println!("Added seed artist: {}", name.trim());
            } else {
                println!("Artist already in seeds: {}", name.trim());
            }
            Ok(())
        }
        Command::RemoveSeed { name } => {
            if settings.remove_seed(&name) {
                settings.save_to_file(&args.config_file)?;
                println!("Removed seed artist: {}", name.trim());
            } else {
                println!("Artist not in seeds: {}", name.trim());
            }
            Ok(())
        }
        Command::ClearLogs => {
            let store = SqliteCuratorStore::open(&settings.database.path)?;
            let removed = store.clear_run_logs()?;
            println!("Cleared {removed} run log entries");
            Ok(())
        }
    }
}

fn refresh(settings: &CuratorSettings, dry_run: bool) -> Result<()> {
    let config = load_config()?;
    let client = SubsonicClient::new(config);
    let store = SqliteCuratorStore::open(&settings.database.path)?;

    let filter: Box<dyn ArtistFilter> = if settings.filters.countries.is_empty() {
        Box::new(PassThroughFilter)
    } else {
        Box::new(MusicBrainzFilter::new())
    };

    let orchestrator =
        Orchestrator::new(settings, &client, filter.as_ref(), &store, &LogNotifier);
    let summary = orchestrator.refresh(dry_run)?;

    if dry_run {
        println!("\n=== {} (dry run) ===", settings.user.playlist_name);
        for (i, id) in summary.track_ids.iter().enumerate() {
            match store.track_by_catalog_id(id)? {
                Some(track) => println!("{:3}. {} - {}", i + 1, track.artist_name, track.name),
                None => println!("{:3}. {}", i + 1, id),
            }
        }
    }

    println!("\nRefresh complete: {}", summary.status);
    if let Some(playlist_id) = &summary.playlist_id {
        println!("  Playlist: {playlist_id}");
    }
    println!("  Tracks built: {}", summary.track_ids.len());
    println!("  Tracks added: {}", summary.tracks_added);
    println!("  Artists discovered: {}", summary.artists_discovered);
    println!("  Duration: {:.2}s", summary.duration_seconds);
    Ok(())
}

fn status(settings: &CuratorSettings) -> Result<()> {
    println!("User: {}", settings.user.name);
    println!("Playlist: {}", settings.user.playlist_name);
    println!("Seed artists: {}", settings.seeds.artists.join(", "));
    println!(
        "Filters: countries [{}], min release year {}",
        settings.filters.countries.join(", "),
        settings.filters.min_release_year
    );
    let weights = &settings.algorithm.weights;
    println!(
        "Mix: {} tracks, favorites {:.2} / hits {:.2} / discovery {:.2} / wildcard {:.2}",
        settings.algorithm.playlist_size,
        weights.favorites,
        weights.hits,
        weights.discovery,
        weights.wildcard
    );

    match load_config() {
        Ok(config) => match SubsonicClient::new(config).ping() {
            Ok(()) => println!("Server: connection successful"),
            Err(e) => println!("Server: connection failed ({e:#})"),
        },
        Err(e) => println!("Server: not configured ({e})"),
    }

    let store = SqliteCuratorStore::open(&settings.database.path)?;
    let stats = store.stats()?;
    println!(
        "\nDatabase: {} artists ({} seeds), {} tracks, {} preferences",
        stats.artists, stats.seed_artists, stats.tracks, stats.preferences
    );

    match store.playlist_state()? {
        Some(state) => println!(
            "Last refresh: {} ({} tracks in '{}', id {})",
            state.last_refresh_at.format("%Y-%m-%d %H:%M UTC"),
            state.track_count,
            state.playlist_name,
            state.playlist_id
        ),
        None => println!("Last refresh: never"),
    }

    let logs = store.recent_run_logs(RECENT_LOG_LIMIT)?;
    if !logs.is_empty() {
        println!("\nRecent runs:");
    }
    for log in logs {
        println!(
            "  {}  {:<12} {:>3} added  {:>6.1}s  {}",
            log.created_at.format("%Y-%m-%d %H:%M"),
            log.status.as_str(),
            log.tracks_added,
            log.duration_seconds,
            log.error_message.unwrap_or_default()
        );
    }
    Ok(())
}
