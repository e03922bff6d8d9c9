//! Catalog entities and the collaborator capabilities the curator consumes.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A piece of music as known by the remote catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub artist_name: String,
    pub album_name: String,
    pub duration_ms: u32,
    pub released_at: Option<DateTime<Utc>>,
    pub isrc: Option<String>,
}

impl Track {
    pub fn new(id: &str, name: &str, artist_name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            artist_name: artist_name.to_string(),
            album_name: String::new(),
            duration_ms: 0,
            released_at: None,
            isrc: None,
        }
    }

    /// Case-folded `artist:name` key used for library membership tests.
    pub fn library_key(&self) -> String {
        format!(
            "{}:{}",
            self.artist_name.to_lowercase(),
            self.name.to_lowercase()
        )
    }
}

/// A track from the user's library together with its current play count.
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryTrack {
    pub track: Track,
    pub play_count: u32,
}

/// A performer, either named by the user (seed) or discovered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artist {
    pub id: String,
    pub name: String,
    pub is_seed: bool,
    pub gender: Option<String>,
    pub country: Option<String>,
}

impl Artist {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            is_seed: false,
            gender: None,
            country: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistSummary {
    pub id: String,
    pub name: String,
    pub track_count: Option<u32>,
}

/// Failures raised by remote collaborators.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("authentication rejected: {0}")]
    Authentication(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("server returned error status '{status}': {message}")]
    Api { status: String, message: String },
    #[error("unexpected response: {0}")]
    Parse(String),
}

/// Remote catalog, library and playlist capability.
#[cfg_attr(test, mockall::automock)]
pub trait MusicService {
    fn search_artist(&self, name: &str) -> Result<Option<Artist>>;

    fn related_artists(&self, artist_id: &str, limit: usize) -> Result<Vec<Artist>>;

    fn top_tracks(&self, artist_id: &str, limit: usize) -> Result<Vec<Track>>;

    /// Every track in the user's library, with play counts.
    fn all_library_tracks(&self) -> Result<Vec<LibraryTrack>>;

    fn create_playlist(&self, name: &str, description: &str, track_ids: &[String])
    -> Result<String>;

    fn add_tracks(&self, playlist_id: &str, track_ids: &[String]) -> Result<()>;

    fn list_playlists(&self) -> Result<Vec<PlaylistSummary>>;

    fn playlist_tracks(&self, playlist_id: &str) -> Result<Vec<Track>>;
}

/// External artist metadata lookup.
///
/// Best effort: names that cannot be resolved are returned unchanged rather than excluded.
#[cfg_attr(test, mockall::automock)]
pub trait ArtistFilter {
    fn filter_by_criteria(
        &self,
        names: &[String],
        countries: &[String],
        min_release_year: i32,
    ) -> Result<Vec<String>>;
}

/// Lets every artist through. Used when no filtering criteria are configured.
pub struct PassThroughFilter;

impl ArtistFilter for PassThroughFilter {
    fn filter_by_criteria(
        &self,
        names: &[String],
        _countries: &[String],
        _min_release_year: i32,
    ) -> Result<Vec<String>> {
        Ok(names.to_vec())
    }
}

/// Out-of-band alert path for authentication failures.
#[cfg_attr(test, mockall::automock)]
pub trait Notifier {
    fn auth_failure(&self, user: &str, message: &str);
}

/// Reports authentication failures through the error log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn auth_failure(&self, user: &str, message: &str) {
        log::error!("Authentication failed while refreshing playlist for {user}: {message}");
        log::error!("Check BASE_URL, USERNAME and PASSWORD in your environment or .env file");
    }
}
