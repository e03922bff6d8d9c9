//! CuratorStore trait definition.

use super::models::{PlaylistState, Preference, RunLog, StoreStats};
use crate::service::{Artist, Track};
use anyhow::Result;
use chrono::{DateTime, Utc};

/// Persistence for artists, tracks, preferences and run history.
pub trait CuratorStore {
    // =========================================================================
    // Artists
    // =========================================================================

    /// Create or update an artist. `is_seed` never goes back to false and
    /// metadata fields are only overwritten when the new value is present.
    fn upsert_artist(&self, artist: &Artist) -> Result<()>;

    fn artist_by_catalog_id(&self, catalog_id: &str) -> Result<Option<Artist>>;

    /// Case-insensitive lookup.
    fn artist_by_name(&self, name: &str) -> Result<Option<Artist>>;

    // =========================================================================
    // Tracks
    // =========================================================================

    /// Create or update a track keyed by its catalog id.
    fn upsert_track(&self, track: &Track) -> Result<()>;

    fn track_by_catalog_id(&self, catalog_id: &str) -> Result<Option<Track>>;

    // =========================================================================
    // Preferences
    // =========================================================================

    fn preference(&self, track_id: &str) -> Result<Option<Preference>>;

    /// Every readable preference record. Unreadable rows are skipped.
    fn preferences(&self) -> Result<Vec<Preference>>;

    /// Insert or replace a preference. Fails when the track is unknown.
    fn save_preference(&self, preference: &Preference) -> Result<()>;

    /// Record where a track sits in the managed playlist, creating its preference if needed.
    /// The added timestamp is only set when the track had no position before.
    fn record_playlist_position(
        &self,
        track_id: &str,
        position: u32,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Forget the playlist position of every track not listed in `keep`.
    /// Returns the number of preferences cleared.
    fn clear_playlist_positions_except(
        &self,
        keep: &[&str],
        now: DateTime<Utc>,
    ) -> Result<usize>;

    /// Tracks in positions `1..=hot_zone_size`, placed at or before `added_before`,
    /// whose play count did not move at the last observation.
    fn hot_zone_candidates(
        &self,
        hot_zone_size: u32,
        added_before: DateTime<Utc>,
    ) -> Result<Vec<Preference>>;

    /// Tracks last played strictly before `played_before`.
    fn decaying_candidates(&self, played_before: DateTime<Utc>) -> Result<Vec<Preference>>;

    // =========================================================================
    // Run history and playlist state
    // =========================================================================

    fn append_run_log(&self, log: &RunLog) -> Result<()>;

    /// Most recent first.
    fn recent_run_logs(&self, limit: usize) -> Result<Vec<RunLog>>;

    /// Returns the number of entries deleted.
    fn clear_run_logs(&self) -> Result<usize>;

    fn save_playlist_state(&self, state: &PlaylistState) -> Result<()>;

    fn playlist_state(&self) -> Result<Option<PlaylistState>>;

    fn stats(&self) -> Result<StoreStats>;
}
