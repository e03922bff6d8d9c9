//! SQLite-backed curator store implementation.

use super::models::{PlaylistState, Preference, RunLog, RunStatus, StoreStats};
use super::trait_def::CuratorStore;
use crate::service::{Artist, Track};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use rusqlite::{Connection, OptionalExtension, Params, Row, params};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS artists (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    catalog_id  TEXT    NOT NULL UNIQUE,
    name        TEXT    NOT NULL,
    gender      TEXT,
    country     TEXT,
    is_seed     INTEGER NOT NULL DEFAULT 0,
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_artists_name ON artists(name);

CREATE TABLE IF NOT EXISTS tracks (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    catalog_id  TEXT    NOT NULL UNIQUE,
    name        TEXT    NOT NULL,
    artist_name TEXT    NOT NULL,
    album_name  TEXT    NOT NULL DEFAULT '',
    duration_ms INTEGER NOT NULL DEFAULT 0,
    released_at INTEGER,
    isrc        TEXT,
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tracks_artist_name ON tracks(artist_name);
CREATE INDEX IF NOT EXISTS idx_tracks_release_date ON tracks(released_at);

CREATE TABLE IF NOT EXISTS preferences (
    track_id             TEXT    PRIMARY KEY REFERENCES tracks(catalog_id),
    play_count           INTEGER NOT NULL DEFAULT 0,
    play_count_previous  INTEGER NOT NULL DEFAULT 0,
    weight               REAL    NOT NULL DEFAULT 1.0,
    last_played_at       INTEGER,
    playlist_position    INTEGER,
    added_to_playlist_at INTEGER,
    in_library           INTEGER NOT NULL DEFAULT 0,
    updated_at           INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_preferences_weight ON preferences(weight);

CREATE TABLE IF NOT EXISTS playlist_state (
    id              INTEGER PRIMARY KEY CHECK (id = 1),
    playlist_id     TEXT    NOT NULL,
    playlist_name   TEXT    NOT NULL,
    track_count     INTEGER NOT NULL,
    last_refresh_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS run_logs (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    run_type         TEXT    NOT NULL,
    status           TEXT    NOT NULL,
    tracks_added     INTEGER NOT NULL DEFAULT 0,
    duration_seconds REAL    NOT NULL DEFAULT 0,
    error_message    TEXT,
    created_at       INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_run_logs_created ON run_logs(created_at);
";

const PREFERENCE_COLUMNS: &str = "track_id, play_count, play_count_previous, weight, \
     last_played_at, playlist_position, added_to_playlist_at, in_library";

/// SQLite-backed curator store.
pub struct SqliteCuratorStore {
    conn: Mutex<Connection>,
}

impl SqliteCuratorStore {
    /// Open (or create) the database file at `db_path`.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open curator database at {}", db_path.display()))?;
        let store = Self::init(conn)?;
        info!("Curator database ready at {}", db_path.display());
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .context("Failed to enable foreign keys")?;
        conn.execute_batch(SCHEMA)
            .context("Failed to create curator schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("curator database lock poisoned"))
    }

    fn query_preferences<P: Params>(&self, sql: &str, params: P) -> Result<Vec<Preference>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, preference_from_row)?;

        let mut preferences = Vec::new();
        for row in rows {
            match row {
                Ok(pref) if !pref.is_malformed() => preferences.push(pref),
                Ok(pref) => warn!("Skipping malformed preference for track '{}'", pref.track_id),
                Err(e) => warn!("Skipping unreadable preference row: {e}"),
            }
        }
        Ok(preferences)
    }
}

fn to_unix(ts: Option<DateTime<Utc>>) -> Option<i64> {
    ts.map(|t| t.timestamp())
}

fn from_unix(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
}

fn preference_from_row(row: &Row<'_>) -> rusqlite::Result<Preference> {
    Ok(Preference {
        track_id: row.get(0)?,
        play_count: row.get(1)?,
        play_count_previous: row.get(2)?,
        weight: row.get(3)?,
        last_played_at: from_unix(row.get(4)?),
        playlist_position: row.get(5)?,
        added_to_playlist_at: from_unix(row.get(6)?),
        in_library: row.get(7)?,
    })
}

fn artist_from_row(row: &Row<'_>) -> rusqlite::Result<Artist> {
    Ok(Artist {
        id: row.get(0)?,
        name: row.get(1)?,
        gender: row.get(2)?,
        country: row.get(3)?,
        is_seed: row.get(4)?,
    })
}

fn run_log_from_row(row: &Row<'_>) -> rusqlite::Result<RunLog> {
    let status: String = row.get(1)?;
    Ok(RunLog {
        run_type: row.get(0)?,
        status: status.parse().unwrap_or(RunStatus::Failure),
        tracks_added: row.get(2)?,
        duration_seconds: row.get(3)?,
        error_message: row.get(4)?,
        created_at: from_unix(row.get(5)?).unwrap_or_default(),
    })
}

impl CuratorStore for SqliteCuratorStore {
    fn upsert_artist(&self, artist: &Artist) -> Result<()> {
        let now = Utc::now().timestamp();
        self.conn()?
            .execute(
                "INSERT INTO artists (catalog_id, name, gender, country, is_seed, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT(catalog_id) DO UPDATE SET
                    name = excluded.name,
                    gender = COALESCE(excluded.gender, artists.gender),
                    country = COALESCE(excluded.country, artists.country),
                    is_seed = MAX(artists.is_seed, excluded.is_seed),
                    updated_at = excluded.updated_at",
                params![
                    artist.id,
                    artist.name,
                    artist.gender,
                    artist.country,
                    artist.is_seed,
                    now
                ],
            )
            .with_context(|| format!("Failed to upsert artist {}", artist.id))?;
        Ok(())
    }

    fn artist_by_catalog_id(&self, catalog_id: &str) -> Result<Option<Artist>> {
        let artist = self
            .conn()?
            .query_row(
                "SELECT catalog_id, name, gender, country, is_seed FROM artists WHERE catalog_id = ?1",
                params![catalog_id],
                artist_from_row,
            )
            .optional()?;
        Ok(artist)
    }

    fn artist_by_name(&self, name: &str) -> Result<Option<Artist>> {
        let artist = self
            .conn()?
            .query_row(
                "SELECT catalog_id, name, gender, country, is_seed FROM artists
                 WHERE lower(name) = lower(?1) ORDER BY is_seed DESC LIMIT 1",
                params![name],
                artist_from_row,
            )
            .optional()?;
        Ok(artist)
    }

    fn upsert_track(&self, track: &Track) -> Result<()> {
        let now = Utc::now().timestamp();
        self.conn()?
            .execute(
                "INSERT INTO tracks (catalog_id, name, artist_name, album_name, duration_ms,
                                     released_at, isrc, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                 ON CONFLICT(catalog_id) DO UPDATE SET
                    name = excluded.name,
                    artist_name = excluded.artist_name,
                    album_name = CASE WHEN excluded.album_name != '' THEN excluded.album_name
                                      ELSE tracks.album_name END,
                    duration_ms = CASE WHEN excluded.duration_ms > 0 THEN excluded.duration_ms
                                       ELSE tracks.duration_ms END,
                    released_at = COALESCE(excluded.released_at, tracks.released_at),
                    isrc = COALESCE(excluded.isrc, tracks.isrc),
                    updated_at = excluded.updated_at",
                params![
                    track.id,
                    track.name,
                    track.artist_name,
                    track.album_name,
                    track.duration_ms,
                    to_unix(track.released_at),
                    track.isrc,
                    now
                ],
            )
            .with_context(|| format!("Failed to upsert track {}", track.id))?;
        Ok(())
    }

    fn track_by_catalog_id(&self, catalog_id: &str) -> Result<Option<Track>> {
        let track = self
            .conn()?
            .query_row(
                "SELECT catalog_id, name, artist_name, album_name, duration_ms, released_at, isrc
                 FROM tracks WHERE catalog_id = ?1",
                params![catalog_id],
                |row| {
                    Ok(Track {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        artist_name: row.get(2)?,
                        album_name: row.get(3)?,
                        duration_ms: row.get(4)?,
                        released_at: from_unix(row.get(5)?),
                        isrc: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(track)
    }

    fn preference(&self, track_id: &str) -> Result<Option<Preference>> {
        let sql = format!("SELECT {PREFERENCE_COLUMNS} FROM preferences WHERE track_id = ?1");
        let preference = self
            .conn()?
            .query_row(&sql, params![track_id], preference_from_row)
            .optional()?;
        Ok(preference)
    }

    fn preferences(&self) -> Result<Vec<Preference>> {
        let sql = format!("SELECT {PREFERENCE_COLUMNS} FROM preferences ORDER BY track_id");
        self.query_preferences(&sql, [])
    }

    fn save_preference(&self, preference: &Preference) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO preferences (track_id, play_count, play_count_previous, weight,
                                          last_played_at, playlist_position, added_to_playlist_at,
                                          in_library, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(track_id) DO UPDATE SET
                    play_count = excluded.play_count,
                    play_count_previous = excluded.play_count_previous,
                    weight = excluded.weight,
                    last_played_at = excluded.last_played_at,
                    playlist_position = excluded.playlist_position,
                    added_to_playlist_at = excluded.added_to_playlist_at,
                    in_library = excluded.in_library,
                    updated_at = excluded.updated_at",
                params![
                    preference.track_id,
                    preference.play_count,
                    preference.play_count_previous,
                    preference.weight,
                    to_unix(preference.last_played_at),
                    preference.playlist_position,
                    to_unix(preference.added_to_playlist_at),
                    preference.in_library,
                    Utc::now().timestamp()
                ],
            )
            .with_context(|| format!("Failed to save preference for track {}", preference.track_id))?;
        Ok(())
    }

    fn record_playlist_position(
        &self,
        track_id: &str,
        position: u32,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO preferences (track_id, playlist_position, added_to_playlist_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(track_id) DO UPDATE SET
                    added_to_playlist_at = CASE WHEN preferences.playlist_position IS NULL
                                                THEN excluded.added_to_playlist_at
                                                ELSE preferences.added_to_playlist_at END,
                    playlist_position = excluded.playlist_position,
                    updated_at = excluded.updated_at",
                params![track_id, position, now.timestamp()],
            )
            .with_context(|| format!("Failed to record playlist position for track {track_id}"))?;
        Ok(())
    }

    fn clear_playlist_positions_except(
        &self,
        keep: &[&str],
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let keep: HashSet<&str> = keep.iter().copied().collect();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let placed: Vec<String> = {
            let mut stmt =
                tx.prepare("SELECT track_id FROM preferences WHERE playlist_position IS NOT NULL")?;
            let ids = stmt.query_map([], |row| row.get(0))?;
            ids.collect::<rusqlite::Result<Vec<String>>>()?
        };

        let mut cleared = 0;
        for track_id in placed.iter().filter(|id| !keep.contains(id.as_str())) {
            cleared += tx
                .execute(
                    "UPDATE preferences
                     SET playlist_position = NULL, added_to_playlist_at = NULL, updated_at = ?2
                     WHERE track_id = ?1",
                    params![track_id, now.timestamp()],
                )
                .with_context(|| format!("Failed to clear playlist position for track {track_id}"))?;
        }
        tx.commit()?;

        if cleared > 0 {
            info!("Cleared playlist positions for {cleared} tracks no longer in the playlist");
        }
        Ok(cleared)
    }

    fn hot_zone_candidates(
        &self,
        hot_zone_size: u32,
        added_before: DateTime<Utc>,
    ) -> Result<Vec<Preference>> {
        let sql = format!(
            "SELECT {PREFERENCE_COLUMNS} FROM preferences
             WHERE playlist_position IS NOT NULL
               AND playlist_position <= ?1
               AND added_to_playlist_at IS NOT NULL
               AND added_to_playlist_at <= ?2
               AND play_count = play_count_previous
             ORDER BY playlist_position"
        );
        self.query_preferences(&sql, params![hot_zone_size, added_before.timestamp()])
    }

    fn decaying_candidates(&self, played_before: DateTime<Utc>) -> Result<Vec<Preference>> {
        let sql = format!(
            "SELECT {PREFERENCE_COLUMNS} FROM preferences
             WHERE last_played_at IS NOT NULL AND last_played_at < ?1
             ORDER BY track_id"
        );
        self.query_preferences(&sql, params![played_before.timestamp()])
    }

    fn append_run_log(&self, log: &RunLog) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO run_logs (run_type, status, tracks_added, duration_seconds,
                                       error_message, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    log.run_type,
                    log.status.as_str(),
                    log.tracks_added,
                    log.duration_seconds,
                    log.error_message,
                    log.created_at.timestamp()
                ],
            )
            .context("Failed to append run log")?;
        Ok(())
    }

    fn recent_run_logs(&self, limit: usize) -> Result<Vec<RunLog>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT run_type, status, tracks_added, duration_seconds, error_message, created_at
             FROM run_logs ORDER BY created_at DESC, id DESC LIMIT ?1",
        )?;
        let logs = stmt
            .query_map(params![limit], run_log_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(logs)
    }

    fn clear_run_logs(&self) -> Result<usize> {
        let deleted = self.conn()?.execute("DELETE FROM run_logs", [])?;
        Ok(deleted)
    }

    fn save_playlist_state(&self, state: &PlaylistState) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO playlist_state (id, playlist_id, playlist_name, track_count, last_refresh_at)
                 VALUES (1, ?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    playlist_id = excluded.playlist_id,
                    playlist_name = excluded.playlist_name,
                    track_count = excluded.track_count,
                    last_refresh_at = excluded.last_refresh_at",
                params![
                    state.playlist_id,
                    state.playlist_name,
                    state.track_count,
                    state.last_refresh_at.timestamp()
                ],
            )
            .context("Failed to save playlist state")?;
        Ok(())
    }

    fn playlist_state(&self) -> Result<Option<PlaylistState>> {
        let state = self
            .conn()?
            .query_row(
                "SELECT playlist_id, playlist_name, track_count, last_refresh_at
                 FROM playlist_state WHERE id = 1",
                [],
                |row| {
                    Ok(PlaylistState {
                        playlist_id: row.get(0)?,
                        playlist_name: row.get(1)?,
                        track_count: row.get(2)?,
                        last_refresh_at: from_unix(row.get(3)?).unwrap_or_default(),
                    })
                },
            )
            .optional()?;
        Ok(state)
    }

    fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn()?;
        let count = |sql: &str| -> Result<usize> { Ok(conn.query_row(sql, [], |r| r.get(0))?) };
        Ok(StoreStats {
            artists: count("SELECT COUNT(*) FROM artists")?,
            seed_artists: count("SELECT COUNT(*) FROM artists WHERE is_seed = 1")?,
            tracks: count("SELECT COUNT(*) FROM tracks")?,
            preferences: count("SELECT COUNT(*) FROM preferences")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store_with_track(id: &str) -> SqliteCuratorStore {
        let store = SqliteCuratorStore::in_memory().unwrap();
        store.upsert_track(&Track::new(id, "Song", "Artist")).unwrap();
        store
    }

    #[test]
    fn test_seed_flag_is_monotonic() {
        let store = SqliteCuratorStore::in_memory().unwrap();
        let mut artist = Artist::new("ar-1", "Fontaines D.C.");
        artist.is_seed = true;
        store.upsert_artist(&artist).unwrap();

        let mut rediscovered = Artist::new("ar-1", "Fontaines DC");
        rediscovered.country = Some("IE".to_string());
        store.upsert_artist(&rediscovered).unwrap();

        let stored = store.artist_by_catalog_id("ar-1").unwrap().unwrap();
        assert!(stored.is_seed);
        assert_eq!(stored.name, "Fontaines DC");
        assert_eq!(stored.country.as_deref(), Some("IE"));

        let by_name = store.artist_by_name("fontaines dc").unwrap().unwrap();
        assert_eq!(by_name.id, "ar-1");
    }

    #[test]
    fn test_track_upsert_keeps_known_fields() {
        let store = SqliteCuratorStore::in_memory().unwrap();
        let mut track = Track::new("t-1", "Song", "Artist");
        track.album_name = "Album".to_string();
        track.isrc = Some("GBAAA0000001".to_string());
        track.duration_ms = 180_000;
        store.upsert_track(&track).unwrap();

        let refreshed = Track::new("t-1", "Song (Remastered)", "Artist");
        store.upsert_track(&refreshed).unwrap();

        let stored = store.track_by_catalog_id("t-1").unwrap().unwrap();
        assert_eq!(stored.name, "Song (Remastered)");
        assert_eq!(stored.album_name, "Album");
        assert_eq!(stored.isrc.as_deref(), Some("GBAAA0000001"));
        assert_eq!(stored.duration_ms, 180_000);
        assert_eq!(store.stats().unwrap().tracks, 1);
    }

    #[test]
    fn test_preference_requires_existing_track() {
        let store = SqliteCuratorStore::in_memory().unwrap();
        assert!(store.save_preference(&Preference::new("missing")).is_err());
    }

    #[test]
    fn test_playlist_position_keeps_first_added_timestamp() {
        let store = store_with_track("t-1");
        let first = Utc::now() - Duration::hours(60);
        store.record_playlist_position("t-1", 4, first).unwrap();
        store.record_playlist_position("t-1", 2, Utc::now()).unwrap();

        let pref = store.preference("t-1").unwrap().unwrap();
        assert_eq!(pref.playlist_position, Some(2));
        assert_eq!(pref.added_to_playlist_at.unwrap().timestamp(), first.timestamp());
        assert_eq!(pref.weight, 1.0);
    }

    #[test]
    fn test_clearing_positions_resets_added_timestamp() {
        let store = SqliteCuratorStore::in_memory().unwrap();
        for id in ["stay", "gone"] {
            store.upsert_track(&Track::new(id, id, "Artist")).unwrap();
        }
        let long_ago = Utc::now() - Duration::days(3);
        store.record_playlist_position("stay", 1, long_ago).unwrap();
        store.record_playlist_position("gone", 2, long_ago).unwrap();

        let now = Utc::now();
        assert_eq!(store.clear_playlist_positions_except(&["stay"], now).unwrap(), 1);

        let stay = store.preference("stay").unwrap().unwrap();
        assert_eq!(stay.playlist_position, Some(1));
        assert_eq!(stay.added_to_playlist_at.unwrap().timestamp(), long_ago.timestamp());
        let gone = store.preference("gone").unwrap().unwrap();
        assert!(gone.playlist_position.is_none());
        assert!(gone.added_to_playlist_at.is_none());

        // Coming back starts a fresh hot-zone clock
        store.record_playlist_position("gone", 1, now).unwrap();
        let back = store.preference("gone").unwrap().unwrap();
        assert_eq!(back.added_to_playlist_at.unwrap().timestamp(), now.timestamp());
    }

    #[test]
    fn test_hot_zone_and_decay_queries() {
        let store = SqliteCuratorStore::in_memory().unwrap();
        let now = Utc::now();
        for id in ["stale", "fresh", "played", "deep"] {
            store.upsert_track(&Track::new(id, id, "Artist")).unwrap();
        }
        store.record_playlist_position("stale", 3, now - Duration::hours(50)).unwrap();
        store.record_playlist_position("fresh", 1, now - Duration::hours(2)).unwrap();
        store.record_playlist_position("deep", 30, now - Duration::hours(50)).unwrap();

        let mut played = Preference::new("played");
        played.playlist_position = Some(5);
        played.added_to_playlist_at = Some(now - Duration::hours(72));
        played.play_count = 4;
        played.play_count_previous = 2;
        played.last_played_at = Some(now - Duration::days(20));
        store.save_preference(&played).unwrap();

        let hot: Vec<String> = store
            .hot_zone_candidates(10, now - Duration::hours(48))
            .unwrap()
            .into_iter()
            .map(|p| p.track_id)
            .collect();
        assert_eq!(hot, vec!["stale".to_string()]);

        let decaying = store.decaying_candidates(now - Duration::days(14)).unwrap();
        assert_eq!(decaying.len(), 1);
        assert_eq!(decaying[0].track_id, "played");
    }

    #[test]
    fn test_run_logs_newest_first_and_clear() {
        let store = SqliteCuratorStore::in_memory().unwrap();
        let now = Utc::now();
        for (offset, status) in [(2, RunStatus::Failure), (1, RunStatus::Success)] {
            store
                .append_run_log(&RunLog {
                    run_type: "refresh".to_string(),
                    status,
                    tracks_added: 10,
                    duration_seconds: 1.5,
                    error_message: None,
                    created_at: now - Duration::minutes(offset),
                })
                .unwrap();
        }

        let logs = store.recent_run_logs(10).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].status, RunStatus::Success);
        assert_eq!(store.clear_run_logs().unwrap(), 2);
        assert!(store.recent_run_logs(10).unwrap().is_empty());
    }

    #[test]
    fn test_playlist_state_is_single_row() {
        let store = SqliteCuratorStore::in_memory().unwrap();
        for count in [10, 25] {
            store
                .save_playlist_state(&PlaylistState {
                    playlist_id: "pl-1".to_string(),
                    playlist_name: "Station".to_string(),
                    track_count: count,
                    last_refresh_at: Utc::now(),
                })
                .unwrap();
        }
        assert_eq!(store.playlist_state().unwrap().unwrap().track_count, 25);
    }
}
