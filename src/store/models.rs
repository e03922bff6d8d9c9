//! Records persisted by the curator store.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

pub const MIN_WEIGHT: f64 = 0.1;
pub const MAX_WEIGHT: f64 = 5.0;
pub const DEFAULT_WEIGHT: f64 = 1.0;

/// Learned listening signal for one track.
#[derive(Debug, Clone, PartialEq)]
pub struct Preference {
    pub track_id: String,
    pub play_count: u32,
    /// Play count seen at the observation before the latest one.
    pub play_count_previous: u32,
    pub weight: f64,
    pub last_played_at: Option<DateTime<Utc>>,
    /// 1-based position in the managed playlist.
    pub playlist_position: Option<u32>,
    pub added_to_playlist_at: Option<DateTime<Utc>>,
    pub in_library: bool,
}

impl Preference {
    pub fn new(track_id: &str) -> Self {
        Self {
            track_id: track_id.to_string(),
            play_count: 0,
            play_count_previous: 0,
            weight: DEFAULT_WEIGHT,
            last_played_at: None,
            playlist_position: None,
            added_to_playlist_at: None,
            in_library: false,
        }
    }

    /// Store a new weight, clamped to `[MIN_WEIGHT, MAX_WEIGHT]`.
    pub fn set_weight(&mut self, weight: f64) {
        self.weight = weight.clamp(MIN_WEIGHT, MAX_WEIGHT);
    }

    /// A record whose numbers cannot be reasoned about.
    pub fn is_malformed(&self) -> bool {
        !self.weight.is_finite() || self.track_id.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failure,
    AuthFailure,
    /// Tracks were built but none could be published.
    Partial,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failure => "failure",
            RunStatus::AuthFailure => "auth_failure",
            RunStatus::Partial => "partial",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(RunStatus::Success),
            "failure" => Ok(RunStatus::Failure),
            "auth_failure" => Ok(RunStatus::AuthFailure),
            "partial" => Ok(RunStatus::Partial),
            other => Err(anyhow::anyhow!("unknown run status '{other}'")),
        }
    }
}

/// Append-only record of one orchestration cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct RunLog {
    pub run_type: String,
    pub status: RunStatus,
    pub tracks_added: usize,
    pub duration_seconds: f64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The managed playlist as of the last successful publish.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistState {
    pub playlist_id: String,
    pub playlist_name: String,
    pub track_count: usize,
    pub last_refresh_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreStats {
    pub artists: usize,
    pub seed_artists: usize,
    pub tracks: usize,
    pub preferences: usize,
}
