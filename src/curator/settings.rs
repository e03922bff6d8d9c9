use super::category::Category;
use crate::config::ConfigError;
use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Curator configuration, loaded from a JSON file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CuratorSettings {
    pub user: UserSettings,
    pub seeds: SeedSettings,
    pub filters: FilterSettings,
    pub algorithm: AlgorithmSettings,
    pub database: DatabaseSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub name: String,
    pub playlist_name: String, // Name of the managed playlist on the server
}

/// Artists the user picked as starting points for discovery
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedSettings {
    pub artists: Vec<String>,
}

/// Criteria applied to discovered (non-seed) artists and their tracks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    pub countries: Vec<String>, // ISO 3166 codes; empty disables the artist filter
    pub min_release_year: i32,
}

/// Share of the playlist given to each category (0.0 to 1.0)
/// Not required to sum to exactly 1.0; leftover slots stay empty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryWeights {
    pub favorites: f64,
    pub hits: f64,
    pub discovery: f64,
    pub wildcard: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlgorithmSettings {
    pub playlist_size: usize,
    pub weights: CategoryWeights,
    pub hot_zone_size: u32,  // Positions 1..=N watched for disengagement
    pub hot_zone_hours: u32, // Hours in the hot zone without plays before the weight drops
    pub decay_days: u32,     // Days without a play before decay starts
    pub new_release_days: u32, // Max age of a "wildcard" track
    pub related_artist_limit: usize,
    pub top_track_limit: usize,
    pub favorites_limit: usize,
    pub request_delay_ms: u64, // Pause between per-artist catalog requests
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: String,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            name: "Listener".to_string(),
            playlist_name: "Curated Station".to_string(),
        }
    }
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            countries: ["GB", "US", "IE", "AU", "CA"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            min_release_year: 2020,
        }
    }
}

impl Default for CategoryWeights {
    fn default() -> Self {
        Self {
            favorites: 0.40,
            hits: 0.30,
            discovery: 0.20,
            wildcard: 0.10,
        }
    }
}

impl Default for AlgorithmSettings {
    fn default() -> Self {
        Self {
            playlist_size: 50,
            weights: CategoryWeights::default(),
            hot_zone_size: 10,
            hot_zone_hours: 48,
            decay_days: 14,
            new_release_days: 30,
            related_artist_limit: 15,
            top_track_limit: 10,
            favorites_limit: 50,
            request_delay_ms: 100,
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: "curator.db".to_string(),
        }
    }
}

impl CategoryWeights {
    pub fn get(&self, category: Category) -> f64 {
        match category {
            Category::Favorites => self.favorites,
            Category::Hits => self.hits,
            Category::Discovery => self.discovery,
            Category::Wildcard => self.wildcard,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for category in Category::ALL {
            let value = self.get(category);
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidWeight {
                    name: category.as_str(),
                    value,
                });
            }
        }
        Ok(())
    }
}

impl CuratorSettings {
    /// Load settings from a JSON file. A missing file yields the defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(
                "Settings file {} not found, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        let settings: CuratorSettings = serde_json::from_str(&content)
            .with_context(|| format!("Invalid settings file {}", path.display()))?;
        Ok(settings)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write settings file {}", path.display()))?;
        Ok(())
    }

    /// Reject settings the curator cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.algorithm.playlist_size == 0 {
            return Err(ConfigError::EmptyPlaylist);
        }
        self.algorithm.weights.validate()
    }

    /// Add a seed artist. Returns false when it is already present (case-insensitive).
    pub fn add_seed(&mut self, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() || self.has_seed(name) {
            return false;
        }
        self.seeds.artists.push(name.to_string());
        true
    }

    /// Remove a seed artist. Returns false when it was not present.
    pub fn remove_seed(&mut self, name: &str) -> bool {
        let before = self.seeds.artists.len();
        self.seeds
            .artists
            .retain(|a| !a.eq_ignore_ascii_case(name.trim()));
        self.seeds.artists.len() != before
    }

    fn has_seed(&self, name: &str) -> bool {
        self.seeds
            .artists
            .iter()
            .any(|a| a.eq_ignore_ascii_case(name))
    }
}
