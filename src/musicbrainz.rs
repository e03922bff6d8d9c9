//! Artist filter backed by the MusicBrainz web service.
//!
//! Requests are paced to one per second as the service asks of anonymous clients.

use crate::service::ArtistFilter;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::Deserialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use ureq::Agent;
use urlencoding::encode;

const MUSICBRAINZ_API_BASE: &str = "https://musicbrainz.org/ws/2";
const USER_AGENT: &str = concat!(
    "playlist-curator/",
    env!("CARGO_PKG_VERSION"),
    " (https://github.com/playlist-curator/playlist-curator)"
);
const RATE_LIMIT_INTERVAL: Duration = Duration::from_millis(1100);

#[derive(Debug, Deserialize)]
struct ArtistSearchResponse {
    #[serde(default)]
    artists: Vec<MbArtist>,
}

#[derive(Debug, Clone, Deserialize)]
struct MbArtist {
    id: String,
    name: String,
    country: Option<String>,
    area: Option<MbArea>,
}

#[derive(Debug, Clone, Deserialize)]
struct MbArea {
    #[serde(rename = "iso-3166-1-codes", default)]
    iso_codes: Vec<String>,
}

impl MbArtist {
    /// Country code, falling back to the artist's area when unset.
    fn country_code(&self) -> Option<&str> {
        self.country
            .as_deref()
            .filter(|c| !c.is_empty())
            .or_else(|| {
                self.area
                    .as_ref()
                    .and_then(|area| area.iso_codes.first())
                    .map(String::as_str)
            })
    }
}

#[derive(Debug, Deserialize)]
struct ReleaseGroupResponse {
    #[serde(rename = "release-groups", default)]
    release_groups: Vec<ReleaseGroup>,
}

#[derive(Debug, Deserialize)]
struct ReleaseGroup {
    #[serde(rename = "first-release-date")]
    first_release_date: Option<String>,
}

/// Decide whether an artist passes. Unknown country or year never excludes.
pub fn artist_passes(
    country: Option<&str>,
    latest_year: Option<i32>,
    countries: &[String],
    min_release_year: i32,
) -> bool {
    if let Some(country) = country {
        if !countries.is_empty() && !countries.iter().any(|c| c.eq_ignore_ascii_case(country)) {
            return false;
        }
    }
    match latest_year {
        Some(year) => year >= min_release_year,
        None => true,
    }
}

fn latest_release_year(groups: &[ReleaseGroup]) -> Option<i32> {
    groups
        .iter()
        .filter_map(|g| g.first_release_date.as_deref())
        .filter_map(|date| date.get(..4))
        .filter_map(|year| year.parse::<i32>().ok())
        .max()
}

/// Prefer an exact (case-insensitive) name match over the top-scored hit.
fn best_match(name: &str, artists: Vec<MbArtist>) -> Option<MbArtist> {
    artists
        .iter()
        .find(|a| a.name.eq_ignore_ascii_case(name))
        .cloned()
        .or_else(|| artists.into_iter().next())
}

pub struct MusicBrainzFilter {
    agent: Agent,
    last_request: Mutex<Option<Instant>>,
}

impl Default for MusicBrainzFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl MusicBrainzFilter {
    pub fn new() -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(30))
                .user_agent(USER_AGENT)
                .build(),
            last_request: Mutex::new(None),
        }
    }

    fn rate_limit(&self) {
        let mut last = self
            .last_request
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < RATE_LIMIT_INTERVAL {
                std::thread::sleep(RATE_LIMIT_INTERVAL - elapsed);
            }
        }
        *last = Some(Instant::now());
    }

    fn get<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        self.rate_limit();
        let response = self
            .agent
            .get(url)
            .call()
            .with_context(|| format!("MusicBrainz request failed: {url}"))?;
        let parsed = response
            .into_json()
            .context("Failed to parse MusicBrainz response")?;
        Ok(parsed)
    }

    fn search_artist(&self, name: &str) -> Result<Option<MbArtist>> {
        let query = format!("artist:\"{name}\"");
        let url = format!(
            "{}/artist/?query={}&fmt=json&limit=5",
            MUSICBRAINZ_API_BASE,
            encode(&query)
        );
        let response: ArtistSearchResponse = self.get(&url)?;
        Ok(best_match(name, response.artists))
    }

    fn latest_year(&self, mbid: &str) -> Result<Option<i32>> {
        let url = format!(
            "{}/release-group?artist={}&type={}&fmt=json&limit=100",
            MUSICBRAINZ_API_BASE,
            encode(mbid),
            encode("album|single")
        );
        let response: ReleaseGroupResponse = self.get(&url)?;
        Ok(latest_release_year(&response.release_groups))
    }

    fn check(&self, name: &str, countries: &[String], min_release_year: i32) -> Result<bool> {
        let Some(artist) = self.search_artist(name)? else {
            debug!("{name}: not found on MusicBrainz, keeping");
            return Ok(true);
        };
        let latest_year = self.latest_year(&artist.id)?;
        let country = artist.country_code();
        let passes = artist_passes(
            country,
            latest_year,
            countries,
            min_release_year,
        );
        if !passes {
            debug!(
                "{}: filtered out (country {:?}, latest release {:?})",
                name, country, latest_year
            );
        }
        Ok(passes)
    }
}

impl ArtistFilter for MusicBrainzFilter {
    fn filter_by_criteria(
        &self,
        names: &[String],
        countries: &[String],
        min_release_year: i32,
    ) -> Result<Vec<String>> {
        let mut matching = Vec::with_capacity(names.len());
        for name in names {
            match self.check(name, countries, min_release_year) {
                Ok(true) => matching.push(name.clone()),
                Ok(false) => {}
                Err(e) => {
                    // Lookup problems never exclude an artist
                    warn!("MusicBrainz lookup for {name} failed, keeping: {e:#}");
                    matching.push(name.clone());
                }
            }
        }
        info!(
            "MusicBrainz filter kept {} of {} artists",
            matching.len(),
            names.len()
        );
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn countries() -> Vec<String> {
        vec!["GB".to_string(), "IE".to_string()]
    }

    #[test]
    fn test_artist_passes_rules() {
        assert!(artist_passes(Some("GB"), Some(2023), &countries(), 2020));
        assert!(artist_passes(Some("ie"), Some(2020), &countries(), 2020));
        assert!(!artist_passes(Some("SE"), Some(2023), &countries(), 2020));
        assert!(!artist_passes(Some("GB"), Some(2015), &countries(), 2020));
        assert!(artist_passes(None, None, &countries(), 2020));
        assert!(artist_passes(Some("SE"), Some(2023), &[], 2020));
    }

    #[test]
    fn test_latest_release_year_parses_partial_dates() {
        let body = r#"{
            "release-groups": [
                { "first-release-date": "2019-04-12" },
                { "first-release-date": "2022" },
                { "first-release-date": "" },
                { "title": "Untitled" }
            ]
        }"#;
        let parsed: ReleaseGroupResponse = serde_json::from_str(body).unwrap();
        assert_eq!(latest_release_year(&parsed.release_groups), Some(2022));
        assert_eq!(latest_release_year(&[]), None);
    }

    #[test]
    fn test_best_match_prefers_exact_name() {
        let body = r#"{
            "artists": [
                { "id": "1", "name": "Wet Leg Tribute", "country": "US" },
                { "id": "2", "name": "Wet Leg", "country": "GB" }
            ]
        }"#;
        let parsed: ArtistSearchResponse = serde_json::from_str(body).unwrap();
        let artist = best_match("wet leg", parsed.artists).unwrap();
        assert_eq!(artist.id, "2");
        assert_eq!(artist.country.as_deref(), Some("GB"));

        assert!(best_match("anyone", Vec::new()).is_none());
    }

    #[test]
    fn test_country_falls_back_to_area_codes() {
        let body = r#"{
            "artists": [
                { "id": "1", "name": "Kneecap", "area": { "name": "Belfast", "iso-3166-1-codes": ["GB"] } },
                { "id": "2", "name": "Fontaines D.C.", "country": "IE", "area": { "iso-3166-1-codes": ["GB"] } },
                { "id": "3", "name": "Nobody", "area": { "name": "Somewhere" } }
            ]
        }"#;
        let parsed: ArtistSearchResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.artists[0].country_code(), Some("GB"));
        assert_eq!(parsed.artists[1].country_code(), Some("IE"));
        assert_eq!(parsed.artists[2].country_code(), None);

        let swedish = r#"{ "id": "4", "name": "Viagra Boys", "area": { "iso-3166-1-codes": ["SE"] } }"#;
        let artist: MbArtist = serde_json::from_str(swedish).unwrap();
        assert!(!artist_passes(artist.country_code(), Some(2024), &countries(), 2020));
    }
}
