use crate::service::Track;
use lazy_static::lazy_static;
use log::{debug, info};
use regex::Regex;
use std::collections::HashSet;

lazy_static! {
    // Version and edition markers stripped before comparing song names
    static ref VARIANT_PATTERNS: Vec<Regex> = vec![
        Regex::new(
            r"(?i)\s*\(.*?(remix|acoustic|live|radio edit|edit|version|remaster|deluxe|bonus|explicit|clean|instrumental|extended|single|album|original|mix|feat\.?|ft\.?).*?\)\s*"
        )
        .unwrap(),
        Regex::new(
            r"(?i)\s*\[.*?(remix|acoustic|live|radio edit|edit|version|remaster|deluxe|bonus|explicit|clean|instrumental|extended|single|album|original|mix|feat\.?|ft\.?).*?\]\s*"
        )
        .unwrap(),
        Regex::new(r"(?i)\s*-\s*(remix|acoustic|live|radio edit|edit|remaster|remastered).*$").unwrap(),
    ];
}

/// Lowercased song name with remix, live, edition and featuring markers removed.
pub fn normalize_song_name(name: &str) -> String {
    let mut normalized = name.trim().to_lowercase();
    for pattern in VARIANT_PATTERNS.iter() {
        normalized = pattern.replace_all(&normalized, "").into_owned();
    }
    normalized.trim().to_string()
}

/// `artist:normalized name`, equal for variants of the same song.
pub fn duplicate_key(track: &Track) -> String {
    format!(
        "{}:{}",
        track.artist_name.to_lowercase(),
        normalize_song_name(&track.name)
    )
}

/// Keeps variants of songs already in the playlist from being added again.
#[derive(Debug, Default)]
pub struct DeduplicationFilter {
    seen: HashSet<String>,
}

impl DeduplicationFilter {
    pub fn new(existing: &[Track]) -> Self {
        Self {
            seen: existing.iter().map(duplicate_key).collect(),
        }
    }

    /// Ids of candidates not matching an existing track or an earlier candidate.
    pub fn filter_new(&mut self, candidates: &[Track]) -> Vec<String> {
        let mut accepted = Vec::new();
        for track in candidates {
            let key = duplicate_key(track);
            if self.seen.insert(key) {
                accepted.push(track.id.clone());
            } else {
                debug!("Skipping '{}' by {}: already in playlist", track.name, track.artist_name);
            }
        }

        info!(
            "Deduplicated candidates: {} new, {} duplicates",
            accepted.len(),
            candidates.len() - accepted.len()
        );
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_variant_markers() {
        assert_eq!(normalize_song_name("Song Title (Acoustic Version)"), "song title");
        assert_eq!(normalize_song_name("Song Title [Live at Wembley]"), "song title");
        assert_eq!(normalize_song_name("Song Title - Radio Edit"), "song title");
        assert_eq!(normalize_song_name("Song Title (feat. Someone)"), "song title");
        assert_eq!(normalize_song_name("  Song Title  "), "song title");
    }

    #[test]
    fn test_normalize_keeps_unrelated_parentheses() {
        assert_eq!(normalize_song_name("Hello (Goodbye)"), "hello (goodbye)");
        assert_eq!(normalize_song_name("Twenty-One"), "twenty-one");
    }

    #[test]
    fn test_variant_of_existing_track_is_dropped() {
        let existing = vec![Track::new("lib-1", "Song Title", "The Band")];
        let candidates = vec![
            Track::new("c1", "Song Title (Acoustic Version)", "THE BAND"),
            Track::new("c2", "Other Song", "The Band"),
            Track::new("c3", "Song Title", "Another Band"),
        ];

        let mut filter = DeduplicationFilter::new(&existing);
        assert_eq!(filter.filter_new(&candidates), vec!["c2", "c3"]);
    }

    #[test]
    fn test_duplicates_within_batch_keep_first() {
        let candidates = vec![
            Track::new("c1", "Anthem", "Band"),
            Track::new("c2", "Anthem (Live)", "Band"),
            Track::new("c3", "Anthem - Remastered 2011", "Band"),
        ];
        let mut filter = DeduplicationFilter::new(&[]);
        assert_eq!(filter.filter_new(&candidates), vec!["c1"]);
    }

    #[test]
    fn test_empty_existing_playlist_keeps_distinct_candidates() {
        let candidates = vec![Track::new("a", "One", "X"), Track::new("b", "Two", "X")];
        let mut filter = DeduplicationFilter::default();
        assert_eq!(filter.filter_new(&candidates), vec!["a", "b"]);
    }
}
