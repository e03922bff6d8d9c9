use super::category::{Category, CategoryPools};
use crate::service::{LibraryTrack, Track};
use crate::store::CuratorStore;
use anyhow::Result;
use chrono::{DateTime, Datelike, Duration, Utc};
use log::{debug, info};
use std::collections::HashSet;

/// Splits candidate tracks into hits, discovery and wildcard.
///
/// Favorites come from the user's library, not from classification.
pub struct CategoryClassifier {
    library_index: HashSet<String>,
    wildcard_cutoff: DateTime<Utc>,
    min_release_year: i32,
}

impl CategoryClassifier {
    pub fn new(
        library_index: HashSet<String>,
        wildcard_cutoff: DateTime<Utc>,
        min_release_year: i32,
    ) -> Self {
        Self {
            library_index,
            wildcard_cutoff,
            min_release_year,
        }
    }

    /// Classifier whose wildcard window ends `new_release_days` before `now`.
    pub fn for_library(
        library: &[LibraryTrack],
        now: DateTime<Utc>,
        new_release_days: u32,
        min_release_year: i32,
    ) -> Self {
        Self::new(
            Self::library_index(library),
            now - Duration::days(i64::from(new_release_days)),
            min_release_year,
        )
    }

    /// Case-folded `artist:name` keys of library tracks the user has played.
    pub fn library_index(library: &[LibraryTrack]) -> HashSet<String> {
        library
            .iter()
            .filter(|lt| lt.play_count > 0)
            .map(|lt| lt.track.library_key())
            .collect()
    }

    /// `None` means the track is rejected by the release-year filter.
    pub fn classify(&self, track: &Track) -> Option<Category> {
        if let Some(released_at) = track.released_at {
            if released_at.year() < self.min_release_year {
                return None;
            }
            // Recency wins over library membership
            if released_at >= self.wildcard_cutoff {
                return Some(Category::Wildcard);
            }
        }

        if self.library_index.contains(&track.library_key()) {
            Some(Category::Hits)
        } else {
            Some(Category::Discovery)
        }
    }

    /// Classify every track and upsert the accepted ones into the store.
    pub fn classify_and_store(
        &self,
        tracks: Vec<Track>,
        store: &dyn CuratorStore,
    ) -> Result<CategoryPools> {
        let mut pools = CategoryPools::new();
        let mut rejected = 0;

        for track in tracks {
            let Some(category) = self.classify(&track) else {
                debug!(
                    "Rejected '{}' by {}: released before {}",
                    track.name, track.artist_name, self.min_release_year
                );
                rejected += 1;
                continue;
            };
            store.upsert_track(&track)?;
            pools.push(category, track);
        }

        info!(
            "Classified tracks: {} hits, {} discovery, {} wildcard, {} rejected",
            pools.len(Category::Hits),
            pools.len(Category::Discovery),
            pools.len(Category::Wildcard),
            rejected
        );
        Ok(pools)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteCuratorStore;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn track(id: &str, name: &str, released_at: Option<DateTime<Utc>>) -> Track {
        let mut track = Track::new(id, name, "The Artist");
        track.released_at = released_at;
        track
    }

    fn classifier() -> CategoryClassifier {
        let library = vec![LibraryTrack {
            track: Track::new("lib-1", "Known Song", "THE ARTIST"),
            play_count: 3,
        }];
        CategoryClassifier::for_library(&library, now(), 30, 2018)
    }

    #[test]
    fn test_recent_release_is_wildcard_even_when_known() {
        let recent = track("t1", "Known Song", Some(now() - Duration::days(10)));
        assert_eq!(classifier().classify(&recent), Some(Category::Wildcard));
    }

    #[test]
    fn test_older_known_track_is_hit() {
        let older = track("t2", "known song", Some(now() - Duration::days(5 * 365)));
        assert_eq!(classifier().classify(&older), Some(Category::Hits));
    }

    #[test]
    fn test_older_unknown_track_is_discovery() {
        let older = track("t3", "Never Heard", Some(now() - Duration::days(5 * 365)));
        assert_eq!(classifier().classify(&older), Some(Category::Discovery));
    }

    #[test]
    fn test_unplayed_library_track_is_discovery() {
        let library = vec![
            LibraryTrack {
                track: Track::new("lib-1", "Known Song", "The Artist"),
                play_count: 3,
            },
            LibraryTrack {
                track: Track::new("lib-2", "Deep Cut", "The Artist"),
                play_count: 0,
            },
        ];
        let classifier = CategoryClassifier::for_library(&library, now(), 30, 2018);

        let deep = track("t8", "Deep Cut", Some(now() - Duration::days(900)));
        assert_eq!(classifier.classify(&deep), Some(Category::Discovery));
        let known = track("t9", "Known Song", Some(now() - Duration::days(900)));
        assert_eq!(classifier.classify(&known), Some(Category::Hits));
    }

    #[test]
    fn test_current_year_release_without_day_is_wildcard() {
        let song = crate::models::Song {
            id: "s1".to_string(),
            title: "This Year".to_string(),
            artist: "The Artist".to_string(),
            year: Some(2026),
            ..Default::default()
        };
        let october = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();
        let classifier = CategoryClassifier::for_library(&[], october, 30, 2018);
        assert_eq!(classifier.classify(&song.into()), Some(Category::Wildcard));

        let last_year = crate::models::Song {
            id: "s2".to_string(),
            year: Some(2025),
            ..Default::default()
        };
        assert_eq!(classifier.classify(&last_year.into()), Some(Category::Discovery));
    }

    #[test]
    fn test_track_before_min_year_is_rejected() {
        let ancient = track(
            "t4",
            "Known Song",
            Some(Utc.with_ymd_and_hms(2017, 12, 31, 0, 0, 0).unwrap()),
        );
        assert_eq!(classifier().classify(&ancient), None);
    }

    #[test]
    fn test_undated_track_skips_date_rules() {
        assert_eq!(
            classifier().classify(&track("t5", "Known Song", None)),
            Some(Category::Hits)
        );
        assert_eq!(
            classifier().classify(&track("t6", "Other", None)),
            Some(Category::Discovery)
        );
    }

    #[test]
    fn test_library_match_is_exact_after_case_folding() {
        let remix = track("t7", "Known Song (Remix)", None);
        assert_eq!(classifier().classify(&remix), Some(Category::Discovery));
    }

    #[test]
    fn test_classify_and_store_upserts_accepted_tracks() {
        let store = SqliteCuratorStore::in_memory().unwrap();
        let tracks = vec![
            track("t1", "Known Song", Some(now() - Duration::days(10))),
            track("t2", "Known Song", Some(now() - Duration::days(900))),
            track("t3", "Fresh Ears", Some(now() - Duration::days(900))),
            track("t4", "Old", Some(Utc.with_ymd_and_hms(2001, 1, 1, 0, 0, 0).unwrap())),
        ];

        let pools = classifier().classify_and_store(tracks, &store).unwrap();
        assert_eq!(pools.len(Category::Wildcard), 1);
        assert_eq!(pools.len(Category::Hits), 1);
        assert_eq!(pools.len(Category::Discovery), 1);
        assert_eq!(pools.len(Category::Favorites), 0);
        assert_eq!(store.stats().unwrap().tracks, 3);
        assert!(store.track_by_catalog_id("t4").unwrap().is_none());
    }
}
