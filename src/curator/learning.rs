use crate::store::{CuratorStore, MAX_WEIGHT, MIN_WEIGHT, Preference};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};

const PLAY_BOOST_PER_PLAY: f64 = 0.1;
const HOT_ZONE_PENALTY: f64 = 0.7;
const DECAY_PER_DAY: f64 = 0.02;
const MIN_DECAY_FACTOR: f64 = 0.5;

/// Weight after `delta` new plays were seen.
pub fn boosted_weight(weight: f64, delta: u32) -> f64 {
    (weight * (1.0 + f64::from(delta) * PLAY_BOOST_PER_PLAY)).min(MAX_WEIGHT)
}

/// Weight after a track sat in the hot zone without being played.
pub fn penalized_weight(weight: f64) -> f64 {
    (weight * HOT_ZONE_PENALTY).max(MIN_WEIGHT)
}

/// Weight after `days_since_play` whole days without a play.
pub fn decayed_weight(weight: f64, days_since_play: i64, decay_days: u32) -> f64 {
    let overdue = (days_since_play - i64::from(decay_days)) as f64;
    let factor = (1.0 - overdue * DECAY_PER_DAY).max(MIN_DECAY_FACTOR);
    (weight * factor).clamp(MIN_WEIGHT, MAX_WEIGHT)
}

/// A play count read from the user's library.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayObservation {
    pub track_id: String,
    pub play_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LearningReport {
    pub observed: usize,
    pub boosted: usize,
    pub penalized: usize,
    pub decayed: usize,
    /// Records that could not be read or written and were left alone.
    pub skipped: usize,
}

/// Adjusts per-track weights from listening behavior.
pub struct LearningEngine {
    hot_zone_size: u32,
    hot_zone_hours: u32,
    decay_days: u32,
}

impl LearningEngine {
    pub fn new(hot_zone_size: u32, hot_zone_hours: u32, decay_days: u32) -> Self {
        Self {
            hot_zone_size,
            hot_zone_hours,
            decay_days,
        }
    }

    /// Run observation, then the negative signal, then decay.
    pub fn update(
        &self,
        store: &dyn CuratorStore,
        observations: &[PlayObservation],
        now: DateTime<Utc>,
    ) -> Result<LearningReport> {
        info!("Updating preferences");
        let mut report = LearningReport::default();

        self.apply_observations(store, observations, now, &mut report)?;
        self.apply_negative_signal(store, now, &mut report)?;
        self.apply_decay(store, now, &mut report)?;

        info!(
            "Preferences updated: {} observed, {} boosted, {} penalized, {} decayed, {} skipped",
            report.observed, report.boosted, report.penalized, report.decayed, report.skipped
        );
        Ok(report)
    }

    fn apply_observations(
        &self,
        store: &dyn CuratorStore,
        observations: &[PlayObservation],
        now: DateTime<Utc>,
        report: &mut LearningReport,
    ) -> Result<()> {
        for observation in observations {
            match self.observe(store, observation, now) {
                Ok(Some(boosted)) => {
                    report.observed += 1;
                    if boosted {
                        report.boosted += 1;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        "Skipping play observation for {}: {:#}",
                        observation.track_id, e
                    );
                    report.skipped += 1;
                }
            }
        }
        Ok(())
    }

    /// `Ok(None)` when the track is not tracked by the store.
    fn observe(
        &self,
        store: &dyn CuratorStore,
        observation: &PlayObservation,
        now: DateTime<Utc>,
    ) -> Result<Option<bool>> {
        let mut preference = match store.preference(&observation.track_id)? {
            Some(preference) if preference.is_malformed() => {
                anyhow::bail!("stored preference is malformed");
            }
            Some(preference) => preference,
            None => {
                if store.track_by_catalog_id(&observation.track_id)?.is_none() {
                    return Ok(None);
                }
                Preference::new(&observation.track_id)
            }
        };

        // First sighting sets the baseline, even when a playlist position
        // created the record earlier
        if !preference.in_library {
            preference.play_count = observation.play_count;
            preference.play_count_previous = observation.play_count;
            preference.in_library = true;
            store.save_preference(&preference)?;
            return Ok(Some(false));
        }

        let delta = observation.play_count.saturating_sub(preference.play_count);
        preference.play_count_previous = preference.play_count;
        preference.play_count = observation.play_count;
        preference.in_library = true;

        let boosted = delta > 0;
        if boosted {
            let weight = boosted_weight(preference.weight, delta);
            debug!(
                "{}: {} new plays, weight {:.3} -> {:.3}",
                preference.track_id, delta, preference.weight, weight
            );
            preference.set_weight(weight);
            preference.last_played_at = Some(now);
        }

        store.save_preference(&preference)?;
        Ok(Some(boosted))
    }

    fn apply_negative_signal(
        &self,
        store: &dyn CuratorStore,
        now: DateTime<Utc>,
        report: &mut LearningReport,
    ) -> Result<()> {
        let added_before = now - Duration::hours(i64::from(self.hot_zone_hours));
        let candidates = store.hot_zone_candidates(self.hot_zone_size, added_before)?;

        for mut preference in candidates {
            if preference.is_malformed() {
                warn!("Skipping malformed preference for {}", preference.track_id);
                report.skipped += 1;
                continue;
            }
            let weight = penalized_weight(preference.weight);
            debug!(
                "Negative signal for {}: weight {:.3} -> {:.3}",
                preference.track_id, preference.weight, weight
            );
            preference.set_weight(weight);
            match store.save_preference(&preference) {
                Ok(()) => report.penalized += 1,
                Err(e) => {
                    warn!("Failed to penalize {}: {:#}", preference.track_id, e);
                    report.skipped += 1;
                }
            }
        }
        Ok(())
    }

    fn apply_decay(
        &self,
        store: &dyn CuratorStore,
        now: DateTime<Utc>,
        report: &mut LearningReport,
    ) -> Result<()> {
        let played_before = now - Duration::days(i64::from(self.decay_days));
        let candidates = store.decaying_candidates(played_before)?;

        for mut preference in candidates {
            let Some(last_played_at) = preference.last_played_at else {
                continue;
            };
            if preference.is_malformed() {
                warn!("Skipping malformed preference for {}", preference.track_id);
                report.skipped += 1;
                continue;
            }
            let days_since = (now - last_played_at).num_days();
            let weight = decayed_weight(preference.weight, days_since, self.decay_days);
            preference.set_weight(weight);
            match store.save_preference(&preference) {
                Ok(()) => report.decayed += 1,
                Err(e) => {
                    warn!("Failed to decay {}: {:#}", preference.track_id, e);
                    report.skipped += 1;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::Track;
    use crate::store::SqliteCuratorStore;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn engine() -> LearningEngine {
        LearningEngine::new(10, 48, 14)
    }

    fn store_with_tracks(ids: &[&str]) -> SqliteCuratorStore {
        let store = SqliteCuratorStore::in_memory().unwrap();
        for id in ids {
            store.upsert_track(&Track::new(id, id, "Artist")).unwrap();
        }
        store
    }

    #[test]
    fn test_weight_rules() {
        assert_relative_eq!(penalized_weight(1.0), 0.7);
        assert_relative_eq!(penalized_weight(0.12), 0.1);
        assert_relative_eq!(boosted_weight(1.0, 2), 1.2);
        assert_relative_eq!(boosted_weight(4.8, 10), 5.0);
        assert_relative_eq!(decayed_weight(1.0, 20, 14), 0.88);
        assert_relative_eq!(decayed_weight(1.0, 200, 14), 0.5);
        assert_relative_eq!(decayed_weight(0.15, 200, 14), 0.1);
    }

    #[test]
    fn test_first_observation_sets_baseline_without_boost() {
        let store = store_with_tracks(&["t1"]);
        let observations = vec![PlayObservation {
            track_id: "t1".to_string(),
            play_count: 7,
        }];

        let report = engine().update(&store, &observations, now()).unwrap();
        assert_eq!(report.observed, 1);
        assert_eq!(report.boosted, 0);

        let pref = store.preference("t1").unwrap().unwrap();
        assert_eq!(pref.play_count, 7);
        assert_eq!(pref.play_count_previous, 7);
        assert!(pref.in_library);
        assert_relative_eq!(pref.weight, 1.0);
    }

    #[test]
    fn test_new_plays_boost_weight() {
        let store = store_with_tracks(&["t1"]);
        let mut pref = Preference::new("t1");
        pref.play_count = 3;
        pref.play_count_previous = 3;
        pref.in_library = true;
        store.save_preference(&pref).unwrap();

        let observations = vec![PlayObservation {
            track_id: "t1".to_string(),
            play_count: 5,
        }];
        let report = engine().update(&store, &observations, now()).unwrap();
        assert_eq!(report.boosted, 1);

        let pref = store.preference("t1").unwrap().unwrap();
        assert_relative_eq!(pref.weight, 1.2);
        assert_eq!(pref.play_count_previous, 3);
        assert_eq!(pref.play_count, 5);
        assert_eq!(pref.last_played_at, Some(now()));
    }

    #[test]
    fn test_positioned_track_first_observed_sets_baseline() {
        let store = store_with_tracks(&["placed"]);
        store
            .record_playlist_position("placed", 4, now() - Duration::hours(2))
            .unwrap();

        let observations = vec![PlayObservation {
            track_id: "placed".to_string(),
            play_count: 12,
        }];
        let report = engine().update(&store, &observations, now()).unwrap();
        assert_eq!(report.observed, 1);
        assert_eq!(report.boosted, 0);

        let pref = store.preference("placed").unwrap().unwrap();
        assert_eq!((pref.play_count, pref.play_count_previous), (12, 12));
        assert_eq!(pref.playlist_position, Some(4));
        assert_relative_eq!(pref.weight, 1.0);
    }

    #[test]
    fn test_untracked_observation_is_ignored() {
        let store = store_with_tracks(&[]);
        let observations = vec![PlayObservation {
            track_id: "ghost".to_string(),
            play_count: 4,
        }];
        let report = engine().update(&store, &observations, now()).unwrap();
        assert_eq!(report, LearningReport::default());
        assert!(store.preference("ghost").unwrap().is_none());
    }

    #[test]
    fn test_unplayed_hot_zone_track_is_penalized() {
        let store = store_with_tracks(&["hot", "fresh", "deep"]);
        let fifty_hours_ago = now() - Duration::hours(50);
        store.record_playlist_position("hot", 3, fifty_hours_ago).unwrap();
        store.record_playlist_position("deep", 30, fifty_hours_ago).unwrap();
        store.record_playlist_position("fresh", 1, now() - Duration::hours(5)).unwrap();

        let report = engine().update(&store, &[], now()).unwrap();
        assert_eq!(report.penalized, 1);
        assert_relative_eq!(store.preference("hot").unwrap().unwrap().weight, 0.7);
        assert_relative_eq!(store.preference("fresh").unwrap().unwrap().weight, 1.0);
        assert_relative_eq!(store.preference("deep").unwrap().unwrap().weight, 1.0);
    }

    #[test]
    fn test_hot_zone_bounds_are_inclusive() {
        let store = store_with_tracks(&["last-slot", "below-zone", "just-due", "not-yet"]);
        let due = now() - Duration::hours(48);
        store.record_playlist_position("last-slot", 10, due).unwrap();
        store.record_playlist_position("below-zone", 11, due).unwrap();
        store.record_playlist_position("just-due", 1, due).unwrap();
        store
            .record_playlist_position("not-yet", 2, now() - Duration::hours(47))
            .unwrap();

        let report = engine().update(&store, &[], now()).unwrap();
        assert_eq!(report.penalized, 2);
        assert_relative_eq!(store.preference("last-slot").unwrap().unwrap().weight, 0.7);
        assert_relative_eq!(store.preference("just-due").unwrap().unwrap().weight, 0.7);
        assert_relative_eq!(store.preference("below-zone").unwrap().unwrap().weight, 1.0);
        assert_relative_eq!(store.preference("not-yet").unwrap().unwrap().weight, 1.0);
    }

    #[test]
    fn test_hot_zone_skips_track_whose_last_observation_rose() {
        let store = store_with_tracks(&["rose", "flat"]);
        let three_days_ago = now() - Duration::days(3);
        for id in ["rose", "flat"] {
            store.record_playlist_position(id, 1, three_days_ago).unwrap();
            let mut pref = store.preference(id).unwrap().unwrap();
            pref.play_count = 5;
            pref.play_count_previous = 3;
            pref.in_library = true;
            store.save_preference(&pref).unwrap();
        }

        // "flat" is observed again at 5 plays; "rose" is not observed this cycle
        let observations = vec![PlayObservation {
            track_id: "flat".to_string(),
            play_count: 5,
        }];
        let report = engine().update(&store, &observations, now()).unwrap();
        assert_eq!(report.boosted, 0);
        assert_eq!(report.penalized, 1);

        let rose = store.preference("rose").unwrap().unwrap();
        assert_eq!((rose.play_count, rose.play_count_previous), (5, 3));
        assert_relative_eq!(rose.weight, 1.0);
        let flat = store.preference("flat").unwrap().unwrap();
        assert_eq!((flat.play_count, flat.play_count_previous), (5, 5));
        assert_relative_eq!(flat.weight, 0.7);
    }

    #[test]
    fn test_played_hot_zone_track_is_not_penalized() {
        let store = store_with_tracks(&["hot"]);
        store.record_playlist_position("hot", 1, now() - Duration::days(3)).unwrap();
        let mut pref = store.preference("hot").unwrap().unwrap();
        pref.in_library = true;
        store.save_preference(&pref).unwrap();

        let observations = vec![PlayObservation {
            track_id: "hot".to_string(),
            play_count: 2,
        }];
        let report = engine().update(&store, &observations, now()).unwrap();
        assert_eq!(report.boosted, 1);
        assert_eq!(report.penalized, 0);
        assert_relative_eq!(store.preference("hot").unwrap().unwrap().weight, 1.2);
    }

    #[test]
    fn test_stale_track_decays() {
        let store = store_with_tracks(&["stale", "recent"]);
        let mut stale = Preference::new("stale");
        stale.last_played_at = Some(now() - Duration::days(20));
        store.save_preference(&stale).unwrap();
        let mut recent = Preference::new("recent");
        recent.last_played_at = Some(now() - Duration::days(2));
        store.save_preference(&recent).unwrap();

        let report = engine().update(&store, &[], now()).unwrap();
        assert_eq!(report.decayed, 1);
        assert_relative_eq!(store.preference("stale").unwrap().unwrap().weight, 0.88);
        assert_relative_eq!(store.preference("recent").unwrap().unwrap().weight, 1.0);
    }

    #[test]
    fn test_penalty_and_decay_compound() {
        let store = store_with_tracks(&["both"]);
        store.record_playlist_position("both", 1, now() - Duration::days(20)).unwrap();
        let mut pref = store.preference("both").unwrap().unwrap();
        pref.last_played_at = Some(now() - Duration::days(20));
        store.save_preference(&pref).unwrap();

        let report = engine().update(&store, &[], now()).unwrap();
        assert_eq!(report.penalized, 1);
        assert_eq!(report.decayed, 1);
        assert_relative_eq!(
            store.preference("both").unwrap().unwrap().weight,
            0.7 * 0.88,
            epsilon = 1e-9
        );
    }
}
