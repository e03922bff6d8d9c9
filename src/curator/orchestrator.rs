use super::builder::PlaylistBuilder;
use super::category::{Category, CategoryPools};
use super::classifier::CategoryClassifier;
use super::dedupe::DeduplicationFilter;
use super::learning::{LearningEngine, LearningReport, PlayObservation};
use super::settings::CuratorSettings;
use crate::service::{
    Artist, ArtistFilter, LibraryTrack, MusicService, Notifier, ServiceError, Track,
};
use crate::store::{CuratorStore, DEFAULT_WEIGHT, PlaylistState, RunLog, RunStatus};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

const RUN_TYPE_REFRESH: &str = "refresh";

/// Outcome of one refresh cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshSummary {
    pub status: RunStatus,
    pub playlist_id: Option<String>,
    pub artists_discovered: usize,
    /// Tracks chosen by the builder, in playlist order.
    pub track_ids: Vec<String>,
    /// Tracks actually sent to the service.
    pub tracks_added: usize,
    pub duration_seconds: f64,
    pub learning: Option<LearningReport>,
}

struct Publication {
    playlist_id: String,
    tracks_added: usize,
}

/// Runs the refresh workflow against the configured collaborators.
pub struct Orchestrator<'a> {
    settings: &'a CuratorSettings,
    service: &'a dyn MusicService,
    filter: &'a dyn ArtistFilter,
    store: &'a dyn CuratorStore,
    notifier: &'a dyn Notifier,
    builder: PlaylistBuilder,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        settings: &'a CuratorSettings,
        service: &'a dyn MusicService,
        filter: &'a dyn ArtistFilter,
        store: &'a dyn CuratorStore,
        notifier: &'a dyn Notifier,
    ) -> Self {
        Self {
            settings,
            service,
            filter,
            store,
            notifier,
            builder: PlaylistBuilder::default(),
        }
    }

    pub fn with_builder(mut self, builder: PlaylistBuilder) -> Self {
        self.builder = builder;
        self
    }

    /// Run one full cycle and record its outcome in the run log.
    ///
    /// A dry run skips learning and publishing.
    pub fn refresh(&self, dry_run: bool) -> Result<RefreshSummary> {
        let started = Instant::now();
        info!(
            "Starting playlist refresh for {}{}",
            self.settings.user.name,
            if dry_run { " (dry run)" } else { "" }
        );

        match self.run_cycle(dry_run, Utc::now()) {
            Ok(mut summary) => {
                summary.duration_seconds = started.elapsed().as_secs_f64();
                self.record(
                    summary.status,
                    summary.tracks_added,
                    summary.duration_seconds,
                    None,
                );
                info!(
                    "Refresh finished with status {}: {} tracks built, {} added in {:.2}s",
                    summary.status,
                    summary.track_ids.len(),
                    summary.tracks_added,
                    summary.duration_seconds
                );
                Ok(summary)
            }
            Err(e) => {
                let duration = started.elapsed().as_secs_f64();
                let message = format!("{e:#}");
                let status = if is_auth_failure(&e) {
                    error!("Refresh failed, authentication rejected: {message}");
                    self.notifier.auth_failure(&self.settings.user.name, &message);
                    RunStatus::AuthFailure
                } else {
                    error!("Refresh failed: {message}");
                    RunStatus::Failure
                };
                self.record(status, 0, duration, Some(message));
                Err(e)
            }
        }
    }

    fn record(
        &self,
        status: RunStatus,
        tracks_added: usize,
        duration_seconds: f64,
        error_message: Option<String>,
    ) {
        let log = RunLog {
            run_type: RUN_TYPE_REFRESH.to_string(),
            status,
            tracks_added,
            duration_seconds,
            error_message,
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.append_run_log(&log) {
            warn!("Failed to record run log: {e:#}");
        }
    }

    fn run_cycle(&self, dry_run: bool, now: DateTime<Utc>) -> Result<RefreshSummary> {
        let algorithm = &self.settings.algorithm;
        let library = self
            .service
            .all_library_tracks()
            .context("Failed to fetch library")?;
        info!("Library holds {} tracks", library.len());

        let artists = self.discover_artists()?;
        let candidates = self.collect_candidates(&artists);

        let classifier = CategoryClassifier::for_library(
            &library,
            now,
            algorithm.new_release_days,
            self.settings.filters.min_release_year,
        );
        let mut pools = classifier.classify_and_store(candidates, self.store)?;

        // Hot-zone penalties only apply to tracks still in the playlist
        let current = if dry_run {
            None
        } else {
            let current = self.find_playlist(&self.settings.user.playlist_name)?;
            let ids: Vec<&str> = current
                .iter()
                .flat_map(|(_, tracks)| tracks.iter().map(|t| t.id.as_str()))
                .collect();
            self.record_positions(&ids, now)?;
            Some(current)
        };

        // Favorites ranking reads the weights learned here
        let learning = if dry_run {
            None
        } else {
            Some(self.update_preferences(&library, now)?)
        };
        pools.extend(Category::Favorites, self.favorites(&artists, &library)?);

        let removed = pools.dedup();
        debug!(
            "Candidate pools hold {} tracks ({} duplicates dropped)",
            pools.total(),
            removed
        );

        let track_ids = self
            .builder
            .build(pools.ids(), algorithm.playlist_size, &algorithm.weights);

        let (status, publication) = if let Some(current) = current {
            let publication = self.publish(&track_ids, &pools, current, now)?;
            let status = if !track_ids.is_empty() && publication.tracks_added == 0 {
                RunStatus::Partial
            } else {
                RunStatus::Success
            };
            (status, Some(publication))
        } else {
            (RunStatus::Success, None)
        };

        Ok(RefreshSummary {
            status,
            tracks_added: publication.as_ref().map_or(0, |p| p.tracks_added),
            playlist_id: publication.map(|p| p.playlist_id),
            artists_discovered: artists.len(),
            track_ids,
            duration_seconds: 0.0,
            learning,
        })
    }

    /// Feed the library's play counts into the learning engine.
    pub fn update_preferences(
        &self,
        library: &[LibraryTrack],
        now: DateTime<Utc>,
    ) -> Result<LearningReport> {
        let algorithm = &self.settings.algorithm;
        let observations: Vec<PlayObservation> = library
            .iter()
            .map(|lt| PlayObservation {
                track_id: lt.track.id.clone(),
                play_count: lt.play_count,
            })
            .collect();

        LearningEngine::new(
            algorithm.hot_zone_size,
            algorithm.hot_zone_hours,
            algorithm.decay_days,
        )
        .update(self.store, &observations, now)
    }

    /// Seed artists plus related artists passing the artist filter.
    pub fn discover_artists(&self) -> Result<Vec<Artist>> {
        let mut seeds = Vec::new();
        for name in &self.settings.seeds.artists {
            match self.service.search_artist(name)? {
                Some(mut artist) => {
                    artist.is_seed = true;
                    self.store.upsert_artist(&artist)?;
                    debug!("Resolved seed artist {} -> {}", name, artist.id);
                    seeds.push(artist);
                }
                None => warn!("Seed artist '{name}' not found in catalog"),
            }
        }

        let seed_ids: HashSet<String> = seeds.iter().map(|a| a.id.clone()).collect();
        let mut related_names = Vec::new();
        let mut seen_related = HashSet::new();
        for seed in &seeds {
            let related = self
                .service
                .related_artists(&seed.id, self.settings.algorithm.related_artist_limit)?;
            for artist in related {
                if seed_ids.contains(&artist.id) || !seen_related.insert(artist.id.clone()) {
                    continue;
                }
                self.store.upsert_artist(&artist)?;
                related_names.push(artist.name);
            }
        }

        let passed = if related_names.is_empty() {
            Vec::new()
        } else {
            self.filter.filter_by_criteria(
                &related_names,
                &self.settings.filters.countries,
                self.settings.filters.min_release_year,
            )?
        };

        let mut artists = seeds;
        for name in &passed {
            match self.store.artist_by_name(name)? {
                Some(artist) if !seed_ids.contains(&artist.id) => artists.push(artist),
                Some(_) => {}
                None => warn!("Filtered artist '{name}' is not in the store"),
            }
        }

        info!(
            "Discovered {} artists ({} seeds, {} of {} related passed the filter)",
            artists.len(),
            seed_ids.len(),
            passed.len(),
            related_names.len()
        );
        Ok(artists)
    }

    /// Top tracks per artist. A failure for one artist does not stop the others.
    fn collect_candidates(&self, artists: &[Artist]) -> Vec<Track> {
        let delay = Duration::from_millis(self.settings.algorithm.request_delay_ms);
        let mut candidates = Vec::new();

        for (i, artist) in artists.iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                std::thread::sleep(delay);
            }
            match self
                .service
                .top_tracks(&artist.id, self.settings.algorithm.top_track_limit)
            {
                Ok(tracks) => {
                    debug!("{}: {} top tracks", artist.name, tracks.len());
                    candidates.extend(tracks);
                }
                Err(e) => warn!("Failed to fetch top tracks for {}: {:#}", artist.name, e),
            }
        }

        info!(
            "Collected {} candidate tracks from {} artists",
            candidates.len(),
            artists.len()
        );
        candidates
    }

    /// Most-played library tracks by discovered artists, ranked by plays times learned weight.
    fn favorites(&self, artists: &[Artist], library: &[LibraryTrack]) -> Result<Vec<Track>> {
        let names: HashSet<String> = artists.iter().map(|a| a.name.to_lowercase()).collect();

        let mut ranked = Vec::new();
        for lt in library {
            if lt.play_count == 0 || !names.contains(&lt.track.artist_name.to_lowercase()) {
                continue;
            }
            let weight = self
                .store
                .preference(&lt.track.id)?
                .map_or(DEFAULT_WEIGHT, |p| p.weight);
            ranked.push((f64::from(lt.play_count) * weight, &lt.track));
        }
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0));

        let favorites: Vec<Track> = ranked
            .into_iter()
            .take(self.settings.algorithm.favorites_limit)
            .map(|(_, track)| track.clone())
            .collect();
        for track in &favorites {
            self.store.upsert_track(track)?;
        }

        info!("Collected {} favorites", favorites.len());
        Ok(favorites)
    }

    /// Add the built tracks to the managed playlist found at the start of
    /// the cycle, creating it if there was none.
    fn publish(
        &self,
        track_ids: &[String],
        pools: &CategoryPools,
        current: Option<(String, Vec<Track>)>,
        now: DateTime<Utc>,
    ) -> Result<Publication> {
        let playlist_name = &self.settings.user.playlist_name;
        let (playlist_id, existing, new_ids) = match current {
            Some((playlist_id, existing)) => {
                info!(
                    "Reusing playlist '{}' ({}) with {} tracks",
                    playlist_name,
                    playlist_id,
                    existing.len()
                );
                let new_ids = self.dedupe_against_existing(track_ids, &existing, pools)?;
                if new_ids.is_empty() {
                    info!("No new tracks to add to '{playlist_name}'");
                } else {
                    self.service
                        .add_tracks(&playlist_id, &new_ids)
                        .context("Failed to add tracks to playlist")?;
                }
                (playlist_id, existing, new_ids)
            }
            None => {
                let description = format!(
                    "Personalized playlist for {}, refreshed by playlist-curator",
                    self.settings.user.name
                );
                let playlist_id = self
                    .service
                    .create_playlist(playlist_name, &description, track_ids)
                    .context("Failed to create playlist")?;
                info!(
                    "Created playlist '{}' ({}) with {} tracks",
                    playlist_name,
                    playlist_id,
                    track_ids.len()
                );
                (playlist_id, Vec::new(), track_ids.to_vec())
            }
        };

        let ordered: Vec<&str> = existing
            .iter()
            .map(|t| t.id.as_str())
            .chain(new_ids.iter().map(String::as_str))
            .collect();
        self.record_positions(&ordered, now)?;

        self.store.save_playlist_state(&PlaylistState {
            playlist_id: playlist_id.clone(),
            playlist_name: playlist_name.clone(),
            track_count: ordered.len(),
            last_refresh_at: now,
        })?;

        Ok(Publication {
            playlist_id,
            tracks_added: new_ids.len(),
        })
    }

    /// Playlists named `name`, preferring one that already holds tracks.
    fn find_playlist(&self, name: &str) -> Result<Option<(String, Vec<Track>)>> {
        let matching: Vec<_> = self
            .service
            .list_playlists()
            .context("Failed to list playlists")?
            .into_iter()
            .filter(|p| p.name == name)
            .collect();

        let Some(first) = matching.first() else {
            return Ok(None);
        };
        for playlist in &matching {
            let tracks = self.service.playlist_tracks(&playlist.id)?;
            if !tracks.is_empty() {
                return Ok(Some((playlist.id.clone(), tracks)));
            }
        }
        Ok(Some((first.id.clone(), Vec::new())))
    }

    /// Ids whose songs are not already in `existing`, in input order.
    /// Ids with no known track details are dropped.
    pub fn dedupe_against_existing(
        &self,
        track_ids: &[String],
        existing: &[Track],
        pools: &CategoryPools,
    ) -> Result<Vec<String>> {
        let candidates = self.resolve_tracks(track_ids, pools)?;
        Ok(DeduplicationFilter::new(existing).filter_new(&candidates))
    }

    fn resolve_tracks(&self, track_ids: &[String], pools: &CategoryPools) -> Result<Vec<Track>> {
        let mut tracks = Vec::with_capacity(track_ids.len());
        for id in track_ids {
            if let Some((_, track)) = pools.find(id) {
                tracks.push(track.clone());
            } else if let Some(track) = self.store.track_by_catalog_id(id)? {
                tracks.push(track);
            } else {
                warn!("Dropping track {id}: no details available for duplicate check");
            }
        }
        Ok(tracks)
    }

    /// 1-based positions for every track the store knows about. Tracks that
    /// left the playlist lose their position.
    fn record_positions(&self, ordered: &[&str], now: DateTime<Utc>) -> Result<()> {
        self.store.clear_playlist_positions_except(ordered, now)?;
        let mut known: HashMap<&str, bool> = HashMap::new();
        for (i, &id) in ordered.iter().enumerate() {
            let is_known = match known.get(id) {
                Some(&k) => k,
                None => {
                    let k = self.store.track_by_catalog_id(id)?.is_some();
                    known.insert(id, k);
                    k
                }
            };
            if is_known {
                self.store.record_playlist_position(id, (i + 1) as u32, now)?;
            }
        }
        Ok(())
    }
}

fn is_auth_failure(e: &anyhow::Error) -> bool {
    e.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<ServiceError>(),
            Some(ServiceError::Authentication(_))
        )
    })
}
