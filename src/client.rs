use crate::config::Config;
use crate::models::{
    AlbumPayload, ApiError, ArtistInfo2Payload, ArtistPayload, Empty, Envelope, PlaylistPayload,
    PlaylistsPayload, Search3Payload, Song, TopSongsPayload,
};
use crate::service::{Artist, LibraryTrack, MusicService, PlaylistSummary, ServiceError, Track};
use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use ureq::Agent;
use urlencoding::encode;

const API_VERSION: &str = "1.16.1";
const CLIENT_NAME: &str = "playlist-curator";
const LIBRARY_PAGE_SIZE: usize = 500;
const MAX_LIBRARY_PAGES: usize = 200;

/// A Subsonic API client using MD5 salt + token authentication
pub struct SubsonicClient {
    agent: Agent,
    base_url: String,
    username: String,
    password: String,
}

impl SubsonicClient {
    /// Create a new client with configuration from environment
    pub fn new(config: Config) -> Self {
        SubsonicClient {
            agent: Agent::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username,
            password: config.password,
        }
    }

    /// Generate authentication parameters using salt + token method
    fn generate_auth_params(&self) -> (String, String) {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        // Random salt, at least 6 characters
        let salt = format!("{:x}", md5::compute(format!("{nanos}{CLIENT_NAME}")))[..8].to_string();

        // token = md5(password + salt)
        let token = format!("{:x}", md5::compute(format!("{}{}", self.password, salt)));

        (salt, token)
    }

    fn build_url(&self, endpoint: &str, params: &[(&str, &str)]) -> String {
        let (salt, token) = self.generate_auth_params();
        let mut url = format!(
            "{}/rest/{}?u={}&t={}&s={}&v={}&c={}&f=json",
            self.base_url,
            endpoint,
            encode(&self.username),
            token,
            salt,
            API_VERSION,
            CLIENT_NAME
        );
        for (key, value) in params {
            url.push_str(&format!("&{}={}", key, encode(value)));
        }
        url
    }

    /// Perform a GET request and decode the Subsonic envelope, mapping failures to `ServiceError`
    fn get<T: DeserializeOwned>(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<T> {
        let url = self.build_url(endpoint, params);
        debug!("GET {endpoint} ({} params)", params.len());

        let response = self.agent.get(&url).call().map_err(|e| match e {
            ureq::Error::Status(401, _) | ureq::Error::Status(403, _) => {
                ServiceError::Authentication(format!("{endpoint}: {e}"))
            }
            other => ServiceError::Request(format!("{endpoint}: {other}")),
        })?;

        let response_text = response
            .into_string()
            .map_err(|e| ServiceError::Request(format!("{endpoint}: {e}")))?;

        let parsed: Envelope<T> = serde_json::from_str(&response_text)
            .map_err(|e| ServiceError::Parse(format!("{endpoint}: {e}")))?;

        let response = parsed.response;
        if response.status != "ok" {
            let error = response.error.unwrap_or(ApiError {
                code: 0,
                message: String::new(),
            });
            // 40-44 cover wrong credentials and unsupported auth mechanisms
            if (40..=44).contains(&error.code) {
                return Err(ServiceError::Authentication(error.message).into());
            }
            return Err(ServiceError::Api {
                status: response.status,
                message: format!("{} (code {})", error.message, error.code),
            }
            .into());
        }

        Ok(response.payload)
    }

    /// Test the API connection with a simple ping
    pub fn ping(&self) -> Result<()> {
        self.get::<Empty>("ping", &[])?;
        Ok(())
    }

    fn artist_name(&self, artist_id: &str) -> Result<Option<String>> {
        let payload: ArtistPayload = self.get("getArtist", &[("id", artist_id)])?;
        Ok(payload.artist.map(|a| a.name))
    }

    /// Day-precision release dates for the albums of `songs`. Albums the
    /// server has no full date for, or that fail to load, are left out.
    fn album_release_dates(&self, songs: &[Song]) -> HashMap<String, DateTime<Utc>> {
        let album_ids: HashSet<&str> = songs
            .iter()
            .filter_map(|s| s.album_id.as_deref())
            .collect();
        let mut dates = HashMap::new();
        for album_id in album_ids {
            match self.get::<AlbumPayload>("getAlbum", &[("id", album_id)]) {
                Ok(payload) => {
                    if let Some(released_at) = payload.album.and_then(|a| a.released_at()) {
                        dates.insert(album_id.to_string(), released_at);
                    }
                }
                Err(e) => debug!("No release date for album {album_id}: {e:#}"),
            }
        }
        dates
    }
}

impl MusicService for SubsonicClient {
    fn search_artist(&self, name: &str) -> Result<Option<Artist>> {
        let payload: Search3Payload = self.get(
            "search3",
            &[
                ("query", name),
                ("artistCount", "1"),
                ("albumCount", "0"),
                ("songCount", "0"),
            ],
        )?;
        Ok(payload
            .search_result
            .unwrap_or_default()
            .artist
            .into_iter()
            .next()
            .map(Artist::from))
    }

    fn related_artists(&self, artist_id: &str, limit: usize) -> Result<Vec<Artist>> {
        let count = limit.to_string();
        let payload: ArtistInfo2Payload =
            self.get("getArtistInfo2", &[("id", artist_id), ("count", &count)])?;
        Ok(payload
            .artist_info
            .unwrap_or_default()
            .similar_artist
            .into_iter()
            .take(limit)
            .map(Artist::from)
            .collect())
    }

    fn top_tracks(&self, artist_id: &str, limit: usize) -> Result<Vec<Track>> {
        // getTopSongs is keyed by artist name, not id
        let Some(name) = self.artist_name(artist_id)? else {
            warn!("Artist {artist_id} not found on server, no top tracks");
            return Ok(Vec::new());
        };
        let count = limit.to_string();
        let payload: TopSongsPayload =
            self.get("getTopSongs", &[("artist", &name), ("count", &count)])?;
        let mut songs = payload.top_songs.unwrap_or_default().song;
        songs.truncate(limit);

        // Songs only carry a year; albums may know the exact day
        let album_dates = self.album_release_dates(&songs);
        Ok(songs
            .into_iter()
            .map(|song| {
                let album_date = song
                    .album_id
                    .as_ref()
                    .and_then(|id| album_dates.get(id))
                    .copied();
                let mut track = Track::from(song);
                if album_date.is_some() {
                    track.released_at = album_date;
                }
                track
            })
            .collect())
    }

    /// Page through the whole library with an empty search3 query, keeping unique songs
    fn all_library_tracks(&self) -> Result<Vec<LibraryTrack>> {
        let mut all_songs: Vec<Song> = Vec::new();
        let mut seen_ids = HashSet::new();
        let page_size = LIBRARY_PAGE_SIZE.to_string();

        for page in 0..MAX_LIBRARY_PAGES {
            let offset = (page * LIBRARY_PAGE_SIZE).to_string();
            let payload: Search3Payload = self.get(
                "search3",
                &[
                    ("query", ""),
                    ("artistCount", "0"),
                    ("albumCount", "0"),
                    ("songCount", &page_size),
                    ("songOffset", &offset),
                ],
            )?;
            let batch = payload.search_result.unwrap_or_default().song;
            let batch_size = batch.len();

            for song in batch {
                if seen_ids.insert(song.id.clone()) {
                    all_songs.push(song);
                }
            }
            debug!(
                "Library page {}: got {} songs (total: {})",
                page + 1,
                batch_size,
                all_songs.len()
            );

            if batch_size < LIBRARY_PAGE_SIZE {
                break;
            }
        }

        info!("Fetched {} library songs", all_songs.len());
        Ok(all_songs.into_iter().map(LibraryTrack::from).collect())
    }

    fn create_playlist(
        &self,
        name: &str,
        description: &str,
        track_ids: &[String],
    ) -> Result<String> {
        let mut params: Vec<(&str, &str)> = vec![("name", name)];
        params.extend(track_ids.iter().map(|id| ("songId", id.as_str())));

        info!("Creating playlist '{}' with {} songs", name, track_ids.len());
        let payload: PlaylistPayload = self.get("createPlaylist", &params)?;
        let playlist = payload.playlist.ok_or_else(|| {
            ServiceError::Parse("no playlist returned in create response".to_string())
        })?;

        if !description.is_empty() {
            self.get::<Empty>(
                "updatePlaylist",
                &[("playlistId", &playlist.id), ("comment", description)],
            )?;
        }

        Ok(playlist.id)
    }

    fn add_tracks(&self, playlist_id: &str, track_ids: &[String]) -> Result<()> {
        if track_ids.is_empty() {
            return Ok(());
        }
        let mut params: Vec<(&str, &str)> = vec![("playlistId", playlist_id)];
        params.extend(track_ids.iter().map(|id| ("songIdToAdd", id.as_str())));

        info!(
            "Adding {} songs to playlist {}",
            track_ids.len(),
            playlist_id
        );
        self.get::<Empty>("updatePlaylist", &params)?;
        Ok(())
    }

    fn list_playlists(&self) -> Result<Vec<PlaylistSummary>> {
        let payload: PlaylistsPayload = self.get("getPlaylists", &[])?;
        Ok(payload
            .playlists
            .unwrap_or_default()
            .playlist
            .iter()
            .map(PlaylistSummary::from)
            .collect())
    }

    fn playlist_tracks(&self, playlist_id: &str) -> Result<Vec<Track>> {
        let payload: PlaylistPayload = self.get("getPlaylist", &[("id", playlist_id)])?;
        Ok(payload
            .playlist
            .map(|p| p.entry.into_iter().map(Track::from).collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> SubsonicClient {
        SubsonicClient::new(Config {
            base_url: "http://music.local/".to_string(),
            username: "grace hopper".to_string(),
            password: "secret".to_string(),
        })
    }

    #[test]
    fn test_auth_token_is_md5_of_password_and_salt() {
        let client = client();
        let (salt, token) = client.generate_auth_params();
        assert_eq!(salt.len(), 8);
        assert_eq!(token, format!("{:x}", md5::compute(format!("secret{salt}"))));
    }

    #[test]
    fn test_build_url_encodes_params() {
        let url = client().build_url("search3", &[("query", "Sigur Rós & co")]);
        assert!(url.starts_with("http://music.local/rest/search3?u=grace%20hopper&t="));
        assert!(url.contains("&f=json"));
        assert!(url.ends_with("&query=Sigur%20R%C3%B3s%20%26%20co"));
    }
}
