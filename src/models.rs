use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::service::{Artist, LibraryTrack, PlaylistSummary, Track};

/// Song structure with the fields available from the OpenSubsonic API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Song {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub album: String,
    #[serde(rename = "albumId")]
    pub album_id: Option<String>,
    pub duration: Option<u32>,
    pub year: Option<i32>,
    #[serde(rename = "playCount")]
    pub play_count: Option<u32>,
    #[serde(default)]
    pub isrc: Vec<String>, // OpenSubsonic extension
}

impl Default for Song {
    fn default() -> Self {
        Song {
            id: String::new(),
            title: "Unknown".to_string(),
            artist: "Unknown".to_string(),
            album: "Unknown".to_string(),
            album_id: None,
            duration: None,
            year: None,
            play_count: None,
            isrc: Vec::new(),
        }
    }
}

impl From<Song> for Track {
    fn from(song: Song) -> Self {
        // A bare year may mean any day of it, so it counts as the last one
        let released_at = song
            .year
            .and_then(|year| Utc.with_ymd_and_hms(year, 12, 31, 23, 59, 59).single());
        Track {
            id: song.id,
            name: song.title,
            artist_name: song.artist,
            album_name: song.album,
            duration_ms: song.duration.unwrap_or(0).saturating_mul(1000),
            released_at,
            isrc: song.isrc.into_iter().next(),
        }
    }
}

impl From<Song> for LibraryTrack {
    fn from(song: Song) -> Self {
        let play_count = song.play_count.unwrap_or(0);
        LibraryTrack {
            track: song.into(),
            play_count,
        }
    }
}

/// Outer wrapper shared by every Subsonic JSON response
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    #[serde(rename = "subsonic-response")]
    pub response: SubsonicResponse<T>,
}

#[derive(Debug, Deserialize)]
pub struct SubsonicResponse<T> {
    pub status: String,
    pub error: Option<ApiError>,
    #[serde(flatten)]
    pub payload: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    pub code: u32,
    #[serde(default)]
    pub message: String,
}

/// Payload for responses that carry nothing but a status (ping, updatePlaylist)
#[derive(Debug, Deserialize)]
pub struct Empty {}

#[derive(Debug, Deserialize)]
pub struct TopSongsPayload {
    #[serde(rename = "topSongs")]
    pub top_songs: Option<SongList>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SongList {
    #[serde(default)]
    pub song: Vec<Song>,
}

/// Response payload for getAlbum
#[derive(Debug, Deserialize)]
pub struct AlbumPayload {
    pub album: Option<AlbumId3>,
}

#[derive(Debug, Deserialize)]
pub struct AlbumId3 {
    pub id: String,
    #[serde(rename = "releaseDate")]
    pub release_date: Option<ItemDate>, // OpenSubsonic extension
    #[serde(rename = "originalReleaseDate")]
    pub original_release_date: Option<ItemDate>, // OpenSubsonic extension
}

impl AlbumId3 {
    /// Day-precision release date. Reissues count from their original release.
    pub fn released_at(&self) -> Option<DateTime<Utc>> {
        self.original_release_date
            .as_ref()
            .and_then(ItemDate::to_datetime)
            .or_else(|| self.release_date.as_ref().and_then(ItemDate::to_datetime))
    }
}

/// Possibly partial date as reported by OpenSubsonic servers
#[derive(Debug, Deserialize)]
pub struct ItemDate {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
}

impl ItemDate {
    /// `None` unless at least the month is known.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let year = self.year?;
        let month = self.month?;
        Utc.with_ymd_and_hms(year, month, self.day.unwrap_or(1), 0, 0, 0)
            .single()
    }
}

#[derive(Debug, Deserialize)]
pub struct Search3Payload {
    #[serde(rename = "searchResult3")]
    pub search_result: Option<SearchResult3>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchResult3 {
    #[serde(default)]
    pub artist: Vec<ArtistId3>,
    #[serde(default)]
    pub song: Vec<Song>,
}

#[derive(Debug, Deserialize)]
pub struct ArtistPayload {
    pub artist: Option<ArtistId3>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtistId3 {
    pub id: String,
    pub name: String,
}

impl From<ArtistId3> for Artist {
    fn from(artist: ArtistId3) -> Self {
        Artist::new(&artist.id, &artist.name)
    }
}

#[derive(Debug, Deserialize)]
pub struct ArtistInfo2Payload {
    #[serde(rename = "artistInfo2")]
    pub artist_info: Option<ArtistInfo2>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ArtistInfo2 {
    #[serde(rename = "similarArtist", default)]
    pub similar_artist: Vec<ArtistId3>,
}

/// Response payload for getPlaylists
#[derive(Debug, Deserialize)]
pub struct PlaylistsPayload {
    pub playlists: Option<PlaylistsContainer>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PlaylistsContainer {
    #[serde(default)]
    pub playlist: Vec<PlaylistInfo>,
}

/// Response payload for getPlaylist and createPlaylist
#[derive(Debug, Deserialize)]
pub struct PlaylistPayload {
    pub playlist: Option<PlaylistInfo>,
}

#[derive(Debug, Deserialize)]
pub struct PlaylistInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "songCount")]
    pub song_count: Option<u32>,
    #[serde(default)]
    pub entry: Vec<Song>,
}

impl From<&PlaylistInfo> for PlaylistSummary {
    fn from(info: &PlaylistInfo) -> Self {
        PlaylistSummary {
            id: info.id.clone(),
            name: info.name.clone(),
            track_count: info.song_count,
        }
    }
}
