//! Spotify Web API read operations.
//!
//! Five independent fetches, each with its own failure contract: only
//! `current_playback` gates a reconciliation cycle; queue, audio features,
//! genres and playlist all degrade without aborting it.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use tracing::warn;

use overlay_core::model::{Artist, AudioFeatures, Track};

const API_BASE: &str = "https://api.spotify.com/v1";

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("spotify returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("spotify request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum FeaturesError {
    /// The service throttled the audio-features endpoint. The caller trips
    /// a one-way breaker and never asks again this session.
    #[error("audio-features endpoint rate limited")]
    RateLimited,
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Outcome of polling the playback endpoint.
#[derive(Debug, Clone)]
pub enum CurrentPlayback {
    Playing(ActivePlayback),
    /// Service reachable, a track is loaded but not advancing.
    Paused,
    /// Service reachable, no active device (upstream 204).
    NoActiveDevice,
}

#[derive(Debug, Clone)]
pub struct ActivePlayback {
    pub track: Track,
    pub progress_ms: u64,
    /// Playlist id when the playing context is a playlist.
    pub playlist_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PlaylistMembership {
    pub id: String,
    pub name: String,
    pub track_ids: HashSet<String>,
}

// ── Wire format ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PlaybackBody {
    is_playing: bool,
    progress_ms: Option<u64>,
    item: Option<TrackBody>,
    context: Option<ContextBody>,
}

#[derive(Debug, Deserialize)]
struct ContextBody {
    #[serde(rename = "type")]
    kind: String,
    uri: String,
}

impl ContextBody {
    /// `spotify:playlist:<id>` -> `<id>`, only for playlist contexts.
    fn playlist_id(&self) -> Option<String> {
        if self.kind != "playlist" {
            return None;
        }
        self.uri.rsplit(':').next().map(str::to_string)
    }
}

#[derive(Debug, Deserialize)]
struct TrackBody {
    id: String,
    name: String,
    duration_ms: u64,
    artists: Vec<ArtistBody>,
    album: Option<AlbumBody>,
}

#[derive(Debug, Deserialize)]
struct ArtistBody {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct AlbumBody {
    #[serde(default)]
    images: Vec<ImageBody>,
}

#[derive(Debug, Deserialize)]
struct ImageBody {
    url: String,
}

impl From<TrackBody> for Track {
    fn from(body: TrackBody) -> Self {
        // The service lists images largest first; index 1 is the medium
        // size the widget renders.
        let album_image_url = body.album.and_then(|album| {
            let mut images = album.images;
            if images.len() > 1 {
                Some(images.swap_remove(1).url)
            } else {
                images.into_iter().next().map(|i| i.url)
            }
        });
        Track {
            id: body.id,
            name: body.name,
            artists: body
                .artists
                .into_iter()
                .map(|a| Artist {
                    id: a.id,
                    name: a.name,
                })
                .collect(),
            duration_ms: body.duration_ms,
            album_image_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueueBody {
    #[serde(default)]
    queue: Vec<TrackBody>,
}

#[derive(Debug, Deserialize)]
struct AudioFeaturesBody {
    tempo: f64,
    energy: f64,
    danceability: f64,
    valence: f64,
}

#[derive(Debug, Deserialize)]
struct ArtistsBody {
    artists: Vec<ArtistGenresBody>,
}

#[derive(Debug, Deserialize)]
struct ArtistGenresBody {
    id: String,
    #[serde(default)]
    genres: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistBody {
    id: String,
    name: String,
    tracks: PlaylistTracksBody,
}

#[derive(Debug, Deserialize)]
struct PlaylistTracksBody {
    #[serde(default)]
    items: Vec<PlaylistItemBody>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItemBody {
    /// Null for removed or local-file entries.
    track: Option<PlaylistTrackRef>,
}

#[derive(Debug, Deserialize)]
struct PlaylistTrackRef {
    id: Option<String>,
}

// ── Client ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct SpotifyClient {
    http: reqwest::Client,
}

impl SpotifyClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Poll current playback. 204 means no active device; any other
    /// non-2xx or transport failure is an error the engine maps to an
    /// unavailable snapshot.
    pub async fn current_playback(&self, token: &str) -> Result<CurrentPlayback, FetchError> {
        let response = self
            .http
            .get(format!("{API_BASE}/me/player"))
            .bearer_auth(token)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(CurrentPlayback::NoActiveDevice);
        }
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status()));
        }

        let body: PlaybackBody = response.json().await?;
        match body.item {
            Some(item) if body.is_playing => Ok(CurrentPlayback::Playing(ActivePlayback {
                track: item.into(),
                progress_ms: body.progress_ms.unwrap_or(0),
                playlist_id: body.context.as_ref().and_then(ContextBody::playlist_id),
            })),
            _ => Ok(CurrentPlayback::Paused),
        }
    }

    /// Up to `limit` upcoming tracks. An error here means "queue unknown
    /// this cycle" to the engine, never a fatal condition.
    pub async fn queue(&self, token: &str, limit: usize) -> Result<Vec<Track>, FetchError> {
        let response = self
            .http
            .get(format!("{API_BASE}/me/player/queue"))
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status()));
        }

        let body: QueueBody = response.json().await?;
        let mut tracks: Vec<Track> = body.queue.into_iter().map(Track::from).collect();
        tracks.truncate(limit);
        Ok(tracks)
    }

    /// Audio features for one track. A 429 is reported as `RateLimited` so
    /// the caller can disable the feature for the rest of the session.
    pub async fn audio_features(
        &self,
        token: &str,
        track_id: &str,
    ) -> Result<AudioFeatures, FeaturesError> {
        let response = self
            .http
            .get(format!("{API_BASE}/audio-features/{track_id}"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(FetchError::from)?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(FeaturesError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(FeaturesError::Fetch(FetchError::Status(response.status())));
        }

        let body: AudioFeaturesBody = response.json().await.map_err(FetchError::from)?;
        Ok(AudioFeatures {
            tempo: body.tempo.round() as u32,
            energy: body.energy,
            danceability: body.danceability,
            valence: body.valence,
        })
    }

    /// Genres per artist id, one batched call. Ids are deduplicated before
    /// the request; genres are cosmetic, so any failure degrades to an
    /// empty map instead of reaching the engine.
    pub async fn artist_genres(
        &self,
        token: &str,
        artist_ids: &[String],
    ) -> HashMap<String, Vec<String>> {
        let ids = dedup_preserving_order(artist_ids);
        if ids.is_empty() {
            return HashMap::new();
        }

        match self.fetch_artist_genres(token, &ids).await {
            Ok(genres) => genres,
            Err(e) => {
                warn!("Artist genres unavailable this cycle: {e}");
                HashMap::new()
            }
        }
    }

    async fn fetch_artist_genres(
        &self,
        token: &str,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<String>>, FetchError> {
        let response = self
            .http
            .get(format!("{API_BASE}/artists"))
            .query(&[("ids", ids.join(","))])
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status()));
        }

        let body: ArtistsBody = response.json().await?;
        Ok(body
            .artists
            .into_iter()
            .map(|a| (a.id, a.genres))
            .collect())
    }

    /// Playlist metadata plus its member track ids. The engine treats a
    /// failure as "membership unknown" and skips boundary detection for
    /// the cycle.
    pub async fn playlist(
        &self,
        token: &str,
        playlist_id: &str,
    ) -> Result<PlaylistMembership, FetchError> {
        let response = self
            .http
            .get(format!("{API_BASE}/playlists/{playlist_id}"))
            .query(&[("fields", "id,name,tracks.items(track(id))")])
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status()));
        }

        let body: PlaylistBody = response.json().await?;
        let track_ids = body
            .tracks
            .items
            .into_iter()
            .filter_map(|item| item.track.and_then(|t| t.id))
            .collect();
        Ok(PlaylistMembership {
            id: body.id,
            name: body.name,
            track_ids,
        })
    }
}

/// Order-preserving dedup, used to minimise the artists request.
pub fn dedup_preserving_order(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_preserves_first_occurrence_order() {
        let ids = vec![
            "b".to_string(),
            "a".to_string(),
            "b".to_string(),
            "c".to_string(),
            "a".to_string(),
        ];
        assert_eq!(dedup_preserving_order(&ids), vec!["b", "a", "c"]);
        assert!(dedup_preserving_order(&[]).is_empty());
    }

    #[test]
    fn test_context_playlist_id() {
        let ctx = ContextBody {
            kind: "playlist".to_string(),
            uri: "spotify:playlist:37i9dQZF1DXcBWIGoYBM5M".to_string(),
        };
        assert_eq!(
            ctx.playlist_id().as_deref(),
            Some("37i9dQZF1DXcBWIGoYBM5M")
        );

        let album = ContextBody {
            kind: "album".to_string(),
            uri: "spotify:album:xyz".to_string(),
        };
        assert!(album.playlist_id().is_none());
    }

    #[test]
    fn test_playback_body_parsing() {
        let json = r#"{
            "is_playing": true,
            "progress_ms": 150000,
            "context": {"type": "playlist", "uri": "spotify:playlist:pl1"},
            "item": {
                "id": "t1",
                "name": "Song",
                "duration_ms": 200000,
                "artists": [{"id": "a1", "name": "Artist"}],
                "album": {"images": [
                    {"url": "http://img/large"},
                    {"url": "http://img/medium"},
                    {"url": "http://img/small"}
                ]}
            }
        }"#;
        let body: PlaybackBody = serde_json::from_str(json).unwrap();
        assert!(body.is_playing);
        assert_eq!(body.progress_ms, Some(150_000));

        let track: Track = body.item.unwrap().into();
        assert_eq!(track.id, "t1");
        assert_eq!(track.duration_ms, 200_000);
        // Medium image preferred
        assert_eq!(track.album_image_url.as_deref(), Some("http://img/medium"));
        assert_eq!(
            body.context.unwrap().playlist_id().as_deref(),
            Some("pl1")
        );
    }

    #[test]
    fn test_single_image_album_falls_back() {
        let json = r#"{
            "id": "t1", "name": "Song", "duration_ms": 1000,
            "artists": [],
            "album": {"images": [{"url": "http://img/only"}]}
        }"#;
        let body: TrackBody = serde_json::from_str(json).unwrap();
        let track: Track = body.into();
        assert_eq!(track.album_image_url.as_deref(), Some("http://img/only"));
    }

    #[test]
    fn test_audio_features_tempo_rounded() {
        let json = r#"{"tempo": 127.6, "energy": 0.5, "danceability": 0.837, "valence": 0.1,
                       "key": 4, "mode": 1}"#;
        let body: AudioFeaturesBody = serde_json::from_str(json).unwrap();
        let features = AudioFeatures {
            tempo: body.tempo.round() as u32,
            energy: body.energy,
            danceability: body.danceability,
            valence: body.valence,
        };
        assert_eq!(features.tempo, 128);
    }

    #[test]
    fn test_playlist_body_skips_null_tracks() {
        let json = r#"{
            "id": "pl1", "name": "Mix",
            "tracks": {"items": [
                {"track": {"id": "t1"}},
                {"track": null},
                {"track": {"id": null}},
                {"track": {"id": "t2"}}
            ]}
        }"#;
        let body: PlaylistBody = serde_json::from_str(json).unwrap();
        let ids: HashSet<String> = body
            .tracks
            .items
            .into_iter()
            .filter_map(|item| item.track.and_then(|t| t.id))
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("t1") && ids.contains("t2"));
    }
}
