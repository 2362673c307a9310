use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artist {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub artists: Vec<Artist>,
    pub duration_ms: u64,
    /// Medium album image, when the service provides one.
    pub album_image_url: Option<String>,
}

impl Track {
    pub fn artist_ids(&self) -> impl Iterator<Item = &str> {
        self.artists.iter().map(|a| a.id.as_str())
    }

    pub fn artist_names(&self) -> String {
        self.artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Per-track descriptors as returned by the service. `tempo` is rounded to
/// a whole BPM at fetch time; the fractions stay in [0, 1] until the
/// snapshot is assembled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    pub tempo: u32,
    pub energy: f64,
    pub danceability: f64,
    pub valence: f64,
}

/// Display form of [`AudioFeatures`]: fractions rescaled to whole
/// percentages, round half away from zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayFeatures {
    pub tempo: u32,
    pub energy_pct: u8,
    pub danceability_pct: u8,
    pub valence_pct: u8,
}

impl From<&AudioFeatures> for DisplayFeatures {
    fn from(f: &AudioFeatures) -> Self {
        Self {
            tempo: f.tempo,
            energy_pct: to_percent(f.energy),
            danceability_pct: to_percent(f.danceability),
            valence_pct: to_percent(f.valence),
        }
    }
}

/// Rescale a service-native fraction in [0, 1] to an integer percentage.
pub fn to_percent(value: f64) -> u8 {
    (value * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Outcome of one reconciliation cycle, as far as the page cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotStatus {
    /// A track is actively playing; the snapshot carries fresh data.
    Playing,
    /// Service reachable, playback paused; the snapshot is served from cache.
    Paused,
    /// Service reachable but no active device (the upstream "204" case).
    NoActiveDevice,
    /// The playback endpoint failed outright this cycle.
    Unavailable,
}

/// The fully assembled per-cycle view model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub status: SnapshotStatus,
    pub current_track: Option<Track>,
    pub progress_ms: u64,
    pub duration_ms: u64,
    pub queue: Vec<Track>,
    /// track id -> display metrics; absent when features are disabled or
    /// the breaker has tripped.
    pub features: HashMap<String, DisplayFeatures>,
    /// track id -> genres of its artists, in artist order.
    pub genres: HashMap<String, Vec<String>>,
    pub active_playlist: Option<String>,
    pub background_color: String,
    /// Strictly positive delay until the page reloads itself.
    pub next_poll_delay_ms: u64,
}

/// Everything that survives across reconciliation cycles. Overwritten
/// wholesale on the active-playing path; read-only while paused.
#[derive(Debug, Clone, Default)]
pub struct CachedState {
    pub current_track: Option<Track>,
    pub queue: Vec<Track>,
    pub features: HashMap<String, DisplayFeatures>,
    pub genres: HashMap<String, Vec<String>>,
    pub playlist_id: Option<String>,
    pub playlist_track_ids: HashSet<String>,
}

impl CachedState {
    /// True until the first active-playing cycle commits.
    pub fn is_empty(&self) -> bool {
        self.current_track.is_none()
    }
}

/// One-way feature switches for the session. Seeded from config at startup;
/// `audio_features` flips off permanently when the service rate-limits the
/// features endpoint, and nothing turns it back on.
#[derive(Debug, Clone, Copy)]
pub struct SessionCapabilities {
    pub audio_features: bool,
    pub genres: bool,
}

/// Process-lifetime state for the reconciliation engine. Constructed once
/// and passed by reference into every cycle.
#[derive(Debug)]
pub struct ReconciliationContext {
    pub cache: CachedState,
    pub capabilities: SessionCapabilities,
}

impl ReconciliationContext {
    pub fn new(audio_features: bool, genres: bool) -> Self {
        Self {
            cache: CachedState::default(),
            capabilities: SessionCapabilities {
                audio_features,
                genres,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artist(id: &str, name: &str) -> Artist {
        Artist {
            id: id.to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_to_percent_rounds_half_up() {
        assert_eq!(to_percent(0.5), 50);
        assert_eq!(to_percent(0.837), 84);
        assert_eq!(to_percent(0.0), 0);
        assert_eq!(to_percent(1.0), 100);
        assert_eq!(to_percent(0.005), 1);
    }

    #[test]
    fn test_display_features_from_raw() {
        let raw = AudioFeatures {
            tempo: 128,
            energy: 0.5,
            danceability: 0.837,
            valence: 0.124,
        };
        let display = DisplayFeatures::from(&raw);
        assert_eq!(display.tempo, 128);
        assert_eq!(display.energy_pct, 50);
        assert_eq!(display.danceability_pct, 84);
        assert_eq!(display.valence_pct, 12);
    }

    #[test]
    fn test_artist_names_joined() {
        let track = Track {
            id: "t1".to_string(),
            name: "Song".to_string(),
            artists: vec![artist("a1", "First"), artist("a2", "Second")],
            duration_ms: 1000,
            album_image_url: None,
        };
        assert_eq!(track.artist_names(), "First, Second");
    }

    #[test]
    fn test_cached_state_starts_empty() {
        let cache = CachedState::default();
        assert!(cache.is_empty());
        assert!(cache.queue.is_empty());
        assert!(cache.playlist_id.is_none());
    }
}
