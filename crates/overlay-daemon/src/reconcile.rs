//! Playback state reconciliation.
//!
//! One cycle: poll current playback, merge with the process-lifetime cache,
//! assemble the snapshot the renderer works from, and decide how long the
//! page waits before reloading. Only the gating playback poll can fail a
//! cycle; every dependent fetch narrows the snapshot instead of aborting it.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use overlay_core::config::Config;
use overlay_core::model::{
    AudioFeatures, DisplayFeatures, ReconciliationContext, Snapshot, SnapshotStatus, Track,
};

use crate::spotify::{
    ActivePlayback, CurrentPlayback, FeaturesError, FetchError, PlaylistMembership, SpotifyClient,
};

/// The remote reads one cycle depends on. `SpotifyClient` is the real
/// implementation; tests script an in-memory one.
#[allow(async_fn_in_trait)]
pub trait PlaybackSource {
    async fn current_playback(&self) -> Result<CurrentPlayback, FetchError>;
    async fn queue(&self, limit: usize) -> Result<Vec<Track>, FetchError>;
    async fn audio_features(&self, track_id: &str) -> Result<AudioFeatures, FeaturesError>;
    async fn artist_genres(&self, artist_ids: &[String]) -> HashMap<String, Vec<String>>;
    async fn playlist(&self, playlist_id: &str) -> Result<PlaylistMembership, FetchError>;
}

/// A [`SpotifyClient`] paired with the bearer token the caller validated
/// for this cycle.
pub struct AuthorizedSource<'a> {
    pub client: &'a SpotifyClient,
    pub token: &'a str,
}

impl PlaybackSource for AuthorizedSource<'_> {
    async fn current_playback(&self) -> Result<CurrentPlayback, FetchError> {
        self.client.current_playback(self.token).await
    }

    async fn queue(&self, limit: usize) -> Result<Vec<Track>, FetchError> {
        self.client.queue(self.token, limit).await
    }

    async fn audio_features(&self, track_id: &str) -> Result<AudioFeatures, FeaturesError> {
        self.client.audio_features(self.token, track_id).await
    }

    async fn artist_genres(&self, artist_ids: &[String]) -> HashMap<String, Vec<String>> {
        self.client.artist_genres(self.token, artist_ids).await
    }

    async fn playlist(&self, playlist_id: &str) -> Result<PlaylistMembership, FetchError> {
        self.client.playlist(self.token, playlist_id).await
    }
}

/// Run one reconciliation cycle against `source`, mutating the cache only
/// on the active-playing path.
pub async fn run_cycle<S: PlaybackSource>(
    source: &S,
    ctx: &mut ReconciliationContext,
    config: &Config,
) -> Snapshot {
    let playback = match source.current_playback().await {
        Ok(p) => p,
        Err(e) => {
            warn!("Playback endpoint unavailable: {e}");
            return offline_snapshot(SnapshotStatus::Unavailable, config);
        }
    };

    match playback {
        CurrentPlayback::NoActiveDevice => {
            info!("No active device; nothing to show");
            offline_snapshot(SnapshotStatus::NoActiveDevice, config)
        }
        CurrentPlayback::Paused => {
            if ctx.cache.is_empty() {
                // Paused before anything ever played this process; there is
                // no cached state to render from.
                offline_snapshot(SnapshotStatus::Paused, config)
            } else {
                debug!("Playback paused, serving cached snapshot");
                paused_snapshot(ctx, config)
            }
        }
        CurrentPlayback::Playing(active) => active_cycle(source, ctx, config, active).await,
    }
}

fn offline_snapshot(status: SnapshotStatus, config: &Config) -> Snapshot {
    Snapshot {
        status,
        current_track: None,
        progress_ms: 0,
        duration_ms: 0,
        queue: Vec::new(),
        features: HashMap::new(),
        genres: HashMap::new(),
        active_playlist: None,
        background_color: config.theme.error_background_color.clone(),
        next_poll_delay_ms: config.poll.page_refresh_ms.max(1),
    }
}

/// Paused path: everything comes from the cache, nothing is re-fetched and
/// the cache is not touched. There is no natural track end to wait for, so
/// the page falls back to the configured refresh interval.
fn paused_snapshot(ctx: &ReconciliationContext, config: &Config) -> Snapshot {
    let cache = &ctx.cache;
    let duration_ms = cache
        .current_track
        .as_ref()
        .map(|t| t.duration_ms)
        .unwrap_or(0);
    Snapshot {
        status: SnapshotStatus::Paused,
        current_track: cache.current_track.clone(),
        progress_ms: 0,
        duration_ms,
        queue: cache.queue.clone(),
        features: cache.features.clone(),
        genres: cache.genres.clone(),
        active_playlist: cache.playlist_id.clone(),
        background_color: config.theme.background_color.clone(),
        next_poll_delay_ms: config.poll.page_refresh_ms.max(1),
    }
}

async fn active_cycle<S: PlaybackSource>(
    source: &S,
    ctx: &mut ReconciliationContext,
    config: &Config,
    active: ActivePlayback,
) -> Snapshot {
    // Playlist membership tracking. The member set is replaced together
    // with the id or not at all; a failed fetch leaves the previous id in
    // place so the next cycle retries, and disables boundary detection for
    // this one.
    let mut membership_known = false;
    if let Some(playlist_id) = &active.playlist_id {
        if ctx.cache.playlist_id.as_deref() == Some(playlist_id) {
            membership_known = true;
        } else {
            match source.playlist(playlist_id).await {
                Ok(membership) => {
                    info!(
                        "Tracking playlist '{}' ({} member tracks)",
                        membership.name,
                        membership.track_ids.len()
                    );
                    ctx.cache.playlist_id = Some(membership.id);
                    ctx.cache.playlist_track_ids = membership.track_ids;
                    membership_known = true;
                }
                Err(e) => {
                    warn!("Playlist fetch failed, skipping membership checks: {e}");
                }
            }
        }
    }

    // Reload when the track naturally ends, floored so a track boundary
    // never schedules a tight reload loop.
    let remaining = active.track.duration_ms.saturating_sub(active.progress_ms);
    let next_poll_delay_ms = remaining.max(config.poll.min_poll_delay_ms).max(1);

    let mut queue = match source.queue(config.poll.nbr_tracks).await {
        Ok(q) => q,
        Err(e) => {
            warn!("Queue unknown this cycle: {e}");
            Vec::new()
        }
    };
    queue.truncate(config.poll.nbr_tracks);

    let features = fetch_features(source, ctx, &active.track, &queue).await;
    let genres = fetch_genres(source, ctx, &active.track, &queue).await;

    // Playlist-exhaustion heuristic: when none of the queued tracks belong
    // to the active playlist, the queue is most likely an autoplay
    // continuation past the playlist's end; suppress it rather than show
    // unrelated entries.
    if membership_known && !ctx.cache.playlist_track_ids.is_empty() && !queue.is_empty() {
        let any_member = queue
            .iter()
            .any(|t| ctx.cache.playlist_track_ids.contains(&t.id));
        if !any_member {
            info!("No queued track belongs to the active playlist, clearing queue");
            queue.clear();
        }
    }

    // Cache commit, active path only.
    ctx.cache.current_track = Some(active.track.clone());
    ctx.cache.queue = queue.clone();
    ctx.cache.features = features.clone();
    ctx.cache.genres = genres.clone();

    Snapshot {
        status: SnapshotStatus::Playing,
        duration_ms: active.track.duration_ms,
        current_track: Some(active.track),
        progress_ms: active.progress_ms,
        queue,
        features,
        genres,
        active_playlist: ctx.cache.playlist_id.clone(),
        background_color: config.theme.background_color.clone(),
        next_poll_delay_ms,
    }
}

/// Features for the current track plus the queue. A rate-limit signal trips
/// the session-wide breaker: the flag flips off, this cycle's partial
/// results are dropped and no later cycle asks again.
async fn fetch_features<S: PlaybackSource>(
    source: &S,
    ctx: &mut ReconciliationContext,
    current: &Track,
    queue: &[Track],
) -> HashMap<String, DisplayFeatures> {
    let mut features = HashMap::new();
    if !ctx.capabilities.audio_features {
        return features;
    }

    for track in std::iter::once(current).chain(queue.iter()) {
        match source.audio_features(&track.id).await {
            Ok(raw) => {
                features.insert(track.id.clone(), DisplayFeatures::from(&raw));
            }
            Err(FeaturesError::RateLimited) => {
                warn!("Audio features rate limited; disabled for the rest of the session");
                ctx.capabilities.audio_features = false;
                features.clear();
                break;
            }
            Err(e) => {
                warn!("No audio features for track {}: {e}", track.id);
            }
        }
    }
    features
}

/// Genres for the artists of the current track and the queue, one batched
/// call over the deduplicated artist set, mapped back per track.
async fn fetch_genres<S: PlaybackSource>(
    source: &S,
    ctx: &ReconciliationContext,
    current: &Track,
    queue: &[Track],
) -> HashMap<String, Vec<String>> {
    let mut genres = HashMap::new();
    if !ctx.capabilities.genres {
        return genres;
    }

    let artist_ids: Vec<String> = std::iter::once(current)
        .chain(queue.iter())
        .flat_map(|t| t.artist_ids().map(str::to_string))
        .collect();
    let by_artist = source.artist_genres(&artist_ids).await;
    if by_artist.is_empty() {
        return genres;
    }

    for track in std::iter::once(current).chain(queue.iter()) {
        let track_genres: Vec<String> = track
            .artists
            .iter()
            .filter_map(|a| by_artist.get(&a.id))
            .flatten()
            .cloned()
            .collect();
        genres.insert(track.id.clone(), track_genres);
    }
    genres
}
