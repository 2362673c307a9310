//! HTML assembly for the overlay page.
//!
//! The page is self-driving: a reload script waits `next_poll_delay_ms`
//! and a progress script advances the bar client-side every second, so the
//! daemon only ever renders full documents.

use overlay_core::config::Config;
use overlay_core::model::{Snapshot, SnapshotStatus, Track};

pub fn render(snapshot: &Snapshot, config: &Config) -> String {
    match snapshot.status {
        SnapshotStatus::Playing | SnapshotStatus::Paused => {
            match &snapshot.current_track {
                Some(track) => playback_page(snapshot, track, config),
                // Paused before anything played: nothing cached to show
                None => no_device_page(snapshot, config),
            }
        }
        SnapshotStatus::NoActiveDevice => no_device_page(snapshot, config),
        SnapshotStatus::Unavailable => unavailable_page(snapshot, config),
    }
}

/// Plain-text authorization failure body. User-visible failures are a
/// substitute page, never a stack trace.
pub fn auth_error_body(detail: &str) -> String {
    format!("Authorization failed: {detail}")
}

/// `ms` -> `m:ss`
pub fn format_mmss(ms: u64) -> String {
    let total_seconds = ms / 1000;
    format!("{}:{:02}", total_seconds / 60, total_seconds % 60)
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn head(snapshot: &Snapshot, config: &Config) -> String {
    let theme = &config.theme;
    let styles = format!(
        r#"<style>
    body, html {{
      margin: 0;
      padding: 0;
      font-family: {font};
      overflow: hidden;
      -webkit-app-region: drag;
    }}
    .container-wrapper {{
      display: inline-block;
      padding: 10px;
      border-radius: 10px;
      background-color: {background};
    }}
    .container {{
      position: relative;
      padding: 20px;
      border: 1px solid {border};
      max-width: 500px;
      margin: 0 auto;
      background-color: transparent;
    }}
    .header {{
      text-align: center;
      color: {header};
      margin-block-start: 0;
      margin-block-end: 0;
    }}
    .currently-playing {{
      display: flex;
      align-items: center;
      margin-bottom: 20px;
    }}
    .currently-playing img {{
      width: 60px;
      height: 60px;
      margin-right: 20px;
    }}
    .currently-playing .song-title {{
      font-size: 18px;
      font-weight: bold;
    }}
    .progress-container {{
      display: flex;
      align-items: center;
      margin-top: 10px;
    }}
    #progress-bar {{
      width: 100%;
      height: 10px;
      border-radius: 5px;
      overflow: hidden;
      position: relative;
      background-color: {progress_bar};
    }}
    #progress {{
      height: 100%;
      width: 0%;
      border-radius: 5px;
      background-color: {progress};
    }}
    .time {{
      font-size: 14px;
      margin: 0 10px;
    }}
    .queue-container {{
      margin-top: 30px;
    }}
    .queue-item {{
      display: flex;
      justify-content: space-between;
      align-items: center;
      padding: 10px;
      border-bottom: 1px solid {border};
    }}
    .queue-item h2 {{
      font-size: 16px;
      margin: 0;
    }}
    .queue-item p {{
      font-size: 13px;
      margin: 0;
    }}
    .queue-item .song-info {{
      flex-grow: 1;
      margin-right: 10px;
    }}
    .queue-item .duration {{
      white-space: nowrap;
    }}
    .metrics {{
      font-size: 12px;
      opacity: 0.8;
    }}
  </style>"#,
        font = theme.font_family,
        background = snapshot.background_color,
        border = theme.border_color,
        header = theme.header_color,
        progress_bar = theme.progress_bar_color,
        progress = theme.progress_color,
    );

    let reload_script = format!(
        r#"<script>
    window.onload = function() {{
      setTimeout(function() {{ location.reload(); }}, {delay});
    }};
  </script>"#,
        delay = snapshot.next_poll_delay_ms,
    );

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>Now Playing</title>
  {styles}
  {reload_script}
</head>"#,
    )
}

fn progress_script(snapshot: &Snapshot) -> String {
    format!(
        r#"<script>
    document.addEventListener('DOMContentLoaded', function() {{
      const duration = {duration};
      let elapsed = {progress};

      function formatTime(ms) {{
        const totalSeconds = Math.floor(ms / 1000);
        return Math.floor(totalSeconds / 60) + ':' +
          (totalSeconds % 60).toString().padStart(2, '0');
      }}

      function tick() {{
        const bar = document.getElementById('progress');
        const label = document.getElementById('time-elapsed');
        if (!bar || !label || duration === 0) return;
        let pct = (elapsed / duration) * 100;
        if (pct > 100) pct = 100;
        bar.style.width = pct + '%';
        label.textContent = formatTime(elapsed);
        elapsed += 1000;
        if (elapsed >= duration) {{
          clearInterval(interval);
          elapsed = duration;
        }}
      }}

      const interval = setInterval(tick, 1000);
      tick();
    }});
  </script>"#,
        duration = snapshot.duration_ms,
        progress = snapshot.progress_ms,
    )
}

/// "BPM 128 | Energy 50% | ..." for one track, honoring the metric toggles.
fn metrics_line(snapshot: &Snapshot, track_id: &str, config: &Config) -> String {
    let mut parts = Vec::new();
    if let Some(f) = snapshot.features.get(track_id) {
        let toggles = &config.features;
        if toggles.bpm {
            parts.push(format!("{} BPM", f.tempo));
        }
        if toggles.energy {
            parts.push(format!("Energy {}%", f.energy_pct));
        }
        if toggles.danceability {
            parts.push(format!("Dance {}%", f.danceability_pct));
        }
        if toggles.happiness {
            parts.push(format!("Mood {}%", f.valence_pct));
        }
    }
    if config.features.genres {
        if let Some(genres) = snapshot.genres.get(track_id) {
            let joined = if genres.is_empty() {
                "Unknown".to_string()
            } else {
                genres.join(", ")
            };
            parts.push(escape(&joined));
        }
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(r#"<p class="metrics">{}</p>"#, parts.join(" | "))
    }
}

fn queue_section(snapshot: &Snapshot, config: &Config) -> String {
    let theme = &config.theme;
    let items: String = snapshot
        .queue
        .iter()
        .map(|track: &Track| {
            let duration = if config.features.show_time {
                format!(
                    r#"<div class="duration" style="color: {};">{}</div>"#,
                    theme.queue_time_color,
                    format_mmss(track.duration_ms)
                )
            } else {
                String::new()
            };
            format!(
                r#"<div class="queue-item">
          <div class="song-info">
            <h2 style="color: {song_color};">{name}</h2>
            <p style="color: {artist_color};">{artists}</p>
            {metrics}
          </div>
          {duration}
        </div>"#,
                song_color = theme.queue_song_color,
                artist_color = theme.queue_artist_color,
                name = escape(&track.name),
                artists = escape(&track.artist_names()),
                metrics = metrics_line(snapshot, &track.id, config),
            )
        })
        .collect();

    format!(
        r#"<div class="queue-container">
        <h2 class="header">Next up:</h2>
        {items}
      </div>"#,
    )
}

fn playback_page(snapshot: &Snapshot, track: &Track, config: &Config) -> String {
    let theme = &config.theme;
    let album_art = track
        .album_image_url
        .as_deref()
        .map(|url| format!(r#"<img src="{}" alt="Album Art">"#, escape(url)))
        .unwrap_or_default();
    let heading = match snapshot.status {
        SnapshotStatus::Paused => "Paused:",
        _ => "Now playing:",
    };

    format!(
        r#"{head}
<body>
  <div class="container-wrapper">
    <div class="container">
      <h1 class="header">{heading}</h1>
      <div class="currently-playing">
        {album_art}
        <div class="info">
          <div class="song-title" style="color: {song_color};">{name}</div>
          <div class="artist-name" style="color: {artist_color};">{artists}</div>
          {metrics}
        </div>
      </div>
      <div class="progress-container">
        <div class="time" id="time-elapsed" style="color: {time_color};">{elapsed}</div>
        <div id="progress-bar"><div id="progress"></div></div>
        <div class="time" style="color: {time_color};">{total}</div>
      </div>
      {queue}
    </div>
  </div>
  {progress_script}
</body>
</html>"#,
        head = head(snapshot, config),
        song_color = theme.current_song_color,
        artist_color = theme.current_artist_color,
        time_color = theme.current_time_color,
        name = escape(&track.name),
        artists = escape(&track.artist_names()),
        metrics = metrics_line(snapshot, &track.id, config),
        elapsed = format_mmss(snapshot.progress_ms),
        total = format_mmss(snapshot.duration_ms),
        queue = queue_section(snapshot, config),
        progress_script = progress_script(snapshot),
    )
}

fn no_device_page(snapshot: &Snapshot, config: &Config) -> String {
    let theme = &config.theme;
    format!(
        r#"{head}
<body>
  <div class="container-wrapper">
    <div class="container">
      <div class="currently-playing">
        <div class="info">
          <div class="song-title" style="color: {song_color};">Spotify is Not Available or Timed Out.</div>
          <div class="artist-name" style="color: {artist_color};">Start Spotify or Resume Playing the Song.</div>
        </div>
      </div>
    </div>
  </div>
</body>
</html>"#,
        head = head(snapshot, config),
        song_color = theme.current_song_color,
        artist_color = theme.current_artist_color,
    )
}

fn unavailable_page(snapshot: &Snapshot, config: &Config) -> String {
    let theme = &config.theme;
    format!(
        r#"{head}
<body>
  <div class="container-wrapper">
    <div class="container">
      <div class="currently-playing">
        <div class="info">
          <div class="song-title" style="color: {song_color};">Encountered an Unexpected Error.</div>
          <div class="artist-name" style="color: {artist_color};">
            <p>Make sure Spotify is running and playing a song.</p>
            <p>Retrying shortly.</p>
          </div>
        </div>
      </div>
    </div>
  </div>
</body>
</html>"#,
        head = head(snapshot, config),
        song_color = theme.current_song_color,
        artist_color = theme.current_artist_color,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use overlay_core::model::{Artist, DisplayFeatures};
    use std::collections::HashMap;

    fn track(id: &str, name: &str, duration_ms: u64) -> Track {
        Track {
            id: id.to_string(),
            name: name.to_string(),
            artists: vec![Artist {
                id: format!("artist-{id}"),
                name: "Someone".to_string(),
            }],
            duration_ms,
            album_image_url: None,
        }
    }

    fn playing_snapshot(config: &Config) -> Snapshot {
        Snapshot {
            status: SnapshotStatus::Playing,
            current_track: Some(track("t1", "Current Song", 200_000)),
            progress_ms: 150_000,
            duration_ms: 200_000,
            queue: vec![track("q1", "Queued Song", 61_000)],
            features: HashMap::new(),
            genres: HashMap::new(),
            active_playlist: None,
            background_color: config.theme.background_color.clone(),
            next_poll_delay_ms: 50_000,
        }
    }

    #[test]
    fn test_format_mmss() {
        assert_eq!(format_mmss(0), "0:00");
        assert_eq!(format_mmss(61_000), "1:01");
        assert_eq!(format_mmss(200_000), "3:20");
        assert_eq!(format_mmss(599_999), "9:59");
    }

    #[test]
    fn test_playing_page_embeds_reload_delay_and_queue() {
        let config = Config::default();
        let snapshot = playing_snapshot(&config);
        let html = render(&snapshot, &config);

        assert!(html.contains("Current Song"));
        assert!(html.contains("Queued Song"));
        assert!(html.contains("1:01"));
        assert!(html.contains("}, 50000);"));
        assert!(html.contains("const duration = 200000;"));
        assert!(html.contains("let elapsed = 150000;"));
    }

    #[test]
    fn test_track_names_are_escaped() {
        let config = Config::default();
        let mut snapshot = playing_snapshot(&config);
        snapshot.current_track.as_mut().unwrap().name = "<script>alert(1)</script>".to_string();
        let html = render(&snapshot, &config);
        assert!(!html.contains("<script>alert(1)</script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_metrics_line_honors_toggles() {
        let mut config = Config::default();
        let mut snapshot = playing_snapshot(&config);
        snapshot.features.insert(
            "t1".to_string(),
            DisplayFeatures {
                tempo: 128,
                energy_pct: 50,
                danceability_pct: 84,
                valence_pct: 12,
            },
        );

        let html = render(&snapshot, &config);
        assert!(html.contains("128 BPM"));
        assert!(html.contains("Energy 50%"));

        config.features.bpm = false;
        config.features.energy = false;
        let html = render(&snapshot, &config);
        assert!(!html.contains("128 BPM"));
        assert!(!html.contains("Energy 50%"));
        assert!(html.contains("Dance 84%"));
    }

    #[test]
    fn test_no_device_page_uses_error_background() {
        let config = Config::default();
        let snapshot = Snapshot {
            status: SnapshotStatus::NoActiveDevice,
            current_track: None,
            progress_ms: 0,
            duration_ms: 0,
            queue: Vec::new(),
            features: HashMap::new(),
            genres: HashMap::new(),
            active_playlist: None,
            background_color: config.theme.error_background_color.clone(),
            next_poll_delay_ms: config.poll.page_refresh_ms,
        };
        let html = render(&snapshot, &config);
        assert!(html.contains(&config.theme.error_background_color));
        assert!(html.contains("Spotify is Not Available"));
        assert!(!html.contains("Next up:"));
    }

    #[test]
    fn test_genres_render_with_unknown_fallback() {
        let config = Config::default();
        let mut snapshot = playing_snapshot(&config);
        snapshot.genres.insert("t1".to_string(), Vec::new());
        snapshot
            .genres
            .insert("q1".to_string(), vec!["house".to_string(), "disco".to_string()]);

        let html = render(&snapshot, &config);
        assert!(html.contains("Unknown"));
        assert!(html.contains("house, disco"));
    }
}
