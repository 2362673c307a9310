use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub theme: ThemeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Queue depth shown in the widget.
    #[serde(default = "default_nbr_tracks")]
    pub nbr_tracks: usize,
    /// Fallback reload interval when nothing is playing.
    #[serde(default = "default_page_refresh_ms")]
    pub page_refresh_ms: u64,
    /// Floor for the reload delay so a track ending never schedules a
    /// tight reload loop.
    #[serde(default = "default_min_poll_delay_ms")]
    pub min_poll_delay_ms: u64,
}

/// Which optional track metadata gets fetched and which metrics render.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_true")]
    pub audio_features: bool,
    #[serde(default = "default_true")]
    pub genre: bool,
    #[serde(default = "default_true")]
    pub show_time: bool,
    #[serde(default = "default_true")]
    pub bpm: bool,
    #[serde(default = "default_true")]
    pub energy: bool,
    #[serde(default = "default_true")]
    pub danceability: bool,
    #[serde(default = "default_true")]
    pub happiness: bool,
    #[serde(default = "default_true")]
    pub genres: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThemeConfig {
    #[serde(default = "default_font_family")]
    pub font_family: String,
    #[serde(default = "default_background_color")]
    pub background_color: String,
    #[serde(default = "default_error_background_color")]
    pub error_background_color: String,
    #[serde(default = "default_border_color")]
    pub border_color: String,
    #[serde(default = "default_header_color")]
    pub header_color: String,
    #[serde(default = "default_progress_bar_color")]
    pub progress_bar_color: String,
    #[serde(default = "default_progress_color")]
    pub progress_color: String,
    #[serde(default = "default_text_color")]
    pub current_song_color: String,
    #[serde(default = "default_text_color")]
    pub current_artist_color: String,
    #[serde(default = "default_text_color")]
    pub current_time_color: String,
    #[serde(default = "default_text_color")]
    pub queue_song_color: String,
    #[serde(default = "default_text_color")]
    pub queue_artist_color: String,
    #[serde(default = "default_text_color")]
    pub queue_time_color: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            nbr_tracks: default_nbr_tracks(),
            page_refresh_ms: default_page_refresh_ms(),
            min_poll_delay_ms: default_min_poll_delay_ms(),
        }
    }
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            audio_features: true,
            genre: true,
            show_time: true,
            bpm: true,
            energy: true,
            danceability: true,
            happiness: true,
            genres: true,
        }
    }
}

impl Default for ThemeConfig {
    fn default() -> Self {
        Self {
            font_family: default_font_family(),
            background_color: default_background_color(),
            error_background_color: default_error_background_color(),
            border_color: default_border_color(),
            header_color: default_header_color(),
            progress_bar_color: default_progress_bar_color(),
            progress_color: default_progress_color(),
            current_song_color: default_text_color(),
            current_artist_color: default_text_color(),
            current_time_color: default_text_color(),
            queue_song_color: default_text_color(),
            queue_artist_color: default_text_color(),
            queue_time_color: default_text_color(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_nbr_tracks() -> usize {
    5
}

fn default_page_refresh_ms() -> u64 {
    10_000
}

fn default_min_poll_delay_ms() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

fn default_font_family() -> String {
    "'Roboto', sans-serif".to_string()
}

fn default_background_color() -> String {
    "rgba(255, 255, 255, .5)".to_string()
}

fn default_error_background_color() -> String {
    "rgba(180, 60, 60, .5)".to_string()
}

fn default_border_color() -> String {
    "#cccccc".to_string()
}

fn default_header_color() -> String {
    "#222222".to_string()
}

fn default_progress_bar_color() -> String {
    "#e0e0e0".to_string()
}

fn default_progress_color() -> String {
    "#1db954".to_string()
}

fn default_text_color() -> String {
    "#111111".to_string()
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        config_dir().join("config.toml")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            poll: PollConfig::default(),
            features: FeaturesConfig::default(),
            theme: ThemeConfig::default(),
        }
    }
}

pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("queue-overlay")
}

pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("queue-overlay")
}

/// Spotify OAuth app credentials, injected through the environment.
/// Missing credentials are fatal: the daemon refuses to start without them.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl Credentials {
    pub fn from_env() -> anyhow::Result<Self> {
        let client_id = std::env::var("SPOTIFY_CLIENT_ID")
            .map_err(|_| anyhow::anyhow!("SPOTIFY_CLIENT_ID is not set"))?;
        let client_secret = std::env::var("SPOTIFY_CLIENT_SECRET")
            .map_err(|_| anyhow::anyhow!("SPOTIFY_CLIENT_SECRET is not set"))?;
        if client_id.is_empty() || client_secret.is_empty() {
            anyhow::bail!("Spotify client credentials are empty");
        }
        Ok(Self {
            client_id,
            client_secret,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.poll.nbr_tracks, 5);
        assert_eq!(config.poll.page_refresh_ms, 10_000);
        assert_eq!(config.poll.min_poll_delay_ms, 500);
        assert!(config.features.audio_features);
        assert!(config.features.genre);
        assert_eq!(config.theme.font_family, "'Roboto', sans-serif");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [poll]
            nbr_tracks = 3

            [features]
            audio_features = false
            "#,
        )
        .unwrap();
        assert_eq!(config.poll.nbr_tracks, 3);
        assert_eq!(config.poll.page_refresh_ms, 10_000);
        assert!(!config.features.audio_features);
        assert!(config.features.genre);
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn test_config_round_trip() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.server.port, config.server.port);
        assert_eq!(parsed.theme.background_color, config.theme.background_color);
    }
}
