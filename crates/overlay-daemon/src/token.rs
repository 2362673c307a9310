//! OAuth token manager for the Spotify session.
//!
//! Owns the access/refresh token pair and guarantees a valid bearer token
//! before any API call. Expiry is recorded 60 seconds early so a refresh
//! always completes before the upstream starts rejecting the token.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::{error, info};

use overlay_core::config::Credentials;

pub const SCOPES: &str =
    "user-read-private user-read-email user-read-playback-state user-read-currently-playing";

const AUTHORIZE_URL: &str = "https://accounts.spotify.com/authorize";
const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// Seconds subtracted from the upstream `expires_in` when recording expiry.
const EXPIRY_SKEW_SECS: i64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("token endpoint returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("token endpoint request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// The in-memory session. Never persisted; dies with the process.
#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Skewed expiry instant for a token granted `expires_in_secs` from `now`.
fn expiry_from(now: DateTime<Utc>, expires_in_secs: i64) -> DateTime<Utc> {
    now + Duration::seconds(expires_in_secs - EXPIRY_SKEW_SECS)
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Absent on refresh unless the service rotates the refresh token.
    refresh_token: Option<String>,
    expires_in: i64,
}

pub struct TokenManager {
    http: reqwest::Client,
    credentials: Credentials,
    redirect_uri: String,
    session: Option<Session>,
}

impl TokenManager {
    pub fn new(http: reqwest::Client, credentials: Credentials, redirect_uri: String) -> Self {
        Self {
            http,
            credentials,
            redirect_uri,
            session: None,
        }
    }

    /// The Spotify authorize URL the widget shell is redirected to.
    pub fn authorize_url(&self, state: &str) -> String {
        let url = reqwest::Url::parse_with_params(
            AUTHORIZE_URL,
            &[
                ("response_type", "code"),
                ("client_id", self.credentials.client_id.as_str()),
                ("scope", SCOPES),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("state", state),
            ],
        )
        .expect("authorize URL is statically valid");
        url.into()
    }

    /// Current bearer token, `None` before the authorization callback ran.
    pub fn access_token(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.access_token.as_str())
    }

    /// One-time exchange of the authorization code for the initial token
    /// pair. Failure propagates to the caller; the pending request surfaces
    /// it as an authorization error.
    pub async fn exchange_code(&mut self, code: &str) -> Result<(), AuthError> {
        let response = self
            .http
            .post(TOKEN_URL)
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.redirect_uri.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AuthError::Status(response.status()));
        }

        let body: TokenResponse = response.json().await?;
        let now = Utc::now();
        self.session = Some(Session {
            access_token: body.access_token,
            refresh_token: body.refresh_token.unwrap_or_default(),
            expires_at: expiry_from(now, body.expires_in),
        });
        info!("Authorization code exchanged, session established");
        Ok(())
    }

    /// Refreshes the access token iff the recorded expiry has passed.
    ///
    /// Exactly one refresh attempt per expired check; a failed refresh logs
    /// and leaves the stale token in place so the caller sees the upstream
    /// 401 instead of this daemon spinning in a refresh loop.
    pub async fn ensure_valid(&mut self) {
        let now = Utc::now();
        if !self.needs_refresh(now) {
            return;
        }
        info!("Access token expired, refreshing");
        if let Err(e) = self.refresh().await {
            error!("Token refresh failed, keeping stale token: {e}");
        }
    }

    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        match &self.session {
            Some(session) => session.is_expired(now),
            None => false,
        }
    }

    async fn refresh(&mut self) -> Result<(), AuthError> {
        let refresh_token = match &self.session {
            Some(session) => session.refresh_token.clone(),
            None => return Ok(()),
        };

        let response = self
            .http
            .post(TOKEN_URL)
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AuthError::Status(response.status()));
        }

        let body: TokenResponse = response.json().await?;
        let now = Utc::now();
        if let Some(session) = &mut self.session {
            session.access_token = body.access_token;
            session.expires_at = expiry_from(now, body.expires_in);
            if let Some(rotated) = body.refresh_token {
                session.refresh_token = rotated;
            }
        }
        info!("Access token refreshed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with_session(expires_at: DateTime<Utc>) -> TokenManager {
        let mut manager = TokenManager::new(
            reqwest::Client::new(),
            Credentials {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
            },
            "http://localhost:3000/callback".to_string(),
        );
        manager.session = Some(Session {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at,
        });
        manager
    }

    #[test]
    fn test_expiry_skew() {
        let now = Utc::now();
        let expires_at = expiry_from(now, 3600);
        assert_eq!(expires_at, now + Duration::seconds(3540));
    }

    #[test]
    fn test_needs_refresh_boundaries() {
        let now = Utc::now();

        let fresh = manager_with_session(now + Duration::seconds(10));
        assert!(!fresh.needs_refresh(now));

        let expired = manager_with_session(now - Duration::seconds(1));
        assert!(expired.needs_refresh(now));

        // now == expires_at counts as expired
        let boundary = manager_with_session(now);
        assert!(boundary.needs_refresh(now));
    }

    #[test]
    fn test_no_session_never_refreshes() {
        let manager = TokenManager::new(
            reqwest::Client::new(),
            Credentials {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
            },
            "http://localhost:3000/callback".to_string(),
        );
        assert!(!manager.needs_refresh(Utc::now()));
        assert!(manager.access_token().is_none());
    }

    #[test]
    fn test_authorize_url_carries_scopes_and_state() {
        let manager = manager_with_session(Utc::now());
        let url = manager.authorize_url("xyz123");
        assert!(url.starts_with("https://accounts.spotify.com/authorize?"));
        assert!(url.contains("client_id=id"));
        assert!(url.contains("state=xyz123"));
        assert!(url.contains("user-read-playback-state"));
        assert!(url.contains("user-read-currently-playing"));
    }

    #[test]
    fn test_token_response_parsing() {
        let body: TokenResponse = serde_json::from_str(
            r#"{"access_token":"a","token_type":"Bearer","expires_in":3600,"refresh_token":"r","scope":"user-read-private"}"#,
        )
        .unwrap();
        assert_eq!(body.access_token, "a");
        assert_eq!(body.refresh_token.as_deref(), Some("r"));
        assert_eq!(body.expires_in, 3600);

        // Refresh responses may omit the refresh token
        let body: TokenResponse =
            serde_json::from_str(r#"{"access_token":"a","expires_in":3600}"#).unwrap();
        assert!(body.refresh_token.is_none());
    }
}
