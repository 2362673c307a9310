//! The auth + rendering HTTP surface.
//!
//! All session mutation (token refresh, cache commits) happens behind one
//! mutex, so at most one reconciliation cycle is in flight at a time even
//! if a stale tab reloads alongside a fresh one.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use overlay_core::config::Config;
use overlay_core::model::ReconciliationContext;

use crate::reconcile::{self, AuthorizedSource};
use crate::render;
use crate::spotify::SpotifyClient;
use crate::token::TokenManager;

/// Everything a cycle mutates: the OAuth session and the engine context.
pub struct SessionState {
    pub tokens: TokenManager,
    pub ctx: ReconciliationContext,
    /// `state` parameter of the in-flight authorization redirect.
    pub pending_auth_state: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub spotify: SpotifyClient,
    pub session: Arc<Mutex<SessionState>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/login", get(login))
        .route("/callback", get(callback))
        .route("/queue", get(queue_page))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn login(State(state): State<AppState>) -> Redirect {
    let auth_state: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();

    let url = {
        let mut session = state.session.lock().await;
        session.pending_auth_state = Some(auth_state.clone());
        session.tokens.authorize_url(&auth_state)
    };
    Redirect::temporary(&url)
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

async fn callback(State(state): State<AppState>, Query(query): Query<CallbackQuery>) -> Response {
    if let Some(err) = query.error {
        warn!("Authorization denied upstream: {err}");
        return (StatusCode::BAD_REQUEST, render::auth_error_body(&err)).into_response();
    }

    let mut session = state.session.lock().await;

    let expected = session.pending_auth_state.take();
    if expected.is_none() || expected != query.state {
        warn!("Callback state mismatch, rejecting");
        return (
            StatusCode::BAD_REQUEST,
            render::auth_error_body("state mismatch"),
        )
            .into_response();
    }

    let Some(code) = query.code else {
        return (
            StatusCode::BAD_REQUEST,
            render::auth_error_body("missing authorization code"),
        )
            .into_response();
    };

    match session.tokens.exchange_code(&code).await {
        Ok(()) => Redirect::temporary("/queue").into_response(),
        Err(e) => {
            error!("Authorization code exchange failed: {e}");
            (
                StatusCode::UNAUTHORIZED,
                render::auth_error_body(&e.to_string()),
            )
                .into_response()
        }
    }
}

/// One reconciliation cycle per request; the page schedules the next one
/// itself via its embedded reload delay.
async fn queue_page(State(state): State<AppState>) -> Response {
    let mut session = state.session.lock().await;

    session.tokens.ensure_valid().await;
    let Some(token) = session.tokens.access_token().map(str::to_string) else {
        return Redirect::temporary("/login").into_response();
    };

    let source = AuthorizedSource {
        client: &state.spotify,
        token: &token,
    };
    let snapshot = reconcile::run_cycle(&source, &mut session.ctx, &state.config).await;

    Html(render::render(&snapshot, &state.config)).into_response()
}

async fn health() -> &'static str {
    "Server is running"
}
