//! Edge adapter (spec component, HTTP surface).
//!
//! A tiny hand-built status page plus three routes: `/` shows the current
//! version and, if one is staged, an upgrade banner; `/check` re-scans the
//! staging directory; `/install` triggers the coordinator.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tracing::error;

use crate::coordinator::{Coordinator, InstallError};
use crate::scanner::{self, CandidateSlot};

#[derive(Clone)]
pub struct AppState {
    pub version: &'static str,
    pub staging_dir: PathBuf,
    pub candidate: Arc<CandidateSlot>,
    pub coordinator: Arc<Coordinator>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/check", get(check))
        .route("/install", get(install))
        .with_state(state)
}

fn render(version: &str, candidate: Option<String>) -> String {
    let banner = match candidate {
        Some(name) => format!(
            r#"<p>New version is available: {name} | <a href="install">Upgrade</a></p>"#
        ),
        None => String::new(),
    };
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>handoffd {version}</title></head>
<body>
<h1>This server is version {version}</h1>
<a href="check">Check for new version</a>
<br>
{banner}
</body>
</html>
"#
    )
}

async fn index(State(state): State<AppState>) -> Html<String> {
    Html(render(state.version, state.candidate.get()))
}

async fn check(State(state): State<AppState>) -> Html<String> {
    let candidate = scanner::scan(&state.staging_dir, &state.candidate).map(|c| c.name);
    Html(render(state.version, candidate))
}

async fn install(State(state): State<AppState>) -> Response {
    match state.coordinator.install().await {
        // `Redirect::to` emits axum's 303 See Other; the spec calls for a
        // plain 302 Found, so the response is built by hand.
        Ok(()) => (StatusCode::FOUND, [(header::LOCATION, "/")]).into_response(),
        Err(InstallError::NoCandidate) => {
            (StatusCode::UNAUTHORIZED, "no candidate staged").into_response()
        }
        Err(e) => {
            error!(error = %e, "install failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
    }
}
