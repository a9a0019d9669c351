//! HTTP surface over the job store plus the dashboard asset.
//!
//! Every request opens and releases its own database connection: requests
//! never share mutable state, so one slow or failing request cannot wedge
//! the others. A bad query parameter degrades to the configured default,
//! and a store error fails only the request that hit it.

use crate::db;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Built-in dashboard served when no asset file is found on disk.
const EMBEDDED_DASHBOARD: &str = include_str!("../assets/dashboard.html");

#[derive(Clone)]
struct AppState {
    db_path: PathBuf,
    default_limit: u32,
    dashboard_html: Arc<String>,
}

/// Server settings resolved from config and CLI flags.
#[derive(Debug)]
pub struct ServeOptions {
    pub host: String,
    pub port: u16,
    pub default_limit: u32,
    pub dashboard: Option<PathBuf>,
    pub open_browser: bool,
}

pub async fn run(db_path: PathBuf, options: ServeOptions) -> Result<(), Box<dyn std::error::Error>> {
    // Ensure the schema up-front so the API works before anything is enqueued.
    db::open_or_create(&db_path)?;

    let dashboard_html = load_dashboard(options.dashboard.as_deref());
    let state = AppState {
        db_path: db_path.clone(),
        default_limit: options.default_limit.max(1),
        dashboard_html: Arc::new(dashboard_html),
    };
    let app = build_router(state);

    let addr = format!("{}:{}", options.host, options.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(
        "queue api listening on http://{local_addr} (db: {})",
        db_path.display()
    );

    if options.open_browser {
        open_in_browser(&format!("http://{local_addr}/"));
    }

    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(dashboard))
        .route("/dashboard", get(dashboard))
        .route("/index.html", get(dashboard))
        .route("/api/jobs", get(api_jobs))
        .fallback(not_found)
        .with_state(state)
        .layer(CorsLayer::permissive())
}

async fn dashboard(State(state): State<AppState>) -> Html<String> {
    Html(state.dashboard_html.as_ref().clone())
}

async fn api_jobs(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    // A malformed or non-positive limit is never an error; it falls back to
    // the configured default.
    let limit = params
        .get("limit")
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .filter(|n| *n > 0)
        .map(|n| n.min(u32::MAX as i64) as u32)
        .unwrap_or(state.default_limit);

    let conn = db::open_or_create(&state.db_path).map_err(|e| {
        tracing::warn!("api/jobs: cannot open store: {e}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    let jobs = db::fetch_jobs(&conn, limit).map_err(|e| {
        tracing::warn!("api/jobs: fetch failed: {e}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(json!({
        "jobs": jobs,
        "generated_at": db::utc_now(),
        "db_path": state.db_path.display().to_string(),
    })))
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Resolve the dashboard HTML: explicit path first, then well-known asset
/// locations, finally the embedded fallback.
fn load_dashboard(explicit: Option<&Path>) -> String {
    for candidate in dashboard_candidates(explicit) {
        match std::fs::read_to_string(&candidate) {
            Ok(html) => {
                tracing::debug!(path = %candidate.display(), "serving dashboard from file");
                return html;
            }
            Err(_) => continue,
        }
    }
    tracing::debug!("serving embedded dashboard");
    EMBEDDED_DASHBOARD.to_string()
}

fn dashboard_candidates(explicit: Option<&Path>) -> Vec<PathBuf> {
    if let Some(path) = explicit {
        // An explicit path that does not resolve falls through to the
        // embedded fallback rather than erroring at startup.
        return vec![path.to_path_buf()];
    }
    let mut candidates = vec![PathBuf::from("assets/job-dashboard.html")];
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()))
    {
        candidates.push(exe_dir.join("assets/job-dashboard.html"));
    }
    candidates
}

/// Best-effort browser launch; failure is logged, never fatal.
fn open_in_browser(url: &str) {
    #[cfg(target_os = "macos")]
    let opener = "open";
    #[cfg(not(target_os = "macos"))]
    let opener = "xdg-open";

    if let Err(e) = std::process::Command::new(opener).arg(url).spawn() {
        tracing::warn!("could not open {url} in a browser: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{enqueue, JobStatus, NewJob};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_app(default_limit: u32) -> (TempDir, Router, PathBuf) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("queue.db");
        let state = AppState {
            db_path: db_path.clone(),
            default_limit,
            dashboard_html: Arc::new(EMBEDDED_DASHBOARD.to_string()),
        };
        (dir, build_router(state), db_path)
    }

    fn seed_jobs(db_path: &Path, count: usize) {
        let conn = db::open_or_create(db_path).unwrap();
        for i in 0..count {
            enqueue(
                &conn,
                &NewJob {
                    task: format!("job {i}"),
                    status: JobStatus::Running,
                    ..NewJob::default()
                },
            )
            .unwrap();
        }
    }

    async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    #[tokio::test]
    async fn jobs_endpoint_returns_envelope() {
        let (_dir, app, db_path) = test_app(200);
        seed_jobs(&db_path, 2);

        let (status, body) = get_json(&app, "/api/jobs").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["jobs"].as_array().unwrap().len(), 2);
        assert!(body["generated_at"].as_str().unwrap().ends_with('Z'));
        assert_eq!(body["db_path"], json!(db_path.display().to_string()));
    }

    #[tokio::test]
    async fn limit_truncates_results() {
        let (_dir, app, db_path) = test_app(200);
        seed_jobs(&db_path, 5);

        let (_, body) = get_json(&app, "/api/jobs?limit=3").await;
        assert_eq!(body["jobs"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn zero_limit_falls_back_to_default() {
        let (_dir, app, db_path) = test_app(4);
        seed_jobs(&db_path, 6);

        let (status, body) = get_json(&app, "/api/jobs?limit=0").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["jobs"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn malformed_limit_falls_back_to_default() {
        let (_dir, app, db_path) = test_app(4);
        seed_jobs(&db_path, 6);

        for uri in ["/api/jobs?limit=abc", "/api/jobs?limit=-3", "/api/jobs?limit="] {
            let (status, body) = get_json(&app, uri).await;
            assert_eq!(status, StatusCode::OK, "uri {uri}");
            assert_eq!(body["jobs"].as_array().unwrap().len(), 4, "uri {uri}");
        }
    }

    #[tokio::test]
    async fn api_works_on_empty_store() {
        let (_dir, app, _db_path) = test_app(200);
        let (status, body) = get_json(&app, "/api/jobs").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["jobs"], json!([]));
    }

    #[tokio::test]
    async fn dashboard_served_on_root_aliases() {
        let (_dir, app, _db_path) = test_app(200);
        for uri in ["/", "/dashboard", "/index.html"] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "uri {uri}");
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let html = String::from_utf8(bytes.to_vec()).unwrap();
            assert!(html.contains("Agent Job Queue"), "uri {uri}");
        }
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let (_dir, app, _db_path) = test_app(200);
        let (status, _) = get_json(&app, "/api/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn explicit_dashboard_path_is_only_candidate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.html");
        std::fs::write(&path, "<html>custom</html>").unwrap();
        assert_eq!(load_dashboard(Some(&path)), "<html>custom</html>");
        // missing explicit path degrades to the embedded fallback
        let missing = dir.path().join("absent.html");
        assert_eq!(load_dashboard(Some(&missing)), EMBEDDED_DASHBOARD);
    }
}
