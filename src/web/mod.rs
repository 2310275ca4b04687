//! HTTP control panel.
//!
//! - `GET /` control page
//! - `GET /video_feed` MJPEG live stream with overlay
//! - `POST /start_recording`, `POST /stop_recording`
//! - `POST /take_photo`
//! - `POST /toggle_motion`
//! - `GET /status`, `GET /files`
//!
//! Handlers never fail at the HTTP level for device problems: they answer
//! `{success: false, message}` and log the cause.

use crate::stream;
use crate::system::{SurveillanceSystem, SystemStatus};
use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

const INDEX_HTML: &str = include_str!("index.html");

#[derive(Debug, Default, Deserialize)]
pub struct StartRecordingRequest {
    /// Seconds until auto-stop.
    pub duration: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PhotoResponse {
    pub success: bool,
    pub message: String,
    pub filename: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToggleResponse {
    pub success: bool,
    pub message: String,
    pub active: bool,
}

pub fn router(system: SurveillanceSystem) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/video_feed", get(video_feed))
        .route("/status", get(status))
        .route("/files", get(files))
        .route("/start_recording", post(start_recording))
        .route("/stop_recording", post(stop_recording))
        .route("/take_photo", post(take_photo))
        .route("/toggle_motion", post(toggle_motion))
        .layer(CorsLayer::permissive())
        .with_state(system)
}

/// Bind `bind` and serve until `shutdown` resolves.
pub async fn serve<F>(system: SurveillanceSystem, bind: &str, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(bind)
        .await
        .context(format!("Failed to bind to {}", bind))?;
    serve_on(system, listener, shutdown).await
}

/// Serve on an already-bound listener.
pub async fn serve_on<F>(system: SurveillanceSystem, listener: TcpListener, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr().context("Listener has no local address")?;
    log::info!("Control panel listening on http://{}", addr);

    axum::serve(listener, router(system))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Web server error")?;

    log::info!("Control panel stopped");
    Ok(())
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn video_feed(State(system): State<SurveillanceSystem>) -> Response {
    let body = Body::from_stream(system.live_stream().into_stream());
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, stream::CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache, no-store"),
        ],
        body,
    )
        .into_response()
}

async fn status(State(system): State<SurveillanceSystem>) -> Json<SystemStatus> {
    Json(system.status())
}

async fn files(State(system): State<SurveillanceSystem>) -> Response {
    match system.files() {
        Ok(listing) => Json(listing).into_response(),
        Err(e) => {
            log::error!("File listing failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ActionResponse {
                    success: false,
                    message: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

async fn start_recording(
    State(system): State<SurveillanceSystem>,
    body: Option<Json<StartRecordingRequest>>,
) -> Json<ActionResponse> {
    let requested = body.and_then(|Json(request)| request.duration);
    let duration = match requested {
        Some(secs) if secs > 0 => Duration::from_secs(secs),
        _ => system.config().recording.default_duration(),
    };

    Json(match system.start_recording(Some(duration)).await {
        Ok(session) => ActionResponse {
            success: true,
            message: format!(
                "Recording started ({}s)",
                session.planned_duration.unwrap_or(duration).as_secs()
            ),
        },
        Err(e) => {
            log::warn!("Start recording request failed: {}", e);
            ActionResponse {
                success: false,
                message: format!("Could not start recording: {}", e),
            }
        }
    })
}

async fn stop_recording(State(system): State<SurveillanceSystem>) -> Json<ActionResponse> {
    Json(match system.stop_recording().await {
        Ok(summary) => ActionResponse {
            success: true,
            message: format!(
                "Recording stopped after {}s",
                summary.elapsed.as_secs()
            ),
        },
        Err(e) => {
            log::warn!("Stop recording request failed: {}", e);
            ActionResponse {
                success: false,
                message: format!("Could not stop recording: {}", e),
            }
        }
    })
}

async fn take_photo(State(system): State<SurveillanceSystem>) -> Json<PhotoResponse> {
    Json(match system.take_photo().await {
        Ok(photo) => PhotoResponse {
            success: true,
            message: format!("Photo taken: {}", photo.name),
            filename: Some(photo.name),
        },
        Err(e) => PhotoResponse {
            success: false,
            message: format!("Could not take photo: {}", e),
            filename: None,
        },
    })
}

async fn toggle_motion(State(system): State<SurveillanceSystem>) -> Json<ToggleResponse> {
    Json(match system.toggle_motion().await {
        Ok(true) => ToggleResponse {
            success: true,
            message: "Motion detection enabled".to_string(),
            active: true,
        },
        Ok(false) => ToggleResponse {
            success: true,
            message: "Motion detection disabled".to_string(),
            active: false,
        },
        Err(e) => {
            log::warn!("Toggle motion request failed: {}", e);
            ToggleResponse {
                success: false,
                message: format!("Could not start motion detection: {}", e),
                active: system.monitor().is_active(),
            }
        }
    })
}
