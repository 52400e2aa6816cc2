use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use liveview_common::{StreamErrorListener, StreamErrorReason};
use liveview_consumer::FrameBufferSurface;
use liveview_producer::Connector;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::controller::StreamController;

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

pub struct AppState<C: Connector> {
    controller: tokio::sync::Mutex<StreamController<C, FrameBufferSurface>>,
    surface: Arc<FrameBufferSurface>,
    default_url: Option<String>,
    surface_size: (u32, u32),
    last_error: Arc<Mutex<Option<StreamErrorReason>>>,
}

impl<C: Connector> AppState<C> {
    /// `default_url` is used by `POST /start` when the request names none.
    /// `surface_size` is what `POST /surface` re-creates without a body.
    pub fn new(
        controller: StreamController<C, FrameBufferSurface>,
        default_url: Option<String>,
        surface_size: (u32, u32),
    ) -> Self {
        let surface = Arc::clone(controller.surface());
        Self {
            controller: tokio::sync::Mutex::new(controller),
            surface,
            default_url,
            surface_size,
            last_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Start a run on `url`, falling back to the configured default.
    ///
    /// Returns what `StreamController::start` returned.
    pub async fn start(&self, url: Option<&str>) -> bool {
        let url = url.or(self.default_url.as_deref());
        let mut controller = self.controller.lock().await;
        if !controller.is_started() {
            *self.last_error.lock() = None;
        }
        controller.start(url, self.listener())
    }

    pub async fn stop(&self) {
        self.controller.lock().await.stop();
    }

    pub fn last_error(&self) -> Option<StreamErrorReason> {
        *self.last_error.lock()
    }

    fn listener(&self) -> Arc<dyn StreamErrorListener> {
        let last_error = Arc::clone(&self.last_error);
        Arc::new(move |reason: StreamErrorReason| {
            error!(%reason, "liveview stream failed");
            *last_error.lock() = Some(reason);
        })
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub state: String,
    pub started: bool,
    pub last_error: Option<StreamErrorReason>,
    pub queued: usize,
    pub dropped: u64,
    pub posted_frames: u64,
    pub surface_available: bool,
}

#[derive(Debug, Deserialize)]
struct StartRequest {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SurfaceRequest {
    width: u32,
    height: u32,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn status_of<C: Connector>(state: &AppState<C>) -> StatusResponse {
    let controller = state.controller.lock().await;
    StatusResponse {
        state: controller.state().to_string(),
        started: controller.is_started(),
        last_error: state.last_error(),
        queued: controller.queue().len(),
        dropped: controller.queue().dropped(),
        posted_frames: state.surface.posted_frames(),
        surface_available: state.surface.is_available(),
    }
}

/// GET /status
async fn status<C: Connector>(State(state): State<Arc<AppState<C>>>) -> impl IntoResponse {
    Json(status_of(&state).await)
}

/// POST /start, optional body `{ "url": "http://..." }`
async fn start<C: Connector>(
    State(state): State<Arc<AppState<C>>>,
    body: Option<Json<StartRequest>>,
) -> impl IntoResponse {
    let url = body.and_then(|Json(req)| req.url);
    let url = url.as_deref().or(state.default_url.as_deref());
    let has_url = url.is_some_and(|u| !u.trim().is_empty());

    if state.start(url).await {
        return (StatusCode::ACCEPTED, Json(status_of(&state).await)).into_response();
    }
    if has_url {
        warn!("start rejected, liveview already running");
        (StatusCode::CONFLICT, "liveview already running").into_response()
    } else {
        (StatusCode::BAD_REQUEST, "no stream url configured or given").into_response()
    }
}

/// POST /stop
async fn stop<C: Connector>(State(state): State<Arc<AppState<C>>>) -> impl IntoResponse {
    state.stop().await;
    StatusCode::NO_CONTENT
}

/// GET /snapshot.png: the last posted canvas
async fn snapshot<C: Connector>(State(state): State<Arc<AppState<C>>>) -> impl IntoResponse {
    let surface = Arc::clone(&state.surface);
    let result = tokio::task::spawn_blocking(move || surface.snapshot_png()).await;

    match result {
        Ok(Ok(Some(png))) => ([(header::CONTENT_TYPE, "image/png")], png).into_response(),
        Ok(Ok(None)) => StatusCode::NOT_FOUND.into_response(),
        Ok(Err(e)) => {
            error!(error = %e, "PNG encoding failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Err(e) => {
            error!(error = %e, "spawn_blocking failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// DELETE /surface: tear the surface down, which ends the current run
async fn destroy_surface<C: Connector>(
    State(state): State<Arc<AppState<C>>>,
) -> impl IntoResponse {
    state.surface.destroy();
    state.controller.lock().await.on_surface_destroyed();
    StatusCode::NO_CONTENT
}

/// POST /surface, optional body `{ "width": 640, "height": 480 }`
async fn create_surface<C: Connector>(
    State(state): State<Arc<AppState<C>>>,
    body: Option<Json<SurfaceRequest>>,
) -> impl IntoResponse {
    let (width, height) = match body {
        Some(Json(req)) => (req.width, req.height),
        None => state.surface_size,
    };
    if width == 0 || height == 0 {
        return (StatusCode::BAD_REQUEST, "surface must have a non-zero size").into_response();
    }
    state.surface.create(width, height);
    info!(width, height, "surface re-created through API");
    StatusCode::NO_CONTENT.into_response()
}

pub fn router<C: Connector>(state: Arc<AppState<C>>) -> Router {
    Router::new()
        .route("/status", get(status::<C>))
        .route("/start", post(start::<C>))
        .route("/stop", post(stop::<C>))
        .route("/snapshot.png", get(snapshot::<C>))
        .route(
            "/surface",
            post(create_surface::<C>).delete(destroy_surface::<C>),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
