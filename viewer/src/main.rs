use liveview_common::config::Config;
use liveview_consumer::{DecodeOptions, FrameBufferSurface};
use liveview_producer::HttpConnector;
use liveview_viewer::{router, AppState, StreamController};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        url = config.stream.url.as_deref().unwrap_or("<unset>"),
        boundary = config.stream.boundary,
        queue_capacity = config.stream.queue_capacity,
        surface_width = config.render.surface_width,
        surface_height = config.render.surface_height,
        sample_size = config.render.sample_size,
        "starting liveview viewer"
    );

    let connector = match HttpConnector::new(&config.stream) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!(error = %e, "failed to create HTTP connector");
            std::process::exit(1);
        }
    };
    let surface = Arc::new(FrameBufferSurface::new(
        config.render.surface_width,
        config.render.surface_height,
    ));
    let controller = StreamController::new(connector, surface)
        .with_decode_options(DecodeOptions::from(&config.render))
        .with_queue_capacity(config.stream.queue_capacity);

    let state = Arc::new(AppState::new(
        controller,
        config.stream.url.clone(),
        (config.render.surface_width, config.render.surface_height),
    ));

    if config.stream.autostart && !state.start(None).await {
        error!("autostart failed, waiting for POST /start");
    }

    let app = router(Arc::clone(&state));
    let addr = format!("0.0.0.0:{}", config.api.port);
    info!(addr, "liveview control API starting");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
        }
        info!("shutdown signal received");
    };
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!(error = %e, "API server failed");
    }

    state.stop().await;
    info!("liveview viewer stopped");
}
