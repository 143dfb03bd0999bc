//! Classification server binary.
//!
use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Router,
};
use clap::Parser;
use env_logger::TimestampPrecision;
use tokio::sync::Mutex;

use classify_server::{
    config::Args,
    controller::Controller,
    endpoints::{self, AppState},
    meter::spawn_meter_logger,
    model_gate::ModelGate,
    nn::TractModelProvider,
    presenter::Presenter,
    pubsub::BroadcastPresenter,
    sensors::default_backend,
};

/// Largest accepted upload.
const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let presenter = Arc::new(BroadcastPresenter::new());
    let model = ModelGate::new(Arc::new(TractModelProvider::new()), args.model_location());
    let controller = Controller::new(
        model,
        default_backend(&args.device_dir),
        args.capture_config(),
        presenter.clone() as Arc<dyn Presenter>,
    );
    let state = Arc::new(AppState {
        controller: Mutex::new(controller),
        presenter,
    });

    spawn_meter_logger();

    // Build HTTP server with endpoints
    let app = Router::new()
        .route("/", get(endpoints::index))
        .route("/healthcheck", get(endpoints::healthcheck))
        .route("/status", get(endpoints::status))
        .route("/events", get(endpoints::events))
        .route("/video_stream", get(endpoints::video_stream))
        .route("/camera/start", post(endpoints::start_camera))
        .route("/camera/switch", post(endpoints::switch_camera))
        .route("/camera/stop", post(endpoints::stop_camera))
        .route("/upload", post(endpoints::upload))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(Extension(state));

    // Serve HTTP server
    let addr: SocketAddr = args.server_address.parse()?;
    log::info!("Serving on http://{addr}, model at {}", args.model_url);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
