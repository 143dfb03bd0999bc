//! Endpoints of HTTP server.
//!
use std::{convert::Infallible, sync::Arc};

use axum::{
    body::StreamBody,
    extract::Multipart,
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Response,
    },
    Extension, Json,
};
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_stream::wrappers::BroadcastStream;

use common::protocol::PageSnapshot;

use crate::{
    controller::Controller,
    error::ClassifyError,
    pubsub::{page_events, BroadcastPresenter},
};

/// State shared by all handlers.
pub struct AppState {
    pub controller: Mutex<Controller>,
    pub presenter: Arc<BroadcastPresenter>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    message: &'static str,
}

impl IntoResponse for ClassifyError {
    fn into_response(self) -> Response {
        let status = match &self {
            ClassifyError::ModelLoad(_) => StatusCode::SERVICE_UNAVAILABLE,
            ClassifyError::NoCameraFound => StatusCode::NOT_FOUND,
            ClassifyError::Permission(_) => StatusCode::FORBIDDEN,
            ClassifyError::CameraAccess(_) => StatusCode::CONFLICT,
            ClassifyError::FileDecode(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ClassifyError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.to_string(),
            message: self.user_message(),
        };

        (status, Json(body)).into_response()
    }
}

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Current page state as JSON.
pub async fn status(Extension(state): Extension<Arc<AppState>>) -> Json<PageSnapshot> {
    Json(state.presenter.snapshot())
}

/// Page events as server-sent events, starting with the current page state.
pub async fn events(
    Extension(state): Extension<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = page_events(state.presenter.clone()).filter_map(|event| async move {
        match Event::default().json_data(&event) {
            Ok(event) => Some(Ok(event)),
            Err(err) => {
                log::warn!("Failed to serialize page event: {err}");
                None
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Preview of the canvas the model sees.
pub async fn video_stream(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    let rx = state.presenter.subscribe_frames();

    // Frames a slow client missed are skipped
    let stream = BroadcastStream::new(rx)
        .filter_map(|item| async move { item.ok().map(Ok::<_, Infallible>) });

    // Set body and headers for multipart streaming
    let body = StreamBody::new(stream);
    let headers = [(
        header::CONTENT_TYPE,
        "multipart/x-mixed-replace; boundary=frame",
    )];

    (headers, body)
}

pub async fn start_camera(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<PageSnapshot>, ClassifyError> {
    state.controller.lock().await.start_camera().await?;
    Ok(Json(state.presenter.snapshot()))
}

pub async fn switch_camera(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<PageSnapshot>, ClassifyError> {
    state.controller.lock().await.switch_camera().await?;
    Ok(Json(state.presenter.snapshot()))
}

pub async fn stop_camera(Extension(state): Extension<Arc<AppState>>) -> Json<PageSnapshot> {
    state.controller.lock().await.stop_camera().await;
    Json(state.presenter.snapshot())
}

/// Classify the first file of a multipart upload.
pub async fn upload(
    Extension(state): Extension<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<PageSnapshot>, ClassifyError> {
    let mut data = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ClassifyError::FileDecode(e.to_string()))?
    {
        if field.file_name().is_some() || field.name() == Some("image") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ClassifyError::FileDecode(e.to_string()))?;
            data = Some(bytes.to_vec());
            break;
        }
    }
    let data = data.ok_or_else(|| ClassifyError::FileDecode("no file in upload".into()))?;
    log::info!("Upload of {} bytes", data.len());

    state.controller.lock().await.upload_image(data).await?;
    Ok(Json(state.presenter.snapshot()))
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>Live classification</title>
  <style>
    .hidden { display: none; }
    .error { color: #b00020; }
    .prediction-row { display: flex; gap: 1em; margin: 4px 0; }
    .progress-bar { flex: 1; background: #eee; }
    .progress-fill { background: #8ab4f8; white-space: nowrap; }
    .top-prediction .progress-fill { background: #34a853; }
  </style>
</head>
<body>
  <div id="status-screen"><p id="status-message">Ready</p></div>
  <button id="start-camera-button">Start camera</button>
  <button id="switch-camera-button" class="hidden">Switch camera</button>
  <button id="stop-camera-button">Stop camera</button>
  <input id="image-upload-input" type="file" accept="image/*">
  <div><img id="preview" src="/video_stream" width="400" height="400"></div>
  <div id="results-container"></div>
  <script>
    const $ = (id) => document.getElementById(id);
    const post = (path, body) => fetch(path, { method: "POST", body });

    $("start-camera-button").onclick = () => post("/camera/start");
    $("switch-camera-button").onclick = () => post("/camera/switch");
    $("stop-camera-button").onclick = () => post("/camera/stop");
    $("image-upload-input").onchange = (e) => {
      const file = e.target.files[0];
      if (!file) return;
      const form = new FormData();
      form.append("image", file);
      post("/upload", form);
    };

    const handlers = {
      snapshot: (s) => {
        handlers.rows({ count: s.row_count });
        if (s.latest) handlers.predictions(s.latest);
        handlers.status({ state: s.state, message: s.message || "Ready" });
        handlers.controls({ enabled: s.controls_enabled });
        handlers.switch_camera({ visible: s.switch_visible });
      },
      status: (e) => {
        $("status-screen").classList.toggle("hidden", e.state === "active");
        $("status-screen").classList.toggle("error", e.state === "error");
        $("status-message").textContent = e.message;
      },
      controls: (e) => {
        $("start-camera-button").disabled = !e.enabled;
        $("image-upload-input").disabled = !e.enabled;
      },
      switch_camera: (e) => $("switch-camera-button").classList.toggle("hidden", !e.visible),
      rows: (e) => {
        const results = $("results-container");
        results.innerHTML = "";
        for (let i = 0; i < e.count; i++) {
          const row = document.createElement("div");
          row.className = "prediction-row";
          row.innerHTML = '<span class="class-name"></span><div class="progress-bar"><div class="progress-fill"></div></div>';
          results.appendChild(row);
        }
      },
      predictions: (e) => {
        const rows = $("results-container").children;
        e.rows.forEach((r, i) => {
          if (!rows[i]) return;
          rows[i].querySelector(".class-name").textContent = r.class_name;
          const fill = rows[i].querySelector(".progress-fill");
          fill.style.width = r.fill_percent + "%";
          fill.textContent = r.label;
          rows[i].classList.toggle("top-prediction", r.is_top);
        });
      },
    };

    new EventSource("/events").onmessage = (msg) => {
      const event = JSON.parse(msg.data);
      (handlers[event.type] || (() => {}))(event);
    };
  </script>
</body>
</html>
"#;
