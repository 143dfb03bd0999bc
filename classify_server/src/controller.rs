//! Lifecycle of the classification page.
//!
//! The controller sequences the user actions: it loads the model on first
//! need, picks the input source (camera or uploaded image), and reports every
//! step to the presenter. Camera and upload never feed the presenter at the
//! same time, an upload stops the camera loop before it predicts.
use std::{sync::Arc, time::Instant};

use common::protocol::UiState;
use image::RgbImage;

use crate::{
    capture::{CaptureSession, CaptureState},
    devices::DeviceEnumerator,
    error::ClassifyError,
    model_gate::ModelGate,
    nn::ModelHandle,
    presenter::{render, Presenter},
    sensors::{CameraBackend, CaptureConfig, DeviceId},
};

pub struct Controller {
    model: ModelGate,
    backend: Box<dyn CameraBackend>,
    devices: DeviceEnumerator,
    capture: CaptureSession,
    presenter: Arc<dyn Presenter>,
    ui_state: UiState,
}

impl Controller {
    pub fn new(
        model: ModelGate,
        backend: Box<dyn CameraBackend>,
        capture_config: CaptureConfig,
        presenter: Arc<dyn Presenter>,
    ) -> Self {
        Self {
            model,
            backend,
            devices: DeviceEnumerator::new(),
            capture: CaptureSession::new(capture_config),
            presenter,
            ui_state: UiState::Idle,
        }
    }

    /// Screen the page shows. A camera loop that failed on its own counts
    /// as an error until the next action.
    pub fn ui_state(&self) -> UiState {
        match self.capture.failure() {
            Some(_) => UiState::Error,
            None => self.ui_state,
        }
    }

    pub fn capture_state(&self) -> CaptureState {
        self.capture.state()
    }

    /// Device of the live camera stream.
    pub fn active_device(&self) -> Option<&DeviceId> {
        self.capture.device()
    }

    /// Start the camera and its prediction loop.
    pub async fn start_camera(&mut self) -> Result<(), ClassifyError> {
        self.presenter.set_controls_enabled(false);

        let model = match self.ensure_model().await {
            Ok(model) => model,
            Err(err) => return self.fail(err),
        };

        self.set_status(UiState::Loading, "Searching cameras...");
        let found = self
            .devices
            .list_cameras(self.backend.as_ref())
            .map(|devices| devices.len());
        if let Err(err) = found {
            return self.fail(err);
        }
        self.presenter.set_switch_visible(self.devices.can_switch());

        self.start_stream(model).await
    }

    /// Restart the camera on the next device. Without a second camera this
    /// does nothing.
    pub async fn switch_camera(&mut self) -> Result<(), ClassifyError> {
        if !self.devices.can_switch() {
            return Ok(());
        }
        self.presenter.set_controls_enabled(false);
        if let Some(device) = self.devices.advance() {
            log::info!("Switching to camera {device}");
        }

        let model = match self.ensure_model().await {
            Ok(model) => model,
            Err(err) => return self.fail(err),
        };
        self.start_stream(model).await
    }

    /// Stop the camera. Does nothing when it is not running.
    pub async fn stop_camera(&mut self) {
        if let Some(err) = self.capture.stop().await {
            // The page keeps showing what ended the loop
            log::debug!("Camera had stopped on: {err}");
            self.ui_state = UiState::Error;
        }
        if self.ui_state != UiState::Error {
            self.set_status(UiState::Idle, "Camera stopped");
        }
        self.presenter.set_controls_enabled(true);
    }

    /// Classify an uploaded image once.
    pub async fn upload_image(&mut self, bytes: Vec<u8>) -> Result<(), ClassifyError> {
        self.presenter.set_controls_enabled(false);

        // The camera and the upload never run at the same time
        self.capture.stop().await;
        self.presenter.set_switch_visible(false);

        let image = match decode_upload(bytes).await {
            Ok(image) => image,
            Err(err) => return self.fail(err),
        };
        log::info!("Received image of {}x{}", image.width(), image.height());

        let model = match self.ensure_model().await {
            Ok(model) => model,
            Err(err) => return self.fail(err),
        };

        self.presenter.show_frame(&image);
        self.presenter.render_rows(model.total_classes());
        self.set_status(UiState::Active, "");

        let start = Instant::now();
        let result = match tokio::task::spawn_blocking(move || model.predict(&image)).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => return self.fail(err),
            Err(err) => return self.fail(ClassifyError::Inference(err.to_string())),
        };
        self.presenter.update_rows(&render(&result));
        log::info!("Classified upload in {:.1?}", start.elapsed());

        self.presenter.set_controls_enabled(true);
        Ok(())
    }

    async fn ensure_model(&mut self) -> Result<ModelHandle, ClassifyError> {
        if let Some(model) = self.model.get() {
            return Ok(model);
        }
        self.set_status(UiState::Loading, "Loading model...");
        self.model.ensure_loaded().await
    }

    async fn start_stream(&mut self, model: ModelHandle) -> Result<(), ClassifyError> {
        self.set_status(UiState::Loading, "Starting camera...");

        let device = match self.devices.active_device() {
            Some(device) => device.clone(),
            None => return self.fail(ClassifyError::NoCameraFound),
        };

        let started = self
            .capture
            .start(
                self.backend.as_ref(),
                &device,
                model,
                self.presenter.clone(),
            )
            .await;
        if let Err(err) = started {
            return self.fail(err);
        }

        self.set_status(UiState::Active, "");
        self.presenter.set_controls_enabled(true);
        Ok(())
    }

    fn set_status(&mut self, state: UiState, message: &str) {
        self.ui_state = state;
        self.presenter.show_status(state, message);
    }

    /// Show the error and hand the controls back for a retry.
    fn fail(&mut self, err: ClassifyError) -> Result<(), ClassifyError> {
        log::error!("{err}");
        self.set_status(UiState::Error, &format!("{} ({err})", err.user_message()));
        self.presenter.set_controls_enabled(true);
        Err(err)
    }
}

/// Decode an uploaded file off the async runtime.
async fn decode_upload(bytes: Vec<u8>) -> Result<RgbImage, ClassifyError> {
    if bytes.is_empty() {
        return Err(ClassifyError::FileDecode("empty file".into()));
    }
    tokio::task::spawn_blocking(move || -> Result<RgbImage, ClassifyError> {
        Ok(image::load_from_memory(&bytes)?.to_rgb8())
    })
    .await
    .map_err(|e| ClassifyError::FileDecode(e.to_string()))?
}
