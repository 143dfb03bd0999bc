//! Camera capture session and the prediction loop running on it.
//!
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use common::protocol::{PredictionResult, UiState};
use image::RgbImage;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    error::ClassifyError,
    meter::METER,
    nn::{Classifier, ModelHandle},
    presenter::{render, Presenter},
    sensors::{CameraBackend, CameraStream, CaptureConfig, DeviceId},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureState {
    Stopped,
    Starting,
    Active,
}

/// Owner of the single live camera stream.
pub struct CaptureSession {
    config: CaptureConfig,
    state: CaptureState,
    device: Option<DeviceId>,
    run: Option<PredictionRun>,
}

impl CaptureSession {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            state: CaptureState::Stopped,
            device: None,
            run: None,
        }
    }

    /// Current state. A loop that ended on its own counts as stopped.
    pub fn state(&self) -> CaptureState {
        match (&self.state, &self.run) {
            (CaptureState::Active, Some(run)) if run.is_finished() => CaptureState::Stopped,
            (state, _) => *state,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == CaptureState::Active
    }

    /// Device of the live stream.
    pub fn device(&self) -> Option<&DeviceId> {
        self.device.as_ref()
    }

    /// Error the prediction loop ended on, if it failed.
    pub fn failure(&self) -> Option<ClassifyError> {
        self.run.as_ref().and_then(PredictionRun::failure)
    }

    /// Open a stream on `device` and run the prediction loop on it.
    ///
    /// Any previous stream is stopped first.
    pub async fn start(
        &mut self,
        backend: &dyn CameraBackend,
        device: &DeviceId,
        model: ModelHandle,
        presenter: Arc<dyn Presenter>,
    ) -> Result<(), ClassifyError> {
        self.stop().await;

        self.state = CaptureState::Starting;
        let stream = match backend.open(device, &self.config) {
            Ok(stream) => stream,
            Err(err) => {
                self.state = CaptureState::Stopped;
                return Err(err);
            }
        };
        log::info!("Camera {device} started");

        presenter.render_rows(model.total_classes());
        self.run = Some(PredictionRun::spawn(stream, model, presenter));
        self.device = Some(device.clone());
        self.state = CaptureState::Active;

        Ok(())
    }

    /// Stop the loop and release the stream. Does nothing when stopped.
    ///
    /// A tick in flight completes and is presented before this returns, no
    /// update arrives afterwards. Returns the error the loop ended on.
    pub async fn stop(&mut self) -> Option<ClassifyError> {
        let mut failure = None;
        if let Some(run) = self.run.take() {
            let failed = run.failure.clone();
            if let Some(mut stream) = run.cancel_and_join().await {
                stream.stop();
            }
            failure = lock(&failed).take();
            if let Some(device) = self.device.take() {
                log::info!("Camera {device} stopped");
            }
        }
        self.state = CaptureState::Stopped;

        failure
    }
}

/// Handle of a running prediction loop.
pub struct PredictionRun {
    cancel: CancellationToken,
    failure: FailureSlot,
    handle: JoinHandle<Option<Box<dyn CameraStream>>>,
}

type FailureSlot = Arc<Mutex<Option<ClassifyError>>>;

fn lock(slot: &FailureSlot) -> std::sync::MutexGuard<'_, Option<ClassifyError>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PredictionRun {
    pub fn spawn(
        stream: Box<dyn CameraStream>,
        model: ModelHandle,
        presenter: Arc<dyn Presenter>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let failure = FailureSlot::default();
        let handle = tokio::spawn(run_prediction_loop(
            stream,
            model,
            presenter,
            cancel.clone(),
            failure.clone(),
        ));

        Self {
            cancel,
            failure,
            handle,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn failure(&self) -> Option<ClassifyError> {
        lock(&self.failure).clone()
    }

    /// Ask the loop to end after the current tick.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel and wait for the loop, getting the stream back.
    pub async fn cancel_and_join(self) -> Option<Box<dyn CameraStream>> {
        self.cancel();
        match self.handle.await {
            Ok(stream) => stream,
            Err(err) => {
                log::error!("Prediction loop failed: {err}");
                None
            }
        }
    }
}

/// Predict frame after frame until cancelled.
///
/// The cancellation is only checked between ticks. Capturing blocks until the
/// camera delivers the next frame, which paces the loop, and a slow model
/// lowers the frame rate since a single prediction is in flight at a time.
async fn run_prediction_loop(
    mut stream: Box<dyn CameraStream>,
    model: ModelHandle,
    presenter: Arc<dyn Presenter>,
    cancel: CancellationToken,
    failure: FailureSlot,
) -> Option<Box<dyn CameraStream>> {
    // Recorded before the page hears about it
    let fail = |err: ClassifyError| {
        log::error!("Prediction loop ended: {err}");
        let message = format!("{} ({err})", err.user_message());
        *lock(&failure) = Some(err);
        presenter.show_status(UiState::Error, &message);
        presenter.set_controls_enabled(true);
    };

    log::debug!("Prediction loop started");
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let model = model.clone();
        let tick = tokio::task::spawn_blocking(move || {
            let outcome = predict_frame(stream.as_mut(), model.as_ref());
            (stream, outcome)
        })
        .await;

        let outcome = match tick {
            Ok((returned, outcome)) => {
                stream = returned;
                outcome
            }
            Err(err) => {
                fail(ClassifyError::Inference(format!("prediction tick panicked: {err}")));
                return None;
            }
        };

        match outcome {
            Ok((frame, result, predict_time)) => {
                presenter.show_frame(&frame);
                presenter.update_rows(&render(&result));
                METER.record_frame(predict_time);
            }
            Err(err) => {
                fail(err);
                break;
            }
        }

        tokio::task::yield_now().await;
    }
    log::debug!("Prediction loop ended");

    Some(stream)
}

fn predict_frame(
    stream: &mut dyn CameraStream,
    model: &dyn Classifier,
) -> Result<(RgbImage, PredictionResult, Duration), ClassifyError> {
    let frame = stream.capture()?;
    let start = Instant::now();
    let result = model.predict(&frame)?;
    Ok((frame, result, start.elapsed()))
}
