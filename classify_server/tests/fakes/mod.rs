//! In-memory stand-ins for the camera, the model and the page.
#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc, Arc, Mutex,
    },
    time::Duration,
};

use classify_server::{
    controller::Controller,
    error::ClassifyError,
    model_gate::ModelGate,
    nn::{Classifier, ModelHandle, ModelLocation, ModelProvider},
    presenter::Presenter,
    sensors::{CameraBackend, CameraStream, CaptureConfig, DeviceId},
};
use common::protocol::{ClassPrediction, PageEvent, PredictionResult, UiState, ViewModel};
use futures::future::BoxFuture;
use image::{Rgb, RgbImage};

pub const LABELS: [&str; 3] = ["cat", "dog", "bird"];
pub const PROBABILITIES: [f32; 3] = [0.2, 0.7, 0.1];

pub struct FakeClassifier {
    pub started: AtomicUsize,
    gate: Option<Mutex<mpsc::Receiver<()>>>,
}

impl FakeClassifier {
    pub fn new() -> Self {
        Self {
            started: AtomicUsize::new(0),
            gate: None,
        }
    }

    /// Every prediction waits for a message on the returned sender.
    pub fn gated() -> (Self, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        let classifier = Self {
            started: AtomicUsize::new(0),
            gate: Some(Mutex::new(rx)),
        };
        (classifier, tx)
    }
}

impl Classifier for FakeClassifier {
    fn total_classes(&self) -> usize {
        LABELS.len()
    }

    fn predict(&self, _image: &RgbImage) -> Result<PredictionResult, ClassifyError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.lock().unwrap().recv().ok();
        }
        Ok(LABELS
            .iter()
            .zip(PROBABILITIES)
            .map(|(label, p)| ClassPrediction::new(*label, p))
            .collect())
    }
}

pub struct FakeProvider {
    pub loads: AtomicUsize,
    pub fail: AtomicBool,
    classifier: ModelHandle,
}

impl FakeProvider {
    pub fn new(classifier: FakeClassifier) -> Self {
        Self {
            loads: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            classifier: Arc::new(classifier),
        }
    }
}

impl ModelProvider for FakeProvider {
    fn load<'a>(
        &'a self,
        _location: &'a ModelLocation,
    ) -> BoxFuture<'a, Result<ModelHandle, ClassifyError>> {
        Box::pin(async move {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(ClassifyError::ModelLoad("model.json: 404".into()));
            }
            Ok(self.classifier.clone())
        })
    }
}

#[derive(Default)]
pub struct CameraLog {
    pub listings: AtomicUsize,
    pub opened: Mutex<Vec<DeviceId>>,
    pub captures: AtomicUsize,
    pub stops: AtomicUsize,
}

impl CameraLog {
    pub fn opened(&self) -> Vec<DeviceId> {
        self.opened.lock().unwrap().clone()
    }
}

pub struct FakeBackend {
    devices: Vec<DeviceId>,
    deny: Arc<AtomicBool>,
    fail_open: bool,
    /// Captures after which every stream fails.
    fail_after: Option<usize>,
    pub log: Arc<CameraLog>,
}

impl FakeBackend {
    pub fn with_cameras(count: usize) -> Self {
        Self {
            devices: (0..count).map(device).collect(),
            deny: Arc::new(AtomicBool::new(false)),
            fail_open: false,
            fail_after: None,
            log: Arc::new(CameraLog::default()),
        }
    }

    /// Refuse to list devices until the returned flag is cleared.
    pub fn denying(self) -> (Self, Arc<AtomicBool>) {
        self.deny.store(true, Ordering::SeqCst);
        let deny = self.deny.clone();
        (self, deny)
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn failing_after(mut self, captures: usize) -> Self {
        self.fail_after = Some(captures);
        self
    }
}

pub fn device(idx: usize) -> DeviceId {
    DeviceId(format!("/dev/video{idx}"))
}

impl CameraBackend for FakeBackend {
    fn list_devices(&self) -> Result<Vec<DeviceId>, ClassifyError> {
        self.log.listings.fetch_add(1, Ordering::SeqCst);
        if self.deny.load(Ordering::SeqCst) {
            return Err(ClassifyError::Permission("/dev/video0: access denied".into()));
        }
        Ok(self.devices.clone())
    }

    fn open(
        &self,
        device: &DeviceId,
        config: &CaptureConfig,
    ) -> Result<Box<dyn CameraStream>, ClassifyError> {
        if self.fail_open {
            return Err(ClassifyError::CameraAccess(format!("{device} is busy")));
        }
        self.log.opened.lock().unwrap().push(device.clone());
        Ok(Box::new(FakeStream {
            size: config.size,
            captures: 0,
            fail_after: self.fail_after,
            log: self.log.clone(),
        }))
    }
}

struct FakeStream {
    size: u32,
    captures: usize,
    fail_after: Option<usize>,
    log: Arc<CameraLog>,
}

impl CameraStream for FakeStream {
    fn capture(&mut self) -> Result<RgbImage, ClassifyError> {
        if Some(self.captures) == self.fail_after {
            return Err(ClassifyError::CameraAccess("device unplugged".into()));
        }
        // Roughly a camera frame interval
        std::thread::sleep(Duration::from_millis(2));
        self.captures += 1;
        self.log.captures.fetch_add(1, Ordering::SeqCst);
        Ok(RgbImage::from_pixel(self.size, self.size, Rgb([90, 90, 90])))
    }

    fn stop(&mut self) {
        self.log.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Presenter remembering every call as a page event.
#[derive(Default)]
pub struct RecordingPresenter {
    pub events: Mutex<Vec<PageEvent>>,
    pub frames: AtomicUsize,
}

impl RecordingPresenter {
    pub fn events(&self) -> Vec<PageEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn predictions(&self) -> Vec<ViewModel> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                PageEvent::Predictions(view) => Some(view),
                _ => None,
            })
            .collect()
    }

    pub fn prediction_count(&self) -> usize {
        self.predictions().len()
    }

    pub fn last_status(&self) -> Option<(UiState, String)> {
        self.events().into_iter().rev().find_map(|event| match event {
            PageEvent::Status { state, message } => Some((state, message)),
            _ => None,
        })
    }

    pub fn controls_enabled(&self) -> Option<bool> {
        self.events().into_iter().rev().find_map(|event| match event {
            PageEvent::Controls { enabled } => Some(enabled),
            _ => None,
        })
    }

    pub fn switch_visible(&self) -> Option<bool> {
        self.events().into_iter().rev().find_map(|event| match event {
            PageEvent::SwitchCamera { visible } => Some(visible),
            _ => None,
        })
    }

    fn push(&self, event: PageEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl Presenter for RecordingPresenter {
    fn show_status(&self, state: UiState, message: &str) {
        self.push(PageEvent::Status {
            state,
            message: message.to_owned(),
        });
    }

    fn set_controls_enabled(&self, enabled: bool) {
        self.push(PageEvent::Controls { enabled });
    }

    fn set_switch_visible(&self, visible: bool) {
        self.push(PageEvent::SwitchCamera { visible });
    }

    fn render_rows(&self, class_count: usize) {
        self.push(PageEvent::Rows { count: class_count });
    }

    fn update_rows(&self, view: &ViewModel) {
        self.push(PageEvent::Predictions(view.clone()));
    }

    fn show_frame(&self, _frame: &RgbImage) {
        self.frames.fetch_add(1, Ordering::SeqCst);
    }
}

/// A controller wired to fakes, with handles to inspect them.
pub struct Harness {
    pub controller: Controller,
    pub provider: Arc<FakeProvider>,
    pub camera: Arc<CameraLog>,
    pub presenter: Arc<RecordingPresenter>,
}

impl Harness {
    pub fn new(backend: FakeBackend, classifier: FakeClassifier) -> Self {
        let provider = Arc::new(FakeProvider::new(classifier));
        let presenter = Arc::new(RecordingPresenter::default());
        let camera = backend.log.clone();
        let location = ModelLocation::new("./my_model/", "model.onnx", "metadata.json");

        let controller = Controller::new(
            ModelGate::new(provider.clone(), location),
            Box::new(backend),
            CaptureConfig {
                size: 8,
                mirror: true,
            },
            presenter.clone(),
        );

        Self {
            controller,
            provider,
            camera,
            presenter,
        }
    }

    pub fn with_cameras(count: usize) -> Self {
        Self::new(FakeBackend::with_cameras(count), FakeClassifier::new())
    }
}

/// Poll `condition` until it holds, failing after a few seconds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// A small PNG as it would arrive from the file picker.
pub fn png_upload() -> Vec<u8> {
    let mut bytes = std::io::Cursor::new(Vec::new());
    RgbImage::from_pixel(16, 12, Rgb([200, 120, 40]))
        .write_to(&mut bytes, image::ImageOutputFormat::Png)
        .expect("encode png");
    bytes.into_inner()
}
