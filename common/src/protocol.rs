//! Messages exchanged between the classification server and the page.
//!
use serde::{Deserialize, Serialize};

/// Screen the page should show.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UiState {
    #[default]
    Idle,
    Loading,
    Active,
    Error,
}

/// Probability of a single class.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ClassPrediction {
    pub class_name: String,
    pub probability: f32,
}

impl ClassPrediction {
    pub fn new(class_name: impl Into<String>, probability: f32) -> Self {
        Self {
            class_name: class_name.into(),
            probability,
        }
    }
}

/// One entry per model class, in model output order.
pub type PredictionResult = Vec<ClassPrediction>;

/// Display row of a single class.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RowView {
    pub class_name: String,
    pub probability: f32,
    /// Width of the progress bar fill, `0.0..=100.0`.
    pub fill_percent: f32,
    /// Percentage text, e.g. `"70.0%"`.
    pub label: String,
    pub is_top: bool,
}

/// Everything the page needs to draw a prediction result.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct ViewModel {
    pub rows: Vec<RowView>,
    pub top: Option<usize>,
}

impl ViewModel {
    pub fn top_row(&self) -> Option<&RowView> {
        self.top.and_then(|idx| self.rows.get(idx))
    }
}

/// Updates pushed to the page.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PageEvent {
    Status { state: UiState, message: String },
    Controls { enabled: bool },
    SwitchCamera { visible: bool },
    Rows { count: usize },
    Predictions(ViewModel),
    /// Whole page state, sent when a page connects or missed events.
    Snapshot(PageSnapshot),
}

/// Current state of the page, for clients joining late.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PageSnapshot {
    pub state: UiState,
    pub message: String,
    pub controls_enabled: bool,
    pub switch_visible: bool,
    pub row_count: usize,
    pub latest: Option<ViewModel>,
}

impl Default for PageSnapshot {
    fn default() -> Self {
        Self {
            state: UiState::Idle,
            message: String::new(),
            controls_enabled: true,
            switch_visible: false,
            row_count: 0,
            latest: None,
        }
    }
}

impl PageSnapshot {
    /// Fold an event into the snapshot.
    pub fn apply(&mut self, event: &PageEvent) {
        match event {
            PageEvent::Status { state, message } => {
                self.state = *state;
                self.message = message.clone();
            }
            PageEvent::Controls { enabled } => self.controls_enabled = *enabled,
            PageEvent::SwitchCamera { visible } => self.switch_visible = *visible,
            PageEvent::Rows { count } => {
                self.row_count = *count;
                self.latest = None;
            }
            PageEvent::Predictions(view) => self.latest = Some(view.clone()),
            PageEvent::Snapshot(snapshot) => *self = snapshot.clone(),
        }
    }
}
