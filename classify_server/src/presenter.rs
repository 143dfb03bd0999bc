//! Presentation of prediction results.
//!
use common::protocol::{ClassPrediction, RowView, UiState, ViewModel};
use image::RgbImage;

/// Receiver of everything the page displays.
///
/// Shared between the controller and the running prediction loop, so all
/// methods take `&self`.
pub trait Presenter: Send + Sync {
    /// Show the status screen (or hide it, for `UiState::Active`).
    fn show_status(&self, state: UiState, message: &str);

    /// Enable or disable the start camera and upload controls.
    fn set_controls_enabled(&self, enabled: bool);

    fn set_switch_visible(&self, visible: bool);

    /// Allocate one row per class. Called once per camera start or upload.
    fn render_rows(&self, class_count: usize);

    fn update_rows(&self, view: &ViewModel);

    /// The image the latest prediction ran on.
    fn show_frame(&self, _frame: &RgbImage) {}
}

/// Index of the most probable class. Ties go to the first occurrence.
pub fn top_index(result: &[ClassPrediction]) -> Option<usize> {
    result
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (idx, pred)| match best {
            Some((_, probability)) if probability >= pred.probability => best,
            _ => Some((idx, pred.probability)),
        })
        .map(|(idx, _)| idx)
}

/// Build the rows for a prediction result.
pub fn render(result: &[ClassPrediction]) -> ViewModel {
    let top = top_index(result);
    let rows = result
        .iter()
        .enumerate()
        .map(|(idx, pred)| {
            let percent = pred.probability.clamp(0.0, 1.0) * 100.0;
            RowView {
                class_name: pred.class_name.clone(),
                probability: pred.probability,
                fill_percent: percent,
                label: format!("{percent:.1}%"),
                is_top: Some(idx) == top,
            }
        })
        .collect();

    ViewModel { rows, top }
}
