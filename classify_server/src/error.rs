//! Failures surfaced to the page.
//!
use std::fmt;

/// Every failure ends in the same error screen with a descriptive message, and
/// the user retries through the control that triggered it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClassifyError {
    /// Model assets could not be fetched or parsed.
    ModelLoad(String),
    /// Device enumeration found no video inputs.
    NoCameraFound,
    /// Listing or opening devices was denied.
    Permission(String),
    /// A camera stream could not be opened or read.
    CameraAccess(String),
    /// An uploaded file is not a readable image.
    FileDecode(String),
    /// The model failed on an input.
    Inference(String),
}

impl ClassifyError {
    /// Short, user-facing text for the status screen.
    pub fn user_message(&self) -> &'static str {
        match self {
            ClassifyError::ModelLoad(_) => "Could not load the model. Check the model folder.",
            ClassifyError::NoCameraFound => "No cameras found.",
            ClassifyError::Permission(_) | ClassifyError::CameraAccess(_) => {
                "Could not start the camera. Check the permissions."
            }
            ClassifyError::FileDecode(_) => "Could not read the image.",
            ClassifyError::Inference(_) => "Prediction failed.",
        }
    }
}

impl fmt::Display for ClassifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassifyError::ModelLoad(msg) => write!(f, "failed to load model: {msg}"),
            ClassifyError::NoCameraFound => write!(f, "no cameras found"),
            ClassifyError::Permission(msg) => write!(f, "permission denied: {msg}"),
            ClassifyError::CameraAccess(msg) => write!(f, "camera access failed: {msg}"),
            ClassifyError::FileDecode(msg) => write!(f, "failed to decode image: {msg}"),
            ClassifyError::Inference(msg) => write!(f, "inference failed: {msg}"),
        }
    }
}

impl std::error::Error for ClassifyError {}

impl From<image::ImageError> for ClassifyError {
    fn from(err: image::ImageError) -> Self {
        ClassifyError::FileDecode(err.to_string())
    }
}
