//! Image classification models.
//!
use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use common::protocol::{ClassPrediction, PredictionResult};
use futures::future::BoxFuture;
use image::RgbImage;
use serde::Deserialize;
use tract_onnx::prelude::*;

use crate::{error::ClassifyError, hashed, utils};

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// A loaded classifier, shared between the camera loop and uploads.
pub type ModelHandle = Arc<dyn Classifier>;

pub trait Classifier: Send + Sync {
    /// Number of classes the model distinguishes.
    fn total_classes(&self) -> usize;

    /// Probability of every class for the image, in model output order.
    fn predict(&self, image: &RgbImage) -> Result<PredictionResult, ClassifyError>;
}

pub trait ModelProvider: Send + Sync {
    fn load<'a>(
        &'a self,
        location: &'a ModelLocation,
    ) -> BoxFuture<'a, Result<ModelHandle, ClassifyError>>;
}

/// Where the model and its metadata live, either a local directory or a URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelLocation {
    base: String,
    model_file: String,
    metadata_file: String,
}

impl ModelLocation {
    pub fn new(base: &str, model_file: &str, metadata_file: &str) -> Self {
        Self {
            base: base.to_owned(),
            model_file: model_file.to_owned(),
            metadata_file: metadata_file.to_owned(),
        }
    }

    pub fn is_remote(&self) -> bool {
        self.base.starts_with("http://") || self.base.starts_with("https://")
    }

    pub fn model_asset(&self) -> String {
        self.join(&self.model_file)
    }

    pub fn metadata_asset(&self) -> String {
        self.join(&self.metadata_file)
    }

    fn join(&self, name: &str) -> String {
        format!("{}/{}", self.base.trim_end_matches('/'), name)
    }
}

impl fmt::Display for ModelLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base)
    }
}

/// Memory layout of the model input tensor.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    #[default]
    Nhwc,
    Nchw,
}

/// Contents of the metadata file next to the model.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetadata {
    pub labels: Vec<String>,
    #[serde(default = "default_image_size")]
    pub image_size: u32,
    #[serde(default)]
    pub layout: TensorLayout,
    #[serde(default)]
    pub mean: Option<[f32; 3]>,
    #[serde(default)]
    pub std: Option<[f32; 3]>,
}

fn default_image_size() -> u32 {
    224
}

impl ModelMetadata {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ClassifyError> {
        let metadata: ModelMetadata = serde_json::from_slice(bytes)
            .map_err(|e| ClassifyError::ModelLoad(format!("invalid metadata: {e}")))?;
        if metadata.labels.is_empty() {
            return Err(ClassifyError::ModelLoad("metadata lists no labels".into()));
        }
        if metadata.image_size == 0 {
            return Err(ClassifyError::ModelLoad("metadata image size is zero".into()));
        }

        Ok(metadata)
    }

    /// Scale a channel value. Without mean/std the range is `[-1, 1]`.
    fn normalize(&self, value: u8, channel: usize) -> f32 {
        match (self.mean, self.std) {
            (Some(mean), Some(std)) => (value as f32 / 255.0 - mean[channel]) / std[channel],
            _ => value as f32 / 127.5 - 1.0,
        }
    }

    fn input_shape(&self) -> TVec<usize> {
        let size = self.image_size as usize;
        match self.layout {
            TensorLayout::Nhwc => tvec!(1, size, size, 3),
            TensorLayout::Nchw => tvec!(1, 3, size, size),
        }
    }
}

/// ONNX classifier run with tract.
pub struct TractClassifier {
    model: NnModel,
    metadata: ModelMetadata,
}

impl TractClassifier {
    pub fn from_files(model_path: &Path, metadata_path: &Path) -> Result<Self, ClassifyError> {
        let metadata = std::fs::read(metadata_path).map_err(|e| {
            ClassifyError::ModelLoad(format!("{}: {e}", metadata_path.display()))
        })?;
        let metadata = ModelMetadata::from_slice(&metadata)?;

        let input_fact = InferenceFact::dt_shape(f32::datum_type(), metadata.input_shape());
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .and_then(|model| model.with_input_fact(0, input_fact))
            .and_then(|model| model.into_optimized())
            .and_then(|model| model.into_runnable())
            .map_err(|e| ClassifyError::ModelLoad(format!("{}: {e:#}", model_path.display())))?;

        Ok(Self { model, metadata })
    }
}

impl Classifier for TractClassifier {
    fn total_classes(&self) -> usize {
        self.metadata.labels.len()
    }

    fn predict(&self, image: &RgbImage) -> Result<PredictionResult, ClassifyError> {
        let input = preproc(image, &self.metadata);
        let raw_nn_out = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| ClassifyError::Inference(format!("{e:#}")))?;

        let scores: Vec<f32> = raw_nn_out
            .first()
            .ok_or_else(|| ClassifyError::Inference("model produced no outputs".into()))?
            .to_array_view::<f32>()
            .map_err(|e| ClassifyError::Inference(format!("{e:#}")))?
            .iter()
            .copied()
            .collect();

        let labels = &self.metadata.labels;
        if scores.len() != labels.len() {
            return Err(ClassifyError::Inference(format!(
                "model returned {} scores for {} labels",
                scores.len(),
                labels.len()
            )));
        }

        Ok(labels
            .iter()
            .zip(to_distribution(scores))
            .map(|(label, probability)| ClassPrediction::new(label.clone(), probability))
            .collect())
    }
}

/// Crop the image to a centered square, resize it to the model input and
/// normalize it into a tensor of the model's layout.
pub fn preproc(image: &RgbImage, metadata: &ModelMetadata) -> Tensor {
    let size = metadata.image_size;
    let resized: RgbImage = image::imageops::resize(
        &utils::center_square(image),
        size,
        size,
        image::imageops::FilterType::Triangle,
    );

    let size = size as usize;
    match metadata.layout {
        TensorLayout::Nhwc => {
            tract_ndarray::Array4::from_shape_fn((1, size, size, 3), |(_, y, x, c)| {
                metadata.normalize(resized[(x as _, y as _)][c], c)
            })
            .into()
        }
        TensorLayout::Nchw => {
            tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
                metadata.normalize(resized[(x as _, y as _)][c], c)
            })
            .into()
        }
    }
}

/// Turn raw scores into probabilities.
///
/// Models exported with a final softmax already return a distribution, which
/// is passed through untouched. Anything else is treated as logits.
pub fn to_distribution(scores: Vec<f32>) -> Vec<f32> {
    let sum: f32 = scores.iter().sum();
    let is_distribution =
        scores.iter().all(|p| (0.0..=1.0).contains(p)) && (sum - 1.0).abs() < 1.0e-3;
    if scores.is_empty() || is_distribution {
        return scores;
    }

    let max_score = scores.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let exp: Vec<f32> = scores.iter().map(|s| (s - max_score).exp()).collect();
    let exp_sum: f32 = exp.iter().sum();

    exp.into_iter().map(|e| e / exp_sum).collect()
}

/// Loads ONNX classifiers from a local directory or downloads them first.
pub struct TractModelProvider {
    client: reqwest::Client,
    cache_dir: Option<PathBuf>,
}

impl TractModelProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            cache_dir: None,
        }
    }

    /// Store downloaded assets below `cache_dir` instead of the user cache.
    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(cache_dir.into());
        self
    }

    /// Local paths of the model and metadata files.
    async fn fetch_assets(&self, location: &ModelLocation) -> Result<(PathBuf, PathBuf), ClassifyError> {
        if !location.is_remote() {
            return Ok((
                PathBuf::from(location.model_asset()),
                PathBuf::from(location.metadata_asset()),
            ));
        }

        let cache_dir = match &self.cache_dir {
            Some(dir) => dir.clone(),
            None => utils::cache_dir().map_err(|e| ClassifyError::ModelLoad(e.to_string()))?,
        }
        .join(format!("{:016x}", hashed(&location.to_string())));
        tokio::fs::create_dir_all(&cache_dir)
            .await
            .map_err(|e| ClassifyError::ModelLoad(format!("{}: {e}", cache_dir.display())))?;

        let model_path = cache_dir.join("model.onnx");
        let metadata_path = cache_dir.join("metadata.json");
        for (url, path) in [
            (location.model_asset(), &model_path),
            (location.metadata_asset(), &metadata_path),
        ] {
            log::info!("Downloading {url}");
            utils::download_file(&self.client, &url, path)
                .await
                .map_err(|e| ClassifyError::ModelLoad(format!("{url}: {e:#}")))?;
        }

        Ok((model_path, metadata_path))
    }
}

impl Default for TractModelProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelProvider for TractModelProvider {
    fn load<'a>(
        &'a self,
        location: &'a ModelLocation,
    ) -> BoxFuture<'a, Result<ModelHandle, ClassifyError>> {
        Box::pin(async move {
            log::info!("Loading model from {location}");
            let (model_path, metadata_path) = self.fetch_assets(location).await?;

            let classifier = tokio::task::spawn_blocking(move || {
                TractClassifier::from_files(&model_path, &metadata_path)
            })
            .await
            .map_err(|e| ClassifyError::ModelLoad(e.to_string()))??;

            log::info!("Model loaded with {} classes", classifier.total_classes());
            Ok(Arc::new(classifier) as ModelHandle)
        })
    }
}
