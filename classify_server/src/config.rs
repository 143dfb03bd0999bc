//! Command line configuration.
//!
use std::path::PathBuf;

use clap::Parser;

use crate::{nn::ModelLocation, sensors::CaptureConfig};

#[derive(Parser, Debug, Clone)]
#[clap(author, version)]
pub struct Args {
    /// Address to serve the page and its endpoints on
    #[clap(long, default_value = "127.0.0.1:3000")]
    pub server_address: String,

    /// Directory or http(s) URL holding the model assets
    #[clap(long, env = "CLASSIFY_MODEL_URL", default_value = "./my_model/")]
    pub model_url: String,

    /// File name of the ONNX model below the model location
    #[clap(long, default_value = "model.onnx")]
    pub model_file: String,

    /// File name of the model metadata (labels, input size)
    #[clap(long, default_value = "metadata.json")]
    pub metadata_file: String,

    /// Side length of the square canvas frames are drawn into
    #[clap(long, default_value_t = 400, value_parser = clap::value_parser!(u32).range(1..))]
    pub capture_size: u32,

    /// Do not mirror camera frames
    #[clap(long)]
    pub no_mirror: bool,

    /// Directory to search for video devices
    #[clap(long, default_value = "/dev")]
    pub device_dir: PathBuf,
}

impl Args {
    pub fn model_location(&self) -> ModelLocation {
        ModelLocation::new(&self.model_url, &self.model_file, &self.metadata_file)
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            size: self.capture_size,
            mirror: !self.no_mirror,
        }
    }
}
