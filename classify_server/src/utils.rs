//! Utility functions
//!
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use image::RgbImage;
use reqwest::Client;

/// Download a file from a URL to a given filepath.
pub async fn download_file(
    client: &Client,
    url: &str,
    filepath: impl AsRef<std::path::Path>,
) -> Result<()> {
    let resp = client.get(url).send().await?.error_for_status()?;
    let content = resp.bytes().await?;
    tokio::fs::write(filepath, &content).await?;

    Ok(())
}

/// Directory for downloaded model assets.
pub fn cache_dir() -> Result<PathBuf> {
    dirs::cache_dir()
        .map(|dir| dir.join("classify_server").join("models"))
        .ok_or_else(|| anyhow!("unable to determine cache directory"))
}

/// Largest centered square of the image.
pub fn center_square(image: &RgbImage) -> RgbImage {
    let (width, height) = image.dimensions();
    let side = width.min(height);
    image::imageops::crop_imm(image, (width - side) / 2, (height - side) / 2, side, side).to_image()
}
