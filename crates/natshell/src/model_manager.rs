//! Model file download for `--download` and `model.path = "auto"`.

use crate::config::{models_dir, ModelConfig};
use anyhow::{bail, Context, Result};
use futures_util::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

/// Where the configured default model lives (or would live) on disk.
pub fn default_model_path(config: &ModelConfig) -> PathBuf {
    models_dir().join(&config.hf_file)
}

/// Ensure the default model file is present, downloading it if needed.
/// Returns the local path.
pub async fn ensure_model(config: &ModelConfig) -> Result<PathBuf> {
    let target = default_model_path(config);
    if target.exists() {
        return Ok(target);
    }
    download_model(config).await
}

/// Stream the default model into the models directory. The download lands
/// in a `.part` file first so an interrupted transfer never looks like a
/// complete model.
pub async fn download_model(config: &ModelConfig) -> Result<PathBuf> {
    let dir = models_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("cannot create model dir {}", dir.display()))?;
    let target = dir.join(&config.hf_file);
    let partial = dir.join(format!("{}.part", config.hf_file));

    let url = format!(
        "https://huggingface.co/{}/resolve/main/{}",
        config.hf_repo, config.hf_file
    );
    info!("downloading {url}");

    let client = reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(30))
        .build()?;
    let response = client.get(&url).send().await?;
    if !response.status().is_success() {
        bail!("download failed: HTTP {} from {url}", response.status());
    }

    let mut file = std::fs::File::create(&partial)
        .with_context(|| format!("cannot create {}", partial.display()))?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("download interrupted")?;
        file.write_all(&chunk)?;
        written += chunk.len() as u64;
    }
    file.flush()?;
    drop(file);

    std::fs::rename(&partial, &target)?;
    info!("model saved to {} ({written} bytes)", target.display());
    Ok(target)
}
