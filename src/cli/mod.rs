pub mod doctor;
pub mod index;
pub mod search;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use tokio::io::AsyncWriteExt;

use imsearch::config::ImsearchConfig;

/// Download the ONNX image model to `embedding.model_path`.
pub async fn model_download(config: &ImsearchConfig, url: Option<&str>) -> Result<()> {
    let url = url.unwrap_or(&config.embedding.model_url);
    anyhow::ensure!(
        !url.is_empty(),
        "no model URL: set embedding.model_url in the config or pass --url"
    );

    let model_path = config.resolved_model_path();
    if let Some(parent) = model_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create model dir: {}", parent.display()))?;
    }

    if model_path.exists() {
        println!("Model already exists at {}", model_path.display());
        return Ok(());
    }

    println!("Downloading {} model...", config.embedding.model);
    download_file(url, &model_path).await?;
    println!("Model saved to {}", model_path.display());
    println!("Run `imsearch doctor` to verify it loads.");
    Ok(())
}

/// Download a file from a URL with progress bar. Uses atomic write (tmp + rename).
async fn download_file(url: &str, dest: &Path) -> Result<()> {
    let response = reqwest::get(url)
        .await
        .with_context(|| format!("HTTP request failed for {url}"))?;

    anyhow::ensure!(
        response.status().is_success(),
        "download failed with HTTP {}",
        response.status()
    );

    let pb = match response.content_length() {
        Some(size) => {
            let pb = ProgressBar::new(size);
            pb.set_style(bar_style("  {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})"));
            pb
        }
        None => ProgressBar::new_spinner(),
    };

    let tmp_path = dest.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp_path)
        .await
        .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;

    let bytes = response.bytes().await.context("error reading response")?;
    pb.inc(bytes.len() as u64);
    file.write_all(&bytes)
        .await
        .context("error writing to file")?;

    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, dest)
        .await
        .context("failed to rename temp file")?;

    pb.finish_and_clear();
    Ok(())
}

/// Progress bar style shared by the long-running commands.
pub(crate) fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-")
}
