// Model management for the local ONNX detectors.
//
// Files live in a platform data directory (~/.local/share/sentinel/models/ on
// Linux) so they persist across runs. The CLIP image tower and the UltraFace
// detector are published as ONNX and downloaded directly. The two fake-image
// classifiers are Hugging Face checkpoints that must be exported to ONNX
// once (single `pixel_values` input, `logits` output); `download-model`
// prints the export command for any that are missing.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use super::embedding::CLIP_MODEL_FILE;
use super::onnx::{ClassifierSpec, FACE_MODEL_FILE};

/// Where a model file comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSource {
    /// Fetched as-is over HTTPS
    Download { url: &'static str, approx_mb: u32 },
    /// Exported locally from a Hugging Face image-classification checkpoint
    Export { hf_repo: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelFile {
    pub label: &'static str,
    pub file: &'static str,
    pub source: ModelSource,
}

/// Every model the pipeline can use.
pub static MODEL_FILES: [ModelFile; 4] = [
    ModelFile {
        label: "CLIP image encoder (cache embeddings)",
        file: CLIP_MODEL_FILE,
        source: ModelSource::Download {
            url: "https://huggingface.co/Xenova/clip-vit-base-patch32/resolve/main/onnx/vision_model.onnx",
            approx_mb: 352,
        },
    },
    ModelFile {
        label: "UltraFace face detector",
        file: FACE_MODEL_FILE,
        source: ModelSource::Download {
            url: "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/ultraface/models/version-RFB-320.onnx",
            approx_mb: 2,
        },
    },
    ModelFile {
        label: "Diffusion/GAN image detector",
        file: ClassifierSpec::DIFFUSION.file,
        source: ModelSource::Export {
            hf_repo: "umm-maybe/AI-image-detector",
        },
    },
    ModelFile {
        label: "Deepfake face detector",
        file: ClassifierSpec::GAN_FACE.file,
        source: ModelSource::Export {
            hf_repo: "dima806/deepfake_vs_real_image_detection",
        },
    },
];

/// Returns the default directory for storing model files.
pub fn default_model_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sentinel")
        .join("models")
}

/// Files from `MODEL_FILES` that are not yet in `dir`.
pub fn missing_models(dir: &Path) -> Vec<&'static ModelFile> {
    MODEL_FILES
        .iter()
        .filter(|m| !dir.join(m.file).exists())
        .collect()
}

/// Download every directly downloadable model and print export instructions
/// for the rest. Skips files that already exist.
pub async fn download_models(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create model directory: {}", dir.display()))?;

    for model in &MODEL_FILES {
        println!("\n{}:", model.label);
        let dest = dir.join(model.file);

        if dest.exists() {
            info!(file = model.file, "Model already exists, skipping");
            println!("  {} (already exists)", model.file);
            continue;
        }

        match model.source {
            ModelSource::Download { url, approx_mb } => {
                println!("  Downloading {} (~{} MB)...", model.file, approx_mb);
                download_file(url, &dest).await?;
            }
            ModelSource::Export { hf_repo } => {
                println!("  {} must be exported from {hf_repo}:", model.file);
                println!("    {}", export_command(hf_repo, &dest));
            }
        }
    }

    Ok(())
}

/// Shell command that exports a Hugging Face classifier to ONNX at `dest`.
pub fn export_command(hf_repo: &str, dest: &Path) -> String {
    format!(
        "optimum-cli export onnx --model {hf_repo} --task image-classification {tmp} && mv {tmp}/model.onnx {dest}",
        tmp = "/tmp/sentinel-export",
        dest = dest.display()
    )
}

/// Stream a file to disk behind a progress bar. Writes to a `.part` sibling
/// first so an interrupted download isn't mistaken for a complete model.
async fn download_file(url: &str, dest: &Path) -> Result<()> {
    let client = reqwest::Client::new();
    let mut response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to download {}", url))?;

    if !response.status().is_success() {
        anyhow::bail!("Download failed with status {}: {}", response.status(), url);
    }

    let pb = match response.content_length() {
        Some(size) => {
            let pb = ProgressBar::new(size);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("    [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                    .context("Invalid progress template")?
                    .progress_chars("=> "),
            );
            pb
        }
        None => {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("    {spinner} {bytes}")
                    .context("Invalid progress template")?,
            );
            pb
        }
    };

    let partial = dest.with_extension("part");
    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .context("Failed to read response body")?
    {
        body.extend_from_slice(&chunk);
        pb.set_position(body.len() as u64);
    }

    std::fs::write(&partial, &body)
        .with_context(|| format!("Failed to write {}", partial.display()))?;
    std::fs::rename(&partial, dest)
        .with_context(|| format!("Failed to move model into {}", dest.display()))?;

    pb.finish_and_clear();
    info!("Downloaded {} to {}", url, dest.display());
    Ok(())
}
