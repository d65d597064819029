use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::analysis::cache::{DEFAULT_COLLECTION, DEFAULT_SIMILARITY_THRESHOLD};
use crate::analysis::ensemble::EnsembleThresholds;
use crate::analysis::fetch::DEFAULT_FETCH_TIMEOUT;
use crate::analysis::pipeline::DEFAULT_INFERENCE_WORKERS;
use crate::analysis::reasoning::{
    DEFAULT_REASONER_BASE_URL, DEFAULT_REASONER_MODEL, DEFAULT_REASONER_TIMEOUT,
};
use crate::analysis::AnalysisSettings;
use crate::poller::{PollerSettings, DEFAULT_MENTION_BATCH, DEFAULT_POLL_INTERVAL};

/// Where the mention cursor is persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum CursorBackend {
    /// One-line text file (default)
    File,
    /// `scan_state` table in a SQLite database
    Sqlite,
}

/// Central configuration loaded from environment variables.
///
/// All secrets come from env vars (never hardcoded). The .env file
/// is loaded automatically at startup via dotenvy.
pub struct Config {
    /// OAuth 2.0 user-context bearer token for the bot account
    pub x_access_token: String,
    pub x_api_url: String,
    pub cursor_backend: CursorBackend,
    pub cursor_file: PathBuf,
    pub db_path: String,
    /// Directory containing the ONNX model files
    pub model_dir: PathBuf,
    /// Qdrant endpoint for the verdict cache. Unset means in-process cache.
    pub qdrant_url: Option<String>,
    pub collection: String,
    /// Key for the OpenAI-compatible reasoner. Unset means local summaries only.
    pub reasoner_api_key: Option<String>,
    pub reasoner_base_url: String,
    pub reasoner_model: String,
    pub poll_interval: Duration,
    pub mention_batch: u32,
    pub similarity_threshold: f64,
    pub thresholds: EnsembleThresholds,
    pub inference_workers: usize,
    pub fetch_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Everything has a default except the X token, which is only
    /// required by `run` (see `require_x`).
    pub fn load() -> Result<Self> {
        let cursor_backend = match env::var("SENTINEL_CURSOR_BACKEND").as_deref() {
            Ok("sqlite") => CursorBackend::Sqlite,
            Ok("file") | Err(_) => CursorBackend::File,
            Ok(other) => anyhow::bail!(
                "SENTINEL_CURSOR_BACKEND must be \"file\" or \"sqlite\", got \"{other}\""
            ),
        };

        let model_dir = env::var("SENTINEL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| crate::analysis::download::default_model_dir());

        let defaults = EnsembleThresholds::default();
        let thresholds = EnsembleThresholds {
            diffusion: parse_var("SENTINEL_DIFFUSION_THRESHOLD", defaults.diffusion)?,
            gan: parse_var("SENTINEL_GAN_THRESHOLD", defaults.gan)?,
            mean: parse_var("SENTINEL_MEAN_THRESHOLD", defaults.mean)?,
        };

        let similarity_threshold =
            parse_var("SENTINEL_SIMILARITY_THRESHOLD", DEFAULT_SIMILARITY_THRESHOLD)?;
        if !(0.0..=1.0).contains(&similarity_threshold) {
            anyhow::bail!(
                "SENTINEL_SIMILARITY_THRESHOLD must be between 0 and 1, got {similarity_threshold}"
            );
        }

        let inference_workers =
            parse_var("SENTINEL_INFERENCE_WORKERS", DEFAULT_INFERENCE_WORKERS)?.max(1);
        let mention_batch = parse_var("SENTINEL_MENTION_BATCH", DEFAULT_MENTION_BATCH)?.max(1);
        let poll_secs = parse_var("SENTINEL_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL.as_secs())?;
        let fetch_secs = parse_var("SENTINEL_FETCH_TIMEOUT_SECS", DEFAULT_FETCH_TIMEOUT.as_secs())?;

        Ok(Self {
            x_access_token: env::var("X_USER_ACCESS_TOKEN").unwrap_or_default(),
            x_api_url: env::var("X_API_URL")
                .unwrap_or_else(|_| crate::platform::client::DEFAULT_X_API_URL.to_string()),
            cursor_backend,
            cursor_file: env::var("SENTINEL_CURSOR_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./sentinel_cursor.txt")),
            db_path: env::var("SENTINEL_DB_PATH").unwrap_or_else(|_| "./sentinel.db".to_string()),
            model_dir,
            qdrant_url: non_empty_var("QDRANT_URL"),
            collection: env::var("SENTINEL_COLLECTION")
                .unwrap_or_else(|_| DEFAULT_COLLECTION.to_string()),
            reasoner_api_key: non_empty_var("REASONER_API_KEY"),
            reasoner_base_url: env::var("REASONER_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_REASONER_BASE_URL.to_string()),
            reasoner_model: env::var("REASONER_MODEL")
                .unwrap_or_else(|_| DEFAULT_REASONER_MODEL.to_string()),
            poll_interval: Duration::from_secs(poll_secs.max(1)),
            mention_batch,
            similarity_threshold,
            thresholds,
            inference_workers,
            fetch_timeout: Duration::from_secs(fetch_secs.max(1)),
        })
    }

    /// Check that the X access token is configured.
    /// Call this before anything that talks to the X API.
    pub fn require_x(&self) -> Result<()> {
        if self.x_access_token.is_empty() {
            anyhow::bail!(
                "X_USER_ACCESS_TOKEN not set. Add it to your .env file.\n\
                 See .env.example for the required variables."
            );
        }
        Ok(())
    }

    /// Check that the SQLite cursor backend was compiled in when selected.
    pub fn require_cursor_backend(&self) -> Result<()> {
        if self.cursor_backend == CursorBackend::Sqlite && !cfg!(feature = "sqlite") {
            anyhow::bail!(
                "SENTINEL_CURSOR_BACKEND=sqlite but this build has no SQLite support.\n\
                 Rebuild with `--features sqlite` or use SENTINEL_CURSOR_BACKEND=file."
            );
        }
        Ok(())
    }

    pub fn analysis_settings(&self) -> AnalysisSettings {
        AnalysisSettings {
            similarity_threshold: self.similarity_threshold,
            thresholds: self.thresholds,
            inference_workers: self.inference_workers,
            reasoner_timeout: DEFAULT_REASONER_TIMEOUT,
        }
    }

    pub fn poller_settings(&self) -> PollerSettings {
        PollerSettings {
            poll_interval: self.poll_interval,
            mention_batch: self.mention_batch,
        }
    }

    /// Human-readable cursor location for `status`.
    pub fn cursor_location(&self) -> String {
        match self.cursor_backend {
            CursorBackend::File => self.cursor_file.display().to_string(),
            CursorBackend::Sqlite => format!("{} (sqlite)", self.db_path),
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse an optional numeric env var, falling back to `default` when unset.
fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match non_empty_var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw}")),
        None => Ok(default),
    }
}
