use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{info, warn};

use sentinel::analysis::embedding::ClipImageEmbedder;
use sentinel::analysis::fetch::HttpImageFetcher;
use sentinel::analysis::onnx::{ClassifierSpec, OnnxFaceDetector, OnnxImageClassifier};
use sentinel::analysis::qdrant::QdrantIndex;
use sentinel::analysis::{
    AnalysisRequest, AnalyzeResponse, DisabledReasoner, FaceDetector, ImageClassifier,
    ImageEmbedder, InMemoryIndex, OpenAiReasoner, PipelineServices, Reasoner, TrustPipeline,
    UnavailableModel, VectorIndex,
};
use sentinel::config::{Config, CursorBackend};
use sentinel::cursor::{CursorStore, FileCursorStore};
use sentinel::platform::XApiClient;
use sentinel::poller::Poller;

/// Sentinel: media authenticity checks for social mentions.
///
/// Mention the bot under a post with an image and it replies with a risk
/// level, a trust score and a short explanation.
#[derive(Parser)]
#[command(name = "sentinel", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll for mentions and reply with verdicts
    Run {
        /// Also serve the analysis HTTP API
        #[arg(long)]
        serve: bool,

        /// Port for the HTTP API (default: 8080)
        #[arg(long, default_value = "8080")]
        port: u16,

        /// Address to bind the HTTP API to (default: 127.0.0.1)
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
    },

    /// Analyze a single image URL and print the verdict
    Analyze {
        /// Image URL
        url: String,

        /// Post text to give the reasoner as context
        #[arg(long)]
        text: Option<String>,

        /// Question to ask about the image
        #[arg(long)]
        question: Option<String>,

        /// Print the full JSON response
        #[arg(long)]
        json: bool,
    },

    /// Download the ONNX models into the model directory
    DownloadModel,

    /// Show system status (cursor, last poll, cache size, models)
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    // Set up structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sentinel=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { serve, port, bind } => {
            let config = Config::load()?;
            config.require_x()?;
            config.require_cursor_backend()?;

            let platform = Arc::new(XApiClient::new(&config.x_api_url, &config.x_access_token)?);
            let cursor_store = open_cursor_store(&config)?;
            let pipeline = build_pipeline(&config).await?;

            let poller = Poller::new(
                platform,
                cursor_store,
                Arc::clone(&pipeline),
                config.poller_settings(),
            );

            if serve {
                run_with_server(poller, Arc::clone(&pipeline), port, &bind).await?;
            } else {
                tokio::select! {
                    result = poller.run() => result?,
                    _ = tokio::signal::ctrl_c() => info!("Shutting down"),
                }
            }

            let drained = pipeline.drain_writes().await;
            if drained > 0 {
                info!(count = drained, "Flushed pending cache writes");
            }
        }

        Commands::Analyze {
            url,
            text,
            question,
            json,
        } => {
            let config = Config::load()?;
            let pipeline = build_pipeline(&config).await?;

            let mut request = AnalysisRequest::for_image(url);
            if let Some(text) = text {
                request = request.with_text(text);
            }
            if let Some(question) = question {
                request = request.with_question(question);
            }

            let verdict = pipeline.analyze(&request).await?;
            pipeline.drain_writes().await;

            if json {
                let response = AnalyzeResponse::new(verdict, request);
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                let reply = sentinel::reply::compose_reply(&verdict, &sentinel::reply::random_token());
                println!("{}", reply);
                println!(
                    "\n{}",
                    format!(
                        "confidence {:.2} · provenance {:?} · {}",
                        verdict.confidence,
                        verdict.provenance,
                        verdict.risk_level.recommendation()
                    )
                    .dimmed()
                );
            }
        }

        Commands::DownloadModel => {
            let config = Config::load()?;
            let model_dir = &config.model_dir;

            println!("Downloading ONNX models...");
            println!("  Destination: {}", model_dir.display());

            sentinel::analysis::download::download_models(model_dir).await?;

            let missing = sentinel::analysis::download::missing_models(model_dir);
            if missing.is_empty() {
                println!("\n{}", "All models present.".bold());
            } else {
                println!(
                    "\n{}",
                    format!(
                        "{} model(s) still need exporting (see commands above).",
                        missing.len()
                    )
                    .yellow()
                );
                println!("Missing models are skipped at runtime and reported as unknown.");
            }
        }

        Commands::Status => {
            let config = Config::load()?;
            config.require_cursor_backend()?;
            let cursor_store = open_cursor_store(&config)?;
            let index = open_index(&config);
            sentinel::status::show(
                &cursor_store,
                &config.cursor_location(),
                &index,
                &config.model_dir,
            )
            .await?;
        }
    }

    Ok(())
}

/// Run the poller and the HTTP API side by side. The API outlives a stopped
/// poller; Ctrl-C ends both.
#[cfg(feature = "web")]
async fn run_with_server(
    poller: Poller,
    pipeline: Arc<TrustPipeline>,
    port: u16,
    bind: &str,
) -> Result<()> {
    sentinel::web::serve_with_poller(
        poller.run(),
        sentinel::web::run_server(pipeline, port, bind),
        async {
            let _ = tokio::signal::ctrl_c().await;
        },
    )
    .await
}

#[cfg(not(feature = "web"))]
async fn run_with_server(
    _poller: Poller,
    _pipeline: Arc<TrustPipeline>,
    _port: u16,
    _bind: &str,
) -> Result<()> {
    anyhow::bail!(
        "--serve requires the 'web' feature.\n\
         Rebuild with: cargo build --features web"
    )
}

fn open_cursor_store(config: &Config) -> Result<Arc<dyn CursorStore>> {
    match config.cursor_backend {
        CursorBackend::File => {
            info!(path = %config.cursor_file.display(), "Using file cursor store");
            Ok(Arc::new(FileCursorStore::new(&config.cursor_file)))
        }
        CursorBackend::Sqlite => {
            #[cfg(feature = "sqlite")]
            {
                info!(path = %config.db_path, "Using SQLite cursor store");
                Ok(Arc::new(sentinel::cursor::SqliteCursorStore::open(&config.db_path)?))
            }
            #[cfg(not(feature = "sqlite"))]
            anyhow::bail!(
                "SENTINEL_CURSOR_BACKEND=sqlite but the 'sqlite' feature is not compiled in.\n\
                 Rebuild with: cargo build --features sqlite"
            );
        }
    }
}

/// Qdrant when configured and reachable, otherwise the in-process index.
fn open_index(config: &Config) -> Arc<dyn VectorIndex> {
    if let Some(url) = &config.qdrant_url {
        match QdrantIndex::connect(url, &config.collection) {
            Ok(index) => return Arc::new(index),
            Err(e) => warn!(error = %e, "Qdrant unavailable, using in-memory cache"),
        }
    }
    Arc::new(InMemoryIndex::new())
}

fn create_reasoner(config: &Config) -> Arc<dyn Reasoner> {
    match &config.reasoner_api_key {
        Some(key) => {
            info!(model = %config.reasoner_model, "Using external reasoner");
            Arc::new(OpenAiReasoner::new(
                key.clone(),
                config.reasoner_base_url.clone(),
                config.reasoner_model.clone(),
            ))
        }
        None => {
            info!("REASONER_API_KEY not set, summaries will be generated locally");
            Arc::new(DisabledReasoner)
        }
    }
}

/// Use a loaded ONNX model, or the always-failing stand-in when its files
/// are missing. The pipeline then reports that stage as unknown.
fn model_or_fallback<T: ?Sized>(label: &str, loaded: Result<Arc<T>>, fallback: Arc<T>) -> Arc<T> {
    match loaded {
        Ok(model) => {
            info!(model = label, "Loaded model");
            model
        }
        Err(e) => {
            warn!(model = label, error = %e, "Model unavailable, stage will report unknown");
            fallback
        }
    }
}

async fn build_pipeline(config: &Config) -> Result<Arc<TrustPipeline>> {
    let dir = config.model_dir.as_path();

    let embedder: Arc<dyn ImageEmbedder> = model_or_fallback(
        "clip",
        ClipImageEmbedder::load(dir).map(|m| Arc::new(m) as Arc<dyn ImageEmbedder>),
        Arc::new(UnavailableModel::new("clip")),
    );
    let diffusion: Arc<dyn ImageClassifier> = model_or_fallback(
        "diffusion",
        OnnxImageClassifier::load(dir, ClassifierSpec::DIFFUSION)
            .map(|m| Arc::new(m) as Arc<dyn ImageClassifier>),
        Arc::new(UnavailableModel::new("diffusion")),
    );
    let gan_face: Arc<dyn ImageClassifier> = model_or_fallback(
        "gan_face",
        OnnxImageClassifier::load(dir, ClassifierSpec::GAN_FACE)
            .map(|m| Arc::new(m) as Arc<dyn ImageClassifier>),
        Arc::new(UnavailableModel::new("gan_face")),
    );
    let faces: Arc<dyn FaceDetector> = model_or_fallback(
        "faces",
        OnnxFaceDetector::load(dir).map(|m| Arc::new(m) as Arc<dyn FaceDetector>),
        Arc::new(UnavailableModel::new("faces")),
    );

    let services = PipelineServices {
        fetcher: Arc::new(HttpImageFetcher::new(config.fetch_timeout)?),
        embedder,
        diffusion,
        gan_face,
        faces,
        index: open_index(config),
        reasoner: create_reasoner(config),
    };

    let pipeline = Arc::new(TrustPipeline::new(services, config.analysis_settings()));
    if !pipeline.prepare().await {
        warn!("Verdict cache unavailable, every image will be analyzed fresh");
    }
    Ok(pipeline)
}
