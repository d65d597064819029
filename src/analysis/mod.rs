// Trust analysis: image in, Verdict out.
//
// The pipeline is assembled from capability traits (fetcher, embedder,
// classifiers, face detector, vector index, reasoner) so every stage can be
// swapped for a stub in tests or a degraded stand-in when a model is missing.

pub mod cache;
pub mod download;
pub mod embedding;
pub mod ensemble;
pub mod error;
pub mod fetch;
pub mod metadata;
pub mod onnx;
pub mod pipeline;
pub mod preprocess;
pub mod qdrant;
pub mod reasoning;
pub mod request;
pub mod traits;
pub mod verdict;

pub use cache::{InMemoryIndex, IndexError, SearchHit, VectorIndex, VerdictCache};
pub use error::AnalysisError;
pub use pipeline::{AnalysisSettings, PipelineServices, TrustPipeline};
pub use reasoning::{DisabledReasoner, OpenAiReasoner, Reasoner};
pub use request::{AnalysisRequest, AnalyzeResponse};
pub use traits::{FaceDetector, ImageClassifier, ImageEmbedder, ImageFetcher, UnavailableModel};
pub use verdict::{Provenance, RiskLevel, Signal, SubScores, Verdict};
