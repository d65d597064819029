// POST /analyze (and its /live-feed alias): run one analysis.
//
// Returns 200 with an AnalyzeResponse for every outcome that produced a
// verdict, including "no media". Returns 502 when the image couldn't be
// fetched, since that is the only failure without a verdict.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::warn;

use crate::analysis::{AnalysisError, AnalysisRequest, AnalyzeResponse};
use crate::web::{api_error, AppState};

pub async fn analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalysisRequest>,
) -> Response {
    match state.pipeline.analyze(&request).await {
        Ok(verdict) => Json(AnalyzeResponse::new(verdict, request)).into_response(),
        Err(e @ AnalysisError::Fetch { .. }) => {
            warn!(error = %e, "Analysis request failed");
            api_error(StatusCode::BAD_GATEWAY, &e.to_string())
        }
    }
}
