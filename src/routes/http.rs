//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented and logs parameters and basic result info.

use std::sync::Arc;
use axum::{extract::{Path, State}, Json, response::IntoResponse};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::domain::{DuplicateCheckResult, GenerationResult, TaskFingerprint};
use crate::error::ApiError;
use crate::protocol::*;
use crate::state::AppState;
use crate::logic::*;

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(HealthOut { ok: true, provider: state.completion.name().to_string() })
}

#[instrument(level = "info", skip(state))]
pub async fn http_list_modules(State(state): State<Arc<AppState>>) -> Json<Vec<ModuleSummary>> {
  let modules = state.all_modules().await;
  Json(modules.iter().map(to_summary).collect())
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_module(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<Json<ModuleOut>, ApiError> {
  let module = state.module(&id).await.ok_or(ApiError::ModuleNotFound(id))?;
  Ok(Json(to_out(module)))
}

#[instrument(level = "info", skip(state, body), fields(topics = body.topics.len(), tasks = body.tasks.len()))]
pub async fn http_put_module(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(body): Json<ModuleIn>,
) -> Result<Json<ModuleOut>, ApiError> {
  if id.trim().is_empty() {
    return Err(ApiError::BadRequest("module id must not be empty".into()));
  }
  let module = state.upsert_module(&id, body.name, body.topics, body.tasks).await;
  Ok(Json(to_out(module)))
}

#[instrument(level = "info", skip(state, body), fields(count = body.count, seed = ?body.seed, debug = body.debug))]
pub async fn http_post_generate(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(body): Json<GenerateIn>,
) -> Result<Json<GenerationResult>, ApiError> {
  // HTTP callers cannot cancel; the run completes or fails per item.
  let result = generate_for_module(&state, &id, &body, &CancellationToken::new(), None).await?;
  info!(target: "generation", module_id = %id, accepted = result.tasks.len(), failed = result.failed_items, "HTTP generate served");
  Ok(Json(result))
}

#[instrument(level = "info", skip(state, body), fields(task_id = %body.task_id))]
pub async fn http_post_variant(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(body): Json<VariantIn>,
) -> Result<Json<GenerationResult>, ApiError> {
  Ok(Json(generate_variant(&state, &id, &body).await?))
}

#[instrument(level = "info", skip(state, body), fields(question_len = body.question.len()))]
pub async fn http_post_duplicates(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(body): Json<CandidateIn>,
) -> Result<Json<DuplicateCheckResult>, ApiError> {
  Ok(Json(check_duplicate(&state, &id, body).await?))
}

#[instrument(level = "info", skip(state, body), fields(question_len = body.question.len()))]
pub async fn http_post_fingerprint(
  State(state): State<Arc<AppState>>,
  Json(body): Json<FingerprintIn>,
) -> Json<TaskFingerprint> {
  Json(fingerprint_text(&state, &body))
}

#[instrument(level = "info", skip(body), fields(a_len = body.a.len(), b_len = body.b.len()))]
pub async fn http_post_similarity(Json(body): Json<SimilarityIn>) -> Json<SimilarityOut> {
  Json(similarity_scores(&body.a, &body.b))
}
