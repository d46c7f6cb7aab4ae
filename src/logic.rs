//! Core behaviors shared by both HTTP and WebSocket handlers.
//!
//! This includes:
//!   - Running generation and variant generation against a module snapshot,
//!     one run per module at a time
//!   - Checking a candidate against a module's persisted tasks
//!   - Stateless fingerprint and similarity scoring

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::dedup::{DuplicateDetector, PoolEntry};
use crate::domain::{DuplicateCheckResult, GenerationResult, Task, TaskFingerprint, TaskSource};
use crate::error::ApiError;
use crate::fingerprint::{fingerprint, fingerprint_task, FALLBACK_TOPIC};
use crate::generator::{GenerationEvent, Generator, RunInput};
use crate::protocol::{CandidateIn, FingerprintIn, GenerateIn, SimilarityOut, VariantIn};
use crate::similarity::{jaccard_similarity, ngram_similarity, soft_similarity, NGRAM_SIZE};
use crate::state::AppState;

fn generator(state: &AppState) -> Generator<'_> {
  let cfg = &state.config;
  Generator::new(state.completion.as_ref(), &cfg.prompts, &cfg.generation, &cfg.dedup, &cfg.planner, &state.normalizer)
}

/// Plan and generate `req.count` tasks for a module; accepted tasks are appended.
/// Concurrent requests for the same module run one after the other.
#[instrument(level = "info", skip(state, req, cancel, events), fields(%module_id, count = req.count, seed = ?req.seed))]
pub async fn generate_for_module(
  state: &AppState,
  module_id: &str,
  req: &GenerateIn,
  cancel: &CancellationToken,
  events: Option<&UnboundedSender<GenerationEvent>>,
) -> Result<GenerationResult, ApiError> {
  let max = state.config.generation.max_count;
  if req.count == 0 || req.count > max {
    return Err(ApiError::BadRequest(format!("count must be between 1 and {max}")));
  }
  let _guard = state.run_guard(module_id).await;
  let module = state.module(module_id).await.ok_or_else(|| ApiError::ModuleNotFound(module_id.to_string()))?;
  let fps = state.fingerprints_for(&module).await;

  let input = RunInput {
    module_id,
    inventory: &module.topics,
    existing: &module.tasks,
    existing_fingerprints: Some(fps.as_ref()),
    coverage: &module.coverage,
    count: req.count,
    seed: req.seed,
    debug: req.debug,
  };
  let result = generator(state).run(input, cancel, events).await;

  if !result.tasks.is_empty() {
    state.append_tasks(module_id, &result.tasks).await;
  }
  info!(target: "taskforge_backend", %module_id, accepted = result.tasks.len(), cancelled = result.cancelled, "Generation request served");
  Ok(result)
}

/// Generate one variant of an existing task; an accepted variant is appended.
#[instrument(level = "info", skip(state, req), fields(%module_id, task_id = %req.task_id))]
pub async fn generate_variant(state: &AppState, module_id: &str, req: &VariantIn) -> Result<GenerationResult, ApiError> {
  let _guard = state.run_guard(module_id).await;
  let module = state.module(module_id).await.ok_or_else(|| ApiError::ModuleNotFound(module_id.to_string()))?;
  let source = module
    .tasks
    .iter()
    .find(|t| t.id == req.task_id)
    .ok_or_else(|| ApiError::TaskNotFound { module_id: module_id.to_string(), task_id: req.task_id.clone() })?;
  let fps = state.fingerprints_for(&module).await;

  let result = generator(state).run_variant(module_id, source, &module.tasks, Some(fps.as_ref()), req.debug).await;

  if !result.tasks.is_empty() {
    state.append_tasks(module_id, &result.tasks).await;
  }
  Ok(result)
}

/// Run the duplicate cascade for a candidate against a module's tasks.
#[instrument(level = "info", skip(state, body), fields(%module_id, question_len = body.question.len()))]
pub async fn check_duplicate(state: &AppState, module_id: &str, body: CandidateIn) -> Result<DuplicateCheckResult, ApiError> {
  let module = state.module(module_id).await.ok_or_else(|| ApiError::ModuleNotFound(module_id.to_string()))?;
  let fps = state.fingerprints_for(&module).await;

  let candidate = Task {
    id: "candidate".into(),
    module_id: module_id.to_string(),
    question: body.question,
    solution: body.solution,
    tags: body.tags,
    difficulty: Default::default(),
    topic: body.topic,
    subtasks: body.subtasks,
    fingerprint: None,
    embedding: body.embedding,
    source: TaskSource::Generated,
    created_at: chrono::Utc::now(),
  };
  let candidate_fp = fingerprint_task(&state.normalizer, &candidate);

  let fingerprints: Vec<TaskFingerprint> = module
    .tasks
    .iter()
    .map(|t| fps.by_task.get(&t.id).cloned().unwrap_or_else(|| fingerprint_task(&state.normalizer, t)))
    .collect();
  let pool: Vec<PoolEntry<'_>> =
    module.tasks.iter().zip(fingerprints.iter()).map(|(task, fingerprint)| PoolEntry { task, fingerprint }).collect();

  let verdict = DuplicateDetector::new(&state.config.dedup, &state.normalizer).check(&candidate, &candidate_fp, &pool);
  info!(target: "taskforge_backend", %module_id, duplicate = verdict.is_duplicate, similarity = verdict.similarity, "Duplicate check served");
  Ok(verdict)
}

pub fn fingerprint_text(state: &AppState, body: &FingerprintIn) -> TaskFingerprint {
  let subtasks = if body.subtasks.is_empty() { None } else { Some(body.subtasks.as_slice()) };
  fingerprint(&state.normalizer, &body.question, &body.solution, &body.tags, FALLBACK_TOPIC, subtasks)
}

pub fn similarity_scores(a: &str, b: &str) -> SimilarityOut {
  SimilarityOut {
    jaccard: jaccard_similarity(a, b),
    ngram: ngram_similarity(a, b, NGRAM_SIZE),
    soft: soft_similarity(a, b),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::time::Duration;

  use async_trait::async_trait;

  use crate::completion::{CompletionError, CompletionProvider, CompletionRequest};
  use crate::config::AgentConfig;
  use crate::domain::TopicEntry;
  use crate::seeds::{LocalCompletion, DEMO_MODULE_ID};

  fn state() -> AppState {
    AppState::with_provider(AgentConfig::default(), Arc::new(LocalCompletion::new()))
  }

  /// Always returns the same task after a short delay, so two runs overlap.
  struct SlowRepeat;

  #[async_trait]
  impl CompletionProvider for SlowRepeat {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String, CompletionError> {
      tokio::time::sleep(Duration::from_millis(20)).await;
      Ok(serde_json::json!({
        "question": "# Kruskal on a weighted graph\nApply Kruskal's algorithm to the graph with edges AB=4, BC=2, AC=5 and list the chosen edges.",
        "solution": "BC, AB",
        "tags": ["graphs"]
      })
      .to_string())
    }

    fn name(&self) -> &str {
      "slow-repeat"
    }
  }

  #[tokio::test]
  async fn concurrent_runs_on_one_module_never_persist_the_same_task() {
    let s = AppState::with_provider(AgentConfig::default(), Arc::new(SlowRepeat));
    s.upsert_module("algo", None, vec![TopicEntry::new("graphs", "Kruskal builds a minimum spanning tree.")], vec![]).await;
    let req = GenerateIn { count: 1, seed: Some(1), debug: false };

    let (ca, cb) = (CancellationToken::new(), CancellationToken::new());
    let (a, b) = tokio::join!(
      generate_for_module(&s, "algo", &req, &ca, None),
      generate_for_module(&s, "algo", &req, &cb, None),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.tasks.len() + b.tasks.len(), 1);
    assert_eq!(a.failed_items + b.failed_items, 1);
    assert_eq!(a.duplicate_reject_count + b.duplicate_reject_count, 3);
    assert_eq!(s.module("algo").await.unwrap().tasks.len(), 1);
  }

  #[tokio::test]
  async fn generation_appends_accepted_tasks() {
    let s = state();
    let before = s.module(DEMO_MODULE_ID).await.unwrap().tasks.len();
    let req = GenerateIn { count: 4, seed: Some(5), debug: true };

    let result = generate_for_module(&s, DEMO_MODULE_ID, &req, &CancellationToken::new(), None).await.unwrap();

    let after = s.module(DEMO_MODULE_ID).await.unwrap();
    assert_eq!(after.tasks.len(), before + result.tasks.len());
    assert_eq!(result.tasks.len() as u32 + result.failed_items, 4);
    assert!(result.debug_report.is_some());
  }

  #[tokio::test]
  async fn generation_validates_inputs() {
    let s = state();
    let zero = GenerateIn { count: 0, seed: None, debug: false };
    let err = generate_for_module(&s, DEMO_MODULE_ID, &zero, &CancellationToken::new(), None).await.unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));

    let ok = GenerateIn { count: 1, seed: None, debug: false };
    let err = generate_for_module(&s, "nope", &ok, &CancellationToken::new(), None).await.unwrap_err();
    assert!(matches!(err, ApiError::ModuleNotFound(_)));
  }

  #[tokio::test]
  async fn variant_requires_known_task() {
    let s = state();
    let req = VariantIn { task_id: "missing".into(), debug: false };
    let err = generate_variant(&s, DEMO_MODULE_ID, &req).await.unwrap_err();
    assert!(matches!(err, ApiError::TaskNotFound { .. }));
  }

  #[tokio::test]
  async fn duplicate_check_against_seeded_tasks() {
    let s = state();
    let copy = CandidateIn {
      question: "# Binary to decimal\nConvert 110011 from binary to decimal.".into(),
      solution: "51".into(),
      tags: vec!["Number Systems".into()],
      topic: String::new(),
      subtasks: vec![],
      embedding: None,
    };
    let verdict = check_duplicate(&s, DEMO_MODULE_ID, copy).await.unwrap();
    assert!(verdict.is_duplicate);
    assert_eq!(verdict.matching_task_id.as_deref(), Some("seed-3"));
  }

  #[test]
  fn similarity_scores_are_bounded() {
    let out = similarity_scores("What is 2+2?", "what is 2+2");
    assert_eq!(out.soft, 1.0);
    let out = similarity_scores("graphs", "");
    assert_eq!(out.jaccard, 0.0);
    assert!(out.soft >= 0.0 && out.soft <= 1.0);
  }
}
