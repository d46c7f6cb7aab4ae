//! Generation orchestrator.
//!
//! Flow per run:
//! 1) Plan a blueprint once (empty inventory short-circuits the run).
//! 2) For each item, sequentially: build context (with the item's avoid list),
//!    request a completion, parse, fingerprint, run the duplicate cascade
//!    against persisted tasks and tasks accepted earlier in this run.
//! 3) Accept, or record the rejection and retry up to `max_attempts`.
//!
//! Items never run in parallel: later items are checked against earlier
//! acceptances. A cancelled run returns everything accepted so far.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::blueprint::{BlueprintBuilder, PlannerConfig};
use crate::completion::{parse_generated, CompletionProvider, CompletionRequest, GeneratedTask};
use crate::config::{GenerationSettings, Prompts};
use crate::dedup::{DedupConfig, DuplicateDetector, PoolEntry};
use crate::domain::{
  AttemptLog, BlueprintItem, DebugReport, Difficulty, DuplicateCheckResult, DuplicateTier, GenerationResult, ItemOutcome,
  ItemReport, ItemState, Rejection, RejectionKind, Task, TaskBlueprint, TaskFingerprint, TaskSource, TopicEntry,
};
use crate::fingerprint::{fingerprint_task, ModuleFingerprints, TopicNormalizer};
use crate::text::{extract_title, TITLE_MAX_CHARS};
use crate::util::{elapsed_ms, fill_template, trunc_for_log};

const NONE_MARKER: &str = "(none)";

/// Rejection reasons accumulated across the attempts of one blueprint item.
/// Threaded explicitly into each attempt's context.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AvoidList {
  issues: Vec<String>,
}

impl AvoidList {
  pub fn push(&mut self, issue: impl Into<String>) {
    let issue = issue.into();
    if !issue.trim().is_empty() && !self.issues.contains(&issue) {
      self.issues.push(issue);
    }
  }

  pub fn issues(&self) -> &[String] {
    &self.issues
  }

  pub fn render(&self) -> String {
    bullet_list(&self.issues)
  }
}

fn bullet_list(lines: &[String]) -> String {
  if lines.is_empty() {
    NONE_MARKER.to_string()
  } else {
    lines.iter().map(|l| format!("- {l}")).collect::<Vec<_>>().join("\n")
  }
}

/// Context for a fresh item.
pub fn build_context(
  prompts: &Prompts,
  item: &BlueprintItem,
  avoid: &AvoidList,
  existing_titles: &[String],
  temperature: f32,
) -> CompletionRequest {
  let difficulty = item.difficulty.to_string();
  let evidence = bullet_list(&item.evidence_snippets);
  let titles = bullet_list(existing_titles);
  let avoid_text = avoid.render();
  let user = fill_template(
    &prompts.generation_user_template,
    &[
      ("topic", &item.topic_name),
      ("difficulty", &difficulty),
      ("question_type", &item.question_type),
      ("evidence", &evidence),
      ("existing_titles", &titles),
      ("avoid", &avoid_text),
    ],
  );
  CompletionRequest { system: prompts.generation_system.clone(), user, temperature, json: true }
}

/// Context for a variant of `source`.
pub fn build_variant_context(
  prompts: &Prompts,
  item: &BlueprintItem,
  source: &Task,
  avoid: &AvoidList,
  temperature: f32,
) -> CompletionRequest {
  let difficulty = item.difficulty.to_string();
  let avoid_text = avoid.render();
  let user = fill_template(
    &prompts.variant_user_template,
    &[
      ("topic", &item.topic_name),
      ("difficulty", &difficulty),
      ("source_question", &source.question),
      ("source_solution", &source.solution),
      ("avoid", &avoid_text),
    ],
  );
  CompletionRequest { system: prompts.variant_system.clone(), user, temperature, json: true }
}

/// Progress notifications for streaming clients.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationEvent {
  ItemStarted {
    index: usize,
    total: usize,
    #[serde(rename = "topicId")]
    topic_id: String,
  },
  ItemAccepted {
    index: usize,
    #[serde(rename = "taskId")]
    task_id: String,
    attempts: u32,
  },
  ItemFailed {
    index: usize,
    #[serde(rename = "lastError")]
    last_error: String,
  },
}

/// Read-only inputs of one run.
pub struct RunInput<'a> {
  pub module_id: &'a str,
  pub inventory: &'a [TopicEntry],
  /// Persisted tasks; never mutated during the run.
  pub existing: &'a [Task],
  /// Cached fingerprints of `existing`, if the caller has them.
  pub existing_fingerprints: Option<&'a ModuleFingerprints>,
  /// Historical per-topic coverage counts.
  pub coverage: &'a HashMap<String, u32>,
  pub count: usize,
  pub seed: Option<u64>,
  pub debug: bool,
}

/// Tasks accepted so far in this run and their bookkeeping.
#[derive(Default)]
struct RunState {
  tasks: Vec<Task>,
  fingerprints: Vec<TaskFingerprint>,
  coverage: HashMap<String, u32>,
  covered: BTreeSet<String>,
}

impl RunState {
  fn new(coverage: HashMap<String, u32>) -> Self {
    Self { coverage, ..Default::default() }
  }

  fn pool(&self) -> Vec<PoolEntry<'_>> {
    self.tasks.iter().zip(self.fingerprints.iter()).map(|(task, fingerprint)| PoolEntry { task, fingerprint }).collect()
  }

  fn accept(&mut self, topic_id: &str, task: Task, fp: TaskFingerprint) {
    *self.coverage.entry(topic_id.to_string()).or_insert(0) += 1;
    self.covered.insert(topic_id.to_string());
    self.tasks.push(task);
    self.fingerprints.push(fp);
  }
}

struct ItemPlan<'a> {
  index: usize,
  module_id: &'a str,
  item: &'a BlueprintItem,
  variant_of: Option<&'a Task>,
}

enum AttemptStep {
  Accepted(Task, TaskFingerprint),
  Rejected { reached: ItemState, rejection: Rejection, retryable: bool },
}

struct ItemRun {
  report: ItemReport,
  duplicate_rejects: u32,
}

pub struct Generator<'a> {
  completion: &'a dyn CompletionProvider,
  prompts: &'a Prompts,
  settings: &'a GenerationSettings,
  dedup: &'a DedupConfig,
  planner: &'a PlannerConfig,
  normalizer: &'a TopicNormalizer,
}

impl<'a> Generator<'a> {
  pub fn new(
    completion: &'a dyn CompletionProvider,
    prompts: &'a Prompts,
    settings: &'a GenerationSettings,
    dedup: &'a DedupConfig,
    planner: &'a PlannerConfig,
    normalizer: &'a TopicNormalizer,
  ) -> Self {
    Self { completion, prompts, settings, dedup, planner, normalizer }
  }

  /// Plan and generate `input.count` tasks.
  #[instrument(level = "info", skip_all, fields(module_id = %input.module_id, count = input.count, provider = %self.completion.name()))]
  pub async fn run(
    &self,
    input: RunInput<'_>,
    cancel: &CancellationToken,
    events: Option<&UnboundedSender<GenerationEvent>>,
  ) -> GenerationResult {
    let started = Instant::now();
    if input.inventory.is_empty() {
      warn!(target: "generation", module_id = %input.module_id, "Empty topic inventory; nothing to generate");
      return GenerationResult::default();
    }

    let blueprint = BlueprintBuilder::new(self.planner, input.seed).build(input.inventory, input.count, input.coverage);
    info!(target: "generation", items = blueprint.len(), topics = ?blueprint.topic_ids(), "Blueprint planned");
    let persisted_fps = self.persisted_fingerprints(input.existing, input.existing_fingerprints);
    let persisted: Vec<PoolEntry<'_>> =
      input.existing.iter().zip(persisted_fps.iter()).map(|(task, fingerprint)| PoolEntry { task, fingerprint }).collect();

    let mut run = RunState::new(input.coverage.clone());
    let mut result = GenerationResult::default();
    let mut reports = Vec::with_capacity(blueprint.len());
    let total = blueprint.len();

    for (index, item) in blueprint.items.iter().enumerate() {
      if cancel.is_cancelled() {
        info!(target: "generation", index, accepted = run.tasks.len(), "Run cancelled between items");
        result.cancelled = true;
        break;
      }
      emit(events, GenerationEvent::ItemStarted { index, total, topic_id: item.topic_id.clone() });

      let plan = ItemPlan { index, module_id: input.module_id, item, variant_of: None };
      let item_run = self.process_item(&plan, &persisted, &mut run).await;
      self.tally(&mut result, &item_run, events);
      reports.push(item_run.report);

      if index + 1 < total && self.settings.inter_item_delay_ms > 0 {
        tokio::select! {
          _ = cancel.cancelled() => {}
          _ = tokio::time::sleep(Duration::from_millis(self.settings.inter_item_delay_ms)) => {}
        }
      }
    }

    self.finish(result, run, blueprint, reports, input.debug, started)
  }

  /// Generate one structurally similar variant of `source`.
  ///
  /// The candidate runs the full cascade against every persisted task except
  /// the source. Against the source only the semantic score counts, with the
  /// stricter `variant_source_threshold`.
  #[instrument(level = "info", skip_all, fields(module_id = %module_id, source_id = %source.id))]
  pub async fn run_variant(
    &self,
    module_id: &str,
    source: &Task,
    existing: &[Task],
    existing_fingerprints: Option<&ModuleFingerprints>,
    debug: bool,
  ) -> GenerationResult {
    let started = Instant::now();
    let source_fp = fingerprint_task(self.normalizer, source);
    let topic_id = if source.topic.trim().is_empty() { source_fp.topic.clone() } else { source.topic.clone() };
    let item = BlueprintItem {
      topic_name: source.tags.first().cloned().unwrap_or_else(|| topic_id.clone()),
      topic_id,
      difficulty: if source.difficulty == Difficulty::Unknown { source_fp.features.difficulty } else { source.difficulty },
      question_type: "variant".into(),
      evidence_snippets: vec![],
      doc_ids: BTreeSet::new(),
    };

    let persisted_fps = self.persisted_fingerprints(existing, existing_fingerprints);
    let persisted: Vec<PoolEntry<'_>> =
      existing.iter().zip(persisted_fps.iter()).map(|(task, fingerprint)| PoolEntry { task, fingerprint }).collect();

    let mut run = RunState::default();
    let mut result = GenerationResult::default();
    let plan = ItemPlan { index: 0, module_id, item: &item, variant_of: Some(source) };
    let item_run = self.process_item(&plan, &persisted, &mut run).await;
    self.tally(&mut result, &item_run, None);

    let blueprint = TaskBlueprint { items: vec![item.clone()] };
    self.finish(result, run, blueprint, vec![item_run.report], debug, started)
  }

  fn tally(&self, result: &mut GenerationResult, item_run: &ItemRun, events: Option<&UnboundedSender<GenerationEvent>>) {
    let report = &item_run.report;
    result.duplicate_reject_count += item_run.duplicate_rejects;
    result.regeneration_count += report.attempts.len().saturating_sub(1) as u32;
    match &report.outcome {
      ItemOutcome::Accepted { task_id } => emit(
        events,
        GenerationEvent::ItemAccepted { index: report.index, task_id: task_id.clone(), attempts: report.attempts.len() as u32 },
      ),
      ItemOutcome::Failed { last_error } => {
        result.failed_items += 1;
        emit(events, GenerationEvent::ItemFailed { index: report.index, last_error: last_error.clone() });
      }
    }
  }

  fn finish(
    &self,
    mut result: GenerationResult,
    run: RunState,
    blueprint: TaskBlueprint,
    reports: Vec<ItemReport>,
    debug: bool,
    started: Instant,
  ) -> GenerationResult {
    result.covered_topic_ids = run.covered;
    result.tasks = run.tasks;
    let total_ms = elapsed_ms(started);
    if debug {
      result.debug_report = Some(DebugReport {
        provider: self.completion.name().to_string(),
        blueprint,
        items: reports,
        total_ms,
      });
    }
    info!(
      target: "generation",
      accepted = result.tasks.len(),
      duplicate_rejects = result.duplicate_reject_count,
      regenerations = result.regeneration_count,
      failed = result.failed_items,
      cancelled = result.cancelled,
      total_ms,
      "Generation run finished"
    );
    result
  }

  fn persisted_fingerprints(&self, existing: &[Task], cached: Option<&ModuleFingerprints>) -> Vec<TaskFingerprint> {
    existing
      .iter()
      .map(|t| {
        cached
          .and_then(|c| c.by_task.get(&t.id))
          .cloned()
          .unwrap_or_else(|| fingerprint_task(self.normalizer, t))
      })
      .collect()
  }

  fn existing_titles(&self, item: &BlueprintItem, persisted: &[PoolEntry<'_>], run: &RunState) -> Vec<String> {
    let topic = self.normalizer.canonical(&item.topic_name);
    persisted
      .iter()
      .map(|e| (e.task, e.fingerprint))
      .chain(run.tasks.iter().zip(run.fingerprints.iter()))
      .filter(|(t, fp)| t.topic == item.topic_id || fp.topic == topic)
      .map(|(t, _)| extract_title(&t.question, TITLE_MAX_CHARS))
      .filter(|t| !t.is_empty())
      .take(self.settings.max_context_titles)
      .collect()
  }

  async fn process_item(&self, plan: &ItemPlan<'_>, persisted: &[PoolEntry<'_>], run: &mut RunState) -> ItemRun {
    let started = Instant::now();
    let max_attempts = self.settings.max_attempts.max(1);
    let titles = self.existing_titles(plan.item, persisted, run);

    let mut avoid = AvoidList::default();
    let mut attempts: Vec<AttemptLog> = Vec::new();
    let mut duplicate_rejects = 0u32;
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
      let attempt_started = Instant::now();
      match self.attempt(plan, &avoid, &titles, persisted, run).await {
        AttemptStep::Accepted(task, fp) => {
          let task_id = task.id.clone();
          debug!(target: "generation", index = plan.index, attempt, %task_id, fingerprint = %fp.hash, "Item accepted");
          attempts.push(AttemptLog {
            attempt,
            reached_state: ItemState::DedupChecked,
            outcome: ItemState::Accepted,
            rejection: None,
            elapsed_ms: elapsed_ms(attempt_started),
          });
          run.accept(&plan.item.topic_id, task, fp);
          return ItemRun {
            report: self.report(plan, ItemOutcome::Accepted { task_id }, attempts, started),
            duplicate_rejects,
          };
        }
        AttemptStep::Rejected { reached, rejection, retryable } => {
          warn!(
            target: "generation",
            index = plan.index,
            attempt,
            kind = ?rejection.kind,
            tier = ?rejection.tier,
            reason = %trunc_for_log(&rejection.reason, 200),
            "Attempt rejected"
          );
          match rejection.kind {
            RejectionKind::Duplicate => {
              duplicate_rejects += 1;
              avoid.push(rejection.reason.clone());
            }
            RejectionKind::Malformed => avoid.push(rejection.reason.clone()),
            RejectionKind::Upstream => {}
          }
          last_error = rejection.reason.clone();
          let stop = attempt == max_attempts || !retryable;
          attempts.push(AttemptLog {
            attempt,
            reached_state: reached,
            outcome: if stop { ItemState::Failed } else { ItemState::RejectedRetry },
            rejection: Some(rejection),
            elapsed_ms: elapsed_ms(attempt_started),
          });
          if stop {
            break;
          }
        }
      }
    }

    warn!(
      target: "generation",
      index = plan.index,
      topic_id = %plan.item.topic_id,
      attempts = attempts.len(),
      avoided = avoid.issues().len(),
      %last_error,
      "Item failed"
    );
    ItemRun { report: self.report(plan, ItemOutcome::Failed { last_error }, attempts, started), duplicate_rejects }
  }

  async fn attempt(
    &self,
    plan: &ItemPlan<'_>,
    avoid: &AvoidList,
    titles: &[String],
    persisted: &[PoolEntry<'_>],
    run: &RunState,
  ) -> AttemptStep {
    let temperature = self.settings.temperature;
    let request = match plan.variant_of {
      Some(source) => build_variant_context(self.prompts, plan.item, source, avoid, temperature),
      None => build_context(self.prompts, plan.item, avoid, titles, temperature),
    };

    let raw = match self.completion.complete(&request).await {
      Ok(raw) => raw,
      Err(e) => {
        return AttemptStep::Rejected {
          reached: ItemState::CompletionRequested,
          retryable: e.is_transient(),
          rejection: Rejection { kind: RejectionKind::Upstream, tier: None, reason: e.to_string() },
        };
      }
    };

    let generated = match parse_generated(&raw) {
      Ok(g) => g,
      Err(e) => {
        return AttemptStep::Rejected {
          reached: ItemState::CompletionRequested,
          retryable: true,
          rejection: Rejection { kind: RejectionKind::Malformed, tier: None, reason: e.to_string() },
        };
      }
    };

    let mut task = self.to_task(plan, generated);
    let fp = fingerprint_task(self.normalizer, &task);
    task.fingerprint = Some(fp.fingerprint.clone());

    let verdict = self.dedup_check(plan, &task, &fp, persisted, run);
    if verdict.is_duplicate {
      return AttemptStep::Rejected {
        reached: ItemState::DedupChecked,
        retryable: true,
        rejection: Rejection {
          kind: RejectionKind::Duplicate,
          tier: verdict.tier,
          reason: verdict.reason.unwrap_or_else(|| "duplicate".into()),
        },
      };
    }
    AttemptStep::Accepted(task, fp)
  }

  fn to_task(&self, plan: &ItemPlan<'_>, generated: GeneratedTask) -> Task {
    let mut tags = vec![plan.item.topic_name.clone()];
    for t in generated.tags {
      let t = t.trim().to_string();
      if !t.is_empty() && !tags.iter().any(|x| x.eq_ignore_ascii_case(&t)) {
        tags.push(t);
      }
    }
    let difficulty = generated
      .difficulty
      .as_deref()
      .map(Difficulty::parse)
      .filter(|d| *d != Difficulty::Unknown)
      .unwrap_or(plan.item.difficulty);

    Task {
      id: Uuid::new_v4().to_string(),
      module_id: plan.module_id.to_string(),
      question: generated.question.trim().to_string(),
      solution: generated.solution.trim().to_string(),
      tags,
      difficulty,
      topic: plan.item.topic_id.clone(),
      subtasks: generated.subtasks,
      fingerprint: None,
      embedding: None,
      source: if plan.variant_of.is_some() { TaskSource::Variant } else { TaskSource::Generated },
      created_at: Utc::now(),
    }
  }

  /// Persisted tasks first, then tasks accepted earlier in this run.
  fn dedup_check(
    &self,
    plan: &ItemPlan<'_>,
    task: &Task,
    fp: &TaskFingerprint,
    persisted: &[PoolEntry<'_>],
    run: &RunState,
  ) -> DuplicateCheckResult {
    let detector = DuplicateDetector::new(self.dedup, self.normalizer);
    let source_id = plan.variant_of.map(|s| s.id.as_str());

    let others: Vec<PoolEntry<'_>> = persisted.iter().filter(|e| Some(e.task.id.as_str()) != source_id).copied().collect();
    let verdict = detector.check(task, fp, &others);
    if verdict.is_duplicate {
      return verdict;
    }
    let mut best = verdict.similarity;

    if let Some(source_id) = source_id {
      let source: Vec<PoolEntry<'_>> = persisted.iter().filter(|e| e.task.id == source_id).copied().collect();
      let close = detector.semantic_tier(task, &source);
      if close.similarity >= self.dedup.variant_source_threshold {
        return DuplicateCheckResult {
          is_duplicate: true,
          reason: Some(format!("variant is a near-copy of its source task {} ({:.2})", source_id, close.similarity)),
          tier: Some(DuplicateTier::Semantic),
          ..close
        };
      }
      best = best.max(close.similarity);
    }

    let run_pool = run.pool();
    if let Some(hit) = detector.fingerprint_tier(fp, &run_pool) {
      return in_run(hit);
    }
    if let Some(hit) = detector.title_tier(task, fp, &run_pool) {
      return in_run(hit);
    }
    let semantic = detector.semantic_tier(task, &run_pool);
    if semantic.is_duplicate {
      return in_run(semantic);
    }
    DuplicateCheckResult { similarity: best.max(semantic.similarity), ..Default::default() }
  }

  fn report(&self, plan: &ItemPlan<'_>, outcome: ItemOutcome, attempts: Vec<AttemptLog>, started: Instant) -> ItemReport {
    ItemReport {
      index: plan.index,
      topic_id: plan.item.topic_id.clone(),
      topic_name: plan.item.topic_name.clone(),
      difficulty: plan.item.difficulty,
      question_type: plan.item.question_type.clone(),
      outcome,
      attempts,
      elapsed_ms: elapsed_ms(started),
    }
  }
}

fn in_run(mut hit: DuplicateCheckResult) -> DuplicateCheckResult {
  hit.reason = hit.reason.map(|r| format!("{r}, generated earlier in this run"));
  hit
}

fn emit(events: Option<&UnboundedSender<GenerationEvent>>, event: GenerationEvent) {
  if let Some(tx) = events {
    // A gone receiver only means nobody is listening anymore.
    let _ = tx.send(event);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Mutex;

  use async_trait::async_trait;

  use crate::completion::CompletionError;

  /// Returns scripted responses in order, cycling; records every prompt.
  struct ScriptedCompletion {
    responses: Vec<Result<String, u16>>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    cancel_on_first_call: Option<CancellationToken>,
  }

  impl ScriptedCompletion {
    fn new(responses: Vec<Result<String, u16>>) -> Self {
      Self { responses, calls: AtomicUsize::new(0), prompts: Mutex::new(vec![]), cancel_on_first_call: None }
    }

    fn always(raw: &str) -> Self {
      Self::new(vec![Ok(raw.to_string())])
    }

    fn calls(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }
  }

  #[async_trait]
  impl CompletionProvider for ScriptedCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
      let n = self.calls.fetch_add(1, Ordering::SeqCst);
      self.prompts.lock().unwrap().push(request.user.clone());
      if let Some(token) = &self.cancel_on_first_call {
        token.cancel();
      }
      match &self.responses[n % self.responses.len()] {
        Ok(s) => Ok(s.clone()),
        Err(401) => Err(CompletionError::Unavailable("bad key".into())),
        Err(status) => Err(CompletionError::Http { status: *status, message: "upstream".into() }),
      }
    }

    fn name(&self) -> &str {
      "scripted"
    }
  }

  fn task_json(question: &str, solution: &str) -> String {
    serde_json::json!({ "question": question, "solution": solution }).to_string()
  }

  fn distinct_tasks() -> Vec<Result<String, u16>> {
    vec![
      Ok(task_json(
        "# Huffman codes\nBuild a Huffman code for the symbol frequencies listed in the lecture notes.",
        "Merge the two rarest symbols repeatedly.",
      )),
      Ok(task_json(
        "# Pumping lemma\nProve with the pumping lemma that balanced parentheses are not regular.\na) choose the word\nb) derive the contradiction",
        "Pick ( ^p ) ^p and pump the prefix.",
      )),
      Ok(task_json(
        "# Hash collisions\nInsert the keys 12, 44, 13, 88 into a hash table with linear probing.\na) show the table\nb) count collisions\nc) give the load factor",
        "Slots 1, 4, 2, 0 after probing; two collisions; load 4/11.",
      )),
      Ok(task_json(
        "# Turing machines\nDescribe a Turing machine that doubles a unary number on its tape.",
        "Mark each symbol and copy it behind a separator.",
      )),
    ]
  }

  struct Fixture {
    prompts: Prompts,
    settings: GenerationSettings,
    dedup: DedupConfig,
    planner: PlannerConfig,
    normalizer: TopicNormalizer,
  }

  impl Fixture {
    fn new() -> Self {
      Self {
        prompts: Prompts::default(),
        settings: GenerationSettings::default(),
        dedup: DedupConfig::default(),
        planner: PlannerConfig::default(),
        normalizer: TopicNormalizer::default(),
      }
    }

    fn generator<'a>(&'a self, completion: &'a dyn CompletionProvider) -> Generator<'a> {
      Generator::new(completion, &self.prompts, &self.settings, &self.dedup, &self.planner, &self.normalizer)
    }
  }

  fn graphs_and_automata() -> Vec<TopicEntry> {
    vec![
      TopicEntry::new("Graphs", "A graph is a pair (V, E)."),
      TopicEntry::new("Automata", "A DFA is a 5-tuple."),
    ]
  }

  fn input<'a>(inventory: &'a [TopicEntry], existing: &'a [Task], coverage: &'a HashMap<String, u32>, count: usize) -> RunInput<'a> {
    RunInput {
      module_id: "m1",
      inventory,
      existing,
      existing_fingerprints: None,
      coverage,
      count,
      seed: Some(11),
      debug: true,
    }
  }

  #[tokio::test]
  async fn end_to_end_success() {
    let fx = Fixture::new();
    let completion = ScriptedCompletion::new(distinct_tasks());
    let inv = graphs_and_automata();
    let coverage = HashMap::new();

    let result = fx.generator(&completion).run(input(&inv, &[], &coverage, 4), &CancellationToken::new(), None).await;

    assert_eq!(result.tasks.len(), 4, "{:?}", result.debug_report);
    assert_eq!(result.duplicate_reject_count, 0);
    assert_eq!(result.regeneration_count, 0);
    assert_eq!(result.failed_items, 0);
    let expected: BTreeSet<String> = ["Graphs", "Automata"].iter().map(|s| s.to_string()).collect();
    assert_eq!(result.covered_topic_ids, expected);
    assert!(result.tasks.iter().all(|t| t.source == TaskSource::Generated && t.fingerprint.is_some()));
    assert_eq!(completion.calls(), 4);
  }

  #[tokio::test]
  async fn end_to_end_duplicate_forcing() {
    let fx = Fixture::new();
    let completion = ScriptedCompletion::always(&task_json("# Same question\nCompute the degree of vertex v.", "Three."));
    let inv = graphs_and_automata();
    let coverage = HashMap::new();

    let result = fx.generator(&completion).run(input(&inv, &[], &coverage, 4), &CancellationToken::new(), None).await;

    assert_eq!(result.tasks.len(), 1);
    assert!(result.duplicate_reject_count > 0);
    assert_eq!(result.duplicate_reject_count, 9);
    assert_eq!(result.failed_items, 3);
    assert_eq!(result.regeneration_count, 6);

    let report = result.debug_report.expect("debug report");
    let failed = &report.items[1];
    assert_eq!(failed.attempts.len(), 3);
    let rejection = failed.attempts[0].rejection.as_ref().unwrap();
    assert_eq!(rejection.kind, RejectionKind::Duplicate);
    assert!(rejection.reason.contains("generated earlier in this run"), "{}", rejection.reason);

    // The same-topic repeat is caught by the fingerprint tier, as for persisted tasks.
    let exact = report
      .items
      .iter()
      .flat_map(|i| i.attempts.iter())
      .filter_map(|a| a.rejection.as_ref())
      .find(|r| r.tier == Some(DuplicateTier::Fingerprint))
      .expect("fingerprint-tier rejection");
    assert!(exact.reason.contains("(fingerprint "), "{}", exact.reason);
    assert!(exact.reason.contains("generated earlier in this run"), "{}", exact.reason);
  }

  #[tokio::test]
  async fn bounded_retries_on_malformed_output() {
    let fx = Fixture::new();
    let completion = ScriptedCompletion::always("this is not json");
    let inv = vec![TopicEntry::new("Graphs", "evidence")];
    let coverage = HashMap::new();

    let result = fx.generator(&completion).run(input(&inv, &[], &coverage, 2), &CancellationToken::new(), None).await;

    assert!(result.tasks.is_empty());
    assert_eq!(result.failed_items, 2);
    assert_eq!(completion.calls(), 6);
    assert_eq!(result.duplicate_reject_count, 0);
    assert!(result.covered_topic_ids.is_empty());

    let report = result.debug_report.unwrap();
    for item in &report.items {
      assert_eq!(item.attempts.len(), 3);
      assert_eq!(item.attempts.last().unwrap().outcome, ItemState::Failed);
      match &item.outcome {
        ItemOutcome::Failed { last_error } => assert!(last_error.contains("invalid structured output")),
        other => panic!("unexpected outcome {other:?}"),
      }
    }
  }

  #[tokio::test]
  async fn avoid_list_reaches_next_attempt() {
    let fx = Fixture::new();
    let mut responses = vec![Ok("{ broken".to_string())];
    responses.extend(distinct_tasks().into_iter().take(1));
    let completion = ScriptedCompletion::new(responses);
    let inv = vec![TopicEntry::new("Graphs", "evidence")];
    let coverage = HashMap::new();

    let result = fx.generator(&completion).run(input(&inv, &[], &coverage, 1), &CancellationToken::new(), None).await;

    assert_eq!(result.tasks.len(), 1);
    assert_eq!(result.regeneration_count, 1);
    let prompts = completion.prompts.lock().unwrap();
    assert!(prompts[0].contains("Issues to avoid:\n(none)"));
    assert!(prompts[1].contains("- invalid structured output"), "{}", prompts[1]);
  }

  #[tokio::test]
  async fn persisted_duplicates_are_rejected() {
    let fx = Fixture::new();
    let q = "# Huffman codes\nBuild a Huffman code for the symbol frequencies listed in the lecture notes.";
    let existing: Vec<Task> = vec![serde_json::from_value(serde_json::json!({
      "id": "old-1", "question": q, "solution": "Merge the two rarest symbols repeatedly.", "tags": ["Graphs"]
    }))
    .unwrap()];
    let completion = ScriptedCompletion::always(&task_json(q, "Merge the two rarest symbols repeatedly."));
    let inv = vec![TopicEntry::new("Graphs", "evidence")];
    let coverage = HashMap::new();

    let result = fx.generator(&completion).run(input(&inv, &existing, &coverage, 1), &CancellationToken::new(), None).await;

    assert!(result.tasks.is_empty());
    assert_eq!(result.duplicate_reject_count, 3);
    let report = result.debug_report.unwrap();
    let rejection = report.items[0].attempts[0].rejection.clone().unwrap();
    assert_eq!(rejection.tier, Some(DuplicateTier::Fingerprint));
    assert!(rejection.reason.contains("old-1"));
  }

  #[tokio::test]
  async fn upstream_failures_retry_only_when_transient() {
    let fx = Fixture::new();
    let inv = vec![TopicEntry::new("Graphs", "evidence")];
    let coverage = HashMap::new();

    let flaky = ScriptedCompletion::new(vec![Err(503)]);
    let result = fx.generator(&flaky).run(input(&inv, &[], &coverage, 1), &CancellationToken::new(), None).await;
    assert_eq!(flaky.calls(), 3);
    assert_eq!(result.failed_items, 1);

    let broken = ScriptedCompletion::new(vec![Err(401)]);
    let result = fx.generator(&broken).run(input(&inv, &[], &coverage, 1), &CancellationToken::new(), None).await;
    assert_eq!(broken.calls(), 1);
    assert_eq!(result.failed_items, 1);
    let prompts = broken.prompts.lock().unwrap();
    assert!(prompts[0].contains("(none)"));
  }

  #[tokio::test]
  async fn cancellation_keeps_partial_results() {
    let fx = Fixture::new();
    let token = CancellationToken::new();
    let mut completion = ScriptedCompletion::new(distinct_tasks());
    completion.cancel_on_first_call = Some(token.clone());
    let inv = graphs_and_automata();
    let coverage = HashMap::new();

    let result = fx.generator(&completion).run(input(&inv, &[], &coverage, 4), &token, None).await;

    assert!(result.cancelled);
    assert_eq!(result.tasks.len(), 1);
    assert_eq!(completion.calls(), 1);
  }

  #[tokio::test]
  async fn empty_inventory_short_circuits() {
    let fx = Fixture::new();
    let completion = ScriptedCompletion::new(distinct_tasks());
    let coverage = HashMap::new();

    let result = fx.generator(&completion).run(input(&[], &[], &coverage, 4), &CancellationToken::new(), None).await;

    assert!(result.tasks.is_empty());
    assert!(result.debug_report.is_none());
    assert_eq!(completion.calls(), 0);
  }

  #[tokio::test]
  async fn progress_events_are_emitted() {
    let fx = Fixture::new();
    let completion = ScriptedCompletion::new(distinct_tasks());
    let inv = graphs_and_automata();
    let coverage = HashMap::new();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    fx.generator(&completion).run(input(&inv, &[], &coverage, 2), &CancellationToken::new(), Some(&tx)).await;
    drop(tx);

    let mut kinds = vec![];
    while let Some(ev) = rx.recv().await {
      kinds.push(match ev {
        GenerationEvent::ItemStarted { .. } => "started",
        GenerationEvent::ItemAccepted { .. } => "accepted",
        GenerationEvent::ItemFailed { .. } => "failed",
      });
    }
    assert_eq!(kinds, vec!["started", "accepted", "started", "accepted"]);
  }

  #[tokio::test]
  async fn variant_may_share_structure_but_not_text_with_source() {
    let fx = Fixture::new();
    let source: Task = serde_json::from_value(serde_json::json!({
      "id": "src", "question": "Convert 1011 from binary to decimal.", "solution": "11", "tags": ["Number Systems"]
    }))
    .unwrap();
    let existing = vec![source.clone()];

    let good = ScriptedCompletion::always(&task_json("Convert the value 111001 from binary notation to decimal.", "57"));
    let result = fx.generator(&good).run_variant("m1", &source, &existing, None, true).await;
    assert_eq!(result.tasks.len(), 1, "{:?}", result.debug_report);
    assert_eq!(result.tasks[0].source, TaskSource::Variant);

    let copy = ScriptedCompletion::always(&task_json("Convert 1011 from binary to decimal.", "11"));
    let result = fx.generator(&copy).run_variant("m1", &source, &existing, None, true).await;
    assert!(result.tasks.is_empty());
    assert_eq!(copy.calls(), 3);
    let report = result.debug_report.unwrap();
    let reason = &report.items[0].attempts[0].rejection.as_ref().unwrap().reason;
    assert!(reason.contains("near-copy of its source task src"), "{reason}");
  }

  #[test]
  fn avoid_list_dedupes_and_renders() {
    let mut avoid = AvoidList::default();
    assert_eq!(avoid.render(), "(none)");
    avoid.push("exact duplicate of task X");
    avoid.push("exact duplicate of task X");
    avoid.push("  ");
    assert_eq!(avoid.issues().len(), 1);
    assert_eq!(avoid.render(), "- exact duplicate of task X");
  }
}
