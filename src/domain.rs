//! Domain models used by the backend: tasks, topic inventory, fingerprints,
//! blueprints, duplicate verdicts and generation results.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse difficulty of a task.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
  Easy,
  Medium,
  Hard,
  #[default]
  Unknown,
}

impl Difficulty {
  pub fn as_str(&self) -> &'static str {
    match self {
      Difficulty::Easy => "easy",
      Difficulty::Medium => "medium",
      Difficulty::Hard => "hard",
      Difficulty::Unknown => "unknown",
    }
  }

  /// Lenient parse used for model output and config values.
  pub fn parse(s: &str) -> Difficulty {
    match s.trim().to_lowercase().as_str() {
      "easy" | "leicht" => Difficulty::Easy,
      "medium" | "mittel" => Difficulty::Medium,
      "hard" | "schwer" | "difficult" => Difficulty::Hard,
      _ => Difficulty::Unknown,
    }
  }
}

impl fmt::Display for Difficulty {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Kind of answer a task expects.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AnswerFormat {
  Table,
  Diagram,
  Formula,
  Code,
  Text,
  Number,
}

/// Structural features derived from question text.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskFeatures {
  pub num_variables: Option<u32>,
  pub num_subtasks: u32,
  pub answer_formats: BTreeSet<AnswerFormat>,
  pub requires_diagram: bool,
  pub requires_table: bool,
  pub requires_code: bool,
  pub difficulty: Difficulty,
  /// 1..=10
  pub complexity: u8,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskFingerprint {
  pub topic: String,
  pub archetype: String,
  pub features: TaskFeatures,
  pub fingerprint: String,
  pub hash: String,
}

/// Where did a task come from?
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskSource {
  /// Persisted upstream and handed to us read-only.
  #[default]
  Existing,
  Generated,
  Variant,
  /// Built-in demo content.
  Seed,
}

/// A practice task, either persisted upstream or freshly generated.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
  pub id: String,
  #[serde(default)]
  pub module_id: String,
  pub question: String,
  #[serde(default)]
  pub solution: String,
  #[serde(default)]
  pub tags: Vec<String>,
  #[serde(default)]
  pub difficulty: Difficulty,
  #[serde(default)]
  pub topic: String,
  #[serde(default)]
  pub subtasks: Vec<String>,
  #[serde(default)]
  pub fingerprint: Option<String>,
  #[serde(default)]
  pub embedding: Option<Vec<f32>>,
  #[serde(default)]
  pub source: TaskSource,
  #[serde(default = "Utc::now")]
  pub created_at: DateTime<Utc>,
}

/// One row of the topic inventory produced by upstream document analysis.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicEntry {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub evidence: Vec<String>,
  #[serde(default)]
  pub doc_ids: BTreeSet<String>,
  #[serde(default = "default_priority")]
  pub priority: f32,
}

fn default_priority() -> f32 {
  1.0
}

#[cfg(test)]
impl TopicEntry {
  pub fn new(id: impl Into<String>, evidence: impl Into<String>) -> Self {
    let id = id.into();
    Self {
      name: id.clone(),
      id,
      evidence: vec![evidence.into()],
      doc_ids: BTreeSet::new(),
      priority: default_priority(),
    }
  }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlueprintItem {
  pub topic_id: String,
  pub topic_name: String,
  pub difficulty: Difficulty,
  pub question_type: String,
  pub evidence_snippets: Vec<String>,
  pub doc_ids: BTreeSet<String>,
}

/// Ordered generation plan.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskBlueprint {
  pub items: Vec<BlueprintItem>,
}

impl TaskBlueprint {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  #[cfg(test)]
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn topic_ids(&self) -> BTreeSet<String> {
    self.items.iter().map(|i| i.topic_id.clone()).collect()
  }
}

/// Which stage of the duplicate cascade fired.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateTier {
  Fingerprint,
  Title,
  Semantic,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateCheckResult {
  pub is_duplicate: bool,
  pub similarity: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub matching_fingerprint: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub matching_task_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub reason: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub tier: Option<DuplicateTier>,
}

/// States an item passes through inside the orchestrator.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
  Pending,
  ContextBuilt,
  CompletionRequested,
  Parsed,
  Fingerprinted,
  DedupChecked,
  Accepted,
  RejectedRetry,
  Failed,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
  Malformed,
  Duplicate,
  Upstream,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
  pub kind: RejectionKind,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub tier: Option<DuplicateTier>,
  pub reason: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptLog {
  pub attempt: u32,
  /// Last state the attempt got to before it stopped.
  pub reached_state: ItemState,
  /// `Accepted`, `RejectedRetry` or `Failed`.
  pub outcome: ItemState,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub rejection: Option<Rejection>,
  pub elapsed_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
  Accepted {
    #[serde(rename = "taskId")]
    task_id: String,
  },
  Failed {
    #[serde(rename = "lastError")]
    last_error: String,
  },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemReport {
  pub index: usize,
  pub topic_id: String,
  pub topic_name: String,
  pub difficulty: Difficulty,
  pub question_type: String,
  pub outcome: ItemOutcome,
  pub attempts: Vec<AttemptLog>,
  pub elapsed_ms: u64,
}

/// Developer diagnostics for one run. Never shown to learners.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugReport {
  pub provider: String,
  pub blueprint: TaskBlueprint,
  pub items: Vec<ItemReport>,
  pub total_ms: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
  pub tasks: Vec<Task>,
  pub duplicate_reject_count: u32,
  pub regeneration_count: u32,
  pub covered_topic_ids: BTreeSet<String>,
  pub failed_items: u32,
  pub cancelled: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub debug_report: Option<DebugReport>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn difficulty_parse_is_lenient() {
    assert_eq!(Difficulty::parse(" Hard "), Difficulty::Hard);
    assert_eq!(Difficulty::parse("leicht"), Difficulty::Easy);
    assert_eq!(Difficulty::parse("???"), Difficulty::Unknown);
  }

  #[test]
  fn task_deserializes_with_minimal_fields() {
    let t: Task = serde_json::from_str(r#"{"id":"t1","question":"What is a DFA?"}"#).unwrap();
    assert_eq!(t.id, "t1");
    assert!(t.tags.is_empty());
    assert_eq!(t.source, TaskSource::Existing);
    assert!(t.embedding.is_none());
  }

  #[test]
  fn item_outcome_serializes_with_status_tag() {
    let v = serde_json::to_value(ItemOutcome::Failed { last_error: "boom".into() }).unwrap();
    assert_eq!(v["status"], "failed");
    assert_eq!(v["lastError"], "boom");
  }
}
