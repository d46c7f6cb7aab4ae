//! Three-tier duplicate cascade: fingerprint equality, title similarity,
//! full semantic similarity. Tiers run in order and stop at the first hit.

use std::collections::BTreeSet;

use serde::Deserialize;

use crate::domain::{DuplicateCheckResult, DuplicateTier, Task, TaskFingerprint};
use crate::fingerprint::TopicNormalizer;
use crate::similarity::{cosine_similarity, soft_similarity};
use crate::text::{extract_title, TITLE_MAX_CHARS};

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
  /// Tier 2 fires at this title similarity when topics overlap.
  pub title_threshold: f32,
  /// Tier 2 fires at this title similarity regardless of topic.
  pub title_strict_threshold: f32,
  /// Tier 3 threshold on question+solution similarity.
  pub semantic_threshold: f32,
  /// A variant is rejected against its own source only at this similarity.
  pub variant_source_threshold: f32,
  pub title_max_chars: usize,
}

impl Default for DedupConfig {
  fn default() -> Self {
    Self {
      title_threshold: 0.55,
      title_strict_threshold: 0.7,
      semantic_threshold: 0.65,
      variant_source_threshold: 0.9,
      title_max_chars: TITLE_MAX_CHARS,
    }
  }
}

/// A task paired with its fingerprint, as seen by the cascade.
#[derive(Clone, Copy, Debug)]
pub struct PoolEntry<'a> {
  pub task: &'a Task,
  pub fingerprint: &'a TaskFingerprint,
}

pub struct DuplicateDetector<'a> {
  config: &'a DedupConfig,
  normalizer: &'a TopicNormalizer,
}

impl<'a> DuplicateDetector<'a> {
  pub fn new(config: &'a DedupConfig, normalizer: &'a TopicNormalizer) -> Self {
    Self { config, normalizer }
  }

  /// Run the full cascade of `candidate` against `pool`.
  pub fn check(&self, candidate: &Task, candidate_fp: &TaskFingerprint, pool: &[PoolEntry<'_>]) -> DuplicateCheckResult {
    if let Some(hit) = self.fingerprint_tier(candidate_fp, pool) {
      return hit;
    }
    if let Some(hit) = self.title_tier(candidate, candidate_fp, pool) {
      return hit;
    }
    self.semantic_tier(candidate, pool)
  }

  /// Tier 1: exact fingerprint string or hash match.
  pub fn fingerprint_tier(&self, candidate_fp: &TaskFingerprint, pool: &[PoolEntry<'_>]) -> Option<DuplicateCheckResult> {
    pool
      .iter()
      .find(|e| e.fingerprint.fingerprint == candidate_fp.fingerprint || e.fingerprint.hash == candidate_fp.hash)
      .map(|e| DuplicateCheckResult {
        is_duplicate: true,
        similarity: 1.0,
        matching_fingerprint: Some(e.fingerprint.fingerprint.clone()),
        matching_task_id: Some(e.task.id.clone()),
        reason: Some(format!("exact duplicate of task {} (fingerprint {})", e.task.id, e.fingerprint.hash)),
        tier: Some(DuplicateTier::Fingerprint),
      })
  }

  /// Tier 2: short title similarity, gated on topic overlap.
  pub fn title_tier(&self, candidate: &Task, candidate_fp: &TaskFingerprint, pool: &[PoolEntry<'_>]) -> Option<DuplicateCheckResult> {
    let title = extract_title(&candidate.question, self.config.title_max_chars);
    if title.is_empty() {
      return None;
    }
    let topics = self.topic_set(candidate, candidate_fp);

    let mut best: Option<(f32, &PoolEntry<'_>)> = None;
    for e in pool {
      let other = extract_title(&e.task.question, self.config.title_max_chars);
      if other.is_empty() {
        continue;
      }
      let sim = soft_similarity(&title, &other);
      if sim < self.config.title_threshold {
        continue;
      }
      let overlap = !topics.is_disjoint(&self.topic_set(e.task, e.fingerprint));
      if (overlap || sim >= self.config.title_strict_threshold) && best.map_or(true, |(s, _)| sim > s) {
        best = Some((sim, e));
      }
    }

    best.map(|(sim, e)| DuplicateCheckResult {
      is_duplicate: true,
      similarity: sim,
      matching_fingerprint: Some(e.fingerprint.fingerprint.clone()),
      matching_task_id: Some(e.task.id.clone()),
      reason: Some(format!("title too similar to task {} ({:.2})", e.task.id, sim)),
      tier: Some(DuplicateTier::Title),
    })
  }

  /// Tier 3: max similarity of question+solution over the pool. Cosine when
  /// both sides carry embeddings, blended lexical similarity otherwise.
  pub fn semantic_tier(&self, candidate: &Task, pool: &[PoolEntry<'_>]) -> DuplicateCheckResult {
    let body = full_text(candidate);
    let mut best: Option<(f32, &PoolEntry<'_>)> = None;

    for e in pool {
      let sim = match (&candidate.embedding, &e.task.embedding) {
        (Some(a), Some(b)) => cosine_similarity(a, b).max(0.0),
        _ => soft_similarity(&body, &full_text(e.task)),
      };
      if best.map_or(true, |(s, _)| sim > s) {
        best = Some((sim, e));
      }
    }

    match best {
      Some((sim, e)) if sim >= self.config.semantic_threshold => DuplicateCheckResult {
        is_duplicate: true,
        similarity: sim,
        matching_fingerprint: Some(e.fingerprint.fingerprint.clone()),
        matching_task_id: Some(e.task.id.clone()),
        reason: Some(format!("near-duplicate of task {} ({:.2})", e.task.id, sim)),
        tier: Some(DuplicateTier::Semantic),
      },
      Some((sim, _)) => DuplicateCheckResult { similarity: sim, ..Default::default() },
      None => DuplicateCheckResult::default(),
    }
  }

  fn topic_set(&self, task: &Task, fp: &TaskFingerprint) -> BTreeSet<String> {
    let mut out: BTreeSet<String> = task.tags.iter().map(|t| self.normalizer.canonical(t)).collect();
    if !task.topic.trim().is_empty() {
      out.insert(self.normalizer.canonical(&task.topic));
    }
    out.insert(fp.topic.clone());
    out
  }
}

fn full_text(task: &Task) -> String {
  format!("{}\n{}", task.question, task.solution)
}
