//! Topic coverage planning ("blueprint").
//!
//! Flow:
//! 1) Order topics: seeded shuffle, then least historically covered and
//!    highest priority first.
//! 2) First pass schedules every topic once (or the first `count` topics).
//! 3) Remaining slots go to the topic with the lowest weighted coverage.
//! 4) Difficulties follow a global mix, shuffled with the same RNG.
//!
//! Given the same inputs and seed the plan is identical.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::domain::{BlueprintItem, Difficulty, TaskBlueprint, TopicEntry};

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DifficultyMix {
  pub easy: f32,
  pub medium: f32,
  pub hard: f32,
}

impl Default for DifficultyMix {
  fn default() -> Self {
    Self { easy: 0.4, medium: 0.4, hard: 0.2 }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
  pub difficulty_mix: DifficultyMix,
  pub question_types: Vec<String>,
  pub max_evidence_snippets: usize,
}

impl Default for PlannerConfig {
  fn default() -> Self {
    Self {
      difficulty_mix: DifficultyMix::default(),
      question_types: ["calculation", "explanation", "construction", "analysis"].iter().map(|s| s.to_string()).collect(),
      max_evidence_snippets: 3,
    }
  }
}

pub struct BlueprintBuilder<'a> {
  config: &'a PlannerConfig,
  rng: StdRng,
}

impl<'a> BlueprintBuilder<'a> {
  /// Seeded builder for reproducible plans; `None` draws from entropy.
  pub fn new(config: &'a PlannerConfig, seed: Option<u64>) -> Self {
    let rng = match seed {
      Some(s) => StdRng::seed_from_u64(s),
      None => StdRng::from_entropy(),
    };
    Self { config, rng }
  }

  #[instrument(level = "debug", skip(self, inventory, history), fields(topics = inventory.len(), %count))]
  pub fn build(&mut self, inventory: &[TopicEntry], count: usize, history: &HashMap<String, u32>) -> TaskBlueprint {
    if inventory.is_empty() || count == 0 {
      return TaskBlueprint::default();
    }

    let order = self.topic_order(inventory, history);
    let allocation = allocate(&order, inventory, count, history);
    let difficulties = self.difficulty_sequence(count);

    let types = &self.config.question_types;
    let type_offset = if types.is_empty() { 0 } else { self.rng.gen_range(0..types.len()) };

    let items: Vec<BlueprintItem> = allocation
      .iter()
      .zip(difficulties)
      .enumerate()
      .map(|(i, (&topic_idx, difficulty))| {
        let topic = &inventory[topic_idx];
        BlueprintItem {
          topic_id: topic.id.clone(),
          topic_name: topic.name.clone(),
          difficulty,
          question_type: if types.is_empty() { "general".into() } else { types[(type_offset + i) % types.len()].clone() },
          evidence_snippets: topic
            .evidence
            .iter()
            .filter(|e| !e.trim().is_empty())
            .take(self.config.max_evidence_snippets)
            .cloned()
            .collect(),
          doc_ids: topic.doc_ids.clone(),
        }
      })
      .collect();

    debug!(target: "generation", items = items.len(), "Blueprint built");
    TaskBlueprint { items }
  }

  /// Indices into `inventory`, least covered / highest priority first.
  fn topic_order(&mut self, inventory: &[TopicEntry], history: &HashMap<String, u32>) -> Vec<usize> {
    let mut order: Vec<usize> = (0..inventory.len()).collect();
    order.shuffle(&mut self.rng);
    order.sort_by(|&a, &b| {
      let ca = history.get(&inventory[a].id).copied().unwrap_or(0);
      let cb = history.get(&inventory[b].id).copied().unwrap_or(0);
      ca.cmp(&cb).then_with(|| {
        inventory[b]
          .priority
          .partial_cmp(&inventory[a].priority)
          .unwrap_or(std::cmp::Ordering::Equal)
      })
    });
    order
  }

  /// Largest-remainder split of the mix over `count`, shuffled.
  fn difficulty_sequence(&mut self, count: usize) -> Vec<Difficulty> {
    let mut seq = difficulty_counts(&self.config.difficulty_mix, count)
      .into_iter()
      .flat_map(|(d, n)| std::iter::repeat(d).take(n))
      .collect::<Vec<_>>();
    seq.shuffle(&mut self.rng);
    seq
  }
}

fn allocate(order: &[usize], inventory: &[TopicEntry], count: usize, history: &HashMap<String, u32>) -> Vec<usize> {
  let mut out: Vec<usize> = order.iter().copied().take(count).collect();
  let mut planned: HashMap<usize, u32> = out.iter().map(|&i| (i, 1)).collect();

  while out.len() < count {
    let next = order
      .iter()
      .copied()
      .min_by(|&a, &b| weighted_load(a, inventory, history, &planned)
        .partial_cmp(&weighted_load(b, inventory, history, &planned))
        .unwrap_or(std::cmp::Ordering::Equal))
      .unwrap_or(order[0]);
    *planned.entry(next).or_insert(0) += 1;
    out.push(next);
  }
  out
}

fn weighted_load(idx: usize, inventory: &[TopicEntry], history: &HashMap<String, u32>, planned: &HashMap<usize, u32>) -> f32 {
  let topic = &inventory[idx];
  let seen = history.get(&topic.id).copied().unwrap_or(0) + planned.get(&idx).copied().unwrap_or(0);
  seen as f32 / topic.priority.max(0.01)
}

/// Item counts per difficulty for `count` items, summing to exactly `count`.
pub fn difficulty_counts(mix: &DifficultyMix, count: usize) -> Vec<(Difficulty, usize)> {
  let weights = [
    (Difficulty::Easy, mix.easy.max(0.0)),
    (Difficulty::Medium, mix.medium.max(0.0)),
    (Difficulty::Hard, mix.hard.max(0.0)),
  ];
  let total: f32 = weights.iter().map(|(_, w)| w).sum();
  if total <= 0.0 {
    return vec![(Difficulty::Medium, count)];
  }

  let exact: Vec<f32> = weights.iter().map(|(_, w)| w / total * count as f32).collect();
  let mut counts: Vec<usize> = exact.iter().map(|x| x.floor() as usize).collect();
  let mut remaining = count - counts.iter().sum::<usize>();

  let mut by_remainder: Vec<usize> = (0..weights.len()).collect();
  by_remainder.sort_by(|&a, &b| {
    let ra = exact[a] - exact[a].floor();
    let rb = exact[b] - exact[b].floor();
    rb.partial_cmp(&ra).unwrap_or(std::cmp::Ordering::Equal).then(a.cmp(&b))
  });
  for idx in by_remainder {
    if remaining == 0 {
      break;
    }
    counts[idx] += 1;
    remaining -= 1;
  }

  weights.iter().zip(counts).map(|((d, _), n)| (*d, n)).collect()
}
