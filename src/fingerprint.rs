//! Task fingerprints: canonical topic + archetype + structural features.
//!
//! The fingerprint string is a pure function of (topic, archetype, features);
//! exact duplicate detection relies on that. Also hosts the topic
//! normalization table and the explicit per-module fingerprint cache.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::archetype;
use crate::domain::{Task, TaskFeatures, TaskFingerprint};
use crate::features;
use crate::text::slugify;

pub const FALLBACK_TOPIC: &str = "general";
const SEPARATOR: &str = "|";
const HASH_LEN: usize = 8;

/// Built-in alias -> canonical topic slug.
const BUILTIN_ALIASES: &[(&str, &str)] = &[
  ("graphs", "graph-theory"),
  ("graph", "graph-theory"),
  ("graph-theory", "graph-theory"),
  ("graphentheorie", "graph-theory"),
  ("graphen", "graph-theory"),
  ("automata", "automata-theory"),
  ("automaton", "automata-theory"),
  ("automata-theory", "automata-theory"),
  ("automaten", "automata-theory"),
  ("automatentheorie", "automata-theory"),
  ("finite-automata", "automata-theory"),
  ("formal-languages", "formal-languages"),
  ("formale-sprachen", "formal-languages"),
  ("boolean-logic", "boolean-algebra"),
  ("boolean-algebra", "boolean-algebra"),
  ("boolesche-algebra", "boolean-algebra"),
  ("aussagenlogik", "boolean-algebra"),
  ("propositional-logic", "boolean-algebra"),
  ("number-systems", "number-systems"),
  ("zahlensysteme", "number-systems"),
  ("coding-theory", "coding-theory"),
  ("codierungstheorie", "coding-theory"),
  ("kodierung", "coding-theory"),
  ("circuits", "digital-circuits"),
  ("digital-circuits", "digital-circuits"),
  ("schaltnetze", "digital-circuits"),
  ("schaltwerke", "digital-circuits"),
  ("algorithms", "algorithms"),
  ("algorithmen", "algorithms"),
  ("data-structures", "data-structures"),
  ("datenstrukturen", "data-structures"),
  ("sorting", "sorting"),
  ("sortieren", "sorting"),
  ("recursion", "recursion"),
  ("rekursion", "recursion"),
];

/// Maps raw tags to canonical topic slugs.
#[derive(Clone, Debug)]
pub struct TopicNormalizer {
  aliases: HashMap<String, String>,
}

impl Default for TopicNormalizer {
  fn default() -> Self {
    Self::new(&HashMap::new())
  }
}

impl TopicNormalizer {
  /// Built-in table extended (and overridden) by `extra` aliases.
  pub fn new(extra: &HashMap<String, String>) -> Self {
    let mut aliases: HashMap<String, String> = BUILTIN_ALIASES
      .iter()
      .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
      .collect();
    for (k, v) in extra {
      let key = slugify(k);
      let canonical = slugify(v);
      if !key.is_empty() && !canonical.is_empty() {
        aliases.insert(key, canonical);
      }
    }
    Self { aliases }
  }

  /// Table lookup only.
  pub fn lookup(&self, raw: &str) -> Option<&str> {
    self.aliases.get(&slugify(raw)).map(String::as_str)
  }

  /// Lookup, else slug, else `"general"`.
  pub fn canonical(&self, raw: &str) -> String {
    if let Some(hit) = self.lookup(raw) {
      return hit.to_string();
    }
    let slug = slugify(raw);
    if slug.is_empty() { FALLBACK_TOPIC.to_string() } else { slug }
  }

  /// Canonical topic for a tag list. Tags are sorted first so the result does
  /// not depend on tag order; a tag known to the table beats unknown ones.
  pub fn topic_for_tags(&self, tags: &[String], fallback_topic: &str) -> String {
    let mut slugs: Vec<String> = tags.iter().map(|t| slugify(t)).filter(|s| !s.is_empty()).collect();
    slugs.sort();
    slugs.dedup();

    if let Some(known) = slugs.iter().find_map(|s| self.aliases.get(s)) {
      return known.clone();
    }
    if let Some(first) = slugs.first() {
      return first.clone();
    }
    self.canonical(fallback_topic)
  }
}

/// 31-based rolling hash over chars, base-36, truncated.
pub fn short_hash(input: &str) -> String {
  let mut h: i32 = 0;
  for ch in input.chars() {
    h = h.wrapping_mul(31).wrapping_add(ch as i32);
  }
  let mut n = h.unsigned_abs();
  if n == 0 {
    return "0".into();
  }
  let digits = b"0123456789abcdefghijklmnopqrstuvwxyz";
  let mut out = Vec::new();
  while n > 0 {
    out.push(digits[(n % 36) as usize]);
    n /= 36;
  }
  out.reverse();
  out.truncate(HASH_LEN);
  String::from_utf8(out).unwrap_or_default()
}

/// Join the fingerprint parts in their fixed order.
pub fn compose(topic: &str, archetype: &str, f: &TaskFeatures) -> String {
  let mut parts: Vec<String> = vec![
    topic.to_string(),
    archetype.to_string(),
    format!("sub:{}", f.num_subtasks),
    format!("diff:{}", f.difficulty),
    format!("cmplx:{}", f.complexity),
  ];
  if let Some(v) = f.num_variables {
    parts.push(format!("vars:{v}"));
  }
  if f.requires_diagram {
    parts.push("diag".into());
  }
  if f.requires_table {
    parts.push("tbl".into());
  }
  if f.requires_code {
    parts.push("code".into());
  }
  parts.retain(|p| !p.is_empty());
  parts.join(SEPARATOR)
}

/// Fingerprint raw text. The solution only feeds the archetype when the
/// question alone classifies as `general`.
pub fn fingerprint(
  normalizer: &TopicNormalizer,
  question: &str,
  solution: &str,
  tags: &[String],
  fallback_topic: &str,
  subtasks: Option<&[String]>,
) -> TaskFingerprint {
  let topic = normalizer.topic_for_tags(tags, fallback_topic);
  let mut archetype = archetype::classify(question);
  if archetype == archetype::GENERAL {
    archetype = archetype::classify(solution);
  }
  let features = features::extract(question, subtasks);
  let fingerprint = compose(&topic, archetype, &features);
  let hash = short_hash(&fingerprint);
  TaskFingerprint { topic, archetype: archetype.to_string(), features, fingerprint, hash }
}

pub fn fingerprint_task(normalizer: &TopicNormalizer, task: &Task) -> TaskFingerprint {
  let subtasks = if task.subtasks.is_empty() { None } else { Some(task.subtasks.as_slice()) };
  fingerprint(normalizer, &task.question, &task.solution, &task.tags, &task.topic, subtasks)
}

/// Fingerprints for one module's task list.
#[derive(Debug, Default)]
pub struct ModuleFingerprints {
  pub task_count: usize,
  /// fingerprint string -> first task id carrying it
  pub by_fingerprint: HashMap<String, String>,
  pub by_task: HashMap<String, TaskFingerprint>,
}

impl ModuleFingerprints {
  pub fn build(normalizer: &TopicNormalizer, tasks: &[Task]) -> Self {
    let mut out = Self { task_count: tasks.len(), ..Default::default() };
    for t in tasks {
      let fp = fingerprint_task(normalizer, t);
      out.by_fingerprint.entry(fp.fingerprint.clone()).or_insert_with(|| t.id.clone());
      out.by_task.insert(t.id.clone(), fp);
    }
    out
  }
}

/// Explicit per-module cache. Rebuilt when the task count changes, or after
/// `invalidate`.
#[derive(Debug, Default)]
pub struct FingerprintCache {
  modules: HashMap<String, Arc<ModuleFingerprints>>,
}

impl FingerprintCache {
  pub fn get_or_build(&mut self, normalizer: &TopicNormalizer, module_id: &str, tasks: &[Task]) -> Arc<ModuleFingerprints> {
    if let Some(hit) = self.modules.get(module_id) {
      if hit.task_count == tasks.len() {
        return hit.clone();
      }
      debug!(target: "generation", %module_id, cached = hit.task_count, current = tasks.len(), "Fingerprint cache stale; rebuilding");
    }
    let built = Arc::new(ModuleFingerprints::build(normalizer, tasks));
    self.modules.insert(module_id.to_string(), built.clone());
    built
  }

  pub fn invalidate(&mut self, module_id: &str) -> bool {
    self.modules.remove(module_id).is_some()
  }

  pub fn contains(&self, module_id: &str) -> bool {
    self.modules.contains_key(module_id)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn tags(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
  }

  fn task(id: &str, question: &str) -> Task {
    serde_json::from_value(serde_json::json!({ "id": id, "question": question, "tags": ["Graphs"] })).unwrap()
  }

  #[test]
  fn fingerprint_is_idempotent() {
    let n = TopicNormalizer::default();
    let q = "Run BFS on the graph below.\na) list the visiting order\nb) give the BFS tree";
    let a = fingerprint(&n, q, "A, B, C", &tags(&["Graphs"]), "", None);
    let b = fingerprint(&n, q, "A, B, C", &tags(&["Graphs"]), "", None);
    assert_eq!(a.fingerprint, b.fingerprint);
    assert_eq!(a.hash, b.hash);
    assert!(a.fingerprint.starts_with("graph-theory|graph-traversal|sub:2|"));
  }

  #[test]
  fn fingerprint_ignores_tag_order() {
    let n = TopicNormalizer::default();
    let q = "Explain the pumping lemma.";
    let a = fingerprint(&n, q, "", &tags(&["a", "b"]), "", None);
    let b = fingerprint(&n, q, "", &tags(&["b", "a"]), "", None);
    assert_eq!(a, b);
  }

  #[test]
  fn topic_normalization_lookup_and_fallbacks() {
    let n = TopicNormalizer::default();
    assert_eq!(n.topic_for_tags(&tags(&["zzz", "Graphentheorie"]), ""), "graph-theory");
    assert_eq!(n.topic_for_tags(&tags(&["Some Odd Tag"]), ""), "some-odd-tag");
    assert_eq!(n.topic_for_tags(&[], "Automata"), "automata-theory");
    assert_eq!(n.topic_for_tags(&tags(&["  "]), ""), FALLBACK_TOPIC);
  }

  #[test]
  fn config_aliases_extend_the_table() {
    let mut extra = HashMap::new();
    extra.insert("Rechnerarchitektur".to_string(), "computer-architecture".to_string());
    let n = TopicNormalizer::new(&extra);
    assert_eq!(n.canonical("rechnerarchitektur"), "computer-architecture");
  }

  #[test]
  fn compose_orders_parts_and_flags() {
    let f = features::extract("Draw the circuit and fill the table for x and y.", None);
    let s = compose("digital-circuits", "circuit-analysis", &f);
    assert_eq!(s, format!("digital-circuits|circuit-analysis|sub:0|diff:easy|cmplx:{}|vars:2|diag|tbl", f.complexity));
  }

  #[test]
  fn short_hash_is_stable_base36() {
    let h = short_hash("graph-theory|general|sub:0|diff:easy|cmplx:3");
    assert_eq!(h, short_hash("graph-theory|general|sub:0|diff:easy|cmplx:3"));
    assert!(!h.is_empty() && h.len() <= 8);
    assert!(h.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    assert_ne!(h, short_hash("graph-theory|general|sub:1|diff:easy|cmplx:4"));
    assert_eq!(short_hash(""), "0");
  }

  #[test]
  fn cache_rebuilds_on_size_change_and_invalidate() {
    let n = TopicNormalizer::default();
    let mut cache = FingerprintCache::default();
    let mut tasks = vec![task("t1", "Run BFS on the graph.")];

    let first = cache.get_or_build(&n, "m1", &tasks);
    assert_eq!(first.task_count, 1);
    let again = cache.get_or_build(&n, "m1", &tasks);
    assert!(Arc::ptr_eq(&first, &again));

    tasks.push(task("t2", "Run DFS on the graph."));
    let grown = cache.get_or_build(&n, "m1", &tasks);
    assert_eq!(grown.task_count, 2);
    assert!(grown.by_task.contains_key("t2"));

    assert!(cache.invalidate("m1"));
    assert!(!cache.contains("m1"));
    assert!(!cache.invalidate("m1"));
  }
}
