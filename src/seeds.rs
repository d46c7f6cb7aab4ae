//! Seed data and the offline completion provider.
//!
//! The demo module guarantees the app is useful without external config.
//! `LocalCompletion` stands in for the model when OPENAI_API_KEY is absent:
//! it reads the context lines of the prompt and composes a task from a
//! scenario setting, a modelling tool and an answer style, cycling each list
//! so successive calls come back different.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;

use crate::completion::{CompletionError, CompletionProvider, CompletionRequest};
use crate::config::ModuleCfg;
use crate::domain::{Difficulty, Task, TaskSource, TopicEntry};

pub const DEMO_MODULE_ID: &str = "ti-demo";

/// Built-in module: four topics with evidence and a few persisted tasks.
pub fn seed_modules() -> Vec<ModuleCfg> {
  let topic = |id: &str, evidence: &[&str], priority: f32| TopicEntry {
    id: id.into(),
    name: id.into(),
    evidence: evidence.iter().map(|s| s.to_string()).collect(),
    doc_ids: ["lecture-notes".to_string()].into_iter().collect(),
    priority,
  };
  let task = |id: &str, topic: &str, difficulty: Difficulty, question: &str, solution: &str| Task {
    id: id.into(),
    module_id: DEMO_MODULE_ID.into(),
    question: question.into(),
    solution: solution.into(),
    tags: vec![topic.into()],
    difficulty,
    topic: topic.into(),
    subtasks: vec![],
    fingerprint: None,
    embedding: None,
    source: TaskSource::Seed,
    created_at: Utc::now(),
  };

  vec![ModuleCfg {
    id: DEMO_MODULE_ID.into(),
    name: Some("Theoretical Computer Science (demo)".into()),
    topics: vec![
      topic("Graphs", &["A graph G = (V, E) consists of vertices and edges.", "Dijkstra computes shortest paths for non-negative weights."], 1.0),
      topic("Automata", &["A DFA is a 5-tuple (Q, Σ, δ, q0, F).", "Every NFA can be converted into an equivalent DFA."], 1.5),
      topic("Boolean Logic", &["Every Boolean function has a disjunctive normal form."], 1.0),
      topic("Number Systems", &["Two's complement represents negative integers in binary."], 0.8),
    ],
    tasks: vec![
      task("seed-1", "Graphs", Difficulty::Medium,
        "# Shortest paths\nRun Dijkstra from vertex A on the graph with edges AB=4, AC=1, CB=2, BD=5 and list the distances.",
        "A=0, C=1, B=3, D=8"),
      task("seed-2", "Automata", Difficulty::Easy,
        "# Even binary numbers\nConstruct a DFA over {0,1} that accepts exactly the binary encodings of even numbers.",
        "Two states; accept iff the last symbol read is 0."),
      task("seed-3", "Number Systems", Difficulty::Easy,
        "# Binary to decimal\nConvert 101101 from binary to decimal.",
        "45"),
    ],
  }]
}

/// Scenario settings: (short title, opening sentence).
const SETTINGS: &[(&str, &str)] = &[
  ("Harbor cranes", "A harbor schedules cranes that unload container ships along the quay"),
  ("Subway network", "A city subway connects stations across tangled lines and transfers"),
  ("Library loans", "A university library tracks borrowed books, returns and waiting lists"),
  ("Weather sensors", "Rooftop weather sensors report wind, humidity and pressure every minute"),
  ("Chess tournament", "A chess club pairs players in rounds and records every game result"),
  ("Bakery orders", "A bakery receives bread orders overnight and plans oven batches at dawn"),
  ("Hospital triage", "An emergency ward ranks incoming patients by urgency on arrival"),
  ("Music playlist", "A streaming app shuffles songs while avoiding repeated artists"),
  ("Parcel lockers", "Parcel lockers in a station hold deliveries until customers collect them"),
  ("Vending machine", "A vending machine accepts coins, returns change and dispenses snacks"),
  ("Traffic lights", "Traffic lights at a junction cycle through phases for cars and bikes"),
  ("Garden irrigation", "Garden irrigation valves open in zones depending on soil moisture"),
  ("Elevator bank", "An elevator bank in an office tower answers calls from many floors"),
];

/// Modelling tools: (short title, instruction, solution sketch).
const TOOLS: &[(&str, &str, &str)] = &[
  ("priority queues", "Model the waiting items with a priority queue keyed by deadline", "Introduce a priority queue ordered by deadline."),
  ("shortest paths", "Find the cheapest route between two chosen points", "Run a shortest path search with nonnegative weights."),
  ("state machines", "Describe the behaviour as a finite state machine with labelled transitions", "Draw the states and label each transition."),
  ("binary encodings", "Encode each record as a fixed-width binary word", "Use enough bits for the largest value."),
  ("truth tables", "Capture the control condition in a truth table over its inputs", "List every input row and mark the true outputs."),
  ("spanning trees", "Connect all locations with minimum total cable length", "Apply Kruskal and keep the cheapest safe edges."),
  ("hash lookups", "Store the records in a hash table with linear probing", "Hash each key and probe linearly on collisions."),
  ("recurrences", "Set up a recurrence for the total work and solve it", "Unfold the recurrence and sum the levels."),
  ("sorting passes", "Sort the records with insertion sort and count the swaps", "Insert each record into the sorted prefix."),
  ("regular patterns", "Write a regular expression accepting the valid log lines", "Combine the allowed tokens with alternation and stars."),
  ("invariants", "State a loop invariant that keeps the bookkeeping consistent", "Check the invariant before and after each iteration."),
];

const ANSWER_STYLES: &[&str] = &[
  "Give a precise definition first, then a small example.",
  "Work through the calculation step by step.",
  "Compare two approaches and say when each one wins.",
  "Prove that your construction is correct.",
  "Sketch pseudocode and state its running time.",
  "Explain the key idea to a fellow student.",
];

/// Deterministic offline provider.
#[derive(Default)]
pub struct LocalCompletion {
  calls: AtomicUsize,
}

impl LocalCompletion {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl CompletionProvider for LocalCompletion {
  async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
    let call = self.calls.fetch_add(1, Ordering::Relaxed);
    let topic = context_line(&request.user, "Topic:").unwrap_or("the topic");
    let difficulty = context_line(&request.user, "Difficulty:").map(Difficulty::parse).unwrap_or_default();

    // Setting and tool cycle with coprime lengths, so titles and bodies stay
    // apart; the variable count keeps fingerprints apart.
    let (setting, opening) = SETTINGS[call % SETTINGS.len()];
    let (tool, instruction, solution) = TOOLS[call % TOOLS.len()];
    let style = ANSWER_STYLES[call % ANSWER_STYLES.len()];
    let variables = call + 2;

    let out = serde_json::json!({
      "question": format!("# {setting}: {tool}\n{opening}. {instruction} ({topic}, {variables} input variables). {style}"),
      "solution": solution,
      "tags": [topic],
      "difficulty": difficulty.as_str(),
      "subtasks": [],
    });
    Ok(out.to_string())
  }

  fn name(&self) -> &str {
    "local"
  }
}

fn context_line<'a>(prompt: &'a str, key: &str) -> Option<&'a str> {
  prompt
    .lines()
    .find_map(|l| l.trim().strip_prefix(key))
    .map(str::trim)
    .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::completion::parse_generated;
  use crate::dedup::{DedupConfig, DuplicateDetector, PoolEntry};
  use crate::domain::TaskFingerprint;
  use crate::fingerprint::{fingerprint_task, TopicNormalizer};

  fn request(user: &str) -> CompletionRequest {
    CompletionRequest { system: String::new(), user: user.into(), temperature: 0.0, json: true }
  }

  #[tokio::test]
  async fn local_completion_reads_context_and_rotates() {
    let local = LocalCompletion::new();
    let req = request("Topic: Graphs\nDifficulty: hard\nQuestion type: analysis\nEvidence:\n- x");

    let first = parse_generated(&local.complete(&req).await.unwrap()).unwrap();
    let second = parse_generated(&local.complete(&req).await.unwrap()).unwrap();

    assert!(first.question.starts_with("# Harbor cranes: priority queues"));
    assert!(first.question.contains("(Graphs, 2 input variables)"));
    assert_eq!(first.tags, vec!["Graphs".to_string()]);
    assert_eq!(first.difficulty.as_deref(), Some("hard"));
    assert!(second.question.starts_with("# Subway network: shortest paths"));
  }

  #[tokio::test]
  async fn local_completion_outputs_do_not_collide() {
    let local = LocalCompletion::new();
    let cfg = DedupConfig::default();
    let n = TopicNormalizer::default();

    let mut tasks: Vec<Task> = Vec::new();
    for (i, topic) in ["Graphs", "Automata", "Graphs", "Boolean Logic"].iter().cycle().take(24).enumerate() {
      let raw = local.complete(&request(&format!("Topic: {topic}\nDifficulty: medium"))).await.unwrap();
      let generated = parse_generated(&raw).unwrap();
      tasks.push(serde_json::from_value(serde_json::json!({
        "id": format!("local-{i}"), "question": generated.question, "solution": generated.solution, "tags": generated.tags, "topic": topic,
      })).unwrap());
    }

    let fps: Vec<TaskFingerprint> = tasks.iter().map(|t| fingerprint_task(&n, t)).collect();
    let detector = DuplicateDetector::new(&cfg, &n);
    for i in 1..tasks.len() {
      let pool: Vec<PoolEntry<'_>> = tasks[..i].iter().zip(&fps[..i]).map(|(task, fingerprint)| PoolEntry { task, fingerprint }).collect();
      let verdict = detector.check(&tasks[i], &fps[i], &pool);
      assert!(!verdict.is_duplicate, "call {i}: {:?}", verdict.reason);
    }
  }

  #[tokio::test]
  async fn local_completion_survives_unstructured_prompts() {
    let out = LocalCompletion::new().complete(&request("no context here")).await.unwrap();
    let task = parse_generated(&out).unwrap();
    assert!(task.question.contains("the topic"));
    assert_eq!(task.difficulty.as_deref(), Some("unknown"));
  }

  #[test]
  fn demo_module_is_consistent() {
    let modules = seed_modules();
    let demo = &modules[0];
    assert_eq!(demo.id, DEMO_MODULE_ID);
    for t in &demo.tasks {
      assert!(demo.topics.iter().any(|topic| topic.id == t.topic), "{}", t.id);
    }
  }
}
