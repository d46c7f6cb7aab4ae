//! Loading agent configuration (prompts, pipeline tuning, topic aliases and an
//! optional module bank) from TOML.
//!
//! See `AgentConfig` and `Prompts` for expected schema. Every section is
//! optional; missing values fall back to the defaults below.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::{error, info};

use crate::blueprint::PlannerConfig;
use crate::dedup::DedupConfig;
use crate::domain::{Task, TopicEntry};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AgentConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub generation: GenerationSettings,
  #[serde(default)]
  pub dedup: DedupConfig,
  #[serde(default)]
  pub planner: PlannerConfig,
  /// alias -> canonical topic slug
  #[serde(default)]
  pub topic_aliases: HashMap<String, String>,
  #[serde(default)]
  pub modules: Vec<ModuleCfg>,
}

/// Module entry accepted in TOML configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct ModuleCfg {
  pub id: String,
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub topics: Vec<TopicEntry>,
  #[serde(default)]
  pub tasks: Vec<Task>,
}

/// Orchestrator tuning.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
  /// Attempts per blueprint item (K).
  pub max_attempts: u32,
  /// Courtesy pause between items, for upstream rate limits.
  pub inter_item_delay_ms: u64,
  pub temperature: f32,
  /// Existing task titles of the same topic shown to the model.
  pub max_context_titles: usize,
  /// Upper bound on one request's `count`.
  pub max_count: usize,
}

impl Default for GenerationSettings {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      inter_item_delay_ms: 0,
      temperature: 0.8,
      max_context_titles: 10,
      max_count: 50,
    }
  }
}

/// Prompts used for generation. Defaults target university CS course material.
/// You can override them in TOML if you need to tune tone/structure.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub generation_system: String,
  /// Placeholders: {topic} {difficulty} {question_type} {evidence} {existing_titles} {avoid}
  pub generation_user_template: String,
  pub variant_system: String,
  /// Placeholders: {topic} {difficulty} {source_question} {source_solution} {avoid}
  pub variant_user_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      generation_system: "You write practice exercises for university computer science courses. Respond ONLY with strict JSON.".into(),
      generation_user_template: "Topic: {topic}\nDifficulty: {difficulty}\nQuestion type: {question_type}\nEvidence:\n{evidence}\nExisting tasks (do not repeat):\n{existing_titles}\nIssues to avoid:\n{avoid}\n\nWrite ONE new exercise grounded in the evidence. Return JSON with fields: question (markdown, start with a '# ' title line), solution, tags (array of strings), difficulty (easy|medium|hard), subtasks (array, may be empty).".into(),
      variant_system: "You write variants of existing exercises: same skill, same structure, new concrete values and wording. Respond ONLY with strict JSON.".into(),
      variant_user_template: "Topic: {topic}\nDifficulty: {difficulty}\nOriginal question:\n{source_question}\nOriginal solution:\n{source_solution}\nIssues to avoid:\n{avoid}\n\nWrite ONE variant. Return JSON with fields: question, solution, tags, difficulty, subtasks.".into(),
    }
  }
}

/// Attempt to load `AgentConfig` from AGENT_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_agent_config_from_env() -> Option<AgentConfig> {
  let path = std::env::var("AGENT_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match parse_agent_config(&s) {
      Ok(cfg) => {
        info!(target: "taskforge_backend", %path, modules = cfg.modules.len(), "Loaded agent config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "taskforge_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "taskforge_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

pub fn parse_agent_config(s: &str) -> Result<AgentConfig, toml::de::Error> {
  toml::from_str::<AgentConfig>(s)
}
