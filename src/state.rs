//! Application state: module store, fingerprint cache, completion provider and config.
//!
//! This module owns:
//!   - modules (topic inventory, persisted tasks, per-topic coverage counts)
//!   - the per-module fingerprint cache
//!   - the topic normalizer built from the configured aliases
//!   - the completion provider (OpenAI if configured, local templates otherwise)
//!
//! Generation runs against a snapshot of a module; accepted tasks are appended
//! afterwards, which invalidates the module's cached fingerprints. Runs on the
//! same module hold its run guard from snapshot to append, so a run always
//! sees every task accepted by the runs before it.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, instrument};

use crate::completion::CompletionProvider;
use crate::config::{load_agent_config_from_env, AgentConfig, ModuleCfg};
use crate::domain::{Task, TopicEntry};
use crate::fingerprint::{FingerprintCache, ModuleFingerprints, TopicNormalizer};
use crate::openai::OpenAI;
use crate::seeds::{seed_modules, LocalCompletion};

#[derive(Clone, Debug)]
pub struct ModuleRecord {
    pub id: String,
    pub name: String,
    pub topics: Vec<TopicEntry>,
    pub tasks: Vec<Task>,
    /// topic id -> number of tasks covering it
    pub coverage: HashMap<String, u32>,
    pub updated_at: DateTime<Utc>,
}

impl ModuleRecord {
    pub fn new(id: String, name: Option<String>, topics: Vec<TopicEntry>, mut tasks: Vec<Task>) -> Self {
        for t in tasks.iter_mut().filter(|t| t.module_id.is_empty()) {
            t.module_id = id.clone();
        }
        let coverage = compute_coverage(&topics, &tasks);
        Self {
            name: name.unwrap_or_else(|| id.clone()),
            id,
            topics,
            tasks,
            coverage,
            updated_at: Utc::now(),
        }
    }

    fn from_cfg(cfg: ModuleCfg) -> Self {
        Self::new(cfg.id, cfg.name, cfg.topics, cfg.tasks)
    }
}

/// Count tasks per inventory topic. A task counts for the topic named by its
/// `topic` field, or else for the first topic one of its tags names.
pub fn compute_coverage(topics: &[TopicEntry], tasks: &[Task]) -> HashMap<String, u32> {
    let mut out: HashMap<String, u32> = topics.iter().map(|t| (t.id.clone(), 0)).collect();
    for task in tasks {
        let hit = topics
            .iter()
            .find(|t| t.id == task.topic)
            .or_else(|| {
                topics.iter().find(|t| {
                    task.tags
                        .iter()
                        .any(|tag| tag.eq_ignore_ascii_case(&t.id) || tag.eq_ignore_ascii_case(&t.name))
                })
            });
        if let Some(topic) = hit {
            *out.entry(topic.id.clone()).or_insert(0) += 1;
        }
    }
    out
}

#[derive(Clone)]
pub struct AppState {
    pub modules: Arc<RwLock<HashMap<String, ModuleRecord>>>,
    pub fingerprints: Arc<RwLock<FingerprintCache>>,
    pub completion: Arc<dyn CompletionProvider>,
    pub config: Arc<AgentConfig>,
    pub normalizer: Arc<TopicNormalizer>,
    /// module id -> guard serializing generation runs on that module
    run_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl AppState {
    /// Build state from env: load config, pick the completion provider, seed modules.
    #[instrument(level = "info", skip_all)]
    pub fn new() -> Self {
        let cfg = load_agent_config_from_env().unwrap_or_default();

        let completion: Arc<dyn CompletionProvider> = match OpenAI::from_env() {
            Some(oa) => {
                info!(target: "taskforge_backend", base_url = %oa.base_url, model = %oa.model, "OpenAI enabled.");
                Arc::new(oa)
            }
            None => {
                info!(target: "taskforge_backend", "OpenAI disabled (no OPENAI_API_KEY). Using local task templates.");
                Arc::new(LocalCompletion::new())
            }
        };

        Self::with_provider(cfg, completion)
    }

    pub fn with_provider(cfg: AgentConfig, completion: Arc<dyn CompletionProvider>) -> Self {
        let normalizer = TopicNormalizer::new(&cfg.topic_aliases);

        // Config modules first; built-in seeds never overwrite them.
        let mut modules = HashMap::<String, ModuleRecord>::new();
        for m in cfg.modules.iter().cloned().chain(seed_modules()) {
            let rec = ModuleRecord::from_cfg(m);
            modules.entry(rec.id.clone()).or_insert(rec);
        }

        for m in modules.values() {
            info!(target: "taskforge_backend", module_id = %m.id, topics = m.topics.len(), tasks = m.tasks.len(), "Startup module inventory");
        }

        Self {
            modules: Arc::new(RwLock::new(modules)),
            fingerprints: Arc::new(RwLock::new(FingerprintCache::default())),
            completion,
            config: Arc::new(cfg),
            normalizer: Arc::new(normalizer),
            run_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Snapshot of one module.
    #[instrument(level = "debug", skip(self), fields(%id))]
    pub async fn module(&self, id: &str) -> Option<ModuleRecord> {
        self.modules.read().await.get(id).cloned()
    }

    /// All modules, sorted by id.
    pub async fn all_modules(&self) -> Vec<ModuleRecord> {
        let mut out: Vec<ModuleRecord> = self.modules.read().await.values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Replace a module's topics and tasks.
    #[instrument(level = "info", skip(self, topics, tasks), fields(%id, topics = topics.len(), tasks = tasks.len()))]
    pub async fn upsert_module(&self, id: &str, name: Option<String>, topics: Vec<TopicEntry>, tasks: Vec<Task>) -> ModuleRecord {
        let rec = {
            let mut modules = self.modules.write().await;
            let name = name.or_else(|| modules.get(id).map(|m| m.name.clone()));
            let rec = ModuleRecord::new(id.to_string(), name, topics, tasks);
            modules.insert(id.to_string(), rec.clone());
            rec
        };
        self.fingerprints.write().await.invalidate(id);
        info!(target: "taskforge_backend", module_id = %id, "Module upserted; fingerprint cache invalidated");
        rec
    }

    /// Wait for exclusive generation access to a module. Hold the guard until the
    /// run's accepted tasks are appended.
    pub async fn run_guard(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = self.run_locks.lock().await.entry(id.to_string()).or_default().clone();
        if lock.try_lock().is_err() {
            debug!(target: "taskforge_backend", module_id = %id, "Waiting for the running generation on this module");
        }
        lock.lock_owned().await
    }

    /// Append accepted tasks and bump coverage. Returns false for unknown modules.
    #[instrument(level = "debug", skip(self, tasks), fields(%id, count = tasks.len()))]
    pub async fn append_tasks(&self, id: &str, tasks: &[Task]) -> bool {
        {
            let mut modules = self.modules.write().await;
            let Some(m) = modules.get_mut(id) else { return false };
            for t in tasks {
                *m.coverage.entry(t.topic.clone()).or_insert(0) += 1;
                m.tasks.push(t.clone());
            }
            m.updated_at = Utc::now();
        }
        self.fingerprints.write().await.invalidate(id);
        true
    }

    /// Cached fingerprints for a module snapshot.
    pub async fn fingerprints_for(&self, module: &ModuleRecord) -> Arc<ModuleFingerprints> {
        let mut cache = self.fingerprints.write().await;
        if !cache.contains(&module.id) {
            debug!(target: "taskforge_backend", module_id = %module.id, tasks = module.tasks.len(), "Building module fingerprints");
        }
        cache.get_or_build(&self.normalizer, &module.id, &module.tasks)
    }
}
