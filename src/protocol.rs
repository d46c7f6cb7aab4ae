//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and clients independently.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{GenerationResult, Task, TopicEntry};
use crate::generator::GenerationEvent;
use crate::state::ModuleRecord;

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    Generate {
        #[serde(rename = "moduleId")]
        module_id: String,
        #[serde(flatten)]
        request: GenerateIn,
    },
    Cancel,
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Progress {
        event: GenerationEvent,
    },
    GenerationResult {
        result: GenerationResult,
    },
    Cancelling,
    Error {
        message: String,
    },
}

//
// HTTP request/response DTOs
//

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateIn {
    pub count: usize,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Deserialize)]
pub struct VariantIn {
    #[serde(rename = "taskId")]
    pub task_id: String,
    #[serde(default)]
    pub debug: bool,
}

/// Upstream module upsert: topic inventory and persisted tasks.
#[derive(Debug, Deserialize)]
pub struct ModuleIn {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub topics: Vec<TopicEntry>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// A candidate task checked against a module without being stored.
#[derive(Debug, Deserialize)]
pub struct CandidateIn {
    pub question: String,
    #[serde(default)]
    pub solution: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub subtasks: Vec<String>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
pub struct FingerprintIn {
    pub question: String,
    #[serde(default)]
    pub solution: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub subtasks: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SimilarityIn {
    pub a: String,
    pub b: String,
}
#[derive(Debug, Serialize)]
pub struct SimilarityOut {
    pub jaccard: f32,
    pub ngram: f32,
    pub soft: f32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSummary {
    pub id: String,
    pub name: String,
    pub topic_count: usize,
    pub task_count: usize,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleOut {
    pub id: String,
    pub name: String,
    pub topics: Vec<TopicEntry>,
    pub tasks: Vec<Task>,
    pub coverage: HashMap<String, u32>,
    pub updated_at: DateTime<Utc>,
}

pub fn to_summary(m: &ModuleRecord) -> ModuleSummary {
    ModuleSummary {
        id: m.id.clone(),
        name: m.name.clone(),
        topic_count: m.topics.len(),
        task_count: m.tasks.len(),
        updated_at: m.updated_at,
    }
}

pub fn to_out(m: ModuleRecord) -> ModuleOut {
    ModuleOut {
        id: m.id,
        name: m.name,
        topics: m.topics,
        tasks: m.tasks,
        coverage: m.coverage,
        updated_at: m.updated_at,
    }
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
    pub provider: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_message_flattens_request() {
        let msg: ClientWsMessage =
            serde_json::from_str(r#"{"type":"generate","moduleId":"m1","count":3,"seed":7}"#).unwrap();
        match msg {
            ClientWsMessage::Generate { module_id, request } => {
                assert_eq!(module_id, "m1");
                assert_eq!(request.count, 3);
                assert_eq!(request.seed, Some(7));
                assert!(!request.debug);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn progress_message_nests_event() {
        let msg = ServerWsMessage::Progress {
            event: GenerationEvent::ItemFailed { index: 2, last_error: "boom".into() },
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "progress");
        assert_eq!(v["event"]["type"], "item_failed");
        assert_eq!(v["event"]["lastError"], "boom");
    }
}
