//! The text-completion capability the pipeline calls, and parsing of its
//! structured output into a candidate task.
//!
//! Providers: `openai::OpenAI` (HTTP) and `seeds::LocalCompletion` (offline).

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::util::strip_code_fences;

/// One completion call.
#[derive(Clone, Debug)]
pub struct CompletionRequest {
  pub system: String,
  pub user: String,
  pub temperature: f32,
  /// Ask for a strict JSON object.
  pub json: bool,
}

#[derive(Debug, Error)]
pub enum CompletionError {
  #[error("completion HTTP {status}: {message}")]
  Http { status: u16, message: String },
  #[error("network error: {0}")]
  Network(String),
  #[error("completion timed out")]
  Timeout,
  #[error("completion returned no content")]
  EmptyResponse,
  #[error("completion provider unavailable: {0}")]
  Unavailable(String),
}

impl CompletionError {
  /// Worth another attempt (rate limits, 5xx, network, timeouts).
  pub fn is_transient(&self) -> bool {
    match self {
      CompletionError::Http { status, .. } => *status == 429 || *status >= 500,
      CompletionError::Network(_) | CompletionError::Timeout | CompletionError::EmptyResponse => true,
      CompletionError::Unavailable(_) => false,
    }
  }
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
  async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError>;

  /// Short name for logs and debug reports.
  fn name(&self) -> &str;
}

/// Why a completion could not be turned into a candidate.
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
  #[error("invalid structured output: {0}")]
  InvalidJson(String),
  #[error("invalid structured output: missing or empty field '{0}'")]
  MissingField(&'static str),
}

/// What the model is asked to return.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct GeneratedTask {
  #[serde(default)]
  pub question: String,
  #[serde(default)]
  pub solution: String,
  #[serde(default)]
  pub tags: Vec<String>,
  #[serde(default)]
  pub difficulty: Option<String>,
  #[serde(default)]
  pub subtasks: Vec<String>,
}

pub fn parse_generated(raw: &str) -> Result<GeneratedTask, ParseError> {
  let body = strip_code_fences(raw);
  let gen: GeneratedTask = serde_json::from_str(body).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
  if gen.question.trim().is_empty() {
    return Err(ParseError::MissingField("question"));
  }
  if gen.solution.trim().is_empty() {
    return Err(ParseError::MissingField("solution"));
  }
  Ok(gen)
}
