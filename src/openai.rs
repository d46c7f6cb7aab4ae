//! Minimal OpenAI-compatible client used as the pipeline's completion capability.
//!
//! We only call chat.completions and request either plain text or a strict JSON object.
//! Calls are instrumented and log model names, latencies, and response sizes (not contents).
//!
//! NOTE: We never log the API key.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::completion::{CompletionError, CompletionProvider, CompletionRequest};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
  pub model: String,
}

impl OpenAI {
  /// Construct the client if we find OPENAI_API_KEY; otherwise return None.
  pub fn from_env() -> Option<Self> {
    let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty())?;
    let base_url =
      std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
    let model =
      std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());

    let client = reqwest::Client::builder()
      .timeout(REQUEST_TIMEOUT)
      .build()
      .ok()?;

    Some(Self { client, api_key, base_url, model })
  }

  #[instrument(level = "info", skip(self, request), fields(model = %self.model, json = request.json, user_len = request.user.len()))]
  async fn chat(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
    let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
    let req = ChatCompletionRequest {
      model: self.model.clone(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: request.system.clone() },
        ChatMessageReq { role: "user".into(), content: request.user.clone() },
      ],
      temperature: request.temperature,
      response_format: request.json.then(|| ResponseFormat { r#type: "json_object".into() }),
    };

    let start = Instant::now();
    let res = self.client.post(&url)
      .header(USER_AGENT, "taskforge-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req).send().await.map_err(map_reqwest_error)?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let message = extract_openai_error(&body).unwrap_or(body);
      error!(elapsed = ?start.elapsed(), %status, "Completion call failed");
      return Err(status_error(status.as_u16(), message));
    }

    let body: ChatCompletionResponse = res.json().await.map_err(map_reqwest_error)?;
    if let Some(usage) = &body.usage {
      info!(prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    let text = body.choices.first()
      .and_then(|c| c.message.content.clone())
      .unwrap_or_default().trim().to_string();

    info!(elapsed = ?start.elapsed(), response_len = text.len(), "Model response received");
    if text.is_empty() {
      return Err(CompletionError::EmptyResponse);
    }
    Ok(text)
  }
}

#[async_trait]
impl CompletionProvider for OpenAI {
  async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
    self.chat(request).await
  }

  fn name(&self) -> &str {
    &self.model
  }
}

/// Rejected credentials make the provider unusable for the rest of the run.
fn status_error(status: u16, message: String) -> CompletionError {
  match status {
    401 | 403 => CompletionError::Unavailable(format!("credentials rejected ({status}): {message}")),
    _ => CompletionError::Http { status, message },
  }
}

fn map_reqwest_error(e: reqwest::Error) -> CompletionError {
  if e.is_timeout() {
    CompletionError::Timeout
  } else {
    CompletionError::Network(e.to_string())
  }
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_format: Option<ResponseFormat>,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: String }
#[derive(Serialize)]
struct ResponseFormat { #[serde(rename = "type")] r#type: String }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

/// Try to extract a clean error message from OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  match serde_json::from_str::<EWrap>(body) {
    Ok(w) => Some(w.error.message),
    Err(_) => None,
  }
}
